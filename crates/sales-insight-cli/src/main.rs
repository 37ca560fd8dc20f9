//! Sales Insight CLI
//!
//! Command-line interface for:
//! - Asking one question and printing the `{query, data, chart}` result
//! - Serving the HTTP entry point (`POST /insight`)
//! - Inspecting the queryable schema and the users of a store snapshot
//! - Writing the demo snapshot to disk

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;

use sales_insight_llm::prompts::{SCHEMA_DESCRIPTION, SCHEMA_PROMPT_VERSION};
use sales_insight_llm::{InsightPipeline, PipelineConfig, PipelineResult};
use sales_insight_store::{demo_snapshot, Entity, InMemoryStore, StoreConfig};

mod backend;
mod server;

use backend::LlmArgs;

#[derive(Parser)]
#[command(name = "sales-insight")]
#[command(author, version, about = "Sales Insight: ask questions about sales data, get a query, rows and a chart")]
struct Cli {
    /// More log output on stderr (`-v` info, `-vv` debug, `-vvv` trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Store snapshot (JSON). The built-in demo data is used when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    data: Option<PathBuf>,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question and print the result JSON.
    Ask {
        /// The question, e.g. "total sales by product category".
        question: String,
        /// Subject id or email of the caller; decides which region is visible.
        #[arg(long)]
        subject: String,
        /// Print compact JSON instead of pretty JSON.
        #[arg(long)]
        compact: bool,
    },

    /// Serve `POST /insight` over HTTP.
    ///
    /// The caller is read from the `x-subject-id` header.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Write `{"addr": ...}` here once listening (useful with port 0).
        #[arg(long)]
        ready_file: Option<PathBuf>,
    },

    /// Print the schema description the model is prompted with.
    Schema {
        /// Print the live store schema as JSON instead.
        #[arg(long)]
        json: bool,
    },

    /// List the users of the store and their regions.
    Users,

    /// Write the demo snapshot to a file.
    InitData {
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            subject,
            compact,
        } => cmd_ask(&cli.llm, cli.data, &question, &subject, compact),
        Commands::Serve { listen, ready_file } => cmd_serve(&cli.llm, cli.data, listen, ready_file),
        Commands::Schema { json } => cmd_schema(json),
        Commands::Users => cmd_users(cli.data),
        Commands::InitData { out } => cmd_init_data(&out),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))
}

fn open_store(data: Option<PathBuf>) -> Result<Arc<InMemoryStore>> {
    let config = StoreConfig { snapshot_path: data };
    Ok(Arc::new(config.open()?))
}

fn build_pipeline(llm: &LlmArgs, data: Option<PathBuf>) -> Result<InsightPipeline> {
    let model = backend::build_model(llm)?;
    let store = open_store(data)?;
    let config = PipelineConfig::from_env()?;
    Ok(InsightPipeline::with_store(model, store, config))
}

fn cmd_ask(llm: &LlmArgs, data: Option<PathBuf>, question: &str, subject: &str, compact: bool) -> Result<()> {
    let pipeline = build_pipeline(llm, data)?;
    let result = runtime()?.block_on(pipeline.run(question, subject));

    let rendered = if compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{rendered}");

    match result {
        PipelineResult::Success { .. } => Ok(()),
        PipelineResult::Failure { .. } => Err(anyhow!("no insight for this question")),
    }
}

fn cmd_serve(llm: &LlmArgs, data: Option<PathBuf>, listen: SocketAddr, ready_file: Option<PathBuf>) -> Result<()> {
    let pipeline = Arc::new(build_pipeline(llm, data)?);
    eprintln!("{} http://{}", "serving".green().bold(), listen.to_string().bold());
    runtime()?.block_on(server::serve(server::ServerConfig { listen, ready_file }, pipeline))
}

fn cmd_schema(as_json: bool) -> Result<()> {
    if !as_json {
        println!("// {SCHEMA_PROMPT_VERSION}");
        println!("{SCHEMA_DESCRIPTION}");
        return Ok(());
    }

    let entities: Vec<_> = Entity::ALL
        .iter()
        .map(|entity| {
            let fields: Vec<_> = entity
                .fields()
                .iter()
                .map(|f| json!({ "name": f.name, "type": f.ty.name() }))
                .collect();
            json!({ "name": entity.name(), "view": entity.is_view(), "fields": fields })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entities)?);
    Ok(())
}

fn cmd_users(data: Option<PathBuf>) -> Result<()> {
    let store = open_store(data)?;
    for user in store.users() {
        println!(
            "{}  {}  {}",
            user.id.dimmed(),
            user.email.bold(),
            user.region.cyan()
        );
    }
    Ok(())
}

fn cmd_init_data(out: &Path) -> Result<()> {
    let store = InMemoryStore::from_snapshot(demo_snapshot())?;
    store.save(out)?;
    eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    Ok(())
}
