//! HTTP entry point for the insight pipeline.
//!
//! Routes
//! ------
//! - `GET /healthz` → `ok`
//! - `POST /insight` → `PipelineResult` JSON
//!
//! `POST /insight` takes the question in the `query` field, either as an
//! urlencoded form or as a JSON object. The caller is identified by the
//! `x-subject-id` header, which an authenticating proxy in front of this
//! server is expected to set.
//!
//! Status codes: a missing subject is `401`, a missing or blank question is
//! `400` (neither reaches the model or the store). Every pipeline outcome,
//! success or failure, is `200` with the result body.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use url::form_urlencoded;

use sales_insight_llm::InsightPipeline;

pub const SUBJECT_HEADER: &str = "x-subject-id";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Written with the bound address once the listener is up.
    pub ready_file: Option<PathBuf>,
}

pub async fn serve(config: ServerConfig, pipeline: Arc<InsightPipeline>) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    tracing::info!(addr = %bound, "listening");
    if let Some(path) = config.ready_file.as_ref() {
        let payload = serde_json::json!({
            "addr": bound.to_string(),
            "pid": std::process::id(),
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    }

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let pipeline = pipeline.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, pipeline.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    pipeline: Arc<InsightPipeline>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let headers = req.headers().clone();

    let body = if method == Method::POST {
        req.into_body().collect().await?.to_bytes()
    } else {
        Bytes::new()
    };
    Ok(route(&method, &path, &headers, &body, &pipeline).await)
}

async fn route(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    pipeline: &InsightPipeline,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n"),
        (&Method::POST, "/insight") => handle_insight(headers, body, pipeline).await,
        (_, "/healthz") | (_, "/insight") => {
            json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle_insight(headers: &HeaderMap, body: &[u8], pipeline: &InsightPipeline) -> Response<Full<Bytes>> {
    let Some(subject) = headers
        .get(SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return json_error(StatusCode::UNAUTHORIZED, "missing subject");
    };

    let question = match question_from_body(headers, body) {
        Ok(Some(q)) if !q.trim().is_empty() => q,
        Ok(_) => return json_error(StatusCode::BAD_REQUEST, "missing `query`"),
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let result = pipeline.run(&question, subject).await;
    json_response(StatusCode::OK, &result)
}

/// The `query` field of a form or JSON body.
fn question_from_body(headers: &HeaderMap, body: &[u8]) -> Result<Option<String>> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| anyhow!("failed to parse request JSON: {e}"))?;
        return Ok(value
            .get("query")
            .and_then(|q| q.as_str())
            .map(str::to_string));
    }

    Ok(form_urlencoded::parse(body)
        .find(|(k, _)| k == "query")
        .map(|(_, v)| v.into_owned()))
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let v = serde_json::json!({ "error": msg });
    json_response(status, &v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use sales_insight_llm::{MockModel, PipelineConfig};
    use sales_insight_store::{demo_snapshot, InMemoryStore};

    fn pipeline(model: Arc<MockModel>) -> InsightPipeline {
        let store = Arc::new(InMemoryStore::from_snapshot(demo_snapshot()).unwrap());
        InsightPipeline::with_store(model, store, PipelineConfig::default())
    }

    fn headers(subject: Option<&str>, content_type: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        if let Some(s) = subject {
            h.insert(SUBJECT_HEADER, HeaderValue::from_str(s).unwrap());
        }
        h
    }

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    const FORM: &str = "application/x-www-form-urlencoded";

    #[tokio::test]
    async fn form_question_runs_the_pipeline() {
        let model = Arc::new(MockModel::demo());
        let p = pipeline(model.clone());
        let resp = route(
            &Method::POST,
            "/insight",
            &headers(Some("tom@test.com"), FORM),
            b"query=total+sales+by+product+category",
            &p,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["query"]["targetEntity"], "OrderItemDetail");
        assert_eq!(v["data"].as_array().unwrap().len(), 3);
        assert_eq!(v["chart"]["type"], "bar");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn json_question_is_accepted() {
        let model = Arc::new(MockModel::demo());
        let p = pipeline(model);
        let resp = route(
            &Method::POST,
            "/insight",
            &headers(Some("jerry@test.com"), "application/json; charset=utf-8"),
            br#"{"query": "sales by category"}"#,
            &p,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn blank_question_is_a_client_error() {
        let model = Arc::new(MockModel::demo());
        let p = pipeline(model.clone());
        let bodies: [&[u8]; 4] = [b"", b"query=", b"query=+++", b"other=1"];
        for body in bodies {
            let resp = route(&Method::POST, "/insight", &headers(Some("tom@test.com"), FORM), body, &p).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_subject_is_unauthorized() {
        let model = Arc::new(MockModel::demo());
        let p = pipeline(model.clone());
        let resp = route(&Method::POST, "/insight", &headers(None, FORM), b"query=x", &p).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn pipeline_failures_are_ok_with_error_body() {
        let model = Arc::new(MockModel::demo());
        let p = pipeline(model.clone());
        let resp = route(&Method::POST, "/insight", &headers(Some("nobody"), FORM), b"query=x", &p).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_json(resp).await["error"].is_string());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn other_routes() {
        let p = pipeline(Arc::new(MockModel::demo()));
        let h = HeaderMap::new();
        assert_eq!(route(&Method::GET, "/healthz", &h, b"", &p).await.status(), StatusCode::OK);
        assert_eq!(
            route(&Method::GET, "/insight", &h, b"", &p).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(route(&Method::GET, "/nope", &h, b"", &p).await.status(), StatusCode::NOT_FOUND);
    }
}
