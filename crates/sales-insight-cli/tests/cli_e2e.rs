//! End-to-end tests for the `sales-insight` binary with the mock model.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

fn sales_insight_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sales-insight"))
}

struct ChildGuard {
    child: Child,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_for_ready_file(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&text) {
                if let Some(addr) = v["addr"].as_str() {
                    return addr.to_string();
                }
            }
        }
        assert!(Instant::now() < deadline, "server did not become ready");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn http_post(
    addr: &str,
    path: &str,
    content_type: &str,
    body: &[u8],
    subject: Option<&str>,
) -> (u16, serde_json::Value) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(10))).ok();
    stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

    let mut request = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if let Some(subject) = subject {
        request.push_str(&format!("x-subject-id: {subject}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).expect("write request");
    stream.write_all(body).expect("write body");
    stream.flush().ok();

    let mut response_bytes = Vec::new();
    stream.read_to_end(&mut response_bytes).expect("read response");
    let response = String::from_utf8_lossy(&response_bytes);

    let status = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let (_, body_text) = response
        .split_once("\r\n\r\n")
        .unwrap_or(("", response.as_ref()));
    let json = serde_json::from_str(body_text).expect("parse JSON response");
    (status, json)
}

#[test]
fn serve_answers_insight_requests() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready.json");

    let child = Command::new(sales_insight_bin())
        .args(["serve", "--llm-mock", "--listen", "127.0.0.1:0", "--ready-file"])
        .arg(&ready)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sales-insight serve");
    let _guard = ChildGuard { child };
    let addr = wait_for_ready_file(&ready);

    let (status, body) = http_post(
        &addr,
        "/insight",
        "application/x-www-form-urlencoded",
        b"query=total+sales+by+product+category",
        Some("tom@test.com"),
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["query"]["operation"], "groupBy");
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["chart"]["data"]["labels"][0], "Electronics");

    let (status, _) = http_post(
        &addr,
        "/insight",
        "application/json",
        br#"{"query": "  "}"#,
        Some("tom@test.com"),
    );
    assert_eq!(status, 400);

    let (status, _) = http_post(&addr, "/insight", "application/json", br#"{"query": "x"}"#, None);
    assert_eq!(status, 401);
}

#[test]
fn ask_prints_result_json() {
    let output = Command::new(sales_insight_bin())
        .args([
            "ask",
            "--llm-mock",
            "--subject",
            "jerry@test.com",
            "--compact",
            "total sales by product category",
        ])
        .output()
        .expect("run sales-insight ask");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let data = v["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert!(data.iter().all(|row| row["category"] != "Outdoor"));
}

#[test]
fn ask_fails_for_unknown_subject() {
    let output = Command::new(sales_insight_bin())
        .args(["ask", "--llm-mock", "--subject", "nobody@test.com", "anything"])
        .output()
        .expect("run sales-insight ask");
    assert!(!output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(v["error"].is_string());
}

#[test]
fn init_data_round_trips_through_data_flag() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("store.json");

    let status = Command::new(sales_insight_bin())
        .args(["init-data", "--out"])
        .arg(&snapshot)
        .status()
        .expect("run sales-insight init-data");
    assert!(status.success());

    let output = Command::new(sales_insight_bin())
        .args(["users", "--data"])
        .arg(&snapshot)
        .env("NO_COLOR", "1")
        .output()
        .expect("run sales-insight users");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tom@test.com"));
    assert!(stdout.contains("California"));
}
