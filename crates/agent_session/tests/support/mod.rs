#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use agent_session::{update_channel, SessionDriver, SessionOptions, SessionUpdate, UpdateReceiver};
use serde_json::Value;
use stream_api::{ApiClient, ApiConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub content_type: &'static str,
    /// `(delay_ms, bytes)` pairs written in order.
    pub chunks: Vec<(u64, Vec<u8>)>,
}

pub fn stream_response(chunks: &[&str]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/plain; charset=utf-8",
        chunks: chunks
            .iter()
            .map(|chunk| (0, chunk.as_bytes().to_vec()))
            .collect(),
    }
}

pub fn delayed_stream_response(chunks: &[(u64, &str)]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/plain; charset=utf-8",
        chunks: chunks
            .iter()
            .map(|(delay_ms, chunk)| (*delay_ms, chunk.as_bytes().to_vec()))
            .collect(),
    }
}

pub fn json_response(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "application/json",
        chunks: vec![(0, body.as_bytes().to_vec())],
    }
}

pub fn manifest_response(names: &[&str]) -> ScriptedResponse {
    let tools: Vec<Value> = names
        .iter()
        .map(|name| serde_json::json!({"function": {"name": name}}))
        .collect();
    json_response(200, &serde_json::json!({ "tools": tools }).to_string())
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body should be JSON")
    }
}

/// Local HTTP server answering requests with `scripts` in arrival order.
pub struct ScriptedServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(Mutex::new(scripts.into_iter()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener.local_addr().expect("listener address");

        let handle = tokio::spawn({
            let requests = Arc::clone(&requests);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let scripts = Arc::clone(&scripts);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move { serve_one(socket, scripts, requests).await });
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn client(&self, token: Option<&str>) -> ApiClient {
        let mut config = ApiConfig::new(&self.base_url);
        if let Some(token) = token {
            config = config.with_access_token(token);
        }
        ApiClient::new(config).expect("client")
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn driver_for(
    server: &ScriptedServer,
    token: Option<&str>,
    root: &Path,
    options: SessionOptions,
) -> (SessionDriver, UpdateReceiver) {
    let (tx, rx) = update_channel();
    let driver = SessionDriver::for_workspace(server.client(token), root, options, tx)
        .expect("driver should build");
    (driver, rx)
}

pub fn drain(rx: &mut UpdateReceiver) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

pub fn lines(updates: &[SessionUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|update| match update {
            SessionUpdate::Line(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn streams(updates: &[SessionUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter_map(|update| match update {
            SessionUpdate::Stream(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Mutex<std::vec::IntoIter<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let Ok(recorded) = read_request(&mut socket).await else {
        return;
    };
    // Record and pick the script under one lock so arrival order matches.
    let response = {
        let mut requests = requests.lock().expect("requests lock");
        requests.push(recorded);
        scripts.lock().expect("scripts lock").next()
    }
    .unwrap_or_else(|| json_response(400, r#"{"error":"unexpected request"}"#));

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status,
        status_reason(response.status),
        response.content_type,
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for (delay_ms, chunk) in &response.chunks {
        if *delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
        }
        if chunk.is_empty() {
            continue;
        }
        let prefix = format!("{:X}\r\n", chunk.len());
        if socket.write_all(prefix.as_bytes()).await.is_err()
            || socket.write_all(chunk).await.is_err()
            || socket.write_all(b"\r\n").await.is_err()
        {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(position) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while request.len() < header_end + content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }

    Ok(RecordedRequest {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&request[header_end..]).into_owned(),
    })
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        _ => "Status",
    }
}
