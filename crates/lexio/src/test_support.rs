//! Minimal loopback HTTP server for exercising the client against
//! canned responses, one accepted connection per expected request.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Route test logs through `RUST_LOG`; repeated calls are no-ops.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One canned response, written in parts with a pause after each part.
pub(crate) struct MockResponse {
    parts: Vec<(String, Duration)>,
}

impl MockResponse {
    pub fn immediate(response: impl Into<String>) -> Self {
        Self {
            parts: vec![(response.into(), Duration::ZERO)],
        }
    }

    pub fn staged(parts: Vec<(String, Duration)>) -> Self {
        Self { parts }
    }
}

/// Serve `responses` in order on an ephemeral port; returns the base URL
/// and the server task handle.
pub(crate) async fn spawn_server(responses: Vec<MockResponse>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        for response in responses {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            for (part, pause) in &response.parts {
                sock.write_all(part.as_bytes()).await.unwrap();
                sock.flush().await.unwrap();
                if !pause.is_zero() {
                    tokio::time::sleep(*pause).await;
                }
            }
            let _ = sock.shutdown().await;
        }
    });

    (base_url, handle)
}

/// Consume one HTTP request: headers plus a Content-Length body.
async fn read_request(sock: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];

    loop {
        let n = sock.read(&mut tmp).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&tmp[..n]);

        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let mut remaining = content_length.saturating_sub(buf.len() - (pos + 4));
            while remaining > 0 {
                let n = sock.read(&mut tmp).await.unwrap();
                if n == 0 {
                    break;
                }
                remaining = remaining.saturating_sub(n);
            }
            return;
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A complete SSE response delivering `fragments` then the sentinel.
pub(crate) fn sse_response(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": fragment}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
    )
}

/// A complete non-streaming JSON response carrying `content`.
pub(crate) fn json_response(content: &str) -> String {
    let body = serde_json::json!({"choices": [{"message": {"content": content}}]}).to_string();
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// An empty error response with the given status code.
pub(crate) fn error_response(status: u16) -> String {
    format!(
        "HTTP/1.1 {status} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )
}
