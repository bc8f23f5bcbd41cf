//! OllamaClient against an in-process HTTP responder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pyvet_backend::{OllamaClient, RetryPolicy};
use pyvet_core::config::BackendConfig;
use pyvet_core::{BackendError, GenerateRequest, InferenceBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves canned `(status, body)` replies in order and records request bodies.
struct Responder {
    host: String,
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl Responder {
    async fn start(replies: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&bodies);

        tokio::spawn(async move {
            for (status, body) in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request_body = read_request_body(&mut socket).await;
                if let Ok(json) = serde_json::from_slice(&request_body) {
                    seen.lock().unwrap().push(json);
                }
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { host, bodies }
    }

    fn client(&self) -> OllamaClient {
        let config = BackendConfig {
            host: self.host.clone(),
            ..BackendConfig::default()
        };
        OllamaClient::from_config(&config).unwrap()
    }

    fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn read_request_body(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return Vec::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf[header_end..].to_vec()
}

fn request() -> GenerateRequest {
    GenerateRequest::new("qwen2.5-coder:3b", "Review this code", Duration::from_secs(5))
}

/// Test: a successful reply yields the `response` field and sends the expected body.
#[tokio::test]
async fn returns_response_field() {
    let server = Responder::start(vec![(
        200,
        r#"{"model":"qwen2.5-coder:3b","response":"[HIGH] missing colon","done":true}"#.to_string(),
    )])
    .await;

    let text = server.client().generate(&request()).await.unwrap();
    assert_eq!(text, "[HIGH] missing colon");

    let bodies = server.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "qwen2.5-coder:3b");
    assert_eq!(bodies[0]["prompt"], "Review this code");
    assert_eq!(bodies[0]["stream"], false);
    assert_eq!(bodies[0]["keep_alive"], 0);
}

/// Test: HTTP errors surface as Status and are not retried.
#[tokio::test]
async fn server_error_is_not_retried() {
    let server = Responder::start(vec![
        (500, r#"{"error":"model crashed"}"#.to_string()),
        (200, r#"{"response":"late"}"#.to_string()),
    ])
    .await;

    let err = server.client().generate(&request()).await.unwrap_err();
    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("model crashed"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.bodies().len(), 1);
}

/// Test: a body without a `response` field is a decode failure.
#[tokio::test]
async fn malformed_body_is_decode_error() {
    let server = Responder::start(vec![(200, r#"{"done":true}"#.to_string())]).await;
    let err = server.client().generate(&request()).await.unwrap_err();
    assert!(matches!(err, BackendError::Decode(_)));
}

/// Test: an unreachable service is a connection failure.
#[tokio::test]
async fn refused_connection_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = BackendConfig {
        host: format!("http://{}", addr),
        ..BackendConfig::default()
    };
    let client = OllamaClient::from_config(&config)
        .unwrap()
        .with_retry_policy(RetryPolicy::once());

    let err = client.generate(&request()).await.unwrap_err();
    assert!(matches!(err, BackendError::Connection(_)));
    assert!(err.is_transient());
}
