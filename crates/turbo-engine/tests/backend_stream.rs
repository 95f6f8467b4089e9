//! Integration tests for the streaming client and the manager, run against
//! a minimal in-process HTTP fixture speaking the backend's NDJSON protocol.

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use turbo_core::config::{BackendConfig, TurboConfig};
use turbo_core::Error;
use turbo_engine::{ChatMessage, OllamaClient};

const CHAT_NDJSON: &str = concat!(
    r#"{"message":{"content":"Hello"},"done":false}"#,
    "\n",
    r#"{"message":{"content":" world"},"done":false}"#,
    "\n",
    r#"{"done":true}"#,
    "\n",
);

/// Serve canned responses, routing on the request path. Runs until the test
/// ends; each connection is handled once and closed.
async fn spawn_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let Some((request_line, request_body)) = read_request(&mut socket).await else {
                    return;
                };
                let body = if request_line.contains("/api/chat") {
                    if request_body.contains("\"stream\":false") {
                        r#"{"message":{"content":"Hello world"},"done":true}"#
                    } else {
                        CHAT_NDJSON
                    }
                } else if request_line.contains("/api/generate") {
                    "{\"done\":true}\n"
                } else {
                    "Ollama is running"
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Read one HTTP request and return its request line and body
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, String)> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let headers_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..headers_end]).to_string();
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0);

    while buffer.len() < headers_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next()?.to_string();
    let body = String::from_utf8_lossy(&buffer[headers_end..]).to_string();
    Some((request_line, body))
}

fn backend_config(endpoint: &str) -> BackendConfig {
    BackendConfig {
        endpoint: endpoint.to_string(),
        connect_timeout_secs: 2,
        request_timeout_secs: 2,
        ..BackendConfig::default()
    }
}

#[tokio::test]
async fn test_streaming_happy_path() {
    let endpoint = spawn_backend().await;
    let client = OllamaClient::new(&backend_config(&endpoint)).unwrap();

    let mut stream = client.stream("phi3:3.8b", vec![ChatMessage::user("hi")]);
    let mut reply = String::new();
    let mut saw_done = false;

    while let Some(item) = stream.next().await {
        let chunk = item.expect("no failures expected");
        reply.push_str(&chunk.content);
        if chunk.done {
            saw_done = true;
        }
    }

    assert_eq!(reply, "Hello world");
    assert!(saw_done);
}

#[tokio::test]
async fn test_nonstreaming_chat() {
    let endpoint = spawn_backend().await;
    let client = OllamaClient::new(&backend_config(&endpoint)).unwrap();

    let reply = client
        .chat("phi3:3.8b", vec![ChatMessage::user("hi")])
        .await
        .unwrap();
    assert_eq!(reply, "Hello world");
}

#[tokio::test]
async fn test_connection_refused_yields_one_terminal_error() {
    // Bind then drop to find a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = format!("http://127.0.0.1:{}", port);
    let client = OllamaClient::new(&backend_config(&endpoint)).unwrap();

    let mut stream = client.stream("phi3:3.8b", vec![ChatMessage::user("hi")]);
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::BackendUnavailable(_))));
}

#[tokio::test]
async fn test_error_status_yields_one_terminal_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = read_request(&mut socket).await;
            let body = "model not found";
            let response = format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    let client = OllamaClient::new(&backend_config(&endpoint)).unwrap();
    let mut stream = client.stream("missing:1b", vec![ChatMessage::user("hi")]);
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(Error::BackendUnavailable(detail)) => assert!(detail.contains("404")),
        other => panic!("expected backend error, got {:?}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_unresponsive_backend_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());

    // Accept connections but never respond.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = BackendConfig {
        endpoint,
        connect_timeout_secs: 2,
        request_timeout_secs: 1,
        ..BackendConfig::default()
    };
    let client = OllamaClient::new(&config).unwrap();

    let mut stream = client.stream("phi3:3.8b", vec![ChatMessage::user("hi")]);
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_manager_end_to_end_against_fixture() {
    use async_trait::async_trait;
    use turbo_engine::monitor::{AcceleratorProbe, AcceleratorReading};
    use turbo_engine::TurboManager;

    struct NoAccelerator;

    #[async_trait]
    impl AcceleratorProbe for NoAccelerator {
        async fn detect(&self) -> bool {
            false
        }

        async fn read(&self) -> turbo_core::Result<AcceleratorReading> {
            Err(Error::unavailable("no accelerator"))
        }
    }

    let endpoint = spawn_backend().await;
    let mut config = TurboConfig::default();
    config.backend = backend_config(&endpoint);

    let manager = TurboManager::with_probe(config, Box::new(NoAccelerator)).unwrap();
    manager.initialize().await.unwrap();

    let status = manager.status().await;
    assert!(status.capabilities.backend_reachable);
    assert!(!status.capabilities.accelerator);

    // The smallest CPU-eligible model was prewarmed at startup
    assert!(status
        .resident
        .iter()
        .any(|r| r.model_id == "gemma:2b" && r.device == turbo_core::Device::Cpu));

    let reply = manager.chat("hi", None).await.unwrap();
    assert_eq!(reply, "Hello world");

    let stats = manager.stats();
    assert_eq!(stats.total_queries, 1);
    assert_eq!(stats.cpu_queries, 1);
    assert_eq!(stats.accelerator_queries, 0);
    assert_eq!(stats.failed_streams, 0);
    assert_eq!(stats.response_chars, "Hello world".len() as u64);

    manager.shutdown().await;
}
