//! Mock HTTP snapshot endpoint for fallback tests.
//!
//! Answers every request with the same JSON body and records request
//! lines.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub struct MockHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttpServer {
    /// Serve `body` with `status` on an available port.
    pub async fn start(status: u16, body: serde_json::Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let body = body.to_string();

        let requests_clone = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let requests = requests_clone.clone();
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    if let Some(line) = request.lines().next() {
                        requests.lock().await.push(line.to_string());
                    }

                    let response = format!(
                        "HTTP/1.1 {status} Mock\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}/quotes", self.addr)
    }

    /// Request lines received so far (e.g. `GET /quotes?symbols=AAPL HTTP/1.1`).
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}
