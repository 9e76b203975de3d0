//! Scripted HTTP server for client tests.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A request as seen by the server: request line, header block and body.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub line: String,
    pub headers: String,
    pub body: String,
}

/// Serves `responses` in order, one per connection, and records requests.
pub async fn mock_server(
    responses: Vec<MockResponse>,
) -> (String, Arc<Mutex<Vec<SeenRequest>>>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = format!("http://127.0.0.1:{port}");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let handle = tokio::spawn(async move {
        for resp in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };

            let request = read_request(&mut stream).await;
            log.lock().unwrap().push(request);

            let reason = if resp.status < 400 { "OK" } else { "Error" };
            let mut head = format!(
                "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
                resp.status,
                resp.body.len()
            );
            for (name, value) in &resp.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");

            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&resp.body).await;
            let _ = stream.shutdown().await;
        }
    });

    (url, seen, handle)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> SeenRequest {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos;
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break data.len(),
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let body_start = (header_end + 4).min(data.len());
    while data.len() < body_start + content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }

    let (line, headers) = head.split_once("\r\n").unwrap_or((head.as_str(), ""));
    SeenRequest {
        line: line.to_string(),
        headers: headers.to_string(),
        body: String::from_utf8_lossy(&data[body_start..]).into_owned(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
