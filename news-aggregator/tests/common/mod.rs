#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use news_aggregator::identity;
use news_aggregator::{AggregatorError, Category, Collector, Item, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn item(source_id: &str, url: &str, title: &str, score: f64) -> Item {
    item_in(source_id, Category::Media, url, title, score)
}

pub fn item_in(source_id: &str, category: Category, url: &str, title: &str, score: f64) -> Item {
    let description = format!("About {}", title);
    Item {
        url: url.to_string(),
        title: title.to_string(),
        url_hash: identity::url_hash(url),
        content_hash: identity::content_hash(title, &description),
        description,
        author: None,
        source_id: source_id.to_string(),
        category,
        published_at: None,
        score,
    }
}

/// Returns a fixed list of items.
pub struct StaticCollector {
    pub id: String,
    pub items: Vec<Item>,
    pub delay: Duration,
}

impl StaticCollector {
    pub fn new(id: &str, items: Vec<Item>) -> Self {
        Self {
            id: id.to_string(),
            items,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(id: &str, items: Vec<Item>, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            items,
            delay,
        }
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "static"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.items.clone())
    }
}

pub struct FailingCollector {
    pub id: String,
}

#[async_trait]
impl Collector for FailingCollector {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        Err(AggregatorError::HttpStatus {
            url: format!("https://{}.example/", self.id),
            status: 404,
        })
    }
}

pub struct PanickingCollector {
    pub id: String,
}

#[async_trait]
impl Collector for PanickingCollector {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "panicking"
    }

    async fn collect(&self) -> Result<Vec<Item>> {
        panic!("collector {} blew up", self.id);
    }
}

/// One canned HTTP response.
#[derive(Clone)]
pub struct Canned {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

impl Canned {
    pub fn ok(content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: String::new(),
            headers: Vec::new(),
        }
    }
}

/// A throwaway HTTP/1.1 server answering requests with the canned responses
/// in order, repeating the last one once the list runs out.
pub struct TestServer {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start(responses: Vec<Canned>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (task_hits, task_requests) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let index = task_hits.fetch_add(1, Ordering::SeqCst);
                let canned = responses[index.min(responses.len() - 1)].clone();

                let head = read_request(&mut socket).await;
                let target = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or_default()
                    .to_string();
                task_requests.lock().unwrap().push(target);

                let mut response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    canned.status,
                    canned.content_type,
                    canned.body.len()
                );
                for (name, value) in &canned.headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str("\r\n");
                response.push_str(&canned.body);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            hits,
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn request_targets(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Read the request head and any declared body so the socket closes cleanly.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - header_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        body_read += n;
    }
    head
}
