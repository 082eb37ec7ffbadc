use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use url::Url;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// First-party collection endpoint.
///
/// `post` only schedules delivery; an `Err` means the request could not even be
/// built or queued. Network outcomes are never reported back.
pub trait Collector: Send + Sync {
    fn post(&self, endpoint: &str, body: Value) -> Result<()>;
}

pub struct NoopCollector;

impl Collector for NoopCollector {
    fn post(&self, _endpoint: &str, _body: Value) -> Result<()> {
        Ok(())
    }
}

/// POSTs events as JSON with reqwest, spawned on a tokio runtime.
///
/// Posts are never awaited by the tracking code; [`HttpCollector::flush`] lets
/// the owner wait for the ones still in flight before the runtime goes away.
pub struct HttpCollector {
    client: reqwest::Client,
    base: Url,
    runtime: Handle,
    in_flight: TaskTracker,
}

impl HttpCollector {
    pub fn new(base_url: &str, runtime: Handle) -> Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("invalid collector URL '{base_url}'"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("landing-analytics/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base,
            runtime,
            in_flight: TaskTracker::new(),
        })
    }

    /// Stop accepting posts and wait up to `grace` for the pending ones.
    /// Returns false if some were still running when the grace period ended.
    pub async fn flush(&self, grace: Duration) -> bool {
        self.in_flight.close();
        let pending = self.in_flight.len();
        if pending > 0 {
            log_debug!("waiting for {pending} collector posts");
        }
        tokio::time::timeout(grace, self.in_flight.wait()).await.is_ok()
    }

    /// Endpoints are resolved below the base path, so `/api/x` under
    /// `https://host/app` becomes `https://host/app/api/x`.
    pub fn url_for(&self, endpoint: &str) -> Result<Url> {
        self.base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|err| anyhow!("invalid endpoint '{endpoint}': {err}"))
    }
}

impl Collector for HttpCollector {
    fn post(&self, endpoint: &str, body: Value) -> Result<()> {
        let url = self.url_for(endpoint)?;
        if self.in_flight.is_closed() {
            return Err(anyhow!("collector already flushed; dropping post to {url}"));
        }
        let request = self.client.post(url.clone()).json(&body);

        self.in_flight.spawn_on(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    log_warn!("collector {url} answered {}", response.status());
                }
                Ok(_) => {
                    log_debug!("delivered event to {url}");
                }
                Err(err) => {
                    log_warn!("failed to deliver event to {url}: {err}");
                }
            }
        }, &self.runtime);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Headers received and the body as long as `Content-Length` says.
    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let mut length = 0;
        for line in text[..split].lines() {
            let line = line.to_ascii_lowercase();
            if let Some(value) = line.strip_prefix("content-length:") {
                length = value.trim().parse().unwrap_or(0);
            }
        }
        raw.len() >= split + 4 + length
    }

    async fn answer_slowly(mut socket: TcpStream, delivered: Arc<AtomicUsize>) {
        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request_complete(&received) {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
            }
        }
        // Keep the post in flight while the collector is being flushed.
        tokio::time::sleep(Duration::from_millis(200)).await;
        delivered.fetch_add(1, Ordering::SeqCst);
        let _ = socket
            .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
    }

    #[tokio::test]
    async fn joins_endpoints_under_base_path() {
        let collector = HttpCollector::new("https://example.com/app", Handle::current()).unwrap();
        assert_eq!(
            collector.url_for("/api/analytics/events").unwrap().as_str(),
            "https://example.com/app/api/analytics/events"
        );

        let root = HttpCollector::new("http://localhost:3000", Handle::current()).unwrap();
        assert_eq!(
            root.url_for("/api/analytics/ab-tests").unwrap().as_str(),
            "http://localhost:3000/api/analytics/ab-tests"
        );
    }

    #[tokio::test]
    async fn rejects_invalid_base_url() {
        assert!(HttpCollector::new("not a url", Handle::current()).is_err());
    }

    #[tokio::test]
    async fn posts_json_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let collector = HttpCollector::new(&base, Handle::current()).unwrap();

        collector
            .post("/api/analytics/events", json!({ "event": "page_view" }))
            .unwrap();

        let (mut socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&received).contains("page_view") {
            let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut chunk))
                .await
                .unwrap()
                .unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        let request = String::from_utf8_lossy(&received);
        assert!(request.starts_with("POST /api/analytics/events"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#"{"event":"page_view"}"#));
    }

    #[tokio::test]
    async fn unreachable_collector_is_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let collector = HttpCollector::new(&base, Handle::current()).unwrap();
        assert!(collector.post("/api/analytics/events", json!({})).is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn flush_waits_for_every_post() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer_slowly(socket, Arc::clone(&counter)));
            }
        });

        let collector = HttpCollector::new(&base, Handle::current()).unwrap();
        for n in 0..5 {
            collector
                .post("/api/analytics/events", json!({ "event": "cta_click", "n": n }))
                .unwrap();
        }

        assert!(collector.flush(Duration::from_secs(5)).await);
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
        assert!(collector.post("/api/analytics/events", json!({})).is_err());
    }

    #[tokio::test]
    async fn flush_gives_up_after_grace() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let collector = HttpCollector::new(&base, Handle::current()).unwrap();
        collector
            .post("/api/analytics/scroll-depth", json!({ "event": "scroll_depth_25" }))
            .unwrap();
        assert!(!collector.flush(Duration::from_millis(100)).await);
    }
}
