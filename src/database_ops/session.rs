use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{FetchError, PipelineError, Result};

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One endpoint attempt: absolute URL plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl Candidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub headers: HeaderMap,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Per-run HTTP handle. Clone the `Arc` into every unit task; the client and its pooled
/// connections go away when the last clone drops.
#[derive(Debug)]
pub struct FetchSession {
    http: Client,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
}

impl FetchSession {
    pub fn open(settings: SessionSettings) -> Result<Arc<Self>> {
        let max = settings.max_concurrency.max(1);
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(settings.headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(max)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Arc::new(Self {
            http,
            permits: Arc::new(Semaphore::new(max)),
            request_timeout: settings.request_timeout,
        }))
    }

    /// GET `candidate` and decode the body as JSON. Waits for a connection permit first;
    /// the timeout only starts once the permit is held.
    pub async fn get_json(&self, candidate: &Candidate) -> std::result::Result<Value, FetchError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::SessionClosed)?;

        let body = tokio::time::timeout(self.request_timeout, self.fetch_text(candidate))
            .await
            .map_err(|_| FetchError::Timeout(self.request_timeout))??;

        serde_json::from_str(&body).map_err(|e| FetchError::Malformed {
            url: candidate.url.clone(),
            reason: e.to_string(),
        })
    }

    async fn fetch_text(&self, candidate: &Candidate) -> std::result::Result<String, FetchError> {
        let resp = self
            .http
            .get(&candidate.url)
            .query(&candidate.query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: candidate.url.clone(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Throwaway HTTP/1.1 server for fetcher tests: answers each request by path.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    pub struct Route {
        pub status: u16,
        pub body: String,
        /// Held before the response is written.
        pub delay: Duration,
    }

    impl Route {
        pub fn new(status: u16, body: impl Into<String>) -> Self {
            Self {
                status,
                body: body.into(),
                delay: Duration::ZERO,
            }
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    /// Requests being answered right now, and the most seen at once.
    #[derive(Default)]
    pub struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlight {
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Serves `routes` keyed by path (query string ignored); unknown paths get 404.
    /// Returns the base URL and a log of request targets (path + query).
    pub async fn serve(routes: HashMap<String, Route>) -> (String, Arc<Mutex<Vec<String>>>) {
        let (base, seen, _) = serve_tracked(routes).await;
        (base, seen)
    }

    /// [`serve`], plus a live count of requests in flight.
    pub async fn serve_tracked(
        routes: HashMap<String, Route>,
    ) -> (String, Arc<Mutex<Vec<String>>>, Arc<InFlight>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(InFlight::default());
        let log = seen.clone();
        let tracker = in_flight.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let log = log.clone();
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let head = String::from_utf8_lossy(&buf[..n]).to_string();
                    let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    log.lock().await.push(target.clone());
                    let path = target.split('?').next().unwrap_or("/");
                    let route = routes
                        .get(path)
                        .cloned()
                        .unwrap_or_else(|| Route::new(404, "not found"));
                    tracker.enter();
                    tokio::time::sleep(route.delay).await;
                    let reply = format!(
                        "HTTP/1.1 {} X\r\ncontent-type: application/json; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        route.status,
                        route.body.len(),
                        route.body
                    );
                    let _ = sock.write_all(reply.as_bytes()).await;
                    let _ = sock.shutdown().await;
                    tracker.leave();
                });
            }
        });
        (format!("http://{addr}"), seen, in_flight)
    }
}
