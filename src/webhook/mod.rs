//! Webhook event delivery using a bounded worker pool. Events are marshaled
//! once, fanned out as one job per subscriber URL, and delivered with retry
//! and exponential backoff. The input queue has drop-on-full semantics so
//! ingestion never blocks on slow subscribers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

pub const DEFAULT_WORKER_COUNT: usize = 10;
pub const DEFAULT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("pulse-hub/", env!("CARGO_PKG_VERSION"));
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle event kinds delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "experience.created")]
    Created,
    #[serde(rename = "experience.updated")]
    Updated,
    #[serde(rename = "experience.deleted")]
    Deleted,
    #[serde(rename = "experience.enriched")]
    Enriched,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "experience.created",
            EventKind::Updated => "experience.updated",
            EventKind::Deleted => "experience.deleted",
            EventKind::Enriched => "experience.enriched",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of a webhook event.
#[derive(Debug, Serialize)]
struct Event<'a, T: Serialize> {
    event: EventKind,
    timestamp: chrono::DateTime<Utc>,
    data: &'a T,
}

/// A single delivery: one marshaled payload bound for one subscriber URL.
struct Delivery {
    url: String,
    payload: Bytes,
    kind: EventKind,
}

/// Fan-out dispatcher backed by a fixed worker pool. Construction spawns the
/// workers; `shutdown` drains and joins them.
pub struct Dispatcher {
    urls: Vec<String>,
    tx: Mutex<Option<mpsc::Sender<Delivery>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(urls: Vec<String>) -> Self {
        Self::with_pool(
            urls,
            DEFAULT_WORKER_COUNT,
            DEFAULT_QUEUE_SIZE,
            DEFAULT_HTTP_TIMEOUT,
        )
    }

    pub fn with_pool(
        urls: Vec<String>,
        worker_count: usize,
        queue_size: usize,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        let (tx, rx) = mpsc::channel::<Delivery>(queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..worker_count.max(1))
            .map(|id| tokio::spawn(deliver_loop(id, client.clone(), rx.clone())))
            .collect();

        info!(
            urls = ?urls,
            workers = worker_count,
            queue_size,
            "webhook dispatcher initialized"
        );

        Self {
            urls,
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Marshals the event once and offers one job per subscriber URL to the
    /// bounded queue. Never blocks: when the queue is full the job is dropped
    /// with a warning.
    pub fn dispatch<T: Serialize>(&self, kind: EventKind, data: &T) {
        if self.urls.is_empty() {
            return;
        }

        let event = Event {
            event: kind,
            timestamp: Utc::now(),
            data,
        };

        let payload = match serde_json::to_vec(&event) {
            Ok(p) => Bytes::from(p),
            Err(err) => {
                error!(event = %kind, error = %err, "failed to marshal webhook event");
                return;
            }
        };

        let guard = self.tx.lock().expect("webhook sender lock poisoned");
        let Some(tx) = guard.as_ref() else {
            warn!(event = %kind, "dispatcher is shut down, dropping event");
            return;
        };

        for url in &self.urls {
            let job = Delivery {
                url: url.clone(),
                payload: payload.clone(),
                kind,
            };
            match tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(url = %url, event = %kind, "webhook queue full, dropping job");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(url = %url, event = %kind, "webhook queue closed, dropping job");
                }
            }
        }
    }

    /// Closes the input queue, waits for in-flight deliveries, and forcibly
    /// cancels whatever is still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!(timeout = ?timeout, "shutting down webhook dispatcher");

        // Dropping the sender closes the channel; workers exit once drained.
        self.tx.lock().expect("webhook sender lock poisoned").take();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("webhook handles lock poisoned"));
        let abort_handles: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("webhook dispatcher shut down successfully");
                Ok(())
            }
            Err(_) => {
                for abort in abort_handles {
                    abort.abort();
                }
                warn!("webhook dispatcher shutdown timed out, forcing cancellation");
                Err(anyhow!("shutdown timed out after {timeout:?}"))
            }
        }
    }
}

async fn deliver_loop(id: usize, client: Client, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>) {
    debug!(worker_id = id, "webhook worker started");

    loop {
        // The lock is held only while waiting for the next job; it is
        // released before the delivery itself so workers send in parallel.
        let job = rx.lock().await.recv().await;

        match job {
            Some(job) => send_with_retry(&client, &job).await,
            None => {
                debug!(worker_id = id, "webhook worker shutting down");
                return;
            }
        }
    }
}

async fn send_with_retry(client: &Client, job: &Delivery) {
    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            // Exponential backoff: 1s, 2s
            let delay = RETRY_BASE_DELAY * (1 << (attempt - 2));
            tokio::time::sleep(delay).await;
        }

        let result = client
            .post(&job.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .body(job.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(
                    url = %job.url,
                    event = %job.kind,
                    status = response.status().as_u16(),
                    "webhook delivered successfully"
                );
                return;
            }
            Ok(response) => {
                warn!(
                    url = %job.url,
                    event = %job.kind,
                    status = response.status().as_u16(),
                    attempt,
                    "webhook failed with non-2xx status"
                );
            }
            Err(err) => {
                warn!(
                    url = %job.url,
                    event = %job.kind,
                    attempt,
                    error = %err,
                    "failed to send webhook"
                );
            }
        }
    }

    error!(
        url = %job.url,
        event = %job.kind,
        attempts = MAX_ATTEMPTS,
        "webhook failed after all retries"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use tokio::sync::Notify;

    #[derive(Clone)]
    struct Hits {
        count: Arc<AtomicU32>,
        notify: Arc<Notify>,
        /// Fails with 500 until this many attempts have been seen.
        fail_until: u32,
    }

    async fn hook(State(hits): State<Hits>, headers: HeaderMap, body: String) -> StatusCode {
        assert_eq!(
            headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        assert!(headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| ua.starts_with("pulse-hub/")));

        let event: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(event.get("event").is_some());
        assert!(event.get("timestamp").is_some());
        assert!(event.get("data").is_some());

        let n = hits.count.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= hits.fail_until {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        hits.notify.notify_one();
        StatusCode::OK
    }

    async fn spawn_subscriber(fail_until: u32) -> (String, Hits) {
        let hits = Hits {
            count: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            fail_until,
        };
        let app = Router::new()
            .route("/hook", post(hook))
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), hits)
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::Created).unwrap(),
            "\"experience.created\""
        );
        assert_eq!(EventKind::Enriched.as_str(), "experience.enriched");
    }

    #[test]
    fn test_event_wire_shape() {
        let data = serde_json::json!({"id": "abc", "source_type": "survey"});
        let event = Event {
            event: EventKind::Updated,
            timestamp: Utc::now(),
            data: &data,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["event"], "experience.updated");
        assert_eq!(value["data"]["source_type"], "survey");
        assert!(value["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_subscriber() {
        let (url, hits) = spawn_subscriber(0).await;
        let dispatcher = Dispatcher::new(vec![url]);

        dispatcher.dispatch(
            EventKind::Created,
            &serde_json::json!({"id": uuid::Uuid::new_v4()}),
        );

        tokio::time::timeout(Duration::from_secs(2), hits.notify.notified())
            .await
            .expect("timeout waiting for webhook delivery");
        assert_eq!(hits.count.load(Ordering::SeqCst), 1);

        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_retries_until_success() {
        let (url, hits) = spawn_subscriber(2).await;
        let dispatcher = Dispatcher::new(vec![url]);

        dispatcher.dispatch(EventKind::Created, &serde_json::json!({"id": "retry-me"}));

        // 2 failures + backoff (1s, 2s) + final success
        tokio::time::timeout(Duration::from_secs(6), hits.notify.notified())
            .await
            .expect("expected delivery to succeed after retries");
        assert_eq!(hits.count.load(Ordering::SeqCst), 3);

        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_to_all_subscribers() {
        let (url_a, hits_a) = spawn_subscriber(0).await;
        let (url_b, hits_b) = spawn_subscriber(0).await;
        let dispatcher = Dispatcher::new(vec![url_a, url_b]);

        dispatcher.dispatch(EventKind::Deleted, &serde_json::json!({"id": "gone"}));

        tokio::time::timeout(Duration::from_secs(2), async {
            hits_a.notify.notified().await;
            hits_b.notify.notified().await;
        })
        .await
        .expect("timeout waiting for fan-out");
        assert_eq!(hits_a.count.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.count.load(Ordering::SeqCst), 1);

        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_with_no_subscribers_returns_immediately() {
        let dispatcher = Dispatcher::new(vec![]);
        let start = Instant::now();
        dispatcher.dispatch(EventKind::Created, &serde_json::json!({"id": "x"}));
        assert!(start.elapsed() < Duration::from_millis(100));
        dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_never_blocks_when_queue_full() {
        // Unroutable address keeps the worker busy in connect/retry while we
        // overflow the tiny queue.
        let dispatcher = Dispatcher::with_pool(
            vec!["http://192.0.2.1:9/hook".to_string()],
            1,
            1,
            Duration::from_secs(5),
        );

        let start = Instant::now();
        for i in 0..50 {
            dispatcher.dispatch(EventKind::Created, &serde_json::json!({"seq": i}));
        }
        // All 50 offers must return without waiting on delivery.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_after_dispatch_drops_everything() {
        let dispatcher = Dispatcher::new(vec!["http://192.0.2.1:9/hook".to_string()]);
        dispatcher.dispatch(EventKind::Created, &serde_json::json!({"id": "x"}));

        // Forced cancellation path: deliveries to the unroutable address are
        // still retrying, so the short deadline must trip.
        let result = dispatcher.shutdown(Duration::from_millis(50)).await;
        assert!(result.is_err());

        // Further dispatches are dropped, not errors.
        dispatcher.dispatch(EventKind::Updated, &serde_json::json!({"id": "y"}));
    }

    #[tokio::test]
    async fn test_shutdown_idle_dispatcher_is_quick() {
        let dispatcher = Dispatcher::new(vec!["http://192.0.2.1:9/hook".to_string()]);
        let start = Instant::now();
        dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
