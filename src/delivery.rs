//! Outbound delivery queue.
//!
//! An unbounded FIFO drained by one sender task on the tokio runtime.
//! `DeliverySender::enqueue` is a plain synchronous call, so the dispatch
//! thread hands envelopes over without touching the runtime. The blocking
//! HTTP call runs on the blocking pool, never on a runtime worker.
//!
//! Delivery is at-most-once: failures are logged and dropped, nothing is
//! retried or re-queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::envelope::ResultEnvelope;
use crate::error::{BridgeError, Result};

/// Upper bound on one idle wait, so the sender notices shutdown promptly.
pub const IDLE_WAIT: Duration = Duration::from_millis(500);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One queued send.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub url: String,
    pub envelope: ResultEnvelope,
}

/// Network collaborator performing the actual POST.
pub trait Collector: Send + Sync + 'static {
    fn post(&self, url: &str, body: &[u8]) -> Result<()>;
}

/// `ureq`-backed JSON POST.
pub struct HttpCollector {
    agent: ureq::Agent,
}

impl HttpCollector {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for HttpCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl Collector for HttpCollector {
    fn post(&self, url: &str, body: &[u8]) -> Result<()> {
        let failure = |reason: String| BridgeError::DeliveryFailure {
            url: url.to_string(),
            reason,
        };
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_bytes(body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => failure(format!("collector answered {code}")),
                ureq::Error::Transport(t) => failure(t.to_string()),
            })?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(failure(format!("collector answered {status}")));
        }
        Ok(())
    }
}

/// Counters for the sender task.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle for enqueueing from any context.
#[derive(Clone, Debug)]
pub struct DeliverySender {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliverySender {
    pub fn enqueue(&self, delivery: Delivery) -> Result<()> {
        let url = delivery.url.clone();
        self.tx.send(delivery).map_err(|_| BridgeError::DeliveryFailure {
            url,
            reason: "delivery queue is closed".to_string(),
        })
    }
}

/// The queue and its sender task.
pub struct DeliveryQueue {
    sender: DeliverySender,
    stop: watch::Sender<bool>,
    stats: Arc<DeliveryStats>,
    task: JoinHandle<()>,
}

impl DeliveryQueue {
    /// Spawn the sender task. Must be called from within a tokio runtime.
    pub fn start(collector: Arc<dyn Collector>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let stats = Arc::new(DeliveryStats::default());
        let task = tokio::spawn(run_sender(rx, stop_rx, collector, stats.clone()));
        log::info!("delivery queue started");
        Self {
            sender: DeliverySender { tx },
            stop,
            stats,
            task,
        }
    }

    pub fn sender(&self) -> DeliverySender {
        self.sender.clone()
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    /// Cancel the idle wait and let an in-flight send finish. Queued items
    /// that were never dequeued are dropped.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            log::error!("delivery sender task failed: {}", err);
        }
        log::info!(
            "delivery queue stopped (delivered={}, failed={})",
            self.stats.delivered(),
            self.stats.failed()
        );
    }
}

async fn run_sender(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mut stop: watch::Receiver<bool>,
    collector: Arc<dyn Collector>,
    stats: Arc<DeliveryStats>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        let next = tokio::select! {
            _ = stop.changed() => break,
            next = tokio::time::timeout(IDLE_WAIT, rx.recv()) => next,
        };
        let delivery = match next {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(delivery)) => delivery,
        };
        send_one(delivery, &collector, &stats).await;
    }
}

async fn send_one(delivery: Delivery, collector: &Arc<dyn Collector>, stats: &DeliveryStats) {
    let Delivery { url, envelope } = delivery;
    let body = match envelope.to_json() {
        Ok(body) => body,
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::error!("envelope serialization failed: {}", err);
            return;
        }
    };

    let collector = collector.clone();
    let target = url.clone();
    let outcome = tokio::task::spawn_blocking(move || collector.post(&target, &body)).await;
    match outcome {
        Ok(Ok(())) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "detection delivered to {} ({} boxes, ts={})",
                url,
                envelope.rois_rects.len(),
                envelope.timestamp
            );
        }
        Ok(Err(err)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("{}", err);
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::error!("delivery worker for {} panicked: {}", url, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::roi::BoundingBox;

    #[derive(Default)]
    struct RecordingCollector {
        slow_first: bool,
        fail_first: bool,
        started: AtomicBool,
        seen: Mutex<Vec<u64>>,
    }

    impl Collector for RecordingCollector {
        fn post(&self, url: &str, body: &[u8]) -> Result<()> {
            let first = !self.started.swap(true, Ordering::SeqCst);
            if first && self.slow_first {
                std::thread::sleep(Duration::from_millis(200));
            }
            let value: serde_json::Value = serde_json::from_slice(body).unwrap();
            self.seen
                .lock()
                .unwrap()
                .push(value["timestamp"].as_u64().unwrap());
            if first && self.fail_first {
                return Err(BridgeError::DeliveryFailure {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn delivery(ts: u64) -> Delivery {
        Delivery {
            url: "http://collector.test/events".to_string(),
            envelope: ResultEnvelope::new(51000, String::new(), ts, &[BoundingBox::new(0, 0, 1, 1)]),
        }
    }

    async fn wait_for(collector: &RecordingCollector, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while collector.seen.lock().unwrap().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for deliveries");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preserves_order_of_cross_thread_enqueues() {
        let collector = Arc::new(RecordingCollector {
            slow_first: true,
            ..Default::default()
        });
        let queue = DeliveryQueue::start(collector.clone());
        let sender = queue.sender();

        sender.enqueue(delivery(4)).unwrap();
        while !collector.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let worker_sender = sender.clone();
        std::thread::spawn(move || {
            for ts in 1..=3 {
                worker_sender.enqueue(delivery(ts)).unwrap();
            }
        })
        .join()
        .unwrap();

        wait_for(&collector, 4).await;
        assert_eq!(*collector.seen.lock().unwrap(), vec![4, 1, 2, 3]);
        assert_eq!(queue.stats().delivered(), 4);
        queue.stop().await;
    }

    #[tokio::test]
    async fn failure_is_dropped_not_retried() {
        let collector = Arc::new(RecordingCollector {
            fail_first: true,
            ..Default::default()
        });
        let queue = DeliveryQueue::start(collector.clone());
        queue.sender().enqueue(delivery(1)).unwrap();
        queue.sender().enqueue(delivery(2)).unwrap();

        wait_for(&collector, 2).await;
        let stats = queue.stats();
        queue.stop().await;

        assert_eq!(*collector.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.delivered(), 1);
    }

    /// Accept one connection, record the request, answer with `status_line`.
    fn one_shot_collector(status_line: &'static str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let join = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                data.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&data).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if body.len() >= length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            write!(
                stream,
                "{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .unwrap();
            String::from_utf8_lossy(&data).to_string()
        });
        (format!("http://{addr}/events"), join)
    }

    #[test]
    fn http_collector_accepts_success_statuses() {
        for status_line in ["HTTP/1.1 200 OK", "HTTP/1.1 204 No Content"] {
            let (url, server) = one_shot_collector(status_line);
            let collector = HttpCollector::new(Duration::from_secs(5));
            collector.post(&url, br#"{"timestamp":7}"#).unwrap();

            let request = server.join().unwrap();
            assert!(request.starts_with("POST /events "), "{request}");
            assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
            assert!(request.ends_with(r#"{"timestamp":7}"#));
        }
    }

    #[test]
    fn http_collector_reports_error_statuses() {
        let (url, server) = one_shot_collector("HTTP/1.1 500 Internal Server Error");
        let collector = HttpCollector::new(Duration::from_secs(5));
        let err = collector.post(&url, b"{}").unwrap_err();
        server.join().unwrap();

        match err {
            BridgeError::DeliveryFailure { url: failed, reason } => {
                assert_eq!(failed, url);
                assert!(reason.contains("500"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn http_collector_reports_transport_errors() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());
        drop(listener);

        let collector = HttpCollector::new(Duration::from_secs(5));
        let err = collector.post(&url, b"{}").unwrap_err();
        assert!(matches!(err, BridgeError::DeliveryFailure { .. }));
    }

    #[tokio::test]
    async fn stop_returns_promptly_when_idle() {
        let queue = DeliveryQueue::start(Arc::new(RecordingCollector::default()));
        let sender = queue.sender();
        let started = Instant::now();
        queue.stop().await;
        assert!(started.elapsed() < IDLE_WAIT);
        assert!(sender.enqueue(delivery(9)).is_err());
    }
}
