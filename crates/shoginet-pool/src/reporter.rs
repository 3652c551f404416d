//! Progress reporter (spec §4.C): a background task holding a bounded
//! mailbox of `(job id, partial result bytes)`, POSTing them out of band
//! and dropping silently on overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::{broadcast, Mutex, Notify};

use crate::backend::{self, ProgressPostStatus};
use crate::events::{LogLevel, PoolEvent};

const RATE_LIMIT_SLEEP: Duration = Duration::from_secs(60);

enum Item {
    Report { job_id: String, body: Vec<u8> },
    Stop,
}

struct Mailbox {
    queue: Mutex<VecDeque<Item>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

/// Handle used by workers to post partial analysis results. Cloning is
/// cheap (shares the underlying mailbox).
#[derive(Clone)]
pub struct ProgressHandle {
    mailbox: Arc<Mailbox>,
}

impl ProgressHandle {
    /// Enqueues `(analysis/<job_id>, body)` without blocking. If the
    /// mailbox is at capacity, drops the message and returns `false`.
    pub async fn send(&self, job_id: &str, body: Vec<u8>) -> bool {
        let mut queue = self.mailbox.queue.lock().await;
        if queue.len() >= self.mailbox.capacity {
            self.mailbox.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(Item::Report {
            job_id: job_id.to_string(),
            body,
        });
        drop(queue);
        self.mailbox.notify.notify_one();
        true
    }

    /// Number of messages dropped for observability.
    pub fn dropped_count(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    /// Drains whatever is still queued and enqueues a sentinel; the
    /// reporter loop exits as soon as it reaches the sentinel.
    pub async fn stop(&self) {
        let mut queue = self.mailbox.queue.lock().await;
        queue.clear();
        queue.push_back(Item::Stop);
        drop(queue);
        self.mailbox.notify.notify_one();
    }
}

/// Background task: dequeues progress reports and POSTs them, applying
/// the `429` 60s suspension rule.
pub struct ProgressReporter {
    mailbox: Arc<Mailbox>,
    http: reqwest::Client,
    endpoint: Url,
    events: broadcast::Sender<PoolEvent>,
}

impl ProgressReporter {
    /// Builds a reporter with the given mailbox capacity (the supervisor
    /// sets this to `workers + 4`).
    pub fn new(capacity: usize, http: reqwest::Client, endpoint: Url, events: broadcast::Sender<PoolEvent>) -> Self {
        ProgressReporter {
            mailbox: Arc::new(Mailbox {
                queue: Mutex::new(VecDeque::new()),
                capacity,
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
            http,
            endpoint,
            events,
        }
    }

    /// A cloneable handle workers use to submit progress reports.
    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle {
            mailbox: self.mailbox.clone(),
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        let _ = self.events.send(PoolEvent::Log { level, message });
    }

    /// Runs the dequeue/POST loop until [`ProgressHandle::stop`] is
    /// called.
    pub async fn run(self) {
        loop {
            let item = self.next_item().await;
            match item {
                Item::Stop => return,
                Item::Report { job_id, body } => match backend::send_progress(&self.http, &self.endpoint, &job_id, &body).await {
                    Ok(ProgressPostStatus::Ok) => {}
                    Ok(ProgressPostStatus::RateLimited) => {
                        self.log(
                            LogLevel::Error,
                            "Too many requests. Suspending progress reports for 60s ...".into(),
                        );
                        tokio::time::sleep(RATE_LIMIT_SLEEP).await;
                    }
                    Ok(ProgressPostStatus::Unexpected(status)) => {
                        self.log(
                            LogLevel::Error,
                            format!("Expected status 204 for progress report, got {status}"),
                        );
                    }
                    Err(err) => {
                        self.log(LogLevel::Warn, format!("Could not send progress report ({err}). Continuing."));
                    }
                },
            }
        }
    }

    async fn next_item(&self) -> Item {
        loop {
            let mut queue = self.mailbox.queue.lock().await;
            if let Some(item) = queue.pop_front() {
                return item;
            }
            drop(queue);
            self.mailbox.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_past_capacity_is_dropped_silently() {
        let (tx, _rx) = broadcast::channel(16);
        let reporter = ProgressReporter::new(
            4,
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:1/").unwrap(),
            tx,
        );
        let handle = reporter.handle();

        let mut accepted = 0;
        for i in 0..50 {
            if handle.send(&format!("job{i}"), vec![]).await {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
        assert_eq!(handle.dropped_count(), 46);
    }
}
