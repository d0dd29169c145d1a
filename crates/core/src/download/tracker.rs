use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Buffered events each subscriber can lag behind by before drops occur.
pub const SUBSCRIBER_BUFFER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    NotStarted,
    Downloading,
    Downloaded,
}

/// A download progress update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgressEvent {
    pub status: DownloadStatus,
    pub bytes_completed: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<DownloadProgressEvent>,
}

struct TrackerInner {
    progress: DownloadProgressEvent,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Tracks one in-flight download and fans progress out to subscribers.
///
/// Fan-out never blocks the producer: events to a full subscriber channel are
/// dropped, except the terminal `Downloaded` event which is queued while the
/// subscriber list is already detached, then every channel is closed.
pub struct DownloadTracker {
    inner: Mutex<TrackerInner>,
}

impl Default for DownloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                progress: DownloadProgressEvent {
                    status: DownloadStatus::Downloading,
                    bytes_completed: 0,
                    total_bytes: 0,
                    percent: 0.0,
                },
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Record new progress and fan it out.
    pub fn update(&self, bytes_completed: u64, total_bytes: u64) {
        let (event, senders) = {
            let mut inner = self.inner.lock().unwrap();
            let percent = if total_bytes > 0 {
                bytes_completed as f64 / total_bytes as f64 * 100.0
            } else {
                0.0
            };
            inner.progress = DownloadProgressEvent {
                status: DownloadStatus::Downloading,
                bytes_completed,
                total_bytes,
                percent,
            };
            let senders: Vec<_> = inner.subscribers.iter().map(|s| s.sender.clone()).collect();
            (inner.progress.clone(), senders)
        };

        // Outside the lock; subscribers that cannot keep up drop the event.
        for sender in senders {
            let _ = sender.try_send(event.clone());
        }
    }

    /// Mark the download finished, deliver the terminal event, and close
    /// every subscriber channel.
    pub fn complete(&self) {
        let (event, subscribers) = {
            let mut inner = self.inner.lock().unwrap();
            inner.progress.status = DownloadStatus::Downloaded;
            inner.progress.percent = 100.0;
            (inner.progress.clone(), std::mem::take(&mut inner.subscribers))
        };

        for subscriber in subscribers {
            let _ = subscriber.sender.try_send(event.clone());
            // Dropping the sender closes the channel once drained.
        }
    }

    /// Subscribe to progress events. The current snapshot is delivered
    /// immediately; the channel closes after the terminal event or when the
    /// returned guard is dropped.
    pub fn subscribe(
        tracker: &Arc<DownloadTracker>,
    ) -> (mpsc::Receiver<DownloadProgressEvent>, ProgressSubscription) {
        let mut inner = tracker.inner.lock().unwrap();
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = sender.try_send(inner.progress.clone());

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, sender });

        (
            receiver,
            ProgressSubscription {
                tracker: Arc::clone(tracker),
                id,
            },
        )
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| s.id != id);
    }
}

/// Removes its subscriber from the tracker when dropped.
pub struct ProgressSubscription {
    tracker: Arc<DownloadTracker>,
    id: u64,
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.tracker.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_current_snapshot() {
        let tracker = Arc::new(DownloadTracker::new());
        tracker.update(50, 100);

        let (mut rx, _sub) = DownloadTracker::subscribe(&tracker);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, DownloadStatus::Downloading);
        assert_eq!(event.bytes_completed, 50);
        assert_eq!(event.percent, 50.0);
    }

    #[tokio::test]
    async fn test_downloading_then_downloaded_then_closed() {
        let tracker = Arc::new(DownloadTracker::new());
        let (mut rx, _sub) = DownloadTracker::subscribe(&tracker);

        tracker.update(10, 100);
        tracker.complete();

        let mut statuses = Vec::new();
        while let Some(event) = rx.recv().await {
            statuses.push(event.status);
        }
        // recv returned None: the channel closed after the terminal event.
        assert!(statuses.contains(&DownloadStatus::Downloading));
        assert_eq!(statuses.last(), Some(&DownloadStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_events_without_blocking() {
        let tracker = Arc::new(DownloadTracker::new());
        let (mut rx, _sub) = DownloadTracker::subscribe(&tracker);

        // Overrun the buffered channel without draining it. The producer
        // must never block; overflow events are simply dropped.
        for i in 0..(SUBSCRIBER_BUFFER as u64 * 3) {
            tracker.update(i, 1000);
        }
        tracker.complete();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        // Bounded by the buffer, and the channel closed afterwards.
        assert!(received.len() <= SUBSCRIBER_BUFFER);
        assert!(received
            .iter()
            .all(|e| e.status != DownloadStatus::NotStarted));
    }

    #[tokio::test]
    async fn test_draining_subscriber_gets_terminal_event() {
        let tracker = Arc::new(DownloadTracker::new());
        let (mut rx, _sub) = DownloadTracker::subscribe(&tracker);

        tracker.update(500, 1000);
        tracker.complete();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.last().unwrap().status, DownloadStatus::Downloaded);
        assert_eq!(received.last().unwrap().percent, 100.0);
    }

    #[tokio::test]
    async fn test_unsubscribe_on_drop() {
        let tracker = Arc::new(DownloadTracker::new());
        let (mut rx, sub) = DownloadTracker::subscribe(&tracker);
        let _ = rx.recv().await.unwrap();

        drop(sub);
        // The subscriber list no longer holds a sender, so the channel closes.
        assert!(rx.recv().await.is_none());

        // Updates after unsubscribe must not panic or deliver.
        tracker.update(1, 2);
        tracker.complete();
    }

    #[tokio::test]
    async fn test_zero_total_yields_zero_percent() {
        let tracker = Arc::new(DownloadTracker::new());
        tracker.update(0, 0);
        let (mut rx, _sub) = DownloadTracker::subscribe(&tracker);
        assert_eq!(rx.recv().await.unwrap().percent, 0.0);
    }
}
