// ── Reactive snapshot streams ──
//
// Subscription handle over the store's published connector list.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{ConnectorId, ConnectorSnapshot};

type Snapshots = Arc<Vec<Arc<ConnectorSnapshot>>>;

/// A subscription to every connector's snapshot.
///
/// Provides both point-in-time access and change notification via
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct SnapshotStream {
    current: Snapshots,
    receiver: watch::Receiver<Snapshots>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshots>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The list captured at creation or at the last `changed()`.
    pub fn current(&self) -> &Snapshots {
        &self.current
    }

    /// One connector from the latest list.
    pub fn connector(&self, id: &ConnectorId) -> Option<Arc<ConnectorSnapshot>> {
        self.receiver.borrow().iter().find(|s| s.id() == id).cloned()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshots> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding the full list after every merge.
pub struct SnapshotWatchStream {
    inner: WatchStream<Snapshots>,
}

impl Stream for SnapshotWatchStream {
    type Item = Snapshots;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
