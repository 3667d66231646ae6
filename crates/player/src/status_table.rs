//! Per-segment download status, shared between downloaders and sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use storystream_core::{ReadingOrder, SegmentId, SegmentStatus};
use tokio::sync::mpsc;

/// A status change published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStatusUpdate {
    pub segment_id: SegmentId,
    pub status: SegmentStatus,
}

struct Inner {
    statuses: RwLock<HashMap<SegmentId, SegmentStatus>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SegmentStatusUpdate>>>,
}

/// Exactly one status per segment of a reading order
///
/// Clones share the same table. Reads are safe under concurrent writes;
/// every write is published to all subscribers, in write order.
#[derive(Clone)]
pub struct SegmentStatusTable {
    inner: Arc<Inner>,
}

impl SegmentStatusTable {
    /// Creates a table with every segment `NotDownloaded`
    pub fn new(order: &ReadingOrder) -> Self {
        let statuses = order
            .iter()
            .map(|segment| (segment.id.clone(), SegmentStatus::NotDownloaded))
            .collect();

        Self {
            inner: Arc::new(Inner {
                statuses: RwLock::new(statuses),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current status of a segment
    ///
    /// # Panics
    ///
    /// Panics if the segment is not part of the table's reading order.
    pub fn status(&self, id: &SegmentId) -> SegmentStatus {
        let statuses = match self.inner.statuses.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match statuses.get(id) {
            Some(status) => status.clone(),
            None => panic!("segment '{}' has no download status", id),
        }
    }

    /// Replaces a segment's status and notifies subscribers
    ///
    /// # Panics
    ///
    /// Panics if the segment is not part of the table's reading order.
    pub fn update(&self, id: &SegmentId, status: SegmentStatus) {
        // Held across the write so concurrent writers publish in write order
        let mut subscribers = self.subscribers();
        {
            let mut statuses = match self.inner.statuses.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match statuses.get_mut(id) {
                Some(slot) => *slot = status.clone(),
                None => panic!("segment '{}' has no download status", id),
            }
        }

        log::debug!("segment {} is now {}", id, status);

        let update = SegmentStatusUpdate {
            segment_id: id.clone(),
            status,
        };
        subscribers.retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }

    /// Receives every update made after this call
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SegmentStatusUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    /// Number of segments with status `Downloaded`
    pub fn downloaded_count(&self) -> usize {
        let statuses = match self.inner.statuses.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses.values().filter(|s| s.is_downloaded()).count()
    }

    /// Copy of every status, in no particular order
    pub fn snapshot(&self) -> HashMap<SegmentId, SegmentStatus> {
        match self.inner.statuses.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<SegmentStatusUpdate>>> {
        match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storystream_core::SegmentDescriptor;

    fn order() -> ReadingOrder {
        ReadingOrder::new(vec![SegmentDescriptor::new("a"), SegmentDescriptor::new("b")]).unwrap()
    }

    #[test]
    fn test_starts_not_downloaded() {
        let table = SegmentStatusTable::new(&order());
        assert_eq!(table.status(&"a".into()), SegmentStatus::NotDownloaded);
        assert_eq!(table.snapshot().len(), 2);
        assert_eq!(table.downloaded_count(), 0);
    }

    #[test]
    fn test_update_is_visible_to_clones() {
        let table = SegmentStatusTable::new(&order());
        let writer = table.clone();
        writer.update(&"b".into(), SegmentStatus::Downloaded);
        assert!(table.status(&"b".into()).is_downloaded());
        assert_eq!(table.downloaded_count(), 1);
    }

    #[test]
    fn test_subscribers_see_updates_in_order() {
        let table = SegmentStatusTable::new(&order());
        let mut rx = table.subscribe();

        table.update(&"a".into(), SegmentStatus::downloading(10));
        table.update(&"a".into(), SegmentStatus::Downloaded);

        assert_eq!(rx.try_recv().unwrap().status, SegmentStatus::downloading(10));
        assert_eq!(rx.try_recv().unwrap().status, SegmentStatus::Downloaded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let table = SegmentStatusTable::new(&order());
        let rx = table.subscribe();
        drop(rx);
        table.update(&"a".into(), SegmentStatus::Downloaded);
        assert!(table.subscribers().is_empty());
    }

    #[test]
    #[should_panic(expected = "has no download status")]
    fn test_unknown_segment_panics() {
        let table = SegmentStatusTable::new(&order());
        table.update(&"zzz".into(), SegmentStatus::Downloaded);
    }
}
