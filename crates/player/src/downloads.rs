//! Download task facade
//!
//! Transfer mechanics belong to a [`SegmentDownloader`]. Downloaders report
//! progress by writing to the [`SegmentStatusTable`]; sessions only ever read
//! that table.

use crate::error::PlayerResult;
use crate::status_table::SegmentStatusTable;
use std::sync::Arc;
use storystream_core::{ReadingOrder, Segment, SegmentId, SegmentStatus};

/// Fetches segment audio to local storage
///
/// Implementations publish progress through the status table they were
/// created with; `fetch` may return before the transfer completes.
pub trait SegmentDownloader: Send + Sync {
    fn fetch(&self, segment: &Segment) -> PlayerResult<()>;

    fn cancel(&self, segment: &Segment) -> PlayerResult<()>;

    /// Removes downloaded audio
    fn delete(&self, segment: &Segment) -> PlayerResult<()>;
}

/// Per-book entry point for download commands
pub struct DownloadTasks {
    order: Arc<ReadingOrder>,
    statuses: SegmentStatusTable,
    downloader: Arc<dyn SegmentDownloader>,
}

impl DownloadTasks {
    pub fn new(
        order: Arc<ReadingOrder>,
        statuses: SegmentStatusTable,
        downloader: Arc<dyn SegmentDownloader>,
    ) -> Self {
        Self {
            order,
            statuses,
            downloader,
        }
    }

    /// Starts a download unless one is running or already finished
    ///
    /// Returns false when nothing was started.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not part of the reading order.
    pub fn fetch(&self, id: &SegmentId) -> PlayerResult<bool> {
        let segment = self.order.segment(id);
        match self.statuses.status(id) {
            SegmentStatus::Downloaded | SegmentStatus::Downloading { .. } => {
                log::debug!("segment {} needs no fetch", id);
                Ok(false)
            }
            _ => {
                self.downloader.fetch(segment)?;
                Ok(true)
            }
        }
    }

    /// Fetches every segment that is not downloaded or downloading
    ///
    /// Returns the number of downloads started.
    pub fn fetch_all(&self) -> PlayerResult<usize> {
        let mut started = 0;
        for segment in self.order.iter() {
            if self.fetch(&segment.id)? {
                started += 1;
            }
        }
        log::info!("started {} of {} segment downloads", started, self.order.len());
        Ok(started)
    }

    pub fn cancel(&self, id: &SegmentId) -> PlayerResult<()> {
        let segment = self.order.segment(id);
        self.downloader.cancel(segment)?;
        self.statuses.update(id, SegmentStatus::NotDownloaded);
        Ok(())
    }

    pub fn delete(&self, id: &SegmentId) -> PlayerResult<()> {
        let segment = self.order.segment(id);
        self.downloader.delete(segment)?;
        self.statuses.update(id, SegmentStatus::NotDownloaded);
        Ok(())
    }

    pub fn status(&self, id: &SegmentId) -> SegmentStatus {
        self.statuses.status(id)
    }

    /// Fraction of segments downloaded, in `[0.0, 1.0]`
    pub fn progress(&self) -> f64 {
        self.statuses.downloaded_count() as f64 / self.order.len() as f64
    }

    pub fn statuses(&self) -> &SegmentStatusTable {
        &self.statuses
    }
}
