//! Current position and everything derived from it
//!
//! Segment durations come from the manifest and are replaced by the value the
//! transport engine reports once a segment has been prepared. A duration that
//! is still unknown is modelled explicitly: forward seeks never cross the end
//! of a segment of unknown length, and remaining-time estimates count it as
//! zero.

use std::collections::HashMap;
use std::sync::Arc;
use storystream_core::{
    Duration, PlaybackTarget, PositionMetadata, ReadingOrder, Segment, SegmentId,
};

/// What is known about a segment's length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDuration {
    /// Declared by the manifest
    Declared(Duration),
    /// Reported by the transport engine
    Learned(Duration),
    Unknown,
}

impl SegmentDuration {
    pub fn known(&self) -> Option<Duration> {
        match self {
            Self::Declared(d) | Self::Learned(d) => Some(*d),
            Self::Unknown => None,
        }
    }
}

/// Where a relative seek lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekResolution {
    /// Inside the current segment
    Within(PlaybackTarget),
    /// Before the start of the first segment; held at its start
    ClampedToStart(PlaybackTarget),
    /// Crossed back into the previous segment
    Previous(PlaybackTarget),
    /// Crossed forward into the next segment
    Next(PlaybackTarget),
    /// Past the end of the last segment; nothing to do
    PastEnd,
}

/// Holds the current `(segment, offset)` of one session
#[derive(Debug)]
pub struct PositionTracker {
    order: Arc<ReadingOrder>,
    current: PlaybackTarget,
    learned: HashMap<SegmentId, Duration>,
    zero_duration_reported: bool,
}

impl PositionTracker {
    /// # Panics
    ///
    /// Panics if `start` names a segment outside `order`.
    pub fn new(order: Arc<ReadingOrder>, start: PlaybackTarget) -> Self {
        order.segment(&start.segment_id);
        Self {
            order,
            current: start,
            learned: HashMap::new(),
            zero_duration_reported: false,
        }
    }

    pub fn current_position(&self) -> &PlaybackTarget {
        &self.current
    }

    pub fn current_segment(&self) -> &Segment {
        self.order.segment(&self.current.segment_id)
    }

    pub fn reading_order(&self) -> &ReadingOrder {
        &self.order
    }

    /// # Panics
    ///
    /// Panics if `target` names a segment outside the reading order.
    pub fn set_position(&mut self, target: PlaybackTarget) {
        self.order.segment(&target.segment_id);
        self.current = target;
    }

    pub fn set_offset(&mut self, offset_ms: u64) {
        self.current.offset_ms = offset_ms;
    }

    pub fn duration_of(&self, id: &SegmentId) -> SegmentDuration {
        if let Some(learned) = self.learned.get(id) {
            return SegmentDuration::Learned(*learned);
        }
        match self.order.segment(id).duration {
            Some(declared) => SegmentDuration::Declared(declared),
            None => SegmentDuration::Unknown,
        }
    }

    /// Records the duration reported by the engine for a prepared segment
    ///
    /// Returns true the first time every segment of the book has reported a
    /// duration of zero, which indicates a broken engine rather than a book of
    /// empty tracks.
    pub fn learn_duration(&mut self, id: &SegmentId, duration: Duration) -> bool {
        self.order.segment(id);
        self.learned.insert(id.clone(), duration);

        if self.zero_duration_reported || self.learned.len() < self.order.len() {
            return false;
        }

        if self.learned.values().all(|d| d.is_zero()) {
            self.zero_duration_reported = true;
            log::error!(
                "transport engine reported a zero duration for all {} segments",
                self.order.len()
            );
            return true;
        }

        false
    }

    /// Resolves an absolute offset into the current segment, which may be
    /// negative or past the segment's end
    pub fn resolve_seek(&self, offset_ms: i64) -> SeekResolution {
        let current = self.current_segment();

        if offset_ms < 0 {
            let behind = offset_ms.unsigned_abs();
            return match &current.previous {
                Some(previous) => {
                    // Unknown previous length: land on its start
                    let offset = match self.duration_of(previous).known() {
                        Some(duration) => duration.as_millis().saturating_sub(behind),
                        None => 0,
                    };
                    SeekResolution::Previous(PlaybackTarget::new(previous.clone(), offset))
                }
                None => SeekResolution::ClampedToStart(PlaybackTarget::start_of(current.id.clone())),
            };
        }

        let offset = offset_ms as u64;
        match self.duration_of(&current.id).known() {
            Some(duration) if offset > duration.as_millis() => match &current.next {
                Some(next) => SeekResolution::Next(PlaybackTarget::new(
                    next.clone(),
                    offset - duration.as_millis(),
                )),
                None => SeekResolution::PastEnd,
            },
            _ => SeekResolution::Within(PlaybackTarget::new(current.id.clone(), offset)),
        }
    }

    pub fn metadata(&self) -> PositionMetadata {
        self.metadata_for(&self.current)
    }

    /// Progress and remaining time at `target`
    ///
    /// Book progress is time-based when every duration is known and falls
    /// back to segment counting otherwise. Remaining time is a best-effort
    /// sum in which unknown durations count as zero.
    pub fn metadata_for(&self, target: &PlaybackTarget) -> PositionMetadata {
        let segment = self.order.segment(&target.segment_id);
        let duration = self.duration_of(&segment.id).known();

        let elapsed_in_segment = match duration {
            Some(d) => Duration::from_millis(target.offset_ms.min(d.as_millis())),
            None => Duration::from_millis(target.offset_ms),
        };

        let segment_progress = match duration {
            Some(d) => elapsed_in_segment.fraction_of(d),
            None => 0.0,
        };

        let durations: Vec<Option<Duration>> = self
            .order
            .iter()
            .map(|s| self.duration_of(&s.id).known())
            .collect();

        let book_progress = if durations.iter().all(Option::is_some) {
            let total: Duration = durations.iter().flatten().copied().sum();
            let before: Duration = durations[..segment.index].iter().flatten().copied().sum();
            (before + elapsed_in_segment).fraction_of(total)
        } else {
            (segment.index as f64 + segment_progress) / self.order.len() as f64
        };

        let remaining_in_segment = duration
            .map(|d| d.saturating_sub(elapsed_in_segment))
            .unwrap_or(Duration::ZERO);
        let remaining_after: Duration = durations[segment.index + 1..]
            .iter()
            .flatten()
            .copied()
            .sum();

        PositionMetadata {
            segment_progress: segment_progress.clamp(0.0, 1.0),
            book_progress: book_progress.clamp(0.0, 1.0),
            remaining_book_time: remaining_in_segment + remaining_after,
            chapter_title: segment.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storystream_core::SegmentDescriptor;

    fn secs(s: u64) -> Duration {
        Duration::from_seconds(s)
    }

    fn tracker(durations: &[Option<u64>]) -> PositionTracker {
        let descriptors = durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let descriptor = SegmentDescriptor::new(format!("s{}", i))
                    .with_title(format!("Chapter {}", i + 1));
                match d {
                    Some(d) => descriptor.with_duration(secs(*d)),
                    None => descriptor,
                }
            })
            .collect();
        let order = Arc::new(ReadingOrder::new(descriptors).unwrap());
        let start = PlaybackTarget::start_of(order.first().id.clone());
        PositionTracker::new(order, start)
    }

    fn at(id: &str, offset_ms: u64) -> PlaybackTarget {
        PlaybackTarget::new(SegmentId::new(id), offset_ms)
    }

    #[test]
    fn test_seek_within_segment() {
        let t = tracker(&[Some(100), Some(200)]);
        assert_eq!(t.resolve_seek(5_000), SeekResolution::Within(at("s0", 5_000)));
    }

    #[test]
    fn test_seek_before_first_segment_clamps() {
        let t = tracker(&[Some(100), Some(200)]);
        assert_eq!(t.resolve_seek(-5_000), SeekResolution::ClampedToStart(at("s0", 0)));
    }

    #[test]
    fn test_seek_back_into_previous_segment() {
        let mut t = tracker(&[Some(100), Some(200)]);
        t.set_position(at("s1", 2_000));
        assert_eq!(t.resolve_seek(-10_000), SeekResolution::Previous(at("s0", 90_000)));
    }

    #[test]
    fn test_seek_back_into_previous_of_unknown_length() {
        let mut t = tracker(&[None, Some(200)]);
        t.set_position(at("s1", 0));
        assert_eq!(t.resolve_seek(-10_000), SeekResolution::Previous(at("s0", 0)));
    }

    #[test]
    fn test_seek_forward_into_next_segment() {
        let t = tracker(&[Some(100), Some(200)]);
        assert_eq!(t.resolve_seek(130_000), SeekResolution::Next(at("s1", 30_000)));
    }

    #[test]
    fn test_seek_past_end_of_last_segment() {
        let mut t = tracker(&[Some(100), Some(200)]);
        t.set_position(at("s1", 0));
        assert_eq!(t.resolve_seek(250_000), SeekResolution::PastEnd);
    }

    #[test]
    fn test_forward_seek_never_crosses_unknown_duration() {
        let t = tracker(&[None, Some(200)]);
        assert_eq!(
            t.resolve_seek(10_000_000),
            SeekResolution::Within(at("s0", 10_000_000))
        );
    }

    #[test]
    fn test_learned_duration_overrides_manifest() {
        let mut t = tracker(&[Some(100), Some(200)]);
        t.learn_duration(&"s0".into(), secs(120));
        assert_eq!(t.duration_of(&"s0".into()), SegmentDuration::Learned(secs(120)));
        assert_eq!(t.resolve_seek(110_000), SeekResolution::Within(at("s0", 110_000)));
    }

    #[test]
    fn test_metadata_with_known_durations() {
        let mut t = tracker(&[Some(100), Some(200), Some(150)]);
        t.set_position(at("s1", 50_000));
        let m = t.metadata();
        assert!((m.segment_progress - 0.25).abs() < 1e-9);
        assert!((m.book_progress - 150.0 / 450.0).abs() < 1e-9);
        assert_eq!(m.remaining_book_time, secs(300));
        assert_eq!(m.chapter_title.as_deref(), Some("Chapter 2"));
    }

    #[test]
    fn test_metadata_with_unknown_durations_is_best_effort() {
        let mut t = tracker(&[Some(100), None, Some(150)]);
        t.set_position(at("s1", 50_000));
        let m = t.metadata();
        assert_eq!(m.segment_progress, 0.0);
        assert!((m.book_progress - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.remaining_book_time, secs(150));
    }

    #[test]
    fn test_metadata_clamps_offset_past_duration() {
        let mut t = tracker(&[Some(100)]);
        t.set_offset(500_000);
        let m = t.metadata();
        assert_eq!(m.segment_progress, 1.0);
        assert_eq!(m.book_progress, 1.0);
        assert_eq!(m.remaining_book_time, Duration::ZERO);
    }

    #[test]
    fn test_zero_duration_detection_fires_once() {
        let mut t = tracker(&[Some(100), Some(200)]);
        assert!(!t.learn_duration(&"s0".into(), Duration::ZERO));
        assert!(t.learn_duration(&"s1".into(), Duration::ZERO));
        assert!(!t.learn_duration(&"s1".into(), Duration::ZERO));
    }

    #[test]
    fn test_zero_duration_not_reported_for_real_durations() {
        let mut t = tracker(&[Some(100), Some(200)]);
        t.learn_duration(&"s0".into(), Duration::ZERO);
        assert!(!t.learn_duration(&"s1".into(), secs(200)));
    }

    #[test]
    #[should_panic(expected = "not part of this reading order")]
    fn test_set_position_unknown_segment_panics() {
        let mut t = tracker(&[Some(100)]);
        t.set_position(at("nope", 0));
    }
}
