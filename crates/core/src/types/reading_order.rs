//! Reading order: the ordered, immutable sequence of playable segments
//!
//! A book is split into segments (chapters or tracks). The reading order is
//! built once when the book is opened and never changes afterwards. Segments
//! refer to their neighbours by id, and the reading order resolves ids to
//! segments through an index table, so no segment holds a reference to
//! another or to its owning book.

use crate::error::AppError;
use crate::types::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable identifier of a segment within a reading order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Input used to build a reading order, typically produced by a manifest parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub id: SegmentId,
    pub title: Option<String>,
    /// Duration declared by the manifest, if any
    pub duration: Option<Duration>,
    /// Remote location of the segment's audio
    pub href: Option<String>,
}

impl SegmentDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SegmentId::new(id),
            title: None,
            duration: None,
            href: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

/// One playable unit of the reading order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    /// Zero-based position in the reading order
    pub index: usize,
    pub title: Option<String>,
    pub duration: Option<Duration>,
    pub href: Option<String>,
    pub next: Option<SegmentId>,
    pub previous: Option<SegmentId>,
}

impl Segment {
    /// True if the segment can be fetched by the transport engine directly
    /// from a remote location
    pub fn is_remotely_addressable(&self) -> bool {
        self.href
            .as_deref()
            .map(|href| href.starts_with("http://") || href.starts_with("https://"))
            .unwrap_or(false)
    }

    pub fn is_first(&self) -> bool {
        self.previous.is_none()
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Immutable ordered sequence of segments
#[derive(Debug, Clone)]
pub struct ReadingOrder {
    segments: Vec<Segment>,
    by_id: HashMap<SegmentId, usize>,
}

impl ReadingOrder {
    /// Builds a reading order from descriptors, in order
    ///
    /// Fails if the list is empty or contains a duplicate id.
    pub fn new(descriptors: Vec<SegmentDescriptor>) -> Result<Self, AppError> {
        if descriptors.is_empty() {
            return Err(AppError::InvalidReadingOrder {
                reason: "a reading order needs at least one segment".to_string(),
            });
        }

        let mut by_id = HashMap::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            if by_id.insert(descriptor.id.clone(), index).is_some() {
                return Err(AppError::DuplicateSegment {
                    id: descriptor.id.to_string(),
                });
            }
        }

        let ids: Vec<SegmentId> = descriptors.iter().map(|d| d.id.clone()).collect();
        let segments = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, d)| Segment {
                id: d.id,
                index,
                title: d.title,
                duration: d.duration,
                href: d.href,
                next: ids.get(index + 1).cloned(),
                previous: index.checked_sub(1).map(|i| ids[i].clone()),
            })
            .collect();

        Ok(Self { segments, by_id })
    }

    /// Number of segments (always at least one)
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> &Segment {
        &self.segments[0]
    }

    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    pub fn contains(&self, id: &SegmentId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &SegmentId) -> Option<&Segment> {
        self.by_id.get(id).map(|&index| &self.segments[index])
    }

    /// Resolves a segment id that callers guarantee to be part of this
    /// reading order.
    ///
    /// # Panics
    ///
    /// Panics if the id is unknown. An unknown id means the caller and the
    /// reading order disagree about the book, which is a programming error.
    pub fn segment(&self, id: &SegmentId) -> &Segment {
        match self.get(id) {
            Some(segment) => segment,
            None => panic!(
                "segment '{}' is not part of this reading order ({} segments)",
                id,
                self.segments.len()
            ),
        }
    }

    pub fn by_index(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn next(&self, id: &SegmentId) -> Option<&Segment> {
        self.segment(id).next.as_ref().map(|next| self.segment(next))
    }

    pub fn previous(&self, id: &SegmentId) -> Option<&Segment> {
        self.segment(id)
            .previous
            .as_ref()
            .map(|previous| self.segment(previous))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}
