//! Book identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies an open book
///
/// Bookmarks, listening-time segments and the persisted last-read position
/// are all keyed by this id, so it must stay stable across sessions of the
/// same book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(Uuid);

impl BookId {
    /// A fresh random id, for books that have never been opened
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for BookId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_unique() {
        assert_ne!(BookId::new(), BookId::new());
    }

    #[test]
    fn test_book_id_parses_its_display() {
        let id = BookId::new();
        assert_eq!(id.to_string().parse::<BookId>().unwrap(), id);
        assert_eq!(format!(" {} ", id).parse::<BookId>().unwrap(), id);
    }

    #[test]
    fn test_book_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<BookId>().is_err());
    }

    #[test]
    fn test_book_id_serializes_as_plain_string() {
        let id = BookId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
