//! Time primitives and self-validation shared by the domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Milliseconds since the Unix epoch
///
/// Only ever compared and subtracted; it does not need to be monotonic
/// across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Reads the system clock; a clock set before 1970 reads as the epoch
    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self(i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX))
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Time from `earlier` until `self`; zero when `earlier` is actually later
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let elapsed = self.0.saturating_sub(earlier.0);
        Duration(u64::try_from(elapsed).unwrap_or(0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let step = i64::try_from(rhs.0).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(step))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A length of audio or of wall-clock time, in milliseconds
///
/// Arithmetic saturates instead of wrapping.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Self = Self(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_seconds(seconds: u64) -> Self {
        Self(seconds.saturating_mul(1000))
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whole seconds, rounded down
    pub const fn as_seconds(&self) -> u64 {
        self.0 / 1000
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Duration) -> Duration {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Duration) -> Duration {
        Self(self.0.saturating_add(other.0))
    }

    /// How much of `whole` this covers, in `0.0..=1.0`
    ///
    /// A zero `whole` has nothing to cover and yields 0.
    pub fn fraction_of(&self, whole: Duration) -> f64 {
        if whole.is_zero() {
            return 0.0;
        }
        (self.0 as f64 / whole.0 as f64).clamp(0.0, 1.0)
    }

    /// `H:MM:SS`, hours included even when zero
    pub fn as_hms(&self) -> String {
        let secs = self.as_seconds();
        format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        self.saturating_add(rhs)
    }
}

impl std::iter::Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Duration {
        iter.fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hms())
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<Duration> for std::time::Duration {
    fn from(d: Duration) -> Self {
        std::time::Duration::from_millis(d.0)
    }
}

/// A value that can check its own invariants
///
/// Each problem is reported as one human-readable line.
pub trait Validator {
    fn validate(&self) -> Result<(), Vec<String>>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_never_negative() {
        let opened = Timestamp::from_millis(10_000);
        let later = opened + Duration::from_seconds(15);
        assert_eq!(later.as_millis(), 25_000);
        assert_eq!(later.duration_since(opened), Duration::from_seconds(15));
        assert_eq!(opened.duration_since(later), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_add_saturates() {
        let t = Timestamp::from_millis(i64::MAX - 1) + Duration::from_millis(u64::MAX);
        assert_eq!(t.as_millis(), i64::MAX);
    }

    #[test]
    fn test_now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::from_millis(0));
    }

    #[test]
    fn test_chapter_lengths_add_up() {
        let book: Duration = [100, 200, 150].into_iter().map(Duration::from_seconds).sum();
        assert_eq!(book.as_seconds(), 450);
        assert_eq!(book.to_string(), "0:07:30");
        assert_eq!((book + Duration::from_seconds(3_600)).as_hms(), "1:07:30");
    }

    #[test]
    fn test_remaining_time_stops_at_zero() {
        let chapter = Duration::from_seconds(90);
        let listened = Duration::from_seconds(120);
        assert_eq!(chapter.saturating_sub(listened), Duration::ZERO);
        assert_eq!(listened.saturating_sub(chapter), Duration::from_seconds(30));
    }

    #[test]
    fn test_fraction_of() {
        let chapter = Duration::from_seconds(200);
        assert_eq!(Duration::from_seconds(50).fraction_of(chapter), 0.25);
        assert_eq!(Duration::from_seconds(500).fraction_of(chapter), 1.0);
        assert_eq!(chapter.fraction_of(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_converts_to_and_from_std() {
        let tick: Duration = std::time::Duration::from_millis(250).into();
        assert_eq!(tick.as_millis(), 250);
        assert_eq!(std::time::Duration::from(tick), std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_serializes_as_bare_millis() {
        let json = serde_json::to_string(&Duration::from_seconds(2)).unwrap();
        assert_eq!(json, "2000");
    }

    #[test]
    fn test_is_valid_follows_validate() {
        struct Rate(f32);

        impl Validator for Rate {
            fn validate(&self) -> Result<(), Vec<String>> {
                if self.0 > 0.0 {
                    Ok(())
                } else {
                    Err(vec![format!("rate {} is not positive", self.0)])
                }
            }
        }

        assert!(Rate(1.0).is_valid());
        assert!(!Rate(0.0).is_valid());
    }
}
