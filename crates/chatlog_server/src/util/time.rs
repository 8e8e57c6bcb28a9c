#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_millis() as i64
}

/// Millisecond wall clock that never goes backwards for its owner.
///
/// Each worker owns one; a wall-clock step back repeats the last timestamp.
#[derive(Debug, Default)]
pub struct ObservedClock {
	last_ms: i64,
}

impl ObservedClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn now(&mut self) -> DateTime<Utc> {
		self.stamp(unix_ms_now())
	}

	/// Clamp `wall_ms` against the previous stamp.
	pub fn stamp(&mut self, wall_ms: i64) -> DateTime<Utc> {
		self.last_ms = self.last_ms.max(wall_ms);
		DateTime::from_timestamp_millis(self.last_ms).unwrap_or_default()
	}
}
