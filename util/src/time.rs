//! Time helpers. Block timestamps are nanoseconds since epoch; transaction
//! timestamps are seconds since epoch (see the data model).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in whole seconds since the Unix epoch.
pub fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock before epoch")
		.as_secs() as i64
}

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
	let d = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("system clock before epoch");
	d.as_secs() as i64 * 1_000_000_000 + d.subsec_nanos() as i64
}
