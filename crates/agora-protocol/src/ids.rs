//! Envelope and client identifier generation.
//!
//! Generated ids have the shape `prefix-time-random`: a short alphabetic
//! prefix, the mint time in milliseconds as lowercase hex, and a random
//! suffix. The time component keeps ids roughly sortable across the fleet;
//! the suffix keeps them collision-resistant. Validation checks the shape
//! and rejects anything else — malformed ids are never coerced.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Id prefix for chat messages.
pub const MESSAGE_PREFIX: &str = "msg";
/// Id prefix for command requests.
pub const COMMAND_PREFIX: &str = "cmd";
/// Id prefix for command responses.
pub const RESPONSE_PREFIX: &str = "res";
/// Id prefix for error envelopes.
pub const ERROR_PREFIX: &str = "err";
/// Id prefix for telemetry envelopes.
pub const TELEMETRY_PREFIX: &str = "tel";
/// Id prefix for server-assigned client ids.
pub const CLIENT_PREFIX: &str = "cli";

/// Mixed into the random suffix so two ids minted in the same millisecond
/// differ even if the random draws collide.
static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a fresh id with the given prefix.
///
/// The prefix must itself satisfy the id shape (1-8 lowercase ASCII
/// letters); all the prefixes exported by this module do.
#[must_use]
pub fn generate(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = rand::random::<u32>().wrapping_add(counter);
    format!("{prefix}-{millis:012x}-{suffix:08x}")
}

/// Check whether `id` matches the generated-id shape.
///
/// Shape: 1-8 lowercase ASCII letters, `-`, 8-16 lowercase hex digits
/// (milliseconds), `-`, 4-12 lowercase hex digits (random suffix).
#[must_use]
pub fn is_well_formed(id: &str) -> bool {
    let mut parts = id.split('-');
    let (Some(prefix), Some(time), Some(random), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    matches!(prefix.len(), 1..=8)
        && prefix.bytes().all(|b| b.is_ascii_lowercase())
        && matches!(time.len(), 8..=16)
        && is_lower_hex(time)
        && matches!(random.len(), 4..=12)
        && is_lower_hex(random)
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
