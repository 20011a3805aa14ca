//! Strict timestamp handling.
//!
//! Exactly one grammar is accepted: an RFC 3339 date-time with an explicit
//! numeric UTC offset, e.g. `2026-03-01T17:04:05.120+00:00`. Fractional
//! seconds are optional; the offset colon is optional when parsing (`+0000`
//! and `+00:00` denote the same instant). The `Z` suffix is rejected rather
//! than interpreted — the bus only accepts the documented form, it never
//! guesses which convention a client meant.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use thiserror::Error;

/// The single accepted grammar (`%:z` is a numeric offset; chrono rejects
/// `Z` for it).
const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// A timestamp outside the accepted grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimestampError {
    /// A trailing `Z`/`z` where a numeric offset is required.
    #[error("'Z' offsets are not accepted; use an explicit numeric offset")]
    ZuluOffset,

    /// Anything else that deviates from the documented grammar.
    #[error("expected YYYY-MM-DDThh:mm:ss[.frac]+hh:mm")]
    Grammar,
}

/// Parse a timestamp in the accepted grammar.
///
/// # Errors
///
/// Returns an error for any deviation from the documented format; no
/// alternative formats are guessed.
pub fn parse(input: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
    if input.ends_with(['Z', 'z']) {
        return Err(TimestampError::ZuluOffset);
    }
    DateTime::parse_from_str(input, FORMAT).map_err(|_| TimestampError::Grammar)
}

/// Current time rendered in the accepted grammar, millisecond precision,
/// always with the `+00:00` offset.
#[must_use]
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_documented_grammar() {
        for ok in [
            "2026-03-01T17:04:05+00:00",
            "2026-03-01T17:04:05.120+00:00",
            "2026-03-01T17:04:05.000120-08:00",
            "2026-12-31T23:59:59+05:30",
            "2026-03-01T17:04:05+0000",
        ] {
            assert!(parse(ok).is_ok(), "{ok:?} should parse");
        }
    }

    #[test]
    fn test_rejects_zulu_offset() {
        assert_eq!(
            parse("2026-03-01T17:04:05Z"),
            Err(TimestampError::ZuluOffset)
        );
        assert_eq!(
            parse("2026-03-01T17:04:05.120z"),
            Err(TimestampError::ZuluOffset)
        );
    }

    #[test]
    fn test_rejects_ambiguous_or_partial_forms() {
        for bad in [
            "",
            "2026-03-01",
            "2026-03-01T17:04:05",
            "2026-03-01 17:04:05+00:00",
            "2026-03-01T17:04+00:00",
            "03/01/2026 17:04:05",
            "1756746245",
            "2026-03-01T17:04:05+00",
            "next tuesday",
        ] {
            assert_eq!(parse(bad), Err(TimestampError::Grammar), "{bad:?}");
        }
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        let utc = parse("2026-03-01T12:00:00+00:00").unwrap();
        let ist = parse("2026-03-01T17:30:00+05:30").unwrap();
        assert_eq!(utc, ist);
    }

    #[test]
    fn test_now_roundtrips() {
        let rendered = now();
        assert!(parse(&rendered).is_ok(), "{rendered:?} should parse");
        assert!(rendered.ends_with("+00:00"));
    }
}
