//! Clock/timezone adapter between stored absolute instants and civil time.
//!
//! Schedules store a wall-clock time plus an IANA zone id; everything else in
//! the system works in UTC instants. This module owns the two conversions and
//! the DST edge rules:
//! - spring-forward gap: resolve to the earliest valid instant at or after
//!   the requested civil time (shift forward past the gap)
//! - fall-back overlap: resolve to the first occurrence
//!
//! The zone id is always an explicit input. The adapter never queries the
//! platform for the current zone, which keeps it pure and testable.

use crate::{Error, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Longest DST gap we are prepared to step across. Real-world gaps are at
/// most 1 hour (historically up to 2); anything beyond this is a fault.
const MAX_GAP_MINUTES: i64 = 180;

/// A resolved civil-to-instant conversion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedInstant {
    pub instant: DateTime<Utc>,
    /// True when the requested civil time fell in a DST gap and was shifted
    /// forward to the earliest valid instant
    pub shifted: bool,
}

/// Parse an IANA zone id string.
///
/// Unknown ids fail with `InvalidTimezone`. There is deliberately no UTC
/// fallback: a silently wrong zone could place a medication reminder hours
/// off the intended time.
pub fn parse_zone(zone_id: &str) -> Result<Tz> {
    zone_id
        .parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(zone_id.to_string()))
}

/// Convert an absolute instant to civil time in the given zone
pub fn to_local(instant: DateTime<Utc>, zone: Tz) -> DateTime<Tz> {
    instant.with_timezone(&zone)
}

/// Convert a civil date + time in the given zone to an absolute instant.
///
/// Ambiguous times (fall-back overlap) resolve to the first occurrence.
/// Nonexistent times (spring-forward gap) resolve to the earliest valid
/// instant at or after the requested time, with `shifted = true`.
pub fn to_instant(date: NaiveDate, time: NaiveTime, zone: Tz) -> Result<ResolvedInstant> {
    let naive = date.and_time(time);

    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(ResolvedInstant {
            instant: dt.with_timezone(&Utc),
            shifted: false,
        }),
        LocalResult::Ambiguous(first, _second) => {
            tracing::debug!("Ambiguous local time {} in {}, taking first occurrence", naive, zone);
            Ok(ResolvedInstant {
                instant: first.with_timezone(&Utc),
                shifted: false,
            })
        }
        LocalResult::None => {
            // Step forward one minute at a time until we exit the gap.
            let mut candidate = naive;
            for _ in 0..MAX_GAP_MINUTES {
                candidate += Duration::minutes(1);
                match zone.from_local_datetime(&candidate) {
                    LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                        tracing::debug!(
                            "Local time {} does not exist in {}, shifted to {}",
                            naive,
                            zone,
                            candidate
                        );
                        return Ok(ResolvedInstant {
                            instant: dt.with_timezone(&Utc),
                            shifted: true,
                        });
                    }
                    LocalResult::None => continue,
                }
            }
            // A gap wider than MAX_GAP_MINUTES means bad zone data, not a
            // recoverable input condition.
            Err(Error::Other(format!(
                "unresolvable DST gap at {} in zone {}",
                naive, zone
            )))
        }
    }
}
