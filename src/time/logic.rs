//! Timezone lookup and localization of capture times.

use super::error::TimeError;
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use tzf_rs::DefaultFinder;

// --- Global Timezone Finder ---
static FINDER: std::sync::LazyLock<DefaultFinder> = std::sync::LazyLock::new(DefaultFinder::new);

/// IANA timezone at a WGS84 location, `None` when the lookup has no answer.
pub fn timezone_at(lat: f64, lon: f64) -> Option<Tz> {
    let name = FINDER.get_tz_name(lon, lat);
    if name.is_empty() {
        return None;
    }
    Tz::from_str(name).ok()
}

/// Attaches the local timezone of `(lat, lon)` to a naive camera timestamp.
///
/// Ambiguous local times (DST fold) resolve to the earlier instant. When no
/// zone is found, or the local time does not exist, the timestamp is read as UTC.
pub fn localize_naive(naive: NaiveDateTime, lat: f64, lon: f64) -> DateTime<FixedOffset> {
    let utc_fallback = || Utc.from_utc_datetime(&naive).fixed_offset();
    let Some(tz) = timezone_at(lat, lon) else {
        return utc_fallback();
    };
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(zoned) | LocalResult::Ambiguous(zoned, _) => {
            zoned.with_timezone(&zoned.offset().fix())
        }
        LocalResult::None => {
            tracing::debug!(%naive, tz = tz.name(), "local time does not exist, reading as UTC");
            utc_fallback()
        }
    }
}

/// Converts epoch milliseconds into local time at `(lat, lon)`, or UTC when
/// the location has no timezone.
pub fn localize_epoch_millis(millis: i64, lat: f64, lon: f64) -> Result<DateTime<FixedOffset>, TimeError> {
    let utc = DateTime::<Utc>::from_timestamp_millis(millis).ok_or(TimeError::EpochOutOfRange(millis))?;
    Ok(localize_utc(utc, lat, lon))
}

/// Expresses a UTC instant in the local offset at `(lat, lon)`.
pub fn localize_utc(utc: DateTime<Utc>, lat: f64, lon: f64) -> DateTime<FixedOffset> {
    match timezone_at(lat, lon) {
        Some(tz) => {
            let zoned = utc.with_timezone(&tz);
            zoned.with_timezone(&zoned.offset().fix())
        }
        None => utc.fixed_offset(),
    }
}
