//! Capture-time handling: EXIF strings, Mapillary epoch millis and query dates,
//! localized to the IANA timezone at the image location.
mod error;
mod logic;
mod parsing;
pub use error::TimeError;
pub use logic::{localize_epoch_millis, localize_naive, localize_utc, timezone_at};
pub use parsing::{date_to_timestamp, parse_datetime_offset, parse_exif_naive};
