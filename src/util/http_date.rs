//! IMF-fixdate (RFC 7231) formatting and parsing for `Last-Modified` and
//! `If-Modified-Since` headers. Always rendered in UTC with a literal `GMT`
//! zone, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.

use std::time::SystemTime;

use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::BorrowedFormatItem,
    macros::format_description,
};

const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format an instant as an IMF-fixdate string in UTC.
pub fn format(instant: SystemTime) -> Option<String> {
    OffsetDateTime::from(instant)
        .to_offset(time::UtcOffset::UTC)
        .format(&IMF_FIXDATE)
        .ok()
}

/// Parse an IMF-fixdate string, returning `None` when malformed.
pub fn parse(value: &str) -> Option<SystemTime> {
    PrimitiveDateTime::parse(value.trim(), &IMF_FIXDATE)
        .ok()
        .map(|parsed| parsed.assume_utc().into())
}
