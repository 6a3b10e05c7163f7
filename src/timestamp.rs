use std::fmt;

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Largest timezone byte accepted: 100 quarter hours past UTC-12, i.e. UTC+13.
const MAX_TIMEZONE_VALUE: u8 = 100;

/// Timezone byte value that encodes UTC (48 quarter hours past UTC-12).
pub const UTC_TIMEZONE_VALUE: u8 = 48;

/// The recording time of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    /// Date and time with the timezone recorded alongside them.
    Zoned(OffsetDateTime),
    /// Date and time whose recorded timezone was unusable.
    Local(PrimitiveDateTime),
}
impl Timestamp {
    pub fn local(&self) -> PrimitiveDateTime {
        match self {
            Timestamp::Zoned(dt) => PrimitiveDateTime::new(dt.date(), dt.time()),
            Timestamp::Local(dt) => *dt,
        }
    }

    pub fn offset(&self) -> Option<UtcOffset> {
        match self {
            Timestamp::Zoned(dt) => Some(dt.offset()),
            Timestamp::Local(_) => None,
        }
    }
}
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Zoned(dt) => write!(f, "{}", dt),
            Timestamp::Local(dt) => write!(f, "{}", dt),
        }
    }
}

/// Outcome of decoding a recorded timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTimestamp {
    /// Every field is zero: nothing was recorded.
    Unset,
    Valid(Timestamp),
    /// Date and time are valid but the timezone byte is out of range, so it was dropped.
    WithoutOffset {
        local: PrimitiveDateTime,
        timezone: u8,
    },
    /// Date or time fields are out of range.
    Invalid(String),
}
impl DecodedTimestamp {
    /// The best-effort timestamp, if any survived decoding.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            DecodedTimestamp::Valid(ts) => Some(*ts),
            DecodedTimestamp::WithoutOffset { local, .. } => Some(Timestamp::Local(*local)),
            DecodedTimestamp::Unset | DecodedTimestamp::Invalid(_) => None,
        }
    }

    /// A description of what had to be degraded, for non-fatal diagnostics.
    pub fn warning(&self) -> Option<String> {
        match self {
            DecodedTimestamp::WithoutOffset { timezone, .. } => Some(format!(
                "timezone value {} is out of range, timestamp kept without offset",
                timezone
            )),
            DecodedTimestamp::Invalid(reason) => Some(reason.clone()),
            DecodedTimestamp::Unset | DecodedTimestamp::Valid(_) => None,
        }
    }
}

/// Converts a timezone byte counted in quarter hours from UTC-12 (`hours = value / 4 - 12`).
///
/// Only UTC-12 through UTC+13 (values 0 to 100) are valid.
pub fn offset_from_quarter_hours(value: u8) -> Option<UtcOffset> {
    if value > MAX_TIMEZONE_VALUE {
        return None;
    }
    let seconds = (i32::from(value) - i32::from(UTC_TIMEZONE_VALUE)) * 15 * 60;
    UtcOffset::from_whole_seconds(seconds).ok()
}

/// Builds a timestamp from already-split fields, falling back to a local time when only the
/// timezone is wrong.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compose(
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    centisecond: u8,
    timezone: u8,
) -> DecodedTimestamp {
    let date = Month::try_from(month)
        .ok()
        .and_then(|month| Date::from_calendar_date(year, month, day).ok());
    let Some(date) = date else {
        return DecodedTimestamp::Invalid(format!("invalid date {:04}-{:02}-{:02}", year, month, day));
    };
    let time = Time::from_hms_milli(hour, minute, second, u16::from(centisecond) * 10).ok();
    let Some(time) = time else {
        return DecodedTimestamp::Invalid(format!(
            "invalid time {:02}:{:02}:{:02}.{:02}",
            hour, minute, second, centisecond
        ));
    };
    let local = PrimitiveDateTime::new(date, time);
    match offset_from_quarter_hours(timezone) {
        Some(offset) => DecodedTimestamp::Valid(Timestamp::Zoned(local.assume_offset(offset))),
        None => DecodedTimestamp::WithoutOffset { local, timezone },
    }
}
