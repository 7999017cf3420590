//! date, timestamp and timestamptz.
//!
//! Dates are days and timestamps microseconds relative to 2000-01-01, the
//! PostgreSQL epoch. The session time zone is always UTC, so timestamptz
//! values print with a `+00` offset and input offsets are folded into UTC.
//! `infinity` and `-infinity` map to the extreme representable values.

use crate::nodes::datum::Datum;
use crate::utils::elog::{PgError, PgResult, SqlState, elog};
use crate::utils::fmgr::FunctionCallInfo;

pub const USECS_PER_SEC: i64 = 1_000_000;
pub const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;
/// Days from 1970-01-01 to 2000-01-01.
pub const UNIX_EPOCH_TO_PG_DAYS: i64 = 10_957;

pub const DATE_NOBEGIN: i32 = i32::MIN;
pub const DATE_NOEND: i32 = i32::MAX;
pub const TIMESTAMP_NOBEGIN: i64 = i64::MIN;
pub const TIMESTAMP_NOEND: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateValue {
    /// Astronomical year: 0 is 1 BC.
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
pub fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let year = i64::from(year) - i64::from(month <= 2);
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let month = i64::from(month);
    let doy = (153 * (month + if month > 2 { -3 } else { 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

pub fn civil_from_days(days: i64) -> DateValue {
    let days = days + 719_468;
    let era = if days >= 0 { days } else { days - 146_096 } / 146_097;
    let doe = days - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    DateValue {
        year: year as i32,
        month: month as u32,
        day: day as u32,
    }
}

/// Days since 2000-01-01.
pub fn date_to_pg_days(date: DateValue) -> i64 {
    days_from_civil(date.year, date.month, date.day) - UNIX_EPOCH_TO_PG_DAYS
}

pub fn pg_days_to_date(days: i64) -> DateValue {
    civil_from_days(days + UNIX_EPOCH_TO_PG_DAYS)
}

fn bad_format(typname: &str, input: &str) -> PgError {
    PgError::new(
        SqlState::InvalidDatetimeFormat,
        format!("invalid input syntax for type {typname}: \"{input}\""),
    )
}

fn field_overflow(input: &str) -> PgError {
    PgError::new(
        SqlState::DatetimeFieldOverflow,
        format!("date/time field value out of range: \"{input}\""),
    )
}

fn out_of_range(typname: &str) -> PgError {
    PgError::new(SqlState::DatetimeFieldOverflow, format!("{typname} out of range"))
}

/// Strip a trailing ` BC`/` AD` era marker.
fn split_era(text: &str) -> (&str, bool) {
    let upper = text.to_ascii_uppercase();
    if upper.ends_with(" BC") {
        (text[..text.len() - 3].trim_end(), true)
    } else if upper.ends_with(" AD") {
        (text[..text.len() - 3].trim_end(), false)
    } else {
        (text, false)
    }
}

fn parse_date_part(part: &str, typname: &str, input: &str, bc: bool) -> PgResult<DateValue> {
    let fields: Vec<&str> = if part.contains('-') {
        part.splitn(3, '-').collect()
    } else if part.len() == 8 && part.bytes().all(|b| b.is_ascii_digit()) {
        vec![&part[..4], &part[4..6], &part[6..]]
    } else {
        return Err(bad_format(typname, input));
    };
    let [year, month, day] = fields.as_slice() else {
        return Err(bad_format(typname, input));
    };
    let parse = |field: &str| -> PgResult<i64> {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad_format(typname, input));
        }
        field.parse().map_err(|_| bad_format(typname, input))
    };
    let (year, month, day) = (parse(year)?, parse(month)?, parse(day)?);
    if bc && year == 0 {
        return Err(field_overflow(input));
    }
    let year = if bc { 1 - year } else { year };
    let year = i32::try_from(year).map_err(|_| field_overflow(input))?;
    let (month, day) = (month as u32, day as u32);
    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return Err(field_overflow(input));
    }
    Ok(DateValue { year, month, day })
}

/// Parse `HH:MM[:SS[.ffffff]]` into microseconds since midnight.
fn parse_time_part(part: &str, typname: &str, input: &str) -> PgResult<i64> {
    let mut fields = part.split(':');
    let mut next = |required: bool| -> PgResult<Option<&str>> {
        match fields.next() {
            Some(field) if !field.is_empty() => Ok(Some(field)),
            None if !required => Ok(None),
            _ => Err(bad_format(typname, input)),
        }
    };
    let hour: i64 = next(true)?
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| bad_format(typname, input))?;
    let minute: i64 = next(true)?
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| bad_format(typname, input))?;
    let usecs = match next(false)? {
        None => 0,
        Some(seconds) => {
            let (whole, frac) = seconds.split_once('.').unwrap_or((seconds, ""));
            let whole: i64 = whole.parse().map_err(|_| bad_format(typname, input))?;
            if !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad_format(typname, input));
            }
            // Round to microseconds.
            let mut digits: String = frac.chars().take(7).collect();
            while digits.len() < 7 {
                digits.push('0');
            }
            let tenths: i64 = digits.parse().unwrap_or(0);
            whole * USECS_PER_SEC + (tenths + 5) / 10
        }
    };
    if !(0..=24).contains(&hour)
        || !(0..60).contains(&minute)
        || usecs > 60 * USECS_PER_SEC
        || (hour == 24 && (minute > 0 || usecs > 0))
    {
        return Err(field_overflow(input));
    }
    Ok((hour * 3600 + minute * 60) * USECS_PER_SEC + usecs)
}

/// Split a trailing UTC offset off a time string; returns seconds east of UTC.
fn split_zone(time: &str, typname: &str, input: &str) -> PgResult<(String, i64)> {
    let trimmed = time.trim();
    let upper = trimmed.to_ascii_uppercase();
    for zone in ["UTC", "GMT", "Z"] {
        if let Some(rest) = upper.strip_suffix(zone) {
            return Ok((trimmed[..rest.len()].trim_end().to_string(), 0));
        }
    }
    if let Some(pos) = trimmed.rfind(['+', '-']) {
        let (clock, zone) = trimmed.split_at(pos);
        let sign = if zone.starts_with('-') { -1 } else { 1 };
        let zone = &zone[1..];
        let (hours, minutes) = match zone.split_once(':') {
            Some((h, m)) => (h, m),
            None if zone.len() == 4 => zone.split_at(2),
            None => (zone, "0"),
        };
        let hours: i64 = hours.parse().map_err(|_| bad_format(typname, input))?;
        let minutes: i64 = minutes.parse().map_err(|_| bad_format(typname, input))?;
        if hours > 15 || minutes >= 60 {
            return Err(field_overflow(input));
        }
        return Ok((clock.trim_end().to_string(), sign * (hours * 3600 + minutes * 60)));
    }
    Ok((trimmed.to_string(), 0))
}

pub fn date_in(input: &str) -> PgResult<i32> {
    let text = input.trim();
    match text.to_ascii_lowercase().as_str() {
        "infinity" | "+infinity" => return Ok(DATE_NOEND),
        "-infinity" => return Ok(DATE_NOBEGIN),
        "epoch" => return Ok(-(UNIX_EPOCH_TO_PG_DAYS as i32)),
        _ => {}
    }
    let (body, bc) = split_era(text);
    // A time part is allowed and ignored.
    let date_part = body.split([' ', 'T']).next().unwrap_or(body);
    let date = parse_date_part(date_part, "date", input, bc)?;
    i32::try_from(date_to_pg_days(date)).map_err(|_| out_of_range("date"))
}

fn timestamp_in_internal(input: &str, typname: &str, with_zone: bool) -> PgResult<i64> {
    let text = input.trim();
    match text.to_ascii_lowercase().as_str() {
        "infinity" | "+infinity" => return Ok(TIMESTAMP_NOEND),
        "-infinity" => return Ok(TIMESTAMP_NOBEGIN),
        "epoch" => return Ok(-UNIX_EPOCH_TO_PG_DAYS * USECS_PER_DAY),
        _ => {}
    }
    let (body, bc) = split_era(text);
    let (date_part, time_part) = match body.split_once(['T', ' ']) {
        Some((date, time)) => (date, Some(time.trim())),
        None => (body, None),
    };
    let date = parse_date_part(date_part, typname, input, bc)?;
    let (usecs, offset) = match time_part {
        None | Some("") => (0, 0),
        Some(time) => {
            let (clock, offset) = split_zone(time, typname, input)?;
            (parse_time_part(&clock, typname, input)?, offset)
        }
    };
    let offset = if with_zone { offset } else { 0 };
    date_to_pg_days(date)
        .checked_mul(USECS_PER_DAY)
        .and_then(|t| t.checked_add(usecs))
        .and_then(|t| t.checked_sub(offset * USECS_PER_SEC))
        .ok_or_else(|| out_of_range(typname))
}

pub fn timestamp_in(input: &str) -> PgResult<i64> {
    timestamp_in_internal(input, "timestamp", false)
}

pub fn timestamptz_in(input: &str) -> PgResult<i64> {
    timestamp_in_internal(input, "timestamp with time zone", true)
}

fn format_year(year: i32) -> (String, bool) {
    if year <= 0 {
        (format!("{:04}", 1 - year), true)
    } else {
        (format!("{year:04}"), false)
    }
}

pub fn date_out(days: i32) -> String {
    match days {
        DATE_NOEND => return "infinity".to_string(),
        DATE_NOBEGIN => return "-infinity".to_string(),
        _ => {}
    }
    let date = pg_days_to_date(i64::from(days));
    let (year, bc) = format_year(date.year);
    let mut out = format!("{year}-{:02}-{:02}", date.month, date.day);
    if bc {
        out.push_str(" BC");
    }
    out
}

fn format_timestamp(usecs: i64, zone_suffix: &str) -> String {
    match usecs {
        TIMESTAMP_NOEND => return "infinity".to_string(),
        TIMESTAMP_NOBEGIN => return "-infinity".to_string(),
        _ => {}
    }
    let days = usecs.div_euclid(USECS_PER_DAY);
    let time = usecs.rem_euclid(USECS_PER_DAY);
    let date = pg_days_to_date(days);
    let (year, bc) = format_year(date.year);
    let seconds = time / USECS_PER_SEC;
    let fraction = time % USECS_PER_SEC;
    let mut out = format!(
        "{year}-{:02}-{:02} {:02}:{:02}:{:02}",
        date.month,
        date.day,
        seconds / 3600,
        seconds / 60 % 60,
        seconds % 60
    );
    if fraction != 0 {
        let digits = format!("{fraction:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out.push_str(zone_suffix);
    if bc {
        out.push_str(" BC");
    }
    out
}

pub fn timestamp_out(usecs: i64) -> String {
    format_timestamp(usecs, "")
}

pub fn timestamptz_out(usecs: i64) -> String {
    format_timestamp(usecs, "+00")
}

pub fn date_to_timestamp(days: i32) -> PgResult<i64> {
    match days {
        DATE_NOEND => Ok(TIMESTAMP_NOEND),
        DATE_NOBEGIN => Ok(TIMESTAMP_NOBEGIN),
        _ => i64::from(days)
            .checked_mul(USECS_PER_DAY)
            .ok_or_else(|| out_of_range("date")),
    }
}

pub fn timestamp_to_date(usecs: i64) -> PgResult<i32> {
    match usecs {
        TIMESTAMP_NOEND => Ok(DATE_NOEND),
        TIMESTAMP_NOBEGIN => Ok(DATE_NOBEGIN),
        _ => i32::try_from(usecs.div_euclid(USECS_PER_DAY)).map_err(|_| out_of_range("date")),
    }
}

fn date_arg(value: &Datum) -> PgResult<i32> {
    match value {
        Datum::Date(days) => Ok(*days),
        other => Err(elog(format!("expected a date argument, got {other:?}"))),
    }
}

fn days_arg(value: &Datum) -> PgResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| elog(format!("expected an integer argument, got {value:?}")))
}

fn add_days(date: i32, days: i64) -> PgResult<Datum> {
    if date == DATE_NOEND || date == DATE_NOBEGIN {
        return Ok(Datum::Date(date));
    }
    i64::from(date)
        .checked_add(days)
        .and_then(|d| i32::try_from(d).ok())
        .filter(|d| *d != DATE_NOEND && *d != DATE_NOBEGIN)
        .map(Datum::Date)
        .ok_or_else(|| out_of_range("date"))
}

/// `date + integer`
pub fn date_pli(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    add_days(date_arg(fcinfo.arg(0))?, days_arg(fcinfo.arg(1))?)
}

/// `integer + date`
pub fn integer_pl_date(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    add_days(date_arg(fcinfo.arg(1))?, days_arg(fcinfo.arg(0))?)
}

/// `date - integer`
pub fn date_mii(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    add_days(date_arg(fcinfo.arg(0))?, -days_arg(fcinfo.arg(1))?)
}

/// `date - date`, in days.
pub fn date_mi(fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    let (a, b) = (date_arg(fcinfo.arg(0))?, date_arg(fcinfo.arg(1))?);
    if [a, b].iter().any(|d| *d == DATE_NOEND || *d == DATE_NOBEGIN) {
        return Err(PgError::new(
            SqlState::DatetimeFieldOverflow,
            "cannot subtract infinite dates",
        ));
    }
    Ok(Datum::Int4(a - b))
}

/// Current time as microseconds since the PostgreSQL epoch.
pub fn current_timestamp_usecs() -> i64 {
    let since_unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    since_unix - UNIX_EPOCH_TO_PG_DAYS * USECS_PER_DAY
}

/// `now()`: the start time of the current transaction.
pub fn now(_fcinfo: &FunctionCallInfo<'_>) -> PgResult<Datum> {
    Ok(Datum::TimestampTz(crate::access::xact::transaction_timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_round_trip_through_text() {
        let days = date_in("2000-01-01").unwrap();
        assert_eq!(days, 0);
        assert_eq!(date_out(date_in("2024-02-29").unwrap()), "2024-02-29");
        assert_eq!(date_out(date_in("0001-01-01 BC").unwrap()), "0001-01-01 BC");
        assert_eq!(date_out(date_in("19991231").unwrap()), "1999-12-31");
        assert_eq!(date_out(date_in("infinity").unwrap()), "infinity");
    }

    #[test]
    fn invalid_dates_are_rejected() {
        let err = date_in("2023-02-29").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::DatetimeFieldOverflow);
        let err = date_in("not a date").unwrap_err();
        assert_eq!(err.sqlstate, SqlState::InvalidDatetimeFormat);
        assert_eq!(err.message, "invalid input syntax for type date: \"not a date\"");
    }

    #[test]
    fn timestamps_trim_fractional_zeros() {
        let ts = timestamp_in("2024-01-02 03:04:05.500").unwrap();
        assert_eq!(timestamp_out(ts), "2024-01-02 03:04:05.5");
        let ts = timestamp_in("2024-01-02T03:04:05").unwrap();
        assert_eq!(timestamp_out(ts), "2024-01-02 03:04:05");
    }

    #[test]
    fn timestamptz_folds_offsets_into_utc() {
        let ts = timestamptz_in("2024-01-02 03:00:00+02").unwrap();
        assert_eq!(timestamptz_out(ts), "2024-01-02 01:00:00+00");
        let ts = timestamptz_in("2024-01-02 03:00:00Z").unwrap();
        assert_eq!(timestamptz_out(ts), "2024-01-02 03:00:00+00");
    }

    #[test]
    fn date_casts_floor_toward_negative_infinity() {
        let ts = timestamp_in("1999-12-31 23:00:00").unwrap();
        assert_eq!(timestamp_to_date(ts).unwrap(), -1);
        assert_eq!(date_to_timestamp(1).unwrap(), USECS_PER_DAY);
    }
}
