// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Parsing of the timestamps accepted at the HTTP boundary (`?start=...&end=...`).
//!
//! Accepted forms: seconds-since-epoch, an ISO-8601 instant
//! (`YYYY-MM-DDTHH:MM:SS`, with optional fractional seconds and an optional
//! `Z` or `±HH:MM` offset), or a bare date `YYYY-MM-DD`. A bare date or a
//! date with no time-of-day expands to the start or end of that day
//! depending on which query parameter it came from.

use crate::{bail, err, Error};
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::combinator::{map, map_res, opt};
use nom::sequence::{preceded, tuple};
use std::str::FromStr;
use std::sync::OnceLock;

type IResult<'a, I, O> = nom::IResult<I, O, nom::error::VerboseError<&'a str>>;

/// The zone used to resolve bare dates/times and to render local timestamps.
///
/// Assigned once from `jiff::tz::TimeZone::system()` at startup; tests set
/// it to a known political zone instead. It is fixed for the life of the
/// process.
static GLOBAL_ZONE: OnceLock<TimeZone> = OnceLock::new();

pub fn init_zone<F: FnOnce() -> TimeZone>(f: F) {
    GLOBAL_ZONE.get_or_init(f);
}

pub fn global_zone() -> TimeZone {
    GLOBAL_ZONE
        .get()
        .expect("global zone should be initialized")
        .clone()
}

/// Which end of a `[start, end]` query range a timestamp was parsed from,
/// controlling how a bare date or time-less instant expands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Boundary {
    Start,
    End,
}

fn fixed_len_num<'a, T: FromStr>(len: usize) -> impl FnMut(&'a str) -> IResult<'a, &'a str, T> {
    map_res(
        take_while_m_n(len, len, |c: char| c.is_ascii_digit()),
        |input: &str| input.parse(),
    )
}

/// Parses `YYYY-mm-dd` into pieces.
fn parse_datepart(input: &str) -> IResult<&str, (i16, i8, i8)> {
    tuple((
        fixed_len_num(4),
        preceded(tag("-"), fixed_len_num(2)),
        preceded(tag("-"), fixed_len_num(2)),
    ))(input)
}

/// Parses `HH:MM[:SS[.fraction]]` into `(hour, minute, second)`, discarding
/// any fractional seconds (the catalog stores whole-second timestamps).
fn parse_timepart(input: &str) -> IResult<&str, (i8, i8, i8)> {
    let (input, (hr, _, min)) = tuple((fixed_len_num(2), tag(":"), fixed_len_num(2)))(input)?;
    let (input, sec) = opt(preceded(tag(":"), fixed_len_num(2)))(input)?;
    let (input, _frac) = opt(preceded(
        tag("."),
        nom::bytes::complete::take_while1(|c: char| c.is_ascii_digit()),
    ))(input)?;
    Ok((input, (hr, min, sec.unwrap_or(0))))
}

/// Parses `Z` (UTC) or `{+,-}HH:MM` into a time zone offset in seconds.
fn parse_zone(input: &str) -> IResult<&str, i32> {
    alt((
        nom::combinator::value(0, tag("Z")),
        map(
            tuple((
                nom::character::complete::one_of(&b"+-"[..]),
                fixed_len_num::<i32>(2),
                tag(":"),
                fixed_len_num::<i32>(2),
            )),
            |(sign, hr, _, min)| {
                let off = hr * 3600 + min * 60;
                if sign == '-' {
                    -off
                } else {
                    off
                }
            },
        ),
    ))(input)
}

/// Replaces percent-encoded colons (`%3A`, case-insensitive) with `:`.
/// Query strings forwarded verbatim from a URL-encoded form use this
/// encoding for the colons in a time-of-day.
fn decode_percent_colons(input: &str) -> std::borrow::Cow<'_, str> {
    if !input.contains('%') {
        return std::borrow::Cow::Borrowed(input);
    }
    std::borrow::Cow::Owned(
        input
            .replace("%3A", ":")
            .replace("%3a", ":"),
    )
}

/// Parses a timestamp from an HTTP query parameter.
pub fn parse_boundary(input: &str, boundary: Boundary) -> Result<Timestamp, Error> {
    let input = decode_percent_colons(input);

    // First try seconds-since-epoch.
    if let Ok(secs) = i64::from_str(&input) {
        return Timestamp::from_second(secs).map_err(|e| err!(InvalidArgument; source: e));
    }

    let (remaining, ((y, mo, d), opt_time, opt_zone)) = tuple((
        parse_datepart,
        opt(preceded(tag("T"), parse_timepart)),
        opt(parse_zone),
    ))(&input)
    .map_err(|e| match e {
        nom::Err::Incomplete(_) => err!(InvalidArgument, "incomplete timestamp {input:?}"),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            err!(InvalidArgument, "invalid timestamp {:?}: {}", input, nom::error::convert_error(input.as_ref(), e))
        }
    })?;
    if !remaining.is_empty() {
        bail!(
            InvalidArgument,
            "unexpected suffix {remaining:?} following timestamp {input:?}"
        );
    }
    let (hh, mm, ss) = opt_time.unwrap_or(match boundary {
        Boundary::Start => (0, 0, 0),
        Boundary::End => (23, 59, 59),
    });
    let dt = DateTime::new(y, mo, d, hh, mm, ss, 0).map_err(|e| err!(InvalidArgument; source: e))?;

    // A timestamp with no explicit offset is ambiguous around DST
    // transitions; `compatible()` resolves it without us ever guessing
    // whether DST was in effect, matching the "mark DST as unknown" policy.
    let tz = match opt_zone {
        Some(off) => TimeZone::fixed(
            jiff::tz::Offset::from_seconds(off).map_err(|e| err!(InvalidArgument; source: e))?,
        ),
        None => global_zone(),
    };
    let zoned = tz
        .into_ambiguous_zoned(dt)
        .compatible()
        .map_err(|e| err!(InvalidArgument; source: e))?;
    Ok(zoned.timestamp())
}

/// Formats a UTC instant in the global zone as a local-time ISO-8601 string,
/// for the `local_start_timestamp`/`local_end_timestamp` response fields.
pub fn format_local(ts: Timestamp) -> String {
    ts.to_zoned(global_zone()).strftime("%FT%T%:z").to_string()
}

pub mod testutil {
    pub fn init_zone() {
        super::init_zone(|| {
            jiff::tz::TimeZone::get("America/Los_Angeles")
                .expect("America/Los_Angeles should exist")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epoch_seconds() {
        testutil::init_zone();
        let ts = parse_boundary("1136239445", Boundary::Start).unwrap();
        assert_eq!(ts.as_second(), 1136239445);
    }

    #[test]
    fn parses_explicit_offset() {
        testutil::init_zone();
        let ts = parse_boundary("2006-01-02T15:04:05-07:00", Boundary::Start).unwrap();
        assert_eq!(ts.as_second(), 1136239445);
    }

    #[test]
    fn parses_utc_zone() {
        testutil::init_zone();
        let ts = parse_boundary("2006-01-02T15:04:05Z", Boundary::Start).unwrap();
        assert_eq!(ts.as_second(), 1136214245);
    }

    #[test]
    fn bare_date_expands_per_boundary() {
        testutil::init_zone();
        let start = parse_boundary("2006-01-02", Boundary::Start).unwrap();
        let end = parse_boundary("2006-01-02", Boundary::End).unwrap();
        assert!(end.as_second() > start.as_second());
        assert_eq!(end.as_second() - start.as_second(), 23 * 3600 + 59 * 60 + 59);
    }

    #[test]
    fn decodes_percent_encoded_colons() {
        testutil::init_zone();
        let a = parse_boundary("2006-01-02T15:04:05Z", Boundary::Start).unwrap();
        let b = parse_boundary("2006-01-02T15%3A04%3A05Z", Boundary::Start).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_garbage_suffix() {
        testutil::init_zone();
        parse_boundary("2006-01-02T15:04:05Zgarbage", Boundary::Start).unwrap_err();
    }
}
