//! Working-time arithmetic.
//!
//! Push Port times are bare `HH:MM[:SS]` values on a service whose start
//! date is known; crossing midnight is implicit in the sequence of times.
//! [`DayProjector`] recovers full datetimes by tracking a running day
//! offset over the service start date.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::DecodeError;

const BACKWARD_JUMP_SECS: i64 = -6 * 3600;
const FORWARD_JUMP_SECS: i64 = 18 * 3600;

/// Parses "HH:MM" or "HH:MM:SS".
pub fn parse_time(raw: &str) -> Result<NaiveTime, DecodeError> {
    let normalized;
    let raw = if raw.len() == 5 {
        normalized = format!("{}:00", raw);
        &normalized
    } else {
        raw
    };
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .map_err(|_| DecodeError::BadTime(raw.to_owned()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, DecodeError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| DecodeError::BadDate(raw.to_owned()))
}

/// Signed seconds from `previous` to `current`, both read as
/// seconds-since-midnight.
fn seconds_between(current: NaiveTime, previous: NaiveTime) -> i64 {
    i64::from(current.num_seconds_from_midnight())
        - i64::from(previous.num_seconds_from_midnight())
}

/// Day offset adjustment implied by consecutive working times: a drop of
/// more than six hours means midnight was crossed forwards; a rise of more
/// than eighteen hours means a correction back across midnight.
fn offset_step(current: NaiveTime, previous: NaiveTime) -> i32 {
    let delta = seconds_between(current, previous);
    if delta < BACKWARD_JUMP_SECS {
        1
    } else if delta > FORWARD_JUMP_SECS {
        -1
    } else {
        0
    }
}

/// Projects a schedule's sequence of times onto real datetimes.
///
/// The offset state is carried across every time field of every call point
/// of one schedule, in document order; the five fields within a single
/// call point advance the reference time just like fields of different
/// call points do.
#[derive(Debug, Clone)]
pub struct DayProjector {
    ssd: NaiveDate,
    offset: i32,
    last: Option<NaiveTime>,
}

impl DayProjector {
    pub fn new(ssd: NaiveDate) -> Self {
        Self {
            ssd,
            offset: 0,
            last: None,
        }
    }

    pub fn project(&mut self, time: Option<NaiveTime>) -> Option<NaiveDateTime> {
        let time = time?;
        if let Some(last) = self.last {
            self.offset += offset_step(time, last);
        }
        self.last = Some(time);
        Some((self.ssd + Duration::days(i64::from(self.offset))).and_time(time))
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }
}

/// Anchors a reported time-of-day to the datetime of the working time it
/// refers to, using the same midnight-crossing rule.
pub fn combine_with_working(working: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let offset = offset_step(time, working.time());
    (working.date() + Duration::days(i64::from(offset))).and_time(time)
}

/// The 18-character fixed-width (wta, wtp, wtd) encoding used as the
/// secondary call point key: each block is "HHMMSS" or six spaces.
pub fn original_wt(
    wta: Option<NaiveTime>,
    wtp: Option<NaiveTime>,
    wtd: Option<NaiveTime>,
) -> String {
    let mut out = String::with_capacity(18);
    for time in [wta, wtp, wtd] {
        match time {
            Some(time) => out.push_str(&time.format("%H%M%S").to_string()),
            None => out.push_str("      "),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(raw: &str) -> NaiveTime {
        parse_time(raw).unwrap()
    }

    fn date(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    #[test]
    fn parses_short_and_long_times() {
        assert_eq!(time("10:02"), time("10:02:00"));
        assert_eq!(time("23:59:59"), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        assert!(parse_time("25:00:00").is_err());
    }

    #[test]
    fn original_wt_is_fixed_width() {
        let encoded = original_wt(Some(time("10:00:00")), None, Some(time("10:02:00")));
        assert_eq!(encoded, "100000      100200");
        assert_eq!(encoded.len(), 18);
        assert_eq!(original_wt(None, None, None), " ".repeat(18));
    }

    #[test]
    fn projects_across_midnight() {
        // wta 23:55 then wtd 00:05 the next day.
        let mut projector = DayProjector::new(date("2021-06-01"));
        let wta = projector.project(Some(time("23:55:00"))).unwrap();
        let wtd = projector.project(Some(time("00:05:00"))).unwrap();
        assert_eq!(wta.to_string(), "2021-06-01 23:55:00");
        assert_eq!(wtd.to_string(), "2021-06-02 00:05:00");
        assert_eq!(projector.offset(), 1);
    }

    #[test]
    fn corrects_backward_jumps() {
        // 00:10 followed by 23:50 reads as a correction to the previous day.
        let mut projector = DayProjector::new(date("2021-06-01"));
        projector.project(Some(time("00:10:00")));
        let second = projector.project(Some(time("23:50:00"))).unwrap();
        assert_eq!(second.to_string(), "2021-05-31 23:50:00");
        assert_eq!(projector.offset(), -1);
    }

    #[test]
    fn ordinary_increases_do_not_move_the_offset() {
        let mut projector = DayProjector::new(date("2021-06-01"));
        for raw in ["10:00:00", "10:30:00", "17:00:00", "11:05:00"] {
            projector.project(Some(time(raw)));
        }
        assert_eq!(projector.offset(), 0);
    }

    #[test]
    fn missing_times_are_skipped_without_disturbing_state() {
        let mut projector = DayProjector::new(date("2021-06-01"));
        projector.project(Some(time("23:55:00")));
        assert_eq!(projector.project(None), None);
        let next = projector.project(Some(time("00:05:00"))).unwrap();
        assert_eq!(next.to_string(), "2021-06-02 00:05:00");
    }

    #[test]
    fn projection_never_goes_back_more_than_six_hours() {
        // Consecutive projected datetimes satisfy t2 >= t1 - 6h.
        let mut projector = DayProjector::new(date("2021-06-01"));
        let mut previous: Option<NaiveDateTime> = None;
        for raw in ["22:00:00", "23:59:00", "00:01:00", "04:00:00", "03:30:00"] {
            let current = projector.project(Some(time(raw))).unwrap();
            if let Some(previous) = previous {
                assert!(current >= previous - Duration::hours(6));
            }
            previous = Some(current);
        }
    }

    #[test]
    fn combine_with_working_crosses_midnight_both_ways() {
        let working = date("2021-06-01").and_time(time("23:58:00"));
        let combined = combine_with_working(working, time("00:03:00"));
        assert_eq!(combined.to_string(), "2021-06-02 00:03:00");

        let working = date("2021-06-02").and_time(time("00:03:00"));
        let combined = combine_with_working(working, time("23:58:00"));
        assert_eq!(combined.to_string(), "2021-06-01 23:58:00");
    }
}
