//! Calendar-aligned viewing windows.
//!
//! Every range is half-open, `[start, end)`, in the reference instant's
//! timezone. Weeks follow ISO-8601: they start on Monday and week 1 is the
//! week holding the year's first Thursday.

use crate::error::{AppError, Result};
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone,
    Timelike, Weekday,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Now,
    Today,
    Yesterday,
    Week,
    Month,
    Year,
}

impl Timeframe {
    /// Anything other than `Now` is served from the persisted sample log.
    pub fn is_historical(self) -> bool {
        self != Timeframe::Now
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Now => "now",
            Timeframe::Today => "today",
            Timeframe::Yesterday => "yesterday",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Year => "year",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "now" => Ok(Timeframe::Now),
            "today" => Ok(Timeframe::Today),
            "yesterday" => Ok(Timeframe::Yesterday),
            "week" => Ok(Timeframe::Week),
            "month" => Ok(Timeframe::Month),
            "year" => Ok(Timeframe::Year),
            other => Err(AppError::Selection(format!("unknown timeframe: {other}"))),
        }
    }
}

/// An explicit picker value: `2024-W10`, `2024-03` or `2024`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Year(i32),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Week { year, week } => write!(f, "{year:04}-W{week:02}"),
            Selection::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            Selection::Year(year) => write!(f, "{year:04}"),
        }
    }
}

impl FromStr for Selection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || AppError::Selection(format!("invalid selection: {s:?}"));
        let parse_year = |y: &str| {
            if y.len() == 4 {
                y.parse::<i32>().map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        };

        match s.split_once('-') {
            None => Ok(Selection::Year(parse_year(s)?)),
            Some((year, rest)) => {
                let year = parse_year(year)?;
                if let Some(week) = rest.strip_prefix('W').or_else(|| rest.strip_prefix('w')) {
                    let week: u32 = week.parse().map_err(|_| invalid())?;
                    if !(1..=53).contains(&week) {
                        return Err(invalid());
                    }
                    Ok(Selection::Week { year, week })
                } else {
                    let month: u32 = rest.parse().map_err(|_| invalid())?;
                    if !(1..=12).contains(&month) {
                        return Err(invalid());
                    }
                    Ok(Selection::Month { year, month })
                }
            }
        }
    }
}

impl Serialize for Selection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Selection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisUnit {
    Minute,
    Hour,
    Day,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub timeframe: Timeframe,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub axis_unit: AxisUnit,
    pub axis_step: u32,
    /// The picker value in effect, including the default chosen when none was given.
    pub selection: Option<Selection>,
    /// True when `selection` was filled in from the reference instant.
    pub selection_defaulted: bool,
}

impl ResolvedRange {
    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms() && ts_ms < self.end_ms()
    }
}

/// Resolve `timeframe` against `reference` (and an optional explicit picker value).
pub fn resolve_range<Tz: TimeZone>(
    timeframe: Timeframe,
    reference: &DateTime<Tz>,
    selection: Option<Selection>,
) -> Result<ResolvedRange> {
    let tz = reference.timezone();
    let today = reference.date_naive();

    let (start, end, axis_unit, axis_step, resolved, defaulted) = match timeframe {
        Timeframe::Now => (
            start_of_hour(reference),
            reference.clone(),
            AxisUnit::Minute,
            1,
            None,
            false,
        ),
        Timeframe::Today => (
            local_midnight(&tz, today)?,
            local_midnight(&tz, next_day(today)?)?,
            AxisUnit::Hour,
            2,
            None,
            false,
        ),
        Timeframe::Yesterday => (
            local_midnight(&tz, previous_day(today)?)?,
            local_midnight(&tz, today)?,
            AxisUnit::Hour,
            2,
            None,
            false,
        ),
        Timeframe::Week => {
            let (sel, defaulted) = match selection {
                Some(sel @ Selection::Week { .. }) => (sel, false),
                None => (current_week(today), true),
                Some(other) => return Err(mismatched(timeframe, other)),
            };
            let Selection::Week { year, week } = sel else {
                return Err(mismatched(timeframe, sel));
            };
            let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).ok_or_else(|| {
                AppError::Selection(format!("{sel} is not a valid ISO week"))
            })?;
            let next_monday = monday
                .checked_add_days(Days::new(7))
                .ok_or_else(|| out_of_range(sel))?;
            (
                local_midnight(&tz, monday)?,
                local_midnight(&tz, next_monday)?,
                AxisUnit::Day,
                1,
                Some(sel),
                defaulted,
            )
        }
        Timeframe::Month => {
            let (sel, defaulted) = match selection {
                Some(sel @ Selection::Month { .. }) => (sel, false),
                None => (
                    Selection::Month {
                        year: today.year(),
                        month: today.month(),
                    },
                    true,
                ),
                Some(other) => return Err(mismatched(timeframe, other)),
            };
            let Selection::Month { year, month } = sel else {
                return Err(mismatched(timeframe, sel));
            };
            let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| out_of_range(sel))?;
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            let next_first =
                NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(|| out_of_range(sel))?;
            (
                local_midnight(&tz, first)?,
                local_midnight(&tz, next_first)?,
                AxisUnit::Day,
                1,
                Some(sel),
                defaulted,
            )
        }
        Timeframe::Year => {
            let (year, defaulted) = match selection {
                Some(Selection::Year(year)) => (year, false),
                None => (today.year(), true),
                Some(other) => return Err(mismatched(timeframe, other)),
            };
            let sel = Selection::Year(year);
            let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| out_of_range(sel))?;
            let next_first =
                NaiveDate::from_ymd_opt(year + 1, 1, 1).ok_or_else(|| out_of_range(sel))?;
            (
                local_midnight(&tz, first)?,
                local_midnight(&tz, next_first)?,
                AxisUnit::Month,
                1,
                Some(sel),
                defaulted,
            )
        }
    };

    Ok(ResolvedRange {
        timeframe,
        start: start.fixed_offset(),
        end: end.fixed_offset(),
        axis_unit,
        axis_step,
        selection: resolved,
        selection_defaulted: defaulted,
    })
}

/// The ISO week containing `date`; early January may belong to the previous year.
pub fn current_week(date: NaiveDate) -> Selection {
    let iso = date.iso_week();
    Selection::Week {
        year: iso.year(),
        week: iso.week(),
    }
}

/// Top of the local wall-clock hour containing `now`.
pub fn start_of_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let local = now.naive_local();
    let into_hour = Duration::seconds(i64::from(local.minute() * 60 + local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    now.clone() - into_hour
}

/// Local 00:00 of `date`. When midnight falls in a DST gap, the first valid
/// instant after it is used.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Tz>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::Selection(format!("no midnight on {date}")))?;
    localize(tz, midnight)
}

fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
        .ok_or_else(|| AppError::Selection(format!("{naive} does not exist in local time")))
}

fn next_day(date: NaiveDate) -> Result<NaiveDate> {
    date.succ_opt()
        .ok_or_else(|| AppError::Selection(format!("no day after {date}")))
}

fn previous_day(date: NaiveDate) -> Result<NaiveDate> {
    date.pred_opt()
        .ok_or_else(|| AppError::Selection(format!("no day before {date}")))
}

fn mismatched(timeframe: Timeframe, selection: Selection) -> AppError {
    AppError::Selection(format!(
        "selection {selection} does not apply to the {timeframe} timeframe"
    ))
}

fn out_of_range(selection: Selection) -> AppError {
    AppError::Selection(format!("selection {selection} is out of range"))
}
