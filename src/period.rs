//! Periods and period-type date math.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Supported period types, coarsest calendar shapes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    SixMonthly,
    Yearly,
}

/// A concrete time interval of one period kind.
///
/// `id` is the persisted identity, present only after the period has been
/// stored. Equality, hashing and ordering ignore it so that a transient
/// period and its persisted twin compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub kind: PeriodKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub id: Option<i64>,
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

/// Shifts a date by whole calendar years, clamping 29 February to 28.
fn shift_years(date: NaiveDate, years: i32) -> NaiveDate {
    let year = date.year() + years;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .unwrap_or_else(|| ymd(year, date.month(), date.day() - 1))
}

impl Period {
    /// The period of the given kind containing `date`.
    pub fn containing(kind: PeriodKind, date: NaiveDate) -> Self {
        let (start, end) = match kind {
            PeriodKind::Daily => (date, date),
            PeriodKind::Weekly => {
                let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                (monday, monday + Duration::days(6))
            }
            PeriodKind::Monthly => {
                let start = ymd(date.year(), date.month(), 1);
                (start, end_of_months(start, 1))
            }
            PeriodKind::Quarterly => {
                let month = ((date.month() - 1) / 3) * 3 + 1;
                let start = ymd(date.year(), month, 1);
                (start, end_of_months(start, 3))
            }
            PeriodKind::SixMonthly => {
                let month = if date.month() <= 6 { 1 } else { 7 };
                let start = ymd(date.year(), month, 1);
                (start, end_of_months(start, 6))
            }
            PeriodKind::Yearly => (ymd(date.year(), 1, 1), ymd(date.year(), 12, 31)),
        };
        Self { kind, start, end, id: None }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// The next period of the same kind.
    pub fn next(&self) -> Self {
        Self::containing(self.kind, self.end + Duration::days(1))
    }

    /// The previous period of the same kind.
    pub fn previous(&self) -> Self {
        Self::containing(self.kind, self.start - Duration::days(1))
    }

    /// The period `count` steps back.
    pub fn previous_by(&self, count: u32) -> Self {
        let mut period = self.clone();
        for _ in 0..count {
            period = period.previous();
        }
        period
    }

    /// The corresponding period `years` calendar years earlier.
    pub fn previous_years(&self, years: u32) -> Self {
        Self::containing(self.kind, shift_years(self.start, -(years as i32)))
    }

    pub fn days_in_period(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// ISO-style period name, e.g. `202401`, `2024Q1`, `2024W3`, `20240115`.
    pub fn iso_name(&self) -> String {
        match self.kind {
            PeriodKind::Daily => self.start.format("%Y%m%d").to_string(),
            PeriodKind::Weekly => {
                let week = self.start.iso_week();
                format!("{}W{}", week.year(), week.week())
            }
            PeriodKind::Monthly => self.start.format("%Y%m").to_string(),
            PeriodKind::Quarterly => {
                format!("{}Q{}", self.start.year(), (self.start.month() - 1) / 3 + 1)
            }
            PeriodKind::SixMonthly => {
                format!("{}S{}", self.start.year(), if self.start.month() <= 6 { 1 } else { 2 })
            }
            PeriodKind::Yearly => self.start.year().to_string(),
        }
    }
}

fn end_of_months(start: NaiveDate, months: u32) -> NaiveDate {
    start
        .checked_add_months(chrono::Months::new(months))
        .expect("in-range date")
        - Duration::days(1)
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iso_name())
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.start == other.start && self.end == other.end
    }
}

impl Eq for Period {}

impl Hash for Period {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.start.hash(state);
        self.end.hash(state);
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.end.cmp(&other.end))
            .then(self.kind.cmp(&other.kind))
    }
}
