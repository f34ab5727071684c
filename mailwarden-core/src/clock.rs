//! Time source and the US holiday calendar
//!
//! Components take a [`Clock`] so that window arithmetic and cooldowns are
//! testable without sleeping. The holiday calendar feeds conviction
//! micro-contexts: deliverability behavior around retail holidays differs
//! enough that the recall scoring weights holiday matches heavily.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use parking_lot::RwLock;
use std::sync::Arc;

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-driven clock for tests.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(RwLock::new(now)) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Name of the US holiday falling on `date`, if any.
///
/// Covers the fixed-date and floating federal holidays plus the retail
/// anniversaries (Black Friday, Cyber Monday) and Easter.
pub fn holiday_on(date: NaiveDate) -> Option<&'static str> {
    let year = date.year();

    match (date.month(), date.day()) {
        (1, 1) => return Some("New Year's Day"),
        (7, 4) => return Some("Independence Day"),
        (11, 11) => return Some("Veterans Day"),
        (12, 24) => return Some("Christmas Eve"),
        (12, 25) => return Some("Christmas Day"),
        (12, 31) => return Some("New Year's Eve"),
        _ => {}
    }

    if date == nth_weekday(year, 1, Weekday::Mon, 3) {
        return Some("Martin Luther King Jr. Day");
    }
    if date == nth_weekday(year, 2, Weekday::Mon, 3) {
        return Some("Presidents' Day");
    }
    if date == last_weekday(year, 5, Weekday::Mon) {
        return Some("Memorial Day");
    }
    if date == nth_weekday(year, 9, Weekday::Mon, 1) {
        return Some("Labor Day");
    }
    if date == nth_weekday(year, 10, Weekday::Mon, 2) {
        return Some("Columbus Day");
    }

    let thanksgiving = nth_weekday(year, 11, Weekday::Thu, 4);
    if date == thanksgiving {
        return Some("Thanksgiving");
    }
    if date == thanksgiving + Duration::days(1) {
        return Some("Black Friday");
    }
    if date == thanksgiving + Duration::days(4) {
        return Some("Cyber Monday");
    }

    if date == easter_sunday(year) {
        return Some("Easter");
    }

    None
}

/// The `n`-th `weekday` of `month` (n is 1-based).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days(i64::from(offset + (n - 1) * 7))
}

/// The last `weekday` of `month`.
fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month start");
    let last = next_month_first - Duration::days(1);
    let offset = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last - Duration::days(i64::from(offset))
}

/// Gregorian computus (anonymous algorithm).
fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("computus yields a valid date")
}
