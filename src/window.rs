//! Date-label classification for the feed list.
//!
//! The site renders publication dates as free text: relative labels
//! ("Just now", "12 mins ago", "3 hours ago", "Today") for recent items and
//! calendar dates ("07-Mar-2025", sometimes just "07-Mar") for older ones.
//! [`classify_label`] decides, from the label alone, whether an item falls
//! inside the rolling window ending at the reference time.
//!
//! This is a heuristic over the site's label vocabulary; anything it does
//! not recognise is treated as outside the window.

use crate::models::FeedDate;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// "12 mins ago", "1 hour ago", "5m", "2 hrs"
static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?)\b").unwrap()
});

/// "07-Mar-2025", "7-Sept-2025", "07-Mar"
static CALENDAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})-([A-Za-z]{3,4})(?:-(\d{4}))?\b").unwrap());

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sept", "Oct", "Nov", "Dec",
];

/// Result of classifying one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelClass {
    /// Inside the window; carries the date to forward.
    Within(FeedDate),
    Outside,
}

#[cfg(test)]
impl LabelClass {
    pub fn is_within(&self) -> bool {
        matches!(self, LabelClass::Within(_))
    }
}

/// Format a date the way the site prints it, e.g. `07-Mar-2025`.
pub fn site_date(date: NaiveDate) -> String {
    format!("{}-{}", site_day(date), date.year())
}

/// Day-and-month form without the year, e.g. `07-Mar`.
pub fn site_day(date: NaiveDate) -> String {
    format!("{:02}-{}", date.day(), MONTHS[date.month0() as usize])
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let key = if lower == "sep" { "sept" } else { lower.as_str() };
    MONTHS
        .iter()
        .position(|m| m.to_ascii_lowercase() == key)
        .map(|i| i as u32 + 1)
}

/// Age spelled by a relative label. `None` when the quantity does not fit a
/// `TimeDelta`.
fn relative_age(caps: &Captures<'_>) -> Option<TimeDelta> {
    let n: i64 = caps[1].parse().ok()?;
    let unit = caps[2].to_ascii_lowercase();
    match unit.chars().next()? {
        'm' => TimeDelta::try_minutes(n),
        'h' => TimeDelta::try_hours(n),
        'd' => TimeDelta::try_days(n),
        _ => None,
    }
}

fn calendar_date(label: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = CALENDAR.captures(label)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;
    match caps.get(3) {
        Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day),
        None => {
            // Year-less labels never point to the future: "28-Dec" seen on
            // 02-Jan belongs to the previous year.
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year > today {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

/// Decide whether a raw date label falls within `window` of `reference`.
///
/// `reference` must carry the offset the site uses for its calendar dates.
///
/// - "Just now" → within, stamped at `reference`
/// - "N min/hour/day(s) ago" → within when `N` units is less than `window`,
///   stamped at `reference - N`; quantities too large to represent are outside
/// - labels mentioning "min" or "hour" without a number, or "Today" → within, kept verbatim
/// - today's date (`07-Mar-2025` or `07-Mar`) → within, kept verbatim
/// - another calendar date → within only if that day started no earlier than `reference - window`
/// - anything else (including "Yesterday") → outside
pub fn classify_label(
    label: &str,
    reference: DateTime<FixedOffset>,
    window: TimeDelta,
) -> LabelClass {
    let label = label.trim();
    if label.is_empty() {
        return LabelClass::Outside;
    }
    let lower = label.to_ascii_lowercase();

    if lower.contains("just now") {
        return LabelClass::Within(FeedDate::Timestamp(reference));
    }

    if let Some(caps) = RELATIVE.captures(label) {
        return match relative_age(&caps) {
            Some(age) if age < window => reference
                .checked_sub_signed(age)
                .map(|ts| LabelClass::Within(FeedDate::Timestamp(ts)))
                .unwrap_or(LabelClass::Outside),
            _ => LabelClass::Outside,
        };
    }

    let verbatim = || LabelClass::Within(FeedDate::Label(label.to_string()));

    if lower.contains("today") || lower.contains("min") || lower.contains("hour") {
        return verbatim();
    }

    let today = reference.date_naive();
    if label.contains(&site_date(today)) {
        return verbatim();
    }

    match calendar_date(label, today) {
        Some(date) if date == today => verbatim(),
        Some(date) if date < today => {
            let day_start = date
                .and_hms_opt(0, 0, 0)
                .and_then(|dt| dt.and_local_timezone(*reference.offset()).single());
            match day_start {
                Some(start) if start >= reference - window => verbatim(),
                _ => LabelClass::Outside,
            }
        }
        _ => LabelClass::Outside,
    }
}
