use crate::error::{LedgerExplorerError, Result};
use chrono::{Datelike, Days, NaiveDate};

/// Average month length used to express day counts as months.
pub const DAYS_PER_MONTH: f64 = 365.25 / 12.0;

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| {
            LedgerExplorerError::DateError(format!("Invalid month {}-{:02}", year, month))
        })
}

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        LedgerExplorerError::DateError(format!("Invalid month {}-{:02}", year, month))
    })
}

/// Shifts a first-of-month date by a (possibly negative) number of months.
pub fn add_months(date: NaiveDate, months: i32) -> Result<NaiveDate> {
    let index = date.year() * 12 + date.month0() as i32 + months;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    first_day_of_month(year, month)
}

/// Length of the closed interval `[start, end]` in (fractional) months.
pub fn span_in_months(start: NaiveDate, end: NaiveDate) -> f64 {
    let days = (end - start).num_days() + 1;
    days as f64 / DAYS_PER_MONTH
}

/// Formats an amount rounded to whole units with thousands separators and
/// the display unit, e.g. `-$1,234`.
pub fn format_amount(value: f64, unit: &str) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-{}{}", unit, grouped)
    } else {
        format!("{}{}", unit, grouped)
    }
}
