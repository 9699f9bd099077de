//! Calendar buckets for the periodic resolutions and their labels.

use crate::error::{LedgerExplorerError, Result};
use crate::ingestion::parse_date;
use crate::schema::TimeResolution;
use crate::utils::{add_months, first_day_of_month, last_day_of_month, span_in_months};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A closed date interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

fn not_periodic(res: TimeResolution) -> LedgerExplorerError {
    LedgerExplorerError::InvalidTimeKeyword(format!("'{}' is not a periodic resolution", res))
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The calendar bucket of `res` that contains `date`. Decades are
    /// calendar decades (2010 through 2019).
    pub fn containing(date: NaiveDate, res: TimeResolution) -> Result<Self> {
        let months = res.months().ok_or_else(|| not_periodic(res))? as i32;
        let start = match res {
            TimeResolution::Decade => first_day_of_month(date.year().div_euclid(10) * 10, 1)?,
            TimeResolution::Year => first_day_of_month(date.year(), 1)?,
            TimeResolution::Quarter => first_day_of_month(date.year(), date.month0() / 3 * 3 + 1)?,
            _ => first_day_of_month(date.year(), date.month())?,
        };
        let last = add_months(start, months - 1)?;
        let end = last_day_of_month(last.year(), last.month())?;
        Ok(Self { start, end })
    }

    pub fn next(&self, res: TimeResolution) -> Result<Self> {
        let after = self
            .end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| LedgerExplorerError::DateError(format!("no day after {}", self.end)))?;
        Self::containing(after, res)
    }

    /// `2010` for decades and years, `2019-Q2` for quarters, `2019-Apr` for months.
    pub fn label(&self, res: TimeResolution) -> String {
        match res {
            TimeResolution::Quarter => {
                format!("{}-Q{}", self.start.year(), self.start.month0() / 3 + 1)
            }
            TimeResolution::Month => self.start.format("%Y-%b").to_string(),
            _ => self.start.format("%Y").to_string(),
        }
    }

    /// Inverse of [`Period::label`]. Plain dates are accepted too and resolve
    /// to the bucket containing them.
    pub fn parse_label(label: &str, res: TimeResolution) -> Result<Self> {
        if !res.is_periodic() {
            return Err(not_periodic(res));
        }
        let label = label.trim();
        let anchor = match res {
            TimeResolution::Quarter => parse_quarter(label),
            TimeResolution::Month => ["%Y-%b-%d", "%Y-%m-%d"]
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(&format!("{}-01", label), f).ok()),
            _ => None,
        }
        .or_else(|| parse_date(label))
        .ok_or_else(|| {
            LedgerExplorerError::DateError(format!("cannot read '{}' as a {} bucket", label, res))
        })?;
        Self::containing(anchor, res)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Length in days, both ends included.
    pub fn width_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn months(&self) -> f64 {
        span_in_months(self.start, self.end)
    }

    pub fn midpoint(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new((self.width_days() / 2) as u64))
            .unwrap_or(self.start)
    }
}

fn parse_quarter(label: &str) -> Option<NaiveDate> {
    let (year, quarter) = label.split_once("-Q").or_else(|| label.split_once("Q"))?;
    let year: i32 = year.trim_end_matches('-').parse().ok()?;
    let quarter: u32 = quarter.parse().ok()?;
    if !(1..=4).contains(&quarter) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, 3 * quarter - 2, 1)
}

/// Every bucket of `res` from the one containing `start` through the one
/// containing `end`.
pub fn periods_between(start: NaiveDate, end: NaiveDate, res: TimeResolution) -> Result<Vec<Period>> {
    let mut periods = Vec::new();
    if end < start {
        return Ok(periods);
    }
    let mut current = Period::containing(start, res)?;
    loop {
        periods.push(current);
        if current.end >= end {
            break;
        }
        current = current.next(res)?;
    }
    Ok(periods)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_containing_each_resolution() {
        let d = date(2019, 5, 17);
        let decade = Period::containing(d, TimeResolution::Decade).unwrap();
        assert_eq!((decade.start, decade.end), (date(2010, 1, 1), date(2019, 12, 31)));
        let quarter = Period::containing(d, TimeResolution::Quarter).unwrap();
        assert_eq!((quarter.start, quarter.end), (date(2019, 4, 1), date(2019, 6, 30)));
        let month = Period::containing(date(2020, 2, 3), TimeResolution::Month).unwrap();
        assert_eq!(month.end, date(2020, 2, 29));
        assert!(Period::containing(d, TimeResolution::Era).is_err());
    }

    #[test]
    fn test_labels_round_trip() {
        let d = date(2019, 5, 17);
        for res in TimeResolution::PERIODIC {
            let period = Period::containing(d, res).unwrap();
            let label = period.label(res);
            assert_eq!(Period::parse_label(&label, res).unwrap(), period, "{}", label);
        }
        assert_eq!(
            Period::containing(d, TimeResolution::Month).unwrap().label(TimeResolution::Month),
            "2019-May"
        );
    }

    #[test]
    fn test_quarter_label_window() {
        let q2 = Period::parse_label("2019-Q2", TimeResolution::Quarter).unwrap();
        assert_eq!(q2.start, date(2019, 4, 1));
        assert_eq!(q2.end, date(2019, 6, 30));
        assert!(Period::parse_label("2019-Q5", TimeResolution::Quarter).is_err());
    }

    #[test]
    fn test_dates_resolve_to_their_bucket() {
        let year = Period::parse_label("2018-07-04", TimeResolution::Year).unwrap();
        assert_eq!(year.start, date(2018, 1, 1));
        let month = Period::parse_label("2018-07", TimeResolution::Month).unwrap();
        assert_eq!(month.end, date(2018, 7, 31));
    }

    #[test]
    fn test_periods_between_is_dense() {
        let periods =
            periods_between(date(2019, 11, 5), date(2020, 2, 1), TimeResolution::Month).unwrap();
        let labels: Vec<String> = periods.iter().map(|p| p.label(TimeResolution::Month)).collect();
        assert_eq!(labels, vec!["2019-Nov", "2019-Dec", "2020-Jan", "2020-Feb"]);
        assert!(periods_between(date(2020, 1, 1), date(2019, 1, 1), TimeResolution::Year)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_width_and_midpoint() {
        let p = Period::new(date(2018, 1, 1), date(2018, 1, 31));
        assert_eq!(p.width_days(), 31);
        assert_eq!(p.midpoint(), date(2018, 1, 16));
    }
}
