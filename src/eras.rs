use crate::error::{LedgerExplorerError, Result};
use chrono::{Days, NaiveDate};
use log::warn;
use serde::{Deserialize, Serialize};

/// A named, closed date interval used as a custom time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Era {
    pub name: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
}

impl Era {
    pub fn new(name: &str, date_start: NaiveDate, date_end: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            date_start,
            date_end,
        }
    }
}

/// An era as read from the eras file; either boundary may be open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraRow {
    pub name: String,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
}

impl EraRow {
    pub fn new(name: &str, date_start: Option<NaiveDate>, date_end: Option<NaiveDate>) -> Self {
        Self {
            name: name.to_string(),
            date_start,
            date_end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraBin<'a> {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: &'a str,
}

/// Ordered eras table, ascending by `date_start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eras {
    eras: Vec<Era>,
}

impl Eras {
    pub fn new(mut eras: Vec<Era>) -> Result<Self> {
        for era in &eras {
            if era.date_start > era.date_end {
                return Err(LedgerExplorerError::LoadError(format!(
                    "era '{}' starts on {} after it ends on {}",
                    era.name, era.date_start, era.date_end
                )));
            }
        }
        eras.sort_by_key(|e| e.date_start);
        Ok(Self { eras })
    }

    /// Resolves open boundaries. The first start defaults to the earliest
    /// transaction, the last end to the latest; interior gaps close against
    /// the neighbouring era.
    pub fn from_rows(mut rows: Vec<EraRow>, extent: Option<(NaiveDate, NaiveDate)>) -> Result<Self> {
        rows.retain(|r| {
            let keep = r.date_start.is_some() || r.date_end.is_some() || !r.name.trim().is_empty();
            if !keep {
                warn!("Skipping blank era row");
            }
            keep
        });
        rows.sort_by_key(|r| r.date_start.or(r.date_end));

        let count = rows.len();
        let mut eras = Vec::with_capacity(count);
        for i in 0..count {
            let start = match rows[i].date_start {
                Some(d) => Some(d),
                None if i == 0 => extent.map(|(earliest, _)| earliest),
                None => rows[i - 1].date_end.and_then(|d| d.checked_add_days(Days::new(1))),
            };
            let end = match rows[i].date_end {
                Some(d) => Some(d),
                None if i + 1 == count => extent.map(|(_, latest)| latest),
                None => rows[i + 1]
                    .date_start
                    .and_then(|d| d.checked_sub_days(Days::new(1))),
            };
            let (Some(date_start), Some(date_end)) = (start, end) else {
                return Err(LedgerExplorerError::LoadError(format!(
                    "era '{}' has an open boundary that cannot be resolved",
                    rows[i].name
                )));
            };
            if date_start > date_end {
                let defaulted = rows[i].date_start.is_none() || rows[i].date_end.is_none();
                if defaulted {
                    warn!(
                        "Dropping era '{}': defaulted boundaries give an empty interval",
                        rows[i].name
                    );
                    continue;
                }
            }
            eras.push(Era::new(rows[i].name.trim(), date_start, date_end));
        }
        Self::new(eras)
    }

    pub fn is_empty(&self) -> bool {
        self.eras.is_empty()
    }

    pub fn len(&self) -> usize {
        self.eras.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Era> {
        self.eras.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<&Era> {
        self.eras.iter().find(|e| e.name == name)
    }

    /// The windows era bars are binned on: each era runs from its start to
    /// the day before the next era's start, so gaps between eras belong to
    /// the earlier one. The last window ends on `latest` and is dropped when
    /// `latest` precedes it. Eras sharing a start keep only the last.
    pub fn windows(&self, latest: NaiveDate) -> Vec<EraBin<'_>> {
        let mut windows = Vec::with_capacity(self.eras.len());
        for (i, era) in self.eras.iter().enumerate() {
            let end = match self.eras.get(i + 1) {
                Some(next) => match next.date_start.checked_sub_days(Days::new(1)) {
                    Some(d) => d,
                    None => continue,
                },
                None => latest,
            };
            if end < era.date_start {
                continue;
            }
            windows.push(EraBin {
                start: era.date_start,
                end,
                label: &era.name,
            });
        }
        windows
    }

    /// The window whose label is `name`, or else the one containing `date`.
    pub fn window_for(
        &self,
        name: &str,
        date: Option<NaiveDate>,
        latest: NaiveDate,
    ) -> Option<EraBin<'_>> {
        let windows = self.windows(latest);
        windows
            .iter()
            .find(|w| w.label == name)
            .or_else(|| date.and_then(|d| windows.iter().find(|w| w.start <= d && d <= w.end)))
            .copied()
    }
}
