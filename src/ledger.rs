use crate::error::{LedgerExplorerError, Result};
use crate::frame::{COL_ACCOUNT, COL_AMOUNT, COL_DATE, COL_DESCRIPTION, COL_FULL_ACCOUNT_NAME};
use crate::schema::{TimeResolution, TimeSpan};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ops::Deref;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    /// Signed amount in whole units, rounded at load time.
    pub amount: i64,
    /// Leaf account identifier.
    pub account: String,
    /// Delimited path from the top-level account down to `account`.
    pub full_account_name: String,
    pub description: Option<String>,
}

impl Transaction {
    pub fn new(date: NaiveDate, amount: i64, account: &str, full_account_name: &str) -> Self {
        Self {
            date,
            amount,
            account: account.to_string(),
            full_account_name: full_account_name.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Normalized transaction table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    transactions: Vec<Transaction>,
}

impl Deref for Ledger {
    type Target = [Transaction];

    fn deref(&self) -> &Self::Target {
        &self.transactions
    }
}

impl From<Vec<Transaction>> for Ledger {
    fn from(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }
}

impl FromIterator<Transaction> for Ledger {
    fn from_iter<T: IntoIterator<Item = Transaction>>(iter: T) -> Self {
        Self {
            transactions: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Ledger {
    type Item = Transaction;
    type IntoIter = std::vec::IntoIter<Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.transactions.into_iter()
    }
}

impl Ledger {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    pub fn total(&self) -> i64 {
        self.transactions.iter().map(|t| t.amount).sum()
    }

    /// Earliest and latest transaction dates.
    pub fn date_extent(&self) -> Option<(NaiveDate, NaiveDate)> {
        let earliest = self.transactions.iter().map(|t| t.date).min()?;
        let latest = self.transactions.iter().map(|t| t.date).max()?;
        Some((earliest, latest))
    }

    pub fn accounts(&self) -> BTreeSet<String> {
        self.transactions.iter().map(|t| t.account.clone()).collect()
    }

    pub fn filter_accounts(&self, accounts: &HashSet<String>) -> Ledger {
        self.transactions
            .iter()
            .filter(|t| accounts.contains(&t.account))
            .cloned()
            .collect()
    }

    /// Rows dated within the closed interval `[start, end]`.
    pub fn filter_dates(&self, start: NaiveDate, end: NaiveDate) -> Ledger {
        self.transactions
            .iter()
            .filter(|t| t.date >= start && t.date <= end)
            .cloned()
            .collect()
    }

    /// Negates the amount of every row booked to one of `accounts`.
    pub fn negate_accounts(&mut self, accounts: &HashSet<String>) -> usize {
        let mut flipped = 0;
        for tx in self.transactions.iter_mut() {
            if accounts.contains(&tx.account) {
                tx.amount = -tx.amount;
                flipped += 1;
            }
        }
        flipped
    }

    pub fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }

    pub fn sort_by_date(&mut self) {
        self.transactions.sort_by_key(|t| t.date);
    }

    /// If the amounts sum below zero, negates all of them. Keeps the sign
    /// differences between rows, unlike taking absolute values.
    pub fn positize(mut self) -> Ledger {
        if self.total() < 0 {
            for tx in self.transactions.iter_mut() {
                tx.amount = -tx.amount;
            }
        }
        self
    }

    /// Writes the table as CSV with the loader's canonical headers.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record([
            COL_DATE,
            COL_AMOUNT,
            COL_ACCOUNT,
            COL_FULL_ACCOUNT_NAME,
            COL_DESCRIPTION,
        ])?;
        for tx in &self.transactions {
            writer.write_record([
                tx.date.format("%Y-%m-%d").to_string(),
                tx.amount.to_string(),
                tx.account.clone(),
                tx.full_account_name.clone(),
                tx.description.clone().unwrap_or_default(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| LedgerExplorerError::IoError(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| LedgerExplorerError::InternalInvariant(format!("CSV output: {}", e)))
    }
}

pub fn positize(trans: Ledger) -> Ledger {
    trans.positize()
}

/// Multiplier converting a bucket's summed amount into the requested span.
///
/// Periodic resolutions use their fixed month counts; `Era` buckets need
/// their actual `duration_months`.
pub fn prorate_factor(
    time_span: TimeSpan,
    resolution: Option<TimeResolution>,
    duration_months: Option<f64>,
) -> Result<f64> {
    let Some(span_months) = time_span.months() else {
        return Ok(1.0);
    };
    let bucket_months = match resolution {
        Some(TimeResolution::Era) => duration_months.ok_or_else(|| {
            LedgerExplorerError::InvalidTimeKeyword(
                "era proration needs the bucket duration".to_string(),
            )
        })?,
        Some(res) => res.months().map(f64::from).unwrap_or(1.0),
        None => {
            return Err(LedgerExplorerError::InvalidTimeKeyword(format!(
                "time span '{}' needs a resolution",
                time_span
            )))
        }
    };
    if bucket_months <= 0.0 {
        return Err(LedgerExplorerError::DateError(format!(
            "bucket duration must be positive, got {} months",
            bucket_months
        )));
    }
    Ok(f64::from(span_months) / bucket_months)
}

/// Keyword form of [`prorate_factor`].
pub fn prorate_factor_str(
    time_span: &str,
    resolution: Option<&str>,
    duration_months: Option<f64>,
) -> Result<f64> {
    let span: TimeSpan = time_span.parse()?;
    let res = resolution.map(str::parse::<TimeResolution>).transpose()?;
    prorate_factor(span, res, duration_months)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(account: &str, amount: i64) -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2021, 3, 4).unwrap(),
            amount,
            account,
            account,
        )
    }

    #[test]
    fn test_positize_negates_negative_sums() {
        let ledger = Ledger::new(vec![tx("a", -10), tx("b", 3)]);
        let positized = ledger.positize();
        assert_eq!(
            positized.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![10, -3]
        );
        assert!(positized.total() >= 0);
    }

    #[test]
    fn test_positize_is_idempotent() {
        for amounts in [vec![-5, -7, 2], vec![4, -1], vec![], vec![0, 0]] {
            let ledger: Ledger = amounts.iter().map(|a| tx("x", *a)).collect();
            let once = positize(ledger);
            let twice = positize(once.clone());
            assert_eq!(once, twice);
            assert!(once.total() >= 0);
        }
    }

    #[test]
    fn test_prorate_factor_table() {
        use TimeResolution::*;
        let annual = |r| prorate_factor(TimeSpan::Annual, Some(r), None).unwrap();
        let monthly = |r| prorate_factor(TimeSpan::Monthly, Some(r), None).unwrap();

        assert_eq!(annual(Month), 12.0);
        assert_eq!(annual(Quarter), 4.0);
        assert_eq!(annual(Year), 1.0);
        assert_eq!(annual(Decade), 0.1);
        assert_eq!(monthly(Month), 1.0);
        assert_eq!(monthly(Quarter), 1.0 / 3.0);
        assert!((annual(Month) * monthly(Year) - 1.0).abs() < 1e-12);
        assert_eq!(prorate_factor(TimeSpan::Total, None, None).unwrap(), 1.0);
    }

    #[test]
    fn test_prorate_factor_for_eras() {
        let factor = prorate_factor(TimeSpan::Annual, Some(TimeResolution::Era), Some(6.0)).unwrap();
        assert_eq!(factor, 2.0);
        assert!(prorate_factor(TimeSpan::Monthly, Some(TimeResolution::Era), None).is_err());
        assert!(prorate_factor(TimeSpan::Monthly, Some(TimeResolution::Era), Some(0.0)).is_err());
    }

    #[test]
    fn test_prorate_factor_keywords() {
        assert_eq!(prorate_factor_str("annual", Some("quarter"), None).unwrap(), 4.0);
        assert!(matches!(
            prorate_factor_str("biweekly", Some("month"), None),
            Err(LedgerExplorerError::InvalidTimeKeyword(_))
        ));
        assert!(matches!(
            prorate_factor_str("monthly", Some("week"), None),
            Err(LedgerExplorerError::InvalidTimeKeyword(_))
        ));
        assert!(prorate_factor_str("monthly", None, None).is_err());
    }

    #[test]
    fn test_negate_accounts_twice_is_identity() {
        let original = Ledger::new(vec![tx("Salary", -1875), tx("Checking", 1875)]);
        let mut ledger = original.clone();
        let income: HashSet<String> = ["Salary".to_string()].into_iter().collect();
        assert_eq!(ledger.negate_accounts(&income), 1);
        assert_eq!(ledger[0].amount, 1875);
        assert_eq!(ledger[1].amount, 1875);
        ledger.negate_accounts(&income);
        assert_eq!(ledger, original);
    }

    #[test]
    fn test_filters_and_extent() {
        let d = |m| NaiveDate::from_ymd_opt(2020, m, 1).unwrap();
        let ledger = Ledger::new(vec![
            Transaction::new(d(1), 1, "a", "a"),
            Transaction::new(d(5), 2, "b", "b"),
            Transaction::new(d(9), 3, "a", "a"),
        ]);
        assert_eq!(ledger.date_extent(), Some((d(1), d(9))));
        assert_eq!(ledger.filter_dates(d(2), d(9)).total(), 5);
        let only_a: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(ledger.filter_accounts(&only_a).len(), 2);
        assert!(Ledger::default().date_extent().is_none());
    }

    #[test]
    fn test_to_csv_headers() {
        let ledger = Ledger::new(vec![tx("Cash", 12).with_description("coffee, beans")]);
        let csv = ledger.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("date,amount,account,full account name,description")
        );
        assert_eq!(lines.next(), Some("2021-03-04,12,Cash,Cash,\"coffee, beans\""));
    }
}
