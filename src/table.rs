use crate::ledger::Ledger;
use crate::utils::format_amount;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub date: NaiveDate,
    pub account: String,
    pub full_account_name: String,
    pub description: String,
    pub amount: i64,
    pub formatted_amount: String,
}

/// Detail table of the current selection, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionTable {
    pub title: String,
    pub rows: Vec<TableRow>,
}

impl TransactionTable {
    pub fn new(trans: &Ledger, title: &str, unit: &str) -> Self {
        let mut rows: Vec<TableRow> = trans
            .iter()
            .map(|t| TableRow {
                date: t.date,
                account: t.account.clone(),
                full_account_name: t.full_account_name.clone(),
                description: t.description.clone().unwrap_or_default(),
                amount: t.amount,
                formatted_amount: format_amount(t.amount as f64, unit),
            })
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.account.cmp(&b.account)));
        Self {
            title: title.to_string(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.rows.iter().map(|r| r.amount).sum()
    }

    /// Rows whose description or account path contains `needle`, ignoring case.
    pub fn search(&self, needle: &str) -> Vec<&TableRow> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return self.rows.iter().collect();
        }
        self.rows
            .iter()
            .filter(|r| {
                r.description.to_lowercase().contains(&needle)
                    || r.full_account_name.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Transaction;

    fn date(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, m, 1).unwrap()
    }

    #[test]
    fn test_rows_sorted_and_formatted() {
        let trans = Ledger::new(vec![
            Transaction::new(date(3), -1875, "Salary", "Income:Salary"),
            Transaction::new(date(1), 12345, "Rent", "Expenses:Rent").with_description("January rent"),
        ]);
        let table = TransactionTable::new(&trans, "Transactions", "$");
        assert_eq!(table.rows[0].account, "Rent");
        assert_eq!(table.rows[0].formatted_amount, "$12,345");
        assert_eq!(table.rows[1].formatted_amount, "-$1,875");
        assert_eq!(table.total(), 10470);
    }

    #[test]
    fn test_search() {
        let trans = Ledger::new(vec![
            Transaction::new(date(1), 10, "Rent", "Expenses:Rent").with_description("January RENT"),
            Transaction::new(date(2), 5, "Food", "Expenses:Food").with_description("groceries"),
        ]);
        let table = TransactionTable::new(&trans, "t", "$");
        assert_eq!(table.search("rent").len(), 1);
        assert_eq!(table.search("expenses").len(), 2);
        assert_eq!(table.search("  ").len(), 2);
        assert!(table.search("zzz").is_empty());
    }
}
