//! Upload normalization: raw frames in, a consistent [`Datastore`] out.
//!
//! The pipeline per upload is `rename_columns -> repair_gnucash ->
//! normalize_types -> reconcile_tree -> sign_flip -> attach_full_path`.

use crate::account_tree::{AccountTree, ParentRow};
use crate::datastore::Datastore;
use crate::eras::{EraRow, Eras};
use crate::error::{LedgerExplorerError, Result};
use crate::frame::{
    RawFrame, Source, COL_ACCOUNT, COL_AMOUNT, COL_DATE, COL_DATE_END, COL_DATE_START,
    COL_DESCRIPTION, COL_ERA_NAME, COL_FULL_ACCOUNT_NAME, COL_MEMO, COL_NOTES,
    COL_PARENT_ACCOUNT,
};
use crate::ledger::{Ledger, Transaction};
use crate::schema::Params;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::HashSet;

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d-%b-%Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// How the account tree was obtained, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOrigin {
    TreeFilePaths,
    TreeFileParents,
    TransactionPaths,
    TransactionParents,
    FlatAccounts,
}

/// A transaction row after type normalization, before tree reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub date: NaiveDate,
    pub amount: i64,
    pub account: Option<String>,
    pub full_account_name: Option<String>,
    pub parent: Option<String>,
    pub description: Option<String>,
}

pub struct Loader<'a> {
    params: &'a Params,
}

impl<'a> Loader<'a> {
    pub fn new(params: &'a Params) -> Self {
        Self { params }
    }

    pub fn load(
        &self,
        trans: &Source,
        tree: Option<&Source>,
        eras: Option<&Source>,
    ) -> Result<Datastore> {
        let trans_frame = RawFrame::read(trans)?;
        let tree_frame = tree.map(RawFrame::read).transpose()?;
        let eras_frame = eras.map(RawFrame::read).transpose()?;
        self.load_frames(trans_frame, tree_frame, eras_frame)
    }

    pub fn load_frames(
        &self,
        mut trans: RawFrame,
        tree: Option<RawFrame>,
        eras: Option<RawFrame>,
    ) -> Result<Datastore> {
        info!("Loading transactions from '{}' ({} rows)", trans.name, trans.len());

        let mapping = self.params.column_mapping();
        trans.rename_columns(&mapping);
        repair_gnucash(&mut trans);
        let rows = normalize_transactions(&trans, &self.params.unit)?;

        let tree_frame = tree.map(|mut frame| {
            frame.rename_columns(&mapping);
            frame
        });
        let (mut atree, origin) = reconcile_tree(&rows, tree_frame.as_ref(), self.params.delimiter())?;
        debug!("Account tree built from {:?} with {} nodes", origin, atree.len());

        // The loaded tree keeps every top-level account; views trim their own copies.
        let mut ledger = attach_accounts(rows, &mut atree, self.params.delimiter());
        for root in &self.params.flip_negative_roots {
            flip_subtree_signs(&mut ledger, &atree, root);
        }
        attach_full_paths(&mut ledger, &atree);
        ledger.sort_by_date();

        let eras = match eras {
            Some(frame) => parse_eras(&frame, ledger.date_extent())?,
            None => Eras::default(),
        };

        Ok(Datastore::new(ledger, atree, eras, Some(trans.name.clone())))
    }
}

/// Gnucash exports put date, description and notes on the first split line
/// only. Fills those (and memo) forward by one row, then folds notes and
/// memo into the description. Frames of any other shape are left alone.
pub fn repair_gnucash(frame: &mut RawFrame) {
    let looks_like_gnucash = (frame.has_column(COL_NOTES) || frame.has_column(COL_MEMO))
        && frame
            .column_index(COL_DATE)
            .map(|d| (0..frame.len()).any(|r| frame.cell(r, d).is_none()))
            .unwrap_or(false);
    if !looks_like_gnucash {
        return;
    }
    debug!("{}: repairing Gnucash split rows", frame.name);

    for column in [COL_DATE, COL_DESCRIPTION, COL_NOTES, COL_MEMO] {
        let Some(col) = frame.column_index(column) else {
            continue;
        };
        let original: Vec<Option<String>> = (0..frame.len())
            .map(|r| frame.cell(r, col).map(str::to_string))
            .collect();
        for row in 1..original.len() {
            if original[row].is_none() {
                if let Some(prev) = &original[row - 1] {
                    frame.set_cell(row, col, prev.clone());
                }
            }
        }
    }

    let parts: Vec<usize> = [COL_DESCRIPTION, COL_NOTES, COL_MEMO]
        .iter()
        .filter_map(|c| frame.column_index(c))
        .collect();
    let desc = frame.ensure_column(COL_DESCRIPTION);
    for row in 0..frame.len() {
        let joined: Vec<String> = parts
            .iter()
            .filter_map(|c| frame.cell(row, *c).map(str::to_string))
            .collect();
        frame.set_cell(row, desc, joined.join(" "));
    }
}

/// ISO-like dates first, then a bare `YYYY` taken as January 1.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        return text
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
    }
    None
}

/// Strips thousands separators and the display unit, then rounds to whole
/// units. Blank is zero.
pub fn parse_amount(text: &str, unit: &str) -> Option<i64> {
    let text = if unit.is_empty() { text.to_string() } else { text.replace(unit, "") };
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Some(0);
    }
    let (negative, digits) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner.to_string()),
        None => (false, cleaned),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round() as i64;
    Some(if negative { -rounded } else { rounded })
}

fn required(frame: &RawFrame, column: &str) -> Result<usize> {
    frame
        .column_index(column)
        .ok_or_else(|| LedgerExplorerError::MissingColumn {
            source_name: frame.name.clone(),
            column: column.to_string(),
        })
}

pub fn normalize_transactions(frame: &RawFrame, unit: &str) -> Result<Vec<TransactionRow>> {
    let date_col = required(frame, COL_DATE)?;
    let amount_col = required(frame, COL_AMOUNT)?;
    let account_col = frame.column_index(COL_ACCOUNT);
    let fan_col = frame.column_index(COL_FULL_ACCOUNT_NAME);
    if account_col.is_none() && fan_col.is_none() {
        return Err(LedgerExplorerError::MissingColumn {
            source_name: frame.name.clone(),
            column: COL_ACCOUNT.to_string(),
        });
    }
    let parent_col = frame.column_index(COL_PARENT_ACCOUNT);
    let desc_col = frame.column_index(COL_DESCRIPTION);

    let mut rows = Vec::with_capacity(frame.len());
    let mut skipped = 0usize;
    for r in 0..frame.len() {
        let line = r + 2;
        let Some(date_text) = frame.cell(r, date_col) else {
            skipped += 1;
            continue;
        };
        let date = parse_date(date_text).ok_or_else(|| {
            LedgerExplorerError::LoadError(format!(
                "{}: row {}: unrecognized date '{}'",
                frame.name, line, date_text
            ))
        })?;
        let amount_text = frame.cell(r, amount_col).unwrap_or("");
        let amount = parse_amount(amount_text, unit).ok_or_else(|| {
            LedgerExplorerError::LoadError(format!(
                "{}: row {}: unrecognized amount '{}'",
                frame.name, line, amount_text
            ))
        })?;
        let account = account_col.and_then(|c| frame.cell(r, c)).map(str::to_string);
        let full_account_name = fan_col.and_then(|c| frame.cell(r, c)).map(str::to_string);
        if account.is_none() && full_account_name.is_none() {
            skipped += 1;
            continue;
        }
        rows.push(TransactionRow {
            date,
            amount,
            account,
            full_account_name,
            parent: parent_col.and_then(|c| frame.cell(r, c)).map(str::to_string),
            description: desc_col.and_then(|c| frame.cell(r, c)).map(str::to_string),
        });
    }
    if skipped > 0 {
        warn!("{}: skipped {} rows without a date or account", frame.name, skipped);
    }
    Ok(rows)
}

/// Picks the tree source: tree file paths, tree file parents, transaction
/// paths, transaction parents, and finally a flat tree of the accounts.
pub fn reconcile_tree(
    rows: &[TransactionRow],
    tree_frame: Option<&RawFrame>,
    delimiter: &str,
) -> Result<(AccountTree, TreeOrigin)> {
    if let Some(frame) = tree_frame {
        if let Some(fan) = frame.column_index(COL_FULL_ACCOUNT_NAME) {
            let names: Vec<&str> = (0..frame.len()).filter_map(|r| frame.cell(r, fan)).collect();
            return Ok((AccountTree::from_names(names, delimiter), TreeOrigin::TreeFilePaths));
        }
        if let (Some(account), Some(parent)) = (
            frame.column_index(COL_ACCOUNT),
            frame.column_index(COL_PARENT_ACCOUNT),
        ) {
            let parent_rows: Vec<ParentRow> = (0..frame.len())
                .filter_map(|r| {
                    frame
                        .cell(r, account)
                        .map(|a| ParentRow::new(a, frame.cell(r, parent)))
                })
                .collect();
            let tree = rebase_delimiter(AccountTree::from_parents(&parent_rows), delimiter);
            return Ok((tree, TreeOrigin::TreeFileParents));
        }
        return Err(LedgerExplorerError::LoadError(format!(
            "{}: account tree needs a '{}' column or '{}' and '{}' columns",
            frame.name, COL_FULL_ACCOUNT_NAME, COL_ACCOUNT, COL_PARENT_ACCOUNT
        )));
    }

    if rows.iter().any(|r| r.full_account_name.is_some()) {
        let names = rows.iter().filter_map(|r| r.full_account_name.as_deref());
        return Ok((AccountTree::from_names(names, delimiter), TreeOrigin::TransactionPaths));
    }

    if rows.iter().any(|r| r.parent.is_some()) {
        let parent_rows: Vec<ParentRow> = rows
            .iter()
            .filter_map(|r| {
                r.account
                    .as_deref()
                    .map(|a| ParentRow::new(a, r.parent.as_deref()))
            })
            .collect();
        let tree = rebase_delimiter(AccountTree::from_parents(&parent_rows), delimiter);
        return Ok((tree, TreeOrigin::TransactionParents));
    }

    Ok((AccountTree::with_delimiter(delimiter), TreeOrigin::FlatAccounts))
}

/// Parent-row trees are built with the default delimiter.
fn rebase_delimiter(tree: AccountTree, delimiter: &str) -> AccountTree {
    if tree.delimiter() == delimiter {
        return tree;
    }
    let paths: Vec<String> = tree.dict_of_paths().into_values().collect();
    let rebuilt: Vec<String> = paths
        .iter()
        .map(|p| p.replace(tree.delimiter(), delimiter))
        .collect();
    AccountTree::from_names(rebuilt, delimiter)
}

/// Resolves each row's leaf account and makes sure the tree contains it.
/// The `account` column wins over the last path segment when both exist.
fn attach_accounts(rows: Vec<TransactionRow>, tree: &mut AccountTree, delimiter: &str) -> Ledger {
    let root = tree.root_id().to_string();
    rows.into_iter()
        .filter_map(|row| {
            let from_path = row
                .full_account_name
                .as_deref()
                .and_then(|p| p.rsplit(delimiter).next())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            let account = row.account.clone().or(from_path.clone())?;
            if let (Some(leaf), Some(path)) = (&from_path, &row.full_account_name) {
                if *leaf != account {
                    debug!(
                        "Account '{}' disagrees with path '{}'; the account column wins",
                        account, path
                    );
                }
            }
            if !tree.contains(&account) {
                debug!("Attaching account '{}' under the root", account);
                tree.create_node(&account, &account, &root);
            }
            let mut tx = Transaction::new(row.date, row.amount, &account, "");
            tx.description = row.description;
            Some(tx)
        })
        .collect()
}

/// Negates every transaction in the subtree of `root_account`. Applying it
/// twice restores the original amounts.
pub fn flip_subtree_signs(ledger: &mut Ledger, tree: &AccountTree, root_account: &str) -> usize {
    let accounts: HashSet<String> = tree.subtree_ids(root_account);
    if accounts.is_empty() {
        debug!("No '{}' account to sign-flip", root_account);
        return 0;
    }
    let flipped = ledger.negate_accounts(&accounts);
    debug!("Flipped sign of {} '{}' transactions", flipped, root_account);
    flipped
}

/// Overwrites `full_account_name` with the tree's path for each account.
pub fn attach_full_paths(ledger: &mut Ledger, tree: &AccountTree) {
    for tx in ledger.transactions_mut() {
        if let Some(path) = tree.full_account_name(&tx.account) {
            tx.full_account_name = path;
        }
    }
}

pub fn parse_eras(frame: &RawFrame, extent: Option<(NaiveDate, NaiveDate)>) -> Result<Eras> {
    let name_col = required(frame, COL_ERA_NAME)?;
    let start_col = frame.column_index(COL_DATE_START);
    let end_col = frame.column_index(COL_DATE_END);

    let parse_boundary = |row: usize, col: Option<usize>| -> Result<Option<NaiveDate>> {
        match col.and_then(|c| frame.cell(row, c)) {
            None => Ok(None),
            Some(text) => parse_date(text).map(Some).ok_or_else(|| {
                LedgerExplorerError::LoadError(format!(
                    "{}: row {}: unrecognized era date '{}'",
                    frame.name,
                    row + 2,
                    text
                ))
            }),
        }
    };

    let mut rows = Vec::with_capacity(frame.len());
    for r in 0..frame.len() {
        let name = frame.cell(r, name_col).unwrap_or_default();
        rows.push(EraRow::new(
            name,
            parse_boundary(r, start_col)?,
            parse_boundary(r, end_col)?,
        ));
    }
    Eras::from_rows(rows, extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(csv: &str) -> RawFrame {
        RawFrame::from_csv_bytes("test.csv", csv.as_bytes()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(parse_date("2019-04-02"), Some(date(2019, 4, 2)));
        assert_eq!(parse_date("2019/04/02"), Some(date(2019, 4, 2)));
        assert_eq!(parse_date("04/02/2019"), Some(date(2019, 4, 2)));
        assert_eq!(parse_date("2019-04-02 13:45:00"), Some(date(2019, 4, 2)));
        assert_eq!(parse_date("2019-04-02T13:45:00+02:00"), Some(date(2019, 4, 2)));
        assert_eq!(parse_date("1987"), Some(date(1987, 1, 1)));
        assert_eq!(parse_date("someday"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,875.40", "$"), Some(1875));
        assert_eq!(parse_amount("-1,875.60", "$"), Some(-1876));
        assert_eq!(parse_amount("$2,000", "$"), Some(2000));
        assert_eq!(parse_amount("", "$"), Some(0));
        assert_eq!(parse_amount("(12.00)", "$"), Some(-12));
        assert_eq!(parse_amount("12 345", ""), Some(12345));
        assert_eq!(parse_amount("abc", "$"), None);
    }

    #[test]
    fn test_missing_required_column() {
        let f = frame("account,amount\nCash,1\n");
        assert!(matches!(
            normalize_transactions(&f, "$"),
            Err(LedgerExplorerError::MissingColumn { column, .. }) if column == "date"
        ));
    }

    #[test]
    fn test_gnucash_rows_are_repaired() {
        let mut f = frame(
            "date,description,notes,memo,full account name,amount\n\
             2020-02-01,Paycheck,March,,Income:Salary,\"-1,875\"\n\
             ,,,direct deposit,Assets:Checking,\"1,875\"\n",
        );
        repair_gnucash(&mut f);
        let rows = normalize_transactions(&f, "$").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].date, date(2020, 2, 1));
        assert_eq!(rows[0].description.as_deref(), Some("Paycheck March"));
        assert_eq!(
            rows[1].description.as_deref(),
            Some("Paycheck March direct deposit")
        );
    }

    #[test]
    fn test_non_gnucash_frames_are_untouched() {
        let mut f = frame("date,description,amount,account\n2020-01-01,x,1,Cash\n");
        let before = f.clone();
        repair_gnucash(&mut f);
        assert_eq!(f, before);
    }

    #[test]
    fn test_tree_preference_order() {
        let rows = vec![TransactionRow {
            date: date(2020, 1, 1),
            amount: 1,
            account: Some("Checking".into()),
            full_account_name: Some("Assets:Checking".into()),
            parent: Some("Bank".into()),
            description: None,
        }];

        let tree_file = frame("account,parent account\nChecking,Bank\nBank,Assets\n");
        let (tree, origin) = reconcile_tree(&rows, Some(&tree_file), ":").unwrap();
        assert_eq!(origin, TreeOrigin::TreeFileParents);
        assert_eq!(tree.parent("Bank"), Some("Assets"));

        let (tree, origin) = reconcile_tree(&rows, None, ":").unwrap();
        assert_eq!(origin, TreeOrigin::TransactionPaths);
        assert_eq!(tree.parent("Checking"), Some("Assets"));

        let bad_tree = frame("foo\nbar\n");
        assert!(reconcile_tree(&rows, Some(&bad_tree), ":").is_err());
    }

    #[test]
    fn test_sign_flip_on_load() {
        let params = Params::default();
        let f = frame(
            "date,full account name,amount\n\
             2020-01-01,Income:Salary,-1875\n\
             2020-01-01,Assets:Checking,1875\n",
        );
        let ds = Loader::new(&params).load_frames(f, None, None).unwrap();
        let salary = ds.trans().iter().find(|t| t.account == "Salary").unwrap();
        let checking = ds.trans().iter().find(|t| t.account == "Checking").unwrap();
        assert_eq!(salary.amount, 1875);
        assert_eq!(salary.full_account_name, "Income:Salary");
        assert_eq!(checking.amount, 1875);
    }

    #[test]
    fn test_sign_flip_with_single_top_level_account() {
        let params = Params::default();
        let f = frame(
            "date,full account name,amount\n\
             2020-01-01,Expenses:Living:Food,-100\n\
             2020-01-02,Expenses:Living:Rent,-50\n",
        );
        let ds = Loader::new(&params).load_frames(f, None, None).unwrap();
        assert!(ds.tree().contains("Expenses"));

        let food = ds.trans().iter().find(|t| t.account == "Food").unwrap();
        assert_eq!(food.amount, 100);
        assert_eq!(food.full_account_name, "Expenses:Living:Food");
        let rent = ds.trans().iter().find(|t| t.account == "Rent").unwrap();
        assert_eq!(rent.amount, 50);
        assert_eq!(rent.full_account_name, "Expenses:Living:Rent");
    }

    #[test]
    fn test_flip_is_local_and_involutive() {
        let tree = AccountTree::from_names(["Income:Salary", "Assets:Checking"], ":");
        let original = Ledger::new(vec![
            Transaction::new(date(2020, 1, 1), -10, "Salary", "Income:Salary"),
            Transaction::new(date(2020, 1, 1), 10, "Checking", "Assets:Checking"),
        ]);
        let mut ledger = original.clone();
        flip_subtree_signs(&mut ledger, &tree, "Income");
        assert_eq!(ledger[1], original[1]);
        flip_subtree_signs(&mut ledger, &tree, "Income");
        assert_eq!(ledger, original);
        assert_eq!(flip_subtree_signs(&mut ledger, &tree, "Equity"), 0);
    }

    #[test]
    fn test_user_column_labels_and_missing_tree_accounts() {
        let params = Params::default();
        let trans = frame(
            "Date,Account Name,Amount Num.,Description\n\
             2021-05-01,Groceries,\"1,200.49\",food\n\
             2021-05-02,Stray,7,?\n",
        );
        let tree = frame("Full Account Name\nExpenses:Food:Groceries\n");
        let ds = Loader::new(&params).load_frames(trans, Some(tree), None).unwrap();

        let groceries = ds.trans().iter().find(|t| t.account == "Groceries").unwrap();
        // Expenses is a flip root.
        assert_eq!(groceries.amount, -1200);
        assert_eq!(groceries.full_account_name, "Expenses:Food:Groceries");
        let stray = ds.trans().iter().find(|t| t.account == "Stray").unwrap();
        assert_eq!(stray.full_account_name, "Stray");
        assert_eq!(ds.trans_filename(), Some("test.csv"));
    }

    #[test]
    fn test_eras_frame() {
        let f = frame("name,date_start,date_end\ne1,,2017-12-31\ne2,2018-01-01,\n");
        let eras = parse_eras(&f, Some((date(2017, 6, 1), date(2019, 2, 1)))).unwrap();
        assert_eq!(eras.len(), 2);
        assert_eq!(eras.by_name("e2").unwrap().date_end, date(2019, 2, 1));

        let bad = frame("name,date_start\ne1,soon\n");
        assert!(parse_eras(&bad, None).is_err());
    }
}
