//! Immutable session snapshot of (transactions, account tree, eras), and the
//! typed JSON envelope it travels in between the loader and the views.

use crate::account_tree::AccountTree;
use crate::eras::{Era, Eras};
use crate::error::{LedgerExplorerError, Result};
use crate::frame::{
    COL_ACCOUNT, COL_AMOUNT, COL_DATE, COL_DATE_END, COL_DATE_START, COL_DESCRIPTION,
    COL_ERA_NAME, COL_FULL_ACCOUNT_NAME,
};
use crate::ledger::{Ledger, Transaction};
use crate::DEFAULT_DELIMITER;
use chrono::{DateTime, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datastore {
    trans: Ledger,
    tree: AccountTree,
    eras: Eras,
    trans_filename: Option<String>,
    earliest_trans: Option<NaiveDate>,
    latest_trans: Option<NaiveDate>,
}

/// Headline numbers for the data-source tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub filename: Option<String>,
    pub transactions: usize,
    pub accounts: usize,
    pub eras: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub total: i64,
}

impl Datastore {
    pub fn new(trans: Ledger, tree: AccountTree, eras: Eras, trans_filename: Option<String>) -> Self {
        let (earliest_trans, latest_trans) = match trans.date_extent() {
            Some((earliest, latest)) => (Some(earliest), Some(latest)),
            None => (None, None),
        };
        Self {
            trans,
            tree,
            eras,
            trans_filename,
            earliest_trans,
            latest_trans,
        }
    }

    /// Number of transactions.
    pub fn len(&self) -> usize {
        self.trans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trans.is_empty()
    }

    pub fn trans(&self) -> &Ledger {
        &self.trans
    }

    pub fn tree(&self) -> &AccountTree {
        &self.tree
    }

    pub fn eras(&self) -> &Eras {
        &self.eras
    }

    pub fn trans_filename(&self) -> Option<&str> {
        self.trans_filename.as_deref()
    }

    pub fn earliest_trans(&self) -> Option<NaiveDate> {
        self.earliest_trans
    }

    pub fn latest_trans(&self) -> Option<NaiveDate> {
        self.latest_trans
    }

    pub fn extent(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.earliest_trans.zip(self.latest_trans)
    }

    /// A new datastore holding only the transactions booked to `accounts` or
    /// their descendants, with the tree rebuilt from what is left.
    pub fn filtered(&self, accounts: &[String]) -> Datastore {
        if accounts.is_empty() {
            return self.clone();
        }
        let mut keep: HashSet<String> = HashSet::new();
        for account in accounts {
            let ids = self.tree.subtree_ids(account);
            if ids.is_empty() {
                warn!("Filter account '{}' is not in the tree", account);
            }
            keep.extend(ids);
        }
        let trans = self.trans.filter_accounts(&keep);
        let mut tree =
            AccountTree::from_names(trans.iter().map(|t| t.full_account_name.as_str()), self.tree.delimiter());
        tree.trim_excess_root();
        debug!(
            "Filtered datastore to {} accounts: {} of {} transactions",
            accounts.len(),
            trans.len(),
            self.trans.len()
        );
        Datastore::new(trans, tree, self.eras.clone(), self.trans_filename.clone())
    }

    pub fn summary(&self) -> DataSummary {
        DataSummary {
            filename: self.trans_filename.clone(),
            transactions: self.trans.len(),
            accounts: self.trans.accounts().len(),
            eras: self.eras.len(),
            earliest: self.earliest_trans,
            latest: self.latest_trans,
            total: self.trans.total(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let envelope = WireEnvelope {
            trans: encode_trans(&self.trans),
            eras: encode_eras(&self.eras),
            atree: Some(self.tree.clone()),
            trans_filename: self.trans_filename.clone(),
            delimiter: self.tree.delimiter().to_string(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decodes a wire envelope. A non-empty `filter` keeps only the listed
    /// accounts' subtrees, see [`Datastore::filtered`].
    pub fn from_json(blob: &str, filter: &[String]) -> Result<Self> {
        let envelope: WireEnvelope = serde_json::from_str(blob)?;
        let trans = decode_trans(&envelope.trans)?;
        let eras = decode_eras(&envelope.eras)?;
        let tree = match envelope.atree {
            Some(tree) => tree,
            None => {
                let mut tree = AccountTree::from_names(
                    trans.iter().map(|t| t.full_account_name.as_str()),
                    &envelope.delimiter,
                );
                tree.trim_excess_root();
                tree
            }
        };
        info!("Decoded datastore with {} transactions", trans.len());
        let store = Datastore::new(trans, tree, eras, envelope.trans_filename);
        Ok(store.filtered(filter))
    }
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub trans: EncodedTable,
    pub eras: EncodedTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atree: Option<AccountTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trans_filename: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "instant[ms]")]
    InstantMs,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "string")]
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub dtype: Dtype,
}

/// Column-typed table: a schema plus row-major cell values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedTable {
    pub schema: Vec<FieldSpec>,
    pub data: Vec<Vec<Value>>,
}

impl EncodedTable {
    fn column(&self, name: &str, dtype: Dtype) -> Result<usize> {
        let idx = self
            .schema
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| LedgerExplorerError::MissingColumn {
                source_name: "wire envelope".to_string(),
                column: name.to_string(),
            })?;
        if self.schema[idx].dtype != dtype {
            return Err(LedgerExplorerError::LoadError(format!(
                "column '{}' has dtype {:?}, expected {:?}",
                name, self.schema[idx].dtype, dtype
            )));
        }
        Ok(idx)
    }

    fn optional_column(&self, name: &str, dtype: Dtype) -> Result<Option<usize>> {
        if self.schema.iter().any(|f| f.name == name) {
            self.column(name, dtype).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn field(name: &str, dtype: Dtype) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        dtype,
    }
}

fn date_to_ms(date: NaiveDate) -> Value {
    let ms = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default();
    Value::from(ms)
}

fn ms_to_date(value: &Value) -> Option<NaiveDate> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.date_naive())
}

fn cell<'a>(row: &'a [Value], idx: usize) -> &'a Value {
    row.get(idx).unwrap_or(&Value::Null)
}

fn bad_cell(column: &str, row: usize, value: &Value) -> LedgerExplorerError {
    LedgerExplorerError::LoadError(format!("row {} has bad '{}' value {}", row, column, value))
}

fn encode_trans(trans: &Ledger) -> EncodedTable {
    EncodedTable {
        schema: vec![
            field(COL_DATE, Dtype::InstantMs),
            field(COL_AMOUNT, Dtype::Int64),
            field(COL_ACCOUNT, Dtype::String),
            field(COL_FULL_ACCOUNT_NAME, Dtype::String),
            field(COL_DESCRIPTION, Dtype::String),
        ],
        data: trans
            .iter()
            .map(|t| {
                vec![
                    date_to_ms(t.date),
                    Value::from(t.amount),
                    Value::from(t.account.clone()),
                    Value::from(t.full_account_name.clone()),
                    t.description.clone().map(Value::from).unwrap_or(Value::Null),
                ]
            })
            .collect(),
    }
}

fn decode_trans(table: &EncodedTable) -> Result<Ledger> {
    let date = table.column(COL_DATE, Dtype::InstantMs)?;
    let amount = table.column(COL_AMOUNT, Dtype::Int64)?;
    let account = table.column(COL_ACCOUNT, Dtype::String)?;
    let fan = table.column(COL_FULL_ACCOUNT_NAME, Dtype::String)?;
    let desc = table.optional_column(COL_DESCRIPTION, Dtype::String)?;

    let mut rows = Vec::with_capacity(table.data.len());
    for (i, row) in table.data.iter().enumerate() {
        let d = ms_to_date(cell(row, date)).ok_or_else(|| bad_cell(COL_DATE, i, cell(row, date)))?;
        let a = cell(row, amount)
            .as_i64()
            .ok_or_else(|| bad_cell(COL_AMOUNT, i, cell(row, amount)))?;
        let acc = cell(row, account)
            .as_str()
            .ok_or_else(|| bad_cell(COL_ACCOUNT, i, cell(row, account)))?;
        let path = cell(row, fan).as_str().unwrap_or_default();
        let mut tx = Transaction::new(d, a, acc, path);
        tx.description = desc.and_then(|c| cell(row, c).as_str()).map(str::to_string);
        rows.push(tx);
    }
    Ok(Ledger::new(rows))
}

fn encode_eras(eras: &Eras) -> EncodedTable {
    EncodedTable {
        schema: vec![
            field(COL_ERA_NAME, Dtype::String),
            field(COL_DATE_START, Dtype::InstantMs),
            field(COL_DATE_END, Dtype::InstantMs),
        ],
        data: eras
            .iter()
            .map(|e| {
                vec![
                    Value::from(e.name.clone()),
                    date_to_ms(e.date_start),
                    date_to_ms(e.date_end),
                ]
            })
            .collect(),
    }
}

fn decode_eras(table: &EncodedTable) -> Result<Eras> {
    if table.schema.is_empty() {
        return Ok(Eras::default());
    }
    let name = table.column(COL_ERA_NAME, Dtype::String)?;
    let start = table.column(COL_DATE_START, Dtype::InstantMs)?;
    let end = table.column(COL_DATE_END, Dtype::InstantMs)?;
    let mut eras = Vec::with_capacity(table.data.len());
    for (i, row) in table.data.iter().enumerate() {
        let n = cell(row, name).as_str().unwrap_or_default();
        let s = ms_to_date(cell(row, start)).ok_or_else(|| bad_cell(COL_DATE_START, i, cell(row, start)))?;
        let e = ms_to_date(cell(row, end)).ok_or_else(|| bad_cell(COL_DATE_END, i, cell(row, end)))?;
        eras.push(Era::new(n, s, e));
    }
    Eras::new(eras)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Datastore {
        let paths = ["Assets:Bank:Checking", "Assets:Cash", "Expenses:Food"];
        let tree = AccountTree::from_names(paths, ":");
        let trans = Ledger::new(vec![
            Transaction::new(date(2020, 1, 5), 100, "Checking", "Assets:Bank:Checking"),
            Transaction::new(date(2020, 3, 1), 20, "Cash", "Assets:Cash")
                .with_description("atm"),
            Transaction::new(date(2021, 7, 9), 35, "Food", "Expenses:Food"),
        ]);
        let eras = Eras::new(vec![Era::new("all", date(2020, 1, 1), date(2021, 12, 31))]).unwrap();
        Datastore::new(trans, tree, eras, Some("trans.csv".into()))
    }

    #[test]
    fn test_extents_and_len() {
        let ds = sample();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.extent(), Some((date(2020, 1, 5), date(2021, 7, 9))));
        assert!(Datastore::default().is_empty());
        assert_eq!(Datastore::default().extent(), None);
    }

    #[test]
    fn test_json_envelope_round_trip() {
        let ds = sample();
        let json = ds.to_json().unwrap();
        assert!(json.contains("instant[ms]"));
        assert!(json.contains("int64"));
        let back = Datastore::from_json(&json, &[]).unwrap();
        assert_eq!(back.trans(), ds.trans());
        assert_eq!(back.eras(), ds.eras());
        assert_eq!(back.tree().dict_of_paths(), ds.tree().dict_of_paths());
        assert_eq!(back.trans_filename(), Some("trans.csv"));
    }

    #[test]
    fn test_from_json_with_filter_prunes_tree_and_extent() {
        let json = sample().to_json().unwrap();
        let ds = Datastore::from_json(&json, &["Assets".to_string()]).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(!ds.tree().contains("Food"));
        assert_eq!(ds.tree().root_id(), "Assets");
        assert_eq!(ds.latest_trans(), Some(date(2020, 3, 1)));
    }

    #[test]
    fn test_tree_is_rebuilt_when_envelope_has_none() {
        let json = sample().to_json().unwrap();
        let mut value: Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().remove("atree");
        let ds = Datastore::from_json(&value.to_string(), &[]).unwrap();
        assert_eq!(ds.tree().parent("Checking"), Some("Bank"));
    }

    #[test]
    fn test_dtype_mismatch_is_a_load_error() {
        let json = sample().to_json().unwrap();
        let broken = json.replace("\"int64\"", "\"string\"");
        let err = Datastore::from_json(&broken, &[]).unwrap_err();
        assert!(err.is_load_error());
    }

    #[test]
    fn test_summary() {
        let summary = sample().summary();
        assert_eq!(summary.transactions, 3);
        assert_eq!(summary.accounts, 3);
        assert_eq!(summary.total, 155);
        assert_eq!(summary.filename.as_deref(), Some("trans.csv"));
    }
}
