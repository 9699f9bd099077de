use crate::error::{LedgerExplorerError, Result};
use crate::frame::{
    COL_ACCOUNT, COL_AMOUNT, COL_DATE, COL_DESCRIPTION, COL_FULL_ACCOUNT_NAME, COL_PARENT_ACCOUNT,
};
use crate::DEFAULT_DELIMITER;
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    #[schemars(description = "Calendar decades, e.g. 2010-01-01 through 2019-12-31")]
    Decade,

    #[schemars(description = "Calendar years")]
    Year,

    #[schemars(description = "Calendar quarters")]
    Quarter,

    #[schemars(description = "Calendar months")]
    Month,

    #[schemars(description = "User-defined eras loaded from the eras file")]
    Era,
}

impl TimeResolution {
    /// Periodic resolutions, coarsest first. `Era` is not periodic.
    pub const PERIODIC: [TimeResolution; 4] = [
        TimeResolution::Decade,
        TimeResolution::Year,
        TimeResolution::Quarter,
        TimeResolution::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeResolution::Decade => "decade",
            TimeResolution::Year => "year",
            TimeResolution::Quarter => "quarter",
            TimeResolution::Month => "month",
            TimeResolution::Era => "era",
        }
    }

    /// Resample keyword of the resolution (`10A`, `A`, `Q`, `M`).
    pub fn resample_keyword(&self) -> Option<&'static str> {
        match self {
            TimeResolution::Decade => Some("10A"),
            TimeResolution::Year => Some("A"),
            TimeResolution::Quarter => Some("Q"),
            TimeResolution::Month => Some("M"),
            TimeResolution::Era => None,
        }
    }

    /// Number of months in one bucket, or `None` for eras whose length varies.
    pub fn months(&self) -> Option<u32> {
        match self {
            TimeResolution::Decade => Some(120),
            TimeResolution::Year => Some(12),
            TimeResolution::Quarter => Some(3),
            TimeResolution::Month => Some(1),
            TimeResolution::Era => None,
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.months().is_some()
    }
}

impl fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeResolution {
    type Err = LedgerExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decade" | "10a" => Ok(TimeResolution::Decade),
            "year" | "a" => Ok(TimeResolution::Year),
            "quarter" | "q" => Ok(TimeResolution::Quarter),
            "month" | "m" => Ok(TimeResolution::Month),
            "era" => Ok(TimeResolution::Era),
            _ => Err(LedgerExplorerError::InvalidTimeKeyword(format!(
                "unknown time resolution '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeSpan {
    #[schemars(description = "Raw bucket sums, no proration")]
    Total,

    #[schemars(description = "Bucket sums converted to a per-year rate")]
    Annual,

    #[schemars(description = "Bucket sums converted to a per-month rate")]
    Monthly,
}

impl TimeSpan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSpan::Total => "total",
            TimeSpan::Annual => "annual",
            TimeSpan::Monthly => "monthly",
        }
    }

    /// Length of the target span in months; `None` for `Total`.
    pub fn months(&self) -> Option<u32> {
        match self {
            TimeSpan::Total => None,
            TimeSpan::Annual => Some(12),
            TimeSpan::Monthly => Some(1),
        }
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSpan {
    type Err = LedgerExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "total" => Ok(TimeSpan::Total),
            "annual" | "annualized" => Ok(TimeSpan::Annual),
            "monthly" => Ok(TimeSpan::Monthly),
            _ => Err(LedgerExplorerError::InvalidTimeKeyword(format!(
                "unknown time span '{}'",
                s
            ))),
        }
    }
}

/// Session configuration. Every field is optional on input and falls back to
/// its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct Params {
    #[schemars(description = "Header of the leaf account column in the transactions file")]
    pub account_label: String,

    #[schemars(description = "Header of the amount column")]
    pub amount_label: String,

    #[schemars(description = "Header of the date column")]
    pub date_label: String,

    #[schemars(description = "Header of the description column")]
    pub desc_label: String,

    #[schemars(description = "Header of the full account name column")]
    pub fan_label: String,

    #[schemars(description = "Header of the parent account column")]
    pub parent_label: String,

    pub unit: String,
    pub ds_data_title: String,
    pub ds_delimiter: String,

    pub ds_label: String,
    pub bs_label: String,
    pub ex_label: String,
    pub tr_label: String,

    #[schemars(description = "Root accounts shown on the cash-flow tab")]
    pub ex_roots: Vec<String>,

    #[schemars(description = "Root accounts shown on the balance-sheet tab")]
    pub bs_roots: Vec<String>,

    #[schemars(
        description = "Root accounts whose subtree amounts are negated on load (credit-normal accounts)"
    )]
    pub flip_negative_roots: Vec<String>,

    pub init_time_res: TimeResolution,
    pub init_time_span: TimeSpan,

    #[schemars(description = "URL of the transactions file")]
    pub transu: Option<String>,

    #[schemars(description = "URL of the account tree file")]
    pub atreeu: Option<String>,

    #[schemars(description = "URL of the eras file")]
    pub erasu: Option<String>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            account_label: "Account Name".to_string(),
            amount_label: "Amount Num.".to_string(),
            date_label: "Date".to_string(),
            desc_label: "Description".to_string(),
            fan_label: "Full Account Name".to_string(),
            parent_label: "Parent Account".to_string(),
            unit: "$".to_string(),
            ds_data_title: "Ledger".to_string(),
            ds_delimiter: DEFAULT_DELIMITER.to_string(),
            ds_label: "Data Source".to_string(),
            bs_label: "Balance Sheet".to_string(),
            ex_label: "Cash Flow".to_string(),
            tr_label: "Transactions".to_string(),
            ex_roots: to_tuple(&["Income", "Expenses"]),
            bs_roots: to_tuple(&["Assets", "Liabilities", "Equity"]),
            flip_negative_roots: to_tuple(&["Equity", "Expenses", "Income", "Liabilities"]),
            init_time_res: TimeResolution::Year,
            init_time_span: TimeSpan::Monthly,
            transu: None,
            atreeu: None,
            erasu: None,
        }
    }
}

fn to_tuple(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn parse_tuple(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Params {
    /// Applies `name=value` pairs (as found in a URL query string) over the
    /// defaults. Tuple-valued fields take comma-separated values.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Params::default();
        for (key, value) in pairs {
            params.set(key.as_ref(), value.as_ref())?;
        }
        Ok(params)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let text = value.to_string();
        match key {
            "account_label" => self.account_label = text,
            "amount_label" => self.amount_label = text,
            "date_label" => self.date_label = text,
            "desc_label" => self.desc_label = text,
            "fan_label" => self.fan_label = text,
            "parent_label" => self.parent_label = text,
            "unit" => self.unit = text,
            "ds_data_title" => self.ds_data_title = text,
            "ds_delimiter" => self.ds_delimiter = text,
            "ds_label" => self.ds_label = text,
            "bs_label" => self.bs_label = text,
            "ex_label" => self.ex_label = text,
            "tr_label" => self.tr_label = text,
            "ex_roots" => self.ex_roots = parse_tuple(value),
            "bs_roots" => self.bs_roots = parse_tuple(value),
            "flip_negative_roots" => self.flip_negative_roots = parse_tuple(value),
            "init_time_res" => self.init_time_res = value.parse()?,
            "init_time_span" => self.init_time_span = value.parse()?,
            "transu" => self.transu = Some(text),
            "atreeu" => self.atreeu = Some(text),
            "erasu" => self.erasu = Some(text),
            other => warn!("Ignoring unrecognized parameter '{}'", other),
        }
        Ok(())
    }

    /// Map from lowercased user column headers to the canonical column names
    /// the loader works with.
    pub fn column_mapping(&self) -> Vec<(String, &'static str)> {
        vec![
            (self.account_label.to_lowercase(), COL_ACCOUNT),
            (self.amount_label.to_lowercase(), COL_AMOUNT),
            (self.date_label.to_lowercase(), COL_DATE),
            (self.desc_label.to_lowercase(), COL_DESCRIPTION),
            (self.fan_label.to_lowercase(), COL_FULL_ACCOUNT_NAME),
            (self.parent_label.to_lowercase(), COL_PARENT_ACCOUNT),
        ]
    }

    pub fn delimiter(&self) -> &str {
        if self.ds_delimiter.is_empty() {
            DEFAULT_DELIMITER
        } else {
            &self.ds_delimiter
        }
    }
}
