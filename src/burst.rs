//! Sunburst preparation: a subtotal tree whose values are non-negative,
//! where every parent equals the sum of its children and every click target
//! is unambiguous.

use crate::account_tree::AccountTree;
use crate::error::{LedgerExplorerError, Result};
use crate::ledger::{positize, prorate_factor, Ledger};
use crate::palette::{Palette, ROOT_COLOR};
use crate::schema::{TimeResolution, TimeSpan};
use crate::selection::canonical_account;
use crate::MAX_SLICES;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstRecord {
    pub id: String,
    pub name: String,
    /// Empty for the centre of the burst.
    pub parent: String,
    pub value: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstFigure {
    pub records: Vec<BurstRecord>,
    pub title: String,
    /// Ids folded into each `Other <parent>` node.
    pub other_members: BTreeMap<String, Vec<String>>,
}

impl BurstFigure {
    pub fn record(&self, id: &str) -> Option<&BurstRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn root(&self) -> Option<&BurstRecord> {
        self.records.iter().find(|r| r.parent.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurstOptions {
    pub time_span: TimeSpan,
    pub factor: f64,
    /// Colours by top-level account id; the palette fills the rest.
    pub colormap: Option<HashMap<String, String>>,
    pub span_label: Option<String>,
    /// `None` leaves every ring uncapped.
    pub max_slices: Option<usize>,
}

impl Default for BurstOptions {
    fn default() -> Self {
        Self {
            time_span: TimeSpan::Total,
            factor: 1.0,
            colormap: None,
            span_label: None,
            max_slices: Some(MAX_SLICES),
        }
    }
}

/// Factor turning a sum over `duration_months` into the requested span.
pub fn burst_factor(time_span: TimeSpan, duration_months: f64) -> Result<f64> {
    prorate_factor(time_span, Some(TimeResolution::Era), Some(duration_months))
}

pub fn burst_figure(tree: &AccountTree, trans: &Ledger, opts: &BurstOptions) -> Result<BurstFigure> {
    let trans = positize(trans.clone());
    if trans.is_empty() {
        return Err(LedgerExplorerError::EmptyData("no transactions in selection".to_string()));
    }

    let mut subtotals = tree.clone();
    subtotals.append_sums_from_trans(&trans, opts.factor);
    subtotals.roll_up_subtotals(true);
    subtotals.trim_excess_root();
    subtotals.split_leaf_subtotals();

    let root_total = subtotals
        .node(subtotals.root_id())
        .and_then(|n| n.total)
        .unwrap_or(0.0);
    if root_total <= 0.0 {
        return Err(LedgerExplorerError::EmptyData(
            "selection has no positive total".to_string(),
        ));
    }

    let other_members = match opts.max_slices {
        Some(max) => subtotals.cap_fan_out(max),
        None => BTreeMap::new(),
    };
    subtotals.refresh_totals();

    let records = emit_records(&subtotals, opts.colormap.as_ref());
    check_records(&records)?;
    debug!(
        "Burst of {} records, {} folded rings",
        records.len(),
        other_members.len()
    );

    let title = match &opts.span_label {
        Some(label) => format!("{} ({})", label, opts.time_span),
        None => opts.time_span.to_string(),
    };
    Ok(BurstFigure {
        records,
        title,
        other_members,
    })
}

fn emit_records(tree: &AccountTree, colormap: Option<&HashMap<String, String>>) -> Vec<BurstRecord> {
    let palette = Palette::default();
    let root = tree.root_id().to_string();
    let ring_one = tree.get_children(&root);

    tree.walk()
        .into_iter()
        .filter_map(|id| {
            let node = tree.node(&id)?;
            let color = if id == root {
                ROOT_COLOR.to_string()
            } else {
                let lineage = tree.get_lineage(&id);
                let top = lineage.get(1).cloned().unwrap_or_else(|| id.clone());
                colormap
                    .and_then(|m| m.get(canonical_account(&top)))
                    .cloned()
                    .unwrap_or_else(|| {
                        let index = ring_one.iter().position(|c| *c == top).unwrap_or(0);
                        palette.color(index).to_string()
                    })
            };
            Some(BurstRecord {
                parent: tree.parent(&id).unwrap_or_default().to_string(),
                name: node.tag.clone(),
                value: node.total.unwrap_or(0.0),
                color,
                id,
            })
        })
        .collect()
}

/// Every value is non-negative and every parent equals the sum of its children.
fn check_records(records: &[BurstRecord]) -> Result<()> {
    let mut child_sums: HashMap<&str, f64> = HashMap::new();
    for record in records {
        if record.value < 0.0 {
            return Err(LedgerExplorerError::InternalInvariant(format!(
                "burst node '{}' has negative value {}",
                record.id, record.value
            )));
        }
        if !record.parent.is_empty() {
            *child_sums.entry(record.parent.as_str()).or_insert(0.0) += record.value;
        }
    }
    for record in records {
        if let Some(sum) = child_sums.get(record.id.as_str()) {
            if (sum - record.value).abs() > TOLERANCE * record.value.abs().max(1.0) {
                warn!("Burst subtotal mismatch at '{}'", record.id);
                return Err(LedgerExplorerError::InternalInvariant(format!(
                    "burst node '{}' has value {} but its children sum to {}",
                    record.id, record.value, sum
                )));
            }
        }
    }
    Ok(())
}
