//! Turns clicks on one view into an (accounts, date range) filter for the
//! others. Selection never fails on a bad click: it degrades to "all".

use crate::datastore::Datastore;
use crate::engine::BarPoint;
use crate::eras::Eras;
use crate::error::{LedgerExplorerError, Result};
use crate::ingestion::parse_date;
use crate::ledger::Ledger;
use crate::periods::Period;
use crate::schema::TimeResolution;
use crate::{LEAF_SUFFIX, SUBTOTAL_SUFFIX};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// The small value shared between views after each selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionProjection {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub count: usize,
    pub accounts: Vec<String>,
}

/// A clicked bar: the trace's account and the bar's x value, which is the
/// bucket label. Era bars also accept any date inside the bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarClick {
    pub account: String,
    pub x: String,
}

impl BarClick {
    pub fn new(account: &str, x: &str) -> Self {
        Self {
            account: account.to_string(),
            x: x.to_string(),
        }
    }
}

impl From<&BarPoint> for BarClick {
    fn from(point: &BarPoint) -> Self {
        Self::new(&point.account, &point.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionKind {
    All,
    Bars,
    Slice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub projection: SelectionProjection,
    pub transactions: Ledger,
    pub label: String,
    pub kind: SelectionKind,
}

/// Strips the burst's `[Leaf]` and `[Subtotal]` suffixes.
pub fn canonical_account(id: &str) -> &str {
    id.strip_suffix(LEAF_SUFFIX)
        .or_else(|| id.strip_suffix(SUBTOTAL_SUFFIX))
        .unwrap_or(id)
}

/// Date window of the bucket a bar click points at. Era windows match the
/// bars, so they need the latest transaction date.
pub fn period_for_click(
    x: &str,
    resolution: TimeResolution,
    eras: &Eras,
    latest: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate)> {
    if resolution == TimeResolution::Era {
        let latest = latest
            .ok_or_else(|| LedgerExplorerError::EmptyData("no transactions loaded".to_string()))?;
        let window = eras
            .window_for(x, parse_date(x), latest)
            .ok_or_else(|| LedgerExplorerError::DateError(format!("no era bar at '{}'", x)))?;
        return Ok((window.start, window.end));
    }
    let period = Period::parse_label(x, resolution)?;
    Ok((period.start, period.end))
}

fn describe(count: usize, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{} transaction{} from {} to {}",
        count,
        if count == 1 { "" } else { "s" },
        start,
        end
    )
}

fn build(
    ds: &Datastore,
    accounts: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    kind: SelectionKind,
) -> Selection {
    let mut keep: HashSet<String> = HashSet::new();
    for account in &accounts {
        keep.extend(ds.tree().subtree_ids(account));
    }
    let transactions = ds.trans().filter_accounts(&keep).filter_dates(start, end);
    let count = transactions.len();
    let label = match kind {
        SelectionKind::All => format!("All {}", describe(count, start, end)),
        _ => format!("{} in {}", describe(count, start, end), accounts.join(", ")),
    };
    Selection {
        projection: SelectionProjection {
            start,
            end,
            count,
            accounts,
        },
        transactions,
        label,
        kind,
    }
}

/// Every transaction within the data's extent.
pub fn select_all(ds: &Datastore) -> Result<Selection> {
    let (start, end) = ds
        .extent()
        .ok_or_else(|| LedgerExplorerError::EmptyData("no transactions loaded".to_string()))?;
    let accounts = vec![ds.tree().root_id().to_string()];
    let mut selection = build(ds, accounts, start, end, SelectionKind::All);
    // The root covers every account even when a row was never attached to the tree.
    selection.transactions = ds.trans().filter_dates(start, end);
    selection.projection.count = selection.transactions.len();
    selection.label = format!("All {}", describe(selection.projection.count, start, end));
    Ok(selection)
}

/// Multi-select over bars: the window spans the earliest start to the latest
/// end and the accounts accumulate. Clicks that cannot be resolved are
/// skipped; if none resolve, everything is selected.
pub fn select_bars(
    ds: &Datastore,
    clicks: &[BarClick],
    resolution: TimeResolution,
) -> Result<Selection> {
    let mut accounts: BTreeSet<String> = BTreeSet::new();
    let mut window: Option<(NaiveDate, NaiveDate)> = None;
    let latest = ds.extent().map(|(_, latest)| latest);
    for click in clicks {
        let account = canonical_account(&click.account);
        if !ds.tree().contains(account) {
            warn!("Ignoring click on unknown account '{}'", click.account);
            continue;
        }
        let (start, end) = match period_for_click(&click.x, resolution, ds.eras(), latest) {
            Ok(range) => range,
            Err(e) => {
                warn!("Ignoring click at '{}': {}", click.x, e);
                continue;
            }
        };
        window = Some(match window {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
        accounts.insert(account.to_string());
    }

    let Some((start, end)) = window else {
        debug!("No usable bar clicks; selecting everything");
        return select_all(ds);
    };
    Ok(build(ds, accounts.into_iter().collect(), start, end, SelectionKind::Bars))
}

/// A sunburst click. `Other <parent>` resolves to the accounts folded into
/// it. The date window comes from the prior bar selection, or the full
/// extent.
pub fn select_slice(
    ds: &Datastore,
    id: &str,
    prior: Option<&SelectionProjection>,
    other_members: &BTreeMap<String, Vec<String>>,
) -> Result<Selection> {
    let accounts: Vec<String> = match other_members.get(id) {
        Some(members) => members
            .iter()
            .map(|m| canonical_account(m).to_string())
            .filter(|m| ds.tree().contains(m))
            .collect(),
        None => {
            let account = canonical_account(id);
            if ds.tree().contains(account) {
                vec![account.to_string()]
            } else {
                Vec::new()
            }
        }
    };
    if accounts.is_empty() {
        warn!("Slice '{}' matches no account; selecting everything", id);
        return select_all(ds);
    }

    let (start, end) = match prior {
        Some(p) => (p.start, p.end),
        None => ds
            .extent()
            .ok_or_else(|| LedgerExplorerError::EmptyData("no transactions loaded".to_string()))?,
    };
    Ok(build(ds, accounts, start, end, SelectionKind::Slice))
}
