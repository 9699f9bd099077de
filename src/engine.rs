//! Periodic bar and cumulative area producers.
//!
//! Both start from the same preparation: the rows of one account (and, when
//! `deep`, its descendants) grouped by the bucket their date falls in.

use crate::account_tree::AccountTree;
use crate::eras::Eras;
use crate::error::{LedgerExplorerError, Result};
use crate::ledger::{prorate_factor, Ledger, Transaction};
use crate::palette::Palette;
use crate::periods::{periods_between, Period};
use crate::schema::{TimeResolution, TimeSpan};
use crate::utils::{format_amount, DAYS_PER_MONTH};
use chrono::{Days, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceType {
    EraBinned,
    PeriodicBinned,
    None,
}

impl TraceType {
    pub fn resolve(resolution: TimeResolution, eras: &Eras) -> Self {
        match resolution {
            TimeResolution::Era if !eras.is_empty() => TraceType::EraBinned,
            TimeResolution::Era => TraceType::None,
            _ => TraceType::PeriodicBinned,
        }
    }
}

/// One non-empty bucket of a bar trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPoint {
    pub label: String,
    pub value: f64,
    /// Bucket width in days; only era bars have variable widths.
    pub width: Option<i64>,
    /// Bar centre on a date axis; only set for era bars.
    pub midpoint: Option<NaiveDate>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub account: String,
    pub hover_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarTrace {
    pub account: String,
    pub name: String,
    pub color: String,
    pub trace_type: TraceType,
    pub points: Vec<BarPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarOptions {
    pub resolution: TimeResolution,
    pub span: TimeSpan,
    pub color_index: usize,
    /// Include the account's descendants.
    pub deep: bool,
    pub unit: String,
}

impl Default for BarOptions {
    fn default() -> Self {
        Self {
            resolution: TimeResolution::Year,
            span: TimeSpan::Monthly,
            color_index: 0,
            deep: true,
            unit: "$".to_string(),
        }
    }
}

fn span_suffix(span: TimeSpan) -> &'static str {
    match span {
        TimeSpan::Total => "",
        TimeSpan::Annual => " per year",
        TimeSpan::Monthly => " per month",
    }
}

fn display_name(tree: &AccountTree, account: &str) -> String {
    tree.node(account)
        .map(|n| n.tag.clone())
        .unwrap_or_else(|| account.to_string())
}

/// Rows booked to `account`, plus its descendants when `deep`.
pub fn select_rows<'a>(
    trans: &'a Ledger,
    tree: &AccountTree,
    account: &str,
    deep: bool,
) -> Vec<&'a Transaction> {
    let accounts: HashSet<String> = if deep {
        tree.subtree_ids(account)
    } else {
        HashSet::from([account.to_string()])
    };
    trans.iter().filter(|t| accounts.contains(&t.account)).collect()
}

pub fn periodic_bars(
    trans: &Ledger,
    tree: &AccountTree,
    eras: &Eras,
    account: &str,
    opts: &BarOptions,
) -> Result<BarTrace> {
    if !tree.contains(account) {
        return Err(LedgerExplorerError::UnknownAccount(account.to_string()));
    }
    let rows = select_rows(trans, tree, account, opts.deep);
    let trace_type = TraceType::resolve(opts.resolution, eras);
    let name = display_name(tree, account);

    let points = match trace_type {
        TraceType::PeriodicBinned => periodic_points(&rows, account, &name, opts)?,
        TraceType::EraBinned => {
            let latest = trans.date_extent().map(|(_, latest)| latest);
            era_points(&rows, eras, latest, account, &name, opts)?
        }
        TraceType::None => {
            debug!("No eras loaded; no bars for '{}'", account);
            Vec::new()
        }
    };

    Ok(BarTrace {
        account: account.to_string(),
        name,
        color: Palette::default().color(opts.color_index).to_string(),
        trace_type,
        points,
    })
}

fn periodic_points(
    rows: &[&Transaction],
    account: &str,
    name: &str,
    opts: &BarOptions,
) -> Result<Vec<BarPoint>> {
    let factor = prorate_factor(opts.span, Some(opts.resolution), None)?;
    let mut buckets: BTreeMap<Period, i64> = BTreeMap::new();
    for tx in rows {
        *buckets
            .entry(Period::containing(tx.date, opts.resolution)?)
            .or_insert(0) += tx.amount;
    }
    Ok(buckets
        .into_iter()
        .map(|(period, sum)| {
            let label = period.label(opts.resolution);
            let value = sum as f64 * factor;
            BarPoint {
                hover_text: format!(
                    "{}, {}: {}{}",
                    name,
                    label,
                    format_amount(value, &opts.unit),
                    span_suffix(opts.span)
                ),
                label,
                value,
                width: None,
                midpoint: None,
                period_start: period.start,
                period_end: period.end,
                account: account.to_string(),
            }
        })
        .collect())
}

/// Era bins from [`Eras::windows`]: each era runs until the next one starts,
/// and the last ends on the ledger's latest row.
fn era_points(
    rows: &[&Transaction],
    eras: &Eras,
    latest: Option<NaiveDate>,
    account: &str,
    name: &str,
    opts: &BarOptions,
) -> Result<Vec<BarPoint>> {
    let Some(latest) = latest.filter(|_| !rows.is_empty()) else {
        return Ok(Vec::new());
    };
    let windows = eras.windows(latest);

    let mut sums = vec![0i64; windows.len()];
    let mut counts = vec![0usize; windows.len()];
    for tx in rows {
        let idx = windows.partition_point(|w| w.start <= tx.date);
        if idx == 0 || tx.date > windows[idx - 1].end {
            continue;
        }
        sums[idx - 1] += tx.amount;
        counts[idx - 1] += 1;
    }

    let mut points = Vec::new();
    for (i, window) in windows.iter().enumerate() {
        if counts[i] == 0 {
            continue;
        }
        let (start, label) = (window.start, window.label);
        let width = (window.end - start).num_days() + 1;
        let bucket_months = width as f64 / DAYS_PER_MONTH;
        let factor = prorate_factor(opts.span, Some(TimeResolution::Era), Some(bucket_months))?;
        let value = sums[i] as f64 * factor;
        points.push(BarPoint {
            label: label.to_string(),
            value,
            width: Some(width),
            midpoint: start.checked_add_days(Days::new((width / 2) as u64)),
            period_start: start,
            period_end: window.end,
            account: account.to_string(),
            hover_text: format!(
                "{}, {}: {}{}",
                name,
                label,
                format_amount(value, &opts.unit),
                span_suffix(opts.span)
            ),
        });
    }
    Ok(points)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaSeries {
    pub account: String,
    pub name: String,
    pub color: String,
    /// `(bucket end, running total)`, one point per bucket with no gaps.
    pub points: Vec<(NaiveDate, f64)>,
}

fn cumulative_on_axis(rows: &[&Transaction], axis: &[Period]) -> Vec<(NaiveDate, f64)> {
    let mut running = 0i64;
    let mut sorted: Vec<&&Transaction> = rows.iter().collect();
    sorted.sort_by_key(|t| t.date);
    let mut it = sorted.into_iter().peekable();
    axis.iter()
        .map(|period| {
            while let Some(tx) = it.next_if(|t| t.date <= period.end) {
                running += tx.amount;
            }
            (period.end, running as f64)
        })
        .collect()
}

fn require_periodic(resolution: TimeResolution) -> Result<()> {
    if resolution.is_periodic() {
        Ok(())
    } else {
        Err(LedgerExplorerError::InvalidTimeKeyword(format!(
            "cumulative areas need a periodic resolution, got '{}'",
            resolution
        )))
    }
}

/// Running balance of one account's subtree, resampled to `resolution`.
pub fn cumulative_area(
    trans: &Ledger,
    tree: &AccountTree,
    account: &str,
    color_index: usize,
    resolution: TimeResolution,
) -> Result<AreaSeries> {
    require_periodic(resolution)?;
    if !tree.contains(account) {
        return Err(LedgerExplorerError::UnknownAccount(account.to_string()));
    }
    let rows = select_rows(trans, tree, account, true);
    let axis = match (rows.iter().map(|t| t.date).min(), rows.iter().map(|t| t.date).max()) {
        (Some(first), Some(last)) => periods_between(first, last, resolution)?,
        _ => Vec::new(),
    };
    Ok(AreaSeries {
        account: account.to_string(),
        name: display_name(tree, account),
        color: Palette::default().color(color_index).to_string(),
        points: cumulative_on_axis(&rows, &axis),
    })
}

/// One cumulative series per child of `root` on a shared date axis, ready
/// to stack. A leaf root yields a single series for itself.
pub fn cumulative_areas_for_root(
    trans: &Ledger,
    tree: &AccountTree,
    root: &str,
    resolution: TimeResolution,
) -> Result<Vec<AreaSeries>> {
    require_periodic(resolution)?;
    if !tree.contains(root) {
        return Err(LedgerExplorerError::UnknownAccount(root.to_string()));
    }
    let all_rows = select_rows(trans, tree, root, true);
    let axis = match (
        all_rows.iter().map(|t| t.date).min(),
        all_rows.iter().map(|t| t.date).max(),
    ) {
        (Some(first), Some(last)) => periods_between(first, last, resolution)?,
        _ => return Ok(Vec::new()),
    };

    let mut members = tree.get_children(root);
    if members.is_empty() {
        members.push(root.to_string());
    }
    Ok(members
        .iter()
        .enumerate()
        .map(|(i, account)| {
            let rows = select_rows(trans, tree, account, true);
            AreaSeries {
                account: account.clone(),
                name: display_name(tree, account),
                color: Palette::default().color(i).to_string(),
                points: cumulative_on_axis(&rows, &axis),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eras::EraRow;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture() -> (Ledger, AccountTree) {
        let tree = AccountTree::from_names(["Expenses:Food", "Expenses:Rent", "Income:Salary"], ":");
        let trans = Ledger::new(vec![
            Transaction::new(date(2019, 1, 15), 30, "Food", "Expenses:Food"),
            Transaction::new(date(2019, 2, 15), 40, "Food", "Expenses:Food"),
            Transaction::new(date(2019, 2, 1), 900, "Rent", "Expenses:Rent"),
            Transaction::new(date(2019, 5, 1), 10, "Expenses", "Expenses"),
            Transaction::new(date(2020, 1, 1), 2000, "Salary", "Income:Salary"),
        ]);
        (trans, tree)
    }

    fn opts(resolution: TimeResolution, span: TimeSpan) -> BarOptions {
        BarOptions {
            resolution,
            span,
            ..BarOptions::default()
        }
    }

    #[test]
    fn test_monthly_bars_total_span() {
        let (trans, tree) = fixture();
        let trace = periodic_bars(
            &trans,
            &tree,
            &Eras::default(),
            "Expenses",
            &opts(TimeResolution::Month, TimeSpan::Total),
        )
        .unwrap();
        assert_eq!(trace.trace_type, TraceType::PeriodicBinned);
        let labels: Vec<&str> = trace.points.iter().map(|p| p.label.as_str()).collect();
        // Empty months are not emitted.
        assert_eq!(labels, vec!["2019-Jan", "2019-Feb", "2019-May"]);
        assert_eq!(trace.points[1].value, 940.0);
        assert_eq!(trace.color, "#3366CC");
    }

    #[test]
    fn test_shallow_bars_only_count_own_rows() {
        let (trans, tree) = fixture();
        let mut o = opts(TimeResolution::Year, TimeSpan::Total);
        o.deep = false;
        let trace = periodic_bars(&trans, &tree, &Eras::default(), "Expenses", &o).unwrap();
        assert_eq!(trace.points.len(), 1);
        assert_eq!(trace.points[0].value, 10.0);
    }

    #[test]
    fn test_quarter_bars_prorated_monthly() {
        let (trans, tree) = fixture();
        let trace = periodic_bars(
            &trans,
            &tree,
            &Eras::default(),
            "Expenses",
            &opts(TimeResolution::Quarter, TimeSpan::Monthly),
        )
        .unwrap();
        assert_eq!(trace.points[0].label, "2019-Q1");
        assert!((trace.points[0].value - 970.0 / 3.0).abs() < 1e-9);
        assert_eq!(trace.points[0].period_end, date(2019, 3, 31));
        assert!(trace.points[0].hover_text.ends_with("per month"));
    }

    #[test]
    fn test_era_bins_extend_to_latest_row() {
        let tree = AccountTree::from_names(["Expenses:Food"], ":");
        let trans = Ledger::new(vec![
            Transaction::new(date(2017, 6, 1), 100, "Food", "Expenses:Food"),
            Transaction::new(date(2018, 3, 1), 200, "Food", "Expenses:Food"),
            Transaction::new(date(2019, 2, 1), 300, "Food", "Expenses:Food"),
        ]);
        let eras = Eras::from_rows(
            vec![
                EraRow::new("e1", None, Some(date(2017, 12, 31))),
                EraRow::new("e2", Some(date(2018, 1, 1)), Some(date(2018, 8, 31))),
                EraRow::new("e3", Some(date(2018, 9, 1)), None),
            ],
            trans.date_extent(),
        )
        .unwrap();
        let trace = periodic_bars(
            &trans,
            &tree,
            &eras,
            "Food",
            &opts(TimeResolution::Era, TimeSpan::Total),
        )
        .unwrap();
        let got: Vec<(&str, f64)> = trace.points.iter().map(|p| (p.label.as_str(), p.value)).collect();
        assert_eq!(got, vec![("e1", 100.0), ("e2", 200.0), ("e3", 300.0)]);
        let e3 = &trace.points[2];
        assert_eq!(e3.period_end, date(2019, 2, 1));
        assert_eq!(e3.width, Some(154));
        assert_eq!(e3.midpoint, Some(date(2018, 11, 17)));
    }

    #[test]
    fn test_era_last_label_dropped_when_data_ends_early() {
        let tree = AccountTree::from_names(["A:B"], ":");
        let trans = Ledger::new(vec![Transaction::new(date(2018, 2, 1), 5, "B", "A:B")]);
        let eras = Eras::new(vec![
            crate::eras::Era::new("early", date(2018, 1, 1), date(2018, 6, 30)),
            crate::eras::Era::new("late", date(2019, 1, 1), date(2019, 12, 31)),
        ])
        .unwrap();
        let trace = periodic_bars(&trans, &tree, &eras, "B", &opts(TimeResolution::Era, TimeSpan::Total)).unwrap();
        assert_eq!(trace.points.len(), 1);
        assert_eq!(trace.points[0].label, "early");
        assert_eq!(trace.points[0].period_end, date(2018, 12, 31));
    }

    #[test]
    fn test_era_without_eras_produces_nothing() {
        let (trans, tree) = fixture();
        let trace = periodic_bars(
            &trans,
            &tree,
            &Eras::default(),
            "Expenses",
            &opts(TimeResolution::Era, TimeSpan::Monthly),
        )
        .unwrap();
        assert_eq!(trace.trace_type, TraceType::None);
        assert!(trace.points.is_empty());
    }

    #[test]
    fn test_unknown_account() {
        let (trans, tree) = fixture();
        assert!(matches!(
            periodic_bars(&trans, &tree, &Eras::default(), "Nope", &BarOptions::default()),
            Err(LedgerExplorerError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_cumulative_area_is_dense() {
        let (trans, tree) = fixture();
        let area = cumulative_area(&trans, &tree, "Food", 2, TimeResolution::Month).unwrap();
        assert_eq!(
            area.points,
            vec![(date(2019, 1, 31), 30.0), (date(2019, 2, 28), 70.0)]
        );
        assert!(cumulative_area(&trans, &tree, "Food", 0, TimeResolution::Era).is_err());
    }

    #[test]
    fn test_areas_for_root_share_an_axis() {
        let (trans, tree) = fixture();
        let series = cumulative_areas_for_root(&trans, &tree, "Expenses", TimeResolution::Month).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points.len(), series[1].points.len());
        assert_eq!(series[0].points.len(), 5);
        let rent = series.iter().find(|s| s.account == "Rent").unwrap();
        assert_eq!(rent.points[0], (date(2019, 1, 31), 0.0));
        assert_eq!(rent.points[4], (date(2019, 5, 31), 900.0));
    }
}
