//! Tab-level controller: owns the published datastore and the selection,
//! drives the Empty/Loaded/BarFiltered/SliceFiltered state machine, and
//! renders every view with per-view error containment.

use crate::burst::{burst_factor, burst_figure, BurstFigure, BurstOptions};
use crate::datastore::{DataSummary, Datastore};
use crate::engine::{cumulative_areas_for_root, periodic_bars, AreaSeries, BarOptions, BarTrace};
use crate::error::{LedgerExplorerError, Result};
use crate::frame::Source;
use crate::ingestion::Loader;
use crate::ledger::Ledger;
use crate::schema::{Params, TimeResolution, TimeSpan};
use crate::selection::{self, BarClick, Selection, SelectionKind, SelectionProjection};
use crate::table::TransactionTable;
use crate::utils::span_in_months;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

const NO_DATA: &str = "no data in selection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Empty,
    Loaded,
    BarFiltered,
    SliceFiltered,
}

/// A rendered view, or the message shown in its place.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome<T> {
    Ready(T),
    Empty { message: String },
}

impl<T> ViewOutcome<T> {
    fn contain(view: &str, result: Result<T>) -> Self {
        match result {
            Ok(value) => ViewOutcome::Ready(value),
            Err(LedgerExplorerError::EmptyData(_)) => ViewOutcome::empty(NO_DATA),
            Err(e) => {
                if e.is_recoverable_in_view() {
                    debug!("{} view: {}", view, e);
                } else {
                    warn!("{} view failed: {}", view, e);
                }
                ViewOutcome::empty(&e.to_string())
            }
        }
    }

    pub fn empty(message: &str) -> Self {
        ViewOutcome::Empty {
            message: message.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ViewOutcome::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            ViewOutcome::Ready(value) => Some(value),
            ViewOutcome::Empty { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ViewOutcome::Ready(_) => None,
            ViewOutcome::Empty { message } => Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerViews {
    pub bars: ViewOutcome<Vec<BarTrace>>,
    pub areas: ViewOutcome<Vec<AreaSeries>>,
    pub burst: ViewOutcome<BurstFigure>,
    pub table: ViewOutcome<TransactionTable>,
    pub summary: DataSummary,
}

/// A value replaced as a whole. Readers get the old or the new value, never
/// a mix.
#[derive(Debug, Default)]
pub struct Snapshot<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, value: T) {
        let next = Arc::new(value);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

#[derive(Debug)]
struct SlotState<T> {
    generation: u64,
    value: Option<Arc<T>>,
}

/// Output slot of one view. Each request takes a ticket; a result is kept
/// only if no newer request began in the meantime.
#[derive(Debug)]
pub struct ViewSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Default for ViewSlot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState {
                generation: 0,
                value: None,
            }),
        }
    }
}

impl<T> ViewSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a request, superseding any in flight.
    pub fn begin(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.generation
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
            == ticket
    }

    /// Publishes `value` if `ticket` is still the latest. Superseded values
    /// are dropped and give `None`.
    pub fn complete(&self, ticket: u64, value: T) -> Option<Arc<T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != ticket {
            debug!(
                "Discarding superseded result {} (current is {})",
                ticket, state.generation
            );
            return None;
        }
        let value = Arc::new(value);
        state.value = Some(Arc::clone(&value));
        Some(value)
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .value
            .clone()
    }
}

pub struct Explorer {
    params: Params,
    datastore: Snapshot<Datastore>,
    projection: Snapshot<Option<SelectionProjection>>,
    state: TabState,
    resolution: TimeResolution,
    span: TimeSpan,
    bar_selection: Option<Selection>,
    slice_selection: Option<Selection>,
    other_members: BTreeMap<String, Vec<String>>,
    views: ViewSlot<ExplorerViews>,
}

impl Explorer {
    pub fn new(params: Params) -> Self {
        Self {
            resolution: params.init_time_res,
            span: params.init_time_span,
            params,
            datastore: Snapshot::default(),
            projection: Snapshot::default(),
            state: TabState::Empty,
            bar_selection: None,
            slice_selection: None,
            other_members: BTreeMap::new(),
            views: ViewSlot::new(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    pub fn resolution(&self) -> TimeResolution {
        self.resolution
    }

    pub fn span(&self) -> TimeSpan {
        self.span
    }

    pub fn datastore(&self) -> Arc<Datastore> {
        self.datastore.load()
    }

    pub fn projection(&self) -> Option<SelectionProjection> {
        (*self.projection.load()).clone()
    }

    /// The most specific active selection.
    pub fn selection(&self) -> Option<&Selection> {
        self.slice_selection.as_ref().or(self.bar_selection.as_ref())
    }

    /// Reads the uploads. On failure the previously published datastore and
    /// selection stay in place.
    pub fn load(&mut self, trans: &Source, tree: Option<&Source>, eras: Option<&Source>) -> Result<()> {
        let datastore = Loader::new(&self.params).load(trans, tree, eras)?;
        self.publish(datastore);
        Ok(())
    }

    pub fn publish(&mut self, datastore: Datastore) {
        info!("Publishing datastore with {} transactions", datastore.len());
        self.datastore.publish(datastore);
        self.reset_selection();
        self.state = TabState::Loaded;
    }

    pub fn set_resolution(&mut self, resolution: TimeResolution) {
        self.resolution = resolution;
    }

    pub fn set_span(&mut self, span: TimeSpan) {
        self.span = span;
    }

    /// Applies the full set of currently selected bars.
    pub fn select_bars(&mut self, clicks: &[BarClick]) -> Result<Selection> {
        self.require_loaded()?;
        let ds = self.datastore();
        let selection = selection::select_bars(&ds, clicks, self.resolution)?;
        self.slice_selection = None;
        if selection.kind == SelectionKind::Bars {
            self.bar_selection = Some(selection.clone());
            self.state = TabState::BarFiltered;
        } else {
            self.bar_selection = None;
            self.state = TabState::Loaded;
        }
        self.projection.publish(Some(selection.projection.clone()));
        Ok(selection)
    }

    pub fn select_slice(&mut self, id: &str) -> Result<Selection> {
        self.require_loaded()?;
        let ds = self.datastore();
        let prior = self.bar_selection.as_ref().map(|s| &s.projection);
        let selection = selection::select_slice(&ds, id, prior, &self.other_members)?;
        if selection.kind == SelectionKind::Slice {
            self.slice_selection = Some(selection.clone());
            self.state = TabState::SliceFiltered;
        } else {
            self.slice_selection = None;
        }
        self.projection.publish(Some(selection.projection.clone()));
        Ok(selection)
    }

    pub fn clear(&mut self) {
        self.reset_selection();
        if self.state != TabState::Empty {
            self.state = TabState::Loaded;
        }
    }

    fn reset_selection(&mut self) {
        self.bar_selection = None;
        self.slice_selection = None;
        self.other_members.clear();
        self.projection.publish(None);
    }

    fn require_loaded(&self) -> Result<()> {
        if self.state == TabState::Empty {
            return Err(LedgerExplorerError::EmptyData("nothing loaded yet".to_string()));
        }
        Ok(())
    }

    fn tab_roots(&self, ds: &Datastore) -> Vec<String> {
        let tree = ds.tree();
        let roots: Vec<String> = self
            .params
            .ex_roots
            .iter()
            .filter(|r| tree.contains(r))
            .cloned()
            .collect();
        if !roots.is_empty() {
            return roots;
        }
        let children = tree.get_children(tree.root_id());
        if children.is_empty() {
            vec![tree.root_id().to_string()]
        } else {
            children
        }
    }

    /// Starts a render request. A later request supersedes it.
    pub fn begin_render(&self) -> u64 {
        self.views.begin()
    }

    /// Renders all views for the request `ticket`. Gives `None` and leaves
    /// the published views alone once a newer request has started.
    pub fn finish_render(&mut self, ticket: u64) -> Option<Arc<ExplorerViews>> {
        if !self.views.is_current(ticket) {
            debug!("Render {} was superseded; skipping", ticket);
            return None;
        }
        let ds = self.datastore();
        let views = self.views.complete(ticket, self.build_views(&ds))?;
        if let ViewOutcome::Ready(figure) = &views.burst {
            self.other_members = figure.other_members.clone();
        }
        Some(views)
    }

    pub fn render(&mut self) -> Option<Arc<ExplorerViews>> {
        let ticket = self.begin_render();
        self.finish_render(ticket)
    }

    pub fn last_render(&self) -> Option<Arc<ExplorerViews>> {
        self.views.latest()
    }

    fn build_views(&self, ds: &Datastore) -> ExplorerViews {
        let summary = ds.summary();
        if self.state == TabState::Empty || ds.is_empty() {
            return ExplorerViews {
                bars: ViewOutcome::empty(NO_DATA),
                areas: ViewOutcome::empty(NO_DATA),
                burst: ViewOutcome::empty(NO_DATA),
                table: ViewOutcome::empty(NO_DATA),
                summary,
            };
        }

        let bars = ViewOutcome::contain("bars", self.render_bars(ds));
        let areas = ViewOutcome::contain("areas", self.render_areas(ds));
        let burst = ViewOutcome::contain("burst", self.render_burst(ds));
        let table = ViewOutcome::contain("table", self.render_table(ds));
        ExplorerViews {
            bars,
            areas,
            burst,
            table,
            summary,
        }
    }

    /// Bars follow a slice click; otherwise they show the tab's roots.
    fn render_bars(&self, ds: &Datastore) -> Result<Vec<BarTrace>> {
        let roots = match &self.slice_selection {
            Some(slice) => slice.projection.accounts.clone(),
            None => self.tab_roots(ds),
        };
        let mut traces = Vec::with_capacity(roots.len());
        for (i, root) in roots.iter().enumerate() {
            let opts = BarOptions {
                resolution: self.resolution,
                span: self.span,
                color_index: i,
                deep: true,
                unit: self.params.unit.clone(),
            };
            traces.push(periodic_bars(ds.trans(), ds.tree(), ds.eras(), root, &opts)?);
        }
        if traces.iter().all(|t| t.points.is_empty()) {
            return Err(LedgerExplorerError::EmptyData(NO_DATA.to_string()));
        }
        Ok(traces)
    }

    fn active_trans<'a>(&'a self, ds: &'a Datastore) -> &'a Ledger {
        match self.selection() {
            Some(selection) => &selection.transactions,
            None => ds.trans(),
        }
    }

    fn render_areas(&self, ds: &Datastore) -> Result<Vec<AreaSeries>> {
        let trans = self.active_trans(ds);
        let mut series = Vec::new();
        for root in self.params.bs_roots.iter().filter(|r| ds.tree().contains(r)) {
            series.extend(cumulative_areas_for_root(trans, ds.tree(), root, self.resolution)?);
        }
        if series.iter().all(|s| s.points.is_empty()) {
            return Err(LedgerExplorerError::EmptyData(NO_DATA.to_string()));
        }
        Ok(series)
    }

    /// The burst follows the bar selection only, since slice clicks come from it.
    fn render_burst(&self, ds: &Datastore) -> Result<BurstFigure> {
        let (trans, window, label) = match &self.bar_selection {
            Some(bars) => (
                &bars.transactions,
                Some((bars.projection.start, bars.projection.end)),
                bars.label.clone(),
            ),
            None => (ds.trans(), ds.extent(), self.params.ds_data_title.clone()),
        };
        let factor = match (self.span, window) {
            (TimeSpan::Total, _) | (_, None) => 1.0,
            (span, Some((start, end))) => burst_factor(span, span_in_months(start, end))?,
        };
        let opts = BurstOptions {
            time_span: self.span,
            factor,
            span_label: Some(label),
            ..BurstOptions::default()
        };
        burst_figure(ds.tree(), trans, &opts)
    }

    fn render_table(&self, ds: &Datastore) -> Result<TransactionTable> {
        let trans = self.active_trans(ds);
        if trans.is_empty() {
            return Err(LedgerExplorerError::EmptyData(NO_DATA.to_string()));
        }
        let title = match self.selection() {
            Some(selection) => selection.label.clone(),
            None => self.params.tr_label.clone(),
        };
        Ok(TransactionTable::new(trans, &title, &self.params.unit))
    }
}
