//! # Ledger Explorer
//!
//! Account-hierarchy aggregation and selection-driven view models for
//! exploring a ledger of transactions.
//!
//! ## Core Concepts
//!
//! - **Account tree**: rooted hierarchy of accounts, built from delimited paths or parent rows
//! - **Ledger**: normalized transactions (date, whole-unit amount, account, full account name)
//! - **Eras**: named date intervals used as a custom time resolution
//! - **Views**: periodic bars, cumulative areas, a sunburst of subtotals and a detail table
//! - **Selection**: a click on one view becomes an (accounts, date range) filter for the others
//!
//! ## Example
//!
//! ```rust,ignore
//! use ledger_explorer::*;
//!
//! let params = Params::default();
//! let source = Source::Path("transactions.csv".into());
//! let datastore = load_datastore(&params, &source, None, None)?;
//!
//! let mut explorer = Explorer::new(params);
//! explorer.publish(datastore);
//! if let Some(views) = explorer.render() {
//!     let traces = views.bars.ready();
//! }
//! ```

pub mod account_tree;
pub mod burst;
pub mod datastore;
pub mod engine;
pub mod eras;
pub mod error;
pub mod explorer;
pub mod frame;
pub mod ingestion;
pub mod ledger;
pub mod palette;
pub mod periods;
pub mod schema;
pub mod selection;
pub mod table;
pub mod utils;

#[cfg(feature = "remote")]
pub mod remote;

pub use account_tree::{AccountNode, AccountTree, ParentRow};
pub use burst::{burst_factor, burst_figure, BurstFigure, BurstOptions, BurstRecord};
pub use datastore::{DataSummary, Datastore};
pub use engine::{
    cumulative_area, cumulative_areas_for_root, periodic_bars, AreaSeries, BarOptions, BarPoint,
    BarTrace, TraceType,
};
pub use eras::{Era, EraRow, Eras};
pub use error::{LedgerExplorerError, Result};
pub use explorer::{Explorer, ExplorerViews, Snapshot, TabState, ViewOutcome, ViewSlot};
pub use frame::{RawFrame, Source};
pub use ingestion::Loader;
pub use ledger::{positize, prorate_factor, Ledger, Transaction};
pub use palette::Palette;
pub use periods::Period;
pub use schema::*;
pub use selection::{
    canonical_account, select_all, select_bars, select_slice, BarClick, Selection,
    SelectionKind, SelectionProjection,
};
pub use table::{TableRow, TransactionTable};
pub use utils::*;

/// Id suffix of the synthetic child holding a split node's own transactions.
pub const LEAF_SUFFIX: &str = " [Leaf]";
/// Id suffix of a split node that carries its subtree's subtotal.
pub const SUBTOTAL_SUFFIX: &str = " [Subtotal]";
/// Id prefix of the node that collects the smallest slices of a ring.
pub const OTHER_PREFIX: &str = "Other ";
pub const MAX_SLICES: usize = 7;
pub const DEFAULT_DELIMITER: &str = ":";
pub const ROOT_ID: &str = "root";
pub const ROOT_TAG: &str = "[Total]";

/// Reads and normalizes the uploads into a [`Datastore`].
pub fn load_datastore(
    params: &Params,
    trans: &Source,
    tree: Option<&Source>,
    eras: Option<&Source>,
) -> Result<Datastore> {
    Loader::new(params).load(trans, tree, eras)
}
