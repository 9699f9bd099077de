//! Rooted account hierarchy.
//!
//! Topology is kept as two maps, `children: id -> [id]` and `parent: id -> id`,
//! and every traversal is derived from them. Node identifiers are unique and
//! equal the leaf segment of the account name they were created from.

use crate::error::{LedgerExplorerError, Result};
use crate::ledger::Transaction;
use crate::{DEFAULT_DELIMITER, LEAF_SUFFIX, OTHER_PREFIX, ROOT_ID, ROOT_TAG, SUBTOTAL_SUFFIX};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountNode {
    pub id: String,
    pub tag: String,
    /// Sum of transactions booked directly to this account.
    pub leaf_total: Option<f64>,
    /// `leaf_total` plus the totals of all children.
    pub total: Option<f64>,
}

impl AccountNode {
    fn new(id: &str, tag: &str) -> Self {
        Self {
            id: id.to_string(),
            tag: tag.to_string(),
            leaf_total: None,
            total: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TreeSnapshot", try_from = "TreeSnapshot")]
pub struct AccountTree {
    root: String,
    delimiter: String,
    nodes: HashMap<String, AccountNode>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, String>,
}

/// A row of a parent/child account table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRow {
    pub account: String,
    pub parent: Option<String>,
}

impl ParentRow {
    pub fn new(account: &str, parent: Option<&str>) -> Self {
        Self {
            account: account.to_string(),
            parent: parent.map(str::to_string),
        }
    }
}

impl Default for AccountTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountTree {
    /// An empty tree holding only the synthetic `[Total]` root.
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    pub fn with_delimiter(delimiter: &str) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID.to_string(), AccountNode::new(ROOT_ID, ROOT_TAG));
        let mut children = HashMap::new();
        children.insert(ROOT_ID.to_string(), Vec::new());
        Self {
            root: ROOT_ID.to_string(),
            delimiter: delimiter.to_string(),
            nodes,
            children,
            parents: HashMap::new(),
        }
    }

    /// Builds a tree from delimited full account names such as `Assets:Bank:Checking`.
    ///
    /// Each path creates its missing segments parented to their predecessor;
    /// the first segment hangs off the root. Duplicate paths are no-ops and
    /// malformed paths are logged and skipped.
    pub fn from_names<I, S>(full_names: I, delimiter: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::with_delimiter(delimiter);
        let mut seen = HashSet::new();
        for name in full_names {
            let name = name.as_ref();
            if !seen.insert(name.to_string()) {
                continue;
            }
            tree.insert_path(name);
        }
        tree
    }

    fn insert_path(&mut self, path: &str) {
        let segments: Vec<&str> = path.split(self.delimiter.as_str()).map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            warn!("Skipping unparseable account path '{}'", path);
            return;
        }
        if segments.iter().any(|s| *s == self.root) {
            warn!("Skipping account path '{}': it names the root", path);
            return;
        }

        let mut parent = self.root.clone();
        for segment in segments {
            if self.contains(segment) {
                let actual = self.parents.get(segment).map(String::as_str);
                if actual != Some(parent.as_str()) {
                    warn!(
                        "Account '{}' in path '{}' already exists under '{}'; keeping the first placement",
                        segment,
                        path,
                        actual.unwrap_or("")
                    );
                }
            } else {
                self.create_node(segment, segment, &parent);
            }
            parent = segment.to_string();
        }
    }

    /// Builds a tree from `(account, parent)` rows in any order.
    ///
    /// First pass creates every account and parent, attaching unknown parents
    /// to the root; the second pass moves each account under its declared
    /// parent. Rows without a parent stay under the root.
    pub fn from_parents(rows: &[ParentRow]) -> Self {
        let mut tree = Self::new();
        let root = tree.root.clone();

        for row in rows {
            let account = row.account.trim();
            if account.is_empty() || account == root {
                warn!("Skipping account row with unusable name '{}'", row.account);
                continue;
            }
            if let Some(parent) = row.parent.as_deref().map(str::trim) {
                if !parent.is_empty() && parent != root && !tree.contains(parent) {
                    tree.create_node(parent, parent, &root);
                }
            }
            if !tree.contains(account) {
                tree.create_node(account, account, &root);
            }
        }

        for row in rows {
            let account = row.account.trim();
            let Some(parent) = row.parent.as_deref().map(str::trim) else {
                continue;
            };
            if parent.is_empty() || !tree.contains(account) {
                continue;
            }
            tree.move_node(account, parent);
        }

        tree
    }

    /// Adds a node under `parent`. Returns false and leaves the tree untouched
    /// when the id is taken or the parent is unknown.
    pub fn create_node(&mut self, id: &str, tag: &str, parent: &str) -> bool {
        if self.contains(id) {
            debug!("Account '{}' already exists; not creating it again", id);
            return false;
        }
        if !self.contains(parent) {
            warn!("Cannot create '{}': parent '{}' is not in the tree", id, parent);
            return false;
        }
        self.nodes.insert(id.to_string(), AccountNode::new(id, tag));
        self.children.insert(id.to_string(), Vec::new());
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(id.to_string());
        self.parents.insert(id.to_string(), parent.to_string());
        true
    }

    /// Re-parents `id` under `new_parent`, refusing moves that would create a cycle.
    pub fn move_node(&mut self, id: &str, new_parent: &str) -> bool {
        if id == self.root || !self.contains(id) || !self.contains(new_parent) {
            warn!("Cannot move '{}' under '{}'", id, new_parent);
            return false;
        }
        if id == new_parent || self.get_descendents(id).iter().any(|d| d == new_parent) {
            warn!(
                "Cannot move '{}' under its own descendant '{}'",
                id, new_parent
            );
            return false;
        }
        if self.parents.get(id).map(String::as_str) == Some(new_parent) {
            return true;
        }
        self.detach(id);
        self.children
            .entry(new_parent.to_string())
            .or_default()
            .push(id.to_string());
        self.parents.insert(id.to_string(), new_parent.to_string());
        true
    }

    fn detach(&mut self, id: &str) {
        if let Some(old_parent) = self.parents.remove(id) {
            if let Some(siblings) = self.children.get_mut(&old_parent) {
                siblings.retain(|c| c != id);
            }
        }
    }

    /// Removes `id` and its whole subtree. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: &str) {
        if id == self.root || !self.contains(id) {
            return;
        }
        let mut doomed = self.get_descendents(id);
        doomed.push(id.to_string());
        self.detach(id);
        for node in doomed {
            self.nodes.remove(&node);
            self.children.remove(&node);
            self.parents.remove(&node);
        }
    }

    fn rename_node(&mut self, old: &str, new: &str) -> bool {
        if !self.contains(old) || self.contains(new) {
            return false;
        }
        if let Some(mut node) = self.nodes.remove(old) {
            node.id = new.to_string();
            self.nodes.insert(new.to_string(), node);
        }
        let kids = self.children.remove(old).unwrap_or_default();
        for kid in &kids {
            self.parents.insert(kid.clone(), new.to_string());
        }
        self.children.insert(new.to_string(), kids);
        if let Some(parent) = self.parents.remove(old) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                for sibling in siblings.iter_mut().filter(|s| s.as_str() == old) {
                    *sibling = new.to_string();
                }
            }
            self.parents.insert(new.to_string(), parent);
        }
        if self.root == old {
            self.root = new.to_string();
        }
        true
    }

    /// While the root has exactly one child, makes that child the new root.
    pub fn trim_excess_root(&mut self) {
        loop {
            let only_child = match self.children.get(&self.root) {
                Some(kids) if kids.len() == 1 => kids[0].clone(),
                _ => break,
            };
            debug!("Trimming excess root '{}' down to '{}'", self.root, only_child);
            let old_root = std::mem::replace(&mut self.root, only_child.clone());
            self.nodes.remove(&old_root);
            self.children.remove(&old_root);
            self.parents.remove(&only_child);
        }
    }

    /// A copy of the subtree rooted at `id`, or `None` when `id` is unknown.
    pub fn subtree(&self, id: &str) -> Option<AccountTree> {
        if !self.contains(id) {
            return None;
        }
        let mut keep: HashSet<String> = self.get_descendents(id).into_iter().collect();
        keep.insert(id.to_string());

        let mut tree = self.clone();
        tree.nodes.retain(|k, _| keep.contains(k));
        tree.children.retain(|k, _| keep.contains(k));
        tree.parents.retain(|k, _| keep.contains(k) && k != id);
        tree.root = id.to_string();
        Some(tree)
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn has_synthetic_root(&self) -> bool {
        self.root == ROOT_ID
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root is present.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&AccountNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut AccountNode> {
        self.nodes.get_mut(id)
    }

    pub fn parent(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.children.get(id).map_or(true, Vec::is_empty)
    }

    pub fn get_children(&self, id: &str) -> Vec<String> {
        match self.children.get(id) {
            Some(kids) => kids.clone(),
            None => {
                debug!("get_children: account '{}' not in tree", id);
                Vec::new()
            }
        }
    }

    /// All nodes below `id` in pre-order, excluding `id` itself.
    pub fn get_descendents(&self, id: &str) -> Vec<String> {
        if !self.contains(id) {
            debug!("get_descendents: account '{}' not in tree", id);
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack: Vec<&String> = self.children[id].iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next.clone());
            if let Some(kids) = self.children.get(next) {
                stack.extend(kids.iter().rev());
            }
        }
        out
    }

    /// Ancestors of `id` from the root down, ending with `id` itself.
    pub fn get_lineage(&self, id: &str) -> Vec<String> {
        if !self.contains(id) {
            debug!("get_lineage: account '{}' not in tree", id);
            return Vec::new();
        }
        let mut lineage = vec![id.to_string()];
        let mut current = id;
        while let Some(parent) = self.parents.get(current) {
            lineage.push(parent.clone());
            current = parent.as_str();
        }
        lineage.reverse();
        lineage
    }

    /// `id` plus all of its descendants.
    pub fn subtree_ids(&self, id: &str) -> HashSet<String> {
        if !self.contains(id) {
            return HashSet::new();
        }
        let mut ids: HashSet<String> = self.get_descendents(id).into_iter().collect();
        ids.insert(id.to_string());
        ids
    }

    /// All node ids in pre-order starting at the root.
    pub fn walk(&self) -> Vec<String> {
        let mut out = vec![self.root.clone()];
        out.extend(self.get_descendents(&self.root));
        out
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        let lineage = self.get_lineage(id);
        if lineage.is_empty() {
            None
        } else {
            Some(lineage.len() - 1)
        }
    }

    /// Delimited path of `id` from the first real ancestor down. The synthetic
    /// root is never part of a path.
    pub fn full_account_name(&self, id: &str) -> Option<String> {
        if id == ROOT_ID && self.has_synthetic_root() {
            return None;
        }
        let lineage = self.get_lineage(id);
        if lineage.is_empty() {
            return None;
        }
        let segments: Vec<&str> = lineage
            .iter()
            .map(String::as_str)
            .filter(|s| *s != ROOT_ID || !self.has_synthetic_root())
            .collect();
        Some(segments.join(&self.delimiter))
    }

    pub fn dict_of_paths(&self) -> BTreeMap<String, String> {
        self.nodes
            .keys()
            .filter_map(|id| self.full_account_name(id).map(|path| (id.clone(), path)))
            .collect()
    }

    /// Sets every node's `leaf_total` to `factor` times the sum of its
    /// directly booked transactions; nodes without rows get zero.
    pub fn append_sums_from_trans(&mut self, trans: &[Transaction], factor: f64) {
        let mut sums: HashMap<&str, i64> = HashMap::new();
        for tx in trans {
            *sums.entry(tx.account.as_str()).or_insert(0) += tx.amount;
        }
        for (id, node) in self.nodes.iter_mut() {
            let sum = sums.get(id.as_str()).copied().unwrap_or(0);
            node.leaf_total = Some(sum as f64 * factor);
        }
    }

    /// Post-order roll-up: `total = leaf_total + sum(child totals)`.
    ///
    /// With `prevent_negatives`, negative leaf totals count as zero and every
    /// non-root subtree whose total is not positive is removed before its
    /// parent is summed. Afterwards each non-leaf node with a positive
    /// `leaf_total` is split, see [`AccountTree::split_leaf_subtotals`].
    pub fn roll_up_subtotals(&mut self, prevent_negatives: bool) {
        let root = self.root.clone();
        self.roll_up_node(&root, prevent_negatives);
        self.split_leaf_subtotals();
    }

    fn roll_up_node(&mut self, id: &str, prevent_negatives: bool) -> f64 {
        let mut leaf = self
            .nodes
            .get(id)
            .and_then(|n| n.leaf_total)
            .unwrap_or(0.0);
        if prevent_negatives && leaf < 0.0 {
            debug!("Ignoring negative leaf total {} on '{}'", leaf, id);
            leaf = 0.0;
        }

        let mut total = leaf;
        for child in self.get_children(id) {
            let child_total = self.roll_up_node(&child, prevent_negatives);
            if prevent_negatives && child_total <= 0.0 {
                debug!("Pruning '{}' with non-positive total {}", child, child_total);
                self.remove_subtree(&child);
                continue;
            }
            total += child_total;
        }

        if let Some(node) = self.nodes.get_mut(id) {
            node.leaf_total = Some(leaf);
            node.total = Some(total);
        }
        total
    }

    /// Makes click targets unambiguous: a node with children and its own
    /// positive `leaf_total` becomes `<id> [Subtotal]`, and a new first child
    /// `<id> [Leaf]` carrying the original tag holds the direct amount.
    pub fn split_leaf_subtotals(&mut self) {
        for id in self.walk() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let leaf = node.leaf_total.unwrap_or(0.0);
            if leaf <= 0.0 || self.is_leaf(&id) || id.ends_with(SUBTOTAL_SUFFIX) {
                continue;
            }
            let tag = node.tag.clone();
            let subtotal_id = format!("{}{}", id, SUBTOTAL_SUFFIX);
            let leaf_id = format!("{}{}", id, LEAF_SUFFIX);
            if self.contains(&subtotal_id) || self.contains(&leaf_id) {
                warn!("Cannot split '{}': suffixed ids already in use", id);
                continue;
            }

            self.rename_node(&id, &subtotal_id);
            if let Some(parent) = self.nodes.get_mut(&subtotal_id) {
                parent.tag = format!("{}{}", tag, SUBTOTAL_SUFFIX);
                parent.leaf_total = Some(0.0);
            }
            let mut leaf_node = AccountNode::new(&leaf_id, &tag);
            leaf_node.leaf_total = Some(leaf);
            leaf_node.total = Some(leaf);
            self.nodes.insert(leaf_id.clone(), leaf_node);
            self.children.insert(leaf_id.clone(), Vec::new());
            self.children
                .entry(subtotal_id.clone())
                .or_default()
                .insert(0, leaf_id.clone());
            self.parents.insert(leaf_id, subtotal_id);
        }
    }

    /// Recomputes `total` bottom-up from `leaf_total` and the children,
    /// without pruning or splitting.
    pub fn refresh_totals(&mut self) {
        let root = self.root.clone();
        self.refresh_node(&root);
    }

    fn refresh_node(&mut self, id: &str) -> f64 {
        let mut total = self
            .nodes
            .get(id)
            .and_then(|n| n.leaf_total)
            .unwrap_or(0.0);
        for child in self.get_children(id) {
            total += self.refresh_node(&child);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.total = Some(total);
        }
        total
    }

    /// Caps the fan-out of every ring. A node with more than
    /// `max_slices - 2` children keeps its `max_slices - 1` largest children
    /// and moves the rest under a new `Other <id>` child. Applied recursively.
    ///
    /// Returns, for each `Other` node created, the ids that were folded into it.
    pub fn cap_fan_out(&mut self, max_slices: usize) -> BTreeMap<String, Vec<String>> {
        let mut folded = BTreeMap::new();
        let keep = max_slices.saturating_sub(1).max(1);
        let threshold = max_slices.saturating_sub(2);

        let mut queue = vec![self.root.clone()];
        while let Some(id) = queue.pop() {
            let kids = self.get_children(&id);
            if kids.len() > threshold {
                let mut ranked = kids.clone();
                ranked.sort_by(|a, b| self.total_of(b).total_cmp(&self.total_of(a)));
                let overflow: Vec<String> = ranked.split_off(keep.min(ranked.len()));
                if overflow.len() >= 2 {
                    let other_id = format!("{}{}", OTHER_PREFIX, id);
                    let other_tag = format!(
                        "{}{}",
                        OTHER_PREFIX,
                        self.nodes.get(&id).map_or(id.as_str(), |n| n.tag.as_str())
                    );
                    if self.create_node(&other_id, &other_tag, &id) {
                        let mut sum = 0.0;
                        for moved in &overflow {
                            sum += self.total_of(moved);
                            self.move_node(moved, &other_id);
                        }
                        if let Some(other) = self.nodes.get_mut(&other_id) {
                            other.leaf_total = Some(0.0);
                            other.total = Some(sum);
                        }
                        folded.insert(other_id, overflow);
                    } else {
                        warn!("Cannot fold children of '{}': '{}' exists", id, other_id);
                    }
                }
            }
            queue.extend(self.get_children(&id));
        }
        folded
    }

    fn total_of(&self, id: &str) -> f64 {
        self.nodes.get(id).and_then(|n| n.total).unwrap_or(0.0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Wire form of a tree: the dict of paths plus the node payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: String,
    pub delimiter: String,
    pub paths: BTreeMap<String, String>,
    #[serde(default)]
    pub payloads: BTreeMap<String, NodePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePayload {
    pub tag: String,
    pub leaf_total: Option<f64>,
    pub total: Option<f64>,
}

impl From<AccountTree> for TreeSnapshot {
    fn from(tree: AccountTree) -> Self {
        let paths = tree.dict_of_paths();
        let payloads = tree
            .nodes
            .values()
            .map(|n| {
                (
                    n.id.clone(),
                    NodePayload {
                        tag: n.tag.clone(),
                        leaf_total: n.leaf_total,
                        total: n.total,
                    },
                )
            })
            .collect();
        Self {
            root: tree.root,
            delimiter: tree.delimiter,
            paths,
            payloads,
        }
    }
}

impl TryFrom<TreeSnapshot> for AccountTree {
    type Error = LedgerExplorerError;

    fn try_from(snapshot: TreeSnapshot) -> Result<Self> {
        let mut paths: Vec<&String> = snapshot.paths.values().collect();
        paths.sort_by_key(|p| p.matches(snapshot.delimiter.as_str()).count());
        let mut tree = AccountTree::from_names(paths, &snapshot.delimiter);

        if snapshot.root != ROOT_ID {
            tree = tree.subtree(&snapshot.root).ok_or_else(|| {
                LedgerExplorerError::InternalInvariant(format!(
                    "tree snapshot root '{}' has no path",
                    snapshot.root
                ))
            })?;
        }

        for (id, payload) in snapshot.payloads {
            if let Some(node) = tree.nodes.get_mut(&id) {
                node.tag = payload.tag;
                node.leaf_total = payload.leaf_total;
                node.total = payload.total;
            }
        }
        Ok(tree)
    }
}
