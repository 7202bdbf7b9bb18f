//! Trees: ordered keyed containers over the data heap.
//!
//! Sets and dictionaries are keyed by object (total order from the
//! comparator's key mode); namespaces are keyed by symbol. Nodes carry
//! parent pointers so in-order traversal needs no auxiliary stack.
//! Dictionary and namespace nodes defer their left/right pair to a shared
//! links entry, allocated lazily when a node gains its first child and
//! pruned when it loses its last. The trees are left unbalanced; a color
//! bit is reserved on every node for a balanced variant.

use std::cmp::Ordering;

use crate::{
    compare::CompareKind,
    engine::Engine,
    heap::{DataKind, EntryData, HeapId},
    result::{EngineResult, RunResult, engine_assert},
};

/// Insert outcome: the resulting node, and whether it is new.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TreeInsert {
    pub node: HeapId,
    pub inserted: bool,
}

/// Traversal step: a node plus its key and value where the tree has them.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TreeNext {
    pub node: Option<HeapId>,
    pub key: Option<HeapId>,
    pub value: Option<HeapId>,
}

fn is_tree_kind(kind: DataKind) -> bool {
    matches!(kind, DataKind::Set | DataKind::Dictionary | DataKind::Namespace)
}

fn is_node_kind(kind: DataKind) -> bool {
    matches!(kind, DataKind::SetNode | DataKind::DictionaryNode | DataKind::NamespaceNode)
}

impl Engine {
    /* Node field access across the three node kinds. */

    pub(crate) fn node_key(&self, node: HeapId) -> EngineResult<HeapId> {
        match self.heap.data(node) {
            EntryData::SetNode { key, .. } | EntryData::DictionaryNode { key, .. } => Ok(*key),
            _ => Err(RunResult::InternalError),
        }
    }

    pub(crate) fn node_symbol(&self, node: HeapId) -> EngineResult<i32> {
        match self.heap.data(node) {
            EntryData::NamespaceNode { symbol, .. } => Ok(*symbol),
            _ => Err(RunResult::InternalError),
        }
    }

    /// Value slot of a dictionary or namespace node.
    pub(crate) fn node_value(&self, node: HeapId) -> EngineResult<Option<HeapId>> {
        match self.heap.data(node) {
            EntryData::SetNode { .. } => Ok(None),
            EntryData::DictionaryNode { value, .. } | EntryData::NamespaceNode { value, .. } => Ok(Some(*value)),
            _ => Err(RunResult::InternalError),
        }
    }

    pub(crate) fn set_node_value(&mut self, node: HeapId, new_value: HeapId) -> EngineResult<()> {
        match self.heap.data_mut(node) {
            EntryData::DictionaryNode { value, .. } | EntryData::NamespaceNode { value, .. } => {
                *value = new_value;
                Ok(())
            }
            _ => Err(RunResult::InternalError),
        }
    }

    fn node_parent(&self, node: HeapId) -> EngineResult<Option<HeapId>> {
        match self.heap.data(node) {
            EntryData::SetNode { parent, .. }
            | EntryData::DictionaryNode { parent, .. }
            | EntryData::NamespaceNode { parent, .. } => Ok(*parent),
            _ => Err(RunResult::InternalError),
        }
    }

    fn set_node_parent(&mut self, node: HeapId, new_parent: Option<HeapId>) -> EngineResult<()> {
        match self.heap.data_mut(node) {
            EntryData::SetNode { parent, .. }
            | EntryData::DictionaryNode { parent, .. }
            | EntryData::NamespaceNode { parent, .. } => {
                *parent = new_parent;
                Ok(())
            }
            _ => Err(RunResult::InternalError),
        }
    }

    fn node_links(&self, node: HeapId) -> EngineResult<Option<HeapId>> {
        match self.heap.data(node) {
            EntryData::DictionaryNode { links, .. } | EntryData::NamespaceNode { links, .. } => Ok(*links),
            _ => Err(RunResult::InternalError),
        }
    }

    pub(crate) fn node_left(&self, node: HeapId) -> EngineResult<Option<HeapId>> {
        match self.heap.data(node) {
            EntryData::SetNode { left, .. } => Ok(*left),
            EntryData::DictionaryNode { links, .. } | EntryData::NamespaceNode { links, .. } => match links {
                Some(links) => {
                    let EntryData::TreeLinks { left, .. } = self.heap.data(*links) else {
                        return Err(RunResult::InternalError);
                    };
                    Ok(*left)
                }
                None => Ok(None),
            },
            _ => Err(RunResult::InternalError),
        }
    }

    pub(crate) fn node_right(&self, node: HeapId) -> EngineResult<Option<HeapId>> {
        match self.heap.data(node) {
            EntryData::SetNode { right, .. } => Ok(*right),
            EntryData::DictionaryNode { links, .. } | EntryData::NamespaceNode { links, .. } => match links {
                Some(links) => {
                    let EntryData::TreeLinks { right, .. } = self.heap.data(*links) else {
                        return Err(RunResult::InternalError);
                    };
                    Ok(*right)
                }
                None => Ok(None),
            },
            _ => Err(RunResult::InternalError),
        }
    }

    fn set_node_side(&mut self, node: HeapId, left_side: bool, index: Option<HeapId>) -> EngineResult<()> {
        if let EntryData::SetNode { left, right, .. } = self.heap.data_mut(node) {
            *(if left_side { left } else { right }) = index;
            return Ok(());
        }
        engine_assert(is_node_kind(self.heap.kind(node)))?;

        let mut links = self.node_links(node)?;
        if links.is_none() && index.is_some() {
            let allocated = self.heap.alloc(EntryData::TreeLinks { left: None, right: None })?;
            match self.heap.data_mut(node) {
                EntryData::DictionaryNode { links, .. } | EntryData::NamespaceNode { links, .. } => {
                    *links = Some(allocated);
                }
                _ => return Err(RunResult::InternalError),
            }
            links = Some(allocated);
        }
        if let Some(links) = links {
            let EntryData::TreeLinks { left, right } = self.heap.data_mut(links) else {
                return Err(RunResult::InternalError);
            };
            *(if left_side { left } else { right }) = index;
            self.prune_links(node)?;
        }
        Ok(())
    }

    fn set_node_left(&mut self, node: HeapId, index: Option<HeapId>) -> EngineResult<()> {
        self.set_node_side(node, true, index)
    }

    fn set_node_right(&mut self, node: HeapId, index: Option<HeapId>) -> EngineResult<()> {
        self.set_node_side(node, false, index)
    }

    /// Frees a node's links entry once both children are gone.
    fn prune_links(&mut self, node: HeapId) -> EngineResult<()> {
        if self.heap.kind(node) == DataKind::SetNode {
            return Ok(());
        }
        let Some(links) = self.node_links(node)? else {
            return Ok(());
        };
        let EntryData::TreeLinks { left, right } = *self.heap.data(links) else {
            return Err(RunResult::InternalError);
        };
        if left.is_some() || right.is_some() {
            return Ok(());
        }
        match self.heap.data_mut(node) {
            EntryData::DictionaryNode { links, .. } | EntryData::NamespaceNode { links, .. } => {
                *links = None;
            }
            _ => return Err(RunResult::InternalError),
        }
        self.unref(links)
    }

    /// Key order between a probe key and a node's key.
    fn compare_node_key(&mut self, tree: HeapId, key: HeapId, node: HeapId) -> EngineResult<Ordering> {
        let node_key = self.node_key(node)?;
        engine_assert(self.heap.kind(tree) != DataKind::Namespace)?;
        let (ordering, _) = self.compare(key, node_key, CompareKind::Key)?;
        Ok(ordering)
    }

    /* Tree operations. */

    /// Inserts `key` (with `value` for dictionaries) into a set or
    /// dictionary. A duplicate key returns the existing node; for
    /// dictionaries its value slot is replaced.
    ///
    /// Keys must be immutable objects.
    pub(crate) fn tree_insert(&mut self, tree: HeapId, key: HeapId, value: Option<HeapId>) -> EngineResult<TreeInsert> {
        let tree_kind = self.heap.kind(tree);
        engine_assert(matches!(tree_kind, DataKind::Set | DataKind::Dictionary))?;
        engine_assert(self.heap.kind(key).is_object())?;
        match tree_kind {
            DataKind::Dictionary => {
                let value = value.ok_or(RunResult::InternalError)?;
                engine_assert(self.heap.kind(value).is_object())?;
            }
            _ => engine_assert(value.is_none())?,
        }
        if !self.is_immutable_object(key)? {
            return Err(RunResult::UnexpectedType);
        }

        if let Some(found) = self.tree_find_node(tree, key)? {
            if tree_kind == DataKind::Dictionary {
                let value = value.ok_or(RunResult::InternalError)?;
                let old = self.node_value(found)?.ok_or(RunResult::InternalError)?;
                self.unref(old)?;
                self.set_node_value(found, value)?;
                self.ref_value(value);
            }
            return Ok(TreeInsert {
                node: found,
                inserted: false,
            });
        }

        let node = match tree_kind {
            DataKind::Dictionary => {
                let value = value.ok_or(RunResult::InternalError)?;
                self.heap.alloc(EntryData::DictionaryNode {
                    key,
                    parent: None,
                    links: None,
                    value,
                    is_black: false,
                })?
            }
            _ => self.heap.alloc(EntryData::SetNode {
                key,
                parent: None,
                left: None,
                right: None,
                is_black: false,
            })?,
        };
        self.ref_value(key);
        if tree_kind == DataKind::Dictionary {
            self.ref_value(value.ok_or(RunResult::InternalError)?);
        }

        self.tree_insert_node(tree, node)?;
        Ok(TreeInsert { node, inserted: true })
    }

    /// Inserts `value` under `symbol` in a namespace, unless the symbol
    /// is already bound; the existing binding wins.
    pub(crate) fn tree_try_insert_by_symbol(
        &mut self,
        tree: HeapId,
        symbol: i32,
        value: HeapId,
    ) -> EngineResult<TreeInsert> {
        engine_assert(self.heap.kind(tree) == DataKind::Namespace)?;
        engine_assert(self.heap.kind(value).is_object())?;

        if let Some((node, _)) = self.find_symbol(tree, symbol)? {
            return Ok(TreeInsert { node, inserted: false });
        }

        let node = self.heap.alloc(EntryData::NamespaceNode {
            symbol,
            parent: None,
            links: None,
            value,
            is_global: false,
            is_local: false,
            is_black: false,
        })?;
        self.ref_value(value);
        self.tree_insert_node(tree, node)?;
        Ok(TreeInsert { node, inserted: true })
    }

    /// Links a fresh node into place and bumps the count.
    fn tree_insert_node(&mut self, tree: HeapId, node: HeapId) -> EngineResult<()> {
        engine_assert(is_tree_kind(self.heap.kind(tree)))?;
        engine_assert(is_node_kind(self.heap.kind(node)))?;
        let by_symbol = self.heap.kind(tree) == DataKind::Namespace;

        let mut parent = None;
        let mut target = self.heap.data(tree).as_tree().ok_or(RunResult::InternalError)?.root;
        let mut went_left = false;
        let mut iterations: u32 = 0;
        while let Some(current) = target {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            parent = Some(current);
            let ordering = if by_symbol {
                self.node_symbol(node)?.cmp(&self.node_symbol(current)?)
            } else {
                let key = self.node_key(node)?;
                let (ordering, _) = self.compare(key, self.node_key(current)?, CompareKind::Key)?;
                ordering
            };
            went_left = ordering == Ordering::Less;
            target = if went_left {
                self.node_left(current)?
            } else {
                self.node_right(current)?
            };
        }

        self.set_node_parent(node, parent)?;
        match parent {
            None => {
                self.heap.data_mut(tree).as_tree_mut().ok_or(RunResult::InternalError)?.root = Some(node);
            }
            Some(parent) => {
                if went_left {
                    self.set_node_left(parent, Some(node))?;
                } else {
                    self.set_node_right(parent, Some(node))?;
                }
            }
        }
        let header = self.heap.data_mut(tree).as_tree_mut().ok_or(RunResult::InternalError)?;
        header.count += 1;
        Ok(())
    }

    /// Finds the node whose key equals `key` under the key order.
    fn tree_find_node(&mut self, tree: HeapId, key: HeapId) -> EngineResult<Option<HeapId>> {
        let mut current = self.heap.data(tree).as_tree().ok_or(RunResult::InternalError)?.root;
        let mut iterations: u32 = 0;
        while let Some(node) = current {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            current = match self.compare_node_key(tree, key, node)? {
                Ordering::Equal => return Ok(Some(node)),
                Ordering::Less => self.node_left(node)?,
                Ordering::Greater => self.node_right(node)?,
            };
        }
        Ok(None)
    }

    /// Looks up `key` in a set or dictionary.
    ///
    /// Returns the node and, for dictionaries, its value.
    pub(crate) fn tree_find(&mut self, tree: HeapId, key: HeapId) -> EngineResult<Option<(HeapId, Option<HeapId>)>> {
        let tree_kind = self.heap.kind(tree);
        engine_assert(matches!(tree_kind, DataKind::Set | DataKind::Dictionary))?;
        engine_assert(self.heap.kind(key).is_object())?;
        let Some(node) = self.tree_find_node(tree, key)? else {
            return Ok(None);
        };
        let value = if tree_kind == DataKind::Set {
            None
        } else {
            self.node_value(node)?
        };
        Ok(Some((node, value)))
    }

    /// Looks up `symbol` in a namespace.
    pub(crate) fn find_symbol(&self, tree: HeapId, symbol: i32) -> EngineResult<Option<(HeapId, HeapId)>> {
        engine_assert(self.heap.kind(tree) == DataKind::Namespace)?;
        let mut current = self.heap.data(tree).as_tree().ok_or(RunResult::InternalError)?.root;
        let mut iterations: u32 = 0;
        while let Some(node) = current {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            current = match symbol.cmp(&self.node_symbol(node)?) {
                Ordering::Equal => {
                    let value = self.node_value(node)?.ok_or(RunResult::InternalError)?;
                    return Ok(Some((node, value)));
                }
                Ordering::Less => self.node_left(node)?,
                Ordering::Greater => self.node_right(node)?,
            };
        }
        Ok(None)
    }

    /// Smallest node of the subtree rooted at `node`.
    fn tree_min(&self, node: HeapId) -> EngineResult<HeapId> {
        let mut current = node;
        let mut iterations: u32 = 0;
        while let Some(left) = self.node_left(current)? {
            iterations += 1;
            if iterations > self.cycle_detection_limit {
                return Err(RunResult::CycleDetected);
            }
            current = left;
        }
        Ok(current)
    }

    /// In-order successor; from the minimum when `node` is None.
    pub(crate) fn tree_next(&self, tree: HeapId, node: Option<HeapId>) -> EngineResult<TreeNext> {
        engine_assert(is_tree_kind(self.heap.kind(tree)))?;
        let root = self.heap.data(tree).as_tree().ok_or(RunResult::InternalError)?.root;
        let Some(root) = root else {
            return Ok(TreeNext::default());
        };

        let successor = match node {
            None => Some(self.tree_min(root)?),
            Some(node) => {
                if let Some(right) = self.node_right(node)? {
                    Some(self.tree_min(right)?)
                } else {
                    let mut child = node;
                    let mut parent = self.node_parent(child)?;
                    let mut iterations: u32 = 0;
                    while let Some(p) = parent {
                        iterations += 1;
                        if iterations > self.cycle_detection_limit {
                            return Err(RunResult::CycleDetected);
                        }
                        if self.node_right(p)? != Some(child) {
                            break;
                        }
                        child = p;
                        parent = self.node_parent(p)?;
                    }
                    parent
                }
            }
        };

        let Some(successor) = successor else {
            return Ok(TreeNext::default());
        };
        let key = if self.heap.kind(tree) == DataKind::Namespace {
            None
        } else {
            Some(self.node_key(successor)?)
        };
        let value = if self.heap.kind(tree) == DataKind::Set {
            None
        } else {
            self.node_value(successor)?
        };
        Ok(TreeNext {
            node: Some(successor),
            key,
            value,
        })
    }

    /// Replaces `node` by `replacement` in its parent's (or the root's)
    /// link, rewiring the replacement's parent pointer.
    fn tree_shift(&mut self, tree: HeapId, node: HeapId, replacement: Option<HeapId>) -> EngineResult<()> {
        match self.node_parent(node)? {
            None => {
                self.heap.data_mut(tree).as_tree_mut().ok_or(RunResult::InternalError)?.root = replacement;
            }
            Some(parent) => {
                if self.node_left(parent)? == Some(node) {
                    self.set_node_left(parent, replacement)?;
                } else {
                    self.set_node_right(parent, replacement)?;
                }
            }
        }
        if let Some(replacement) = replacement {
            let parent = self.node_parent(node)?;
            self.set_node_parent(replacement, parent)?;
        }
        Ok(())
    }

    /// Unlinks `node` from `tree`, substituting its successor when both
    /// children are present, and releases key/value per the flags.
    pub(crate) fn tree_erase_node(
        &mut self,
        tree: HeapId,
        node: HeapId,
        erase_key: bool,
        erase_value: bool,
    ) -> EngineResult<()> {
        engine_assert(is_tree_kind(self.heap.kind(tree)))?;
        engine_assert(is_node_kind(self.heap.kind(node)))?;

        let left = self.node_left(node)?;
        let right = self.node_right(node)?;
        match (left, right) {
            (None, _) => self.tree_shift(tree, node, right)?,
            (_, None) => self.tree_shift(tree, node, left)?,
            (Some(left), Some(_)) => {
                let successor = self.tree_next(tree, Some(node))?.node.ok_or(RunResult::InternalError)?;
                if self.node_parent(successor)? != Some(node) {
                    let successor_right = self.node_right(successor)?;
                    self.tree_shift(tree, successor, successor_right)?;
                    let node_right = self.node_right(node)?;
                    self.set_node_right(successor, node_right)?;
                    if let Some(node_right) = node_right {
                        self.set_node_parent(node_right, Some(successor))?;
                    }
                }
                self.tree_shift(tree, node, Some(successor))?;
                self.set_node_left(successor, Some(left))?;
                self.set_node_parent(left, Some(successor))?;
            }
        }

        let node_kind = self.heap.kind(node);
        if erase_key && node_kind != DataKind::NamespaceNode {
            let key = self.node_key(node)?;
            self.unref(key)?;
        }
        if erase_value && node_kind != DataKind::SetNode {
            let value = self.node_value(node)?.ok_or(RunResult::InternalError)?;
            self.unref(value)?;
        }
        if node_kind != DataKind::SetNode {
            if let Some(links) = self.node_links(node)? {
                self.unref(links)?;
            }
        }
        self.unref(node)?;

        let header = self.heap.data_mut(tree).as_tree_mut().ok_or(RunResult::InternalError)?;
        header.count -= 1;
        Ok(())
    }
}
