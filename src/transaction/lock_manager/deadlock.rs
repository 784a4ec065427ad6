use std::collections::{BTreeMap, HashSet};

use crate::common::types::TxnId;

/// Waits-for graph rebuilt by every detection pass. Successor lists are
/// kept sorted so traversal order, and therefore victim choice, is
/// deterministic.
#[derive(Default)]
pub(crate) struct WaitsForGraph {
    edges: BTreeMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        let successors = self.edges.entry(waiter).or_default();
        if let Err(pos) = successors.binary_search(&holder) {
            successors.insert(pos, holder);
        }
    }

    pub fn remove_edge(&mut self, waiter: TxnId, holder: TxnId) {
        if let Some(successors) = self.edges.get_mut(&waiter) {
            if let Ok(pos) = successors.binary_search(&holder) {
                successors.remove(pos);
            }
        }
    }

    /// Drop a transaction and every edge touching it
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for successors in self.edges.values_mut() {
            if let Ok(pos) = successors.binary_search(&txn_id) {
                successors.remove(pos);
            }
        }
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&waiter, successors)| successors.iter().map(move |&holder| (waiter, holder)))
            .collect()
    }

    /// Depth-first search from each source in ascending txn-id order,
    /// successors in ascending order. Returns the victim of the first
    /// cycle found: the youngest (highest-id) transaction on the cycle.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        let mut finished: HashSet<TxnId> = HashSet::new();
        for &start in self.edges.keys() {
            if finished.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(victim) = self.dfs(start, &mut path, &mut on_path, &mut finished) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        path: &mut Vec<TxnId>,
        on_path: &mut HashSet<TxnId>,
        finished: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        path.push(node);
        on_path.insert(node);
        if let Some(successors) = self.edges.get(&node) {
            for &next in successors {
                if on_path.contains(&next) {
                    // The cycle runs from `next`'s position to the end of
                    // the current path.
                    let cycle_start = path.iter().position(|&t| t == next)?;
                    return path[cycle_start..].iter().copied().max();
                }
                if !finished.contains(&next) {
                    if let Some(victim) = self.dfs(next, path, on_path, finished) {
                        return Some(victim);
                    }
                }
            }
        }
        path.pop();
        on_path.remove(&node);
        finished.insert(node);
        None
    }
}
