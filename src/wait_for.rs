use std::collections::{HashMap, HashSet};

use crate::TransactionId;

/// Directed graph of `waiter -> holder` edges between transactions blocked on
/// page locks. A cycle means no member can ever make progress on its own.
#[derive(Debug, Default)]
pub(crate) struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace everything `waiter` waits on. A waiter only ever blocks on one
    /// page at a time, so the old edge set is stale.
    pub(crate) fn set_waits(
        &mut self,
        waiter: TransactionId,
        holders: impl IntoIterator<Item = TransactionId>,
    ) {
        let holders: HashSet<_> = holders.into_iter().filter(|h| *h != waiter).collect();
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// `waiter` stopped waiting (granted, aborted or timed out)
    pub(crate) fn remove_waiter(&mut self, waiter: TransactionId) {
        self.edges.remove(&waiter);
    }

    /// Drop `txn` from the graph entirely, as waiter and as holder
    pub(crate) fn remove_txn(&mut self, txn: TransactionId) {
        self.edges.remove(&txn);
        self.edges.retain(|_, holders| {
            holders.remove(&txn);
            !holders.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) fn waits_on(&self, waiter: TransactionId) -> Option<&HashSet<TransactionId>> {
        self.edges.get(&waiter)
    }

    /// Depth-first search for a cycle passing through `start`. Returns the
    /// transactions on the cycle, starting with `start`.
    pub(crate) fn find_cycle(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        fn visit(
            graph: &HashMap<TransactionId, HashSet<TransactionId>>,
            node: TransactionId,
            start: TransactionId,
            visited: &mut HashSet<TransactionId>,
            path: &mut Vec<TransactionId>,
        ) -> bool {
            path.push(node);
            if let Some(neighbors) = graph.get(&node) {
                for &next in neighbors {
                    if next == start {
                        return true;
                    }
                    if visited.insert(next) && visit(graph, next, start, visited, path) {
                        return true;
                    }
                }
            }
            path.pop();
            false
        }

        let mut visited = HashSet::from([start]);
        let mut path = Vec::new();
        if visit(&self.edges, start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod wait_for_tests {
    use super::*;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);
    const T3: TransactionId = TransactionId(3);
    const T4: TransactionId = TransactionId(4);

    #[test]
    fn test_chain_has_no_cycle() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T2]);
        graph.set_waits(T2, [T3]);
        assert_eq!(graph.find_cycle(T1), None);
        assert_eq!(graph.find_cycle(T3), None);
    }

    #[test]
    fn test_two_party_cycle() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T2]);
        graph.set_waits(T2, [T1]);
        assert_eq!(graph.find_cycle(T1), Some(vec![T1, T2]));
    }

    #[test]
    fn test_cycle_not_through_start_is_ignored() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T2]);
        graph.set_waits(T2, [T3]);
        graph.set_waits(T3, [T2]);
        assert_eq!(graph.find_cycle(T1), None);
        assert_eq!(graph.find_cycle(T2), Some(vec![T2, T3]));
    }

    #[test]
    fn test_long_cycle_through_fan_out() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T2, T4]);
        graph.set_waits(T2, [T3]);
        graph.set_waits(T3, [T1]);
        let cycle = graph.find_cycle(T1).unwrap();
        assert_eq!(cycle, vec![T1, T2, T3]);
    }

    #[test]
    fn test_removing_a_txn_breaks_its_cycles() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T2]);
        graph.set_waits(T2, [T1]);
        graph.remove_txn(T2);
        assert_eq!(graph.find_cycle(T1), None);
        assert!(graph.waits_on(T1).is_none());
    }

    #[test]
    fn test_self_edges_are_dropped() {
        let mut graph = WaitForGraph::new();
        graph.set_waits(T1, [T1]);
        assert!(graph.waits_on(T1).is_none());
        assert_eq!(graph.find_cycle(T1), None);
    }
}
