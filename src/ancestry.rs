use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::models::{Edge, NodeId};

pub fn adjacency_map(node_ids: &[NodeId], edges: &[Edge]) -> HashMap<NodeId, Vec<NodeId>> {
    let known_nodes: HashSet<NodeId> = node_ids.iter().copied().collect();
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = node_ids
        .iter()
        .map(|node_id| (*node_id, Vec::new()))
        .collect();
    for edge in edges {
        if !known_nodes.contains(&edge.source_node_id) || !known_nodes.contains(&edge.target_node_id)
        {
            // Dangling edges are skipped; foreign keys keep them out of the store.
            continue;
        }
        adjacency
            .entry(edge.source_node_id)
            .or_default()
            .push(edge.target_node_id);
    }
    adjacency
}

pub fn has_cycle(node_ids: &[NodeId], edges: &[Edge]) -> bool {
    topological_sort(node_ids, edges).len() != node_ids.len()
}

/// Kahn ordering of `node_ids`. Nodes on a cycle are left out.
pub fn topological_sort(node_ids: &[NodeId], edges: &[Edge]) -> Vec<NodeId> {
    let adjacency = adjacency_map(node_ids, edges);
    let mut indegree: HashMap<NodeId, usize> =
        node_ids.iter().map(|node_id| (*node_id, 0)).collect();
    for children in adjacency.values() {
        for child in children {
            if let Some(degree) = indegree.get_mut(child) {
                *degree += 1;
            }
        }
    }

    // Seed in id order so the result is deterministic.
    let mut queue: VecDeque<NodeId> = node_ids
        .iter()
        .filter(|node_id| indegree.get(node_id) == Some(&0))
        .copied()
        .collect();

    let mut ordered = Vec::with_capacity(node_ids.len());
    while let Some(node_id) = queue.pop_front() {
        ordered.push(node_id);
        if let Some(children) = adjacency.get(&node_id) {
            for child in children {
                if let Some(child_degree) = indegree.get_mut(child) {
                    *child_degree -= 1;
                    if *child_degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    ordered
}

/// Transitive set of predecessors for every node.
pub fn ancestor_closure(
    node_ids: &[NodeId],
    edges: &[Edge],
) -> HashMap<NodeId, BTreeSet<NodeId>> {
    let known_nodes: HashSet<NodeId> = node_ids.iter().copied().collect();
    let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(node_ids.len());
    for edge in edges {
        if known_nodes.contains(&edge.source_node_id) && known_nodes.contains(&edge.target_node_id)
        {
            predecessors
                .entry(edge.target_node_id)
                .or_default()
                .push(edge.source_node_id);
        }
    }

    let mut closure: HashMap<NodeId, BTreeSet<NodeId>> = node_ids
        .iter()
        .map(|node_id| (*node_id, BTreeSet::new()))
        .collect();
    for node_id in topological_sort(node_ids, edges) {
        let Some(parents) = predecessors.get(&node_id) else {
            continue;
        };
        let mut ancestors = BTreeSet::new();
        for parent in parents {
            ancestors.insert(*parent);
            if let Some(parent_ancestors) = closure.get(parent) {
                ancestors.extend(parent_ancestors.iter().copied());
            }
        }
        closure.insert(node_id, ancestors);
    }

    closure
}

/// Every node reachable from `start`, not counting `start` itself.
pub fn descendants(start: NodeId, adjacency: &HashMap<NodeId, Vec<NodeId>>) -> HashSet<NodeId> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);

    while let Some(node_id) = queue.pop_front() {
        if let Some(children) = adjacency.get(&node_id) {
            for child in children {
                if *child != start && reachable.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationId, EdgeId};

    fn ids(raw: &[i64]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    fn edge(id: i64, from: i64, to: i64) -> Edge {
        Edge {
            id: EdgeId(id),
            conversation_id: ConversationId(1),
            source_node_id: NodeId(from),
            target_node_id: NodeId(to),
        }
    }

    fn set(raw: &[i64]) -> BTreeSet<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn chain_closure_contains_all_predecessors() {
        let nodes = ids(&[1, 2, 3]);
        let edges = vec![edge(1, 1, 2), edge(2, 2, 3)];
        let closure = ancestor_closure(&nodes, &edges);
        assert_eq!(closure[&NodeId(1)], set(&[]));
        assert_eq!(closure[&NodeId(2)], set(&[1]));
        assert_eq!(closure[&NodeId(3)], set(&[1, 2]));
    }

    #[test]
    fn closure_is_independent_of_edge_order() {
        let nodes = ids(&[1, 2, 3, 4]);
        let forward = vec![edge(1, 1, 2), edge(2, 2, 3), edge(3, 4, 3)];
        let reversed = vec![edge(3, 4, 3), edge(2, 2, 3), edge(1, 1, 2)];
        assert_eq!(
            ancestor_closure(&nodes, &forward),
            ancestor_closure(&nodes, &reversed)
        );
    }

    #[test]
    fn diamond_merges_both_branches() {
        let nodes = ids(&[1, 2, 3, 4]);
        let edges = vec![edge(1, 1, 2), edge(2, 1, 3), edge(3, 2, 4), edge(4, 3, 4)];
        let closure = ancestor_closure(&nodes, &edges);
        assert_eq!(closure[&NodeId(4)], set(&[1, 2, 3]));
    }

    #[test]
    fn dag_has_no_cycle() {
        let nodes = ids(&[1, 2]);
        assert!(!has_cycle(&nodes, &[edge(1, 1, 2)]));
        assert_eq!(topological_sort(&nodes, &[edge(1, 1, 2)]), ids(&[1, 2]));
    }

    #[test]
    fn cycle_detects_properly() {
        let nodes = ids(&[1, 2]);
        assert!(has_cycle(&nodes, &[edge(1, 1, 2), edge(2, 2, 1)]));
    }

    #[test]
    fn descendants_follow_outgoing_edges() {
        let nodes = ids(&[1, 2, 3, 4]);
        let edges = vec![edge(1, 1, 2), edge(2, 2, 3), edge(3, 4, 1)];
        let adjacency = adjacency_map(&nodes, &edges);
        let reachable = descendants(NodeId(2), &adjacency);
        assert_eq!(reachable, [NodeId(3)].into_iter().collect());
        assert_eq!(descendants(NodeId(4), &adjacency).len(), 3);
    }

    #[test]
    fn dangling_edges_are_ignored() {
        let nodes = ids(&[1]);
        let closure = ancestor_closure(&nodes, &[edge(1, 9, 1)]);
        assert!(closure[&NodeId(1)].is_empty());
    }
}
