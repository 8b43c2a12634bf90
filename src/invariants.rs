use anyhow::anyhow;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::{ConversationId, Node, NodeId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeInvariantViolation {
    SelfLoop {
        node_id: NodeId,
    },
    CrossConversation {
        source_conversation_id: ConversationId,
        target_conversation_id: ConversationId,
    },
    CycleDetected {
        source_node_id: NodeId,
        target_node_id: NodeId,
    },
}

impl EdgeInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            EdgeInvariantViolation::SelfLoop { .. } => "graph_self_loop_violation",
            EdgeInvariantViolation::CrossConversation { .. } => "graph_cross_conversation_edge",
            EdgeInvariantViolation::CycleDetected { .. } => "graph_dag_cycle",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            EdgeInvariantViolation::SelfLoop { .. } => "A node cannot be connected to itself",
            EdgeInvariantViolation::CrossConversation { .. } => {
                "Edges must connect nodes in the same conversation"
            }
            EdgeInvariantViolation::CycleDetected { .. } => "Prompt graphs must be acyclic",
        }
    }
}

/// Checks that `source -> target` keeps the conversation a DAG.
///
/// Relies on `source.ancestor_ids` being the full closure, which the store
/// maintains on every edge mutation.
pub fn edge_insertion_violations(source: &Node, target: &Node) -> Vec<EdgeInvariantViolation> {
    let mut violations = Vec::new();

    if source.id == target.id {
        violations.push(EdgeInvariantViolation::SelfLoop { node_id: source.id });
        return violations;
    }

    if source.conversation_id != target.conversation_id {
        violations.push(EdgeInvariantViolation::CrossConversation {
            source_conversation_id: source.conversation_id,
            target_conversation_id: target.conversation_id,
        });
    }

    if source.ancestor_ids.contains(&target.id) {
        violations.push(EdgeInvariantViolation::CycleDetected {
            source_node_id: source.id,
            target_node_id: target.id,
        });
    }

    violations
}

pub fn ensure_edge_insertion(source: &Node, target: &Node) -> Result<()> {
    let violations = edge_insertion_violations(source, target);
    if let Some(first) = violations.first() {
        return Err(LibError::invalid_with_code(
            first.error_code(),
            first.public_message(),
            anyhow!(
                "edge {} -> {} rejected: {:?}",
                source.id,
                target.id,
                violations
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{NodeKind, NodePayload, Position};

    fn node(id: i64, conversation: i64, ancestors: &[i64]) -> Node {
        Node {
            id: NodeId(id),
            conversation_id: ConversationId(conversation),
            kind: NodeKind::Prompt,
            prompt_text: String::new(),
            response_text: None,
            ancestor_ids: ancestors.iter().copied().map(NodeId).collect::<BTreeSet<_>>(),
            payload: NodePayload::Prompt {
                position: Position::default(),
            },
            created_at: NaiveDate::from_ymd_opt(2026, 1, 1)
                .expect("valid date")
                .and_hms_opt(0, 0, 0)
                .expect("valid datetime"),
        }
    }

    #[test]
    fn accepts_edge_between_unrelated_nodes() {
        assert!(edge_insertion_violations(&node(1, 1, &[]), &node(2, 1, &[])).is_empty());
    }

    #[test]
    fn rejects_self_loop() {
        let a = node(1, 1, &[]);
        let err = ensure_edge_insertion(&a, &a).expect_err("self-loop should fail");
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
        assert_eq!(err.code, "graph_self_loop_violation");
    }

    #[test]
    fn rejects_edge_closing_a_cycle() {
        // 1 -> 2 -> 3 exists; 3 -> 1 would close the loop.
        let source = node(3, 1, &[1, 2]);
        let target = node(1, 1, &[]);
        let violations = edge_insertion_violations(&source, &target);
        assert!(matches!(
            violations.as_slice(),
            [EdgeInvariantViolation::CycleDetected { source_node_id, target_node_id }]
                if *source_node_id == NodeId(3) && *target_node_id == NodeId(1)
        ));
    }

    #[test]
    fn rejects_cross_conversation_edge() {
        let err = ensure_edge_insertion(&node(1, 1, &[]), &node(2, 2, &[]))
            .expect_err("cross conversation should fail");
        assert_eq!(err.code, "graph_cross_conversation_edge");
    }
}
