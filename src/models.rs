use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};

macro_rules! persistent_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

persistent_id!(UserId);
persistent_id!(ConversationId);
persistent_id!(NodeId);
persistent_id!(EdgeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Prompt,
}

impl NodeKind {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            NodeKind::Prompt => "prompt",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "prompt" => Some(NodeKind::Prompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Canvas position as sent by clients; either coordinate may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionPayload {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl PositionPayload {
    pub fn validate(self) -> Result<Position> {
        let (Some(x), Some(y)) = (self.x, self.y) else {
            return Err(LibError::invalid_with_code(
                "position_incomplete",
                "Position requires both x and y",
                anyhow!("position payload missing coordinate: {:?}", self),
            ));
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(LibError::invalid_with_code(
                "position_not_finite",
                "Position coordinates must be finite numbers",
                anyhow!("non-finite position ({}, {})", x, y),
            ));
        }
        Ok(Position { x, y })
    }
}

impl From<Position> for PositionPayload {
    fn from(value: Position) -> Self {
        Self {
            x: Some(value.x),
            y: Some(value.y),
        }
    }
}

/// Kind-specific data attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodePayload {
    Prompt { position: Position },
}

impl NodePayload {
    pub const fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Prompt { .. } => NodeKind::Prompt,
        }
    }

    pub const fn position(&self) -> Position {
        match self {
            NodePayload::Prompt { position } => *position,
        }
    }

    pub fn with_position(self, position: Position) -> Self {
        match self {
            NodePayload::Prompt { .. } => NodePayload::Prompt { position },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_user_id: UserId,
    pub title: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub conversation_id: ConversationId,
    pub kind: NodeKind,
    pub prompt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub ancestor_ids: BTreeSet<NodeId>,
    pub payload: NodePayload,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub conversation_id: ConversationId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationGraph {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub owner_user_id: UserId,
    pub title: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub node_count: i64,
    pub edge_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListConversationsQuery {
    pub fn pagination(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(25).clamp(1, 200);
        (page, limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Created,
    Exists,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePayload {
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub position: PositionPayload,
    /// Client-minted `temp_` identifier to register once the node exists.
    pub temporary_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeResponse {
    pub node_id: NodeId,
    pub conversation_id: ConversationId,
    pub position: Position,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEdgePayload {
    pub source_id: String,
    pub target_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEdgeResponse {
    pub status: EdgeStatus,
    pub edge_id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEdgeResponse {
    pub edge_id: EdgeId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNodeResponse {
    pub node_id: NodeId,
    pub cascaded_edge_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePositionResponse {
    pub node_id: NodeId,
    pub position: Position,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteNodePayload {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteNodeResponse {
    pub node_id: NodeId,
    pub response_text: String,
}
