pub mod ancestry;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod ids;
pub mod invariants;
pub mod models;
pub mod operations;

pub mod prelude {
    pub use crate::ancestry::{adjacency_map, ancestor_closure, descendants, has_cycle, topological_sort};
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, HasGraphService};
    pub use crate::config::PromptGraphConfig;
    pub use crate::db::{
        connect, count_edges, create_conversation, create_edge, create_node,
        create_prompt_graph_tables, create_user, delete_edge, delete_node, delete_user,
        get_conversation, get_conversation_graph, get_node, list_conversations,
        set_node_content, update_node_position,
    };
    pub use crate::error::{ErrorKind, LibError, Result};
    #[cfg(feature = "gemini")]
    pub use crate::generation::GeminiGenerator;
    pub use crate::generation::TextGenerator;
    pub use crate::ids::{IdReconciler, TEMPORARY_ID_PREFIX};
    pub use crate::models::{
        Conversation, ConversationGraph, ConversationId, ConversationSummary, CreateEdgePayload,
        CreateEdgeResponse, CreateNodePayload, CreateNodeResponse, DeleteEdgeResponse,
        DeleteNodeResponse, Edge, EdgeId, EdgeStatus, ExecuteNodePayload, ExecuteNodeResponse,
        ListConversationsQuery, Node, NodeId, NodeKind, NodePayload, Paged, Position,
        PositionPayload, UpdatePositionResponse, User, UserId,
    };
    pub use crate::operations::{GraphOperation, GraphOperationResult, PromptGraphService};
}
