use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db;
use crate::error::{LibError, Result};
use crate::generation::TextGenerator;
use crate::ids::{self, IdReconciler};
use crate::models::{
    ConversationGraph, ConversationId, ConversationSummary, CreateEdgePayload,
    CreateEdgeResponse, CreateNodePayload, CreateNodeResponse, DeleteEdgeResponse,
    DeleteNodeResponse, EdgeId, ExecuteNodeResponse, ListConversationsQuery, NodeId,
    NodePayload, Paged, PositionPayload, UpdatePositionResponse,
};

/// Tool-friendly graph actions, one per service method.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GraphOperation {
    CreateNode {
        payload: CreateNodePayload,
    },
    CreateEdge {
        payload: CreateEdgePayload,
    },
    DeleteEdge {
        edge_id: String,
    },
    DeleteNode {
        node_id: String,
    },
    UpdateNodePosition {
        node_id: String,
        position: PositionPayload,
    },
    ExecuteNode {
        node_id: String,
        prompt: String,
    },
    GetConversation {
        conversation_id: ConversationId,
    },
    ListConversations {
        #[serde(default)]
        query: ListConversationsQuery,
    },
    ClearMappings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GraphOperationResult {
    NodeCreated(CreateNodeResponse),
    Edge(CreateEdgeResponse),
    EdgeDeleted(DeleteEdgeResponse),
    NodeDeleted(DeleteNodeResponse),
    PositionUpdated(UpdatePositionResponse),
    Executed(ExecuteNodeResponse),
    Conversation(ConversationGraph),
    ConversationsPage(Paged<ConversationSummary>),
    MappingsCleared,
}

/// Orchestrates identifier reconciliation, graph storage and text generation.
#[derive(Clone)]
pub struct PromptGraphService {
    pool: Arc<SqlitePool>,
    reconciler: Arc<IdReconciler>,
    generator: Arc<dyn TextGenerator>,
}

impl PromptGraphService {
    pub fn new(pool: Arc<SqlitePool>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            pool,
            reconciler: Arc::new(IdReconciler::new()),
            generator,
        }
    }

    pub fn from_pool(pool: &SqlitePool, generator: Arc<dyn TextGenerator>) -> Self {
        Self::new(Arc::new(pool.clone()), generator)
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.pool)
    }

    pub fn reconciler(&self) -> &IdReconciler {
        &self.reconciler
    }

    pub async fn execute(&self, operation: GraphOperation) -> Result<GraphOperationResult> {
        match operation {
            GraphOperation::CreateNode { payload } => {
                let created = self.create_node(payload).await?;
                Ok(GraphOperationResult::NodeCreated(created))
            }
            GraphOperation::CreateEdge { payload } => {
                let edge = self.create_edge(payload).await?;
                Ok(GraphOperationResult::Edge(edge))
            }
            GraphOperation::DeleteEdge { edge_id } => {
                let deleted = self.delete_edge(&edge_id).await?;
                Ok(GraphOperationResult::EdgeDeleted(deleted))
            }
            GraphOperation::DeleteNode { node_id } => {
                let deleted = self.delete_node(&node_id).await?;
                Ok(GraphOperationResult::NodeDeleted(deleted))
            }
            GraphOperation::UpdateNodePosition { node_id, position } => {
                let updated = self.update_node_position(&node_id, position).await?;
                Ok(GraphOperationResult::PositionUpdated(updated))
            }
            GraphOperation::ExecuteNode { node_id, prompt } => {
                let executed = self.execute_node(&node_id, &prompt).await?;
                Ok(GraphOperationResult::Executed(executed))
            }
            GraphOperation::GetConversation { conversation_id } => {
                let graph = self.get_conversation_graph(conversation_id).await?;
                Ok(GraphOperationResult::Conversation(graph))
            }
            GraphOperation::ListConversations { query } => {
                let page = self.list_conversations(query).await?;
                Ok(GraphOperationResult::ConversationsPage(page))
            }
            GraphOperation::ClearMappings => {
                self.clear_mappings();
                Ok(GraphOperationResult::MappingsCleared)
            }
        }
    }

    pub async fn create_node(&self, payload: CreateNodePayload) -> Result<CreateNodeResponse> {
        let position = payload.position.validate()?;
        if let Some(temporary_id) = payload.temporary_id.as_deref() {
            if !ids::is_temporary(temporary_id) {
                return Err(LibError::malformed_id(
                    "Temporary identifiers must start with temp_",
                    anyhow!("invalid temporary id {:?}", temporary_id),
                ));
            }
            if let Some(existing) = self.reconciler.mapping(temporary_id) {
                return Err(LibError::conflict(
                    "Temporary identifier is already mapped",
                    anyhow!("{} already maps to node {}", temporary_id, existing),
                ));
            }
        }

        let temporary_id = payload.temporary_id.as_deref();
        let mut registered: Option<NodeId> = None;
        // Registering before commit rolls the node back if another request
        // claimed the temporary id in the meantime.
        let created = db::create_node_with(
            &self.pool,
            payload.conversation_id,
            NodePayload::Prompt { position },
            |node| {
                if let Some(temporary_id) = temporary_id {
                    self.reconciler.register_mapping(temporary_id, node.id.0)?;
                    registered = Some(node.id);
                }
                Ok(())
            },
        )
        .await;

        let node = match created {
            Ok(node) => node,
            Err(err) => {
                if let (Some(temporary_id), Some(node_id)) = (temporary_id, registered) {
                    self.reconciler.forget(temporary_id, node_id.0);
                }
                return Err(err);
            }
        };

        tracing::info!(
            node_id = node.id.0,
            conversation_id = node.conversation_id.0,
            "node created"
        );
        Ok(CreateNodeResponse {
            node_id: node.id,
            conversation_id: node.conversation_id,
            position: node.payload.position(),
        })
    }

    pub async fn create_edge(&self, payload: CreateEdgePayload) -> Result<CreateEdgeResponse> {
        let source_id = NodeId(self.reconciler.resolve(&payload.source_id)?);
        let target_id = NodeId(self.reconciler.resolve(&payload.target_id)?);

        let (status, edge) = db::create_edge(&self.pool, source_id, target_id).await?;
        tracing::info!(
            edge_id = edge.id.0,
            source_node_id = source_id.0,
            target_node_id = target_id.0,
            status = ?status,
            "edge requested"
        );
        Ok(CreateEdgeResponse {
            status,
            edge_id: edge.id,
            source_id: edge.source_node_id,
            target_id: edge.target_node_id,
        })
    }

    pub async fn delete_edge(&self, edge_id: &str) -> Result<DeleteEdgeResponse> {
        let edge_id = EdgeId(ids::parse_persistent(edge_id)?);
        let edge_id = db::delete_edge(&self.pool, edge_id).await?;
        tracing::info!(edge_id = edge_id.0, "edge deleted");
        Ok(DeleteEdgeResponse { edge_id })
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<DeleteNodeResponse> {
        let node_id = NodeId(ids::parse_persistent(node_id)?);
        let (node_id, cascaded_edge_count) = db::delete_node(&self.pool, node_id).await?;
        tracing::info!(node_id = node_id.0, cascaded_edge_count, "node deleted");
        Ok(DeleteNodeResponse {
            node_id,
            cascaded_edge_count,
        })
    }

    pub async fn update_node_position(
        &self,
        node_id: &str,
        position: PositionPayload,
    ) -> Result<UpdatePositionResponse> {
        let node_id = NodeId(ids::parse_persistent(node_id)?);
        let position = position.validate()?;
        let position = db::update_node_position(&self.pool, node_id, position).await?;
        Ok(UpdatePositionResponse { node_id, position })
    }

    /// Runs the raw prompt through the generator and stores prompt and reply.
    ///
    /// Nothing is written unless generation succeeds.
    pub async fn execute_node(&self, node_id: &str, prompt: &str) -> Result<ExecuteNodeResponse> {
        let node_id = NodeId(self.reconciler.resolve(node_id)?);
        let node = db::get_node(&self.pool, node_id).await?;

        let response_text = self.generator.generate(prompt).await.map_err(|err| {
            tracing::warn!(node_id = node.id.0, error = %err, "text generation failed");
            LibError::generation_failed("Failed to generate response", err)
        })?;

        db::set_node_content(&self.pool, node.id, prompt, &response_text).await?;
        tracing::info!(node_id = node.id.0, "node executed");
        Ok(ExecuteNodeResponse {
            node_id: node.id,
            response_text,
        })
    }

    pub async fn get_conversation_graph(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationGraph> {
        db::get_conversation_graph(&self.pool, conversation_id).await
    }

    pub async fn list_conversations(
        &self,
        query: ListConversationsQuery,
    ) -> Result<Paged<ConversationSummary>> {
        let (page, limit) = query.pagination();
        let items = db::list_conversations(&self.pool, page, limit).await?;
        Ok(Paged { page, limit, items })
    }

    pub fn clear_mappings(&self) {
        self.reconciler.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::db::tests::test_pool;
    use crate::error::ErrorKind;
    use crate::models::{EdgeStatus, Position};

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            Ok(format!("echo: {prompt}"))
        }
    }

    /// Replies from a script; an `Err` entry simulates a backend outage.
    struct ScriptedGenerator {
        replies: Mutex<Vec<std::result::Result<String, String>>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            let next = self
                .replies
                .lock()
                .expect("script lock")
                .pop()
                .unwrap_or_else(|| Err("script exhausted".to_string()));
            next.map_err(|message| anyhow!(message))
        }
    }

    async fn service() -> PromptGraphService {
        PromptGraphService::from_pool(&test_pool().await, Arc::new(EchoGenerator))
    }

    fn at(x: f64, y: f64) -> PositionPayload {
        PositionPayload {
            x: Some(x),
            y: Some(y),
        }
    }

    fn new_node(conversation_id: Option<i64>, temporary_id: Option<&str>) -> CreateNodePayload {
        CreateNodePayload {
            conversation_id: conversation_id.map(ConversationId),
            position: at(10.0, 20.0),
            temporary_id: temporary_id.map(str::to_string),
        }
    }

    fn edge(source: &str, target: &str) -> CreateEdgePayload {
        CreateEdgePayload {
            source_id: source.to_string(),
            target_id: target.to_string(),
        }
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let service = service().await;

        let a = service.create_node(new_node(None, None)).await.expect("a");
        assert_eq!(a.node_id, NodeId(1));
        assert_eq!(a.conversation_id, ConversationId(1));
        assert_eq!(a.position, Position { x: 10.0, y: 20.0 });

        let b = service
            .create_node(new_node(Some(1), None))
            .await
            .expect("b");
        assert_eq!(b.node_id, NodeId(2));
        assert_eq!(b.conversation_id, ConversationId(1));

        let created = service.create_edge(edge("1", "2")).await.expect("edge");
        assert_eq!(created.status, EdgeStatus::Created);
        assert_eq!(created.edge_id, EdgeId(1));

        let repeated = service.create_edge(edge("1", "2")).await.expect("edge");
        assert_eq!(repeated.status, EdgeStatus::Exists);
        assert_eq!(repeated.edge_id, EdgeId(1));

        let deleted = service.delete_node("1").await.expect("delete node");
        assert_eq!(deleted.node_id, NodeId(1));
        assert_eq!(deleted.cascaded_edge_count, 1);

        let err = service
            .delete_edge("1")
            .await
            .expect_err("edge should be gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn temporary_ids_resolve_for_edges_and_execution() {
        let service = service().await;
        let a = service
            .create_node(new_node(None, Some("temp_a")))
            .await
            .expect("a");
        let b = service
            .create_node(new_node(Some(a.conversation_id.0), Some("temp_b")))
            .await
            .expect("b");

        let created = service
            .create_edge(edge("temp_a", "temp_b"))
            .await
            .expect("edge");
        assert_eq!(created.source_id, a.node_id);
        assert_eq!(created.target_id, b.node_id);

        let executed = service
            .execute_node("temp_b", "hello")
            .await
            .expect("execute");
        assert_eq!(executed.node_id, b.node_id);
        assert_eq!(executed.response_text, "echo: hello");
    }

    #[tokio::test]
    async fn unknown_temporary_id_fails_before_mutation() {
        let service = service().await;
        let a = service.create_node(new_node(None, None)).await.expect("a");

        let err = service
            .create_edge(edge(&a.node_id.to_string(), "temp_missing"))
            .await
            .expect_err("unknown temp id should fail");
        assert_eq!(err.kind, ErrorKind::UnknownTemporaryIdentifier);
        assert_eq!(
            db::count_edges(&service.pool(), a.conversation_id)
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn reused_temporary_id_is_rejected() {
        let service = service().await;
        service
            .create_node(new_node(None, Some("temp_a")))
            .await
            .expect("first");
        let err = service
            .create_node(new_node(Some(1), Some("temp_a")))
            .await
            .expect_err("reuse should fail");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let graph = service
            .get_conversation_graph(ConversationId(1))
            .await
            .expect("graph");
        assert_eq!(graph.nodes.len(), 1);
    }

    #[tokio::test]
    async fn create_node_validates_position() {
        let service = service().await;
        let err = service
            .create_node(CreateNodePayload {
                conversation_id: None,
                position: PositionPayload {
                    x: Some(1.0),
                    y: None,
                },
                temporary_id: None,
            })
            .await
            .expect_err("incomplete position should fail");
        assert_eq!(err.kind, ErrorKind::InvalidPayload);

        let page = service
            .list_conversations(ListConversationsQuery::default())
            .await
            .expect("list");
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn deletes_reject_temporary_and_malformed_ids() {
        let service = service().await;
        let err = service
            .delete_node("temp_x")
            .await
            .expect_err("temporary id should fail");
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
        let err = service
            .delete_edge("edge-1")
            .await
            .expect_err("malformed id should fail");
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
    }

    #[tokio::test]
    async fn update_position_requires_both_coordinates() {
        let service = service().await;
        let a = service.create_node(new_node(None, None)).await.expect("a");
        let id = a.node_id.to_string();

        let err = service
            .update_node_position(
                &id,
                PositionPayload {
                    x: None,
                    y: Some(3.0),
                },
            )
            .await
            .expect_err("missing x should fail");
        assert_eq!(err.kind, ErrorKind::InvalidPayload);

        let updated = service
            .update_node_position(&id, at(-1.0, 4.0))
            .await
            .expect("update");
        assert_eq!(updated.position, Position { x: -1.0, y: 4.0 });
    }

    #[tokio::test]
    async fn execute_requires_existing_node() {
        let service = service().await;
        let err = service
            .execute_node("41", "hi")
            .await
            .expect_err("missing node should fail");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn generation_failure_leaves_previous_content() {
        let pool = test_pool().await;
        let generator = ScriptedGenerator::new(vec![
            Ok("first answer".to_string()),
            Err("quota exceeded".to_string()),
        ]);
        let service = PromptGraphService::from_pool(&pool, Arc::new(generator));
        let a = service.create_node(new_node(None, None)).await.expect("a");
        let id = a.node_id.to_string();

        service
            .execute_node(&id, "first prompt")
            .await
            .expect("first execution");

        let err = service
            .execute_node(&id, "second prompt")
            .await
            .expect_err("generation should fail");
        assert_eq!(err.kind, ErrorKind::GenerationFailed);

        let node = db::get_node(&pool, a.node_id).await.expect("node");
        assert_eq!(node.prompt_text, "first prompt");
        assert_eq!(node.response_text.as_deref(), Some("first answer"));
    }

    #[tokio::test]
    async fn operations_dispatch_from_tagged_json() {
        let service = service().await;
        let operation: GraphOperation = serde_json::from_value(json!({
            "operation": "create_node",
            "payload": {"position": {"x": 1.0, "y": 2.0}, "temporaryId": "temp_n"}
        }))
        .expect("deserialize");
        let result = service.execute(operation).await.expect("execute");
        assert!(matches!(
            result,
            GraphOperationResult::NodeCreated(CreateNodeResponse { node_id, .. }) if node_id == NodeId(1)
        ));

        let result = service
            .execute(GraphOperation::ClearMappings)
            .await
            .expect("clear");
        assert!(matches!(result, GraphOperationResult::MappingsCleared));
        assert!(service.reconciler().is_empty());

        let value = serde_json::to_value(
            service
                .execute(GraphOperation::ListConversations {
                    query: ListConversationsQuery::default(),
                })
                .await
                .expect("list"),
        )
        .expect("serialize");
        assert_eq!(value["result"], "conversations_page");
        assert_eq!(value["items"][0]["nodeCount"], 1);
    }
}
