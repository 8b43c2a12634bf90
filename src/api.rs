use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde_json::json;

use crate::error::{ErrorKind, LibError};
use crate::models::{
    ConversationId, CreateEdgePayload, CreateNodePayload, EdgeStatus, ExecuteNodePayload,
    ListConversationsQuery, PositionPayload,
};
use crate::operations::PromptGraphService;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::UnknownTemporaryIdentifier => StatusCode::BAD_REQUEST,
        ErrorKind::MalformedIdentifier => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidPayload => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::GenerationFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "prompt graph request failed");
        } else {
            tracing::warn!(kind = ?self.0.kind, error = %self.0.source, "prompt graph request rejected");
        }

        (
            status,
            Json(json!({
                "error": {
                    "code": self.0.code,
                    "message": self.0.public,
                }
            })),
        )
            .into_response()
    }
}

pub trait HasGraphService {
    fn graph_service(&self) -> PromptGraphService;
}

async fn create_node_handler<S>(
    State(app): State<S>,
    Json(payload): Json<CreateNodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let created = app.graph_service().create_node(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_node_handler<S>(
    State(app): State<S>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let deleted = app.graph_service().delete_node(&node_id).await?;
    Ok(Json(deleted))
}

async fn update_position_handler<S>(
    State(app): State<S>,
    Path(node_id): Path<String>,
    Json(position): Json<PositionPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let updated = app
        .graph_service()
        .update_node_position(&node_id, position)
        .await?;
    Ok(Json(updated))
}

async fn execute_node_handler<S>(
    State(app): State<S>,
    Path(node_id): Path<String>,
    Json(payload): Json<ExecuteNodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let executed = app
        .graph_service()
        .execute_node(&node_id, &payload.prompt)
        .await?;
    Ok(Json(executed))
}

async fn create_edge_handler<S>(
    State(app): State<S>,
    Json(payload): Json<CreateEdgePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let edge = app.graph_service().create_edge(payload).await?;
    let status = match edge.status {
        EdgeStatus::Created => StatusCode::CREATED,
        EdgeStatus::Exists => StatusCode::OK,
    };
    Ok((status, Json(edge)))
}

async fn delete_edge_handler<S>(
    State(app): State<S>,
    Path(edge_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let deleted = app.graph_service().delete_edge(&edge_id).await?;
    Ok(Json(deleted))
}

async fn list_conversations_handler<S>(
    State(app): State<S>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let page = app.graph_service().list_conversations(query).await?;
    Ok(Json(page))
}

async fn get_conversation_handler<S>(
    State(app): State<S>,
    Path(conversation_id): Path<ConversationId>,
) -> Result<impl IntoResponse, AppError>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    let graph = app
        .graph_service()
        .get_conversation_graph(conversation_id)
        .await?;
    Ok(Json(graph))
}

async fn clear_mappings_handler<S>(State(app): State<S>) -> StatusCode
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    app.graph_service().clear_mappings();
    StatusCode::NO_CONTENT
}

pub fn routes<S>() -> Router<S>
where
    S: HasGraphService + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /graph/nodes [POST]");
    tracing::info!("Registering route /graph/nodes/{{node_id}} [DELETE]");
    tracing::info!("Registering route /graph/nodes/{{node_id}}/position [PUT]");
    tracing::info!("Registering route /graph/nodes/{{node_id}}/execute [POST]");
    tracing::info!("Registering route /graph/edges [POST]");
    tracing::info!("Registering route /graph/edges/{{edge_id}} [DELETE]");
    tracing::info!("Registering route /graph/conversations [GET]");
    tracing::info!("Registering route /graph/conversations/{{conversation_id}} [GET]");
    tracing::info!("Registering route /graph/mappings [DELETE]");

    Router::new()
        .route("/graph/nodes", post(create_node_handler::<S>))
        .route("/graph/nodes/{node_id}", delete(delete_node_handler::<S>))
        .route(
            "/graph/nodes/{node_id}/position",
            put(update_position_handler::<S>),
        )
        .route(
            "/graph/nodes/{node_id}/execute",
            post(execute_node_handler::<S>),
        )
        .route("/graph/edges", post(create_edge_handler::<S>))
        .route("/graph/edges/{edge_id}", delete(delete_edge_handler::<S>))
        .route(
            "/graph/conversations",
            get(list_conversations_handler::<S>),
        )
        .route(
            "/graph/conversations/{conversation_id}",
            get(get_conversation_handler::<S>),
        )
        .route("/graph/mappings", delete(clear_mappings_handler::<S>))
}
