use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::ancestry;
use crate::error::{LibError, Result};
use crate::invariants;
use crate::models::{
    Conversation, ConversationGraph, ConversationId, ConversationSummary, Edge, EdgeId,
    EdgeStatus, Node, NodeId, NodeKind, NodePayload, Position, User, UserId,
};

/// Owner assigned to conversations created implicitly by node creation.
pub const DEFAULT_OWNER_USER_ID: UserId = UserId(1);
pub const DEFAULT_CONVERSATION_TITLE: &str = "Untitled conversation";

/// How long a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_prompt_graph_tables(pool: &SqlitePool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Opens a pool with foreign keys enforced, creating the database file if needed.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|err| db_err("Invalid database URL", err))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|err| db_err("Failed to connect to database", err))
}

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct ConversationRow {
    id: i64,
    user_id: i64,
    title: String,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct ConversationSummaryRow {
    id: i64,
    user_id: i64,
    title: String,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
    node_count: i64,
    edge_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct NodeRow {
    id: i64,
    conversation_id: i64,
    node_kind: String,
    prompt_text: String,
    response_text: Option<String>,
    ancestor_ids: Json<BTreeSet<NodeId>>,
    payload: Json<NodePayload>,
    created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct EdgeRow {
    id: i64,
    conversation_id: i64,
    source_node_id: i64,
    target_node_id: i64,
}

#[derive(Debug, Clone, FromRow)]
struct AncestryRow {
    id: i64,
    ancestor_ids: Json<BTreeSet<NodeId>>,
}

impl From<UserRow> for User {
    fn from(value: UserRow) -> Self {
        Self {
            id: UserId(value.id),
            name: value.name,
            email: value.email,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<ConversationRow> for Conversation {
    fn from(value: ConversationRow) -> Self {
        Self {
            id: ConversationId(value.id),
            owner_user_id: UserId(value.user_id),
            title: value.title,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<ConversationSummaryRow> for ConversationSummary {
    fn from(value: ConversationSummaryRow) -> Self {
        Self {
            id: ConversationId(value.id),
            owner_user_id: UserId(value.user_id),
            title: value.title,
            created_at: value.created_at,
            updated_at: value.updated_at,
            node_count: value.node_count,
            edge_count: value.edge_count,
        }
    }
}

impl From<EdgeRow> for Edge {
    fn from(value: EdgeRow) -> Self {
        Self {
            id: EdgeId(value.id),
            conversation_id: ConversationId(value.conversation_id),
            source_node_id: NodeId(value.source_node_id),
            target_node_id: NodeId(value.target_node_id),
        }
    }
}

impl TryFrom<NodeRow> for Node {
    type Error = LibError;

    fn try_from(value: NodeRow) -> Result<Self> {
        let kind = NodeKind::from_db_value(&value.node_kind).ok_or_else(|| {
            LibError::persistence(
                "Stored node has an unknown kind",
                anyhow!("node {} has kind {:?}", value.id, value.node_kind),
            )
        })?;
        let Json(payload) = value.payload;
        if payload.kind() != kind {
            return Err(LibError::persistence(
                "Stored node payload does not match its kind",
                anyhow!(
                    "node {} kind {} carries {:?} payload",
                    value.id,
                    kind.as_db_value(),
                    payload.kind()
                ),
            ));
        }

        Ok(Self {
            id: NodeId(value.id),
            conversation_id: ConversationId(value.conversation_id),
            kind,
            prompt_text: value.prompt_text,
            response_text: value.response_text,
            ancestor_ids: value.ancestor_ids.0,
            payload,
            created_at: value.created_at,
        })
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::persistence(public, anyhow!(err))
}

const NODE_COLUMNS: &str = r#"
    id,
    conversation_id,
    node_kind,
    prompt_text,
    response_text,
    ancestor_ids,
    payload,
    created_at
"#;

/// Write transaction holding the database write lock from `BEGIN`; concurrent
/// writers queue on [`BUSY_TIMEOUT`] rather than failing on lock upgrade.
async fn begin(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|err| db_err("Failed to start transaction", err))
}

async fn commit(tx: Transaction<'_, Sqlite>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))
}

pub async fn create_user(pool: &SqlitePool, name: &str, email: &str) -> Result<User> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(LibError::invalid(
            "User name and email are required",
            anyhow!("empty user name or email"),
        ));
    }

    let row = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (name, email)
        VALUES ($1, $2)
        RETURNING id, name, email, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => LibError::conflict(
            "A user with this email already exists",
            anyhow!("duplicate email {}", email),
        ),
        other => db_err("Failed to create user", other),
    })?;

    Ok(row.into())
}

/// Removes a user together with every conversation, node and edge it owns.
pub async fn delete_user(pool: &SqlitePool, user_id: UserId) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to delete user", err))?;

    if result.rows_affected() == 0 {
        return Err(LibError::not_found(
            "User not found",
            anyhow!("user {} not found", user_id),
        ));
    }

    tracing::debug!(user_id = user_id.0, "deleted user");
    Ok(())
}

async fn ensure_default_owner(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO users (id, name, email)
        VALUES ($1, 'Demo User', 'demo@example.com')
        "#,
    )
    .bind(DEFAULT_OWNER_USER_ID.0)
    .execute(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to create default owner", err))?;

    Ok(())
}

async fn insert_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    owner: UserId,
    title: &str,
) -> Result<Conversation> {
    let row = sqlx::query_as::<_, ConversationRow>(
        r#"
        INSERT INTO conversations (user_id, title)
        VALUES ($1, $2)
        RETURNING id, user_id, title, created_at, updated_at
        "#,
    )
    .bind(owner.0)
    .bind(title)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to create conversation", err))?;

    Ok(row.into())
}

pub async fn create_conversation(
    pool: &SqlitePool,
    owner: UserId,
    title: &str,
) -> Result<Conversation> {
    let title = match title.trim() {
        "" => DEFAULT_CONVERSATION_TITLE,
        trimmed => trimmed,
    };

    let mut tx = begin(pool).await?;
    let owner_exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM users
            WHERE id = $1
        )
        "#,
    )
    .bind(owner.0)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to query user", err))?;

    if !owner_exists.0 {
        return Err(LibError::not_found(
            "User not found",
            anyhow!("user {} not found", owner),
        ));
    }

    let conversation = insert_conversation(&mut tx, owner, title).await?;
    commit(tx).await?;
    Ok(conversation)
}

pub async fn get_conversation(
    pool: &SqlitePool,
    conversation_id: ConversationId,
) -> Result<Conversation> {
    let row = sqlx::query_as::<_, ConversationRow>(
        r#"
        SELECT id, user_id, title, created_at, updated_at
        FROM conversations
        WHERE id = $1
        "#,
    )
    .bind(conversation_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query conversation", err))?;

    row.map(Conversation::from).ok_or_else(|| {
        LibError::not_found(
            "Conversation not found",
            anyhow!("conversation {} not found", conversation_id),
        )
    })
}

pub async fn list_conversations(
    pool: &SqlitePool,
    page: u32,
    limit: u32,
) -> Result<Vec<ConversationSummary>> {
    let offset = (page.saturating_sub(1) as i64).saturating_mul(limit as i64);

    let rows = sqlx::query_as::<_, ConversationSummaryRow>(
        r#"
        SELECT
            c.id,
            c.user_id,
            c.title,
            c.created_at,
            c.updated_at,
            COALESCE(n.node_count, 0) AS node_count,
            COALESCE(e.edge_count, 0) AS edge_count
        FROM conversations c
        LEFT JOIN (
            SELECT conversation_id, COUNT(*) AS node_count
            FROM nodes
            GROUP BY conversation_id
        ) n
        ON n.conversation_id = c.id
        LEFT JOIN (
            SELECT conversation_id, COUNT(*) AS edge_count
            FROM edges
            GROUP BY conversation_id
        ) e
        ON e.conversation_id = c.id
        ORDER BY c.updated_at DESC, c.id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit as i64)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list conversations", err))?;

    Ok(rows.into_iter().map(ConversationSummary::from).collect())
}

pub async fn get_conversation_graph(
    pool: &SqlitePool,
    conversation_id: ConversationId,
) -> Result<ConversationGraph> {
    let conversation = get_conversation(pool, conversation_id).await?;

    let nodes = sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        SELECT {NODE_COLUMNS}
        FROM nodes
        WHERE conversation_id = $1
        ORDER BY id ASC
        "#
    ))
    .bind(conversation_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query conversation nodes", err))?
    .into_iter()
    .map(Node::try_from)
    .collect::<Result<Vec<_>>>()?;

    let edges = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, conversation_id, source_node_id, target_node_id
        FROM edges
        WHERE conversation_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(conversation_id.0)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query conversation edges", err))?
    .into_iter()
    .map(Edge::from)
    .collect();

    Ok(ConversationGraph {
        conversation,
        nodes,
        edges,
    })
}

async fn touch_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: ConversationId,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE conversations
        SET updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        "#,
    )
    .bind(conversation_id.0)
    .execute(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to update conversation", err))?;

    Ok(())
}

async fn fetch_node(tx: &mut Transaction<'_, Sqlite>, node_id: NodeId) -> Result<Node> {
    let row = sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        SELECT {NODE_COLUMNS}
        FROM nodes
        WHERE id = $1
        "#
    ))
    .bind(node_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to query node", err))?;

    match row {
        Some(row) => Node::try_from(row),
        None => Err(LibError::not_found(
            "Node not found",
            anyhow!("node {} not found", node_id),
        )),
    }
}

async fn fetch_edge_by_pair(
    tx: &mut Transaction<'_, Sqlite>,
    source: NodeId,
    target: NodeId,
) -> Result<Option<Edge>> {
    let row = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, conversation_id, source_node_id, target_node_id
        FROM edges
        WHERE source_node_id = $1
          AND target_node_id = $2
        "#,
    )
    .bind(source.0)
    .bind(target.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to query edge", err))?;

    Ok(row.map(Edge::from))
}

/// Recomputes ancestor sets for `roots` and everything downstream of them.
///
/// Returns how many node rows were rewritten.
async fn refresh_ancestry(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: ConversationId,
    roots: &[NodeId],
) -> Result<usize> {
    let stored = sqlx::query_as::<_, AncestryRow>(
        r#"
        SELECT id, ancestor_ids
        FROM nodes
        WHERE conversation_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(conversation_id.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to load node ancestry", err))?;

    let edges = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, conversation_id, source_node_id, target_node_id
        FROM edges
        WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(|err| db_err("Failed to load conversation edges", err))?
    .into_iter()
    .map(Edge::from)
    .collect::<Vec<_>>();

    let node_ids = stored.iter().map(|row| NodeId(row.id)).collect::<Vec<_>>();
    let adjacency = ancestry::adjacency_map(&node_ids, &edges);
    let mut affected: HashSet<NodeId> = HashSet::new();
    for root in roots {
        if adjacency.contains_key(root) {
            affected.insert(*root);
            affected.extend(ancestry::descendants(*root, &adjacency));
        }
    }
    if affected.is_empty() {
        return Ok(0);
    }

    let closure = ancestry::ancestor_closure(&node_ids, &edges);
    let mut updated = 0usize;
    for row in stored {
        let node_id = NodeId(row.id);
        if !affected.contains(&node_id) {
            continue;
        }
        let Some(expected) = closure.get(&node_id) else {
            continue;
        };
        if *expected == row.ancestor_ids.0 {
            continue;
        }

        sqlx::query(
            r#"
            UPDATE nodes
            SET ancestor_ids = $1
            WHERE id = $2
            "#,
        )
        .bind(Json(expected))
        .bind(node_id.0)
        .execute(&mut **tx)
        .await
        .map_err(|err| db_err("Failed to update node ancestry", err))?;
        updated += 1;
    }

    tracing::debug!(
        conversation_id = conversation_id.0,
        affected = affected.len(),
        updated,
        "refreshed ancestor sets"
    );
    Ok(updated)
}

/// Creates a prompt node, creating its conversation first when none is given.
pub async fn create_node(
    pool: &SqlitePool,
    conversation_id: Option<ConversationId>,
    payload: NodePayload,
) -> Result<Node> {
    create_node_with(pool, conversation_id, payload, |_| Ok(())).await
}

/// [`create_node`] with a hook that runs before commit.
///
/// An error from `before_commit` rolls back the node and any conversation
/// created for it.
pub async fn create_node_with<F>(
    pool: &SqlitePool,
    conversation_id: Option<ConversationId>,
    payload: NodePayload,
    before_commit: F,
) -> Result<Node>
where
    F: FnOnce(&Node) -> Result<()> + Send,
{
    let mut tx = begin(pool).await?;

    let conversation_id = match conversation_id {
        Some(conversation_id) => {
            let exists: (bool,) = sqlx::query_as(
                r#"
                SELECT EXISTS(
                    SELECT 1
                    FROM conversations
                    WHERE id = $1
                )
                "#,
            )
            .bind(conversation_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to query conversation", err))?;

            if !exists.0 {
                return Err(LibError::not_found(
                    "Conversation not found",
                    anyhow!("conversation {} not found", conversation_id),
                ));
            }
            conversation_id
        }
        None => {
            ensure_default_owner(&mut tx).await?;
            insert_conversation(&mut tx, DEFAULT_OWNER_USER_ID, DEFAULT_CONVERSATION_TITLE)
                .await?
                .id
        }
    };

    let row = sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        INSERT INTO nodes (conversation_id, node_kind, prompt_text, ancestor_ids, payload)
        VALUES ($1, $2, '', '[]', $3)
        RETURNING {NODE_COLUMNS}
        "#
    ))
    .bind(conversation_id.0)
    .bind(payload.kind().as_db_value())
    .bind(Json(&payload))
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to create node", err))?;

    let node = Node::try_from(row)?;
    touch_conversation(&mut tx, conversation_id).await?;
    before_commit(&node)?;
    commit(tx).await?;

    tracing::debug!(
        node_id = node.id.0,
        conversation_id = conversation_id.0,
        "created node"
    );
    Ok(node)
}

pub async fn get_node(pool: &SqlitePool, node_id: NodeId) -> Result<Node> {
    let row = sqlx::query_as::<_, NodeRow>(&format!(
        r#"
        SELECT {NODE_COLUMNS}
        FROM nodes
        WHERE id = $1
        "#
    ))
    .bind(node_id.0)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query node", err))?;

    match row {
        Some(row) => Node::try_from(row),
        None => Err(LibError::not_found(
            "Node not found",
            anyhow!("node {} not found", node_id),
        )),
    }
}

/// Idempotent edge creation.
///
/// An existing `(source, target)` edge is returned with [`EdgeStatus::Exists`].
/// A new edge and the ancestor sets it changes commit together.
pub async fn create_edge(
    pool: &SqlitePool,
    source_id: NodeId,
    target_id: NodeId,
) -> Result<(EdgeStatus, Edge)> {
    let mut tx = begin(pool).await?;

    let source = fetch_node(&mut tx, source_id).await?;
    let target = fetch_node(&mut tx, target_id).await?;

    if let Some(existing) = fetch_edge_by_pair(&mut tx, source.id, target.id).await? {
        return Ok((EdgeStatus::Exists, existing));
    }

    invariants::ensure_edge_insertion(&source, &target)?;

    let inserted = sqlx::query_as::<_, EdgeRow>(
        r#"
        INSERT INTO edges (conversation_id, source_node_id, target_node_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (source_node_id, target_node_id) DO NOTHING
        RETURNING id, conversation_id, source_node_id, target_node_id
        "#,
    )
    .bind(source.conversation_id.0)
    .bind(source.id.0)
    .bind(target.id.0)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to create edge", err))?;

    let Some(inserted) = inserted else {
        // Lost a race against an identical request.
        let existing = fetch_edge_by_pair(&mut tx, source.id, target.id)
            .await?
            .ok_or_else(|| {
                LibError::persistence(
                    "Edge vanished during creation",
                    anyhow!("edge {} -> {} conflicted but was not found", source.id, target.id),
                )
            })?;
        return Ok((EdgeStatus::Exists, existing));
    };

    let edge = Edge::from(inserted);
    refresh_ancestry(&mut tx, edge.conversation_id, &[edge.target_node_id]).await?;
    touch_conversation(&mut tx, edge.conversation_id).await?;
    commit(tx).await?;

    tracing::debug!(
        edge_id = edge.id.0,
        source_node_id = edge.source_node_id.0,
        target_node_id = edge.target_node_id.0,
        "created edge"
    );
    Ok((EdgeStatus::Created, edge))
}

/// Deletes an edge and repairs the ancestor sets downstream of its target.
pub async fn delete_edge(pool: &SqlitePool, edge_id: EdgeId) -> Result<EdgeId> {
    let mut tx = begin(pool).await?;

    let edge = sqlx::query_as::<_, EdgeRow>(
        r#"
        DELETE FROM edges
        WHERE id = $1
        RETURNING id, conversation_id, source_node_id, target_node_id
        "#,
    )
    .bind(edge_id.0)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete edge", err))?
    .map(Edge::from)
    .ok_or_else(|| {
        LibError::not_found("Edge not found", anyhow!("edge {} not found", edge_id))
    })?;

    refresh_ancestry(&mut tx, edge.conversation_id, &[edge.target_node_id]).await?;
    touch_conversation(&mut tx, edge.conversation_id).await?;
    commit(tx).await?;

    tracing::debug!(edge_id = edge_id.0, "deleted edge");
    Ok(edge.id)
}

/// Deletes a node and every edge touching it. Returns the cascaded edge count.
pub async fn delete_node(pool: &SqlitePool, node_id: NodeId) -> Result<(NodeId, u64)> {
    let mut tx = begin(pool).await?;

    let node = fetch_node(&mut tx, node_id).await?;

    let children: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT target_node_id
        FROM edges
        WHERE source_node_id = $1
        "#,
    )
    .bind(node_id.0)
    .fetch_all(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to query node edges", err))?;

    let cascaded = sqlx::query(
        r#"
        DELETE FROM edges
        WHERE source_node_id = $1
           OR target_node_id = $1
        "#,
    )
    .bind(node_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete node edges", err))?
    .rows_affected();

    sqlx::query(
        r#"
        DELETE FROM nodes
        WHERE id = $1
        "#,
    )
    .bind(node_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to delete node", err))?;

    let children = children
        .into_iter()
        .map(|(id,)| NodeId(id))
        .collect::<Vec<_>>();
    refresh_ancestry(&mut tx, node.conversation_id, &children).await?;
    touch_conversation(&mut tx, node.conversation_id).await?;
    commit(tx).await?;

    tracing::debug!(node_id = node_id.0, cascaded, "deleted node");
    Ok((node.id, cascaded))
}

pub async fn update_node_position(
    pool: &SqlitePool,
    node_id: NodeId,
    position: Position,
) -> Result<Position> {
    let mut tx = begin(pool).await?;

    let node = fetch_node(&mut tx, node_id).await?;
    let payload = node.payload.with_position(position);

    sqlx::query(
        r#"
        UPDATE nodes
        SET payload = $1
        WHERE id = $2
        "#,
    )
    .bind(Json(&payload))
    .bind(node_id.0)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to update node position", err))?;

    commit(tx).await?;
    Ok(payload.position())
}

/// Writes prompt and response in one statement so neither lands alone.
pub async fn set_node_content(
    pool: &SqlitePool,
    node_id: NodeId,
    prompt: &str,
    response: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET prompt_text = $1,
            response_text = $2
        WHERE id = $3
        "#,
    )
    .bind(prompt)
    .bind(response)
    .bind(node_id.0)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to store node content", err))?;

    if result.rows_affected() == 0 {
        return Err(LibError::not_found(
            "Node not found",
            anyhow!("node {} not found", node_id),
        ));
    }

    Ok(())
}

pub async fn count_edges(pool: &SqlitePool, conversation_id: ConversationId) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM edges
        WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id.0)
    .fetch_one(pool)
    .await
    .map_err(|err| db_err("Failed to count edges", err))?;

    Ok(count.0)
}
