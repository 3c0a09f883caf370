//! SQLite repository implementation for the inbox crate
//!
//! Hand-written SQL over libsql. The lifecycle transitions run inside
//! `BEGIN IMMEDIATE` transactions: the status check and every side effect
//! commit together or not at all, which is what closes the concurrent-assign
//! race. The partial unique index on active assignments backs the same
//! invariant at the schema level.

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use libsql::params::Params;
use shared::{
    error::CommonError,
    libsql::{Migrations, SqlMigrationLoader},
    primitives::{PageRequest, SortDirection, WrappedChronoDateTime, WrappedUuidV4},
};
use tracing::trace;

use crate::logic::{
    assignment::Assignment,
    conversation::{Conversation, ConversationStats, ConversationStatus, ensure_transition},
    message::Message,
    notification::Notification,
};
use crate::repository::{
    AppendMessage, ArchiveConversation, AssignConversation, AssignmentRepositoryLike,
    ConversationFilter, ConversationRepositoryLike, CreateConversation, CreateNotification,
    MessageRepositoryLike, NotificationRepositoryLike, ReopenConversation, ResolveConversation,
    UpdateConversation,
};

/// SQLite repository for inbox data
#[derive(Clone)]
pub struct Repository {
    conn: shared::libsql::Connection,
    /// Transactions on a shared connection must not interleave; this lock
    /// serializes them in-process, while BEGIN IMMEDIATE serializes against
    /// other connections to the same database.
    write_lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl Repository {
    pub fn new(conn: shared::libsql::Connection) -> Self {
        Self {
            conn,
            write_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn connection(&self) -> &shared::libsql::Connection {
        &self.conn
    }
}

impl SqlMigrationLoader for Repository {
    fn load_sql_migrations() -> Migrations {
        BTreeMap::from([
            (
                "0001_init.up.sql",
                include_str!("../../migrations/0001_init.up.sql"),
            ),
            (
                "0001_init.down.sql",
                include_str!("../../migrations/0001_init.down.sql"),
            ),
        ])
    }
}

// --- Helper Functions ---

fn repo_err(e: anyhow::Error) -> CommonError {
    CommonError::Repository {
        msg: e.to_string(),
        source: Some(e),
    }
}

fn opt_value<T: Into<libsql::Value>>(v: Option<T>) -> libsql::Value {
    v.map(Into::into).unwrap_or(libsql::Value::Null)
}

fn opt_json_value(
    v: &Option<shared::primitives::WrappedJsonValue>,
) -> Result<libsql::Value, CommonError> {
    match v {
        Some(json) => Ok(libsql::Value::Text(serde_json::to_string(json.get_inner())?)),
        None => Ok(libsql::Value::Null),
    }
}

fn json_value(v: &shared::primitives::WrappedJsonValue) -> Result<libsql::Value, CommonError> {
    Ok(libsql::Value::Text(serde_json::to_string(v.get_inner())?))
}

fn get_opt<T: libsql::FromValue>(
    row: &libsql::Row,
    idx: i32,
) -> Result<Option<T>, libsql::Error> {
    match row.get_value(idx)? {
        libsql::Value::Null => Ok(None),
        value => T::from_sql(value).map(Some),
    }
}

const CONVERSATION_COLS: &str = "id, business_id, customer_phone, customer_name, customer_id, \
     source, status, priority, assigned_to, assigned_at, last_message_at, \
     created_at, updated_at, resolved_at, archived_at";

fn conversation_from_row(row: &libsql::Row) -> Result<Conversation, CommonError> {
    Ok(Conversation {
        id: row.get(0)?,
        business_id: row.get(1)?,
        customer_phone: row.get(2)?,
        customer_name: row.get(3)?,
        customer_id: get_opt(row, 4)?,
        source: row.get(5)?,
        status: row.get(6)?,
        priority: row.get(7)?,
        assigned_to: get_opt(row, 8)?,
        assigned_at: get_opt(row, 9)?,
        last_message_at: get_opt(row, 10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        resolved_at: get_opt(row, 13)?,
        archived_at: get_opt(row, 14)?,
    })
}

const ASSIGNMENT_COLS: &str =
    "id, conversation_id, user_id, assigned_by, assigned_at, completed_at, completed_by, notes";

fn assignment_from_row(row: &libsql::Row) -> Result<Assignment, CommonError> {
    Ok(Assignment {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        assigned_by: row.get(3)?,
        assigned_at: row.get(4)?,
        completed_at: get_opt(row, 5)?,
        completed_by: get_opt(row, 6)?,
        notes: get_opt(row, 7)?,
    })
}

const MESSAGE_COLS: &str = "id, conversation_id, sender, sender_type, message_type, content, \
     metadata, insertion_sequence, created_at";

fn message_from_row(row: &libsql::Row) -> Result<Message, CommonError> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        sender_type: row.get(3)?,
        message_type: row.get(4)?,
        content: row.get(5)?,
        metadata: get_opt(row, 6)?,
        insertion_sequence: row.get(7)?,
        created_at: row.get(8)?,
        read_by: BTreeMap::new(),
    })
}

const NOTIFICATION_COLS: &str =
    "id, user_id, business_id, conversation_id, message_id, kind, payload, created_at, read_at";

fn notification_from_row(row: &libsql::Row) -> Result<Notification, CommonError> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        business_id: row.get(2)?,
        conversation_id: row.get(3)?,
        message_id: get_opt(row, 4)?,
        kind: row.get(5)?,
        payload: row.get(6)?,
        created_at: row.get(7)?,
        read_at: get_opt(row, 8)?,
    })
}

async fn collect_rows<T>(
    mut rows: libsql::Rows,
    convert: impl Fn(&libsql::Row) -> Result<T, CommonError>,
) -> Result<Vec<T>, CommonError> {
    let mut items = Vec::new();
    while let Some(row) = rows.next().await? {
        items.push(convert(&row)?);
    }
    Ok(items)
}

/// Fetch a conversation inside a transaction, under the write lock.
async fn tx_get_conversation(
    tx: &libsql::Transaction,
    id: &WrappedUuidV4,
) -> Result<Option<Conversation>, CommonError> {
    let sql = format!("SELECT {CONVERSATION_COLS} FROM conversation WHERE id = ?1");
    let mut rows = tx.query(&sql, libsql::params![id.clone()]).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(conversation_from_row(&row)?)),
        None => Ok(None),
    }
}

// --- Conversation Repository Implementation ---

#[async_trait::async_trait]
impl ConversationRepositoryLike for Repository {
    async fn create_conversation(&self, params: &CreateConversation) -> Result<(), CommonError> {
        let c = &params.conversation;
        trace!(conversation_id = %c.id, business_id = %c.business_id, "Creating conversation");

        self.conn
            .execute(
                "INSERT INTO conversation (
                    id, business_id, customer_phone, customer_name, customer_id,
                    source, status, priority, assigned_to, assigned_at,
                    last_message_at, created_at, updated_at, resolved_at, archived_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                libsql::params![
                    c.id.clone(),
                    c.business_id.clone(),
                    c.customer_phone.clone(),
                    c.customer_name.clone(),
                    opt_value(c.customer_id.clone()),
                    c.source,
                    c.status,
                    c.priority,
                    opt_value(c.assigned_to.clone()),
                    opt_value(c.assigned_at),
                    opt_value(c.last_message_at),
                    c.created_at,
                    c.updated_at,
                    opt_value(c.resolved_at),
                    opt_value(c.archived_at),
                ],
            )
            .await
            .context("Failed to create conversation")
            .map_err(repo_err)?;

        trace!(conversation_id = %c.id, "Conversation created");
        Ok(())
    }

    async fn get_conversation_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Conversation>, CommonError> {
        trace!(conversation_id = %id, "Getting conversation by ID");
        let sql = format!("SELECT {CONVERSATION_COLS} FROM conversation WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, libsql::params![id.clone()])
            .await
            .context("Failed to get conversation by id")
            .map_err(repo_err)?;

        match rows.next().await? {
            Some(row) => Ok(Some(conversation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_open_conversation_by_phone(
        &self,
        business_id: &str,
        customer_phone: &str,
    ) -> Result<Option<Conversation>, CommonError> {
        trace!(business_id, customer_phone, "Finding open conversation by phone");
        let sql = format!(
            "SELECT {CONVERSATION_COLS} FROM conversation
             WHERE business_id = ?1 AND customer_phone = ?2 AND archived_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                libsql::params![business_id.to_string(), customer_phone.to_string()],
            )
            .await
            .context("Failed to find conversation by phone")
            .map_err(repo_err)?;

        match rows.next().await? {
            Some(row) => Ok(Some(conversation_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, CommonError> {
        trace!(business_id = %filter.business_id, "Listing conversations");

        let mut sql = format!(
            "SELECT {CONVERSATION_COLS} FROM conversation WHERE business_id = ?"
        );
        let mut values: Vec<libsql::Value> =
            vec![libsql::Value::Text(filter.business_id.clone())];

        if !filter.include_archived {
            sql.push_str(" AND archived_at IS NULL");
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(status.into());
        }
        if let Some(assigned_to) = &filter.assigned_to {
            sql.push_str(" AND assigned_to = ?");
            values.push(libsql::Value::Text(assigned_to.clone()));
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            values.push(priority.into());
        }
        if let Some(phone) = &filter.customer_phone {
            sql.push_str(" AND customer_phone = ?");
            values.push(libsql::Value::Text(phone.clone()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            sql.push_str(" AND (customer_name LIKE ? OR customer_phone LIKE ?)");
            let pattern = format!("%{search}%");
            values.push(libsql::Value::Text(pattern.clone()));
            values.push(libsql::Value::Text(pattern));
        }

        sql.push_str(" ORDER BY COALESCE(last_message_at, created_at) DESC LIMIT ? OFFSET ?");
        values.push(libsql::Value::Integer(filter.page.limit));
        values.push(libsql::Value::Integer(filter.page.offset));

        let rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .context("Failed to list conversations")
            .map_err(repo_err)?;

        let items = collect_rows(rows, conversation_from_row).await?;
        trace!(count = items.len(), "Listed conversations");
        Ok(items)
    }

    async fn conversation_stats(
        &self,
        business_id: &str,
        include_archived: bool,
    ) -> Result<ConversationStats, CommonError> {
        trace!(business_id, "Computing conversation stats");

        let mut sql = "SELECT
                COUNT(*),
                COALESCE(SUM(status = 'new'), 0),
                COALESCE(SUM(status = 'open'), 0),
                COALESCE(SUM(status = 'resolved'), 0),
                COALESCE(SUM(status = 'archived'), 0),
                COALESCE(SUM(assigned_to IS NULL AND status != 'archived'), 0)
             FROM conversation WHERE business_id = ?1"
            .to_string();
        if !include_archived {
            sql.push_str(" AND archived_at IS NULL");
        }

        let mut rows = self
            .conn
            .query(&sql, libsql::params![business_id.to_string()])
            .await
            .context("Failed to compute conversation stats")
            .map_err(repo_err)?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| CommonError::Repository {
                msg: "stats query returned no rows".to_string(),
                source: None,
            })?;

        Ok(ConversationStats {
            total: row.get(0)?,
            new: row.get(1)?,
            open: row.get(2)?,
            resolved: row.get(3)?,
            archived: row.get(4)?,
            unassigned: row.get(5)?,
        })
    }

    async fn update_conversation(&self, params: &UpdateConversation) -> Result<(), CommonError> {
        trace!(conversation_id = %params.id, "Updating conversation");

        self.conn
            .execute(
                "UPDATE conversation
                 SET customer_name = ?2, customer_phone = ?3, customer_id = ?4,
                     priority = ?5, updated_at = ?6
                 WHERE id = ?1",
                libsql::params![
                    params.id.clone(),
                    params.customer_name.clone(),
                    params.customer_phone.clone(),
                    opt_value(params.customer_id.clone()),
                    params.priority,
                    params.updated_at,
                ],
            )
            .await
            .context("Failed to update conversation")
            .map_err(repo_err)?;

        trace!(conversation_id = %params.id, "Conversation updated");
        Ok(())
    }

    async fn assign_conversation(
        &self,
        params: &AssignConversation,
    ) -> Result<(Conversation, Assignment), CommonError> {
        trace!(
            conversation_id = %params.conversation_id,
            user_id = %params.user_id,
            "Assigning conversation"
        );

        let _write_guard = self.write_lock.lock().await;
        let tx = self.conn.begin_immediate().await?;

        let mut conversation = tx_get_conversation(&tx, &params.conversation_id)
            .await?
            .ok_or_else(|| CommonError::not_found("Conversation", &params.conversation_id))?;
        ensure_transition(conversation.status, ConversationStatus::Open)?;

        // Complete any prior active assignment, then insert the new one. The
        // write lock taken by BEGIN IMMEDIATE serializes concurrent assigns.
        tx.execute(
            "UPDATE assignment SET completed_at = ?2, completed_by = ?3
             WHERE conversation_id = ?1 AND completed_at IS NULL",
            libsql::params![
                params.conversation_id.clone(),
                params.now,
                params.assigned_by.clone(),
            ],
        )
        .await?;

        tx.execute(
            "INSERT INTO assignment (id, conversation_id, user_id, assigned_by, assigned_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            libsql::params![
                params.assignment_id.clone(),
                params.conversation_id.clone(),
                params.user_id.clone(),
                params.assigned_by.clone(),
                params.now,
                opt_value(params.notes.clone()),
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversation
             SET status = ?2, assigned_to = ?3, assigned_at = ?4,
                 resolved_at = NULL, updated_at = ?4
             WHERE id = ?1",
            libsql::params![
                params.conversation_id.clone(),
                ConversationStatus::Open,
                params.user_id.clone(),
                params.now,
            ],
        )
        .await?;

        tx.commit().await.context("Failed to commit assignment").map_err(repo_err)?;

        conversation.status = ConversationStatus::Open;
        conversation.assigned_to = Some(params.user_id.clone());
        conversation.assigned_at = Some(params.now);
        conversation.resolved_at = None;
        conversation.updated_at = params.now;

        let assignment = Assignment {
            id: params.assignment_id.clone(),
            conversation_id: params.conversation_id.clone(),
            user_id: params.user_id.clone(),
            assigned_by: params.assigned_by.clone(),
            assigned_at: params.now,
            completed_at: None,
            completed_by: None,
            notes: params.notes.clone(),
        };

        trace!(conversation_id = %params.conversation_id, "Conversation assigned");
        Ok((conversation, assignment))
    }

    async fn resolve_conversation(
        &self,
        params: &ResolveConversation,
    ) -> Result<Conversation, CommonError> {
        trace!(conversation_id = %params.conversation_id, "Resolving conversation");

        let _write_guard = self.write_lock.lock().await;
        let tx = self.conn.begin_immediate().await?;

        let mut conversation = tx_get_conversation(&tx, &params.conversation_id)
            .await?
            .ok_or_else(|| CommonError::not_found("Conversation", &params.conversation_id))?;
        ensure_transition(conversation.status, ConversationStatus::Resolved)?;

        tx.execute(
            "UPDATE assignment SET completed_at = ?2, completed_by = ?3
             WHERE conversation_id = ?1 AND completed_at IS NULL",
            libsql::params![
                params.conversation_id.clone(),
                params.now,
                params.resolved_by.clone(),
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversation
             SET status = ?2, resolved_at = ?3, assigned_to = NULL,
                 assigned_at = NULL, updated_at = ?3
             WHERE id = ?1",
            libsql::params![
                params.conversation_id.clone(),
                ConversationStatus::Resolved,
                params.now,
            ],
        )
        .await?;

        tx.commit().await.context("Failed to commit resolve").map_err(repo_err)?;

        conversation.status = ConversationStatus::Resolved;
        conversation.resolved_at = Some(params.now);
        conversation.assigned_to = None;
        conversation.assigned_at = None;
        conversation.updated_at = params.now;

        trace!(conversation_id = %params.conversation_id, "Conversation resolved");
        Ok(conversation)
    }

    async fn reopen_conversation(
        &self,
        params: &ReopenConversation,
    ) -> Result<Conversation, CommonError> {
        trace!(conversation_id = %params.conversation_id, "Reopening conversation");

        let _write_guard = self.write_lock.lock().await;
        let tx = self.conn.begin_immediate().await?;

        let mut conversation = tx_get_conversation(&tx, &params.conversation_id)
            .await?
            .ok_or_else(|| CommonError::not_found("Conversation", &params.conversation_id))?;
        if conversation.status != ConversationStatus::Resolved {
            return Err(CommonError::InvalidTransition {
                from: conversation.status.as_str().to_string(),
                to: ConversationStatus::Open.as_str().to_string(),
            });
        }

        // The most recent assignment decides where reopen lands: if one
        // exists it is reactivated and the conversation opens, otherwise the
        // conversation returns to the unassigned NEW state.
        let sql = format!(
            "SELECT {ASSIGNMENT_COLS} FROM assignment
             WHERE conversation_id = ?1
             ORDER BY assigned_at DESC
             LIMIT 1"
        );
        let mut rows = tx
            .query(&sql, libsql::params![params.conversation_id.clone()])
            .await?;
        let last_assignment = match rows.next().await? {
            Some(row) => Some(assignment_from_row(&row)?),
            None => None,
        };

        match &last_assignment {
            Some(assignment) => {
                tx.execute(
                    "UPDATE assignment SET completed_at = NULL, completed_by = NULL WHERE id = ?1",
                    libsql::params![assignment.id.clone()],
                )
                .await?;
                tx.execute(
                    "UPDATE conversation
                     SET status = ?2, assigned_to = ?3, assigned_at = ?4,
                         resolved_at = NULL, updated_at = ?5
                     WHERE id = ?1",
                    libsql::params![
                        params.conversation_id.clone(),
                        ConversationStatus::Open,
                        assignment.user_id.clone(),
                        assignment.assigned_at,
                        params.now,
                    ],
                )
                .await?;

                conversation.status = ConversationStatus::Open;
                conversation.assigned_to = Some(assignment.user_id.clone());
                conversation.assigned_at = Some(assignment.assigned_at);
            }
            None => {
                tx.execute(
                    "UPDATE conversation
                     SET status = ?2, resolved_at = NULL, updated_at = ?3
                     WHERE id = ?1",
                    libsql::params![
                        params.conversation_id.clone(),
                        ConversationStatus::New,
                        params.now,
                    ],
                )
                .await?;

                conversation.status = ConversationStatus::New;
            }
        }

        tx.commit().await.context("Failed to commit reopen").map_err(repo_err)?;

        conversation.resolved_at = None;
        conversation.updated_at = params.now;

        trace!(
            conversation_id = %params.conversation_id,
            status = %conversation.status,
            "Conversation reopened"
        );
        Ok(conversation)
    }

    async fn archive_conversation(
        &self,
        params: &ArchiveConversation,
    ) -> Result<Conversation, CommonError> {
        trace!(
            conversation_id = %params.conversation_id,
            archived_by = %params.archived_by,
            "Archiving conversation"
        );

        let _write_guard = self.write_lock.lock().await;
        let tx = self.conn.begin_immediate().await?;

        let mut conversation = tx_get_conversation(&tx, &params.conversation_id)
            .await?
            .ok_or_else(|| CommonError::not_found("Conversation", &params.conversation_id))?;
        ensure_transition(conversation.status, ConversationStatus::Archived)?;

        tx.execute(
            "UPDATE conversation SET status = ?2, archived_at = ?3, updated_at = ?3 WHERE id = ?1",
            libsql::params![
                params.conversation_id.clone(),
                ConversationStatus::Archived,
                params.now,
            ],
        )
        .await?;

        tx.commit().await.context("Failed to commit archive").map_err(repo_err)?;

        conversation.status = ConversationStatus::Archived;
        conversation.archived_at = Some(params.now);
        conversation.updated_at = params.now;

        trace!(conversation_id = %params.conversation_id, "Conversation archived");
        Ok(conversation)
    }
}

// --- Assignment Repository Implementation ---

#[async_trait::async_trait]
impl AssignmentRepositoryLike for Repository {
    async fn get_active_assignment(
        &self,
        conversation_id: &WrappedUuidV4,
    ) -> Result<Option<Assignment>, CommonError> {
        trace!(conversation_id = %conversation_id, "Getting active assignment");
        let sql = format!(
            "SELECT {ASSIGNMENT_COLS} FROM assignment
             WHERE conversation_id = ?1 AND completed_at IS NULL"
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![conversation_id.clone()])
            .await
            .context("Failed to get active assignment")
            .map_err(repo_err)?;

        match rows.next().await? {
            Some(row) => Ok(Some(assignment_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_assignment_by_id(
        &self,
        id: &WrappedUuidV4,
    ) -> Result<Option<Assignment>, CommonError> {
        trace!(assignment_id = %id, "Getting assignment by ID");
        let sql = format!("SELECT {ASSIGNMENT_COLS} FROM assignment WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, libsql::params![id.clone()])
            .await
            .context("Failed to get assignment by id")
            .map_err(repo_err)?;

        match rows.next().await? {
            Some(row) => Ok(Some(assignment_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn complete_assignment(
        &self,
        id: &WrappedUuidV4,
        completed_by: &str,
        now: WrappedChronoDateTime,
    ) -> Result<Assignment, CommonError> {
        trace!(assignment_id = %id, "Completing assignment");

        self.conn
            .execute(
                "UPDATE assignment SET completed_at = ?2, completed_by = ?3
                 WHERE id = ?1 AND completed_at IS NULL",
                libsql::params![id.clone(), now, completed_by.to_string()],
            )
            .await
            .context("Failed to complete assignment")
            .map_err(repo_err)?;

        self.get_assignment_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("Assignment", id))
    }

    async fn annotate_assignment(
        &self,
        id: &WrappedUuidV4,
        notes: &str,
    ) -> Result<Assignment, CommonError> {
        trace!(assignment_id = %id, "Annotating assignment");

        self.conn
            .execute(
                "UPDATE assignment SET notes = ?2 WHERE id = ?1",
                libsql::params![id.clone(), notes.to_string()],
            )
            .await
            .context("Failed to annotate assignment")
            .map_err(repo_err)?;

        self.get_assignment_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("Assignment", id))
    }
}

// --- Message Repository Implementation ---

#[async_trait::async_trait]
impl MessageRepositoryLike for Repository {
    async fn append_message(
        &self,
        params: &AppendMessage,
    ) -> Result<(Conversation, Message), CommonError> {
        trace!(
            message_id = %params.id,
            conversation_id = %params.conversation_id,
            "Appending message"
        );

        let _write_guard = self.write_lock.lock().await;
        let tx = self.conn.begin_immediate().await?;

        let mut conversation = tx_get_conversation(&tx, &params.conversation_id)
            .await?
            .ok_or_else(|| CommonError::not_found("Conversation", &params.conversation_id))?;

        // Per-conversation monotonic sequence; the transaction's write lock
        // makes read-increment-insert safe.
        let mut rows = tx
            .query(
                "SELECT COALESCE(MAX(insertion_sequence), 0) + 1 FROM message
                 WHERE conversation_id = ?1",
                libsql::params![params.conversation_id.clone()],
            )
            .await?;
        let sequence: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 1,
        };

        tx.execute(
            "INSERT INTO message (
                id, conversation_id, sender, sender_type, message_type,
                content, metadata, insertion_sequence, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            libsql::params![
                params.id.clone(),
                params.conversation_id.clone(),
                params.sender.clone(),
                params.sender_type,
                params.message_type,
                params.content.clone(),
                opt_json_value(&params.metadata)?,
                sequence,
                params.created_at,
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversation SET last_message_at = ?2, updated_at = ?2 WHERE id = ?1",
            libsql::params![params.conversation_id.clone(), params.created_at],
        )
        .await?;

        tx.commit().await.context("Failed to commit message append").map_err(repo_err)?;

        conversation.last_message_at = Some(params.created_at);
        conversation.updated_at = params.created_at;

        let message = Message {
            id: params.id.clone(),
            conversation_id: params.conversation_id.clone(),
            sender: params.sender.clone(),
            sender_type: params.sender_type,
            message_type: params.message_type,
            content: params.content.clone(),
            metadata: params.metadata.clone(),
            insertion_sequence: sequence,
            created_at: params.created_at,
            read_by: BTreeMap::new(),
        };

        trace!(message_id = %params.id, sequence, "Message appended");
        Ok((conversation, message))
    }

    async fn get_messages_by_conversation(
        &self,
        conversation_id: &WrappedUuidV4,
        direction: SortDirection,
        page: &PageRequest,
    ) -> Result<Vec<Message>, CommonError> {
        trace!(conversation_id = %conversation_id, "Listing messages");

        let dir = direction.as_sql();
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM message
             WHERE conversation_id = ?1
             ORDER BY created_at {dir}, insertion_sequence {dir}
             LIMIT ?2 OFFSET ?3"
        );
        let rows = self
            .conn
            .query(
                &sql,
                libsql::params![conversation_id.clone(), page.limit, page.offset],
            )
            .await
            .context("Failed to list messages")
            .map_err(repo_err)?;

        let mut messages = collect_rows(rows, message_from_row).await?;
        if messages.is_empty() {
            return Ok(messages);
        }

        // Attach read receipts in one pass.
        let placeholders: Vec<String> = (1..=messages.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT message_id, user_id, read_at FROM message_read
             WHERE message_id IN ({})",
            placeholders.join(", ")
        );
        let values: Vec<libsql::Value> = messages.iter().map(|m| m.id.clone().into()).collect();
        let mut rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .context("Failed to load read receipts")
            .map_err(repo_err)?;

        let mut receipts: HashMap<WrappedUuidV4, BTreeMap<String, WrappedChronoDateTime>> =
            HashMap::new();
        while let Some(row) = rows.next().await? {
            let message_id: WrappedUuidV4 = row.get(0)?;
            let user_id: String = row.get(1)?;
            let read_at: WrappedChronoDateTime = row.get(2)?;
            receipts.entry(message_id).or_default().insert(user_id, read_at);
        }

        for message in &mut messages {
            if let Some(read_by) = receipts.remove(&message.id) {
                message.read_by = read_by;
            }
        }

        trace!(count = messages.len(), "Listed messages");
        Ok(messages)
    }

    async fn mark_messages_read(
        &self,
        conversation_id: &WrappedUuidV4,
        user_id: &str,
        now: WrappedChronoDateTime,
    ) -> Result<u64, CommonError> {
        trace!(conversation_id = %conversation_id, user_id, "Marking messages read");

        let updated = self
            .conn
            .execute(
                "INSERT INTO message_read (message_id, user_id, read_at)
                 SELECT m.id, ?2, ?3 FROM message m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_read r
                       WHERE r.message_id = m.id AND r.user_id = ?2
                   )",
                libsql::params![conversation_id.clone(), user_id.to_string(), now],
            )
            .await
            .context("Failed to mark messages read")
            .map_err(repo_err)?;

        trace!(conversation_id = %conversation_id, updated, "Marked messages read");
        Ok(updated)
    }
}

// --- Notification Repository Implementation ---

#[async_trait::async_trait]
impl NotificationRepositoryLike for Repository {
    async fn create_notification(&self, params: &CreateNotification) -> Result<(), CommonError> {
        trace!(
            notification_id = %params.id,
            user_id = %params.user_id,
            kind = %params.kind.as_str(),
            "Creating notification"
        );

        self.conn
            .execute(
                "INSERT OR IGNORE INTO notification (
                    id, user_id, business_id, conversation_id, message_id,
                    kind, payload, created_at, read_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
                libsql::params![
                    params.id.clone(),
                    params.user_id.clone(),
                    params.business_id.clone(),
                    params.conversation_id.clone(),
                    opt_value(params.message_id.clone()),
                    params.kind,
                    json_value(&params.payload)?,
                    params.created_at,
                ],
            )
            .await
            .context("Failed to create notification")
            .map_err(repo_err)?;

        Ok(())
    }

    async fn get_notifications_by_user(
        &self,
        business_id: &str,
        user_id: &str,
        unread_only: bool,
        page: &PageRequest,
    ) -> Result<Vec<Notification>, CommonError> {
        trace!(business_id, user_id, unread_only, "Listing notifications");

        let mut sql = format!(
            "SELECT {NOTIFICATION_COLS} FROM notification
             WHERE business_id = ?1 AND user_id = ?2"
        );
        if unread_only {
            sql.push_str(" AND read_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?3 OFFSET ?4");

        let rows = self
            .conn
            .query(
                &sql,
                libsql::params![
                    business_id.to_string(),
                    user_id.to_string(),
                    page.limit,
                    page.offset
                ],
            )
            .await
            .context("Failed to list notifications")
            .map_err(repo_err)?;

        let items = collect_rows(rows, notification_from_row).await?;
        trace!(count = items.len(), "Listed notifications");
        Ok(items)
    }

    async fn mark_notification_read(
        &self,
        id: &WrappedUuidV4,
        user_id: &str,
        now: WrappedChronoDateTime,
    ) -> Result<u64, CommonError> {
        trace!(notification_id = %id, user_id, "Marking notification read");

        self.conn
            .execute(
                "UPDATE notification SET read_at = ?3
                 WHERE id = ?1 AND user_id = ?2 AND read_at IS NULL",
                libsql::params![id.clone(), user_id.to_string(), now],
            )
            .await
            .context("Failed to mark notification read")
            .map_err(repo_err)
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;
        use crate::logic::conversation::{ConversationPriority, ConversationSource};
        use crate::logic::message::{MessageType, SenderType};
        use crate::logic::notification::NotificationKind;
        use serde_json::json;
        use shared::primitives::WrappedJsonValue;

        async fn setup_test_db() -> Repository {
            let (_db, conn) = shared::test_utils::setup_in_memory_database(vec![
                Repository::load_sql_migrations(),
            ])
            .await
            .unwrap();

            // The in-memory database must outlive the connection handle.
            std::mem::forget(_db);
            Repository::new(conn)
        }

        fn new_conversation(business_id: &str, phone: &str) -> Conversation {
            let now = WrappedChronoDateTime::now();
            Conversation {
                id: WrappedUuidV4::new(),
                business_id: business_id.to_string(),
                customer_phone: phone.to_string(),
                customer_name: "Ada".to_string(),
                customer_id: None,
                source: ConversationSource::Sms,
                status: ConversationStatus::New,
                priority: ConversationPriority::Medium,
                assigned_to: None,
                assigned_at: None,
                last_message_at: None,
                created_at: now,
                updated_at: now,
                resolved_at: None,
                archived_at: None,
            }
        }

        async fn create_test_conversation(repo: &Repository) -> Conversation {
            let conversation = new_conversation("biz-1", "+15550100");
            repo.create_conversation(&CreateConversation {
                conversation: conversation.clone(),
            })
            .await
            .unwrap();
            conversation
        }

        fn assign_params(conversation_id: &WrappedUuidV4, user_id: &str) -> AssignConversation {
            AssignConversation {
                conversation_id: conversation_id.clone(),
                assignment_id: WrappedUuidV4::new(),
                user_id: user_id.to_string(),
                assigned_by: "manager-1".to_string(),
                notes: None,
                now: WrappedChronoDateTime::now(),
            }
        }

        fn append_params(conversation_id: &WrappedUuidV4, content: &str) -> AppendMessage {
            AppendMessage {
                id: WrappedUuidV4::new(),
                conversation_id: conversation_id.clone(),
                sender: "customer".to_string(),
                sender_type: SenderType::Customer,
                message_type: MessageType::Text,
                content: content.to_string(),
                metadata: None,
                created_at: WrappedChronoDateTime::now(),
            }
        }

        // ============================================
        // Conversation Repository Tests
        // ============================================

        #[tokio::test]
        async fn test_create_and_get_conversation() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let fetched = repo
                .get_conversation_by_id(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fetched.id, conversation.id);
            assert_eq!(fetched.business_id, "biz-1");
            assert_eq!(fetched.status, ConversationStatus::New);
            assert!(fetched.assigned_to.is_none());
        }

        #[tokio::test]
        async fn test_get_conversation_not_found() {
            let repo = setup_test_db().await;
            let fetched = repo
                .get_conversation_by_id(&WrappedUuidV4::new())
                .await
                .unwrap();
            assert!(fetched.is_none());
        }

        #[tokio::test]
        async fn test_find_open_conversation_by_phone_skips_archived() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let found = repo
                .find_open_conversation_by_phone("biz-1", "+15550100")
                .await
                .unwrap();
            assert_eq!(found.unwrap().id, conversation.id);

            repo.archive_conversation(&ArchiveConversation {
                conversation_id: conversation.id.clone(),
                archived_by: "manager-1".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let found = repo
                .find_open_conversation_by_phone("biz-1", "+15550100")
                .await
                .unwrap();
            assert!(found.is_none());
        }

        #[tokio::test]
        async fn test_assign_opens_conversation_and_creates_active_assignment() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let (updated, assignment) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();

            assert_eq!(updated.status, ConversationStatus::Open);
            assert_eq!(updated.assigned_to.as_deref(), Some("user-a"));
            assert!(assignment.is_active());

            let active = repo.get_active_assignment(&conversation.id).await.unwrap();
            assert_eq!(active.unwrap().user_id, "user-a");
        }

        #[tokio::test]
        async fn test_reassign_completes_prior_assignment() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let (_, first) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();
            let (_, second) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-b"))
                .await
                .unwrap();

            let prior = repo
                .get_assignment_by_id(&first.id)
                .await
                .unwrap()
                .unwrap();
            assert!(!prior.is_active());
            assert_eq!(prior.completed_by.as_deref(), Some("manager-1"));

            let active = repo
                .get_active_assignment(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(active.id, second.id);
            assert_eq!(active.user_id, "user-b");
        }

        #[tokio::test]
        async fn test_concurrent_assigns_leave_one_active_assignment() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let mut handles = Vec::new();
            for i in 0..8 {
                let repo = repo.clone();
                let conversation_id = conversation.id.clone();
                handles.push(tokio::spawn(async move {
                    repo.assign_conversation(&assign_params(
                        &conversation_id,
                        &format!("user-{i}"),
                    ))
                    .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            // Exactly one assignment row may be active.
            let mut rows = repo
                .connection()
                .query(
                    "SELECT COUNT(*) FROM assignment
                     WHERE conversation_id = ?1 AND completed_at IS NULL",
                    libsql::params![conversation.id.clone()],
                )
                .await
                .unwrap();
            let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
            assert_eq!(count, 1);

            let fetched = repo
                .get_conversation_by_id(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            let active = repo
                .get_active_assignment(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fetched.assigned_to.as_deref(), Some(active.user_id.as_str()));
        }

        #[tokio::test]
        async fn test_resolve_completes_assignment_and_clears_assignee() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let (_, assignment) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();

            let resolved = repo
                .resolve_conversation(&ResolveConversation {
                    conversation_id: conversation.id.clone(),
                    resolved_by: "user-a".to_string(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap();

            assert_eq!(resolved.status, ConversationStatus::Resolved);
            assert!(resolved.resolved_at.is_some());
            assert!(resolved.assigned_to.is_none());

            let stored = repo
                .get_assignment_by_id(&assignment.id)
                .await
                .unwrap()
                .unwrap();
            assert!(stored.completed_at.is_some());
            assert_eq!(stored.completed_by.as_deref(), Some("user-a"));
        }

        #[tokio::test]
        async fn test_resolve_new_conversation_directly() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let resolved = repo
                .resolve_conversation(&ResolveConversation {
                    conversation_id: conversation.id.clone(),
                    resolved_by: "user-a".to_string(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap();
            assert_eq!(resolved.status, ConversationStatus::Resolved);
        }

        #[tokio::test]
        async fn test_reopen_with_assignment_returns_to_open() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            repo.assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();
            repo.resolve_conversation(&ResolveConversation {
                conversation_id: conversation.id.clone(),
                resolved_by: "user-a".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let reopened = repo
                .reopen_conversation(&ReopenConversation {
                    conversation_id: conversation.id.clone(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap();

            assert_eq!(reopened.status, ConversationStatus::Open);
            assert_eq!(reopened.assigned_to.as_deref(), Some("user-a"));
            assert!(reopened.resolved_at.is_none());

            let active = repo
                .get_active_assignment(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(active.user_id, "user-a");
        }

        #[tokio::test]
        async fn test_reopen_without_assignment_returns_to_new() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            repo.resolve_conversation(&ResolveConversation {
                conversation_id: conversation.id.clone(),
                resolved_by: "user-a".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let reopened = repo
                .reopen_conversation(&ReopenConversation {
                    conversation_id: conversation.id.clone(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap();
            assert_eq!(reopened.status, ConversationStatus::New);
        }

        #[tokio::test]
        async fn test_reopen_requires_resolved() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let err = repo
                .reopen_conversation(&ReopenConversation {
                    conversation_id: conversation.id.clone(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, CommonError::InvalidTransition { .. }));
        }

        #[tokio::test]
        async fn test_archived_conversation_rejects_all_transitions() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            repo.archive_conversation(&ArchiveConversation {
                conversation_id: conversation.id.clone(),
                archived_by: "manager-1".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let assign_err = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap_err();
            assert!(matches!(assign_err, CommonError::InvalidTransition { .. }));

            let resolve_err = repo
                .resolve_conversation(&ResolveConversation {
                    conversation_id: conversation.id.clone(),
                    resolved_by: "user-a".to_string(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(resolve_err, CommonError::InvalidTransition { .. }));

            let reopen_err = repo
                .reopen_conversation(&ReopenConversation {
                    conversation_id: conversation.id.clone(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(reopen_err, CommonError::InvalidTransition { .. }));

            let archive_err = repo
                .archive_conversation(&ArchiveConversation {
                    conversation_id: conversation.id.clone(),
                    archived_by: "manager-1".to_string(),
                    now: WrappedChronoDateTime::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(archive_err, CommonError::InvalidTransition { .. }));

            // No mutation happened on the failed attempts.
            let fetched = repo
                .get_conversation_by_id(&conversation.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fetched.status, ConversationStatus::Archived);
            assert!(fetched.assigned_to.is_none());
        }

        #[tokio::test]
        async fn test_list_conversations_filters() {
            let repo = setup_test_db().await;

            let a = new_conversation("biz-1", "+15550100");
            let mut b = new_conversation("biz-1", "+15550101");
            b.customer_name = "Grace".to_string();
            b.priority = ConversationPriority::Urgent;
            let other_tenant = new_conversation("biz-2", "+15550102");
            for c in [&a, &b, &other_tenant] {
                repo.create_conversation(&CreateConversation {
                    conversation: (*c).clone(),
                })
                .await
                .unwrap();
            }
            repo.assign_conversation(&assign_params(&a.id, "user-a"))
                .await
                .unwrap();

            let base = ConversationFilter {
                business_id: "biz-1".to_string(),
                status: None,
                assigned_to: None,
                priority: None,
                search: None,
                customer_phone: None,
                include_archived: false,
                page: PageRequest::default(),
            };

            let all = repo.list_conversations(&base).await.unwrap();
            assert_eq!(all.len(), 2);

            let open_only = repo
                .list_conversations(&ConversationFilter {
                    status: Some(ConversationStatus::Open),
                    ..base.clone()
                })
                .await
                .unwrap();
            assert_eq!(open_only.len(), 1);
            assert_eq!(open_only[0].id, a.id);

            let by_assignee = repo
                .list_conversations(&ConversationFilter {
                    assigned_to: Some("user-a".to_string()),
                    ..base.clone()
                })
                .await
                .unwrap();
            assert_eq!(by_assignee.len(), 1);

            let by_search = repo
                .list_conversations(&ConversationFilter {
                    search: Some("race".to_string()),
                    ..base.clone()
                })
                .await
                .unwrap();
            assert_eq!(by_search.len(), 1);
            assert_eq!(by_search[0].customer_name, "Grace");

            let by_priority = repo
                .list_conversations(&ConversationFilter {
                    priority: Some(ConversationPriority::Urgent),
                    ..base.clone()
                })
                .await
                .unwrap();
            assert_eq!(by_priority.len(), 1);
        }

        #[tokio::test]
        async fn test_archived_conversations_hidden_unless_requested() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            repo.archive_conversation(&ArchiveConversation {
                conversation_id: conversation.id.clone(),
                archived_by: "manager-1".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let base = ConversationFilter {
                business_id: "biz-1".to_string(),
                status: None,
                assigned_to: None,
                priority: None,
                search: None,
                customer_phone: None,
                include_archived: false,
                page: PageRequest::default(),
            };
            assert!(repo.list_conversations(&base).await.unwrap().is_empty());

            let with_archived = repo
                .list_conversations(&ConversationFilter {
                    include_archived: true,
                    ..base
                })
                .await
                .unwrap();
            assert_eq!(with_archived.len(), 1);
        }

        #[tokio::test]
        async fn test_conversation_stats() {
            let repo = setup_test_db().await;

            let a = new_conversation("biz-1", "+15550100");
            let b = new_conversation("biz-1", "+15550101");
            let c = new_conversation("biz-1", "+15550102");
            for conv in [&a, &b, &c] {
                repo.create_conversation(&CreateConversation {
                    conversation: (*conv).clone(),
                })
                .await
                .unwrap();
            }
            repo.assign_conversation(&assign_params(&a.id, "user-a"))
                .await
                .unwrap();
            repo.resolve_conversation(&ResolveConversation {
                conversation_id: b.id.clone(),
                resolved_by: "user-a".to_string(),
                now: WrappedChronoDateTime::now(),
            })
            .await
            .unwrap();

            let stats = repo.conversation_stats("biz-1", false).await.unwrap();
            assert_eq!(stats.total, 3);
            assert_eq!(stats.new, 1);
            assert_eq!(stats.open, 1);
            assert_eq!(stats.resolved, 1);
            assert_eq!(stats.archived, 0);
            assert_eq!(stats.unassigned, 2);
        }

        #[tokio::test]
        async fn test_complete_assignment_is_noop_when_already_completed() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let (_, assignment) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();

            let completed =
                crate::logic::assignment::complete(&repo, &assignment.id, "user-m")
                    .await
                    .unwrap();
            assert!(completed.completed_at.is_some());
            assert_eq!(completed.completed_by.as_deref(), Some("user-m"));

            // Completing again keeps the original completion record.
            let again = crate::logic::assignment::complete(&repo, &assignment.id, "user-z")
                .await
                .unwrap();
            assert_eq!(again.completed_by.as_deref(), Some("user-m"));
        }

        #[tokio::test]
        async fn test_annotate_assignment() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let (_, assignment) = repo
                .assign_conversation(&assign_params(&conversation.id, "user-a"))
                .await
                .unwrap();

            let annotated =
                crate::logic::assignment::annotate(&repo, &assignment.id, "customer prefers SMS")
                    .await
                    .unwrap();
            assert_eq!(annotated.notes.as_deref(), Some("customer prefers SMS"));

            let err = crate::logic::assignment::annotate(
                &repo,
                &WrappedUuidV4::new(),
                "nobody home",
            )
            .await
            .unwrap_err();
            assert!(matches!(err, CommonError::NotFound { .. }));
        }

        // ============================================
        // Message Repository Tests
        // ============================================

        #[tokio::test]
        async fn test_append_assigns_monotonic_sequence() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            for expected in 1..=3 {
                let (updated, message) = repo
                    .append_message(&append_params(&conversation.id, &format!("m{expected}")))
                    .await
                    .unwrap();
                assert_eq!(message.insertion_sequence, expected);
                assert!(updated.last_message_at.is_some());
            }
        }

        #[tokio::test]
        async fn test_message_ordering_ascending_and_descending() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            for i in 1..=5 {
                repo.append_message(&append_params(&conversation.id, &format!("m{i}")))
                    .await
                    .unwrap();
            }

            let asc = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    SortDirection::Asc,
                    &PageRequest::default(),
                )
                .await
                .unwrap();
            let sequences: Vec<i64> = asc.iter().map(|m| m.insertion_sequence).collect();
            assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
            for pair in asc.windows(2) {
                assert!(
                    (pair[0].created_at.get_inner(), pair[0].insertion_sequence)
                        <= (pair[1].created_at.get_inner(), pair[1].insertion_sequence)
                );
            }

            let desc = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    SortDirection::Desc,
                    &PageRequest::default(),
                )
                .await
                .unwrap();
            let sequences: Vec<i64> = desc.iter().map(|m| m.insertion_sequence).collect();
            assert_eq!(sequences, vec![5, 4, 3, 2, 1]);
        }

        #[tokio::test]
        async fn test_message_pagination_window() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            for i in 1..=5 {
                repo.append_message(&append_params(&conversation.id, &format!("m{i}")))
                    .await
                    .unwrap();
            }

            let page = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    SortDirection::Asc,
                    &PageRequest::new(2, 2),
                )
                .await
                .unwrap();
            let sequences: Vec<i64> = page.iter().map(|m| m.insertion_sequence).collect();
            assert_eq!(sequences, vec![3, 4]);
        }

        #[tokio::test]
        async fn test_mark_read_is_idempotent() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            for i in 1..=3 {
                repo.append_message(&append_params(&conversation.id, &format!("m{i}")))
                    .await
                    .unwrap();
            }

            let first = repo
                .mark_messages_read(&conversation.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(first, 3);

            let second = repo
                .mark_messages_read(&conversation.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(second, 0);

            // New message -> exactly one more to mark.
            repo.append_message(&append_params(&conversation.id, "m4"))
                .await
                .unwrap();
            let third = repo
                .mark_messages_read(&conversation.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(third, 1);
        }

        #[tokio::test]
        async fn test_read_receipts_attached_to_listing() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            repo.append_message(&append_params(&conversation.id, "hello"))
                .await
                .unwrap();
            repo.mark_messages_read(&conversation.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            repo.mark_messages_read(&conversation.id, "user-b", WrappedChronoDateTime::now())
                .await
                .unwrap();

            let messages = repo
                .get_messages_by_conversation(
                    &conversation.id,
                    SortDirection::Asc,
                    &PageRequest::default(),
                )
                .await
                .unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].read_by.len(), 2);
            assert!(messages[0].read_by.contains_key("user-a"));
            assert!(messages[0].read_by.contains_key("user-b"));
        }

        // ============================================
        // Notification Repository Tests
        // ============================================

        fn notification_params(
            conversation_id: &WrappedUuidV4,
            message_id: Option<WrappedUuidV4>,
            user_id: &str,
        ) -> CreateNotification {
            CreateNotification {
                id: WrappedUuidV4::new(),
                user_id: user_id.to_string(),
                business_id: "biz-1".to_string(),
                conversation_id: conversation_id.clone(),
                message_id,
                kind: NotificationKind::NewMessage,
                payload: WrappedJsonValue::new(json!({"preview": "hi"})),
                created_at: WrappedChronoDateTime::now(),
            }
        }

        #[tokio::test]
        async fn test_create_and_list_notifications() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;
            let (_, message) = repo
                .append_message(&append_params(&conversation.id, "hello"))
                .await
                .unwrap();

            repo.create_notification(&notification_params(
                &conversation.id,
                Some(message.id.clone()),
                "user-a",
            ))
            .await
            .unwrap();

            let listed = repo
                .get_notifications_by_user("biz-1", "user-a", false, &PageRequest::default())
                .await
                .unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].kind, NotificationKind::NewMessage);
            assert!(listed[0].read_at.is_none());
        }

        #[tokio::test]
        async fn test_duplicate_notifications_are_ignored() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;
            let (_, message) = repo
                .append_message(&append_params(&conversation.id, "hello"))
                .await
                .unwrap();

            // Same (user, conversation, message, kind) tuple, fresh ids.
            repo.create_notification(&notification_params(
                &conversation.id,
                Some(message.id.clone()),
                "user-a",
            ))
            .await
            .unwrap();
            repo.create_notification(&notification_params(
                &conversation.id,
                Some(message.id.clone()),
                "user-a",
            ))
            .await
            .unwrap();

            let listed = repo
                .get_notifications_by_user("biz-1", "user-a", false, &PageRequest::default())
                .await
                .unwrap();
            assert_eq!(listed.len(), 1);
        }

        #[tokio::test]
        async fn test_mark_notification_read_scoped_to_user() {
            let repo = setup_test_db().await;
            let conversation = create_test_conversation(&repo).await;

            let params = notification_params(&conversation.id, None, "user-a");
            repo.create_notification(&params).await.unwrap();

            // Another user cannot read-mark it.
            let updated = repo
                .mark_notification_read(&params.id, "user-b", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(updated, 0);

            let updated = repo
                .mark_notification_read(&params.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(updated, 1);

            // Second attempt is a no-op.
            let updated = repo
                .mark_notification_read(&params.id, "user-a", WrappedChronoDateTime::now())
                .await
                .unwrap();
            assert_eq!(updated, 0);

            let unread = repo
                .get_notifications_by_user("biz-1", "user-a", true, &PageRequest::default())
                .await
                .unwrap();
            assert!(unread.is_empty());
        }
    }
}
