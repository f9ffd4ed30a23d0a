//! SQLite persistence layer for Parley.
//!
//! A single database file with six tables:
//! - `users`            — platform users, auto-created on first contact
//! - `conversations`    — chat sessions with mode and cost accounting
//! - `turns`            — ordered messages, cascade-deleted with their
//!   conversation
//! - `documents`        — uploaded files with processing status
//! - `fragments`        — document chunks with embedding blobs
//! - `conversation_documents` — many-to-many grounding links
//! - `pending_uploads`  — documents uploaded before a conversation
//!   exists, pruned by age on access
//!
//! Embeddings are stored as little-endian f32 blobs.

use chrono::{DateTime, Duration, Utc};
use parley_core::{
    Conversation, ConversationId, ConversationMode, Document, DocumentId, Fragment,
    ProcessingStatus, Role, StorageError, Turn,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// The storage collaborator. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `":memory:"` for an ephemeral in-process database (tests).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// An ephemeral in-memory store for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // A single connection keeps the in-memory database alive and
        // visible across all queries.
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {e}")))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id    TEXT PRIMARY KEY,
                email      TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(user_id),
                title           TEXT NOT NULL DEFAULT 'New Chat',
                mode            TEXT NOT NULL,
                token_count     INTEGER NOT NULL DEFAULT 0,
                last_updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                turn_id         TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE,
                sequence_number INTEGER NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                model           TEXT,
                created_at      TEXT NOT NULL,
                UNIQUE (conversation_id, sequence_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                document_id  TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL REFERENCES users(user_id),
                filename     TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'pending',
                created_at   TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                fragment_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL
                    REFERENCES documents(document_id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                embedding   BLOB NOT NULL,
                position    INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversation_documents (
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE,
                document_id     TEXT NOT NULL REFERENCES documents(document_id),
                PRIMARY KEY (conversation_id, document_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pending_uploads (
                user_id     TEXT NOT NULL,
                document_id TEXT NOT NULL REFERENCES documents(document_id),
                uploaded_at TEXT NOT NULL,
                PRIMARY KEY (user_id, document_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation \
             ON turns(conversation_id, sequence_number)",
            "CREATE INDEX IF NOT EXISTS idx_fragments_document \
             ON fragments(document_id, position)",
            "CREATE INDEX IF NOT EXISTS idx_conversations_user \
             ON conversations(user_id, last_updated_at DESC)",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    // --- Users ---

    /// Make sure a user row exists, creating it on first contact.
    pub async fn ensure_user(&self, user_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO users (user_id, email, created_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(format!("{user_id}@parley.local"))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("ensure_user: {e}")))?;
        Ok(())
    }

    // --- Conversations ---

    pub async fn create_conversation(&self, conv: &Conversation) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO conversations
             (conversation_id, user_id, title, mode, token_count, last_updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conv.id.0)
        .bind(&conv.user_id)
        .bind(&conv.title)
        .bind(conv.mode.as_str())
        .bind(conv.token_count)
        .bind(conv.last_updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("create_conversation: {e}")))?;
        Ok(())
    }

    pub async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE conversation_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("get_conversation: {e}")))?;

        row.map(|r| Self::row_to_conversation(&r)).transpose()
    }

    /// All conversations for a user, most recently updated first.
    pub async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY last_updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("list_conversations: {e}")))?;

        rows.iter().map(Self::row_to_conversation).collect()
    }

    /// Delete a conversation. Turns cascade via foreign key.
    /// Returns whether a row was deleted.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM conversations WHERE conversation_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete_conversation: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE conversations SET title = ? WHERE conversation_id = ?")
            .bind(title)
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("set_conversation_title: {e}")))?;
        Ok(())
    }

    /// Add model-reported usage to the conversation's cumulative count
    /// and bump its last-updated timestamp.
    pub async fn add_token_usage(
        &self,
        id: &ConversationId,
        tokens: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE conversations
             SET token_count = token_count + ?, last_updated_at = ?
             WHERE conversation_id = ?",
        )
        .bind(tokens)
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("add_token_usage: {e}")))?;
        Ok(())
    }

    // --- Turns ---

    pub async fn append_turn(&self, turn: &Turn) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO turns
             (turn_id, conversation_id, sequence_number, role, content, model, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.conversation_id.0)
        .bind(turn.sequence_number)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.model)
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("append_turn: {e}")))?;

        sqlx::query("UPDATE conversations SET last_updated_at = ? WHERE conversation_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&turn.conversation_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("touch conversation: {e}")))?;
        Ok(())
    }

    /// Full turn history, ascending by sequence number.
    pub async fn turns_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<Turn>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM turns WHERE conversation_id = ? ORDER BY sequence_number ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("turns_for_conversation: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    /// The next sequence number for a conversation: current max + 1,
    /// or 1 for an empty conversation. Callers serialize access per
    /// conversation; this is a plain read.
    pub async fn next_sequence_number(&self, id: &ConversationId) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "SELECT MAX(sequence_number) AS max_seq FROM turns WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("next_sequence_number: {e}")))?;

        let max_seq: Option<i64> = row
            .try_get("max_seq")
            .map_err(|e| StorageError::QueryFailed(format!("max_seq column: {e}")))?;
        Ok(max_seq.unwrap_or(0) + 1)
    }

    // --- Documents ---

    pub async fn create_document(&self, doc: &Document) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO documents
             (document_id, user_id, filename, storage_path, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id.0)
        .bind(&doc.user_id)
        .bind(&doc.filename)
        .bind(&doc.storage_path)
        .bind(doc.status.as_str())
        .bind(doc.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("create_document: {e}")))?;
        Ok(())
    }

    pub async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query("SELECT * FROM documents WHERE document_id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("get_document: {e}")))?;

        row.map(|r| Self::row_to_document(&r)).transpose()
    }

    pub async fn set_document_status(
        &self,
        id: &DocumentId,
        status: ProcessingStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE documents SET status = ? WHERE document_id = ?")
            .bind(status.as_str())
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("set_document_status: {e}")))?;
        Ok(())
    }

    /// Delete a document. Fragments cascade via foreign key.
    pub async fn delete_document(&self, id: &DocumentId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM pending_uploads WHERE document_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete pending upload: {e}")))?;
        sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete_document: {e}")))?;
        Ok(())
    }

    // --- Fragments ---

    pub async fn insert_fragments(&self, fragments: &[Fragment]) -> Result<(), StorageError> {
        for frag in fragments {
            sqlx::query(
                "INSERT INTO fragments (fragment_id, document_id, content, embedding, position)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&frag.id)
            .bind(&frag.document_id.0)
            .bind(&frag.content)
            .bind(embedding_to_blob(&frag.embedding))
            .bind(frag.position)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("insert_fragments: {e}")))?;
        }
        Ok(())
    }

    /// All fragments of the given documents, ordered by document then
    /// position.
    pub async fn fragments_for_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<Fragment>, StorageError> {
        let mut fragments = Vec::new();
        for id in ids {
            let rows = sqlx::query(
                "SELECT * FROM fragments WHERE document_id = ? ORDER BY position ASC",
            )
            .bind(&id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("fragments_for_documents: {e}")))?;
            for row in &rows {
                fragments.push(Self::row_to_fragment(row)?);
            }
        }
        Ok(fragments)
    }

    // --- Conversation–document links ---

    pub async fn link_document(
        &self,
        conversation_id: &ConversationId,
        document_id: &DocumentId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO conversation_documents (conversation_id, document_id)
             VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(&conversation_id.0)
        .bind(&document_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("link_document: {e}")))?;
        Ok(())
    }

    /// Documents linked to a conversation.
    pub async fn documents_for_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<Document>, StorageError> {
        let rows = sqlx::query(
            "SELECT d.* FROM documents d
             JOIN conversation_documents cd ON cd.document_id = d.document_id
             WHERE cd.conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("documents_for_conversation: {e}")))?;

        rows.iter().map(Self::row_to_document).collect()
    }

    /// Remove a conversation's links and delete any of its documents
    /// that no other conversation still links. Returns the ids of the
    /// deleted documents.
    pub async fn delete_orphaned_documents(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<DocumentId>, StorageError> {
        let linked: Vec<String> = sqlx::query(
            "SELECT document_id FROM conversation_documents WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("list links: {e}")))?
        .iter()
        .filter_map(|r| r.try_get::<String, _>("document_id").ok())
        .collect();

        sqlx::query("DELETE FROM conversation_documents WHERE conversation_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("delete links: {e}")))?;

        let mut deleted = Vec::new();
        for doc_id in linked {
            let row = sqlx::query(
                "SELECT COUNT(*) AS remaining FROM conversation_documents WHERE document_id = ?",
            )
            .bind(&doc_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("count links: {e}")))?;
            let remaining: i64 = row
                .try_get("remaining")
                .map_err(|e| StorageError::QueryFailed(format!("remaining column: {e}")))?;

            if remaining == 0 {
                let id = DocumentId::from(&doc_id);
                self.delete_document(&id).await?;
                deleted.push(id);
            }
        }
        Ok(deleted)
    }

    // --- Pending uploads ---

    /// Register a document uploaded before any conversation exists.
    pub async fn add_pending_upload(
        &self,
        user_id: &str,
        document_id: &DocumentId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pending_uploads (user_id, document_id, uploaded_at)
             VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(&document_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("add_pending_upload: {e}")))?;
        Ok(())
    }

    /// Take (return and clear) a user's pending uploads no older than
    /// `ttl_days`; expired entries are pruned in the same pass.
    pub async fn take_pending_uploads(
        &self,
        user_id: &str,
        ttl_days: i64,
    ) -> Result<Vec<DocumentId>, StorageError> {
        let cutoff = (Utc::now() - Duration::days(ttl_days)).to_rfc3339();

        let rows = sqlx::query(
            "SELECT document_id FROM pending_uploads
             WHERE user_id = ? AND uploaded_at >= ?
             ORDER BY uploaded_at ASC",
        )
        .bind(user_id)
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("take_pending_uploads: {e}")))?;

        let ids: Vec<DocumentId> = rows
            .iter()
            .filter_map(|r| r.try_get::<String, _>("document_id").ok())
            .map(|s| DocumentId(s))
            .collect();

        // Prune everything for this user: consumed entries and expired ones.
        sqlx::query("DELETE FROM pending_uploads WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("prune pending uploads: {e}")))?;

        Ok(ids)
    }

    // --- Row mapping ---

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StorageError> {
        let id: String = get(row, "conversation_id")?;
        let user_id: String = get(row, "user_id")?;
        let title: String = get(row, "title")?;
        let mode_str: String = get(row, "mode")?;
        let token_count: i64 = get(row, "token_count")?;
        let updated_str: String = get(row, "last_updated_at")?;

        let mode = ConversationMode::from_str(&mode_str)
            .map_err(StorageError::QueryFailed)?;

        Ok(Conversation {
            id: ConversationId(id),
            user_id,
            title,
            mode,
            token_count,
            last_updated_at: parse_timestamp(&updated_str),
        })
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StorageError> {
        let id: String = get(row, "turn_id")?;
        let conversation_id: String = get(row, "conversation_id")?;
        let sequence_number: i64 = get(row, "sequence_number")?;
        let role_str: String = get(row, "role")?;
        let content: String = get(row, "content")?;
        let model: Option<String> = get(row, "model")?;
        let created_str: String = get(row, "created_at")?;

        let role = Role::from_str(&role_str).map_err(StorageError::QueryFailed)?;

        Ok(Turn {
            id,
            conversation_id: ConversationId(conversation_id),
            sequence_number,
            role,
            content,
            model,
            created_at: parse_timestamp(&created_str),
        })
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StorageError> {
        let id: String = get(row, "document_id")?;
        let user_id: String = get(row, "user_id")?;
        let filename: String = get(row, "filename")?;
        let storage_path: String = get(row, "storage_path")?;
        let status_str: String = get(row, "status")?;
        let created_str: String = get(row, "created_at")?;

        let status = ProcessingStatus::from_str(&status_str).map_err(StorageError::QueryFailed)?;

        Ok(Document {
            id: DocumentId(id),
            user_id,
            filename,
            storage_path,
            status,
            created_at: parse_timestamp(&created_str),
        })
    }

    fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> Result<Fragment, StorageError> {
        let id: String = get(row, "fragment_id")?;
        let document_id: String = get(row, "document_id")?;
        let content: String = get(row, "content")?;
        let blob: Vec<u8> = get(row, "embedding")?;
        let position: i64 = get(row, "position")?;

        Ok(Fragment {
            id,
            document_id: DocumentId(document_id),
            content,
            embedding: blob_to_embedding(&blob),
            position,
        })
    }
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &'r sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T, StorageError> {
    row.try_get(column)
        .map_err(|e| StorageError::QueryFailed(format!("{column} column: {e}")))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Serialize an embedding vector to little-endian bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode an embedding blob. Trailing bytes that do not form a whole
/// f32 are dropped; the scorer skips vectors of unexpected dimension.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
