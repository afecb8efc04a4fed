//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, is_unique_violation};
use crate::models::{
    AppendOutcome, BlobChunkRow, BlobRow, CursorRow, DeviceRow, KeyEnvelopeRow, NewOp, OpRow,
    TokenRow, VaultRow,
};
use crate::repos::{
    BlobRepo, CursorPolicy, CursorRepo, DeviceRepo, KeyEnvelopeRepo, OpLogRepo, TokenRepo,
    VaultRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Hard cap on ops returned by one log read, shared by both backends.
const READ_OPS_MAX_LIMIT: i64 = 1000;

/// Clamp a caller-supplied read limit into `1..=READ_OPS_MAX_LIMIT`.
pub(crate) fn clamp_read_limit(limit: i64) -> i64 {
    limit.clamp(1, READ_OPS_MAX_LIMIT)
}

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    VaultRepo
    + DeviceRepo
    + OpLogRepo
    + CursorRepo
    + BlobRepo
    + KeyEnvelopeRepo
    + TokenRepo
    + Send
    + Sync
{
    /// Create or update the database schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// Suitable for single-node deployments and tests. SQLite permits limited
/// write concurrency; a single pooled connection avoids persistent
/// "database is locked" failures under handler concurrency, and makes the
/// append transaction trivially serialized.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Config(format!("cannot create {parent:?}: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(MetadataError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS vaults (
                vault_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                vault_name TEXT NOT NULL,
                last_seq INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                public_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_seen_at TEXT
            );

            CREATE TABLE IF NOT EXISTS op_log (
                vault_id TEXT NOT NULL REFERENCES vaults(vault_id),
                seq INTEGER NOT NULL,
                file_id TEXT,
                op_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                author_device_id TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (vault_id, seq)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_op_log_idempotency
                ON op_log (idempotency_key);

            CREATE TABLE IF NOT EXISTS sync_cursors (
                device_id TEXT NOT NULL,
                vault_id TEXT NOT NULL,
                last_applied_seq INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (device_id, vault_id)
            );

            CREATE TABLE IF NOT EXISTS blobs (
                blob_hash TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                cipher_alg TEXT NOT NULL,
                created_at TEXT NOT NULL,
                committed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS blob_chunks (
                blob_hash TEXT NOT NULL REFERENCES blobs(blob_hash),
                idx INTEGER NOT NULL,
                chunk_hash TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                storage_key TEXT NOT NULL,
                received_at TEXT NOT NULL,
                PRIMARY KEY (blob_hash, idx)
            );
            CREATE INDEX IF NOT EXISTS idx_blob_chunks_hash
                ON blob_chunks (blob_hash);

            CREATE TABLE IF NOT EXISTS key_envelopes (
                vault_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                encrypted_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (vault_id, device_id, version)
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                scopes TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS server_meta (
                meta_key TEXT PRIMARY KEY,
                meta_value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VaultRepo for SqliteStore {
    async fn create_vault(&self, vault: &VaultRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO vaults (vault_id, owner_id, vault_name, last_seq, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(vault.vault_id)
        .bind(vault.owner_id)
        .bind(&vault.vault_name)
        .bind(vault.last_seq)
        .bind(vault.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                "vault {}",
                vault.vault_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_vault(&self, vault_id: Uuid) -> MetadataResult<Option<VaultRow>> {
        let row = sqlx::query_as::<_, VaultRow>("SELECT * FROM vaults WHERE vault_id = ?")
            .bind(vault_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_vaults_for_owner(&self, owner_id: Uuid) -> MetadataResult<Vec<VaultRow>> {
        let rows = sqlx::query_as::<_, VaultRow>(
            "SELECT * FROM vaults WHERE owner_id = ? ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl DeviceRepo for SqliteStore {
    async fn upsert_device(&self, device: &DeviceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, owner_id, display_name, public_key, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (device_id) DO UPDATE SET
                display_name = excluded.display_name,
                public_key = excluded.public_key,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(device.device_id)
        .bind(device.owner_id)
        .bind(&device.display_name)
        .bind(&device.public_key)
        .bind(device.created_at)
        .bind(device.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device(&self, device_id: Uuid) -> MetadataResult<Option<DeviceRow>> {
        let row = sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_device(&self, device_id: Uuid, seen_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE devices SET last_seen_at = ? WHERE device_id = ?")
            .bind(seen_at)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OpLogRepo for SqliteStore {
    async fn append_op(&self, op: &NewOp) -> MetadataResult<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        // Idempotency probe: a replayed key returns the original sequence
        // without re-executing side effects.
        if let Some(seq) =
            sqlx::query_scalar::<_, i64>("SELECT seq FROM op_log WHERE idempotency_key = ?")
                .bind(&op.idempotency_key)
                .fetch_optional(&mut *tx)
                .await?
        {
            tx.rollback().await?;
            return Ok(AppendOutcome { seq, was_new: false });
        }

        // Vault-scoped allocation: the row update serializes concurrent
        // appends to the same vault and keeps sequences gapless.
        let seq: Option<i64> = sqlx::query_scalar(
            "UPDATE vaults SET last_seq = last_seq + 1 WHERE vault_id = ? RETURNING last_seq",
        )
        .bind(op.vault_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(seq) = seq else {
            tx.rollback().await?;
            return Err(MetadataError::NotFound(format!("vault {}", op.vault_id)));
        };

        let insert = sqlx::query(
            r#"
            INSERT INTO op_log (
                vault_id, seq, file_id, op_type, payload,
                idempotency_key, author_device_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.vault_id)
        .bind(seq)
        .bind(op.file_id)
        .bind(&op.op_type)
        .bind(&op.payload)
        .bind(&op.idempotency_key)
        .bind(op.author_device_id)
        .bind(op.created_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                tx.commit().await?;
                Ok(AppendOutcome { seq, was_new: true })
            }
            Err(e) if is_unique_violation(&e) => {
                // A concurrent push won the key; the rollback releases the
                // allocated sequence.
                tx.rollback().await?;
                let seq = sqlx::query_scalar::<_, i64>(
                    "SELECT seq FROM op_log WHERE idempotency_key = ?",
                )
                .bind(&op.idempotency_key)
                .fetch_one(&self.pool)
                .await?;
                Ok(AppendOutcome { seq, was_new: false })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_ops_since(
        &self,
        vault_id: Uuid,
        since_seq: i64,
        limit: i64,
    ) -> MetadataResult<Vec<OpRow>> {
        let rows = sqlx::query_as::<_, OpRow>(
            "SELECT * FROM op_log WHERE vault_id = ? AND seq > ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(vault_id)
        .bind(since_seq)
        .bind(clamp_read_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CursorRepo for SqliteStore {
    async fn upsert_cursor(
        &self,
        device_id: Uuid,
        vault_id: Uuid,
        seq: i64,
        policy: CursorPolicy,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let sql = match policy {
            CursorPolicy::Set => {
                r#"
                INSERT INTO sync_cursors (device_id, vault_id, last_applied_seq, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (device_id, vault_id) DO UPDATE SET
                    last_applied_seq = excluded.last_applied_seq,
                    updated_at = excluded.updated_at
                "#
            }
            CursorPolicy::Max => {
                r#"
                INSERT INTO sync_cursors (device_id, vault_id, last_applied_seq, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (device_id, vault_id) DO UPDATE SET
                    last_applied_seq = MAX(sync_cursors.last_applied_seq, excluded.last_applied_seq),
                    updated_at = excluded.updated_at
                "#
            }
        };

        sqlx::query(sql)
            .bind(device_id)
            .bind(vault_id)
            .bind(seq)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_cursor(
        &self,
        device_id: Uuid,
        vault_id: Uuid,
    ) -> MetadataResult<Option<CursorRow>> {
        let row = sqlx::query_as::<_, CursorRow>(
            "SELECT * FROM sync_cursors WHERE device_id = ? AND vault_id = ?",
        )
        .bind(device_id)
        .bind(vault_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl BlobRepo for SqliteStore {
    async fn upsert_blob_manifest(&self, blob: &BlobRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (blob_hash, size_bytes, chunk_count, cipher_alg, created_at, committed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (blob_hash) DO NOTHING
            "#,
        )
        .bind(&blob.blob_hash)
        .bind(blob.size_bytes)
        .bind(blob.chunk_count)
        .bind(&blob.cipher_alg)
        .bind(blob.created_at)
        .bind(blob.committed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lookup_blob(&self, blob_hash: &str) -> MetadataResult<Option<BlobRow>> {
        let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE blob_hash = ?")
            .bind(blob_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mark_blob_committed(
        &self,
        blob_hash: &str,
        committed_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE blobs SET committed_at = COALESCE(committed_at, ?) WHERE blob_hash = ?",
        )
        .bind(committed_at)
        .bind(blob_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("blob {blob_hash}")));
        }
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &BlobChunkRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blob_chunks (blob_hash, idx, chunk_hash, size_bytes, storage_key, received_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (blob_hash, idx) DO UPDATE SET
                chunk_hash = excluded.chunk_hash,
                size_bytes = excluded.size_bytes,
                storage_key = excluded.storage_key,
                received_at = excluded.received_at
            "#,
        )
        .bind(&chunk.blob_hash)
        .bind(chunk.idx)
        .bind(&chunk.chunk_hash)
        .bind(chunk.size_bytes)
        .bind(&chunk.storage_key)
        .bind(chunk.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_chunks(&self, blob_hash: &str) -> MetadataResult<crate::models::ChunkTally> {
        let (count, total_size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM blob_chunks WHERE blob_hash = ?",
        )
        .bind(blob_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(crate::models::ChunkTally { count, total_size })
    }

    async fn list_chunks(&self, blob_hash: &str) -> MetadataResult<Vec<BlobChunkRow>> {
        let rows = sqlx::query_as::<_, BlobChunkRow>(
            "SELECT * FROM blob_chunks WHERE blob_hash = ? ORDER BY idx ASC",
        )
        .bind(blob_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_chunk(&self, blob_hash: &str, idx: i64) -> MetadataResult<Option<BlobChunkRow>> {
        let row = sqlx::query_as::<_, BlobChunkRow>(
            "SELECT * FROM blob_chunks WHERE blob_hash = ? AND idx = ?",
        )
        .bind(blob_hash)
        .bind(idx)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl KeyEnvelopeRepo for SqliteStore {
    async fn put_envelope(&self, envelope: &KeyEnvelopeRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO key_envelopes (vault_id, device_id, version, encrypted_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (vault_id, device_id, version) DO UPDATE SET
                encrypted_key = excluded.encrypted_key,
                created_at = excluded.created_at
            "#,
        )
        .bind(envelope.vault_id)
        .bind(envelope.device_id)
        .bind(envelope.version)
        .bind(&envelope.encrypted_key)
        .bind(envelope.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_envelope(
        &self,
        vault_id: Uuid,
        device_id: Uuid,
        version: i64,
    ) -> MetadataResult<Option<KeyEnvelopeRow>> {
        let row = sqlx::query_as::<_, KeyEnvelopeRow>(
            "SELECT * FROM key_envelopes WHERE vault_id = ? AND device_id = ? AND version = ?",
        )
        .bind(vault_id)
        .bind(device_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn latest_envelope(
        &self,
        vault_id: Uuid,
        device_id: Uuid,
    ) -> MetadataResult<Option<KeyEnvelopeRow>> {
        let row = sqlx::query_as::<_, KeyEnvelopeRow>(
            r#"
            SELECT * FROM key_envelopes
            WHERE vault_id = ? AND device_id = ?
            ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(vault_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl TokenRepo for SqliteStore {
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (
                token_id, user_id, token_hash, scopes, expires_at,
                revoked_at, created_at, last_used_at, description
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(&token.scopes)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.created_at)
        .bind(token.last_used_at)
        .bind(&token.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE token_id = ?")
            .bind(used_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_token(
        &self,
        token_id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query("UPDATE api_tokens SET revoked_at = ? WHERE token_id = ?")
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT meta_value FROM server_meta WHERE meta_key = 'bootstrap_token_id'",
        )
        .fetch_optional(&self.pool)
        .await?;

        match value {
            Some(s) => Uuid::parse_str(&s)
                .map(Some)
                .map_err(|e| MetadataError::Internal(format!("corrupt bootstrap token id: {e}"))),
            None => Ok(None),
        }
    }

    async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO server_meta (meta_key, meta_value)
            VALUES ('bootstrap_token_id', ?)
            ON CONFLICT (meta_key) DO UPDATE SET meta_value = excluded.meta_value
            "#,
        )
        .bind(token_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
