//! PostgreSQL metadata store.

use crate::error::{MetadataError, MetadataResult, is_unique_violation};
use crate::models::{
    AppendOutcome, BlobChunkRow, BlobRow, ChunkTally, CursorRow, DeviceRow, KeyEnvelopeRow, NewOp,
    OpRow, TokenRow, VaultRow,
};
use crate::repos::{
    BlobRepo, CursorPolicy, CursorRepo, DeviceRepo, KeyEnvelopeRepo, OpLogRepo, TokenRepo,
    VaultRepo,
};
use crate::store::{MetadataStore, clamp_read_limit};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL-based metadata store for production deployments.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn new(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS vaults (
                vault_id UUID PRIMARY KEY,
                owner_id UUID NOT NULL,
                vault_name TEXT NOT NULL,
                last_seq BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS devices (
                device_id UUID PRIMARY KEY,
                owner_id UUID NOT NULL,
                display_name TEXT NOT NULL,
                public_key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                last_seen_at TIMESTAMPTZ
            );

            CREATE TABLE IF NOT EXISTS op_log (
                vault_id UUID NOT NULL REFERENCES vaults(vault_id),
                seq BIGINT NOT NULL,
                file_id UUID,
                op_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                author_device_id UUID,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (vault_id, seq)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_op_log_idempotency
                ON op_log (idempotency_key);

            CREATE TABLE IF NOT EXISTS sync_cursors (
                device_id UUID NOT NULL,
                vault_id UUID NOT NULL,
                last_applied_seq BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (device_id, vault_id)
            );

            CREATE TABLE IF NOT EXISTS blobs (
                blob_hash TEXT PRIMARY KEY,
                size_bytes BIGINT NOT NULL,
                chunk_count BIGINT NOT NULL,
                cipher_alg TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                committed_at TIMESTAMPTZ
            );

            CREATE TABLE IF NOT EXISTS blob_chunks (
                blob_hash TEXT NOT NULL REFERENCES blobs(blob_hash),
                idx BIGINT NOT NULL,
                chunk_hash TEXT NOT NULL,
                size_bytes BIGINT NOT NULL,
                storage_key TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (blob_hash, idx)
            );
            CREATE INDEX IF NOT EXISTS idx_blob_chunks_hash
                ON blob_chunks (blob_hash);

            CREATE TABLE IF NOT EXISTS key_envelopes (
                vault_id UUID NOT NULL,
                device_id UUID NOT NULL,
                version BIGINT NOT NULL,
                encrypted_key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (vault_id, device_id, version)
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token_id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                scopes TEXT NOT NULL,
                expires_at TIMESTAMPTZ,
                revoked_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                last_used_at TIMESTAMPTZ,
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
impl VaultRepo for PostgresStore {
    async fn create_vault(&self, vault: &VaultRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO vaults (vault_id, owner_id, vault_name, last_seq, created_at)
            VALUES ($1, $2, $3, $4, $5)
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
        let row = sqlx::query_as::<_, VaultRow>("SELECT * FROM vaults WHERE vault_id = $1")
            .bind(vault_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_vaults_for_owner(&self, owner_id: Uuid) -> MetadataResult<Vec<VaultRow>> {
        let rows = sqlx::query_as::<_, VaultRow>(
            "SELECT * FROM vaults WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl DeviceRepo for PostgresStore {
    async fn upsert_device(&self, device: &DeviceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, owner_id, display_name, public_key, created_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (device_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                public_key = EXCLUDED.public_key,
                last_seen_at = EXCLUDED.last_seen_at
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
        let row = sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_device(&self, device_id: Uuid, seen_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE devices SET last_seen_at = $1 WHERE device_id = $2")
            .bind(seen_at)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OpLogRepo for PostgresStore {
    async fn append_op(&self, op: &NewOp) -> MetadataResult<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(seq) =
            sqlx::query_scalar::<_, i64>("SELECT seq FROM op_log WHERE idempotency_key = $1")
                .bind(&op.idempotency_key)
                .fetch_optional(&mut *tx)
                .await?
        {
            tx.rollback().await?;
            return Ok(AppendOutcome { seq, was_new: false });
        }

        // The vault row lock serializes concurrent appends to the same
        // vault; the allocation rolls back with the transaction, so reader-
        // visible sequences stay gapless.
        let seq: Option<i64> = sqlx::query_scalar(
            "UPDATE vaults SET last_seq = last_seq + 1 WHERE vault_id = $1 RETURNING last_seq",
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
                tx.rollback().await?;
                let seq = sqlx::query_scalar::<_, i64>(
                    "SELECT seq FROM op_log WHERE idempotency_key = $1",
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
            "SELECT * FROM op_log WHERE vault_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
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
impl CursorRepo for PostgresStore {
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
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (device_id, vault_id) DO UPDATE SET
                    last_applied_seq = EXCLUDED.last_applied_seq,
                    updated_at = EXCLUDED.updated_at
                "#
            }
            CursorPolicy::Max => {
                r#"
                INSERT INTO sync_cursors (device_id, vault_id, last_applied_seq, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (device_id, vault_id) DO UPDATE SET
                    last_applied_seq = GREATEST(sync_cursors.last_applied_seq, EXCLUDED.last_applied_seq),
                    updated_at = EXCLUDED.updated_at
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
            "SELECT * FROM sync_cursors WHERE device_id = $1 AND vault_id = $2",
        )
        .bind(device_id)
        .bind(vault_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl BlobRepo for PostgresStore {
    async fn upsert_blob_manifest(&self, blob: &BlobRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (blob_hash, size_bytes, chunk_count, cipher_alg, created_at, committed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
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
        let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE blob_hash = $1")
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
            "UPDATE blobs SET committed_at = COALESCE(committed_at, $1) WHERE blob_hash = $2",
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
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (blob_hash, idx) DO UPDATE SET
                chunk_hash = EXCLUDED.chunk_hash,
                size_bytes = EXCLUDED.size_bytes,
                storage_key = EXCLUDED.storage_key,
                received_at = EXCLUDED.received_at
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

    async fn count_chunks(&self, blob_hash: &str) -> MetadataResult<ChunkTally> {
        let (count, total_size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM blob_chunks WHERE blob_hash = $1",
        )
        .bind(blob_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChunkTally { count, total_size })
    }

    async fn list_chunks(&self, blob_hash: &str) -> MetadataResult<Vec<BlobChunkRow>> {
        let rows = sqlx::query_as::<_, BlobChunkRow>(
            "SELECT * FROM blob_chunks WHERE blob_hash = $1 ORDER BY idx ASC",
        )
        .bind(blob_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_chunk(&self, blob_hash: &str, idx: i64) -> MetadataResult<Option<BlobChunkRow>> {
        let row = sqlx::query_as::<_, BlobChunkRow>(
            "SELECT * FROM blob_chunks WHERE blob_hash = $1 AND idx = $2",
        )
        .bind(blob_hash)
        .bind(idx)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl KeyEnvelopeRepo for PostgresStore {
    async fn put_envelope(&self, envelope: &KeyEnvelopeRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO key_envelopes (vault_id, device_id, version, encrypted_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (vault_id, device_id, version) DO UPDATE SET
                encrypted_key = EXCLUDED.encrypted_key,
                created_at = EXCLUDED.created_at
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
            "SELECT * FROM key_envelopes WHERE vault_id = $1 AND device_id = $2 AND version = $3",
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
            WHERE vault_id = $1 AND device_id = $2
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
impl TokenRepo for PostgresStore {
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (
                token_id, user_id, token_hash, scopes, expires_at,
                revoked_at, created_at, last_used_at, description
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM api_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $1 WHERE token_id = $2")
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
        sqlx::query("UPDATE api_tokens SET revoked_at = $1 WHERE token_id = $2")
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
            VALUES ('bootstrap_token_id', $1)
            ON CONFLICT (meta_key) DO UPDATE SET meta_value = EXCLUDED.meta_value
            "#,
        )
        .bind(token_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
