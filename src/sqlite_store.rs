//! SQLite-backed [`Store`] implementation.
//!
//! Every mutation runs inside a transaction behind an in-process write gate,
//! so multi-row changes (chunk insertion, cascading disables, state moves)
//! are all-or-nothing and concurrent writers from this process never race
//! for SQLite's write lock. Reads go straight to the WAL-mode pool and never
//! block each other.
//!
//! The group registry is not cached: each group operation reloads it inside
//! its transaction and persists the allocation cursor in `embedding_meta`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use embedstore_core::chunk::ChunkPolicy;
use embedstore_core::group::{GroupMask, GroupRegistry};
use embedstore_core::hash::HashAlgorithm;
use embedstore_core::models::{File, FilePart, FileState, Group};
use embedstore_core::store::{
    apply_embedding, check_chunkable, check_fail_transition, check_vector, prepare_file,
    prepare_parts, EmbeddedPart, IngestRequest, Ingested, PartFilter, Store,
};
use embedstore_core::{Result, StoreError};

const FILE_COLUMNS: &str = "id, name, url, size, hash_type, hash, group_name, group_flag, \
     state, text_size, is_enabled, created, modified";

const PART_COLUMNS: &str = "id, file_id, group_name, group_flag, idx, count, hash_type, hash, \
     text, text_tokens, embedding_model, embedding_size, embedding, is_enabled, created, modified";

const NEXT_GROUP_POSITION: &str = "next_group_position";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    write_gate: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn registry(&self) -> Result<GroupRegistry> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        load_registry(&mut conn).await
    }

    /// Put a claimed file back to the state it had before the claim.
    async fn release_claim(&self, file_id: Uuid, prior: FileState) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        sqlx::query("UPDATE embedding_file SET state = ?, modified = ? WHERE id = ? AND state = ?")
            .bind(prior.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(file_id.to_string())
            .bind(FileState::Chunking.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}

fn db(err: sqlx::Error) -> StoreError {
    StoreError::backend(err)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::backend(format!("timestamp out of range: {}", ms)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(db)
}

fn file_from_row(row: &SqliteRow) -> Result<File> {
    let id: String = column(row, "id")?;
    let hash_type: String = column(row, "hash_type")?;
    let state: String = column(row, "state")?;
    Ok(File {
        id: Uuid::parse_str(&id).map_err(StoreError::backend)?,
        name: column(row, "name")?,
        url: column(row, "url")?,
        size: column::<i64>(row, "size")? as u64,
        hash_type: hash_type.parse()?,
        hash: column(row, "hash")?,
        group_name: column(row, "group_name")?,
        group_flag: GroupMask::from_i64(column(row, "group_flag")?),
        state: state.parse()?,
        text_size: column::<i64>(row, "text_size")? as u64,
        is_enabled: column(row, "is_enabled")?,
        created: from_millis(column(row, "created")?)?,
        modified: from_millis(column(row, "modified")?)?,
    })
}

fn part_from_row(row: &SqliteRow) -> Result<FilePart> {
    let file_id: String = column(row, "file_id")?;
    let hash_type: String = column(row, "hash_type")?;
    Ok(FilePart {
        id: column(row, "id")?,
        file_id: Uuid::parse_str(&file_id).map_err(StoreError::backend)?,
        group_name: column(row, "group_name")?,
        group_flag: GroupMask::from_i64(column(row, "group_flag")?),
        index: column::<i64>(row, "idx")? as u32,
        count: column::<i64>(row, "count")? as u32,
        hash_type: hash_type.parse()?,
        hash: column(row, "hash")?,
        text: column(row, "text")?,
        text_tokens: column::<i64>(row, "text_tokens")? as u64,
        embedding_model: column(row, "embedding_model")?,
        embedding_size: column::<i64>(row, "embedding_size")? as u32,
        embedding: column(row, "embedding")?,
        is_enabled: column(row, "is_enabled")?,
        created: from_millis(column(row, "created")?)?,
        modified: from_millis(column(row, "modified")?)?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    Ok(Group {
        id: column(row, "id")?,
        name: column(row, "name")?,
        flag: GroupMask::from_i64(column(row, "flag")?),
        flag_name: column(row, "flag_name")?,
        created: from_millis(column(row, "created")?)?,
    })
}

async fn load_registry(conn: &mut SqliteConnection) -> Result<GroupRegistry> {
    let rows = sqlx::query("SELECT id, name, flag, flag_name, created FROM embedding_group")
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
    let groups = rows.iter().map(group_from_row).collect::<Result<Vec<_>>>()?;

    let next: Option<i64> = sqlx::query_scalar("SELECT value FROM embedding_meta WHERE key = ?")
        .bind(NEXT_GROUP_POSITION)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;

    Ok(GroupRegistry::restore(groups, next.unwrap_or(0) as u32))
}

async fn fetch_file(conn: &mut SqliteConnection, file_id: Uuid) -> Result<Option<(File, String)>> {
    let row = sqlx::query(&format!(
        "SELECT {}, body FROM embedding_file WHERE id = ?",
        FILE_COLUMNS
    ))
    .bind(file_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db)?;

    match row {
        Some(row) => Ok(Some((file_from_row(&row)?, column(&row, "body")?))),
        None => Ok(None),
    }
}

async fn fetch_part(conn: &mut SqliteConnection, part_id: i64) -> Result<Option<FilePart>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM embedding_file_part WHERE id = ?",
        PART_COLUMNS
    ))
    .bind(part_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db)?;
    row.as_ref().map(part_from_row).transpose()
}

async fn disable_file_rows(conn: &mut SqliteConnection, file_id: Uuid) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    sqlx::query("UPDATE embedding_file SET is_enabled = 0, modified = ? WHERE id = ? AND is_enabled = 1")
        .bind(now)
        .bind(file_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    sqlx::query(
        "UPDATE embedding_file_part SET is_enabled = 0, modified = ? WHERE file_id = ? AND is_enabled = 1",
    )
    .bind(now)
    .bind(file_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(db)?;
    Ok(())
}

/// Move a file to `Embedded` once every enabled part has a vector.
///
/// Runs inside the caller's transaction, so concurrent completions see each
/// other's writes and exactly one of them flips the state.
async fn complete_if_done(conn: &mut SqliteConnection, file_id: Uuid) -> Result<()> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS enabled,
               COALESCE(SUM(CASE WHEN embedding IS NULL THEN 1 ELSE 0 END), 0) AS pending
        FROM embedding_file_part
        WHERE file_id = ? AND is_enabled = 1
        "#,
    )
    .bind(file_id.to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(db)?;
    let enabled: i64 = column(&row, "enabled")?;
    let pending: i64 = column(&row, "pending")?;
    if enabled == 0 || pending > 0 {
        return Ok(());
    }

    let result = sqlx::query("UPDATE embedding_file SET state = ?, modified = ? WHERE id = ? AND state = ?")
        .bind(FileState::Embedded.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(file_id.to_string())
        .bind(FileState::Embedding.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    if result.rows_affected() > 0 {
        debug!(file_id = %file_id, "file fully embedded");
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_group(&self, name: &str) -> Result<Group> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let mut registry = load_registry(&mut tx).await?;
        let group = registry.create_group(name)?;

        sqlx::query(
            "INSERT INTO embedding_group (id, name, flag, flag_name, created) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(group.flag.as_i64())
        .bind(&group.flag_name)
        .bind(group.created.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            INSERT INTO embedding_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(NEXT_GROUP_POSITION)
        .bind(registry.next_position() as i64)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(group)
    }

    async fn remove_group(&self, name: &str) -> Result<Group> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let mut registry = load_registry(&mut tx).await?;
        if registry.get(name).is_some() {
            let files: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM embedding_file WHERE group_name = ? AND is_enabled = 1",
            )
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
            if files > 0 {
                return Err(StoreError::GroupInUse {
                    name: name.to_string(),
                    files: files as u64,
                });
            }
        }
        let group = registry.remove_group(name)?;
        sqlx::query("DELETE FROM embedding_group WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(group)
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.registry().await?.groups())
    }

    async fn resolve_groups(&self, names: &[String]) -> Result<GroupMask> {
        self.registry().await?.resolve(names)
    }

    async fn ingest_file(&self, request: IngestRequest) -> Result<Ingested> {
        let group = self
            .registry()
            .await?
            .get(&request.group_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownGroup(request.group_name.clone()))?;
        let (file, text) = prepare_file(&request, &group)?;

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let still_there: Option<i64> =
            sqlx::query_scalar("SELECT id FROM embedding_group WHERE name = ?")
                .bind(&group.name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
        if still_there.is_none() {
            return Err(StoreError::UnknownGroup(group.name));
        }

        let existing = sqlx::query(&format!(
            r#"
            SELECT {} FROM embedding_file
            WHERE hash_type = ? AND hash = ? AND group_name = ? AND is_enabled = 1
            ORDER BY created ASC
            LIMIT 1
            "#,
            FILE_COLUMNS
        ))
        .bind(file.hash_type.name())
        .bind(&file.hash)
        .bind(&file.group_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        if let Some(row) = existing {
            return Ok(Ingested {
                file: file_from_row(&row)?,
                deduplicated: true,
                superseded: Vec::new(),
            });
        }

        let mut superseded = Vec::new();
        if !file.url.is_empty() {
            let ids: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM embedding_file WHERE url = ? AND group_name = ? AND is_enabled = 1",
            )
            .bind(&file.url)
            .bind(&file.group_name)
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;
            for id in ids {
                let id = Uuid::parse_str(&id).map_err(StoreError::backend)?;
                disable_file_rows(&mut tx, id).await?;
                superseded.push(id);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO embedding_file (id, name, url, size, hash_type, hash, group_name,
                                        group_flag, state, text_size, body, is_enabled,
                                        created, modified)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(&file.name)
        .bind(&file.url)
        .bind(file.size as i64)
        .bind(file.hash_type.name())
        .bind(&file.hash)
        .bind(&file.group_name)
        .bind(file.group_flag.as_i64())
        .bind(file.state.as_str())
        .bind(file.text_size as i64)
        .bind(&text)
        .bind(file.created.timestamp_millis())
        .bind(file.modified.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(Ingested {
            file,
            deduplicated: false,
            superseded,
        })
    }

    async fn chunk_file(&self, file_id: Uuid, policy: &ChunkPolicy) -> Result<Vec<FilePart>> {
        let (file, text) = {
            let _gate = self.write_gate.lock().await;
            let mut tx = self.pool.begin().await.map_err(db)?;

            let (file, text) = fetch_file(&mut tx, file_id)
                .await?
                .ok_or(StoreError::FileNotFound(file_id))?;
            let enabled_parts: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM embedding_file_part WHERE file_id = ? AND is_enabled = 1",
            )
            .bind(file_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
            check_chunkable(&file, enabled_parts > 0)?;

            let claimed = sqlx::query(
                r#"
                UPDATE embedding_file SET state = ?, modified = ?
                WHERE id = ? AND is_enabled = 1 AND state IN ('New', 'Failed')
                "#,
            )
            .bind(FileState::Chunking.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            if claimed.rows_affected() == 0 {
                return Err(StoreError::AlreadyChunked(file_id));
            }
            tx.commit().await.map_err(db)?;
            (file, text)
        };
        let prior = file.state;

        let mut parts = match prepare_parts(&file, &text, policy) {
            Ok(parts) => parts,
            Err(e) => {
                self.release_claim(file_id, prior).await?;
                return Err(e);
            }
        };

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT is_enabled FROM embedding_file WHERE id = ?")
                .bind(file_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
        if enabled != Some(true) {
            sqlx::query("UPDATE embedding_file SET state = ? WHERE id = ? AND state = ?")
                .bind(prior.as_str())
                .bind(file_id.to_string())
                .bind(FileState::Chunking.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
            tx.commit().await.map_err(db)?;
            return Err(StoreError::FileDisabled(file_id));
        }

        for part in &mut parts {
            let result = sqlx::query(
                r#"
                INSERT INTO embedding_file_part (file_id, group_name, group_flag, idx, count,
                                                 hash_type, hash, text, text_tokens,
                                                 embedding_size, is_enabled, created, modified)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, ?, ?)
                "#,
            )
            .bind(part.file_id.to_string())
            .bind(&part.group_name)
            .bind(part.group_flag.as_i64())
            .bind(part.index as i64)
            .bind(part.count as i64)
            .bind(part.hash_type.name())
            .bind(&part.hash)
            .bind(&part.text)
            .bind(part.text_tokens as i64)
            .bind(part.created.timestamp_millis())
            .bind(part.modified.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            part.id = result.last_insert_rowid();
        }

        sqlx::query("UPDATE embedding_file SET state = ?, modified = ? WHERE id = ?")
            .bind(FileState::Embedding.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        debug!(file_id = %file_id, parts = parts.len(), "file chunked");
        Ok(parts)
    }

    async fn attach_embedding(
        &self,
        part_id: i64,
        vector: &[f32],
        model: &str,
    ) -> Result<FilePart> {
        check_vector(vector, model)?;

        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let mut part = fetch_part(&mut tx, part_id)
            .await?
            .ok_or(StoreError::PartNotFound(part_id))?;
        apply_embedding(&mut part, vector, model)?;

        sqlx::query(
            r#"
            UPDATE embedding_file_part
            SET embedding_model = ?, embedding_size = ?, embedding = ?, modified = ?
            WHERE id = ?
            "#,
        )
        .bind(&part.embedding_model)
        .bind(part.embedding_size as i64)
        .bind(&part.embedding)
        .bind(part.modified.timestamp_millis())
        .bind(part.id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        complete_if_done(&mut tx, part.file_id).await?;
        tx.commit().await.map_err(db)?;
        Ok(part)
    }

    async fn disable_file(&self, file_id: Uuid) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM embedding_file WHERE id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        if exists.is_none() {
            return Err(StoreError::FileNotFound(file_id));
        }
        disable_file_rows(&mut tx, file_id).await?;

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn disable_part(&self, part_id: i64) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let part = fetch_part(&mut tx, part_id)
            .await?
            .ok_or(StoreError::PartNotFound(part_id))?;
        if !part.is_enabled {
            return Ok(());
        }
        sqlx::query("UPDATE embedding_file_part SET is_enabled = 0, modified = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(part_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        complete_if_done(&mut tx, part.file_id).await?;

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn mark_failed(&self, file_id: Uuid) -> Result<File> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let (mut file, _) = fetch_file(&mut tx, file_id)
            .await?
            .ok_or(StoreError::FileNotFound(file_id))?;
        check_fail_transition(&file)?;
        file.state = FileState::Failed;
        file.modified = Utc::now();
        sqlx::query("UPDATE embedding_file SET state = ?, modified = ? WHERE id = ?")
            .bind(file.state.as_str())
            .bind(file.modified.timestamp_millis())
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(file)
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<File>> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        Ok(fetch_file(&mut conn, file_id).await?.map(|(file, _)| file))
    }

    async fn get_part(&self, part_id: i64) -> Result<Option<FilePart>> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        fetch_part(&mut conn, part_id).await
    }

    async fn list_parts(&self, file_id: Uuid) -> Result<Vec<FilePart>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM embedding_file_part WHERE file_id = ? ORDER BY id ASC",
            PART_COLUMNS
        ))
        .bind(file_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(part_from_row).collect()
    }

    async fn list_files(&self, group_name: Option<&str>) -> Result<Vec<File>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM embedding_file
            WHERE (? IS NULL OR group_name = ?)
            ORDER BY created ASC, id ASC
            "#,
            FILE_COLUMNS
        ))
        .bind(group_name)
        .bind(group_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(file_from_row).collect()
    }

    async fn pending_parts(&self, limit: usize) -> Result<Vec<FilePart>> {
        let columns = PART_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM embedding_file_part p
            JOIN embedding_file f ON f.id = p.file_id
            WHERE p.is_enabled = 1 AND f.is_enabled = 1 AND p.embedding IS NULL
            ORDER BY p.id ASC
            LIMIT ?
            "#,
            columns
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(part_from_row).collect()
    }

    async fn find_embedding(
        &self,
        hash_type: HashAlgorithm,
        hash: &[u8],
        model: &str,
    ) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar(
            r#"
            SELECT embedding FROM embedding_file_part
            WHERE hash_type = ? AND hash = ? AND embedding_model = ?
              AND is_enabled = 1 AND embedding IS NOT NULL
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(hash_type.name())
        .bind(hash)
        .bind(model)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)
    }

    async fn embedded_parts(&self, filter: &PartFilter) -> Result<Vec<EmbeddedPart>> {
        let mask = filter.group_mask.map(|m| m.as_i64());
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.embedding
            FROM embedding_file_part p
            JOIN embedding_file f ON f.id = p.file_id
            WHERE p.is_enabled = 1 AND f.is_enabled = 1
              AND p.embedding IS NOT NULL
              AND p.embedding_model = ?
              AND (? IS NULL OR (p.group_flag & ?) != 0)
            ORDER BY p.id ASC
            "#,
        )
        .bind(&filter.model)
        .bind(mask)
        .bind(mask)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| {
                Ok(EmbeddedPart {
                    id: column(row, "id")?,
                    embedding: column(row, "embedding")?,
                })
            })
            .collect()
    }

    async fn purge_disabled(&self) -> Result<u64> {
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let parts = sqlx::query(
            r#"
            DELETE FROM embedding_file_part
            WHERE is_enabled = 0
               OR file_id IN (SELECT id FROM embedding_file WHERE is_enabled = 0)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        let files = sqlx::query("DELETE FROM embedding_file WHERE is_enabled = 0")
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(parts.rows_affected() + files.rows_affected())
    }
}
