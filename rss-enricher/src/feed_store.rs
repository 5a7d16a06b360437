use crate::types::{
    EnricherError, EnrichmentRequest, EnrichmentStatus, Item, PipelineStats, Result, Source,
    SummaryPayload,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence for sources, items and enrichment requests.
///
/// Cloning is cheap; every clone shares the same connection pool. Callers that
/// need atomicity across statements open their own transaction with
/// [`FeedStore::begin_write`] and pass the connection to the associated
/// functions.
///
/// Writes from this process are serialized on one lock. A deferred SQLite
/// transaction that reads before it writes cannot be upgraded once another
/// connection has committed in WAL mode, and the busy timeout does not help
/// there, so a writer must hold the lock from its first statement on.
#[derive(Clone)]
pub struct FeedStore {
    db: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// A transaction that holds the store's write lock until it commits or is
/// dropped.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl FeedStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        // SQLite allows one writer at a time; WAL plus a busy timeout lets
        // concurrent units queue on the lock instead of failing.
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let db = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(db))
    }

    /// Private in-memory database with the schema applied. Used by tests and
    /// dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // An in-memory database lives and dies with its connection, so the
        // pool holds exactly one and never recycles it.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::with_pool(db);
        store.migrate().await?;
        Ok(store)
    }

    fn with_pool(db: SqlitePool) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    /// Take the write lock, then open a transaction. The lock is acquired
    /// before the connection so waiting writers never pin pool slots.
    pub async fn begin_write(&self) -> Result<WriteTransaction> {
        let guard = self.write_lock.clone().lock_owned().await;
        let tx = self.db.begin().await?;
        Ok(WriteTransaction { tx, _guard: guard })
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    pub async fn add_source(
        &self,
        url: &str,
        title: &str,
        fetch_interval_minutes: u32,
        verify_tls: bool,
    ) -> Result<Source> {
        if self.get_source_by_url(url).await?.is_some() {
            return Err(EnricherError::SourceExists {
                url: url.to_string(),
            });
        }

        let source = Source {
            id: Uuid::new_v4(),
            url: url.to_string(),
            title: title.to_string(),
            is_active: true,
            fetch_interval_minutes,
            verify_tls,
            last_fetched_at: None,
            created_at: Utc::now(),
        };

        let _guard = self.write_lock.lock().await;
        let inserted = sqlx::query(
            r#"
            INSERT INTO sources (id, url, title, is_active, fetch_interval_minutes, verify_tls, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source.id)
        .bind(&source.url)
        .bind(&source.title)
        .bind(source.is_active)
        .bind(i64::from(source.fetch_interval_minutes))
        .bind(source.verify_tls)
        .bind(source.created_at)
        .execute(&self.db)
        .await;

        match inserted {
            Ok(_) => {}
            // Lost a race with another registration of the same URL.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(EnricherError::SourceExists {
                    url: url.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(source_id = %source.id, url = %source.url, "Added source");
        Ok(source)
    }

    pub async fn get_source(&self, source_id: Uuid) -> Result<Source> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(EnricherError::NotFound {
                what: "source",
                id: source_id,
            }),
        }
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn list_active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE is_active = 1 ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(source_from_row).collect()
    }

    pub async fn set_source_active(&self, source_id: Uuid, is_active: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE sources SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(source_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_source_fetched(&self, source_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE sources SET last_fetched_at = ? WHERE id = ?")
            .bind(at)
            .bind(source_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Items (transactional helpers take the caller's connection)
    // ------------------------------------------------------------------

    pub async fn item_exists(conn: &mut SqliteConnection, dedup_key: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE dedup_key = ?")
            .bind(dedup_key)
            .fetch_one(&mut *conn)
            .await?;
        Ok(found > 0)
    }

    /// Returns false when another writer already stored the same dedup key.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &Item) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (id, dedup_key, url, title, content, author, published_at, source_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(item.id)
        .bind(&item.dedup_key)
        .bind(&item.url)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.author)
        .bind(item.published_at)
        .bind(item.source_id)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn request_exists_for_item(
        conn: &mut SqliteConnection,
        item_id: Uuid,
    ) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM enrichment_requests WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(found > 0)
    }

    pub async fn insert_pending_request(
        conn: &mut SqliteConnection,
        item_id: Uuid,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO enrichment_requests (id, item_id, status, keywords, created_at, updated_at)
            VALUES (?, ?, 'pending', '[]', ?, ?)
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(item_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<Option<Item>> {
        let row = sqlx::query("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn get_item_by_key(&self, dedup_key: &str) -> Result<Option<Item>> {
        let row = sqlx::query("SELECT * FROM items WHERE dedup_key = ?")
            .bind(dedup_key)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn list_items_for_source(&self, source_id: Uuid) -> Result<Vec<Item>> {
        let rows = sqlx::query("SELECT * FROM items WHERE source_id = ? ORDER BY created_at")
            .bind(source_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Enrichment requests
    // ------------------------------------------------------------------

    /// Oldest pending requests first.
    pub async fn pending_request_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM enrichment_requests WHERE status = 'pending' ORDER BY created_at, rowid LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    pub async fn get_request(&self, request_id: Uuid) -> Result<Option<EnrichmentRequest>> {
        let row = sqlx::query("SELECT * FROM enrichment_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    pub async fn get_request_for_item(&self, item_id: Uuid) -> Result<Option<EnrichmentRequest>> {
        let row = sqlx::query("SELECT * FROM enrichment_requests WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    /// Store a successful result. Only a still-pending request is updated;
    /// returns whether a row changed.
    pub async fn complete_request(
        &self,
        request_id: Uuid,
        payload: &SummaryPayload,
        model: &str,
    ) -> Result<bool> {
        let keywords = serde_json::to_string(&payload.keywords)?;
        let mut tx = self.begin_write().await?;

        let result = sqlx::query(
            r#"
            UPDATE enrichment_requests
            SET status = 'completed', summary = ?, highlight = ?, keywords = ?, model = ?,
                error = NULL, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&payload.summary)
        .bind(&payload.highlight)
        .bind(keywords)
        .bind(model)
        .bind(Utc::now())
        .bind(request_id)
        .execute(tx.conn())
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal failure in its own transaction.
    pub async fn fail_request(&self, request_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            r#"
            UPDATE enrichment_requests
            SET status = 'failed', error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(request_id)
        .execute(tx.conn())
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Move failed requests back to pending so the next cycle picks them up.
    /// `None` resets all of them.
    pub async fn reset_failed(&self, limit: Option<usize>) -> Result<u64> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            r#"
            UPDATE enrichment_requests
            SET status = 'pending', error = NULL, updated_at = ?
            WHERE id IN (
                SELECT id FROM enrichment_requests
                WHERE status = 'failed'
                ORDER BY updated_at
                LIMIT ?
            )
            "#,
        )
        .bind(Utc::now())
        .bind(limit)
        .execute(&self.db)
        .await?;

        info!(reset = result.rows_affected(), "Reset failed enrichment requests");
        Ok(result.rows_affected())
    }

    pub async fn count_requests(&self, status: EnrichmentStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM enrichment_requests WHERE status = ?",
        )
        .bind(status.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        let source_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0) AS active,
                   MAX(last_fetched_at) AS last_fetch_at
            FROM sources
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let total_items = self.count_items().await?;
        let pending = self.count_requests(EnrichmentStatus::Pending).await?;
        let completed = self.count_requests(EnrichmentStatus::Completed).await?;
        let failed = self.count_requests(EnrichmentStatus::Failed).await?;

        let last_fetch_at = source_row
            .try_get::<Option<String>, _>("last_fetch_at")?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let total_requests = completed + failed + pending;
        let completion_rate = if total_requests > 0 {
            completed as f64 / total_requests as f64
        } else {
            0.0
        };

        Ok(PipelineStats {
            total_sources: source_row.try_get("total")?,
            active_sources: source_row.try_get("active")?,
            total_items,
            pending,
            completed,
            failed,
            last_fetch_at,
            completion_rate,
        })
    }
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let interval: i64 = row.try_get("fetch_interval_minutes")?;
    Ok(Source {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        is_active: row.try_get("is_active")?,
        fetch_interval_minutes: u32::try_from(interval).unwrap_or(30),
        verify_tls: row.try_get("verify_tls")?,
        last_fetched_at: row.try_get("last_fetched_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    Ok(Item {
        id: row.try_get("id")?,
        dedup_key: row.try_get("dedup_key")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        author: row.try_get("author")?,
        published_at: row.try_get("published_at")?,
        source_id: row.try_get("source_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<EnrichmentRequest> {
    let status: String = row.try_get("status")?;
    let keywords: String = row.try_get("keywords")?;

    Ok(EnrichmentRequest {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        status: EnrichmentStatus::from_str(&status).map_err(EnricherError::Config)?,
        summary: row.try_get("summary")?,
        highlight: row.try_get("highlight")?,
        keywords: serde_json::from_str(&keywords)?,
        model: row.try_get("model")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
