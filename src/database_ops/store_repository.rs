use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite};
use tokio::sync::MutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::db::Db;
use crate::error::{PipelineError, Result};
use crate::model::{Provenance, Retailer, StoreRecord};

/// Upper bound on rows returned by [`StoreRepository::search`].
pub const SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }
}

/// One retailer's store table. Writes go through the [`Db`] writer lock, so repositories
/// for different retailers on the same file never race each other.
#[derive(Clone, Debug)]
pub struct StoreRepository {
    db: Db,
    retailer: Retailer,
}

/// Held for the whole of one write transaction. Must be handed to `finish_write`; a write
/// future dropped midway leaves its connection inside an open transaction.
struct WriteTx<'a> {
    _guard: MutexGuard<'a, ()>,
    conn: PoolConnection<Sqlite>,
}

impl StoreRepository {
    pub fn new(db: Db, retailer: Retailer) -> Self {
        Self { db, retailer }
    }

    pub fn retailer(&self) -> Retailer {
        self.retailer
    }

    fn table(&self) -> &'static str {
        self.retailer.table_name()
    }

    pub async fn init_schema(&self) -> Result<()> {
        let t = self.table();
        let ddl = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {t} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    store_code TEXT UNIQUE NOT NULL,
                    store_name TEXT NOT NULL,
                    city TEXT NOT NULL,
                    district TEXT,
                    address TEXT NOT NULL DEFAULT '',
                    phone TEXT,
                    latitude REAL,
                    longitude REAL,
                    attributes TEXT NOT NULL DEFAULT '{{}}',
                    source_type TEXT NOT NULL DEFAULT 'sourced',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_city ON {t}(city)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_district ON {t}(district)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_source_type ON {t}(source_type)"),
        ];
        let _guard = self.db.write_lock.lock().await;
        for stmt in ddl {
            sqlx::query(&stmt).execute(&self.db.pool).await?;
        }
        debug!(table = t, "schema ready");
        Ok(())
    }

    /// Take the writer lock and open a `BEGIN IMMEDIATE` transaction, so the write lock on
    /// the file is held before the first read of the transaction.
    async fn begin_write(&self) -> Result<WriteTx<'_>> {
        let guard = self.db.write_lock.lock().await;
        let mut conn = self.db.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(WriteTx {
            _guard: guard,
            conn,
        })
    }

    /// Commit on success, roll back on failure. The writer lock drops with `tx`.
    async fn finish_write<T>(&self, mut tx: WriteTx<'_>, outcome: Result<T>) -> Result<T> {
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                self.abandon(tx).await;
                return Err(e);
            }
        };
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *tx.conn).await {
            self.abandon(tx).await;
            return Err(e.into());
        }
        Ok(value)
    }

    async fn abandon(&self, mut tx: WriteTx<'_>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *tx.conn).await {
            warn!(retailer = %self.retailer, error = %e, "rollback failed; closing connection");
            drop(tx.conn.detach());
        }
    }

    pub async fn upsert_one(&self, record: &StoreRecord) -> Result<UpsertOutcome> {
        let mut tx = self.begin_write().await?;
        let outcome = self.upsert_in(&mut tx.conn, record, Utc::now()).await;
        self.finish_write(tx, outcome).await
    }

    /// Upsert a batch in a single transaction. Either every row lands or none do.
    #[instrument(skip_all, fields(retailer = %self.retailer, batch = records.len()))]
    pub async fn upsert_many(&self, records: &[StoreRecord]) -> Result<UpsertCounts> {
        let now = Utc::now();
        let mut tx = self.begin_write().await?;
        let outcome = async {
            let mut counts = UpsertCounts::default();
            for record in records {
                counts.record(self.upsert_in(&mut tx.conn, record, now).await?);
            }
            Ok::<_, PipelineError>(counts)
        }
        .await;
        let counts = self.finish_write(tx, outcome).await?;
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            "batch persisted"
        );
        Ok(counts)
    }

    async fn upsert_in(
        &self,
        conn: &mut SqliteConnection,
        record: &StoreRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let t = self.table();
        let exists = sqlx::query(&format!("SELECT 1 FROM {t} WHERE store_code = ?1"))
            .bind(&record.store_code)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        let attributes = serde_json::to_string(&record.attributes)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {t} (
                store_code, store_name, city, district, address, phone,
                latitude, longitude, attributes, source_type, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            ON CONFLICT(store_code) DO UPDATE SET
                store_name = excluded.store_name,
                city = excluded.city,
                district = excluded.district,
                address = excluded.address,
                phone = excluded.phone,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                attributes = excluded.attributes,
                source_type = excluded.source_type,
                updated_at = excluded.updated_at
            "#
        ))
        .bind(&record.store_code)
        .bind(&record.store_name)
        .bind(&record.region)
        .bind(&record.sub_region)
        .bind(&record.address)
        .bind(&record.phone)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(attributes)
        .bind(record.provenance().as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Stores in `region`, ordered by sub-region (absent first) then name.
    pub async fn by_region(&self, region: &str) -> Result<Vec<StoreRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE city = ?1 ORDER BY district, store_name, store_code",
            self.table()
        ))
        .bind(region)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Case-insensitive substring match on name, code or address; at most [`SEARCH_LIMIT`]
    /// rows ordered by region, sub-region, name. A blank keyword matches nothing.
    ///
    /// Folding is SQLite's `lower()`, which is ASCII-only: full-width letters such as
    /// `ＡＴＭ` only match with the same case. CJK text has no case and is unaffected.
    pub async fn search(&self, keyword: &str) -> Result<Vec<StoreRecord>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            r#"
            SELECT * FROM {}
            WHERE instr(lower(store_name), lower(?1)) > 0
               OR instr(lower(store_code), lower(?1)) > 0
               OR instr(lower(address), lower(?1)) > 0
            ORDER BY city, district, store_name, store_code
            LIMIT ?2
            "#,
            self.table()
        ))
        .bind(keyword)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn get(&self, store_code: &str) -> Result<Option<StoreRecord>> {
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE store_code = ?1", self.table()))
            .bind(store_code)
            .fetch_optional(&self.db.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Full scan in export order.
    pub async fn all(&self) -> Result<Vec<StoreRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} ORDER BY city, district, store_name, store_code",
            self.table()
        ))
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table()))
            .fetch_one(&self.db.pool)
            .await?;
        Ok(n)
    }

    pub async fn count_by_source(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query(&format!(
            "SELECT source_type, COUNT(*) AS n FROM {} GROUP BY source_type",
            self.table()
        ))
        .fetch_all(&self.db.pool)
        .await?;
        let mut out = BTreeMap::new();
        for r in rows {
            out.insert(r.try_get::<String, _>("source_type")?, r.try_get::<i64, _>("n")?);
        }
        Ok(out)
    }

    /// Delete synthetic rows for a geography. With `sub_region` unset the whole region is
    /// cleared. Sourced rows are never touched.
    #[instrument(skip(self), fields(retailer = %self.retailer))]
    pub async fn purge_synthetic(&self, region: &str, sub_region: Option<&str>) -> Result<u64> {
        let _guard = self.db.write_lock.lock().await;
        let res = sqlx::query(&format!(
            r#"
            DELETE FROM {}
            WHERE source_type = ?1 AND city = ?2 AND (?3 IS NULL OR district = ?3)
            "#,
            self.table()
        ))
        .bind(Provenance::Synthetic.as_str())
        .bind(region)
        .bind(sub_region)
        .execute(&self.db.pool)
        .await?;
        let purged = res.rows_affected();
        if purged > 0 {
            info!(purged, "removed superseded synthetic rows");
        }
        Ok(purged)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<StoreRecord> {
    let attributes: String = row.try_get("attributes")?;
    Ok(StoreRecord {
        store_code: row.try_get("store_code")?,
        store_name: row.try_get("store_name")?,
        region: row.try_get("city")?,
        sub_region: row.try_get("district")?,
        address: row.try_get("address")?,
        phone: row.try_get("phone")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        attributes: serde_json::from_str(&attributes)?,
        updated_at: row.try_get("updated_at")?,
    })
}
