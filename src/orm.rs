//! Thin async persistence layer over SQLite (sqlx).
//!
//! Usage:
//! let db = Db::connect("sqlite::memory:").await?;
//! auto_migrate(Arc::new(db.clone())).await?;
//! let rows: Vec<Cafe> = db.fetch_all("SELECT * FROM cafe").await?;
pub use futures::future::BoxFuture;
use log::{debug, info};
use sha2::{Digest, Sha256};
pub use sqlx::FromRow;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use walkdir::WalkDir;

const SCHEMA_TABLE: &str = "__schema_migrations";
const FILE_TABLE: &str = "__file_migrations";

/// An async database pool wrapper.
///
/// Cloning is cheap; every clone shares the same pool and each query checks a
/// connection out for its own duration only.
#[derive(Clone, Debug)]
pub struct Db {
    pool: SqlitePool,
}

/// A model migration registered with `inventory::submit!`.
pub struct Migration(pub MigrationFn);

/// Migration function pointer for a model.
pub type MigrationFn = fn(Arc<Db>) -> BoxFuture<'static, Result<(), sqlx::Error>>;

impl std::ops::Deref for Migration {
    type Target = MigrationFn;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

inventory::collect!(Migration);

#[async_trait::async_trait]
pub trait Model: Send + Sync {
    fn table_name() -> &'static str;
    fn create_table_sql() -> String;
    fn columns() -> Vec<(String, String)>;

    /// Create the table on first run, then add any newly declared columns.
    async fn migrate(db: Arc<Db>) -> Result<(), sqlx::Error> {
        let table_name = Self::table_name();
        let create_sql = Self::create_table_sql();
        let schema_hash = hash(&create_sql);

        db.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {SCHEMA_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT UNIQUE NOT NULL,
                schema_sql TEXT NOT NULL,
                hash TEXT NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )"
        ))
        .await?;

        let recorded: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT hash FROM {SCHEMA_TABLE} WHERE table_name = ?"
        ))
        .bind(table_name)
        .fetch_optional(db.pool())
        .await?;
        if matches!(&recorded, Some((h,)) if *h == schema_hash) {
            info!("No schema changes detected for `{table_name}`.");
            return Ok(());
        }

        // No-op when the table predates us; missing columns are added below.
        db.execute(&create_sql).await?;

        let existing: Vec<String> = sqlx::query(&format!("PRAGMA table_info({table_name})"))
            .fetch_all(db.pool())
            .await?
            .into_iter()
            .map(|row: SqliteRow| row.get::<String, _>("name"))
            .collect();
        for (name, sqltype) in Self::columns() {
            if !existing.contains(&name) {
                db.execute(&format!(
                    "ALTER TABLE {table_name} ADD COLUMN {name} {sqltype}"
                ))
                .await?;
                info!("`{table_name}`: added column {name} {sqltype}");
            }
        }

        sqlx::query(&format!(
            "INSERT INTO {SCHEMA_TABLE} (table_name, schema_sql, hash) VALUES (?, ?, ?) \
             ON CONFLICT(table_name) DO UPDATE SET \
             schema_sql = excluded.schema_sql, hash = excluded.hash, \
             applied_at = CURRENT_TIMESTAMP"
        ))
        .bind(table_name)
        .bind(&create_sql)
        .bind(&schema_hash)
        .execute(db.pool())
        .await?;
        if recorded.is_none() {
            info!("Migrated `{table_name}` (initial schema applied).");
        } else {
            info!("Migrated `{table_name}` (schema updated).");
        }
        Ok(())
    }
}

fn hash(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Db {
    /// Connect to (or create) a SQLite database at the given URI.
    ///
    /// In-memory databases are private to a connection, so they get a single
    /// pooled connection that is never recycled.
    pub async fn connect(uri: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to SQLite database at URI: {}", uri);
        let options = SqliteConnectOptions::from_str(uri)?.create_if_missing(true);
        let pool = if uri.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await?
        };
        info!("Connected to SQLite database: {}", uri);
        Ok(Db { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a statement that takes no parameters, e.g. DDL.
    pub async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        debug!("Executing SQL: {}", sql);
        let result = self.pool.execute(sql).await;
        if let Err(e) = &result {
            log::error!("SQL execution failed: {}", e);
        }
        result.map(|_| ())
    }

    /// Fetch all rows of a parameterless query and map them with `FromRow`.
    pub async fn fetch_all<T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin>(
        &self,
        sql: &str,
    ) -> Result<Vec<T>, sqlx::Error> {
        debug!("Fetching rows with SQL: {}", sql);
        let result = sqlx::query_as(sql).fetch_all(&self.pool).await;
        match &result {
            Ok(rows) => debug!("Fetched {} rows", rows.len()),
            Err(e) => log::error!("Row fetch failed: {}", e),
        }
        result
    }
}

/// Migrate all models registered through `inventory`.
pub async fn auto_migrate(db: Arc<Db>) -> Result<(), sqlx::Error> {
    info!("Starting auto migration of all registered models...");
    let mut total = 0;
    for m in inventory::iter::<Migration> {
        total += 1;
        if let Err(e) = m(db.clone()).await {
            log::error!("Auto-migration failed for a model: {}", e);
            return Err(e);
        }
    }
    info!("Auto migration completed for {} models.", total);
    Ok(())
}

/// Apply the `*.sql` files in `migrations_dir` in filename order.
///
/// Each file runs once; applied filenames are tracked in a meta table.
pub async fn apply_migration_files(db: Arc<Db>, migrations_dir: &Path) -> Result<usize, sqlx::Error> {
    db.execute(&format!(
        "CREATE TABLE IF NOT EXISTS {FILE_TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT UNIQUE NOT NULL,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )"
    ))
    .await?;

    let mut files: Vec<_> = WalkDir::new(migrations_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|f| f.file_type().is_file())
        .filter(|f| f.path().extension().map(|e| e == "sql").unwrap_or(false))
        .collect();
    files.sort_by_key(|f| f.file_name().to_os_string());

    let mut applied_now = 0;
    for entry in files {
        let filename = entry.file_name().to_string_lossy().to_string();
        let applied: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT filename FROM {FILE_TABLE} WHERE filename = ?"
        ))
        .bind(&filename)
        .fetch_optional(db.pool())
        .await?;
        if applied.is_some() {
            debug!("Migration `{}` already applied.", filename);
            continue;
        }

        let sql = tokio::fs::read_to_string(entry.path()).await?;
        info!("Applying migration file: {}", filename);
        db.execute(&sql).await?;
        sqlx::query(&format!("INSERT INTO {FILE_TABLE} (filename) VALUES (?)"))
            .bind(&filename)
            .execute(db.pool())
            .await?;
        applied_now += 1;
    }

    Ok(applied_now)
}
