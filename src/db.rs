use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase, Transaction};
use std::ops::Deref;
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_schema.sql", include_str!("migrations/001_schema.sql"))];

pub struct Database {
    _db: LibsqlDatabase,
    conn: Connection,
    tx_lock: Mutex<()>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT OR IGNORE INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    /// Opens (or creates) the database file and brings the schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = ?path, "[db] opening local database");
        let db = Builder::new_local(path).build().await?;
        Self::setup(db).await
    }

    /// Private database living only as long as the returned handle.
    pub async fn in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::setup(db).await
    }

    async fn setup(db: LibsqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        let database = Database {
            _db: db,
            conn,
            tx_lock: Mutex::new(()),
        };
        database.migrate().await?;
        Ok(database)
    }

    /// Applies every pending migration. All schema statements are
    /// `IF NOT EXISTS`, so running this again is harmless.
    pub async fn migrate(&self) -> Result<()> {
        let _guard = self.tx_lock.lock().await;
        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(&self.conn, filename, sql).await?;
        }
        Ok(())
    }

    /// Row count of every user table, in name order.
    pub async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let _guard = self.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                (),
            )
            .await?;

        let mut names: Vec<String> = vec![];
        while let Some(row) = rows.next().await? {
            names.push(row.get(0)?);
        }

        let mut counts = Vec::with_capacity(names.len());
        for name in names {
            // names come from sqlite_master, not from a request
            let query = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
            let mut rows = self.conn.query(&query, ()).await?;
            let count: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => 0,
            };
            counts.push((name, count));
        }
        Ok(counts)
    }

    /// Serializes use of the shared connection. Reads hold it for the whole
    /// query so they never observe another request's open transaction.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.tx_lock.lock().await
    }

    /// Takes the write lock and opens a transaction on the shared connection.
    pub async fn write(&self) -> Result<WriteTx<'_>> {
        let guard = self.tx_lock.lock().await;
        if !self.conn.is_autocommit() {
            tracing::warn!("discarding transaction left open by an aborted writer");
            self.conn.execute("ROLLBACK", ()).await?;
        }
        let tx = self.conn.transaction().await?;
        Ok(WriteTx { tx, _guard: guard })
    }
}

/// An open write transaction holding the write lock. Dropping it without
/// `finish`, on panic or when the request future is cancelled, rolls back
/// before the lock is released.
pub struct WriteTx<'a> {
    tx: Transaction,
    _guard: MutexGuard<'a, ()>,
}

impl WriteTx<'_> {
    /// Commits when `result` is `Ok`, rolls back otherwise.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        match result {
            Ok(value) => {
                self.tx.commit().await.map_err(anyhow::Error::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.tx.rollback().await {
                    tracing::error!(error = %rollback, "failed to roll back transaction");
                }
                Err(e)
            }
        }
    }
}

impl Deref for WriteTx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_in_memory_has_schema() {
        let db = Database::in_memory().await.unwrap();
        let counts = db.table_counts().await.unwrap();
        let names: Vec<&str> = counts.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"books"));
        assert!(names.contains(&"readers"));
        assert!(names.contains(&"borrow_records"));
        assert!(counts.iter().filter(|(n, _)| n != "_migrations").all(|(_, c)| *c == 0));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
        let counts = db.table_counts().await.unwrap();
        let applied = counts.iter().find(|(n, _)| n == "_migrations").unwrap();
        assert_eq!(applied.1, 2);
    }

    async fn reader_count(db: &Database) -> i64 {
        let _guard = db.lock().await;
        let mut rows = db.connection().query("SELECT COUNT(*) FROM readers", ()).await.unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    const INSERT_READER: &str = "INSERT INTO readers (id, name, sex) VALUES ('r1', 'Ann', 'female')";

    #[tokio::test]
    async fn test_finish_commits_or_rolls_back() {
        let db = Database::in_memory().await.unwrap();

        let tx = db.write().await.unwrap();
        tx.execute(INSERT_READER, ()).await.unwrap();
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("abort"));
        assert!(tx.finish(result).await.is_err());
        assert_eq!(reader_count(&db).await, 0);

        let tx = db.write().await.unwrap();
        tx.execute(INSERT_READER, ()).await.unwrap();
        tx.finish(Ok::<(), anyhow::Error>(())).await.unwrap();
        assert_eq!(reader_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_panicking_writer_rolls_back() {
        let db = Arc::new(Database::in_memory().await.unwrap());

        let writer = db.clone();
        let outcome = tokio::spawn(async move {
            let tx = writer.write().await.unwrap();
            tx.execute(INSERT_READER, ()).await.unwrap();
            panic!("writer failed halfway");
        })
        .await;
        assert!(outcome.unwrap_err().is_panic());

        assert_eq!(reader_count(&db).await, 0);
        let tx = db.write().await.unwrap();
        tx.execute(INSERT_READER, ()).await.unwrap();
        tx.finish(Ok::<(), anyhow::Error>(())).await.unwrap();
        assert_eq!(reader_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_writer_rolls_back() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let (inserted_tx, inserted_rx) = oneshot::channel();

        let writer = db.clone();
        let task = tokio::spawn(async move {
            let tx = writer.write().await.unwrap();
            tx.execute(INSERT_READER, ()).await.unwrap();
            let _ = inserted_tx.send(());
            std::future::pending::<()>().await;
            tx.finish(Ok::<(), anyhow::Error>(())).await.unwrap();
        });
        inserted_rx.await.unwrap();
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(reader_count(&db).await, 0);
        let tx = db.write().await.unwrap();
        tx.execute(INSERT_READER, ()).await.unwrap();
        tx.finish(Ok::<(), anyhow::Error>(())).await.unwrap();
        assert_eq!(reader_count(&db).await, 1);
    }
}
