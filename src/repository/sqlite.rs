//! SQLite-backed flag cache.
//!
//! Every operation opens its own connection inside `spawn_blocking` and
//! closes it when done; no handle is held between calls.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::task;
use tokio_util::sync::CancellationToken;

use super::FlagsRepository;
use crate::error::{Error, Result};
use crate::flag::{FeatureFlag, FlagValue};

const TABLE_NAME: &str = "FeatureFlags";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS FeatureFlags(\
     FlagKey TEXT PRIMARY KEY, \
     Value BLOB NOT NULL\
     ) WITHOUT ROWID;";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to open the database, parsed from a connection string.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub path: PathBuf,
    pub mode: OpenMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadWriteCreate => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

impl DataSource {
    /// Parses `Data Source=<path>;Mode=<mode>` or a bare file path.
    ///
    /// Keys are case-insensitive; `DataSource` and `Filename` are accepted as
    /// aliases. Unknown keys are ignored.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() {
            return Err(Error::invalid_argument("connection string is empty"));
        }

        if !connection_string.contains('=') {
            return Ok(Self {
                path: PathBuf::from(connection_string),
                mode: OpenMode::ReadWriteCreate,
            });
        }

        let mut path = None;
        let mut mode = OpenMode::ReadWriteCreate;
        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(Error::invalid_argument(format!(
                    "malformed connection string segment: {}",
                    part
                )));
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().replace(' ', "").as_str() {
                "datasource" | "filename" => path = Some(PathBuf::from(value)),
                "mode" => {
                    mode = match value.to_ascii_lowercase().as_str() {
                        "readwritecreate" => OpenMode::ReadWriteCreate,
                        "readwrite" => OpenMode::ReadWrite,
                        "readonly" => OpenMode::ReadOnly,
                        other => {
                            return Err(Error::invalid_argument(format!(
                                "unsupported connection mode: {}",
                                other
                            )))
                        }
                    }
                }
                other => tracing::debug!("ignoring connection string key '{}'", other),
            }
        }

        match path {
            Some(path) if !path.as_os_str().is_empty() => Ok(Self { path, mode }),
            _ => Err(Error::invalid_argument(
                "connection string has no Data Source",
            )),
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.mode.flags())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

/// Flag cache stored in a single `FeatureFlags` table.
pub struct SqliteFlagsRepository {
    source: DataSource,
}

impl SqliteFlagsRepository {
    pub fn new(connection_string: &str) -> Result<Self> {
        Ok(Self {
            source: DataSource::parse(connection_string)?,
        })
    }

    pub fn data_source(&self) -> &DataSource {
        &self.source
    }

    /// Creates the `FeatureFlags` table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let source = self.source.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = source.open()?;
            ensure_table(&conn)
        })
        .await?
    }
}

#[async_trait]
impl FlagsRepository for SqliteFlagsRepository {
    async fn save_flags(&self, flags: Vec<FeatureFlag>, cancel: &CancellationToken) -> Result<()> {
        let rows = flags
            .iter()
            .map(|flag| -> Result<(String, Vec<u8>)> {
                Ok((flag.key().to_string(), serde_json::to_vec(flag.value())?))
            })
            .collect::<Result<Vec<_>>>()?;

        let source = self.source.clone();
        let cancel = cancel.clone();
        tracing::info!(count = rows.len(), "saving feature flags into the database");
        task::spawn_blocking(move || -> Result<()> {
            let mut conn = source.open()?;
            ensure_table(&conn)?;
            replace_flags(&mut conn, &rows, &cancel)
        })
        .await?
        .inspect_err(|e| tracing::error!("failed to save feature flags: {}", e))
    }

    async fn fetch_flag(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(bool, FeatureFlag)> {
        if key.is_empty() {
            return Err(Error::invalid_argument("flag key must not be empty"));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let source = self.source.clone();
        let key = key.to_string();
        task::spawn_blocking(move || -> Result<(bool, FeatureFlag)> {
            let conn = source.open()?;
            ensure_table(&conn)?;
            query_flag(&conn, &key)
        })
        .await?
    }
}

// ============================================================================
// Synchronous SQL operations (called inside spawn_blocking)
// ============================================================================

fn table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![TABLE_NAME],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check-then-create. Never drops or re-creates a live table.
fn ensure_table(conn: &Connection) -> Result<()> {
    if table_exists(conn)? {
        tracing::debug!("FeatureFlags table exists in the database");
        return Ok(());
    }

    tracing::info!("creating FeatureFlags database table");
    conn.execute_batch(CREATE_TABLE)
        .inspect_err(|e| tracing::error!("error creating database tables: {}", e))?;
    Ok(())
}

/// Deletes every row and inserts `rows` in one transaction.
///
/// Dropping the transaction without committing rolls it back, so every early
/// return below leaves the table as it was.
fn replace_flags(
    conn: &mut Connection,
    rows: &[(String, Vec<u8>)],
    cancel: &CancellationToken,
) -> Result<()> {
    let tx = conn.transaction()?;

    tracing::warn!("deleting all existing records from the FeatureFlags table");
    tx.execute("DELETE FROM FeatureFlags", [])?;

    {
        let mut insert =
            tx.prepare("INSERT OR REPLACE INTO FeatureFlags (FlagKey, Value) VALUES (?1, ?2)")?;
        for (key, value) in rows {
            if cancel.is_cancelled() {
                tracing::info!(
                    "rolling back save feature flags transaction, cancellation was requested"
                );
                return Err(Error::Cancelled);
            }
            tracing::debug!("> inserting [{}]", key);
            insert.execute(params![key, value])?;
        }
    }

    if cancel.is_cancelled() {
        tracing::info!("rolling back save feature flags transaction, cancellation was requested");
        return Err(Error::Cancelled);
    }

    tracing::info!("committing save feature flags transaction");
    tx.commit()?;
    Ok(())
}

fn query_flag(conn: &Connection, key: &str) -> Result<(bool, FeatureFlag)> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT Value FROM FeatureFlags WHERE FlagKey = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match blob {
        Some(blob) => {
            let value: FlagValue = serde_json::from_slice(&blob)?;
            Ok((true, FeatureFlag::new(key, value)?))
        }
        None => Ok((false, FeatureFlag::null())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (SqliteFlagsRepository, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let connection_string = format!(
            "Data Source={};Mode=ReadWriteCreate",
            dir.path().join("grapio.db").display()
        );
        let repo = SqliteFlagsRepository::new(&connection_string).expect("valid connection string");
        (repo, dir)
    }

    fn flag(key: &str, value: impl Into<FlagValue>) -> FeatureFlag {
        FeatureFlag::new(key, value).unwrap()
    }

    #[test]
    fn test_parse_connection_strings() {
        let source = DataSource::parse("Data Source=grapio.db;Mode=ReadWriteCreate").unwrap();
        assert_eq!(source.path, PathBuf::from("grapio.db"));
        assert_eq!(source.mode, OpenMode::ReadWriteCreate);

        let source = DataSource::parse("datasource=/tmp/flags.db; mode=ReadOnly;Cache=Shared").unwrap();
        assert_eq!(source.path, PathBuf::from("/tmp/flags.db"));
        assert_eq!(source.mode, OpenMode::ReadOnly);

        let source = DataSource::parse("flags.sqlite").unwrap();
        assert_eq!(source.path, PathBuf::from("flags.sqlite"));

        assert!(DataSource::parse("").is_err());
        assert!(DataSource::parse("Mode=ReadWrite").is_err());
        assert!(DataSource::parse("Data Source=x.db;Mode=Memory").is_err());
        assert!(DataSource::parse("Data Source=x.db;garbage").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_then_fetch_round_trip() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();

        repo.save_flags(vec![flag("k1", true), flag("k2", "v")], &cancel)
            .await
            .expect("save succeeded");

        assert_eq!(
            repo.fetch_flag("k1", &cancel).await.unwrap(),
            (true, flag("k1", true))
        );
        assert_eq!(
            repo.fetch_flag("k2", &cancel).await.unwrap(),
            (true, flag("k2", "v"))
        );
        assert_eq!(
            repo.fetch_flag("missing", &cancel).await.unwrap(),
            (false, FeatureFlag::null())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_every_value_variant_is_preserved() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();
        let flags = vec![
            flag("int", 7i64),
            flag("double", 7.0),
            flag("text", "7"),
            flag("structure", FlagValue::Structure(br#"{"n":7}"#.to_vec())),
        ];
        repo.save_flags(flags.clone(), &cancel).await.unwrap();

        for expected in flags {
            let (found, actual) = repo.fetch_flag(expected.key(), &cancel).await.unwrap();
            assert!(found);
            assert_eq!(actual, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_replaces_all_previous_rows() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();

        repo.save_flags(vec![flag("old", true)], &cancel).await.unwrap();
        repo.save_flags(vec![flag("new", false)], &cancel).await.unwrap();

        assert!(!repo.fetch_flag("old", &cancel).await.unwrap().0);
        assert!(repo.fetch_flag("new", &cancel).await.unwrap().0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_keys_last_write_wins() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();

        repo.save_flags(vec![flag("dup", 1i64), flag("dup", 2i64)], &cancel)
            .await
            .unwrap();

        let (_, stored) = repo.fetch_flag("dup", &cancel).await.unwrap();
        assert_eq!(stored.value(), &FlagValue::Integer(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_insert_rolls_back_whole_replacement() {
        let (repo, dir) = setup();
        let cancel = CancellationToken::new();
        repo.save_flags(vec![flag("k1", "before"), flag("k2", 1i64)], &cancel)
            .await
            .unwrap();

        // make the second insert of the next save fail
        let conn = Connection::open(dir.path().join("grapio.db")).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_boom BEFORE INSERT ON FeatureFlags \
             WHEN NEW.FlagKey = 'boom' BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();
        drop(conn);

        let err = repo
            .save_flags(vec![flag("k1", "after"), flag("boom", true)], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert_eq!(
            repo.fetch_flag("k1", &cancel).await.unwrap(),
            (true, flag("k1", "before"))
        );
        assert_eq!(
            repo.fetch_flag("k2", &cancel).await.unwrap(),
            (true, flag("k2", 1i64))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_save_rolls_back() {
        let (repo, _dir) = setup();
        repo.save_flags(vec![flag("k1", true)], &CancellationToken::new())
            .await
            .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = repo
            .save_flags(vec![flag("k1", false), flag("k9", true)], &cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let cancel = CancellationToken::new();
        assert_eq!(
            repo.fetch_flag("k1", &cancel).await.unwrap(),
            (true, flag("k1", true))
        );
        assert!(!repo.fetch_flag("k9", &cancel).await.unwrap().0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_empty_save_keeps_previous_rows() {
        let (repo, _dir) = setup();
        repo.save_flags(vec![flag("k1", true)], &CancellationToken::new())
            .await
            .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = repo.save_flags(vec![], &cancelled).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        assert_eq!(
            repo.fetch_flag("k1", &CancellationToken::new()).await.unwrap(),
            (true, flag("k1", true))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_finite_doubles_are_preserved() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();
        repo.save_flags(
            vec![
                flag("nan", f64::NAN),
                flag("inf", f64::INFINITY),
                flag("neg-inf", f64::NEG_INFINITY),
                flag("neg-zero", -0.0),
            ],
            &cancel,
        )
        .await
        .unwrap();

        let double = |flag: FeatureFlag| match flag.value() {
            FlagValue::Double(v) => *v,
            other => panic!("unexpected value: {other:?}"),
        };
        let (found, nan) = repo.fetch_flag("nan", &cancel).await.unwrap();
        assert!(found);
        assert!(double(nan).is_nan());
        let (_, inf) = repo.fetch_flag("inf", &cancel).await.unwrap();
        assert_eq!(double(inf), f64::INFINITY);
        let (_, neg_inf) = repo.fetch_flag("neg-inf", &cancel).await.unwrap();
        assert_eq!(double(neg_inf), f64::NEG_INFINITY);
        let (_, neg_zero) = repo.fetch_flag("neg-zero", &cancel).await.unwrap();
        assert!(double(neg_zero).is_sign_negative());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_schema_is_idempotent() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();

        repo.ensure_schema().await.expect("first ensure");
        repo.save_flags(vec![flag("kept", true)], &cancel).await.unwrap();
        repo.ensure_schema().await.expect("second ensure");
        repo.ensure_schema().await.expect("third ensure");

        assert!(repo.fetch_flag("kept", &cancel).await.unwrap().0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_before_any_save_reports_not_found() {
        let (repo, _dir) = setup();
        assert_eq!(
            repo.fetch_flag("anything", &CancellationToken::new())
                .await
                .unwrap(),
            (false, FeatureFlag::null())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_is_case_sensitive() {
        let (repo, _dir) = setup();
        let cancel = CancellationToken::new();
        repo.save_flags(vec![flag("Checkout", true)], &cancel).await.unwrap();

        assert!(repo.fetch_flag("Checkout", &cancel).await.unwrap().0);
        assert!(!repo.fetch_flag("checkout", &cancel).await.unwrap().0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_rejects_empty_key() {
        let (repo, _dir) = setup();
        let err = repo
            .fetch_flag("", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_only_mode_does_not_create_database() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteFlagsRepository::new(&format!(
            "Data Source={};Mode=ReadOnly",
            dir.path().join("absent.db").display()
        ))
        .unwrap();

        let err = repo
            .fetch_flag("k", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!dir.path().join("absent.db").exists());
    }
}
