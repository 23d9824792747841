use log::{debug, error, warn};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite};

use crate::error_handling::types::StorageError;
use crate::storage::connection::ConnectionProvider;
use crate::storage::property_names::PropertyNameMapper;
use crate::storage::storage_trait::{is_valid_lenient, is_valid_strict, ActiveSessionStorage};
use crate::storage::timestamps::normalize_timestamp;
use crate::storage::types::{property, PropertyMap, SessionUser};

const TABLE_NAME: &str = "active_session_metadata";
const SESSION_ID_COLUMN: &str = "session_id";
const USERS_TABLE_NAME: &str = "licensed_users";

/// Columns holding integers rather than text.
const INTEGER_COLUMNS: &[&str] = &[property::USER_ID, property::SUSPEND_SIZE];

/// Properties whose values are normalized to plain ISO time before storage.
const NORMALIZED_TIMESTAMPS: &[&str] = &[property::LAST_RESUMED, property::SUSPEND_TIMESTAMP];

const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS licensed_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_name TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    last_sign_in TEXT NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0,
    UNIQUE(user_name, user_id)
);";

const CREATE_SESSIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS active_session_metadata (
    session_id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES licensed_users(id) ON DELETE CASCADE,
    workbench TEXT NOT NULL,
    created TEXT NOT NULL,
    last_used TEXT NOT NULL,
    r_version TEXT,
    r_version_label TEXT,
    r_version_home TEXT,
    working_directory TEXT,
    activity_state TEXT NOT NULL,
    label TEXT NOT NULL,
    launch_parameters TEXT NOT NULL,
    save_prompt_required TEXT,
    last_state_updated TEXT,
    executing TEXT,
    running TEXT,
    initial TEXT,
    project TEXT,
    suspend_size INTEGER,
    suspend_timestamp TEXT,
    last_resumed TEXT,
    blocking_suspend TEXT
);";

/// Create the session and user tables if they are missing.
pub fn initialize_schema(provider: &ConnectionProvider) -> Result<(), StorageError> {
    provider.block_on(async {
        let mut conn = provider.acquire().await?;
        for statement in [CREATE_USERS_TABLE, CREATE_SESSIONS_TABLE] {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| StorageError::DatabaseException {
                    session_id: String::new(),
                    context: "creating the session schema".into(),
                    source: e,
                })?;
        }
        Ok(())
    })
}

/// Add `user` to the owning-user table and return its row id.
pub fn register_user(provider: &ConnectionProvider, user: &SessionUser) -> Result<i64, StorageError> {
    let sql = format!(
        "INSERT INTO {} (user_name, user_id, last_sign_in) VALUES (?, ?, ?)",
        USERS_TABLE_NAME
    );
    let signed_in = chrono::Utc::now().to_rfc3339();
    provider.block_on(async {
        let mut conn = provider.acquire().await?;
        let result = sqlx::query(&sql)
            .bind(&user.username)
            .bind(user.user_id)
            .bind(signed_in)
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::DatabaseException {
                session_id: String::new(),
                context: format!("registering user {}", user.username),
                source: e,
            })?;
        Ok(result.last_insert_rowid())
    })
}

fn is_integer_column(column: &str) -> bool {
    INTEGER_COLUMNS.contains(&column)
}

fn convert_property(name: &str, value: &str) -> String {
    if NORMALIZED_TIMESTAMPS.contains(&name) {
        normalize_timestamp(value)
    } else {
        value.to_string()
    }
}

fn property_keys(properties: &PropertyMap) -> String {
    properties.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Decode one column as text. NULL reads as the empty string.
fn column_text(row: &SqliteRow, index: usize, integer: bool) -> Result<String, sqlx::Error> {
    if integer {
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return Ok(v.map(|n| n.to_string()).unwrap_or_default());
        }
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Ok(v.unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    row.try_get::<Option<f64>, _>(index)
        .map(|v| v.map(|n| n.to_string()).unwrap_or_default())
}

enum BindValue {
    Text(String),
    Integer(i64),
}

impl BindValue {
    fn for_column(column: &str, value: String) -> Self {
        if is_integer_column(column) {
            if let Ok(n) = value.trim().parse::<i64>() {
                return BindValue::Integer(n);
            }
        }
        BindValue::Text(value)
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [BindValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Integer(n) => query.bind(*n),
        };
    }
    query
}

/// Session properties stored as one row of `active_session_metadata`.
///
/// Property names become column names verbatim (after the fixed overrides in
/// `PropertyNameMapper::DATABASE`); values are always bound parameters. An
/// unknown property therefore fails the statement instead of being dropped.
pub struct DatabaseStorage {
    session_id: String,
    user: SessionUser,
    provider: ConnectionProvider,
}

impl DatabaseStorage {
    pub fn new<S: Into<String>>(session_id: S, user: SessionUser, provider: ConnectionProvider) -> Self {
        Self {
            session_id: session_id.into(),
            user,
            provider,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn db_error(&self, context: String, source: sqlx::Error) -> StorageError {
        StorageError::DatabaseException {
            session_id: self.session_id.clone(),
            context,
            source,
        }
    }

    /// The primary key should make duplicates impossible; seeing one means corruption.
    fn ensure_single_row(&self, count: usize) -> Result<(), StorageError> {
        match count {
            0 => Err(StorageError::SessionNotFound {
                session_id: self.session_id.clone(),
            }),
            1 => Ok(()),
            _ => {
                warn!("More than one session with session id: {}", self.session_id);
                Err(StorageError::TooManySessionsReturned {
                    session_id: self.session_id.clone(),
                    count,
                })
            }
        }
    }

    fn select_rows(&self, columns: &str, context: String) -> Result<Vec<SqliteRow>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            columns, TABLE_NAME, SESSION_ID_COLUMN
        );
        self.provider.block_on(async {
            let mut conn = self.provider.acquire().await?;
            sqlx::query(&sql)
                .bind(&self.session_id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| self.db_error(context, e))
        })
    }

    fn count_rows(&self) -> Result<i64, StorageError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            TABLE_NAME, SESSION_ID_COLUMN
        );
        self.provider.block_on(async {
            let mut conn = self.provider.acquire().await?;
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(&self.session_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| self.db_error("retrieving session count".into(), e))
        })
    }
}

impl ActiveSessionStorage for DatabaseStorage {
    fn read_property(&self, name: &str) -> Result<String, StorageError> {
        let column = PropertyNameMapper::DATABASE.to_backend(name);
        let rows = self.select_rows(column, format!("reading property {}", name))?;
        self.ensure_single_row(rows.len())?;
        column_text(&rows[0], 0, is_integer_column(column))
            .map_err(|e| self.db_error(format!("decoding property {}", name), e))
    }

    fn read_properties(&self, names: &[&str]) -> Result<PropertyMap, StorageError> {
        let mapper = PropertyNameMapper::DATABASE;
        let mut columns: Vec<&str> = Vec::with_capacity(names.len());
        for name in names {
            let column = mapper.to_backend(name);
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        let column_list = if columns.is_empty() {
            SESSION_ID_COLUMN.to_string()
        } else {
            columns.join(", ")
        };

        let rows = self.select_rows(
            &column_list,
            format!("reading properties {}", names.join(", ")),
        )?;
        self.ensure_single_row(rows.len())?;

        let row = &rows[0];
        let mut values = PropertyMap::new();
        for name in names {
            let column = mapper.to_backend(name);
            let Some(index) = columns.iter().position(|c| *c == column) else {
                continue;
            };
            match column_text(row, index, is_integer_column(column)) {
                Ok(value) => {
                    values.insert(name.to_string(), value);
                }
                Err(e) => error!("Failed to read column '{}': {}", column, e),
            }
        }
        Ok(values)
    }

    fn read_all_properties(&self) -> Result<PropertyMap, StorageError> {
        // Every column is wanted here, and names are taken from the row itself,
        // so columns this code has never heard of are passed through as-is.
        let rows = self.select_rows("*", "reading all properties".into())?;
        self.ensure_single_row(rows.len())?;

        let row = &rows[0];
        let mut values = PropertyMap::new();
        for (index, column) in row.columns().iter().enumerate() {
            let column = column.name();
            match column_text(row, index, is_integer_column(column)) {
                Ok(value) => {
                    values.insert(
                        PropertyNameMapper::DATABASE.to_property(column).to_string(),
                        value,
                    );
                }
                Err(e) => error!("Failed to read column '{}': {}", column, e),
            }
        }
        Ok(values)
    }

    fn write_properties(&self, properties: &PropertyMap) -> Result<(), StorageError> {
        if properties.is_empty() {
            return Err(StorageError::EmptyPropertySet {
                session_id: self.session_id.clone(),
            });
        }
        let keys = property_keys(properties);
        debug!("Writing session properties: {} props: {}", self.session_id, keys);

        let mapper = PropertyNameMapper::DATABASE;
        let columns: Vec<&str> = properties.keys().map(|k| mapper.to_backend(k)).collect();
        let values: Vec<BindValue> = properties
            .iter()
            .zip(&columns)
            .map(|((name, value), column)| BindValue::for_column(column, convert_property(name, value)))
            .collect();

        let assignments = columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let update_sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            TABLE_NAME, assignments, SESSION_ID_COLUMN
        );
        let insert_sql = format!(
            "INSERT INTO {table} ({sid}, {uid}, {cols}) VALUES (?, \
             (SELECT id FROM {users} WHERE user_name = ? AND user_id = ?), {marks})",
            table = TABLE_NAME,
            sid = SESSION_ID_COLUMN,
            uid = property::USER_ID,
            cols = columns.join(", "),
            users = USERS_TABLE_NAME,
            marks = vec!["?"; columns.len()].join(", "),
        );

        // Update first and insert only when nothing matched. This avoids a
        // separate existence check, but the two statements are still not atomic.
        self.provider.block_on(async {
            let mut conn = self.provider.acquire().await?;

            let updated = bind_all(sqlx::query(&update_sql), &values)
                .bind(&self.session_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| self.db_error(format!("updating properties {}", keys), e))?;

            if updated.rows_affected() > 0 {
                return Ok(());
            }

            debug!("No session row for {}, inserting", self.session_id);
            let insert = sqlx::query(&insert_sql)
                .bind(&self.session_id)
                .bind(&self.user.username)
                .bind(self.user.user_id);
            bind_all(insert, &values)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    self.db_error(format!("inserting new session with properties {}", keys), e)
                })?;
            Ok(())
        })
    }

    fn destroy(&self) -> Result<(), StorageError> {
        debug!("Removing active session for: {} from database", self.session_id);
        let sql = format!("DELETE FROM {} WHERE {} = ?", TABLE_NAME, SESSION_ID_COLUMN);
        let removed = self.provider.block_on(async {
            let mut conn = self.provider.acquire().await?;
            sqlx::query(&sql)
                .bind(&self.session_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| self.db_error("deleting session metadata".into(), e))
        })?;
        if removed.rows_affected() == 0 {
            debug!("No rows removed for active session: {}", self.session_id);
        }
        Ok(())
    }

    fn clear_scratch_path(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn is_empty(&self) -> Result<bool, StorageError> {
        match self.count_rows()? {
            0 => {
                debug!("No session found with session id: {}", self.session_id);
                Ok(true)
            }
            1 => Ok(false),
            n => {
                warn!("More than one session with session id: {}", self.session_id);
                Err(StorageError::TooManySessionsReturned {
                    session_id: self.session_id.clone(),
                    count: n as usize,
                })
            }
        }
    }

    fn is_valid(&self) -> Result<bool, StorageError> {
        is_valid_lenient(self)
    }

    fn validate(&self) -> Result<bool, StorageError> {
        is_valid_strict(self)
    }

    fn compute_suspend_size(&self) -> u64 {
        match self.read_property(property::SUSPEND_SIZE) {
            Ok(value) if value.is_empty() => 0,
            Ok(value) => value.parse().unwrap_or_else(|e| {
                error!("Invalid suspend_size '{}' for {}: {}", value, self.session_id, e);
                0
            }),
            Err(e) => {
                debug!("Unable to read suspend size for {}: {}", self.session_id, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SESSION_ID: &str = "testId";

    fn test_user() -> SessionUser {
        SessionUser::new("alice", 1001)
    }

    /// In-memory database with the schema and two owning users (row ids 7 and 8).
    fn test_provider() -> ConnectionProvider {
        let provider = ConnectionProvider::open_single("sqlite::memory:").unwrap();
        initialize_schema(&provider).unwrap();
        provider.block_on(async {
            let mut conn = provider.acquire().await.unwrap();
            for (name, uid, id) in [("alice", 1001, 7), ("test2", 5002, 8)] {
                sqlx::query(
                    "INSERT INTO licensed_users (user_name, last_sign_in, user_id, id) VALUES (?, '2020-04-30T00:00:00.000Z', ?, ?)",
                )
                .bind(name)
                .bind(uid)
                .bind(id)
                .execute(&mut *conn)
                .await
                .unwrap();
            }
        });
        provider
    }

    fn test_storage() -> DatabaseStorage {
        DatabaseStorage::new(SESSION_ID, test_user(), test_provider())
    }

    fn initial_props() -> PropertyMap {
        [
            ("editor", "RStudio"),
            ("created", "2020-04-30T00:00:00.000Z"),
            ("last_used", "2020-04-30T00:00:00.000Z"),
            ("activity_state", "launching"),
            ("label", "initial session"),
            ("launch_parameters", "{}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    const PROP_LIST: &[&str] = &[
        "user_id",
        "editor",
        "r_version",
        "r_version_label",
        "label",
        "last_used",
    ];

    #[test]
    fn test_nonexistent_session_returns_error() {
        let storage = test_storage();
        assert!(storage.read_all_properties().unwrap_err().is_session_not_found());
        assert!(storage.read_properties(PROP_LIST).unwrap_err().is_session_not_found());
        assert!(storage
            .read_property("launch_parameters")
            .unwrap_err()
            .is_session_not_found());
    }

    #[test]
    fn test_initial_minimal_session_inserted() {
        let storage = test_storage();
        storage.write_properties(&initial_props()).unwrap();

        let all = storage.read_all_properties().unwrap();
        assert_eq!(all["user_id"], "7");
        assert_eq!(all["editor"], "RStudio");
        assert_eq!(all["r_version"], "");
        assert_eq!(all["activity_state"], "launching");
        assert_eq!(all["created"], "2020-04-30T00:00:00.000Z");
        assert!(!all.contains_key("workbench"));

        let subset = storage.read_properties(PROP_LIST).unwrap();
        assert_eq!(subset.len(), PROP_LIST.len());
        assert_eq!(subset["user_id"], "7");
        assert_eq!(subset["r_version"], "");

        let single = storage.read_properties(&["user_id"]).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single["user_id"], "7");

        assert_eq!(storage.read_property("editor").unwrap(), "RStudio");
        assert_eq!(storage.read_property("r_version").unwrap(), "");
    }

    #[test]
    fn test_unknown_column_requested_by_name_fails() {
        let storage = test_storage();
        storage.write_properties(&initial_props()).unwrap();
        let err = storage.read_property("not-a-real-property").unwrap_err();
        assert!(matches!(err, StorageError::DatabaseException { .. }));
        let err = storage.read_properties(&["label", "no_such_column"]).unwrap_err();
        assert!(matches!(err, StorageError::DatabaseException { .. }));
    }

    #[test]
    fn test_data_updated_individually() {
        let storage = test_storage();
        storage.write_properties(&initial_props()).unwrap();

        storage.write_property("r_version", "4.0.0").unwrap();
        storage.write_property("activity_state", "running").unwrap();
        storage.write_property("user_id", "8").unwrap();

        let all = storage.read_all_properties().unwrap();
        assert_eq!(all["user_id"], "8");
        assert_eq!(all["editor"], "RStudio");
        assert_eq!(all["r_version"], "4.0.0");
        assert_eq!(all["activity_state"], "running");
        assert_eq!(all["r_version_label"], "");
        assert_eq!(storage.read_property("r_version").unwrap(), "4.0.0");
    }

    #[test]
    fn test_too_few_properties_leaves_no_row() {
        let storage = test_storage();
        let props: PropertyMap = [("r_version_label", "spicy r")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let err = storage.write_properties(&props).unwrap_err();
        assert!(matches!(err, StorageError::DatabaseException { .. }));
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn test_unknown_owner_cannot_insert() {
        let storage = DatabaseStorage::new(
            SESSION_ID,
            SessionUser::new("alice", 4242),
            test_provider(),
        );
        let err = storage.write_properties(&initial_props()).unwrap_err();
        assert!(matches!(err, StorageError::DatabaseException { .. }));
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn test_ownership_cannot_move_to_missing_user() {
        let storage = test_storage();
        storage.write_properties(&initial_props()).unwrap();
        let err = storage.write_property("user_id", "10").unwrap_err();
        assert!(matches!(err, StorageError::DatabaseException { .. }));
        assert_eq!(storage.read_property("user_id").unwrap(), "7");
    }

    #[test]
    fn test_empty_write_rejected() {
        let storage = test_storage();
        let err = storage.write_properties(&PropertyMap::new()).unwrap_err();
        assert!(matches!(err, StorageError::EmptyPropertySet { .. }));
    }

    #[test]
    fn test_timestamps_normalized_on_write() {
        let storage = test_storage();
        let mut props = initial_props();
        props.insert("last_resumed".into(), "2021-06-01T12:30:45.5Z".into());
        props.insert("suspend_timestamp".into(), "not-a-date-time".into());
        storage.write_properties(&props).unwrap();
        assert_eq!(
            storage.read_property("last_resumed").unwrap(),
            "20210601T123045,500000"
        );
        assert_eq!(storage.read_property("suspend_timestamp").unwrap(), "");
    }

    #[test]
    fn test_project_id_alias_reads_project_column() {
        let storage = test_storage();
        storage.write_properties(&initial_props()).unwrap();
        storage.write_property("projectId", "abc123").unwrap();
        assert_eq!(storage.read_property("project").unwrap(), "abc123");
        let both = storage.read_properties(&["project", "projectId"]).unwrap();
        assert_eq!(both["project"], "abc123");
        assert_eq!(both["projectId"], "abc123");
    }

    #[test]
    fn test_is_empty_and_destroy() {
        let storage = test_storage();
        assert!(storage.is_empty().unwrap());
        storage.destroy().unwrap();
        storage.write_properties(&initial_props()).unwrap();
        assert!(!storage.is_empty().unwrap());
        storage.clear_scratch_path().unwrap();
        assert!(!storage.is_empty().unwrap());
        storage.destroy().unwrap();
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn test_validity_by_editor_kind() {
        let storage = test_storage();
        assert!(!storage.is_valid().unwrap());
        storage.write_properties(&initial_props()).unwrap();
        assert!(!storage.is_valid().unwrap());
        storage.write_property("project", "none").unwrap();
        assert!(storage.is_valid().unwrap());
        assert!(storage.validate().unwrap());

        let other = DatabaseStorage::new("vscode1", test_user(), storage.provider.clone());
        let mut props = initial_props();
        props.insert("editor".into(), "VSCode".into());
        other.write_properties(&props).unwrap();
        assert!(other.is_valid().unwrap());
    }

    #[test]
    fn test_suspend_size_read_from_column() {
        let storage = test_storage();
        assert_eq!(storage.compute_suspend_size(), 0);
        storage.write_properties(&initial_props()).unwrap();
        assert_eq!(storage.compute_suspend_size(), 0);
        storage.write_property("suspend_size", "2048").unwrap();
        assert_eq!(storage.compute_suspend_size(), 2048);
        assert_eq!(storage.read_property("suspend_size").unwrap(), "2048");
    }

    #[test]
    fn test_duplicate_rows_reported() {
        let provider = ConnectionProvider::open_single("sqlite::memory:").unwrap();
        provider.block_on(async {
            let mut conn = provider.acquire().await.unwrap();
            for sql in [
                "CREATE TABLE active_session_metadata (session_id TEXT, workbench TEXT, user_id INTEGER)",
                "INSERT INTO active_session_metadata VALUES ('dup', 'RStudio', 1)",
                "INSERT INTO active_session_metadata VALUES ('dup', 'RStudio', 1)",
            ] {
                sqlx::query(sql).execute(&mut *conn).await.unwrap();
            }
        });
        let storage = DatabaseStorage::new("dup", test_user(), provider);
        assert!(matches!(
            storage.is_empty(),
            Err(StorageError::TooManySessionsReturned { count: 2, .. })
        ));
        assert!(matches!(
            storage.read_property("editor"),
            Err(StorageError::TooManySessionsReturned { .. })
        ));
        assert!(matches!(
            storage.read_all_properties(),
            Err(StorageError::TooManySessionsReturned { .. })
        ));
        // emptiness failures are never swallowed
        assert!(storage.is_valid().is_err());
    }

    #[test]
    fn test_pooled_database_shared_between_sessions() {
        let dir = TempDir::new().unwrap();
        let config = crate::configuration::types::DatabaseConfig {
            path: dir.path().join("sessions.sqlite3"),
            ..Default::default()
        };
        let provider = ConnectionProvider::open_pool(&config).unwrap();
        initialize_schema(&provider).unwrap();
        let user = test_user();
        register_user(&provider, &user).unwrap();

        let first = DatabaseStorage::new("first", user.clone(), provider.clone());
        let second = DatabaseStorage::new("second", user, provider);
        first.write_properties(&initial_props()).unwrap();
        assert!(!first.is_empty().unwrap());
        assert!(second.is_empty().unwrap());
        assert_eq!(first.read_property("label").unwrap(), "initial session");
    }
}
