//! SQLite-backed `RecordStore` implementation with durable persistence.

use crate::{
    validate_sub_item_content, MirroredIssue, NewMirroredIssue, ProfileUpdate, RecordStore,
    RecordStoreError, ReportRecord, StoreResult, SubItem, SubscriptionTier, UserRecord, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store backend.
///
/// Uniqueness of mirrored issues and sub-items is enforced by table constraints, so
/// concurrent writers racing on the same key converge on one row.
#[derive(Debug)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                tracker_account_id TEXT NULL,
                tracker_email TEXT NULL,
                display_name TEXT NULL,
                expertise TEXT NULL,
                tier TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'worker',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(owner_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_reports_owner_created
                ON reports (owner_id, created_at, id);

            CREATE INDEX IF NOT EXISTS idx_reports_created
                ON reports (created_at, id);

            CREATE TABLE IF NOT EXISTS mirrored_issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_key TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (remote_key, owner_id),
                FOREIGN KEY(owner_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS sub_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_done INTEGER NOT NULL DEFAULT 0,
                UNIQUE (issue_id, content),
                FOREIGN KEY(issue_id) REFERENCES mirrored_issues(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    fn load_user(connection: &Connection, user_id: &str) -> StoreResult<Option<UserRecord>> {
        connection
            .query_row(
                r#"
                SELECT user_id, email, tracker_account_id, tracker_email, display_name,
                       expertise, tier, role, created_at
                FROM users WHERE user_id = ?1
                "#,
                params![user_id],
                user_row,
            )
            .optional()?
            .map(user_from_raw)
            .transpose()
    }

    fn load_report(connection: &Connection, report_id: i64) -> StoreResult<ReportRecord> {
        let raw = connection.query_row(
            "SELECT id, owner_id, text, created_at FROM reports WHERE id = ?1",
            params![report_id],
            report_row,
        )?;
        report_from_raw(raw)
    }
}

struct RawUser {
    user_id: String,
    email: String,
    tracker_account_id: Option<String>,
    tracker_email: Option<String>,
    display_name: Option<String>,
    expertise: Option<String>,
    tier: String,
    role: String,
    created_at: String,
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<RawUser> {
    Ok(RawUser {
        user_id: row.get(0)?,
        email: row.get(1)?,
        tracker_account_id: row.get(2)?,
        tracker_email: row.get(3)?,
        display_name: row.get(4)?,
        expertise: row.get(5)?,
        tier: row.get(6)?,
        role: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn user_from_raw(raw: RawUser) -> StoreResult<UserRecord> {
    Ok(UserRecord {
        user_id: raw.user_id,
        email: raw.email,
        tracker_account_id: raw.tracker_account_id,
        tracker_email: raw.tracker_email,
        display_name: raw.display_name,
        expertise: raw.expertise,
        tier: tier_from_db(&raw.tier)?,
        role: role_from_db(&raw.role)?,
        created_at: timestamp_from_db(&raw.created_at)?,
    })
}

type RawReport = (i64, String, String, String);
type RawIssue = (i64, String, String, String, String, String);

fn report_row(row: &Row<'_>) -> rusqlite::Result<RawReport> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn report_from_raw((id, user_id, text, created_at): RawReport) -> StoreResult<ReportRecord> {
    Ok(ReportRecord {
        id,
        user_id,
        text,
        created_at: timestamp_from_db(&created_at)?,
    })
}

fn issue_row(row: &Row<'_>) -> rusqlite::Result<RawIssue> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn issue_from_raw(
    (id, remote_key, owner_id, title, description, created_at): RawIssue,
) -> StoreResult<MirroredIssue> {
    Ok(MirroredIssue {
        id,
        remote_key,
        owner_id,
        title,
        description,
        created_at: timestamp_from_db(&created_at)?,
    })
}

fn sub_item_row(row: &Row<'_>) -> rusqlite::Result<SubItem> {
    Ok(SubItem {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        content: row.get(2)?,
        is_done: row.get::<_, i64>(3)? != 0,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn ensure_user(&self, user_id: &str, email: &str) -> StoreResult<UserRecord> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO users (user_id, email, tier, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO NOTHING
            "#,
            params![
                user_id,
                email,
                SubscriptionTier::Basic.as_str(),
                UserRole::Worker.as_str(),
                timestamp_to_db(Utc::now())
            ],
        )?;
        Self::load_user(&connection, user_id)?
            .ok_or_else(|| RecordStoreError::UserNotFound(user_id.to_string()))
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let connection = self.open_connection()?;
        Self::load_user(&connection, user_id)
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
    ) -> StoreResult<UserRecord> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let mut user = Self::load_user(&transaction, user_id)?
            .ok_or_else(|| RecordStoreError::UserNotFound(user_id.to_string()))?;
        update.apply(&mut user);
        transaction.execute(
            r#"
            UPDATE users
            SET tracker_account_id = ?2, tracker_email = ?3, display_name = ?4,
                expertise = ?5, tier = ?6, role = ?7
            WHERE user_id = ?1
            "#,
            params![
                user.user_id,
                user.tracker_account_id,
                user.tracker_email,
                user.display_name,
                user.expertise,
                user.tier.as_str(),
                user.role.as_str(),
            ],
        )?;
        transaction.commit()?;
        Ok(user)
    }

    async fn purge_user(&self, user_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let deleted = connection.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
        Ok(deleted > 0)
    }

    async fn record_report(&self, user_id: &str, text: &str) -> StoreResult<ReportRecord> {
        let connection = self.open_connection()?;
        if Self::load_user(&connection, user_id)?.is_none() {
            return Err(RecordStoreError::UserNotFound(user_id.to_string()));
        }
        connection.execute(
            "INSERT INTO reports (owner_id, text, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, text, timestamp_to_db(Utc::now())],
        )?;
        Self::load_report(&connection, connection.last_insert_rowid())
    }

    async fn latest_report(&self, user_id: &str) -> StoreResult<Option<ReportRecord>> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                r#"
                SELECT id, owner_id, text, created_at FROM reports
                WHERE owner_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
                params![user_id],
                report_row,
            )
            .optional()?
            .map(report_from_raw)
            .transpose()
    }

    async fn list_reports(&self, user_id: &str) -> StoreResult<Vec<ReportRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, owner_id, text, created_at FROM reports
            WHERE owner_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = statement
            .query_map(params![user_id], report_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(report_from_raw).collect()
    }

    async fn list_all_reports(&self) -> StoreResult<Vec<ReportRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, owner_id, text, created_at FROM reports ORDER BY created_at DESC, id DESC",
        )?;
        let rows = statement
            .query_map([], report_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(report_from_raw).collect()
    }

    async fn get_or_create_issue(
        &self,
        issue: NewMirroredIssue,
    ) -> StoreResult<(MirroredIssue, bool)> {
        let connection = self.open_connection()?;
        if Self::load_user(&connection, &issue.owner_id)?.is_none() {
            return Err(RecordStoreError::UserNotFound(issue.owner_id));
        }
        let inserted = connection.execute(
            r#"
            INSERT INTO mirrored_issues (remote_key, owner_id, title, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(remote_key, owner_id) DO NOTHING
            "#,
            params![
                issue.remote_key,
                issue.owner_id,
                issue.title,
                issue.description,
                timestamp_to_db(Utc::now())
            ],
        )?;
        let raw = connection.query_row(
            r#"
            SELECT id, remote_key, owner_id, title, description, created_at
            FROM mirrored_issues WHERE remote_key = ?1 AND owner_id = ?2
            "#,
            params![issue.remote_key, issue.owner_id],
            issue_row,
        )?;
        Ok((issue_from_raw(raw)?, inserted > 0))
    }

    async fn list_issues(&self, owner_id: &str) -> StoreResult<Vec<MirroredIssue>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, remote_key, owner_id, title, description, created_at
            FROM mirrored_issues WHERE owner_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let rows = statement
            .query_map(params![owner_id], issue_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(issue_from_raw).collect()
    }

    async fn list_sub_items(&self, issue_id: i64) -> StoreResult<Vec<SubItem>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT id, issue_id, content, is_done FROM sub_items WHERE issue_id = ?1 ORDER BY id ASC",
        )?;
        let rows = statement
            .query_map(params![issue_id], sub_item_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn upsert_sub_item(&self, issue_id: i64, content: &str) -> StoreResult<(SubItem, bool)> {
        validate_sub_item_content(content)?;
        let connection = self.open_connection()?;
        let issue_exists = connection
            .query_row(
                "SELECT 1 FROM mirrored_issues WHERE id = ?1",
                params![issue_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if issue_exists.is_none() {
            return Err(RecordStoreError::IssueNotFound(issue_id));
        }

        let inserted = connection.execute(
            r#"
            INSERT INTO sub_items (issue_id, content, is_done) VALUES (?1, ?2, 0)
            ON CONFLICT(issue_id, content) DO NOTHING
            "#,
            params![issue_id, content],
        )?;
        let item = connection.query_row(
            "SELECT id, issue_id, content, is_done FROM sub_items WHERE issue_id = ?1 AND content = ?2",
            params![issue_id, content],
            sub_item_row,
        )?;
        Ok((item, inserted > 0))
    }

    async fn set_sub_item_done(&self, sub_item_id: i64, is_done: bool) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE sub_items SET is_done = ?2 WHERE id = ?1",
            params![sub_item_id, i64::from(is_done)],
        )?;
        if updated == 0 {
            return Err(RecordStoreError::SubItemNotFound(sub_item_id));
        }
        Ok(())
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn tier_from_db(value: &str) -> StoreResult<SubscriptionTier> {
    SubscriptionTier::parse(value).ok_or_else(|| RecordStoreError::InvalidPersistedValue {
        field: "tier",
        value: value.to_string(),
    })
}

fn role_from_db(value: &str) -> StoreResult<UserRole> {
    UserRole::parse(value).ok_or_else(|| RecordStoreError::InvalidPersistedValue {
        field: "role",
        value: value.to_string(),
    })
}
