//! Local key/value persistence for credentials, site configuration and the task cache

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{CalendarMapping, Credentials, SiteConfiguration, Task};

pub const KEY_SITE_URL: &str = "site_url";
pub const KEY_USERNAME: &str = "username";
pub const KEY_APP_PASSWORD: &str = "app_password";
pub const KEY_OAUTH_TOKEN: &str = "oauth_token";
pub const KEY_SITE_CONFIG: &str = "site_config";
pub const KEY_TASKS: &str = "tasks";
pub const KEY_REMINDERS_LISTS: &str = "reminders_lists";

const ALL_KEYS: [&str; 7] = [
    KEY_SITE_URL,
    KEY_USERNAME,
    KEY_APP_PASSWORD,
    KEY_OAUTH_TOKEN,
    KEY_SITE_CONFIG,
    KEY_TASKS,
    KEY_REMINDERS_LISTS,
];

/// Everything restored on launch
#[derive(Debug, Default)]
pub struct Snapshot {
    pub site_url: String,
    pub credentials: Credentials,
    pub site: SiteConfiguration,
    pub tasks: Vec<Task>,
    pub calendars: CalendarMapping,
}

/// Thread-safe key/value store backed by SQLite
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the store
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }

    pub fn save_site(&self, site: &SiteConfiguration) -> Result<(), StoreError> {
        self.set_json(KEY_SITE_CONFIG, site)
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        self.set_json(KEY_TASKS, tasks)
    }

    pub fn save_calendars(&self, calendars: &CalendarMapping) -> Result<(), StoreError> {
        self.set_json(KEY_REMINDERS_LISTS, calendars)
    }

    /// Persist the site address and credentials. Unused credential keys are cleared.
    pub fn save_login(&self, site_url: &str, credentials: &Credentials) -> Result<(), StoreError> {
        self.set(KEY_SITE_URL, site_url)?;
        match credentials {
            Credentials::Basic { username, password } => {
                self.set(KEY_USERNAME, username)?;
                self.set(KEY_APP_PASSWORD, password)?;
                self.remove(KEY_OAUTH_TOKEN)?;
            }
            Credentials::Bearer { token } => {
                self.set(KEY_OAUTH_TOKEN, token)?;
                self.remove(KEY_USERNAME)?;
                self.remove(KEY_APP_PASSWORD)?;
            }
            Credentials::None => {
                self.remove(KEY_USERNAME)?;
                self.remove(KEY_APP_PASSWORD)?;
                self.remove(KEY_OAUTH_TOKEN)?;
            }
        }
        Ok(())
    }

    /// Load everything persisted; missing keys fall back to defaults.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let username = self.get(KEY_USERNAME)?.unwrap_or_default();
        let password = self.get(KEY_APP_PASSWORD)?.unwrap_or_default();
        let token = self.get(KEY_OAUTH_TOKEN)?.unwrap_or_default();

        Ok(Snapshot {
            site_url: self.get(KEY_SITE_URL)?.unwrap_or_default(),
            credentials: Credentials::from_parts(&username, &password, &token),
            site: self.get_json(KEY_SITE_CONFIG)?.unwrap_or_default(),
            tasks: self.get_json(KEY_TASKS)?.unwrap_or_default(),
            calendars: self.get_json(KEY_REMINDERS_LISTS)?.unwrap_or_default(),
        })
    }

    /// Forget the site entirely
    pub fn clear(&self) -> Result<(), StoreError> {
        for key in ALL_KEYS {
            self.remove(key)?;
        }
        Ok(())
    }
}
