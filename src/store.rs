//! Durable per-installation state: the refresh token, the bearer token and
//! the generated client identities. Each concern is one record, read and
//! written on its own.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;

pub const REFRESH_TOKEN_KEY: &str = "access";
pub const BEARER_TOKEN_KEY: &str = "bearer";
pub const CLIENT_ID_KEY: &str = "clientid";

/// Key/record persistence backend.
pub trait RecordStore: Send + Sync {
    /// Returns `None` when nothing has been stored under `key` yet.
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, record: &Value) -> Result<()>;
}

/// One pretty-printed JSON file per key, `<dir>/<key>.token`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            debug!(path = %dir.display(), "creating token directory");
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.token"))
    }
}

impl RecordStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable record: {e}");
                Ok(None)
            }
        }
    }

    fn save(&self, key: &str, record: &Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("token.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory backend. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, record: Value) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), record);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, record: &Value) -> Result<()> {
        self.insert(key, record.clone());
        Ok(())
    }
}

/// A credential with its expiry in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Token {
    pub expires: i64,
    pub token: String,
}

impl Token {
    pub fn new(token: impl Into<String>, expires: i64) -> Self {
        Self {
            expires,
            token: token.into(),
        }
    }

    /// A token whose expiry is not in the future counts as absent.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.token.is_empty() && self.expires > now_ms
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub name: String,
    pub id: String,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `<name>-<5 digit number>`. Not globally unique, only per installation.
pub fn generate_client_id(name: &str) -> String {
    let suffix: u32 = rand::rng().random_range(10_000..100_000);
    format!("{name}-{suffix}")
}

/// Cached tokens and identities, mirrored to a [`RecordStore`] on every change.
pub struct TokenStore {
    backend: Box<dyn RecordStore>,
    refresh: Token,
    bearer: Token,
    clients: Vec<ClientIdentity>,
}

impl TokenStore {
    pub fn load(backend: Box<dyn RecordStore>) -> Result<Self> {
        let refresh = load_record(backend.as_ref(), REFRESH_TOKEN_KEY)?.unwrap_or_default();
        let bearer = load_record(backend.as_ref(), BEARER_TOKEN_KEY)?.unwrap_or_default();
        let clients = load_record(backend.as_ref(), CLIENT_ID_KEY)?.unwrap_or_default();
        Ok(Self {
            backend,
            refresh,
            bearer,
            clients,
        })
    }

    pub fn refresh_token(&self) -> &Token {
        &self.refresh
    }

    pub fn bearer_token(&self) -> &Token {
        &self.bearer
    }

    pub fn set_refresh_token(&mut self, token: Token) -> Result<()> {
        self.refresh = token;
        self.backend
            .save(REFRESH_TOKEN_KEY, &serde_json::to_value(&self.refresh)?)
    }

    pub fn set_bearer_token(&mut self, token: Token) -> Result<()> {
        self.bearer = token;
        self.backend
            .save(BEARER_TOKEN_KEY, &serde_json::to_value(&self.bearer)?)
    }

    /// Forces the refresh token to expire so the next use re-authenticates.
    pub fn invalidate_refresh_token(&mut self) -> Result<()> {
        let token = Token::new(std::mem::take(&mut self.refresh.token), 0);
        self.set_refresh_token(token)
    }

    pub fn invalidate_bearer_token(&mut self) -> Result<()> {
        let token = Token::new(std::mem::take(&mut self.bearer.token), 0);
        self.set_bearer_token(token)
    }

    pub fn clients(&self) -> &[ClientIdentity] {
        &self.clients
    }

    /// The persisted id for `name`, generating and saving one on first use.
    pub fn client_id(&mut self, name: &str) -> Result<String> {
        if let Some(existing) = self.clients.iter().find(|c| c.name == name) {
            return Ok(existing.id.clone());
        }
        let id = generate_client_id(name);
        debug!(client = name, id = %id, "generated new client id");
        self.clients.push(ClientIdentity {
            name: name.to_string(),
            id: id.clone(),
        });
        self.backend
            .save(CLIENT_ID_KEY, &serde_json::to_value(&self.clients)?)?;
        Ok(id)
    }
}

fn load_record<T: DeserializeOwned>(store: &dyn RecordStore, key: &str) -> Result<Option<T>> {
    let Some(value) = store.load(key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(key, "stored record has an unexpected shape, ignoring: {e}");
            Ok(None)
        }
    }
}
