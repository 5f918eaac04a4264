mod client;
mod config;
mod diff;
mod dispatch;
mod error;
mod hvac;
mod logger;
mod protocol;
mod status;
mod store;
mod types;
mod zone;

pub use client::{
    ApiAccessError, ApiClient, ApiClientBuilder, ApiReply, Credential, HvacApi,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT,
};
pub use config::NeoConfig;
pub use error::{Error, Result};
pub use hvac::{HvacUnit, MasterState};
pub use logger::MessageLogMode;
pub use protocol::{command_message, with_zone_enabled, ApiCommand, CommandParams};
pub use status::parse_status;
pub use store::{
    generate_client_id, ClientIdentity, FileStore, MemoryStore, RecordStore, Token, TokenStore,
    BEARER_TOKEN_KEY, CLIENT_ID_KEY, REFRESH_TOKEN_KEY,
};
pub use types::*;
pub use zone::{HvacZone, ZoneState, ZoneStatusReply};
