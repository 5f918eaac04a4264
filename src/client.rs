use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::*;
use crate::status::parse_status;
use crate::store::{now_millis, FileStore, MemoryStore, RecordStore, Token, TokenStore};
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime assumed when a grant reply carries no `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 60 * 60;
/// Tokens are treated as expired this long before the vendor expires them.
const EXPIRY_MARGIN_MS: i64 = 5 * 60 * 1000;

#[cfg(target_os = "linux")]
const EHOSTDOWN: i32 = 112;

/// Resolver failures carry no error kind of their own. hyper-util's
/// `HttpConnector` wraps them in a `ConnectError` displayed as "dns error",
/// and the inner `io::Error` from std's `getaddrinfo` lookup reads "failed
/// to lookup address information: ...".
const DNS_FAULT_MARKERS: [&str; 2] = ["dns error", "failed to lookup address"];

/// Soft failure: the vendor could not be reached, or kept failing.
/// Callers treat this as "state unknown, try again later".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAccessError {
    /// 5xx on every attempt.
    ServiceUnavailable { status: u16 },
    /// DNS, host, network or timeout failure.
    Unreachable(String),
}

impl fmt::Display for ApiAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiAccessError::ServiceUnavailable { status } => {
                write!(f, "service unavailable (HTTP {status})")
            }
            ApiAccessError::Unreachable(reason) => write!(f, "cloud unreachable: {reason}"),
        }
    }
}

/// Reply of a managed request. The outer `Result` carries fatal errors.
pub type ApiReply<T = Value> = std::result::Result<T, ApiAccessError>;

/// Which cached token a 401 condemns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Bearer,
    Refresh,
}

/// Unauthorized attempts allowed for one logical request, shared with the
/// token grants that request triggers.
struct RetryBudget {
    max: u32,
    spent: AtomicU32,
}

impl RetryBudget {
    fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            spent: AtomicU32::new(0),
        }
    }

    /// Records one rejected attempt and returns the running total.
    fn spend(&self) -> u32 {
        self.spent.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn exhausted(&self, spent: u32) -> bool {
        spent >= self.max
    }
}

enum Attempt {
    Success(Value),
    Unauthorized,
    BadRequest(String),
    ServerError(u16),
    Unhandled(u16),
    Unreachable(String),
}

/// The two operations the device model needs from the cloud.
pub trait HvacApi: Send + Sync {
    fn get_status(&self) -> impl Future<Output = Result<HvacStatus>> + Send;

    fn run_command(
        &self,
        command: ApiCommand,
        params: CommandParams,
    ) -> impl Future<Output = Result<CommandResult>> + Send;
}

pub struct ApiClientBuilder {
    username: String,
    password: String,
    client_name: String,
    base_url: String,
    serial: Option<String>,
    store: Option<Box<dyn RecordStore>>,
    storage_dir: Option<PathBuf>,
    max_retries: u32,
    retry_backoff: Duration,
    timeout: Duration,
    message_log: Option<(MessageLogMode, PathBuf)>,
}

impl ApiClientBuilder {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_name: client_name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            serial: None,
            store: None,
            storage_dir: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            message_log: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Serial of the system to control. Checked against the account by
    /// [`ApiClient::initializer`].
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Persist tokens as files under `dir`.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Persist tokens through a custom backend. Takes precedence over
    /// [`storage_dir`](Self::storage_dir).
    pub fn store(mut self, store: impl RecordStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Per-attempt HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.message_log = Some((mode, path.into()));
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        for (field, value) in [
            ("username", &self.username),
            ("password", &self.password),
            ("client name", &self.client_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{field} must not be empty")));
            }
        }

        let backend: Box<dyn RecordStore> = match (self.store, self.storage_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Box::new(FileStore::new(dir)?),
            (None, None) => {
                debug!("no token storage configured, tokens are kept in memory");
                Box::new(MemoryStore::new())
            }
        };
        let tokens = TokenStore::load(backend)?;

        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match self.message_log {
            Some((mode, path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            None => None,
        };

        Ok(ApiClient {
            http,
            base_url: self.base_url,
            username: self.username,
            password: self.password,
            client_name: self.client_name,
            serial: self.serial,
            tokens: Mutex::new(tokens),
            token_flight: tokio::sync::Mutex::new(()),
            max_retries: self.max_retries.max(1),
            retry_backoff: self.retry_backoff,
            logger,
        })
    }
}

/// Authenticated client for the vendor cloud.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    client_name: String,
    serial: Option<String>,
    tokens: Mutex<TokenStore>,
    /// Held while a bearer token is being obtained so concurrent callers
    /// share one grant round trip.
    token_flight: tokio::sync::Mutex<()>,
    max_retries: u32,
    retry_backoff: Duration,
    logger: Option<Mutex<MessageLogger>>,
}

impl ApiClient {
    pub fn builder(
        username: impl Into<String>,
        password: impl Into<String>,
        client_name: impl Into<String>,
    ) -> ApiClientBuilder {
        ApiClientBuilder::new(username, password, client_name)
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn refresh_token(&self) -> Token {
        self.tokens().refresh_token().clone()
    }

    pub fn bearer_token(&self) -> Token {
        self.tokens().bearer_token().clone()
    }

    /// Resolves the serial to control. A configured serial must be
    /// registered to the account (case-insensitive); without one the
    /// account must hold exactly one system.
    pub async fn initializer(&mut self) -> Result<String> {
        let systems = match self.get_ac_systems().await? {
            Ok(systems) => systems,
            Err(e) => {
                return Err(Error::Config(format!(
                    "could not retrieve the registered systems: {e}"
                )));
            }
        };

        let chosen = match &self.serial {
            Some(wanted) => systems
                .iter()
                .find(|s| s.serial.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| Error::UnknownSerial(wanted.clone()))?,
            None => match systems.as_slice() {
                [] => return Err(Error::NoSystems),
                [only] => only,
                many => {
                    return Err(Error::AmbiguousSystems(
                        many.iter().map(|s| s.serial.clone()).collect(),
                    ));
                }
            },
        };

        info!(
            serial = %chosen.serial,
            kind = %chosen.system_type,
            description = %chosen.description,
            "using air conditioning system"
        );
        self.serial = Some(chosen.serial.clone());
        Ok(chosen.serial.clone())
    }

    pub async fn get_ac_systems(&self) -> Result<ApiReply<Vec<AcSystem>>> {
        let reply = self
            .authorized(Method::GET, SYSTEMS_PATH, &[("includeNeo", "true")], None)
            .await?;
        match reply {
            Ok(body) => Ok(Ok(parse_ac_systems(&body)?)),
            Err(e) => Ok(Err(e)),
        }
    }

    /// Latest status, or the `api_error` sentinel when the cloud could not
    /// be read.
    pub async fn get_status(&self) -> Result<HvacStatus> {
        let body = match self.latest_status().await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(error = %e, "cloud unreachable, status not refreshed");
                return Ok(HvacStatus::api_error());
            }
            Err(Error::Protocol(e)) => {
                warn!("cloud returned an unreadable status reply: {e}");
                return Ok(HvacStatus::api_error());
            }
            Err(e) => return Err(e),
        };

        if let Some(logger) = &self.logger {
            lock(logger).log_status(&body);
        }

        match parse_status(&body) {
            Ok(status) => {
                trace!(zones = status.zone_current_status.len(), "status parsed");
                Ok(status)
            }
            Err(e) => {
                warn!("cloud returned invalid status data: {e}");
                Ok(HvacStatus::api_error())
            }
        }
    }

    /// The current enabled-zones array.
    pub async fn get_zone_statuses(&self) -> Result<ApiReply<Vec<bool>>> {
        let body = match self.latest_status().await? {
            Ok(body) => body,
            Err(e) => return Ok(Err(e)),
        };
        let zones = body
            .pointer("/lastKnownState/UserAirconSettings/EnabledZones")
            .ok_or_else(|| Error::Protocol("status reply has no EnabledZones".to_string()))?;
        Ok(Ok(serde_json::from_value(zones.clone())?))
    }

    pub async fn run_command(
        &self,
        command: ApiCommand,
        mut params: CommandParams,
    ) -> Result<CommandResult> {
        let serial = self.require_serial()?;

        if command.needs_enabled_zones() && params.enabled_zones.is_none() {
            match self.get_zone_statuses().await? {
                Ok(zones) => params.enabled_zones = Some(zones),
                Err(e) => {
                    warn!(command = command.name(), error = %e, "could not read enabled zones");
                    return Ok(access_result(&e));
                }
            }
        }

        let doc = command.build(&params)?;
        if let Some(logger) = &self.logger {
            lock(logger).log_command(command.name(), params.zone_index, &doc);
        }
        debug!(command = command.name(), zone = ?params.zone_index, "sending command");

        let message = command_message(doc);
        let reply = match self
            .authorized(Method::POST, COMMAND_PATH, &[("serial", serial)], Some(&message))
            .await
        {
            Ok(reply) => reply,
            Err(Error::Protocol(e)) => {
                error!(command = command.name(), "command reply unreadable: {e}");
                return Ok(CommandResult::Failure);
            }
            Err(e) => return Err(e),
        };

        Ok(match reply {
            Ok(body) if is_ack(&body) => CommandResult::Success,
            Ok(body) => {
                error!(command = command.name(), reply = %body, "command was not acknowledged");
                CommandResult::Failure
            }
            Err(e) => {
                warn!(command = command.name(), error = %e, "command not delivered");
                access_result(&e)
            }
        })
    }

    /// Sends a request with the standard status handling: 200 returns the
    /// body, 401 invalidates `credential` and retries, 400 is an
    /// authentication error, 5xx retries after `backoff`. `max_retries`
    /// bounds the number of attempts.
    ///
    /// `request` builds a fresh request per attempt. It may itself resolve
    /// to an access error, e.g. when the token grant it depends on failed.
    pub async fn manage_api_request<F, Fut>(
        &self,
        credential: Credential,
        request: F,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<ApiReply>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ApiReply<RequestBuilder>>>,
    {
        let budget = RetryBudget::new(max_retries);
        self.managed(credential, request, &budget, backoff).await
    }

    /// 401s are charged to `budget`, which nested grants share, so one
    /// logical request never makes more than `budget.max` unauthorized
    /// attempts. 5xx retries are bounded per call.
    async fn managed<F, Fut>(
        &self,
        credential: Credential,
        request: F,
        budget: &RetryBudget,
        backoff: Duration,
    ) -> Result<ApiReply>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ApiReply<RequestBuilder>>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let builder = match request().await? {
                Ok(builder) => builder,
                Err(e) => return Ok(Err(e)),
            };

            match self.execute(builder).await? {
                Attempt::Success(body) => return Ok(Ok(body)),
                Attempt::Unauthorized => {
                    let spent = budget.spend();
                    let mut tokens = self.tokens();
                    if budget.exhausted(spent) {
                        error!(attempts = spent, "still unauthorized, clearing cached tokens");
                        tokens.invalidate_bearer_token()?;
                        tokens.invalidate_refresh_token()?;
                        return Err(Error::MaxRetriesExceeded { attempts: spent });
                    }
                    debug!(attempt = spent, ?credential, "unauthorized, invalidating token");
                    match credential {
                        Credential::Bearer => tokens.invalidate_bearer_token()?,
                        Credential::Refresh => tokens.invalidate_refresh_token()?,
                    }
                }
                Attempt::BadRequest(body) => return Err(Error::Authentication(body)),
                Attempt::ServerError(status) if attempt >= budget.max => {
                    warn!(status, attempts = attempt, "server still failing, giving up");
                    return Ok(Err(ApiAccessError::ServiceUnavailable { status }));
                }
                Attempt::ServerError(status) => {
                    debug!(status, attempt, "server error, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                }
                Attempt::Unhandled(status) => return Err(Error::UnhandledStatus(status)),
                Attempt::Unreachable(reason) => {
                    warn!(reason = %reason, "cloud unreachable");
                    return Ok(Err(ApiAccessError::Unreachable(reason)));
                }
            }
        }
    }

    async fn latest_status(&self) -> Result<ApiReply> {
        let serial = self.require_serial()?;
        self.authorized(Method::GET, STATUS_PATH, &[("serial", serial)], None)
            .await
    }

    async fn authorized(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ApiReply> {
        let url = format!("{}{path}", self.base_url);
        let url = url.as_str();
        let budget = RetryBudget::new(self.max_retries);
        let budget = &budget;
        let request = move || self.bearer_request(method.clone(), url, query, body, budget);
        self.managed(Credential::Bearer, request, budget, self.retry_backoff)
            .await
    }

    async fn bearer_request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        budget: &RetryBudget,
    ) -> Result<ApiReply<RequestBuilder>> {
        let token = match self.ensure_bearer(budget).await? {
            Ok(token) => token,
            Err(e) => return Ok(Err(e)),
        };
        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(Ok(builder))
    }

    async fn ensure_bearer(&self, budget: &RetryBudget) -> Result<ApiReply<String>> {
        let _flight = self.token_flight.lock().await;
        let cached = valid(self.tokens().bearer_token());
        if let Some(token) = cached {
            return Ok(Ok(token));
        }
        debug!("bearer token expired, exchanging refresh token");
        self.refresh_grant(budget).await
    }

    /// Exchanges the refresh token for a bearer token, logging in first
    /// when the refresh token is missing or expired.
    async fn refresh_grant(&self, budget: &RetryBudget) -> Result<ApiReply<String>> {
        let url = format!("{}{TOKEN_PATH}", self.base_url);
        let url = url.as_str();
        let request = move || self.refresh_request(url, budget);
        let body = match self
            .managed(Credential::Refresh, request, budget, self.retry_backoff)
            .await?
        {
            Ok(body) => body,
            Err(e) => return Ok(Err(e)),
        };

        let grant: TokenResponse = serde_json::from_value(body)
            .map_err(|e| Error::Protocol(format!("malformed token reply: {e}")))?;
        let token = Token::new(grant.access_token, expiry_from(grant.expires_in));
        debug!(expires = token.expires, "obtained bearer token");
        self.tokens().set_bearer_token(token.clone())?;
        Ok(Ok(token.token))
    }

    async fn refresh_request(
        &self,
        url: &str,
        budget: &RetryBudget,
    ) -> Result<ApiReply<RequestBuilder>> {
        let cached = valid(self.tokens().refresh_token());
        let refresh = match cached {
            Some(token) => token,
            None => match self.password_grant(budget).await? {
                Ok(token) => token,
                Err(e) => return Ok(Err(e)),
            },
        };
        Ok(Ok(self.http.post(url).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
            ("client_id", OAUTH_CLIENT_ID),
        ])))
    }

    async fn password_grant(&self, budget: &RetryBudget) -> Result<ApiReply<String>> {
        let client_id = self.tokens().client_id(&self.client_name)?;
        debug!(client = %client_id, "authenticating with username and password");

        let url = format!("{}{PAIR_PATH}", self.base_url);
        let url = url.as_str();
        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("client", PAIR_CLIENT),
            ("deviceName", self.client_name.as_str()),
            ("deviceUniqueIdentifier", client_id.as_str()),
        ];
        let form = &form;
        let request = move || prepared(self.http.post(url).form(form));
        let body = match self
            .managed(Credential::Refresh, request, budget, self.retry_backoff)
            .await?
        {
            Ok(body) => body,
            Err(e) => return Ok(Err(e)),
        };

        let grant: TokenResponse = serde_json::from_value(body)
            .map_err(|e| Error::Protocol(format!("malformed pairing reply: {e}")))?;
        let token = Token::new(grant.access_token, expiry_from(grant.expires_in));
        info!(client = %client_id, "paired with the cloud");
        self.tokens().set_refresh_token(token.clone())?;
        Ok(Ok(token.token))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Attempt> {
        let request = builder.build()?;
        if let Some(logger) = &self.logger {
            lock(logger).log_request(request.method().as_str(), request.url().path());
        }
        trace!(method = %request.method(), path = request.url().path(), "sending request");

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(e) => return network_fault(e),
        };

        let status = response.status().as_u16();
        Ok(match status {
            200 => match response.bytes().await {
                Ok(bytes) => Attempt::Success(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| Error::Protocol(format!("reply is not JSON: {e}")))?,
                ),
                Err(e) => return network_fault(e),
            },
            400 => Attempt::BadRequest(response.text().await.unwrap_or_default()),
            401 => Attempt::Unauthorized,
            500..=599 => Attempt::ServerError(status),
            _ => Attempt::Unhandled(status),
        })
    }

    fn require_serial(&self) -> Result<&str> {
        self.serial.as_deref().ok_or(Error::NotInitialized)
    }

    fn tokens(&self) -> MutexGuard<'_, TokenStore> {
        lock(&self.tokens)
    }
}

impl HvacApi for ApiClient {
    fn get_status(&self) -> impl Future<Output = Result<HvacStatus>> + Send {
        ApiClient::get_status(self)
    }

    fn run_command(
        &self,
        command: ApiCommand,
        params: CommandParams,
    ) -> impl Future<Output = Result<CommandResult>> + Send {
        ApiClient::run_command(self, command, params)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn prepared(builder: RequestBuilder) -> std::future::Ready<Result<ApiReply<RequestBuilder>>> {
    std::future::ready(Ok(Ok(builder)))
}

fn valid(token: &Token) -> Option<String> {
    token.is_valid().then(|| token.token.clone())
}

fn expiry_from(expires_in: Option<i64>) -> i64 {
    now_millis() + expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS) * 1000 - EXPIRY_MARGIN_MS
}

/// A server that kept failing did receive the command; an unreachable one
/// did not.
fn access_result(e: &ApiAccessError) -> CommandResult {
    match e {
        ApiAccessError::ServiceUnavailable { .. } => CommandResult::Failure,
        ApiAccessError::Unreachable(_) => CommandResult::ApiError,
    }
}

fn network_fault(e: reqwest::Error) -> Result<Attempt> {
    if is_connectivity_fault(&e) {
        Ok(Attempt::Unreachable(e.to_string()))
    } else {
        Err(Error::UnexpectedNetwork(error_chain(&e)))
    }
}

/// Timeouts, unreachable hosts or networks, and DNS lookup failures.
pub(crate) fn is_connectivity_fault(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(http) = e.downcast_ref::<reqwest::Error>()
            && http.is_timeout()
        {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && is_connectivity_io(io)
        {
            return true;
        }
        let text = e.to_string();
        if DNS_FAULT_MARKERS.iter().any(|marker| text.contains(marker)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_connectivity_io(io: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    if matches!(
        io.kind(),
        ErrorKind::TimedOut | ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable
    ) {
        return true;
    }
    #[cfg(target_os = "linux")]
    if io.raw_os_error() == Some(EHOSTDOWN) {
        return true;
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}
