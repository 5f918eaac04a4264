use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Missing or invalid installation settings.
    Config(String),
    UnknownSerial(String),
    NoSystems,
    AmbiguousSystems(Vec<String>),
    /// HTTP 400 from the vendor: the credentials are wrong.
    Authentication(String),
    MaxRetriesExceeded { attempts: u32 },
    UnhandledStatus(u16),
    UnexpectedNetwork(String),
    Protocol(String),
    InvalidCommand(String),
    ControllerOffline,
    NotInitialized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::UnknownSerial(serial) => {
                write!(f, "serial number {serial} is not registered to this account")
            }
            Error::NoSystems => write!(f, "no air conditioning systems registered to this account"),
            Error::AmbiguousSystems(serials) => write!(
                f,
                "multiple systems found ({}), set a device serial to pick one",
                serials.join(", ")
            ),
            Error::Authentication(msg) => {
                write!(f, "authentication rejected, username or password issue: {msg}")
            }
            Error::MaxRetriesExceeded { attempts } => {
                write!(f, "maximum retries exceeded after {attempts} unauthorized attempts")
            }
            Error::UnhandledStatus(status) => write!(f, "unhandled error: HTTP {status}"),
            Error::UnexpectedNetwork(msg) => write!(f, "unexpected error: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::InvalidCommand(msg) => write!(f, "invalid command: {msg}"),
            Error::ControllerOffline => write!(
                f,
                "master controller is offline, check its internet/wifi connection"
            ),
            Error::NotInitialized => write!(f, "client not initialized, no device serial resolved"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
