//! Error types for ideagen.
//!
//! Every failure the idea stream can hit maps onto one [`Error`] variant.  The predicates on
//! [`Error`] decide how the connection state machine reacts: a forbidden status refreshes the
//! token, a network failure reconnects after a longer delay, and everything else is terminal.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;
use std::time::Duration;

/// Shared underlying cause.  `Arc` keeps [`Error`] cheap to clone.
pub type Source = Arc<dyn error::Error + Send + Sync>;

/// The main error type for ideagen.
#[derive(Clone, Debug)]
pub enum Error {
    /// The endpoint answered with a non-success status other than 401 or 403.
    Api {
        status_code: u16,
        message: String,
        /// Seconds from the `Retry-After` header, when present.
        retry_after: Option<u64>,
    },

    /// The endpoint did not accept the credential (401).
    Authentication { message: String },

    /// The endpoint refused the credential (403).  Triggers a token refresh.
    Permission { message: String },

    /// Connecting timed out.
    Timeout {
        message: String,
        duration: Option<Duration>,
    },

    /// The request was abandoned on purpose.
    Abort { message: String },

    /// The endpoint could not be reached.
    Connection {
        message: String,
        source: Option<Source>,
    },

    /// JSON or YAML could not be (de)serialized.
    Serialization {
        message: String,
        source: Option<Source>,
    },

    Io {
        message: String,
        source: Arc<io::Error>,
    },

    /// The HTTP client failed for a reason other than reachability.
    HttpClient {
        message: String,
        source: Option<Source>,
    },

    /// A value could not be used to build a request.
    Validation {
        message: String,
        param: Option<String>,
    },

    Url {
        message: String,
        source: Option<url::ParseError>,
    },

    /// The event stream broke after it was opened.
    Streaming {
        message: String,
        source: Option<Source>,
    },

    /// Bytes that were not valid UTF-8, base64, or similar.
    Encoding {
        message: String,
        source: Option<Source>,
    },

    Config { message: String },

    Unknown { message: String },
}

impl Error {
    /// Creates a new API error for `status_code`.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a `Retry-After` hint to an API error.  Other variants are returned unchanged.
    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        if let Error::Api { retry_after, .. } = &mut self {
            *retry_after = seconds;
        }
        self
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Error::Permission {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, duration: Option<Duration>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Error::Abort {
            message: message.into(),
        }
    }

    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Source::from),
        }
    }

    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Source::from),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Source::from),
        }
    }

    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Source::from),
        }
    }

    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Source::from),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Error::Unknown {
            message: message.into(),
        }
    }

    /// Returns true if the endpoint refused the credential with a forbidden status.
    ///
    /// This is the only failure that triggers a token refresh.
    pub fn is_forbidden(&self) -> bool {
        self.status_code() == Some(403)
    }

    /// Returns true if the endpoint did not accept the credential.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    /// Returns true if the endpoint could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. })
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort { .. })
    }

    /// Returns true if the endpoint answered with a non-success HTTP status.
    pub fn is_http_status(&self) -> bool {
        self.status_code().is_some()
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// The HTTP status the endpoint answered with, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            Error::Authentication { .. } => Some(401),
            Error::Permission { .. } => Some(403),
            _ => None,
        }
    }

    /// The human-readable message, without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Api { message, .. }
            | Error::Authentication { message }
            | Error::Permission { message }
            | Error::Timeout { message, .. }
            | Error::Abort { message }
            | Error::Connection { message, .. }
            | Error::Serialization { message, .. }
            | Error::Io { message, .. }
            | Error::HttpClient { message, .. }
            | Error::Validation { message, .. }
            | Error::Url { message, .. }
            | Error::Streaming { message, .. }
            | Error::Encoding { message, .. }
            | Error::Config { message }
            | Error::Unknown { message } => message,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Error::Api { .. } => "HTTP error",
            Error::Authentication { .. } => "Authentication error",
            Error::Permission { .. } => "Permission error",
            Error::Timeout { .. } => "Timeout error",
            Error::Abort { .. } => "Request aborted",
            Error::Connection { .. } => "Connection error",
            Error::Serialization { .. } => "Serialization error",
            Error::Io { .. } => "I/O error",
            Error::HttpClient { .. } => "HTTP client error",
            Error::Validation { .. } => "Validation error",
            Error::Url { .. } => "URL error",
            Error::Streaming { .. } => "Streaming error",
            Error::Encoding { .. } => "Encoding error",
            Error::Config { .. } => "Configuration error",
            Error::Unknown { .. } => "Unknown error",
        }
    }

    fn cause(&self) -> Option<&Source> {
        match self {
            Error::Connection { source, .. }
            | Error::Serialization { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Streaming { source, .. }
            | Error::Encoding { source, .. } => source.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Error::Api { status_code, .. } = self {
            write!(f, "HTTP {status_code}: {}", self.message())?;
        } else {
            write!(f, "{}: {}", self.label(), self.message())?;
        }
        match self {
            Error::Api {
                retry_after: Some(seconds),
                ..
            } => write!(f, " (retry after {seconds} seconds)"),
            Error::Timeout {
                duration: Some(duration),
                ..
            } => write!(f, " (after {duration:?})"),
            Error::Validation {
                param: Some(param), ..
            } => write!(f, " (parameter: {param})"),
            _ => Ok(()),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source.as_ref() as &(dyn error::Error + 'static)),
            Error::Url {
                source: Some(source),
                ..
            } => Some(source as &(dyn error::Error + 'static)),
            _ => self
                .cause()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(err.to_string(), Some(err))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("invalid UTF-8: {err}"), Some(Box::new(err)))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::encoding(format!("invalid base64: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for ideagen operations.
pub type Result<T> = std::result::Result<T, Error>;
