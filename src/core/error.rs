use crate::native::NativeError;
use thiserror::Error;

/// Remote code reported when the server cannot serialize access for a transaction
pub const SERIALIZATION_FAILURE_CODE: i32 = 8177;

/// Remote code reported when a call was interrupted by a user cancel request
pub const USER_CANCEL_CODE: i32 = 1013;

/// Error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Reply,
    Execution,
    SerializationFailure,
    OutOfMemory,
    UnableToCreateExecution,
    Cancelled,
    Internal,
    Config,
    Lock,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Reply error: {message}")]
    Reply {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Execution error: {message}")]
    Execution {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Serialization failure: {message}")]
    SerializationFailure {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Out of memory: {message}")]
    OutOfMemory {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Unable to create execution: {message}")]
    UnableToCreateExecution {
        message: String,
        detail: Option<NativeError>,
    },

    #[error("Query cancelled: {message}")]
    Cancelled { message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn connection(message: impl Into<String>, detail: Option<NativeError>) -> Self {
        Self::Connection {
            message: message.into(),
            detail,
        }
    }

    pub fn reply(message: impl Into<String>, detail: NativeError) -> Self {
        Self::classify(ErrorKind::Reply, message, detail)
    }

    pub fn execution(message: impl Into<String>, detail: NativeError) -> Self {
        Self::classify(ErrorKind::Execution, message, detail)
    }

    /// Build an error for a failed remote call.
    ///
    /// Serialization conflicts and user cancels are recognised by their remote
    /// code and take precedence over `fallback`.
    pub fn classify(fallback: ErrorKind, message: impl Into<String>, detail: NativeError) -> Self {
        let message = message.into();
        match detail.code {
            SERIALIZATION_FAILURE_CODE => Self::SerializationFailure {
                message,
                detail: Some(detail),
            },
            USER_CANCEL_CODE => Self::Cancelled {
                message: format!("{}: {}", message, detail.message),
            },
            _ => match fallback {
                ErrorKind::Connection => Self::Connection {
                    message,
                    detail: Some(detail),
                },
                ErrorKind::Reply => Self::Reply {
                    message,
                    detail: Some(detail),
                },
                ErrorKind::OutOfMemory => Self::OutOfMemory {
                    message,
                    detail: Some(detail),
                },
                ErrorKind::UnableToCreateExecution => Self::UnableToCreateExecution {
                    message,
                    detail: Some(detail),
                },
                _ => Self::Execution {
                    message,
                    detail: Some(detail),
                },
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Reply { .. } => ErrorKind::Reply,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::SerializationFailure { .. } => ErrorKind::SerializationFailure,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::UnableToCreateExecution { .. } => ErrorKind::UnableToCreateExecution,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Config(_) => ErrorKind::Config,
            Self::Lock(_) => ErrorKind::Lock,
        }
    }

    /// Remote diagnostic attached to this error, if any
    pub fn detail(&self) -> Option<&NativeError> {
        match self {
            Self::Connection { detail, .. }
            | Self::Reply { detail, .. }
            | Self::Execution { detail, .. }
            | Self::SerializationFailure { detail, .. }
            | Self::OutOfMemory { detail, .. }
            | Self::UnableToCreateExecution { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }

    pub fn native_code(&self) -> Option<i32> {
        self.detail().map(|d| d.code)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for BridgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
