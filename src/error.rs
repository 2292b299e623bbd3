//! Error types for the bridge.
//!
//! Errors surfaced to the host come in two flavours:
//!
//! - **Soft errors** ([`SoftError`]) are values: a numeric code plus a message
//!   that the host inspects and branches on.
//! - **Hard errors** ([`ContractViolation`]) mean the host broke a contract
//!   (e.g. used a tombstoned proxy). Host glue must abort the current host
//!   operation with them, never swallow them.
//!
//! Cross-thread delivery failures are [`DeliveryError`]s; they never reach the
//! host as exceptions and are translated into the engine's own reply
//! conventions by the dispatch table.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Allocation or queue capacity exhausted
    ResourceExhausted,
    /// Host contract violated (tombstoned proxy, wrong type, wrong thread)
    ContractViolation,
    /// Request event could not be answered by the host
    ProtocolFailure,
    /// Host is shutting down or gone
    HostUnavailable,
    /// Host handler returned an error or panicked
    HandlerFailure,
    /// Invalid configuration or argument
    InvalidArgument,
    /// Internal bridge error (bug)
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ResourceExhausted => write!(f, "RESOURCE_EXHAUSTED"),
            ErrorCode::ContractViolation => write!(f, "CONTRACT_VIOLATION"),
            ErrorCode::ProtocolFailure => write!(f, "PROTOCOL_FAILURE"),
            ErrorCode::HostUnavailable => write!(f, "HOST_UNAVAILABLE"),
            ErrorCode::HandlerFailure => write!(f, "HANDLER_FAILURE"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A soft error: an operation failed and the host gets a value to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftError {
    /// Numeric code (engine status code or SOAP error code)
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl SoftError {
    /// Create a new soft error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Soft error carrying the engine's own message for `code`
    pub fn from_upnp(code: i32) -> Self {
        Self::new(code, upnp_error_message(code))
    }

    /// The `501 Action Failed` default reply
    pub fn action_failed() -> Self {
        Self::new(upnp_codes::SOAP_ACTION_FAILED, "Action Failed")
    }
}

impl std::fmt::Display for SoftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for SoftError {}

/// Hard errors: the host broke a contract and the current host operation must abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// The native object behind the proxy was freed
    #[error("Invalid Node (document closed?)")]
    Tombstoned,

    /// The proxy exists but is of another node type
    #[error("Wrong node type; expected {expected}")]
    WrongNodeType {
        /// The expected node type name
        expected: &'static str,
    },

    /// The proxy is of another kind (e.g. a client where a device was expected)
    #[error("Wrong object kind; expected {expected}")]
    WrongKind {
        /// The expected kind name
        expected: &'static str,
    },

    /// The engine was finished; its handles are no longer usable
    #[error("{}", upnp_error_message(upnp_codes::UPNP_E_FINISH))]
    EngineFinished,

    /// A host-only operation was entered from a foreign thread
    #[error("host operation '{operation}' called off the host thread")]
    WrongThread {
        /// The operation name
        operation: &'static str,
    },
}

/// Why a cross-thread delivery did not produce a host reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Host is shutting down (or gone) before processing occurred
    #[error("host unavailable")]
    HostUnavailable,

    /// The host handler failed (error return or panic)
    #[error("host handler failed: {0}")]
    HandlerFailed(SoftError),

    /// The bounded wait expired; the slot was detached
    #[error("timed out after {0}ms waiting for the host")]
    TimedOut(u64),

    /// A request was raised from the host thread itself
    #[error("re-entrant request from the host thread")]
    Reentrant,

    /// The delivery queue is full
    #[error("delivery queue full ({0} pending)")]
    QueueFull(usize),

    /// The payload could not be copied
    #[error("{0}")]
    OutOfMemory(String),
}

impl DeliveryError {
    /// Categorize for reporting
    pub fn code(&self) -> ErrorCode {
        match self {
            DeliveryError::HostUnavailable | DeliveryError::TimedOut(_) => {
                ErrorCode::HostUnavailable
            }
            DeliveryError::HandlerFailed(_) => ErrorCode::HandlerFailure,
            DeliveryError::Reentrant => ErrorCode::ContractViolation,
            DeliveryError::QueueFull(_) | DeliveryError::OutOfMemory(_) => {
                ErrorCode::ResourceExhausted
            }
        }
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Hard error
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// Delivery failure
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Soft error from the engine or the DOM library
    #[error("{0}")]
    Soft(#[from] SoftError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Marshaling failed (out of memory mid-copy)
    #[error("Marshal error: {0}")]
    Marshal(String),
}

impl BridgeError {
    /// Categorize the error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::Contract(_) => ErrorCode::ContractViolation,
            BridgeError::Delivery(e) => e.code(),
            BridgeError::Soft(_) => ErrorCode::ProtocolFailure,
            BridgeError::Config(_) => ErrorCode::InvalidArgument,
            BridgeError::Marshal(_) => ErrorCode::ResourceExhausted,
        }
    }

    /// Whether host glue must abort the current host operation
    pub fn is_hard(&self) -> bool {
        matches!(self, BridgeError::Contract(_))
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Engine status codes and SOAP error codes used by the bridge
pub mod upnp_codes {
    /// Success
    pub const UPNP_E_SUCCESS: i32 = 0;
    /// Invalid handle
    pub const UPNP_E_INVALID_HANDLE: i32 = -100;
    /// Invalid parameter
    pub const UPNP_E_INVALID_PARAM: i32 = -101;
    /// Out of memory
    pub const UPNP_E_OUTOF_MEMORY: i32 = -104;
    /// Invalid device
    pub const UPNP_E_INVALID_DEVICE: i32 = -111;
    /// Invalid service
    pub const UPNP_E_INVALID_SERVICE: i32 = -112;
    /// Invalid action
    pub const UPNP_E_INVALID_ACTION: i32 = -115;
    /// Engine finished
    pub const UPNP_E_FINISH: i32 = -116;
    /// Subscription not accepted
    pub const UPNP_E_SUBSCRIBE_UNACCEPTED: i32 = -301;
    /// Invalid argument
    pub const UPNP_E_INVALID_ARGUMENT: i32 = -501;
    /// SOAP: invalid action (also used for deprecated state variable queries)
    pub const SOAP_INVALID_ACTION: i32 = 401;
    /// SOAP: action failed
    pub const SOAP_ACTION_FAILED: i32 = 501;
    /// SOAP: out of memory
    pub const SOAP_OUT_OF_MEMORY: i32 = 603;
}

/// The engine's message for a status code
pub fn upnp_error_message(code: i32) -> &'static str {
    use upnp_codes::*;
    match code {
        UPNP_E_SUCCESS => "UPNP_E_SUCCESS",
        UPNP_E_INVALID_HANDLE => "UPNP_E_INVALID_HANDLE",
        UPNP_E_INVALID_PARAM => "UPNP_E_INVALID_PARAM",
        UPNP_E_OUTOF_MEMORY => "UPNP_E_OUTOF_MEMORY",
        UPNP_E_INVALID_DEVICE => "UPNP_E_INVALID_DEVICE",
        UPNP_E_INVALID_SERVICE => "UPNP_E_INVALID_SERVICE",
        UPNP_E_INVALID_ACTION => "UPNP_E_INVALID_ACTION",
        UPNP_E_FINISH => "UPNP_E_FINISH",
        UPNP_E_SUBSCRIBE_UNACCEPTED => "UPNP_E_SUBSCRIBE_UNACCEPTED",
        UPNP_E_INVALID_ARGUMENT => "UPNP_E_INVALID_ARGUMENT",
        SOAP_INVALID_ACTION => "Invalid Action",
        SOAP_ACTION_FAILED => "Action Failed",
        SOAP_OUT_OF_MEMORY => "Out of Memory",
        _ => "Unknown error code",
    }
}
