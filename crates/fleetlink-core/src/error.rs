//! Error types for the FleetLink bridge
//!
//! A single error enum covers the whole pipeline, from HTTP-side validation
//! through BLE transport failures. The orchestrator never matches on error
//! *names* to decide policy; it uses the behavioural helpers
//! ([`BridgeError::is_retryable`], [`BridgeError::is_connection_lost`]).

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Scan/Dial Errors =====
    /// BLE scan failed
    #[error("failed to scan for vehicle: {0}")]
    ScanFailed(String),

    /// No beacon for the requested VIN within the scan window
    #[error("vehicle not in range: no beacon received within {seconds}s")]
    ScanTimeout {
        /// Scan window that elapsed
        seconds: u64,
    },

    /// The BLE adapter refused the operation. Usually the process is missing
    /// CAP_NET_ADMIN.
    #[error(
        "operation not permitted: {0}; grant the process CAP_NET_ADMIN \
         (sudo setcap 'cap_net_admin=eip' <binary>) and try again"
    )]
    PermissionDenied(String),

    /// Dialing the beacon failed
    #[error("failed to connect to vehicle: {0}")]
    DialFailed(String),

    // ===== Session Errors =====
    /// Transport-level connect failed after dialing
    #[error("failed to open transport to vehicle: {0}")]
    TransportFailed(String),

    /// Authenticated session handshake failed
    #[error("failed to perform handshake with vehicle: {0}")]
    HandshakeFailed(String),

    /// Waking the vehicle failed
    #[error("failed to wake up car: {0}")]
    WakeupFailed(String),

    /// The vehicle is asleep and the caller did not ask for a wakeup
    #[error("vehicle is sleeping")]
    VehicleAsleep,

    /// The underlying connection died mid-command ("closed pipe" class)
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    // ===== Command Errors =====
    /// The vehicle executed the request and rejected it (e.g. already in the
    /// target state). Per-command `check_error` hooks may remap these to
    /// success.
    #[error("{0}")]
    VehicleRejected(String),

    /// Transient failure while sending a command
    #[error("failed to execute {command}: {reason}")]
    CommandFailed {
        /// Command name
        command: String,
        /// Driver-reported reason
        reason: String,
    },

    /// Request body missing/out-of-range. Synchronous, never enqueued.
    #[error("{0}")]
    Validation(String),

    /// The command name is not part of the Fleet surface we mirror
    #[error("the command \"{0}\" is not supported")]
    UnsupportedCommand(String),

    /// The vehicle-data endpoint cannot be read over BLE
    #[error("the endpoint \"{0}\" is not supported")]
    UnsupportedEndpoint(String),

    // ===== Lifecycle Errors =====
    /// The orchestrator was never set up (typically: no private key)
    #[error("BleControl is not initialized. Maybe private.pem is missing.")]
    NotInitialized,

    /// The command deadline elapsed
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// Deadline that elapsed
        seconds: u64,
    },

    /// The caller abandoned the request before it completed
    #[error("caller cancelled the request")]
    Cancelled,

    /// The orchestrator is gone (process shutting down)
    #[error("command channel closed")]
    ChannelClosed,

    // ===== Keystore Errors =====
    /// Role failed validation (unknown, or path-traversal characters)
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// Key material already exists for the role
    #[error("keys for role '{0}' already exist")]
    KeyAlreadyExists(String),

    /// No key material for the role
    #[error("keys for role '{0}' do not exist")]
    KeyNotFound(String),

    /// Key material could not be parsed
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// IO error wrapper
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether the orchestrator should retry after this error.
    ///
    /// Transient transport conditions retry; validation, permission and
    /// vehicle-state errors surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ScanFailed(_)
                | BridgeError::ScanTimeout { .. }
                | BridgeError::DialFailed(_)
                | BridgeError::TransportFailed(_)
                | BridgeError::HandshakeFailed(_)
                | BridgeError::WakeupFailed(_)
                | BridgeError::ConnectionLost(_)
                | BridgeError::CommandFailed { .. }
                | BridgeError::Timeout { .. }
        )
    }

    /// Whether this error means the BLE connection itself is dead and the
    /// command should be resumed on a fresh session.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            BridgeError::ConnectionLost(_) => true,
            // Drivers that only surface stringly errors still get classified.
            BridgeError::CommandFailed { reason, .. } => reason.contains("closed pipe"),
            _ => false,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::ScanTimeout { seconds: 5 }.is_retryable());
        assert!(BridgeError::DialFailed("busy".into()).is_retryable());
        assert!(BridgeError::ConnectionLost("closed pipe".into()).is_retryable());
        assert!(!BridgeError::PermissionDenied("hci0".into()).is_retryable());
        assert!(!BridgeError::VehicleAsleep.is_retryable());
        assert!(!BridgeError::Validation("missing 'percent'".into()).is_retryable());
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(BridgeError::ConnectionLost("reset".into()).is_connection_lost());
        assert!(BridgeError::CommandFailed {
            command: "charge_start".into(),
            reason: "write failed: closed pipe".into(),
        }
        .is_connection_lost());
        assert!(!BridgeError::CommandFailed {
            command: "charge_start".into(),
            reason: "busy".into(),
        }
        .is_connection_lost());
    }

    #[test]
    fn test_permission_denied_mentions_capability() {
        let err = BridgeError::PermissionDenied("hci0 down".into());
        assert!(err.to_string().contains("CAP_NET_ADMIN"));
    }

    #[test]
    fn test_not_initialized_message() {
        assert!(BridgeError::NotInitialized
            .to_string()
            .starts_with("BleControl is not initialized"));
    }
}
