//! Error types shared across the daemon core.

use std::io;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while inventorying bonds, talking to the kernel
/// or ovs-vswitchd, or emitting gratuitous ARPs.
///
/// With the exception of individual GARP send failures (handled at the
/// emitter) and multicast parse errors (logged once per cycle), every
/// variant here is fatal: it propagates to `main`, is logged, and the
/// process exits with status 1.
///
/// Impossible states are not represented here at all. Conditions the
/// kernel contract rules out, such as a fixed header not covered by its
/// message's declared length or an attribute order the kernel never
/// produces, are logged and abort the process at the point of detection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error from the OVS JSON-RPC channel.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kernel returned an error code in an NLMSG_ERROR message.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// A datagram ended before the length its framing declared.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// An interface failed bond validation (wrong kind, wrong mode, no master).
    #[error("not a usable bond: {name}: {reason}")]
    InvalidBond {
        /// The interface name.
        name: String,
        /// Which validation failed.
        reason: String,
    },

    /// The master link carried no interface name.
    #[error("failed to get master name for bond: {bond}")]
    MasterName {
        /// The bond whose master could not be resolved.
        bond: String,
    },

    /// The bond's master is neither a Linux bridge nor an OVS datapath.
    #[error("bond master ({master}) is not a Linux or OVS bridge: {bond}")]
    UnusableMaster {
        /// The bond interface name.
        bond: String,
        /// The master interface name.
        master: String,
    },

    /// Auto-detection found nothing to manage.
    #[error("no usable bonds detected")]
    NoBonds,

    /// ovs-vswitchd is not running or its control socket is unreachable.
    #[error("ovs-vswitchd is not available: {0}")]
    OvsUnavailable(String),

    /// ovs-vswitchd answered a request with an error string.
    #[error("error response from OVS daemon: {0}")]
    OvsError(String),

    /// ovs-vswitchd produced output this version does not understand.
    #[error("cannot parse OVS daemon output: {0}")]
    OvsParse(String),

    /// A JSON-RPC response did not match the outstanding request id.
    #[error("JSON-RPC response ID does not match request: request {request}, response {response}")]
    OvsIdMismatch {
        /// The id sent with the request.
        request: u64,
        /// The id found in the response.
        response: u64,
    },

    /// A JSON-RPC response filled the receive buffer.
    #[error("JSON-RPC response too large: {0} bytes")]
    OvsOverflow(usize),
}

impl Error {
    /// Create a kernel error from the (negative) errno in an NLMSG_ERROR payload.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_errno_keeps_positive_code() {
        let err = Error::from_errno(-19); // ENODEV
        match err {
            Error::Kernel { errno, .. } => assert_eq!(errno, 19),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn display_names_the_bond() {
        let err = Error::InvalidBond {
            name: "bond7".into(),
            reason: "invalid bonding mode (0)".into(),
        };
        assert_eq!(
            err.to_string(),
            "not a usable bond: bond7: invalid bonding mode (0)"
        );
    }
}
