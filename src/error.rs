use crate::base::address::OutputId;
use crate::drivers::driver::SendError;
use crate::protocol::error::ProtocolError;
use std::error::Error;
use std::fmt;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug)]
pub enum BridgeError {
    /// Misconfigured address or output, never retried
    Protocol(ProtocolError),
    /// No status reply while holding the status slot
    StatusTimeout,
    SendFailure(SendError),
    /// Another controller already owns this output
    OutputInUse(OutputId),
    /// The status reply had no byte for this output
    ShortStatusReply { expected: usize, got: usize },
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BridgeError::Protocol(e) => Some(e),
            BridgeError::SendFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Protocol(e) => write!(f, "{}", e),
            BridgeError::StatusTimeout => write!(f, "Timed out waiting for status reply"),
            BridgeError::SendFailure(e) => write!(f, "Failed to send frame: {}", e),
            BridgeError::OutputInUse(id) => write!(f, "Output {} already has a controller", id),
            BridgeError::ShortStatusReply { expected, got } => write!(
                f,
                "Status reply too short, needed {} bytes but got {}",
                expected, got
            ),
        }
    }
}

impl From<ProtocolError> for BridgeError {
    fn from(err: ProtocolError) -> BridgeError {
        BridgeError::Protocol(err)
    }
}

impl From<SendError> for BridgeError {
    fn from(err: SendError) -> BridgeError {
        BridgeError::SendFailure(err)
    }
}
