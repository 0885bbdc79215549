use crate::base::module_kind::ModuleKind;
use std::error::Error;
use std::fmt;

/// Invalid input detected while building a frame. Nothing is sent on the
/// bus when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidAddress(u8),
    InvalidOutputIndex { kind: ModuleKind, index: u8 },
}

impl Error for ProtocolError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidAddress(a) => {
                write!(f, "Module address {} out of range. 1 <= addr <= 82", a)
            }
            ProtocolError::InvalidOutputIndex { kind, index } => write!(
                f,
                "Output index {} out of range for {} module. 0 <= index <= {}",
                index,
                kind,
                kind.max_output_index()
            ),
        }
    }
}
