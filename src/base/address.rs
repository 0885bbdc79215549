use crate::base::module_kind::ModuleKind;
use crate::protocol::error::ProtocolError;
use std::convert::TryFrom;
use std::fmt;

pub const MIN_MODULE_ADDRESS: u8 = 1;
pub const MAX_MODULE_ADDRESS: u8 = 82;

/// Address of a module on the bus, 1..=82
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleAddress(u8);

impl ModuleAddress {
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ModuleAddress {
    type Error = ProtocolError;
    fn try_from(a: u8) -> Result<Self, Self::Error> {
        if (MIN_MODULE_ADDRESS..=MAX_MODULE_ADDRESS).contains(&a) {
            Ok(ModuleAddress(a))
        } else {
            Err(ProtocolError::InvalidAddress(a))
        }
    }
}

impl From<ModuleAddress> for u8 {
    fn from(a: ModuleAddress) -> Self {
        a.0
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one controllable output. The index is checked against
/// the range of the module kind when constructed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OutputId {
    module: ModuleAddress,
    kind: ModuleKind,
    index: u8,
}

impl OutputId {
    pub fn new(module: u8, kind: ModuleKind, index: u8) -> Result<OutputId, ProtocolError> {
        let module = ModuleAddress::try_from(module)?;
        if index > kind.max_output_index() {
            return Err(ProtocolError::InvalidOutputIndex { kind, index });
        }
        Ok(OutputId {
            module,
            kind,
            index,
        })
    }

    pub fn module(&self) -> ModuleAddress {
        self.module
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// The (module, output) pair as it appears in replies from the bus
    pub fn key(&self) -> (u8, u8) {
        (self.module.0, self.index)
    }

    pub fn matches(&self, module: u8, output: u8) -> bool {
        self.module.0 == module && self.index == output
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.module, self.index, self.kind)
    }
}
