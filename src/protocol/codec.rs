//! Conversion between bus frames and the requests and replies they carry.
//!
//! Everything here is pure. Encoding validates addresses and output
//! indices; decoding never fails since the bus also carries traffic from
//! other systems.

use crate::base::address::ModuleAddress;
use crate::base::module_kind::ModuleKind;
use crate::protocol::error::ProtocolError;
use std::convert::TryFrom;
use std::fmt;

/// Identifier status requests are sent on
pub const STATUS_REQUEST_ID: u32 = 0x01FC_FF01;
/// Identifier both kinds of replies arrive on
pub const REPLY_ID: u32 = 0x01FD_FF01;
const ACTION_ID_BASE: u32 = 0x01FC_0002;
const ACTION_ID_MASK: u32 = 0xFFFF_00FF;

const FRAME_MARK: u8 = 0xAF;
const SET_REPLY_LEN: usize = 3;

pub const fn action_id(module: u8) -> u32 {
    ACTION_ID_BASE | ((module as u32) << 8)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Off,
    On,
    Toggle,
}

impl Action {
    pub const fn code(&self) -> u8 {
        match self {
            Action::Off => 0x00,
            Action::On => 0x01,
            Action::Toggle => 0x02,
        }
    }

    pub const fn from_code(code: u8) -> Option<Action> {
        match code {
            0x00 => Some(Action::Off),
            0x01 => Some(Action::On),
            0x02 => Some(Action::Toggle),
            _ => None,
        }
    }
}

/// Delay before switching on or off, 0xFF is no delay
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActionDelays {
    pub on: u8,
    pub off: u8,
}

impl ActionDelays {
    pub const NONE: ActionDelays = ActionDelays {
        on: 0xFF,
        off: 0xFF,
    };
}

impl Default for ActionDelays {
    fn default() -> Self {
        ActionDelays::NONE
    }
}

/// An outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    StatusRequest([u8; 16]),
    Action { header: [u8; 16], body: [u8; 8] },
}

impl Frame {
    pub fn identifier(&self) -> u32 {
        match self {
            Frame::StatusRequest(_) => STATUS_REQUEST_ID,
            Frame::Action { header, .. } => action_id(header[3]),
        }
    }

    pub fn header(&self) -> &[u8; 16] {
        match self {
            Frame::StatusRequest(h) => h,
            Frame::Action { header, .. } => header,
        }
    }

    pub fn body(&self) -> Option<&[u8; 8]> {
        match self {
            Frame::StatusRequest(_) => None,
            Frame::Action { body, .. } => Some(body),
        }
    }

    /// Bytes as handed to the transport
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Frame::StatusRequest(h) => h.to_vec(),
            Frame::Action { header, body } => {
                let mut bytes = Vec::with_capacity(header.len() + body.len());
                bytes.extend_from_slice(header);
                bytes.extend_from_slice(body);
                bytes
            }
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:", self.identifier())?;
        for b in self.payload() {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

pub fn encode_status_request(
    module_address: u8,
    module_kind: ModuleKind,
) -> Result<Frame, ProtocolError> {
    let module = ModuleAddress::try_from(module_address)?;
    Ok(Frame::StatusRequest([
        FRAME_MARK,
        0x01,
        module_kind.code(),
        module.value(),
        0,
        0,
        0,
        0x01,
        0,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        FRAME_MARK,
    ]))
}

pub fn encode_action(
    module_address: u8,
    module_kind: ModuleKind,
    output_index: u8,
    action: Action,
    value: u8,
    softdim: u8,
) -> Result<Frame, ProtocolError> {
    encode_action_with_delays(
        module_address,
        module_kind,
        output_index,
        action,
        value,
        softdim,
        ActionDelays::NONE,
    )
}

pub fn encode_action_with_delays(
    module_address: u8,
    module_kind: ModuleKind,
    output_index: u8,
    action: Action,
    value: u8,
    softdim: u8,
    delays: ActionDelays,
) -> Result<Frame, ProtocolError> {
    let module = ModuleAddress::try_from(module_address)?.value();
    if output_index > module_kind.max_output_index() {
        return Err(ProtocolError::InvalidOutputIndex {
            kind: module_kind,
            index: output_index,
        });
    }
    let header = [
        FRAME_MARK, 0x02, 0xFF, module, 0, 0, 0x08, 0x01, 0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, FRAME_MARK,
    ];
    let body = [
        module,
        output_index,
        action.code(),
        delays.on,
        delays.off,
        value,
        softdim,
        0xFF,
    ];
    Ok(Frame::Action { header, body })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetReply {
    pub module: u8,
    pub output: u8,
    pub on: bool,
}

/// Inbound frame classified by identifier and shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFrame {
    SetReply(SetReply),
    /// One byte per output of the module that was asked. Carries no
    /// module identity.
    StatusReply(Vec<u8>),
    Unrecognized,
}

fn is_status_length(len: usize) -> bool {
    [
        ModuleKind::Relay,
        ModuleKind::Dimmer,
        ModuleKind::AnalogZeroToTen,
    ]
    .iter()
    .any(|k| k.output_count() as usize == len)
}

pub fn decode(identifier: u32, payload: &[u8]) -> ReplyFrame {
    if identifier != REPLY_ID {
        return ReplyFrame::Unrecognized;
    }
    match payload.len() {
        SET_REPLY_LEN => ReplyFrame::SetReply(SetReply {
            module: payload[0],
            output: payload[1],
            on: payload[2] != 0,
        }),
        n if is_status_length(n) => ReplyFrame::StatusReply(payload.to_vec()),
        _ => ReplyFrame::Unrecognized,
    }
}

/// A request as seen on the bus, used by monitors and the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status {
        module: u8,
        kind: ModuleKind,
    },
    Action {
        module: u8,
        output: u8,
        action: Action,
        value: u8,
        softdim: u8,
        delays: ActionDelays,
    },
}

pub fn decode_request(identifier: u32, payload: &[u8]) -> Option<Request> {
    if payload.len() < 16 || payload[0] != FRAME_MARK || payload[15] != FRAME_MARK {
        return None;
    }
    if identifier == STATUS_REQUEST_ID && payload.len() == 16 && payload[1] == 0x01 {
        let kind = ModuleKind::from_code(payload[2])?;
        return Some(Request::Status {
            module: payload[3],
            kind,
        });
    }
    if identifier & ACTION_ID_MASK == ACTION_ID_BASE && payload.len() == 24 && payload[1] == 0x02
    {
        let body = &payload[16..];
        if body[0] != payload[3] || action_id(body[0]) != identifier {
            return None;
        }
        return Some(Request::Action {
            module: body[0],
            output: body[1],
            action: Action::from_code(body[2])?,
            delays: ActionDelays {
                on: body[3],
                off: body[4],
            },
            value: body[5],
            softdim: body[6],
        });
    }
    None
}
