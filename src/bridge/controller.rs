//! Control of a single output.
//!
//! Commands update the believed state as soon as they are issued and then
//! wait a bounded time for the module's set reply. A missing reply does
//! not undo the update, it only lowers the confidence. Every change is
//! published on a watch channel.

use crate::base::address::OutputId;
use crate::base::module_kind::ModuleKind;
use crate::bridge::coordinator::StatusCoordinator;
use crate::bridge::registry::{OutputEntry, OutputRegistry};
use crate::drivers::driver::BusTransport;
use crate::error::BridgeError;
use crate::protocol::codec::{self, Action, Frame};
use crate::protocol::values::{
    to_controller_level, to_device_level, to_softdim, MAX_DEVICE_LEVEL, SOFTDIM_INSTANT,
};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingSetConfirmation,
    AwaitingStatusSlot,
    AwaitingStatusReply,
}

/// How much the believed state can be trusted
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Confidence {
    /// Nothing known since start
    Unknown,
    /// Commanded, reply still pending
    Optimistic,
    /// Matches a reply from the module
    Confirmed,
    /// Commanded, but the module never confirmed
    Unconfirmed,
    /// Last refresh failed, the state may be out of date
    Stale,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputLevel {
    pub on: bool,
    /// Device level 0..=100, only for dimmable outputs
    pub level: Option<u8>,
}

impl OutputLevel {
    /// Level in controller units 0..=255
    pub fn brightness(&self) -> Option<u8> {
        self.level.map(to_controller_level)
    }

    fn apply_status(&mut self, byte: u8) {
        match self.level {
            Some(_) => {
                let level = byte.min(MAX_DEVICE_LEVEL);
                self.level = Some(level);
                self.on = level > 0;
            }
            None => self.on = byte != 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputState {
    pub level: OutputLevel,
    pub phase: Phase,
    pub confidence: Confidence,
}

impl OutputState {
    pub(crate) fn initial(kind: ModuleKind) -> OutputState {
        OutputState {
            level: OutputLevel {
                on: false,
                level: kind.is_dimmable().then_some(0),
            },
            phase: Phase::Idle,
            confidence: Confidence::Unknown,
        }
    }

    // A set reply only carries on/off, the level is left alone
    pub(crate) fn confirm(&mut self, on: bool) {
        self.level.on = on;
        self.confidence = Confidence::Confirmed;
        if self.phase == Phase::AwaitingSetConfirmation {
            self.phase = Phase::Idle;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }
}

/// Outcome of a command that was sent
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// No set reply in time. The commanded state is kept.
    Unconfirmed,
}

// Returns the output to Idle with the given confidence if an operation
// ends without reaching Idle itself, including when it is cancelled.
// While `unsent` holds a state the command frame has not been handed to
// the transport, and that state is put back instead.
struct PendingPhase<'a> {
    entry: &'a OutputEntry,
    confidence: Confidence,
    unsent: Option<OutputState>,
}

impl Drop for PendingPhase<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.unsent.take() {
            self.entry.state.send_replace(previous);
            return;
        }
        let confidence = self.confidence;
        self.entry.state.send_if_modified(|s| {
            if s.phase == Phase::Idle {
                return false;
            }
            s.phase = Phase::Idle;
            s.confidence = confidence;
            true
        });
    }
}

pub struct OutputController {
    entry: Arc<OutputEntry>,
    registry: Arc<OutputRegistry>,
    transport: Arc<dyn BusTransport>,
    coordinator: Arc<StatusCoordinator>,
    max_level: u8,
    set_timeout: Duration,
}

impl OutputController {
    pub(crate) fn new(
        entry: Arc<OutputEntry>,
        registry: Arc<OutputRegistry>,
        transport: Arc<dyn BusTransport>,
        coordinator: Arc<StatusCoordinator>,
        max_level: u8,
        set_timeout: Duration,
    ) -> OutputController {
        OutputController {
            entry,
            registry,
            transport,
            coordinator,
            max_level: max_level.min(MAX_DEVICE_LEVEL),
            set_timeout,
        }
    }

    pub fn id(&self) -> OutputId {
        self.entry.id()
    }

    pub fn state(&self) -> OutputState {
        *self.entry.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<OutputState> {
        self.entry.state.subscribe()
    }

    /// Every state change, starting with the current state
    pub fn changes(&self) -> WatchStream<OutputState> {
        WatchStream::new(self.subscribe())
    }

    /// Switch on. `brightness` is in controller units 0..=255 and
    /// `transition` in seconds; both only apply to dimmable outputs.
    pub async fn turn_on(
        &mut self,
        brightness: Option<u8>,
        transition: Option<f32>,
    ) -> Result<Confirmation, BridgeError> {
        let id = self.id();
        let dimmable = id.kind().is_dimmable();
        let (value, softdim) = if dimmable {
            let value = brightness
                .map(to_device_level)
                .unwrap_or(MAX_DEVICE_LEVEL)
                .min(self.max_level);
            (value, to_softdim(transition))
        } else {
            (MAX_DEVICE_LEVEL, SOFTDIM_INSTANT)
        };
        let frame = codec::encode_action(
            id.module().value(),
            id.kind(),
            id.index(),
            Action::On,
            value,
            softdim,
        )?;
        self.command(frame, |level| {
            level.on = true;
            if dimmable {
                level.level = Some(value);
            }
        })
        .await
    }

    pub async fn turn_off(&mut self) -> Result<Confirmation, BridgeError> {
        let id = self.id();
        let frame = codec::encode_action(
            id.module().value(),
            id.kind(),
            id.index(),
            Action::Off,
            0,
            SOFTDIM_INSTANT,
        )?;
        self.command(frame, |level| {
            level.on = false;
            if level.level.is_some() {
                level.level = Some(0);
            }
        })
        .await
    }

    pub async fn toggle(&mut self) -> Result<Confirmation, BridgeError> {
        let id = self.id();
        let on_value = match self.state().level.level {
            Some(l) if l > 0 => l,
            Some(_) => self.max_level,
            None => MAX_DEVICE_LEVEL,
        };
        let frame = codec::encode_action(
            id.module().value(),
            id.kind(),
            id.index(),
            Action::Toggle,
            on_value,
            SOFTDIM_INSTANT,
        )?;
        self.command(frame, |level| {
            level.on = !level.on;
            if level.level.is_some() {
                level.level = Some(if level.on { on_value } else { 0 });
            }
        })
        .await
    }

    async fn command<F>(&mut self, frame: Frame, update: F) -> Result<Confirmation, BridgeError>
    where
        F: FnOnce(&mut OutputLevel),
    {
        let id = self.id();
        let mut changes = self.entry.state.subscribe();
        let previous = *self.entry.state.borrow();
        self.entry.state.send_modify(|s| {
            update(&mut s.level);
            s.phase = Phase::AwaitingSetConfirmation;
            s.confidence = Confidence::Optimistic;
        });
        let mut pending = PendingPhase {
            entry: &self.entry,
            confidence: Confidence::Unconfirmed,
            unsent: Some(previous),
        };
        debug!("{}: sending {}", id, frame);
        // Dropping `pending` before the send completes restores `previous`
        self.transport
            .send_frame(frame.identifier(), &frame.payload())
            .await?;
        pending.unsent = None;
        let confirmed = matches!(
            timeout(
                self.set_timeout,
                changes.wait_for(|s| s.phase != Phase::AwaitingSetConfirmation)
            )
            .await,
            Ok(Ok(_))
        );
        if confirmed {
            Ok(Confirmation::Confirmed)
        } else {
            warn!(
                "{}: no set reply within {:?}, keeping commanded state",
                id, self.set_timeout
            );
            Ok(Confirmation::Unconfirmed)
        }
    }

    /// Apply a set reply. Returns false if it is for another output.
    pub fn on_set_reply(&self, module: u8, output: u8, on: bool) -> bool {
        self.entry.on_set_reply(module, output, on)
    }

    /// Read the output's state from its module. On failure the previous
    /// state is kept and marked stale.
    pub async fn refresh(&mut self) -> Result<OutputLevel, BridgeError> {
        let id = self.id();
        self.entry
            .state
            .send_modify(|s| s.phase = Phase::AwaitingStatusSlot);
        let _pending = PendingPhase {
            entry: &self.entry,
            confidence: Confidence::Stale,
            unsent: None,
        };
        let slot = self.coordinator.acquire().await;
        self.entry
            .state
            .send_modify(|s| s.phase = Phase::AwaitingStatusReply);
        let payload = slot.request(id.module().value(), id.kind()).await;
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: refresh failed: {}", id, e);
                return Err(e);
            }
        };
        let index = id.index() as usize;
        let Some(byte) = payload.get(index).copied() else {
            warn!(
                "{}: status reply has {} bytes, no value for output",
                id,
                payload.len()
            );
            return Err(BridgeError::ShortStatusReply {
                expected: index + 1,
                got: payload.len(),
            });
        };
        self.entry.state.send_modify(|s| {
            s.level.apply_status(byte);
            s.phase = Phase::Idle;
            s.confidence = Confidence::Confirmed;
        });
        Ok(self.state().level)
    }
}

impl Drop for OutputController {
    fn drop(&mut self) {
        self.registry.release(self.id());
    }
}
