//! Serialization of status requests.
//!
//! A status reply does not say which module it comes from, so only one
//! status request may be on the bus at a time. The coordinator owns a
//! single slot: whoever holds it is the addressee of the next status
//! reply, whatever it contains. Waiters get the slot in the order they
//! asked for it. With one request in flight the status throughput of the
//! whole bus is one module per round trip plus the spacing.

use crate::base::module_kind::ModuleKind;
use crate::drivers::driver::BusTransport;
use crate::error::BridgeError;
use crate::protocol::codec::{self, Frame};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

struct SlotState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
    // Where the next status reply goes
    reply: Option<oneshot::Sender<Vec<u8>>>,
    released_at: Option<Instant>,
}

pub struct StatusCoordinator {
    transport: Arc<dyn BusTransport>,
    status_timeout: Duration,
    spacing: Duration,
    slot: Mutex<SlotState>,
}

/// Exclusive right to send one status request. Released when dropped.
pub struct StatusSlot<'a> {
    coordinator: &'a StatusCoordinator,
}

// A queued acquire. If dropped after the slot was handed to it, the slot
// is passed on.
struct Waiter<'a> {
    coordinator: &'a StatusCoordinator,
    recv: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut recv) = self.recv.take() {
            recv.close();
            if recv.try_recv().is_ok() {
                self.coordinator.release();
            }
        }
    }
}

impl StatusCoordinator {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        status_timeout: Duration,
        spacing: Duration,
    ) -> StatusCoordinator {
        StatusCoordinator {
            transport,
            status_timeout,
            spacing,
            slot: Mutex::new(SlotState {
                held: false,
                waiters: VecDeque::new(),
                reply: None,
                released_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the slot. Returns once it is held and the minimum spacing
    /// since the previous request has passed.
    pub async fn acquire(&self) -> StatusSlot<'_> {
        let recv = {
            let mut state = self.lock();
            if !state.held && state.waiters.is_empty() {
                state.held = true;
                None
            } else {
                let (send, recv) = oneshot::channel();
                state.waiters.push_back(send);
                Some(recv)
            }
        };
        if let Some(recv) = recv {
            let mut waiter = Waiter {
                coordinator: self,
                recv: Some(recv),
            };
            if let Some(recv) = waiter.recv.as_mut() {
                // Senders are only dropped after trying to grant the slot
                let _ = recv.await;
            }
            waiter.recv = None;
        }
        let slot = StatusSlot { coordinator: self };
        let released_at = self.lock().released_at;
        if let Some(released_at) = released_at {
            tokio::time::sleep_until(released_at + self.spacing).await;
        }
        slot
    }

    fn release(&self) {
        let mut state = self.lock();
        state.reply = None;
        state.released_at = Some(Instant::now());
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }

    /// Number of requesters queued behind the current holder
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().held
    }

    /// Hand a status reply to the slot holder. Returns false if nobody
    /// was waiting for one.
    pub fn on_status_reply(&self, payload: Vec<u8>) -> bool {
        let reply = self.lock().reply.take();
        match reply {
            Some(reply) => reply.send(payload).is_ok(),
            None => {
                debug!("Status reply with no pending request");
                false
            }
        }
    }

    /// Acquire the slot, ask one module for the state of all its outputs
    /// and release the slot again.
    pub async fn request_status(
        &self,
        module_address: u8,
        module_kind: ModuleKind,
    ) -> Result<Vec<u8>, BridgeError> {
        let frame = codec::encode_status_request(module_address, module_kind)?;
        self.acquire().await.exchange(&frame).await
    }
}

impl StatusSlot<'_> {
    pub async fn request(
        self,
        module_address: u8,
        module_kind: ModuleKind,
    ) -> Result<Vec<u8>, BridgeError> {
        let frame = codec::encode_status_request(module_address, module_kind)?;
        self.exchange(&frame).await
    }

    async fn exchange(self, frame: &Frame) -> Result<Vec<u8>, BridgeError> {
        let coordinator = self.coordinator;
        let (send, recv) = oneshot::channel();
        coordinator.lock().reply = Some(send);
        debug!("Sending status request {}", frame);
        coordinator
            .transport
            .send_frame(frame.identifier(), &frame.payload())
            .await?;
        match timeout(coordinator.status_timeout, recv).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) | Err(_) => {
                warn!(
                    "No status reply from module {} within {:?}",
                    frame.header()[3],
                    coordinator.status_timeout
                );
                Err(BridgeError::StatusTimeout)
            }
        }
    }
}

impl Drop for StatusSlot<'_> {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
