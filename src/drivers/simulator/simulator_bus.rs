//! In-process bus with simulated relay, dimmer and 0-10V modules.
//!
//! Modules answer action frames with a set reply and status requests
//! with one byte per output, after the frame time plus a reply delay.
//! Replies are delivered in the order the requests were sent.

use crate::base::module_kind::ModuleKind;
use crate::drivers::driver::{BusEvent, BusTransport, DynFuture, SendError, SendResult};
use crate::drivers::simulator::timing;
use crate::protocol::codec::{self, Action, Request, REPLY_ID};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub reply_delay: Duration,
    /// Random extra delay, up to this value, added to each reply
    pub jitter: Duration,
    pub drop_set_replies: bool,
    /// Never answer status requests
    pub silent_status: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            reply_delay: timing::REPLY_DELAY,
            jitter: Duration::ZERO,
            drop_set_replies: false,
            silent_status: false,
        }
    }
}

struct SimModule {
    kind: ModuleKind,
    levels: Vec<u8>,
}

impl SimModule {
    fn apply(&mut self, output: u8, action: Action, value: u8) -> Option<u8> {
        let dimmable = self.kind.is_dimmable();
        let level = self.levels.get_mut(output as usize)?;
        let on_value = if dimmable { value.min(100) } else { 1 };
        *level = match action {
            Action::Off => 0,
            Action::On => on_value,
            Action::Toggle if *level != 0 => 0,
            Action::Toggle => on_value,
        };
        Some(*level)
    }
}

struct SimState {
    modules: HashMap<u8, SimModule>,
    options: SimOptions,
    outstanding_status: u32,
    max_outstanding_status: u32,
    status_requests: u32,
    sent: Vec<(u32, Vec<u8>)>,
}

enum Scheduled {
    Emit(BusEvent),
    // End of a status request, with the reply if there is one
    StatusDone(Option<BusEvent>),
}

pub struct SimBus {
    state: Arc<Mutex<SimState>>,
    schedule: mpsc::UnboundedSender<(Instant, Scheduled)>,
}

async fn reply_engine(
    state: Arc<Mutex<SimState>>,
    mut recv: mpsc::UnboundedReceiver<(Instant, Scheduled)>,
    events: mpsc::UnboundedSender<BusEvent>,
) {
    while let Some((at, item)) = recv.recv().await {
        tokio::time::sleep_until(at).await;
        let event = match item {
            Scheduled::Emit(event) => Some(event),
            Scheduled::StatusDone(event) => {
                if let Ok(mut state) = state.lock() {
                    state.outstanding_status = state.outstanding_status.saturating_sub(1);
                }
                event
            }
        };
        if let Some(mut event) = event {
            event.timestamp = std::time::Instant::now();
            if events.send(event).is_err() {
                break;
            }
        }
    }
    debug!("Simulated bus stopped");
}

impl SimBus {
    /// Create a bus and the receiving end of its traffic. Must be called
    /// from within a tokio runtime.
    pub fn new(options: SimOptions) -> (Arc<SimBus>, mpsc::UnboundedReceiver<BusEvent>) {
        let (schedule, schedule_recv) = mpsc::unbounded_channel();
        let (events, events_recv) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SimState {
            modules: HashMap::new(),
            options,
            outstanding_status: 0,
            max_outstanding_status: 0,
            status_requests: 0,
            sent: Vec::new(),
        }));
        tokio::spawn(reply_engine(state.clone(), schedule_recv, events));
        (Arc::new(SimBus { state, schedule }), events_recv)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_module(&self, address: u8, kind: ModuleKind) {
        self.lock().modules.insert(
            address,
            SimModule {
                kind,
                levels: vec![0; kind.output_count() as usize],
            },
        );
    }

    /// Change an output without any bus traffic, like a local switch would
    pub fn set_output(&self, module: u8, output: u8, value: u8) {
        if let Some(level) = self
            .lock()
            .modules
            .get_mut(&module)
            .and_then(|m| m.levels.get_mut(output as usize))
        {
            *level = value;
        }
    }

    pub fn output_level(&self, module: u8, output: u8) -> Option<u8> {
        self.lock()
            .modules
            .get(&module)
            .and_then(|m| m.levels.get(output as usize).copied())
    }

    pub fn set_options<F: FnOnce(&mut SimOptions)>(&self, f: F) {
        f(&mut self.lock().options)
    }

    /// Put a frame on the bus as if sent by some other node
    pub fn inject(&self, identifier: u32, payload: Vec<u8>) {
        let _ = self.schedule.send((
            Instant::now(),
            Scheduled::Emit(BusEvent::new(identifier, payload)),
        ));
    }

    /// Highest number of status requests that were waiting for an answer
    /// at the same time
    pub fn max_outstanding_status(&self) -> u32 {
        self.lock().max_outstanding_status
    }

    pub fn status_requests(&self) -> u32 {
        self.lock().status_requests
    }

    pub fn sent_frames(&self) -> Vec<(u32, Vec<u8>)> {
        self.lock().sent.clone()
    }

    fn handle_frame(&self, identifier: u32, payload: &[u8]) -> SendResult {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.sent.push((identifier, payload.to_vec()));
        let Some(request) = codec::decode_request(identifier, payload) else {
            debug!("Ignoring frame {:08x}", identifier);
            return Ok(());
        };
        let mut delay = timing::frame_duration(payload.len()) + state.options.reply_delay;
        if !state.options.jitter.is_zero() {
            delay += rand::thread_rng().gen_range(Duration::ZERO..=state.options.jitter);
        }
        let item = match request {
            Request::Status { module, kind } => {
                state.status_requests += 1;
                state.outstanding_status += 1;
                state.max_outstanding_status =
                    state.max_outstanding_status.max(state.outstanding_status);
                let reply = if state.options.silent_status {
                    None
                } else {
                    state
                        .modules
                        .get(&module)
                        .filter(|m| m.kind == kind)
                        .map(|m| BusEvent::new(REPLY_ID, m.levels.clone()))
                };
                Scheduled::StatusDone(reply)
            }
            Request::Action {
                module,
                output,
                action,
                value,
                ..
            } => {
                let Some(level) = state
                    .modules
                    .get_mut(&module)
                    .and_then(|m| m.apply(output, action, value))
                else {
                    return Ok(());
                };
                if state.options.drop_set_replies {
                    return Ok(());
                }
                Scheduled::Emit(BusEvent::new(
                    REPLY_ID,
                    vec![module, output, u8::from(level != 0)],
                ))
            }
        };
        self.schedule
            .send((Instant::now() + delay, item))
            .map_err(|_| SendError::Closed)
    }
}

impl BusTransport for SimBus {
    fn send_frame(&self, identifier: u32, payload: &[u8]) -> DynFuture<'_, SendResult> {
        Box::pin(future::ready(self.handle_frame(identifier, payload)))
    }
}
