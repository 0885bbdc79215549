use crate::base::address::OutputId;
use crate::bridge::controller::OutputState;
use crate::error::BridgeError;
use crate::protocol::codec::SetReply;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// State of one output. Exactly one controller holds it; the dispatcher
/// only reaches it to apply replies addressed to that output.
pub(crate) struct OutputEntry {
    id: OutputId,
    pub(crate) state: watch::Sender<OutputState>,
}

impl OutputEntry {
    pub(crate) fn id(&self) -> OutputId {
        self.id
    }

    pub(crate) fn on_set_reply(&self, module: u8, output: u8, on: bool) -> bool {
        if !self.id.matches(module, output) {
            return false;
        }
        self.state.send_modify(|s| s.confirm(on));
        true
    }
}

/// All outputs that currently have a controller, keyed by the
/// (module, output) pair replies carry
#[derive(Default)]
pub(crate) struct OutputRegistry {
    entries: Mutex<HashMap<(u8, u8), Arc<OutputEntry>>>,
}

impl OutputRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<(u8, u8), Arc<OutputEntry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn claim(&self, id: OutputId) -> Result<Arc<OutputEntry>, BridgeError> {
        let mut entries = self.lock();
        if entries.contains_key(&id.key()) {
            return Err(BridgeError::OutputInUse(id));
        }
        let (state, _) = watch::channel(OutputState::initial(id.kind()));
        let entry = Arc::new(OutputEntry { id, state });
        entries.insert(id.key(), entry.clone());
        Ok(entry)
    }

    pub(crate) fn release(&self, id: OutputId) {
        self.lock().remove(&id.key());
    }

    pub(crate) fn dispatch_set_reply(&self, reply: &SetReply) -> bool {
        let entry = self.lock().get(&(reply.module, reply.output)).cloned();
        match entry {
            Some(entry) => entry.on_set_reply(reply.module, reply.output, reply.on),
            None => {
                debug!(
                    "Set reply for {}.{} has no controller",
                    reply.module, reply.output
                );
                false
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
