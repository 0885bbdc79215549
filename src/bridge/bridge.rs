use crate::bridge::config::{BridgeConfig, OutputConfig};
use crate::bridge::controller::OutputController;
use crate::bridge::coordinator::StatusCoordinator;
use crate::bridge::registry::OutputRegistry;
use crate::drivers::driver::{BusMonitor, BusTransport};
use crate::error::BridgeError;
use crate::protocol::codec::{self, ReplyFrame};
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Connects output controllers to one bus.
///
/// Outbound frames go straight to the transport. Inbound frames must be
/// fed, in bus order, through [`Bridge::dispatch`], usually by
/// [`Bridge::run`].
pub struct Bridge {
    transport: Arc<dyn BusTransport>,
    coordinator: Arc<StatusCoordinator>,
    registry: Arc<OutputRegistry>,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(transport: Arc<dyn BusTransport>, config: BridgeConfig) -> Bridge {
        let coordinator = Arc::new(StatusCoordinator::new(
            transport.clone(),
            config.status_timeout(),
            config.status_spacing(),
        ));
        Bridge {
            transport,
            coordinator,
            registry: Arc::new(OutputRegistry::default()),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<StatusCoordinator> {
        self.coordinator.clone()
    }

    /// Create the controller for an output. There can only be one
    /// controller per output at a time.
    pub fn output(&self, output: &OutputConfig) -> Result<OutputController, BridgeError> {
        let id = output.output_id()?;
        let entry = self.registry.claim(id)?;
        debug!("Added output {}", id);
        Ok(OutputController::new(
            entry,
            self.registry.clone(),
            self.transport.clone(),
            self.coordinator.clone(),
            output.max_level,
            self.config.set_confirm_timeout(),
        ))
    }

    /// Number of outputs with a live controller
    pub fn output_count(&self) -> usize {
        self.registry.len()
    }

    /// Route one inbound frame. Set replies go to the output they name,
    /// status replies to the current status slot holder.
    pub fn dispatch(&self, identifier: u32, payload: &[u8]) -> ReplyFrame {
        let reply = codec::decode(identifier, payload);
        match &reply {
            ReplyFrame::SetReply(set) => {
                self.registry.dispatch_set_reply(set);
            }
            ReplyFrame::StatusReply(levels) => {
                self.coordinator.on_status_reply(levels.clone());
            }
            ReplyFrame::Unrecognized => {
                debug!("Ignoring frame {:08x} ({} bytes)", identifier, payload.len());
            }
        }
        reply
    }

    /// Dispatch inbound frames until the monitor fails or closes
    pub async fn run<M: BusMonitor>(&self, mut monitor: M) {
        loop {
            match monitor.next_bus_event().await {
                Ok(event) => {
                    self.dispatch(event.identifier, &event.payload);
                }
                Err(e) => {
                    info!("Bus monitor stopped: {}", e);
                    break;
                }
            }
        }
    }

    pub fn spawn<M: BusMonitor + 'static>(self: &Arc<Self>, monitor: M) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.run(monitor).await })
    }
}
