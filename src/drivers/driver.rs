use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::mpsc;

pub type DynFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug)]
pub enum SendError {
    /// The transport has been shut down
    Closed,
    /// The transport refused the frame
    Rejected(String),
    DriverError(Box<dyn Error + Send + Sync>),
}

impl Error for SendError {}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "Transport closed"),
            SendError::Rejected(reason) => write!(f, "Frame rejected: {}", reason),
            SendError::DriverError(e) => write!(f, "Driver error: {}", e),
        }
    }
}

pub type SendResult = Result<(), SendError>;

/// A frame received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub timestamp: Instant,
    pub identifier: u32,
    pub payload: Vec<u8>,
}

impl BusEvent {
    pub fn new(identifier: u32, payload: Vec<u8>) -> BusEvent {
        BusEvent {
            timestamp: Instant::now(),
            identifier,
            payload,
        }
    }
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:", self.identifier)?;
        for b in &self.payload {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

pub type BusEventResult = Result<BusEvent, Box<dyn Error + Send + Sync>>;

/// Outbound side of a bus connection. May be called concurrently, any
/// serialization needed by the hardware is done by the implementation.
pub trait BusTransport: Send + Sync {
    fn send_frame(&self, identifier: u32, payload: &[u8]) -> DynFuture<'_, SendResult>;
}

/// Inbound side of a bus connection. Delivers frames in the order they
/// were seen on the bus.
pub trait BusMonitor: Send {
    fn next_bus_event(&mut self) -> DynFuture<'_, BusEventResult>;
}

fn channel_closed() -> Box<dyn Error + Send + Sync> {
    "Channel closed".into()
}

impl BusMonitor for mpsc::Receiver<BusEvent> {
    fn next_bus_event(&mut self) -> DynFuture<'_, BusEventResult> {
        Box::pin(async move { self.recv().await.ok_or_else(channel_closed) })
    }
}

impl BusMonitor for mpsc::UnboundedReceiver<BusEvent> {
    fn next_bus_event(&mut self) -> DynFuture<'_, BusEventResult> {
        Box::pin(async move { self.recv().await.ok_or_else(channel_closed) })
    }
}

impl<T: BusMonitor + ?Sized> BusMonitor for Box<T> {
    fn next_bus_event(&mut self) -> DynFuture<'_, BusEventResult> {
        (**self).next_bus_event()
    }
}
