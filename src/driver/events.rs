//! # Driver Events
//!
//! Typed notifications published by the driver, and the bus that delivers
//! them to subscribers in processing order.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::odometry::{OdometrySnapshot, SampleRejected};
use crate::protocol::decoder::SensorData;
use crate::protocol::encoder::CommandClamp;
use crate::protocol::packet::SubPacketKind;

/// Why received bytes were rejected
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    /// Frame failed the checksum or declared an unusable length
    Checksum,

    /// Sub-packet header declared more data than the payload had left
    TruncatedSubPacket { id: u8, declared: Option<u8>, available: usize },

    /// Sub-packet data did not match its decoder's layout
    MalformedSubPacket { kind: SubPacketKind, reason: String },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Checksum => write!(f, "checksum mismatch"),
            InvalidReason::TruncatedSubPacket { id, declared: Some(declared), available } => write!(
                f,
                "sub-packet 0x{:02X} declares {} bytes, {} available",
                id, declared, available
            ),
            InvalidReason::TruncatedSubPacket { id, declared: None, .. } => {
                write!(f, "sub-packet 0x{:02X} header cut off", id)
            }
            InvalidReason::MalformedSubPacket { kind, reason } => write!(f, "{:?}: {}", kind, reason),
        }
    }
}

/// Rejected bytes with the reason they were rejected
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidPacket {
    pub reason: InvalidReason,
    pub bytes: Bytes,
}

/// Domain-level anomalies that did not stop processing
#[derive(Debug, Clone, PartialEq)]
pub enum DriverWarning {
    /// Odometry sample was not applied
    SampleDiscarded(SampleRejected),

    /// Velocity command exceeded the native range and was clamped
    CommandClamped(CommandClamp),
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// A checksum-valid frame, header to checksum
    RawDataReceived(Bytes),

    /// A command frame written to the serial channel
    RawDataSent(Bytes),

    /// No data for longer than the configured serial timeout
    SerialTimeout { silent_for: Duration },

    InvalidPacket(InvalidPacket),

    /// Odometry after an accepted tick sample
    Odometry(OdometrySnapshot),

    /// A decoded sensor sub-packet
    Sensor(SensorData),

    Warning(DriverWarning),

    /// Transport fault; the connection is closed
    ConnectionLost(String),
}

/// Subscription key for [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RawDataReceived,
    RawDataSent,
    SerialTimeout,
    InvalidPacket,
    Odometry,
    Sensor(SubPacketKind),
    Warning,
    ConnectionLost,
}

impl DriverEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DriverEvent::RawDataReceived(_) => EventKind::RawDataReceived,
            DriverEvent::RawDataSent(_) => EventKind::RawDataSent,
            DriverEvent::SerialTimeout { .. } => EventKind::SerialTimeout,
            DriverEvent::InvalidPacket(_) => EventKind::InvalidPacket,
            DriverEvent::Odometry(_) => EventKind::Odometry,
            DriverEvent::Sensor(data) => EventKind::Sensor(data.kind()),
            DriverEvent::Warning(_) => EventKind::Warning,
            DriverEvent::ConnectionLost(_) => EventKind::ConnectionLost,
        }
    }
}

type Handler = Arc<dyn Fn(&DriverEvent) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` receives every event
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<Vec<Registration>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|r| r.id != id);
    }
}

/// Handle for a registered handler
///
/// The handler stays registered until this handle is released or dropped.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Unregister the handler now
    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Synchronous typed event bus
///
/// Handlers run on the publishing task, in registration order, outside the
/// bus lock. A handler may subscribe or release without deadlocking.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind of event
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a handler for every event
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { id, kind, handler });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching handler
    pub fn publish(&self, event: &DriverEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == kind))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in matching {
            handler(event);
        }
    }

    /// Deliver events in order
    pub fn publish_all(&self, events: impl IntoIterator<Item = DriverEvent>) {
        for event in events {
            self.publish(&event);
        }
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
