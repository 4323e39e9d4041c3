//! Process-variable plumbing: the subscribe/put contract of the control system and
//! an in-process bus implementing it.
//!
//! Channel Access itself lives outside this crate. Everything here talks to it
//! through two small traits:
//! - [`PvSource`]: `subscribe(address)` returns a receiver of timestamped updates,
//!   `get(address)` returns the latest value.
//! - [`PvWriter`]: `put(address, value)`.
//!
//! [`PvBus`] implements both with `std::sync::mpsc` channels. Updates are drained
//! by the single-threaded UI loop, so orbit and chart state is never mutated
//! from two places at once.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::PvError;

/// EPICS alarm severity of a reading. Zero means nominal.
pub type Severity = u16;

pub const NO_ALARM: Severity = 0;
pub const MINOR_ALARM: Severity = 1;
pub const MAJOR_ALARM: Severity = 2;
pub const INVALID_ALARM: Severity = 3;

/// The value carried by a PV update.
#[derive(Debug, Clone, PartialEq)]
pub enum PvValue {
    Scalar(f64),
    Array(Vec<f64>),
    Text(String),
}

impl PvValue {
    /// Scalar view of the value. Text that parses as a number counts; arrays do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Scalar(v) => Some(*v),
            PvValue::Text(s) => s.trim().parse().ok(),
            PvValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            PvValue::Array(v) => Some(v),
            _ => None,
        }
    }

    /// `true` for a nonzero scalar or a non-empty string, like a Python truthiness check on a caget.
    pub fn is_set(&self) -> bool {
        match self {
            PvValue::Scalar(v) => *v != 0.0 && !v.is_nan(),
            PvValue::Text(s) => !s.trim().is_empty(),
            PvValue::Array(v) => !v.is_empty(),
        }
    }
}

impl From<f64> for PvValue {
    fn from(v: f64) -> Self {
        PvValue::Scalar(v)
    }
}

impl From<&str> for PvValue {
    fn from(s: &str) -> Self {
        PvValue::Text(s.to_string())
    }
}

impl From<String> for PvValue {
    fn from(s: String) -> Self {
        PvValue::Text(s)
    }
}

/// One monitor callback from the control system.
#[derive(Debug, Clone, PartialEq)]
pub struct PvUpdate {
    pub address: String,
    pub value: PvValue,
    pub severity: Severity,
    pub timestamp_micros: i64,
}

/// Read side of the control system.
pub trait PvSource {
    /// Start monitoring `address`. The latest known value, if any, is delivered first.
    fn subscribe(&self, address: &str) -> Receiver<PvUpdate>;

    /// The latest value of `address`.
    fn get(&self, address: &str) -> Result<PvUpdate, PvError>;
}

/// Write side of the control system.
pub trait PvWriter {
    fn put(&self, address: &str, value: PvValue) -> Result<(), PvError>;
}

#[derive(Default)]
struct BusInner {
    listeners: HashMap<String, Vec<Sender<PvUpdate>>>,
    latest: HashMap<String, PvUpdate>,
}

/// In-process PV bus. Cheap to clone; clones share the same channels.
#[derive(Clone, Default)]
pub struct PvBus {
    inner: Arc<Mutex<BusInner>>,
}

impl PvBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a value with an explicit severity, stamped with the current time.
    pub fn publish(&self, address: &str, value: PvValue, severity: Severity) {
        self.publish_update(PvUpdate {
            address: address.to_string(),
            value,
            severity,
            timestamp_micros: chrono::Utc::now().timestamp_micros(),
        });
    }

    /// Publish a fully formed update to every subscriber of its address.
    pub fn publish_update(&self, update: PvUpdate) {
        let mut inner = self.lock();
        if let Some(listeners) = inner.listeners.get_mut(&update.address) {
            listeners.retain(|tx| tx.send(update.clone()).is_ok());
        }
        inner.latest.insert(update.address.clone(), update);
    }

    /// Number of live subscriptions for `address`.
    pub fn subscriber_count(&self, address: &str) -> usize {
        self.lock().listeners.get(address).map_or(0, Vec::len)
    }
}

impl PvSource for PvBus {
    fn subscribe(&self, address: &str) -> Receiver<PvUpdate> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut inner = self.lock();
        if let Some(last) = inner.latest.get(address) {
            let _ = tx.send(last.clone());
        }
        inner.listeners.entry(address.to_string()).or_default().push(tx);
        rx
    }

    fn get(&self, address: &str) -> Result<PvUpdate, PvError> {
        self.lock()
            .latest
            .get(address)
            .cloned()
            .ok_or_else(|| PvError::NoValue(address.to_string()))
    }
}

impl PvWriter for PvBus {
    fn put(&self, address: &str, value: PvValue) -> Result<(), PvError> {
        self.publish(address, value, NO_ALARM);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_of_values() {
        assert!(PvValue::Scalar(1.0).is_set());
        assert!(!PvValue::Scalar(0.0).is_set());
        assert!(!PvValue::Scalar(f64::NAN).is_set());
        assert!(PvValue::from("x").is_set());
        assert!(!PvValue::from("  ").is_set());
        assert_eq!(PvValue::from(" 42 ").as_f64(), Some(42.0));
        assert_eq!(PvValue::Array(vec![1.0]).as_f64(), None);
    }

    #[test]
    fn bus_fans_out_and_remembers_latest() {
        let bus = PvBus::new();
        assert!(matches!(bus.get("A"), Err(PvError::NoValue(_))));
        let a = bus.subscribe("A");
        let b = bus.subscribe("A");
        bus.publish("A", PvValue::Scalar(1.0), MINOR_ALARM);
        assert_eq!(a.try_recv().unwrap().severity, MINOR_ALARM);
        assert_eq!(b.try_recv().unwrap().value, PvValue::Scalar(1.0));

        drop(b);
        bus.put("A", PvValue::Scalar(2.0)).unwrap();
        assert_eq!(bus.subscriber_count("A"), 1);

        let late = bus.subscribe("A");
        assert_eq!(late.try_recv().unwrap().value, PvValue::Scalar(2.0));
        assert_eq!(bus.get("A").unwrap().severity, NO_ALARM);
    }
}
