//! Host-side surface of the bridge.
//!
//! The embedding scripting engine sees events as keyed tables of
//! [`HostValue`]s and answers request events with a list of values, the way a
//! script callback returns multiple results.

pub mod reply;
pub mod value;

pub use reply::{decode_reply, Reply};
pub use value::HostValue;

use crate::events::EventType;
use crate::registry::Proxy;
use crate::report::ErrorReport;
use std::collections::BTreeMap;

/// One event as the host handler sees it
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    /// Event kind
    pub event_type: EventType,
    /// Opaque cookie the callback was registered with
    pub cookie: Option<usize>,
    /// Event table (`Event`, `SID`, `Location`, ...)
    pub fields: BTreeMap<String, HostValue>,
}

impl HostEvent {
    /// Create an event table holding only the `Event` name
    pub fn new(event_type: EventType, cookie: Option<usize>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("Event".to_string(), HostValue::from(event_type.name()));
        Self {
            event_type,
            cookie,
            fields,
        }
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.fields.get(key)
    }

    /// Get a string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HostValue::as_str)
    }

    /// Get an integer field
    pub fn int_field(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HostValue::as_integer)
    }

    /// Get a proxy field
    pub fn proxy_field(&self, key: &str) -> Option<&Proxy> {
        self.get(key).and_then(HostValue::as_proxy)
    }

    pub(crate) fn set(&mut self, key: &str, value: impl Into<HostValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Set a string field, skipping empty strings
    pub(crate) fn set_str(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.set(key, value);
        }
    }

    /// Set a proxy field, skipping null nodes
    pub(crate) fn set_proxy(&mut self, key: &str, proxy: Option<Proxy>) {
        if let Some(proxy) = proxy {
            self.set(key, proxy);
        }
    }
}

/// The host's registered callback.
///
/// `handle` runs on the host thread for every delivered event. For request
/// events its return values are validated with [`decode_reply`]; for
/// fire-and-forget events they are ignored. Errors and panics are caught per
/// delivery. Closures implement this trait and leave error reports queued.
pub trait HostHandler {
    /// Handle one event
    fn handle(&mut self, event: &HostEvent) -> anyhow::Result<Vec<HostValue>>;

    /// Whether this handler consumes the out-of-band error channel.
    ///
    /// When false (the default) reports stay queued for
    /// [`crate::Bridge::error_reports`] instead of being handed to `on_error`.
    fn handles_errors(&self) -> bool {
        false
    }

    /// Receive a failure from the out-of-band error channel
    fn on_error(&mut self, _report: &ErrorReport) {}
}

impl<F> HostHandler for F
where
    F: FnMut(&HostEvent) -> anyhow::Result<Vec<HostValue>>,
{
    fn handle(&mut self, event: &HostEvent) -> anyhow::Result<Vec<HostValue>> {
        self(event)
    }
}
