//! Native event kinds and payloads.
//!
//! [`EventType`] is the closed set of event codes the protocol engine raises.
//! Matching on it is exhaustive everywhere, so a new engine event cannot be
//! added without a corresponding bridge case. The payload structs mirror what
//! the engine hands to its callback; they are borrowed for the duration of the
//! callback only.

use crate::native::NativeHandle;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Engine event codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A control point invokes an action on one of our devices (request)
    ControlActionRequest,
    /// An action we invoked completed
    ControlActionComplete,
    /// Deprecated state variable query on one of our devices (request)
    ControlGetVarRequest,
    /// A state variable query we issued completed
    ControlGetVarComplete,
    /// A device announced itself
    DiscoveryAdvertisementAlive,
    /// A device left
    DiscoveryAdvertisementByebye,
    /// A search we issued found a device
    DiscoverySearchResult,
    /// A search we issued timed out
    DiscoverySearchTimeout,
    /// A control point subscribes to one of our services (request)
    EventSubscriptionRequest,
    /// A GENA event arrived for one of our subscriptions
    EventReceived,
    /// A subscription renewal completed
    EventRenewalComplete,
    /// A subscription completed
    EventSubscribeComplete,
    /// An unsubscribe completed
    EventUnsubscribeComplete,
    /// Automatic renewal of a subscription failed
    EventAutorenewalFailed,
    /// A subscription expired
    EventSubscriptionExpired,
}

/// How the dispatch table routes an event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Copy, enqueue, return immediately
    FireAndForget,
    /// Copy, enqueue, block until the host replies
    Request,
    /// Answered on the worker thread without the host
    Inline,
}

/// All event types, in engine code order
pub const ALL_EVENT_TYPES: [EventType; 15] = [
    EventType::ControlActionRequest,
    EventType::ControlActionComplete,
    EventType::ControlGetVarRequest,
    EventType::ControlGetVarComplete,
    EventType::DiscoveryAdvertisementAlive,
    EventType::DiscoveryAdvertisementByebye,
    EventType::DiscoverySearchResult,
    EventType::DiscoverySearchTimeout,
    EventType::EventSubscriptionRequest,
    EventType::EventReceived,
    EventType::EventRenewalComplete,
    EventType::EventSubscribeComplete,
    EventType::EventUnsubscribeComplete,
    EventType::EventAutorenewalFailed,
    EventType::EventSubscriptionExpired,
];

static BY_NAME: Lazy<HashMap<&'static str, EventType>> =
    Lazy::new(|| ALL_EVENT_TYPES.iter().map(|t| (t.name(), *t)).collect());

impl EventType {
    /// Engine code of this event type
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Event type for an engine code
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| ALL_EVENT_TYPES.get(i).copied())
    }

    /// Host-visible name for a raw engine code, including codes this bridge does not know
    pub fn code_name(code: i32) -> &'static str {
        Self::from_code(code)
            .map(Self::name)
            .unwrap_or("Unknown event type")
    }

    /// Event type for a canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        BY_NAME.get(name).copied()
    }

    /// Canonical name, as shown to the host in the `Event` field
    pub fn name(self) -> &'static str {
        match self {
            EventType::ControlActionRequest => "UPNP_CONTROL_ACTION_REQUEST",
            EventType::ControlActionComplete => "UPNP_CONTROL_ACTION_COMPLETE",
            EventType::ControlGetVarRequest => "UPNP_CONTROL_GET_VAR_REQUEST",
            EventType::ControlGetVarComplete => "UPNP_CONTROL_GET_VAR_COMPLETE",
            EventType::DiscoveryAdvertisementAlive => "UPNP_DISCOVERY_ADVERTISEMENT_ALIVE",
            EventType::DiscoveryAdvertisementByebye => "UPNP_DISCOVERY_ADVERTISEMENT_BYEBYE",
            EventType::DiscoverySearchResult => "UPNP_DISCOVERY_SEARCH_RESULT",
            EventType::DiscoverySearchTimeout => "UPNP_DISCOVERY_SEARCH_TIMEOUT",
            EventType::EventSubscriptionRequest => "UPNP_EVENT_SUBSCRIPTION_REQUEST",
            EventType::EventReceived => "UPNP_EVENT_RECEIVED",
            EventType::EventRenewalComplete => "UPNP_EVENT_RENEWAL_COMPLETE",
            EventType::EventSubscribeComplete => "UPNP_EVENT_SUBSCRIBE_COMPLETE",
            EventType::EventUnsubscribeComplete => "UPNP_EVENT_UNSUBSCRIBE_COMPLETE",
            EventType::EventAutorenewalFailed => "UPNP_EVENT_AUTORENEWAL_FAILED",
            EventType::EventSubscriptionExpired => "UPNP_EVENT_SUBSCRIPTION_EXPIRED",
        }
    }

    /// Name of the engine struct that carries this event's payload
    pub fn payload_name(self) -> &'static str {
        match self {
            EventType::ControlActionRequest => "UpnpActionRequest",
            EventType::ControlActionComplete => "UpnpActionComplete",
            EventType::ControlGetVarRequest => "UpnpStateVarRequest",
            EventType::ControlGetVarComplete => "UpnpStateVarComplete",
            EventType::DiscoveryAdvertisementAlive
            | EventType::DiscoveryAdvertisementByebye
            | EventType::DiscoverySearchResult
            | EventType::DiscoverySearchTimeout => "UpnpDiscovery",
            EventType::EventSubscriptionRequest => "UpnpSubscriptionRequest",
            EventType::EventReceived => "UpnpEvent",
            EventType::EventRenewalComplete
            | EventType::EventSubscribeComplete
            | EventType::EventUnsubscribeComplete
            | EventType::EventAutorenewalFailed
            | EventType::EventSubscriptionExpired => "UpnpEventSubscribe",
        }
    }

    /// Dispatch route
    pub fn route(self) -> Route {
        match self {
            EventType::ControlActionRequest | EventType::EventSubscriptionRequest => Route::Request,
            EventType::ControlGetVarRequest => Route::Inline,
            EventType::ControlActionComplete
            | EventType::ControlGetVarComplete
            | EventType::DiscoveryAdvertisementAlive
            | EventType::DiscoveryAdvertisementByebye
            | EventType::DiscoverySearchResult
            | EventType::DiscoverySearchTimeout
            | EventType::EventReceived
            | EventType::EventRenewalComplete
            | EventType::EventSubscribeComplete
            | EventType::EventUnsubscribeComplete
            | EventType::EventAutorenewalFailed
            | EventType::EventSubscriptionExpired => Route::FireAndForget,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Discovery notification or search result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Engine status code
    pub err_code: i32,
    /// Advertisement lifetime in seconds
    pub expires: i32,
    /// Device UDN
    pub device_id: String,
    /// Device type
    pub device_type: String,
    /// Service type
    pub service_type: String,
    /// Service version
    pub service_ver: String,
    /// Description URL
    pub location: String,
    /// OS header
    pub os: String,
    /// Date header
    pub date: String,
    /// EXT header
    pub ext: String,
}

/// Completion of an action we invoked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionComplete {
    /// Engine status code
    pub err_code: i32,
    /// Control URL
    pub ctrl_url: String,
    /// The request document
    pub action_request: Option<NativeHandle>,
    /// The result document
    pub action_result: Option<NativeHandle>,
}

/// Completion of a state variable query we issued
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVarComplete {
    /// Engine status code
    pub err_code: i32,
    /// Control URL
    pub ctrl_url: String,
    /// Variable name
    pub state_var_name: String,
    /// Current value
    pub current_val: String,
}

/// A GENA event for one of our subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventReceived {
    /// Event sequence key
    pub event_key: i32,
    /// Property set with the changed variables
    pub changed_variables: Option<NativeHandle>,
    /// Subscription id
    pub sid: String,
}

/// Subscription lifecycle notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSubscribe {
    /// Engine status code
    pub err_code: i32,
    /// Granted timeout in seconds
    pub timeout: i32,
    /// Subscription id
    pub sid: String,
    /// Publisher URL
    pub publisher_url: String,
}

/// A control point wants to subscribe to one of our services
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Service id
    pub service_id: String,
    /// Device UDN
    pub udn: String,
    /// Subscription id
    pub sid: String,
}

/// Deprecated state variable query; reply fields are written in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVarRequest {
    /// Reply status code
    pub err_code: i32,
    /// Reply error string
    pub err_str: String,
    /// Device UDN
    pub dev_udn: String,
    /// Service id
    pub service_id: String,
    /// Variable name
    pub state_var_name: String,
    /// Reply value
    pub current_val: Option<String>,
}

/// A control point invokes an action on one of our devices; reply fields are written in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRequest {
    /// Reply status code (also carries an inbound error)
    pub err_code: i32,
    /// Reply error string
    pub err_str: String,
    /// Device UDN
    pub dev_udn: String,
    /// Service id
    pub service_id: String,
    /// Action name
    pub action_name: String,
    /// The SOAP request document
    pub action_request: Option<NativeHandle>,
    /// Reply document; ownership passes to the engine
    pub action_result: Option<NativeHandle>,
    /// SOAP header document
    pub soap_header: Option<NativeHandle>,
}

/// Payload as handed to the engine callback; valid only during the callback.
#[derive(Debug)]
pub enum EventPayload<'a> {
    /// Discovery events (`None` for a search timeout)
    Discovery(Option<&'a Discovery>),
    /// Action completion
    ActionComplete(&'a ActionComplete),
    /// State variable query completion
    StateVarComplete(&'a StateVarComplete),
    /// GENA event
    Event(&'a EventReceived),
    /// Subscription lifecycle
    EventSubscribe(&'a EventSubscribe),
    /// Subscription request (request kind)
    SubscriptionRequest(&'a SubscriptionRequest),
    /// State variable request (answered inline)
    StateVarRequest(&'a mut StateVarRequest),
    /// Action request (request kind)
    ActionRequest(&'a mut ActionRequest),
}

impl EventPayload<'_> {
    /// Whether this payload is the one the engine uses for `event_type`
    pub fn matches(&self, event_type: EventType) -> bool {
        match (event_type, self) {
            (EventType::ControlActionRequest, EventPayload::ActionRequest(_)) => true,
            (EventType::ControlActionComplete, EventPayload::ActionComplete(_)) => true,
            (EventType::ControlGetVarRequest, EventPayload::StateVarRequest(_)) => true,
            (EventType::ControlGetVarComplete, EventPayload::StateVarComplete(_)) => true,
            (EventType::DiscoverySearchTimeout, EventPayload::Discovery(_)) => true,
            (
                EventType::DiscoveryAdvertisementAlive
                | EventType::DiscoveryAdvertisementByebye
                | EventType::DiscoverySearchResult,
                EventPayload::Discovery(Some(_)),
            ) => true,
            (EventType::EventSubscriptionRequest, EventPayload::SubscriptionRequest(_)) => true,
            (EventType::EventReceived, EventPayload::Event(_)) => true,
            (
                EventType::EventRenewalComplete
                | EventType::EventSubscribeComplete
                | EventType::EventUnsubscribeComplete
                | EventType::EventAutorenewalFailed
                | EventType::EventSubscriptionExpired,
                EventPayload::EventSubscribe(_),
            ) => true,
            _ => false,
        }
    }
}
