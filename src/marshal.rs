//! Deep-copy marshaler.
//!
//! Engine payloads are only valid while the engine callback runs, but the host
//! processes them later on its own thread. [`copy_payload`] produces an
//! [`OwnedPayload`] that shares no storage with the original: strings are
//! cloned and every embedded document is deep-copied into an
//! [`OwnedDocument`]. A copy that fails halfway releases what was already
//! copied (each `OwnedDocument` frees itself on drop) and reports failure.
//!
//! On the host thread [`OwnedPayload::into_host_event`] turns the copy into
//! the event table the host handler sees, handing the copied documents over
//! to the proxy registry.

use crate::error::{upnp_error_message, BridgeError};
use crate::events::{
    Discovery, EventPayload, EventSubscribe, EventType, StateVarComplete, SubscriptionRequest,
};
use crate::host::{HostEvent, HostValue};
use crate::native::{DomLibrary, NativeHandle, NodeType, ProxyKind};
use crate::registry::{Proxy, ProxyRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// An ownerless document copy, freed on drop unless ownership is handed on.
pub struct OwnedDocument {
    handle: NativeHandle,
    owned: bool,
    dom: Arc<dyn DomLibrary>,
}

impl OwnedDocument {
    /// Deep-copy `source`; `Err` carries the DOM library's status code
    pub fn copy_of(dom: &Arc<dyn DomLibrary>, source: NativeHandle) -> Result<Self, i32> {
        let handle = dom.clone_tree(source)?;
        trace!(source = %source, copy = %handle, "Document copied");
        Ok(Self::adopt(dom, handle))
    }

    /// Take ownership of a document this system created
    pub fn adopt(dom: &Arc<dyn DomLibrary>, handle: NativeHandle) -> Self {
        Self {
            handle,
            owned: true,
            dom: Arc::clone(dom),
        }
    }

    /// The copy's handle
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Give up ownership without freeing
    pub fn into_raw(mut self) -> NativeHandle {
        self.owned = false;
        self.handle
    }

    /// Hand ownership to the host: the returned proxy frees the copy when released
    pub fn into_proxy(self, registry: &ProxyRegistry) -> Proxy {
        registry.lookup_or_create(ProxyKind::Node, self.into_raw())
    }
}

impl Drop for OwnedDocument {
    fn drop(&mut self) {
        if self.owned {
            self.dom.free(self.handle);
        }
    }
}

impl fmt::Debug for OwnedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedDocument")
            .field("handle", &self.handle)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Owned copy of an action completion
#[derive(Debug)]
pub struct OwnedActionComplete {
    /// Engine status of the action
    pub err_code: i32,
    /// Control URL the action was sent to
    pub ctrl_url: String,
    /// Copy of the request document
    pub action_request: Option<OwnedDocument>,
    /// Copy of the result document
    pub action_result: Option<OwnedDocument>,
}

/// Owned copy of a GENA event
#[derive(Debug)]
pub struct OwnedEventReceived {
    /// Event sequence number
    pub event_key: i32,
    /// Copy of the changed variables document
    pub changed_variables: Option<OwnedDocument>,
    /// Subscription id
    pub sid: String,
}

/// Owned copy of an action request
#[derive(Debug)]
pub struct OwnedActionRequest {
    /// Engine status
    pub err_code: i32,
    /// Engine error string
    pub err_str: String,
    /// Target device UDN
    pub dev_udn: String,
    /// Target service id
    pub service_id: String,
    /// Action name
    pub action_name: String,
    /// Copy of the request document
    pub action_request: Option<OwnedDocument>,
    /// Copy of the (usually empty) result document
    pub action_result: Option<OwnedDocument>,
    /// Copy of the SOAP header
    pub soap_header: Option<OwnedDocument>,
}

/// An event payload independent of the engine's storage
#[derive(Debug)]
pub enum OwnedPayload {
    /// Discovery (`None` for a search timeout)
    Discovery(Option<Discovery>),
    /// Action completion
    ActionComplete(OwnedActionComplete),
    /// State variable query completion
    StateVarComplete(StateVarComplete),
    /// GENA event
    Event(OwnedEventReceived),
    /// Subscription lifecycle
    EventSubscribe(EventSubscribe),
    /// Subscription request
    SubscriptionRequest(SubscriptionRequest),
    /// Action request
    ActionRequest(OwnedActionRequest),
}

fn copy_document(
    dom: &Arc<dyn DomLibrary>,
    source: Option<NativeHandle>,
    event_type: EventType,
) -> Result<Option<OwnedDocument>, BridgeError> {
    source
        .map(|s| {
            OwnedDocument::copy_of(dom, s).map_err(|code| {
                debug!(code, "Document copy failed");
                BridgeError::Marshal(format!(
                    "Out of memory duplicating 'event IXMLs' for {} callback.",
                    event_type.payload_name()
                ))
            })
        })
        .transpose()
}

/// Deep-copy an engine payload.
///
/// On failure every document copied so far has already been freed.
pub fn copy_payload(
    event_type: EventType,
    payload: &EventPayload<'_>,
    dom: &Arc<dyn DomLibrary>,
) -> Result<OwnedPayload, BridgeError> {
    let owned = match payload {
        EventPayload::Discovery(d) => OwnedPayload::Discovery(d.cloned()),
        EventPayload::ActionComplete(ac) => OwnedPayload::ActionComplete(OwnedActionComplete {
            err_code: ac.err_code,
            ctrl_url: ac.ctrl_url.clone(),
            action_request: copy_document(dom, ac.action_request, event_type)?,
            action_result: copy_document(dom, ac.action_result, event_type)?,
        }),
        EventPayload::StateVarComplete(svc) => OwnedPayload::StateVarComplete((*svc).clone()),
        EventPayload::Event(e) => OwnedPayload::Event(OwnedEventReceived {
            event_key: e.event_key,
            changed_variables: copy_document(dom, e.changed_variables, event_type)?,
            sid: e.sid.clone(),
        }),
        EventPayload::EventSubscribe(es) => OwnedPayload::EventSubscribe((*es).clone()),
        EventPayload::SubscriptionRequest(sr) => OwnedPayload::SubscriptionRequest((*sr).clone()),
        EventPayload::ActionRequest(ar) => OwnedPayload::ActionRequest(OwnedActionRequest {
            err_code: ar.err_code,
            err_str: ar.err_str.clone(),
            dev_udn: ar.dev_udn.clone(),
            service_id: ar.service_id.clone(),
            action_name: ar.action_name.clone(),
            action_request: copy_document(dom, ar.action_request, event_type)?,
            action_result: copy_document(dom, ar.action_result, event_type)?,
            soap_header: copy_document(dom, ar.soap_header, event_type)?,
        }),
        EventPayload::StateVarRequest(_) => {
            return Err(BridgeError::Marshal(format!(
                "{} is answered inline and never crosses to the host",
                event_type.payload_name()
            )))
        }
    };
    Ok(owned)
}

fn set_err_code(event: &mut HostEvent, err_code: i32) {
    if err_code != 0 {
        event.set("ErrCode", err_code);
        event.set_str("Error", upnp_error_message(err_code));
    }
}

fn into_proxy(doc: Option<OwnedDocument>, registry: &ProxyRegistry) -> Option<Proxy> {
    doc.map(|d| d.into_proxy(registry))
}

/// Parameters of the action element, keyed by name.
///
/// A parameter with a text child and no attributes maps to its text; anything
/// more complex maps to a node proxy.
fn action_params(request: NativeHandle, registry: &ProxyRegistry) -> Option<BTreeMap<String, HostValue>> {
    let dom = registry.dom();
    let action = dom.first_child(request)?;
    let mut node = dom.first_child(action)?;
    let mut params = BTreeMap::new();
    loop {
        let name = dom.node_name(node).unwrap_or_default();
        let mut child = dom.first_child(node);
        while let Some(c) = child {
            if dom.node_type(c) == Some(NodeType::Text) {
                break;
            }
            child = dom.next_sibling(c);
        }
        let value = match child {
            Some(text) if !dom.has_attributes(node) => {
                HostValue::String(dom.node_value(text).unwrap_or_default())
            }
            _ => HostValue::Proxy(registry.lookup_or_create(ProxyKind::Node, node)),
        };
        params.insert(name, value);
        match dom.next_sibling(node) {
            Some(next) => node = next,
            None => break,
        }
    }
    Some(params)
}

impl OwnedPayload {
    /// Build the host event table; runs on the host thread.
    pub fn into_host_event(
        self,
        event_type: EventType,
        cookie: Option<usize>,
        registry: &ProxyRegistry,
    ) -> HostEvent {
        let mut event = HostEvent::new(event_type, cookie);
        match self {
            OwnedPayload::Discovery(None) => {}
            OwnedPayload::Discovery(Some(d)) => {
                set_err_code(&mut event, d.err_code);
                event.set("Expires", d.expires);
                event.set_str("DeviceID", &d.device_id);
                event.set_str("DeviceType", &d.device_type);
                event.set_str("ServiceType", &d.service_type);
                event.set_str("ServiceVer", &d.service_ver);
                event.set_str("Location", &d.location);
                event.set_str("Os", &d.os);
                event.set_str("Date", &d.date);
                event.set_str("Ext", &d.ext);
            }
            OwnedPayload::ActionComplete(ac) => {
                set_err_code(&mut event, ac.err_code);
                event.set_str("CtrlUrl", &ac.ctrl_url);
                event.set_proxy("ActionRequest", into_proxy(ac.action_request, registry));
                event.set_proxy("ActionResult", into_proxy(ac.action_result, registry));
            }
            OwnedPayload::StateVarComplete(svc) => {
                set_err_code(&mut event, svc.err_code);
                event.set_str("CtrlUrl", &svc.ctrl_url);
                event.set_str("StateVarName", &svc.state_var_name);
                event.set_str("CurrentVal", &svc.current_val);
            }
            OwnedPayload::Event(e) => {
                event.set("EventKey", e.event_key);
                event.set_proxy("ChangedVariables", into_proxy(e.changed_variables, registry));
                event.set_str("SID", &e.sid);
            }
            OwnedPayload::EventSubscribe(es) => {
                set_err_code(&mut event, es.err_code);
                event.set("TimeOut", es.timeout);
                event.set_str("SID", &es.sid);
                event.set_str("PublisherUrl", &es.publisher_url);
            }
            OwnedPayload::SubscriptionRequest(sr) => {
                event.set_str("ServiceID", &sr.service_id);
                event.set_str("UDN", &sr.udn);
                event.set_str("SID", &sr.sid);
            }
            OwnedPayload::ActionRequest(ar) => {
                set_err_code(&mut event, ar.err_code);
                event.set_str("ErrStr", &ar.err_str);
                event.set_str("UDN", &ar.dev_udn);
                event.set_str("ServiceID", &ar.service_id);
                event.set_str("ActionName", &ar.action_name);
                let request = into_proxy(ar.action_request, registry);
                // the request proxy keeps the copy alive while params reference its nodes
                let params = request
                    .as_ref()
                    .and_then(|p| p.handle().ok())
                    .and_then(|h| action_params(h, registry));
                event.set_proxy("ActionRequest", request);
                event.set_proxy("ActionResult", into_proxy(ar.action_result, registry));
                event.set_proxy("SoapHeader", into_proxy(ar.soap_header, registry));
                if let Some(params) = params {
                    event.set("Params", HostValue::Table(params));
                }
            }
        }
        event
    }
}
