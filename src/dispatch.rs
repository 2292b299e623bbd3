//! Dispatch table: the protocol engine's single callback entry point.
//!
//! [`Dispatcher::on_event`] runs on whatever worker thread the engine calls
//! back on. It routes each event kind to the bridge and translates the host's
//! reply (or the lack of one) into the engine's own conventions, so the native
//! protocol exchange always completes.

use crate::bridge::Bridge;
use crate::error::{upnp_codes, upnp_error_message, DeliveryError, ErrorCode, SoftError};
use crate::events::{ActionRequest, EventPayload, EventType, StateVarRequest, SubscriptionRequest};
use crate::host::reply::{ACTION_DATA_ERROR, SUBSCRIPTION_DATA_ERROR};
use crate::host::Reply;
use crate::marshal::OwnedDocument;
use crate::native::{DomLibrary, NativeHandle, ProtocolEngine};
use std::sync::Arc;
use tracing::{debug, warn};

/// Status returned to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Event handled (or queued); the engine carries on
    Continue,
    /// Request rejected with this code
    Rejected(i32),
}

impl DispatchStatus {
    /// Engine status code
    pub fn code(self) -> i32 {
        match self {
            DispatchStatus::Continue => upnp_codes::UPNP_E_SUCCESS,
            DispatchStatus::Rejected(code) => code,
        }
    }
}

/// Routes engine callbacks through the bridge
#[derive(Clone)]
pub struct Dispatcher {
    bridge: Bridge,
    engine: Arc<dyn ProtocolEngine>,
    dom: Arc<dyn DomLibrary>,
}

impl Dispatcher {
    /// Create a dispatcher; engine and DOM library come from the bridge's registry
    pub fn new(bridge: Bridge) -> Self {
        let engine = Arc::clone(bridge.registry().engine());
        let dom = Arc::clone(bridge.registry().dom());
        Self { bridge, engine, dom }
    }

    /// The bridge events are routed through
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Engine callback entry point
    pub fn on_event(
        &self,
        event_type: EventType,
        payload: EventPayload<'_>,
        cookie: Option<usize>,
    ) -> DispatchStatus {
        if !payload.matches(event_type) {
            warn!(kind = %event_type, "Payload does not match event type");
            self.bridge.report(
                ErrorCode::InternalError,
                format!("Unexpected payload for {} callback.", event_type.payload_name()),
                cookie,
            );
            return DispatchStatus::Rejected(upnp_codes::UPNP_E_INVALID_PARAM);
        }

        match payload {
            EventPayload::Discovery(_)
            | EventPayload::ActionComplete(_)
            | EventPayload::StateVarComplete(_)
            | EventPayload::Event(_)
            | EventPayload::EventSubscribe(_) => {
                self.bridge.deliver_fire_and_forget(event_type, &payload, cookie);
                DispatchStatus::Continue
            }
            EventPayload::SubscriptionRequest(request) => {
                self.subscription_request(event_type, request, cookie)
            }
            EventPayload::ActionRequest(request) => self.action_request(event_type, request, cookie),
            EventPayload::StateVarRequest(request) => state_var_request(request),
        }
    }

    fn subscription_request(
        &self,
        event_type: EventType,
        request: &SubscriptionRequest,
        cookie: Option<usize>,
    ) -> DispatchStatus {
        let reply = self.bridge.deliver_request(
            event_type,
            &EventPayload::SubscriptionRequest(request),
            cookie,
        );

        let (device, variables) = match reply {
            Ok(Reply::Subscription { device, variables }) => (device, variables),
            Ok(other) => {
                self.bridge.report(
                    ErrorCode::InternalError,
                    format!("Unexpected reply for {}: {:?}", event_type.payload_name(), other),
                    cookie,
                );
                return DispatchStatus::Rejected(upnp_codes::UPNP_E_SUBSCRIBE_UNACCEPTED);
            }
            Err(err) => {
                // already reported by the bridge
                debug!(kind = %event_type, error = %err, "Subscription not accepted");
                return DispatchStatus::Rejected(upnp_codes::UPNP_E_SUBSCRIBE_UNACCEPTED);
            }
        };

        let property_set = match self.property_set(&variables) {
            Ok(doc) => doc,
            Err(code) => {
                self.bridge
                    .report(ErrorCode::ProtocolFailure, SUBSCRIPTION_DATA_ERROR, cookie);
                return DispatchStatus::Rejected(code);
            }
        };

        let rc = self.engine.accept_subscription(
            device,
            &request.udn,
            &request.service_id,
            property_set.handle(),
            &request.sid,
        );
        // property set is freed when the guard drops
        drop(property_set);

        if rc == upnp_codes::UPNP_E_SUCCESS {
            DispatchStatus::Continue
        } else {
            self.bridge.report(
                ErrorCode::ProtocolFailure,
                format!("Accepting subscription failed: {}", upnp_error_message(rc)),
                cookie,
            );
            DispatchStatus::Rejected(rc)
        }
    }

    /// Build a property set holding `variables` in order (empty set if none)
    fn property_set(&self, variables: &[(String, String)]) -> Result<OwnedDocument, i32> {
        let mut doc: Option<NativeHandle> = None;
        for (name, value) in variables {
            let rc = self
                .engine
                .add_to_property_set(&mut doc, Some((name.as_str(), value.as_str())));
            if rc != upnp_codes::UPNP_E_SUCCESS {
                if let Some(d) = doc {
                    self.dom.free(d);
                }
                return Err(rc);
            }
        }
        if doc.is_none() {
            self.engine.add_to_property_set(&mut doc, None);
        }
        doc.map(|d| OwnedDocument::adopt(&self.dom, d))
            .ok_or(upnp_codes::UPNP_E_OUTOF_MEMORY)
    }

    fn action_request(
        &self,
        event_type: EventType,
        request: &mut ActionRequest,
        cookie: Option<usize>,
    ) -> DispatchStatus {
        let reply = self.bridge.deliver_request(
            event_type,
            &EventPayload::ActionRequest(&mut *request),
            cookie,
        );

        match reply {
            Ok(Reply::ActionResult(arguments)) => match self.action_response(request, &arguments) {
                Ok(doc) => {
                    request.action_result = Some(doc);
                    request.err_code = upnp_codes::UPNP_E_SUCCESS;
                    DispatchStatus::Continue
                }
                Err(_) => {
                    self.bridge
                        .report(ErrorCode::ProtocolFailure, ACTION_DATA_ERROR, cookie);
                    fail_action(request, SoftError::action_failed())
                }
            },
            Ok(Reply::ActionError(err)) => fail_action(request, err),
            Ok(other) => {
                self.bridge.report(
                    ErrorCode::InternalError,
                    format!("Unexpected reply for {}: {:?}", event_type.payload_name(), other),
                    cookie,
                );
                fail_action(request, SoftError::action_failed())
            }
            Err(DeliveryError::OutOfMemory(_)) => fail_action(
                request,
                SoftError::new(upnp_codes::SOAP_OUT_OF_MEMORY, "Out of Memory"),
            ),
            Err(err) => {
                debug!(kind = %event_type, error = %err, "Action answered with default failure");
                fail_action(request, SoftError::action_failed())
            }
        }
    }

    /// Build the action response; ownership passes to the engine
    fn action_response(
        &self,
        request: &ActionRequest,
        arguments: &[(String, String)],
    ) -> Result<NativeHandle, i32> {
        let service_type = request
            .action_request
            .and_then(|doc| self.dom.first_child(doc))
            .and_then(|action| self.dom.namespace_uri(action));

        let mut doc: Option<NativeHandle> = None;
        for (name, value) in arguments {
            let rc = self.engine.add_to_action_response(
                &mut doc,
                &request.action_name,
                service_type.as_deref(),
                Some((name.as_str(), value.as_str())),
            );
            if rc != upnp_codes::UPNP_E_SUCCESS {
                if let Some(d) = doc {
                    self.dom.free(d);
                }
                return Err(rc);
            }
        }
        if doc.is_none() {
            self.engine.add_to_action_response(
                &mut doc,
                &request.action_name,
                service_type.as_deref(),
                None,
            );
        }
        doc.ok_or(upnp_codes::UPNP_E_OUTOF_MEMORY)
    }
}

fn fail_action(request: &mut ActionRequest, err: SoftError) -> DispatchStatus {
    request.action_result = None;
    request.err_code = err.code;
    request.err_str = err.message;
    DispatchStatus::Rejected(request.err_code)
}

/// Deprecated by UPnP; always refused without involving the host
fn state_var_request(request: &mut StateVarRequest) -> DispatchStatus {
    request.err_code = upnp_codes::SOAP_INVALID_ACTION;
    request.err_str = upnp_error_message(upnp_codes::SOAP_INVALID_ACTION).to_string();
    request.current_val = None;
    DispatchStatus::Rejected(upnp_codes::SOAP_INVALID_ACTION)
}
