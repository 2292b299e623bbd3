//! Validation of handler return values for request events.
//!
//! The host returns loosely typed values; this module turns them into a
//! [`Reply`] the dispatch table can hand to the engine, or a [`SoftError`]
//! describing why the shape was rejected. Validation runs on the host thread
//! because device proxies must be dereferenced there.

use super::HostValue;
use crate::error::{upnp_codes, SoftError};
use crate::events::EventType;
use crate::native::NativeHandle;

/// A validated reply to a request event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Accept a subscription, sending these initial variable values
    Subscription {
        /// Device the subscription is accepted for
        device: NativeHandle,
        /// `(name, value)` pairs in host order
        variables: Vec<(String, String)>,
    },
    /// Successful action with its output arguments in host order
    ActionResult(Vec<(String, String)>),
    /// UPnP error for an action
    ActionError(SoftError),
}

/// Message for a malformed subscription reply
pub const SUBSCRIPTION_SHAPE_ERROR: &str =
    "Error: expected a Device and 2 tables (with variable names and values) as parameters";
/// Message for bad subscription variables
pub const SUBSCRIPTION_DATA_ERROR: &str =
    "Error: Invalid data in StateVariable tables provided to SubscriptionRequest";
/// Message for a malformed action reply
pub const ACTION_SHAPE_ERROR: &str =
    "Error: expected 2 tables (argument names and values) as parameters, or errornumber and errorstring";
/// Message for bad action arguments
pub const ACTION_DATA_ERROR: &str =
    "Error: Invalid data in name/value table provided to ActionRequest";

/// Validate the handler's return values for a request event.
///
/// Fire-and-forget kinds have no reply and are rejected.
pub fn decode_reply(event_type: EventType, mut values: Vec<HostValue>) -> Result<Reply, SoftError> {
    match event_type {
        EventType::EventSubscriptionRequest => {
            if values.is_empty() {
                return Err(shape_error(SUBSCRIPTION_SHAPE_ERROR));
            }
            pad_with_empty_arrays(&mut values, 3);
            let device = values[0]
                .as_proxy()
                .and_then(|p| p.get_device())
                .ok_or_else(|| shape_error(SUBSCRIPTION_SHAPE_ERROR))?;
            let variables = zip_pairs(
                &values[1],
                &values[2],
                SUBSCRIPTION_SHAPE_ERROR,
                SUBSCRIPTION_DATA_ERROR,
            )?;
            Ok(Reply::Subscription { device, variables })
        }
        EventType::ControlActionRequest => {
            if let [HostValue::Integer(code), HostValue::String(message)] = values.as_slice() {
                let code = i32::try_from(*code).map_err(|_| shape_error(ACTION_SHAPE_ERROR))?;
                return Ok(Reply::ActionError(SoftError::new(code, message.clone())));
            }
            pad_with_empty_arrays(&mut values, 2);
            let arguments = zip_pairs(&values[0], &values[1], ACTION_SHAPE_ERROR, ACTION_DATA_ERROR)?;
            Ok(Reply::ActionResult(arguments))
        }
        EventType::ControlActionComplete
        | EventType::ControlGetVarRequest
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
        | EventType::EventSubscriptionExpired => Err(SoftError::new(
            upnp_codes::UPNP_E_INVALID_PARAM,
            format!("{} takes no reply", event_type),
        )),
    }
}

fn shape_error(message: &str) -> SoftError {
    SoftError::new(upnp_codes::UPNP_E_INVALID_PARAM, message)
}

fn pad_with_empty_arrays(values: &mut Vec<HostValue>, len: usize) {
    while values.len() < len {
        values.push(HostValue::Array(Vec::new()));
    }
}

/// Pair up a names array with a values array, stopping at the first missing name
fn zip_pairs(
    names: &HostValue,
    values: &HostValue,
    shape_message: &str,
    data_message: &str,
) -> Result<Vec<(String, String)>, SoftError> {
    let (Some(names), Some(values)) = (names.as_array(), values.as_array()) else {
        return Err(shape_error(shape_message));
    };

    let mut pairs = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if name.is_nil() {
            break;
        }
        let name = name.to_text().filter(|n| !n.is_empty());
        let value = values.get(i).and_then(HostValue::to_text);
        match (name, value) {
            (Some(name), Some(value)) => pairs.push((name, value)),
            _ => return Err(shape_error(data_message)),
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ProxyKind;
    use crate::registry::ProxyRegistry;
    use crate::testing::{MemoryDom, RecordingEngine};
    use std::sync::Arc;

    fn registry() -> ProxyRegistry {
        let dom = Arc::new(MemoryDom::new());
        let engine = Arc::new(RecordingEngine::new(Arc::clone(&dom)));
        ProxyRegistry::new(dom, engine)
    }

    #[test]
    fn test_subscription_reply() {
        let registry = registry();
        let device = registry.lookup_or_create(ProxyKind::Device, NativeHandle(7));
        let reply = decode_reply(
            EventType::EventSubscriptionRequest,
            vec![
                device.into(),
                vec!["A", "B"].into(),
                HostValue::Array(vec!["1".into(), 2i64.into()]),
            ],
        )
        .unwrap();
        assert_eq!(
            reply,
            Reply::Subscription {
                device: NativeHandle(7),
                variables: vec![("A".into(), "1".into()), ("B".into(), "2".into())],
            }
        );
    }

    #[test]
    fn test_subscription_tables_default_to_empty() {
        let registry = registry();
        let device = registry.lookup_or_create(ProxyKind::Device, NativeHandle(7));
        let reply = decode_reply(EventType::EventSubscriptionRequest, vec![device.into()]).unwrap();
        assert_eq!(
            reply,
            Reply::Subscription {
                device: NativeHandle(7),
                variables: vec![],
            }
        );
    }

    #[test]
    fn test_subscription_requires_device() {
        let registry = registry();
        let client = registry.lookup_or_create(ProxyKind::Client, NativeHandle(7));
        let err = decode_reply(EventType::EventSubscriptionRequest, vec![client.into()]).unwrap_err();
        assert_eq!(err.message, SUBSCRIPTION_SHAPE_ERROR);

        let err = decode_reply(EventType::EventSubscriptionRequest, vec![]).unwrap_err();
        assert_eq!(err.message, SUBSCRIPTION_SHAPE_ERROR);
    }

    #[test]
    fn test_subscription_missing_value_is_invalid_data() {
        let registry = registry();
        let device = registry.lookup_or_create(ProxyKind::Device, NativeHandle(7));
        let err = decode_reply(
            EventType::EventSubscriptionRequest,
            vec![device.into(), vec!["A", "B"].into(), vec!["1"].into()],
        )
        .unwrap_err();
        assert_eq!(err.message, SUBSCRIPTION_DATA_ERROR);
    }

    #[test]
    fn test_action_result_and_error() {
        let reply = decode_reply(
            EventType::ControlActionRequest,
            vec![vec!["Result"].into(), vec!["ok"].into()],
        )
        .unwrap();
        assert_eq!(reply, Reply::ActionResult(vec![("Result".into(), "ok".into())]));

        let reply = decode_reply(
            EventType::ControlActionRequest,
            vec![402i64.into(), "Invalid Args".into()],
        )
        .unwrap();
        assert_eq!(reply, Reply::ActionError(SoftError::new(402, "Invalid Args")));

        let reply = decode_reply(EventType::ControlActionRequest, vec![]).unwrap();
        assert_eq!(reply, Reply::ActionResult(vec![]));
    }

    #[test]
    fn test_action_bad_shape() {
        let err = decode_reply(
            EventType::ControlActionRequest,
            vec!["oops".into(), HostValue::Bool(true)],
        )
        .unwrap_err();
        assert_eq!(err.message, ACTION_SHAPE_ERROR);
    }

    #[test]
    fn test_fire_and_forget_takes_no_reply() {
        assert!(decode_reply(EventType::DiscoverySearchResult, vec![]).is_err());
    }
}
