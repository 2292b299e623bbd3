//! Contracts of the wrapped native libraries.
//!
//! The protocol engine and the DOM library are black boxes. The bridge only
//! needs the narrow surface below; embedders implement these traits over the
//! real FFI, and [`crate::testing`] provides in-memory stand-ins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier of a library-owned resource (node pointer, device or client handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeHandle(pub usize);

impl NativeHandle {
    /// The raw value
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Stable identifier of a proxy, stored in the native object's custom tag slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId(Uuid);

impl ProxyId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProxyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of native resource a proxy stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// A DOM node (document, element, attribute, ...)
    Node,
    /// A registered root device
    Device,
    /// A registered control point
    Client,
}

impl ProxyKind {
    /// Name used in host-visible strings
    pub fn name(self) -> &'static str {
        match self {
            ProxyKind::Node => "IXMLnode",
            ProxyKind::Device => "UPnPdevice",
            ProxyKind::Client => "UPnPclient",
        }
    }
}

/// DOM node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Element
    Element,
    /// Attribute
    Attribute,
    /// Text
    Text,
    /// CDATA section
    CDataSection,
    /// Document
    Document,
    /// Anything else (comments, processing instructions, ...)
    Other,
}

impl NodeType {
    /// Host-visible type name
    pub fn name(self) -> &'static str {
        match self {
            NodeType::Element => "ELEMENT_NODE",
            NodeType::Attribute => "ATTRIBUTE_NODE",
            NodeType::Text => "TEXT_NODE",
            NodeType::CDataSection => "CDATA_SECTION_NODE",
            NodeType::Document => "DOCUMENT_NODE",
            NodeType::Other => "INVALID_NODE",
        }
    }
}

/// Hook the DOM library calls immediately before it frees a node
pub type FreeHook = Arc<dyn Fn(NativeHandle) + Send + Sync>;

/// Surface of the wrapped DOM library used by the registry and the marshaler.
pub trait DomLibrary: Send + Sync {
    /// Register the pre-free hook (called for every node about to be freed)
    fn set_free_hook(&self, hook: FreeHook);

    /// Read the custom tag slot of a node
    fn custom_tag(&self, node: NativeHandle) -> Option<ProxyId>;

    /// Write the custom tag slot of a node
    fn set_custom_tag(&self, node: NativeHandle, tag: Option<ProxyId>);

    /// Type of a node, `None` if the handle is not a live node
    fn node_type(&self, node: NativeHandle) -> Option<NodeType>;

    /// Whether the node belongs to a document (and so is freed with it)
    fn has_owner(&self, node: NativeHandle) -> bool;

    /// Deep-copy a node and its subtree into a new, ownerless tree.
    ///
    /// `Err` carries the library's status code (e.g. out of memory).
    fn clone_tree(&self, node: NativeHandle) -> Result<NativeHandle, i32>;

    /// Free a node and its subtree, calling the pre-free hook for each node
    fn free(&self, node: NativeHandle);

    /// First child of a node
    fn first_child(&self, node: NativeHandle) -> Option<NativeHandle>;

    /// Next sibling of a node
    fn next_sibling(&self, node: NativeHandle) -> Option<NativeHandle>;

    /// Node name
    fn node_name(&self, node: NativeHandle) -> Option<String>;

    /// Node value (text content for text nodes)
    fn node_value(&self, node: NativeHandle) -> Option<String>;

    /// Namespace URI of an element
    fn namespace_uri(&self, node: NativeHandle) -> Option<String>;

    /// Whether an element carries attributes
    fn has_attributes(&self, node: NativeHandle) -> bool;
}

/// Surface of the wrapped protocol engine used when translating replies and releasing handles.
pub trait ProtocolEngine: Send + Sync {
    /// Whether the engine is initialized and its handles are usable
    fn is_started(&self) -> bool;

    /// Unregister a root device (called when its proxy is released)
    fn unregister_root_device(&self, device: NativeHandle) -> i32;

    /// Unregister a control point (called when its proxy is released)
    fn unregister_client(&self, client: NativeHandle) -> i32;

    /// Add a variable to a property set document, creating it when `doc` is `None`.
    ///
    /// `variable == None` only creates the (empty) document.
    fn add_to_property_set(
        &self,
        doc: &mut Option<NativeHandle>,
        variable: Option<(&str, &str)>,
    ) -> i32;

    /// Add an argument to an action response document, creating it when `doc` is `None`.
    ///
    /// `argument == None` only creates the (empty) response.
    fn add_to_action_response(
        &self,
        doc: &mut Option<NativeHandle>,
        action_name: &str,
        service_type: Option<&str>,
        argument: Option<(&str, &str)>,
    ) -> i32;

    /// Accept a subscription, sending the initial property set
    fn accept_subscription(
        &self,
        device: NativeHandle,
        udn: &str,
        service_id: &str,
        property_set: NativeHandle,
        sid: &str,
    ) -> i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(NativeHandle(255).to_string(), "0xff");
    }

    #[test]
    fn test_proxy_ids_are_unique() {
        assert_ne!(ProxyId::new(), ProxyId::new());
    }

    #[test]
    fn test_kind_and_node_type_names() {
        assert_eq!(ProxyKind::Device.name(), "UPnPdevice");
        assert_eq!(NodeType::Document.name(), "DOCUMENT_NODE");
    }
}
