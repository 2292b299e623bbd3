//! In-memory stand-ins for the wrapped native libraries.
//!
//! [`MemoryDom`] implements [`DomLibrary`] with free accounting (so tests can
//! assert "freed at most once") and an optional clone budget to simulate
//! allocation failure mid-copy. [`RecordingEngine`] implements
//! [`ProtocolEngine`] on top of a `MemoryDom` and records what the bridge
//! asked it to do.

use crate::error::upnp_codes;
use crate::native::{DomLibrary, FreeHook, NativeHandle, NodeType, ProtocolEngine, ProxyId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct NodeData {
    node_type: NodeType,
    name: String,
    value: Option<String>,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<usize>,
    parent: Option<usize>,
    owner_document: Option<usize>,
    tag: Option<ProxyId>,
}

impl NodeData {
    fn new(node_type: NodeType, name: &str, owner_document: Option<usize>) -> Self {
        Self {
            node_type,
            name: name.to_string(),
            value: None,
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
            owner_document,
            tag: None,
        }
    }
}

#[derive(Default)]
struct DomState {
    nodes: HashMap<usize, NodeData>,
    free_counts: HashMap<usize, usize>,
    double_frees: usize,
    clone_budget: Option<usize>,
}

/// Thread-safe in-memory DOM
pub struct MemoryDom {
    state: Mutex<DomState>,
    hook: RwLock<Option<FreeHook>>,
    next_id: AtomicUsize,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    /// Create an empty DOM
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DomState::default()),
            hook: RwLock::new(None),
            next_id: AtomicUsize::new(0x1000),
        }
    }

    fn alloc(&self, state: &mut DomState, data: NodeData) -> usize {
        let id = self.next_id.fetch_add(8, Ordering::Relaxed);
        state.nodes.insert(id, data);
        id
    }

    /// Create an empty document
    pub fn create_document(&self) -> NativeHandle {
        let mut state = self.state.lock();
        NativeHandle(self.alloc(&mut state, NodeData::new(NodeType::Document, "#document", None)))
    }

    /// Create an element owned by `doc`
    pub fn create_element(&self, doc: NativeHandle, name: &str, namespace: Option<&str>) -> NativeHandle {
        let mut state = self.state.lock();
        let mut data = NodeData::new(NodeType::Element, name, Some(doc.0));
        data.namespace = namespace.map(str::to_string);
        NativeHandle(self.alloc(&mut state, data))
    }

    /// Create a text node owned by `doc`
    pub fn create_text(&self, doc: NativeHandle, value: &str) -> NativeHandle {
        let mut state = self.state.lock();
        let mut data = NodeData::new(NodeType::Text, "#text", Some(doc.0));
        data.value = Some(value.to_string());
        NativeHandle(self.alloc(&mut state, data))
    }

    /// Create an element that belongs to no document
    pub fn create_detached_element(&self, name: &str) -> NativeHandle {
        let mut state = self.state.lock();
        NativeHandle(self.alloc(&mut state, NodeData::new(NodeType::Element, name, None)))
    }

    /// Append `child` to `parent`
    pub fn append_child(&self, parent: NativeHandle, child: NativeHandle) {
        let mut state = self.state.lock();
        if let Some(c) = state.nodes.get_mut(&child.0) {
            c.parent = Some(parent.0);
        }
        if let Some(p) = state.nodes.get_mut(&parent.0) {
            p.children.push(child.0);
        }
    }

    /// Set an attribute on an element
    pub fn set_attribute(&self, element: NativeHandle, name: &str, value: &str) {
        if let Some(e) = self.state.lock().nodes.get_mut(&element.0) {
            e.attributes.push((name.to_string(), value.to_string()));
        }
    }

    /// Convenience: append `<name>text</name>` under `parent`, returning the element
    pub fn append_text_element(&self, doc: NativeHandle, parent: NativeHandle, name: &str, text: &str) -> NativeHandle {
        let element = self.create_element(doc, name, None);
        let value = self.create_text(doc, text);
        self.append_child(element, value);
        self.append_child(parent, element);
        element
    }

    /// Whether a handle refers to a live node
    pub fn is_live(&self, node: NativeHandle) -> bool {
        self.state.lock().nodes.contains_key(&node.0)
    }

    /// Number of live nodes
    pub fn live_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// How many times a handle was freed
    pub fn free_count(&self, node: NativeHandle) -> usize {
        self.state.lock().free_counts.get(&node.0).copied().unwrap_or(0)
    }

    /// Number of frees of already-freed handles
    pub fn double_frees(&self) -> usize {
        self.state.lock().double_frees
    }

    /// Allow only `budget` more successful `clone_tree` calls (`None` = unlimited)
    pub fn set_clone_budget(&self, budget: Option<usize>) {
        self.state.lock().clone_budget = budget;
    }

    /// Read back `(name, value)` pairs from a property set document
    pub fn property_set_variables(&self, doc: NativeHandle) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let Some(root) = self.first_child(doc) else {
            return out;
        };
        let mut property = self.first_child(root);
        while let Some(p) = property {
            if let Some(var) = self.first_child(p) {
                let name = self.node_name(var).unwrap_or_default();
                let value = self
                    .first_child(var)
                    .and_then(|t| self.node_value(t))
                    .unwrap_or_default();
                out.push((name, value));
            }
            property = self.next_sibling(p);
        }
        out
    }

    /// Read back `(name, value)` pairs from an action response document
    pub fn action_response_arguments(&self, doc: NativeHandle) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let Some(root) = self.first_child(doc) else {
            return out;
        };
        let mut arg = self.first_child(root);
        while let Some(a) = arg {
            let name = self.node_name(a).unwrap_or_default();
            let value = self
                .first_child(a)
                .and_then(|t| self.node_value(t))
                .unwrap_or_default();
            out.push((name, value));
            arg = self.next_sibling(a);
        }
        out
    }

    fn subtree(state: &DomState, root: usize, out: &mut Vec<usize>) {
        if let Some(node) = state.nodes.get(&root) {
            for child in &node.children {
                Self::subtree(state, *child, out);
            }
            out.push(root);
        }
    }

    fn copy_subtree(&self, state: &mut DomState, src: usize, parent: Option<usize>, owner: Option<usize>) -> usize {
        let mut data = match state.nodes.get(&src) {
            Some(n) => n.clone(),
            None => return 0,
        };
        let children = std::mem::take(&mut data.children);
        data.parent = parent;
        data.owner_document = owner;
        data.tag = None;
        let id = self.alloc(state, data);
        // a cloned document owns its own descendants
        let child_owner = if state.nodes[&id].node_type == NodeType::Document {
            Some(id)
        } else {
            owner
        };
        for child in children {
            let copied = self.copy_subtree(state, child, Some(id), child_owner.or(Some(id)));
            if let Some(n) = state.nodes.get_mut(&id) {
                n.children.push(copied);
            }
        }
        id
    }
}

impl DomLibrary for MemoryDom {
    fn set_free_hook(&self, hook: FreeHook) {
        *self.hook.write() = Some(hook);
    }

    fn custom_tag(&self, node: NativeHandle) -> Option<ProxyId> {
        self.state.lock().nodes.get(&node.0).and_then(|n| n.tag)
    }

    fn set_custom_tag(&self, node: NativeHandle, tag: Option<ProxyId>) {
        if let Some(n) = self.state.lock().nodes.get_mut(&node.0) {
            n.tag = tag;
        }
    }

    fn node_type(&self, node: NativeHandle) -> Option<NodeType> {
        self.state.lock().nodes.get(&node.0).map(|n| n.node_type)
    }

    fn has_owner(&self, node: NativeHandle) -> bool {
        self.state
            .lock()
            .nodes
            .get(&node.0)
            .map(|n| n.parent.is_some() || n.owner_document.is_some())
            .unwrap_or(false)
    }

    fn clone_tree(&self, node: NativeHandle) -> Result<NativeHandle, i32> {
        let mut state = self.state.lock();
        match state.clone_budget {
            Some(0) => return Err(upnp_codes::UPNP_E_OUTOF_MEMORY),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        if !state.nodes.contains_key(&node.0) {
            return Err(upnp_codes::UPNP_E_INVALID_PARAM);
        }
        Ok(NativeHandle(self.copy_subtree(&mut state, node.0, None, None)))
    }

    fn free(&self, node: NativeHandle) {
        let ids = {
            let mut state = self.state.lock();
            if !state.nodes.contains_key(&node.0) {
                state.double_frees += 1;
                *state.free_counts.entry(node.0).or_insert(0) += 1;
                return;
            }
            let mut ids = Vec::new();
            Self::subtree(&state, node.0, &mut ids);
            ids
        };

        // hook runs without the state lock, it reads tags back
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            for id in &ids {
                hook(NativeHandle(*id));
            }
        }

        let mut state = self.state.lock();
        let parent = state.nodes.get(&node.0).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| state.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != node.0);
        }
        for id in ids {
            state.nodes.remove(&id);
            *state.free_counts.entry(id).or_insert(0) += 1;
        }
    }

    fn first_child(&self, node: NativeHandle) -> Option<NativeHandle> {
        self.state
            .lock()
            .nodes
            .get(&node.0)
            .and_then(|n| n.children.first().copied())
            .map(NativeHandle)
    }

    fn next_sibling(&self, node: NativeHandle) -> Option<NativeHandle> {
        let state = self.state.lock();
        let parent = state.nodes.get(&node.0)?.parent?;
        let siblings = &state.nodes.get(&parent)?.children;
        let pos = siblings.iter().position(|c| *c == node.0)?;
        siblings.get(pos + 1).copied().map(NativeHandle)
    }

    fn node_name(&self, node: NativeHandle) -> Option<String> {
        self.state.lock().nodes.get(&node.0).map(|n| n.name.clone())
    }

    fn node_value(&self, node: NativeHandle) -> Option<String> {
        self.state.lock().nodes.get(&node.0).and_then(|n| n.value.clone())
    }

    fn namespace_uri(&self, node: NativeHandle) -> Option<String> {
        self.state.lock().nodes.get(&node.0).and_then(|n| n.namespace.clone())
    }

    fn has_attributes(&self, node: NativeHandle) -> bool {
        self.state
            .lock()
            .nodes
            .get(&node.0)
            .map(|n| !n.attributes.is_empty())
            .unwrap_or(false)
    }
}

/// A subscription the engine was asked to accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedSubscription {
    /// Device handle
    pub device: NativeHandle,
    /// Device UDN
    pub udn: String,
    /// Service id
    pub service_id: String,
    /// Variables read back from the property set, in document order
    pub variables: Vec<(String, String)>,
    /// Subscription id
    pub sid: String,
}

/// Protocol engine stand-in that builds real documents in a [`MemoryDom`]
pub struct RecordingEngine {
    dom: Arc<MemoryDom>,
    started: AtomicBool,
    accepted: Mutex<Vec<AcceptedSubscription>>,
    unregistered_devices: Mutex<Vec<NativeHandle>>,
    unregistered_clients: Mutex<Vec<NativeHandle>>,
}

impl RecordingEngine {
    /// Create a started engine over `dom`
    pub fn new(dom: Arc<MemoryDom>) -> Self {
        Self {
            dom,
            started: AtomicBool::new(true),
            accepted: Mutex::new(Vec::new()),
            unregistered_devices: Mutex::new(Vec::new()),
            unregistered_clients: Mutex::new(Vec::new()),
        }
    }

    /// Mark the engine finished (or started again)
    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    /// Subscriptions accepted so far
    pub fn accepted(&self) -> Vec<AcceptedSubscription> {
        self.accepted.lock().clone()
    }

    /// Devices unregistered so far
    pub fn unregistered_devices(&self) -> Vec<NativeHandle> {
        self.unregistered_devices.lock().clone()
    }

    /// Clients unregistered so far
    pub fn unregistered_clients(&self) -> Vec<NativeHandle> {
        self.unregistered_clients.lock().clone()
    }
}

impl ProtocolEngine for RecordingEngine {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn unregister_root_device(&self, device: NativeHandle) -> i32 {
        self.unregistered_devices.lock().push(device);
        upnp_codes::UPNP_E_SUCCESS
    }

    fn unregister_client(&self, client: NativeHandle) -> i32 {
        self.unregistered_clients.lock().push(client);
        upnp_codes::UPNP_E_SUCCESS
    }

    fn add_to_property_set(&self, doc: &mut Option<NativeHandle>, variable: Option<(&str, &str)>) -> i32 {
        if let Some((name, _)) = variable {
            if name.is_empty() {
                return upnp_codes::UPNP_E_INVALID_PARAM;
            }
        }
        let d = *doc.get_or_insert_with(|| {
            let d = self.dom.create_document();
            let root = self.dom.create_element(d, "e:propertyset", Some("urn:schemas-upnp-org:event-1-0"));
            self.dom.append_child(d, root);
            d
        });
        if let Some((name, value)) = variable {
            let root = match self.dom.first_child(d) {
                Some(r) => r,
                None => return upnp_codes::UPNP_E_INVALID_PARAM,
            };
            let property = self.dom.create_element(d, "e:property", None);
            self.dom.append_child(root, property);
            self.dom.append_text_element(d, property, name, value);
        }
        upnp_codes::UPNP_E_SUCCESS
    }

    fn add_to_action_response(
        &self,
        doc: &mut Option<NativeHandle>,
        action_name: &str,
        service_type: Option<&str>,
        argument: Option<(&str, &str)>,
    ) -> i32 {
        if let Some((name, _)) = argument {
            if name.is_empty() {
                return upnp_codes::UPNP_E_INVALID_PARAM;
            }
        }
        let d = *doc.get_or_insert_with(|| {
            let d = self.dom.create_document();
            let root = self
                .dom
                .create_element(d, &format!("u:{}Response", action_name), service_type);
            self.dom.append_child(d, root);
            d
        });
        if let Some((name, value)) = argument {
            let root = match self.dom.first_child(d) {
                Some(r) => r,
                None => return upnp_codes::UPNP_E_INVALID_PARAM,
            };
            self.dom.append_text_element(d, root, name, value);
        }
        upnp_codes::UPNP_E_SUCCESS
    }

    fn accept_subscription(
        &self,
        device: NativeHandle,
        udn: &str,
        service_id: &str,
        property_set: NativeHandle,
        sid: &str,
    ) -> i32 {
        if !self.is_started() {
            return upnp_codes::UPNP_E_FINISH;
        }
        self.accepted.lock().push(AcceptedSubscription {
            device,
            udn: udn.to_string(),
            service_id: service_id.to_string(),
            variables: self.dom.property_set_variables(property_set),
            sid: sid.to_string(),
        });
        upnp_codes::UPNP_E_SUCCESS
    }
}
