//! Proxy registry.
//!
//! Gives native handles a stable identity on the host side: the same native
//! object always crosses as the same [`Proxy`] while that proxy is alive. The
//! registry holds only weak references; host reachability decides lifetime.
//!
//! Invalidation protocol:
//!
//! - native → proxy: the DOM library calls the pre-free hook, which finds the
//!   proxy through the node's custom tag (devices and clients have no tag
//!   slot and fall back to the keyed table), removes the table key and nulls
//!   the proxy's handle.
//! - proxy → native: dropping the last [`Proxy`] clone releases the handle,
//!   freeing it only when nothing else owns it.
//!
//! Each proxy's handle lives behind a mutex shared by host accessors and
//! invalidation, so the native side can never free a node while a host
//! accessor is reading it. Invalidation, release and lookup-or-create of one
//! handle are serialized by its table entry lock; the proxy mutex is only ever
//! taken inside that lock (lock order: table entry, proxy, DOM library).
//! Whichever of invalidation and release sees the live handle first decides
//! its fate, and the other finds it gone.

use crate::error::ContractViolation;
use crate::native::{DomLibrary, NativeHandle, NodeType, ProtocolEngine, ProxyId, ProxyKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

type Key = (ProxyKind, NativeHandle);

struct ProxyCell {
    id: ProxyId,
    kind: ProxyKind,
    native: NativeHandle,
    handle: Mutex<Option<NativeHandle>>,
}

impl ProxyCell {
    fn key(&self) -> Key {
        (self.kind, self.native)
    }
}

struct Slot {
    cell: Arc<ProxyCell>,
    proxy: Weak<ProxyInner>,
}

struct ProxyInner {
    cell: Arc<ProxyCell>,
    registry: Weak<RegistryInner>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.cell);
        }
    }
}

/// Host-visible stand-in for one native handle
#[derive(Clone)]
pub struct Proxy(Arc<ProxyInner>);

impl Proxy {
    /// Stable identifier
    pub fn id(&self) -> ProxyId {
        self.0.cell.id
    }

    /// Kind of native object
    pub fn kind(&self) -> ProxyKind {
        self.0.cell.kind
    }

    /// Whether the native object was freed out from under this proxy
    pub fn is_tombstoned(&self) -> bool {
        self.0.cell.handle.lock().is_none()
    }

    /// Whether two proxies are the same object
    pub fn same(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The native handle, or a hard error if it was invalidated.
    ///
    /// For devices and clients this also fails once the engine has finished.
    pub fn handle(&self) -> Result<NativeHandle, ContractViolation> {
        self.with_handle(|h| h)
    }

    /// Run `f` with the live handle; invalidation of this handle waits until `f` returns.
    ///
    /// `f` must not free the handle, call back into the registry, or drop proxies.
    pub fn with_handle<R>(&self, f: impl FnOnce(NativeHandle) -> R) -> Result<R, ContractViolation> {
        let guard = self.0.cell.handle.lock();
        let handle = (*guard).ok_or(ContractViolation::Tombstoned)?;
        if self.kind() != ProxyKind::Node {
            let started = self
                .0
                .registry
                .upgrade()
                .map(|r| r.engine.is_started())
                .unwrap_or(false);
            if !started {
                return Err(ContractViolation::EngineFinished);
            }
        }
        Ok(f(handle))
    }

    fn check_kind(&self, kind: ProxyKind) -> Result<(), ContractViolation> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(ContractViolation::WrongKind {
                expected: kind.name(),
            })
        }
    }

    fn check_node_type(&self, expected: NodeType) -> Result<NativeHandle, ContractViolation> {
        self.check_kind(ProxyKind::Node)?;
        let registry = self.0.registry.upgrade().ok_or(ContractViolation::Tombstoned)?;
        let (handle, actual) = self.with_handle(|h| (h, registry.dom.node_type(h)))?;
        match actual {
            Some(t) if t == expected => Ok(handle),
            Some(_) => Err(ContractViolation::WrongNodeType {
                expected: expected.name(),
            }),
            None => Err(ContractViolation::Tombstoned),
        }
    }

    /// Any live node
    pub fn check_node(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_kind(ProxyKind::Node)?;
        self.handle()
    }

    /// A live element
    pub fn check_element(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_node_type(NodeType::Element)
    }

    /// A live document
    pub fn check_document(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_node_type(NodeType::Document)
    }

    /// A live attribute
    pub fn check_attr(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_node_type(NodeType::Attribute)
    }

    /// A live CDATA section
    pub fn check_cdata(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_node_type(NodeType::CDataSection)
    }

    /// A live device registration
    pub fn check_device(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_kind(ProxyKind::Device)?;
        self.handle()
    }

    /// A live client registration
    pub fn check_client(&self) -> Result<NativeHandle, ContractViolation> {
        self.check_kind(ProxyKind::Client)?;
        self.handle()
    }

    /// Soft variant of [`Proxy::check_device`]
    pub fn get_device(&self) -> Option<NativeHandle> {
        self.check_device().ok()
    }

    /// Soft variant of [`Proxy::check_client`]
    pub fn get_client(&self) -> Option<NativeHandle> {
        self.check_client().ok()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("handle", &*self.0.cell.handle.lock())
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind().name(), self.id())
    }
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Proxies created
    pub created: u64,
    /// Proxies tombstoned by the native side
    pub invalidated: u64,
    /// Proxies released by the host
    pub released: u64,
    /// Native objects freed on release
    pub freed: u64,
}

struct RegistryInner {
    slots: DashMap<Key, Slot>,
    dom: Arc<dyn DomLibrary>,
    engine: Arc<dyn ProtocolEngine>,
    created: AtomicU64,
    invalidated: AtomicU64,
    released: AtomicU64,
    freed: AtomicU64,
}

impl RegistryInner {
    fn invalidate(&self, kind: ProxyKind, handle: NativeHandle) -> bool {
        let Entry::Occupied(entry) = self.slots.entry((kind, handle)) else {
            return false;
        };

        let was_live = {
            let mut live = entry.get().cell.handle.lock();
            let was_live = live.take().is_some();
            if was_live && kind == ProxyKind::Node {
                self.dom.set_custom_tag(handle, None);
            }
            was_live
        };
        entry.remove();

        if was_live {
            self.invalidated.fetch_add(1, Ordering::Relaxed);
            trace!(kind = ?kind, handle = %handle, "Proxy invalidated");
        }
        was_live
    }

    fn release(&self, cell: &Arc<ProxyCell>) {
        self.released.fetch_add(1, Ordering::Relaxed);

        let owned = match self.slots.entry(cell.key()) {
            Entry::Occupied(entry) if Arc::ptr_eq(&entry.get().cell, cell) => {
                let taken = cell.handle.lock().take();
                let owned = taken.filter(|h| self.owns(cell, *h));
                entry.remove();
                owned
            }
            // invalidated already, or a newer proxy took the handle over
            _ => {
                cell.handle.lock().take();
                None
            }
        };

        // freeing runs the pre-free hook, which needs the entry lock back
        let Some(handle) = owned else {
            trace!(id = %cell.id, "Released proxy owned nothing");
            return;
        };
        match cell.kind {
            ProxyKind::Node => {
                debug!(handle = %handle, "Freeing ownerless node");
                self.dom.free(handle);
            }
            ProxyKind::Device => {
                self.engine.unregister_root_device(handle);
            }
            ProxyKind::Client => {
                self.engine.unregister_client(handle);
            }
        }
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether releasing `cell` must free `handle`; clears the node's back-reference.
    fn owns(&self, cell: &ProxyCell, handle: NativeHandle) -> bool {
        match cell.kind {
            ProxyKind::Node => {
                if self.dom.custom_tag(handle) != Some(cell.id) {
                    warn!(handle = %handle, "Node tag does not point at released proxy; not freeing");
                    return false;
                }
                self.dom.set_custom_tag(handle, None);
                !self.dom.has_owner(handle)
            }
            ProxyKind::Device | ProxyKind::Client => self.engine.is_started(),
        }
    }
}

/// Weak cache from native handles to their canonical proxies
#[derive(Clone)]
pub struct ProxyRegistry {
    inner: Arc<RegistryInner>,
}

impl ProxyRegistry {
    /// Create a registry and install its invalidation hook in the DOM library
    pub fn new(dom: Arc<dyn DomLibrary>, engine: Arc<dyn ProtocolEngine>) -> Self {
        let inner = Arc::new(RegistryInner {
            slots: DashMap::new(),
            dom: Arc::clone(&dom),
            engine,
            created: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            released: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        dom.set_free_hook(Arc::new(move |node| {
            if let Some(registry) = weak.upgrade() {
                registry.invalidate(ProxyKind::Node, node);
            }
        }));

        Self { inner }
    }

    /// The DOM library this registry proxies
    pub fn dom(&self) -> &Arc<dyn DomLibrary> {
        &self.inner.dom
    }

    /// The protocol engine devices and clients belong to
    pub fn engine(&self) -> &Arc<dyn ProtocolEngine> {
        &self.inner.engine
    }

    /// The live proxy for `handle`, creating it if none exists.
    ///
    /// Check-then-insert runs under the table entry lock, so concurrent
    /// callers always agree on one proxy.
    pub fn lookup_or_create(&self, kind: ProxyKind, handle: NativeHandle) -> Proxy {
        match self.inner.slots.entry((kind, handle)) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = occupied.get().proxy.upgrade() {
                    return Proxy(existing);
                }
                // last reference is being dropped right now; its release will
                // see the slot is no longer its own
                let (slot, proxy) = self.new_proxy(kind, handle);
                occupied.insert(slot);
                proxy
            }
            Entry::Vacant(vacant) => {
                let (slot, proxy) = self.new_proxy(kind, handle);
                vacant.insert(slot);
                proxy
            }
        }
    }

    fn new_proxy(&self, kind: ProxyKind, handle: NativeHandle) -> (Slot, Proxy) {
        let cell = Arc::new(ProxyCell {
            id: ProxyId::new(),
            kind,
            native: handle,
            handle: Mutex::new(Some(handle)),
        });
        if kind == ProxyKind::Node {
            self.inner.dom.set_custom_tag(handle, Some(cell.id));
        }
        let inner = Arc::new(ProxyInner {
            cell: Arc::clone(&cell),
            registry: Arc::downgrade(&self.inner),
        });
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        trace!(kind = ?kind, handle = %handle, id = %cell.id, "Proxy created");
        (
            Slot {
                cell,
                proxy: Arc::downgrade(&inner),
            },
            Proxy(inner),
        )
    }

    /// Proxy for a node, or `None` for a null node
    pub fn node(&self, handle: Option<NativeHandle>) -> Option<Proxy> {
        handle.map(|h| self.lookup_or_create(ProxyKind::Node, h))
    }

    /// The live proxy for `handle`, without creating one
    pub fn lookup(&self, kind: ProxyKind, handle: NativeHandle) -> Option<Proxy> {
        self.inner
            .slots
            .get(&(kind, handle))
            .and_then(|slot| slot.proxy.upgrade())
            .map(Proxy)
    }

    /// Tombstone the proxy for `handle`, if any. Safe to repeat.
    pub fn invalidate(&self, kind: ProxyKind, handle: NativeHandle) -> bool {
        self.inner.invalidate(kind, handle)
    }

    /// Tombstone every proxy of `kind` (e.g. all devices once the engine finished)
    pub fn invalidate_kind(&self, kind: ProxyKind) -> usize {
        let handles: Vec<NativeHandle> = self
            .inner
            .slots
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.key().1)
            .collect();
        handles
            .into_iter()
            .filter(|h| self.inner.invalidate(kind, *h))
            .count()
    }

    /// Drop a host reference; returns true if it was the last one and the proxy was released
    pub fn release(&self, proxy: Proxy) -> bool {
        Arc::try_unwrap(proxy.0).is_ok()
    }

    /// Number of table entries (live or mid-release)
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            created: self.inner.created.load(Ordering::Relaxed),
            invalidated: self.inner.invalidated.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            freed: self.inner.freed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDom, RecordingEngine};

    fn setup() -> (Arc<MemoryDom>, Arc<RecordingEngine>, ProxyRegistry) {
        let dom = Arc::new(MemoryDom::new());
        let engine = Arc::new(RecordingEngine::new(Arc::clone(&dom)));
        let registry = ProxyRegistry::new(dom.clone(), engine.clone());
        (dom, engine, registry)
    }

    #[test]
    fn test_identity() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();

        let a = registry.lookup_or_create(ProxyKind::Node, doc);
        let b = registry.lookup_or_create(ProxyKind::Node, doc);
        assert_eq!(a, b);
        assert_eq!(dom.custom_tag(doc), Some(a.id()));
        assert_eq!(registry.stats().created, 1);
    }

    #[test]
    fn test_registry_holds_weak_references() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();

        let first_id = registry.lookup_or_create(ProxyKind::Node, doc).id();
        // ownerless document is freed with its proxy
        assert!(!dom.is_live(doc));
        assert!(registry.lookup(ProxyKind::Node, doc).is_none());
        assert!(registry.is_empty());

        let other = dom.create_document();
        assert_ne!(registry.lookup_or_create(ProxyKind::Node, other).id(), first_id);
    }

    #[test]
    fn test_invalidate_tombstones() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let proxy = registry.lookup_or_create(ProxyKind::Node, doc);

        dom.free(doc);
        assert!(proxy.is_tombstoned());
        assert_eq!(proxy.handle(), Err(ContractViolation::Tombstoned));
        assert_eq!(registry.stats().invalidated, 1);

        // repeated invalidation is a no-op
        assert!(!registry.invalidate(ProxyKind::Node, doc));
        drop(proxy);
        assert_eq!(dom.free_count(doc), 1);
        assert_eq!(dom.double_frees(), 0);
    }

    #[test]
    fn test_invalidate_without_proxy_is_noop() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        assert!(!registry.invalidate(ProxyKind::Node, doc));
        dom.free(doc);
        assert_eq!(registry.stats().invalidated, 0);
    }

    #[test]
    fn test_owned_node_not_freed_on_release() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let root = dom.create_element(doc, "root", None);
        dom.append_child(doc, root);

        let doc_proxy = registry.lookup_or_create(ProxyKind::Node, doc);
        let root_proxy = registry.lookup_or_create(ProxyKind::Node, root);
        assert!(registry.release(root_proxy));
        assert!(dom.is_live(root));
        assert_eq!(dom.custom_tag(root), None);

        // document release frees the whole tree exactly once
        drop(doc_proxy);
        assert_eq!(dom.free_count(root), 1);
        assert_eq!(dom.free_count(doc), 1);
    }

    #[test]
    fn test_child_proxy_tombstoned_by_document_release() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let root = dom.create_element(doc, "root", None);
        dom.append_child(doc, root);

        let doc_proxy = registry.lookup_or_create(ProxyKind::Node, doc);
        let root_proxy = registry.lookup_or_create(ProxyKind::Node, root);
        drop(doc_proxy);

        assert!(root_proxy.is_tombstoned());
        assert_eq!(root_proxy.check_element(), Err(ContractViolation::Tombstoned));
        drop(root_proxy);
        assert_eq!(dom.double_frees(), 0);
    }

    #[test]
    fn test_release_not_last_reference() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let a = registry.lookup_or_create(ProxyKind::Node, doc);
        let b = a.clone();
        assert!(!registry.release(a));
        assert!(dom.is_live(doc));
        assert!(registry.release(b));
        assert!(!dom.is_live(doc));
    }

    #[test]
    fn test_node_type_checks() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let proxy = registry.lookup_or_create(ProxyKind::Node, doc);

        assert_eq!(proxy.check_document(), Ok(doc));
        assert_eq!(
            proxy.check_element(),
            Err(ContractViolation::WrongNodeType {
                expected: "ELEMENT_NODE"
            })
        );
        assert!(matches!(
            proxy.check_device(),
            Err(ContractViolation::WrongKind { .. })
        ));
    }

    #[test]
    fn test_device_release_unregisters_while_started() {
        let (_dom, engine, registry) = setup();
        let device = registry.lookup_or_create(ProxyKind::Device, NativeHandle(1));
        assert_eq!(device.check_device(), Ok(NativeHandle(1)));
        drop(device);
        assert_eq!(engine.unregistered_devices(), vec![NativeHandle(1)]);

        engine.set_started(false);
        let client = registry.lookup_or_create(ProxyKind::Client, NativeHandle(2));
        assert_eq!(client.check_client(), Err(ContractViolation::EngineFinished));
        assert_eq!(client.get_client(), None);
        drop(client);
        assert!(engine.unregistered_clients().is_empty());
    }

    #[test]
    fn test_device_and_node_keys_do_not_collide() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let node = registry.lookup_or_create(ProxyKind::Node, doc);
        let device = registry.lookup_or_create(ProxyKind::Device, doc);
        assert_ne!(node, device);
    }

    #[test]
    fn test_invalidate_kind() {
        let (_dom, _engine, registry) = setup();
        let d1 = registry.lookup_or_create(ProxyKind::Device, NativeHandle(1));
        let d2 = registry.lookup_or_create(ProxyKind::Device, NativeHandle(2));
        let c = registry.lookup_or_create(ProxyKind::Client, NativeHandle(3));

        assert_eq!(registry.invalidate_kind(ProxyKind::Device), 2);
        assert!(d1.is_tombstoned());
        assert!(d2.is_tombstoned());
        assert!(!c.is_tombstoned());
    }

    #[test]
    fn test_handle_reuse_gets_fresh_proxy() {
        let (_dom, _engine, registry) = setup();
        let first = registry.lookup_or_create(ProxyKind::Device, NativeHandle(9));
        registry.invalidate(ProxyKind::Device, NativeHandle(9));

        let second = registry.lookup_or_create(ProxyKind::Device, NativeHandle(9));
        assert_ne!(first, second);
        assert!(first.is_tombstoned());
        assert!(!second.is_tombstoned());
    }

    #[test]
    fn test_concurrent_lookup_agrees_on_one_proxy() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let keep = registry.lookup_or_create(ProxyKind::Node, doc);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.lookup_or_create(ProxyKind::Node, doc).id())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), keep.id());
        }
    }

    /// Delegates to a [`MemoryDom`], stalling tag reads on the thread named "native"
    struct StallingDom {
        inner: Arc<MemoryDom>,
        entered: parking_lot::Mutex<Option<std::sync::mpsc::Sender<()>>>,
    }

    impl DomLibrary for StallingDom {
        fn set_free_hook(&self, hook: crate::native::FreeHook) {
            self.inner.set_free_hook(hook)
        }
        fn custom_tag(&self, node: NativeHandle) -> Option<ProxyId> {
            if std::thread::current().name() == Some("native") {
                if let Some(tx) = self.entered.lock().take() {
                    tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
            }
            self.inner.custom_tag(node)
        }
        fn set_custom_tag(&self, node: NativeHandle, tag: Option<ProxyId>) {
            if std::thread::current().name() == Some("native") {
                if let Some(tx) = self.entered.lock().take() {
                    tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
            }
            self.inner.set_custom_tag(node, tag)
        }
        fn node_type(&self, node: NativeHandle) -> Option<NodeType> {
            self.inner.node_type(node)
        }
        fn has_owner(&self, node: NativeHandle) -> bool {
            self.inner.has_owner(node)
        }
        fn clone_tree(&self, node: NativeHandle) -> Result<NativeHandle, i32> {
            self.inner.clone_tree(node)
        }
        fn free(&self, node: NativeHandle) {
            self.inner.free(node)
        }
        fn first_child(&self, node: NativeHandle) -> Option<NativeHandle> {
            self.inner.first_child(node)
        }
        fn next_sibling(&self, node: NativeHandle) -> Option<NativeHandle> {
            self.inner.next_sibling(node)
        }
        fn node_name(&self, node: NativeHandle) -> Option<String> {
            self.inner.node_name(node)
        }
        fn node_value(&self, node: NativeHandle) -> Option<String> {
            self.inner.node_value(node)
        }
        fn namespace_uri(&self, node: NativeHandle) -> Option<String> {
            self.inner.namespace_uri(node)
        }
        fn has_attributes(&self, node: NativeHandle) -> bool {
            self.inner.has_attributes(node)
        }
    }

    #[test]
    fn test_native_free_racing_host_release_frees_once() {
        let memory = Arc::new(MemoryDom::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let dom = Arc::new(StallingDom {
            inner: Arc::clone(&memory),
            entered: parking_lot::Mutex::new(Some(entered_tx)),
        });
        let engine = Arc::new(RecordingEngine::new(Arc::clone(&memory)));
        let registry = ProxyRegistry::new(dom.clone(), engine);

        let doc = memory.create_document();
        let proxy = registry.lookup_or_create(ProxyKind::Node, doc);

        let native = {
            let dom = Arc::clone(&dom);
            std::thread::Builder::new()
                .name("native".into())
                .spawn(move || dom.free(doc))
                .unwrap()
        };

        // the native free is inside its pre-free hook; the host lets go now
        entered_rx.recv().unwrap();
        drop(proxy);
        native.join().unwrap();

        assert_eq!(memory.free_count(doc), 1);
        assert_eq!(memory.double_frees(), 0);
        assert_eq!(registry.stats().invalidated, 1);
        assert_eq!(registry.stats().freed, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_leaves_handle_to_newer_proxy() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let root = dom.create_element(doc, "root", None);
        dom.append_child(doc, root);
        let _doc_proxy = registry.lookup_or_create(ProxyKind::Node, doc);

        let old = registry.lookup_or_create(ProxyKind::Node, root);
        let old_id = old.id();
        drop(old);
        let newer = registry.lookup_or_create(ProxyKind::Node, root);
        assert_ne!(newer.id(), old_id);
        assert_eq!(dom.custom_tag(root), Some(newer.id()));
        assert_eq!(newer.check_element(), Ok(root));
    }

    #[test]
    fn test_invalidation_waits_for_host_accessor() {
        let (dom, _engine, registry) = setup();
        let doc = dom.create_document();
        let proxy = registry.lookup_or_create(ProxyKind::Node, doc);
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let native = {
            let dom = Arc::clone(&dom);
            std::thread::spawn(move || {
                entered_rx.recv().unwrap();
                dom.free(doc);
            })
        };

        let still_live = proxy
            .with_handle(|h| {
                entered_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(50));
                dom.is_live(h)
            })
            .unwrap();
        native.join().unwrap();

        assert!(still_live);
        assert!(proxy.is_tombstoned());
        drop(proxy);
        assert_eq!(dom.free_count(doc), 1);
        assert_eq!(dom.double_frees(), 0);
    }
}
