use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use upnp_host_bridge::events::{Discovery, EventReceived};
use upnp_host_bridge::testing::{MemoryDom, RecordingEngine};
use upnp_host_bridge::{
    Bridge, BridgeConfig, EventPayload, EventType, HostEvent, HostValue, NativeHandle, ProxyKind,
    ProxyRegistry,
};

fn setup() -> (Arc<MemoryDom>, Bridge) {
    let dom = Arc::new(MemoryDom::new());
    let engine = Arc::new(RecordingEngine::new(Arc::clone(&dom)));
    let registry = ProxyRegistry::new(dom.clone(), engine);
    let bridge = Bridge::new(BridgeConfig::default(), registry).unwrap();
    (dom, bridge)
}

fn bench_registry(c: &mut Criterion) {
    let (_dom, bridge) = setup();
    let registry = bridge.registry().clone();
    let held = registry.lookup_or_create(ProxyKind::Device, NativeHandle(1));

    c.bench_function("registry_lookup_existing", |b| {
        b.iter(|| black_box(registry.lookup_or_create(ProxyKind::Device, NativeHandle(1))))
    });
    drop(held);
}

fn bench_fire_and_forget(c: &mut Criterion) {
    let (_dom, bridge) = setup();
    let discovery = Discovery {
        device_id: "uuid:bench".into(),
        location: "http://127.0.0.1:49152/desc.xml".into(),
        ..Default::default()
    };
    let mut handler = |_: &HostEvent| -> anyhow::Result<Vec<HostValue>> { Ok(Vec::new()) };

    c.bench_function("deliver_and_pump_discovery", |b| {
        b.iter(|| {
            bridge.deliver_fire_and_forget(
                EventType::DiscoveryAdvertisementAlive,
                &EventPayload::Discovery(Some(&discovery)),
                None,
            );
            black_box(bridge.host_pump(&mut handler).unwrap())
        })
    });
}

fn bench_document_copy(c: &mut Criterion) {
    let (dom, bridge) = setup();
    let doc = dom.create_document();
    let root = dom.create_element(doc, "e:propertyset", Some("urn:schemas-upnp-org:event-1-0"));
    dom.append_child(doc, root);
    for i in 0..32 {
        let property = dom.create_element(doc, "e:property", None);
        dom.append_child(root, property);
        dom.append_text_element(doc, property, &format!("Var{}", i), &i.to_string());
    }
    let event = EventReceived {
        event_key: 1,
        changed_variables: Some(doc),
        sid: "uuid:sub".into(),
    };
    let mut handler = |_: &HostEvent| -> anyhow::Result<Vec<HostValue>> { Ok(Vec::new()) };

    c.bench_function("deliver_and_pump_event_32_vars", |b| {
        b.iter(|| {
            bridge.deliver_fire_and_forget(EventType::EventReceived, &EventPayload::Event(&event), None);
            black_box(bridge.host_pump(&mut handler).unwrap())
        })
    });
}

criterion_group!(benches, bench_registry, bench_fire_and_forget, bench_document_copy);
criterion_main!(benches);
