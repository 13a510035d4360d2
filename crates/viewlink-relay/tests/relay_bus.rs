//! Relay bus routing, replay, panel links and composite containers over
//! loopback frames.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use viewlink_core::error::{Result, ViewLinkError};
use viewlink_core::protocol::bus::ViewMessage;
use viewlink_core::protocol::envelope::Envelope;
use viewlink_core::protocol::message::{FrameMessage, HostMessage};
use viewlink_relay::client::ViewState;
use viewlink_relay::frame::loopback::{loopback, spawn_client, ClientMode, LoopbackView};
use viewlink_relay::frame::FramePort;
use viewlink_relay::negotiate::{ConnectionStatus, NegotiationPolicy, Negotiator};
use viewlink_relay::obs::RelayMetrics;
use viewlink_relay::relay::{CompositeView, FrameMounter, Layout, PanelManifest, RelayBus, Routed};

fn bus() -> RelayBus {
    let negotiator = Negotiator::new(NegotiationPolicy::default(), Arc::new(RelayMetrics::new()));
    RelayBus::new(Arc::new(negotiator))
}

fn panel(id: &str, data: Value) -> PanelManifest {
    PanelManifest {
        id: id.to_string(),
        source_location: format!("https://views.example/{id}"),
        label: None,
        structured_content: data,
    }
}

async fn past_deadline() {
    tokio::time::sleep(Duration::from_millis(3100)).await;
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn select(ids: &[&str]) -> ViewMessage {
    ViewMessage::Select {
        source: String::new(),
        ids: ids.iter().map(|s| s.to_string()).collect(),
    }
}

/// Next bus message, skipping deliveries.
async fn next_bus(view: &mut LoopbackView) -> (String, ViewMessage) {
    loop {
        match view.recv().await {
            Some(HostMessage::Bus { source_panel, message, .. }) => return (source_panel, message),
            Some(_) => continue,
            None => panic!("frame released before a bus message arrived"),
        }
    }
}

fn no_bus(view: &mut LoopbackView) -> bool {
    while let Some(msg) = view.try_recv() {
        if matches!(msg, HostMessage::Bus { .. }) {
            return false;
        }
    }
    true
}

async fn wait_data(rx: &mut watch::Receiver<ViewState>, expect: Value) -> ViewState {
    rx.wait_for(|s| s.data.as_ref() == Some(&expect))
        .await
        .unwrap()
        .clone()
}

/// Mounts every panel as a loopback frame running a delivery client.
#[derive(Clone)]
struct LoopbackMounter {
    mode: ClientMode,
    views: Arc<Mutex<HashMap<String, watch::Receiver<ViewState>>>>,
}

impl LoopbackMounter {
    fn new(mode: ClientMode) -> Self {
        Self {
            mode,
            views: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn view(&self, id: &str) -> watch::Receiver<ViewState> {
        self.views.lock().unwrap().get(id).cloned().expect("panel mounted")
    }
}

#[async_trait]
impl FrameMounter for LoopbackMounter {
    async fn mount(&self, panel: &PanelManifest) -> Result<FramePort> {
        let (port, view) = loopback();
        let state = spawn_client(view, self.mode);
        self.views.lock().unwrap().insert(panel.id.clone(), state);
        Ok(port)
    }
}

/// Mounts loopback frames, failing for any id in `deny`.
#[derive(Clone, Default)]
struct FlakyMounter {
    deny: Arc<Mutex<HashSet<String>>>,
}

impl FlakyMounter {
    fn deny(&self, id: &str) {
        self.deny.lock().unwrap().insert(id.to_string());
    }

    fn allow_all(&self) {
        self.deny.lock().unwrap().clear();
    }
}

#[async_trait]
impl FrameMounter for FlakyMounter {
    async fn mount(&self, panel: &PanelManifest) -> Result<FramePort> {
        if self.deny.lock().unwrap().contains(&panel.id) {
            return Err(ViewLinkError::Internal(format!("cannot create frame for {}", panel.id)));
        }
        let (port, view) = loopback();
        spawn_client(view, ClientMode::Handshake);
        Ok(port)
    }
}

#[tokio::test(start_paused = true)]
async fn last_write_wins_per_child() {
    let mut bus = bus();
    let (port, view) = loopback();
    bus.register("counter", port);
    let mut state = spawn_client(view, ClientMode::Handshake);

    for n in 1..=3 {
        assert_eq!(bus.deliver("counter", Envelope::tool_result(json!({ "n": n }))), Routed::Live);
    }

    let view_state = wait_data(&mut state, json!({ "n": 3 })).await;
    assert!(view_state.is_connected);

    let cached = bus.last_delivered("counter").unwrap();
    assert_eq!(cached.structured_content, json!({ "n": 3 }));
    assert_eq!(cached.routing_key.as_deref(), Some("counter"));
    assert_eq!(
        bus.child("counter").unwrap().last_delivered().unwrap().structured_content,
        json!({ "n": 3 })
    );
}

#[tokio::test(start_paused = true)]
async fn unregister_before_load_then_remount_replays() {
    let mut bus = bus();
    let (port, mut view) = loopback();
    bus.register("chart", port);

    assert_eq!(bus.deliver("chart", Envelope::tool_result(json!({ "p": 1 }))), Routed::Live);
    assert!(bus.unregister("chart"));
    assert!(!bus.is_registered("chart"));

    // the destroyed frame never received anything
    assert_eq!(view.recv().await, None);

    let (port, view) = loopback();
    bus.register("chart", port);
    let mut state = spawn_client(view, ClientMode::Legacy);
    past_deadline().await;

    wait_data(&mut state, json!({ "p": 1 })).await;
    assert_eq!(bus.negotiator().metrics().replays.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn unregister_discards_in_flight_delivery() {
    let mut bus = bus();
    let (port, mut view) = loopback();
    let conn = bus.register("chart", port);

    view.load();
    past_deadline().await;
    bus.deliver("chart", Envelope::tool_result(json!({ "first": true })));
    assert!(matches!(view.recv().await, Some(HostMessage::ToolResult(_))));

    bus.deliver("chart", Envelope::tool_result(json!({ "second": true })));
    bus.unregister("chart");

    assert_eq!(view.recv().await, None);
    let snap = conn.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
    assert_eq!(snap.deliveries, 1);

    // later deliveries are cached, not sent
    assert_eq!(bus.deliver("chart", Envelope::tool_result(json!({ "third": true }))), Routed::Cached);
    assert_eq!(
        bus.last_delivered("chart").unwrap().structured_content,
        json!({ "third": true })
    );
}

#[tokio::test]
async fn dead_target_is_cached_and_malformed_is_dropped() {
    let mut bus = bus();

    assert_eq!(bus.deliver("ghost", Envelope::tool_result(json!({ "a": 1 }))), Routed::Cached);
    assert_eq!(bus.negotiator().metrics().dead_target.get(), 1);

    assert_eq!(bus.deliver_value("ghost", json!({ "kind": "nope" })), Routed::Dropped);
    assert_eq!(
        bus.last_delivered("ghost").unwrap().structured_content,
        json!({ "a": 1 })
    );
    assert_eq!(bus.negotiator().metrics().malformed.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_delivery_to_live_child_marks_error() {
    let mut bus = bus();
    let (port, _view) = loopback();
    let conn = bus.register("chart", port);
    bus.deliver("chart", Envelope::tool_result(json!({ "ok": 1 })));

    assert_eq!(bus.deliver_value("chart", json!("not an envelope")), Routed::Rejected);
    assert_eq!(Routed::Rejected.as_str(), "rejected");
    conn.wait_for(|s| s.status == ConnectionStatus::Error).await.unwrap();

    // cache keeps the last good payload
    assert_eq!(
        bus.last_delivered("chart").unwrap().structured_content,
        json!({ "ok": 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn frame_backs_at_most_one_child() {
    let mut bus = bus();
    let (port, _view) = loopback();
    let handle = Arc::clone(&port.handle);
    let first = bus.register("a", port);

    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    bus.register("b", FramePort::new(handle, events_rx));

    assert!(!bus.is_registered("a"));
    assert_eq!(bus.ids(), vec!["b".to_string()]);
    first.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn replacing_a_child_closes_the_displaced_connection() {
    let mut bus = bus();
    let (old_port, mut old_view) = loopback();
    let old = bus.register("a", old_port);

    let (new_port, _new_view) = loopback();
    let new = bus.register("a", new_port);

    old.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
    assert_eq!(old_view.recv().await, None);
    assert!(!new.is_closed());
    assert_eq!(bus.connection("a").unwrap().frame_id(), new.frame_id());
}

#[tokio::test(start_paused = true)]
async fn stale_frame_does_not_release_newer_registration() {
    let mut bus = bus();
    let (old_port, _old) = loopback();
    let old_id = old_port.frame_id();
    bus.register("a", old_port);

    let (new_port, _new) = loopback();
    let new_id = new_port.frame_id();
    bus.register("a", new_port);

    assert!(!bus.unregister_frame("a", old_id));
    assert!(bus.is_registered("a"));
    assert!(bus.unregister_frame("a", new_id));
    assert!(bus.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_bus_closes_every_child() {
    let mut bus = bus();
    let (a, _va) = loopback();
    let (b, _vb) = loopback();
    let ca = bus.register("a", a);
    let cb = bus.register("b", b);
    assert_eq!(bus.len(), 2);

    drop(bus);
    ca.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
    cb.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn tabs_replay_payload_on_every_switch() {
    let mounter = LoopbackMounter::new(ClientMode::Handshake);
    let views = mounter.clone();
    let panels = vec![panel("a", json!({ "v": "A" })), panel("b", json!({ "v": "B" }))];

    let mut tabs = CompositeView::tabs(bus(), mounter, panels, None);
    tabs.open().await.unwrap();
    assert_eq!(tabs.active(), Some("a"));
    assert!(!tabs.bus().is_registered("b"));
    wait_data(&mut views.view("a"), json!({ "v": "A" })).await;

    tabs.select("b").await.unwrap();
    assert!(!tabs.bus().is_registered("a"));
    wait_data(&mut views.view("b"), json!({ "v": "B" })).await;

    // host update while "a" is hidden
    assert_eq!(tabs.update("a", json!({ "v": "A2" })), Routed::Cached);

    tabs.select("a").await.unwrap();
    let state = wait_data(&mut views.view("a"), json!({ "v": "A2" })).await;
    assert!(state.is_connected);

    assert_eq!(tabs.bus().negotiator().metrics().replays.get(), 3);
    assert_eq!(tabs.layout(), &Layout::Tabs { active: Some("a".to_string()) });
}

#[tokio::test(start_paused = true)]
async fn failed_tab_mount_restores_previous_tab() {
    let mounter = FlakyMounter::default();
    let panels = vec![panel("a", json!({ "v": "A" })), panel("b", json!({ "v": "B" }))];

    let mut tabs = CompositeView::tabs(bus(), mounter.clone(), panels, None);
    tabs.open().await.unwrap();
    assert_eq!(tabs.active(), Some("a"));

    mounter.deny("b");
    let err = tabs.select("b").await.expect_err("mount fails");
    assert_eq!(err.code().as_str(), "INTERNAL");

    assert_eq!(tabs.active(), Some("a"));
    assert!(tabs.bus().is_registered("a"));
    assert!(!tabs.bus().is_registered("b"));

    mounter.allow_all();
    tabs.select("b").await.unwrap();
    assert_eq!(tabs.active(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn failed_restore_leaves_no_active_tab() {
    let mounter = FlakyMounter::default();
    let panels = vec![panel("a", json!(1)), panel("b", json!(2))];

    let mut tabs = CompositeView::tabs(bus(), mounter.clone(), panels, None);
    tabs.open().await.unwrap();

    mounter.deny("a");
    mounter.deny("b");
    tabs.select("b").await.expect_err("mount fails");
    assert_eq!(tabs.active(), None);
    assert!(tabs.bus().is_empty());

    // the old tab is selectable again once frames can be created
    mounter.allow_all();
    tabs.select("a").await.unwrap();
    assert_eq!(tabs.active(), Some("a"));
    assert!(tabs.bus().is_registered("a"));
    assert_eq!(tabs.bus().negotiator().metrics().replays.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn bus_message_reaches_siblings_but_not_its_source() {
    let mut bus = bus();
    let (a, mut va) = loopback();
    let (b, mut vb) = loopback();
    let (c, mut vc) = loopback();
    bus.register("table", a);
    bus.register("chart", b);
    bus.register("map", c);

    va.send(FrameMessage::bus(select(&["r1"])));

    let (source, msg) = next_bus(&mut vb).await;
    assert_eq!(source, "table");
    assert_eq!(msg.source(), "table");
    assert_eq!(msg, select(&["r1"]).with_source("table"));

    let (source, _) = next_bus(&mut vc).await;
    assert_eq!(source, "table");

    settle().await;
    assert!(no_bus(&mut va));
    assert_eq!(bus.negotiator().metrics().bus_relayed.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn bus_source_is_stamped_with_the_registered_id() {
    let mut bus = bus();
    let (a, va) = loopback();
    let (b, mut vb) = loopback();
    bus.register("table", a);
    bus.register("chart", b);

    va.send(FrameMessage::bus(ViewMessage::Highlight {
        source: "chart".into(),
        id: "p1".into(),
    }));

    let (source, msg) = next_bus(&mut vb).await;
    assert_eq!(source, "table");
    assert_eq!(msg.source(), "table");
}

#[tokio::test(start_paused = true)]
async fn link_filter_decides_per_target() {
    let mut bus = bus();
    let (a, va) = loopback();
    let (b, mut vb) = loopback();
    let (c, mut vc) = loopback();
    bus.register("table", a);
    bus.register("chart", b);
    bus.register("map", c);

    // selections only flow table -> chart
    bus.set_link_filter(|msg, source, target| match msg {
        ViewMessage::Select { .. } => source == "table" && target == "chart",
        _ => true,
    });

    va.send(FrameMessage::bus(select(&["r1"])));
    let (_, msg) = next_bus(&mut vb).await;
    assert!(matches!(msg, ViewMessage::Select { .. }));
    settle().await;
    assert!(no_bus(&mut vc));

    va.send(FrameMessage::bus(ViewMessage::Highlight {
        source: String::new(),
        id: "p1".into(),
    }));
    let (_, msg) = next_bus(&mut vc).await;
    assert!(matches!(msg, ViewMessage::Highlight { .. }));

    bus.clear_link_filter();
    va.send(FrameMessage::bus(select(&["r2"])));
    let (_, msg) = next_bus(&mut vc).await;
    assert_eq!(msg, select(&["r2"]).with_source("table"));
}

#[tokio::test(start_paused = true)]
async fn unregistered_child_leaves_the_bus() {
    let mut bus = bus();
    let (a, va) = loopback();
    let (b, mut vb) = loopback();
    let (c, vc) = loopback();
    bus.register("table", a);
    bus.register("chart", b);
    bus.register("map", c);

    bus.unregister("chart");
    assert_eq!(vb.recv().await, None);

    va.send(FrameMessage::bus(select(&["r1"])));
    settle().await;
    assert_eq!(bus.negotiator().metrics().bus_relayed.get(), 1);

    // a torn-down child no longer speaks on the bus
    vc.send(FrameMessage::bus(select(&["x"])));
    bus.unregister("map");
    settle().await;
    assert_eq!(bus.negotiator().metrics().bus_relayed.get(), 1);
}

#[tokio::test]
async fn select_rejects_unknown_tab_and_split_layout() {
    let panels = vec![panel("a", json!(1))];

    let mut tabs = CompositeView::tabs(bus(), LoopbackMounter::new(ClientMode::Handshake), panels.clone(), None);
    let err = tabs.select("zzz").await.expect_err("unknown tab");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");

    let mut split = CompositeView::split(bus(), LoopbackMounter::new(ClientMode::Handshake), panels);
    let err = split.select("a").await.expect_err("not tabs");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[tokio::test(start_paused = true)]
async fn split_mounts_all_and_remount_replays() {
    let mounter = LoopbackMounter::new(ClientMode::Legacy);
    let views = mounter.clone();
    let panels = vec![
        panel("left", json!({ "side": "left" })),
        panel("right", json!([1, 2, 3])),
    ];

    let mut split = CompositeView::split(bus(), mounter, panels);
    split.open().await.unwrap();
    assert_eq!(split.bus().ids(), vec!["left".to_string(), "right".to_string()]);

    past_deadline().await;
    wait_data(&mut views.view("left"), json!({ "side": "left" })).await;
    wait_data(&mut views.view("right"), json!([1, 2, 3])).await;

    assert!(split.unmount("right"));
    assert_eq!(split.update("right", json!([4])), Routed::Cached);
    assert_eq!(split.panels()[1].structured_content, json!([4]));

    split.mount("right").await.unwrap();
    past_deadline().await;
    wait_data(&mut views.view("right"), json!([4])).await;

    assert_eq!(split.update("left", json!(null)), Routed::Live);
    wait_data(&mut views.view("left"), json!(null)).await;
}
