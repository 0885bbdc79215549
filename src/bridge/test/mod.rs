use crate::base::module_kind::ModuleKind;
use crate::bridge::bridge::Bridge;
use crate::bridge::config::{BridgeConfig, OutputConfig};
use crate::bridge::controller::{Confidence, Confirmation, OutputLevel, Phase};
use crate::drivers::driver::{BusTransport, DynFuture, SendError, SendResult};
use crate::drivers::simulator::simulator_bus::{SimBus, SimOptions};
use crate::error::BridgeError;
use crate::protocol::codec::{self, ReplyFrame, REPLY_ID};
use crate::protocol::error::ProtocolError;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        set_confirm_timeout_ms: 100,
        status_timeout_ms: 100,
        status_spacing_ms: 2,
    }
}

fn setup(options: SimOptions) -> (Arc<SimBus>, Arc<Bridge>) {
    let (bus, events) = SimBus::new(options);
    let bridge = Arc::new(Bridge::new(bus.clone(), fast_config()));
    bridge.spawn(events);
    (bus, bridge)
}

#[tokio::test]
async fn turn_on_confirmed() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(2, ModuleKind::Dimmer);
    let mut ctl = bridge
        .output(&OutputConfig::new(2, ModuleKind::Dimmer, 0))
        .unwrap();
    assert_eq!(
        ctl.turn_on(Some(128), None).await.unwrap(),
        Confirmation::Confirmed
    );
    let state = ctl.state();
    assert_eq!(
        state.level,
        OutputLevel {
            on: true,
            level: Some(50)
        }
    );
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.confidence, Confidence::Confirmed);
    assert_eq!(bus.output_level(2, 0), Some(50));

    let (id, payload) = bus.sent_frames().pop().unwrap();
    assert_eq!(id, codec::action_id(2));
    assert_eq!(&payload[16..], &[2, 0, 1, 0xFF, 0xFF, 50, 0xFF, 0xFF]);

    assert_eq!(ctl.turn_off().await.unwrap(), Confirmation::Confirmed);
    assert_eq!(
        ctl.state().level,
        OutputLevel {
            on: false,
            level: Some(0)
        }
    );
    assert_eq!(bus.output_level(2, 0), Some(0));
}

#[tokio::test]
async fn optimistic_state_survives_timeout() {
    let (bus, bridge) = setup(SimOptions {
        drop_set_replies: true,
        ..Default::default()
    });
    bus.add_module(2, ModuleKind::Dimmer);
    let mut ctl = bridge
        .output(&OutputConfig::new(2, ModuleKind::Dimmer, 1))
        .unwrap();
    let mut rx = ctl.subscribe();
    let (res, seen) = tokio::join!(ctl.turn_on(Some(128), None), async {
        *rx.wait_for(|s| s.phase == Phase::AwaitingSetConfirmation)
            .await
            .unwrap()
    });
    // Visible before any reply could have arrived
    assert!(seen.level.on);
    assert_eq!(seen.level.level, Some(50));
    assert_eq!(seen.confidence, Confidence::Optimistic);

    assert_eq!(res.unwrap(), Confirmation::Unconfirmed);
    let state = ctl.state();
    assert!(state.level.on);
    assert_eq!(state.level.level, Some(50));
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.confidence, Confidence::Unconfirmed);
    // The module did get the command
    assert_eq!(bus.output_level(2, 1), Some(50));
}

#[tokio::test]
async fn set_reply_only_reaches_owner() {
    let (bus, bridge) = setup(SimOptions::default());
    let target = bridge
        .output(&OutputConfig::new(3, ModuleKind::Relay, 2))
        .unwrap();
    let others = vec![
        bridge
            .output(&OutputConfig::new(3, ModuleKind::Relay, 1))
            .unwrap(),
        bridge
            .output(&OutputConfig::new(2, ModuleKind::Relay, 3))
            .unwrap(),
        bridge
            .output(&OutputConfig::new(4, ModuleKind::Relay, 2))
            .unwrap(),
    ];
    bus.inject(REPLY_ID, vec![3, 2, 1]);
    let mut rx = target.subscribe();
    timeout(Duration::from_secs(1), rx.wait_for(|s| s.level.on))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target.state().confidence, Confidence::Confirmed);
    for other in &others {
        let state = other.state();
        assert!(!state.level.on);
        assert_eq!(state.confidence, Confidence::Unknown);
    }
    // Explicit identity check on the controller
    assert!(!others[0].on_set_reply(3, 2, true));
    assert!(target.on_set_reply(3, 2, false));
    assert!(!target.state().level.on);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_is_serialized() {
    let (bus, bridge) = setup(SimOptions {
        reply_delay: Duration::from_millis(5),
        jitter: Duration::from_millis(5),
        ..Default::default()
    });
    let mut tasks = Vec::new();
    for module in 1..=6u8 {
        bus.add_module(module, ModuleKind::Dimmer);
        bus.set_output(module, 0, module * 10);
        let mut ctl = bridge
            .output(&OutputConfig::new(module, ModuleKind::Dimmer, 0))
            .unwrap();
        tasks.push(tokio::spawn(async move {
            let level = ctl.refresh().await;
            (module, level, ctl.state())
        }));
    }
    for res in join_all(tasks).await {
        let (module, level, state) = res.unwrap();
        assert_eq!(
            level.unwrap(),
            OutputLevel {
                on: true,
                level: Some(module * 10)
            }
        );
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.confidence, Confidence::Confirmed);
    }
    assert_eq!(bus.status_requests(), 6);
    assert_eq!(bus.max_outstanding_status(), 1);
    assert!(!bridge.coordinator().is_busy());
}

#[tokio::test]
async fn refresh_relay_outputs() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(7, ModuleKind::Relay);
    bus.set_output(7, 11, 1);
    let mut last = bridge
        .output(&OutputConfig::new(7, ModuleKind::Relay, 11))
        .unwrap();
    let mut first = bridge
        .output(&OutputConfig::new(7, ModuleKind::Relay, 0))
        .unwrap();
    assert_eq!(
        last.refresh().await.unwrap(),
        OutputLevel {
            on: true,
            level: None
        }
    );
    assert!(!first.refresh().await.unwrap().on);
}

#[tokio::test]
async fn failed_refresh_keeps_state() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(5, ModuleKind::Dimmer);
    let mut ctl = bridge
        .output(&OutputConfig::new(5, ModuleKind::Dimmer, 2))
        .unwrap();
    ctl.turn_on(Some(255), None).await.unwrap();
    bus.set_options(|o| o.silent_status = true);
    let res = ctl.refresh().await;
    assert!(matches!(res, Err(BridgeError::StatusTimeout)));
    let state = ctl.state();
    assert_eq!(
        state.level,
        OutputLevel {
            on: true,
            level: Some(100)
        }
    );
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.confidence, Confidence::Stale);

    // Next poll succeeds again
    bus.set_options(|o| o.silent_status = false);
    bus.set_output(5, 2, 30);
    assert_eq!(ctl.refresh().await.unwrap().level, Some(30));
    assert_eq!(ctl.state().confidence, Confidence::Confirmed);
}

#[tokio::test]
async fn abandoned_refresh_releases_slot() {
    let (bus, bridge) = setup(SimOptions {
        silent_status: true,
        ..Default::default()
    });
    bus.add_module(1, ModuleKind::Relay);
    bus.add_module(2, ModuleKind::Relay);
    let mut a = bridge
        .output(&OutputConfig::new(1, ModuleKind::Relay, 0))
        .unwrap();
    let mut b = bridge
        .output(&OutputConfig::new(2, ModuleKind::Relay, 0))
        .unwrap();
    assert!(timeout(Duration::from_millis(20), a.refresh()).await.is_err());
    assert!(!bridge.coordinator().is_busy());
    assert_eq!(a.state().phase, Phase::Idle);
    assert_eq!(a.state().confidence, Confidence::Stale);

    bus.set_options(|o| o.silent_status = false);
    bus.set_output(2, 0, 1);
    assert!(b.refresh().await.unwrap().on);
}

#[tokio::test]
async fn foreign_traffic_is_ignored() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(2, ModuleKind::Relay);
    assert_eq!(bridge.dispatch(0x0123, &[2, 0, 1]), ReplyFrame::Unrecognized);
    assert_eq!(bridge.dispatch(REPLY_ID, &[2, 0]), ReplyFrame::Unrecognized);
    // A status reply nobody asked for is dropped
    assert_eq!(
        bridge.dispatch(REPLY_ID, &[1; 12]),
        ReplyFrame::StatusReply(vec![1; 12])
    );
    bus.inject(0x0777, vec![0xAF; 8]);

    let mut ctl = bridge
        .output(&OutputConfig::new(2, ModuleKind::Relay, 0))
        .unwrap();
    assert!(!ctl.refresh().await.unwrap().on);
    assert_eq!(ctl.turn_on(None, None).await.unwrap(), Confirmation::Confirmed);
    assert_eq!(bus.output_level(2, 0), Some(1));
}

#[tokio::test]
async fn one_controller_per_output() {
    let (_bus, bridge) = setup(SimOptions::default());
    let cfg = OutputConfig::new(3, ModuleKind::AnalogZeroToTen, 7);
    let ctl = bridge.output(&cfg).unwrap();
    assert!(matches!(
        bridge.output(&cfg),
        Err(BridgeError::OutputInUse(_))
    ));
    assert_eq!(bridge.output_count(), 1);
    drop(ctl);
    assert_eq!(bridge.output_count(), 0);
    assert!(bridge.output(&cfg).is_ok());
}

#[tokio::test]
async fn invalid_outputs_rejected() {
    let (bus, bridge) = setup(SimOptions::default());
    assert!(matches!(
        bridge.output(&OutputConfig::new(90, ModuleKind::Relay, 0)),
        Err(BridgeError::Protocol(ProtocolError::InvalidAddress(90)))
    ));
    assert!(matches!(
        bridge.output(&OutputConfig::new(2, ModuleKind::Relay, 12)),
        Err(BridgeError::Protocol(ProtocolError::InvalidOutputIndex {
            kind: ModuleKind::Relay,
            index: 12
        }))
    ));
    assert!(bus.sent_frames().is_empty());
}

#[tokio::test]
async fn toggle_relay() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(4, ModuleKind::Relay);
    let mut ctl = bridge
        .output(&OutputConfig::new(4, ModuleKind::Relay, 5))
        .unwrap();
    ctl.toggle().await.unwrap();
    assert!(ctl.state().level.on);
    assert_eq!(bus.output_level(4, 5), Some(1));
    ctl.toggle().await.unwrap();
    assert!(!ctl.state().level.on);
    assert_eq!(bus.output_level(4, 5), Some(0));
}

#[tokio::test]
async fn dim_limits_and_transition() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(6, ModuleKind::Dimmer);
    let mut cfg = OutputConfig::new(6, ModuleKind::Dimmer, 3);
    cfg.max_level = 80;
    let mut ctl = bridge.output(&cfg).unwrap();
    ctl.turn_on(None, Some(2.0)).await.unwrap();
    assert_eq!(ctl.state().level.level, Some(80));
    assert_eq!(bus.output_level(6, 3), Some(80));
    let (_, payload) = bus.sent_frames().pop().unwrap();
    assert_eq!(&payload[16..], &[6, 3, 1, 0xFF, 0xFF, 80, 20, 0xFF]);

    ctl.turn_on(Some(51), Some(0.0)).await.unwrap();
    assert_eq!(ctl.state().level.level, Some(20));
    let (_, payload) = bus.sent_frames().pop().unwrap();
    assert_eq!(payload[21], 20);
    assert_eq!(payload[22], 0);
}

#[tokio::test]
async fn changes_start_with_current_state() {
    let (bus, bridge) = setup(SimOptions::default());
    bus.add_module(1, ModuleKind::Dimmer);
    let mut ctl = bridge
        .output(&OutputConfig::new(1, ModuleKind::Dimmer, 0))
        .unwrap();
    let mut changes = ctl.changes();
    assert_eq!(changes.next().await.unwrap().confidence, Confidence::Unknown);
    ctl.turn_on(Some(255), None).await.unwrap();
    let latest = changes.next().await.unwrap();
    assert!(latest.level.on);
}

struct BrokenTransport;

impl BusTransport for BrokenTransport {
    fn send_frame(&self, _identifier: u32, _payload: &[u8]) -> DynFuture<'_, SendResult> {
        Box::pin(async { Err(SendError::Closed) })
    }
}

#[tokio::test]
async fn send_failure_is_reported() {
    let bridge = Bridge::new(Arc::new(BrokenTransport), fast_config());
    let mut ctl = bridge
        .output(&OutputConfig::new(2, ModuleKind::Relay, 0))
        .unwrap();
    let res = ctl.turn_on(None, None).await;
    assert!(matches!(
        res,
        Err(BridgeError::SendFailure(SendError::Closed))
    ));
    let state = ctl.state();
    assert!(!state.level.on);
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.confidence, Confidence::Unknown);
    assert!(matches!(
        ctl.refresh().await,
        Err(BridgeError::SendFailure(_))
    ));
    assert_eq!(ctl.state().confidence, Confidence::Stale);
}

// Takes a while to put a frame on the bus and counts the ones that made it
#[derive(Default)]
struct SlowTransport {
    delivered: AtomicUsize,
}

impl BusTransport for SlowTransport {
    fn send_frame(&self, _identifier: u32, _payload: &[u8]) -> DynFuture<'_, SendResult> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn abandoned_command_keeps_previous_state() {
    let transport = Arc::new(SlowTransport::default());
    let bridge = Bridge::new(transport.clone(), fast_config());
    let mut ctl = bridge
        .output(&OutputConfig::new(4, ModuleKind::Relay, 1))
        .unwrap();
    assert!(timeout(Duration::from_millis(10), ctl.turn_on(None, None))
        .await
        .is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.delivered.load(Ordering::SeqCst), 0);
    let state = ctl.state();
    assert!(!state.level.on);
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.confidence, Confidence::Unknown);

    // Once the frame is out, the commanded state stays even without a reply
    assert_eq!(
        ctl.turn_on(None, None).await.unwrap(),
        Confirmation::Unconfirmed
    );
    assert_eq!(transport.delivered.load(Ordering::SeqCst), 1);
    assert!(ctl.state().level.on);
    assert_eq!(ctl.state().confidence, Confidence::Unconfirmed);
}
