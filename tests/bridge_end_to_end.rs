//! Full bridge over the in-memory radio: inbound classification, command
//! dispatch, periodic forwarding, pairing and device loss.

mod common;

use common::{fake_transport, test_config, wait_for, FakeLink, FakeNetwork, FakeWorld};
use fieldlink::bridge::Bridge;
use fieldlink::pairing::{NetworkManager, PairingState};
use fieldlink::state::{Direction, MessageKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn commands_and_credentials_flow_through() {
    let link = FakeLink::new();
    let world = FakeWorld::new();
    let mut config = test_config();
    config.forward.enabled = false;
    let handle = Bridge::start(&config, fake_transport(&link, 250), world.services(), None).unwrap();
    assert!(wait_for(WAIT, || handle.status().connected).await);

    link.inject("CMD:REC_START RSSI:-87");
    assert!(wait_for(WAIT, || world.recording.load(Ordering::SeqCst)).await);

    link.inject("AP:FieldAP,hunter22");
    let shared = handle.shared();
    assert!(wait_for(WAIT, || shared.credentials().is_some()).await);
    let creds = shared.credentials().unwrap();
    assert_eq!((creds.ssid.as_str(), creds.password.as_str()), ("FieldAP", "hunter22"));

    link.inject("TEL:1.0,2.0,3.0,0.0,0,12.0,50,3,9,AUTO,0");
    link.inject("just chatter");
    assert!(wait_for(WAIT, || handle.history(10).len() == 4).await);

    let log = handle.history(10);
    let kinds: Vec<MessageKind> = log.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Command,
            MessageKind::ApInfo,
            MessageKind::TelemetryRx,
            MessageKind::Generic
        ]
    );
    assert_eq!(log[0].rssi, Some(-87));
    assert!(log.iter().all(|m| m.direction == Direction::Rx));
    assert_eq!(handle.history(2).len(), 2);
    assert_eq!(handle.history(2)[1].raw, "just chatter");

    handle.send_text("hello field").await.unwrap();
    assert_eq!(link.sent(), vec!["hello field"]);
    assert_eq!(handle.history(1)[0].kind, MessageKind::Text);

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_command_leaves_state_alone() {
    let link = FakeLink::new();
    let world = FakeWorld::new();
    let mut config = test_config();
    config.forward.enabled = false;
    let handle = Bridge::start(&config, fake_transport(&link, 250), world.services(), None).unwrap();
    assert!(wait_for(WAIT, || handle.status().connected).await);
    let pairing_before = handle.status().pairing;

    link.inject("CMD:FOO_BAR");
    assert!(wait_for(WAIT, || handle.history(1).len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(world.calls().is_empty());
    let status = handle.status();
    assert!(status.connected);
    assert_eq!(status.pairing, pairing_before);
    assert!(link.sent().is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn forwarding_pauses_during_device_loss() {
    let link = FakeLink::new();
    let world = FakeWorld::new();
    world.set_tracks(&[(1, "person", 0.8)]);
    let handle = Bridge::start(
        &test_config(),
        fake_transport(&link, 250),
        world.services(),
        None,
    )
    .unwrap();

    assert!(
        wait_for(WAIT, || {
            !link.sent_with_prefix("TEL:").is_empty()
                && !link.sent_with_prefix("DET:").is_empty()
                && !link.sent_with_prefix("STS:").is_empty()
        })
        .await
    );

    link.unplug();
    assert!(wait_for(WAIT, || !handle.status().connected).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    link.clear();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(link.sent().is_empty());

    link.plug();
    assert!(wait_for(WAIT, || handle.status().connected).await);
    assert!(
        wait_for(WAIT, || {
            !link.sent_with_prefix("TEL:").is_empty()
                && !link.sent_with_prefix("DET:").is_empty()
                && !link.sent_with_prefix("STS:").is_empty()
        })
        .await
    );
    assert!(link.opens() >= 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn history_stays_within_capacity() {
    let link = FakeLink::new();
    let world = FakeWorld::new();
    let mut config = test_config();
    config.forward.enabled = false;
    config.link.history_capacity = 10;
    let handle = Bridge::start(&config, fake_transport(&link, 250), world.services(), None).unwrap();
    assert!(wait_for(WAIT, || handle.status().connected).await);

    for i in 0..11 {
        link.inject(&format!("line {}", i));
    }
    let shared = handle.shared();
    assert!(wait_for(WAIT, || shared.total_messages() == 11).await);
    assert!(shared.log_len() <= 10);
    let recent = handle.history(100);
    assert_eq!(recent.last().unwrap().raw, "line 10");
    handle.shutdown().await;
}

#[tokio::test]
async fn pairing_runs_inside_the_bridge() {
    let link = FakeLink::new();
    let world = FakeWorld::new();
    let net = FakeNetwork::new("10.42.0.7");
    let mut config = test_config();
    config.forward.enabled = false;
    config.pairing.enabled = true;
    config.pairing.credential_poll_secs = 1;
    config.pairing.disconnect_settle_ms = 10;
    let dyn_net: Arc<dyn NetworkManager> = net.clone();
    let handle = Bridge::start(
        &config,
        fake_transport(&link, 250),
        world.services(),
        Some(dyn_net),
    )
    .unwrap();
    assert!(wait_for(WAIT, || handle.status().connected).await);
    assert_eq!(
        handle.status().pairing.state,
        PairingState::AwaitingCredentials
    );

    link.inject("AP:FieldAP,secret");
    assert!(wait_for(WAIT, || !link.sent_with_prefix("WIFI:").is_empty()).await);
    assert_eq!(link.sent_with_prefix("WIFI:")[0], "WIFI:10.42.0.7,dc-detect,8080");
    let status = handle.status();
    assert!(status.pairing.enabled);
    assert_eq!(status.pairing.state, PairingState::Connected);
    assert_eq!(status.pairing.address.as_deref(), Some("10.42.0.7"));
    handle.shutdown().await;
}
