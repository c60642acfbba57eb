//! HTTP/WebSocket front-end served by a running bridge over the in-memory radio.
#![cfg(feature = "http-api")]

mod common;

use common::{fake_transport, test_config, wait_for, FakeLink, FakeWorld};
use fieldlink::bridge::{Bridge, BridgeHandle};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn start_with_api(link: &FakeLink, bind: &str) -> anyhow::Result<BridgeHandle> {
    let world = FakeWorld::new();
    let mut config = test_config();
    config.forward.enabled = false;
    config.api.enabled = true;
    config.api.bind = bind.to_string();
    Bridge::start(&config, fake_transport(link, 250), world.services(), None)
}

async fn get_json(url: String) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let code = resp.status().as_u16();
    (code, resp.json().await.unwrap_or(Value::Null))
}

async fn post_send(base: &str, text: &str) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/send", base))
        .json(&json!({ "text": text }))
        .send()
        .await
        .unwrap();
    let code = resp.status().as_u16();
    (code, resp.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn messages_endpoint_serves_recent_history() {
    let link = FakeLink::new();
    let handle = start_with_api(&link, "127.0.0.1:0").unwrap();
    let base = format!("http://{}", handle.api_addr().unwrap());
    assert!(wait_for(WAIT, || handle.status().connected).await);

    link.inject("TEL:1.0,2.0,3.0,0.0,0,12.0,50,3,9,AUTO,0");
    link.inject("chatter one RSSI:-90");
    link.inject("chatter two");
    assert!(wait_for(WAIT, || handle.history(10).len() == 3).await);

    let (code, body) = get_json(format!("{}/messages?limit=2", base)).await;
    assert_eq!(code, 200);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["raw"], "chatter one");
    assert_eq!(messages[0]["rssi"], -90);
    assert_eq!(messages[1]["raw"], "chatter two");
    assert_eq!(messages[1]["direction"], "rx");
    assert_eq!(messages[1]["kind"], "generic");

    let (code, body) = get_json(format!("{}/messages", base)).await;
    assert_eq!(code, 200);
    assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    assert_eq!(body["messages"][0]["kind"], "telemetry_rx");

    let resp = reqwest::get(format!("{}/messages?limit=lots", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    handle.shutdown().await;
}

#[tokio::test]
async fn send_and_status_follow_the_link() {
    let link = FakeLink::new();
    let handle = start_with_api(&link, "127.0.0.1:0").unwrap();
    let base = format!("http://{}", handle.api_addr().unwrap());
    assert!(wait_for(WAIT, || handle.status().connected).await);

    let (code, body) = post_send(&base, "  hello field ").await;
    assert_eq!(code, 200);
    assert_eq!(body, json!({ "status": "sent", "text": "hello field" }));
    assert_eq!(link.sent(), vec!["hello field"]);

    let (code, _) = post_send(&base, "two\nlines").await;
    assert_eq!(code, 400);
    let (code, _) = post_send(&base, &"x".repeat(300)).await;
    assert_eq!(code, 400);
    assert_eq!(link.sent().len(), 1);

    let (code, status) = get_json(format!("{}/status", base)).await;
    assert_eq!(code, 200);
    assert_eq!(status["connected"], true);
    assert_eq!(status["device"], "fake-radio");
    assert_eq!(status["total_messages"], 1);
    assert_eq!(status["forwarding"], false);

    let (code, wifi) = get_json(format!("{}/esp_wifi", base)).await;
    assert_eq!(code, 200);
    assert_eq!(wifi["enabled"], false);
    assert_eq!(wifi["hostname"], "dc-detect");

    link.unplug();
    assert!(wait_for(WAIT, || !handle.status().connected).await);
    let (code, body) = post_send(&base, "anyone there").await;
    assert_eq!(code, 503);
    assert!(body["error"].as_str().unwrap().contains("not connected"));
    let (_, status) = get_json(format!("{}/status", base)).await;
    assert_eq!(status["connected"], false);

    handle.shutdown().await;
}

#[tokio::test]
async fn websocket_pushes_new_lines() {
    let link = FakeLink::new();
    let handle = start_with_api(&link, "127.0.0.1:0").unwrap();
    let addr = handle.api_addr().unwrap();
    assert!(wait_for(WAIT, || handle.status().connected).await);

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    link.inject("hello ground");

    let mut heartbeats = 0;
    let pushed = tokio::time::timeout(WAIT, async {
        while let Some(frame) = ws.next().await {
            let Message::Text(text) = frame.unwrap() else {
                continue;
            };
            let event: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(event["connected"], true);
            match event["event"].as_str() {
                Some("heartbeat") => heartbeats += 1,
                Some("messages") => return event["messages"].clone(),
                other => panic!("unexpected event {:?}", other),
            }
        }
        Value::Null
    })
    .await
    .unwrap();

    let pushed = pushed.as_array().unwrap();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["raw"], "hello ground");
    assert!(heartbeats <= 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn busy_api_port_fails_start() {
    let first_link = FakeLink::new();
    let first = start_with_api(&first_link, "127.0.0.1:0").unwrap();
    let taken = first.api_addr().unwrap().to_string();

    let second_link = FakeLink::new();
    let err = match start_with_api(&second_link, &taken) {
        Ok(_) => panic!("second bridge bound a port already in use"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("HTTP API"));
    assert_eq!(second_link.opens(), 0);

    first.shutdown().await;
}
