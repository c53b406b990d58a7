// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use cadview_app_core::{DisplayOptions, ViewerConfig};
use cadview_geom::{Fingerprint, ShapeKind};
use cadview_host::Host;
use cadview_proto::{CommandPayload, MeshRef, ResponsePayload, WireEntry};
use cadview_session::{
    ChannelError, ChannelPolicy, ListenerEvent, ViewerChannel, ViewerListener,
};
use cadview_tess::TessellationResult;
use serde_json::json;
use tokio::time::timeout;

fn entry(name: &str, fp: u8) -> WireEntry {
    WireEntry {
        name: name.into(),
        kind: ShapeKind::Face,
        fingerprint: Fingerprint([fp; 32]),
        options: DisplayOptions::default(),
        parent: None,
        mesh: MeshRef::Inline(Arc::new(TessellationResult {
            vertices: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
            ..TessellationResult::default()
        })),
    }
}

fn acked() -> ChannelPolicy {
    ChannelPolicy {
        require_ack: true,
        ..ChannelPolicy::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn channel_and_host_stay_in_sync() {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    let mut ch = ViewerChannel::new(port, acked());
    let cfg = ViewerConfig::builtin();

    ch.send(&[entry("a", 1), entry("b", 2)], &cfg).await.unwrap();
    ch.send(&[entry("b", 2), entry("c", 3)], &cfg).await.unwrap();
    ch.send(&[entry("c", 3)], &cfg).await.unwrap();

    let status = host.status().await;
    assert_eq!(status.names, ["c"]);
    assert_eq!(status.epoch, Some(3));
    let stats = host.stats().await;
    assert_eq!((stats.applied, stats.rejected, stats.snapshots), (3, 0, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_command_reports_names_and_config() {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    let mut ch = ViewerChannel::new(port, acked());
    let mut cfg = ViewerConfig::builtin();
    cfg.extra.insert("glass".into(), json!(true));
    ch.send(&[entry("box", 9)], &cfg).await.unwrap();

    let ResponsePayload::Status(status) =
        ch.send_command(CommandPayload::named("status")).await.unwrap()
    else {
        panic!("expected status");
    };
    assert_eq!(status.names, ["box"]);
    assert_eq!(status.config.extra.get("glass"), Some(&json!(true)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_surfaces_as_protocol_error() {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    let mut ch = ViewerChannel::new(port, acked());
    let err = ch.send_command(CommandPayload::named("explode")).await.unwrap_err();
    assert!(matches!(err, ChannelError::Protocol(ref m) if m.contains("explode")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_sees_config_changes_once() {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    let mut listener = ViewerListener::connect(port, Duration::from_secs(1)).await.unwrap();
    // Give the host a moment to register the listener before changes arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ch = ViewerChannel::new(port, acked());
    let theme = ViewerConfig {
        ortho: Some(true),
        ..ViewerConfig::default()
    };
    ch.send_config(&theme).await.unwrap();
    let changes = timeout(Duration::from_secs(2), listener.next_changes())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(changes.get("ortho"), Some(&json!(true)));

    ch.send_config(&ViewerConfig {
        axes: Some(true),
        ..ViewerConfig::default()
    })
    .await
    .unwrap();
    let changes = timeout(Duration::from_secs(2), listener.next_changes())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(changes.keys().collect::<Vec<_>>(), ["axes"]);
    assert_eq!(listener.seen().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_requests_reach_listeners_and_responses_the_host() {
    let host = Host::new();
    let port = host.spawn("127.0.0.1:0").await.unwrap().port();
    let mut backend = ViewerListener::connect(port, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ch = ViewerChannel::new(port, ChannelPolicy::default());
    let request = json!({ "tool": "distance", "shapes": ["box", "sphere"] });
    ch.send_backend(&request).await.unwrap();
    let event = timeout(Duration::from_secs(2), backend.next_event())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event, ListenerEvent::Backend(request));

    let answer = json!({ "tool": "distance", "result": 2.5 });
    ch.send_response(&answer).await.unwrap();
    // Messages on one connection are handled in order.
    ch.send_command(CommandPayload::named("ping")).await.unwrap();
    assert_eq!(host.backend_responses().await, [answer]);
}
