mod common;

use std::time::Duration;

use common::{spawn_peer, PeerConfig, PeerMode};
use s7comm::{ConnectOptions, S7Client, S7Error, SessionState};

fn options() -> ConnectOptions {
    ConnectOptions::default()
        .with_rack_slot(0, 1)
        .with_step_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn connect_negotiates_minimum_pdu_size() {
    let link = spawn_peer(PeerConfig {
        reported_pdu: 240,
        mode: PeerMode::Normal,
    });
    let mut client = S7Client::new(link, options());
    assert_eq!(client.state(), SessionState::Disconnected);

    client.connect().await.expect("connect");
    assert_eq!(client.state(), SessionState::Ready);
    // we propose 960, the device reports 240, the smaller value wins
    assert_eq!(client.negotiated_pdu_length(), 240);
    assert_eq!(client.negotiated_amq(), (1, 1));
    let cotp = client.cotp_references().expect("cotp refs");
    assert_eq!(cotp.dst_ref, 0x0001);

    client.close().await.expect("close");
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn device_accepting_larger_pdu_is_capped_by_proposal() {
    let link = spawn_peer(PeerConfig {
        reported_pdu: 960,
        mode: PeerMode::Normal,
    });
    let mut client = S7Client::new(link, options().with_pdu_size(480));
    client.connect().await.expect("connect");
    assert_eq!(client.negotiated_pdu_length(), 480);
}

#[tokio::test]
async fn handshake_timeout_leaves_session_disconnected() {
    let link = spawn_peer(PeerConfig {
        reported_pdu: 240,
        mode: PeerMode::Silent,
    });
    let mut client = S7Client::new(link, options().with_step_timeout(Duration::from_millis(50)));

    let err = client.connect().await.expect_err("peer is silent");
    assert!(matches!(err, S7Error::Timeout));
    // nothing was established, the same client may try again
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn operations_require_connect() {
    let link = spawn_peer(PeerConfig::default());
    let mut client = S7Client::new(link, options());
    let err = client
        .read_variables(&[s7comm::MemoryAddress::marker(0)])
        .await
        .expect_err("not connected");
    assert!(matches!(err, S7Error::NotConnected));
}

#[tokio::test]
async fn close_is_idempotent() {
    let link = spawn_peer(PeerConfig::default());
    let mut client = S7Client::new(link, options());
    client.connect().await.expect("connect");
    client.close().await.expect("first close");
    client.close().await.expect("second close");
    assert_eq!(client.state(), SessionState::Closed);

    // a closed session refuses traffic
    let err = client
        .read_variables(&[s7comm::MemoryAddress::marker(0)])
        .await
        .expect_err("closed");
    assert!(matches!(err, S7Error::NotConnected));
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let link = spawn_peer(PeerConfig::default());
    let mut client = S7Client::new(link, options());
    client.connect().await.expect("connect");
    assert!(client.connect().await.is_err());
}
