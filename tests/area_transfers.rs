mod common;

use std::time::Duration;

use common::{spawn_peer, PeerConfig, PeerMode};
use s7comm::{ConnectOptions, MemoryArea, S7Client, S7Error};

/// A deliberately tiny PDU so area transfers must split into chunks.
async fn small_pdu_client() -> S7Client<s7comm::ChannelLink> {
    let link = spawn_peer(PeerConfig {
        reported_pdu: 64,
        mode: PeerMode::Normal,
    });
    let opts = ConnectOptions::default().with_step_timeout(Duration::from_millis(500));
    let mut client = S7Client::new(link, opts);
    client.connect().await.expect("connect");
    assert_eq!(client.negotiated_pdu_length(), 64);
    client
}

#[tokio::test]
async fn area_round_trip_larger_than_one_pdu() {
    let mut client = small_pdu_client().await;

    let data: Vec<u8> = (0..120).map(|i| (i * 7 + 3) as u8).collect();
    client
        .write_area(MemoryArea::Marker, 0, 30, &data)
        .await
        .expect("chunked write");

    let read = client
        .read_area(MemoryArea::Marker, 0, 30, data.len())
        .await
        .expect("chunked read");
    assert_eq!(read, data);
}

#[tokio::test]
async fn area_read_of_data_block() {
    let mut client = small_pdu_client().await;

    client
        .write_area(MemoryArea::DataBlock, 1, 0, &[0xAB; 50])
        .await
        .expect("write db");
    let read = client
        .read_area(MemoryArea::DataBlock, 1, 0, 50)
        .await
        .expect("read db");
    assert_eq!(read, vec![0xAB; 50]);
}

#[tokio::test]
async fn area_access_to_missing_db_is_an_error() {
    let mut client = small_pdu_client().await;
    assert!(client
        .read_area(MemoryArea::DataBlock, 999, 0, 10)
        .await
        .is_err());
    assert!(client
        .write_area(MemoryArea::DataBlock, 999, 0, &[0x01; 10])
        .await
        .is_err());
}

#[tokio::test]
async fn area_transfer_past_the_address_space_is_rejected() {
    let mut client = small_pdu_client().await;
    let err = client
        .read_area(MemoryArea::Marker, 0, u32::MAX - 4, 64)
        .await
        .expect_err("start near the top of the address space");
    assert!(matches!(err, S7Error::InvalidAddress(_)));

    let err = client
        .write_area(MemoryArea::Marker, 0, u32::MAX - 4, &[0x01; 64])
        .await
        .expect_err("start near the top of the address space");
    assert!(matches!(err, S7Error::InvalidAddress(_)));
}

#[tokio::test]
async fn empty_area_transfers_are_no_ops() {
    let mut client = small_pdu_client().await;
    assert!(client
        .read_area(MemoryArea::Marker, 0, 0, 0)
        .await
        .expect("zero-length read")
        .is_empty());
    client
        .write_area(MemoryArea::Marker, 0, 0, &[])
        .await
        .expect("zero-length write");
}
