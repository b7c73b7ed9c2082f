//! Integration test for the UDP association path

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Duration};

use ssrelay::crypto::lookup_cipher;
use ssrelay::{Config, Encryptor, RelayManager};

const PASSWORD: &str = "integration";
const METHOD: &str = "chacha20";

fn test_config(server_port: u16) -> Config {
    let mut config = Config::default();
    config.profile.server = "127.0.0.1".to_string();
    config.profile.server_port = server_port;
    config.profile.local_port = 0;
    config.profile.method = METHOD.to_string();
    config.profile.password = PASSWORD.to_string();
    config.relay.sweep_interval = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn test_udp_associate_roundtrip() {
    // Fake server: open one sealed datagram, echo the address header with
    // a new payload, sealed again.
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let spec = lookup_cipher(METHOD).unwrap();
        let mut buf = vec![0u8; 4096];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        let plain = Encryptor::decrypt_once(PASSWORD, spec, &buf[..n]).unwrap();

        assert_eq!(plain[0], 0x01);
        assert_eq!(&plain[7..], b"ping");

        let mut reply = plain[..7].to_vec();
        reply.extend_from_slice(b"pong");
        let sealed = Encryptor::encrypt_once(PASSWORD, spec, &reply).unwrap();
        server.send_to(&sealed, peer).await.unwrap();
    });

    let manager = Arc::new(
        RelayManager::bind(test_config(server_addr.port()))
            .await
            .unwrap(),
    );
    let local_addr = manager.local_addr();
    let runner = manager.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    // SOCKS5 handshake and UDP ASSOCIATE over the control channel.
    let mut control = TcpStream::connect(local_addr).await.unwrap();
    control.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    control.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    control
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    control.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00);
    assert_eq!(reply[3], 0x01);
    let relay_port = u16::from_be_bytes([reply[8], reply[9]]);
    let relay_addr = SocketAddr::from(([127, 0, 0, 1], relay_port));

    // One datagram through the association.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut datagram = vec![0, 0, 0, 0x01, 8, 8, 8, 8, 0, 53];
    datagram.extend_from_slice(b"ping");
    client.send_to(&datagram, relay_addr).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let (n, from) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, relay_addr);
    assert_eq!(&buf[..3], [0, 0, 0]);
    assert_eq!(&buf[n - 4..n], b"pong");
}

#[tokio::test]
async fn test_fragmented_datagram_is_dropped() {
    let manager = Arc::new(RelayManager::bind(test_config(9)).await.unwrap());
    let local_addr = manager.local_addr();
    let runner = manager.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    let mut control = TcpStream::connect(local_addr).await.unwrap();
    control.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    control.read_exact(&mut reply).await.unwrap();

    control
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    control.read_exact(&mut reply).await.unwrap();
    let relay_port = u16::from_be_bytes([reply[8], reply[9]]);
    let relay_addr = SocketAddr::from(([127, 0, 0, 1], relay_port));

    // FRAG byte set: the mapper must ignore it entirely.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[0, 0, 1, 0x01, 1, 2, 3, 4, 0, 53, 0xaa], relay_addr)
        .await
        .unwrap();

    let mut buf = vec![0u8; 256];
    let result = timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
    assert!(result.is_err(), "no reply expected for fragmented datagram");
}
