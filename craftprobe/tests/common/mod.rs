//! Loopback stand-ins for real servers.

#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use craftprobe::{
    OFFLINE_MESSAGE_DATA_ID, ProbeConfig,
    codec::{decode_varint, read_frame, write_frame, write_string, write_varint},
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
};

pub const STATUS_JSON: &str = r#"{
    "version": {"name": "1.20.4", "protocol": 765},
    "players": {"max": 100, "online": 3, "sample": [{"name": "Notch", "id": "069a79f4-44e9-4726-a5be-fca90e38aaf5"}]},
    "description": {"text": "A ", "extra": [{"text": "Minecraft Server"}]},
    "favicon": "data:image/png;base64,iVBORw0KGgo=",
    "enforcesSecureChat": true
}"#;

pub const BEDROCK_PAYLOAD: &str =
    "MCPE;Dedicated Server;662;1.20.71;2;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;";

/// Short timeouts so failing cases finish quickly.
pub fn test_config() -> ProbeConfig {
    ProbeConfig {
        tcp_timeout: Duration::from_millis(500),
        query_timeout: Duration::from_millis(300),
        bedrock_timeout: Duration::from_millis(500),
        bedrock_retry_interval: Duration::from_millis(100),
        lookup_timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    }
}

/// A Java server that answers every connection with `json` and echoes pings.
pub async fn java_server(json: &'static str) -> (SocketAddr, JoinHandle<()>) {
    java_server_with(json, Duration::ZERO, true).await
}

/// A Java server that sends `json` after `delay`, then keeps the connection
/// open without ever answering the ping.
pub async fn mute_after_status_server(
    json: &'static str,
    delay: Duration,
) -> (SocketAddr, JoinHandle<()>) {
    java_server_with(json, delay, false).await
}

async fn java_server_with(
    json: &'static str,
    delay: Duration,
    answer_ping: bool,
) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                // handshake, then status request
                let handshake = read_frame(&mut stream).await.unwrap();
                assert_eq!(decode_varint(&mut handshake.as_slice()).unwrap(), 0x00);
                let request = read_frame(&mut stream).await.unwrap();
                assert_eq!(request, [0x00]);

                tokio::time::sleep(delay).await;
                let mut body = Vec::new();
                write_varint(&mut body, 0x00);
                write_string(&mut body, json);
                let mut frame = Vec::new();
                write_frame(&mut frame, &body);
                stream.write_all(&frame).await.unwrap();

                // The ping's body is id 0x01 then the payload; the pong mirrors it.
                let Ok(ping) = read_frame(&mut stream).await else {
                    return;
                };
                if answer_ping {
                    let mut frame = Vec::new();
                    write_frame(&mut frame, &ping);
                    let _ = stream.write_all(&frame).await;
                } else {
                    std::future::pending::<()>().await;
                }
            });
        }
    });
    (addr, handle)
}

/// A TCP listener that accepts and then never says anything.
pub async fn silent_tcp_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (addr, handle)
}

/// A query responder on `addr` serving a fixed full stat.
pub async fn query_server(addr: SocketAddr) -> JoinHandle<()> {
    let socket = UdpSocket::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let request = &buf[..len];
            assert_eq!(&request[..2], &[0xfe, 0xfd]);
            let session = &request[3..7];
            let mut reply = vec![request[2]];
            reply.extend_from_slice(session);
            match request[2] {
                0x09 => reply.extend_from_slice(b"9513307\0"),
                0x00 => {
                    assert_eq!(&request[7..11], &9_513_307u32.to_be_bytes());
                    reply.extend_from_slice(b"splitnum\0\x80\0");
                    reply.extend_from_slice(
                        b"hostname\0A Minecraft Server\0gametype\0SMP\0game_id\0MINECRAFT\0\
                          version\x001.20.4\0plugins\0Paper on 1.20.4: WorldEdit 7.2; Essentials 2.20\0\
                          map\0world\0numplayers\x003\0maxplayers\x00100\0hostport\x0025565\0\
                          hostip\x00127.0.0.1\0\0",
                    );
                    reply.extend_from_slice(b"\x01player_\x00\x00Notch\0jeb_\0\0");
                }
                other => panic!("unexpected query packet {other:#04x}"),
            }
            let _ = socket.send_to(&reply, peer).await;
        }
    })
}

/// A Bedrock server answering unconnected pings with `payload`.
pub async fn bedrock_server(payload: &'static str) -> (SocketAddr, JoinHandle<()>) {
    bedrock_server_ignoring(payload, 0).await
}

/// A Bedrock server that drops the first `ignored` pings, as a lossy link would.
pub async fn bedrock_server_ignoring(
    payload: &'static str,
    ignored: usize,
) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let mut seen = 0;
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            assert_eq!(len, 33);
            assert_eq!(buf[0], 0x01);
            assert_eq!(&buf[9..25], OFFLINE_MESSAGE_DATA_ID);
            seen += 1;
            if seen <= ignored {
                continue;
            }

            let mut pong = vec![0x1c];
            pong.extend_from_slice(&buf[1..9]);
            pong.extend_from_slice(&0x1234_5678_9abc_def0_u64.to_be_bytes());
            pong.extend_from_slice(OFFLINE_MESSAGE_DATA_ID);
            pong.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_be_bytes());
            pong.extend_from_slice(payload.as_bytes());
            let _ = socket.send_to(&pong, peer).await;
        }
    });
    (addr, handle)
}

/// A UDP socket that swallows everything sent to it.
pub async fn silent_udp_server(addr: SocketAddr) -> JoinHandle<()> {
    let socket = UdpSocket::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        while socket.recv_from(&mut buf).await.is_ok() {}
    })
}
