//! MQTT 3.1.1 packet I/O.
//!
//! Framing and encoding are delegated to the `rumqttc` v4 codec; this
//! module adds async read/write over any byte stream and constructors for
//! the packets the broker sends.

use bytes::{Bytes, BytesMut};
use rumqttc::mqttbytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::types::QoS;

pub use rumqttc::mqttbytes::v4::*;

/// Maximum packet size (1MB default).
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Read one packet, pulling more bytes from `reader` as needed.
///
/// Bytes past the end of the packet stay in `buf` for the next call, so a
/// read that is cancelled between packets loses nothing.
pub async fn read_packet<R>(reader: &mut R, buf: &mut BytesMut, max_size: usize) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    loop {
        match Packet::read(buf, max_size) {
            Ok(packet) => return Ok(packet),
            Err(mqttbytes::Error::InsufficientBytes(needed)) => buf.reserve(needed),
            Err(e) => return Err(e.into()),
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

/// Encode and flush one packet.
pub async fn write_packet<W>(writer: &mut W, packet: Packet) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = BytesMut::new();
    packet.write(&mut frame, MAX_PACKET_SIZE)?;
    writer.write_all(&frame).await?;
    writer.flush().await.map_err(Error::from)
}

/// CONNECT with a clean session.
#[cfg(test)]
pub(crate) fn create_connect(client_id: &str, login: Option<(&str, &str)>, keep_alive: u16) -> Packet {
    let mut connect = Connect::new(client_id);
    connect.keep_alive = keep_alive;
    if let Some((username, password)) = login {
        connect.set_login(username, password);
    }
    Packet::Connect(connect)
}

/// Create a CONNACK packet.
pub fn create_connack(code: ConnectReturnCode) -> Packet {
    Packet::ConnAck(ConnAck::new(code, false))
}

/// Create a PUBLISH packet. `pkid` must be 0 for QoS 0.
pub fn create_publish(topic: &str, payload: Bytes, qos: QoS, retain: bool, pkid: u16) -> Packet {
    Packet::Publish(Publish {
        dup: false,
        qos: qos.into(),
        retain,
        topic: topic.to_string(),
        pkid,
        payload,
    })
}

/// Create a PUBACK packet.
pub fn create_puback(pkid: u16) -> Packet {
    Packet::PubAck(PubAck::new(pkid))
}

/// Create a PUBREC packet.
pub fn create_pubrec(pkid: u16) -> Packet {
    Packet::PubRec(PubRec::new(pkid))
}

/// Create a PUBREL packet.
pub fn create_pubrel(pkid: u16) -> Packet {
    Packet::PubRel(PubRel::new(pkid))
}

/// Create a PUBCOMP packet.
pub fn create_pubcomp(pkid: u16) -> Packet {
    Packet::PubComp(PubComp::new(pkid))
}

/// Create a SUBACK packet.
pub fn create_suback(pkid: u16, return_codes: Vec<SubscribeReasonCode>) -> Packet {
    Packet::SubAck(SubAck::new(pkid, return_codes))
}

/// Create an UNSUBACK packet.
pub fn create_unsuback(pkid: u16) -> Packet {
    Packet::UnsubAck(UnsubAck::new(pkid))
}

/// Create a PINGRESP packet.
pub fn create_pingresp() -> Packet {
    Packet::PingResp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_publish_qos1() {
        let packet = create_publish("device/status/A:1", Bytes::from_static(b"1"), QoS::AtLeastOnce, true, 7);
        let Packet::Publish(publish) = packet else {
            panic!("not a publish packet");
        };
        assert_eq!(publish.topic, "device/status/A:1");
        assert_eq!(publish.qos, mqttbytes::QoS::AtLeastOnce);
        assert_eq!(publish.pkid, 7);
        assert!(publish.retain);
    }

    #[tokio::test]
    async fn test_write_then_read_packet() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_packet(&mut client, create_connect("client-1", Some(("user", "pass")), 30))
            .await
            .unwrap();
        write_packet(&mut client, create_pubrel(9)).await.unwrap();

        let mut buf = BytesMut::new();
        match read_packet(&mut server, &mut buf, MAX_PACKET_SIZE).await.unwrap() {
            Packet::Connect(connect) => {
                assert_eq!(connect.client_id, "client-1");
                assert_eq!(connect.keep_alive, 30);
                assert_eq!(connect.login.unwrap().username, "user");
            }
            other => panic!("not a connect: {:?}", other),
        }
        match read_packet(&mut server, &mut buf, MAX_PACKET_SIZE).await.unwrap() {
            Packet::PubRel(rel) => assert_eq!(rel.pkid, 9),
            other => panic!("not a pubrel: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_packet_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let mut buf = BytesMut::new();
        let err = read_packet(&mut server, &mut buf, MAX_PACKET_SIZE).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
