//! Loopback MQTT 3.1.1 broker stand-in
//!
//! Framing and packet encoding come from rumqttc's `mqttbytes::v4` codec, the
//! same one the client uses. The broker only answers what the relay sends:
//! CONNECT, QoS 1 PUBLISH, PINGREQ and DISCONNECT.

use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4, QoS};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub use rumqttc::mqttbytes::v4::{ConnectReturnCode, Packet, Publish};
use v4::{ConnAck, PingResp, PubAck};

const MAX_PACKET_SIZE: usize = 64 * 1024;

/// A listening broker on an ephemeral loopback port
pub struct FakeBroker {
    listener: TcpListener,
    port: u16,
}

/// One accepted client connection
pub struct BrokerSession {
    stream: TcpStream,
    buffer: BytesMut,
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn codec_error(e: mqttbytes::Error) -> io::Error {
    invalid_data(e.to_string())
}

impl FakeBroker {
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("mqtt://127.0.0.1:{}", self.port)
    }

    /// Accept a client, read its CONNECT and answer with `code`
    pub async fn accept(&self, code: ConnectReturnCode) -> io::Result<BrokerSession> {
        let (stream, _) = self.listener.accept().await?;
        let mut session = BrokerSession {
            stream,
            buffer: BytesMut::with_capacity(1024),
        };

        match session.read_packet().await? {
            Packet::Connect(_) => {}
            other => return Err(invalid_data(format!("expected CONNECT, got {other:?}"))),
        }
        session
            .send(|buf| ConnAck::new(code, false).write(buf))
            .await?;
        Ok(session)
    }
}

impl BrokerSession {
    /// Read one control packet.
    ///
    /// A closed socket surfaces as `UnexpectedEof`.
    pub async fn read_packet(&mut self) -> io::Result<Packet> {
        loop {
            match v4::read(&mut self.buffer, MAX_PACKET_SIZE) {
                Ok(packet) => return Ok(packet),
                Err(mqttbytes::Error::InsufficientBytes(_)) => {}
                Err(e) => return Err(codec_error(e)),
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed the connection",
                ));
            }
        }
    }

    /// Read the next packet, which must be a QoS 1 PUBLISH
    pub async fn expect_publish(&mut self) -> io::Result<Publish> {
        match self.read_packet().await? {
            Packet::Publish(publish) => qos1(publish),
            other => Err(invalid_data(format!("expected PUBLISH, got {other:?}"))),
        }
    }

    /// Next PUBLISH from the client, answering keepalive pings on the way.
    ///
    /// Returns `None` once the client disconnects or closes the socket.
    pub async fn next_publish(&mut self) -> io::Result<Option<Publish>> {
        loop {
            let packet = match self.read_packet().await {
                Ok(packet) => packet,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            };
            match packet {
                Packet::PingReq => self.send(|buf| PingResp.write(buf)).await?,
                Packet::Disconnect => return Ok(None),
                Packet::Publish(publish) => return qos1(publish).map(Some),
                other => return Err(invalid_data(format!("unexpected packet {other:?}"))),
            }
        }
    }

    pub async fn puback(&mut self, pkid: u16) -> io::Result<()> {
        self.send(|buf| PubAck::new(pkid).write(buf)).await
    }

    /// Drop the TCP connection without an MQTT DISCONNECT
    pub fn sever(self) {
        drop(self.stream);
    }

    async fn send<F>(&mut self, encode: F) -> io::Result<()>
    where
        F: FnOnce(&mut BytesMut) -> Result<usize, mqttbytes::Error>,
    {
        let mut buf = BytesMut::new();
        encode(&mut buf).map_err(codec_error)?;
        self.stream.write_all(&buf).await
    }
}

fn qos1(publish: Publish) -> io::Result<Publish> {
    if publish.qos != QoS::AtLeastOnce {
        return Err(invalid_data(format!(
            "expected QoS 1 PUBLISH, got {:?}",
            publish.qos
        )));
    }
    Ok(publish)
}
