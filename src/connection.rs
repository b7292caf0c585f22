//! TLS and MQTT plumbing shared by the provisioning session and the device client

use std::fmt::Debug;
use std::sync::Arc;

use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::*;
use mqtt::{Encodable, QualityOfService, TopicFilter, TopicName};
use tokio::io::AsyncWriteExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::error::TransportError;

pub(crate) const MQTT_TLS_PORT: u16 = 8883;

const INBOUND_CAPACITY: usize = 16;

type Stream = TlsStream<TcpStream>;

fn protocol_error<E: Debug>(err: E) -> TransportError {
    TransportError::Protocol(format!("{:?}", err))
}

async fn tls_connect(host: &str) -> Result<Stream, TransportError> {
    let socket = TcpStream::connect((host, MQTT_TLS_PORT)).await?;

    trace!("Connected to tcp socket {:?}", socket);

    let cx = TlsConnector::from(
        native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?,
    );

    let socket = cx.connect(host, socket).await?;

    trace!("Connected tls context {:?}", cx);

    Ok(socket)
}

/// Everything needed for the MQTT CONNECT handshake
#[derive(Debug)]
pub(crate) struct ConnectOptions<'a> {
    pub host: &'a str,
    pub client_id: &'a str,
    pub user_name: String,
    pub password: String,
    pub keep_alive: u16,
}

/// Something read off the connection by the reader task
#[derive(Debug)]
pub(crate) enum Inbound {
    Publish { topic: String, payload: Vec<u8> },
    PingResponse,
    /// The connection failed, nothing follows
    Closed(String),
}

/// Write side of a connection, cheap to clone
#[derive(Debug, Clone)]
pub(crate) struct PacketWriter {
    socket: Arc<Mutex<WriteHalf<Stream>>>,
}

impl PacketWriter {
    async fn write(&self, packet: VariablePacket) -> Result<(), TransportError> {
        let mut buf = Vec::new();
        packet.encode(&mut buf).map_err(protocol_error)?;

        self.socket
            .lock()
            .await
            .write_all(&buf[..])
            .await
            .map_err(TransportError::from)
    }

    pub async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError> {
        trace!("Publishing {} bytes to {}", payload.len(), topic);
        let topic = TopicName::new(topic).map_err(protocol_error)?;
        let packet = PublishPacket::new(topic, QoSWithPacketIdentifier::Level0, payload);
        self.write(VariablePacket::PublishPacket(packet)).await
    }

    pub async fn subscribe(
        &self,
        packet_id: u16,
        filters: &[String],
    ) -> Result<(), TransportError> {
        let topics = filters
            .iter()
            .map(|filter| {
                TopicFilter::new(filter.as_str())
                    .map(|filter| (filter, QualityOfService::Level0))
                    .map_err(protocol_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        trace!("Subscribing to {:?}", topics);

        self.write(VariablePacket::SubscribePacket(SubscribePacket::new(
            packet_id, topics,
        )))
        .await
    }

    pub async fn unsubscribe(
        &self,
        packet_id: u16,
        filters: &[String],
    ) -> Result<(), TransportError> {
        let topics = filters
            .iter()
            .map(|filter| TopicFilter::new(filter.as_str()).map_err(protocol_error))
            .collect::<Result<Vec<_>, _>>()?;

        trace!("Unsubscribing to {:?}", topics);

        self.write(VariablePacket::UnsubscribePacket(UnsubscribePacket::new(
            packet_id, topics,
        )))
        .await
    }

    pub async fn ping(&self) -> Result<(), TransportError> {
        self.write(VariablePacket::PingreqPacket(PingreqPacket::new()))
            .await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.write(VariablePacket::DisconnectPacket(DisconnectPacket::new()))
            .await
    }
}

/// An established MQTT session with a task reading packets into `incoming`
#[derive(Debug)]
pub(crate) struct MqttConnection {
    pub writer: PacketWriter,
    pub incoming: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
}

impl MqttConnection {
    pub async fn connect(options: ConnectOptions<'_>) -> Result<MqttConnection, TransportError> {
        let mut socket = tls_connect(options.host).await?;

        let mut conn = ConnectPacket::new(options.client_id);
        conn.set_client_identifier(options.client_id);
        conn.set_clean_session(false);
        conn.set_keep_alive(options.keep_alive);
        conn.set_user_name(Some(options.user_name));
        conn.set_password(Some(options.password));

        let mut buf = Vec::new();
        conn.encode(&mut buf).map_err(protocol_error)?;
        socket.write_all(&buf[..]).await?;

        let packet = VariablePacket::parse(&mut socket).await;

        trace!("PACKET {:?}", packet);
        match packet {
            Ok(VariablePacket::ConnackPacket(connack)) => {
                if connack.connect_return_code() != ConnectReturnCode::ConnectionAccepted {
                    return Err(TransportError::ConnectionRefused(format!(
                        "{:?}",
                        connack.connect_return_code()
                    )));
                }
            }
            Ok(pck) => {
                return Err(TransportError::Protocol(format!(
                    "Unexpected packet received after connect {:?}",
                    pck
                )))
            }
            Err(err) => return Err(protocol_error(err)),
        }

        debug!("MQTT session established with {}", options.host);

        let (read_socket, write_socket) = tokio::io::split(socket);
        let (incoming, reader) = spawn_reader(read_socket);

        Ok(MqttConnection {
            writer: PacketWriter {
                socket: Arc::new(Mutex::new(write_socket)),
            },
            incoming,
            reader,
        })
    }

    /// Send DISCONNECT and stop reading. Failures are only logged, the
    /// connection is gone either way.
    pub async fn close(self) {
        if let Err(err) = self.writer.disconnect().await {
            warn!("Failed to send DISCONNECT: {}", err);
        }
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn spawn_reader(mut socket: ReadHalf<Stream>) -> (mpsc::Receiver<Inbound>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

    let handle = tokio::spawn(async move {
        loop {
            let inbound = match VariablePacket::parse(&mut socket).await {
                Ok(VariablePacket::PublishPacket(ref publ)) => Inbound::Publish {
                    topic: publ.topic_name().to_owned(),
                    payload: publ.payload_ref()[..].to_vec(),
                },
                Ok(VariablePacket::PingrespPacket(..)) => Inbound::PingResponse,
                Ok(packet) => {
                    trace!("Ignoring PACKET {:?}", packet);
                    continue;
                }
                Err(err) => {
                    error!("Error in receiving packet {:?}", err);
                    let _ = tx.send(Inbound::Closed(format!("{:?}", err))).await;
                    break;
                }
            };

            // Receiver dropped, nobody is listening anymore
            if tx.send(inbound).await.is_err() {
                break;
            }
        }
    });

    (rx, handle)
}
