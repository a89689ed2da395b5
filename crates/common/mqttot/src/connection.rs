use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::BytesMut;
use mqttbytes::v4;
use mqttbytes::QoS;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::connect::connect_packet;
use crate::Config;
use crate::IncomingPublish;
use crate::MqttotError;

const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

type AckWaiters = Arc<Mutex<HashMap<u16, oneshot::Sender<()>>>>;

enum Outgoing {
    Publish {
        topic: String,
        payload: Vec<u8>,
        ack: oneshot::Sender<()>,
    },
    PubAck(u16),
    Disconnect,
}

/// A live MQTToT connection.
///
/// Incoming publishes and terminal errors are delivered on separate channels;
/// outgoing traffic goes through a cloneable [`Publisher`]. The connection
/// owns an explicit stop flag, so a local disconnect is never mistaken for a
/// connection loss.
pub struct Connection {
    pub messages: mpsc::UnboundedReceiver<IncomingPublish>,
    pub errors: mpsc::UnboundedReceiver<MqttotError>,
    publisher: Publisher,
    stop: Arc<AtomicBool>,
}

/// Handle for publishing on a [`Connection`].
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Outgoing>,
}

/// Cloneable handle for requesting a clean local disconnect.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Outgoing::Disconnect);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Publisher {
    /// Publish with QoS 1 and wait for the broker's PUBACK.
    ///
    /// There is no per-request timeout; callers wrap this in their own.
    pub async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), MqttotError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Outgoing::Publish {
                topic,
                payload,
                ack: ack_tx,
            })
            .map_err(|_| MqttotError::ConnectionClosed)?;
        ack_rx.await.map_err(|_| MqttotError::ConnectionClosed)
    }
}

impl Connection {
    /// Open the TLS connection, send the MQTToT CONNECT frame and wait for a
    /// successful CONNACK.
    pub async fn connect(config: &Config) -> Result<Connection, MqttotError> {
        let tcp = open_tcp(config).await?;
        let mut tls = open_tls(config, tcp).await?;

        let connect = connect_packet(&config.client_id, config.keep_alive_secs);
        tls.write_all(&connect).await?;

        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match v4::read(&mut buf, MAX_PACKET_SIZE) {
                Ok(v4::Packet::ConnAck(ack)) => {
                    if ack.code != v4::ConnectReturnCode::Success {
                        return Err(MqttotError::ConnectRefused {
                            code: ack.code as u8,
                        });
                    }
                    debug!("MQTToT connection established");
                    break;
                }
                Ok(other) => {
                    warn!("Unexpected packet before CONNACK: {other:?}");
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => {
                    if tls.read_buf(&mut buf).await? == 0 {
                        return Err(MqttotError::ConnectionClosed);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let (reader, writer) = tokio::io::split(tls);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let waiters: AckWaiters = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_loop(
            writer,
            outgoing_rx,
            waiters.clone(),
            config.keep_alive_secs,
        ));
        tokio::spawn(reader_loop(
            reader,
            buf,
            message_tx,
            error_tx,
            outgoing_tx.clone(),
            waiters,
            stop.clone(),
        ));

        Ok(Connection {
            messages: message_rx,
            errors: error_rx,
            publisher: Publisher { tx: outgoing_tx },
            stop,
        })
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            tx: self.publisher.tx.clone(),
        }
    }

    /// Request a clean local disconnect. The read loop will wind down without
    /// reporting an error.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.publisher.tx.send(Outgoing::Disconnect);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

async fn open_tcp(config: &Config) -> Result<TcpStream, MqttotError> {
    match &config.proxy {
        None => Ok(TcpStream::connect((config.host.as_str(), config.port)).await?),
        Some(proxy) => {
            let proxy_host = proxy
                .host_str()
                .ok_or_else(|| MqttotError::Proxy("proxy URL has no host".to_string()))?;
            let proxy_port = proxy.port_or_known_default().unwrap_or(3128);
            debug!("Tunneling MQTT through proxy {proxy_host}:{proxy_port}");
            let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
            let result = if proxy.username().is_empty() {
                async_http_proxy::http_connect_tokio(&mut stream, &config.host, config.port).await
            } else {
                async_http_proxy::http_connect_tokio_with_basic_auth(
                    &mut stream,
                    &config.host,
                    config.port,
                    proxy.username(),
                    proxy.password().unwrap_or(""),
                )
                .await
            };
            result.map_err(|err| MqttotError::Proxy(err.to_string()))?;
            Ok(stream)
        }
    }
}

async fn open_tls(config: &Config, tcp: TcpStream) -> Result<TlsStream<TcpStream>, MqttotError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|_| MqttotError::InvalidHostName(config.host.clone()))?;
    let connector = TlsConnector::from(Arc::new(tls_config));
    Ok(connector.connect(server_name, tcp).await?)
}

async fn writer_loop(
    mut writer: WriteHalf<TlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    waiters: AckWaiters,
    keep_alive_secs: u16,
) {
    let period = Duration::from_secs(keep_alive_secs.max(1) as u64);
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pkid: u16 = 0;
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.clear();
        tokio::select! {
            _ = ping.tick() => {
                trace!("Sending PINGREQ");
                if v4::PingReq.write(&mut buf).is_err() || writer.write_all(&buf).await.is_err() {
                    break;
                }
            }
            msg = outgoing.recv() => match msg {
                None | Some(Outgoing::Disconnect) => {
                    let _ = v4::Disconnect.write(&mut buf);
                    let _ = writer.write_all(&buf).await;
                    let _ = writer.shutdown().await;
                    break;
                }
                Some(Outgoing::PubAck(id)) => {
                    if v4::PubAck::new(id).write(&mut buf).is_err()
                        || writer.write_all(&buf).await.is_err()
                    {
                        break;
                    }
                }
                Some(Outgoing::Publish { topic, payload, ack }) => {
                    pkid = if pkid == u16::MAX { 1 } else { pkid + 1 };
                    let mut publish = v4::Publish::new(topic.as_str(), QoS::AtLeastOnce, payload);
                    publish.pkid = pkid;
                    waiters.lock().unwrap().insert(pkid, ack);
                    if publish.write(&mut buf).is_err() || writer.write_all(&buf).await.is_err() {
                        break;
                    }
                    trace!("Published to {topic} with pkid {pkid}");
                }
            }
        }
    }
    // Dropping the waiters fails any publish still awaiting its PUBACK.
    waiters.lock().unwrap().clear();
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    mut reader: ReadHalf<TlsStream<TcpStream>>,
    mut buf: BytesMut,
    messages: mpsc::UnboundedSender<IncomingPublish>,
    errors: mpsc::UnboundedSender<MqttotError>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    waiters: AckWaiters,
    stop: Arc<AtomicBool>,
) {
    let result = loop {
        match v4::read(&mut buf, MAX_PACKET_SIZE) {
            Ok(v4::Packet::Publish(publish)) => {
                if publish.qos == QoS::AtLeastOnce {
                    let _ = outgoing.send(Outgoing::PubAck(publish.pkid));
                }
                trace!("Incoming publish on {}", publish.topic);
                if messages
                    .send(IncomingPublish {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    })
                    .is_err()
                {
                    break Ok(());
                }
            }
            Ok(v4::Packet::PubAck(ack)) => {
                if let Some(waiter) = waiters.lock().unwrap().remove(&ack.pkid) {
                    let _ = waiter.send(());
                }
            }
            Ok(v4::Packet::PingResp) => {}
            // The server advertises disconnects with a v3.1 DISCONNECT.
            Ok(v4::Packet::Disconnect) => break Err(MqttotError::ServerDisconnect),
            Ok(other) => trace!("Ignoring packet {other:?}"),
            Err(mqttbytes::Error::InsufficientBytes(_)) => match reader.read_buf(&mut buf).await {
                Ok(0) => break Err(MqttotError::ConnectionClosed),
                Ok(_) => {}
                Err(err) => break Err(err.into()),
            },
            Err(err) => break Err(err.into()),
        }
    };
    if let Err(err) = result {
        if stop.load(Ordering::SeqCst) {
            debug!("Connection closed after local stop: {err}");
        } else {
            let _ = errors.send(err);
        }
    }
    // Closing the message channel tells the listener the connection is done.
}
