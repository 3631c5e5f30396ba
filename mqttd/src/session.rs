//! Client session: one task per network connection.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::{Broker, ClientEntry, Subscriber};
use crate::error::{Error, Result};
use crate::protocol::{self, ConnectReturnCode, Packet, SubscribeReasonCode};
use crate::topic::{validate_filter, validate_topic};
use crate::types::{Message, QoS};

/// Why a session loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Client sent DISCONNECT.
    Disconnect,
    /// Broker closed or another connection took the client id.
    Cancelled,
}

/// Serve a connection from CONNECT to cleanup.
pub(crate) async fn serve<S>(broker: &Broker, stream: S, peer: SocketAddr, shutdown: CancellationToken) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let config = broker.config().clone();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(4096);

    let first = tokio::select! {
        _ = shutdown.cancelled() => return Err(Error::NotRunning),
        _ = broker.inner.shutdown.cancelled() => return Err(Error::NotRunning),
        first = timeout(
            config.connect_timeout,
            protocol::read_packet(&mut reader, &mut buf, config.max_packet_size),
        ) => first.map_err(|_| Error::Timeout("waiting for CONNECT".to_string()))??,
    };

    let connect = match first {
        Packet::Connect(connect) => connect,
        other => {
            return Err(Error::UnexpectedPacket {
                expected: "CONNECT".to_string(),
                got: format!("{:?}", other),
            });
        }
    };

    if !broker.is_running() {
        protocol::write_packet(&mut writer, protocol::create_connack(ConnectReturnCode::ServiceUnavailable)).await?;
        return Err(Error::NotRunning);
    }

    let client_id = if connect.client_id.is_empty() {
        format!("auto-{}", uuid::Uuid::new_v4().simple())
    } else {
        connect.client_id.clone()
    };

    let (username, password) = match &connect.login {
        Some(login) => (login.username.as_str(), login.password.as_bytes()),
        None => ("", &[][..]),
    };
    if !broker.inner.authenticator.authenticate(&client_id, username, password) {
        let code = if connect.login.is_some() {
            ConnectReturnCode::BadUserNamePassword
        } else {
            ConnectReturnCode::NotAuthorized
        };
        protocol::write_packet(&mut writer, protocol::create_connack(code)).await?;
        warn!("client {} from {} failed authentication", client_id, peer);
        return Err(Error::AuthenticationFailed);
    }

    protocol::write_packet(&mut writer, protocol::create_connack(ConnectReturnCode::Success)).await?;

    let (tx, rx) = mpsc::channel(config.max_queued_messages);
    // cancelled by takeover, by the accepting listener or by broker close
    let cancel = shutdown.child_token();
    broker.register_client(
        &client_id,
        ClientEntry {
            tx: tx.clone(),
            cancel: cancel.clone(),
        },
    );
    info!("client {} connected from {}", client_id, peer);

    let mut session = Session {
        broker,
        client_id: Arc::from(client_id.as_str()),
        tx,
        filters: HashSet::new(),
        next_pkid: 0,
        outbound: HashMap::new(),
        inbound_qos2: HashSet::new(),
    };

    let keep_alive = Duration::from_secs(u64::from(connect.keep_alive));
    let result = session
        .run(&mut reader, &mut writer, &mut buf, rx, cancel, keep_alive, config.max_packet_size)
        .await;

    broker.cleanup_client(&client_id, &session.tx, session.filters.iter());

    let graceful = matches!(result, Ok(Exit::Disconnect));
    if !graceful && let Some(will) = connect.last_will {
        let msg = Message {
            topic: will.topic,
            payload: will.message,
            qos: will.qos.into(),
            retain: will.retain,
        };
        debug!("publishing will of client {} to {}", client_id, msg.topic);
        if let Err(e) = broker.publish(msg) {
            debug!("dropping will of client {}: {}", client_id, e);
        }
    }

    match result {
        Ok(exit) => {
            info!("client {} disconnected ({:?})", client_id, exit);
            Ok(())
        }
        Err(Error::ConnectionClosed) => {
            info!("client {} closed the connection", client_id);
            Ok(())
        }
        Err(e) => {
            info!("client {} dropped: {}", client_id, e);
            Err(e)
        }
    }
}

struct Session<'a> {
    broker: &'a Broker,
    client_id: Arc<str>,
    tx: mpsc::Sender<Message>,
    /// Filters this session subscribed to.
    filters: HashSet<String>,
    next_pkid: u16,
    /// Outbound QoS 1/2 publishes awaiting PUBACK or PUBCOMP.
    outbound: HashMap<u16, QoS>,
    /// Inbound QoS 2 packet ids awaiting PUBREL.
    inbound_qos2: HashSet<u16>,
}

impl Session<'_> {
    #[allow(clippy::too_many_arguments)]
    async fn run<S>(
        &mut self,
        reader: &mut ReadHalf<S>,
        writer: &mut WriteHalf<S>,
        buf: &mut BytesMut,
        mut rx: mpsc::Receiver<Message>,
        cancel: CancellationToken,
        keep_alive: Duration,
        max_packet_size: usize,
    ) -> Result<Exit>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // a client is dropped after 1.5 keep-alive periods of silence
        let grace = keep_alive + keep_alive / 2;
        let mut deadline = Instant::now() + grace;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(Exit::Cancelled);
                }

                _ = self.broker.inner.shutdown.cancelled() => {
                    return Ok(Exit::Cancelled);
                }

                _ = sleep_until(deadline), if !keep_alive.is_zero() => {
                    return Err(Error::Timeout("keep alive expired".to_string()));
                }

                Some(msg) = rx.recv() => {
                    self.deliver(writer, msg).await?;
                }

                packet = protocol::read_packet(reader, buf, max_packet_size) => {
                    let packet = packet?;
                    deadline = Instant::now() + grace;
                    if let Some(exit) = self.handle_packet(writer, packet).await? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    async fn handle_packet<W>(&mut self, writer: &mut W, packet: Packet) -> Result<Option<Exit>>
    where
        W: AsyncWrite + Unpin,
    {
        match packet {
            Packet::Publish(publish) => {
                validate_topic(&publish.topic)?;
                let qos = QoS::from(publish.qos);
                let msg = Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos,
                    retain: publish.retain,
                };
                let allowed = self.broker.inner.authenticator.acl(&self.client_id, &msg.topic, true);
                if !allowed {
                    warn!("client {} may not publish to {}", self.client_id, msg.topic);
                }

                match qos {
                    QoS::AtMostOnce => {
                        if allowed {
                            self.broker.route(&msg);
                        }
                    }
                    QoS::AtLeastOnce => {
                        if allowed {
                            self.broker.route(&msg);
                        }
                        protocol::write_packet(writer, protocol::create_puback(publish.pkid)).await?;
                    }
                    QoS::ExactlyOnce => {
                        // route once per packet id until PUBREL
                        if self.inbound_qos2.insert(publish.pkid) && allowed {
                            self.broker.route(&msg);
                        }
                        protocol::write_packet(writer, protocol::create_pubrec(publish.pkid)).await?;
                    }
                }
            }

            Packet::PubRel(rel) => {
                self.inbound_qos2.remove(&rel.pkid);
                protocol::write_packet(writer, protocol::create_pubcomp(rel.pkid)).await?;
            }

            Packet::PubAck(ack) => {
                self.outbound.remove(&ack.pkid);
            }

            Packet::PubRec(rec) => {
                protocol::write_packet(writer, protocol::create_pubrel(rec.pkid)).await?;
            }

            Packet::PubComp(comp) => {
                self.outbound.remove(&comp.pkid);
            }

            Packet::Subscribe(subscribe) => {
                let mut codes = Vec::with_capacity(subscribe.filters.len());
                let mut granted = Vec::new();
                for filter in subscribe.filters {
                    let qos = QoS::from(filter.qos);
                    match self.subscribe(&filter.path, qos) {
                        Ok(()) => {
                            codes.push(SubscribeReasonCode::Success(filter.qos));
                            granted.push((filter.path, qos));
                        }
                        Err(e) => {
                            warn!("client {} subscribe {:?} refused: {}", self.client_id, filter.path, e);
                            codes.push(SubscribeReasonCode::Failure);
                        }
                    }
                }
                protocol::write_packet(writer, protocol::create_suback(subscribe.pkid, codes)).await?;

                for (filter, qos) in granted {
                    let retained = self.broker.inner.retained.read().matching(&filter);
                    for msg in retained {
                        let qos = msg.qos.min(qos);
                        self.deliver(writer, msg.with_qos(qos).with_retain(true)).await?;
                    }
                }
            }

            Packet::Unsubscribe(unsubscribe) => {
                for filter in &unsubscribe.topics {
                    self.unsubscribe(filter);
                }
                protocol::write_packet(writer, protocol::create_unsuback(unsubscribe.pkid)).await?;
            }

            Packet::PingReq => {
                protocol::write_packet(writer, protocol::create_pingresp()).await?;
            }

            Packet::Disconnect => {
                return Ok(Some(Exit::Disconnect));
            }

            Packet::Connect(_) => {
                return Err(Error::Protocol("second CONNECT on one connection".to_string()));
            }

            other => {
                trace!("client {} sent unhandled packet {:?}", self.client_id, other);
            }
        }
        Ok(None)
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<()> {
        validate_filter(filter)?;
        if !self.broker.inner.authenticator.acl(&self.client_id, filter, false) {
            return Err(Error::AuthenticationFailed);
        }
        let subscriber = Subscriber::Client {
            client_id: Arc::clone(&self.client_id),
            tx: self.tx.clone(),
            qos,
        };
        let tx = &self.tx;
        self.broker.inner.subscriptions.write().replace(filter, subscriber, |s| {
            matches!(s, Subscriber::Client { tx: t, .. } if t.same_channel(tx))
        })?;
        self.filters.insert(filter.to_string());
        debug!("client {} subscribed to {} at {:?}", self.client_id, filter, qos);
        Ok(())
    }

    fn unsubscribe(&mut self, filter: &str) {
        let tx = &self.tx;
        let removed = self.broker.inner.subscriptions.write().remove(filter, |s| {
            matches!(s, Subscriber::Client { tx: t, .. } if t.same_channel(tx))
        });
        self.filters.remove(filter);
        debug!("client {} unsubscribed from {} ({} removed)", self.client_id, filter, removed);
    }

    /// Write a message to the client, allocating a packet id for QoS 1/2.
    async fn deliver<W>(&mut self, writer: &mut W, msg: Message) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let pkid = match msg.qos {
            QoS::AtMostOnce => 0,
            qos => {
                let pkid = self.next_packet_id();
                self.outbound.insert(pkid, qos);
                pkid
            }
        };
        trace!("delivering {} to {} (pkid {})", msg.topic, self.client_id, pkid);
        protocol::write_packet(
            writer,
            protocol::create_publish(&msg.topic, msg.payload, msg.qos, msg.retain, pkid),
        )
        .await
    }

    fn next_packet_id(&mut self) -> u16 {
        loop {
            self.next_pkid = self.next_pkid.wrapping_add(1);
            if self.next_pkid == 0 {
                continue;
            }
            if !self.outbound.contains_key(&self.next_pkid) {
                return self.next_pkid;
            }
            if self.outbound.len() >= usize::from(u16::MAX) {
                // every id is in flight; reuse the oldest slot
                warn!("client {} has {} unacknowledged publishes", self.client_id, self.outbound.len());
                self.outbound.remove(&self.next_pkid);
                return self.next_pkid;
            }
        }
    }
}
