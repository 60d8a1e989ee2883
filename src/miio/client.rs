use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::mqtt::StatePublisher;
use crate::state::SharedState;

use super::classify::{handle_msg, handle_reply};
use super::codec::{Codec, decode};
use super::commands;
use super::{
    DATAGRAM_MAX_LEN, IDLE_RECV_TIMEOUT, OutboundCommand, PING_INTERVAL, PONG_METHOD,
    ProtocolMessage, REPLY_TIMEOUT,
};

pub const QUEUE_CAPACITY: usize = 100;

/// Topic the gateway's reachability is published on.
pub const STATUS_TOPIC: &str = "internal/state";

/// Producer side of the bounded outbound queue. Cloneable; a full queue
/// rejects new commands.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<OutboundCommand>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Returns whether the command was accepted.
    pub fn push(&self, command: OutboundCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                debug!("Command queue full, dropping {}", command.method);
                false
            }
            Err(TrySendError::Closed(command)) => {
                warn!("Command queue closed, dropping {}", command.method);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub reply_timeout: Duration,
    pub idle_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reply_timeout: REPLY_TIMEOUT,
            idle_timeout: IDLE_RECV_TIMEOUT,
            ping_interval: PING_INTERVAL,
        }
    }
}

/// Talks to the gateway: one request at a time, each followed by its reply
/// window, then a short listen for unsolicited reports.
pub struct MiioClient<P> {
    socket: UdpSocket,
    gateway: SocketAddr,
    codec: Codec,
    queue: CommandQueue,
    commands: mpsc::Receiver<OutboundCommand>,
    state: SharedState,
    publisher: P,
    timings: Timings,
    last_ping: Instant,
}

impl<P: StatePublisher> MiioClient<P> {
    pub async fn connect(
        gateway: &str,
        queue: CommandQueue,
        commands: mpsc::Receiver<OutboundCommand>,
        state: SharedState,
        publisher: P,
    ) -> Result<Self> {
        let gateway = tokio::net::lookup_host(gateway)
            .await?
            .next()
            .ok_or_else(|| BridgeError::Config(format!("cannot resolve gateway {gateway}")))?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            socket,
            gateway,
            codec: Codec::new(),
            queue,
            commands,
            state,
            publisher,
            timings: Timings::default(),
            last_ping: Instant::now(),
        })
    }

    #[cfg(test)]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Governing loop. Never returns.
    pub async fn run(mut self) {
        match self.local_addr() {
            Ok(local) => info!("Talking to gateway at {} from {}", self.gateway, local),
            Err(e) => warn!("Talking to gateway at {} from unknown address: {}", self.gateway, e),
        }
        loop {
            self.run_once().await;
        }
    }

    /// One loop iteration: drain the queue, listen for reports, schedule the
    /// ping, check liveness and advance the running effect.
    pub async fn run_once(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.exchange(command).await;
        }

        self.receive_reports().await;

        let now = Instant::now();
        if now.duration_since(self.last_ping) > self.timings.ping_interval {
            self.queue.push(commands::ping());
            self.last_ping = now;
        }

        let (online, effect_command) = {
            let mut state = self.state.lock();
            (state.liveness.is_recent(now), state.effect.tick(now))
        };
        if !online {
            self.publisher.publish(STATUS_TOPIC, "OFFLINE");
        }
        // effect steps get no reply window; their late replies carry a stale
        // id and are passed over by the next exchange
        if let Some(command) = effect_command {
            if let Err(e) = self.send(&command).await {
                warn!("Failed to send effect step: {}", e);
            }
        }
    }

    async fn send(&mut self, command: &OutboundCommand) -> Result<Option<u64>> {
        let (id, datagram) = self.codec.encode(command)?;
        debug!("Sending: {}", String::from_utf8_lossy(&datagram));
        self.socket.send_to(&datagram, self.gateway).await?;
        Ok(id)
    }

    /// Send `command` and wait for its reply. Datagrams that are not the
    /// reply (late replies to earlier requests, reports) are classified as
    /// reports and the window keeps running until it expires.
    async fn exchange(&mut self, command: OutboundCommand) {
        let id = match self.send(&command).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to send {}: {}", command.method, e);
                return;
            }
        };

        let deadline = Instant::now() + self.timings.reply_timeout;
        let mut buf = [0u8; DATAGRAM_MAX_LEN];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let len = match timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) => len,
                Ok(Err(e)) => {
                    warn!("Receive failed after {}: {}", command.method, e);
                    return;
                }
                Err(_) => {
                    warn!("No reply to {}", command.method);
                    return;
                }
            };

            let now = Instant::now();
            let answered = {
                let mut answered = false;
                let mut state = self.state.lock();
                for message in decode(&buf[..len]).into_iter().rev() {
                    if is_reply_to(&message, id, &command) {
                        answered = true;
                        handle_reply(
                            &command.topic,
                            vec![message],
                            command.expects_state_publish,
                            &mut state,
                            &self.publisher,
                            now,
                        );
                    } else {
                        debug!("Message {:?} is not the reply to {}", message.id, command.method);
                        handle_msg(&message, &mut state, &self.publisher);
                    }
                }
                answered
            };
            if answered {
                return;
            }
        }
    }

    async fn receive_reports(&mut self) {
        let mut buf = [0u8; DATAGRAM_MAX_LEN];
        match timeout(self.timings.idle_timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => {
                let messages = decode(&buf[..len]);
                let mut state = self.state.lock();
                for message in messages.iter().rev() {
                    handle_msg(message, &mut state, &self.publisher);
                }
            }
            Ok(Err(e)) => warn!("Receive failed: {}", e),
            Err(_) => {}
        }
    }
}

/// Requests are answered under their id; pings, which carry none, by a pong.
fn is_reply_to(message: &ProtocolMessage, id: Option<u64>, command: &OutboundCommand) -> bool {
    match id {
        Some(id) => message.id == Some(id),
        None => command.is_ping() && message.method.as_deref() == Some(PONG_METHOD),
    }
}
