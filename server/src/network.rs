//! Server network layer handling UDP communications and game loop coordination

use crate::authority::StateAuthority;
use crate::gate::MessageGate;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ClientPacket, Envelope, MessagePayload, PlayerId, ServerPacket};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// A client with no accepted traffic for this long is treated as gone.
const CLIENT_TIMEOUT_MS: u64 = 30_000;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: ClientPacket,
        addr: SocketAddr,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the game loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: ServerPacket,
        addr: SocketAddr,
    },
}

/// Main server coordinating networking and the authoritative simulation.
///
/// All game state is owned by the single `run` loop; the receiver and
/// sender tasks only shuttle datagrams, so no locks guard the simulation.
pub struct Server {
    socket: Arc<UdpSocket>,
    gate: MessageGate,
    authority: StateAuthority,
    sessions: HashMap<SocketAddr, PlayerId>,
    addresses: HashMap<PlayerId, SocketAddr>,
    last_seen: HashMap<PlayerId, u64>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

fn unix_now_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    elapsed.min(u64::MAX as u128) as u64
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            gate: MessageGate::new(),
            authority: StateAuthority::new(),
            sessions: HashMap::new(),
            addresses: HashMap::new(),
            last_seen: HashMap::new(),
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<ClientPacket>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &ServerPacket,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: &ServerPacket, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: &ServerPacket, exclude: Option<&str>) {
        for (player_id, addr) in &self.addresses {
            if exclude == Some(player_id.as_str()) {
                continue;
            }
            self.send_packet(packet, *addr);
        }
    }

    /// Processes one inbound datagram against the gate and the authority.
    fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr, now_ms: u64) {
        match packet {
            ClientPacket::Connect { token } => {
                // A reconnect from the same address replaces the old session.
                if let Some(existing) = self.sessions.get(&addr).cloned() {
                    info!("Replacing existing session {} from {}", existing, addr);
                    self.purge_session(&existing);
                }

                match self.gate.handle_connect(&token, now_ms) {
                    Ok(client_id) => {
                        self.authority.initialize_game(&client_id);
                        self.sessions.insert(addr, client_id.clone());
                        self.addresses.insert(client_id.clone(), addr);
                        self.last_seen.insert(client_id.clone(), now_ms);
                        info!("Client {} connected from {}", client_id, addr);
                        self.send_packet(&ServerPacket::Connected { client_id }, addr);
                    }
                    Err(e) => {
                        warn!("Rejected connection from {}: {}", addr, e);
                        self.send_packet(
                            &ServerPacket::Rejected {
                                reason: e.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            ClientPacket::Message(envelope) => {
                let Some(client_id) = self.sessions.get(&addr).cloned() else {
                    warn!("Message from unknown address {}", addr);
                    return;
                };
                if envelope.client_id != client_id {
                    warn!(
                        "Address {} claimed identity {} but is {}",
                        addr, envelope.client_id, client_id
                    );
                    return;
                }

                if let Err(e) = self.gate.validate(&envelope, now_ms) {
                    debug!("Gate rejected message from {}: {}", client_id, e);
                    self.send_packet(
                        &ServerPacket::Rejected {
                            reason: e.to_string(),
                        },
                        addr,
                    );
                    return;
                }

                self.last_seen.insert(client_id.clone(), now_ms);
                self.route_payload(&client_id, &envelope, addr, now_ms);
            }

            ClientPacket::Disconnect => {
                if let Some(client_id) = self.sessions.get(&addr).cloned() {
                    info!("Client {} disconnected", client_id);
                    self.purge_session(&client_id);
                    self.send_packet(
                        &ServerPacket::Disconnected {
                            reason: "client requested".to_string(),
                        },
                        addr,
                    );
                }
            }
        }
    }

    /// Dispatches an already-gated envelope to the matching authority
    /// operation. Business rejections go straight back to the sender.
    fn route_payload(
        &mut self,
        client_id: &str,
        envelope: &Envelope,
        addr: SocketAddr,
        now_ms: u64,
    ) {
        let outcome = match &envelope.payload {
            MessagePayload::Command(action) => {
                self.authority
                    .process_command(client_id, envelope, action, now_ms)
            }
            MessagePayload::Sync(claim) => self.authority.handle_sync(client_id, claim),
            MessagePayload::Resource(_) => {
                self.authority.handle_resource(client_id, envelope, now_ms)
            }
            MessagePayload::Tech(request) => self.authority.handle_tech(client_id, request, now_ms),
            MessagePayload::Chat(text) => {
                self.broadcast_packet(
                    &ServerPacket::Chat {
                        from: client_id.to_string(),
                        text: text.clone(),
                    },
                    Some(client_id),
                );
                Ok(())
            }
        };

        if let Err(rejection) = outcome {
            debug!(
                "Rejected {} from {}: {}",
                envelope.payload.kind(),
                client_id,
                rejection
            );
            self.send_packet(
                &ServerPacket::Rejected {
                    reason: rejection.to_string(),
                },
                addr,
            );
        }
    }

    /// Removes every trace of a session: gate record, simulation state,
    /// address maps.
    fn purge_session(&mut self, client_id: &str) {
        self.gate.handle_disconnect(client_id);
        self.authority.remove_player(client_id);
        if let Some(addr) = self.addresses.remove(client_id) {
            self.sessions.remove(&addr);
        }
        self.last_seen.remove(client_id);
    }

    fn sweep_timeouts(&mut self, now_ms: u64) {
        let timed_out: Vec<PlayerId> = self
            .last_seen
            .iter()
            .filter(|(_, &seen)| now_ms.saturating_sub(seen) > CLIENT_TIMEOUT_MS)
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in timed_out {
            warn!("Client {} timed out", client_id);
            let addr = self.addresses.get(&client_id).copied();
            self.purge_session(&client_id);
            if let Some(addr) = addr {
                self.send_packet(
                    &ServerPacket::Disconnected {
                        reason: "timed out".to_string(),
                    },
                    addr,
                );
            }
        }
    }

    /// Advances the simulation one tick and sends each player their own
    /// filtered view of the world.
    fn broadcast_tick(&mut self, now_ms: u64) {
        let updates = self.authority.tick(now_ms);
        for (player_id, update) in updates {
            if let Some(addr) = self.addresses.get(&player_id) {
                self.send_packet(&ServerPacket::StateUpdate(update), *addr);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        let mut tick_count: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr, unix_now_ms());
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now_ms = unix_now_ms();
                    self.sweep_timeouts(now_ms);
                    self.broadcast_tick(now_ms);

                    tick_count += 1;
                    if tick_count % 100 == 0 && !self.sessions.is_empty() {
                        debug!(
                            "Tick {}: {} clients, {} units indexed",
                            tick_count,
                            self.sessions.len(),
                            self.authority.visibility().unit_count()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}
