use std::{net::SocketAddr, time::Duration};

use crate::packet::{Message, RoomInfo};
use crate::registry::{ClientPeer, HostPeers, PlayerSet};
use crate::rendezvous::{RendezvousClient, RoomId};
use crate::transport::{Transport, TransportEvent};
use crate::{NetError, SessionConfig};

/// How long dropping a session may block while the transport flushes.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(10);

/// Links a client keeps open: the rendezvous server and the host.
const CLIENT_MAX_CONNECTIONS: usize = 2;

/// The connection status of a [`Session`], polled by the application every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionStatus {
    Disconnected,
    /// Still talking to the rendezvous server or doing the handshake with the host.
    Pending,
    Connected,
    /// Lost the host after being connected, trying to get back into the room.
    Reconnecting,
    /// The room code is unknown or the room is full.
    RoomNotFound,
    /// Host and client were built with different api versions.
    ApiMismatch,
    GenericError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    Host,
    Client,
}

#[derive(Debug)]
enum Peers {
    Host(HostPeers),
    Client(ClientPeer),
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    api_version: u8,
    num_players: u8,
    max_players: u8,
    player_id: Option<u8>,
    room_id: Option<RoomId>,
    active_players: PlayerSet,
    current_time: Duration,
    handshake_timeout: Option<Duration>,
    timed_out: bool,
}

impl SessionState {
    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            log::info!("Session status changed from {:?} to {:?}", self.status, status);
            self.status = status;
        }
    }

    fn apply_room_info(&mut self, info: RoomInfo) {
        self.num_players = info.num_players;
        self.max_players = info.max_players;
        self.player_id = Some(info.player_id);
        self.active_players.clear();
        self.active_players.insert(0);
        self.active_players.insert(info.player_id);
    }
}

/// One side of a peer-to-peer game session, either the host of a room or a client joining it.
///
/// The session does nothing on its own: [`Session::receive`] must be called every tick,
/// even before the connection is established, since it drives the whole handshake.
/// [`Session::update`] advances the clock used for the handshake timeout.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    rendezvous: RendezvousClient,
    peers: Peers,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Creates a host session and starts contacting the rendezvous server to get a room.
    pub fn host(config: &SessionConfig, mut transport: T) -> Result<Self, NetError> {
        config.validate_capacity()?;
        // One link per player, the rendezvous server and one peer being rejected.
        transport.startup(config.max_players + 2)?;

        let mut active_players = PlayerSet::new();
        active_players.insert(0);

        let mut session = Self {
            transport,
            rendezvous: RendezvousClient::new(config.server_addr),
            peers: Peers::Host(HostPeers::new(config.max_players)),
            state: SessionState {
                status: SessionStatus::Pending,
                api_version: config.api_version,
                num_players: 1,
                max_players: 1,
                player_id: Some(0),
                room_id: None,
                active_players,
                current_time: Duration::ZERO,
                handshake_timeout: config.handshake_timeout,
                timed_out: false,
            },
        };
        session.rendezvous.connect(&mut session.transport);

        Ok(session)
    }

    /// Creates a client session that will join the room `room_id`.
    pub fn client(config: &SessionConfig, room_id: &str, mut transport: T) -> Result<Self, NetError> {
        let room: RoomId = room_id.parse()?;
        transport.startup(CLIENT_MAX_CONNECTIONS)?;
        // Only the host may connect to us.
        transport.set_max_incoming_connections(1);

        let mut session = Self {
            transport,
            rendezvous: RendezvousClient::new(config.server_addr),
            peers: Peers::Client(ClientPeer::new(room)),
            state: SessionState {
                status: SessionStatus::Pending,
                api_version: config.api_version,
                num_players: 1,
                max_players: 0,
                player_id: None,
                room_id: Some(room),
                active_players: PlayerSet::new(),
                current_time: Duration::ZERO,
                handshake_timeout: config.handshake_timeout,
                timed_out: false,
            },
        };
        session.rendezvous.connect(&mut session.transport);

        Ok(session)
    }

    pub fn role(&self) -> Role {
        match self.peers {
            Peers::Host(_) => Role::Host,
            Peers::Client(_) => Role::Client,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Returns our player id, always 0 for the host and `None` for a client not yet accepted.
    pub fn player_id(&self) -> Option<u8> {
        self.state.player_id
    }

    /// Returns the room id, `None` for a host still waiting for the rendezvous server.
    pub fn room_id(&self) -> Option<RoomId> {
        self.state.room_id
    }

    /// Returns the address of a player we have a direct link with, the host knows
    /// every player while a client only knows the host (player 0).
    pub fn peer_addr(&self, player_id: u8) -> Option<SocketAddr> {
        match &self.peers {
            Peers::Host(host) => host.addr(player_id),
            Peers::Client(client) if player_id == 0 => client.host_addr,
            Peers::Client(_) => None,
        }
    }

    pub fn is_player_active(&self, player_id: u8) -> bool {
        self.state.active_players.contains(player_id)
    }

    pub fn active_players(&self) -> &PlayerSet {
        &self.state.active_players
    }

    /// Number of players currently connected, including ourselves.
    pub fn num_players(&self) -> u8 {
        self.state.num_players
    }

    /// Number of player slots taken, once the game started this is the total
    /// of players in the game, including the ones that disconnected.
    pub fn max_players(&self) -> u8 {
        self.state.max_players
    }

    pub fn api_version(&self) -> u8 {
        self.state.api_version
    }

    pub fn is_started(&self) -> bool {
        match &self.peers {
            Peers::Host(host) => host.started(),
            Peers::Client(client) => client.started,
        }
    }

    /// Returns whether the session gave up because the handshake took too long.
    pub fn timed_out(&self) -> bool {
        self.state.timed_out
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Advances the session clock by duration.
    /// Should be called every tick.
    pub fn update(&mut self, duration: Duration) {
        let state = &mut self.state;
        state.current_time += duration;

        if let Some(timeout) = state.handshake_timeout {
            if state.status == SessionStatus::Pending && state.current_time >= timeout {
                log::warn!("Handshake did not complete after {:?}", timeout);
                state.timed_out = true;
                state.set_status(SessionStatus::GenericError);
            }
        }
    }

    /// Sends an application payload.
    ///
    /// The host sends it to every connected player, a client sends it to the host
    /// which forwards it to the other players. Does nothing while a client does not know its host.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), NetError> {
        let frame = Message::Standard(payload).encode()?;
        let Self {
            transport, peers, state, ..
        } = self;

        match peers {
            Peers::Host(host) => broadcast(transport, host, &state.active_players, &frame, None),
            Peers::Client(client) => {
                if let Some(host_addr) = client.host_addr {
                    transport.send(host_addr, &frame)?;
                }
            }
        }

        Ok(())
    }

    /// Starts the game, no new player may join afterwards, only reconnect.
    ///
    /// Only the host can start the game, calling it on a client does nothing.
    pub fn start_game(&mut self) {
        let Self {
            transport, peers, state, ..
        } = self;

        match peers {
            Peers::Host(host) => {
                if host.started() {
                    return;
                }
                host.start();
                state.max_players = state.num_players;
                log::info!("Game started with {} players", state.num_players);

                match Message::StartGame.encode() {
                    Ok(frame) => broadcast(transport, host, &state.active_players, &frame, None),
                    Err(e) => log::error!("Failed to encode start game message: {}", e),
                }
            }
            Peers::Client(_) => log::warn!("Only the host can start the game"),
        }
    }

    /// Processes every event the transport has available, application payloads
    /// are handed to `dispatcher`.
    pub fn receive<F: FnMut(&[u8])>(&mut self, mut dispatcher: F) {
        while let Some(event) = self.transport.receive() {
            log::trace!("Received transport event: {:?}", event);
            self.handle_event(event, &mut dispatcher);
        }
    }

    fn handle_event<F: FnMut(&[u8])>(&mut self, event: TransportEvent, dispatcher: &mut F) {
        match event {
            TransportEvent::ConnectionAccepted(addr) => self.handle_connection_accepted(addr),
            TransportEvent::IncomingConnection(addr) => self.handle_incoming_connection(addr),
            TransportEvent::PunchSucceeded(addr) => self.handle_punch_succeeded(addr),
            TransportEvent::PunchFailed(addr) | TransportEvent::TargetUnresponsive(addr) | TransportEvent::AttemptFailed(addr) => {
                self.handle_connection_failure(addr, SessionStatus::GenericError)
            }
            TransportEvent::TargetNotConnected(addr) | TransportEvent::NoFreeIncomingConnections(addr) => {
                self.handle_connection_failure(addr, SessionStatus::RoomNotFound)
            }
            TransportEvent::Disconnected(addr) | TransportEvent::ConnectionLost(addr) => self.handle_disconnect(addr),
            TransportEvent::Message { from, payload } => match Message::decode(&payload) {
                Ok(message) => self.handle_message(from, message, dispatcher),
                Err(e) => log::error!("Failed to decode message from {}: {}", from, e),
            },
        }
    }

    fn handle_connection_accepted(&mut self, addr: SocketAddr) {
        let Self {
            transport,
            rendezvous,
            peers,
            state,
        } = self;

        if rendezvous.is_server(addr) {
            rendezvous.set_connected();
            match peers {
                Peers::Host(host) => {
                    log::debug!("Accepting connections now");
                    transport.set_max_incoming_connections(host.capacity());
                }
                Peers::Client(client) => {
                    if matches!(state.status, SessionStatus::Pending | SessionStatus::Reconnecting) {
                        rendezvous.request_punchthrough(transport, &client.room);
                    }
                }
            }
            return;
        }

        match peers {
            Peers::Host(host) => {
                if host.remove_rejection(addr) {
                    log::info!("Rejecting {}: room is full", addr);
                    send_message(transport, addr, &Message::JoinRoomFail);
                    transport.close(addr);
                    connect_next_rejection(transport, host);
                    return;
                }

                let player_id = match host.player_id(addr) {
                    Some(player_id) => player_id,
                    None => {
                        log::warn!("Connection accepted by unknown peer {}", addr);
                        transport.close(addr);
                        return;
                    }
                };
                if !state.active_players.insert(player_id) {
                    log::debug!("Player {} is already connected", player_id);
                    return;
                }

                log::info!("Player {} accepted connection request", player_id);
                match Message::PlayerJoined(player_id).encode() {
                    Ok(frame) => broadcast(transport, host, &state.active_players, &frame, Some(addr)),
                    Err(e) => log::error!("Failed to encode player joined message: {}", e),
                }
                state.num_players += 1;

                let reconnect = host.started();
                if !reconnect {
                    state.max_players += 1;
                }
                let info = RoomInfo {
                    num_players: state.num_players,
                    max_players: state.max_players,
                    player_id,
                    api_version: state.api_version,
                };
                let message = if reconnect { Message::Reconnect(info) } else { Message::JoinRoom(info) };
                send_message(transport, addr, &message);

                // Let the new player know who is already here.
                for other in state.active_players.iter().filter(|id| *id != 0 && *id != player_id) {
                    send_message(transport, addr, &Message::PlayerJoined(other));
                }
            }
            Peers::Client(_) => {
                log::error!("Connection to {} was accepted while being a client", addr);
                state.set_status(SessionStatus::GenericError);
            }
        }
    }

    fn handle_incoming_connection(&mut self, addr: SocketAddr) {
        match &self.peers {
            Peers::Host(_) => {
                log::warn!("Unexpected incoming connection from {} as host", addr);
                self.transport.close(addr);
            }
            Peers::Client(client) => {
                if client.is_host(addr) {
                    log::debug!("Connected to host {}", addr);
                } else {
                    log::warn!("Unexpected incoming connection from {}", addr);
                    self.transport.close(addr);
                }
            }
        }
    }

    fn handle_punch_succeeded(&mut self, addr: SocketAddr) {
        let Self {
            transport, peers, state, ..
        } = self;

        match peers {
            Peers::Host(host) => {
                if let Some(player_id) = host.player_id(addr) {
                    if state.active_players.contains(player_id) {
                        log::warn!("Player {} is already connected", player_id);
                        return;
                    }
                    log::debug!("Player {} is coming back", player_id);
                } else if !host.started() && host.reserve(addr).is_some() {
                    log::debug!("Reserved a slot for {}", addr);
                } else if host.reject(addr) {
                    log::info!("No room for {}, it will be rejected", addr);
                } else {
                    log::info!("No room for {}, rejection queued", addr);
                    return;
                }

                // Even a rejected peer needs a connection to be told so.
                transport.connect(addr);
            }
            Peers::Client(client) => {
                log::debug!("Punchthrough to host {} succeeded", addr);
                client.host_addr = Some(addr);
            }
        }
    }

    fn handle_connection_failure(&mut self, addr: SocketAddr, status: SessionStatus) {
        let Self {
            transport,
            rendezvous,
            peers,
            state,
        } = self;

        match peers {
            Peers::Host(host) => {
                if rendezvous.is_server(addr) {
                    log::error!("Failed to reach punchthrough server {}", addr);
                    if state.status == SessionStatus::Pending {
                        state.set_status(status);
                    }
                    return;
                }

                log::warn!("Failed to connect to {}", addr);
                if host.remove_rejection(addr) {
                    connect_next_rejection(transport, host);
                }
                if !host.started() {
                    if let Some(player_id) = host.player_id(addr).filter(|id| !state.active_players.contains(*id)) {
                        log::debug!("Releasing slot {} reserved for {}", player_id, addr);
                        host.release(addr);
                    }
                }
            }
            Peers::Client(_) => {
                log::error!("Failed to join room through {}: {:?}", addr, status);
                state.set_status(status);
            }
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr) {
        let Self {
            transport,
            rendezvous,
            peers,
            state,
        } = self;

        if rendezvous.is_server(addr) {
            rendezvous.set_disconnected();
            match peers {
                Peers::Host(_) if state.status == SessionStatus::Pending => {
                    log::error!("Lost punchthrough server before getting a room");
                    state.set_status(SessionStatus::GenericError);
                }
                Peers::Host(_) => log::warn!("Lost punchthrough server, new players cannot join"),
                Peers::Client(_) => log::debug!("Disconnected from punchthrough server"),
            }
            return;
        }

        match peers {
            Peers::Host(host) => {
                if host.remove_rejection(addr) {
                    connect_next_rejection(transport, host);
                }
                let player_id = match host.player_id(addr) {
                    Some(player_id) => player_id,
                    None => return,
                };
                // Once started the slot stays reserved so the player can come back.
                if !host.started() {
                    host.release(addr);
                }
                if !state.active_players.remove(player_id) {
                    return;
                }

                log::info!("Lost connection to player {}", player_id);
                state.num_players -= 1;
                if !host.started() {
                    state.max_players -= 1;
                }
                match Message::PlayerLeft(player_id).encode() {
                    Ok(frame) => broadcast(transport, host, &state.active_players, &frame, None),
                    Err(e) => log::error!("Failed to encode player left message: {}", e),
                }
            }
            Peers::Client(client) => {
                if !client.is_host(addr) {
                    return;
                }

                log::info!("Lost connection to host");
                state.active_players.remove(0);
                match state.status {
                    SessionStatus::Pending => state.set_status(SessionStatus::GenericError),
                    SessionStatus::Connected => {
                        state.set_status(SessionStatus::Reconnecting);
                        client.host_addr = None;
                        rendezvous.connect(transport);
                    }
                    SessionStatus::Reconnecting
                    | SessionStatus::Disconnected
                    | SessionStatus::RoomNotFound
                    | SessionStatus::ApiMismatch
                    | SessionStatus::GenericError => {}
                }
            }
        }
    }

    fn handle_message<F: FnMut(&[u8])>(&mut self, from: SocketAddr, message: Message, dispatcher: &mut F) {
        let Self {
            transport,
            rendezvous,
            peers,
            state,
        } = self;

        match (message, peers) {
            (Message::Standard(payload), Peers::Host(host)) => {
                if !host.player_id(from).map_or(false, |id| state.active_players.contains(id)) {
                    log::warn!("Ignoring message from {}, not a connected player", from);
                    return;
                }
                dispatcher(payload);
                // Forward so every client sees what the others send.
                match Message::Standard(payload).encode() {
                    Ok(frame) => broadcast(transport, host, &state.active_players, &frame, Some(from)),
                    Err(e) => log::error!("Failed to forward message from {}: {}", from, e),
                }
            }
            (Message::Standard(payload), Peers::Client(client)) => {
                if client.is_host(from) {
                    dispatcher(payload);
                } else {
                    log::warn!("Ignoring message from {}, not the host", from);
                }
            }
            (Message::AssignedRoom(room), Peers::Host(_)) => {
                if !rendezvous.is_server(from) {
                    log::warn!("Ignoring room assignment from {}", from);
                } else if state.room_id.is_some() {
                    log::debug!("Already have room {:?}, ignoring {}", state.room_id, room);
                } else {
                    log::info!("Got room ID: {}", room);
                    state.room_id = Some(room);
                    state.active_players.insert(0);
                    state.set_status(SessionStatus::Connected);
                }
            }
            (Message::AssignedRoom(_), Peers::Client(_)) => log::trace!("Assigned room ID but ignoring"),
            (message, Peers::Host(_)) => log::error!("Received {:?} message as host from {}", message.tag(), from),
            (message, Peers::Client(client)) => {
                if !client.is_host(from) {
                    log::warn!("Ignoring {:?} message from {}, not the host", message.tag(), from);
                    return;
                }
                handle_host_message(transport, rendezvous, client, state, message);
            }
        }
    }
}

/// Handles the protocol messages a client receives from its host.
fn handle_host_message<T: Transport>(
    transport: &mut T,
    rendezvous: &mut RendezvousClient,
    client: &mut ClientPeer,
    state: &mut SessionState,
    message: Message,
) {
    match message {
        Message::JoinRoom(info) | Message::Reconnect(info) => {
            let reconnect = matches!(message, Message::Reconnect(_));
            state.apply_room_info(info);
            if info.api_version != state.api_version {
                log::error!(
                    "API version mismatch; currently {} but host was {}",
                    state.api_version,
                    info.api_version
                );
                state.set_status(SessionStatus::ApiMismatch);
                if let Some(host_addr) = client.host_addr {
                    transport.close(host_addr);
                }
                rendezvous.disconnect(transport);
                return;
            }

            if reconnect {
                client.started = true;
            }
            log::info!(
                "Joined room {} as player {} ({}/{} players)",
                client.room,
                info.player_id,
                info.num_players,
                info.max_players
            );
            rendezvous.disconnect(transport);
            state.set_status(SessionStatus::Connected);
        }
        Message::JoinRoomFail => {
            log::warn!("Room {} is full", client.room);
            rendezvous.disconnect(transport);
            state.set_status(SessionStatus::RoomNotFound);
        }
        Message::PlayerJoined(player_id) => {
            if state.active_players.insert(player_id) {
                log::debug!("Player {} joined", player_id);
                let active = state.active_players.len();
                if active > state.num_players as usize {
                    state.num_players = u8::try_from(active).unwrap_or(u8::MAX);
                    if !client.started {
                        state.max_players = state.num_players;
                    }
                }
            }
        }
        Message::PlayerLeft(player_id) => {
            if state.active_players.remove(player_id) {
                log::debug!("Player {} left", player_id);
                state.num_players = state.num_players.saturating_sub(1);
                if !client.started {
                    state.max_players = state.max_players.saturating_sub(1);
                }
            }
        }
        Message::StartGame => {
            log::info!("Host started the game");
            client.started = true;
            state.max_players = state.num_players;
        }
        Message::Standard(_) | Message::AssignedRoom(_) => {}
    }
}

fn connect_next_rejection<T: Transport>(transport: &mut T, host: &mut HostPeers) {
    if let Some(addr) = host.next_rejection() {
        log::debug!("Connecting to {} to reject it", addr);
        transport.connect(addr);
    }
}

fn send_message<T: Transport>(transport: &mut T, addr: SocketAddr, message: &Message) {
    let result = message.encode().and_then(|frame| transport.send(addr, &frame));
    if let Err(e) = result {
        log::error!("Failed to send {:?} message to {}: {}", message.tag(), addr, e);
    }
}

/// Sends an encoded frame to every active player, except `except`.
fn broadcast<T: Transport>(transport: &mut T, host: &HostPeers, active_players: &PlayerSet, frame: &[u8], except: Option<SocketAddr>) {
    for (player_id, addr) in host.peers() {
        if Some(addr) == except || !active_players.contains(player_id) {
            continue;
        }
        if let Err(e) = transport.send(addr, frame) {
            log::error!("Failed to send message to player {}: {}", player_id, e);
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.transport.shutdown(SHUTDOWN_TIMEOUT);
    }
}
