//! Peer Synchronization Manager
//!
//! Drives one side of a duel over unreliable datagrams. The manager is
//! sans-io: callers feed it received bytes via [`SyncManager::handle_datagram`]
//! and a millisecond clock via [`SyncManager::poll`], and it hands back
//! the datagrams to transmit. All timing rules (heartbeats, action
//! retransmission, the session-id listen window) live here, so tests can
//! run the whole protocol with a hand-cranked clock and no sockets.
//!
//! Reliability model: every discrete action carries a sequence number
//! and is retransmitted until the peer's reported expectation moves past
//! it. Received actions apply strictly in order; a gap holds later
//! actions in a buffer rather than applying them early. When the
//! periodic checksum exchange shows the mirrored grids diverging anyway,
//! the fallback is a full field snapshot, never a crash.

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::protocol::{
    Datagram, FieldData, PlayerAction, PlayerStatus, Preferences, GAME_ID_NONE, MAX_GAME_ID,
};

/// Where this side is in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Listening for traffic; no session identifier yet.
    Unassigned,
    /// Identifier claimed or adopted, waiting to hear the peer on it.
    Reserving,
    /// Waiting for the peer's field snapshot.
    FieldSync,
    /// Joiner only: waiting for the creator's preferences.
    PrefsSync,
    /// Handshake complete, waiting for both ready flags.
    Ready,
    /// Actions are flowing.
    Playing,
    /// One side finished its round.
    Finished,
}

/// Synchronization configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// This side's player number: 1 creates the session, 2 joins one.
    pub player_id: u8,
    /// Wire protocol version advertised in every status.
    pub protocol_version: u8,
    /// Idle status interval in milliseconds.
    pub heartbeat_ms: u64,
    /// Unacknowledged-action resend interval in milliseconds.
    pub retransmit_ms: u64,
    /// How long the creator listens before claiming an identifier.
    pub claim_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            player_id: 1,
            protocol_version: crate::PROTOCOL_VERSION,
            heartbeat_ms: 500,
            retransmit_ms: 520,
            claim_delay_ms: 600,
        }
    }
}

/// Synchronization errors surfaced to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Action sent before the handshake finished.
    #[error("cannot send actions in state {0:?}")]
    NotPlaying(SyncState),

    /// No free session identifier on the network.
    #[error("all {} session identifiers in use", MAX_GAME_ID + 1)]
    NoFreeGameId,
}

/// Things the caller reacts to after feeding datagrams or polling.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A session identifier was claimed or adopted.
    Assigned {
        /// The identifier now in the header of everything we send.
        game_id: u8,
    },
    /// First status heard from the peer on our session.
    PeerJoined,
    /// Creator's preferences arrived (joiner only).
    PrefsReceived(Preferences),
    /// A field snapshot arrived; rebuild the mirror from it.
    FieldReceived(FieldData),
    /// The peer asked for our field; refresh the snapshot via
    /// [`SyncManager::update_field_snapshot`].
    FieldWanted,
    /// Both sides are ready; the duel starts now.
    Started,
    /// Checksums diverged while fully caught up; a snapshot was requested.
    DesyncSuspected,
    /// The peer reported its round over.
    PeerFinished,
}

/// One side of the duel synchronization protocol.
pub struct SyncManager {
    config: SyncConfig,
    state: SyncState,
    game_id: u8,
    /// Identifiers overheard while unassigned.
    ids_seen: [bool; MAX_GAME_ID as usize + 1],
    /// A peer status has been overheard since startup; claiming an
    /// identifier on a silent network is not allowed.
    status_heard: bool,
    listen_started_ms: Option<u64>,

    /// Sequence of the last action we produced; pre-incremented on send.
    local_seq: u16,
    /// Sequence we expect from the peer next.
    expected_remote: u16,
    /// Our unacknowledged actions, oldest first.
    unacked: Vec<PlayerAction>,
    /// Peer actions received ahead of order, sorted by sequence.
    pending_remote: Vec<PlayerAction>,

    last_peer_status: Option<PlayerStatus>,
    /// Digest of our own grid, zero until first computed.
    local_checksum: u16,
    /// Digest of the mirror we keep of the peer's grid.
    remote_checksum: u16,

    ready: bool,
    game_over: bool,
    field_request: bool,
    prefs_request: bool,
    prefs: Preferences,
    field_snapshot: Option<FieldData>,

    last_send_ms: u64,
    last_retransmit_ms: u64,
    /// The advertised status changed; send one on the next poll without
    /// waiting out the heartbeat interval.
    status_dirty: bool,
    events: Vec<SyncEvent>,
}

impl SyncManager {
    /// New manager; `prefs` only matter for player 1, who serves them.
    pub fn new(config: SyncConfig, prefs: Preferences) -> Self {
        Self {
            config,
            state: SyncState::Unassigned,
            game_id: GAME_ID_NONE,
            ids_seen: [false; MAX_GAME_ID as usize + 1],
            status_heard: false,
            listen_started_ms: None,
            local_seq: 0,
            expected_remote: 1,
            unacked: Vec::new(),
            pending_remote: Vec::new(),
            last_peer_status: None,
            local_checksum: 0,
            remote_checksum: 0,
            ready: false,
            game_over: false,
            field_request: false,
            prefs_request: false,
            prefs,
            field_snapshot: None,
            last_send_ms: 0,
            last_retransmit_ms: 0,
            status_dirty: false,
            events: Vec::new(),
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Session identifier, [`GAME_ID_NONE`] until assigned.
    pub fn game_id(&self) -> u8 {
        self.game_id
    }

    /// Sequence of the newest action we produced.
    pub fn local_seq(&self) -> u16 {
        self.local_seq
    }

    /// Sequence we expect from the peer next.
    pub fn expected_remote(&self) -> u16 {
        self.expected_remote
    }

    /// Drain accumulated events.
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Mark this side ready to play.
    pub fn set_ready(&mut self) {
        self.ready = true;
        self.status_dirty = true;
    }

    /// Mark this side's round over (won or lost).
    pub fn set_game_over(&mut self) {
        self.game_over = true;
        self.status_dirty = true;
        if self.state == SyncState::Playing {
            self.state = SyncState::Finished;
        }
    }

    /// Latest grid digests: ours, and the mirror we keep of the peer's.
    pub fn set_checksums(&mut self, local: u16, remote: u16) {
        self.local_checksum = local;
        self.remote_checksum = remote;
    }

    /// Refresh the snapshot served when the peer requests our field.
    /// Tag it with the current [`local_seq`](Self::local_seq) or it will
    /// be held back as stale.
    pub fn update_field_snapshot(&mut self, field: FieldData) {
        self.field_snapshot = Some(field);
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Number a new action, queue it for retransmission, and encode it.
    ///
    /// `template` carries the gameplay payload; the sequence fields and
    /// player number are filled in here.
    pub fn send_action(
        &mut self,
        mut template: PlayerAction,
        now_ms: u64,
    ) -> Result<Vec<u8>, SyncError> {
        if !matches!(self.state, SyncState::Playing | SyncState::Finished) {
            return Err(SyncError::NotPlaying(self.state));
        }
        self.local_seq = self.local_seq.wrapping_add(1);
        template.player_id = self.config.player_id;
        template.local_seq = self.local_seq;
        template.remote_seq = self.expected_remote;
        self.unacked.push(template);

        // An action carries everything a status would; push the heartbeat.
        self.last_send_ms = now_ms;
        self.last_retransmit_ms = now_ms;
        trace!(seq = self.local_seq, "action queued");
        Ok(Datagram::Action(template).encode(self.game_id))
    }

    /// Next peer action in strict sequence order, if it has arrived.
    pub fn next_remote_action(&mut self) -> Option<PlayerAction> {
        let front = *self.pending_remote.first()?;
        if front.local_seq != self.expected_remote {
            return None;
        }
        self.pending_remote.remove(0);
        self.expected_remote = self.expected_remote.wrapping_add(1);
        Some(front)
    }

    // -------------------------------------------------------------------------
    // Receiving
    // -------------------------------------------------------------------------

    /// Feed one received datagram. Undecodable or foreign traffic is
    /// discarded quietly; UDP noise is not an error condition.
    pub fn handle_datagram(&mut self, bytes: &[u8], now_ms: u64) {
        let (game_id, datagram) = match Datagram::decode(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("discarding datagram: {e}");
                return;
            }
        };

        // While unassigned every overheard identifier marks a session in
        // use; afterwards only our own session is interesting.
        if self.state == SyncState::Unassigned {
            if let Datagram::Status(status) = &datagram {
                if self.is_peer(status.player_id) {
                    self.status_heard = true;
                }
            }
            if game_id <= MAX_GAME_ID {
                self.ids_seen[game_id as usize] = true;
                if let Datagram::Status(status) = &datagram {
                    // A joiner latches onto the first live creator it hears.
                    if self.config.player_id == 2
                        && status.player_id == 1
                        && !status.game_over
                        && status.protocol_version == self.config.protocol_version
                    {
                        self.adopt_session(game_id);
                    }
                }
            }
            if self.state == SyncState::Unassigned {
                return;
            }
        } else if game_id != self.game_id {
            return;
        }

        match datagram {
            Datagram::Status(status) => self.on_status(status, now_ms),
            Datagram::Prefs(prefs) => self.on_prefs(prefs),
            Datagram::Action(action) => self.on_action(action),
            Datagram::Field(field) => self.on_field(field),
        }
    }

    fn is_peer(&self, sender: u8) -> bool {
        // Multicast loops our own datagrams back.
        sender != self.config.player_id
    }

    fn on_status(&mut self, status: PlayerStatus, _now_ms: u64) {
        if !self.is_peer(status.player_id) {
            return;
        }
        if status.protocol_version != self.config.protocol_version {
            warn!(
                theirs = status.protocol_version,
                ours = self.config.protocol_version,
                "protocol version mismatch, ignoring peer"
            );
            return;
        }

        if self.last_peer_status.is_none() {
            self.events.push(SyncEvent::PeerJoined);
            if self.state == SyncState::Reserving && self.config.player_id == 1 {
                // The joiner's opening field is synchronized, not assumed
                // from the shared seed; ask for its snapshot first.
                self.field_request = true;
                self.status_dirty = true;
                self.state = SyncState::FieldSync;
            }
        }

        self.prune_acknowledged(status.remote_seq);

        if status.field_request {
            self.events.push(SyncEvent::FieldWanted);
        }
        if status.game_over && self.state == SyncState::Playing {
            self.state = SyncState::Finished;
            self.events.push(SyncEvent::PeerFinished);
        }

        self.check_grid_digest(&status);
        self.check_start(&status);
        self.last_peer_status = Some(status);
    }

    fn on_prefs(&mut self, prefs: Preferences) {
        if !self.is_peer(prefs.sender_id) {
            return;
        }
        // Accepted only during the handshake; a stray retransmission
        // mid-game must not overwrite the agreed settings.
        if self.state != SyncState::PrefsSync {
            return;
        }
        self.prefs = prefs;
        self.prefs_request = false;
        self.status_dirty = true;
        self.state = SyncState::Ready;
        info!("preferences received, handshake complete");
        self.events.push(SyncEvent::PrefsReceived(prefs));
    }

    fn on_action(&mut self, action: PlayerAction) {
        if !self.is_peer(action.player_id) {
            return;
        }
        self.prune_acknowledged(action.remote_seq);

        // Sequence 1 from a peer that should be far ahead means it
        // restarted its round; realign rather than hold its actions
        // behind an expectation it will never meet.
        if action.local_seq == 1 && self.expected_remote > 1 {
            debug!("peer action numbering restarted");
            self.expected_remote = 1;
            self.pending_remote.clear();
        }

        if action.local_seq < self.expected_remote {
            return; // retransmission of something already applied
        }
        if self
            .pending_remote
            .iter()
            .any(|a| a.local_seq == action.local_seq)
        {
            return; // duplicate in flight
        }
        let at = self
            .pending_remote
            .partition_point(|a| a.local_seq < action.local_seq);
        self.pending_remote.insert(at, action);
        trace!(
            seq = action.local_seq,
            expected = self.expected_remote,
            "peer action buffered"
        );
    }

    fn on_field(&mut self, field: FieldData) {
        if !self.is_peer(field.player_id) {
            return;
        }
        // A snapshot older than the actions we already applied would
        // rewind the mirror; wait for a fresher one instead.
        if field.local_seq.wrapping_add(1) < self.expected_remote {
            debug!(
                snapshot = field.local_seq,
                expected = self.expected_remote,
                "stale field snapshot discarded"
            );
            return;
        }

        self.expected_remote = field.local_seq.wrapping_add(1);
        self.pending_remote
            .retain(|a| a.local_seq >= self.expected_remote);
        self.field_request = false;
        self.status_dirty = true;
        if self.state == SyncState::FieldSync {
            // The joiner still needs the creator's preferences; the
            // creator's handshake ends here.
            if self.config.player_id == 2 {
                self.prefs_request = true;
                self.state = SyncState::PrefsSync;
            } else {
                self.state = SyncState::Ready;
            }
        }
        info!(seq = field.local_seq, "field snapshot applied");
        self.events.push(SyncEvent::FieldReceived(field));
    }

    /// Drop at most one acknowledged action per received datagram; a
    /// burst of acks drains the queue over the following datagrams.
    fn prune_acknowledged(&mut self, peer_expected: u16) {
        if let Some(first) = self.unacked.first() {
            if first.local_seq < peer_expected {
                trace!(seq = first.local_seq, "action acknowledged");
                self.unacked.remove(0);
            }
        }
    }

    /// Compare the peer's self-reported digest against our mirror of it.
    /// Only meaningful when we have applied every action the peer has
    /// produced; mid-stream the grids legitimately differ.
    fn check_grid_digest(&mut self, status: &PlayerStatus) {
        if self.state != SyncState::Playing || self.field_request {
            return;
        }
        if status.local_checksum == 0 || self.remote_checksum == 0 {
            return;
        }
        if self.expected_remote != status.local_seq.wrapping_add(1) {
            return;
        }
        if status.local_checksum != self.remote_checksum {
            warn!(
                theirs = format_args!("{:04x}", status.local_checksum),
                mirror = format_args!("{:04x}", self.remote_checksum),
                "grid digests diverged, requesting snapshot"
            );
            self.field_request = true;
            self.status_dirty = true;
            self.events.push(SyncEvent::DesyncSuspected);
        }
    }

    fn check_start(&mut self, status: &PlayerStatus) {
        if self.state == SyncState::Ready && self.ready && status.ready {
            self.state = SyncState::Playing;
            info!("both sides ready, duel started");
            self.events.push(SyncEvent::Started);
        }
    }

    // -------------------------------------------------------------------------
    // Clock-driven output
    // -------------------------------------------------------------------------

    /// Advance timers and collect everything to transmit now.
    pub fn poll(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        if self.state == SyncState::Unassigned {
            self.poll_unassigned(now_ms, &mut out);
            return out;
        }

        // Unacked actions go out ahead of heartbeats; an action already
        // carries our sequence and digest state.
        if !self.unacked.is_empty()
            && now_ms.saturating_sub(self.last_retransmit_ms) >= self.config.retransmit_ms
        {
            for action in &self.unacked {
                let mut action = *action;
                action.remote_seq = self.expected_remote;
                out.push(Datagram::Action(action).encode(self.game_id));
            }
            self.last_retransmit_ms = now_ms;
            self.last_send_ms = now_ms;
            debug!(count = self.unacked.len(), "retransmitting actions");
        }

        if let Some(bytes) = self.poll_field_response() {
            out.push(bytes);
            self.last_send_ms = now_ms;
        }

        if let Some(bytes) = self.poll_prefs_response() {
            out.push(bytes);
            self.last_send_ms = now_ms;
        }

        // Heartbeat: immediately after a status change, otherwise on the
        // idle interval. Any datagram above already refreshed the peer's
        // view of our sequence and digests.
        if self.status_dirty || now_ms.saturating_sub(self.last_send_ms) >= self.config.heartbeat_ms
        {
            out.push(Datagram::Status(self.build_status()).encode(self.game_id));
            self.status_dirty = false;
            self.last_send_ms = now_ms;
        }

        out
    }

    fn poll_unassigned(&mut self, now_ms: u64, out: &mut Vec<Vec<u8>>) {
        let started = *self.listen_started_ms.get_or_insert(now_ms);

        // Advertise on the reserved identifier so peers still listening
        // know the network is live.
        if now_ms.saturating_sub(self.last_send_ms) >= self.config.heartbeat_ms {
            out.push(Datagram::Status(self.build_status()).encode(self.game_id));
            self.last_send_ms = now_ms;
        }

        // The joiner waits for a creator status. The creator claims an
        // identifier only after the listen window has passed AND some
        // traffic was overheard; a silent network stays unassigned.
        if self.config.player_id == 1
            && self.status_heard
            && now_ms.saturating_sub(started) >= self.config.claim_delay_ms
        {
            match self.lowest_free_id() {
                Some(id) => self.assign(id),
                None => warn!("no free session identifier, still listening"),
            }
        }
    }

    fn lowest_free_id(&self) -> Option<u8> {
        self.ids_seen
            .iter()
            .position(|&used| !used)
            .map(|id| id as u8)
    }

    fn assign(&mut self, game_id: u8) {
        self.game_id = game_id;
        self.state = SyncState::Reserving;
        self.status_dirty = true;
        info!(game_id, "session identifier claimed");
        self.events.push(SyncEvent::Assigned { game_id });
    }

    /// A joiner adopts the session it overhears from a creator.
    /// Separate from the status path because the identifier lives in the
    /// header, which `on_status` never sees.
    pub fn adopt_session(&mut self, game_id: u8) {
        if self.state == SyncState::Unassigned && self.config.player_id == 2 {
            self.game_id = game_id;
            self.state = SyncState::FieldSync;
            self.field_request = true;
            self.status_dirty = true;
            info!(game_id, "session identifier adopted");
            self.events.push(SyncEvent::Assigned { game_id });
        }
    }

    fn poll_field_response(&mut self) -> Option<Vec<u8>> {
        let status = self.last_peer_status.as_ref()?;
        if !status.field_request {
            return None;
        }
        // The snapshot is only coherent once the peer holds every action
        // that shaped it, and only when it reflects our newest action.
        if status.remote_seq != self.local_seq.wrapping_add(1) {
            return None;
        }
        let field = self.field_snapshot.as_ref()?;
        if field.local_seq != self.local_seq {
            return None;
        }
        debug!(seq = field.local_seq, "serving field snapshot");
        Some(Datagram::Field(*field).encode(self.game_id))
    }

    fn poll_prefs_response(&mut self) -> Option<Vec<u8>> {
        if self.config.player_id != 1 {
            return None;
        }
        let status = self.last_peer_status.as_ref()?;
        if !status.prefs_request {
            return None;
        }
        let mut prefs = self.prefs;
        prefs.sender_id = self.config.player_id;
        Some(Datagram::Prefs(prefs).encode(self.game_id))
    }

    fn build_status(&self) -> PlayerStatus {
        PlayerStatus {
            player_id: self.config.player_id,
            protocol_version: self.config.protocol_version,
            local_seq: self.local_seq,
            remote_seq: self.expected_remote,
            ready: self.ready,
            game_over: self.game_over,
            field_request: self.field_request,
            prefs_request: self.prefs_request,
            local_checksum: self.local_checksum,
            remote_checksum: self.remote_checksum,
        }
    }
}

/// Glue a manager to a running transport.
///
/// Polls on a ~100 ms cadence, feeds every received datagram through the
/// manager, and transmits whatever it produces. The mutex is held only
/// for the non-blocking manager calls; gameplay code on the other side
/// of it locks between cadence ticks. Returns once the session reaches
/// [`SyncState::Finished`].
pub async fn drive(
    manager: std::sync::Arc<tokio::sync::Mutex<SyncManager>>,
    mut transport: super::transport::TransportHandle,
) -> Result<(), super::transport::TransportError> {
    use std::time::{Duration, Instant};

    let started = Instant::now();
    let mut cadence = tokio::time::interval(Duration::from_millis(100));
    cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cadence.tick().await;
        let now_ms = started.elapsed().as_millis() as u64;

        while let Some((bytes, _from)) = transport.recv_timeout(Duration::from_millis(1)).await {
            manager.lock().await.handle_datagram(&bytes, now_ms);
        }

        let (outbound, finished) = {
            let mut m = manager.lock().await;
            let outbound = m.poll(now_ms);
            (outbound, m.state() == SyncState::Finished)
        };
        for datagram in outbound {
            transport.send(datagram).await?;
        }
        if finished {
            return transport.shutdown().await;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
