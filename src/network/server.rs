//! TCP Race Server
//!
//! Async line-protocol server for the two-player maze race. Admits exactly
//! two connections, relays their state changes to each other, and resolves
//! the race outcome exactly once on a victory claim, the clock expiring,
//! or a mid-race disconnect.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{PlayerSession, SessionRegistry, OUTBOUND_CAPACITY};
use crate::race::outcome::{OutcomeArbiter, RaceOutcome, Resolution};
use crate::race::state::{PlayerId, RaceState};
use crate::race::timer::RaceTimer;
use crate::{DEFAULT_PORT, RACE_DURATION_SECS, TEARDOWN_DELAY_SECS};

/// Number of players admitted to one race.
const RACE_PLAYERS: usize = 2;

/// Defeat reason sent to the loser after a victory claim.
const DEFEAT_REASON_GOAL: &str = "The other player reached the goal room first!";

/// Defeat reason after a forfeit. Normally nobody is left to receive it.
const DEFEAT_REASON_FORFEIT: &str = "The race was forfeited.";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Length of the race once both players are in.
    pub race_duration: Duration,
    /// Delay between outcome resolution and socket teardown, so the final
    /// messages flush before the connections close.
    pub teardown_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            race_duration: Duration::from_secs(RACE_DURATION_SECS),
            teardown_delay: Duration::from_secs(TEARDOWN_DELAY_SECS),
        }
    }
}

/// Race server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening port. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the server tried to listen on.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Everything one race shares across its concurrent tasks.
///
/// Constructed once at startup and injected into every session task,
/// never process-wide static state, so independent races can run side by
/// side in tests.
struct RaceContext {
    config: ServerConfig,
    registry: SessionRegistry,
    state: RaceState,
    arbiter: OutcomeArbiter,
    timer: RaceTimer,
    /// True from the second admission onward; gates the forfeit rule.
    started: AtomicBool,
    /// Signalled once the registry has been torn down.
    closed: Notify,
}

impl RaceContext {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            state: RaceState::new(),
            arbiter: OutcomeArbiter::new(),
            timer: RaceTimer::new(),
            started: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    fn race_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    async fn announce_winner(&self, winner: PlayerId, reason: &str) {
        self.registry
            .send_to(winner, ServerMessage::Victory(winner))
            .await;
        self.registry
            .broadcast_except(
                winner,
                &ServerMessage::Defeat {
                    reason: reason.to_string(),
                },
            )
            .await;
    }
}

/// Second player admitted: the race is on. Start the clock and tell both
/// players.
async fn start_race(ctx: &Arc<RaceContext>) {
    ctx.started.store(true, Ordering::Release);

    let timer_ctx = ctx.clone();
    ctx.timer.start(ctx.config.race_duration, async move {
        info!("race clock expired");
        resolve(&timer_ctx, RaceOutcome::Timeout).await;
    });

    info!("race started: both players connected, clock running");
    broadcast_and_sweep(ctx, ServerMessage::StartGame).await;

    // A departure during the admission window can land before the started
    // flag is visible to the forfeit rule; sweep once here so it is not
    // missed.
    check_forfeit(ctx).await;
}

/// Attempt to resolve the race. Exactly one caller across all session
/// tasks and the timer ever proceeds past the arbiter; that caller owns
/// the announcement and the teardown.
async fn resolve(ctx: &Arc<RaceContext>, outcome: RaceOutcome) {
    match ctx.arbiter.try_resolve(outcome.clone()) {
        Resolution::AlreadyResolved => {
            debug!("ignoring {outcome:?}: race already resolved");
            return;
        }
        Resolution::ResolvedByMe => {}
    }

    ctx.timer.cancel();

    match outcome {
        RaceOutcome::Victory(winner) => {
            info!("player {winner} won the race");
            ctx.announce_winner(winner, DEFEAT_REASON_GOAL).await;
        }
        RaceOutcome::Forfeit(winner) => {
            info!("player {winner} wins by forfeit");
            ctx.announce_winner(winner, DEFEAT_REASON_FORFEIT).await;
        }
        RaceOutcome::Timeout => {
            info!("time expired, nobody reached the goal");
            ctx.registry.broadcast(&ServerMessage::TimeUpDefeat).await;
        }
        // The arbiter never reports ResolvedByMe for Unresolved.
        RaceOutcome::Unresolved => {}
    }

    schedule_teardown(ctx);
}

/// Tear the registry down after a grace period, letting the final messages
/// reach the sockets before they close.
fn schedule_teardown(ctx: &Arc<RaceContext>) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ctx.config.teardown_delay).await;
        ctx.registry.clear().await;
        info!("session registry torn down");
        ctx.closed.notify_one();
    });
}

/// Broadcast, then apply the forfeit rule if the relay evicted anyone.
async fn broadcast_and_sweep(ctx: &Arc<RaceContext>, message: ServerMessage) {
    let evicted = ctx.registry.broadcast(&message).await;
    if !evicted.is_empty() {
        check_forfeit(ctx).await;
    }
}

/// Forfeit rule: while the race is running and unresolved, the sole
/// remaining session is awarded the win.
async fn check_forfeit(ctx: &Arc<RaceContext>) {
    if !ctx.race_started() || ctx.arbiter.is_resolved() {
        return;
    }
    if let Some(survivor) = ctx.registry.sole_survivor().await {
        resolve(ctx, RaceOutcome::Forfeit(survivor)).await;
    }
}

/// The race server: admits exactly two players, then referees the race.
pub struct RaceServer {
    ctx: Arc<RaceContext>,
}

impl RaceServer {
    /// Create a server for one race.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: Arc::new(RaceContext::new(config)),
        }
    }

    /// Bind the configured address and serve one race to completion.
    ///
    /// A bind failure is fatal; per-attempt accept errors are logged and
    /// the accept loop continues.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.ctx.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("race server listening on {addr}");
        self.serve(listener).await;
        Ok(())
    }

    /// Serve one race on an already-bound listener (tests bind port 0 and
    /// pass the listener in). Returns once the race has been resolved and
    /// torn down.
    pub async fn serve(&self, listener: TcpListener) {
        // Admit until two sessions are live. A session that disconnects
        // before the race starts vacates its slot, so admission is
        // governed by current registry size, and identities are assigned
        // in admission order.
        loop {
            if self.ctx.registry.len().await >= RACE_PLAYERS {
                break;
            }
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let player_id = PlayerId::new(self.ctx.registry.len().await as u8 + 1);
                    info!("player {player_id} connected from {addr}");
                    admit_session(self.ctx.clone(), player_id, stream).await;
                }
                Err(e) => {
                    error!("accept error: {e}");
                }
            }
        }
        // No further accepts for the lifetime of the race.
        drop(listener);

        start_race(&self.ctx).await;
        self.ctx.closed.notified().await;
    }

    /// The race outcome as of this call.
    pub fn outcome(&self) -> RaceOutcome {
        self.ctx.arbiter.current()
    }

    /// The shared race state.
    pub fn race_state(&self) -> &RaceState {
        &self.ctx.state
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.ctx.registry.len().await
    }
}

/// Admit a connection: register the session, start its writer task, hand
/// the client its identity, and start the read loop.
async fn admit_session(ctx: Arc<RaceContext>, player_id: PlayerId, stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

    ctx.registry.insert(PlayerSession::new(player_id, tx)).await;
    tokio::spawn(run_writer(player_id, write_half, rx));

    ctx.registry
        .send_to(player_id, ServerMessage::PlayerAssigned(player_id))
        .await;

    tokio::spawn(run_session(ctx, player_id, read_half));
}

/// Drain a session's outbound channel onto its socket, one line per
/// message. A write failure ends the task; the closed channel is what
/// later sends observe, which is the registry's lazy-eviction trigger.
async fn run_writer(
    player_id: PlayerId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let mut line = message.encode();
        debug!("sending to player {player_id}: {line}");
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("write to player {player_id} failed: {e}");
            break;
        }
    }
    debug!("writer for player {player_id} finished");
}

/// One session's inbound read loop: newline-delimited messages until the
/// stream ends, a read fails, or a line fails to parse. Every exit path
/// funnels into the same unregistration below.
async fn run_session(ctx: Arc<RaceContext>, player_id: PlayerId, read_half: OwnedReadHalf) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("received from player {player_id}: {line}");
                let message = match ClientMessage::parse(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        // Malformed input is handled like a disconnect.
                        warn!("dropping player {player_id}: {e}");
                        break;
                    }
                };
                if handle_message(&ctx, player_id, message).await.is_break() {
                    break;
                }
            }
            Ok(None) => {
                debug!("player {player_id} closed the stream");
                break;
            }
            Err(e) => {
                debug!("read from player {player_id} failed: {e}");
                break;
            }
        }
    }

    unregister_session(&ctx, player_id).await;
}

/// Dispatch one parsed message. Returns `Break` when the session asked to
/// end cooperatively.
async fn handle_message(
    ctx: &Arc<RaceContext>,
    player_id: PlayerId,
    message: ClientMessage,
) -> ControlFlow<()> {
    // Once the outcome is resolved the race is frozen: inbound messages
    // are accepted but have no effect.
    if ctx.arbiter.is_resolved() {
        return ControlFlow::Continue(());
    }

    match message {
        ClientMessage::PositionUpdate { x, y } => {
            ctx.state.set_position(player_id, x, y);
            broadcast_and_sweep(
                ctx,
                ServerMessage::PlayerPosition {
                    player: player_id,
                    x,
                    y,
                },
            )
            .await;
        }
        ClientMessage::ItemCollected { item_id } => {
            ctx.state.add_item(&item_id);
            broadcast_and_sweep(
                ctx,
                ServerMessage::ItemCollected {
                    player: player_id,
                    item_id,
                },
            )
            .await;
        }
        ClientMessage::RoomVisited { room_id } => {
            ctx.state.add_room(room_id);
            broadcast_and_sweep(
                ctx,
                ServerMessage::RoomVisited {
                    player: player_id,
                    room_id,
                },
            )
            .await;
        }
        ClientMessage::FloorChanged { floor } => {
            // Broadcast only: peers use it to hide or relocate the
            // opponent marker. No shared-state effect.
            broadcast_and_sweep(
                ctx,
                ServerMessage::FloorChanged {
                    player: player_id,
                    floor,
                },
            )
            .await;
        }
        ClientMessage::VictoryClaim { player } => {
            info!("player {player_id} reported victory for player {player}");
            resolve(ctx, RaceOutcome::Victory(player)).await;
        }
        ClientMessage::TimeUp => {
            resolve(ctx, RaceOutcome::Timeout).await;
        }
        ClientMessage::Disconnecting => {
            info!("player {player_id} is disconnecting");
            ctx.registry.mark_disconnected(player_id).await;
            return ControlFlow::Break(());
        }
    }

    ControlFlow::Continue(())
}

/// Read-loop epilogue: drop the session and apply the forfeit rule.
///
/// Before the race starts a departing player simply vacates the slot; the
/// acceptor hands the identity to the next connection. After the start,
/// the sole remaining player is awarded the win.
async fn unregister_session(ctx: &Arc<RaceContext>, player_id: PlayerId) {
    if ctx.registry.remove(player_id).await {
        info!("player {player_id} disconnected");
    }
    check_forfeit(ctx).await;
}
