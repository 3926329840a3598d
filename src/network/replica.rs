//! Client Replica
//!
//! One client's copy of a room and the loop that keeps it moving: tick the
//! local simulation, publish what changed without waiting, and fold in the
//! full rooms the channel pushes back.
//!
//! The local player's position is never taken from a remote copy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::ArenaConfig;
use crate::core::clock::{Clock, Millis};
use crate::game::events::GameEvent;
use crate::game::input::InputFrame;
use crate::game::interpolation::RemoteInterpolator;
use crate::game::state::{PlayerId, Room, RoomId};
use crate::game::tick::{LocalSimulation, TickResult};
use crate::game::update::{MergeReport, RoomUpdate};
use crate::network::channel::{ChannelError, StateChannel};
use crate::network::session::JoinTicket;

/// Fold a remote copy into the local one, keeping the local player's position
/// unless the merge moved the player to another seat.
pub fn merge_remote(local: &mut Room, remote: &Room, local_player: &PlayerId) -> MergeReport {
    let kept = local.get_player(local_player).map(|p| p.position);
    let report = RoomUpdate::from_room(remote).apply_to(local);
    if report.players_reseated.contains(local_player) {
        return report;
    }
    if let (Some(position), Some(player)) = (kept, local.get_player_mut(local_player)) {
        player.position = position;
    }
    report
}

/// A client's replica of one room.
pub struct ArenaClient<C: StateChannel, K: Clock> {
    channel: Arc<C>,
    clock: Arc<K>,
    room: Room,
    sim: LocalSimulation,
    interpolator: RemoteInterpolator,
    last_tick_at: Option<Millis>,
}

impl<C: StateChannel, K: Clock> ArenaClient<C, K> {
    /// Start from a completed join.
    pub fn new(channel: Arc<C>, clock: Arc<K>, ticket: JoinTicket, config: ArenaConfig) -> Self {
        let local = ticket.identity.player_id;
        let mut interpolator = RemoteInterpolator::from_config(local, &config);
        interpolator.sync_from_room(&ticket.room);
        Self {
            channel,
            clock,
            room: ticket.room,
            sim: LocalSimulation::new(local, config),
            interpolator,
            last_tick_at: None,
        }
    }

    /// Local copy of the room.
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Room id.
    pub fn room_id(&self) -> RoomId {
        self.room.id
    }

    /// Player driven by this client.
    pub fn local_player(&self) -> PlayerId {
        self.sim.local_player
    }

    /// Smoothed positions of the other players.
    pub fn interpolator(&self) -> &RemoteInterpolator {
        &self.interpolator
    }

    /// Run one tick and publish its write in the background.
    ///
    /// The frame delta is clamped to [`ArenaConfig::max_frame_ms`], so a
    /// stalled loop resumes with a short step instead of a jump.
    pub fn step(&mut self, input: &InputFrame) -> TickResult {
        let now = self.clock.now_ms();
        let dt = match self.last_tick_at {
            Some(last) => now.saturating_sub(last).min(self.sim.config.max_frame_ms()),
            None => self.sim.config.tick_interval_ms(),
        };
        self.last_tick_at = Some(now);

        let result = self.sim.tick(&mut self.room, input, now, dt);
        if !result.update.is_empty() {
            self.publish_detached(result.update.clone());
        }

        self.interpolator.sync_from_room(&self.room);
        self.interpolator.step();
        result
    }

    /// Publish without waiting. Failures are logged and left for the next
    /// snapshot to repair.
    fn publish_detached(&self, update: RoomUpdate) {
        let channel = self.channel.clone();
        let room_id = self.room.id;
        tokio::spawn(async move {
            if let Err(e) = channel.publish(room_id, update).await {
                warn!(room = %room_id.short(), error = %e, "Publish failed");
            }
        });
    }

    /// Fetch the full room in the background and hand it to `sink`.
    ///
    /// Skipped while an earlier fetch is still out.
    fn fetch_detached(&self, in_flight: &mut Option<JoinHandle<()>>, sink: &mpsc::Sender<Room>) {
        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let channel = self.channel.clone();
        let room_id = self.room.id;
        let sink = sink.clone();
        *in_flight = Some(tokio::spawn(async move {
            match channel.fetch_snapshot(room_id).await {
                Ok(Some(room)) => {
                    let _ = sink.send(room).await;
                }
                Ok(None) => warn!(room = %room_id.short(), "Room missing from channel"),
                Err(e) => warn!(room = %room_id.short(), error = %e, "Snapshot fetch failed"),
            }
        }));
    }

    /// Merge a full room pushed by the channel.
    pub fn handle_remote(&mut self, remote: &Room) -> Vec<GameEvent> {
        if remote.id != self.room.id {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let report = merge_remote(&mut self.room, remote, &self.sim.local_player);

        let mut events = Vec::new();
        if let Some((old, new)) = report.status_changed {
            events.push(GameEvent::status_changed(now, old, new));
        }
        for id in &report.explosions_added {
            let Some(explosion) = self.room.explosions.get(id) else {
                continue;
            };
            // Already gone from the screen on this client
            if explosion.is_expired(now, self.sim.config.explosion_display_ms) {
                continue;
            }
            events.push(GameEvent::explosion_seen(
                now,
                *id,
                (explosion.origin_x, explosion.origin_y),
            ));
        }
        if !report.players_added.is_empty() {
            debug!(
                room = %self.room.id.short(),
                joined = report.players_added.len(),
                "Players joined"
            );
        }

        self.interpolator.sync_from_room(&self.room);
        events.sort();
        events
    }

    /// Refetch the full room and merge it.
    pub async fn resync(&mut self) -> Result<Vec<GameEvent>, ChannelError> {
        match self.channel.fetch_snapshot(self.room.id).await? {
            Some(remote) => Ok(self.handle_remote(&remote)),
            None => Err(ChannelError::RoomNotFound(self.room.id)),
        }
    }

    /// Drive the replica until shutdown. Input is read from `input`, events
    /// go to `events`. Returns the final local room.
    ///
    /// The loop never awaits channel I/O: publishes and snapshot fetches run
    /// in their own tasks and fetched rooms come back over a queue.
    #[instrument(skip_all, fields(room = %self.room.id.short()))]
    pub async fn run(
        mut self,
        input: watch::Receiver<InputFrame>,
        events: mpsc::Sender<GameEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<Room, ChannelError> {
        let mut changes = self.channel.subscribe(self.room.id).await?;

        let mut ticker = interval(Duration::from_millis(self.sim.config.tick_interval_ms().max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut snapshots = interval(Duration::from_millis(self.sim.config.snapshot_interval_ms.max(1)));
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (fetched_tx, mut fetched) = mpsc::channel::<Room>(4);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(player = %self.sim.local_player.short(), "Replica loop started");

        loop {
            let emitted = tokio::select! {
                _ = ticker.tick() => {
                    let frame = *input.borrow();
                    self.step(&frame).events
                }
                change = changes.recv() => match change {
                    Ok(remote) => self.handle_remote(&remote),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Change feed lagged, resyncing");
                        self.fetch_detached(&mut in_flight, &fetched_tx);
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Change feed closed");
                        return Err(ChannelError::Closed);
                    }
                },
                _ = snapshots.tick() => {
                    self.fetch_detached(&mut in_flight, &fetched_tx);
                    Vec::new()
                }
                Some(remote) = fetched.recv() => self.handle_remote(&remote),
                _ = shutdown.recv() => {
                    info!("Replica loop stopped");
                    break;
                }
            };

            for event in emitted {
                // A closed sink only means nobody is watching
                let _ = events.try_send(event);
            }
        }

        if let Some(handle) = in_flight {
            handle.abort();
        }
        Ok(self.room)
    }
}
