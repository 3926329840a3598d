//! Local Simulation Tick
//!
//! One iteration of a client's loop over its own copy of the room. The order
//! of stages is fixed:
//!
//! 1. lobby auto-start
//! 2. bomb placement
//! 3. local movement, pickups, zone damage
//! 4. detonations due now, chain scheduling
//! 5. sudden-death clock
//! 6. explosion pruning
//! 7. round-end check
//!
//! Every stage's writes are folded into a single [`RoomUpdate`] for the
//! caller to publish.

use tracing::debug;

use crate::config::ArenaConfig;
use crate::core::clock::Millis;
use crate::game::bomb::{place_bomb, prune_explosions, resolve_explosion, DetonationScheduler};
use crate::game::events::GameEvent;
use crate::game::input::InputFrame;
use crate::game::movement::{step_local_player, SimContext};
use crate::game::session::{check_auto_start, check_round_end};
use crate::game::state::{BombId, PlayerId, Room, RoomStatus};
use crate::game::sudden_death;
use crate::game::update::RoomUpdate;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Write to publish, empty if nothing changed
    pub update: RoomUpdate,
    /// Bombs this replica resolved
    pub resolved: Vec<BombId>,
    /// Whether the round ended this tick
    pub round_ended: bool,
}

/// Loop state owned by one client.
#[derive(Debug, Clone)]
pub struct LocalSimulation {
    /// Player driven by this client
    pub local_player: PlayerId,
    /// Movement loop state
    pub ctx: SimContext,
    /// Pending detonations
    pub scheduler: DetonationScheduler,
    /// Tunables
    pub config: ArenaConfig,
}

impl LocalSimulation {
    /// Create loop state for a player.
    pub fn new(local_player: PlayerId, config: ArenaConfig) -> Self {
        Self {
            local_player,
            ctx: SimContext::new(),
            scheduler: DetonationScheduler::new(),
            config,
        }
    }

    /// Run one tick.
    pub fn tick(&mut self, room: &mut Room, input: &InputFrame, now: Millis, dt_ms: Millis) -> TickResult {
        tick(room, self, input, now, dt_ms)
    }
}

fn record_status_change(result: &mut TickResult, now: Millis, old: RoomStatus, room: &Room) {
    if room.status != old {
        result.events.push(GameEvent::status_changed(now, old, room.status));
    }
}

/// Run one simulation tick for the local client.
pub fn tick(
    room: &mut Room,
    sim: &mut LocalSimulation,
    input: &InputFrame,
    now: Millis,
    dt_ms: Millis,
) -> TickResult {
    let mut result = TickResult::default();
    let config = sim.config.clone();

    // 1. Lobby countdown
    let status = room.status;
    if let Some(update) = check_auto_start(room, now, &config) {
        result.update.extend(update);
    }
    record_status_change(&mut result, now, status, room);

    if room.status == RoomStatus::Ended {
        prune_explosions(room, now, config.explosion_display_ms);
        return result;
    }

    // 2. Bomb placement
    if input.bomb_pressed() {
        if let Some(bomb) = place_bomb(room, &sim.local_player, BombId::random(), now, &config) {
            sim.scheduler.schedule(bomb.id, bomb.expires_at);
            result
                .events
                .push(GameEvent::bomb_placed(now, bomb.id, bomb.owner_id, bomb.tile()));
            result.update.bombs_added.push(bomb);
        }
    }

    // 3. Movement
    let moved = step_local_player(room, &sim.local_player, input, dt_ms, now, &mut sim.ctx, &config);
    result.update.extend(moved.update);
    result.events.extend(moved.events);

    // 4. Detonations, including remote bombs
    sim.scheduler.retain_live(room);
    for bomb in room.bombs.values() {
        sim.scheduler.schedule(bomb.id, bomb.expires_at);
    }
    loop {
        let due = sim.scheduler.due(now);
        if due.is_empty() {
            break;
        }
        for id in due {
            let Some(outcome) = resolve_explosion(room, &id, now) else {
                continue;
            };
            for next in &outcome.chain {
                sim.scheduler.schedule_chain(*next, now.saturating_add(config.chain_delay_ms));
            }
            result.resolved.push(id);
            result.update.extend(outcome.update);
            result.events.extend(outcome.events);
        }
        // A zero chain delay makes chained bombs due in this same tick
        if config.chain_delay_ms > 0 {
            break;
        }
    }

    // 5. Sudden death
    let zone_events = sudden_death::update(room, now, &config);
    if !zone_events.is_empty() {
        result.update.sudden_death = Some(room.sudden_death);
        result.events.extend(zone_events);
    }

    // 6. Cosmetic cleanup
    prune_explosions(room, now, config.explosion_display_ms);

    // 7. Round end
    if let Some(update) = check_round_end(room) {
        result.round_ended = true;
        result.events.push(GameEvent::status_changed(now, RoomStatus::Playing, RoomStatus::Ended));
        result.events.push(GameEvent::round_ended(now, room.winner_id));
        result.update.extend(update);
    }

    if !result.resolved.is_empty() {
        debug!(
            room = %room.id.short(),
            resolved = result.resolved.len(),
            pending = sim.scheduler.len(),
            "Detonations processed"
        );
    }

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        room = %room.id.short(),
        now,
        events = result.events.len(),
        digest = %crate::core::hash::short_hex(&room.digest()),
        "Tick"
    );

    result.events.sort();
    result
}
