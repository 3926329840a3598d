//! Whole-round scenarios with two replicas exchanging their writes.

use std::collections::{BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blast_arena::config::ArenaConfig;
use blast_arena::core::vec2::Vec2;
use blast_arena::game::input::{Direction, InputFrame};
use blast_arena::game::session::{admit_player, force_start};
use blast_arena::game::state::{PlayerId, Room, RoomId, RoomStatus};
use blast_arena::game::tick::LocalSimulation;
use blast_arena::game::update::RoomUpdate;

const A: PlayerId = PlayerId::new([1; 16]);
const B: PlayerId = PlayerId::new([2; 16]);

fn lobby(density: u32) -> Room {
    let mut room = Room::with_density(RoomId::new([42; 16]), 0, density);
    admit_player(&mut room, A, "a", 0).unwrap();
    admit_player(&mut room, B, "b", 0).unwrap();
    room
}

fn random_input(rng: &mut StdRng) -> InputFrame {
    let mut frame = if rng.gen_bool(0.8) {
        InputFrame::held(Direction::ALL[rng.gen_range(0..4)])
    } else {
        InputFrame::new()
    };
    if rng.gen_bool(0.03) {
        frame = frame.with_bomb();
    }
    frame
}

/// Both replicas sitting on identical rule state.
fn assert_converged(a: &Room, b: &Room) {
    assert_eq!(a.status, b.status);
    assert_eq!(a.grid, b.grid);
    assert_eq!(a.resolved_bombs, b.resolved_bombs);
    assert_eq!(
        a.bombs.keys().collect::<Vec<_>>(),
        b.bombs.keys().collect::<Vec<_>>()
    );
    assert_eq!(a.sudden_death, b.sudden_death);
    assert_eq!(a.winner_id, b.winner_id);
    for (id, pa) in &a.players {
        let pb = &b.players[id];
        assert_eq!(pa.lives, pb.lives, "lives of {}", id);
        assert_eq!(pa.hits, pb.hits, "hits on {}", id);
        assert_eq!(pa.seat, pb.seat);
        assert_eq!(pa.is_alive, pb.is_alive, "alive flag of {}", id);
        assert_eq!(pa.score, pb.score, "score of {}", id);
        assert_eq!(pa.bomb_count, pb.bomb_count);
        assert_eq!(pa.blast_radius, pb.blast_radius);
    }
}

#[test]
fn sudden_death_decides_round() {
    let mut config = ArenaConfig::default();
    config.crate_density_percent = 0;

    let mut base = lobby(0);
    // B waits in the middle, out of reach of every shrink level
    base.players.get_mut(&B).unwrap().position = Vec2::new(5.5, 5.5);
    let mut room_a = base.clone();
    let mut room_b = base;
    let mut sim_a = LocalSimulation::new(A, config.clone());
    let mut sim_b = LocalSimulation::new(B, config.clone());

    let dt = config.tick_interval_ms();
    let mut now = 0;
    let mut ended_at = None;
    while now < 300_000 {
        now += dt;
        let ra = sim_a.tick(&mut room_a, &InputFrame::new(), now, dt);
        let rb = sim_b.tick(&mut room_b, &InputFrame::new(), now, dt);
        ra.update.apply_to(&mut room_b);
        rb.update.apply_to(&mut room_a);

        if ended_at.is_none() && (ra.round_ended || rb.round_ended) {
            ended_at = Some(now);
        }
        if room_a.status == RoomStatus::Ended && room_b.status == RoomStatus::Ended {
            break;
        }
    }

    // Countdown from the second join, then the full round, then two shrink steps
    assert_eq!(room_a.started_at, Some(60_000));
    assert_eq!(room_b.started_at, Some(60_000));
    let ended_at = ended_at.unwrap();
    assert!(ended_at >= 60_000 + config.round_duration_ms + 2 * config.shrink_interval_ms);

    assert_eq!(room_a.winner_id, Some(B));
    assert_eq!(room_b.winner_id, Some(B));
    assert!(!room_a.players[&A].is_alive);
    assert_eq!(room_b.players[&A].lives, 0);
    assert_eq!(room_b.players[&B].lives, 3);
    assert!(room_a.sudden_death.active);
}

#[test]
fn random_play_with_delayed_delivery_converges() {
    let config = ArenaConfig::default();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut room_a = lobby(config.crate_density_percent);
    force_start(&mut room_a, 0).unwrap();
    let mut room_b = room_a.clone();
    let mut sim_a = LocalSimulation::new(A, config.clone());
    let mut sim_b = LocalSimulation::new(B, config.clone());

    // (deliver_at, update) queues toward each replica
    let mut to_a: VecDeque<(u64, RoomUpdate)> = VecDeque::new();
    let mut to_b: VecDeque<(u64, RoomUpdate)> = VecDeque::new();
    let mut lives_seen = [(3u8, 3u8); 2];

    let dt = config.tick_interval_ms();
    let mut now = 0;
    for _ in 0..4_000 {
        now += dt;
        let ra = sim_a.tick(&mut room_a, &random_input(&mut rng), now, dt);
        let rb = sim_b.tick(&mut room_b, &random_input(&mut rng), now, dt);
        if !ra.update.is_empty() {
            to_b.push_back((now + rng.gen_range(0..6) * dt, ra.update));
        }
        if !rb.update.is_empty() {
            to_a.push_back((now + rng.gen_range(0..6) * dt, rb.update));
        }

        for (queue, room) in [(&mut to_a, &mut room_a), (&mut to_b, &mut room_b)] {
            let (due, later): (Vec<_>, Vec<_>) = queue.drain(..).partition(|(at, _)| *at <= now);
            queue.extend(later);
            for (_, update) in due {
                update.apply_to(room);
            }
        }

        for (slot, room) in [&room_a, &room_b].into_iter().enumerate() {
            // Tombstoned bombs never come back
            let live: BTreeSet<_> = room.bombs.keys().collect();
            assert!(room.resolved_bombs.iter().all(|id| !live.contains(id)));
            // Lives never grow
            let (la, lb) = (room.players[&A].lives, room.players[&B].lives);
            assert!(la <= lives_seen[slot].0 && lb <= lives_seen[slot].1);
            lives_seen[slot] = (la, lb);
        }
    }

    for (_, update) in to_a.drain(..) {
        update.apply_to(&mut room_a);
    }
    for (_, update) in to_b.drain(..) {
        update.apply_to(&mut room_b);
    }
    RoomUpdate::from_room(&room_a).apply_to(&mut room_b);
    RoomUpdate::from_room(&room_b).apply_to(&mut room_a);

    assert_converged(&room_a, &room_b);
}
