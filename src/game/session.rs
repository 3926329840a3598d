//! Room Session Controller
//!
//! `lobby -> playing -> ended`. Transitions are computed from times stored in
//! the room, so every replica that runs the check reaches the same
//! `started_at` no matter whose clock noticed first.

use thiserror::Error;
use tracing::info;

use crate::config::ArenaConfig;
use crate::core::clock::Millis;
use crate::game::state::{Player, PlayerId, Room, RoomStatus, MAX_PLAYERS};
use crate::game::update::RoomUpdate;

/// Players needed before the lobby countdown starts.
pub const COUNTDOWN_PLAYERS: usize = 2;

/// Why a room would not take a player. The caller should try another room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    /// Every seat is taken
    #[error("room is full")]
    RoomFull,
    /// The round has started or ended
    #[error("room is not in lobby")]
    NotInLobby,
    /// The identity already holds a seat
    #[error("player already in room")]
    AlreadyJoined,
}

/// Seat a player in a lobby.
///
/// The Nth joiner gets the Nth spawn corner and colour. The second join
/// anchors the countdown; the fourth starts the round immediately.
pub fn admit_player(
    room: &mut Room,
    player_id: PlayerId,
    name: &str,
    now: Millis,
) -> Result<(Player, RoomUpdate), JoinRejection> {
    if room.status != RoomStatus::Lobby {
        return Err(JoinRejection::NotInLobby);
    }
    if room.players.contains_key(&player_id) {
        return Err(JoinRejection::AlreadyJoined);
    }
    if room.players.len() >= MAX_PLAYERS {
        return Err(JoinRejection::RoomFull);
    }

    let slot = room.players.len();
    let spawn = room.grid.spawn_points()[slot];
    let player = Player::new(player_id, name, slot as u8, spawn);
    room.players.insert(player_id, player.clone());

    let mut update = RoomUpdate::join(player.clone());
    if room.players.len() == COUNTDOWN_PLAYERS && room.lobby_start_time.is_none() {
        room.lobby_start_time = Some(now);
        update.lobby_start_time = Some(now);
    }
    if room.players.len() == MAX_PLAYERS {
        if let Some(start) = start_round(room, now) {
            update.extend(start);
        }
    }

    info!(
        room = %room.id.short(),
        player = %player_id.short(),
        slot,
        "Player joined room"
    );
    Ok((player, update))
}

/// Move a lobby to `playing` at `at`.
pub fn start_round(room: &mut Room, at: Millis) -> Option<RoomUpdate> {
    if room.status != RoomStatus::Lobby {
        return None;
    }
    room.status = RoomStatus::Playing;
    room.started_at = Some(at);
    info!(room = %room.id.short(), players = room.players.len(), at, "Round started");
    Some(RoomUpdate {
        status: Some(RoomStatus::Playing),
        started_at: Some(at),
        ..Default::default()
    })
}

/// Lobby countdown left, `None` until the countdown is anchored.
pub fn countdown_remaining(room: &Room, now: Millis, config: &ArenaConfig) -> Option<Millis> {
    let anchor = room.lobby_start_time?;
    Some(anchor.saturating_add(config.lobby_countdown_ms).saturating_sub(now))
}

/// Start the round once the lobby is full or the countdown from the second
/// join has elapsed.
///
/// A countdown start is dated at the deadline, not `now`. A full lobby only
/// gets here when concurrent joins filled it without any one of them seeing
/// the fourth seat taken; replicas that notice at different times settle on
/// the earliest `started_at`.
pub fn check_auto_start(room: &mut Room, now: Millis, config: &ArenaConfig) -> Option<RoomUpdate> {
    if room.status != RoomStatus::Lobby || room.players.len() < COUNTDOWN_PLAYERS {
        return None;
    }
    if room.players.len() >= MAX_PLAYERS {
        return start_round(room, now);
    }
    let deadline = room.lobby_start_time?.saturating_add(config.lobby_countdown_ms);
    if now < deadline {
        return None;
    }
    start_round(room, deadline)
}

/// Start immediately, skipping the countdown.
pub fn force_start(room: &mut Room, now: Millis) -> Option<RoomUpdate> {
    if room.players.is_empty() {
        return None;
    }
    start_round(room, now)
}

/// End the round when at most one player is left standing.
///
/// Only rounds that started with two or more players can end this way.
pub fn check_round_end(room: &mut Room) -> Option<RoomUpdate> {
    if room.status != RoomStatus::Playing || room.players.len() < COUNTDOWN_PLAYERS {
        return None;
    }
    if room.alive_count() > 1 {
        return None;
    }

    let winner = room.players.values().find(|p| p.is_alive).map(|p| p.id);
    room.status = RoomStatus::Ended;
    room.winner_id = room.winner_id.or(winner);
    room.clear_bombs();
    info!(
        room = %room.id.short(),
        winner = ?room.winner_id,
        "Round ended"
    );
    Some(RoomUpdate {
        status: Some(RoomStatus::Ended),
        winner_id: room.winner_id,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::state::{PlayerColor, RoomId};

    fn lobby() -> Room {
        Room::new(RoomId::new([1; 16]), 0)
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    #[test]
    fn test_join_assigns_spawn_and_colour() {
        let mut room = lobby();
        let (first, _) = admit_player(&mut room, pid(1), "a", 0).unwrap();
        let (second, update) = admit_player(&mut room, pid(2), "b", 500).unwrap();

        assert_eq!(first.position, Vec2::new(1.5, 1.5));
        assert_eq!(first.color, PlayerColor::Red);
        assert_eq!(second.position, Vec2::new(13.5, 1.5));
        assert_eq!(second.color, PlayerColor::Blue);
        assert_eq!(room.lobby_start_time, Some(500));
        assert_eq!(update.lobby_start_time, Some(500));
    }

    #[test]
    fn test_fourth_join_starts_round() {
        let mut room = lobby();
        for n in 1..=3 {
            admit_player(&mut room, pid(n), "p", n as Millis * 100).unwrap();
            assert_eq!(room.status, RoomStatus::Lobby);
        }
        let (_, update) = admit_player(&mut room, pid(4), "d", 900).unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.started_at, Some(900));
        assert_eq!(update.status, Some(RoomStatus::Playing));
        assert_eq!(update.players_added.len(), 1);

        assert_eq!(
            admit_player(&mut room, pid(5), "e", 1_000).unwrap_err(),
            JoinRejection::NotInLobby
        );
    }

    #[test]
    fn test_rejections() {
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        assert_eq!(
            admit_player(&mut room, pid(1), "a", 0).unwrap_err(),
            JoinRejection::AlreadyJoined
        );
    }

    #[test]
    fn test_countdown_start_anchored_at_second_join() {
        let config = ArenaConfig::default();
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        assert!(check_auto_start(&mut room, 1_000_000, &config).is_none());

        admit_player(&mut room, pid(2), "b", 10_000).unwrap();
        assert_eq!(countdown_remaining(&room, 40_000, &config), Some(30_000));
        assert!(check_auto_start(&mut room, 69_999, &config).is_none());

        // Noticed late, but the start time is still the deadline
        let update = check_auto_start(&mut room, 70_250, &config).unwrap();
        assert_eq!(update.started_at, Some(70_000));
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(check_auto_start(&mut room, 80_000, &config).is_none());
    }

    #[test]
    fn test_lobby_filled_by_merged_joins_starts() {
        let config = ArenaConfig::default();
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        let base = room.clone();

        // Three clients each joined their own copy of the one-player lobby
        let mut joins = RoomUpdate::default();
        for n in 2..=4 {
            let mut copy = base.clone();
            let (_, update) = admit_player(&mut copy, pid(n), "p", 100).unwrap();
            joins.extend(update);
        }
        joins.apply_to(&mut room);
        assert_eq!(room.players.len(), MAX_PLAYERS);
        assert_eq!(room.status, RoomStatus::Lobby);

        let seats: Vec<u8> = room.players.values().map(|p| p.seat).collect();
        assert_eq!(seats, vec![0, 1, 2, 3]);

        let update = check_auto_start(&mut room, 250, &config).unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(update.started_at, Some(250));
    }

    #[test]
    fn test_round_end_drops_bombs_and_tombstones() {
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        admit_player(&mut room, pid(2), "b", 0).unwrap();
        force_start(&mut room, 0).unwrap();
        room.resolved_bombs.insert(crate::game::state::BombId::new([5; 16]));
        room.players.get_mut(&pid(2)).unwrap().is_alive = false;

        check_round_end(&mut room).unwrap();
        assert!(room.bombs.is_empty());
        assert!(room.resolved_bombs.is_empty());
    }

    #[test]
    fn test_force_start() {
        let mut room = lobby();
        assert!(force_start(&mut room, 5).is_none());
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        assert!(force_start(&mut room, 5).is_some());
        assert_eq!(room.started_at, Some(5));
        assert!(force_start(&mut room, 6).is_none());
    }

    #[test]
    fn test_round_end_names_survivor() {
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        admit_player(&mut room, pid(2), "b", 0).unwrap();
        admit_player(&mut room, pid(3), "c", 0).unwrap();
        force_start(&mut room, 0).unwrap();

        assert!(check_round_end(&mut room).is_none());
        room.players.get_mut(&pid(1)).unwrap().is_alive = false;
        assert!(check_round_end(&mut room).is_none());
        room.players.get_mut(&pid(3)).unwrap().is_alive = false;

        let update = check_round_end(&mut room).unwrap();
        assert_eq!(update.winner_id, Some(pid(2)));
        assert_eq!(room.status, RoomStatus::Ended);
        assert!(check_round_end(&mut room).is_none());
    }

    #[test]
    fn test_solo_round_never_ends_by_elimination() {
        let mut room = lobby();
        admit_player(&mut room, pid(1), "a", 0).unwrap();
        force_start(&mut room, 0).unwrap();
        assert!(check_round_end(&mut room).is_none());
    }
}
