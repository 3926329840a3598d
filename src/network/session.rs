//! Join Protocol
//!
//! Finds a seat for a player: resolve the identity, look for an open lobby on
//! the channel, and write the player into it. When no lobby will take the
//! player a new room is created with the player already seated.
//!
//! Nothing is written to any room until the identity is known.

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::ArenaConfig;
use crate::core::clock::{Clock, Millis};
use crate::game::session::{admit_player, JoinRejection};
use crate::game::state::{Player, Room, RoomId, RoomStatus, MAX_PLAYERS};
use crate::network::channel::{ChannelError, StateChannel};
use crate::network::identity::{Identity, IdentityError, IdentityProvider};
use crate::network::protocol::RoomSummary;

/// Join errors. Fatal for the attempt.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Identity could not be resolved.
    #[error("identity unavailable: {0}")]
    Identity(#[from] IdentityError),

    /// Channel failed mid-join.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// A seated player.
#[derive(Debug, Clone)]
pub struct JoinTicket {
    /// Who joined.
    pub identity: Identity,
    /// Room the player sits in.
    pub room_id: RoomId,
    /// The player's record as written.
    pub player: Player,
    /// Room as it stood after the join.
    pub room: Room,
    /// Whether this join created the room.
    pub created: bool,
}

/// Result of trying one room.
#[derive(Debug)]
pub enum JoinOutcome {
    /// Seated.
    Joined(JoinTicket),
    /// The room would not take the player.
    TryAnotherRoom(JoinRejection),
    /// The room no longer exists.
    RoomGone,
}

/// Whether a listed room may still have a seat for `identity`.
fn is_candidate(summary: &RoomSummary, identity: &Identity) -> bool {
    summary.status == RoomStatus::Lobby
        && summary.player_count() < MAX_PLAYERS
        && !summary.player_ids.contains(&identity.player_id)
}

/// Lobbies worth trying, fullest first so rooms fill before new ones open.
fn candidate_rooms(mut rooms: Vec<RoomSummary>, identity: &Identity) -> Vec<RoomId> {
    rooms.retain(|r| is_candidate(r, identity));
    rooms.sort_by(|a, b| {
        b.player_count()
            .cmp(&a.player_count())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.room_id.cmp(&b.room_id))
    });
    rooms.into_iter().map(|r| r.room_id).collect()
}

/// Try to take a seat in one room.
pub async fn try_join<C: StateChannel>(
    channel: &C,
    room_id: RoomId,
    identity: &Identity,
    now: Millis,
) -> Result<JoinOutcome, JoinError> {
    let Some(mut room) = channel.fetch_snapshot(room_id).await? else {
        return Ok(JoinOutcome::RoomGone);
    };

    let update = match admit_player(&mut room, identity.player_id, &identity.display_name, now) {
        Ok((_, update)) => update,
        Err(rejection) => return Ok(JoinOutcome::TryAnotherRoom(rejection)),
    };
    channel.publish(room_id, update).await?;

    // Another client may have taken the last seat between fetch and publish
    let Some(merged) = channel.fetch_snapshot(room_id).await? else {
        return Ok(JoinOutcome::RoomGone);
    };
    let Some(seated) = merged.get_player(&identity.player_id).cloned() else {
        return Ok(JoinOutcome::TryAnotherRoom(JoinRejection::RoomFull));
    };

    Ok(JoinOutcome::Joined(JoinTicket {
        identity: identity.clone(),
        room_id,
        player: seated,
        room: merged,
        created: false,
    }))
}

/// Create a room with the player already seated.
async fn create_with<C: StateChannel>(
    channel: &C,
    identity: &Identity,
    now: Millis,
    config: &ArenaConfig,
) -> Result<JoinTicket, JoinError> {
    let mut room = Room::with_density(RoomId::random(), now, config.crate_density_percent);
    let (player, _) = admit_player(&mut room, identity.player_id, &identity.display_name, now)
        .map_err(|e| ChannelError::Remote(format!("fresh room rejected its creator: {e}")))?;

    channel.create_room(room.clone()).await?;
    info!(
        room = %room.id.short(),
        player = %identity.player_id.short(),
        "Created room"
    );

    Ok(JoinTicket {
        identity: identity.clone(),
        room_id: room.id,
        player,
        room,
        created: true,
    })
}

/// Seat the player in an open lobby, or create a new room.
#[instrument(skip_all)]
pub async fn join_or_create<C, P, K>(
    channel: &C,
    identities: &P,
    clock: &K,
    config: &ArenaConfig,
) -> Result<JoinTicket, JoinError>
where
    C: StateChannel,
    P: IdentityProvider,
    K: Clock,
{
    let identity = identities.identify().await?;
    let rooms = channel.list_rooms().await?;

    for room_id in candidate_rooms(rooms, &identity) {
        match try_join(channel, room_id, &identity, clock.now_ms()).await? {
            JoinOutcome::Joined(ticket) => {
                info!(
                    room = %room_id.short(),
                    player = %identity.player_id.short(),
                    players = ticket.room.players.len(),
                    "Joined room"
                );
                return Ok(ticket);
            }
            JoinOutcome::TryAnotherRoom(reason) => {
                debug!(room = %room_id.short(), %reason, "Trying another room");
            }
            JoinOutcome::RoomGone => {
                debug!(room = %room_id.short(), "Room vanished");
            }
        }
    }

    create_with(channel, &identity, clock.now_ms(), config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::core::clock::ManualClock;
    use crate::core::vec2::TilePos;
    use crate::game::state::PlayerId;
    use crate::network::channel::InMemoryChannel;
    use crate::network::identity::StaticIdentityProvider;

    struct NoIdentity;

    impl IdentityProvider for NoIdentity {
        async fn identify(&self) -> Result<Identity, IdentityError> {
            Err(IdentityError::Unavailable("signed out".into()))
        }
    }

    fn provider(n: u8) -> StaticIdentityProvider {
        StaticIdentityProvider(Identity::new(PlayerId::new([n; 16]), format!("p{n}")))
    }

    #[tokio::test]
    async fn test_first_player_creates_room() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(1_000);
        let config = ArenaConfig::default();

        let ticket = join_or_create(&channel, &provider(1), &clock, &config).await.unwrap();
        assert!(ticket.created);
        assert_eq!(ticket.player.join_order, 0);
        assert_eq!(channel.list_rooms().await.unwrap().len(), 1);

        let stored = channel.fetch_snapshot(ticket.room_id).await.unwrap().unwrap();
        assert!(stored.players.contains_key(&ticket.identity.player_id));
    }

    #[tokio::test]
    async fn test_second_player_joins_and_anchors_countdown() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(1_000);
        let config = ArenaConfig::default();

        let first = join_or_create(&channel, &provider(1), &clock, &config).await.unwrap();
        clock.advance(500);
        let second = join_or_create(&channel, &provider(2), &clock, &config).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.room_id, first.room_id);
        assert_eq!(second.player.join_order, 1);
        assert_eq!(second.room.lobby_start_time, Some(1_500));
    }

    #[tokio::test]
    async fn test_fourth_player_starts_round_fifth_gets_new_room() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(0);
        let config = ArenaConfig::default();

        let mut room_id = None;
        for n in 1..=4 {
            let ticket = join_or_create(&channel, &provider(n), &clock, &config).await.unwrap();
            room_id.get_or_insert(ticket.room_id);
            assert_eq!(Some(ticket.room_id), room_id);
        }
        let room = channel.fetch_snapshot(room_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Playing);

        let fifth = join_or_create(&channel, &provider(5), &clock, &config).await.unwrap();
        assert!(fifth.created);
        assert_ne!(Some(fifth.room_id), room_id);
    }

    #[tokio::test]
    async fn test_identity_failure_writes_nothing() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(0);

        let result = join_or_create(&channel, &NoIdentity, &clock, &ArenaConfig::default()).await;
        assert!(matches!(result, Err(JoinError::Identity(_))));
        assert!(channel.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_same_identity_gets_other_room() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(0);
        let config = ArenaConfig::default();

        let first = join_or_create(&channel, &provider(1), &clock, &config).await.unwrap();
        let outcome = try_join(&channel, first.room_id, &first.identity, 10).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::TryAnotherRoom(JoinRejection::AlreadyJoined)));

        let missing = try_join(&channel, RoomId::new([0xee; 16]), &first.identity, 10).await.unwrap();
        assert!(matches!(missing, JoinOutcome::RoomGone));
    }

    #[tokio::test]
    async fn test_concurrent_joins_get_distinct_seats() {
        let channel = InMemoryChannel::new();
        let clock = ManualClock::new(0);
        let config = ArenaConfig::default();
        let host = join_or_create(&channel, &provider(1), &clock, &config).await.unwrap();

        // Both joiners read the room before either write lands
        let mut seen_a = channel.fetch_snapshot(host.room_id).await.unwrap().unwrap();
        let mut seen_b = seen_a.clone();
        let (a, join_a) = admit_player(&mut seen_a, PlayerId::new([2; 16]), "p2", 10).unwrap();
        let (b, join_b) = admit_player(&mut seen_b, PlayerId::new([3; 16]), "p3", 10).unwrap();
        assert_eq!(a.join_order, b.join_order);

        channel.publish(host.room_id, join_a).await.unwrap();
        channel.publish(host.room_id, join_b).await.unwrap();

        let room = channel.fetch_snapshot(host.room_id).await.unwrap().unwrap();
        let seats: BTreeSet<u8> = room.players.values().map(|p| p.seat).collect();
        let tiles: BTreeSet<TilePos> = room.players.values().map(|p| p.tile()).collect();
        assert_eq!(seats, BTreeSet::from([0, 1, 2]));
        assert_eq!(tiles.len(), 3);
    }

    #[test]
    fn test_candidates_fullest_first() {
        let me = Identity::new(PlayerId::new([9; 16]), "me");
        let summary = |n: u8, players: usize, status| RoomSummary {
            room_id: RoomId::new([n; 16]),
            status,
            player_ids: (0..players as u8).map(|i| PlayerId::new([i + 100; 16])).collect(),
            created_at: n as Millis,
        };
        let rooms = vec![
            summary(1, 1, RoomStatus::Lobby),
            summary(2, 3, RoomStatus::Lobby),
            summary(3, 4, RoomStatus::Lobby),
            summary(4, 2, RoomStatus::Playing),
        ];
        let order = candidate_rooms(rooms, &me);
        assert_eq!(order, vec![RoomId::new([2; 16]), RoomId::new([1; 16])]);
    }
}
