//! Blast Arena
//!
//! `blast-arena relay`  - run the WebSocket room relay
//! `blast-arena client` - join a room on a relay and idle until Ctrl-C
//! `blast-arena demo`   - two simulated clients on an in-process channel

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blast_arena::{
    config::ArenaConfig,
    core::clock::{Clock, ManualClock, SystemClock},
    core::hash::short_hex,
    game::events::{GameEvent, GameEventData},
    game::input::{Direction, InputFrame},
    game::state::RoomStatus,
    network::{
        channel::InMemoryChannel,
        identity::{AuthConfig, IdentityProvider, StaticIdentityProvider, TokenIdentityProvider},
        relay::{RelayConfig, RelayServer},
        replica::ArenaClient,
        session::join_or_create,
        ws_channel::WsChannel,
    },
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Blast Arena v{}", VERSION);
    let config = ArenaConfig::from_env().context("loading arena config")?;

    match std::env::args().nth(1).as_deref() {
        Some("relay") => run_relay().await,
        Some("client") => run_client(config).await,
        Some("demo") | None => run_demo(config).await,
        Some(other) => anyhow::bail!("unknown mode {other:?}, expected relay, client or demo"),
    }
}

async fn run_relay() -> anyhow::Result<()> {
    let relay = Arc::new(RelayServer::new(RelayConfig::from_env()?));

    let stopper = relay.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.shutdown();
        }
    });

    relay.run().await?;
    Ok(())
}

async fn run_client(config: ArenaConfig) -> anyhow::Result<()> {
    let url = std::env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080".to_string());
    let channel = Arc::new(WsChannel::connect(&url).await.context("connecting to relay")?);

    match std::env::var("ARENA_TOKEN") {
        Ok(token) => {
            let identities = TokenIdentityProvider::new(token, AuthConfig::from_env());
            play_online(channel, &identities, config).await
        }
        Err(_) => play_online(channel, &StaticIdentityProvider::random("guest"), config).await,
    }
}

async fn play_online<P: IdentityProvider>(
    channel: Arc<WsChannel>,
    identities: &P,
    config: ArenaConfig,
) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let ticket = join_or_create(channel.as_ref(), identities, clock.as_ref(), &config).await?;
    info!(
        room = %ticket.room_id,
        slot = ticket.player.seat,
        "Seated as {}",
        ticket.identity.display_name
    );

    let client = ArenaClient::new(channel, clock, ticket, config);
    let (_input_tx, input_rx) = watch::channel(InputFrame::new());
    let (events_tx, mut events_rx) = mpsc::channel::<GameEvent>(256);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_event(&event);
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let room = client.run(input_rx, events_tx, shutdown_rx).await?;
    info!(status = ?room.status, digest = %short_hex(&room.digest()), "Left room");
    Ok(())
}

/// Scripted input: walk a lap around the spawn corner, drop a bomb now and then.
fn scripted_input(tick: u64, slot: u64) -> InputFrame {
    let phase = (tick / 45 + slot) % 4;
    let direction = Direction::ALL[phase as usize];
    let frame = InputFrame::held(direction);
    if tick % 150 == 20 * slot {
        frame.with_bomb()
    } else {
        frame
    }
}

fn log_event(event: &GameEvent) {
    match &event.data {
        GameEventData::PlayerHit { player_id, lives_left, eliminated, .. } => {
            info!(at = event.at, eliminated, "Player {} hit, {} lives left", player_id.short(), lives_left);
        }
        GameEventData::BombExploded { origin, tiles, .. } => {
            info!(at = event.at, "Bomb exploded at {:?} covering {} tiles", origin, tiles);
        }
        GameEventData::SuddenDeathStarted => info!(at = event.at, "Sudden death"),
        GameEventData::ZoneShrunk { level } => info!(at = event.at, "Zone shrunk to {}", level),
        GameEventData::RoundEnded { winner_id } => {
            info!(at = event.at, "Round ended, winner {:?}", winner_id.map(|id| id.short()));
        }
        GameEventData::StatusChanged { old_status, new_status } => {
            info!(at = event.at, "Room {:?} -> {:?}", old_status, new_status);
        }
        _ => {}
    }
}

/// Two clients sharing an in-process channel under a manual clock.
async fn run_demo(config: ArenaConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Round ===");

    let channel = Arc::new(InMemoryChannel::new());
    let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));

    let mut clients = Vec::new();
    for name in ["ada", "bo"] {
        let identities = StaticIdentityProvider::random(name);
        let ticket = join_or_create(channel.as_ref(), &identities, clock.as_ref(), &config).await?;
        info!("{} joined room {} in slot {}", name, ticket.room_id.short(), ticket.player.seat);
        clients.push(ArenaClient::new(channel.clone(), clock.clone(), ticket, config.clone()));
    }

    let dt = config.tick_interval_ms();
    // Lobby countdown, then at most four minutes of play
    let max_ticks = (config.lobby_countdown_ms + 240_000) / dt;
    let mut total_events = 0usize;

    for tick in 0..max_ticks {
        clock.advance(dt);

        for (slot, client) in clients.iter_mut().enumerate() {
            let result = client.step(&scripted_input(tick, slot as u64));
            total_events += result.events.len();
            result.events.iter().for_each(log_event);
        }

        // Let the detached publishes land, then fold in what the others wrote
        tokio::task::yield_now().await;
        if tick % 4 == 0 {
            for client in clients.iter_mut() {
                let seen = client.resync().await?;
                total_events += seen.len();
            }
        }

        if clients.iter().all(|c| c.room().status == RoomStatus::Ended) {
            info!("Round ended after {} ticks", tick);
            break;
        }
    }

    for client in clients.iter_mut() {
        client.resync().await?;
    }

    info!("=== Round Results ===");
    for client in &clients {
        let room = client.room();
        info!(
            "{} sees status {:?}, winner {:?}, digest {}",
            client.local_player().short(),
            room.status,
            room.winner_id.map(|id| id.short()),
            short_hex(&room.digest())
        );
        for player in room.players.values() {
            info!("  {} lives {} score {}", player.name, player.lives, player.score);
        }
    }
    info!("Total events: {}", total_events);

    Ok(())
}
