//! Bubble Duel demo binary.
//!
//! Runs an offline deterministic duel: two engines sharing a derived
//! seed, scripted inputs, cross-fed attack credit, per-frame checksum
//! agreement. Then replays one side from the same script to verify
//! determinism, and round-trips a suspend snapshot.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bubble_duel::core::checksum::derive_game_seed;
use bubble_duel::game::events::GameEvent;
use bubble_duel::game::level::DEFAULT_LAYOUT;
use bubble_duel::game::tick::{tick, GameInput};
use bubble_duel::{GameConfig, GamePhase, GameState, FRAME_RATE, VERSION};

/// Frames to simulate before calling the demo a draw.
const DEMO_FRAMES: u32 = 3000;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Bubble Duel v{VERSION}");
    info!("Frame rate: {FRAME_RATE} Hz");

    let seed = derive_game_seed(7, &[1, 2]);
    info!("Derived seed: {seed:#018x}");

    let final_checksum = demo_duel(seed)?;
    verify_replay(seed, final_checksum)?;
    Ok(())
}

/// Scripted intent for one player on one frame. Player 2 runs the same
/// script phase-shifted, so the duel stays asymmetric but reproducible.
fn scripted_input(frame: u32, player: u32) -> GameInput {
    let t = frame + player * 13;
    GameInput {
        aim_delta: match t % 50 {
            0..=9 => 0.4,
            25..=34 => -0.4,
            _ => 0.0,
        },
        fire: t % 37 == 0,
        swap: t % 149 == 0,
        ..Default::default()
    }
}

fn demo_duel(seed: u64) -> anyhow::Result<u16> {
    info!("=== Offline duel ===");

    let config = GameConfig::default();
    let mut p1 = GameState::new(seed, &DEFAULT_LAYOUT).context("player 1 field")?;
    let mut p2 = GameState::new(seed.rotate_left(17), &DEFAULT_LAYOUT).context("player 2 field")?;

    let mut total_events = 0usize;
    for frame in 0..DEMO_FRAMES {
        let r1 = tick(&mut p1, &scripted_input(frame, 1), &config);
        let r2 = tick(&mut p2, &scripted_input(frame, 2), &config);

        // Popped clusters arm the opponent's attack bar.
        if r1.attack_credit() > 0 {
            p2.attack.add(r1.attack_credit());
        }
        if r2.attack_credit() > 0 {
            p1.attack.add(r2.attack_credit());
        }

        total_events += r1.events.len() + r2.events.len();
        for (who, result) in [(1, &r1), (2, &r2)] {
            for event in &result.events {
                match event {
                    GameEvent::ClusterPopped {
                        size,
                        attack_credit,
                    } => {
                        info!("frame {frame}: player {who} popped {size} (credit {attack_credit})")
                    }
                    GameEvent::GridShifted => {
                        info!("frame {frame}: player {who} field shifted down")
                    }
                    GameEvent::VolleyReleased { lanes } => {
                        let count = lanes.iter().filter(|&&l| l >= 0).count();
                        info!("frame {frame}: {count} attack bubbles rising at player {who}");
                    }
                    GameEvent::Won => info!("frame {frame}: player {who} cleared the field"),
                    GameEvent::Lost => info!("frame {frame}: player {who} lost"),
                    GameEvent::TrackingLost => {
                        warn!("frame {frame}: player {who} tracking lost, would resync")
                    }
                    _ => {}
                }
            }
        }

        if p1.phase != GamePhase::Playing || p2.phase != GamePhase::Playing {
            info!("duel decided after {frame} frames");
            break;
        }
    }

    info!("=== Results ===");
    info!(
        "player 1: {:?}, checksum {:04x}",
        p1.phase,
        p1.checksum()
    );
    info!(
        "player 2: {:?}, checksum {:04x}",
        p2.phase,
        p2.checksum()
    );
    info!("total events: {total_events}");

    // Suspend round-trip, the same path a paused game takes.
    let snapshot = p1.to_snapshot_bytes().context("suspend snapshot")?;
    let restored = GameState::from_snapshot_bytes(&snapshot).context("resume snapshot")?;
    anyhow::ensure!(
        restored.checksum() == p1.checksum(),
        "snapshot round-trip changed the field"
    );
    info!(
        "suspend snapshot: {} bytes ({}…), restores cleanly",
        snapshot.len(),
        hex::encode(&snapshot[..snapshot.len().min(8)])
    );

    let json = serde_json::to_string(&p1).context("json dump")?;
    info!("json dump of player 1 field: {} bytes", json.len());

    Ok(p1.checksum())
}

fn verify_replay(seed: u64, expected: u16) -> anyhow::Result<()> {
    info!("=== Verifying determinism ===");

    let config = GameConfig::default();
    let mut replay = GameState::new(seed, &DEFAULT_LAYOUT).context("replay field")?;

    // Attack credit in the live run came from the opponent; replaying
    // without it only matches if the opponent never landed any, so feed
    // the same cross-credit by rerunning both sides.
    let mut other = GameState::new(seed.rotate_left(17), &DEFAULT_LAYOUT)?;
    for frame in 0..DEMO_FRAMES {
        let r1 = tick(&mut replay, &scripted_input(frame, 1), &config);
        let r2 = tick(&mut other, &scripted_input(frame, 2), &config);
        if r1.attack_credit() > 0 {
            other.attack.add(r1.attack_credit());
        }
        if r2.attack_credit() > 0 {
            replay.attack.add(r2.attack_credit());
        }
        if replay.phase != GamePhase::Playing || other.phase != GamePhase::Playing {
            break;
        }
    }

    let replayed = replay.checksum();
    if replayed == expected {
        info!("determinism verified: checksum {replayed:04x} matches");
        Ok(())
    } else {
        anyhow::bail!("determinism failure: {replayed:04x} != {expected:04x}");
    }
}
