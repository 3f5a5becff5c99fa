//! Group walk simulator.
//!
//! Runs a scripted group over the in-memory store: the admin's client
//! detects lagging members, one member drifts away from the group,
//! drains their battery, and raises (then cancels) an emergency.
//! Notifications land in the log through `ConsoleNotifier`.
//!
//! Usage:
//!   cargo run -p convoy-cli --bin simulate -- --members 5 --preset hiking

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use tokio::time;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_cli::{DriftRoute, LoopRoute, Route};
use convoy_core::{AlertPolicy, LagPreset, Position, ResolutionPolicy};
use convoy_session::{
    paths, Config, ConsoleNotifier, GroupSession, MemoryStore, RealtimeStore, SessionUser,
};

/// Trailhead coordinates (Sanjay Gandhi National Park).
const TRAILHEAD_LAT: f64 = 19.2147;
const TRAILHEAD_LNG: f64 = 72.9106;

const GROUP_ID: &str = "sim-walk";
const WALK_SPEED_MPS: f64 = 1.4;

#[derive(Parser, Debug)]
#[command(version, about = "Simulate a group walk with a drifting member")]
struct Args {
    /// Number of group members, including the admin and the drifter
    #[arg(long, default_value_t = 4)]
    members: usize,

    /// Lag threshold preset: walking, hiking, cycling or driving.
    /// Falls back to CONVOY_LAG_PRESET / CONVOY_LAG_THRESHOLD_M.
    #[arg(long)]
    preset: Option<String>,

    /// Resolution policy: per_viewer or quorum. Falls back to
    /// CONVOY_RESOLUTION.
    #[arg(long)]
    resolution: Option<String>,

    /// Simulated walk duration in seconds
    #[arg(long, default_value_t = 120)]
    duration_secs: u64,

    /// Position update interval in milliseconds. Falls back to
    /// CONVOY_TICK_MS.
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simulate=info".parse()?)
                .add_directive("convoy_session=info".parse()?),
        )
        .init();

    let args = Args::parse();
    if args.members < 2 {
        anyhow::bail!("a group needs at least 2 members");
    }

    let env_config = Config::from_env();
    let lag_threshold_m = match &args.preset {
        Some(preset) => preset.parse::<LagPreset>()?.threshold_m(),
        None => env_config.lag_threshold_m,
    };
    let resolution: ResolutionPolicy = match &args.resolution {
        Some(resolution) => resolution.parse()?,
        None => env_config.resolution,
    };
    let tick_ms = args.tick_ms.unwrap_or(env_config.tick_ms);
    let policy = AlertPolicy {
        lag_threshold_m,
        resolution,
        ..AlertPolicy::default()
    };
    let duration = args.duration_secs as f64;

    tracing::info!(
        members = args.members,
        threshold_m = policy.lag_threshold_m,
        ?resolution,
        duration_secs = args.duration_secs,
        "starting group walk"
    );

    let store = Arc::new(MemoryStore::new());

    // Two live clients: the admin runs detection, the drifter only
    // publishes. Everyone in between is scripted through direct writes.
    let admin = Arc::new(GroupSession::new(
        Arc::clone(&store),
        Arc::new(ConsoleNotifier),
        GROUP_ID,
        SessionUser {
            user_id: "admin".to_string(),
            name: "Admin".to_string(),
        },
        policy.clone(),
        true,
        tick_ms,
    ));
    let drifter = Arc::new(GroupSession::new(
        Arc::clone(&store),
        Arc::new(ConsoleNotifier),
        GROUP_ID,
        SessionUser {
            user_id: "drifter".to_string(),
            name: "Drifter".to_string(),
        },
        policy.clone(),
        false,
        tick_ms,
    ));
    admin.start();
    drifter.start();

    let mut rng = rand::rng();
    let admin_route = LoopRoute::new(TRAILHEAD_LAT, TRAILHEAD_LNG, 60.0, WALK_SPEED_MPS, 0.0);
    let pace_routes: Vec<(String, LoopRoute)> = (0..args.members.saturating_sub(2))
        .map(|i| {
            let name = format!("walker-{}", i + 1);
            let route = LoopRoute::new(
                TRAILHEAD_LAT,
                TRAILHEAD_LNG,
                rng.random_range(30.0..90.0),
                WALK_SPEED_MPS,
                rng.random_range(0.0..TAU),
            );
            (name, route)
        })
        .collect();

    // Pick a drift speed that crosses the threshold about a third of the
    // way through the walk, whatever the preset.
    let drift_speed = policy.lag_threshold_m / (duration * 0.35);
    let drift_route = DriftRoute::new(
        TRAILHEAD_LAT,
        TRAILHEAD_LNG,
        rng.random_range(0.0..TAU),
        drift_speed,
    );

    let emergency_on_at = duration * 0.7;
    let emergency_off_at = duration * 0.9;
    let mut emergency_on = false;
    let mut emergency_off = false;

    let start = time::Instant::now();
    let mut ticker = time::interval(Duration::from_millis(tick_ms));

    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();
        if t > duration {
            break;
        }

        let (lat, lng) = admin_route.position_at(t);
        admin.publish_position(lat, lng, 8.0, Some(80.0));

        for (user_id, route) in &pace_routes {
            let (lat, lng) = route.position_at(t);
            let position = Position {
                user_id: user_id.clone(),
                name: Some(user_id.clone()),
                lat,
                lng,
                accuracy_m: 12.0,
                timestamp: Utc::now(),
                battery_pct: Some(65.0),
                emergency: false,
            };
            store.write(
                &paths::member(GROUP_ID, user_id),
                serde_json::to_value(&position)?,
            )?;
        }

        // The drifter's battery drains through the low-battery trigger
        // partway into the walk.
        let battery = (30.0 - t * 15.0 / duration).max(5.0);
        let (lat, lng) = drift_route.position_at(t);
        drifter.publish_position(lat, lng, 12.0, Some(battery));

        if !emergency_on && t >= emergency_on_at {
            emergency_on = true;
            tracing::info!(t, "drifter raises an emergency");
            drifter.set_emergency(true);
        }
        if !emergency_off && t >= emergency_off_at {
            emergency_off = true;
            tracing::info!(t, "drifter cancels the emergency");
            drifter.set_emergency(false);
        }

        // Let the admin see alerts through for a bit, then acknowledge.
        for alert in admin.visible_alerts() {
            if Utc::now() - alert.timestamp > chrono::Duration::seconds(15) {
                tracing::info!(key = %alert.key(), "admin acknowledges");
                admin.acknowledge(&alert.key());
            }
        }
    }

    tracing::info!("walk over, logging out");
    admin.logout();
    drifter.logout();
    Ok(())
}
