//! Live monitoring over a frame stream on stdin.
//!
//! An external pose estimator pipes JSON Lines of `KeypointFrame` into
//! this process. Frames and the coarse escalation tick are serialized onto
//! the monitor by the async runner; events stream to stdout as JSON lines.
//! Lock/wake intents are also logged here, standing in for the OS layer.

use clap::Args;
use deskwarden_core::{
    runner, EffectSink, KeypointFrame, Monitor, MonitorConfig, PresenceState, SqliteStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Treat the device as running on battery
    #[arg(long)]
    pub on_battery: bool,
}

/// Sink that logs side effects in place of a GUI/OS layer.
struct CliSink;

impl EffectSink for CliSink {
    fn on_alert(
        &mut self,
        alert: &deskwarden_core::Alert,
        _metrics: Option<&deskwarden_core::PostureMetrics>,
    ) {
        warn!(level = ?alert.level, "{}", alert.message);
    }
    fn on_presence_change(&mut self, state: &PresenceState) {
        info!(?state, "presence changed");
    }
    fn on_lock_requested(&mut self) {
        warn!("lock requested; deferring to the OS layer");
    }
    fn on_wake_requested(&mut self) {
        info!("wake requested");
    }
    fn on_session_closed(&mut self, summary: &deskwarden_core::SessionSummary) {
        info!(
            good_ratio = summary.good_ratio,
            bad_events = summary.bad_event_count,
            "session closed"
        );
    }
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let config = MonitorConfig::load_or_default();
        let store = SqliteStore::open()?;
        let monitor = Monitor::new(config, Box::new(store), Box::new(CliSink));
        let (handle, mut events, task) = runner::spawn(monitor);

        if args.on_battery {
            handle.set_ac_power(false).await;
        }

        let printer = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<KeypointFrame>(&line) {
                Ok(frame) => handle.send_frame(frame).await,
                Err(e) => warn!(error = %e, "skipping malformed frame"),
            }
        }

        handle.shutdown().await;
        task.await?;
        printer.await?;
        Ok(())
    })
}
