//! Offline replay of a recorded frame stream.
//!
//! Input is JSON Lines, one `KeypointFrame` per line, with monotonic
//! capture timestamps. The pipeline runs against an in-memory store so a
//! replay never touches the live session history; every event is printed
//! as a JSON line.

use std::io::{BufRead, BufReader};

use clap::Args;
use deskwarden_core::{KeypointFrame, MemoryStore, Monitor, MonitorConfig, NullSink};

#[derive(Args)]
pub struct ReplayArgs {
    /// JSONL file of keypoint frames
    pub file: std::path::PathBuf,
}

pub fn run(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = MonitorConfig::load_or_default();
    let mut monitor = Monitor::new(config, Box::new(MemoryStore::new()), Box::new(NullSink));

    let reader = BufReader::new(std::fs::File::open(&args.file)?);
    let mut last_at = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: KeypointFrame = serde_json::from_str(&line)?;
        last_at = Some(frame.captured_at);
        for event in monitor.process_frame(&frame) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    if let Some(at) = last_at {
        for event in monitor.shutdown(at) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}
