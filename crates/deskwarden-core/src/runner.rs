//! Async runner for the evaluation pipeline.
//!
//! The [`Monitor`] itself is caller-ticked and single-threaded. This module
//! owns one on a tokio task and serializes everything onto it: incoming
//! frames, a once-per-second coarse tick (so escalation and presence
//! deadlines progress even when no frame arrives), and control inputs from
//! the UI side channel. There is no shared mutable state; serialization is
//! by message passing.

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::events::Event;
use crate::keypoint::KeypointFrame;
use crate::pipeline::Monitor;
use crate::session::FeedbackResponse;
use crate::storage::MonitorConfig;

/// Control inputs accepted by the runner.
#[derive(Debug)]
pub enum Command {
    Frame(Box<KeypointFrame>),
    RespondPresent,
    Feedback {
        event_id: Uuid,
        response: FeedbackResponse,
    },
    SetEnabled(bool),
    DisableForMinutes(u32),
    SetAcPower(bool),
    UpdateConfig(Box<MonitorConfig>),
    Shutdown,
}

/// Handle for feeding the running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
}

impl MonitorHandle {
    pub async fn send_frame(&self, frame: KeypointFrame) {
        let _ = self.commands.send(Command::Frame(Box::new(frame))).await;
    }

    pub async fn respond_present(&self) {
        let _ = self.commands.send(Command::RespondPresent).await;
    }

    pub async fn feedback(&self, event_id: Uuid, response: FeedbackResponse) {
        let _ = self
            .commands
            .send(Command::Feedback { event_id, response })
            .await;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled)).await;
    }

    pub async fn disable_for_minutes(&self, minutes: u32) {
        let _ = self
            .commands
            .send(Command::DisableForMinutes(minutes))
            .await;
    }

    pub async fn set_ac_power(&self, on_ac_power: bool) {
        let _ = self.commands.send(Command::SetAcPower(on_ac_power)).await;
    }

    pub async fn update_config(&self, config: MonitorConfig) {
        let _ = self
            .commands
            .send(Command::UpdateConfig(Box::new(config)))
            .await;
    }

    /// Stop the runner, closing the open session. The task exits after the
    /// shutdown events are forwarded.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Spawn the runner. Returns the control handle, the event stream and the
/// task handle (which resolves when the runner shuts down).
pub fn spawn(
    mut monitor: Monitor,
) -> (
    MonitorHandle,
    mpsc::UnboundedReceiver<Event>,
    JoinHandle<()>,
) {
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(64);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let events = tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        let events = monitor.shutdown(Utc::now());
                        for event in events {
                            let _ = event_tx.send(event);
                        }
                        debug!("monitor runner stopped");
                        return;
                    }
                    Some(Command::Frame(frame)) => monitor.process_frame(&frame),
                    Some(Command::RespondPresent) => monitor.respond_present(Utc::now()),
                    Some(Command::Feedback { event_id, response }) => {
                        monitor.record_feedback(event_id, response, Utc::now());
                        Vec::new()
                    }
                    Some(Command::SetEnabled(enabled)) => {
                        monitor.set_enabled(enabled);
                        Vec::new()
                    }
                    Some(Command::DisableForMinutes(minutes)) => {
                        monitor.disable_for_minutes(minutes, Utc::now());
                        Vec::new()
                    }
                    Some(Command::SetAcPower(on_ac)) => {
                        monitor.set_on_ac_power(on_ac);
                        Vec::new()
                    }
                    Some(Command::UpdateConfig(config)) => {
                        if let Err(e) = monitor.update_config(*config) {
                            tracing::warn!(error = %e, "rejected configuration update");
                        }
                        Vec::new()
                    }
                },
                _ = tick.tick() => monitor.tick(Utc::now()),
            };
            for event in events {
                let _ = event_tx.send(event);
            }
        }
    });

    (
        MonitorHandle {
            commands: command_tx,
        },
        event_rx,
        task,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoint::{Keypoint, Landmark};
    use crate::pipeline::NullSink;
    use crate::storage::{MemoryStore, WorkHours};

    fn always_on_config() -> MonitorConfig {
        MonitorConfig {
            work_hours: WorkHours {
                start_hour: 0,
                end_hour: 0,
            },
            ..MonitorConfig::default()
        }
    }

    fn good_frame() -> KeypointFrame {
        let kp = |x, y| Keypoint {
            x,
            y,
            confidence: 0.95,
        };
        KeypointFrame::new(Utc::now(), 640, 480)
            .with_point(Landmark::Nose, kp(320.0, 100.0))
            .with_point(Landmark::LeftEar, kp(290.0, 120.0))
            .with_point(Landmark::RightEar, kp(350.0, 120.0))
            .with_point(Landmark::LeftShoulder, kp(250.0, 200.0))
            .with_point(Landmark::RightShoulder, kp(390.0, 200.0))
            .with_point(Landmark::LeftHip, kp(270.0, 360.0))
            .with_point(Landmark::RightHip, kp(370.0, 360.0))
    }

    #[tokio::test]
    async fn frames_flow_through_and_shutdown_closes_session() {
        let monitor = Monitor::new(
            always_on_config(),
            Box::new(MemoryStore::new()),
            Box::new(NullSink),
        );
        let (handle, mut events, task) = spawn(monitor);

        handle.send_frame(good_frame()).await;
        handle.shutdown().await;
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen
            .iter()
            .any(|e| matches!(e, Event::SessionStarted { .. })));
        assert!(seen
            .iter()
            .any(|e| matches!(e, Event::SessionClosed { .. })));
    }
}
