//! Adaptation hook.
//!
//! User feedback on alerts may tune future scheduling, but the learning
//! policy itself lives behind this seam. Strategies only ever see feedback
//! records and only ever return a replacement escalation schedule for
//! future sessions; they cannot touch historical records or in-flight
//! episodes.

use crate::escalation::EscalationSchedule;
use crate::session::FeedbackRecord;

/// Pluggable policy that turns alert feedback into adjusted escalation
/// timings for future sessions.
pub trait AdaptationStrategy: Send {
    /// Called once per recorded feedback. Returning `Some` replaces the
    /// escalation schedule used by future episodes.
    fn on_feedback(&mut self, feedback: &FeedbackRecord) -> Option<EscalationSchedule>;
}

/// Default strategy: record feedback, change nothing.
#[derive(Debug, Default)]
pub struct NoAdaptation;

impl AdaptationStrategy for NoAdaptation {
    fn on_feedback(&mut self, _feedback: &FeedbackRecord) -> Option<EscalationSchedule> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FeedbackResponse;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn no_adaptation_never_adjusts() {
        let mut strategy = NoAdaptation;
        let feedback = FeedbackRecord {
            ts: Utc::now(),
            event_id: Uuid::new_v4(),
            response: FeedbackResponse::NotUseful,
        };
        assert!(strategy.on_feedback(&feedback).is_none());
    }
}
