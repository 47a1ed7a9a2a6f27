//! Per-job gate progression

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a job is in the gate pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    NotStarted,
    Gate1Checked,
    Gate2Skipped,
    Gate2Ran,
    Gate3Skipped,
    Gate3Ran,
    Done,
}

impl JobStage {
    /// Whether `next` may directly follow `self`
    pub fn can_advance_to(self, next: JobStage) -> bool {
        use JobStage::*;
        matches!(
            (self, next),
            (NotStarted, Gate1Checked)
                | (Gate1Checked, Gate2Skipped)
                | (Gate1Checked, Gate2Ran)
                | (Gate2Skipped, Gate3Skipped)
                | (Gate2Ran, Gate3Skipped)
                | (Gate2Ran, Gate3Ran)
                | (Gate3Skipped, Done)
                | (Gate3Ran, Done)
        )
    }

    /// Move to `next`, rejecting transitions the pipeline never makes
    pub fn advance(&mut self, next: JobStage) -> Result<()> {
        if !self.can_advance_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self, to = %next, "job stage transition");
        *self = next;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        self == JobStage::Done
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::NotStarted => write!(f, "not_started"),
            JobStage::Gate1Checked => write!(f, "gate1_checked"),
            JobStage::Gate2Skipped => write!(f, "gate2_skipped"),
            JobStage::Gate2Ran => write!(f, "gate2_ran"),
            JobStage::Gate3Skipped => write!(f, "gate3_skipped"),
            JobStage::Gate3Ran => write!(f, "gate3_ran"),
            JobStage::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_live_path() {
        let mut stage = JobStage::default();
        for next in [
            JobStage::Gate1Checked,
            JobStage::Gate2Ran,
            JobStage::Gate3Ran,
            JobStage::Done,
        ] {
            stage.advance(next).unwrap();
        }
        assert!(stage.is_terminal());
    }

    #[test]
    fn test_skipped_gate2_cannot_run_gate3() {
        let mut stage = JobStage::Gate2Skipped;
        assert!(!stage.can_advance_to(JobStage::Gate3Ran));
        stage.advance(JobStage::Gate3Skipped).unwrap();
        stage.advance(JobStage::Done).unwrap();
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut stage = JobStage::NotStarted;
        let err = stage.advance(JobStage::Gate3Ran).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition: not_started -> gate3_ran"
        );
        assert_eq!(stage, JobStage::NotStarted);
    }
}
