//! Error classification for simulation failures.
//!
//! Separates protocol bugs from outcomes the simulated link or the operator
//! can legitimately cause, so fuzzing campaigns only stop on what needs
//! investigation.

use linaps::ApsError;

use crate::{DivergenceCause, SimConfig, SimError};

/// Classification of simulation errors for better debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Explained by PDUs lost on the simulated link.
    LinkInduced,
    /// Explained by a command the operator left in place.
    OperatorInduced,
    /// Likely implementation bug that needs investigation.
    ImplementationBug,
    /// Ambiguous; needs manual review.
    RequiresReview,
}

/// Verdict on one failed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub reason: &'static str,
}

impl ErrorAnalysis {
    const fn new(category: ErrorCategory, confidence: f32, reason: &'static str) -> Self {
        Self {
            category,
            confidence,
            reason,
        }
    }

    /// Whether the failure belongs in the failure log.
    pub fn should_log(&self) -> bool {
        !self.is_tolerated()
    }

    /// Link loss and operator commands are expected to leave the ends
    /// apart now and then.
    pub fn is_tolerated(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::LinkInduced | ErrorCategory::OperatorInduced
        )
    }

    /// An implementation bug reported with more than 80% confidence.
    pub fn is_confident_bug(&self) -> bool {
        self.category == ErrorCategory::ImplementationBug && self.confidence > 0.8
    }
}

/// Classifies simulation errors as link-induced or implementation issues.
pub struct ErrorAnalyzer;

impl ErrorAnalyzer {
    /// Analyzes a simulation error in the context of its configuration.
    pub fn analyze_error(error: &SimError, config: &SimConfig) -> ErrorAnalysis {
        use ErrorCategory::*;

        match error {
            SimError::Setup { .. } => ErrorAnalysis::new(
                ImplementationBug,
                0.9,
                "generated configuration was rejected at activation",
            ),
            SimError::Engine { error, .. } => Self::analyze_engine_error(error),
            SimError::InvariantViolation { .. } => ErrorAnalysis::new(
                ImplementationBug,
                1.0,
                "per-end invariant broken; these hold whatever the far end sends",
            ),
            SimError::Divergence { cause, .. } => match cause {
                DivergenceCause::Freeze => ErrorAnalysis::new(
                    OperatorInduced,
                    1.0,
                    "a frozen end does not follow its peer",
                ),
                DivergenceCause::ManualSwitchConflict => ErrorAnalysis::new(
                    OperatorInduced,
                    1.0,
                    "manual switches of equal priority in opposite directions",
                ),
                DivergenceCause::Unexplained if config.pdu_loss_probability > 0.0 => {
                    ErrorAnalysis::new(LinkInduced, 0.7, "ends disagree while PDUs are being lost")
                }
                DivergenceCause::Unexplained => ErrorAnalysis::new(
                    ImplementationBug,
                    0.9,
                    "ends disagree on a lossless link with no command to explain it",
                ),
            },
        }
    }

    fn analyze_engine_error(error: &ApsError) -> ErrorAnalysis {
        use ErrorCategory::*;

        match error {
            ApsError::InstanceNotFound(_) | ApsError::NotActive(_) => {
                ErrorAnalysis::new(ImplementationBug, 1.0, "instance lost or deactivated mid-run")
            }
            ApsError::Building(_) | ApsError::Internal(_) => {
                ErrorAnalysis::new(ImplementationBug, 0.95, "PDU generation or internal failure")
            }
            ApsError::Platform(_) => ErrorAnalysis::new(
                RequiresReview,
                0.6,
                "recording platform refused an operation",
            ),
            _ => ErrorAnalysis::new(
                RequiresReview,
                0.5,
                "unexpected engine error needs manual classification",
            ),
        }
    }

    /// Tallies a batch of verdicts.
    pub fn summarize_errors<'a>(analyses: impl IntoIterator<Item = &'a ErrorAnalysis>) -> ErrorSummary {
        let mut summary = ErrorSummary::default();
        for analysis in analyses {
            summary.record(analysis);
        }
        summary
    }
}

/// Running tally of verdicts over a fuzzing campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSummary {
    pub link_induced: usize,
    pub operator_induced: usize,
    pub implementation_bugs: usize,
    pub requires_review: usize,
    pub confident_bugs: usize,
}

impl ErrorSummary {
    /// Adds one verdict.
    pub fn record(&mut self, analysis: &ErrorAnalysis) {
        match analysis.category {
            ErrorCategory::LinkInduced => self.link_induced += 1,
            ErrorCategory::OperatorInduced => self.operator_induced += 1,
            ErrorCategory::ImplementationBug => self.implementation_bugs += 1,
            ErrorCategory::RequiresReview => self.requires_review += 1,
        }
        if analysis.is_confident_bug() {
            self.confident_bugs += 1;
        }
    }

    /// Merges another tally into this one.
    pub fn merge(mut self, other: ErrorSummary) -> ErrorSummary {
        self.link_induced += other.link_induced;
        self.operator_induced += other.operator_induced;
        self.implementation_bugs += other.implementation_bugs;
        self.requires_review += other.requires_review;
        self.confident_bugs += other.confident_bugs;
        self
    }

    pub fn total(&self) -> usize {
        self.link_induced + self.operator_induced + self.implementation_bugs + self.requires_review
    }

    /// Failures that neither PDU loss nor an operator command explains.
    pub fn critical(&self) -> usize {
        self.implementation_bugs + self.requires_review
    }

    pub fn bug_rate(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.implementation_bugs as f32 / total as f32,
        }
    }
}
