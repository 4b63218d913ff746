use thiserror::Error;

/// Errors raised while building joint graphs or propagating labels
///
/// `Alignment` and `Matching` failures of one sample pair are recovered
/// inside graph construction; everything else is returned to the caller.
#[derive(Debug, Error)]
pub enum JointError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("duplicate cell id `{cell}` (samples `{first}` and `{second}`)")]
    DuplicateCellId {
        cell: Box<str>,
        first: Box<str>,
        second: Box<str>,
    },

    #[error("alignment of `{sample_a}` and `{sample_b}` failed: {reason}")]
    Alignment {
        sample_a: Box<str>,
        sample_b: Box<str>,
        reason: String,
    },

    #[error("no {method} pairs between `{sample_a}` and `{sample_b}`")]
    Matching {
        sample_a: Box<str>,
        sample_b: Box<str>,
        method: &'static str,
    },

    #[error("graph assembly failed: {0}")]
    GraphAssembly(String),

    #[error("label propagation failed: {0}")]
    Propagation(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("numerical routine failed: {0}")]
    Numeric(#[from] anyhow::Error),
}

impl JointError {
    pub fn input(msg: impl Into<String>) -> Self {
        JointError::Input(msg.into())
    }

    pub fn alignment(sample_a: &str, sample_b: &str, reason: impl Into<String>) -> Self {
        JointError::Alignment {
            sample_a: sample_a.into(),
            sample_b: sample_b.into(),
            reason: reason.into(),
        }
    }

    /// Per-pair failures that graph construction skips over
    pub fn is_pair_local(&self) -> bool {
        matches!(
            self,
            JointError::Alignment { .. }
                | JointError::Matching { .. }
                | JointError::Cancelled(_)
                | JointError::Numeric(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, JointError>;
