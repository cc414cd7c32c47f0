use thiserror::Error;

/// Failures raised while validating or encoding trial sets.
///
/// Validation happens before any network is evaluated; nothing here is
/// recovered internally.
#[derive(Debug, Error)]
pub enum SetEmbedError {
    /// feature dim, trial-set length, or batch shape disagrees with the
    /// configured `feature_dim` / `max_trials`
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// zero present trials under a mean reduction, a sentinel value in a
    /// present slot, or a mask that does not line up with its trials
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl SetEmbedError {
    pub fn shape(what: &'static str, expected: usize, found: usize) -> Self {
        Self::ShapeMismatch {
            what,
            expected,
            found,
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. })
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<SetEmbedError> for candle_core::Error {
    fn from(err: SetEmbedError) -> Self {
        match err {
            SetEmbedError::Candle(inner) => inner,
            other => candle_core::Error::Msg(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SetEmbedError>;
