use thiserror::Error;

/// Boxed error produced by an injected collaborator (kinematics, dynamics,
/// solver). Carried through unchanged.
pub type ExternalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for clankers-core.
#[derive(Debug, Error)]
pub enum ClankersError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error(transparent)]
    Solver(ExternalError),
}

impl From<ScheduleCoverageError> for ClankersError {
    fn from(err: ScheduleCoverageError) -> Self {
        Self::Evaluation(EvalError::Coverage(err))
    }
}

/// Configuration errors. Fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Contact count mismatch: expected {expected}, got {got}")]
    ContactCountMismatch { expected: usize, got: usize },

    #[error("Dimension mismatch for {name}: expected {expected}, got {got}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Matrix {name} is not square ({rows}x{cols})")]
    NotSquare {
        name: String,
        rows: usize,
        cols: usize,
    },

    #[error("Matrix {name} is not positive definite (min eigenvalue {min_eigenvalue})")]
    NotPositiveDefinite { name: String, min_eigenvalue: f64 },

    #[error("Invalid gait schedule: {0}")]
    InvalidSchedule(String),

    #[error("Unknown contact mode: {0}")]
    UnknownMode(String),

    #[error("Unknown gait: {0}")]
    UnknownGait(String),

    #[error("Duplicate term name: {0}")]
    DuplicateTerm(String),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A queried time fell outside the coverage of the installed schedule.
///
/// Indicates a schedule-construction bug; never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("time {time} is outside schedule coverage [{begin}, {end})")]
pub struct ScheduleCoverageError {
    pub time: f64,
    pub begin: f64,
    pub end: f64,
}

/// Errors raised while evaluating cost or constraint terms.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Schedule coverage: {0}")]
    Coverage(#[from] ScheduleCoverageError),

    #[error("Dimension mismatch for {name}: expected {expected}, got {got}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    External(ExternalError),
}

impl EvalError {
    /// Wrap a collaborator error without reinterpreting it.
    pub fn external(err: impl Into<ExternalError>) -> Self {
        Self::External(err.into())
    }
}
