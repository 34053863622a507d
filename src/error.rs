use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The captured facts contradict each other. `core` is the minimal
    /// inconsistent subset found by diagnosis, one printed clause per entry.
    #[error("captured constraints are inconsistent, minimal core:\n{}", .core.join("\n"))]
    Inconsistent { core: Vec<String> },

    #[error("solver answered unknown for {clause}")]
    SolverFault { clause: String },

    #[error("another solver instance is still alive")]
    SolverBusy,

    #[error("operand widths differ: {lhs} vs {rhs}")]
    WidthMismatch { lhs: u32, rhs: u32 },

    #[error("unexpected model value `{0}`")]
    UnexpectedModel(String),

    #[error("solver process: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
