/// Errors raised while recording or scoring an episode.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// `evaluate` was called on a log with no recorded states.
    #[error("episode has no recorded states")]
    EmptyEpisode,

    /// The state and action histories have different lengths.
    #[error("episode has {states} states but {actions} actions")]
    Misaligned { states: usize, actions: usize },

    /// An episode file did not parse.
    #[error("episode json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An episode file could not be read or written.
    #[error("episode i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
