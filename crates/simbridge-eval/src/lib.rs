//! Episode recording and safety scoring.
//!
//! An [`EpisodeLog`] collects one [`TelemetryFrame`](simbridge_frame::TelemetryFrame)
//! and one [`Action`] per tick. At the end of an episode a
//! [`SafetyEvaluator`] replays the log through oriented-rectangle hit and
//! near-miss tests and reports [`EpisodeMetrics`].

pub mod episode;
pub mod error;
pub mod evaluate;
pub mod geometry;

pub use episode::{Action, EpisodeLog, Maneuver, MIN_EPISODE_STATES};
pub use error::{EvalError, Result};
pub use evaluate::{EpisodeMetrics, EvalConfig, SafetyEvaluator};
pub use geometry::{is_hit, is_in_front, is_near_miss, ped_in_area};
