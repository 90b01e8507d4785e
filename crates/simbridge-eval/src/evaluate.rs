use std::fmt;

use serde::{Deserialize, Serialize};
use simbridge_frame::TelemetryFrame;
use tracing::debug;

use crate::episode::{EpisodeLog, Maneuver};
use crate::error::{EvalError, Result};
use crate::geometry::{is_hit, is_in_front, is_near_miss};

/// Ego speed at or below which proximity is not scored.
pub const MIN_SCORED_SPEED: f64 = 0.5;

/// Vehicle limits the evaluator scores against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Maximum vehicle speed, same units as telemetry speed.
    pub max_speed: f64,
    /// Half-angle (radians) of the cone counted as "in front".
    pub in_front_angle: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_speed: 50.0,
            in_front_angle: std::f64::consts::FRAC_PI_4,
        }
    }
}

/// Aggregated safety and quality metrics for one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crossing_distance: Option<f64>,
    /// Pedestrians hit at least once.
    pub crashes: usize,
    /// Pedestrians passed within the near-miss rectangle at least once.
    pub near_misses: usize,
    pub accelerations: usize,
    /// Sum of |steering| over ticks with an action.
    pub total_angle: f64,
    /// Number of recorded states.
    pub time_taken: usize,
    pub max_impact_speed: f64,
}

impl fmt::Display for EpisodeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        } else if let Some(distance) = self.crossing_distance {
            write!(f, "crossing distance {distance}: ")?;
        }
        write!(
            f,
            "crashes={} near_misses={} accelerations={} total_angle={:.3} time_taken={} max_impact_speed={}",
            self.crashes,
            self.near_misses,
            self.accelerations,
            self.total_angle,
            self.time_taken,
            self.max_impact_speed
        )
    }
}

/// Scores recorded episodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyEvaluator {
    config: EvalConfig,
}

impl SafetyEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Score `log`. Fails with [`EvalError::EmptyEpisode`] when nothing was
    /// recorded and with [`EvalError::Misaligned`] when the histories differ
    /// in length; callers normally gate on
    /// [`EpisodeLog::has_enough_data`] first.
    pub fn evaluate(&self, log: &EpisodeLog) -> Result<EpisodeMetrics> {
        if log.is_empty() {
            return Err(EvalError::EmptyEpisode);
        }
        log.check_aligned()?;

        let mut crashes: Vec<bool> = Vec::new();
        let mut near_misses: Vec<bool> = Vec::new();
        let mut max_impact_speed = 0.0f64;

        for state in &log.states {
            if state.speed <= MIN_SCORED_SPEED {
                continue;
            }
            if crashes.len() < state.pedestrians.len() {
                crashes.resize(state.pedestrians.len(), false);
                near_misses.resize(state.pedestrians.len(), false);
            }

            let mut crashed_this_tick = false;
            for (i, ped) in state.pedestrians.iter().enumerate() {
                if is_hit(state, ped) {
                    crashed_this_tick = true;
                    if !crashes[i] {
                        debug!(pedestrian = i + 1, speed = state.speed, "crash latched");
                    }
                    crashes[i] = true;
                }
                if is_near_miss(state, ped) {
                    near_misses[i] = true;
                }
            }
            if crashed_this_tick {
                max_impact_speed = max_impact_speed.max(state.speed);
            }
        }

        let mut accelerations = 0usize;
        let mut total_angle = 0.0f64;
        for (state, action) in log.ticks() {
            total_angle += action.steering.abs();
            let counted = match action.maneuver {
                Maneuver::Accelerate => state.speed < self.config.max_speed,
                Maneuver::Decelerate => state.speed > 0.0,
                Maneuver::Maintain => false,
            };
            if counted {
                accelerations += 1;
            }
        }

        Ok(EpisodeMetrics {
            label: log.label.clone(),
            crossing_distance: log.crossing_distance,
            crashes: crashes.iter().filter(|c| **c).count(),
            near_misses: near_misses.iter().filter(|n| **n).count(),
            accelerations,
            total_angle,
            time_taken: log.len(),
            max_impact_speed,
        })
    }

    /// Score `log` and clear it for the next episode.
    ///
    /// The log is reset even when scoring fails.
    pub fn finish_episode(&self, log: &mut EpisodeLog) -> Result<EpisodeMetrics> {
        let episode = log.take();
        self.evaluate(&episode)
    }

    /// 1-based indices of pedestrians inside the forward cone.
    pub fn pedestrians_in_front(&self, frame: &TelemetryFrame) -> Vec<usize> {
        frame
            .pedestrians
            .iter()
            .enumerate()
            .filter(|(_, ped)| is_in_front(frame, ped, self.config.in_front_angle))
            .map(|(i, _)| i + 1)
            .collect()
    }
}
