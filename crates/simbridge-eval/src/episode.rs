use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use simbridge_frame::{ControlCommand, TelemetryFrame};

use crate::error::{EvalError, Result};

/// Longitudinal maneuver chosen by the agent for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Maneuver {
    Accelerate,
    Maintain,
    Decelerate,
}

impl fmt::Display for Maneuver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Maneuver::Accelerate => "ACCELERATE",
            Maneuver::Maintain => "MAINTAIN",
            Maneuver::Decelerate => "DECELERATE",
        })
    }
}

impl FromStr for Maneuver {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCELERATE" => Ok(Maneuver::Accelerate),
            "MAINTAIN" => Ok(Maneuver::Maintain),
            "DECELERATE" => Ok(Maneuver::Decelerate),
            other => Err(format!("unknown maneuver {other:?}")),
        }
    }
}

/// One agent decision: steering in radians plus a maneuver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub steering: f64,
    pub maneuver: Maneuver,
}

impl Action {
    pub fn new(steering: f64, maneuver: Maneuver) -> Self {
        Self { steering, maneuver }
    }

    /// Drive command for this action: full throttle to accelerate, full brake
    /// to decelerate, coast otherwise.
    pub fn to_control(&self, vehicle_id: &str, target_speed: Option<f64>) -> ControlCommand {
        let (throttle, brake) = match self.maneuver {
            Maneuver::Accelerate => (1.0, 0.0),
            Maneuver::Maintain => (0.0, 0.0),
            Maneuver::Decelerate => (0.0, 1.0),
        };
        let mut control = ControlCommand::new(vehicle_id, self.steering, throttle, brake);
        control.target_speed = target_speed;
        control
    }
}

/// Minimum number of states before an episode is worth scoring.
pub const MIN_EPISODE_STATES: usize = 10;

/// Index-aligned state and action history for one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLog {
    #[serde(default)]
    pub states: Vec<TelemetryFrame>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossing_distance: Option<f64>,
}

impl EpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_crossing_distance(mut self, distance: f64) -> Self {
        self.crossing_distance = Some(distance);
        self
    }

    /// Append one tick.
    pub fn record(&mut self, state: TelemetryFrame, action: Action) {
        self.states.push(state);
        self.actions.push(action);
    }

    /// Clear both histories. Label and annotation are kept.
    pub fn reset(&mut self) {
        self.states.clear();
        self.actions.clear();
    }

    /// Move the recorded episode out, leaving an empty log with the same label.
    pub fn take(&mut self) -> EpisodeLog {
        let taken = EpisodeLog {
            states: std::mem::take(&mut self.states),
            actions: std::mem::take(&mut self.actions),
            label: self.label.clone(),
            crossing_distance: self.crossing_distance,
        };
        self.reset();
        taken
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// More than [`MIN_EPISODE_STATES`] states recorded.
    pub fn has_enough_data(&self) -> bool {
        self.states.len() > MIN_EPISODE_STATES
    }

    /// `(state, action)` pairs in tick order.
    pub fn ticks(&self) -> impl Iterator<Item = (&TelemetryFrame, &Action)> {
        self.states.iter().zip(self.actions.iter())
    }

    /// Fails unless every state has exactly one action.
    pub fn check_aligned(&self) -> Result<()> {
        if self.states.len() != self.actions.len() {
            return Err(EvalError::Misaligned {
                states: self.states.len(),
                actions: self.actions.len(),
            });
        }
        Ok(())
    }

    /// Read a saved episode; logs whose histories differ in length are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let log: EpisodeLog = serde_json::from_str(&raw)?;
        log.check_aligned()?;
        Ok(log)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
