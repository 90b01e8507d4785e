//! `SetVehicleControl` payloads.
//!
//! The payload is either a drive command (`id;steering;throttle;brake[;targetSpeed]`)
//! or one of the fixed scene-control tokens.

use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

const RESET_CAR: &str = "RESET_CAR";
const RESET_SCENE: &str = "RESET_SCENE";
const NEXT_SCENE: &str = "NEXT_SCENE";
const NEXT_SCENARIO: &str = "NEXT_SCENARIO";
const PAUSE: &str = "PAUSE";
const UNPAUSE: &str = "UNPAUSE";

/// Scene-control tokens understood by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ResetCar,
    ResetScene,
    NextScene,
    /// Jump to scenario `id`.
    NextScenario(u32),
    Pause,
    Unpause,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ResetCar => f.write_str(RESET_CAR),
            Command::ResetScene => f.write_str(RESET_SCENE),
            Command::NextScene => f.write_str(NEXT_SCENE),
            Command::NextScenario(id) => write!(f, "{NEXT_SCENARIO} {id}"),
            Command::Pause => f.write_str(PAUSE),
            Command::Unpause => f.write_str(UNPAUSE),
        }
    }
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::InvalidField {
            field: "command",
            value: s.to_string(),
        };

        match s.trim() {
            RESET_CAR => Ok(Command::ResetCar),
            RESET_SCENE => Ok(Command::ResetScene),
            NEXT_SCENE => Ok(Command::NextScene),
            PAUSE => Ok(Command::Pause),
            UNPAUSE => Ok(Command::Unpause),
            other => {
                let id = other
                    .strip_prefix(NEXT_SCENARIO)
                    .and_then(|rest| rest.strip_prefix(' '))
                    .ok_or_else(invalid)?;
                id.trim().parse().map(Command::NextScenario).map_err(|_| invalid())
            }
        }
    }
}

/// A drive command for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub vehicle_id: String,
    pub steering: f64,
    pub throttle: f64,
    pub brake: f64,
    /// Appended to the payload only when set.
    pub target_speed: Option<f64>,
}

impl ControlCommand {
    pub fn new(vehicle_id: impl Into<String>, steering: f64, throttle: f64, brake: f64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            steering,
            throttle,
            brake,
            target_speed: None,
        }
    }

    pub fn with_target_speed(mut self, target_speed: f64) -> Self {
        self.target_speed = Some(target_speed);
        self
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.vehicle_id, self.steering, self.throttle, self.brake
        )?;
        if let Some(target) = self.target_speed {
            write!(f, ";{target}")?;
        }
        Ok(())
    }
}

impl FromStr for ControlCommand {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(';').collect();
        if !(4..=5).contains(&fields.len()) || fields[0].is_empty() {
            return Err(DecodeError::InvalidField {
                field: "control",
                value: s.to_string(),
            });
        }

        let number = |field: &'static str, value: &str| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| DecodeError::InvalidNumber {
                    field,
                    value: value.to_string(),
                })
        };

        Ok(Self {
            vehicle_id: fields[0].to_string(),
            steering: number("steering", fields[1])?,
            throttle: number("throttle", fields[2])?,
            brake: number("brake", fields[3])?,
            target_speed: fields
                .get(4)
                .map(|v| number("targetSpeed", *v))
                .transpose()?,
        })
    }
}

/// Any `SetVehicleControl` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleControl {
    Drive(ControlCommand),
    Command(Command),
}

impl fmt::Display for VehicleControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleControl::Drive(control) => fmt::Display::fmt(control, f),
            VehicleControl::Command(command) => fmt::Display::fmt(command, f),
        }
    }
}

impl FromStr for VehicleControl {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(';') {
            s.parse().map(VehicleControl::Drive)
        } else {
            s.parse().map(VehicleControl::Command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_token_layout() {
        assert_eq!(Command::ResetCar.to_string(), "RESET_CAR");
        assert_eq!(Command::ResetScene.to_string(), "RESET_SCENE");
        assert_eq!(Command::NextScene.to_string(), "NEXT_SCENE");
        assert_eq!(Command::Pause.to_string(), "PAUSE");
        assert_eq!(Command::Unpause.to_string(), "UNPAUSE");
        assert_eq!(Command::NextScenario(7).to_string(), "NEXT_SCENARIO 7");
    }

    #[test]
    fn command_tokens_round_trip() {
        for command in [
            Command::ResetCar,
            Command::ResetScene,
            Command::NextScene,
            Command::NextScenario(12),
            Command::Pause,
            Command::Unpause,
        ] {
            assert_eq!(command.to_string().parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!("STOP".parse::<Command>().is_err());
        assert!("NEXT_SCENARIO".parse::<Command>().is_err());
        assert!("NEXT_SCENARIO x".parse::<Command>().is_err());
        assert!("NEXT_SCENARIOS 3".parse::<Command>().is_err());
    }

    #[test]
    fn control_without_target_speed() {
        let control = ControlCommand::new("ego", -0.25, 1.0, 0.0);
        assert_eq!(control.to_string(), "ego;-0.25;1;0");
    }

    #[test]
    fn control_with_target_speed() {
        let control = ControlCommand::new("ego", 0.5, 0.0, 1.0).with_target_speed(12.5);
        assert_eq!(control.to_string(), "ego;0.5;0;1;12.5");
        assert_eq!(control.to_string().parse::<ControlCommand>().unwrap(), control);
    }

    #[test]
    fn control_field_count_is_checked() {
        assert!("ego;1;2".parse::<ControlCommand>().is_err());
        assert!("ego;1;2;3;4;5".parse::<ControlCommand>().is_err());
        assert!(";1;2;3".parse::<ControlCommand>().is_err());
        assert!(matches!(
            "ego;left;0;0".parse::<ControlCommand>(),
            Err(DecodeError::InvalidNumber { field: "steering", .. })
        ));
    }

    #[test]
    fn vehicle_control_dispatches_on_shape() {
        assert_eq!(
            "PAUSE".parse::<VehicleControl>().unwrap(),
            VehicleControl::Command(Command::Pause)
        );
        assert!(matches!(
            "car;0;1;0".parse::<VehicleControl>().unwrap(),
            VehicleControl::Drive(_)
        ));
    }
}
