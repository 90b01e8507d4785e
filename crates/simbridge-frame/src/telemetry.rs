use serde::{Deserialize, Serialize};

/// A pedestrian in grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pedestrian {
    pub x: f64,
    pub z: f64,
    pub speed: f64,
}

/// A static obstacle in grid coordinates; heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f64,
    pub z: f64,
    pub heading: f64,
}

/// One decoded snapshot of the simulated world.
///
/// Positions are grid units (see [`MapGeometry`](crate::MapGeometry)); the
/// orientation is radians in `[0, 2π)` after the +90° convention shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub orientation: f64,
    pub x: f64,
    pub z: f64,
    pub speed: f64,
    pub crossing: bool,
    /// Ordered by the simulator's 1-based pedestrian index.
    #[serde(default)]
    pub pedestrians: Vec<Pedestrian>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstacle: Option<Obstacle>,
}

impl TelemetryFrame {
    /// An ego-only frame with no pedestrians or obstacle.
    pub fn ego(x: f64, z: f64, orientation: f64, speed: f64) -> Self {
        Self {
            orientation,
            x,
            z,
            speed,
            crossing: false,
            pedestrians: Vec::new(),
            obstacle: None,
        }
    }

    /// Number of pedestrians present in this frame.
    pub fn pedestrian_count(&self) -> usize {
        self.pedestrians.len()
    }

    pub fn with_pedestrian(mut self, x: f64, z: f64, speed: f64) -> Self {
        self.pedestrians.push(Pedestrian { x, z, speed });
        self
    }

    pub fn with_obstacle(mut self, x: f64, z: f64, heading: f64) -> Self {
        self.obstacle = Some(Obstacle { x, z, heading });
        self
    }

    pub fn with_crossing(mut self, crossing: bool) -> Self {
        self.crossing = crossing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_keep_pedestrian_order() {
        let frame = TelemetryFrame::ego(10.0, 20.0, 0.0, 5.0)
            .with_pedestrian(1.0, 2.0, 0.5)
            .with_pedestrian(3.0, 4.0, 1.5);

        assert_eq!(frame.pedestrian_count(), 2);
        assert_eq!(frame.pedestrians[0].x, 1.0);
        assert_eq!(frame.pedestrians[1].z, 4.0);
    }

    #[test]
    fn serializes_without_absent_obstacle() {
        let frame = TelemetryFrame::ego(1.0, 2.0, 0.0, 0.0);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("obstacle"));

        let back: TelemetryFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
