//! Simulator-to-grid coordinate remapping.
//!
//! The simulator reports positions in world units with the origin on the far
//! side of the map; the planner and the safety evaluator work on a mirrored
//! grid scaled by the map resolution:
//!
//! ```text
//! grid = raw == 0 ? 0 : dimension - raw / resolution
//! ```
//!
//! A raw value of exactly zero means "undefined" and stays zero.

use serde::{Deserialize, Serialize};

/// Map dimensions shared by the codec, the framer bounds check and the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapGeometry {
    /// Grid width (x axis).
    pub width: f64,
    /// Grid height (z axis).
    pub height: f64,
    /// World units per grid cell.
    pub resolution: f64,
}

impl Default for MapGeometry {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 800.0,
            resolution: 1.0,
        }
    }
}

impl MapGeometry {
    pub fn new(width: f64, height: f64, resolution: f64) -> Self {
        Self {
            width,
            height,
            resolution,
        }
    }

    /// Raw simulator x to grid x.
    pub fn grid_x(&self, raw: f64) -> f64 {
        to_grid(raw, self.width, self.resolution)
    }

    /// Raw simulator z to grid z.
    pub fn grid_z(&self, raw: f64) -> f64 {
        to_grid(raw, self.height, self.resolution)
    }

    /// Grid x back to raw simulator x.
    pub fn raw_x(&self, grid: f64) -> f64 {
        to_raw(grid, self.width, self.resolution)
    }

    /// Grid z back to raw simulator z.
    pub fn raw_z(&self, grid: f64) -> f64 {
        to_raw(grid, self.height, self.resolution)
    }

    /// Whether a grid position lies on the map (edges inclusive).
    pub fn contains(&self, x: f64, z: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&z)
    }
}

/// Mirror and scale one raw coordinate.
pub fn to_grid(raw: f64, dimension: f64, resolution: f64) -> f64 {
    if raw == 0.0 {
        return 0.0;
    }
    dimension - raw / resolution
}

/// Inverse of [`to_grid`]; zero stays zero.
pub fn to_raw(grid: f64, dimension: f64, resolution: f64) -> f64 {
    if grid == 0.0 {
        return 0.0;
    }
    (dimension - grid) * resolution
}

/// Simulator heading in degrees to planner orientation in radians, in `[0, 2π)`.
///
/// The simulator measures heading 90° away from the planner's convention.
pub fn orientation_from_degrees(degrees: f64) -> f64 {
    let radians = (degrees + 90.0).rem_euclid(360.0).to_radians();
    // rem_euclid rounds tiny negative inputs up to the modulus.
    if radians >= std::f64::consts::TAU {
        0.0
    } else {
        radians
    }
}

/// Inverse of [`orientation_from_degrees`], in `[0, 360)`.
pub fn degrees_from_orientation(radians: f64) -> f64 {
    let degrees = (radians.to_degrees() - 90.0).rem_euclid(360.0);
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}
