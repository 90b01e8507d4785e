//! Oriented-rectangle proximity tests in map-grid units.

use simbridge_frame::{Pedestrian, TelemetryFrame};

/// Half-extents of the hit rectangle (front, side).
pub const HIT_MARGINS: (f64, f64) = (0.5, 0.5);
/// Near-miss rectangle at or below [`NEAR_MISS_SPEED_SPLIT`].
pub const NEAR_MISS_SLOW_MARGINS: (f64, f64) = (1.0, 0.75);
/// Near-miss rectangle above [`NEAR_MISS_SPEED_SPLIT`].
pub const NEAR_MISS_FAST_MARGINS: (f64, f64) = (1.5, 1.0);
/// Ego speed (absolute) above which the wider near-miss rectangle applies.
pub const NEAR_MISS_SPEED_SPLIT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vec2 {
    x: f64,
    z: f64,
}

impl Vec2 {
    fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.z - other.z)
    }

    fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.z + other.z)
    }

    fn scale(self, k: f64) -> Vec2 {
        Vec2::new(self.x * k, self.z * k)
    }

    fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.z * other.z
    }
}

/// True when the pedestrian lies inside the rectangle centered on the car,
/// extending `front` along the heading and `side` across it (both ways).
///
/// Corners A, B, C, D run rear-right, front-right, front-left, rear-left; M
/// is inside iff `0 <= AB·AM <= AB·AB` and `0 <= BC·BM <= BC·BC`. Edges count
/// as inside.
pub fn ped_in_area(
    car_x: f64,
    car_z: f64,
    car_theta: f64,
    ped_x: f64,
    ped_z: f64,
    front: f64,
    side: f64,
) -> bool {
    let center = Vec2::new(car_x, car_z);
    let heading = Vec2::new(car_theta.cos(), car_theta.sin());
    let normal = Vec2::new(-car_theta.sin(), car_theta.cos());

    let forward = heading.scale(front);
    let across = normal.scale(side);

    let a = center.sub(forward).sub(across);
    let b = center.add(forward).sub(across);
    let c = center.add(forward).add(across);

    let m = Vec2::new(ped_x, ped_z);
    let ab = b.sub(a);
    let bc = c.sub(b);
    let am = m.sub(a);
    let bm = m.sub(b);

    let along = ab.dot(am);
    let lateral = bc.dot(bm);
    (0.0..=ab.dot(ab)).contains(&along) && (0.0..=bc.dot(bc)).contains(&lateral)
}

/// Pedestrian inside the hit rectangle.
pub fn is_hit(frame: &TelemetryFrame, ped: &Pedestrian) -> bool {
    let (front, side) = HIT_MARGINS;
    ped_in_area(frame.x, frame.z, frame.orientation, ped.x, ped.z, front, side)
}

/// Pedestrian inside the speed-dependent near-miss rectangle.
pub fn is_near_miss(frame: &TelemetryFrame, ped: &Pedestrian) -> bool {
    let (front, side) = if frame.speed.abs() <= NEAR_MISS_SPEED_SPLIT {
        NEAR_MISS_SLOW_MARGINS
    } else {
        NEAR_MISS_FAST_MARGINS
    };
    ped_in_area(frame.x, frame.z, frame.orientation, ped.x, ped.z, front, side)
}

/// Pedestrian within `threshold` radians of the heading, on the forward side.
pub fn is_in_front(frame: &TelemetryFrame, ped: &Pedestrian, threshold: f64) -> bool {
    let dx = ped.x - frame.x;
    let dz = ped.z - frame.z;
    if dx == 0.0 && dz == 0.0 {
        return true;
    }
    let bearing = dz.atan2(dx);
    let mut delta = (bearing - frame.orientation).rem_euclid(std::f64::consts::TAU);
    if delta > std::f64::consts::PI {
        delta = std::f64::consts::TAU - delta;
    }
    delta <= threshold
}
