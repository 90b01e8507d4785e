//! Encoding of outbound protocol messages and decoding of telemetry.
//!
//! Topic paths mirror the telemetry tree the simulator sends back:
//!
//! ```text
//! <Event Name="SubscribedValues">
//!   <EgoVehicle>
//!     <orientation>..</orientation><x>..</x><z>..</z><speed>..</speed><isCrossing>..</isCrossing>
//!   </EgoVehicle>
//!   <Pedestrians>
//!     <ped1><speed>..</speed><position>x,y</position></ped1>
//!     ...
//!   </Pedestrians>
//!   <Obstacle><properties>x,z,heading</properties></Obstacle>
//! </Event>
//! ```

use std::collections::BTreeMap;

use roxmltree::Node;

use crate::command::{Command, ControlCommand, VehicleControl};
use crate::envelope::{
    EnvelopeBuilder, ESTABLISH_CONNECTION, SET_UPDATE_INTERVAL, SET_VEHICLE_CONTROL, SUBSCRIBE,
    SUBSCRIBED_VALUES, UNSUBSCRIBE,
};
use crate::error::DecodeError;
use crate::grid::{degrees_from_orientation, orientation_from_degrees, MapGeometry};
use crate::telemetry::{Obstacle, Pedestrian, TelemetryFrame};

pub const TOPIC_EGO: &str = "EgoVehicle";
pub const TOPIC_PEDESTRIANS: &str = "Pedestrians";
pub const TOPIC_OBSTACLE: &str = "Obstacle";

const EGO_FIELDS: [&str; 5] = ["orientation", "x", "z", "speed", "isCrossing"];
const PEDESTRIAN_FIELDS: [&str; 2] = ["speed", "position"];
const OBSTACLE_PROPERTIES: &str = "properties";
const PEDESTRIAN_PREFIX: &str = "ped";

/// Startup sequence: drop stale subscriptions, subscribe every telemetry
/// topic, set the update interval, then ask the simulator to connect.
///
/// The order is fixed; some receivers key on structural position.
pub fn encode_startup(update_interval_ms: u32, pedestrian_count: usize) -> String {
    let mut msg = EnvelopeBuilder::new()
        .event(UNSUBSCRIBE, TOPIC_EGO)
        .event(UNSUBSCRIBE, TOPIC_PEDESTRIANS);

    for index in 1..=pedestrian_count {
        for field in PEDESTRIAN_FIELDS {
            let topic = format!("{TOPIC_PEDESTRIANS}/{PEDESTRIAN_PREFIX}{index}/{field}");
            msg = msg.event(SUBSCRIBE, &topic);
        }
    }
    for field in EGO_FIELDS {
        msg = msg.event(SUBSCRIBE, &format!("{TOPIC_EGO}/{field}"));
    }

    msg.event(
        SUBSCRIBE,
        &format!("{TOPIC_OBSTACLE}/{OBSTACLE_PROPERTIES}"),
    )
    .event(SET_UPDATE_INTERVAL, &update_interval_ms.to_string())
    .event(ESTABLISH_CONNECTION, "")
    .finish()
}

/// One drive command; `target_speed` is appended only when supplied.
pub fn encode_control(
    vehicle_id: &str,
    steering: f64,
    throttle: f64,
    brake: f64,
    target_speed: Option<f64>,
) -> String {
    let control = ControlCommand {
        vehicle_id: vehicle_id.to_string(),
        steering,
        throttle,
        brake,
        target_speed,
    };
    encode_vehicle_control(&VehicleControl::Drive(control))
}

/// One fixed scene-control token.
pub fn encode_command(command: Command) -> String {
    encode_vehicle_control(&VehicleControl::Command(command))
}

/// Any `SetVehicleControl` payload.
pub fn encode_vehicle_control(control: &VehicleControl) -> String {
    EnvelopeBuilder::new()
        .event(SET_VEHICLE_CONTROL, &control.to_string())
        .finish()
}

/// Telemetry codec bound to one map geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MessageCodec {
    geometry: MapGeometry,
}

impl MessageCodec {
    pub fn new(geometry: MapGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &MapGeometry {
        &self.geometry
    }

    /// Whether the ego position of `frame` lies on the map.
    pub fn in_bounds(&self, frame: &TelemetryFrame) -> bool {
        self.geometry.contains(frame.x, frame.z)
    }

    /// Decode one `SubscribedValues` envelope.
    pub fn decode_telemetry(&self, raw: &str) -> Result<TelemetryFrame, DecodeError> {
        let doc = roxmltree::Document::parse(raw.trim())?;
        let root = doc.root_element();
        if !root.has_tag_name("Message") {
            return Err(DecodeError::UnexpectedRoot(
                root.tag_name().name().to_string(),
            ));
        }

        let event = root
            .children()
            .find(|n| {
                n.is_element()
                    && n.has_tag_name("Event")
                    && n.attribute("Name") == Some(SUBSCRIBED_VALUES)
            })
            .ok_or(DecodeError::MissingNode("Event[SubscribedValues]"))?;

        let ego = child(event, TOPIC_EGO).ok_or(DecodeError::MissingNode(TOPIC_EGO))?;
        let crossing = match child(ego, "isCrossing") {
            Some(node) => parse_bool("isCrossing", text(node))?,
            None => false,
        };

        Ok(TelemetryFrame {
            orientation: orientation_from_degrees(number(ego, "orientation")?),
            x: self.geometry.grid_x(number(ego, "x")?),
            z: self.geometry.grid_z(number(ego, "z")?),
            speed: number(ego, "speed")?,
            crossing,
            pedestrians: self.pedestrians(event)?,
            obstacle: self.obstacle(event)?,
        })
    }

    /// Encode `frame` as the simulator would send it, inverting the grid and
    /// orientation transforms.
    pub fn encode_telemetry(&self, frame: &TelemetryFrame) -> String {
        let g = &self.geometry;
        let mut tree = String::with_capacity(256);

        tree.push_str(&format!(
            "<{TOPIC_EGO}><orientation>{}</orientation><x>{}</x><z>{}</z>\
             <speed>{}</speed><isCrossing>{}</isCrossing></{TOPIC_EGO}>",
            degrees_from_orientation(frame.orientation),
            g.raw_x(frame.x),
            g.raw_z(frame.z),
            frame.speed,
            frame.crossing,
        ));

        tree.push_str(&format!("<{TOPIC_PEDESTRIANS}>"));
        for (i, ped) in frame.pedestrians.iter().enumerate() {
            let tag = format!("{PEDESTRIAN_PREFIX}{}", i + 1);
            tree.push_str(&format!(
                "<{tag}><speed>{}</speed><position>{},{}</position></{tag}>",
                ped.speed,
                g.raw_x(ped.x),
                g.raw_z(ped.z),
            ));
        }
        tree.push_str(&format!("</{TOPIC_PEDESTRIANS}>"));

        if let Some(obstacle) = &frame.obstacle {
            tree.push_str(&format!(
                "<{TOPIC_OBSTACLE}><{OBSTACLE_PROPERTIES}>{},{},{}</{OBSTACLE_PROPERTIES}></{TOPIC_OBSTACLE}>",
                g.raw_x(obstacle.x),
                g.raw_z(obstacle.z),
                degrees_from_orientation(obstacle.heading),
            ));
        }

        EnvelopeBuilder::new()
            .event_markup(SUBSCRIBED_VALUES, &tree)
            .finish()
    }

    /// Pedestrians are named `ped1..pedN`; the list ends at the first gap.
    fn pedestrians(&self, event: Node<'_, '_>) -> Result<Vec<Pedestrian>, DecodeError> {
        let Some(list) = child(event, TOPIC_PEDESTRIANS) else {
            return Ok(Vec::new());
        };

        let mut indexed: BTreeMap<usize, Node<'_, '_>> = list
            .children()
            .filter(Node::is_element)
            .filter_map(|n| {
                let index = n
                    .tag_name()
                    .name()
                    .strip_prefix(PEDESTRIAN_PREFIX)?
                    .parse::<usize>()
                    .ok()?;
                Some((index, n))
            })
            .collect();

        let count = (1..).take_while(|i| indexed.contains_key(i)).count();
        (1..=count)
            .filter_map(|i| indexed.remove(&i))
            .map(|node| -> Result<Pedestrian, DecodeError> {
                let [x, z] = floats::<2>("position", text(required(node, "position")?))?;
                Ok(Pedestrian {
                    x: self.geometry.grid_x(x),
                    z: self.geometry.grid_z(z),
                    speed: number(node, "speed")?,
                })
            })
            .collect()
    }

    fn obstacle(&self, event: Node<'_, '_>) -> Result<Option<Obstacle>, DecodeError> {
        let properties = child(event, TOPIC_OBSTACLE)
            .and_then(|node| child(node, OBSTACLE_PROPERTIES))
            .map(text)
            .unwrap_or_default();
        if properties.is_empty() {
            return Ok(None);
        }

        let [x, z, heading] = floats::<3>("obstacle", properties)?;
        Ok(Some(Obstacle {
            x: self.geometry.grid_x(x),
            z: self.geometry.grid_z(z),
            heading: orientation_from_degrees(heading),
        }))
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name(name))
}

fn required<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> Result<Node<'a, 'input>, DecodeError> {
    child(node, name).ok_or(DecodeError::MissingNode(name))
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or_default().trim()
}

fn number(node: Node<'_, '_>, name: &'static str) -> Result<f64, DecodeError> {
    let value = text(required(node, name)?);
    value.parse().map_err(|_| DecodeError::InvalidNumber {
        field: name,
        value: value.to_string(),
    })
}

fn floats<const N: usize>(field: &'static str, value: &str) -> Result<[f64; N], DecodeError> {
    let malformed = || DecodeError::InvalidField {
        field,
        value: value.to_string(),
    };

    let mut out = [0.0; N];
    let mut parts = value.split(',');
    for slot in &mut out {
        *slot = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(malformed)?;
    }
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok(out)
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, DecodeError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(DecodeError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}
