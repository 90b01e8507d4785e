use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use simbridge_eval::EpisodeMetrics;
use simbridge_frame::{Event, MessageCodec, TelemetryFrame};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Wire form: XML envelopes, bare lines.
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    seq: u64,
    #[serde(flatten)]
    frame: &'a TelemetryFrame,
    in_front: &'a [usize],
    timestamp: String,
}

pub fn print_frame(
    seq: u64,
    frame: &TelemetryFrame,
    in_front: &[usize],
    codec: &MessageCodec,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                seq,
                frame,
                in_front,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "SEQ", "X", "Z", "HEADING", "SPEED", "CROSSING", "PEDS", "IN FRONT",
                ])
                .add_row(vec![
                    seq.to_string(),
                    format!("{:.2}", frame.x),
                    format!("{:.2}", frame.z),
                    format!("{:.3}", frame.orientation),
                    format!("{:.2}", frame.speed),
                    frame.crossing.to_string(),
                    frame.pedestrian_count().to_string(),
                    join_indices(in_front),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{seq} x={:.2} z={:.2} heading={:.3} speed={:.2} peds={} in_front=[{}]",
                frame.x,
                frame.z,
                frame.orientation,
                frame.speed,
                frame.pedestrian_count(),
                join_indices(in_front)
            );
        }
        OutputFormat::Raw => print_line(&codec.encode_telemetry(frame)),
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    name: &'a str,
    payload: &'a str,
}

/// Print an outbound envelope, one row per event.
pub fn print_events(envelope: &str, events: &[Event], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<EventOutput<'_>> = events
                .iter()
                .map(|e| EventOutput {
                    name: &e.name,
                    payload: &e.payload,
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "EVENT", "PAYLOAD"]);
            for (i, event) in events.iter().enumerate() {
                table.add_row(vec![
                    (i + 1).to_string(),
                    event.name.clone(),
                    event.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for event in events {
                println!("{} {}", event.name, event.payload);
            }
        }
        OutputFormat::Raw => print_line(envelope),
    }
}

pub fn print_metrics(metrics: &EpisodeMetrics, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(metrics).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            if let Some(label) = &metrics.label {
                table.add_row(vec!["label".to_string(), label.clone()]);
            }
            if let Some(distance) = metrics.crossing_distance {
                table.add_row(vec!["crossing_distance".to_string(), distance.to_string()]);
            }
            for (name, value) in [
                ("crashes", metrics.crashes.to_string()),
                ("near_misses", metrics.near_misses.to_string()),
                ("accelerations", metrics.accelerations.to_string()),
                ("total_angle", format!("{:.3}", metrics.total_angle)),
                ("time_taken", metrics.time_taken.to_string()),
                ("max_impact_speed", metrics.max_impact_speed.to_string()),
            ] {
                table.add_row(vec![name.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!("{metrics}"),
    }
}

/// Write one line and flush; relayed output must not sit in a buffer.
pub fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
