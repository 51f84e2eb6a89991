//! Standalone PDO capture decoder
//!
//! Reads a JSON-lines capture (one raw frame per line, as consumed by the
//! replay transport) and prints the decoded values of every frame together
//! with per-PDO statistics.
//!
//! Usage:
//!   cargo run --example decode_capture -- <capture.jsonl> [--limit <count>] [--verbose]

use canopen_telemetry::{BusChannel, CanDriver, FieldMap, FrameDecoder, ReplayDriver};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct CaptureStats {
    total_frames: usize,
    unknown_frames: usize,
    values_decoded: usize,
    frames_per_label: BTreeMap<String, usize>,
}

impl CaptureStats {
    fn print_summary(&self) {
        println!("\n=== DECODING SUMMARY ===");
        println!("Total frames processed: {}", self.total_frames);
        println!("Frames without fields: {}", self.unknown_frames);
        println!("Total values decoded: {}", self.values_decoded);

        if !self.frames_per_label.is_empty() {
            println!("\nFrames per PDO:");
            for (label, count) in &self.frames_per_label {
                println!("  {}: {}", label, count);
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <capture.jsonl> [--limit <count>] [--verbose]", args[0]);
        std::process::exit(1);
    }

    let capture = PathBuf::from(&args[1]);
    let mut limit = usize::MAX;
    let mut verbose = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" if i + 1 < args.len() => {
                limit = args[i + 1].parse()?;
                i += 2;
            }
            "--verbose" => {
                verbose = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let decoder = FrameDecoder::new(Arc::new(FieldMap::motor_controller()));
    let mut driver = ReplayDriver::from_jsonl(&capture)?;
    let mut channel = driver.open_channel(0)?;
    let mut stats = CaptureStats::default();

    while stats.total_frames < limit && driver.remaining() > 0 {
        let Some(raw) = channel.read(Duration::ZERO)? else {
            continue;
        };
        let frame = decoder.decode_frame(raw);

        stats.total_frames += 1;
        stats.values_decoded += frame.values.len();
        if frame.values.is_empty() {
            stats.unknown_frames += 1;
        }
        *stats.frames_per_label.entry(frame.pdo_label.clone()).or_default() += 1;

        println!(
            "[{:.3}] {} (id {}, dlc {})",
            frame.timestamp_seconds, frame.pdo_label, frame.message_id, frame.dlc
        );
        if verbose {
            let mut names: Vec<&String> = frame.values.keys().collect();
            names.sort();
            for name in names {
                let value = &frame.values[name];
                println!("    {} = {} {}", name, value.value, value.unit);
            }
        }
    }

    stats.print_summary();
    Ok(())
}
