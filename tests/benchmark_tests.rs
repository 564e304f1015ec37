//! Performance benchmarks for the hot paths: simulation steps, frame
//! encoding and the input record codec

use client::game::ClientGameState;
use server::sync::{write_frame, write_shared_section};
use shared::input::{Control, InputCapture, TickLine};
use shared::protocol::input_bits;
use shared::record::{RecordEncoder, Replayer};
use shared::stage::{Stage, StageTemplate};
use shared::wire::{Reader, Writer};
use std::sync::Arc;
use std::time::Instant;

fn demo_stage(players: usize) -> Stage {
    Stage::generate(Arc::new(StageTemplate::demo("bench")), players)
}

/// Benchmarks the simulation step with a full room
#[test]
fn benchmark_stage_step() {
    let mut stage = demo_stage(8);
    for index in 0..8 {
        stage.set_input(index, input_bits::RIGHT);
    }

    let dt = 1.0 / 60.0;
    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        if i % 600 == 0 {
            stage.reset();
        }
        stage.step(dt);
    }

    let duration = start.elapsed();
    println!(
        "Stage step (8 players): {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks per-tick frame fan-out: one shared section, one frame each
#[test]
fn benchmark_frame_fan_out() {
    let players = 8;
    let mut stage = demo_stage(players);
    let ticks = 2_000;
    let mut bytes = 0usize;
    let start = Instant::now();

    for _ in 0..ticks {
        stage.step(1.0 / 60.0);
        let shared = write_shared_section(&stage);
        for recipient in 0..players {
            let mut out = Writer::new();
            write_frame(&mut out, &shared, &mut stage, recipient);
            bytes += out.len();
        }
    }

    let duration = start.elapsed();
    println!(
        "Frame fan-out: {} ticks x {} recipients, {} bytes in {:?}",
        ticks, players, bytes, duration
    );

    assert!(bytes > 0);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks decoding frames into the client mirror
#[test]
fn benchmark_mirror_apply() {
    let mut stage = demo_stage(4);
    let mut frames = Vec::new();
    for _ in 0..1_000 {
        stage.step(1.0 / 60.0);
        let shared = write_shared_section(&stage);
        let mut out = Writer::new();
        write_frame(&mut out, &shared, &mut stage, 0);
        // Strip the PLAY opcode; the mirror decodes the body.
        frames.push(out.as_slice()[1..].to_vec());
    }

    let mut mirror = ClientGameState::new();
    mirror.set_player_count(4);
    let start = Instant::now();

    for frame in &frames {
        mirror.apply_frame(&mut Reader::new(frame)).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Mirror apply: {} frames in {:?} ({:.2} μs/frame)",
        frames.len(),
        duration,
        duration.as_micros() as f64 / frames.len() as f64
    );

    assert_eq!(mirror.frames_applied(), frames.len() as u64);
    assert!(duration.as_millis() < 500);
}

/// Stress test recording a long session of mostly idle input
#[test]
fn stress_test_record_codec() {
    let mut capture = InputCapture::new();
    let mut encoder = RecordEncoder::new();
    let ticks = 200_000;
    let start = Instant::now();

    let mut lines = Vec::with_capacity(ticks);
    for i in 0..ticks {
        match i % 5_000 {
            0 => capture.press(Control::Right),
            2_000 => capture.release(Control::Right),
            3_000 => capture.press(Control::Up),
            3_001 => capture.release(Control::Up),
            _ => {}
        }
        let line = capture.poll();
        encoder.push(line);
        lines.push(line);
    }
    let recording = encoder.finish();
    let encoded = start.elapsed();

    let replayed: Vec<TickLine> = Replayer::new(&recording)
        .collect::<Result<_, _>>()
        .unwrap();
    let duration = start.elapsed();

    println!(
        "Record codec: {} ticks into {} words, encode {:?}, total {:?}",
        ticks,
        recording.len(),
        encoded,
        duration
    );

    assert_eq!(replayed, lines);
    assert!(recording.len() < ticks / 100);
    assert!(duration.as_millis() < 2000);
}
