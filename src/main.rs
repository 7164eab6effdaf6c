/*!
Headless driver: run a ROM for a while and report what happened.

    polynes <rom.nes> [frames] [batch|event] [bench-weight]
*/

use std::env;
use std::process::ExitCode;

use polynes::{Console, Strategy};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(rom_path) = args.first() else {
        eprintln!("usage: polynes <rom.nes> [frames] [batch|event] [bench-weight]");
        return ExitCode::FAILURE;
    };
    let frames: u32 = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(600);
    let strategy = match args.get(2).map(String::as_str) {
        Some("event") => Strategy::EventDriven,
        _ => Strategy::Batch,
    };
    let bench_weight: Option<u32> = args.get(3).and_then(|s| s.parse().ok());

    let rom = match std::fs::read(rom_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("cannot read {rom_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let name = rom_path.rsplit('/').next().unwrap_or(rom_path);
    let mut console = match Console::new(&rom, name) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cannot start {name}: {e}");
            return ExitCode::FAILURE;
        }
    };
    console.set_strategy(strategy);

    console.run_frames(frames);
    println!("{name}: {} frames, {} cycles", console.frames_total(), console.global_cycle());
    println!("digest: {}", console.state_digest());
    if console.crashed() {
        println!("crashed: {}", console.crash_info().unwrap_or("unknown"));
    }

    if let Some(weight) = bench_weight {
        for report in console.run_benchmarks(weight) {
            println!(
                "bench {:>12}: {:>12} cycles, {:>10} reads, {:>10} writes, {:>6} flushes",
                report.name, report.cycles, report.reads, report.writes, report.batch_flushes
            );
        }
    }
    ExitCode::SUCCESS
}
