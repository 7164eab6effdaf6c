/*!
Deterministic benchmark workloads.

Reports contain instrumentation counters and retired cycles only, never
wall-clock time, so two runs of the same build over the same ROM produce
identical reports. Useful for comparing cores and strategies by work done
rather than by host noise.
*/

use serde::Serialize;

use crate::console::Console;
use crate::cores::CpuStep;
use crate::scheduler::{CPU_CLOCK_HZ, MAX_INSTRUCTIONS_PER_BATCH};

#[derive(Clone, Debug, Serialize)]
pub struct BenchReport {
    pub name: &'static str,
    pub iterations: u64,
    pub cycles: u64,
    pub reads: u64,
    pub writes: u64,
    pub audio_steps: u64,
    pub dma_writes: u64,
    pub batch_flushes: u64,
}

impl Console {
    /// Run the three standard workloads scaled by `weight` (clamped to at
    /// least 1): whole frames, raw instruction throughput, and a fixed
    /// cycle quota.
    pub fn run_benchmarks(&mut self, weight: u32) -> Vec<BenchReport> {
        let weight = weight.max(1);
        let mut reports = Vec::with_capacity(3);

        let frames = 120 * weight;
        reports.push(self.bench("frames", frames as u64, |c| {
            c.run_frames(frames);
        }));

        let per_iteration = 10_000 * weight;
        reports.push(self.bench("instructions", 10 * per_iteration as u64, |c| {
            for _ in 0..10 {
                c.run_instructions(per_iteration);
            }
        }));

        let quota = CPU_CLOCK_HZ as u64 * weight as u64;
        reports.push(self.bench("cycles", quota, |c| {
            let start = c.global_cycle();
            while c.global_cycle() - start < quota && !c.crashed() {
                c.run_frame();
            }
        }));

        reports
    }

    fn bench(
        &mut self,
        name: &'static str,
        iterations: u64,
        body: impl FnOnce(&mut Self),
    ) -> BenchReport {
        self.bus_mut().reset_instrumentation();
        let start_cycle = self.global_cycle();
        body(self);
        let i = self.bus().instrumentation();
        BenchReport {
            name,
            iterations,
            cycles: self.global_cycle() - start_cycle,
            reads: i.reads,
            writes: i.writes,
            audio_steps: i.audio_steps,
            dma_writes: i.dma_writes,
            batch_flushes: i.batch_flushes,
        }
    }

    /// Execute a raw instruction count outside frame pacing, flushing
    /// device time at the usual batch size.
    fn run_instructions(&mut self, count: u32) {
        let mut batch_cycles = 0u32;
        let mut batch_len = 0u32;
        for _ in 0..count {
            if self.crashed() {
                break;
            }
            match self
                .cpu_registry
                .active_mut()
                .execute_instruction(&mut self.bus)
            {
                CpuStep::Ok(c) => {
                    batch_cycles += c;
                    batch_len += 1;
                }
                CpuStep::IllegalOpcode(pc) => {
                    // Benchmarks never recover; treat as a halt.
                    log::error!("illegal opcode at {pc:04X} during benchmark");
                    break;
                }
            }
            if batch_len >= MAX_INSTRUCTIONS_PER_BATCH {
                self.flush_batch(batch_cycles);
                batch_cycles = 0;
                batch_len = 0;
            }
        }
        if batch_cycles > 0 {
            self.flush_batch(batch_cycles);
        }
    }
}
