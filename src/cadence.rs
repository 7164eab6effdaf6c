/*!
Cadence drivers: who calls `run_frame`, and when.

Two ways to keep a console at 60 fps:

- [`ThreadCadence`] owns the console on a worker thread and paces itself
  against a monotonic deadline, sleeping in short slices so cancellation
  is prompt. When the host stalls, catch-up is capped at two frames and
  the deadline resyncs instead of sprinting through the backlog.
- [`CallbackCadence`] keeps the console on the caller's thread; the host
  pumps `tick` as often as it likes and frames run only when due. Fits
  event loops that already have their own clock.

Frame output goes to a [`FrameSink`]; both drivers hand it the composed
frame and the drained audio chunk after every executed frame.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::console::Console;

/// 60 fps frame period.
const FRAME_PERIOD: Duration = Duration::from_nanos(16_666_667);
/// Longest single sleep; bounds cancellation latency.
const SLEEP_SLICE: Duration = Duration::from_millis(4);
/// Frames of backlog worked off before the deadline resyncs.
const CATCH_UP_CAP: u32 = 2;

pub trait FrameSink: Send + 'static {
    fn frame(&mut self, frame: &[u8]);
    fn audio(&mut self, samples: &[f32]);
}

pub trait CadenceDriver {
    fn id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Stop driving frames. Safe to call more than once.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

// ------------- worker-thread driver -------------

pub struct ThreadCadence {
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<Console>>,
}

impl ThreadCadence {
    /// Move the console to a worker thread and start running frames.
    pub fn start(console: Console, sink: impl FrameSink) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let worker = thread::spawn(move || run_loop(console, sink, flag));
        Self {
            cancel,
            worker: Some(worker),
        }
    }

    /// Stop the worker and take the console back. `None` after the first
    /// call or if the worker panicked.
    pub fn stop_and_join(&mut self) -> Option<Console> {
        self.cancel.store(true, Ordering::Relaxed);
        self.worker.take().and_then(|w| w.join().ok())
    }
}

impl CadenceDriver for ThreadCadence {
    fn id(&self) -> &'static str {
        "THREAD"
    }

    fn display_name(&self) -> &'static str {
        "Worker thread"
    }

    fn description(&self) -> &'static str {
        "Owns the console on a background thread, self-paced at 60 fps"
    }

    fn stop(&mut self) {
        let _ = self.stop_and_join();
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for ThreadCadence {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut console: Console, mut sink: impl FrameSink, cancel: Arc<AtomicBool>) -> Console {
    let mut deadline = Instant::now() + FRAME_PERIOD;
    while !cancel.load(Ordering::Relaxed) {
        console.run_frame();
        sink.frame(console.frame_buffer());
        let audio = console.audio_buffer();
        sink.audio(&audio);

        deadline += FRAME_PERIOD;
        let now = Instant::now();
        if now > deadline + FRAME_PERIOD * CATCH_UP_CAP {
            // Too far behind to be worth replaying; drop the backlog.
            deadline = now;
            continue;
        }
        while !cancel.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
    console
}

// ------------- host-pumped driver -------------

pub struct CallbackCadence {
    console: Console,
    next_due: Instant,
    running: bool,
}

impl CallbackCadence {
    pub fn new(console: Console) -> Self {
        Self {
            console,
            next_due: Instant::now(),
            running: true,
        }
    }

    /// Run every frame that has come due, up to the catch-up cap, and
    /// deliver the newest output to the sink. Returns frames executed.
    pub fn tick(&mut self, sink: &mut dyn FnMut(&[u8], &[f32])) -> u32 {
        if !self.running {
            return 0;
        }
        let mut ran = 0;
        let now = Instant::now();
        while self.next_due <= now && ran < CATCH_UP_CAP {
            self.console.run_frame();
            self.next_due += FRAME_PERIOD;
            ran += 1;
        }
        if self.next_due <= now {
            // Still behind after the cap; resync rather than sprint.
            self.next_due = now + FRAME_PERIOD;
        }
        if ran > 0 {
            let audio = self.console.audio_buffer();
            sink(self.console.frame_buffer(), &audio);
        }
        ran
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn into_console(self) -> Console {
        self.console
    }
}

impl CadenceDriver for CallbackCadence {
    fn id(&self) -> &'static str {
        "CALLBACK"
    }

    fn display_name(&self) -> &'static str {
        "Host callback"
    }

    fn description(&self) -> &'static str {
        "Caller-pumped pacing; frames run only when their deadline passes"
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::program_rom;
    use std::sync::Mutex;

    const LOOP: &[u8] = &[0xA9, 0x10, 0x69, 0x05, 0x8D, 0x00, 0x02, 0xE8, 0x4C, 0x00, 0x80];

    fn console() -> Console {
        Console::new(&program_rom(LOOP), "cadence").unwrap()
    }

    struct CountingSink(Arc<Mutex<(u64, u64)>>);

    impl FrameSink for CountingSink {
        fn frame(&mut self, frame: &[u8]) {
            assert_eq!(frame.len(), crate::cores::FRAME_BYTES);
            self.0.lock().unwrap().0 += 1;
        }
        fn audio(&mut self, samples: &[f32]) {
            self.0.lock().unwrap().1 += samples.len() as u64;
        }
    }

    #[test]
    fn thread_driver_runs_frames_and_returns_the_console() {
        let counts = Arc::new(Mutex::new((0u64, 0u64)));
        let mut driver = ThreadCadence::start(console(), CountingSink(Arc::clone(&counts)));
        assert!(driver.is_running());
        thread::sleep(Duration::from_millis(120));

        let returned = driver.stop_and_join().expect("console comes back");
        assert!(!driver.is_running());
        let (frames, samples) = *counts.lock().unwrap();
        assert!(frames > 0);
        assert!(samples > 0);
        assert_eq!(returned.frames_total(), frames);

        // Stop is idempotent; the console is only returned once.
        driver.stop();
        assert!(driver.stop_and_join().is_none());
    }

    #[test]
    fn callback_driver_only_runs_when_due() {
        let mut driver = CallbackCadence::new(console());
        let mut frames = 0u64;
        let mut sink = |_: &[u8], _: &[f32]| frames += 1;

        // First tick is due immediately.
        assert!(driver.tick(&mut sink) >= 1);
        // Immediately after, nothing is due.
        assert_eq!(driver.tick(&mut sink), 0);

        thread::sleep(Duration::from_millis(40));
        let ran = driver.tick(&mut sink);
        assert!(ran >= 1 && ran <= CATCH_UP_CAP);
        assert!(frames > 0);
    }

    #[test]
    fn stopped_callback_driver_is_inert() {
        let mut driver = CallbackCadence::new(console());
        driver.stop();
        let mut sink = |_: &[u8], _: &[f32]| panic!("should not run");
        assert_eq!(driver.tick(&mut sink), 0);
        let c = driver.into_console();
        assert_eq!(c.frames_total(), 0);
    }
}
