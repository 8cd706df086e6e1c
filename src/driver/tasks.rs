//! The cooperative task harness: connection task and main task.
//!
//! Two long-running tasks share the processor cooperatively; the only
//! preemption in the system is the interrupt handlers. The connection task
//! runs until it has a monitor configured and scanning out, then hands off
//! and stays suspended; the main task services user input and the presence
//! monitor until the monitor disappears, tears the output down, and hands
//! back. Suspension points are exactly the event-flag waits, the explicit
//! delays and the handoff returns; never inside a handler.

use core::fmt::Write;

use crate::arena::Arena;
use crate::console::{ansi, Command, Console, ConsoleWriter, FmtHertz};
use crate::driver::serial::SerialConsole;
use crate::driver::vga::{Engine, EVENTS, EVT_FAULT};
use crate::driver::{ddc, ticks};
use crate::edid::Edid;
use crate::mode::{self, VisualizationRequest};
use crate::presence::{PresenceMonitor, CHECK_RETRIES, CHECK_TIMEOUT_MS};
use crate::screen::{Pen, Point, Size};

/// Back-off before re-trying a failed EDID exchange.
const RETRY_BACKOFF_MS: u32 = 10_000;

macro_rules! status {
    ($console:expr, $($arg:tt)*) => {
        let _ = write!(ConsoleWriter($console), $($arg)*);
    };
}

/// Owns the engine, the console and the arena, and schedules the two
/// tasks.
pub struct Harness {
    engine: Engine,
    console: SerialConsole,
    arena: Arena,
    request: VisualizationRequest,
}

impl Harness {
    pub fn new(
        engine: Engine,
        console: SerialConsole,
        arena: Arena,
        request: VisualizationRequest,
    ) -> Self {
        Harness {
            engine,
            console,
            arena,
            request,
        }
    }

    /// Runs forever: each connection-task pass ends with output running,
    /// each main-task pass ends with a disconnect teardown.
    pub fn run(mut self) -> ! {
        loop {
            self.connection_task();
            self.main_task();
        }
    }

    /// Waits for a monitor, reads and validates its EDID, negotiates the
    /// mode and starts output. Returns (suspending itself) once scan-out
    /// is live.
    fn connection_task(&mut self) {
        let mut wait_before_retry = false;

        loop {
            if wait_before_retry {
                wait_before_retry = false;
                ticks::delay_ms(RETRY_BACKOFF_MS);
            }

            if ddc::start_edid_read().is_err() {
                // Bus held low: either nothing connected or a wedged
                // device. Nothing to do but wait and retry.
                status!(
                    &mut self.console,
                    "Unable to start EDID read. Nothing connected (bus busy)\r\n"
                );
                wait_before_retry = true;
                continue;
            }

            ddc::EVENTS.wait_any(ddc::EVT_COMPLETE | ddc::EVT_ERROR);
            let block = match ddc::take_result() {
                Ok(block) => block,
                Err(error) => {
                    status!(
                        &mut self.console,
                        "{}EDID transfer failed: {:?}{}\r\n",
                        ansi::BOLD_YELLOW,
                        error,
                        ansi::RESET
                    );
                    wait_before_retry = true;
                    continue;
                }
            };

            let edid = match Edid::from_bytes(block) {
                Ok(edid) => edid,
                Err(error) => {
                    status!(
                        &mut self.console,
                        "{}EDID rejected ({:?}). Cannot connect{}\r\n",
                        ansi::BOLD_YELLOW,
                        error,
                        ansi::RESET
                    );
                    continue;
                }
            };

            status!(
                &mut self.console,
                "{}VGA connected{}\r\n{}",
                ansi::BOLD_BRIGHT_GREEN,
                ansi::RESET,
                edid.dump()
            );

            let plan = match mode::select(
                &edid,
                &self.request,
                self.arena.remaining(),
            ) {
                Ok(plan) => plan,
                Err(error) => {
                    status!(
                        &mut self.console,
                        "{}Mode refused: {:?}{}\r\n",
                        ansi::BOLD_YELLOW,
                        error,
                        ansi::RESET
                    );
                    wait_before_retry = true;
                    continue;
                }
            };

            // From here failures are driver invariant violations, not
            // environment conditions.
            self.engine
                .configure(&plan, &self.arena)
                .expect("engine configure");
            self.dump_frequencies();
            self.engine.start().expect("engine start");

            // Say hello so a completely idle system still shows life.
            if let Some(frame) = self.engine.framebuffer_mut() {
                frame.fill_rect(
                    Point { x: 21, y: 21 },
                    Size {
                        width: 358,
                        height: 258,
                    },
                    Pen::argb(0xFFDE_ADBE),
                );
            }

            self.console.listen();
            return;
        }
    }

    /// Services user input and the presence monitor while output runs.
    /// Returns (suspending itself, resuming the connection task) after a
    /// disconnect or an engine fault.
    fn main_task(&mut self) {
        let mut monitor = PresenceMonitor::new(ticks::now_ms());

        loop {
            self.handle_user_input();

            if EVENTS.take(EVT_FAULT) != 0 {
                let state = self.engine.state();
                status!(
                    &mut self.console,
                    "{}Scan-out fault ({:?})!{}\r\n",
                    ansi::BOLD_BRIGHT_RED,
                    state,
                    ansi::RESET
                );
                self.teardown();
                return;
            }

            // The probe costs a bus-matrix arbitration burst, so it only
            // runs when actually due.
            if monitor.poll_due(ticks::now_ms())
                && !ddc::device_ready(CHECK_TIMEOUT_MS, CHECK_RETRIES)
            {
                status!(
                    &mut self.console,
                    "{}VGA Disconnected!{}\r\n",
                    ansi::BOLD_BRIGHT_RED,
                    ansi::RESET
                );
                self.teardown();
                return;
            }

            cortex_m::asm::wfi();
        }
    }

    fn handle_user_input(&mut self) {
        let byte = match self.console.poll_byte() {
            Some(byte) => byte,
            None => return,
        };
        // Copy out and re-arm immediately, keeping the receive gap as
        // short as the bus allows.
        self.console.listen();

        let drew = {
            let frame = match self.engine.framebuffer_mut() {
                Some(frame) => frame,
                None => return,
            };

            match Command::decode(byte) {
                Command::Exit => {
                    frame.clear(Pen::BLACK);
                    true
                }
                Command::DemoScene => {
                    frame.fill_rect(
                        Point { x: 0, y: 0 },
                        Size {
                            width: 400,
                            height: 300,
                        },
                        Pen::BLACK,
                    );
                    frame.fill_rect(
                        Point { x: 55, y: 128 },
                        Size {
                            width: 300,
                            height: 22,
                        },
                        Pen::argb(0xFF00_8080),
                    );
                    true
                }
                // The palette and explorer applications plug in here; the
                // harness only routes their keys.
                Command::Palette
                | Command::Explorer
                | Command::Increment
                | Command::Decrement
                | Command::Confirm
                | Command::Back
                | Command::Other(_) => false,
            }
        };

        // Under double buffering nothing shows until the halves flip at
        // vertical blank.
        if drew {
            let _ = self.engine.present();
        }
    }

    /// Disconnect teardown, in dependency order: stop taking input, stop
    /// the engine, give the framebuffer back.
    fn teardown(&mut self) {
        ddc::abort();
        self.console.abort_receive();
        self.engine.stop().expect("engine stop");
        self.engine
            .release_framebuffer(&self.arena)
            .expect("framebuffer release");
    }

    fn dump_frequencies(&mut self) {
        if let Some(freqs) = self.engine.frequencies() {
            status!(
                &mut self.console,
                "Timers: update {}, hsync {}, vsync {}\r\n",
                FmtHertz(freqs.update_hz),
                FmtHertz(freqs.hsync_hz),
                FmtHertz(freqs.vsync_hz)
            );
        }
    }
}
