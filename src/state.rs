//! Scan-out engine lifecycle and vertical state.
//!
//! The state machine itself is plain data so the transition rules can be
//! tested on the host; the driver holds one of these behind its ISR statics
//! and mirrors the current state into an atomic for the latency-sensitive
//! paths.

use crate::scanout::ScanoutPlan;
use crate::VgaError;

/// Lifecycle state of the scan-out engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineState {
    /// Resources allocated, timers stopped.
    Configured,
    /// Output running, currently in the vertical blanking region: DMA
    /// disabled, pixel outputs forced to analogue black.
    RunningVsync,
    /// Output running, scanning out visible lines.
    RunningActive,
    /// DMA and sync outputs disabled, timers still running.
    Suspended,
    /// Timers halted, DMA released.
    Stopped,
    /// A DMA error or underrun occurred; only a stop is meaningful.
    Faulted,
}

/// Checked transitions over [`EngineState`].
///
/// `suspend` remembers which running substate it left so `resume` can
/// return to it.
#[derive(Clone, Debug)]
pub struct EngineFsm {
    state: EngineState,
    resume_active: bool,
}

impl EngineFsm {
    /// A freshly configured engine.
    pub fn new() -> Self {
        EngineFsm {
            state: EngineState::Configured,
            resume_active: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// `Configured` → `RunningVsync`. Scan-out always begins in vertical
    /// blanking so the first visible line is rearmed like every other one.
    pub fn start(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::Configured => {
                self.state = EngineState::RunningVsync;
                Ok(())
            }
            EngineState::Faulted => Err(VgaError::DmaFault),
            _ => Err(VgaError::InvalidState),
        }
    }

    /// `Running-*` → `Suspended`.
    pub fn suspend(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::RunningVsync | EngineState::RunningActive => {
                self.resume_active =
                    self.state == EngineState::RunningActive;
                self.state = EngineState::Suspended;
                Ok(())
            }
            EngineState::Faulted => Err(VgaError::DmaFault),
            _ => Err(VgaError::InvalidState),
        }
    }

    /// `Suspended` → the `Running-*` state `suspend` left.
    pub fn resume(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::Suspended => {
                self.state = if self.resume_active {
                    EngineState::RunningActive
                } else {
                    EngineState::RunningVsync
                };
                Ok(())
            }
            EngineState::Faulted => Err(VgaError::DmaFault),
            _ => Err(VgaError::InvalidState),
        }
    }

    /// Any live state → `Stopped`.
    pub fn stop(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::Stopped => Err(VgaError::InvalidState),
            _ => {
                self.state = EngineState::Stopped;
                Ok(())
            }
        }
    }

    /// Records a runtime fault. Unconditional: faults can land in any state.
    pub fn fault(&mut self) {
        self.state = EngineState::Faulted;
    }

    /// ISR-side transition at the start of active video.
    pub fn enter_active(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::RunningVsync => {
                self.state = EngineState::RunningActive;
                Ok(())
            }
            _ => Err(VgaError::InvalidState),
        }
    }

    /// ISR-side transition back into vertical blanking.
    pub fn enter_vsync(&mut self) -> Result<(), VgaError> {
        match self.state {
            EngineState::RunningActive => {
                self.state = EngineState::RunningVsync;
                Ok(())
            }
            _ => Err(VgaError::InvalidState),
        }
    }
}

/// What the end-of-active handler must do as it steps onto a line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineEvent {
    /// Stay in the current region.
    None,
    /// The line entering is the first active line: switch to
    /// `Running-Active` with the line pointer at framebuffer row zero.
    EnterActive,
    /// The line entering is the first blanking line: switch to
    /// `Running-VSync`, wrapping the line pointer (and swapping buffers if
    /// double-buffered).
    EnterVsync,
}

/// Vertical frame structure in scanlines, counter zero at the start of the
/// vertical sync pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VerticalLayout {
    pub video_start: u16,
    pub video_end: u16,
    pub whole: u16,
    /// Scanlines per framebuffer row.
    pub line_repeat: u16,
}

impl VerticalLayout {
    pub fn from_plan(plan: &ScanoutPlan) -> Self {
        VerticalLayout {
            video_start: plan.video_start_line,
            video_end: plan.video_end_line,
            whole: plan.vsync_period,
            line_repeat: plan.line_repeat,
        }
    }

    /// Steps from `line` to its successor, reporting the region change the
    /// successor triggers.
    pub fn advance(&self, line: u16) -> (u16, LineEvent) {
        let next = if line + 1 == self.whole { 0 } else { line + 1 };
        let event = if next == self.video_start {
            LineEvent::EnterActive
        } else if next == self.video_end {
            LineEvent::EnterVsync
        } else {
            LineEvent::None
        };
        (next, event)
    }

    pub fn is_active(&self, line: u16) -> bool {
        line >= self.video_start && line < self.video_end
    }

    /// The framebuffer row scanned out on `line`, accounting for line
    /// repetition; `None` during blanking.
    pub fn fb_row(&self, line: u16) -> Option<u16> {
        if self.is_active(line) {
            Some((line - self.video_start) / self.line_repeat)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_start_stop() {
        let mut fsm = EngineFsm::new();
        assert_eq!(fsm.state(), EngineState::Configured);
        fsm.start().unwrap();
        assert_eq!(fsm.state(), EngineState::RunningVsync);
        fsm.stop().unwrap();
        assert_eq!(fsm.state(), EngineState::Stopped);

        // Stopped is terminal for this instance.
        assert_eq!(fsm.start(), Err(VgaError::InvalidState));
        assert_eq!(fsm.resume(), Err(VgaError::InvalidState));
        assert_eq!(fsm.stop(), Err(VgaError::InvalidState));
    }

    #[test]
    fn suspend_resume_roundtrip() {
        for active in &[false, true] {
            let mut fsm = EngineFsm::new();
            fsm.start().unwrap();
            if *active {
                fsm.enter_active().unwrap();
            }
            let before = fsm.state();

            fsm.suspend().unwrap();
            assert_eq!(fsm.state(), EngineState::Suspended);
            fsm.resume().unwrap();
            assert_eq!(fsm.state(), before);
        }
    }

    #[test]
    fn resume_requires_suspend() {
        let mut fsm = EngineFsm::new();
        fsm.start().unwrap();
        assert_eq!(fsm.resume(), Err(VgaError::InvalidState));
    }

    #[test]
    fn fault_is_unconditional_and_stoppable() {
        let mut fsm = EngineFsm::new();
        fsm.start().unwrap();
        fsm.fault();
        assert_eq!(fsm.state(), EngineState::Faulted);
        // Everything except a stop reports the fault.
        assert_eq!(fsm.suspend(), Err(VgaError::DmaFault));
        assert_eq!(fsm.resume(), Err(VgaError::DmaFault));
        fsm.stop().unwrap();
    }

    fn baseline_layout() -> VerticalLayout {
        // 800x600 scaled by 2: sync 4, back 23, active 600, front 1.
        VerticalLayout {
            video_start: 27,
            video_end: 627,
            whole: 628,
            line_repeat: 2,
        }
    }

    #[test]
    fn line_walk_over_one_frame() {
        let layout = baseline_layout();
        let mut line = 0;
        let mut entered_active = 0;
        let mut entered_vsync = 0;

        for _ in 0..layout.whole {
            let (next, event) = layout.advance(line);
            match event {
                LineEvent::EnterActive => {
                    entered_active += 1;
                    assert_eq!(next, 27);
                }
                LineEvent::EnterVsync => {
                    entered_vsync += 1;
                    assert_eq!(next, 627);
                }
                LineEvent::None => {}
            }
            line = next;
        }

        assert_eq!(line, 0, "walk should wrap to the top of the frame");
        assert_eq!(entered_active, 1);
        assert_eq!(entered_vsync, 1);
    }

    #[test]
    fn rows_repeat_per_scaling() {
        let layout = baseline_layout();
        assert_eq!(layout.fb_row(26), None);
        assert_eq!(layout.fb_row(27), Some(0));
        assert_eq!(layout.fb_row(28), Some(0));
        assert_eq!(layout.fb_row(29), Some(1));
        assert_eq!(layout.fb_row(626), Some(299));
        assert_eq!(layout.fb_row(627), None);
    }
}
