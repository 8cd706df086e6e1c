//! Scan-out planning: from validated timings to hardware numbers.
//!
//! The master timer's update event paces one streamed framebuffer byte; the
//! HSync counter is slaved to those updates and the VSync counter to HSync,
//! so the whole pipeline advances off a single clock. This module computes
//! every period, compare value and transfer length the driver programs, as
//! plain arithmetic that can be checked on the host.
//!
//! Both sync counters use the same phase convention: counter zero is the
//! start of the sync pulse, so a line is sync, back porch, active video,
//! front porch, and a frame is the same shape in lines.

use crate::clock::ClockPlan;
use crate::screen::{Bpp, BORDER_PIXELS};
use crate::timing::VideoFrameInfo;
use crate::VgaError;

/// Polarity of a sync pulse, and, by implication, the idle state of the
/// sync signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    Positive = 0,
    Negative = 1,
}

/// Master-timer updates of slack the engine needs between rearm (at end of
/// active video) and the start of the next active region. Timings whose
/// back porch provides less than this are refused.
pub const DMA_REARM_MIN_UPDATES: u32 = 24;

/// Moves the start-of-video compare backwards in time, to compensate for
/// interrupt latency and stream start-up. Measured in master updates.
pub const VIDEO_LEAD: u16 = 8;

/// Everything the sync generator and line DMA need to be programmed.
///
/// "Updates" below are master-timer update events, i.e. streamed bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanoutPlan {
    /// Master timer counts per update (ARR is this minus one).
    pub master_reload: u16,

    /// Updates per whole scanline.
    pub hsync_period: u16,
    /// Updates the horizontal sync pulse stays asserted.
    pub hsync_pulse: u16,
    /// Update at which the start-of-active interrupt fires (lead applied).
    pub video_start: u16,
    /// Update at which the end-of-active interrupt fires.
    pub video_end: u16,
    pub hsync_polarity: Polarity,

    /// Lines per whole frame.
    pub vsync_period: u16,
    /// Lines the vertical sync pulse stays asserted.
    pub vsync_pulse: u16,
    /// First active scanline of the frame.
    pub video_start_line: u16,
    /// One past the last active scanline.
    pub video_end_line: u16,
    pub vsync_polarity: Polarity,

    /// Scanlines each framebuffer row is emitted for.
    pub line_repeat: u16,
    /// Framebuffer rows per frame.
    pub lines: u16,
    /// Bytes streamed per scanline (visible area plus blanked border).
    pub transfer_len: u16,
}

impl ScanoutPlan {
    /// The HSync period expressed in base pixel clocks, independent of how
    /// bytes map onto updates. 1056 for the 800x600 baseline.
    pub fn hsync_period_pixel_clocks(&self, clock: &ClockPlan) -> u32 {
        u32::from(self.hsync_period) * u32::from(self.master_reload)
            / u32::from(clock.pixel_reload)
    }

    /// The VSync period in whole scanlines. 628 for the baseline.
    pub fn vsync_period_lines(&self) -> u32 {
        u32::from(self.vsync_period)
    }

    /// Realised signal frequencies, for the configuration dump.
    pub fn frequencies(&self, clock: &ClockPlan) -> ScanoutFrequencies {
        let update_hz =
            clock.master_timer_hz() as f32 / f32::from(self.master_reload);
        let hsync_hz = update_hz / f32::from(self.hsync_period);
        ScanoutFrequencies {
            update_hz,
            hsync_hz,
            vsync_hz: hsync_hz / f32::from(self.vsync_period),
        }
    }
}

/// Realised frequencies of the three chained counters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScanoutFrequencies {
    /// Master update (byte) rate.
    pub update_hz: f32,
    /// Scanline rate.
    pub hsync_hz: f32,
    /// Frame rate.
    pub vsync_hz: f32,
}

/// Computes the scan-out plan for a mode.
///
/// `unscaled` carries the wire-level vertical structure (sync pulses must
/// match what the monitor expects); `scaled` is the reduced timing that
/// sized the framebuffer. Horizontal placement is derived from the scaled
/// timing in byte units, vertical placement from the unscaled one in lines,
/// with each framebuffer row repeated `scaling` times.
pub fn plan_scanout(
    clock: &ClockPlan,
    unscaled: &VideoFrameInfo,
    scaled: &VideoFrameInfo,
    scaling: u8,
    bpp: Bpp,
) -> Result<ScanoutPlan, VgaError> {
    if usize::from(unscaled.horizontal.visible) > crate::MAX_PIXELS_PER_LINE {
        return Err(VgaError::Unsupported);
    }

    let bytes = bpp.bytes_per_pixel() as u32;

    // One scaled pixel covers `pixel_reload * scaling` master counts and
    // `bytes` streamed bytes; the two must divide evenly or no integer
    // update rate exists.
    let counts_per_pixel = u32::from(clock.pixel_reload) * u32::from(scaling);
    if counts_per_pixel % bytes != 0 {
        return Err(VgaError::Unsupported);
    }
    let master_reload = counts_per_pixel / bytes;
    if master_reload < 2 {
        // The DMA controller cannot complete a transfer per count.
        return Err(VgaError::Unsupported);
    }

    let h = &scaled.horizontal;
    let hsync_period = h.whole() * bytes;
    if hsync_period > u32::from(u16::max_value()) {
        return Err(VgaError::InvalidParameter);
    }

    // The engine rearms the stream after end-of-active; the back porch is
    // the slack window that must absorb that latency.
    if u32::from(h.back_porch) * bytes < DMA_REARM_MIN_UPDATES {
        return Err(VgaError::Unsupported);
    }

    let sync = u32::from(h.sync_pulse) * bytes;
    let video_start = (u32::from(h.sync_pulse) + u32::from(h.back_porch))
        * bytes
        - u32::from(VIDEO_LEAD);
    let video_end = (u32::from(h.sync_pulse)
        + u32::from(h.back_porch)
        + u32::from(h.visible))
        * bytes;

    let v = &unscaled.vertical;
    let transfer_len =
        (u32::from(h.visible) + BORDER_PIXELS as u32) * bytes;

    Ok(ScanoutPlan {
        master_reload: master_reload as u16,
        hsync_period: hsync_period as u16,
        hsync_pulse: sync as u16,
        video_start: video_start as u16,
        video_end: video_end as u16,
        // Baseline mode drives both syncs active-low.
        hsync_polarity: Polarity::Negative,

        vsync_period: v.whole() as u16,
        vsync_pulse: v.sync_pulse,
        video_start_line: v.sync_pulse + v.back_porch,
        video_end_line: v.sync_pulse + v.back_porch + v.visible,
        vsync_polarity: Polarity::Negative,

        line_repeat: u16::from(scaling),
        lines: scaled.vertical.visible,
        transfer_len: transfer_len as u16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::timing::SVGA_800X600_60;

    fn baseline_plan(scaling: u8, bpp: Bpp) -> ScanoutPlan {
        let clock = clock::plan(SVGA_800X600_60.pixel_mhz).unwrap();
        let scaled = SVGA_800X600_60.scaled(scaling).unwrap();
        plan_scanout(&clock, &SVGA_800X600_60, &scaled, scaling, bpp).unwrap()
    }

    #[test]
    fn baseline_bpp8_scale2() {
        let clock = clock::plan(40.0).unwrap();
        let plan = baseline_plan(2, Bpp::Bpp8);

        // Three bytes per pixel across two pixel clocks.
        assert_eq!(plan.master_reload, 2);
        assert_eq!(plan.hsync_period, 528 * 3);
        assert_eq!(plan.hsync_period_pixel_clocks(&clock), 1056);
        assert_eq!(plan.vsync_period_lines(), 628);

        assert_eq!(plan.hsync_pulse, 64 * 3);
        assert_eq!(plan.video_end, (64 + 44 + 400) * 3);
        assert_eq!(plan.transfer_len, (400 + 4) * 3);

        assert_eq!(plan.vsync_pulse, 4);
        assert_eq!(plan.video_start_line, 27);
        assert_eq!(plan.video_end_line, 627);
        assert_eq!(plan.line_repeat, 2);
        assert_eq!(plan.lines, 300);
    }

    #[test]
    fn baseline_bpp3_scale2() {
        let clock = clock::plan(40.0).unwrap();
        let plan = baseline_plan(2, Bpp::Bpp3);

        assert_eq!(plan.master_reload, 6);
        assert_eq!(plan.hsync_period, 528);
        assert_eq!(plan.hsync_period_pixel_clocks(&clock), 1056);
        assert_eq!(plan.transfer_len, 404);
    }

    #[test]
    fn unscaled_bpp8_has_no_integer_update_rate() {
        let clock = clock::plan(40.0).unwrap();
        // 3 counts per pixel over 3 bytes would need an update every count.
        assert_eq!(
            plan_scanout(&clock, &SVGA_800X600_60, &SVGA_800X600_60, 1, Bpp::Bpp8),
            Err(VgaError::Unsupported)
        );
    }

    #[test]
    fn short_back_porch_refused() {
        let clock = clock::plan(40.0).unwrap();
        let mut frame = SVGA_800X600_60;
        frame.horizontal.back_porch = 10;
        frame.horizontal.front_porch = 118;
        let scaled = frame.scaled(2).unwrap();
        // 5 scaled pixels of back porch cannot absorb the rearm latency at
        // one byte per pixel.
        assert_eq!(
            plan_scanout(&clock, &frame, &scaled, 2, Bpp::Bpp3),
            Err(VgaError::Unsupported)
        );
    }

    #[test]
    fn frequencies_come_out_at_svga_rates() {
        let clock = clock::plan(40.0).unwrap();
        let plan = baseline_plan(2, Bpp::Bpp8);
        let freqs = plan.frequencies(&clock);
        assert_eq!(freqs.update_hz, 60e6);
        assert!((freqs.hsync_hz - 37_878.8).abs() < 1.0);
        assert!((freqs.vsync_hz - 60.3).abs() < 0.05);
    }
}
