//! Mode negotiation: deciding whether a visualization request can be
//! honoured on this hardware and this monitor.

use smart_default::SmartDefault;

use crate::clock::{self, ClockPlan};
use crate::edid::{Edid, EstablishedTiming};
use crate::scanout::{self, ScanoutPlan};
use crate::screen::{Bpp, FrameBuffer};
use crate::timing::{VideoFrameInfo, SVGA_800X600_60};
use crate::VgaError;

/// What the application wants on the wire and in memory.
#[derive(Copy, Clone, Debug, SmartDefault)]
pub struct VisualizationRequest {
    /// Requested wire timing.
    #[default(SVGA_800X600_60)]
    pub frame: VideoFrameInfo,
    /// Each source pixel covers this many pixel clocks and scanlines.
    #[default(2)]
    pub scaling: u8,
    #[default(Bpp::Bpp3)]
    pub bits_per_pixel: Bpp,
    pub double_buffered: bool,
    /// Accept the mode even when the EDID does not advertise it.
    pub override_edid: bool,
}

/// A fully negotiated mode, ready for the engine to apply.
#[derive(Copy, Clone, Debug)]
pub struct ModePlan {
    pub request: VisualizationRequest,
    /// The reduced timing that sizes the framebuffer.
    pub scaled: VideoFrameInfo,
    pub clock: ClockPlan,
    pub scanout: ScanoutPlan,
    /// Arena bytes the framebuffer will claim.
    pub framebuffer_bytes: usize,
}

/// Modes we can recognise in the established-timing bitmap, as
/// `(visible pixels, visible lines, refresh)`.
const ESTABLISHED_MODES: &[(u16, u16, u16, EstablishedTiming)] = &[
    (800, 600, 60, EstablishedTiming::X800x600At60),
    (800, 600, 56, EstablishedTiming::X800x600At56),
    (640, 480, 75, EstablishedTiming::X640x480At75),
    (640, 480, 72, EstablishedTiming::X640x480At72),
    (640, 480, 67, EstablishedTiming::X640x480At67),
    (640, 480, 60, EstablishedTiming::X640x480At60),
    (720, 400, 88, EstablishedTiming::X720x400At88),
    (720, 400, 70, EstablishedTiming::X720x400At70),
    (1024, 768, 60, EstablishedTiming::X1024x768At60),
];

fn advertised(edid: &Edid, frame: &VideoFrameInfo) -> bool {
    let width = frame.horizontal.visible;
    let height = frame.vertical.visible;
    let refresh = (frame.refresh_hz() + 0.5) as u16;

    for &(w, h, hz, timing) in ESTABLISHED_MODES {
        if w == width && h == height && hz == refresh && edid.supports(timing)
        {
            return true;
        }
    }

    edid.standard_timings()
        .iter()
        .any(|t| t.x_resolution == width && u16::from(t.refresh_hz) == refresh)
}

/// Decides whether `request` is acceptable: the timing must validate (before
/// and after scaling), the clock and scan-out plans must be feasible, the
/// framebuffer must fit `arena_budget`, and the monitor must advertise the
/// mode unless the caller overrides.
pub fn select(
    edid: &Edid,
    request: &VisualizationRequest,
    arena_budget: usize,
) -> Result<ModePlan, VgaError> {
    if request.scaling == 0 {
        return Err(VgaError::InvalidParameter);
    }
    request.frame.validate()?;

    let scaled = request.frame.scaled(request.scaling)?;
    let clock = clock::plan(request.frame.pixel_mhz)?;
    let scanout = scanout::plan_scanout(
        &clock,
        &request.frame,
        &scaled,
        request.scaling,
        request.bits_per_pixel,
    )?;

    let framebuffer_bytes = FrameBuffer::bytes_required(
        request.bits_per_pixel,
        scaled.horizontal.visible,
        scaled.vertical.visible,
        request.double_buffered,
    );
    if framebuffer_bytes > arena_budget {
        return Err(VgaError::OutOfMemory);
    }

    if !request.override_edid && !advertised(edid, &request.frame) {
        return Err(VgaError::Unsupported);
    }

    Ok(ModePlan {
        request: *request,
        scaled,
        clock,
        scanout,
        framebuffer_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edid::{BLOCK_SIZE, HEADER_PATTERN};
    use crate::timing::Timing;

    fn edid_with(f: impl FnOnce(&mut [u8; BLOCK_SIZE])) -> Edid {
        let mut block = [0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&HEADER_PATTERN);
        f(&mut block);
        let sum = block[..127]
            .iter()
            .fold(0u8, |sum, &b| sum.wrapping_add(b));
        block[127] = sum.wrapping_neg();
        Edid::from_bytes(block).unwrap()
    }

    fn svga_edid() -> Edid {
        // Established bitmap advertising 800x600@60 (byte 0, bit 0).
        edid_with(|b| b[35] = 1 << 0)
    }

    #[test]
    fn boot_to_output_request_accepted() {
        let request = VisualizationRequest {
            bits_per_pixel: Bpp::Bpp8,
            double_buffered: true,
            ..VisualizationRequest::default()
        };

        let plan = select(&svga_edid(), &request, 1 << 20).unwrap();
        let clock = plan.clock;
        assert_eq!(plan.scanout.hsync_period_pixel_clocks(&clock), 1056);
        assert_eq!(plan.scanout.vsync_period_lines(), 628);
        assert_eq!(plan.scaled.horizontal.visible, 400);
        assert_eq!(plan.scaled.vertical.visible, 300);
    }

    #[test]
    fn mode_not_advertised_is_refused() {
        let blank = edid_with(|_| ());
        let request = VisualizationRequest::default();
        assert!(matches!(
            select(&blank, &request, 1 << 20),
            Err(VgaError::Unsupported)
        ));

        // ... unless the caller overrides.
        let request = VisualizationRequest {
            override_edid: true,
            ..request
        };
        assert!(select(&blank, &request, 1 << 20).is_ok());
    }

    #[test]
    fn standard_timing_slot_counts_as_advertised() {
        let edid = edid_with(|b| {
            for slot in b[38..54].chunks_exact_mut(2) {
                slot.copy_from_slice(&[0x01, 0x01]);
            }
            b[38] = 69; // (800 / 8) - 31
            b[39] = 0x40; // 4:3, 60Hz
        });
        assert!(select(&edid, &VisualizationRequest::default(), 1 << 20).is_ok());
    }

    #[test]
    fn invalid_timing_is_rejected_before_anything_else() {
        let mut request = VisualizationRequest::default();
        request.frame.horizontal = Timing::new(100, 200, 10, 10);
        assert!(matches!(
            select(&svga_edid(), &request, 1 << 20),
            Err(VgaError::InvalidParameter)
        ));
    }

    #[test]
    fn arena_budget_enforced() {
        // A 128KiB arena holds the single-buffered Bpp3 framebuffer but not
        // the double-buffered one.
        let single = VisualizationRequest::default();
        let plan = select(&svga_edid(), &single, 128 * 1024).unwrap();
        assert_eq!(plan.framebuffer_bytes, 404 * 300);

        let double = VisualizationRequest {
            double_buffered: true,
            ..single
        };
        assert!(matches!(
            select(&svga_edid(), &double, 128 * 1024),
            Err(VgaError::OutOfMemory)
        ));
    }
}
