//! Clock tree planning.
//!
//! Computes the divisor chain from the 8 MHz external oscillator through the
//! PLL down to the master timer tick that paces pixel emission. The plan is
//! plain numbers so it can be checked on the host; the driver translates it
//! into RCC/flash register writes when a mode is applied.

use crate::VgaError;

/// Clock config parameters for the RCC when using the High Speed External
/// option with the PLL.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockConfig {
    pub crystal_hz: u32,
    /// PLLM: divides the crystal down to the 1-2 MHz PLL input.
    pub crystal_divisor: u8,
    /// PLLN: VCO multiplier.
    pub vco_multiplier: u16,
    /// PLLP: divides the VCO down to SYSCLK.
    pub general_divisor: u8,
    /// PLLQ: divides the VCO for the 48MHz-ish SDIO/USB domain.
    pub pll48_divisor: u8,

    pub ahb_divisor: u16,
    pub apb1_divisor: u8,
    pub apb2_divisor: u8,

    /// Flash wait states required at the resulting AHB frequency.
    pub flash_latency: u8,
}

impl ClockConfig {
    pub fn vco_hz(&self) -> u32 {
        self.crystal_hz / u32::from(self.crystal_divisor)
            * u32::from(self.vco_multiplier)
    }

    pub fn sysclk_hz(&self) -> u32 {
        self.vco_hz() / u32::from(self.general_divisor)
    }

    pub fn ahb_hz(&self) -> u32 {
        self.sysclk_hz() / u32::from(self.ahb_divisor)
    }

    pub fn apb1_hz(&self) -> u32 {
        self.ahb_hz() / u32::from(self.apb1_divisor)
    }

    pub fn apb2_hz(&self) -> u32 {
        self.ahb_hz() / u32::from(self.apb2_divisor)
    }

    /// Clock seen by APB2 timers: doubled whenever the APB prescaler is not
    /// unity.
    pub fn apb2_timer_hz(&self) -> u32 {
        if self.apb2_divisor > 1 {
            self.apb2_hz() * 2
        } else {
            self.apb2_hz()
        }
    }

    /// Clock seen by APB1 timers.
    pub fn apb1_timer_hz(&self) -> u32 {
        if self.apb1_divisor > 1 {
            self.apb1_hz() * 2
        } else {
            self.apb1_hz()
        }
    }
}

/// The clock tree for the 40 MHz baseline: 8 MHz HSE / 4 * 120 / 2 =
/// 120 MHz SYSCLK, APB2 at /2 so its timers run at the full 120 MHz.
pub const BASELINE_CONFIG: ClockConfig = ClockConfig {
    crystal_hz: 8_000_000,
    crystal_divisor: 4,
    vco_multiplier: 120,
    general_divisor: 2,
    pll48_divisor: 7,

    ahb_divisor: 1,
    apb1_divisor: 4,
    apb2_divisor: 2,

    // 3 wait states for 120MHz at 3.3V.
    flash_latency: 3,
};

/// A realisable pixel-clock plan.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClockPlan {
    pub config: ClockConfig,
    /// Master timer counts per base pixel clock.
    pub pixel_reload: u16,
    /// The pixel frequency the chain actually produces.
    pub realized_mhz: f32,
}

impl ClockPlan {
    /// Frequency of the clock feeding the master pixel timer.
    pub fn master_timer_hz(&self) -> u32 {
        self.config.apb2_timer_hz()
    }
}

/// Chooses multipliers and divisors so the master timer's update event
/// occurs every `1/pixel_clock` seconds.
///
/// Only the 40 MHz baseline is accepted for now; the divisor search is a
/// table lookup until another mode needs one.
pub fn plan(requested_mhz: f32) -> Result<ClockPlan, VgaError> {
    if requested_mhz <= 0.0 {
        return Err(VgaError::InvalidParameter);
    }

    // 120 MHz timer clock / 3 = 40 MHz.
    if (requested_mhz - 40.0).abs() > 1e-3 {
        return Err(VgaError::Unsupported);
    }

    let config = BASELINE_CONFIG;
    let pixel_reload = 3;
    let realized_mhz =
        config.apb2_timer_hz() as f32 / f32::from(pixel_reload) / 1e6;

    Ok(ClockPlan {
        config,
        pixel_reload,
        realized_mhz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_chain() {
        let config = BASELINE_CONFIG;
        assert_eq!(config.vco_hz(), 240_000_000);
        assert_eq!(config.sysclk_hz(), 120_000_000);
        assert_eq!(config.ahb_hz(), 120_000_000);
        assert_eq!(config.apb1_hz(), 30_000_000);
        assert_eq!(config.apb2_timer_hz(), 120_000_000);
    }

    #[test]
    fn baseline_realizes_exactly() {
        let plan = plan(40.0).unwrap();
        assert_eq!(plan.pixel_reload, 3);
        assert_eq!(plan.realized_mhz, 40.0);
    }

    #[test]
    fn other_rates_unsupported() {
        assert_eq!(plan(25.175), Err(VgaError::Unsupported));
        assert_eq!(plan(65.0), Err(VgaError::Unsupported));
        assert_eq!(plan(-1.0), Err(VgaError::InvalidParameter));
    }
}
