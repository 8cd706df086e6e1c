//! DDC2B transport: reads the monitor's EDID over I2C2 and probes for
//! monitor presence.
//!
//! The 128-byte read runs interrupt-driven: the event ISR walks the master
//! receive sequence, the error ISR maps bus failures, and both finish by
//! posting an event flag for the connection task. The presence probe is a
//! short polled address ping, used only every few seconds.
//!
//! Wire the vectors like so:
//!
//! ```ignore
//! #[interrupt]
//! fn I2C2_EV() {
//!     vgaview::driver::ddc::event_isr()
//! }
//!
//! #[interrupt]
//! fn I2C2_ER() {
//!     vgaview::driver::ddc::error_isr()
//! }
//! ```

use stm32f4::stm32f407 as device;

use crate::driver::ticks;
use crate::edid::{BLOCK_SIZE, DDC_DEVICE_ADDRESS};
use crate::util::event::EventFlags;
use crate::util::loan::Loan;

/// An EDID block has been received and is waiting in the buffer.
pub const EVT_COMPLETE: u32 = 1 << 0;
/// The transfer failed; the error is waiting in the state.
pub const EVT_ERROR: u32 = 1 << 1;

/// DDC-to-task event channel.
pub static EVENTS: EventFlags = EventFlags::new();

/// Two-wire transport failures, in the order the hardware reports them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DdcError {
    /// SDA or SCL held low by someone else; nothing we can do but retry
    /// later.
    BusBusy,
    /// Misplaced start/stop condition on the bus.
    BusError,
    /// The monitor (or nothing) did not acknowledge its address or a byte.
    NotAcknowledged,
    /// Lost the bus to another master.
    ArbitrationLost,
    /// The probe or transfer outran its deadline.
    Timeout,
}

struct DdcState {
    i2c: device::I2C2,
    buffer: [u8; BLOCK_SIZE],
    index: usize,
    transfer_active: bool,
    error: Option<DdcError>,
}

static DDC: Loan<DdcState> = Loan::empty();

/// Takes ownership of I2C2 and configures it for the 100 kHz DDC bus.
/// `pclk1_hz` is the running APB1 frequency; the peripheral clock must
/// already be enabled.
pub fn init(i2c: device::I2C2, pclk1_hz: u32) {
    let freq_mhz = pclk1_hz / 1_000_000;

    i2c.cr1.modify(|_, w| w.pe().clear_bit());
    i2c.cr2
        .write(|w| unsafe { w.freq().bits(freq_mhz as u8) });
    // Standard mode, 100 kHz: CCR = pclk / (2 * 100 kHz).
    i2c.ccr
        .write(|w| unsafe { w.ccr().bits((pclk1_hz / 200_000) as u16) });
    // Maximum SCL rise time in standard mode: 1000 ns, so FREQ + 1 ticks.
    i2c.trise
        .write(|w| unsafe { w.bits(freq_mhz + 1) });

    DDC.attend(|slot| {
        *slot = Some(DdcState {
            i2c,
            buffer: [0; BLOCK_SIZE],
            index: 0,
            transfer_active: false,
            error: None,
        })
    });
}

/// Begins an interrupt-driven 128-byte EDID read from device 0x50,
/// offset 0 with auto-increment. Completion or failure arrives through
/// [`EVENTS`].
pub fn start_edid_read() -> Result<(), DdcError> {
    DDC.attend(|slot| {
        let state = slot.as_mut().expect("DDC used before init");

        // If the bus was busy when the peripheral was enabled, the BUSY
        // flag sticks until the interface is disabled. Cycling PE before
        // every transfer clears the stale flag and resets the transfer
        // engine.
        state.i2c.cr1.modify(|_, w| w.pe().clear_bit());
        state.i2c.cr1.modify(|_, w| w.pe().set_bit());

        if state.i2c.sr2.read().busy().bit_is_set() {
            return Err(DdcError::BusBusy);
        }

        state.index = 0;
        state.error = None;
        state.transfer_active = true;
        EVENTS.take(EVT_COMPLETE | EVT_ERROR);

        // ACK every byte until the tail of the block, and arm the
        // interrupts. Nothing fires until the start condition goes out
        // after the loan is back in the cell.
        state.i2c.cr1.modify(|_, w| w.ack().set_bit());
        state.i2c.cr2.modify(|_, w| {
            w.itevten().set_bit().iterren().set_bit().itbufen().set_bit()
        });
        Ok(())
    })?;

    // The cell must be claimable before the first event needs service.
    // Safety: a lone atomic read-modify-write of the start bit.
    unsafe { &*device::I2C2::ptr() }
        .cr1
        .modify(|_, w| w.start().set_bit());
    Ok(())
}

/// Copies out the received block after [`EVT_COMPLETE`], or the error
/// after [`EVT_ERROR`].
pub fn take_result() -> Result<[u8; BLOCK_SIZE], DdcError> {
    DDC.attend(|slot| {
        let state = slot.as_mut().expect("DDC used before init");
        match state.error.take() {
            Some(error) => Err(error),
            None => Ok(state.buffer),
        }
    })
}

/// Aborts an in-flight transfer, e.g. when the monitor disappears
/// mid-read. The bus is released with a stop condition.
pub fn abort() {
    DDC.attend(|slot| {
        let state = slot.as_mut().expect("DDC used before init");
        disarm(state);
        state.i2c.cr1.modify(|_, w| w.stop().set_bit());
        state.transfer_active = false;
    });
}

/// Polled liveness probe: pings the EDID address and reports whether
/// anything acknowledged within `timeout_ms`, retrying `retries` extra
/// times. Runs without interrupts so it can be called from the main task
/// loop between frames.
pub fn device_ready(timeout_ms: u32, retries: u32) -> bool {
    DDC.attend(|slot| {
        let state = slot.as_mut().expect("DDC used before init");
        for _ in 0..=retries {
            if ping(&state.i2c, timeout_ms) {
                return true;
            }
        }
        false
    })
}

fn ping(i2c: &device::I2C2, timeout_ms: u32) -> bool {
    i2c.cr1.modify(|_, w| w.pe().clear_bit());
    i2c.cr1.modify(|_, w| w.pe().set_bit());

    let deadline = ticks::now_ms().wrapping_add(timeout_ms);
    let expired = || (ticks::now_ms().wrapping_sub(deadline) as i32) >= 0;

    i2c.cr1.modify(|_, w| w.start().set_bit());
    while !i2c.sr1.read().sb().bit_is_set() {
        if expired() {
            return false;
        }
    }

    // Address + write bit; any acknowledge proves a monitor is attached.
    i2c.dr
        .write(|w| unsafe { w.bits(u32::from(DDC_DEVICE_ADDRESS) << 1) });
    loop {
        let sr1 = i2c.sr1.read();
        if sr1.addr().bit_is_set() {
            let _ = i2c.sr2.read();
            i2c.cr1.modify(|_, w| w.stop().set_bit());
            return true;
        }
        if sr1.af().bit_is_set() {
            i2c.sr1.modify(|_, w| w.af().clear_bit());
            i2c.cr1.modify(|_, w| w.stop().set_bit());
            return false;
        }
        if expired() {
            i2c.cr1.modify(|_, w| w.stop().set_bit());
            return false;
        }
    }
}

fn disarm(state: &mut DdcState) {
    state.i2c.cr2.modify(|_, w| {
        w.itevten()
            .clear_bit()
            .iterren()
            .clear_bit()
            .itbufen()
            .clear_bit()
    });
}

/// I2C2 event ISR: drives the master-receive sequence.
pub fn event_isr() {
    // The task side only attends the cell while no transfer is in flight
    // (setup, result pickup, abort, presence ping), so an unavailable loan
    // means there is nothing for us to do.
    let mut state = match DDC.try_claim() {
        Some(state) => state,
        None => return,
    };
    if !state.transfer_active {
        return;
    }
    let state = &mut *state;

    let sr1 = state.i2c.sr1.read();

    if sr1.sb().bit_is_set() {
        // Start condition sent: follow with address + read bit.
        state.i2c.dr.write(|w| unsafe {
            w.bits((u32::from(DDC_DEVICE_ADDRESS) << 1) | 1)
        });
        return;
    }

    if sr1.addr().bit_is_set() {
        // Address acknowledged; reading SR2 releases the stretch.
        let _ = state.i2c.sr2.read();
        return;
    }

    if sr1.rx_ne().bit_is_set() {
        let byte = state.i2c.dr.read().bits() as u8;
        if state.index < BLOCK_SIZE {
            state.buffer[state.index] = byte;
            state.index += 1;
        }

        match BLOCK_SIZE - state.index {
            // NACK the byte after next and stop after it, per the N > 2
            // master receive sequence.
            1 => {
                state
                    .i2c
                    .cr1
                    .modify(|_, w| w.ack().clear_bit().stop().set_bit());
            }
            0 => {
                disarm(state);
                state.transfer_active = false;
                EVENTS.post(EVT_COMPLETE);
            }
            _ => {}
        }
    }
}

/// I2C2 error ISR: maps the failure and wakes the connection task.
pub fn error_isr() {
    let mut state = match DDC.try_claim() {
        Some(state) => state,
        None => return,
    };
    if !state.transfer_active {
        return;
    }
    let state = &mut *state;

    let sr1 = state.i2c.sr1.read();
    let error = if sr1.berr().bit_is_set() {
        Some(DdcError::BusError)
    } else if sr1.af().bit_is_set() {
        Some(DdcError::NotAcknowledged)
    } else if sr1.arlo().bit_is_set() {
        Some(DdcError::ArbitrationLost)
    } else if sr1.timeout().bit_is_set() {
        Some(DdcError::Timeout)
    } else if sr1.ovr().bit_is_set() {
        // We are the only master and never act as a slave; an overrun here
        // is a driver bug, not a bus condition.
        panic!("I2C overrun as bus master");
    } else {
        None
    };

    // Clear whatever error bits are set and release the bus.
    state.i2c.sr1.modify(|_, w| {
        w.berr()
            .clear_bit()
            .af()
            .clear_bit()
            .arlo()
            .clear_bit()
            .timeout()
            .clear_bit()
            .ovr()
            .clear_bit()
    });

    if let Some(error) = error {
        disarm(state);
        state.i2c.cr1.modify(|_, w| w.stop().set_bit());
        state.transfer_active = false;
        state.error = Some(error);
        EVENTS.post(EVT_ERROR);
    }
}
