//! Interrupt loan cells.
//!
//! The driver's interrupt handlers own nothing; every piece of hardware or
//! state they touch is loaned to them through one of these cells. The
//! protocol has two sides:
//!
//! * task code fills, revokes or updates the slot with [`Loan::attend`],
//!   and must keep the claiming interrupts masked while it does;
//! * handlers borrow the value with [`Loan::claim`] when a missing loan
//!   would mean the interrupt was wired up wrong, or [`Loan::try_claim`]
//!   when firing with nothing loaned is a legal quiet state.
//!
//! There is deliberately no blocking lock here: a handler cannot wait, so
//! the only meaningful contended behaviours are "this is a bug" (claim)
//! and "nothing to do" (try_claim).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A slot loaning a `T` from task code to interrupt handlers.
#[derive(Debug)]
pub struct Loan<T> {
    held: AtomicBool,
    slot: UnsafeCell<Option<T>>,
}

unsafe impl<T: Send> Sync for Loan<T> {}

impl<T> Loan<T> {
    /// A cell with nothing loaned; the usual form of the `static`.
    pub const fn empty() -> Self {
        Loan {
            held: AtomicBool::new(false),
            slot: UnsafeCell::new(None),
        }
    }

    fn acquire(&self) -> bool {
        // Observing the false->true transition makes the slot ours until
        // release.
        !self.held.swap(true, Ordering::Acquire)
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Task-side access to the slot itself: lend a value by writing
    /// `Some`, revoke one by `take`, or adjust it in place.
    ///
    /// Spins out any concurrent claim, which a handler holds only for the
    /// duration of one interrupt. The caller must mask the handlers that
    /// claim this cell before attending it, or a claim landing mid-attend
    /// will panic.
    pub fn attend<R>(&self, body: impl FnOnce(&mut Option<T>) -> R) -> R {
        while !self.acquire() {}
        // Safety: the flag handoff gives us the slot exclusively.
        let result = body(unsafe { &mut *self.slot.get() });
        self.release();
        result
    }

    /// Borrows the loaned value from a handler, or from task code that has
    /// the claiming handlers masked.
    ///
    /// # Panics
    ///
    /// If the cell is contended or empty. Both mean an interrupt was left
    /// enabled while its loan was being changed; that is a protocol
    /// violation in the driver, not a runtime condition.
    pub fn claim(&self) -> LoanGuard<T> {
        assert!(self.acquire(), "loan cell held at claim");
        // Safety: flag held, so the slot is ours until the guard drops.
        match unsafe { &mut *self.slot.get() } {
            Some(value) => LoanGuard {
                held: &self.held,
                value,
            },
            None => {
                self.release();
                panic!("claim on an empty loan cell");
            }
        }
    }

    /// Borrows the loaned value if it is quietly available: `None` when
    /// the task side holds the cell or nothing is loaned.
    pub fn try_claim(&self) -> Option<LoanGuard<T>> {
        if !self.acquire() {
            return None;
        }
        // Safety: flag held, as in `claim`.
        match unsafe { &mut *self.slot.get() } {
            Some(value) => Some(LoanGuard {
                held: &self.held,
                value,
            }),
            None => {
                self.release();
                None
            }
        }
    }
}

/// Exclusive access to a loaned value. Dropping the guard returns the cell.
#[must_use = "dropping the guard immediately returns the loan"]
#[derive(Debug)]
pub struct LoanGuard<'a, T> {
    held: &'a AtomicBool,
    value: &'a mut T,
}

impl<'a, T> Deref for LoanGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}

impl<'a, T> DerefMut for LoanGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<'a, T> Drop for LoanGuard<'a, T> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lend_claim_revoke() {
        let cell: Loan<u32> = Loan::empty();
        assert!(cell.try_claim().is_none());

        cell.attend(|slot| *slot = Some(7));
        {
            let mut value = cell.claim();
            *value += 1;
            // The handler holds the cell; a second claim must not succeed.
            assert!(cell.try_claim().is_none());
        }

        assert_eq!(cell.attend(|slot| slot.take()), Some(8));
        assert!(cell.try_claim().is_none());
    }

    #[test]
    fn attend_can_update_in_place() {
        let cell: Loan<(u32, u32)> = Loan::empty();
        cell.attend(|slot| *slot = Some((1, 2)));
        cell.attend(|slot| slot.as_mut().unwrap().1 = 9);
        assert_eq!(cell.claim().1, 9);
    }

    #[test]
    #[should_panic(expected = "empty loan cell")]
    fn claim_without_a_loan_is_a_bug() {
        let cell: Loan<u32> = Loan::empty();
        let _ = cell.claim();
    }
}
