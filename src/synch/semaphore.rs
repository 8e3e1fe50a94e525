use core::cell::RefCell;

use critical_section::Mutex;
use crossbeam_utils::Backoff;

use crate::errno::{Errno, Result};

struct SemaphoreState {
	/// Resource available count
	count: isize,
	/// Number of tasks currently blocked in [`Semaphore::acquire`]
	waiters: usize,
	/// Pending signal deliveries, each aborting one blocked wait
	interrupts: usize,
}

/// A counting, blocking, semaphore.
///
/// Semaphores are a form of atomic counter where access is only granted if the
/// counter is a positive value. Each acquisition will block the calling thread
/// until the counter is positive, and each release will increment the counter
/// and unblock any threads if necessary.
///
/// Waits are interruptible: [`Semaphore::interrupt`] models signal delivery
/// and makes one blocked `acquire` return [`Errno::Intr`]. The state is kept
/// behind a critical section, so `release` and `interrupt` may be called from
/// interrupt context.
pub struct Semaphore {
	state: Mutex<RefCell<SemaphoreState>>,
}

impl Semaphore {
	/// Creates a new semaphore with the initial count specified.
	///
	/// The count specified can be thought of as a number of resources, and a
	/// call to `acquire` will block until at least one resource is available.
	pub const fn new(count: isize) -> Self {
		Self {
			state: Mutex::new(RefCell::new(SemaphoreState {
				count,
				waiters: 0,
				interrupts: 0,
			})),
		}
	}

	/// Acquires a resource of this semaphore, blocking the current thread
	/// until it can do so or until the wait is interrupted.
	///
	/// This method will block until the internal count of the semaphore is at
	/// least 1. The blocked thread spins with an exponential backoff between
	/// checks; each check runs inside its own critical section, so posts from
	/// interrupt context get through while the caller is waiting.
	pub fn acquire(&self) -> Result<()> {
		let backoff = Backoff::new();

		critical_section::with(|cs| {
			self.state.borrow_ref_mut(cs).waiters += 1;
		});

		// Loop until we have acquired the semaphore or a signal aborts
		// the wait.
		let result = loop {
			let acquired = critical_section::with(|cs| {
				let mut locked_state = self.state.borrow_ref_mut(cs);

				if locked_state.interrupts > 0 {
					locked_state.interrupts -= 1;
					Some(Err(Errno::Intr))
				} else if locked_state.count > 0 {
					// Successfully acquired the semaphore.
					locked_state.count -= 1;
					Some(Ok(()))
				} else {
					None
				}
			});

			match acquired {
				Some(result) => break result,
				None => backoff.snooze(),
			}
		};

		critical_section::with(|cs| {
			self.state.borrow_ref_mut(cs).waiters -= 1;
		});

		result
	}

	/// Attempts to acquire a resource without blocking.
	pub fn try_acquire(&self) -> bool {
		critical_section::with(|cs| {
			let mut locked_state = self.state.borrow_ref_mut(cs);

			if locked_state.count > 0 {
				locked_state.count -= 1;
				true
			} else {
				false
			}
		})
	}

	/// Release a resource from this semaphore.
	///
	/// This will increment the number of resources in this semaphore by 1 and
	/// will notify any pending waiters in `acquire` if necessary.
	pub fn release(&self) {
		critical_section::with(|cs| {
			self.state.borrow_ref_mut(cs).count += 1;
		});
	}

	/// Delivers a signal to the semaphore.
	///
	/// If a thread is blocked in [`Semaphore::acquire`], one wait aborts with
	/// [`Errno::Intr`]. Without waiters this is a no-op, so a signal cannot
	/// poison a later wait. Returns whether a waiter was interrupted.
	pub fn interrupt(&self) -> bool {
		critical_section::with(|cs| {
			let mut locked_state = self.state.borrow_ref_mut(cs);

			if locked_state.waiters > locked_state.interrupts {
				locked_state.interrupts += 1;
				true
			} else {
				false
			}
		})
	}
}
