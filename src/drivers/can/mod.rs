//! Upper half of the CAN character-device driver.
//!
//! The upper half owns the software state between user threads and a
//! controller-specific lower half: a three-cursor transmit ring, a receive
//! ring, and a rendezvous table for remote-transmission requests. User
//! threads enter through the facade (`open`/`close`/`read`/`write`/
//! `ioctl`); the lower half enters through the interrupt-side callbacks
//! (`receive`/`txdone`/`txready`).
//!
//! All shared state is mutated inside critical sections, the saved-and-
//! restored interrupt mask of the target. Blocking waits sit outside the
//! masked regions and re-validate their predicate after every wake-up.

use core::cell::RefCell;
#[cfg(feature = "txready")]
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use critical_section::{CriticalSection, Mutex};
use embedded_can::Id;
use zerocopy::FromBytes;

pub mod frame;
mod lower;
mod ring;
mod rtr;


use self::frame::{msglen, CanHdr, CanMsg, HEADER_SIZE};
use self::ring::{RxRing, TxRing};
use self::rtr::RtrTable;
use crate::config::{DEFAULT_RTR_SLOTS, DEFAULT_RX_SLOTS, DEFAULT_TX_SLOTS};
use crate::drivers::Platform;
#[cfg(feature = "txready")]
use crate::drivers::WorkPriority;
use crate::errno::{Errno, Result};
use crate::synch::semaphore::Semaphore;

pub use self::lower::CanLowerHalf;

/// Poll interval of the drain loops in [`CanDriver::close`].
const DRAIN_POLL_MSEC: u32 = 500;

#[cfg(feature = "txready")]
const TXREADY_WORK_PRIORITY: WorkPriority = if cfg!(feature = "txready-lopri") {
	WorkPriority::Low
} else {
	WorkPriority::High
};

bitflags! {
	/// File status flags of the handle performing an operation.
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
	pub struct OpenFlags: u32 {
		/// Fail with [`Errno::Again`] instead of blocking.
		const NONBLOCK = 0o4000;
	}
}

#[cfg(feature = "errors")]
bitflags! {
	/// Interrupt-side error conditions latched until the next `read`.
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
	pub struct ErrorLatch: u8 {
		/// An inbound frame was dropped because the receive ring was full.
		const RX_OVERFLOW = 1 << 0;
	}
}

/// Commands accepted by [`CanDriver::ioctl`].
pub enum CanIoctl<'a> {
	/// Transmits a remote-transmission request for `id` and blocks until a
	/// frame with that identifier arrives, which is stored in `msg`.
	RtrRead { id: Id, msg: &'a mut CanMsg },
	/// Any other command, forwarded verbatim to the lower half.
	Lower { cmd: u32, arg: usize },
}

struct CanState<const N_TX: usize, const N_RX: usize, const N_RTR: usize> {
	tx: TxRing<N_TX>,
	rx: RxRing<N_RX>,
	rtr: RtrTable<N_RTR>,
	open_count: u8,
	n_tx_waiters: u32,
	n_rx_waiters: u32,
	#[cfg(feature = "errors")]
	error_latch: ErrorLatch,
}

impl<const N_TX: usize, const N_RX: usize, const N_RTR: usize> CanState<N_TX, N_RX, N_RTR> {
	const fn new() -> Self {
		Self {
			tx: TxRing::new(),
			rx: RxRing::new(),
			rtr: RtrTable::new(),
			open_count: 0,
			n_tx_waiters: 0,
			n_rx_waiters: 0,
			#[cfg(feature = "errors")]
			error_latch: ErrorLatch::empty(),
		}
	}
}

/// The upper-half driver for one CAN controller.
///
/// The embedding kernel registers one instance per controller under a
/// device node and routes the node's operations to the facade methods; the
/// lower half keeps a long-lived reference for the interrupt-side
/// callbacks.
pub struct CanDriver<
	D,
	P,
	const N_TX: usize = { DEFAULT_TX_SLOTS },
	const N_RX: usize = { DEFAULT_RX_SLOTS },
	const N_RTR: usize = { DEFAULT_RTR_SLOTS },
> {
	dev: D,
	platform: P,
	state: Mutex<RefCell<CanState<N_TX, N_RX, N_RTR>>>,
	/// Posted when a transmit slot frees up and writers are waiting.
	txsem: Semaphore,
	/// Posted when a frame enters the receive ring and readers are waiting.
	rxsem: Semaphore,
	/// Serializes `open` and `close` bodies end-to-end.
	closesem: Semaphore,
	/// One rendezvous wake-up per remote-request slot.
	rtrsems: [Semaphore; N_RTR],
	#[cfg(feature = "txready")]
	work_pending: AtomicBool,
}

impl<D, P, const N_TX: usize, const N_RX: usize, const N_RTR: usize>
	CanDriver<D, P, N_TX, N_RX, N_RTR>
where
	D: CanLowerHalf,
	P: Platform,
{
	const CAPACITY_OK: () = assert!(N_TX >= 2 && N_RX >= 2, "ring capacity must be at least 2");

	/// Creates the driver around its lower half and platform services.
	///
	/// All counters start at zero and the rings empty; the hardware is not
	/// touched until the first `open`.
	pub const fn new(dev: D, platform: P) -> Self {
		#[allow(clippy::let_unit_value)]
		let () = Self::CAPACITY_OK;
		Self {
			dev,
			platform,
			state: Mutex::new(RefCell::new(CanState::new())),
			txsem: Semaphore::new(0),
			rxsem: Semaphore::new(0),
			closesem: Semaphore::new(1),
			rtrsems: [const { Semaphore::new(0) }; N_RTR],
			#[cfg(feature = "txready")]
			work_pending: AtomicBool::new(false),
		}
	}

	/// The lower half this driver feeds.
	pub fn lower(&self) -> &D {
		&self.dev
	}

	fn with_state<R>(
		&self,
		cs: CriticalSection<'_>,
		f: impl FnOnce(&mut CanState<N_TX, N_RX, N_RTR>) -> R,
	) -> R {
		f(&mut self.state.borrow_ref_mut(cs))
	}

	/// Opens the device.
	///
	/// The first open sets up the hardware, empties the rings and enables
	/// receive interrupts; later opens only count.
	pub fn open(&self) -> Result<()> {
		self.closesem.acquire()?;
		let result = critical_section::with(|cs| {
			let open_count = self.with_state(cs, |state| state.open_count);
			let Some(count) = open_count.checked_add(1) else {
				return Err(Errno::Mfile);
			};
			if count == 1 {
				debug!("Setting up the CAN controller");
				if let Err(err) = self.dev.setup() {
					error!("CAN controller setup failed: {err}");
					return Err(err);
				}
				self.with_state(cs, |state| {
					state.tx.reset();
					state.rx.reset();
					state.rtr.reset();
				});
				self.dev.rxint(true);
			}
			self.with_state(cs, |state| state.open_count = count);
			Ok(())
		});
		self.closesem.release();
		result
	}

	/// Closes the device.
	///
	/// The last close drains the transmit ring and the hardware FIFO by
	/// polling, then shuts the hardware down. The drains ignore errors and
	/// block for as long as the hardware needs.
	pub fn close(&self) -> Result<()> {
		self.closesem.acquire()?;
		let last = critical_section::with(|cs| {
			self.with_state(cs, |state| {
				if state.open_count > 1 {
					state.open_count -= 1;
					false
				} else {
					state.open_count = 0;
					true
				}
			})
		});
		if last {
			debug!("Draining and shutting down the CAN controller");
			self.dev.rxint(false);
			while !critical_section::with(|cs| self.with_state(cs, |state| state.tx.is_empty())) {
				self.platform.sleep_msec(DRAIN_POLL_MSEC);
			}
			while !self.dev.txempty() {
				self.platform.sleep_msec(DRAIN_POLL_MSEC);
			}
			critical_section::with(|_cs| self.dev.shutdown());
		}
		self.closesem.release();
		Ok(())
	}

	/// Reads serialized frames into `buf`.
	///
	/// Blocks until at least one frame is available unless the handle is
	/// non-blocking, then drains greedily while the next frame fits.
	/// Returns 0 if `buf` cannot hold a minimum-size frame.
	pub fn read(&self, buf: &mut [u8], flags: OpenFlags) -> Result<usize> {
		if buf.len() < msglen(0) {
			return Ok(0);
		}
		loop {
			let outcome = critical_section::with(|cs| {
				self.with_state(cs, |state| {
					#[cfg(feature = "errors")]
					if !state.error_latch.is_empty() {
						let msg = CanMsg::error_frame(state.error_latch.bits());
						let wire = msg.wire_bytes();
						if buf.len() < wire.len() {
							// Nothing is consumed; the latch survives
							// until a large enough read comes along.
							return Some(Ok(0));
						}
						state.error_latch = ErrorLatch::empty();
						buf[..wire.len()].copy_from_slice(wire);
						return Some(Ok(wire.len()));
					}
					if !state.rx.is_empty() {
						return Some(Ok(state.rx.pop_into(buf)));
					}
					if flags.contains(OpenFlags::NONBLOCK) {
						return Some(Err(Errno::Again));
					}
					state.n_rx_waiters += 1;
					None
				})
			});
			match outcome {
				Some(result) => return result,
				None => {
					let woken = self.rxsem.acquire();
					critical_section::with(|cs| {
						self.with_state(cs, |state| state.n_rx_waiters -= 1);
					});
					woken?;
				}
			}
		}
	}

	/// Writes serialized frames from `buf` into the transmit ring.
	///
	/// Each frame's length follows from its header's data length code.
	/// Blocks while the ring is full unless the handle is non-blocking;
	/// kicks the hardware whenever it went idle. Returns the number of
	/// bytes accepted.
	pub fn write(&self, buf: &[u8], flags: OpenFlags) -> Result<usize> {
		let mut nsent = 0;
		let mut inactive = self.dev.txempty();

		while buf.len() - nsent >= msglen(0) {
			let (hdr, _) =
				CanHdr::read_from_prefix(&buf[nsent..]).map_err(|_| Errno::Inval)?;
			let wire_len = msglen(hdr.data_len());
			if buf.len() - nsent < wire_len {
				// A header promising more payload than the buffer holds.
				if nsent == 0 {
					return Err(Errno::Inval);
				}
				break;
			}
			let data = &buf[nsent + HEADER_SIZE..nsent + wire_len];

			loop {
				let enqueued = critical_section::with(|cs| {
					self.with_state(cs, |state| {
						if state.tx.is_full() {
							if !flags.contains(OpenFlags::NONBLOCK) {
								state.n_tx_waiters += 1;
							}
							false
						} else {
							state.tx.enqueue(&hdr, data);
							true
						}
					})
				});
				if enqueued {
					break;
				}
				if flags.contains(OpenFlags::NONBLOCK) {
					return if nsent == 0 { Err(Errno::Again) } else { Ok(nsent) };
				}
				if inactive {
					// The ring is full while the hardware sits idle;
					// start it so slots can free up.
					let _ = self.xmit();
				}
				let woken = self.txsem.acquire();
				critical_section::with(|cs| {
					self.with_state(cs, |state| state.n_tx_waiters -= 1);
				});
				woken?;
				inactive = self.dev.txempty();
			}
			nsent += wire_len;
		}

		if inactive {
			let _ = self.xmit();
		}
		Ok(nsent)
	}

	/// Performs a device control operation.
	pub fn ioctl(&self, cmd: CanIoctl<'_>) -> Result<i32> {
		match cmd {
			CanIoctl::RtrRead { id, msg } => {
				self.rtr_read(id, msg)?;
				Ok(0)
			}
			CanIoctl::Lower { cmd, arg } => self.dev.ioctl(cmd, arg),
		}
	}

	fn rtr_read(&self, id: Id, msg: &mut CanMsg) -> Result<()> {
		let (raw, extended) = match id {
			Id::Standard(id) => (u32::from(id.as_raw()), false),
			#[cfg(feature = "extid")]
			Id::Extended(id) => (id.as_raw(), true),
			#[cfg(not(feature = "extid"))]
			Id::Extended(_) => return Err(Errno::Inval),
		};

		let slot =
			critical_section::with(|cs| self.with_state(cs, |state| state.rtr.register(raw, extended)))
				.ok_or(Errno::Nomem)?;

		if let Err(err) = self.dev.remote_request(id) {
			self.abandon_rtr(slot);
			return Err(err);
		}

		match self.rtrsems[slot].acquire() {
			Ok(()) => {
				critical_section::with(|cs| self.with_state(cs, |state| state.rtr.take(slot)))
					.map(|delivered| *msg = delivered)
					.ok_or(Errno::Io)
			}
			Err(err) => {
				self.abandon_rtr(slot);
				Err(err)
			}
		}
	}

	fn abandon_rtr(&self, slot: usize) {
		critical_section::with(|cs| {
			let resolved = self.with_state(cs, |state| state.rtr.cancel(slot));
			if resolved {
				// A frame arrived concurrently; drop its wake-up so the
				// slot's semaphore stays balanced for the next rendezvous.
				let _ = self.rtrsems[slot].try_acquire();
			}
		});
	}

	/// Delivers an inbound frame from the lower half.
	///
	/// Called from interrupt context with interrupts masked. A frame
	/// satisfying pending remote requests is routed to the waiting threads
	/// and does not enter the receive ring. A full ring drops the frame
	/// and latches an overflow.
	pub fn receive(&self, hdr: &CanHdr, data: &[u8]) -> Result<()> {
		if data.len() < hdr.data_len() {
			return Err(Errno::Inval);
		}
		critical_section::with(|cs| {
			self.with_state(cs, |state| {
				if state
					.rtr
					.resolve(hdr, data, |slot| self.rtrsems[slot].release())
					> 0
				{
					return Ok(());
				}
				if state.rx.try_push(hdr, data) {
					if state.n_rx_waiters > 0 {
						self.rxsem.release();
					}
					Ok(())
				} else {
					#[cfg(feature = "errors")]
					{
						state.error_latch |= ErrorLatch::RX_OVERFLOW;
					}
					warn!("RX ring overflow, dropping frame {:#x}", hdr.raw_id());
					Err(Errno::Nomem)
				}
			})
		})
	}

	/// Reports completion of the oldest in-flight frame.
	///
	/// Called with interrupts masked, from interrupt context or from
	/// within `send` on controllers that complete synchronously. Feeds the
	/// hardware the next frame and wakes one blocked writer.
	pub fn txdone(&self) -> Result<()> {
		critical_section::with(|cs| {
			self.with_state(cs, |state| {
				if state.tx.is_empty() {
					return Err(Errno::Noent);
				}
				state.tx.complete();
				Ok(())
			})?;
			let _ = self.xmit();
			self.with_state(cs, |state| {
				if state.n_tx_waiters > 0 {
					self.txsem.release();
				}
			});
			Ok(())
		})
	}

	/// Reports that the hardware FIFO regained space.
	///
	/// Controllers with a deep FIFO can run out of completion interrupts
	/// while frames are still enqueued in software; this schedules
	/// deferred work that restarts transmission from thread context.
	/// Fails with [`Errno::Busy`] while earlier work is still in flight.
	#[cfg(feature = "txready")]
	pub fn txready(&self) -> Result<()> {
		critical_section::with(|cs| {
			if self.with_state(cs, |state| state.tx.is_empty()) {
				return Err(Errno::Nodata);
			}
			if self.work_pending.swap(true, Ordering::AcqRel) {
				return Err(Errno::Busy);
			}
			if self.platform.queue_work(TXREADY_WORK_PRIORITY) {
				Ok(())
			} else {
				self.work_pending.store(false, Ordering::Release);
				Err(Errno::Again)
			}
		})
	}

	/// Deferred continuation of [`CanDriver::txready`], invoked by the
	/// embedder's work queue from thread context.
	#[cfg(feature = "txready")]
	pub fn txready_work(&self) {
		self.work_pending.store(false, Ordering::Release);
		critical_section::with(|cs| {
			if self.with_state(cs, |state| state.tx.is_empty()) {
				return;
			}
			if self.xmit().is_ok() {
				self.with_state(cs, |state| {
					if state.n_tx_waiters > 0 {
						self.txsem.release();
					}
				});
			}
		});
	}

	/// Drains enqueued frames into the hardware while it accepts them.
	///
	/// Requires interrupts masked; the facade and the interrupt-side
	/// callbacks all funnel through here. The queue cursor advances before
	/// each send so a synchronous completion observes the slot in flight.
	fn xmit(&self) -> Result<()> {
		critical_section::with(|cs| {
			if self.with_state(cs, |state| {
				debug_assert!(!state.tx.is_empty() || !state.tx.has_unqueued());
				state.tx.is_empty()
			}) {
				// Nothing buffered; completion interrupts stay off until
				// the next write re-arms them.
				#[cfg(not(feature = "txready"))]
				self.dev.txint(false);
				return Err(Errno::Io);
			}

			let mut result = Ok(());
			loop {
				let claimed = if self.dev.txready() {
					self.with_state(cs, |state| {
						state.tx.has_unqueued().then(|| state.tx.take_for_hw())
					})
				} else {
					None
				};
				let Some(msg) = claimed else { break };
				if let Err(err) = self.dev.send(&msg) {
					error!("CAN transmit failed: {err}");
					result = Err(err);
					break;
				}
			}
			self.dev.txint(true);
			result
		})
	}

	#[cfg(test)]
	pub(crate) fn tx_cursors(&self) -> (usize, usize, usize) {
		critical_section::with(|cs| self.with_state(cs, |state| state.tx.cursors()))
	}

	#[cfg(test)]
	pub(crate) fn rx_is_empty(&self) -> bool {
		critical_section::with(|cs| self.with_state(cs, |state| state.rx.is_empty()))
	}

	#[cfg(test)]
	pub(crate) fn rtr_pending(&self) -> usize {
		critical_section::with(|cs| self.with_state(cs, |state| state.rtr.pending()))
	}
}
