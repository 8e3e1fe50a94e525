//! Pending remote-transmission-request table.
//!
//! A thread asking for a remote frame parks on one of the fixed slots; the
//! receive path routes a matching inbound frame straight into the slot
//! instead of the receive ring. The table is small, so slots are found by
//! linear scan.

use super::frame::{CanHdr, CanMsg};

/// Lifecycle of one rendezvous slot.
///
/// `Waiting` counts as pending; `Resolved` merely parks the delivered frame
/// until the woken thread copies it out and releases the slot.
#[derive(Clone, Copy)]
pub(crate) enum RtrSlot {
	Free,
	Waiting { id: u32, extended: bool },
	Resolved { msg: CanMsg },
}

pub(crate) struct RtrTable<const N: usize> {
	slots: [RtrSlot; N],
	pending: usize,
}

impl<const N: usize> RtrTable<N> {
	pub(crate) const fn new() -> Self {
		Self {
			slots: [const { RtrSlot::Free }; N],
			pending: 0,
		}
	}

	/// Claims the first free slot for `id`, returning its index.
	pub(crate) fn register(&mut self, id: u32, extended: bool) -> Option<usize> {
		let index = self
			.slots
			.iter()
			.position(|slot| matches!(slot, RtrSlot::Free))?;
		self.slots[index] = RtrSlot::Waiting { id, extended };
		self.pending += 1;
		Some(index)
	}

	/// Delivers an inbound frame to every waiting slot with a matching
	/// identifier and reports how many slots it satisfied.
	///
	/// `wake` is invoked with each satisfied slot index; the caller posts
	/// the slot's semaphore there.
	pub(crate) fn resolve(
		&mut self,
		hdr: &CanHdr,
		data: &[u8],
		mut wake: impl FnMut(usize),
	) -> usize {
		let mut matched = 0;
		for index in 0..N {
			let RtrSlot::Waiting { id, extended } = self.slots[index] else {
				continue;
			};
			if id != hdr.raw_id() || extended != hdr.is_extended() {
				continue;
			}
			let mut msg = CanMsg::EMPTY;
			msg.assign(hdr, data);
			self.slots[index] = RtrSlot::Resolved { msg };
			self.pending -= 1;
			matched += 1;
			wake(index);
		}
		matched
	}

	/// Copies the delivered frame out of a resolved slot and frees it.
	pub(crate) fn take(&mut self, index: usize) -> Option<CanMsg> {
		match self.slots[index] {
			RtrSlot::Resolved { msg } => {
				self.slots[index] = RtrSlot::Free;
				Some(msg)
			}
			_ => None,
		}
	}

	/// Abandons a slot after a failed or interrupted rendezvous.
	///
	/// Returns whether the slot had already been resolved, in which case a
	/// wake-up was posted that the caller must drain.
	pub(crate) fn cancel(&mut self, index: usize) -> bool {
		let resolved = match self.slots[index] {
			RtrSlot::Resolved { .. } => true,
			RtrSlot::Waiting { .. } => {
				self.pending -= 1;
				false
			}
			RtrSlot::Free => false,
		};
		self.slots[index] = RtrSlot::Free;
		resolved
	}

	pub(crate) fn pending(&self) -> usize {
		self.pending
	}

	pub(crate) fn reset(&mut self) {
		for slot in &mut self.slots {
			*slot = RtrSlot::Free;
		}
		self.pending = 0;
	}
}
