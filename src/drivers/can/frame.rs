//! CAN frame model and the DLC codec.
//!
//! A frame is a packed header followed by up to [`MAX_DATA`] data bytes.
//! The header travels over the character device in host byte order; the
//! serialized length of a frame is [`msglen`] of its payload length, which
//! is derived from the 4-bit data length code.

use bit_field::BitField;
use embedded_can::{Id, StandardId};
#[cfg(feature = "extid")]
use embedded_can::ExtendedId;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Largest payload carried by a single frame.
#[cfg(feature = "can-fd")]
pub const MAX_DATA: usize = 64;
/// Largest payload carried by a single frame.
#[cfg(not(feature = "can-fd"))]
pub const MAX_DATA: usize = 8;

/// Size of the serialized frame header.
pub const HEADER_SIZE: usize = core::mem::size_of::<CanHdr>();

/// Serialized length of a frame carrying `data_len` payload bytes.
pub const fn msglen(data_len: usize) -> usize {
	HEADER_SIZE + data_len
}

/// Serialized length of the largest possible frame.
pub const MAX_MSGLEN: usize = msglen(MAX_DATA);

/// Identifier of synthesized error frames (fits 11 bits).
#[cfg(feature = "errors")]
pub const ERROR_FRAME_ID: u32 = 0x7F8;
/// Data length code of synthesized error frames.
#[cfg(feature = "errors")]
pub const ERROR_FRAME_DLC: u8 = 8;
/// Data byte of an error frame holding the latched error bitmap.
#[cfg(feature = "errors")]
pub(crate) const ERROR_LATCH_BYTE: usize = 5;

const STDID_MASK: u32 = 0x7FF;
#[cfg(feature = "extid")]
const EXTID_MASK: u32 = 0x1FFF_FFFF;

const DLC_BITS: core::ops::Range<usize> = 0..4;
const RTR_BIT: usize = 4;
const ERROR_BIT: usize = 5;
#[cfg(feature = "extid")]
const EXTID_BIT: usize = 6;

/// Translates a 4-bit data length code into a payload byte count.
#[cfg(feature = "can-fd")]
pub const fn dlc_to_len(dlc: u8) -> usize {
	match dlc {
		0..=8 => dlc as usize,
		9 => 12,
		10 => 16,
		11 => 20,
		12 => 24,
		13 => 32,
		14 => 48,
		_ => 64,
	}
}

/// Translates a 4-bit data length code into a payload byte count.
///
/// Classic CAN caps the payload at 8 bytes; the codes 9-15 all decode to 8.
#[cfg(not(feature = "can-fd"))]
pub const fn dlc_to_len(dlc: u8) -> usize {
	if dlc > 8 { 8 } else { dlc as usize }
}

/// Translates a payload byte count into the smallest data length code
/// covering it.
#[cfg(feature = "can-fd")]
pub const fn len_to_dlc(len: usize) -> u8 {
	match len {
		0..=8 => len as u8,
		9..=12 => 9,
		13..=16 => 10,
		17..=20 => 11,
		21..=24 => 12,
		25..=32 => 13,
		33..=48 => 14,
		_ => 15,
	}
}

/// Translates a payload byte count into the smallest data length code
/// covering it.
#[cfg(not(feature = "can-fd"))]
pub const fn len_to_dlc(len: usize) -> u8 {
	if len > 8 { 8 } else { len as u8 }
}

/// Packed frame header as it travels over the character device.
///
/// Layout (host byte order): a 32-bit identifier field holding 11 or 29
/// significant bits, one flags byte (bits 0-3 data length code, bit 4
/// remote-transmission-request, bit 5 error frame, bit 6 extended id when
/// compiled in) and three reserved bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CanHdr {
	id: u32,
	flags: u8,
	_reserved: [u8; 3],
}

impl CanHdr {
	pub(crate) const EMPTY: Self = Self {
		id: 0,
		flags: 0,
		_reserved: [0; 3],
	};

	/// Creates a data-frame header for `id` with the given data length code.
	///
	/// Returns `None` for an extended identifier when extended ids are not
	/// compiled in.
	pub fn new(id: Id, dlc: u8) -> Option<Self> {
		let mut hdr = Self::EMPTY;
		hdr.flags.set_bits(DLC_BITS, dlc & 0xF);
		match id {
			Id::Standard(id) => hdr.id = u32::from(id.as_raw()),
			#[cfg(feature = "extid")]
			Id::Extended(id) => {
				hdr.id = id.as_raw();
				hdr.flags.set_bit(EXTID_BIT, true);
			}
			#[cfg(not(feature = "extid"))]
			Id::Extended(_) => return None,
		}
		Some(hdr)
	}

	/// The frame identifier.
	pub fn id(&self) -> Id {
		#[cfg(feature = "extid")]
		if self.is_extended() {
			return Id::Extended(ExtendedId::new(self.id & EXTID_MASK).unwrap());
		}
		Id::Standard(StandardId::new((self.id & STDID_MASK) as u16).unwrap())
	}

	pub(crate) fn raw_id(&self) -> u32 {
		#[cfg(feature = "extid")]
		if self.is_extended() {
			return self.id & EXTID_MASK;
		}
		self.id & STDID_MASK
	}

	/// The 4-bit data length code.
	pub fn dlc(&self) -> u8 {
		self.flags.get_bits(DLC_BITS)
	}

	/// Payload byte count encoded by the data length code.
	pub fn data_len(&self) -> usize {
		dlc_to_len(self.dlc())
	}

	/// Whether this header describes a remote transmission request.
	pub fn is_rtr(&self) -> bool {
		self.flags.get_bit(RTR_BIT)
	}

	/// Whether this header describes an error frame.
	pub fn is_error(&self) -> bool {
		self.flags.get_bit(ERROR_BIT)
	}

	/// Whether the identifier is a 29-bit extended one.
	#[cfg(feature = "extid")]
	pub fn is_extended(&self) -> bool {
		self.flags.get_bit(EXTID_BIT)
	}

	/// Whether the identifier is a 29-bit extended one.
	#[cfg(not(feature = "extid"))]
	pub fn is_extended(&self) -> bool {
		false
	}

	pub(crate) fn set_rtr(&mut self, rtr: bool) {
		self.flags.set_bit(RTR_BIT, rtr);
	}

	#[cfg(feature = "errors")]
	pub(crate) fn set_error(&mut self, error: bool) {
		self.flags.set_bit(ERROR_BIT, error);
	}
}

/// A CAN frame: header plus payload storage.
///
/// Frames are stored by value in the driver's rings; only the first
/// [`CanMsg::wire_len`] bytes are meaningful on the character device.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CanMsg {
	hdr: CanHdr,
	data: [u8; MAX_DATA],
}

impl CanMsg {
	pub const EMPTY: Self = Self {
		hdr: CanHdr::EMPTY,
		data: [0; MAX_DATA],
	};

	/// The frame header.
	pub fn header(&self) -> &CanHdr {
		&self.hdr
	}

	/// Serialized length of this frame.
	pub fn wire_len(&self) -> usize {
		msglen(self.hdr.data_len())
	}

	/// The serialized frame: header followed by the payload bytes the data
	/// length code covers.
	pub fn wire_bytes(&self) -> &[u8] {
		&self.as_bytes()[..self.wire_len()]
	}

	/// Overwrites this frame with `hdr` and the payload prefix of `data`.
	///
	/// The caller guarantees `data` holds at least `hdr.data_len()` bytes.
	pub(crate) fn assign(&mut self, hdr: &CanHdr, data: &[u8]) {
		let len = hdr.data_len();
		self.hdr = *hdr;
		self.data[..len].copy_from_slice(&data[..len]);
	}

	/// Synthesizes the error frame reporting a latched error bitmap.
	#[cfg(feature = "errors")]
	pub(crate) fn error_frame(latch: u8) -> Self {
		let mut msg = Self::EMPTY;
		msg.hdr.id = ERROR_FRAME_ID;
		msg.hdr.flags.set_bits(DLC_BITS, ERROR_FRAME_DLC);
		msg.hdr.set_error(true);
		msg.data[ERROR_LATCH_BYTE] = latch;
		msg
	}
}

impl embedded_can::Frame for CanMsg {
	fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
		if data.len() > MAX_DATA {
			return None;
		}
		let mut msg = Self::EMPTY;
		msg.hdr = CanHdr::new(id.into(), len_to_dlc(data.len()))?;
		msg.data[..data.len()].copy_from_slice(data);
		Some(msg)
	}

	fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
		// Remote frames are classic CAN; the requested length caps at 8.
		if dlc > 8 {
			return None;
		}
		let mut msg = Self::EMPTY;
		msg.hdr = CanHdr::new(id.into(), dlc as u8)?;
		msg.hdr.set_rtr(true);
		Some(msg)
	}

	fn is_extended(&self) -> bool {
		self.hdr.is_extended()
	}

	fn is_remote_frame(&self) -> bool {
		self.hdr.is_rtr()
	}

	fn id(&self) -> Id {
		self.hdr.id()
	}

	fn dlc(&self) -> usize {
		self.hdr.dlc() as usize
	}

	fn data(&self) -> &[u8] {
		if self.hdr.is_rtr() {
			&[]
		} else {
			&self.data[..self.hdr.data_len()]
		}
	}
}

#[cfg(test)]
mod tests {
	use embedded_can::Frame;

	use super::*;

	#[test]
	fn header_layout_is_stable() {
		assert_eq!(HEADER_SIZE, 8);
		let hdr = CanHdr::new(Id::Standard(StandardId::new(0x123).unwrap()), 2).unwrap();
		let bytes = hdr.as_bytes();
		assert_eq!(&bytes[..4], &0x123u32.to_ne_bytes());
		assert_eq!(bytes[4], 2);
	}

	#[cfg(not(feature = "can-fd"))]
	#[test]
	fn classic_dlc_clamps_to_eight() {
		for dlc in 0..=15u8 {
			assert_eq!(dlc_to_len(dlc), (dlc as usize).min(8));
		}
	}

	#[cfg(feature = "can-fd")]
	#[test]
	fn fd_dlc_round_trips() {
		for dlc in 0..=15u8 {
			assert_eq!(len_to_dlc(dlc_to_len(dlc)), dlc);
		}
	}

	#[test]
	fn len_to_dlc_rounds_up() {
		assert_eq!(len_to_dlc(0), 0);
		assert_eq!(len_to_dlc(7), 7);
		#[cfg(feature = "can-fd")]
		{
			assert_eq!(len_to_dlc(9), 9);
			assert_eq!(dlc_to_len(len_to_dlc(13)), 16);
			assert_eq!(len_to_dlc(64), 15);
		}
	}

	#[test]
	fn frames_serialize_header_then_payload() {
		let msg = CanMsg::new(StandardId::new(0x7).unwrap(), &[0xAA, 0xBB]).unwrap();
		assert_eq!(msg.wire_len(), msglen(2));
		assert_eq!(&msg.wire_bytes()[HEADER_SIZE..], &[0xAA, 0xBB]);
		assert_eq!(msg.data(), &[0xAA, 0xBB]);
		assert!(!msg.is_remote_frame());
	}

	#[test]
	fn remote_frames_carry_no_data() {
		let msg = CanMsg::new_remote(StandardId::new(0x42).unwrap(), 3).unwrap();
		assert!(msg.is_remote_frame());
		assert_eq!(msg.dlc(), 3);
		assert_eq!(msg.data(), &[]);
		assert!(CanMsg::new_remote(StandardId::new(0x42).unwrap(), 9).is_none());
	}

	#[cfg(feature = "extid")]
	#[test]
	fn extended_ids_round_trip() {
		let id = ExtendedId::new(0x1234_5678 & 0x1FFF_FFFF).unwrap();
		let hdr = CanHdr::new(Id::Extended(id), 0).unwrap();
		assert!(hdr.is_extended());
		assert_eq!(hdr.id(), Id::Extended(id));
	}

	#[cfg(not(feature = "extid"))]
	#[test]
	fn extended_ids_are_rejected() {
		let id = embedded_can::ExtendedId::new(0x1FFFF).unwrap();
		assert!(CanHdr::new(Id::Extended(id), 0).is_none());
	}

	#[cfg(feature = "errors")]
	#[test]
	fn error_frames_report_the_latch() {
		let msg = CanMsg::error_frame(0x04);
		assert_eq!(msg.header().raw_id(), ERROR_FRAME_ID);
		assert!(msg.header().is_error());
		assert_eq!(msg.header().dlc(), ERROR_FRAME_DLC);
		assert_eq!(msg.wire_bytes()[HEADER_SIZE + ERROR_LATCH_BYTE], 0x04);
	}
}
