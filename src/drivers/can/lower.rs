//! Interface to the controller-specific lower half.

use embedded_can::Id;

use super::frame::CanMsg;
use crate::errno::Result;

/// Operations the upper half consumes from a CAN controller driver.
///
/// All callbacks run with interrupts masked unless noted otherwise. Errors
/// are propagated to the caller of the facade unchanged.
pub trait CanLowerHalf {
	/// Resets the controller to its power-on state.
	///
	/// Kept for controller-specific code paths; the upper half never drives
	/// a reset itself.
	fn reset(&self) -> Result<()>;

	/// Brings the controller into operation. Invoked on the first open.
	fn setup(&self) -> Result<()>;

	/// Takes the controller out of operation. Invoked on the last close,
	/// after both the software ring and the hardware FIFO drained.
	fn shutdown(&self);

	/// Enables or disables receive interrupts.
	fn rxint(&self, enable: bool);

	/// Enables or disables transmit-completion interrupts.
	fn txint(&self, enable: bool);

	/// Whether the hardware can accept another frame right now.
	fn txready(&self) -> bool;

	/// Whether all hardware transmit buffers are empty.
	fn txempty(&self) -> bool;

	/// Hands one frame to the hardware for transmission.
	///
	/// May synchronously report the completion of an earlier frame through
	/// the upper half's transmit-done callback before returning.
	fn send(&self, msg: &CanMsg) -> Result<()>;

	/// Transmits a remote-transmission request for `id`.
	fn remote_request(&self, id: Id) -> Result<()>;

	/// Controller-specific ioctl commands the upper half does not know.
	fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32>;
}
