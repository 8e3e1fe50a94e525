// Copyright (c) 2026 The candev Project Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// POSIX error codes returned by the driver entry points.
///
/// The values match the classic errno numbers so that an embedding kernel
/// can hand them to user space unchanged (negated, per convention).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Errno {
	/// No such file or directory
	#[error("No such file or directory")]
	Noent = 2,
	/// Interrupted system call
	#[error("Interrupted system call")]
	Intr = 4,
	/// I/O error
	#[error("I/O error")]
	Io = 5,
	/// Try again
	#[error("Try again")]
	Again = 11,
	/// Out of memory
	#[error("Out of memory")]
	Nomem = 12,
	/// Device or resource busy
	#[error("Device or resource busy")]
	Busy = 16,
	/// No such device
	#[error("No such device")]
	Nodev = 19,
	/// Invalid argument
	#[error("Invalid argument")]
	Inval = 22,
	/// Too many open files
	#[error("Too many open files")]
	Mfile = 24,
	/// Function not implemented
	#[error("Function not implemented")]
	Nosys = 38,
	/// No data available
	#[error("No data available")]
	Nodata = 61,
}

pub type Result<T> = core::result::Result<T, Errno>;
