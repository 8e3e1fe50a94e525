//! Upper-half character-device driver for Controller Area Network (CAN)
//! controllers.
//!
//! The crate sits between user threads and a controller-specific lower
//! half. Threads open the device, read inbound frames and write outbound
//! frames; the lower half implements [`CanLowerHalf`] and reports hardware
//! events through the driver's interrupt-side callbacks. Outbound frames
//! pass through a bounded ring whose three cursors separate enqueued,
//! in-flight and completed frames; inbound frames pass through a bounded
//! receive ring unless they satisfy a pending remote-transmission request,
//! in which case they are routed directly to the waiting thread.
//!
//! Mutual exclusion against interrupt context uses the [`critical-section`]
//! crate; the embedder supplies the critical-section implementation for
//! its target, and [`Platform`] provides the remaining kernel services
//! (sleeping, deferred work).
//!
//! [`critical-section`]: https://docs.rs/critical-section
//!
//! ## Feature flags
#![cfg_attr(feature = "document-features", doc = document_features::document_features!())]
#![warn(rust_2018_idioms)]
#![no_std]

#[cfg(test)]
extern crate std;
#[macro_use]
extern crate log;

mod config;
pub mod drivers;
pub mod errno;
pub mod synch;

pub use crate::config::*;
#[cfg(feature = "errors")]
pub use crate::drivers::can::ErrorLatch;
pub use crate::drivers::can::frame::{CanHdr, CanMsg};
pub use crate::drivers::can::{CanDriver, CanIoctl, CanLowerHalf, OpenFlags};
pub use crate::drivers::{Platform, WorkPriority};
pub use crate::errno::{Errno, Result};
