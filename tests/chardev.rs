//! End-to-end tests of the character-device facade against a scripted
//! loopback controller, using only the public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use embedded_can::{Frame, Id, StandardId};

use candev::{
	CanDriver, CanIoctl, CanLowerHalf, CanMsg, Errno, OpenFlags, Platform, Result,
};

#[derive(Default)]
struct LoopbackCan {
	ready: AtomicBool,
	empty: AtomicBool,
	sent: Mutex<Vec<CanMsg>>,
	remote_requests: Mutex<Vec<Id>>,
	forwarded: Mutex<Vec<(u32, usize)>>,
}

impl LoopbackCan {
	fn new() -> Self {
		let dev = Self::default();
		dev.ready.store(true, Ordering::SeqCst);
		dev.empty.store(true, Ordering::SeqCst);
		dev
	}

	fn drain_sent(&self) -> Vec<CanMsg> {
		core::mem::take(&mut *self.sent.lock().unwrap())
	}
}

impl CanLowerHalf for LoopbackCan {
	fn reset(&self) -> Result<()> {
		Ok(())
	}

	fn setup(&self) -> Result<()> {
		Ok(())
	}

	fn shutdown(&self) {}

	fn rxint(&self, _enable: bool) {}

	fn txint(&self, _enable: bool) {}

	fn txready(&self) -> bool {
		self.ready.load(Ordering::SeqCst)
	}

	fn txempty(&self) -> bool {
		self.empty.load(Ordering::SeqCst)
	}

	fn send(&self, msg: &CanMsg) -> Result<()> {
		self.sent.lock().unwrap().push(*msg);
		Ok(())
	}

	fn remote_request(&self, id: Id) -> Result<()> {
		self.remote_requests.lock().unwrap().push(id);
		Ok(())
	}

	fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
		self.forwarded.lock().unwrap().push((cmd, arg));
		Ok(42)
	}
}

struct HostPlatform;

impl Platform for HostPlatform {
	fn sleep_msec(&self, _msec: u32) {
		thread::sleep(Duration::from_millis(1));
	}
}

type Loopback = CanDriver<LoopbackCan, HostPlatform, 8, 8, 4>;

fn loopback() -> &'static Loopback {
	let driver = Box::leak(Box::new(CanDriver::new(LoopbackCan::new(), HostPlatform)));
	driver.open().unwrap();
	driver
}

fn standard(id: u16) -> Id {
	Id::Standard(StandardId::new(id).unwrap())
}

#[test]
fn frames_round_trip_in_order() {
	let driver = loopback();

	let mut outbound = Vec::new();
	let frames = [
		CanMsg::new(standard(0x100), &[1]).unwrap(),
		CanMsg::new(standard(0x101), &[2, 3]).unwrap(),
		CanMsg::new(standard(0x102), &[]).unwrap(),
	];
	for msg in &frames {
		outbound.extend_from_slice(msg.wire_bytes());
	}
	assert_eq!(
		driver.write(&outbound, OpenFlags::empty()),
		Ok(outbound.len())
	);

	// Everything the hardware transmitted comes back in.
	let sent = driver.lower().drain_sent();
	assert_eq!(sent.len(), frames.len());
	for msg in &sent {
		driver.txdone().unwrap();
		driver.receive(msg.header(), msg.data()).unwrap();
	}

	let mut inbound = vec![0u8; outbound.len() + 1];
	let read = driver.read(&mut inbound, OpenFlags::empty()).unwrap();
	assert_eq!(&inbound[..read], &outbound[..]);
}

#[test]
fn reads_stop_at_a_frame_that_does_not_fit() {
	let driver = loopback();

	let big = CanMsg::new(standard(0x7), &[0; 8]).unwrap();
	let small = CanMsg::new(standard(0x8), &[9]).unwrap();
	driver.receive(big.header(), big.data()).unwrap();
	driver.receive(small.header(), small.data()).unwrap();

	// Only the first frame fits; the second stays buffered.
	let mut buf = vec![0u8; big.wire_len() + 2];
	assert_eq!(
		driver.read(&mut buf, OpenFlags::empty()),
		Ok(big.wire_len())
	);
	assert_eq!(
		driver.read(&mut buf, OpenFlags::empty()),
		Ok(small.wire_len())
	);
}

#[test]
fn nonblocking_read_on_an_idle_bus() {
	let driver = loopback();
	let mut buf = [0u8; 80];
	assert_eq!(driver.read(&mut buf, OpenFlags::NONBLOCK), Err(Errno::Again));
}

#[test]
fn blocked_reader_wakes_on_arrival() {
	let driver = loopback();

	let reader = thread::spawn(move || {
		let mut buf = [0u8; 80];
		let read = driver.read(&mut buf, OpenFlags::empty())?;
		Ok::<_, Errno>(buf[..read].to_vec())
	});
	// Give the reader time to park on the empty ring.
	thread::sleep(Duration::from_millis(20));

	let msg = CanMsg::new(standard(0x55), &[0xEE]).unwrap();
	driver.receive(msg.header(), msg.data()).unwrap();

	let delivered = reader.join().unwrap().unwrap();
	assert_eq!(delivered, msg.wire_bytes());
}

#[test]
fn remote_request_round_trip() {
	let driver = loopback();

	let requester = thread::spawn(move || {
		let mut msg = CanMsg::EMPTY;
		driver
			.ioctl(CanIoctl::RtrRead {
				id: standard(0x2A),
				msg: &mut msg,
			})
			.map(|_| msg)
	});

	let deadline = std::time::Instant::now() + Duration::from_secs(5);
	while driver.lower().remote_requests.lock().unwrap().is_empty() {
		assert!(std::time::Instant::now() < deadline, "request never sent");
		thread::sleep(Duration::from_millis(1));
	}
	assert_eq!(
		driver.lower().remote_requests.lock().unwrap()[0],
		standard(0x2A)
	);

	let answer = CanMsg::new(standard(0x2A), &[4, 5, 6]).unwrap();
	driver.receive(answer.header(), answer.data()).unwrap();

	let delivered = requester.join().unwrap().unwrap();
	assert_eq!(delivered.id(), standard(0x2A));
	assert_eq!(delivered.data(), &[4, 5, 6]);

	// The answer went to the requester, not the receive ring.
	let mut buf = [0u8; 80];
	assert_eq!(driver.read(&mut buf, OpenFlags::NONBLOCK), Err(Errno::Again));
}

#[test]
fn unknown_commands_are_forwarded() {
	let driver = loopback();
	assert_eq!(
		driver.ioctl(CanIoctl::Lower {
			cmd: 0xBEEF,
			arg: 99,
		}),
		Ok(42)
	);
	assert_eq!(
		driver.lower().forwarded.lock().unwrap().as_slice(),
		[(0xBEEF, 99)]
	);
}

#[cfg(feature = "errors")]
#[test]
fn overflow_surfaces_as_an_error_frame() {
	use candev::ErrorLatch;

	let dev = LoopbackCan::new();
	let driver: &'static CanDriver<LoopbackCan, HostPlatform, 8, 3, 4> =
		Box::leak(Box::new(CanDriver::new(dev, HostPlatform)));
	driver.open().unwrap();

	let msg = CanMsg::new(standard(0x31), &[1]).unwrap();
	driver.receive(msg.header(), msg.data()).unwrap();
	driver.receive(msg.header(), msg.data()).unwrap();
	assert_eq!(
		driver.receive(msg.header(), msg.data()),
		Err(Errno::Nomem)
	);

	let mut buf = [0u8; 80];
	let read = driver.read(&mut buf, OpenFlags::empty()).unwrap();
	let frame = &buf[..read];
	// Header, then 8 data bytes with the latch in byte 5.
	assert_eq!(read, candev::drivers::can::frame::msglen(8));
	assert_eq!(
		frame[candev::drivers::can::frame::HEADER_SIZE + 5],
		ErrorLatch::RX_OVERFLOW.bits()
	);
}

#[cfg(feature = "can-fd")]
#[test]
fn fd_frames_carry_padded_payloads() {
	let driver = loopback();

	// 13 bytes round up to the 16-byte encoding.
	let msg = CanMsg::new(standard(0x99), &[0x11; 13]).unwrap();
	assert_eq!(msg.data().len(), 16);
	assert_eq!(
		driver.write(msg.wire_bytes(), OpenFlags::empty()),
		Ok(msg.wire_len())
	);
	let sent = driver.lower().drain_sent();
	assert_eq!(sent[0].wire_len(), msg.wire_len());
}
