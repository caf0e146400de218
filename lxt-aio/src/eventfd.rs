//! Counting event descriptors used for completion notification.

use std::{
	io,
	os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
	time::Duration,
};

/// An owned `eventfd(2)` descriptor.
#[derive(Debug)]
pub struct EventFd {
	fd: OwnedFd,
}

impl EventFd {
	/// Creates a blocking eventfd with a zero counter.
	pub fn new() -> io::Result<Self> {
		Self::with_flags(libc::EFD_CLOEXEC)
	}

	/// Creates an eventfd with raw `EFD_*` flags and a zero counter.
	pub fn with_flags(flags: libc::c_int) -> io::Result<Self> {
		// SAFETY: No pointers are involved.
		let fd = unsafe { libc::eventfd(0, flags) };
		if fd < 0 {
			return Err(io::Error::last_os_error());
		}

		// SAFETY: `eventfd` returned a fresh descriptor nobody else owns.
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		Ok(Self { fd })
	}

	/// Reads (and thereby resets) the counter, blocking while it is zero.
	pub fn read(&self) -> io::Result<u64> {
		let mut value = 0_u64;
		// SAFETY: `value` is eight writable bytes.
		let n = unsafe {
			libc::read(
				self.fd.as_raw_fd(),
				(&raw mut value).cast(),
				size_of::<u64>(),
			)
		};
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		if n.cast_unsigned() != size_of::<u64>() {
			return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
		}
		Ok(value)
	}

	/// Adds `value` to the counter.
	pub fn write(&self, value: u64) -> io::Result<()> {
		// SAFETY: `value` is eight readable bytes.
		let n = unsafe {
			libc::write(
				self.fd.as_raw_fd(),
				(&raw const value).cast(),
				size_of::<u64>(),
			)
		};
		if n < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}

	/// Waits up to `timeout` for the counter to become non-zero.
	///
	/// Returns whether it did.
	pub fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
		let mut pfd = libc::pollfd {
			fd:      self.fd.as_raw_fd(),
			events:  libc::POLLIN,
			revents: 0,
		};
		let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

		loop {
			// SAFETY: `pfd` is a single valid pollfd.
			let n = unsafe { libc::poll(&raw mut pfd, 1, millis) };
			if n >= 0 {
				return Ok(n > 0 && pfd.revents & libc::POLLIN != 0);
			}

			let err = io::Error::last_os_error();
			if err.kind() != io::ErrorKind::Interrupted {
				return Err(err);
			}
		}
	}
}

impl AsRawFd for EventFd {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

impl AsFd for EventFd {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.fd.as_fd()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counter_accumulates_and_resets() {
		let efd = EventFd::new().unwrap();
		assert!(!efd.wait_readable(Duration::ZERO).unwrap());

		efd.write(2).unwrap();
		efd.write(3).unwrap();
		assert!(efd.wait_readable(Duration::from_secs(1)).unwrap());
		assert_eq!(5, efd.read().unwrap());
		assert!(!efd.wait_readable(Duration::ZERO).unwrap());
	}

	#[test]
	fn nonblocking_read_of_zero_counter_would_block() {
		let efd = EventFd::with_flags(libc::EFD_CLOEXEC | libc::EFD_NONBLOCK).unwrap();
		let err = efd.read().unwrap_err();
		assert_eq!(io::ErrorKind::WouldBlock, err.kind());
	}
}
