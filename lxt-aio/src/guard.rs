//! Inaccessible memory for execute-time fault injection.

use std::io;

/// One anonymous page mapped `PROT_NONE`.
///
/// Any kernel access through [`GuardPage::addr`] faults, which makes it
/// a buffer that passes submit-time checks but fails on execution.
#[derive(Debug)]
pub struct GuardPage {
	addr: *mut libc::c_void,
	len:  usize,
}

// SAFETY: The mapping is never dereferenced from user space; the pointer
// SAFETY: is only handed to the kernel and to `munmap`.
unsafe impl Send for GuardPage {}
// SAFETY: See above; there is no shared mutable state to race on.
unsafe impl Sync for GuardPage {}

impl GuardPage {
	/// Maps the page.
	pub fn new() -> io::Result<Self> {
		// SAFETY: Pure query.
		let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
		let len = usize::try_from(page).unwrap_or(4096);

		// SAFETY: Anonymous private mapping at a kernel-chosen address.
		let addr = unsafe {
			libc::mmap(
				core::ptr::null_mut(),
				len,
				libc::PROT_NONE,
				libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
				-1,
				0,
			)
		};

		if addr == libc::MAP_FAILED {
			return Err(io::Error::last_os_error());
		}

		Ok(Self { addr, len })
	}

	/// The start address of the page.
	#[must_use]
	pub fn addr(&self) -> usize {
		self.addr.addr()
	}

	/// The size of the page.
	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	/// Always false; a mapping is at least one page.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl Drop for GuardPage {
	fn drop(&mut self) {
		// SAFETY: `addr`/`len` describe the mapping created in `new`.
		if unsafe { libc::munmap(self.addr, self.len) } != 0 {
			log::warn!(
				"failed to unmap guard page at {:#x}: {}",
				self.addr(),
				io::Error::last_os_error()
			);
		}
	}
}
