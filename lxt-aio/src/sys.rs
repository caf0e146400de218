//! Raw kernel ABI for the asynchronous I/O system calls.
//!
//! Mirrors `<linux/aio_abi.h>`. Nothing in here interprets results;
//! every function returns the raw `syscall(2)` return value, with the
//! error (if any) left in `errno`.

use core::ffi::c_long;

/// Kernel handle of an AIO context (`aio_context_t`).
pub type AioContext = libc::c_ulong;

/// `IOCB_CMD_PREAD`
pub const IOCB_CMD_PREAD: u16 = 0;
/// `IOCB_CMD_PWRITE`
pub const IOCB_CMD_PWRITE: u16 = 1;
/// `IOCB_CMD_FSYNC`
pub const IOCB_CMD_FSYNC: u16 = 2;
/// `IOCB_CMD_FDSYNC`
pub const IOCB_CMD_FDSYNC: u16 = 3;
/// `IOCB_CMD_POLL`
pub const IOCB_CMD_POLL: u16 = 5;
/// `IOCB_CMD_NOOP`
pub const IOCB_CMD_NOOP: u16 = 6;

/// Signal `aio_resfd` (an eventfd) when the request completes.
pub const IOCB_FLAG_RESFD: u32 = 1 << 0;

/// `struct iocb`.
///
/// `aio_key` and `aio_rw_flags` swap places on big-endian targets
/// (the kernel's `PADDED()` macro).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Iocb {
	pub aio_data:       u64,
	#[cfg(target_endian = "little")]
	pub aio_key:        u32,
	pub aio_rw_flags:   i32,
	#[cfg(target_endian = "big")]
	pub aio_key:        u32,
	pub aio_lio_opcode: u16,
	pub aio_reqprio:    i16,
	pub aio_fildes:     u32,
	pub aio_buf:        u64,
	pub aio_nbytes:     u64,
	pub aio_offset:     i64,
	pub aio_reserved2:  u64,
	pub aio_flags:      u32,
	pub aio_resfd:      u32,
}

/// `struct io_event`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoEvent {
	/// The `aio_data` of the originating iocb.
	pub data: u64,
	/// The user-space address of the originating iocb.
	pub obj:  u64,
	/// Result code (bytes transferred or a negated errno).
	pub res:  i64,
	/// Secondary result, unused by every opcode we issue.
	pub res2: i64,
}

const _: () = assert!(size_of::<Iocb>() == 64, "struct iocb must be 64 bytes");
const _: () = assert!(size_of::<IoEvent>() == 32, "struct io_event must be 32 bytes");

/// `io_setup(2)`
///
/// # Safety
/// `ctxp` must point to writable memory holding `0`.
pub unsafe fn io_setup(nr_events: u32, ctxp: *mut AioContext) -> c_long {
	// SAFETY: Caller upholds the pointer contract; widening keeps the
	// SAFETY: upper register bits defined for the variadic call.
	unsafe { libc::syscall(libc::SYS_io_setup, c_long::from(nr_events), ctxp) }
}

/// `io_submit(2)`
///
/// # Safety
/// `iocbpp` must point to `nr` pointers to readable iocbs, each of
/// which (and each of whose buffers) must stay valid until completion.
pub unsafe fn io_submit(ctx: AioContext, nr: c_long, iocbpp: *mut *mut Iocb) -> c_long {
	// SAFETY: Caller upholds the pointer contract.
	unsafe { libc::syscall(libc::SYS_io_submit, ctx, nr, iocbpp) }
}

/// `io_getevents(2)`
///
/// # Safety
/// `events` must have room for `nr` events (or be null when `nr` is 0);
/// `timeout` must be null or point to a valid timespec.
pub unsafe fn io_getevents(
	ctx: AioContext,
	min_nr: c_long,
	nr: c_long,
	events: *mut IoEvent,
	timeout: *const libc::timespec,
) -> c_long {
	// SAFETY: Caller upholds the pointer contract.
	unsafe { libc::syscall(libc::SYS_io_getevents, ctx, min_nr, nr, events, timeout) }
}

/// `io_cancel(2)`
///
/// # Safety
/// `iocb` must point to the still-live iocb that was submitted, and
/// `result` must point to writable memory for one event.
pub unsafe fn io_cancel(ctx: AioContext, iocb: *mut Iocb, result: *mut IoEvent) -> c_long {
	// SAFETY: Caller upholds the pointer contract.
	unsafe { libc::syscall(libc::SYS_io_cancel, ctx, iocb, result) }
}

/// `io_destroy(2)`
///
/// # Safety
/// Always sound to issue; marked unsafe for symmetry with the rest of
/// the raw layer (the kernel validates `ctx`).
pub unsafe fn io_destroy(ctx: AioContext) -> c_long {
	// SAFETY: No pointers are passed.
	unsafe { libc::syscall(libc::SYS_io_destroy, ctx) }
}

/// Reads the calling thread's `errno`.
pub fn last_errno() -> i32 {
	std::io::Error::last_os_error()
		.raw_os_error()
		.unwrap_or(libc::EIO)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn iocb_field_offsets_match_kernel_abi() {
		let iocb = Iocb::default();
		let base = core::ptr::from_ref(&iocb).addr();
		let at = |p: *const u8| p.addr() - base;

		assert_eq!(0, at((&raw const iocb.aio_data).cast()));
		assert_eq!(16, at((&raw const iocb.aio_lio_opcode).cast()));
		assert_eq!(18, at((&raw const iocb.aio_reqprio).cast()));
		assert_eq!(20, at((&raw const iocb.aio_fildes).cast()));
		assert_eq!(24, at((&raw const iocb.aio_buf).cast()));
		assert_eq!(32, at((&raw const iocb.aio_nbytes).cast()));
		assert_eq!(40, at((&raw const iocb.aio_offset).cast()));
		assert_eq!(56, at((&raw const iocb.aio_flags).cast()));
		assert_eq!(60, at((&raw const iocb.aio_resfd).cast()));
	}

	#[cfg(target_endian = "little")]
	#[test]
	fn key_precedes_rw_flags_on_little_endian() {
		let iocb = Iocb::default();
		let key = (&raw const iocb.aio_key).addr();
		let rw = (&raw const iocb.aio_rw_flags).addr();
		assert_eq!(key + 4, rw);
	}
}
