//! Construction of individual asynchronous requests.

use std::os::fd::RawFd;

use crate::sys::{self, Iocb};

/// The operation a [`Request`] asks the kernel to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
	/// Positional read into the request's buffer.
	Read,
	/// Positional write from the request's buffer.
	Write,
	/// Flush data and metadata of the target to stable storage.
	Fsync,
	/// Flush data of the target to stable storage.
	Fdsync,
	/// Wait for the target to become ready for the given poll events.
	Poll,
	/// Defined by the ABI, never implemented by Linux.
	Noop,
	/// Any other opcode, passed through verbatim.
	Raw(u16),
}

impl core::fmt::Display for Opcode {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Read => f.write_str("read"),
			Self::Write => f.write_str("write"),
			Self::Fsync => f.write_str("fsync"),
			Self::Fdsync => f.write_str("fdsync"),
			Self::Poll => f.write_str("poll"),
			Self::Noop => f.write_str("noop"),
			Self::Raw(code) => write!(f, "raw({code})"),
		}
	}
}

impl Opcode {
	/// The `aio_lio_opcode` value for this operation.
	#[must_use]
	pub fn code(self) -> u16 {
		match self {
			Self::Read => sys::IOCB_CMD_PREAD,
			Self::Write => sys::IOCB_CMD_PWRITE,
			Self::Fsync => sys::IOCB_CMD_FSYNC,
			Self::Fdsync => sys::IOCB_CMD_FDSYNC,
			Self::Poll => sys::IOCB_CMD_POLL,
			Self::Noop => sys::IOCB_CMD_NOOP,
			Self::Raw(code) => code,
		}
	}

	/// Decodes an `aio_lio_opcode` value.
	#[must_use]
	pub fn from_code(code: u16) -> Self {
		match code {
			sys::IOCB_CMD_PREAD => Self::Read,
			sys::IOCB_CMD_PWRITE => Self::Write,
			sys::IOCB_CMD_FSYNC => Self::Fsync,
			sys::IOCB_CMD_FDSYNC => Self::Fdsync,
			sys::IOCB_CMD_POLL => Self::Poll,
			sys::IOCB_CMD_NOOP => Self::Noop,
			other => Self::Raw(other),
		}
	}
}

/// Memory a request transfers to or from.
#[derive(Debug)]
pub enum Buffer {
	/// Heap memory owned by the request for its whole lifetime.
	Owned(Box<[u8]>),
	/// A null buffer pointer.
	Null,
	/// Memory the request does not own; built with [`Buffer::address`].
	Address(ForeignAddress),
}

/// A user address vouched for by the caller of [`Buffer::address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignAddress(usize);

impl ForeignAddress {
	/// The raw address.
	#[must_use]
	pub fn get(self) -> usize {
		self.0
	}
}

impl Buffer {
	/// A buffer at `addr` that the request does not own.
	///
	/// Used to hand the kernel a pointer that faults.
	///
	/// # Safety
	/// For as long as the request may be in flight (until its completion
	/// is reaped or its context is destroyed and dropped), every byte of
	/// `addr .. addr + len` for the request's length must either be
	/// memory the kernel may freely read or write, or memory whose
	/// access faults (such as a `PROT_NONE` page).
	#[must_use]
	pub unsafe fn address(addr: usize) -> Self {
		Self::Address(ForeignAddress(addr))
	}

	/// The address handed to the kernel.
	fn addr(&mut self) -> u64 {
		match self {
			Self::Owned(bytes) => bytes.as_mut_ptr().addr() as u64,
			Self::Null => 0,
			Self::Address(addr) => addr.get() as u64,
		}
	}

	/// How many bytes the kernel may touch, or `None` when the caller
	/// vouched for the memory.
	fn capacity(&self) -> Option<usize> {
		match self {
			Self::Owned(bytes) => Some(bytes.len()),
			Self::Null => Some(0),
			Self::Address(_) => None,
		}
	}
}

/// Identity of a request while it is in flight.
///
/// This is the address of the request's control block, which the kernel
/// echoes back in every completion (`io_event.obj`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl core::fmt::Display for RequestId {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "{:#x}", self.0)
	}
}

/// A fully built asynchronous request.
///
/// The control block and any owned buffer live on the heap, so their
/// addresses stay put while the request is moved into and out of a
/// [`crate::Context`].
#[derive(Debug)]
pub struct Request {
	iocb:   Box<Iocb>,
	buffer: Buffer,
}

impl Request {
	/// Starts a read of `len` bytes from `fd` into a fresh zeroed buffer.
	#[must_use]
	pub fn read(fd: RawFd, len: usize) -> RequestBuilder {
		RequestBuilder::new(Opcode::Read, fd).buffer(Buffer::Owned(vec![0; len].into_boxed_slice()))
	}

	/// Starts a write of `data` to `fd`.
	#[must_use]
	pub fn write(fd: RawFd, data: impl Into<Box<[u8]>>) -> RequestBuilder {
		RequestBuilder::new(Opcode::Write, fd).buffer(Buffer::Owned(data.into()))
	}

	/// Starts an `fsync` of `fd`.
	#[must_use]
	pub fn fsync(fd: RawFd) -> RequestBuilder {
		RequestBuilder::new(Opcode::Fsync, fd)
	}

	/// Starts an `fdatasync` of `fd`.
	#[must_use]
	pub fn fdsync(fd: RawFd) -> RequestBuilder {
		RequestBuilder::new(Opcode::Fdsync, fd)
	}

	/// Starts a poll of `fd` for `events` (`POLLIN` and friends).
	#[must_use]
	pub fn poll(fd: RawFd, events: libc::c_short) -> RequestBuilder {
		let mut builder = RequestBuilder::new(Opcode::Poll, fd);
		builder.poll_events = events;
		builder
	}

	/// Starts a no-op request.
	#[must_use]
	pub fn noop() -> RequestBuilder {
		RequestBuilder::new(Opcode::Noop, -1)
	}

	/// Starts a request with an arbitrary opcode.
	#[must_use]
	pub fn raw(opcode: u16, fd: RawFd) -> RequestBuilder {
		RequestBuilder::new(Opcode::Raw(opcode), fd)
	}

	/// The caller-chosen correlation tag.
	#[must_use]
	pub fn tag(&self) -> u64 {
		self.iocb.aio_data
	}

	/// The requested operation.
	#[must_use]
	pub fn opcode(&self) -> Opcode {
		Opcode::from_code(self.iocb.aio_lio_opcode)
	}

	/// The target descriptor.
	#[must_use]
	pub fn fd(&self) -> RawFd {
		self.iocb.aio_fildes.cast_signed()
	}

	/// The file offset.
	#[must_use]
	pub fn offset(&self) -> i64 {
		self.iocb.aio_offset
	}

	/// The transfer length handed to the kernel.
	#[must_use]
	pub fn len(&self) -> usize {
		self.iocb.aio_nbytes as usize
	}

	/// Whether the transfer length is zero.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// The owned buffer, if any.
	///
	/// For a completed read this holds what the kernel stored.
	#[must_use]
	pub fn data(&self) -> Option<&[u8]> {
		match &self.buffer {
			Buffer::Owned(bytes) => Some(bytes),
			Buffer::Null | Buffer::Address(_) => None,
		}
	}

	/// Consumes the request, returning its owned buffer, if any.
	#[must_use]
	pub fn into_data(self) -> Option<Box<[u8]>> {
		match self.buffer {
			Buffer::Owned(bytes) => Some(bytes),
			Buffer::Null | Buffer::Address(_) => None,
		}
	}

	/// The in-flight identity of this request.
	#[must_use]
	pub fn id(&self) -> RequestId {
		RequestId(core::ptr::from_ref::<Iocb>(&self.iocb).addr() as u64)
	}

	/// The raw control block.
	#[must_use]
	pub fn iocb(&self) -> &Iocb {
		&self.iocb
	}

	/// A pointer to the control block for the kernel.
	pub(crate) fn iocb_ptr(&mut self) -> *mut Iocb {
		core::ptr::from_mut::<Iocb>(&mut self.iocb)
	}
}

/// Builds a [`Request`].
///
/// Obtained from one of the constructors on [`Request`].
#[derive(Debug)]
#[must_use]
pub struct RequestBuilder {
	opcode:      Opcode,
	fd:          RawFd,
	tag:         u64,
	offset:      i64,
	buffer:      Buffer,
	len:         Option<usize>,
	poll_events: libc::c_short,
	notify:      Option<RawFd>,
	flags:       u32,
}

impl RequestBuilder {
	fn new(opcode: Opcode, fd: RawFd) -> Self {
		Self {
			opcode,
			fd,
			tag: 0,
			offset: 0,
			buffer: Buffer::Null,
			len: None,
			poll_events: 0,
			notify: None,
			flags: 0,
		}
	}

	/// Sets the correlation tag echoed back in the completion.
	pub fn tag(mut self, tag: u64) -> Self {
		self.tag = tag;
		self
	}

	/// Sets the file offset.
	pub fn offset(mut self, offset: i64) -> Self {
		self.offset = offset;
		self
	}

	/// Replaces the buffer.
	///
	/// Unless [`RequestBuilder::len`] is also given, the length becomes
	/// the size of an owned buffer, or zero.
	pub fn buffer(mut self, buffer: Buffer) -> Self {
		self.buffer = buffer;
		self
	}

	/// Overrides the transfer length.
	///
	/// The length never exceeds an owned buffer's size and is zero for a
	/// null buffer; only a [`Buffer::address`] buffer takes it as given.
	pub fn len(mut self, len: usize) -> Self {
		self.len = Some(len);
		self
	}

	/// Asks the kernel to bump the eventfd `fd` on completion.
	///
	/// The descriptor is not validated here; an invalid one is rejected
	/// by the kernel at submit time.
	pub fn notify(mut self, fd: RawFd) -> Self {
		self.notify = Some(fd);
		self
	}

	/// ORs raw `aio_flags` bits into the control block.
	pub fn flags(mut self, flags: u32) -> Self {
		self.flags |= flags;
		self
	}

	/// Finishes the request.
	pub fn build(mut self) -> Request {
		let len = match (self.len, self.buffer.capacity()) {
			(Some(len), Some(cap)) if len > cap => {
				log::debug!("request length {len} clamped to buffer size {cap}");
				cap
			}
			(Some(len), _) => len,
			(None, cap) => cap.unwrap_or(0),
		};

		let aio_buf = if self.opcode == Opcode::Poll {
			u64::from(self.poll_events.cast_unsigned())
		} else {
			self.buffer.addr()
		};

		let mut iocb = Iocb {
			aio_data: self.tag,
			aio_lio_opcode: self.opcode.code(),
			aio_fildes: self.fd.cast_unsigned(),
			aio_buf,
			aio_nbytes: len as u64,
			aio_offset: self.offset,
			aio_flags: self.flags,
			..Iocb::default()
		};

		if let Some(resfd) = self.notify {
			iocb.aio_flags |= sys::IOCB_FLAG_RESFD;
			iocb.aio_resfd = resfd.cast_unsigned();
		}

		Request {
			iocb:   Box::new(iocb),
			buffer: self.buffer,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_takes_length_from_data() {
		let req = Request::write(3, b"hello".to_vec()).tag(7).offset(1024).build();

		assert_eq!(Opcode::Write, req.opcode());
		assert_eq!(7, req.tag());
		assert_eq!(1024, req.offset());
		assert_eq!(5, req.len());
		assert_eq!(3, req.fd());
		assert_eq!(Some(&b"hello"[..]), req.data());
		assert_eq!(
			req.data().map(|d| d.as_ptr().addr() as u64),
			Some(req.iocb().aio_buf)
		);
	}

	#[test]
	fn null_buffer_with_zero_length() {
		let req = Request::read(4, 512).buffer(Buffer::Null).build();
		assert_eq!(0, req.iocb().aio_buf);
		assert!(req.is_empty());
		assert!(req.data().is_none());
	}

	#[test]
	fn explicit_length_never_exceeds_owned_buffer() {
		let req = Request::read(4, 16).len(4096).build();
		assert_eq!(16, req.len());
		assert_eq!(Some(16), req.data().map(<[u8]>::len));

		let req = Request::read(4, 16).len(8).build();
		assert_eq!(8, req.len());
	}

	#[test]
	fn null_buffer_length_is_zero() {
		let req = Request::read(4, 512).buffer(Buffer::Null).len(512).build();
		assert!(req.is_empty());
	}

	#[test]
	fn foreign_address_keeps_explicit_length() {
		// SAFETY: The request is never submitted.
		let buffer = unsafe { Buffer::address(0x1000) };
		let req = Request::read(4, 0).buffer(buffer).len(4096).build();
		assert_eq!(0x1000, req.iocb().aio_buf);
		assert_eq!(4096, req.len());
		assert!(req.data().is_none());
	}

	#[test]
	fn notify_sets_resfd_even_when_invalid() {
		let req = Request::noop().notify(-1).build();
		assert_eq!(sys::IOCB_FLAG_RESFD, req.iocb().aio_flags & sys::IOCB_FLAG_RESFD);
		assert_eq!(u32::MAX, req.iocb().aio_resfd);
		assert_eq!(Opcode::Noop, req.opcode());
	}

	#[test]
	fn poll_stores_event_mask_in_buffer_field() {
		let req = Request::poll(5, libc::POLLIN).build();
		assert_eq!(u64::from(libc::POLLIN.cast_unsigned()), req.iocb().aio_buf);
		assert_eq!(sys::IOCB_CMD_POLL, req.iocb().aio_lio_opcode);
	}

	#[test]
	fn id_survives_moves() {
		let req = Request::fsync(1).build();
		let id = req.id();
		let moved = vec![req];
		assert_eq!(id, moved[0].id());
	}

	#[test]
	fn opcode_codes_round_trip() {
		for op in [
			Opcode::Read,
			Opcode::Write,
			Opcode::Fsync,
			Opcode::Fdsync,
			Opcode::Poll,
			Opcode::Noop,
			Opcode::Raw(0x7fff),
		] {
			assert_eq!(op, Opcode::from_code(op.code()));
		}
		assert_eq!("raw(42)", Opcode::Raw(42).to_string());
	}
}
