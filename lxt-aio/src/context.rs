//! The completion-queue client.

use core::ffi::c_long;
use std::{
	collections::HashMap,
	sync::{
		Mutex, MutexGuard, PoisonError,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use crate::{
	completion::Completion,
	error::{Error, Op},
	request::{Request, RequestId},
	sys::{self, AioContext, IoEvent, Iocb},
};

/// An owned kernel AIO context.
///
/// Shared by reference between every thread that drives it; all methods
/// take `&self`, including [`Context::destroy`], which may race with a
/// thread blocked in [`Context::wait`].
///
/// Submitted requests are parked in the context until their completion
/// is reaped, so their control blocks and buffers outlive the kernel's
/// use of them. Requests still parked when the context is destroyed are
/// released on drop.
#[derive(Debug)]
pub struct Context {
	/// The kernel handle; zero once destroyed.
	raw:       AtomicU64,
	capacity:  u32,
	in_flight: Mutex<HashMap<RequestId, Request>>,
}

/// The outcome of a [`Context::submit`] call.
#[derive(Debug)]
pub struct Submission {
	accepted: Vec<RequestId>,
	rejected: Vec<Request>,
}

impl Submission {
	/// How many requests the kernel accepted.
	#[must_use]
	pub fn count(&self) -> usize {
		self.accepted.len()
	}

	/// The identities of the accepted requests, in batch order.
	#[must_use]
	pub fn accepted(&self) -> &[RequestId] {
		&self.accepted
	}

	/// The requests after the first rejected one (inclusive), handed back.
	#[must_use]
	pub fn rejected(&self) -> &[Request] {
		&self.rejected
	}

	/// Consumes the submission, returning the rejected requests.
	#[must_use]
	pub fn into_rejected(self) -> Vec<Request> {
		self.rejected
	}
}

impl Context {
	/// Creates a context able to hold `capacity` outstanding requests.
	pub fn create(capacity: u32) -> Result<Self, Error> {
		let mut handle: AioContext = 0;
		// SAFETY: `handle` is writable and zeroed, as `io_setup` requires.
		let rc = unsafe { sys::io_setup(capacity, &raw mut handle) };
		if rc < 0 {
			let errno = sys::last_errno();
			log::trace!("io_setup({capacity}) failed: errno {errno}");
			return Err(Error::from_errno(Op::Create, errno));
		}

		log::trace!("io_setup({capacity}) -> {handle:#x}");

		Ok(Self {
			raw: AtomicU64::new(u64::from(handle)),
			capacity,
			in_flight: Mutex::new(HashMap::new()),
		})
	}

	/// The kernel handle, or zero once destroyed.
	#[must_use]
	pub fn raw(&self) -> u64 {
		self.raw.load(Ordering::Acquire)
	}

	/// The capacity requested at creation.
	#[must_use]
	pub fn capacity(&self) -> u32 {
		self.capacity
	}

	/// Whether [`Context::destroy`] has not been called yet.
	#[must_use]
	pub fn is_live(&self) -> bool {
		self.raw() != 0
	}

	/// How many submitted requests have not been reaped.
	#[must_use]
	pub fn in_flight(&self) -> usize {
		self.lock().len()
	}

	fn handle(&self) -> AioContext {
		self.raw() as AioContext
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Request>> {
		self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Submits a batch of requests.
	///
	/// The kernel validates the batch in order and stops at the first
	/// request it refuses. Everything before that point stays submitted;
	/// the refused request and everything after it is handed back in
	/// [`Submission::rejected`]. An error is returned only if the very
	/// first request is refused (or the context itself is bad).
	pub fn submit(&self, requests: Vec<Request>) -> Result<Submission, Error> {
		let ids = requests.iter().map(Request::id).collect::<Vec<_>>();

		let mut in_flight = self.lock();
		for request in requests {
			in_flight.insert(request.id(), request);
		}

		let mut iocbs = ids
			.iter()
			.filter_map(|id| in_flight.get_mut(id).map(Request::iocb_ptr))
			.collect::<Vec<*mut Iocb>>();

		let nr = c_long::try_from(iocbs.len()).unwrap_or(c_long::MAX);
		// SAFETY: Every pointer refers to a control block parked in
		// SAFETY: `in_flight`, which keeps it and its buffer alive until
		// SAFETY: the completion is reaped or the context is dropped.
		let rc = unsafe { sys::io_submit(self.handle(), nr, iocbs.as_mut_ptr()) };

		if rc < 0 {
			let errno = sys::last_errno();
			log::trace!("io_submit({}) failed: errno {errno}", ids.len());
			for id in &ids {
				in_flight.remove(id);
			}
			return Err(Error::from_errno(Op::Submit, errno));
		}

		let count = usize::try_from(rc).unwrap_or(0).min(ids.len());
		log::trace!("io_submit({}) -> {count}", ids.len());

		let rejected = ids[count..]
			.iter()
			.filter_map(|id| in_flight.remove(id))
			.collect();

		let mut accepted = ids;
		accepted.truncate(count);

		Ok(Submission { accepted, rejected })
	}

	/// Reaps between `min` and `max` completions.
	///
	/// `None` blocks until `min` completions are available, a zero
	/// duration polls, anything else bounds the wait. Running out of time
	/// is not an error; fewer than `min` completions come back. A wait
	/// interrupted by a signal returns an empty vector.
	///
	/// With `max == 0` no event buffer is passed at all.
	pub fn wait(
		&self,
		min: usize,
		max: usize,
		timeout: Option<Duration>,
	) -> Result<Vec<Completion>, Error> {
		let mut events = vec![IoEvent::default(); max];
		let events_ptr = if max == 0 {
			core::ptr::null_mut()
		} else {
			events.as_mut_ptr()
		};

		let ts = timeout.map(|t| {
			libc::timespec {
				tv_sec:  t.as_secs().try_into().unwrap_or(libc::time_t::MAX),
				tv_nsec: t.subsec_nanos().try_into().unwrap_or(0),
			}
		});
		let ts_ptr = ts.as_ref().map_or(core::ptr::null(), core::ptr::from_ref);

		let min_nr = c_long::try_from(min).unwrap_or(c_long::MAX);
		let nr = c_long::try_from(max).unwrap_or(c_long::MAX);

		// SAFETY: `events` holds `max` slots (or the pointer is null when
		// SAFETY: `max` is zero), and `ts` outlives the call.
		let rc = unsafe { sys::io_getevents(self.handle(), min_nr, nr, events_ptr, ts_ptr) };

		if rc < 0 {
			let errno = sys::last_errno();
			if errno == libc::EINTR {
				log::debug!("io_getevents({min}, {max}) interrupted by signal");
				return Ok(Vec::new());
			}
			log::trace!("io_getevents({min}, {max}) failed: errno {errno}");
			return Err(Error::from_errno(Op::Wait, errno));
		}

		let count = usize::try_from(rc).unwrap_or(0).min(max);
		log::trace!("io_getevents({min}, {max}) -> {count}");

		let mut in_flight = self.lock();
		let mut completions = Vec::with_capacity(count);
		let mut orphan = None;

		for event in &events[..count] {
			let Some(request) = in_flight.remove(&RequestId(event.obj)) else {
				log::warn!(
					"completion for unknown iocb {:#x} (data {})",
					event.obj,
					event.data
				);
				orphan.get_or_insert((event.obj, event.data));
				continue;
			};

			completions.push(Completion::new(request, event.data, event.res, event.res2));
		}

		let Some((obj, data)) = orphan else {
			return Ok(completions);
		};

		// The kernel has already handed these over; they cannot be reaped again.
		for c in &completions {
			log::warn!(
				"discarding completion of {} (data {}, res {}) reaped with an unknown iocb",
				c.request().id(),
				c.tag(),
				c.result()
			);
		}

		Err(Error::Orphan {
			obj,
			data,
			discarded: completions.into_iter().map(|c| c.tag()).collect(),
		})
	}

	/// Attempts to cancel an in-flight request.
	///
	/// Advisory only. `Ok(Some(_))` means the kernel cancelled the request
	/// and reported its result right away; `Ok(None)` means cancellation
	/// was queued and the completion will still arrive through
	/// [`Context::wait`]. A request that already finished (whether reaped
	/// or not) yields [`Error::NotFound`].
	pub fn cancel(&self, id: RequestId) -> Result<Option<Completion>, Error> {
		let mut in_flight = self.lock();

		let mut result = IoEvent::default();
		let rc = {
			let Some(request) = in_flight.get_mut(&id) else {
				log::debug!("cancel of unknown request {id}");
				return Err(Error::NotFound);
			};

			// SAFETY: The control block is parked in `in_flight` and stays
			// SAFETY: there while the lock is held; `result` is writable.
			unsafe { sys::io_cancel(self.handle(), request.iocb_ptr(), &raw mut result) }
		};

		if rc < 0 {
			let errno = sys::last_errno();
			log::trace!("io_cancel({id}) failed: errno {errno}");
			return if errno == libc::EINPROGRESS {
				Ok(None)
			} else {
				Err(Error::from_errno(Op::Cancel, errno))
			};
		}

		log::trace!("io_cancel({id}) completed synchronously");

		Ok(in_flight
			.remove(&id)
			.map(|request| Completion::new(request, result.data, result.res, result.res2)))
	}

	/// Destroys the kernel context.
	///
	/// Any thread blocked in [`Context::wait`] is woken. Requests not yet
	/// reaped are discarded; their memory is released when the context
	/// is dropped. Destroying twice reports the kernel's answer for a
	/// dead handle.
	pub fn destroy(&self) -> Result<(), Error> {
		let raw = self.raw.swap(0, Ordering::AcqRel) as AioContext;
		// SAFETY: No memory is handed to the kernel.
		let rc = unsafe { sys::io_destroy(raw) };
		if rc < 0 {
			let errno = sys::last_errno();
			log::trace!("io_destroy({raw:#x}) failed: errno {errno}");
			return Err(Error::from_errno(Op::Destroy, errno));
		}

		log::trace!("io_destroy({raw:#x})");
		Ok(())
	}
}

impl Drop for Context {
	fn drop(&mut self) {
		if self.is_live() {
			if let Err(err) = self.destroy() {
				log::warn!("failed to destroy AIO context on drop: {err}");
			}
		}
	}
}
