//! Several threads driving one context.

use std::{
	os::{fd::AsRawFd, unix::thread::JoinHandleExt},
	sync::{
		Arc, Barrier,
		atomic::{AtomicUsize, Ordering},
		mpsc,
	},
	thread,
	time::{Duration, Instant},
};

use lxt_aio::{Completion, Context, Error, Op, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{
	BLKSIZE, DEADLINE, Fixture, NPAR, OrFail, SETTLE, aio_failure, block_offset, block_tag, mark_seen,
};

/// Threads reaping from the same context.
const WAITERS: usize = 2;
/// Requests shared out between them.
const REQUESTS: usize = 16;
/// How long each waiter blocks before rechecking the shared count.
const WAITER_SLICE: Duration = Duration::from_millis(50);

/// Checks a read of block `tag % NPAR` issued by [`concurrent_waiters`].
fn check_shared_read(c: &Completion) -> Result<u64, Failure> {
	let tag = c.tag();
	ensure!(tag == c.request().tag(), "unexpected data tag");
	ensure!(c.result() == BLKSIZE as i64, "unexpected res {}", c.result());

	let block = block_tag(tag % NPAR as u64);
	let starts = c
		.request()
		.data()
		.is_some_and(|d| d.starts_with(block.as_bytes()));
	ensure!(starts, "unexpected block tag");
	Ok(tag)
}

fn reap_shared(ctx: &Context, reaped: &AtomicUsize, start: &Barrier) -> Result<Vec<u64>, Failure> {
	start.wait();

	let begin = Instant::now();
	let mut tags = Vec::new();
	while reaped.load(Ordering::Acquire) < REQUESTS {
		ensure!(
			begin.elapsed() < DEADLINE,
			"getevents: {} of {REQUESTS} completions",
			reaped.load(Ordering::Acquire)
		);

		for c in ctx.wait(1, NPAR, Some(WAITER_SLICE)).or_fail("getevents")? {
			tags.push(check_shared_read(&c)?);
			reaped.fetch_add(1, Ordering::AcqRel);
		}
	}

	Ok(tags)
}

/// Two threads reap one context while a third submits; every completion
/// is delivered to exactly one of them.
pub(super) fn concurrent_waiters(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(REQUESTS as u32).or_fail("setup")?;
	let reaped = AtomicUsize::new(0);
	let start = Barrier::new(WAITERS + 1);

	let per_waiter = thread::scope(|s| {
		let handles = (0..WAITERS)
			.map(|_| s.spawn(|| reap_shared(&ctx, &reaped, &start)))
			.collect::<Vec<_>>();

		start.wait();

		let mut submitted = Ok(());
		for batch in 0..REQUESTS / NPAR {
			let requests = (0..NPAR)
				.map(|n| {
					let tag = (batch * NPAR + n) as u64;
					Request::read(fd, BLKSIZE)
						.tag(tag)
						.offset(block_offset(n as u64))
						.build()
				})
				.collect();

			match ctx.submit(requests) {
				Ok(sub) if sub.count() == NPAR => {}
				Ok(sub) => submitted = Err(Failure(format!("submit {} 0", sub.count()))),
				Err(err) => submitted = Err(aio_failure("submit", &err)),
			}
			if submitted.is_err() {
				// Nothing more will arrive; release the waiters.
				reaped.store(REQUESTS, Ordering::Release);
				break;
			}
		}

		let joined = handles
			.into_iter()
			.map(|h| h.join().unwrap_or_else(|_| Err(Failure::from("waiter panicked"))))
			.collect::<Result<Vec<_>, _>>();

		submitted.and(joined)
	})?;

	let mut seen = [false; REQUESTS];
	for (i, tags) in per_waiter.iter().enumerate() {
		log::debug!("waiter {i} reaped {} completions", tags.len());
		for &tag in tags {
			mark_seen(&mut seen, tag)?;
		}
	}
	ensure!(seen.iter().all(|&s| s), "completions lost between waiters");

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// Destroying a context wakes a thread blocked in `wait` on it.
pub(super) fn destroy_while_waiting(fx: &Fixture) -> Result<Verdict, Failure> {
	let ctx = Arc::new(Context::create(1).or_fail("setup")?);
	let (tx, rx) = mpsc::channel();

	let waiter = Arc::clone(&ctx);
	let handle = thread::Builder::new()
		.name("aio-waiter".into())
		.spawn(move || {
			let _ = tx.send(waiter.wait(1, 1, None));
		})
		.or_fail("spawn")?;

	thread::sleep(SETTLE);
	ctx.destroy().or_fail("destroy")?;

	let Ok(res) = rx.recv_timeout(DEADLINE) else {
		bail!("getevents not woken by destroy");
	};
	let _ = handle.join();

	match res {
		Ok(got) => ensure!(got.is_empty(), "getevents {} 0", got.len()),
		Err(Error::InvalidArgument { op: Op::Wait }) if !fx.strict() => {
			log::debug!("woken waiter saw a dead context");
		}
		Err(err) => return Err(aio_failure("getevents", &err)),
	}

	Ok(Verdict::Pass)
}

extern "C" fn ignore_signal(_: libc::c_int) {}

/// A `SIGUSR1` handler installed without `SA_RESTART`; the previous
/// disposition is restored on drop.
struct InterruptHandler {
	old: libc::sigaction,
}

impl InterruptHandler {
	fn install() -> std::io::Result<Self> {
		// SAFETY: `sigaction` is plain old data; all-zero is a valid value.
		let mut action: libc::sigaction = unsafe { core::mem::zeroed() };
		action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
		action.sa_flags = 0;

		// SAFETY: As above.
		let mut old: libc::sigaction = unsafe { core::mem::zeroed() };
		// SAFETY: Both structs are valid and writable where required.
		let rc = unsafe {
			libc::sigemptyset(&raw mut action.sa_mask);
			libc::sigaction(libc::SIGUSR1, &raw const action, &raw mut old)
		};
		if rc != 0 {
			return Err(std::io::Error::last_os_error());
		}

		Ok(Self { old })
	}
}

impl Drop for InterruptHandler {
	fn drop(&mut self) {
		// SAFETY: `old` came from a successful `sigaction` call.
		let rc = unsafe { libc::sigaction(libc::SIGUSR1, &raw const self.old, core::ptr::null_mut()) };
		if rc != 0 {
			log::warn!(
				"failed to restore SIGUSR1 disposition: {}",
				std::io::Error::last_os_error()
			);
		}
	}
}

/// A signal delivered to a thread blocked in `wait` interrupts it.
pub(super) fn signal_interrupt(_fx: &Fixture) -> Result<Verdict, Failure> {
	let _handler = InterruptHandler::install().or_fail("sigaction")?;
	let ctx = Arc::new(Context::create(1).or_fail("setup")?);
	let (tx, rx) = mpsc::channel();

	let waiter = Arc::clone(&ctx);
	let handle = thread::Builder::new()
		.name("aio-waiter".into())
		.spawn(move || {
			let _ = tx.send(waiter.wait(1, 1, None));
		})
		.or_fail("spawn")?;
	let tid = handle.as_pthread_t();

	// The signal may land before the thread blocks, so keep sending.
	let start = Instant::now();
	let res = loop {
		thread::sleep(SETTLE);
		// SAFETY: `handle` is not joined yet, so `tid` names a live thread.
		unsafe {
			libc::pthread_kill(tid, libc::SIGUSR1);
		}

		match rx.recv_timeout(SETTLE) {
			Ok(res) => break res,
			Err(mpsc::RecvTimeoutError::Timeout) if start.elapsed() < DEADLINE => {}
			Err(_) => {
				ctx.destroy().or_fail("destroy")?;
				bail!("getevents not interrupted by signal");
			}
		}
	};
	let _ = handle.join();

	match res {
		Ok(got) => ensure!(got.is_empty(), "getevents {} 0", got.len()),
		Err(err) => return Err(aio_failure("getevents", &err)),
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}
