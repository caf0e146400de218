//! Completion notification through an eventfd.

use std::{
	os::fd::AsRawFd,
	sync::Barrier,
	thread,
	time::{Duration, Instant},
};

use lxt_aio::{Context, Error, EventFd, Op, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{
	BLKSIZE, DEADLINE, Fixture, NPAR, OrFail, SETTLE, aio_failure, block_offset, block_reads,
	check_block, mark_seen, reap,
};

/// Counts eventfd notifications until `expected` have been seen.
fn count_notifications(efd: &EventFd, expected: u64, start: &Barrier) -> Result<u64, Failure> {
	start.wait();

	let begin = Instant::now();
	let mut total = 0;
	while total < expected {
		ensure!(
			begin.elapsed() < DEADLINE,
			"eventfd: {total} of {expected} notifications"
		);
		if efd.wait_readable(SETTLE).or_fail("poll eventfd")? {
			total += efd.read().or_fail("read eventfd")?;
		}
	}
	Ok(total)
}

/// Every completion bumps the eventfd exactly once, and the records are
/// still reaped normally afterwards.
pub(super) fn eventfd_notify(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let efd = EventFd::new().or_fail("eventfd")?;
	let ctx = Context::create(NPAR as u32).or_fail("setup")?;
	let start = Barrier::new(2);

	let counted = thread::scope(|s| {
		let counter = s.spawn(|| count_notifications(&efd, NPAR as u64, &start));

		start.wait();

		let requests = (0..NPAR as u64)
			.map(|n| {
				Request::read(fd, BLKSIZE)
					.tag(n)
					.offset(block_offset(n))
					.notify(efd.as_raw_fd())
					.build()
			})
			.collect();

		let submitted = match ctx.submit(requests) {
			Ok(sub) if sub.count() == NPAR => Ok(()),
			Ok(sub) => Err(Failure(format!("submit {} 0", sub.count()))),
			Err(err) => Err(aio_failure("submit", &err)),
		};
		if submitted.is_err() {
			// Nothing will be signalled; release the counter.
			let _ = efd.write(NPAR as u64);
		}

		let joined = counter
			.join()
			.unwrap_or_else(|_| Err(Failure::from("counter panicked")));
		submitted.and(joined)
	})?;

	ensure!(
		counted == NPAR as u64,
		"eventfd counted {counted} of {NPAR} completions"
	);
	ensure!(
		!efd.wait_readable(Duration::ZERO).or_fail("poll eventfd")?,
		"eventfd signalled after the last completion"
	);

	let mut seen = [false; NPAR];
	for c in reap(&ctx, NPAR)? {
		mark_seen(&mut seen, check_block(&c)?)?;
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// A bad notification descriptor rejects its request like any other bad
/// field, without disturbing the rest of the batch.
pub(super) fn eventfd_malformed(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(NPAR as u32).or_fail("setup")?;

	// A read, not a no-op: Linux refuses IOCB_CMD_NOOP by opcode before it
	// looks at the notification descriptor.
	let mut batch = block_reads(fd);
	batch[2] = Request::read(fd, BLKSIZE)
		.tag(2)
		.offset(block_offset(2))
		.notify(-1)
		.build();

	let submitted = ctx.submit(batch).or_fail("submit")?.count();
	ensure!(submitted == 2, "submit {submitted} 0");

	match ctx.submit(vec![Request::read(fd, BLKSIZE).notify(-1).build()]) {
		Err(Error::BadDescriptor { op: Op::Submit }) => {}
		Err(err) => return Err(aio_failure("submit with closed eventfd", &err)),
		Ok(sub) => bail!("submit {} 0", sub.count()),
	}

	// A descriptor that is open but not an eventfd.
	match ctx.submit(vec![Request::read(fd, BLKSIZE).notify(fd).build()]) {
		Err(Error::InvalidRequest) => {}
		Err(err) => return Err(aio_failure("submit with non-eventfd", &err)),
		Ok(sub) => bail!("submit {} 0", sub.count()),
	}

	let mut seen = [false; NPAR];
	for c in reap(&ctx, 2)? {
		mark_seen(&mut seen, check_block(&c)?)?;
	}
	ensure!(seen[0] && seen[1], "completions for the wrong requests");

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}
