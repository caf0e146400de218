//! Errors confined to a single request or to the tail of a batch.

use std::os::fd::AsRawFd;

use lxt_aio::{Buffer, Context, Error, GuardPage, Op, Opcode, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{
	BLKSIZE, Fixture, NPAR, OrFail, block_offset, block_reads, check_block, mark_seen, reap,
};

/// An opcode no kernel implements.
const BOGUS_OPCODE: u16 = 42;

/// A bad buffer passes submit and fails only its own completion record.
pub(super) fn fault_isolation(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let guard = GuardPage::new().or_fail("mmap")?;
	let ctx = Context::create(2).or_fail("setup")?;

	// SAFETY: Any access to the guard page faults, and `guard` outlives
	// SAFETY: `ctx`, so the page stays mapped while the read is in flight.
	let unmapped = unsafe { Buffer::address(guard.addr()) };
	let batch = vec![
		Request::read(fd, BLKSIZE)
			.tag(0)
			.buffer(unmapped)
			.len(BLKSIZE)
			.build(),
		Request::read(fd, BLKSIZE)
			.tag(1)
			.offset(block_offset(1))
			.build(),
	];
	let submitted = ctx.submit(batch).or_fail("submit")?.count();
	ensure!(submitted == 2, "submit {submitted} 0");

	for c in reap(&ctx, 2)? {
		if c.tag() == 0 {
			match c.bytes() {
				Err(libc::EFAULT) => {}
				Err(errno) => bail!("read {} {errno}", c.result()),
				Ok(n) => bail!("read through unmapped buffer returned {n}"),
			}
		} else {
			check_block(&c)?;
		}
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// A batch is accepted up to its first bad request; a bad first request
/// fails the whole call.
pub(super) fn partial_batch(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(NPAR as u32).or_fail("setup")?;

	let empty = ctx.submit(Vec::new()).or_fail("empty submit")?;
	ensure!(empty.count() == 0, "empty submit {} 0", empty.count());

	// The data file is open read-only here, so the write is refused.
	let mut batch = block_reads(fd);
	batch[2] = Request::write(fd, vec![0; BLKSIZE])
		.tag(2)
		.offset(block_offset(2))
		.build();

	let submission = ctx.submit(batch).or_fail("submit")?;
	ensure!(submission.count() == 2, "submit {} 0", submission.count());

	let rejected = submission.into_rejected();
	ensure!(rejected.len() == 2, "{} requests handed back", rejected.len());
	ensure!(
		rejected[0].opcode() == Opcode::Write && rejected[1].tag() == 3,
		"wrong requests handed back"
	);

	let bad_write = rejected.into_iter().next().map(|r| {
		Request::write(fd, r.into_data().unwrap_or_default())
			.tag(2)
			.build()
	});
	if let Some(write) = bad_write {
		match ctx.submit(vec![write]) {
			Err(Error::BadDescriptor { op: Op::Submit }) => {}
			Err(err) => bail!("submit of write on read-only file: {err}"),
			Ok(s) => bail!("submit {} 0", s.count()),
		}
	}

	match ctx.submit(vec![Request::raw(BOGUS_OPCODE, fd).build(), Request::noop().build()]) {
		Err(Error::InvalidRequest) => {}
		Err(err) => bail!("submit of opcode {BOGUS_OPCODE}: {err}"),
		Ok(s) => bail!("submit {} 0", s.count()),
	}

	let mut seen = [false; NPAR];
	for c in reap(&ctx, 2)? {
		mark_seen(&mut seen, check_block(&c)?)?;
	}
	ensure!(seen[0] && seen[1], "completions for the wrong requests");
	ensure!(ctx.in_flight() == 0, "rejected requests still in flight");

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}
