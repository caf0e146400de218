//! Plain data transfers against the data file.

use std::{
	fs::File,
	os::{fd::AsRawFd, unix::fs::FileExt},
	time::Duration,
};

use lxt_aio::{Buffer, Context, Error, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{
	BLKSIZE, DEADLINE, FILE_BLOCKS, Fixture, NPAR, OrFail, block_offset, block_reads, check_block,
	mark_seen, pipe, random_block, reap, reap_one,
};

/// Writes the data file: one random, tagged block per request, reaped one
/// at a time with a zero-timeout poll.
pub(super) fn parallel_write_poll(fx: &Fixture) -> Result<Verdict, Failure> {
	let mut rand = File::open("/dev/urandom").or_fail("open /dev/urandom")?;
	let fd = fx.scratch.as_raw_fd();

	let ctx = Context::create(NPAR as u32).or_fail("setup")?;

	let mut batch = Vec::with_capacity(NPAR);
	for n in 0..NPAR as u64 {
		let block = random_block(&mut rand, n).or_fail("read")?;
		batch.push(
			Request::write(fd, block)
				.tag(n)
				.offset(block_offset(n))
				.build(),
		);
	}

	let submitted = ctx.submit(batch).or_fail("submit")?.count();
	ensure!(submitted == NPAR, "submit {submitted} 0");

	let mut seen = [false; NPAR];
	for _ in 0..NPAR {
		let c = reap_one(&ctx, Some(Duration::ZERO))?;
		mark_seen(&mut seen, check_block(&c)?)?;
	}

	ctx.destroy().or_fail("destroy")?;

	let len = fx.scratch.len().or_fail("stat")?;
	ensure!(
		len == (FILE_BLOCKS * BLKSIZE) as u64,
		"unexpected file size {len}"
	);

	Ok(Verdict::Pass)
}

/// Reads every block back, reaping one completion per wait call.
fn parallel_read(fx: &Fixture, timeout: Option<Duration>, noop_wait: bool) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let ctx = Context::create(NPAR as u32).or_fail("setup")?;

	let submitted = ctx
		.submit(block_reads(file.as_raw_fd()))
		.or_fail("submit")?
		.count();
	ensure!(submitted == NPAR, "submit {submitted} 0");

	if noop_wait {
		let got = ctx.wait(0, 0, None).or_fail("empty getevents")?;
		ensure!(got.is_empty(), "empty getevents {} 0", got.len());
		ensure!(ctx.in_flight() == NPAR, "empty getevents consumed a completion");
	}

	let mut seen = [false; NPAR];
	for _ in 0..NPAR {
		let c = reap_one(&ctx, timeout)?;
		mark_seen(&mut seen, check_block(&c)?)?;
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

pub(super) fn parallel_read_poll(fx: &Fixture) -> Result<Verdict, Failure> {
	parallel_read(fx, Some(Duration::ZERO), true)
}

pub(super) fn parallel_read_block(fx: &Fixture) -> Result<Verdict, Failure> {
	parallel_read(fx, None, false)
}

pub(super) fn parallel_read_timed(fx: &Fixture) -> Result<Verdict, Failure> {
	parallel_read(fx, Some(Duration::from_micros(10)), false)
}

/// Reads every block back and reaps all of them in one wait call.
pub(super) fn bulk_read(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let ctx = Context::create(NPAR as u32).or_fail("setup")?;

	let submitted = ctx
		.submit(block_reads(file.as_raw_fd()))
		.or_fail("submit")?
		.count();
	ensure!(submitted == NPAR, "submit {submitted} 0");

	let all = ctx
		.wait(NPAR, NPAR, Some(DEADLINE))
		.or_fail("getevents")?;
	ensure!(all.len() == NPAR, "getevents {} 0", all.len());

	let mut seen = [false; NPAR];
	for c in &all {
		mark_seen(&mut seen, check_block(c)?)?;
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// Sync requests complete with 0; descriptors without sync are refused.
pub(super) fn fsync(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(2).or_fail("setup")?;

	for (tag, req) in [
		(16, Request::fsync(fd).tag(16).build()),
		(17, Request::fdsync(fd).tag(17).build()),
	] {
		let submitted = ctx.submit(vec![req]).or_fail("submit")?.count();
		ensure!(submitted == 1, "submit {submitted} 0");

		let c = reap(&ctx, 1)?.remove(0);
		ensure!(c.tag() == tag, "unexpected data tag");
		ensure!(c.result() == 0, "unexpected res {}", c.result());
	}

	let (rd, _wr) = pipe().or_fail("pipe")?;
	match ctx.submit(vec![Request::fsync(rd.as_raw_fd()).tag(18).build()]) {
		Err(Error::InvalidRequest | Error::NotSupported { .. }) => {}
		Err(err) => bail!("pipe fsync: {err}"),
		Ok(s) => bail!("pipe fsync accepted ({} requests)", s.count()),
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// Zero-length transfers through a null buffer succeed with result 0.
pub(super) fn zero_length(fx: &Fixture) -> Result<Verdict, Failure> {
	let fd = fx.scratch.as_raw_fd();
	let before = fx.scratch.len().or_fail("stat")?;
	let ctx = Context::create(2).or_fail("setup")?;

	let batch = vec![
		Request::read(fd, 0).tag(0).buffer(Buffer::Null).build(),
		Request::write(fd, Vec::<u8>::new())
			.tag(1)
			.offset(block_offset(FILE_BLOCKS as u64))
			.buffer(Buffer::Null)
			.build(),
	];
	let submitted = ctx.submit(batch).or_fail("submit")?.count();
	ensure!(submitted == 2, "submit {submitted} 0");

	for c in reap(&ctx, 2)? {
		ensure!(c.result() == 0, "unexpected res {} (tag {})", c.result(), c.tag());
	}

	let after = fx.scratch.len().or_fail("stat")?;
	ensure!(before == after, "file size changed from {before} to {after}");

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// A read straddling end-of-file is short; one past it returns 0.
pub(super) fn short_read_eof(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(2).or_fail("setup")?;

	let end = block_offset(FILE_BLOCKS as u64);
	let half = BLKSIZE / 2;
	let batch = vec![
		Request::read(fd, BLKSIZE)
			.tag(0)
			.offset(end - half as i64)
			.build(),
		Request::read(fd, BLKSIZE)
			.tag(1)
			.offset(end + BLKSIZE as i64)
			.build(),
	];
	let submitted = ctx.submit(batch).or_fail("submit")?.count();
	ensure!(submitted == 2, "submit {submitted} 0");

	let mut tail = vec![0; half];
	file.read_exact_at(&mut tail, (end - half as i64).cast_unsigned())
		.or_fail("pread")?;

	for c in reap(&ctx, 2)? {
		let expected = if c.tag() == 0 { half } else { 0 };
		match c.bytes() {
			Ok(n) if n == expected => {}
			Ok(n) => bail!("unexpected res {n} (tag {}, wanted {expected})", c.tag()),
			Err(errno) => bail!("read {} {errno}", c.result()),
		}

		if c.tag() == 0 {
			let got = c.request().data().map(|d| &d[..half]);
			ensure!(got == Some(&tail[..]), "short read returned the wrong bytes");
		}
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}
