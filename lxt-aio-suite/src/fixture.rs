//! State and helpers shared by every scenario.

use std::{
	fs::File,
	io::{self, Read},
	os::fd::{FromRawFd, OwnedFd, RawFd},
	path::Path,
	time::{Duration, Instant},
};

use lxt_aio::{Completion, Context, Request};
use lxt_harness::{CompatMode, Failure, IsolateError, ScratchError, ScratchFile};

/// Size of one data block.
pub(crate) const BLKSIZE: usize = 512;
/// Requests per parallel batch.
pub(crate) const NPAR: usize = 4;
/// Blocks written to the data file.
pub(crate) const FILE_BLOCKS: usize = NPAR;

/// How long any single blocking step may take before it counts as hung.
pub(crate) const DEADLINE: Duration = Duration::from_secs(10);
/// Grace period for a helper thread to enter a blocking call.
pub(crate) const SETTLE: Duration = Duration::from_millis(50);

/// What every scenario gets to work with.
#[derive(Debug)]
pub(crate) struct Fixture {
	/// The data file; filled by the first scenario.
	pub scratch:      ScratchFile,
	/// The resolved compatibility mode.
	pub mode:         CompatMode,
	/// Reference number of simultaneously live contexts.
	pub max_contexts: u32,
}

impl Fixture {
	pub fn new(dir: &Path, mode: CompatMode, max_contexts: u32) -> Result<Self, ScratchError> {
		Ok(Self {
			scratch: ScratchFile::create(dir)?,
			mode,
			max_contexts,
		})
	}

	/// A fresh read-only handle on the data file.
	pub fn reader(&self) -> Result<File, Failure> {
		self.scratch
			.open_read_only()
			.map_err(|err| Failure(format!("open: {err}")))
	}

	pub fn strict(&self) -> bool {
		self.mode.is_strict()
	}
}

/// The text stamped at the start of block `n`.
pub(crate) fn block_tag(n: u64) -> String {
	format!("test data in block {n}")
}

/// The file offset of block `n`.
pub(crate) fn block_offset(n: u64) -> i64 {
	i64::try_from(n).unwrap_or(i64::MAX) * BLKSIZE as i64
}

/// A block of random bytes starting with the NUL-terminated tag for `n`.
pub(crate) fn random_block(rand: &mut File, n: u64) -> io::Result<Vec<u8>> {
	let mut block = vec![0; BLKSIZE];
	rand.read_exact(&mut block)?;

	let tag = block_tag(n);
	block[..tag.len()].copy_from_slice(tag.as_bytes());
	block[tag.len()] = 0;
	Ok(block)
}

/// One read per file block, tagged with its block number.
pub(crate) fn block_reads(fd: RawFd) -> Vec<Request> {
	(0..NPAR as u64)
		.map(|n| {
			Request::read(fd, BLKSIZE)
				.tag(n)
				.offset(block_offset(n))
				.build()
		})
		.collect()
}

/// Checks a block transfer against its request; returns the tag.
///
/// Read buffers must start with the block's tag text.
pub(crate) fn check_block(c: &Completion) -> Result<u64, Failure> {
	let n = c.tag();
	ensure!(n == c.request().tag(), "unexpected data tag");
	ensure!(n < NPAR as u64, "unexpected data tag");
	ensure!(c.result() == BLKSIZE as i64, "unexpected res");
	ensure!(c.request().len() == BLKSIZE, "unexpected nbytes");
	ensure!(c.request().offset() == block_offset(n), "unexpected offset");

	if c.request().opcode() == lxt_aio::Opcode::Read {
		let tag = block_tag(n);
		let starts = c
			.request()
			.data()
			.is_some_and(|d| d.starts_with(tag.as_bytes()));
		ensure!(starts, "unexpected block tag");
	}

	Ok(n)
}

/// Records `n` as seen, failing on a duplicate.
pub(crate) fn mark_seen(seen: &mut [bool], n: u64) -> Result<(), Failure> {
	let slot = usize::try_from(n)
		.ok()
		.and_then(|i| seen.get_mut(i))
		.ok_or_else(|| Failure::from("unexpected data tag"))?;
	ensure!(!*slot, "duplicate completion for tag {n}");
	*slot = true;
	Ok(())
}

/// Reaps exactly one completion, retrying empty results until [`DEADLINE`].
///
/// A zero `timeout` polls; anything else waits for at least one record.
pub(crate) fn reap_one(ctx: &Context, timeout: Option<Duration>) -> Result<Completion, Failure> {
	let min = usize::from(timeout != Some(Duration::ZERO));
	let start = Instant::now();
	loop {
		let mut got = ctx.wait(min, 1, timeout).or_fail("getevents")?;
		if let Some(c) = got.pop() {
			return Ok(c);
		}
		ensure!(start.elapsed() < DEADLINE, "getevents: no completion");
	}
}

/// Reaps completions until `count` have arrived or [`DEADLINE`] passes.
pub(crate) fn reap(ctx: &Context, count: usize) -> Result<Vec<Completion>, Failure> {
	let start = Instant::now();
	let mut all = Vec::with_capacity(count);
	while all.len() < count {
		let left = DEADLINE.saturating_sub(start.elapsed());
		ensure!(
			!left.is_zero(),
			"getevents: {} of {count} completions",
			all.len()
		);
		let got = ctx.wait(1, count - all.len(), Some(left)).or_fail("getevents")?;
		all.extend(got);
	}
	Ok(all)
}

/// Both ends of a close-on-exec pipe, read end first.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
	let mut fds: [libc::c_int; 2] = [-1; 2];
	// SAFETY: `fds` has room for the two descriptors.
	if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
		return Err(io::Error::last_os_error());
	}
	// SAFETY: Both descriptors are fresh and owned by nobody else.
	Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Turns an operation error into the suite's `"<what> <rc> <errno>"` failure.
pub(crate) trait OrFail<T> {
	fn or_fail(self, what: &str) -> Result<T, Failure>;
}

/// The failure for an unexpected client error from operation `what`.
pub(crate) fn aio_failure(what: &str, err: &lxt_aio::Error) -> Failure {
	match err.errno() {
		Some(errno) => Failure::errno(what, -1, errno),
		None => Failure(format!("{what}: {err}")),
	}
}

impl<T> OrFail<T> for Result<T, lxt_aio::Error> {
	fn or_fail(self, what: &str) -> Result<T, Failure> {
		self.map_err(|err| aio_failure(what, &err))
	}
}

impl<T> OrFail<T> for io::Result<T> {
	fn or_fail(self, what: &str) -> Result<T, Failure> {
		self.map_err(|err| {
			match err.raw_os_error() {
				Some(errno) => Failure::errno(what, -1, errno),
				None => Failure(format!("{what}: {err}")),
			}
		})
	}
}

impl<T> OrFail<T> for Result<T, IsolateError> {
	fn or_fail(self, what: &str) -> Result<T, Failure> {
		self.map_err(|err| Failure(format!("{what}: {err}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn random_block_is_stamped() {
		let mut rand = File::open("/dev/urandom").unwrap();
		let block = random_block(&mut rand, 2).unwrap();
		assert_eq!(BLKSIZE, block.len());
		assert!(block.starts_with(b"test data in block 2\0"));
	}

	#[test]
	fn reads_cover_the_file() {
		let reads = block_reads(7);
		assert_eq!(NPAR, reads.len());
		for (n, r) in reads.iter().enumerate() {
			assert_eq!(n as u64, r.tag());
			assert_eq!(block_offset(n as u64), r.offset());
			assert_eq!(BLKSIZE, r.len());
		}
		assert_eq!(
			FILE_BLOCKS as i64 * BLKSIZE as i64,
			block_offset(FILE_BLOCKS as u64)
		);
	}

	#[test]
	fn duplicate_tags_fail() {
		let mut seen = [false; 2];
		assert!(mark_seen(&mut seen, 1).is_ok());
		assert!(mark_seen(&mut seen, 1).is_err());
		assert!(mark_seen(&mut seen, 5).is_err());
	}

	#[test]
	fn errors_use_errno_format() {
		let res: Result<(), lxt_aio::Error> = Err(lxt_aio::Error::InvalidRequest);
		assert_eq!(Err(Failure("submit -1 22".into())), res.or_fail("submit"));
	}
}
