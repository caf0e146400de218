//! Advisory cancellation.

use std::{os::fd::AsRawFd, time::Duration};

use lxt_aio::{Context, Error, EventFd, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{BLKSIZE, DEADLINE, Fixture, OrFail, aio_failure, check_block, pipe, reap_one};

/// Tag of the poll request that is cancelled while in flight.
const POLL_TAG: u64 = 99;

/// Cancelling a finished request is refused; cancelling an in-flight one
/// is accepted, and a completion may still arrive for it.
pub(super) fn cancel(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let efd = EventFd::new().or_fail("eventfd")?;
	let ctx = Context::create(4).or_fail("setup")?;

	// The eventfd tells us the read finished without reaping it, so the
	// kernel (not the client) has to answer the cancel.
	let req = Request::read(file.as_raw_fd(), BLKSIZE)
		.tag(0)
		.notify(efd.as_raw_fd())
		.build();
	let id = req.id();
	let submitted = ctx.submit(vec![req]).or_fail("submit")?.count();
	ensure!(submitted == 1, "submit {submitted} 0");

	let done = efd.wait_readable(DEADLINE).or_fail("poll eventfd")?;
	ensure!(done, "read did not complete");

	match ctx.cancel(id) {
		Err(Error::NotFound) => {}
		Err(err) => return Err(aio_failure("cancel", &err)),
		Ok(_) => bail!("cancel 0 0"),
	}

	check_block(&reap_one(&ctx, None)?)?;

	ensure!(
		ctx.cancel(id).err() == Some(Error::NotFound),
		"cancel of reaped request"
	);

	let (rd, _wr) = pipe().or_fail("pipe")?;
	let poll = Request::poll(rd.as_raw_fd(), libc::POLLIN)
		.tag(POLL_TAG)
		.build();
	let poll_id = poll.id();

	match ctx.submit(vec![poll]) {
		Ok(s) if s.count() == 1 => {}
		Ok(s) => bail!("submit {} 0", s.count()),
		Err(Error::InvalidRequest) if !fx.strict() => {
			ctx.destroy().or_fail("destroy")?;
			return Ok(Verdict::Skip("poll requests not supported".into()));
		}
		Err(err) => return Err(aio_failure("submit", &err)),
	}

	match ctx.cancel(poll_id) {
		Ok(Some(c)) => log::debug!("poll cancelled synchronously, res {}", c.result()),
		Ok(None) => log::debug!("poll cancellation queued"),
		Err(err @ (Error::NotFound | Error::NotSupported { .. })) if !fx.strict() => {
			log::info!("in-flight cancel refused: {err}");
		}
		Err(err) => return Err(aio_failure("cancel", &err)),
	}

	let late = ctx
		.wait(1, 1, Some(Duration::from_millis(100)))
		.or_fail("getevents")?;
	for c in &late {
		ensure!(c.tag() == POLL_TAG, "unexpected data tag");
		log::debug!("completion after cancel, res {}", c.result());
	}

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}
