//! Context creation, destruction and limits.

use std::{os::fd::AsRawFd, time::Duration};

use lxt_aio::{Context, Error, Op, Request};
use lxt_harness::{Failure, Verdict};

use crate::fixture::{Fixture, NPAR, OrFail, aio_failure, block_reads, pipe};

/// Destroying a context with unreaped and uncompleted requests is clean,
/// and the context is unusable afterwards.
pub(super) fn destroy_outstanding(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let ctx = Context::create(NPAR as u32 + 1).or_fail("setup")?;

	let submitted = ctx
		.submit(block_reads(file.as_raw_fd()))
		.or_fail("submit")?
		.count();
	ensure!(submitted == NPAR, "submit {submitted} 0");

	// A poll on an empty pipe never completes by itself.
	let (rd, _wr) = pipe().or_fail("pipe")?;
	let poll = Request::poll(rd.as_raw_fd(), libc::POLLIN)
		.tag(NPAR as u64)
		.build();
	match ctx.submit(vec![poll]) {
		Ok(s) => ensure!(s.count() == 1, "submit {} 0", s.count()),
		Err(Error::InvalidRequest) => log::info!("poll requests not supported; none left pending"),
		Err(err) => return Err(aio_failure("submit", &err)),
	}

	ctx.destroy().or_fail("destroy")?;

	match ctx.wait(0, 1, Some(Duration::ZERO)) {
		Err(Error::InvalidArgument { op: Op::Wait }) => {}
		Err(err) => return Err(aio_failure("getevents after destroy", &err)),
		Ok(got) => bail!("getevents after destroy {} 0", got.len()),
	}

	Ok(Verdict::Pass)
}

/// Argument validation of create and wait, and use of a dead context.
pub(super) fn setup_validation(_fx: &Fixture) -> Result<Verdict, Failure> {
	match Context::create(0) {
		Err(Error::InvalidArgument { op: Op::Create }) => {}
		Err(err) => return Err(aio_failure("setup 0", &err)),
		Ok(_) => bail!("setup 0 0 0"),
	}

	let ctx = Context::create(1).or_fail("setup")?;

	match ctx.wait(2, 1, Some(Duration::ZERO)) {
		Err(Error::InvalidArgument { op: Op::Wait }) => {}
		Err(err) => return Err(aio_failure("getevents min>max", &err)),
		Ok(got) => bail!("getevents min>max {} 0", got.len()),
	}

	let got = ctx.wait(0, 0, None).or_fail("empty getevents")?;
	ensure!(got.is_empty(), "empty getevents {} 0", got.len());

	ctx.destroy().or_fail("destroy")?;

	match ctx.destroy() {
		Err(Error::InvalidArgument { op: Op::Destroy }) => {}
		Err(err) => return Err(aio_failure("second destroy", &err)),
		Ok(()) => bail!("second destroy 0 0"),
	}

	match ctx.submit(vec![Request::noop().build()]) {
		Err(Error::InvalidRequest) => {}
		Err(err) => return Err(aio_failure("submit after destroy", &err)),
		Ok(s) => bail!("submit after destroy {} 0", s.count()),
	}

	Ok(Verdict::Pass)
}

/// The ordinal of the first context past `max`, for messages.
fn first_past_limit(max: u32) -> u64 {
	u64::from(max) + 1
}

/// Creates contexts until the limit is hit, then destroys every one.
///
/// Strict mode expects exactly `max_contexts` to succeed and the next to
/// be refused. Natively the limit depends on host tunables, so it is only
/// measured: a refusal at any point must be a resource-exhaustion error.
pub(super) fn context_limit(fx: &Fixture) -> Result<Verdict, Failure> {
	let max = fx.max_contexts;
	let mut live = Vec::new();
	let mut refused = None;

	for i in 0..=max {
		match Context::create(1) {
			Ok(ctx) => live.push(ctx),
			Err(err) => {
				refused = Some((i, err));
				break;
			}
		}
	}

	log::debug!("created {} contexts", live.len());

	for (i, ctx) in live.iter().enumerate() {
		ctx.destroy()
			.map_err(|err| aio_failure(&format!("destroy {i}"), &err))?;
	}
	drop(live);

	match (fx.strict(), refused) {
		(_, Some((_, ref err))) if !matches!(err, Error::ResourceExhausted { .. }) => {
			return Err(aio_failure("setup", err));
		}
		(true, Some((i, _))) => {
			ensure!(i == max, "setup refused after {i} contexts, expected {max}");
		}
		(true, None) => bail!("setup of context {} was not refused", first_past_limit(max)),
		(false, Some((i, _))) => log::info!("host context limit reached after {i}"),
		(false, None) => log::info!("host allows more than {max} contexts"),
	}

	let again = Context::create(1).or_fail("setup after destroy")?;
	again.destroy().or_fail("destroy")?;

	Ok(Verdict::Pass)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ordinal_past_limit_does_not_overflow() {
		assert_eq!(513, first_past_limit(512));
		assert_eq!(u64::from(u32::MAX) + 1, first_past_limit(u32::MAX));
	}
}
