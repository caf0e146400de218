//! Contexts across `fork` and across abrupt process teardown.

use std::{
	os::fd::AsRawFd,
	sync::{Arc, Barrier},
	thread,
	time::Duration,
};

use lxt_aio::{Context, Error, Request};
use lxt_harness::{Failure, Outcome, Verdict, isolate};

use crate::fixture::{BLKSIZE, DEADLINE, Fixture, NPAR, OrFail, SETTLE, block_reads, check_block, reap_one};

/// A forked child cannot use its parent's context; the parent's context
/// keeps working.
pub(super) fn fork_sharing(fx: &Fixture) -> Result<Verdict, Failure> {
	let file = fx.reader()?;
	let fd = file.as_raw_fd();
	let ctx = Context::create(2).or_fail("setup")?;

	let submitted = ctx
		.submit(vec![Request::read(fd, BLKSIZE).tag(0).build()])
		.or_fail("submit")?
		.count();
	ensure!(submitted == 1, "submit {submitted} 0");

	let outcome = isolate::in_child(DEADLINE, || {
		let invalid = |err: &Error| err.errno() == Some(libc::EINVAL);

		match ctx.submit(vec![Request::read(fd, BLKSIZE).tag(1).build()]) {
			Err(ref err) if invalid(err) => {}
			_ => return 1,
		}

		match ctx.wait(0, 1, Some(Duration::ZERO)) {
			Err(ref err) if invalid(err) => {}
			_ => return 2,
		}

		match ctx.destroy() {
			Err(ref err) if invalid(err) => 0,
			_ => 3,
		}
	})
	.or_fail("fork")?;

	match outcome {
		Outcome::Exited(0) => {}
		Outcome::Exited(1) => bail!("child could submit to the parent's context"),
		Outcome::Exited(2) => bail!("child could wait on the parent's context"),
		Outcome::Exited(3) => bail!("child could destroy the parent's context"),
		other => bail!("child: {other}"),
	}

	let c = reap_one(&ctx, None)?;
	ensure!(c.tag() == 0, "unexpected data tag");
	check_block(&c)?;

	ctx.destroy().or_fail("destroy")?;
	Ok(Verdict::Pass)
}

/// How the isolated process ends while a thread is blocked in `wait`.
#[derive(Debug, Clone, Copy)]
enum Teardown {
	/// The main thread exits.
	Exit,
	/// The process aborts.
	Abort,
	/// The process kills itself.
	Kill,
	/// Another thread destroys the context as the main thread exits.
	DestroyRacingExit,
}

impl Teardown {
	const ALL: [Self; 4] = [Self::Exit, Self::Abort, Self::Kill, Self::DestroyRacingExit];

	fn expected(self) -> Outcome {
		match self {
			Self::Exit | Self::DestroyRacingExit => Outcome::Exited(0),
			Self::Abort => Outcome::Signaled(libc::SIGABRT),
			Self::Kill => Outcome::Signaled(libc::SIGKILL),
		}
	}
}

/// Child exit codes for setup problems, distinct from [`Teardown::expected`].
const CHILD_SETUP_FAILED: i32 = 10;
const CHILD_SUBMIT_FAILED: i32 = 11;
const CHILD_SPAWN_FAILED: i32 = 12;
const CHILD_SURVIVED_KILL: i32 = 13;

/// The body of one isolated teardown case.
fn teardown_child(fx: &Fixture, how: Teardown) -> i32 {
	let Ok(file) = fx.reader() else {
		return CHILD_SETUP_FAILED;
	};
	let Ok(ctx) = Context::create(NPAR as u32 + 1) else {
		return CHILD_SETUP_FAILED;
	};
	let ctx = Arc::new(ctx);

	if !matches!(ctx.submit(block_reads(file.as_raw_fd())), Ok(ref s) if s.count() == NPAR) {
		return CHILD_SUBMIT_FAILED;
	}

	// Asks for more than was submitted, so it never returns on its own.
	let waiter = Arc::clone(&ctx);
	let spawned = thread::Builder::new()
		.name("aio-waiter".into())
		.spawn(move || waiter.wait(NPAR + 1, NPAR + 1, None));
	if spawned.is_err() {
		return CHILD_SPAWN_FAILED;
	}

	thread::sleep(SETTLE);

	match how {
		Teardown::Exit => 0,
		Teardown::Abort => std::process::abort(),
		Teardown::Kill => {
			// SAFETY: Signals our own process; no memory is involved.
			unsafe {
				libc::kill(libc::getpid(), libc::SIGKILL);
			}
			thread::sleep(DEADLINE);
			CHILD_SURVIVED_KILL
		}
		Teardown::DestroyRacingExit => {
			let start = Arc::new(Barrier::new(2));
			let destroyer = {
				let ctx = Arc::clone(&ctx);
				let start = Arc::clone(&start);
				thread::Builder::new()
					.name("aio-destroyer".into())
					.spawn(move || {
						start.wait();
						let _ = ctx.destroy();
					})
			};
			if destroyer.is_err() {
				return CHILD_SPAWN_FAILED;
			}
			start.wait();
			0
		}
	}
}

/// Process teardown with a thread blocked in `wait` neither hangs nor
/// crashes, however the process goes away.
pub(super) fn teardown_races(fx: &Fixture) -> Result<Verdict, Failure> {
	for how in Teardown::ALL {
		log::debug!("teardown case {how:?}");
		let outcome =
			isolate::in_child(DEADLINE, || teardown_child(fx, how)).or_fail(&format!("{how:?}"))?;
		ensure!(
			outcome == how.expected(),
			"{how:?}: child {outcome}, expected {}",
			how.expected()
		);
	}

	Ok(Verdict::Pass)
}
