//! Fault domains for scenario bodies whose failure mode is fatal.
//!
//! A body run through [`in_child`] may be killed, abort, or `exit` the
//! process without taking the suite down with it. The child is always
//! reaped, on every path out of [`in_child`].

use std::{
	io::{self, Write},
	panic::{self, AssertUnwindSafe},
	sync::mpsc,
	thread,
	time::Duration,
};

/// How long a killed child gets to be reaped before it is given up on.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Exit status of a child whose body panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

/// How an isolated child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// Exited normally with this status.
	Exited(i32),
	/// Killed by this signal.
	Signaled(i32),
}

impl Outcome {
	/// Decodes a `waitpid` status, or `None` for stop/continue reports.
	#[must_use]
	pub fn from_status(status: libc::c_int) -> Option<Self> {
		if libc::WIFEXITED(status) {
			Some(Self::Exited(libc::WEXITSTATUS(status)))
		} else if libc::WIFSIGNALED(status) {
			Some(Self::Signaled(libc::WTERMSIG(status)))
		} else {
			None
		}
	}

	/// Whether the child exited with status 0.
	#[must_use]
	pub fn is_success(self) -> bool {
		self == Self::Exited(0)
	}
}

impl core::fmt::Display for Outcome {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			Self::Exited(code) => write!(f, "exit status {code}"),
			Self::Signaled(sig) => write!(f, "killed by signal {sig}"),
		}
	}
}

/// An error raised by the isolation helpers themselves.
#[derive(Debug, thiserror::Error)]
pub enum IsolateError {
	/// `fork(2)` failed.
	#[error("failed to fork: {0}")]
	Fork(io::Error),
	/// `waitpid(2)` failed.
	#[error("failed to wait for child: {0}")]
	Wait(io::Error),
	/// A helper thread could not be started.
	#[error("failed to spawn thread: {0}")]
	Spawn(io::Error),
	/// The child did not terminate in time and was killed.
	#[error("child {pid} did not finish within {deadline:?}")]
	Timeout {
		/// The killed child.
		pid:      libc::pid_t,
		/// The deadline it missed.
		deadline: Duration,
	},
	/// The isolated thread did not finish in time and was abandoned.
	#[error("thread did not finish within {0:?}")]
	ThreadTimeout(Duration),
	/// The isolated thread panicked.
	#[error("isolated thread panicked")]
	Panicked,
}

/// A forked child that is killed and reaped if dropped unreaped.
struct Child {
	pid:    libc::pid_t,
	reaped: bool,
}

impl Child {
	fn wait_timeout(mut self, deadline: Duration) -> Result<Outcome, IsolateError> {
		let pid = self.pid;
		let (tx, rx) = mpsc::channel();

		thread::Builder::new()
			.name(format!("reap-{pid}"))
			.spawn(move || {
				let _ = tx.send(wait_blocking(pid));
			})
			.map_err(IsolateError::Spawn)?;

		// From here on the reaper thread owns the wait.
		self.reaped = true;

		if let Ok(res) = rx.recv_timeout(deadline) {
			return res.map_err(IsolateError::Wait);
		}

		log::warn!("child {pid} missed its {deadline:?} deadline; killing it");
		// SAFETY: `pid` is our unreaped child; no memory is involved.
		unsafe {
			libc::kill(pid, libc::SIGKILL);
		}

		if rx.recv_timeout(REAP_GRACE).is_err() {
			log::warn!("child {pid} did not exit in time; zombie process may remain");
		}

		Err(IsolateError::Timeout { pid, deadline })
	}
}

impl Drop for Child {
	fn drop(&mut self) {
		if self.reaped {
			return;
		}

		// SAFETY: `pid` is our unreaped child; no memory is involved.
		unsafe {
			libc::kill(self.pid, libc::SIGKILL);
		}

		if let Err(err) = wait_blocking(self.pid) {
			log::warn!("failed to reap child {}: {err}", self.pid);
		}
	}
}

fn wait_blocking(pid: libc::pid_t) -> io::Result<Outcome> {
	loop {
		let mut status = 0;
		// SAFETY: `status` is writable.
		let rc = unsafe { libc::waitpid(pid, &raw mut status, 0) };
		if rc < 0 {
			let err = io::Error::last_os_error();
			if err.kind() == io::ErrorKind::Interrupted {
				continue;
			}
			return Err(err);
		}

		if let Some(outcome) = Outcome::from_status(status) {
			return Ok(outcome);
		}
	}
}

/// Runs `body` in a forked child and waits up to `deadline` for it.
///
/// The child exits with whatever `body` returns, without running any
/// destructors or `atexit` handlers of the parent's state. A panicking
/// body exits with [`PANIC_EXIT_CODE`] instead. A child still
/// running at the deadline is killed, reaped, and reported as
/// [`IsolateError::Timeout`].
///
/// Standard output is flushed before forking so buffered lines are not
/// emitted twice.
pub fn in_child(deadline: Duration, body: impl FnOnce() -> i32) -> Result<Outcome, IsolateError> {
	let _ = io::stdout().flush();
	let _ = io::stderr().flush();

	// SAFETY: The child runs `body` and leaves through `_exit`, never
	// SAFETY: returning into the parent's stack frames.
	let pid = unsafe { libc::fork() };

	if pid < 0 {
		return Err(IsolateError::Fork(io::Error::last_os_error()));
	}

	if pid == 0 {
		// Unwinding past this frame would run the parent's destructors.
		let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(PANIC_EXIT_CODE);
		// SAFETY: Terminates the child immediately.
		unsafe { libc::_exit(code) }
	}

	log::debug!("forked isolated child {pid}");

	let outcome = Child { pid, reaped: false }.wait_timeout(deadline)?;
	log::debug!("isolated child {pid}: {outcome}");
	Ok(outcome)
}

/// Runs `body` on its own thread and waits up to `deadline` for it.
///
/// A thread that misses the deadline is abandoned (threads cannot be
/// killed), so use [`in_child`] when the body may hang for good.
pub fn on_thread<T: Send + 'static>(
	name: &str,
	deadline: Duration,
	body: impl FnOnce() -> T + Send + 'static,
) -> Result<T, IsolateError> {
	let (tx, rx) = mpsc::channel();

	let handle = thread::Builder::new()
		.name(name.to_owned())
		.spawn(move || {
			let _ = tx.send(body());
		})
		.map_err(IsolateError::Spawn)?;

	match rx.recv_timeout(deadline) {
		Ok(value) => {
			let _ = handle.join();
			Ok(value)
		}
		Err(mpsc::RecvTimeoutError::Timeout) => Err(IsolateError::ThreadTimeout(deadline)),
		Err(mpsc::RecvTimeoutError::Disconnected) => Err(IsolateError::Panicked),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_exit_and_signal_statuses() {
		assert_eq!(Some(Outcome::Exited(0)), Outcome::from_status(0));
		assert_eq!(Some(Outcome::Exited(1)), Outcome::from_status(1 << 8));
		assert_eq!(
			Some(Outcome::Signaled(libc::SIGKILL)),
			Outcome::from_status(libc::SIGKILL)
		);
		// Stopped by SIGSTOP.
		assert_eq!(None, Outcome::from_status((libc::SIGSTOP << 8) | 0x7f));
	}

	#[test]
	fn child_exit_code_is_reported() {
		let outcome = in_child(Duration::from_secs(10), || 3).unwrap();
		assert_eq!(Outcome::Exited(3), outcome);
		assert!(!outcome.is_success());
	}

	#[test]
	fn child_abort_is_contained() {
		let outcome = in_child(Duration::from_secs(10), || std::process::abort()).unwrap();
		assert_eq!(Outcome::Signaled(libc::SIGABRT), outcome);
	}

	#[test]
	fn child_panic_stays_in_the_child() {
		let dir = tempfile::tempdir().unwrap();
		let scratch = crate::ScratchFile::create(dir.path()).unwrap();

		let outcome = in_child(Duration::from_secs(10), || -> i32 { panic!("boom") }).unwrap();

		assert_eq!(Outcome::Exited(PANIC_EXIT_CODE), outcome);
		assert!(!outcome.is_success());
		assert!(scratch.path().exists());
		assert!(dir.path().exists());
	}

	#[test]
	fn hung_child_is_killed_at_deadline() {
		let err = in_child(Duration::from_millis(100), || {
			loop {
				thread::sleep(Duration::from_secs(60));
			}
		})
		.unwrap_err();
		assert!(matches!(err, IsolateError::Timeout { .. }));
	}

	#[test]
	fn thread_result_is_returned() {
		assert_eq!(7, on_thread("t", Duration::from_secs(10), || 7).unwrap());
	}

	#[test]
	fn thread_panic_is_reported() {
		let err = on_thread("p", Duration::from_secs(10), || -> u8 { panic!("boom") }).unwrap_err();
		assert!(matches!(err, IsolateError::Panicked));
	}
}
