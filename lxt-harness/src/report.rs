//! The `PASS`/`FAIL`/`SKIP` line protocol.

use std::io::{self, Write};

/// A non-failing scenario outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
	/// Every check held.
	Pass,
	/// The scenario could not run here.
	Skip(String),
}

/// A conformance deviation, fatal to the suite.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Failure(pub String);

impl Failure {
	/// An unexpected return code, formatted as `"<what> <rc> <errno>"`.
	#[must_use]
	pub fn errno(what: &str, rc: i64, errno: i32) -> Self {
		Self(format!("{what} {rc} {errno}"))
	}
}

impl From<String> for Failure {
	fn from(msg: String) -> Self {
		Self(msg)
	}
}

impl From<&str> for Failure {
	fn from(msg: &str) -> Self {
		Self(msg.to_owned())
	}
}

/// Writes result lines for one suite.
///
/// Every line is flushed immediately so that output ordering survives
/// `fork` and a hard `exit`.
#[derive(Debug)]
pub struct Reporter<W: Write = io::Stdout> {
	suite: String,
	out:   W,
}

impl Reporter {
	/// A reporter writing to standard output.
	#[must_use]
	pub fn stdout(suite: impl Into<String>) -> Self {
		Self::new(suite, io::stdout())
	}
}

impl<W: Write> Reporter<W> {
	/// A reporter writing to `out`.
	pub fn new(suite: impl Into<String>, out: W) -> Self {
		Self {
			suite: suite.into(),
			out,
		}
	}

	/// The suite name prefixed to every check.
	#[must_use]
	pub fn suite(&self) -> &str {
		&self.suite
	}

	/// Records the outcome of check `id`.
	pub fn record(
		&mut self,
		id: impl core::fmt::Display,
		outcome: &Result<Verdict, Failure>,
	) -> io::Result<()> {
		let line = match outcome {
			Ok(Verdict::Pass) => format!("PASS {} {id}", self.suite),
			Ok(Verdict::Skip(reason)) => format!("SKIP {} {id}: {reason}", self.suite),
			Err(failure) => format!("FAIL {} {id}: {failure}", self.suite),
		};
		self.emit(&line)
	}

	/// Records that the whole suite passed.
	pub fn suite_passed(&mut self) -> io::Result<()> {
		let line = format!("PASS {}", self.suite);
		self.emit(&line)
	}

	fn emit(&mut self, line: &str) -> io::Result<()> {
		writeln!(self.out, "{line}")?;
		self.out.flush()
	}

	/// Consumes the reporter, returning the writer.
	pub fn into_inner(self) -> W {
		self.out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lines(f: impl FnOnce(&mut Reporter<Vec<u8>>)) -> String {
		let mut r = Reporter::new("aio", Vec::new());
		f(&mut r);
		String::from_utf8(r.into_inner()).unwrap()
	}

	#[test]
	fn pass_line() {
		assert_eq!(
			"PASS aio 3\n",
			lines(|r| r.record(3, &Ok(Verdict::Pass)).unwrap())
		);
	}

	#[test]
	fn fail_line_uses_errno_format() {
		let out = lines(|r| {
			r.record(12, &Err(Failure::errno("submit", -1, 22)))
				.unwrap();
		});
		assert_eq!("FAIL aio 12: submit -1 22\n", out);
	}

	#[test]
	fn skip_and_suite_lines() {
		let out = lines(|r| {
			r.record(19, &Ok(Verdict::Skip("limit not reached".into())))
				.unwrap();
			r.suite_passed().unwrap();
		});
		assert_eq!("SKIP aio 19: limit not reached\nPASS aio\n", out);
	}
}
