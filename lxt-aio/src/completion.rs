//! Results delivered for finished requests.

use crate::request::Request;

/// The outcome of one previously submitted [`Request`].
///
/// Ownership of the request (and so of its buffer) returns to the caller
/// with the completion.
#[derive(Debug)]
pub struct Completion {
	request: Request,
	data:    u64,
	result:  i64,
	res2:    i64,
}

impl Completion {
	pub(crate) fn new(request: Request, data: u64, result: i64, res2: i64) -> Self {
		Self {
			request,
			data,
			result,
			res2,
		}
	}

	/// The originating request.
	#[must_use]
	pub fn request(&self) -> &Request {
		&self.request
	}

	/// Consumes the completion, returning the originating request.
	#[must_use]
	pub fn into_request(self) -> Request {
		self.request
	}

	/// The correlation tag as reported by the kernel.
	///
	/// This is checked against [`Request::tag`] by conformance scenarios;
	/// the two must always agree.
	#[must_use]
	pub fn tag(&self) -> u64 {
		self.data
	}

	/// The raw result: bytes transferred, or a negated errno.
	#[must_use]
	pub fn result(&self) -> i64 {
		self.result
	}

	/// The secondary result word.
	#[must_use]
	pub fn res2(&self) -> i64 {
		self.res2
	}

	/// Splits the result into a byte count or a positive errno.
	pub fn bytes(&self) -> Result<usize, i32> {
		if self.result < 0 {
			Err(i32::try_from(-self.result).unwrap_or(libc::EIO))
		} else {
			Ok(usize::try_from(self.result).unwrap_or(usize::MAX))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negative_result_is_errno() {
		let c = Completion::new(Request::noop().build(), 0, -i64::from(libc::EFAULT), 0);
		assert_eq!(Err(libc::EFAULT), c.bytes());
	}

	#[test]
	fn positive_result_is_byte_count() {
		let c = Completion::new(Request::read(0, 512).tag(3).build(), 3, 512, 0);
		assert_eq!(Ok(512), c.bytes());
		assert_eq!(c.request().tag(), c.tag());
	}
}
