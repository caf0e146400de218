//! Errors reported by the completion-queue client.

/// The client operation that produced an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Op {
	Create,
	Submit,
	Wait,
	Cancel,
	Destroy,
}

/// An error returned by [`crate::Context`].
///
/// The same errno means different things depending on the operation
/// (e.g. `EINVAL` from `submit` is a rejected request, from `cancel`
/// it means the request is not cancellable anymore), so the variant is
/// chosen per [`Op`]. The raw code stays available via [`Error::errno`]
/// because conformance checks assert on exact codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// A context handle or argument was rejected.
	#[error("{op}: invalid argument")]
	InvalidArgument { op: Op },
	/// A request in a submitted batch was rejected at submit time.
	#[error("submit: invalid request")]
	InvalidRequest,
	/// Too many live contexts or reserved request slots.
	#[error("{op}: resource exhausted (errno {errno})")]
	ResourceExhausted { op: Op, errno: i32 },
	/// A request's target (or notification) descriptor is unusable.
	#[error("{op}: bad file descriptor")]
	BadDescriptor { op: Op },
	/// A user pointer handed to the kernel was invalid.
	#[error("{op}: bad address")]
	Fault { op: Op },
	/// The request to cancel is unknown or already completed.
	#[error("cancel: request not found")]
	NotFound,
	/// The kernel does not implement the operation for this target.
	#[error("{op}: operation not supported (errno {errno})")]
	NotSupported { op: Op, errno: i32 },
	/// The context is busy.
	#[error("{op}: busy")]
	Busy { op: Op },
	/// The kernel returned a completion for an iocb that is not in flight.
	///
	/// This is either a duplicate delivery or a corrupted record. The
	/// known completions reaped by the same call are consumed with it;
	/// their tags are in `discarded`.
	#[error(
		"wait: completion for unknown request (obj {obj:#x}, data {data}), {} other completions discarded",
		discarded.len()
	)]
	Orphan {
		obj:       u64,
		data:      u64,
		discarded: Vec<u64>,
	},
	/// Any errno not covered above.
	#[error("{op}: unexpected errno {errno}")]
	Os { op: Op, errno: i32 },
}

impl Error {
	/// Classifies `errno` as returned by `op`.
	pub fn from_errno(op: Op, errno: i32) -> Self {
		match (op, errno) {
			(Op::Submit, libc::EINVAL) => Self::InvalidRequest,
			(Op::Cancel, libc::EINVAL) => Self::NotFound,
			(Op::Cancel, libc::EAGAIN) => Self::NotSupported { op, errno },
			(_, libc::EINVAL) => Self::InvalidArgument { op },
			(_, libc::EAGAIN | libc::ENOMEM) => Self::ResourceExhausted { op, errno },
			(_, libc::EBADF) => Self::BadDescriptor { op },
			(_, libc::EFAULT) => Self::Fault { op },
			(_, libc::ENOSYS | libc::EOPNOTSUPP) => Self::NotSupported { op, errno },
			(_, libc::EBUSY) => Self::Busy { op },
			(op, errno) => Self::Os { op, errno },
		}
	}

	/// The raw errno behind this error, if it came from the kernel.
	pub fn errno(&self) -> Option<i32> {
		match *self {
			Self::InvalidArgument { .. } | Self::InvalidRequest | Self::NotFound => Some(libc::EINVAL),
			Self::ResourceExhausted { errno, .. }
			| Self::NotSupported { errno, .. }
			| Self::Os { errno, .. } => Some(errno),
			Self::BadDescriptor { .. } => Some(libc::EBADF),
			Self::Fault { .. } => Some(libc::EFAULT),
			Self::Busy { .. } => Some(libc::EBUSY),
			Self::Orphan { .. } => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn einval_depends_on_operation() {
		assert_eq!(Error::InvalidRequest, Error::from_errno(Op::Submit, libc::EINVAL));
		assert_eq!(Error::NotFound, Error::from_errno(Op::Cancel, libc::EINVAL));
		assert_eq!(
			Error::InvalidArgument { op: Op::Wait },
			Error::from_errno(Op::Wait, libc::EINVAL)
		);
	}

	#[test]
	fn exhaustion_keeps_raw_errno() {
		let err = Error::from_errno(Op::Create, libc::EAGAIN);
		assert_eq!(
			Error::ResourceExhausted {
				op:    Op::Create,
				errno: libc::EAGAIN,
			},
			err
		);
		assert_eq!(Some(libc::EAGAIN), err.errno());
	}

	#[test]
	fn unknown_errno_is_preserved() {
		let err = Error::from_errno(Op::Destroy, libc::EPERM);
		assert_eq!(Some(libc::EPERM), err.errno());
		assert_eq!("destroy: unexpected errno 1", err.to_string());
	}
}
