//! Every scenario, in the order they run.
//!
//! Scenarios share the data file written by the first one, so the order
//! is fixed.

mod cancel;
mod concurrency;
mod faults;
mod lifecycle;
mod notify;
mod process;
mod transfer;

use lxt_harness::{Failure, Verdict};

use crate::fixture::Fixture;

/// One numbered scenario.
pub(crate) struct Scenario {
	/// The number printed in result lines.
	pub id:   u32,
	pub name: &'static str,
	pub run:  fn(&Fixture) -> Result<Verdict, Failure>,
}

pub(crate) const ALL: &[Scenario] = &[
	Scenario {
		id:   1,
		name: "parallel-write-poll",
		run:  transfer::parallel_write_poll,
	},
	Scenario {
		id:   2,
		name: "parallel-read-poll",
		run:  transfer::parallel_read_poll,
	},
	Scenario {
		id:   3,
		name: "parallel-read-block",
		run:  transfer::parallel_read_block,
	},
	Scenario {
		id:   4,
		name: "parallel-read-timed",
		run:  transfer::parallel_read_timed,
	},
	Scenario {
		id:   5,
		name: "bulk-read",
		run:  transfer::bulk_read,
	},
	Scenario {
		id:   6,
		name: "cancel",
		run:  cancel::cancel,
	},
	Scenario {
		id:   7,
		name: "destroy-outstanding",
		run:  lifecycle::destroy_outstanding,
	},
	Scenario {
		id:   8,
		name: "fsync",
		run:  transfer::fsync,
	},
	Scenario {
		id:   9,
		name: "zero-length",
		run:  transfer::zero_length,
	},
	Scenario {
		id:   10,
		name: "short-read-eof",
		run:  transfer::short_read_eof,
	},
	Scenario {
		id:   11,
		name: "setup-validation",
		run:  lifecycle::setup_validation,
	},
	Scenario {
		id:   12,
		name: "fault-isolation",
		run:  faults::fault_isolation,
	},
	Scenario {
		id:   13,
		name: "partial-batch",
		run:  faults::partial_batch,
	},
	Scenario {
		id:   14,
		name: "fork-sharing",
		run:  process::fork_sharing,
	},
	Scenario {
		id:   15,
		name: "concurrent-waiters",
		run:  concurrency::concurrent_waiters,
	},
	Scenario {
		id:   16,
		name: "destroy-while-waiting",
		run:  concurrency::destroy_while_waiting,
	},
	Scenario {
		id:   17,
		name: "signal-interrupt",
		run:  concurrency::signal_interrupt,
	},
	Scenario {
		id:   18,
		name: "teardown-races",
		run:  process::teardown_races,
	},
	Scenario {
		id:   19,
		name: "context-limit",
		run:  lifecycle::context_limit,
	},
	Scenario {
		id:   20,
		name: "eventfd-notify",
		run:  notify::eventfd_notify,
	},
	Scenario {
		id:   21,
		name: "eventfd-malformed",
		run:  notify::eventfd_malformed,
	},
];

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_sequential_and_names_unique() {
		for (i, s) in ALL.iter().enumerate() {
			assert_eq!(i as u32 + 1, s.id);
		}
		let mut names = ALL.iter().map(|s| s.name).collect::<Vec<_>>();
		names.sort_unstable();
		names.dedup();
		assert_eq!(ALL.len(), names.len());
	}
}
