//! Conformance suite for the kernel asynchronous I/O interface.
//!
//! Runs every scenario in a fixed order, printing one `PASS`/`FAIL`/`SKIP`
//! line per scenario on standard output and a final `PASS aio` when all
//! of them held. The first failure stops the run with exit status 1.

/// Fails the current scenario with a formatted message.
macro_rules! bail {
	($($arg:tt)*) => {
		return Err(::lxt_harness::Failure(format!($($arg)*)))
	};
}

/// Fails the current scenario unless `$cond` holds.
macro_rules! ensure {
	($cond:expr, $($arg:tt)*) => {
		if !$cond {
			bail!($($arg)*);
		}
	};
}

pub(crate) mod fixture;
pub(crate) mod scenario;

use std::path::PathBuf;

use clap::{Parser, builder::TypedValueParser};
use lxt_harness::{CompatMode, Reporter};

use crate::fixture::Fixture;

/// aio: asynchronous I/O conformance suite
///
/// Exercises io_setup, io_submit, io_getevents, io_cancel and io_destroy
/// and checks every observable result against the reference behaviour.
#[derive(Parser, Debug)]
struct Args {
	/// Which reference behaviour to hold the system to.
	#[clap(
		long,
		default_value = "auto",
		value_parser = clap::builder::PossibleValuesParser::new(["auto", "strict", "native"])
			.try_map(|s| s.parse::<CompatMode>())
	)]
	mode:         CompatMode,
	/// Reference number of simultaneously live contexts.
	#[clap(long, default_value_t = 512)]
	max_contexts: u32,
	/// Directory for the data file (defaults to the system temp directory).
	#[clap(long)]
	scratch_dir:  Option<PathBuf>,
	/// List the scenarios and exit.
	#[clap(long)]
	list:         bool,
	/// Log verbosely. Specify multiple times for more verbosity.
	#[clap(long, short = 'v', action = clap::ArgAction::Count)]
	verbose:      u8,
}

/// A scenario failed; its `FAIL` line has already been printed.
#[derive(Debug, thiserror::Error)]
#[error("scenario {0} failed")]
struct ScenarioFailed(u32);

fn pmain() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	lxt_harness::logging::init(args.verbose);

	if args.list {
		for s in scenario::ALL {
			println!("{} {}", s.id, s.name);
		}
		return Ok(());
	}

	let mode = args.mode.resolve();
	log::info!("running in {mode} mode");

	let dir = args.scratch_dir.unwrap_or_else(std::env::temp_dir);
	let fixture = Fixture::new(&dir, mode, args.max_contexts)?;
	let mut reporter = Reporter::stdout("aio");

	for s in scenario::ALL {
		log::info!("scenario {} ({})", s.id, s.name);
		let outcome = (s.run)(&fixture);
		reporter.record(s.id, &outcome)?;
		if outcome.is_err() {
			return Err(ScenarioFailed(s.id).into());
		}
	}

	reporter.suite_passed()?;
	Ok(())
}

fn main() {
	// `pmain` owns every scratch resource, so they are gone before `exit`.
	if let Err(e) = pmain() {
		log::error!("fatal: {}", e);
		std::process::exit(1);
	}
}
