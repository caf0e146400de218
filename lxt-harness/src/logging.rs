//! Logger set-up for suite binaries.
//!
//! Log records go to standard error; standard output carries only the
//! result lines written by [`crate::Reporter`].

/// Maps a `-v` count to a level filter.
#[must_use]
pub fn level_for(verbose: u8) -> log::LevelFilter {
	match verbose {
		0 => log::LevelFilter::Info,
		1 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	}
}

/// Installs the global logger at the level selected by `verbose`.
///
/// A second call is a no-op.
pub fn init(verbose: u8) {
	let level = level_for(verbose);
	log::set_max_level(level);

	if colog::default_builder()
		.filter_level(level)
		.try_init()
		.is_err()
	{
		log::debug!("logger already installed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_levels() {
		assert_eq!(log::LevelFilter::Info, level_for(0));
		assert_eq!(log::LevelFilter::Debug, level_for(1));
		assert_eq!(log::LevelFilter::Trace, level_for(2));
		assert_eq!(log::LevelFilter::Trace, level_for(9));
	}
}
