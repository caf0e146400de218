//! Which reference behaviour the system under test is held to.

use std::ffi::CStr;

/// Marker in `uname(2)`'s version string of the emulation layer.
const EMULATED_VERSION_MARKER: &str = "BrandZ";

/// Compatibility mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CompatMode {
	/// `Strict` on the emulation layer, `Native` elsewhere.
	#[default]
	Auto,
	/// Held to the full reference contract.
	Strict,
	/// Held to the host kernel's own (tunable) behaviour.
	Native,
}

impl CompatMode {
	/// Resolves [`CompatMode::Auto`] by asking the running kernel.
	#[must_use]
	pub fn resolve(self) -> Self {
		match self {
			Self::Auto => {
				let version = kernel_version().unwrap_or_default();
				let mode = Self::for_version(&version);
				log::debug!("kernel version {version:?} selects {mode} mode");
				mode
			}
			other => other,
		}
	}

	/// The mode [`CompatMode::Auto`] resolves to for a `uname` version string.
	#[must_use]
	pub fn for_version(version: &str) -> Self {
		if version.contains(EMULATED_VERSION_MARKER) {
			Self::Strict
		} else {
			Self::Native
		}
	}

	/// Whether the reference contract applies in full.
	///
	/// Only meaningful after [`CompatMode::resolve`].
	#[must_use]
	pub fn is_strict(self) -> bool {
		self == Self::Strict
	}
}

/// The `version` field of `uname(2)`.
fn kernel_version() -> Option<String> {
	// SAFETY: `utsname` is plain old data.
	let mut uts = unsafe { core::mem::zeroed::<libc::utsname>() };
	// SAFETY: `uts` is writable.
	if unsafe { libc::uname(&raw mut uts) } != 0 {
		log::warn!("uname failed: {}", std::io::Error::last_os_error());
		return None;
	}

	// SAFETY: The kernel NUL-terminates every `utsname` field.
	let version = unsafe { CStr::from_ptr(uts.version.as_ptr()) };
	Some(version.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_and_prints_lowercase() {
		assert_eq!(Some(CompatMode::Strict), "strict".parse().ok());
		assert_eq!(Some(CompatMode::Native), "native".parse().ok());
		assert_eq!(Some(CompatMode::Auto), "auto".parse().ok());
		assert!("lax".parse::<CompatMode>().is_err());
		assert_eq!("native", CompatMode::Native.to_string());
	}

	#[test]
	fn emulation_marker_selects_strict() {
		assert_eq!(
			CompatMode::Strict,
			CompatMode::for_version("BrandZ virtual linux")
		);
		assert_eq!(
			CompatMode::Native,
			CompatMode::for_version("#1 SMP PREEMPT_DYNAMIC")
		);
	}

	#[test]
	fn explicit_modes_resolve_to_themselves() {
		assert_eq!(CompatMode::Strict, CompatMode::Strict.resolve());
		assert_eq!(CompatMode::Native, CompatMode::Native.resolve());
		assert_ne!(CompatMode::Auto, CompatMode::Auto.resolve());
	}
}
