//! The per-process scratch data file.

use std::{
	fs::{File, OpenOptions},
	io,
	os::fd::{AsRawFd, RawFd},
	path::{Path, PathBuf},
};

/// Failure to set up the scratch file.
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
	/// The file could not be created.
	#[error("failed to create scratch file {path}: {source}")]
	Create {
		/// The path that was attempted.
		path:   PathBuf,
		/// The underlying error.
		source: io::Error,
	},
	/// The file could not be reopened.
	#[error("failed to reopen scratch file {path}: {source}")]
	Reopen {
		/// The scratch file's path.
		path:   PathBuf,
		/// The underlying error.
		source: io::Error,
	},
}

/// A read-write file named `lxtmp<pid>`, removed when dropped.
#[derive(Debug)]
pub struct ScratchFile {
	path: PathBuf,
	file: File,
}

impl ScratchFile {
	/// The file name used for process `pid`.
	#[must_use]
	pub fn file_name(pid: u32) -> String {
		format!("lxtmp{pid}")
	}

	/// Creates (or truncates) the scratch file for this process in `dir`.
	pub fn create(dir: &Path) -> Result<Self, ScratchError> {
		let path = dir.join(Self::file_name(std::process::id()));
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&path)
			.map_err(|source| {
				ScratchError::Create {
					path: path.clone(),
					source,
				}
			})?;

		log::debug!("created scratch file {}", path.display());
		Ok(Self { path, file })
	}

	/// The file's path.
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// The read-write handle.
	#[must_use]
	pub fn file(&self) -> &File {
		&self.file
	}

	/// Opens a second, read-only handle to the same file.
	pub fn open_read_only(&self) -> Result<File, ScratchError> {
		File::open(&self.path).map_err(|source| {
			ScratchError::Reopen {
				path: self.path.clone(),
				source,
			}
		})
	}

	/// The size of the file in bytes.
	pub fn len(&self) -> io::Result<u64> {
		Ok(self.file.metadata()?.len())
	}
}

impl AsRawFd for ScratchFile {
	fn as_raw_fd(&self) -> RawFd {
		self.file.as_raw_fd()
	}
}

impl Drop for ScratchFile {
	fn drop(&mut self) {
		match std::fs::remove_file(&self.path) {
			Ok(()) => log::debug!("removed scratch file {}", self.path.display()),
			Err(err) if err.kind() == io::ErrorKind::NotFound => {}
			Err(err) => {
				log::warn!(
					"failed to remove scratch file {}: {err}",
					self.path.display()
				);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{io::Write, os::unix::fs::FileExt};

	use super::*;

	#[test]
	fn named_after_pid_and_removed_on_drop() {
		let dir = tempfile::tempdir().unwrap();
		let path = {
			let scratch = ScratchFile::create(dir.path()).unwrap();
			assert_eq!(
				Some(ScratchFile::file_name(std::process::id()).as_str()),
				scratch.path().file_name().and_then(|n| n.to_str())
			);
			assert!(scratch.path().exists());
			scratch.path().to_owned()
		};
		assert!(!path.exists());
	}

	#[test]
	fn read_only_handle_sees_writes() {
		let dir = tempfile::tempdir().unwrap();
		let scratch = ScratchFile::create(dir.path()).unwrap();
		let mut rw = scratch.file();
		rw.write_all(b"abc").unwrap();
		assert_eq!(3, scratch.len().unwrap());

		let ro = scratch.open_read_only().unwrap();
		let mut buf = [0; 3];
		ro.read_exact_at(&mut buf, 0).unwrap();
		assert_eq!(b"abc", &buf);
		assert!(ro.write_at(b"x", 0).is_err());
	}

	#[test]
	fn missing_directory_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let err = ScratchFile::create(&dir.path().join("nope")).unwrap_err();
		assert!(matches!(err, ScratchError::Create { .. }));
	}
}
