#![doc = include_str!("../README.md")]

mod compat;
pub mod isolate;
pub mod logging;
mod report;
mod scratch;

pub use self::{
	compat::CompatMode,
	isolate::{IsolateError, Outcome},
	report::{Failure, Reporter, Verdict},
	scratch::{ScratchError, ScratchFile},
};
