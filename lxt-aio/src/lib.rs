#![doc = include_str!("../README.md")]

mod completion;
mod context;
mod error;
mod eventfd;
mod guard;
mod request;
pub mod sys;

pub use self::{
	completion::Completion,
	context::{Context, Submission},
	error::{Error, Op},
	eventfd::EventFd,
	guard::GuardPage,
	request::{Buffer, ForeignAddress, Opcode, Request, RequestBuilder, RequestId},
};
