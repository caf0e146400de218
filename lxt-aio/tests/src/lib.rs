//! Behavioural tests for the [`lxt-aio`] crate.
//!
//! These talk to the running kernel, so they only exercise behaviour that
//! does not depend on host tunables.
#![cfg(test)]

use std::{
	fs::File,
	os::{fd::AsRawFd, unix::fs::FileExt},
	sync::{Arc, mpsc},
	time::Duration,
};

use lxt_aio::*;

const BLOCK: usize = 512;

fn block(n: u64) -> Vec<u8> {
	let mut data = vec![0xa5; BLOCK];
	let tag = format!("block {n}");
	data[..tag.len()].copy_from_slice(tag.as_bytes());
	data
}

fn file_with_blocks(count: u64) -> File {
	let file = tempfile::tempfile().unwrap();
	for n in 0..count {
		file.write_all_at(&block(n), n * BLOCK as u64).unwrap();
	}
	file
}

fn block_offset(n: u64) -> i64 {
	i64::try_from(n).unwrap() * BLOCK as i64
}

#[test]
fn writes_complete_with_their_own_tags() {
	let file = tempfile::tempfile().unwrap();
	let ctx = Context::create(8).unwrap();

	let batch = (0..4)
		.map(|n| {
			Request::write(file.as_raw_fd(), block(n))
				.tag(n)
				.offset(block_offset(n))
				.build()
		})
		.collect();

	assert_eq!(4, ctx.submit(batch).unwrap().count());

	let mut seen = Vec::new();
	while seen.len() < 4 {
		for c in ctx.wait(1, 4, None).unwrap() {
			assert_eq!(c.request().tag(), c.tag());
			assert_eq!(block_offset(c.tag()), c.request().offset());
			assert_eq!(Ok(BLOCK), c.bytes());
			seen.push(c.tag());
		}
	}
	seen.sort_unstable();
	assert_eq!(vec![0, 1, 2, 3], seen);
	assert_eq!(0, ctx.in_flight());

	let mut back = vec![0; BLOCK];
	file.read_exact_at(&mut back, 2 * BLOCK as u64).unwrap();
	assert_eq!(block(2), back);
}

#[test]
fn reads_return_file_contents() {
	let file = file_with_blocks(3);
	let ctx = Context::create(4).unwrap();

	let batch = (0..3)
		.map(|n| {
			Request::read(file.as_raw_fd(), BLOCK)
				.tag(n)
				.offset(block_offset(n))
				.build()
		})
		.collect();
	ctx.submit(batch).unwrap();

	let completions = ctx.wait(3, 3, Some(Duration::from_secs(5))).unwrap();
	assert_eq!(3, completions.len());
	for c in completions {
		assert_eq!(Some(&block(c.tag())[..]), c.request().data());
	}
}

#[test]
fn empty_wait_returns_immediately() {
	let ctx = Context::create(1).unwrap();
	assert!(ctx.wait(0, 0, None).unwrap().is_empty());
	assert!(ctx.wait(0, 1, Some(Duration::ZERO)).unwrap().is_empty());
}

#[test]
fn bounded_wait_times_out_empty() {
	let ctx = Context::create(1).unwrap();
	let got = ctx.wait(1, 1, Some(Duration::from_millis(10))).unwrap();
	assert!(got.is_empty());
}

#[test]
fn min_above_max_is_rejected() {
	let ctx = Context::create(1).unwrap();
	assert_eq!(
		Err(Error::InvalidArgument { op: Op::Wait }),
		ctx.wait(2, 1, Some(Duration::ZERO)).map(|v| v.len())
	);
}

#[test]
fn zero_capacity_is_rejected() {
	assert_eq!(
		Some(Error::InvalidArgument { op: Op::Create }),
		Context::create(0).err()
	);
}

#[test]
fn unknown_opcode_is_rejected_at_submit() {
	let file = file_with_blocks(1);
	let ctx = Context::create(2).unwrap();
	let err = ctx
		.submit(vec![Request::raw(0x7fff, file.as_raw_fd()).build()])
		.unwrap_err();
	assert_eq!(Error::InvalidRequest, err);
	assert_eq!(0, ctx.in_flight());
}

#[test]
fn batch_stops_at_first_invalid_request() {
	let file = file_with_blocks(4);
	let fd = file.as_raw_fd();
	let ctx = Context::create(8).unwrap();

	let batch = vec![
		Request::read(fd, BLOCK).tag(0).build(),
		Request::read(fd, BLOCK).tag(1).offset(block_offset(1)).build(),
		Request::noop().tag(2).notify(-1).build(),
		Request::read(fd, BLOCK).tag(3).offset(block_offset(3)).build(),
	];

	let submission = ctx.submit(batch).unwrap();
	assert_eq!(2, submission.count());
	let rejected = submission.into_rejected();
	assert_eq!(vec![2, 3], rejected.iter().map(Request::tag).collect::<Vec<_>>());

	let mut tags = ctx
		.wait(2, 4, Some(Duration::from_secs(5)))
		.unwrap()
		.into_iter()
		.map(|c| c.tag())
		.collect::<Vec<_>>();
	tags.sort_unstable();
	assert_eq!(vec![0, 1], tags);
}

#[test]
fn bad_buffer_fails_on_the_record_not_at_submit() {
	let file = file_with_blocks(2);
	let fd = file.as_raw_fd();
	let guard = GuardPage::new().unwrap();
	let ctx = Context::create(4).unwrap();

	// SAFETY: Any access to the guard page faults, and `guard` outlives
	// SAFETY: `ctx`, so the page stays mapped while the read is in flight.
	let unmapped = unsafe { Buffer::address(guard.addr()) };
	let batch = vec![
		Request::read(fd, BLOCK)
			.tag(0)
			.buffer(unmapped)
			.len(BLOCK)
			.build(),
		Request::read(fd, BLOCK).tag(1).offset(block_offset(1)).build(),
	];
	assert_eq!(2, ctx.submit(batch).unwrap().count());

	let completions = ctx.wait(2, 2, Some(Duration::from_secs(5))).unwrap();
	assert_eq!(2, completions.len());
	for c in completions {
		match c.tag() {
			0 => assert_eq!(Err(libc::EFAULT), c.bytes()),
			1 => assert_eq!(Ok(BLOCK), c.bytes()),
			other => panic!("unexpected tag {other}"),
		}
	}
}

#[test]
fn oversized_length_stays_inside_the_buffer() {
	let file = file_with_blocks(8);
	let ctx = Context::create(1).unwrap();

	let req = Request::read(file.as_raw_fd(), 16).len(4096).build();
	assert_eq!(1, ctx.submit(vec![req]).unwrap().count());

	let c = ctx.wait(1, 1, Some(Duration::from_secs(5))).unwrap().remove(0);
	assert_eq!(Ok(16), c.bytes());
	assert_eq!(Some(&block(0)[..16]), c.request().data());
}

#[test]
fn null_buffer_zero_length_succeeds() {
	let file = file_with_blocks(1);
	let ctx = Context::create(2).unwrap();
	let batch = vec![
		Request::read(file.as_raw_fd(), 0).tag(9).buffer(Buffer::Null).build(),
		Request::write(file.as_raw_fd(), Vec::<u8>::new())
			.tag(10)
			.buffer(Buffer::Null)
			.build(),
	];
	ctx.submit(batch).unwrap();
	for c in ctx.wait(2, 2, Some(Duration::from_secs(5))).unwrap() {
		assert_eq!(Ok(0), c.bytes());
	}
}

#[test]
fn read_past_eof_is_short() {
	let file = file_with_blocks(1);
	let ctx = Context::create(2).unwrap();
	let batch = vec![
		Request::read(file.as_raw_fd(), BLOCK).tag(0).offset(256).build(),
		Request::read(file.as_raw_fd(), BLOCK).tag(1).offset(4096).build(),
	];
	ctx.submit(batch).unwrap();
	for c in ctx.wait(2, 2, Some(Duration::from_secs(5))).unwrap() {
		let expected = if c.tag() == 0 { 256 } else { 0 };
		assert_eq!(Ok(expected), c.bytes());
	}
}

#[test]
fn cancel_of_finished_request_is_not_found() {
	let file = file_with_blocks(1);
	let ctx = Context::create(2).unwrap();
	let req = Request::read(file.as_raw_fd(), BLOCK).build();
	let id = req.id();
	ctx.submit(vec![req]).unwrap();

	assert_eq!(Some(Error::NotFound), ctx.cancel(id).err());
	assert_eq!(1, ctx.wait(1, 1, Some(Duration::from_secs(5))).unwrap().len());
	assert_eq!(Some(Error::NotFound), ctx.cancel(id).err());
}

#[test]
fn notification_descriptor_counts_completions() {
	let file = tempfile::tempfile().unwrap();
	let efd = EventFd::new().unwrap();
	let ctx = Context::create(4).unwrap();

	let batch = (0..3)
		.map(|n| {
			Request::write(file.as_raw_fd(), block(n))
				.tag(n)
				.offset(block_offset(n))
				.notify(efd.as_raw_fd())
				.build()
		})
		.collect();
	assert_eq!(3, ctx.submit(batch).unwrap().count());

	assert!(efd.wait_readable(Duration::from_secs(5)).unwrap());
	let mut total = 0;
	while total < 3 {
		total += efd.read().unwrap();
	}
	assert_eq!(3, total);
	assert_eq!(3, ctx.wait(3, 3, Some(Duration::from_secs(5))).unwrap().len());
}

#[test]
fn notification_to_non_eventfd_is_rejected() {
	let file = file_with_blocks(1);
	let ctx = Context::create(2).unwrap();
	let err = ctx
		.submit(vec![
			Request::read(file.as_raw_fd(), BLOCK)
				.notify(file.as_raw_fd())
				.build(),
		])
		.unwrap_err();
	assert_eq!(Error::InvalidRequest, err);
}

#[test]
fn destroy_twice_reports_dead_context() {
	let ctx = Context::create(1).unwrap();
	ctx.destroy().unwrap();
	assert!(!ctx.is_live());
	assert_eq!(
		Err(Error::InvalidArgument { op: Op::Destroy }),
		ctx.destroy()
	);
}

#[test]
fn destroy_with_requests_outstanding() {
	let file = file_with_blocks(2);
	let ctx = Context::create(4).unwrap();
	let batch = (0..2)
		.map(|n| Request::read(file.as_raw_fd(), BLOCK).tag(n).offset(block_offset(n)).build())
		.collect();
	ctx.submit(batch).unwrap();
	ctx.destroy().unwrap();
	assert_eq!(2, ctx.in_flight());
}

#[test]
fn destroy_wakes_blocked_waiter() {
	let ctx = Arc::new(Context::create(1).unwrap());
	let (tx, rx) = mpsc::channel();

	let waiter = {
		let ctx = Arc::clone(&ctx);
		std::thread::spawn(move || {
			let res = ctx.wait(1, 1, None).map(|v| v.len());
			tx.send(res).unwrap();
		})
	};

	// Not waiting long enough here only weakens the test; the waiter
	// still has to return whichever side of the syscall it is on.
	std::thread::sleep(Duration::from_millis(50));
	ctx.destroy().unwrap();

	let res = rx.recv_timeout(Duration::from_secs(5)).expect("waiter hung");
	assert!(matches!(
		res,
		Ok(0) | Err(Error::InvalidArgument { op: Op::Wait })
	));
	waiter.join().unwrap();
}

#[test]
fn orphan_completion_reports_what_it_consumed() {
	let file = file_with_blocks(1);
	let ctx = Context::create(4).unwrap();

	// Submitted behind the context's back, so it has no parked request.
	let mut foreign = sys::Iocb {
		aio_data: 77,
		aio_lio_opcode: sys::IOCB_CMD_PREAD,
		aio_fildes: file.as_raw_fd().cast_unsigned(),
		..sys::Iocb::default()
	};
	let mut iocbs = [&raw mut foreign];
	// SAFETY: `foreign` transfers zero bytes and outlives the wait below.
	let rc = unsafe { sys::io_submit(ctx.raw() as sys::AioContext, 1, iocbs.as_mut_ptr()) };
	assert_eq!(1, rc);

	let known = Request::read(file.as_raw_fd(), BLOCK).tag(1).build();
	assert_eq!(1, ctx.submit(vec![known]).unwrap().count());

	let err = ctx.wait(2, 2, Some(Duration::from_secs(5))).unwrap_err();
	assert_eq!(
		Error::Orphan {
			obj:       (&raw const foreign).addr() as u64,
			data:      77,
			discarded: vec![1],
		},
		err
	);
	assert_eq!(0, ctx.in_flight());
}
