use fabwait::{
    CompletionQueue, Control, Error, Events, Fabric, FabricAttr, Readiness, TryFn, WaitAttr,
    WaitDescriptor, WaitKind, WaitPollFd, WaitSet,
};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn idle() -> TryFn {
    Arc::new(|| Ok(Readiness::Idle))
}

fn ready() -> TryFn {
    Arc::new(|| Ok(Readiness::Ready))
}

fn open(kind: WaitKind) -> (Arc<Fabric>, Arc<WaitSet>) {
    let fabric = Fabric::open(&FabricAttr::new("psm"));
    let wait = fabric
        .wait_open(&WaitAttr::new(kind))
        .expect("Opening a descriptor wait set should succeed");
    (fabric, wait)
}

#[test]
fn test_unspecified_kind_resolves_to_notify() {
    let (_fabric, wait) = open(WaitKind::Unspecified);
    assert_eq!(wait.kind(), WaitKind::DescriptorNotify);

    let mut kind = WaitKind::Unspecified;
    wait.control(Control::GetWaitObj(&mut kind))
        .expect("GetWaitObj should succeed");
    assert_eq!(kind, WaitKind::DescriptorNotify);
}

#[test]
fn test_run_zero_timeout_when_idle() {
    for kind in [WaitKind::DescriptorNotify, WaitKind::DescriptorPoll] {
        let (_fabric, wait) = open(kind);

        let start = Instant::now();
        let result = wait.run(0);

        assert!(
            matches!(result, Err(Error::Timeout)),
            "Idle run with zero timeout should time out"
        );
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}

#[test]
fn test_run_short_timeout_blocks_then_expires() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    let start = Instant::now();
    let result = wait.run(30);

    assert!(matches!(result, Err(Error::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_ready_callback_returns_immediately() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let (a, _b) = UnixStream::pair().expect("socket pair");

    wait.add_fd(a.as_raw_fd(), Events::IN, ready(), 1)
        .expect("add_fd should succeed");

    assert!(wait.run(0).is_ok(), "Ready callback should win over the timeout");
    assert!(wait.run(-1).is_ok(), "Ready callback should not block forever");
}

#[test]
fn test_registered_fd_wakes_run() {
    let (_fabric, wait) = open(WaitKind::DescriptorPoll);
    let (a, mut b) = UnixStream::pair().expect("socket pair");

    wait.add_fd(a.as_raw_fd(), Events::IN, idle(), 7)
        .expect("add_fd should succeed");

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        b.write_all(b"x").expect("write");
        b
    });

    assert!(wait.run(5_000).is_ok(), "Readable fd should end the run");
    let _b = writer.join().expect("writer thread");
}

#[test]
fn test_posted_completion_wakes_run() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let cq = CompletionQueue::open(Some(&wait)).expect("open cq");

    let poster = {
        let cq = Arc::clone(&cq);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cq.post(99).expect("post");
        })
    };

    assert!(wait.run(5_000).is_ok(), "Post should wake the waiter");
    poster.join().expect("poster thread");
    assert_eq!(cq.read(), Some(99));
}

#[test]
fn test_signal_alone_does_not_end_run() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    wait.signal();
    wait.signal();

    assert!(
        matches!(wait.run(50), Err(Error::Timeout)),
        "Signals with nothing ready should loop until the deadline"
    );
}

#[test]
fn test_try_all_stops_at_first_ready() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let visited = Arc::new(Mutex::new(Vec::new()));

    let sockets: Vec<_> = (0..3).map(|_| UnixStream::pair().expect("socket pair")).collect();

    for (i, (a, _)) in sockets.iter().enumerate() {
        let visited = Arc::clone(&visited);
        let try_fn: TryFn = Arc::new(move || {
            visited.lock().expect("lock").push(i);
            Ok(if i == 1 { Readiness::Ready } else { Readiness::Idle })
        });
        wait.add_fd(a.as_raw_fd(), Events::IN, try_fn, i as u64)
            .expect("add_fd should succeed");
    }

    assert_eq!(wait.try_wait().expect("try_wait"), Readiness::Ready);
    assert_eq!(*visited.lock().expect("lock"), vec![0, 1]);
}

#[test]
fn test_callback_error_aborts_run() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let (a, _b) = UnixStream::pair().expect("socket pair");

    let failing: TryFn = Arc::new(|| Err(Error::NoMemory));
    wait.add_fd(a.as_raw_fd(), Events::IN, failing, 1)
        .expect("add_fd should succeed");

    assert!(matches!(wait.run(-1), Err(Error::NoMemory)));
}

#[test]
fn test_fd_refcount() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let (a, _b) = UnixStream::pair().expect("socket pair");
    let fd = a.as_raw_fd();

    wait.add_fd(fd, Events::IN, idle(), 1).expect("first add");
    wait.add_fd(fd, Events::IN, idle(), 1).expect("second add");
    assert_eq!(wait.fd_refs(fd), Some(2));

    wait.remove_fd(fd).expect("first remove");
    assert_eq!(wait.fd_refs(fd), Some(1));

    wait.remove_fd(fd).expect("second remove");
    assert_eq!(wait.fd_refs(fd), None);

    assert!(matches!(wait.remove_fd(fd), Err(Error::InvalidArgument)));

    // The fd left the poller, so it can be added again.
    wait.add_fd(fd, Events::IN, idle(), 1).expect("re-add");
}

#[test]
fn test_reserved_context_rejected() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);
    let (a, _b) = UnixStream::pair().expect("socket pair");

    assert!(matches!(
        wait.add_fd(a.as_raw_fd(), Events::IN, idle(), u64::MAX),
        Err(Error::InvalidArgument)
    ));
}

#[test]
fn test_bad_fd_rolls_back() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    assert!(matches!(
        wait.add_fd(-1, Events::IN, idle(), 1),
        Err(Error::Poller(_))
    ));
    assert_eq!(wait.fd_refs(-1), None);
}

#[test]
fn test_notify_get_wait_returns_fd() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    let mut desc = WaitDescriptor::Fd(-1);
    wait.control(Control::GetWait(&mut desc))
        .expect("GetWait should succeed");

    assert!(matches!(desc, WaitDescriptor::Fd(fd) if fd >= 0));
}

#[test]
fn test_poll_array_snapshot_retry() {
    let (_fabric, wait) = open(WaitKind::DescriptorPoll);
    let (a, _b) = UnixStream::pair().expect("socket pair");

    wait.add_fd(a.as_raw_fd(), Events::IN, idle(), 1)
        .expect("add_fd should succeed");

    let mut desc = WaitDescriptor::PollFd(WaitPollFd::with_capacity(0));
    assert!(matches!(
        wait.control(Control::GetWait(&mut desc)),
        Err(Error::TooSmall)
    ));

    let WaitDescriptor::PollFd(small) = desc else {
        panic!("poll-array set should answer with a descriptor array");
    };
    assert_eq!(small.nfds, 2, "signal channel plus one registered fd");
    assert!(small.fds.is_empty());
    assert_eq!(wait.fd_refs(a.as_raw_fd()), Some(1));

    let mut desc = WaitDescriptor::PollFd(WaitPollFd::with_capacity(small.nfds));
    wait.control(Control::GetWait(&mut desc))
        .expect("GetWait with enough room should succeed");

    let WaitDescriptor::PollFd(full) = desc else {
        panic!("poll-array set should answer with a descriptor array");
    };
    assert_eq!(full.change_index, small.change_index);
    assert_eq!(full.fds.len(), 2);
    assert!(full.fds.iter().any(|p| p.fd == a.as_raw_fd()));
}

#[test]
fn test_change_index_tracks_registry() {
    let (_fabric, wait) = open(WaitKind::DescriptorPoll);
    let (a, _b) = UnixStream::pair().expect("socket pair");

    let index = |wait: &WaitSet| {
        let mut desc = WaitDescriptor::PollFd(WaitPollFd::with_capacity(8));
        wait.control(Control::GetWait(&mut desc)).expect("GetWait");
        match desc {
            WaitDescriptor::PollFd(p) => p.change_index,
            WaitDescriptor::Fd(_) => panic!("expected descriptor array"),
        }
    };

    let before = index(&wait);
    wait.add_fd(a.as_raw_fd(), Events::IN, idle(), 1).expect("add");
    let added = index(&wait);
    wait.remove_fd(a.as_raw_fd()).expect("remove");
    let removed = index(&wait);

    assert!(added > before);
    assert!(removed > added);
}

#[test]
fn test_nested_notify_wait() {
    let (fabric, outer) = open(WaitKind::DescriptorNotify);
    let inner = fabric
        .wait_open(&WaitAttr::new(WaitKind::DescriptorNotify))
        .expect("open inner");

    outer
        .add_fid(inner.clone(), Events::IN, idle())
        .expect("Nesting a notify wait set should succeed");

    inner.signal();
    assert!(outer.run(5_000).is_ok(), "Inner wake-up should wake the outer set");

    outer.remove_fid(fabwait::Fid::fid(&*inner)).expect("remove nested");
}

#[test]
fn test_nested_wait_stays_open_until_removed() {
    let (fabric, outer) = open(WaitKind::DescriptorNotify);
    let inner = fabric
        .wait_open(&WaitAttr::new(WaitKind::DescriptorNotify))
        .expect("open inner");
    let inner_fid = fabwait::Fid::fid(&*inner);

    outer
        .add_fid(inner.clone(), Events::IN, idle())
        .expect("nest inner");
    outer
        .add_fid(inner.clone(), Events::IN, idle())
        .expect("nest inner again");
    assert_eq!(inner.ref_count(), 1);

    assert!(
        matches!(inner.close(), Err(Error::Busy)),
        "A registered wait set must not close"
    );
    assert!(!inner.is_closed());

    outer.remove_fid(inner_fid).expect("drop shared registration");
    assert!(matches!(inner.close(), Err(Error::Busy)));

    outer.remove_fid(inner_fid).expect("remove nested");
    assert_eq!(outer.fid_refs(inner_fid), None);
    assert_eq!(inner.ref_count(), 0);

    inner.close().expect("close inner once removed");
    outer.close().expect("close outer");
}

#[test]
fn test_closing_outer_releases_nested_wait() {
    let (fabric, outer) = open(WaitKind::DescriptorNotify);
    let inner = fabric
        .wait_open(&WaitAttr::new(WaitKind::DescriptorNotify))
        .expect("open inner");

    outer
        .add_fid(inner.clone(), Events::IN, idle())
        .expect("nest inner");
    assert!(matches!(inner.close(), Err(Error::Busy)));

    outer.close().expect("close outer");
    assert_eq!(inner.ref_count(), 0);
    inner.close().expect("close inner");
    assert_eq!(fabric.ref_count(), 0);
}

#[test]
fn test_nested_poll_array_wait_has_no_fd() {
    let (fabric, outer) = open(WaitKind::DescriptorNotify);
    let inner = fabric
        .wait_open(&WaitAttr::new(WaitKind::DescriptorPoll))
        .expect("open inner");

    assert!(matches!(
        outer.add_fid(inner.clone(), Events::IN, idle()),
        Err(Error::NoData)
    ));
}

#[test]
fn test_self_registration_rejected() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    assert!(matches!(
        wait.add_fid(wait.clone(), Events::IN, idle()),
        Err(Error::InvalidArgument)
    ));
}

#[test]
fn test_close_busy_while_referenced() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    wait.retain();
    assert!(matches!(wait.close(), Err(Error::Busy)));
    assert!(matches!(wait.close(), Err(Error::Busy)));
    assert!(!wait.is_closed());

    wait.release();
    wait.close().expect("close should succeed once unreferenced");
    assert!(wait.is_closed());
    assert!(matches!(wait.close(), Err(Error::InvalidArgument)));
    assert!(matches!(wait.run(0), Err(Error::InvalidArgument)));
}

#[test]
fn test_close_busy_while_waiting() {
    let (_fabric, wait) = open(WaitKind::DescriptorNotify);

    let waiter = {
        let wait = Arc::clone(&wait);
        thread::spawn(move || wait.run(1_000))
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        matches!(wait.close(), Err(Error::Busy)),
        "Close must not pull the poller out from under a waiter"
    );

    let result = waiter.join().expect("waiter thread");
    assert!(matches!(result, Err(Error::Timeout)));

    wait.close().expect("close should succeed after the waiter left");
}

#[test]
fn test_fabric_busy_until_wait_closed() {
    let (fabric, wait) = open(WaitKind::DescriptorNotify);
    assert_eq!(fabric.ref_count(), 1);
    assert!(matches!(fabric.close(), Err(Error::Busy)));

    wait.close().expect("close wait set");
    assert_eq!(fabric.ref_count(), 0);
    fabric.close().expect("close fabric");
}

#[test]
fn test_unsupported_kinds_rejected() {
    let fabric = Fabric::open(&FabricAttr::new("psm"));

    assert!(matches!(
        fabric.wait_open(&WaitAttr::new(WaitKind::MutexCond)),
        Err(Error::InvalidArgument)
    ));
    assert!(matches!(
        WaitSet::open_fd(&fabric, &WaitAttr::new(WaitKind::Yield)),
        Err(Error::InvalidArgument)
    ));
    assert_eq!(fabric.ref_count(), 0);
}
