//! Multi-threaded scheduling and race tests against the safe API.

use std::ffi::c_void;
use std::ptr;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use binder_eventloop::{
    BridgeConfig, CallbackState, EventLoopBridge, HostLoop, SharedCallbackHandle,
};
use parking_lot::Mutex;

const THREADS: usize = 8;
const CELLS: usize = 1000;

#[derive(Default)]
struct Probe {
    calls: AtomicUsize,
    cleanups: AtomicUsize,
    ran_on: Mutex<Option<ThreadId>>,
}

impl Probe {
    fn as_user_data(&self) -> *mut c_void {
        ptr::from_ref(self).cast_mut().cast()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    fn handle(&self) -> SharedCallbackHandle {
        SharedCallbackHandle::new(Some(probe_call), self.as_user_data(), Some(probe_cleanup))
    }
}

unsafe extern "C" fn probe_call(user_data: *mut c_void) {
    let probe = unsafe { &*user_data.cast::<Probe>() };
    probe.calls.fetch_add(1, Ordering::SeqCst);
    *probe.ran_on.lock() = Some(thread::current().id());
}

unsafe extern "C" fn probe_cleanup(user_data: *mut c_void) {
    let probe = unsafe { &*user_data.cast::<Probe>() };
    probe.cleanups.fetch_add(1, Ordering::SeqCst);
}

fn settle(host: &HostLoop, done: impl Fn() -> bool) {
    host.run_until(async {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("host loop did not settle");
    });
}

#[test]
fn thousand_cells_from_eight_threads() {
    let host = HostLoop::new().unwrap();
    let bridge = EventLoopBridge::new(&host, BridgeConfig::default());
    let probes: Vec<Probe> = (0..CELLS).map(|_| Probe::default()).collect();

    let handles: Vec<SharedCallbackHandle> = thread::scope(|s| {
        let workers: Vec<_> = probes
            .chunks(CELLS / THREADS)
            .map(|chunk| {
                let bridge = &bridge;
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|probe| {
                            let handle = probe.handle();
                            bridge.schedule(handle.clone()).unwrap();
                            handle
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });
    assert_eq!(handles.len(), CELLS);

    settle(&host, || bridge.in_flight() == 0);

    let host_thread = thread::current().id();
    for probe in &probes {
        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.cleanups(), 1);
        assert_eq!(*probe.ran_on.lock(), Some(host_thread));
    }
    // Only the test's own reference is left on every cell
    for handle in &handles {
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(handle.state(), Some(CallbackState::Invoked));
    }
}

#[test]
fn per_thread_order_is_preserved() {
    let host = HostLoop::new().unwrap();
    let bridge = EventLoopBridge::new(&host, BridgeConfig::default());

    #[derive(Default)]
    struct Order {
        seen: Mutex<Vec<(usize, usize)>>,
    }

    struct Step<'a> {
        order: &'a Order,
        thread: usize,
        seq: usize,
    }

    unsafe extern "C" fn record(user_data: *mut c_void) {
        let step = unsafe { &*user_data.cast::<Step<'_>>() };
        step.order.seen.lock().push((step.thread, step.seq));
    }

    let order = Order::default();
    let steps: Vec<Vec<Step<'_>>> = (0..4)
        .map(|thread| {
            (0..50)
                .map(|seq| Step {
                    order: &order,
                    thread,
                    seq,
                })
                .collect()
        })
        .collect();

    thread::scope(|s| {
        for thread_steps in &steps {
            let bridge = &bridge;
            s.spawn(move || {
                for step in thread_steps {
                    let handle = SharedCallbackHandle::new(
                        Some(record),
                        ptr::from_ref(step).cast_mut().cast(),
                        None,
                    );
                    bridge.schedule(handle).unwrap();
                }
            });
        }
    });
    settle(&host, || bridge.in_flight() == 0);

    let seen = order.seen.lock();
    assert_eq!(seen.len(), 200);
    for thread in 0..4 {
        let seqs: Vec<usize> = seen
            .iter()
            .filter(|(t, _)| *t == thread)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn invoke_cancel_and_release_race() {
    for _ in 0..500 {
        let probe = Probe::default();
        let handle = probe.handle();
        let invoker = handle.clone();
        let canceler = handle.clone();
        let barrier = Barrier::new(3);

        let barrier = &barrier;

        // Every thread owns one reference, so whichever finishes last frees the cell
        let (invoked, canceled) = thread::scope(|s| {
            let invoke = s.spawn(move || {
                barrier.wait();
                invoker.invoke()
            });
            let cancel = s.spawn(move || {
                barrier.wait();
                canceler.cancel()
            });
            s.spawn(move || {
                barrier.wait();
                drop(handle);
            });
            (invoke.join().unwrap(), cancel.join().unwrap())
        });

        assert!(invoked ^ canceled, "exactly one side must win");
        assert_eq!(probe.calls(), usize::from(invoked));
        assert_eq!(probe.cleanups(), 1);
    }
}

#[test]
fn schedule_then_cancel_from_another_thread() {
    let host = HostLoop::new().unwrap();
    let bridge = EventLoopBridge::new(&host, BridgeConfig::default());
    let probe = Probe::default();
    let handle = probe.handle();

    thread::scope(|s| {
        let scheduled = handle.clone();
        let bridge = &bridge;
        s.spawn(move || bridge.schedule(scheduled).unwrap())
            .join()
            .unwrap();
        let canceler = handle.clone();
        s.spawn(move || assert!(canceler.cancel()))
            .join()
            .unwrap();
    });
    assert_eq!(probe.cleanups(), 1);

    settle(&host, || bridge.in_flight() == 0);
    assert_eq!(probe.calls(), 0);
    assert_eq!(probe.cleanups(), 1);
    assert_eq!(handle.state(), Some(CallbackState::Canceled));
    assert_eq!(handle.ref_count(), 1);
}

#[test]
fn cancel_races_drain() {
    let host = HostLoop::new().unwrap();
    let bridge = EventLoopBridge::new(&host, BridgeConfig::default());
    let probes: Vec<Probe> = (0..200).map(|_| Probe::default()).collect();
    let handles: Vec<SharedCallbackHandle> = probes.iter().map(Probe::handle).collect();

    for handle in &handles {
        bridge.schedule(handle.clone()).unwrap();
    }

    thread::scope(|s| {
        let handles = &handles;
        s.spawn(move || {
            for handle in handles.iter().rev() {
                handle.cancel();
            }
        });
        settle(&host, || bridge.in_flight() == 0);
    });

    for (probe, handle) in probes.iter().zip(&handles) {
        assert_eq!(probe.cleanups(), 1);
        match handle.state() {
            Some(CallbackState::Invoked) => assert_eq!(probe.calls(), 1),
            Some(CallbackState::Canceled) => assert_eq!(probe.calls(), 0),
            other => panic!("cell left in {other:?}"),
        }
    }
}
