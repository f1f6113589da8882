use crate::{init_logging, sleep_ms};
use waitbox::{Error, LinkedQueue, Run, ThreadPool};
use waitbox::thread_pool::{Builder, Job};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::*;
use std::thread;
use std::time::Duration;

#[test]
pub fn test_one_thread_basic() {
    init_logging();

    let tp = ThreadPool::single_thread().unwrap();
    let (tx, rx) = sync_channel(0);

    tp.run(move || {
        tx.send("hi").unwrap();
    }).unwrap();

    assert_eq!("hi", rx.recv().unwrap());
    assert_eq!(1, tp.size());
}

#[test]
pub fn test_two_thread_basic() {
    init_logging();

    let tp = ThreadPool::fixed_size(2).unwrap();
    let (tx, rx) = sync_channel(0);

    for i in 0..2i32 {
        let tx = tx.clone();
        tp.run(move || {
            debug!("send; task={}; msg=hi", i);
            tx.send("hi").unwrap();
            sleep_ms(50);

            debug!("send; task={}; msg=bye", i);
            tx.send("bye").unwrap();
            sleep_ms(50);
        }).unwrap();
    }

    debug!("recv");

    for &msg in ["hi", "hi", "bye", "bye"].iter() {
        assert_eq!(msg, rx.recv().unwrap());
    }
}

#[test]
pub fn test_two_threads_task_queue_up() {
    let tp = ThreadPool::fixed_size(2).unwrap();
    let (tx, rx) = sync_channel(0);

    for i in 0..4i32 {
        let tx = tx.clone();
        tp.run(move || {
            debug!("send; task={}; msg=hi", i);
            tx.send("hi").unwrap();
            sleep_ms(50);

            debug!("send; task={}; msg=bye", i);
            tx.send("bye").unwrap();
            sleep_ms(50);
        }).unwrap();
    }

    for &msg in ["hi", "hi", "bye", "bye", "hi", "hi", "bye", "bye"].iter() {
        assert_eq!(msg, rx.recv().unwrap());
    }
}

#[test]
pub fn test_shutdown_terminates_idle_workers() {
    let tp = ThreadPool::fixed_size(4).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel();

    for _ in 0..100 {
        let count = count.clone();
        let tx = tx.clone();

        tp.run(move || {
            count.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }).unwrap();
    }

    for _ in 0..100 {
        rx.recv().unwrap();
    }

    assert!(!tp.is_shutdown());

    tp.shutdown();
    tp.shutdown();

    assert!(tp.is_shutdown());
    tp.await_termination().unwrap();

    assert_eq!(100, count.load(Ordering::SeqCst));
}

#[test]
pub fn test_run_after_shutdown_is_rejected() {
    let tp = ThreadPool::single_thread().unwrap();
    tp.shutdown();

    match tp.run(|| {}) {
        Err(Error::Shutdown) => {}
        other => panic!("unexpected result; {:?}", other),
    }

    tp.await_termination().unwrap();
}

#[test]
pub fn test_queued_tasks_abandoned_on_shutdown() {
    let tp = ThreadPool::single_thread().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = channel();
    let (release_tx, release_rx) = channel::<()>();

    {
        let ran = ran.clone();

        tp.run(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            ran.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
    }

    started_rx.recv().unwrap();

    // The only worker is busy, this one stays queued
    {
        let ran = ran.clone();

        tp.run(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
    }

    tp.shutdown();
    release_tx.send(()).unwrap();
    tp.await_termination().unwrap();

    assert_eq!(1, ran.load(Ordering::SeqCst));
}

#[test]
pub fn test_zero_size_rejected() {
    match ThreadPool::fixed_size(0) {
        Err(Error::InvalidSize) => {}
        Err(e) => panic!("unexpected error; {}", e),
        Ok(_) => panic!("zero sized pool was built"),
    }
}

#[test]
pub fn test_builder_names_workers() {
    let tp = Builder::new()
        .size(2)
        .name_prefix("indexer")
        .stack_size(256 * 1024)
        .build()
        .unwrap();

    let (tx, rx) = channel();

    for _ in 0..2 {
        let tx = tx.clone();

        tp.run(move || {
            let name = thread::current().name().map(|s| s.to_string());
            tx.send(name).unwrap();
        }).unwrap();
    }

    for _ in 0..2 {
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("indexer-"), "name={}", name);
    }

    tp.shutdown();
    tp.await_termination().unwrap();
}

#[test]
pub fn test_panicking_task_reported() {
    let tp = ThreadPool::single_thread().unwrap();
    let (tx, rx) = channel();

    tp.run(move || {
        tx.send(()).unwrap();
        panic!("task failure");
    }).unwrap();

    rx.recv().unwrap();
    tp.shutdown();

    match tp.await_termination() {
        Err(Error::WorkerPanicked { name }) => assert_eq!("waitbox-worker-0", name),
        other => panic!("unexpected result; {:?}", other),
    }
}

#[test]
pub fn test_shared_work_queue() {
    let queue: LinkedQueue<Job> = LinkedQueue::new();
    let tp = Builder::new().size(2).build_with_queue(queue.clone()).unwrap();
    let (tx, rx) = channel();

    tp.run(move || tx.send(7).unwrap()).unwrap();
    assert_eq!(7, rx.recv().unwrap());

    // Stopping the queue directly shuts the pool down
    queue.notify_stop();

    assert!(tp.is_shutdown());
    tp.await_termination().unwrap();
}

#[test]
pub fn test_run_trait() {
    fn submit<R: Run>(runner: &R, tx: Sender<u32>) {
        runner.run(move || tx.send(1).unwrap()).unwrap();
    }

    let tp = ThreadPool::fixed_size(2).unwrap();
    let (tx, rx) = channel();

    submit(&tp, tx);
    assert_eq!(1, rx.recv().unwrap());

    drop(tp);
}

#[test]
pub fn test_worker_replaced_after_panic() {
    init_logging();

    let tp = ThreadPool::single_thread().unwrap();
    let (tx, rx) = channel();

    tp.run(move || {
        tx.send(()).unwrap();
        panic!("task failure");
    }).unwrap();

    rx.recv().unwrap();
    sleep_ms(50);

    let (tx, rx) = channel();
    tp.run(move || tx.send(1).unwrap()).unwrap();

    assert_eq!(Ok(1), rx.recv_timeout(Duration::from_secs(5)));

    tp.shutdown();

    match tp.await_termination() {
        Err(Error::WorkerPanicked { name }) => assert_eq!("waitbox-worker-0", name),
        other => panic!("unexpected result; {:?}", other),
    }
}

#[test]
pub fn test_drop_shuts_down_pool() {
    let queue: LinkedQueue<Job> = LinkedQueue::new();
    let tp = Builder::new().size(2).build_with_queue(queue.clone()).unwrap();
    let (tx, rx) = channel();

    tp.run(move || tx.send(()).unwrap()).unwrap();
    rx.recv().unwrap();

    assert!(!queue.is_stopped());

    drop(tp);

    assert!(queue.is_stopped());
}

#[test]
pub fn test_clone_keeps_pool_running() {
    let tp = ThreadPool::fixed_size(1).unwrap();
    let other = tp.clone();

    drop(tp);
    assert!(!other.is_shutdown());

    let (tx, rx) = channel();
    other.run(move || tx.send(()).unwrap()).unwrap();
    rx.recv().unwrap();

    drop(other);
}

#[cfg(target_os = "linux")]
#[test]
pub fn test_failed_spawn_stops_queue() {
    let queue: LinkedQueue<Job> = LinkedQueue::new();

    // No address space can hold this stack
    let res = Builder::new()
        .size(2)
        .stack_size(usize::MAX / 4)
        .build_with_queue(queue.clone());

    match res {
        Err(Error::Spawn(_)) => {}
        Err(e) => panic!("unexpected error; {}", e),
        Ok(_) => panic!("pool was built"),
    }

    assert!(queue.is_stopped());
}
