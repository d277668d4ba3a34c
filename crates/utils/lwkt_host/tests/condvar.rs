#![cfg(test)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::ensure;
use lwkt_host::{HostMutex, HostScheduler, current_thread_id};
use lwkt_sync::{CondVar, SleepFlags, WaitChannel, WaitError};

type Cv = CondVar<HostScheduler>;

fn condvar(sched: &HostScheduler) -> Arc<Cv> {
    Arc::new(CondVar::new(sched.clone(), "testcv"))
}

/// Spins until `n` threads are blocked on `cv`.
fn wait_for_waiters(cv: &Cv, n: usize) {
    while cv.waiters() != n {
        thread::yield_now();
    }
}

#[test]
fn wait_times_out_without_signaller() -> Result<(), anyhow::Error> {
    const TIMEOUT: Duration = Duration::from_millis(2500);

    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let start = Instant::now();
    let res = cv.wait_unlocked(Some(TIMEOUT), SleepFlags::empty());
    let elapsed = start.elapsed();

    ensure!(res == Err(WaitError::TimedOut), "unexpected result {res:?}");
    ensure!(elapsed >= TIMEOUT, "returned early after {elapsed:?}");
    ensure!(
        elapsed < TIMEOUT + Duration::from_secs(2),
        "returned late after {elapsed:?}"
    );
    ensure!(cv.waiters() == 0);
    ensure!(sched.sleepers(WaitChannel::of(&*cv)) == 0);
    Ok(())
}

#[test]
fn signalled_waiter_returns_after_signal() -> Result<(), anyhow::Error> {
    const DELAY: Duration = Duration::from_millis(1000);

    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let waiter = thread::spawn({
        let cv = Arc::clone(&cv);
        move || {
            let start = Instant::now();
            let res = cv.wait_unlocked(Some(Duration::from_secs(30)), SleepFlags::empty());
            (res, start.elapsed())
        }
    });

    wait_for_waiters(&cv, 1);
    thread::sleep(DELAY);
    cv.signal();

    let Ok((res, elapsed)) = waiter.join() else {
        anyhow::bail!("waiter panicked");
    };
    ensure!(res.is_ok(), "unexpected result {res:?}");
    ensure!(elapsed >= DELAY, "woke before the signal after {elapsed:?}");
    ensure!(
        elapsed < DELAY + Duration::from_secs(5),
        "woke late after {elapsed:?}"
    );
    ensure!(cv.waiters() == 0);
    Ok(())
}

#[test]
fn broadcast_wakes_every_blocked_thread() -> Result<(), anyhow::Error> {
    const THREADS: usize = 6;

    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let handles = (0..THREADS)
        .map(|_| {
            let cv = Arc::clone(&cv);
            thread::spawn(move || cv.wait_unlocked(Some(Duration::from_secs(30)), SleepFlags::empty()))
        })
        .collect::<Vec<_>>();

    wait_for_waiters(&cv, THREADS);
    cv.broadcast();
    ensure!(cv.waiters() == 0, "broadcast left {} waiters", cv.waiters());

    for handle in handles {
        let Ok(res) = handle.join() else {
            anyhow::bail!("waiter panicked");
        };
        ensure!(res.is_ok(), "unexpected result {res:?}");
    }
    Ok(())
}

#[test]
fn broadcast_does_not_wake_later_waiters() -> Result<(), anyhow::Error> {
    const TIMEOUT: Duration = Duration::from_millis(200);

    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let early = thread::spawn({
        let cv = Arc::clone(&cv);
        move || cv.wait_unlocked(Some(Duration::from_secs(30)), SleepFlags::empty())
    });
    wait_for_waiters(&cv, 1);
    cv.broadcast();

    let start = Instant::now();
    let late = cv.wait_unlocked(Some(TIMEOUT), SleepFlags::empty());
    ensure!(late == Err(WaitError::TimedOut), "unexpected result {late:?}");
    ensure!(start.elapsed() >= TIMEOUT);
    ensure!(cv.waiters() == 0);

    let Ok(early) = early.join() else {
        anyhow::bail!("waiter panicked");
    };
    ensure!(early.is_ok(), "unexpected result {early:?}");
    Ok(())
}

#[test]
fn signal_wakes_one_thread_at_a_time() -> Result<(), anyhow::Error> {
    const THREADS: usize = 4;

    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let handles = (0..THREADS)
        .map(|_| {
            let cv = Arc::clone(&cv);
            thread::spawn(move || cv.wait_unlocked(Some(Duration::from_secs(30)), SleepFlags::empty()))
        })
        .collect::<Vec<_>>();

    wait_for_waiters(&cv, THREADS);
    for remaining in (0..THREADS).rev() {
        cv.signal();
        ensure!(cv.waiters() == remaining);
    }

    for handle in handles {
        let Ok(res) = handle.join() else {
            anyhow::bail!("waiter panicked");
        };
        ensure!(res.is_ok(), "unexpected result {res:?}");
    }
    Ok(())
}

#[test]
fn interruptible_wait_can_be_interrupted() -> Result<(), anyhow::Error> {
    let sched = HostScheduler::new();
    let cv = condvar(&sched);

    let (tx, rx) = std::sync::mpsc::channel();
    let waiter = thread::spawn({
        let cv = Arc::clone(&cv);
        move || {
            tx.send(current_thread_id()).ok();
            cv.wait_unlocked(None, SleepFlags::INTERRUPTIBLE)
        }
    });

    let thread_id = rx.recv()?;
    wait_for_waiters(&cv, 1);
    ensure!(sched.interrupt(thread_id));

    let Ok(res) = waiter.join() else {
        anyhow::bail!("waiter panicked");
    };
    ensure!(res == Err(WaitError::Interrupted), "unexpected result {res:?}");
    ensure!(cv.waiters() == 0);
    Ok(())
}

#[test]
fn producer_consumer_with_mutex() -> Result<(), anyhow::Error> {
    const ITEMS: usize = 1000;

    let sched = HostScheduler::new();
    let cv = condvar(&sched);
    let queue = Arc::new(HostMutex::new(Vec::new()));

    let consumer = thread::spawn({
        let cv = Arc::clone(&cv);
        let queue = Arc::clone(&queue);
        move || -> Result<usize, WaitError> {
            let mut received = 0;
            let mut guard = queue.lock();
            while received < ITEMS {
                if guard.pop().is_some() {
                    received += 1;
                    continue;
                }
                guard = cv
                    .timed_wait(guard, Duration::from_secs(30), SleepFlags::empty())
                    .map_err(|(_guard, e)| e)?;
            }
            Ok(received)
        }
    });

    for item in 0..ITEMS {
        queue.lock().push(item);
        cv.signal();
    }

    let Ok(res) = consumer.join() else {
        anyhow::bail!("consumer panicked");
    };
    ensure!(res == Ok(ITEMS), "unexpected result {res:?}");
    ensure!(cv.waiters() == 0);
    Ok(())
}
