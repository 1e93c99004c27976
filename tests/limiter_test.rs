//! Counting limiter and memory gate behaviour under concurrency

use chromafeed::limiter::{CountingLimiter, MemoryGate, MemorySource, ProcessMemory, TrackedMemory};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_limiter_never_overshoots() {
    let limiter = Arc::new(CountingLimiter::with_concurrency(3));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..20 {
        let limiter = Arc::clone(&limiter);
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire(1).await;
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            assert!(limiter.current() < limiter.max());
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(limiter.current(), 0);
}

#[tokio::test]
async fn test_limiter_bound_is_strict() {
    // max = 2 admits a single unit
    let limiter = Arc::new(CountingLimiter::new(2));
    limiter.add(1).await;
    let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.add(1)).await;
    assert!(blocked.is_err(), "second unit must wait");

    limiter.sub(1);
    tokio::time::timeout(Duration::from_secs(1), limiter.add(1))
        .await
        .expect("unit admitted after sub");
    assert_eq!(limiter.current(), 1);
}

#[tokio::test]
async fn test_waiter_wakes_on_sub() {
    let limiter = Arc::new(CountingLimiter::with_concurrency(1));
    let first = limiter.acquire(1).await;

    let waiter = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let permit = limiter.acquire(1).await;
            permit.units()
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(first);
    let units = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woken")
        .unwrap();
    assert_eq!(units, 1);
}

#[tokio::test]
async fn test_concurrent_multi_unit_adds_serialize() {
    let limiter = Arc::new(CountingLimiter::new(10));
    let observed_max = Arc::new(AtomicI64::new(0));

    let mut handles = vec![];
    for n in 1..=4 {
        let limiter = Arc::clone(&limiter);
        let observed_max = Arc::clone(&observed_max);
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                let _permit = limiter.acquire(n).await;
                observed_max.fetch_max(limiter.current(), Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(observed_max.load(Ordering::SeqCst) < 10);
    assert_eq!(limiter.current(), 0);
}

#[test]
#[should_panic(expected = "counting limiter released")]
fn test_sub_beyond_current_panics() {
    let limiter = CountingLimiter::new(5);
    limiter.sub(1);
}

#[tokio::test]
async fn test_gate_blocks_until_permit_dropped() {
    // Long tick: the wake-up has to come from the permit drop
    let gate = MemoryGate::new(100, Arc::new(TrackedMemory::new()), Duration::from_secs(60));

    let first = gate.reserve(60).await;
    assert_eq!(gate.usage(), 60);

    let second = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.reserve(60).await.bytes() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished(), "reservation must wait at the ceiling");

    drop(first);
    let bytes = tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .expect("reservation proceeds after release")
        .unwrap();
    assert_eq!(bytes, 60);
    assert_eq!(gate.usage(), 0);
}

#[tokio::test]
async fn test_check_addition_does_not_charge() {
    let gate = MemoryGate::new(100, Arc::new(TrackedMemory::new()), Duration::from_secs(60));
    gate.check_addition(100).await;
    assert_eq!(gate.usage(), 0);
}

#[tokio::test]
async fn test_oversized_request_is_clamped() {
    let gate = MemoryGate::new(100, Arc::new(TrackedMemory::new()), Duration::from_secs(60));
    let permit = tokio::time::timeout(Duration::from_secs(1), gate.reserve(1_000))
        .await
        .expect("clamped request is admitted on an idle gate");
    assert_eq!(permit.bytes(), 100);
    assert_eq!(gate.usage(), 100);
}

#[tokio::test]
async fn test_ticker_stops_with_gate() {
    let gate = MemoryGate::new(10, Arc::new(TrackedMemory::new()), Duration::from_millis(5));
    let weak = Arc::downgrade(&gate);
    drop(gate);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(weak.upgrade().is_none());
}

/// Sampled source whose usage never drops below a floor
#[derive(Debug)]
struct Baseline {
    floor: u64,
    ledger: TrackedMemory,
}

impl MemorySource for Baseline {
    fn usage(&self) -> u64 {
        self.floor + self.ledger.usage()
    }

    fn charge(&self, bytes: u64) {
        self.ledger.charge(bytes);
    }

    fn discharge(&self, bytes: u64) {
        self.ledger.discharge(bytes);
    }
}

#[tokio::test]
async fn test_idle_gate_admits_over_a_sampled_baseline() {
    let source = Arc::new(Baseline {
        floor: 500,
        ledger: TrackedMemory::new(),
    });
    let gate = MemoryGate::new(100, source, Duration::from_millis(10));

    let first = tokio::time::timeout(Duration::from_secs(1), gate.reserve(100))
        .await
        .expect("idle gate admits even when the baseline is over the ceiling");
    assert_eq!(gate.outstanding(), 1);

    let second = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.reserve(10).await.bytes() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished(), "a held permit can still free memory, so wait");

    drop(first);
    let bytes = tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .expect("admitted once the first permit is gone")
        .unwrap();
    assert_eq!(bytes, 10);
    assert_eq!(gate.outstanding(), 0);
}

#[tokio::test]
async fn test_process_memory_gate_admits_clamped_request() {
    // Any live process is well over one KiB resident
    let gate = MemoryGate::new(1024, Arc::new(ProcessMemory::new()), Duration::from_millis(10));
    let permit = tokio::time::timeout(Duration::from_secs(1), gate.reserve(1 << 30))
        .await
        .expect("clamped request must not hang on an idle gate");
    assert_eq!(permit.bytes(), 1024);
}

#[tokio::test]
async fn test_try_grow_respects_ceiling() {
    let gate = MemoryGate::new(100, Arc::new(TrackedMemory::new()), Duration::from_secs(60));
    let mut permit = gate.reserve(40).await;
    let other = gate.reserve(30).await;

    assert!(permit.try_grow(30));
    assert_eq!(permit.bytes(), 70);
    assert_eq!(gate.usage(), 100);
    assert!(!permit.try_grow(1), "ledger is full");

    drop(other);
    assert!(permit.try_grow(30));
    assert!(!permit.try_grow(1), "permit is at the ceiling");
    drop(permit);
    assert_eq!(gate.usage(), 0);
}
