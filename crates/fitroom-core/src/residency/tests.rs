use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::*;
use crate::engine::{EngineError, InferenceEngine, PreparedInput, RawOutput};
use crate::retry::RetryPolicy;

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    resident: AtomicUsize,
    max_resident: AtomicUsize,
}

impl Shared {
    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

struct StubEngine {
    name: &'static str,
    shared: Arc<Shared>,
    loaded: bool,
    /// Errors returned by successive `load` calls before it starts succeeding.
    load_failures: Vec<EngineError>,
    load_delay: Duration,
    /// The next `run` fails and leaves the weights gone, like a crashed worker.
    lose_on_run: bool,
}

impl StubEngine {
    fn new(name: &'static str, shared: &Arc<Shared>) -> Self {
        Self {
            name,
            shared: Arc::clone(shared),
            loaded: false,
            load_failures: Vec::new(),
            load_delay: Duration::ZERO,
            lose_on_run: false,
        }
    }

    fn failing(mut self, errors: Vec<EngineError>) -> Self {
        self.load_failures = errors;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    fn losing_weights(mut self) -> Self {
        self.lose_on_run = true;
        self
    }
}

impl InferenceEngine for StubEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        self.shared.log.lock().unwrap().push(format!("load {}", self.name));
        thread::sleep(self.load_delay);
        if !self.load_failures.is_empty() {
            return Err(self.load_failures.remove(0));
        }
        let now = self.shared.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_resident.fetch_max(now, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if self.loaded {
            self.shared.resident.fetch_sub(1, Ordering::SeqCst);
            self.loaded = false;
        }
        self.shared.log.lock().unwrap().push(format!("unload {}", self.name));
    }

    fn run(&mut self, _input: &PreparedInput) -> Result<RawOutput, EngineError> {
        if std::mem::take(&mut self.lose_on_run) && self.loaded {
            self.shared.resident.fetch_sub(1, Ordering::SeqCst);
            self.loaded = false;
            return Err(EngineError::Protocol("worker closed its output".into()));
        }
        Ok(RawOutput::default())
    }

    fn still_loaded(&mut self) -> bool {
        self.loaded
    }
}

fn arbiter(shared: &Arc<Shared>) -> Arc<ResourceArbiter> {
    Arc::new(
        ResourceArbiter::new(RetryPolicy::no_retry())
            .with_slot(SlotKey::Body, Box::new(StubEngine::new("body", shared)))
            .with_slot(SlotKey::Clothing, Box::new(StubEngine::new("clothing", shared))),
    )
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

#[test]
fn acquire_loads_and_auto_unload_releases() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Unloaded));

    let lease = arb.acquire(SlotKey::Body).unwrap();
    assert_eq!(lease.key(), SlotKey::Body);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Loaded));
    assert_eq!(arb.resident(), Some(SlotKey::Body));

    lease.release(true);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Unloaded));
    assert_eq!(arb.resident(), None);
    assert_eq!(shared.events(), vec!["load body", "unload body"]);
}

#[test]
fn keep_resident_reuses_loaded_slot() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);

    arb.acquire(SlotKey::Body).unwrap().release(false);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Loaded));
    arb.acquire(SlotKey::Body).unwrap().release(false);

    let body = arb.status().into_iter().find(|s| s.key == SlotKey::Body).unwrap();
    assert_eq!(body.loads, 1);
    assert_eq!(body.releases, 2);
    assert_eq!(body.leases, 0);
    assert_eq!(shared.events(), vec!["load body"]);
}

#[test]
fn acquiring_other_slot_evicts_idle_resident_first() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);

    arb.acquire(SlotKey::Body).unwrap().release(false);
    let lease = arb.acquire(SlotKey::Clothing).unwrap();

    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Unloaded));
    assert_eq!(arb.state(SlotKey::Clothing), Some(SlotState::Loaded));
    assert_eq!(
        shared.events(),
        vec!["load body", "unload body", "load clothing"]
    );
    drop(lease);
}

#[test]
fn eviction_waits_for_outstanding_lease() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);

    let body = arb.acquire(SlotKey::Body).unwrap();
    let arb2 = Arc::clone(&arb);
    let waiter = thread::spawn(move || arb2.acquire(SlotKey::Clothing).map(|l| l.release(true)));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(arb.state(SlotKey::Clothing), Some(SlotState::Unloaded));
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Loaded));

    body.release(false);
    waiter.join().unwrap().unwrap();

    assert_eq!(
        shared.events(),
        vec!["load body", "unload body", "load clothing", "unload clothing"]
    );
    assert_eq!(shared.max_resident.load(Ordering::SeqCst), 1);
}

#[test]
fn draining_slot_refuses_new_leases_until_evicted() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);

    let body = arb.acquire(SlotKey::Body).unwrap();
    let arb2 = Arc::clone(&arb);
    let clothing = thread::spawn(move || arb2.acquire(SlotKey::Clothing).map(|l| l.release(true)));
    thread::sleep(Duration::from_millis(50));

    // A second body job arrives while clothing waits; it must queue behind clothing.
    let arb3 = Arc::clone(&arb);
    let second_body = thread::spawn(move || arb3.acquire(SlotKey::Body).map(|l| l.release(true)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(arb.status()[0].leases, 1);

    body.release(false);
    clothing.join().unwrap().unwrap();
    second_body.join().unwrap().unwrap();

    let events = shared.events();
    let clothing_load = events.iter().position(|e| e == "load clothing").unwrap();
    let second_body_load = events.iter().rposition(|e| e == "load body").unwrap();
    assert!(clothing_load < second_body_load, "{events:?}");
    assert_eq!(shared.max_resident.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_acquires_never_exceed_one_resident() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(
        ResourceArbiter::new(RetryPolicy::no_retry())
            .with_slot(
                SlotKey::Body,
                Box::new(StubEngine::new("body", &shared).slow(Duration::from_millis(2))),
            )
            .with_slot(
                SlotKey::Clothing,
                Box::new(StubEngine::new("clothing", &shared).slow(Duration::from_millis(2))),
            ),
    );

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let arb = Arc::clone(&arb);
            let key = if i % 2 == 0 { SlotKey::Body } else { SlotKey::Clothing };
            thread::spawn(move || {
                let lease = arb.acquire(key).unwrap();
                thread::sleep(Duration::from_millis(1));
                lease.release(i % 3 == 0);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(shared.max_resident.load(Ordering::SeqCst), 1);
    let releases: u64 = arb.status().iter().map(|s| s.releases).sum();
    assert_eq!(releases, 12);
    assert!(arb.status().iter().all(|s| s.leases == 0));
}

#[test]
fn concurrent_same_key_acquires_share_one_load() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(ResourceArbiter::new(RetryPolicy::no_retry()).with_slot(
        SlotKey::Body,
        Box::new(StubEngine::new("body", &shared).slow(Duration::from_millis(30))),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let arb = Arc::clone(&arb);
            thread::spawn(move || arb.acquire(SlotKey::Body).unwrap())
        })
        .collect();
    let leases: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(arb.status()[0].loads, 1);
    assert_eq!(arb.status()[0].leases, 4);
    for lease in leases {
        lease.release(false);
    }
    assert_eq!(arb.status()[0].leases, 0);
}

#[test]
fn unavailable_engine_leaves_slot_unloaded() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(ResourceArbiter::new(fast_retry(3)).with_slot(
        SlotKey::Body,
        Box::new(
            StubEngine::new("body", &shared)
                .failing(vec![EngineError::Unavailable("checkpoint missing".into())]),
        ),
    ));

    let err = arb.acquire(SlotKey::Body).unwrap_err();
    assert!(matches!(err, AcquireError::EngineUnavailable { key: SlotKey::Body, .. }));
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Unloaded));
    // Permanent: not retried.
    assert_eq!(shared.events(), vec!["load body"]);

    // Next acquire starts from scratch and succeeds.
    arb.acquire(SlotKey::Body).unwrap().release(true);
    assert_eq!(arb.status()[0].loads, 1);
}

#[test]
fn transient_init_failure_is_retried() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(ResourceArbiter::new(fast_retry(2)).with_slot(
        SlotKey::Clothing,
        Box::new(
            StubEngine::new("clothing", &shared)
                .failing(vec![EngineError::Init("cuda context".into())]),
        ),
    ));

    arb.acquire(SlotKey::Clothing).unwrap().release(true);
    assert_eq!(shared.events(), vec!["load clothing", "load clothing", "unload clothing"]);
}

#[test]
fn exhausted_retries_report_load_failed() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(ResourceArbiter::new(fast_retry(2)).with_slot(
        SlotKey::Clothing,
        Box::new(StubEngine::new("clothing", &shared).failing(vec![
            EngineError::Init("first".into()),
            EngineError::Init("second".into()),
        ])),
    ));

    match arb.acquire(SlotKey::Clothing) {
        Err(AcquireError::LoadFailed { key, attempts, message }) => {
            assert_eq!(key, SlotKey::Clothing);
            assert_eq!(attempts, 2);
            assert!(message.contains("second"), "{message}");
        }
        other => panic!("expected LoadFailed, got {other:?}"),
    }
    assert_eq!(arb.state(SlotKey::Clothing), Some(SlotState::Unloaded));
}

#[test]
fn unknown_slot_is_unavailable() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(
        ResourceArbiter::new(RetryPolicy::no_retry())
            .with_slot(SlotKey::Body, Box::new(StubEngine::new("body", &shared))),
    );
    assert!(matches!(
        arb.acquire(SlotKey::Clothing),
        Err(AcquireError::EngineUnavailable { key: SlotKey::Clothing, .. })
    ));
}

#[test]
fn dropped_lease_releases_and_unloads() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);
    {
        let _lease = arb.acquire(SlotKey::Clothing).unwrap();
    }
    assert_eq!(arb.state(SlotKey::Clothing), Some(SlotState::Unloaded));
    assert_eq!(arb.status()[1].releases, 1);
}

#[test]
fn explicit_unload_only_when_idle() {
    let shared = Arc::new(Shared::default());
    let arb = arbiter(&shared);
    let lease = arb.acquire(SlotKey::Body).unwrap();
    assert!(!arb.unload(SlotKey::Body));
    lease.release(false);
    assert!(arb.unload(SlotKey::Body));
    assert!(!arb.unload(SlotKey::Body));

    arb.acquire(SlotKey::Clothing).unwrap().release(false);
    arb.shutdown();
    assert_eq!(arb.resident(), None);
}

#[test]
fn failed_load_does_not_leave_slot_draining() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(
        ResourceArbiter::new(RetryPolicy::no_retry())
            .with_slot(
                SlotKey::Body,
                Box::new(
                    StubEngine::new("body", &shared)
                        .slow(Duration::from_millis(100))
                        .failing(vec![EngineError::Init("first load".into())]),
                ),
            )
            .with_slot(SlotKey::Clothing, Box::new(StubEngine::new("clothing", &shared))),
    );

    let arb2 = Arc::clone(&arb);
    let body = thread::spawn(move || arb2.acquire(SlotKey::Body).map(|l| l.release(false)));
    thread::sleep(Duration::from_millis(30));
    // Clothing arrives while body is still loading and marks it draining.
    arb.acquire(SlotKey::Clothing).unwrap().release(false);
    assert!(body.join().unwrap().is_err());

    arb.acquire(SlotKey::Body).unwrap().release(false);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Loaded));

    let (tx, rx) = std::sync::mpsc::channel();
    let arb3 = Arc::clone(&arb);
    thread::spawn(move || {
        let _ = tx.send(arb3.acquire(SlotKey::Body).map(|l| l.release(false)).is_ok());
    });
    let acquired = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("acquire on an idle loaded slot must not block");
    assert!(acquired);
    assert_eq!(arb.status()[0].loads, 1);
}

#[test]
fn engine_losing_weights_is_unloaded_on_release() {
    let shared = Arc::new(Shared::default());
    let arb = Arc::new(ResourceArbiter::new(RetryPolicy::no_retry()).with_slot(
        SlotKey::Body,
        Box::new(StubEngine::new("body", &shared).losing_weights()),
    ));
    let input = PreparedInput {
        width: 1,
        height: 1,
        rgba: vec![0; 4],
        seed: 42,
    };

    let lease = arb.acquire(SlotKey::Body).unwrap();
    assert!(lease.engine().run(&input).is_err());
    lease.release(false);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Unloaded));

    let lease = arb.acquire(SlotKey::Body).unwrap();
    assert!(lease.engine().run(&input).is_ok());
    lease.release(false);
    assert_eq!(arb.state(SlotKey::Body), Some(SlotState::Loaded));
    assert_eq!(arb.status()[0].loads, 2);
}
