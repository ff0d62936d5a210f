//! Classic memory-model litmus tests and counter races.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use stressor_harness::ScenarioDef;
use stressor_types::{Expect, Outcome};

/// Lost-update counter: a relaxed load followed by a separate store.
pub struct RacyCounter {
    value: AtomicI64,
}

pub fn racy_counter() -> ScenarioDef<RacyCounter> {
    ScenarioDef::new("racy_counter", || RacyCounter {
        value: AtomicI64::new(0),
    })
    .describe("non-atomic increment raced by a reader")
    .actor(|c| {
        let seen = c.value.load(Ordering::Relaxed);
        c.value.store(seen + 1, Ordering::Relaxed);
        0
    })
    .actor(|c| c.value.load(Ordering::Relaxed))
    .extract(2, |_, results| Outcome::from(results[1]))
    .expect(0, Expect::Acceptable, "reader ran before the increment")
    .expect(1, Expect::Acceptable, "reader saw the increment")
    .otherwise(Expect::Forbidden, "counter held a value nobody wrote")
}

pub fn locked_counter() -> ScenarioDef<Mutex<i64>> {
    ScenarioDef::new("locked_counter", || Mutex::new(0_i64))
        .describe("two increments under a mutex never lose an update")
        .actor(|m| {
            *m.lock() += 1;
            0
        })
        .actor(|m| {
            *m.lock() += 1;
            0
        })
        .extract(2, |m, _| Outcome::from(*m.lock()))
        .expect(2, Expect::Acceptable, "both increments landed")
        .otherwise(Expect::Forbidden, "an increment was lost")
}

/// Message passing: data then flag, both relaxed.
pub struct MessagePassing {
    data: AtomicI64,
    flag: AtomicBool,
    seen_data: AtomicI64,
}

pub fn message_passing_relaxed() -> ScenarioDef<MessagePassing> {
    ScenarioDef::new("message_passing_relaxed", || MessagePassing {
        data: AtomicI64::new(0),
        flag: AtomicBool::new(false),
        seen_data: AtomicI64::new(-1),
    })
    .describe("relaxed flag does not order the data write before it")
    .actor(|s| {
        s.data.store(1, Ordering::Relaxed);
        s.flag.store(true, Ordering::Relaxed);
        0
    })
    .actor(|s| {
        let flag = s.flag.load(Ordering::Relaxed);
        s.seen_data
            .store(s.data.load(Ordering::Relaxed), Ordering::Relaxed);
        i64::from(flag)
    })
    .extract(2, |s, results| {
        Outcome::from([results[1], s.seen_data.load(Ordering::Relaxed)])
    })
    .expect([0, 0], Expect::Acceptable, "reader ran first")
    .expect([1, 1], Expect::Acceptable, "reader ran last")
    .expect([0, 1], Expect::Acceptable, "data seen before flag")
    .expect([1, 0], Expect::AcceptableInteresting, "stale data read")
}

pub struct StoreBuffer {
    x: AtomicI64,
    y: AtomicI64,
}

pub fn store_buffering_relaxed() -> ScenarioDef<StoreBuffer> {
    ScenarioDef::new("store_buffering_relaxed", || StoreBuffer {
        x: AtomicI64::new(0),
        y: AtomicI64::new(0),
    })
    .describe("Dekker-style store then load on opposite variables")
    .actor(|s| {
        s.x.store(1, Ordering::Relaxed);
        s.y.load(Ordering::Relaxed)
    })
    .actor(|s| {
        s.y.store(1, Ordering::Relaxed);
        s.x.load(Ordering::Relaxed)
    })
    .expect([0, 1], Expect::Acceptable, "first actor ran first")
    .expect([1, 0], Expect::Acceptable, "second actor ran first")
    .expect([1, 1], Expect::Acceptable, "stores interleaved")
    .expect([0, 0], Expect::AcceptableInteresting, "both loads missed")
}
