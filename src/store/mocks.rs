//! Test doubles for [`CounterStore`].

use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, KeyTtl, MemoryStore, StoreError, StoreResult};

/// Store operations a [`ScriptedStore`] can fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Increment,
    SetTtl,
    Ttl,
}

/// How a scripted operation misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return a connection error.
    Fail,
    /// Never complete.
    Hang,
    /// Complete normally after the given delay.
    Delay(Duration),
}

#[derive(Debug, Default)]
struct FaultSlot(Mutex<Option<Fault>>);

impl FaultSlot {
    fn set(&self, fault: Option<Fault>) {
        *self.0.lock().unwrap() = fault;
    }

    async fn apply(&self, op: &str) -> StoreResult<()> {
        let fault = *self.0.lock().unwrap();
        match fault {
            Some(Fault::Hang) => pending::<StoreResult<()>>().await,
            Some(Fault::Fail) => Err(StoreError::Connection(format!("injected {op} failure"))),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A [`MemoryStore`] wrapper that counts calls and injects faults.
///
/// It does not offer the atomic increment-with-expiry primitive unless built
/// with [`ScriptedStore::atomic`], so the limiter's two-step path is the one
/// exercised by default.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    atomic: bool,
    increments: AtomicUsize,
    set_ttls: AtomicUsize,
    ttls: AtomicUsize,
    gets: AtomicUsize,
    increment_fault: FaultSlot,
    set_ttl_fault: FaultSlot,
    ttl_fault: FaultSlot,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ..Self::default()
        }
    }

    pub fn inject(&self, op: Op, fault: Option<Fault>) {
        match op {
            Op::Increment => self.increment_fault.set(fault),
            Op::SetTtl => self.set_ttl_fault.set(fault),
            Op::Ttl => self.ttl_fault.set(fault),
        }
    }

    pub fn increments(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn set_ttls(&self) -> usize {
        self.set_ttls.load(Ordering::SeqCst)
    }

    pub fn ttls(&self) -> usize {
        self.ttls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.increments() + self.set_ttls() + self.ttls() + self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for ScriptedStore {
    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        self.increment_fault.apply("increment").await?;
        self.inner.increment(key).await
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<Option<i64>> {
        if !self.atomic {
            return Ok(None);
        }
        self.increments.fetch_add(1, Ordering::SeqCst);
        self.increment_fault.apply("increment").await?;
        self.inner.increment_with_ttl(key, ttl).await
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.set_ttls.fetch_add(1, Ordering::SeqCst);
        self.set_ttl_fault.apply("set_ttl").await?;
        self.inner.set_ttl(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.ttls.fetch_add(1, Ordering::SeqCst);
        self.ttl_fault.apply("ttl").await?;
        self.inner.ttl(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
}
