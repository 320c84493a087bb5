//! In-process connection manager for exercising the pool without a database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fxrates_common::StorageError;

use crate::manager::{IsolationLevel, ManageConnection};

/// Session state a real connection would carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConnection {
    pub serial: usize,
    pub autocommit: bool,
    /// `None` means the backend default.
    pub isolation: Option<IsolationLevel>,
    pub in_transaction: bool,
}

#[derive(Debug, Default)]
struct TestState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    resets: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_reset: AtomicBool,
}

/// Counting connection manager with switchable failures.
///
/// Clones share their counters, so a test can keep a handle after moving the
/// manager into a pool.
#[derive(Debug, Clone, Default)]
pub struct TestManager {
    state: Arc<TestState>,
    fail_connect_after: Option<usize>,
}

impl TestManager {
    /// Create a manager that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `connect` after the first `n` succeed.
    pub fn fail_connect_after(mut self, n: usize) -> Self {
        self.fail_connect_after = Some(n);
        self
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.state.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.state.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reset(&self, fail: bool) {
        self.state.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.state.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManageConnection for TestManager {
    type Connection = TestConnection;

    async fn connect(&self) -> Result<TestConnection, StorageError> {
        let serial = self.state.connects.load(Ordering::SeqCst);
        if self.fail_connect_after.is_some_and(|n| serial >= n) {
            return Err(StorageError::Connect("simulated connect failure".into()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(TestConnection {
            serial,
            autocommit: true,
            isolation: None,
            in_transaction: false,
        })
    }

    async fn begin(
        &self,
        conn: &mut TestConnection,
        isolation: IsolationLevel,
    ) -> Result<(), StorageError> {
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(StorageError::transaction("begin", "simulated begin failure"));
        }
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        conn.autocommit = false;
        conn.isolation = Some(isolation);
        conn.in_transaction = true;
        Ok(())
    }

    async fn commit(&self, conn: &mut TestConnection) -> Result<(), StorageError> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::transaction("commit", "simulated commit failure"));
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        conn.in_transaction = false;
        Ok(())
    }

    async fn rollback(&self, conn: &mut TestConnection) -> Result<(), StorageError> {
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(StorageError::transaction("rollback", "simulated rollback failure"));
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        conn.in_transaction = false;
        Ok(())
    }

    async fn reset(&self, conn: &mut TestConnection) -> Result<(), StorageError> {
        if self.state.fail_reset.load(Ordering::SeqCst) {
            return Err(StorageError::Reset("simulated reset failure".into()));
        }
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        conn.autocommit = true;
        conn.isolation = None;
        conn.in_transaction = false;
        Ok(())
    }

    async fn close(&self, _conn: TestConnection) -> Result<(), StorageError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
