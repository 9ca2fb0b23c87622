//! Yield wait sets: poll the registry in a loop, giving the CPU away
//! between passes. The run timeout is not honored; a yield wait set
//! returns only when signaled or when a callback reports work.

use super::WaitSet;

use crate::error::Result;

use parking_lot::Mutex;
use std::{hint, thread};

/// Passes spent spinning before the loop starts yielding the thread.
const SPIN_PASSES: u32 = 16;

pub(super) struct YieldWait {
    /// Kept apart from the registry lock so producers never wait behind
    /// a poll pass.
    signaled: Mutex<bool>,
}

impl YieldWait {
    pub(super) fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
        }
    }

    pub(super) fn signal(&self) {
        *self.signaled.lock() = true;
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    fn clear(&self) {
        *self.signaled.lock() = false;
    }
}

fn backoff(pass: u32) {
    if pass < SPIN_PASSES {
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

impl WaitSet {
    pub(super) fn yield_run(&self, wait: &YieldWait) -> Result<()> {
        let mut pass = 0u32;

        while !wait.is_signaled() {
            if self.try_all()?.is_ready() {
                break;
            }

            backoff(pass);
            pass = pass.saturating_add(1);
        }

        wait.clear();
        Ok(())
    }
}
