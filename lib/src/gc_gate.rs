//! GC-readiness gate (§5, §9 REDESIGN FLAGS): replaces the source's
//! literal "poll a flag and sleep one second" loop with a `Condvar` that
//! `index_add` blocks on while a collector holds it and that the collector
//! wakes on release.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct GcGate {
    running: Mutex<bool>,
    condvar: Condvar,
}

impl GcGate {
    pub fn new() -> Self {
        GcGate::default()
    }

    /// Blocks until no collection is in progress, then runs `f`. Any
    /// writer started while `f` runs still observes this call's gate state
    /// only at entry, matching the source's "check once, then proceed"
    /// semantics for a single `index_add` call.
    pub fn wait_until_clear<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        while *running {
            running = self.condvar.wait(running).unwrap_or_else(|e| e.into_inner());
        }
        drop(running);
        f()
    }

    /// Marks a collection as started; writers calling `wait_until_clear`
    /// block until `finish_collection` is called.
    pub fn start_collection(&self) {
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn finish_collection(&self) {
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.condvar.notify_all();
    }
}
