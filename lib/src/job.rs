//! Job manager (§4.12): a bounded pool of OS threads that runs checkout
//! tasks and merge-recovery tasks off the caller's thread. Grounded in the
//! teacher's reliance on `rayon` for parallel tree walks, generalized here
//! to a user-facing job queue with cancellation, since `rayon::ThreadPool`
//! has no per-job cancel handle and this spec needs one (§4.10's checkout
//! task table, §5 cancellation).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

pub struct JobHandle {
    cancel: Arc<AtomicBool>,
    done: Arc<std::sync::atomic::AtomicBool>,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Busy-polls until the job finishes. Jobs are expected to be short
    /// enough (single checkout/merge task) that this is acceptable; the
    /// job manager has no completion channel because callers that need one
    /// thread the progress counter through the job closure itself (§4.7).
    pub fn join(&self) {
        while !self.done.load(Ordering::Relaxed) {
            thread::yield_now();
        }
    }
}

pub struct JobManager {
    sender: mpsc::Sender<Message>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl JobManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Message>();
        let receiver = Arc::new(std::sync::Mutex::new(receiver));
        let mut workers = Vec::with_capacity(capacity);
        for _ in 0..capacity.max(1) {
            let receiver = Arc::clone(&receiver);
            workers.push(thread::spawn(move || loop {
                let message = receiver.lock().unwrap_or_else(|e| e.into_inner()).recv();
                match message {
                    Ok(Message::Run(job)) => job(),
                    Ok(Message::Shutdown) | Err(_) => break,
                }
            }));
        }
        JobManager { sender, workers }
    }

    /// Hands `f` to a worker thread. `f` receives an `AtomicBool` cancel
    /// flag it should poll between units of work (§5 cancellation).
    pub fn spawn(&self, f: impl FnOnce(&AtomicBool) + Send + 'static) -> JobHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let cancel_for_job = Arc::clone(&cancel);
        let done_for_job = Arc::clone(&done);
        let wrapped: Job = Box::new(move || {
            f(&cancel_for_job);
            done_for_job.store(true, Ordering::Relaxed);
        });
        let _ = self.sender.send(Message::Run(wrapped));
        JobHandle { cancel, done }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_spawned_jobs() {
        let manager = JobManager::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                manager.spawn(move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        for handle in handles {
            handle.join();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn cancel_flag_is_observed_by_the_job() {
        let manager = JobManager::new(1);
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed);
        let handle = manager.spawn(move |cancel| {
            while !cancel.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
            observed_clone.store(true, Ordering::Relaxed);
        });
        handle.cancel();
        handle.join();
        assert!(observed.load(Ordering::Relaxed));
    }
}
