//! Pending request queue shared by the receiver and the worker pool.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::dns::Message;

/// A parsed request waiting for a worker. Owned by the queue until popped,
/// then by the popping worker until the response is sent.
pub struct Job {
    pub endpoint: SocketAddr,
    pub request: Message,
    pub received_at: Instant,
}

impl Job {
    pub fn new(endpoint: SocketAddr, request: Message) -> Self {
        Self {
            endpoint,
            request,
            received_at: Instant::now(),
        }
    }
}

/// FIFO of jobs with a companion condition signal. No hard capacity;
/// admission control happens at the receiver.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    signal: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        }
    }

    /// Enqueue a job and wake one waiting worker.
    pub fn push(&self, job: Job) {
        self.lock().push_back(job);
        self.signal.notify_one();
    }

    /// Take the head job, if any. Never blocks.
    pub fn pop(&self) -> Option<Job> {
        self.lock().pop_front()
    }

    /// Block until signalled or `timeout` elapses. Returns immediately when
    /// jobs are already pending.
    pub fn wait(&self, timeout: Duration) {
        let guard = self.lock();
        if !guard.is_empty() {
            return;
        }
        let _ = self
            .signal
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Wake every waiting worker (used on shutdown).
    pub fn notify_all(&self) {
        self.signal.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Message};

    fn job(id: u16) -> Job {
        Job::new(
            "127.0.0.1:5353".parse().unwrap(),
            Message {
                header: Header {
                    id,
                    ..Header::default()
                },
                questions: Vec::new(),
                answers: Vec::new(),
            },
        )
    }

    #[test]
    fn pop_returns_jobs_in_fifo_order() {
        let queue = JobQueue::new();
        queue.push(job(1));
        queue.push(job(2));

        assert_eq!(queue.pop().unwrap().request.header.id, 1);
        assert_eq!(queue.pop().unwrap().request.header.id, 2);
    }

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let queue = JobQueue::new();

        assert!(queue.pop().is_none());
    }

    #[test]
    fn wait_returns_immediately_when_jobs_are_pending() {
        let queue = JobQueue::new();
        queue.push(job(1));

        let start = Instant::now();
        queue.wait(Duration::from_secs(5));

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_on_an_empty_queue() {
        let queue = JobQueue::new();

        let start = Instant::now();
        queue.wait(Duration::from_millis(50));

        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
