//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Carrot.
//
// Carrot is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Carrot is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Carrot. If not, see <http://www.gnu.org/licenses/>.

//! Utilities for working with threads.
//!
//! Carrot runs everything on plain OS threads. Each connection gets a thread
//! of its own, tracked by a `ConnectionPool` so that shutdown can wait for
//! them; work which must have bounded concurrency (such as SMTP delivery)
//! goes through a `WorkerPool`.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::error;

type Task = Box<dyn FnOnce() + Send>;

/// An unbounded pool which runs every task on a dedicated thread and keeps
/// count of the threads still alive.
///
/// Clones share the same count.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    live: Arc<(Mutex<usize>, Condvar)>,
}

struct LiveGuard(Arc<(Mutex<usize>, Condvar)>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let (ref count, ref cond) = *self.0;
        let mut count = count.lock().unwrap();
        *count -= 1;
        cond.notify_all();
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` on a new thread with the given name.
    pub fn spawn(
        &self,
        name: String,
        task: impl FnOnce() + Send + 'static,
    ) -> io::Result<()> {
        *self.live.0.lock().unwrap() += 1;
        // The guard lives inside the closure, so the count drops again
        // whether the task returns, panics, or the thread never starts.
        let guard = LiveGuard(Arc::clone(&self.live));
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _guard = guard;
                task()
            })
            .map(|_| ())
    }

    /// Return the number of tasks which have not yet finished.
    pub fn active(&self) -> usize {
        *self.live.0.lock().unwrap()
    }

    /// Block until every task has finished or `timeout` elapses.
    ///
    /// Returns whether all tasks finished.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let (ref count, ref cond) = *self.live;
        let deadline = Instant::now() + timeout;
        let mut count = count.lock().unwrap();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            count = cond.wait_timeout(count, deadline - now).unwrap().0;
        }

        true
    }
}

/// A fixed-size pool of worker threads fed from a shared queue.
///
/// The workers are only started when the first task is submitted. They exit
/// once the pool is dropped and the queue has drained.
pub struct WorkerPool {
    name: String,
    size: usize,
    queue: Mutex<Option<crossbeam::channel::Sender<Task>>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        WorkerPool {
            name: name.into(),
            size: size.max(1),
            queue: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `task` to run on one of the workers.
    ///
    /// Tasks start in submission order, but with more than one worker they
    /// may complete in any order.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.queue.lock().unwrap();
        let sender = queue.get_or_insert_with(|| self.start_workers());
        if sender.send(Box::new(task)).is_err() {
            error!("{}: no worker is left to accept tasks", self.name);
        }
    }

    fn start_workers(&self) -> crossbeam::channel::Sender<Task> {
        let (sender, receiver) = crossbeam::channel::unbounded::<Task>();
        for ix in 0..self.size {
            let receiver = receiver.clone();
            if let Err(e) = thread::Builder::new()
                .name(format!("{}-{}", self.name, ix))
                .spawn(move || {
                    for task in receiver.iter() {
                        task();
                    }
                })
            {
                error!("{}: failed to start worker {}: {}", self.name, ix, e);
            }
        }

        sender
    }
}
