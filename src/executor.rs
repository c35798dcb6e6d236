//! Execution facilities for producers. A deferred never spawns work on its
//! own; producers are handed an [`Executor`] explicitly.
//!
use crate::{Deferred, Error};
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor {
    fn execute(&self, job: Job) -> Result<(), Error>;
}

impl<F> Executor for F
where
    F: Fn(Job),
{
    fn execute(&self, job: Job) -> Result<(), Error> {
        self(job);
        Ok(())
    }
}

/// Runs each job on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, job: Job) -> Result<(), Error> {
        job();
        Ok(())
    }
}

/// Runs each job on its own detached thread.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    name: String,
}

impl ThreadExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("deferred-producer")
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) -> Result<(), Error> {
        thread::Builder::new().name(self.name.clone()).spawn(job)?;
        Ok(())
    }
}

/// A named worker thread that runs jobs one at a time, in submission order.
///
/// Dropping the queue lets the worker finish the jobs already submitted and
/// then joins it. A job may drop the last handle to its own queue; the worker
/// is then detached instead of joined.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, SerialQueue};
/// use futures::executor::block_on;
///
/// let queue = SerialQueue::new("fetch").unwrap();
/// let bytes = Deferred::<Vec<u8>, String>::spawn_on(&queue, || Ok(b"hi".to_vec())).unwrap();
/// assert_eq!(block_on(bytes), Ok(b"hi".to_vec()));
/// ```
#[derive(Debug)]
pub struct SerialQueue {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let (sender, receiver) = channel::<Job>();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::trace!("serial queue '{name}' starting");
            for job in receiver {
                job();
            }
            tracing::trace!("serial queue '{name}' exiting");
        })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) -> Result<(), Error> {
        let sender = self.sender.as_ref().ok_or(Error::ExecutorClosed)?;
        sender.send(job).map_err(|_| Error::ExecutorClosed)
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            // Dropped by one of its own jobs: the worker exits once that job
            // returns, and cannot join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            // A panicking job takes the worker down with it.
            if handle.join().is_err() {
                tracing::warn!("serial queue worker panicked");
            }
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Runs `producer` on `executor` and settles the returned deferred with
    /// its outcome.
    pub fn spawn_on<X, F>(executor: &X, producer: F) -> Result<Self, Error>
    where
        X: Executor + ?Sized,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let deferred = Deferred::new();
        let settle = deferred.clone();
        executor.execute(Box::new(move || settle.complete(producer())))?;
        Ok(deferred)
    }
}

#[cfg(test)]
mod tests {
use futures::executor::block_on;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use super::{Executor, Immediate, Job, SerialQueue, ThreadExecutor};
use crate::Deferred;

#[test]
fn test_immediate_settles_before_returning() {
    let deferred = Deferred::<i32, ()>::spawn_on(&Immediate, || Ok(1)).unwrap();
    assert_eq!(deferred.settlement().fulfilled(), Some(1));
}

#[test]
fn test_thread_executor_rejects() {
    let executor = ThreadExecutor::new("producer");
    let deferred = Deferred::<i32, String>::spawn_on(&executor, || {
        thread::sleep(Duration::from_millis(50));
        Err("invalid source".into())
    })
    .unwrap();
    assert_eq!(block_on(deferred), Err("invalid source".to_string()));
}

#[test]
fn test_serial_queue_keeps_order() {
    let queue = SerialQueue::new("serial").unwrap();
    let seen = Arc::new(Mutex::new(vec![]));
    let outputs: Vec<_> = (0..5)
        .map(|i| {
            let seen = seen.clone();
            Deferred::<usize, ()>::spawn_on(&queue, move || {
                seen.lock().unwrap().push(i);
                Ok(i)
            })
            .unwrap()
        })
        .collect();
    let all = block_on(Deferred::combine(outputs)).unwrap();
    assert_eq!(all, vec![0, 1, 2, 3, 4]);
    drop(queue);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_closure_executor() {
    let jobs = Arc::new(Mutex::new(Vec::<Job>::new()));
    let queued = jobs.clone();
    let executor = move |job: Job| queued.lock().unwrap().push(job);
    let deferred = Deferred::<&str, ()>::spawn_on(&executor, || Ok("later")).unwrap();
    assert!(deferred.is_pending());
    for job in jobs.lock().unwrap().drain(..) {
        job();
    }
    assert!(deferred.is_fulfilled());
}

#[test]
fn test_trait_object_executor() {
    let executor: Box<dyn Executor> = Box::new(Immediate);
    let deferred = Deferred::<i32, ()>::spawn_on(executor.as_ref(), || Ok(2)).unwrap();
    assert!(deferred.is_fulfilled());
}

#[test]
fn test_serial_queue_dropped_from_its_own_job() {
    let slot = Arc::new(Mutex::new(Some(SerialQueue::new("self-drop").unwrap())));
    let owner = slot.clone();
    let done = Deferred::<(), ()>::new();
    let finished = done.clone();
    slot.lock()
        .unwrap()
        .as_ref()
        .unwrap()
        .execute(Box::new(move || {
            drop(owner.lock().unwrap().take());
            finished.resolve(());
        }))
        .unwrap();
    assert_eq!(block_on(done), Ok(()));
    assert!(slot.lock().unwrap().is_none());
}
}
