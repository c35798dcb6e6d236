use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};
use crate::Error;

/// A value of type `T` that becomes available at most once, or fails with an
/// `E`. Cloning the handle shares the same underlying state.
///
/// Observers attached with [`then`](Self::then) or
/// [`and_then`](Self::and_then) run exactly once, in registration order, on
/// the thread that settles the deferred. Observers attached after settlement
/// run immediately on the registering thread.
///
/// # Examples
///
/// ```
/// use deferred::Deferred;
/// use std::thread;
///
/// let data = Deferred::<Vec<u8>, String>::new();
/// let len = data.then(|bytes| bytes.len());
///
/// let producer = data.clone();
/// let task = thread::spawn(move || producer.resolve(vec![1, 2, 3]));
/// task.join().expect("The producer thread has panicked");
///
/// assert_eq!(len.settlement().fulfilled(), Some(3));
/// ```
pub struct Deferred<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

/// Snapshot of a deferred's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

type FulfilledBlock<T> = Box<dyn FnOnce(T) + Send + 'static>;
type RejectedBlock<E> = Box<dyn FnOnce(E) + Send + 'static>;

/// A pair of settlement handlers waiting on a pending deferred.
pub(crate) struct Then<T, E> {
    pub(crate) on_fulfilled: FulfilledBlock<T>,
    pub(crate) on_rejected: RejectedBlock<E>,
}

struct Inner<T, E> {
    settlement: Settlement<T, E>,
    pending: Vec<Then<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Settlement<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }

    pub fn fulfilled(self) -> Option<T> {
        match self {
            Settlement::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    pub fn rejected(self) -> Option<E> {
        match self {
            Settlement::Rejected(error) => Some(error),
            _ => None,
        }
    }
}

impl<T: Clone, E: Clone> Settlement<T, E> {
    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

impl<T, E> Then<T, E> {
    fn dispatch(self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => (self.on_fulfilled)(value),
            Err(error) => (self.on_rejected)(error),
        }
    }
}

impl<T, E> Deferred<T, E> {
    /// Creates a pending deferred with no observers.
    pub fn new() -> Self {
        Self::with_settlement(Settlement::Pending)
    }

    /// Creates a deferred that is already fulfilled with `value`.
    pub fn from_value(value: T) -> Self {
        Self::with_settlement(Settlement::Fulfilled(value))
    }

    /// Creates a deferred that is already rejected with `error`.
    pub fn from_error(error: E) -> Self {
        Self::with_settlement(Settlement::Rejected(error))
    }

    fn with_settlement(settlement: Settlement<T, E>) -> Self {
        Self {
            promise: Arc::new(Mutex::new(Inner {
                settlement,
                pending: vec![],
                wakers: vec![],
            })),
        }
    }

    // Every transition finishes before user code runs, so a poisoned lock
    // still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_pending(&self) -> bool {
        self.lock().settlement.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.lock().settlement, Settlement::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.lock().settlement, Settlement::Rejected(_))
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Returns a copy of the current state.
    pub fn settlement(&self) -> Settlement<T, E> {
        self.lock().settlement.clone()
    }

    /// Fulfills the deferred and runs every waiting observer with `value`.
    ///
    /// Settling twice is a contract violation: the second call is ignored
    /// and logged. Use [`try_resolve`](Self::try_resolve) to detect it.
    pub fn resolve(&self, value: T) {
        if self.settle(Ok(value)).is_err() {
            tracing::warn!("ignoring resolve on an already settled deferred");
        }
    }

    /// Rejects the deferred and runs every waiting rejection handler with
    /// `error`. A second settlement is ignored and logged.
    pub fn reject(&self, error: E) {
        if self.settle(Err(error)).is_err() {
            tracing::warn!("ignoring reject on an already settled deferred");
        }
    }

    /// Settles with `Ok` as [`resolve`](Self::resolve), `Err` as
    /// [`reject`](Self::reject).
    pub fn complete(&self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    pub fn try_resolve(&self, value: T) -> Result<(), Error> {
        self.settle(Ok(value))
    }

    pub fn try_reject(&self, error: E) -> Result<(), Error> {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T, E>) -> Result<(), Error> {
        let (observers, wakers) = {
            let mut promise = self.lock();
            if !promise.settlement.is_pending() {
                return Err(Error::AlreadySettled);
            }
            promise.settlement = match &outcome {
                Ok(value) => Settlement::Fulfilled(value.clone()),
                Err(error) => Settlement::Rejected(error.clone()),
            };
            (
                std::mem::take(&mut promise.pending),
                std::mem::take(&mut promise.wakers),
            )
        };
        tracing::trace!(
            fulfilled = outcome.is_ok(),
            observers = observers.len(),
            "deferred settled"
        );
        // A panicking observer must not strand the ones queued after it.
        let mut panicked = None;
        for then in observers {
            let outcome = outcome.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || then.dispatch(outcome))) {
                panicked.get_or_insert(payload);
            }
        }
        for waker in wakers {
            waker.wake()
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Runs `then` now if the deferred has settled, otherwise queues it. The
    /// state check and the enqueue happen under one lock, so a concurrent
    /// settlement can neither miss nor repeat the observer.
    pub(crate) fn subscribe(&self, then: Then<T, E>) {
        let outcome = {
            let mut promise = self.lock();
            match promise.settlement.outcome() {
                Some(outcome) => outcome,
                None => {
                    promise.pending.push(then);
                    return;
                }
            }
        };
        then.dispatch(outcome);
    }

    /// Settles `target` the same way this deferred settles.
    fn forward_to(&self, target: Deferred<T, E>) {
        let rejected = target.clone();
        self.subscribe(Then {
            on_fulfilled: Box::new(move |value: T| target.resolve(value)),
            on_rejected: Box::new(move |error: E| rejected.reject(error)),
        });
    }

    /// Transforms the fulfilled value, returning a deferred for the result.
    /// A rejection skips `on_fulfilled` and passes through unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let source = Deferred::<i32, String>::new();
    /// let chained = source.then(|v| v + 1).then(|v| v.to_string());
    /// source.reject("offline".to_string());
    /// assert_eq!(chained.settlement().rejected(), Some("offline".to_string()));
    /// ```
    pub fn then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_with(on_fulfilled, |_: &E| {})
    }

    /// Like [`then`](Self::then), also calling `on_rejected` for its side
    /// effect before the error propagates to the returned deferred.
    pub fn then_with<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
        R: FnOnce(&E) + Send + 'static,
    {
        let deferred = Deferred::new();
        let fulfilled = deferred.clone();
        let rejected = deferred.clone();
        self.subscribe(Then {
            on_fulfilled: Box::new(move |value: T| fulfilled.resolve(on_fulfilled(value))),
            on_rejected: Box::new(move |error: E| {
                on_rejected(&error);
                rejected.reject(error)
            }),
        });
        deferred
    }

    /// Chains an asynchronous step. The deferred returned by `on_fulfilled`
    /// is flattened into the result, which settles when that inner deferred
    /// settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let inner = Deferred::<i32, ()>::new();
    /// let step = inner.clone();
    /// let source = Deferred::<i32, ()>::new();
    /// let chained = source.and_then(move |_| step).then(|v| v + 1);
    ///
    /// source.resolve(1);
    /// assert!(chained.is_pending());
    /// inner.resolve(2);
    /// assert_eq!(chained.settlement().fulfilled(), Some(3));
    /// ```
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U, E> + Send + 'static,
    {
        self.and_then_with(on_fulfilled, |_: &E| {})
    }

    /// Like [`and_then`](Self::and_then), also calling `on_rejected` when
    /// this deferred rejects. Rejections of the inner deferred propagate
    /// without calling it.
    pub fn and_then_with<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U, E> + Send + 'static,
        R: FnOnce(&E) + Send + 'static,
    {
        let deferred = Deferred::new();
        let fulfilled = deferred.clone();
        let rejected = deferred.clone();
        self.subscribe(Then {
            on_fulfilled: Box::new(move |value: T| on_fulfilled(value).forward_to(fulfilled)),
            on_rejected: Box::new(move |error: E| {
                on_rejected(&error);
                rejected.reject(error)
            }),
        });
        deferred
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { promise: self.promise.clone() }
    }
}

impl<T, E> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> From<Result<T, E>> for Deferred<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => Self::from_value(value),
            Err(error) => Self::from_error(error),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let promise = self.lock();
        let state = match promise.settlement {
            Settlement::Pending => "pending",
            Settlement::Fulfilled(_) => "fulfilled",
            Settlement::Rejected(_) => "rejected",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("observers", &promise.pending.len())
            .finish()
    }
}

/// Awaiting a deferred yields a copy of its outcome; the deferred stays
/// settled and other clones can still await or observe it.
impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut promise = self.lock();
        match promise.settlement.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !promise.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    promise.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
