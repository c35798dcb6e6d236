//! Aggregation of many deferred values into one.
//!
use crate::deferred::{Deferred, Then};
use std::sync::{Arc, Mutex, PoisonError};

/// Order of the values in a combined result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Values appear in the order their inputs fulfilled.
    #[default]
    Completion,
    /// Values appear in the order of the inputs.
    Input,
}

/// What a combined deferred does when one of its inputs rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Reject the combined deferred with the first input error.
    #[default]
    FailFast,
    /// Leave rejected inputs unobserved. The combined deferred then never
    /// settles.
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombineOptions {
    pub order: Order,
    pub on_rejection: RejectionPolicy,
}

impl CombineOptions {
    pub fn order(self, order: Order) -> Self {
        Self { order, ..self }
    }

    pub fn on_rejection(self, on_rejection: RejectionPolicy) -> Self {
        Self { on_rejection, ..self }
    }
}

struct Accumulator<T> {
    expected: usize,
    order: Order,
    values: Vec<(usize, T)>,
}

impl<T> Accumulator<T> {
    /// Records one fulfilled input, returning the full result once every
    /// input has arrived.
    fn push(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        self.values.push((index, value));
        if self.values.len() < self.expected {
            return None;
        }
        let mut values = std::mem::take(&mut self.values);
        if self.order == Order::Input {
            values.sort_by_key(|(index, _)| *index);
        }
        Some(values.into_iter().map(|(_, value)| value).collect())
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Combines `deferreds` into one deferred that fulfills with every input
    /// value, in completion order, and rejects with the first input error.
    /// An empty input fulfills immediately with an empty `Vec`.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let parts: Vec<_> = (0..5).map(|_| Deferred::<&str, ()>::from_value("s")).collect();
    /// let all = Deferred::combine(parts);
    /// assert_eq!(all.settlement().fulfilled().map(|v| v.len()), Some(5));
    /// ```
    pub fn combine<I>(deferreds: I) -> Deferred<Vec<T>, E>
    where
        I: IntoIterator<Item = Deferred<T, E>>,
    {
        Self::combine_with(deferreds, CombineOptions::default())
    }

    /// [`combine`](Self::combine) with explicit ordering and rejection
    /// handling.
    pub fn combine_with<I>(deferreds: I, options: CombineOptions) -> Deferred<Vec<T>, E>
    where
        I: IntoIterator<Item = Deferred<T, E>>,
    {
        let inputs: Vec<_> = deferreds.into_iter().collect();
        let combined = Deferred::new();
        if inputs.is_empty() {
            combined.resolve(vec![]);
            return combined;
        }

        let accumulator = Arc::new(Mutex::new(Accumulator {
            expected: inputs.len(),
            order: options.order,
            values: Vec::with_capacity(inputs.len()),
        }));
        for (index, input) in inputs.iter().enumerate() {
            let accumulator = accumulator.clone();
            let fulfilled = combined.clone();
            let rejected = combined.clone();
            let policy = options.on_rejection;
            input.subscribe(Then {
                on_fulfilled: Box::new(move |value: T| {
                    let done = accumulator
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(index, value);
                    if let Some(values) = done {
                        // Already rejected when failing fast.
                        let _ = fulfilled.try_resolve(values);
                    }
                }),
                on_rejected: Box::new(move |error: E| match policy {
                    RejectionPolicy::FailFast => {
                        let _ = rejected.try_reject(error);
                    }
                    RejectionPolicy::Ignore => {
                        tracing::debug!(index, "combine ignoring rejected input");
                    }
                }),
            });
        }
        combined
    }
}

#[cfg(test)]
mod tests {
use super::{Accumulator, CombineOptions, Order, RejectionPolicy};
use crate::Deferred;

#[test]
fn test_accumulator_waits_for_every_input() {
    let mut acc = Accumulator { expected: 3, order: Order::Input, values: vec![] };
    assert_eq!(acc.push(2, 'c'), None);
    assert_eq!(acc.push(0, 'a'), None);
    assert_eq!(acc.push(1, 'b'), Some(vec!['a', 'b', 'c']));
}

#[test]
fn test_combine_completion_order() {
    let inputs: Vec<_> = (0..3).map(|_| Deferred::<i32, ()>::new()).collect();
    let combined = Deferred::combine(inputs.clone());
    inputs[2].resolve(30);
    inputs[0].resolve(10);
    assert!(combined.is_pending());
    inputs[1].resolve(20);
    assert_eq!(combined.settlement().fulfilled(), Some(vec![30, 10, 20]));
}

#[test]
fn test_combine_input_order() {
    let inputs: Vec<_> = (0..3).map(|_| Deferred::<i32, ()>::new()).collect();
    let options = CombineOptions::default().order(Order::Input);
    let combined = Deferred::combine_with(inputs.clone(), options);
    inputs[2].resolve(30);
    inputs[0].resolve(10);
    inputs[1].resolve(20);
    assert_eq!(combined.settlement().fulfilled(), Some(vec![10, 20, 30]));
}

#[test]
fn test_combine_fails_fast() {
    let inputs: Vec<_> = (0..3).map(|_| Deferred::<i32, &str>::new()).collect();
    let combined = Deferred::combine(inputs.clone());
    inputs[0].resolve(1);
    inputs[1].reject("lost");
    inputs[2].reject("also lost");
    assert_eq!(combined.settlement().rejected(), Some("lost"));
}

#[test]
fn test_combine_ignoring_rejection_stays_pending() {
    let inputs: Vec<_> = (0..2).map(|_| Deferred::<i32, &str>::new()).collect();
    let options = CombineOptions::default().on_rejection(RejectionPolicy::Ignore);
    let combined = Deferred::combine_with(inputs.clone(), options);
    inputs[0].reject("lost");
    inputs[1].resolve(2);
    assert!(combined.is_pending());
}

#[test]
fn test_combine_empty() {
    let combined = Deferred::<i32, ()>::combine(Vec::new());
    assert_eq!(combined.settlement().fulfilled(), Some(vec![]));
}
}
