use deferred::Deferred;
use std::sync::Once;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A deferred that a background thread resolves with `value` after `delay`.
pub fn resolve_later<T, E>(value: T, delay: Duration) -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let deferred = Deferred::new();
    let producer = deferred.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        producer.resolve(value);
    });
    deferred
}
