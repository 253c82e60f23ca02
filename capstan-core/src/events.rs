//! Small typed event dispatch used by Queue and Worker. Handlers run
//! synchronously on the emitting task; a panicking handler is logged and must
//! never take the worker loop down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type PairHandler<A, B> = Arc<dyn Fn(&A, &B) + Send + Sync>;

/// A single event channel carrying one payload type.
pub(crate) struct EventChannel<E> {
    handlers: Mutex<Vec<Handler<E>>>,
}

impl<E> Default for EventChannel<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<E> EventChannel<E> {
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        self.handlers.lock().unwrap().push(Arc::new(handler));
    }

    pub fn emit(&self, event: &E) {
        // Snapshot so a handler subscribing mid-emit can't deadlock us.
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            let handler = handler.as_ref();
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!("event handler panicked");
            }
        }
    }
}

/// As `EventChannel`, for the two-argument `failed` channels.
pub(crate) struct PairEventChannel<A, B> {
    handlers: Mutex<Vec<PairHandler<A, B>>>,
}

impl<A, B> Default for PairEventChannel<A, B> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<A, B> PairEventChannel<A, B> {
    pub fn subscribe(&self, handler: impl Fn(&A, &B) + Send + Sync + 'static) {
        self.handlers.lock().unwrap().push(Arc::new(handler));
    }

    pub fn emit(&self, first: &A, second: &B) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            let handler = handler.as_ref();
            if catch_unwind(AssertUnwindSafe(|| handler(first, second))).is_err() {
                tracing::error!("event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_emit_fans_out_to_every_handler() {
        let channel = EventChannel::<u32>::default();
        let seen = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let seen = seen.clone();
            channel.subscribe(move |event| {
                seen.fetch_add(*event, Ordering::SeqCst);
            });
        }

        channel.emit(&7);

        assert_eq!(seen.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let channel = EventChannel::<()>::default();
        let calls = Arc::new(AtomicU32::new(0));

        channel.subscribe(|_| panic!("handler bug"));
        let survivor = calls.clone();
        channel.subscribe(move |_| {
            survivor.fetch_add(1, Ordering::SeqCst);
        });

        channel.emit(&());
        channel.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pair_channel_passes_both_arguments() {
        let channel = PairEventChannel::<String, u32>::default();
        let calls = Arc::new(AtomicU32::new(0));

        let seen = calls.clone();
        channel.subscribe(move |name, count| {
            assert_eq!(name, "jobs");
            seen.fetch_add(*count, Ordering::SeqCst);
        });

        channel.emit(&"jobs".to_owned(), &5);

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
