//! Multi-subscriber callback registries used by [`AsyncLogger`], [`Channel`]
//! and [`Endpoint`] to fan events out to host code.
//!
//! A callback is identified for removal by an `(instance, function)` pair —
//! mirroring the original library's `AbstractFunction`, which compared a
//! bound method's instance pointer and member-function pointer rather than
//! any notion of object equality. Free functions carry a null instance;
//! closures have no natural identity at all, so registering one returns a
//! [`CallbackId`] token that must be kept to remove it later.
//!
//! Two flavors are provided, matching the original's ordered/unordered
//! container choice: [`EventCallback`] preserves registration order,
//! [`UnorderedEventCallback`] does not and is backed by a `hashbrown` map.
//! Both dispatch under a shared [`parking_lot::RwLock`] read guard, so
//! listeners may run concurrently with each other but never with a
//! mutating `add`/`remove`/`clear`.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::panic::{self, UnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque handle returned when registering a closure, needed to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

static NEXT_CLOSURE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity key used for removal: `(instance pointer, function pointer)`.
/// Free functions use `0` as the instance half; closures use the sentinel
/// `usize::MAX` to keep their synthetic id space disjoint from real
/// pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CallbackKey(usize, usize);

impl CallbackKey {
    const fn free(func: usize) -> Self {
        Self(0, func)
    }

    const fn method(instance: usize, func: usize) -> Self {
        Self(instance, func)
    }

    const fn closure(id: CallbackId) -> Self {
        Self(usize::MAX, id.0 as usize)
    }
}

type BoxedCall<Args> = Arc<dyn Fn(Args) + Send + Sync>;

fn free_key<Args>(func: fn(Args)) -> CallbackKey {
    CallbackKey::free(func as usize)
}

fn method_key<T, Args>(instance: *const T, method: fn(&T, Args)) -> CallbackKey {
    CallbackKey::method(instance as usize, method as usize)
}

/// An ordered (insertion-order) multi-subscriber callback list.
pub struct EventCallback<Args> {
    entries: RwLock<Vec<(CallbackKey, BoxedCall<Args>)>>,
}

impl<Args> Default for EventCallback<Args> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<Args: Clone + 'static> EventCallback<Args> {
    /// Create an empty callback list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a free function.
    pub fn add_free(&self, func: fn(Args)) {
        let key = free_key(func);
        self.entries.write().push((key, Arc::new(move |a| func(a))));
    }

    /// Register a bound method.
    ///
    /// `instance` must outlive every future `invoke` call that reaches this
    /// callback; the caller is responsible for calling `remove_method`
    /// before the instance is dropped.
    pub fn add_method<T: 'static>(&self, instance: &T, method: fn(&T, Args)) {
        let key = method_key(instance as *const T, method);
        let instance_ptr = instance as *const T;
        // SAFETY: caller contract documented above; `instance_ptr` is only
        // dereferenced while the registration is still live.
        let call: BoxedCall<Args> =
            Arc::new(move |a| unsafe { method(&*instance_ptr, a) });
        self.entries.write().push((key, call));
    }

    /// Register a closure. Returns an id that can later be passed to
    /// [`remove_closure`](Self::remove_closure).
    pub fn add_closure<F>(&self, f: F) -> CallbackId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        let id = CallbackId(NEXT_CLOSURE_ID.fetch_add(1, Ordering::Relaxed));
        let key = CallbackKey::closure(id);
        self.entries.write().push((key, Arc::new(f)));
        id
    }

    /// Remove every registration of the given free function.
    pub fn remove_free(&self, func: fn(Args)) {
        let key = free_key(func);
        self.entries.write().retain(|(k, _)| *k != key);
    }

    /// Remove every registration of the given bound method, regardless of
    /// instance — matching the original's documented behavior that method
    /// removal is instance-agnostic.
    pub fn remove_method<T>(&self, method: fn(&T, Args)) {
        let func = method as usize;
        self.entries.write().retain(|(k, _)| k.1 != func || k.0 == 0);
    }

    /// Remove the closure registered under `id`.
    pub fn remove_closure(&self, id: CallbackId) {
        let key = CallbackKey::closure(id);
        self.entries.write().retain(|(k, _)| *k != key);
    }

    /// Remove every registered callback.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of currently registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invoke every registered callback in registration order.
    pub fn invoke(&self, args: Args) {
        if self.is_empty() {
            return;
        }
        let guard = self.entries.read();
        for (_, call) in guard.iter() {
            call(args.clone());
        }
    }

    /// Invoke every registered callback, routing a panic from any one of
    /// them to `on_panic` instead of unwinding past this call.
    pub fn invoke_with_error_handler<H>(&self, args: Args, mut on_panic: H)
    where
        H: FnMut(Box<dyn std::any::Any + Send>),
        Args: UnwindSafe,
    {
        if self.is_empty() {
            return;
        }
        let guard = self.entries.read();
        for (_, call) in guard.iter() {
            let a = args.clone();
            let call = call.clone();
            if let Err(payload) = panic::catch_unwind(move || call(a)) {
                on_panic(payload);
            }
        }
    }
}

/// A registration-order-agnostic multi-subscriber callback list, backed by
/// a `hashbrown::HashMap` keyed on callback identity.
pub struct UnorderedEventCallback<Args> {
    entries: RwLock<HashMap<CallbackKey, BoxedCall<Args>>>,
}

impl<Args> Default for UnorderedEventCallback<Args> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<Args: Clone + 'static> UnorderedEventCallback<Args> {
    /// Create an empty callback list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a free function.
    pub fn add_free(&self, func: fn(Args)) {
        let key = free_key(func);
        self.entries.write().insert(key, Arc::new(move |a| func(a)));
    }

    /// Register a bound method. See [`EventCallback::add_method`] for the
    /// lifetime contract.
    pub fn add_method<T: 'static>(&self, instance: &T, method: fn(&T, Args)) {
        let key = method_key(instance as *const T, method);
        let instance_ptr = instance as *const T;
        let call: BoxedCall<Args> =
            Arc::new(move |a| unsafe { method(&*instance_ptr, a) });
        self.entries.write().insert(key, call);
    }

    /// Register a closure. Returns an id for later removal.
    pub fn add_closure<F>(&self, f: F) -> CallbackId
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        let id = CallbackId(NEXT_CLOSURE_ID.fetch_add(1, Ordering::Relaxed));
        let key = CallbackKey::closure(id);
        self.entries.write().insert(key, Arc::new(f));
        id
    }

    /// Remove every registration of the given free function.
    pub fn remove_free(&self, func: fn(Args)) {
        let key = free_key(func);
        self.entries.write().remove(&key);
    }

    /// Remove every registration of the given bound method, regardless of
    /// instance.
    pub fn remove_method<T>(&self, method: fn(&T, Args)) {
        let func = method as usize;
        self.entries.write().retain(|k, _| k.1 != func || k.0 == 0);
    }

    /// Remove the closure registered under `id`.
    pub fn remove_closure(&self, id: CallbackId) {
        let key = CallbackKey::closure(id);
        self.entries.write().remove(&key);
    }

    /// Remove every registered callback.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of currently registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invoke every registered callback. Order is unspecified.
    pub fn invoke(&self, args: Args) {
        if self.is_empty() {
            return;
        }
        let guard = self.entries.read();
        for call in guard.values() {
            call(args.clone());
        }
    }

    /// Invoke every registered callback, routing a panic from any one of
    /// them to `on_panic` instead of unwinding past this call.
    pub fn invoke_with_error_handler<H>(&self, args: Args, mut on_panic: H)
    where
        H: FnMut(Box<dyn std::any::Any + Send>),
        Args: UnwindSafe,
    {
        if self.is_empty() {
            return;
        }
        let guard = self.entries.read();
        for call in guard.values() {
            let a = args.clone();
            let call = call.clone();
            if let Err(payload) = panic::catch_unwind(move || call(a)) {
                on_panic(payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};

    #[test]
    fn free_function_is_invoked() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn bump(_: ()) {
            HITS.fetch_add(1, AOrdering::Relaxed);
        }

        let cb: EventCallback<()> = EventCallback::new();
        cb.add_free(bump);
        cb.invoke(());
        assert_eq!(HITS.load(AOrdering::Relaxed), 1);
    }

    #[test]
    fn removing_a_free_function_stops_future_invocations() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        fn bump(_: ()) {
            HITS.fetch_add(1, AOrdering::Relaxed);
        }

        let cb: EventCallback<()> = EventCallback::new();
        cb.add_free(bump);
        cb.remove_free(bump);
        cb.invoke(());
        assert_eq!(HITS.load(AOrdering::Relaxed), 0);
    }

    struct Counter {
        hits: AtomicUsize,
    }

    impl Counter {
        fn on_event(&self, n: i32) {
            self.hits.fetch_add(n as usize, AOrdering::Relaxed);
        }
    }

    #[test]
    fn bound_method_receives_the_instance() {
        let counter = Counter {
            hits: AtomicUsize::new(0),
        };
        let cb: EventCallback<i32> = EventCallback::new();
        cb.add_method(&counter, Counter::on_event);
        cb.invoke(3);
        cb.invoke(4);
        assert_eq!(counter.hits.load(AOrdering::Relaxed), 7);
    }

    #[test]
    fn closure_removal_is_scoped_to_its_id() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb: EventCallback<i32> = EventCallback::new();
        let h = hits.clone();
        let id = cb.add_closure(move |n| {
            h.fetch_add(n as usize, AOrdering::Relaxed);
        });
        cb.invoke(1);
        cb.remove_closure(id);
        cb.invoke(1);
        assert_eq!(hits.load(AOrdering::Relaxed), 1);
    }

    #[test]
    fn unordered_variant_dispatches_to_every_subscriber() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb: UnorderedEventCallback<i32> = UnorderedEventCallback::new();
        for _ in 0..3 {
            let h = hits.clone();
            cb.add_closure(move |n| {
                h.fetch_add(n as usize, AOrdering::Relaxed);
            });
        }
        cb.invoke(2);
        assert_eq!(hits.load(AOrdering::Relaxed), 6);
    }

    #[test]
    fn empty_callback_list_invokes_without_locking_issues() {
        let cb: EventCallback<()> = EventCallback::new();
        cb.invoke(());
        assert!(cb.is_empty());
    }

    #[test]
    fn unordered_invoke_with_error_handler_isolates_a_panicking_subscriber() {
        let hits = Arc::new(AtomicUsize::new(0));
        let panics = Arc::new(AtomicUsize::new(0));
        let cb: UnorderedEventCallback<i32> = UnorderedEventCallback::new();

        cb.add_closure(|_: i32| panic!("subscriber exploded"));
        let h = hits.clone();
        cb.add_closure(move |n| {
            h.fetch_add(n as usize, AOrdering::Relaxed);
        });

        let panics2 = panics.clone();
        cb.invoke_with_error_handler(5, move |_payload| {
            panics2.fetch_add(1, AOrdering::Relaxed);
        });

        assert_eq!(hits.load(AOrdering::Relaxed), 5);
        assert_eq!(panics.load(AOrdering::Relaxed), 1);
    }
}
