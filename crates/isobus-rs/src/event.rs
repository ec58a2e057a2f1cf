//! A minimal, type-safe event dispatcher used for every `on_*` callback
//! surface in the stack (address claim, transport completion, client state
//! changes). Supports safe listener removal while a dispatch is in progress
//! by deferring the removal until the current `emit` finishes.

use alloc::boxed::Box;
use alloc::vec::Vec;

pub type ListenerToken = u32;

struct Listener<Args> {
    token: ListenerToken,
    callback: Box<dyn FnMut(Args) + 'static>,
    pending_remove: bool,
}

/// A publish/subscribe channel carrying a single argument type `Args`.
///
/// `Args` is typically a small tuple or a `Copy` struct; listeners receive it
/// by value on every `emit`.
pub struct Event<Args> {
    listeners: Vec<Listener<Args>>,
    next_token: ListenerToken,
    dispatching: bool,
}

impl<Args: Clone> Default for Event<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone> Event<Args> {
    pub fn new() -> Self {
        Event {
            listeners: Vec::new(),
            next_token: 1,
            dispatching: false,
        }
    }

    /// Registers `callback`, returning a token usable with `unsubscribe`.
    pub fn subscribe(&mut self, callback: impl FnMut(Args) + 'static) -> ListenerToken {
        let token = self.next_token;
        self.next_token += 1;
        self.listeners.push(Listener {
            token,
            callback: Box::new(callback),
            pending_remove: false,
        });
        token
    }

    /// Removes a previously subscribed listener. Safe to call from within a
    /// callback currently running inside `emit`.
    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        for listener in &mut self.listeners {
            if listener.token == token {
                if self.dispatching {
                    listener.pending_remove = true;
                } else {
                    self.listeners.retain(|l| l.token != token);
                }
                return true;
            }
        }
        false
    }

    /// Invokes every active listener, in subscription order, with a clone of
    /// `args`. Listeners subscribed during this call do not run until the
    /// next `emit`.
    pub fn emit(&mut self, args: Args) {
        self.dispatching = true;
        let count = self.listeners.len();
        for i in 0..count {
            if !self.listeners[i].pending_remove {
                (self.listeners[i].callback)(args.clone());
            }
        }
        self.dispatching = false;
        self.listeners.retain(|l| !l.pending_remove);
    }

    pub fn count(&self) -> usize {
        self.listeners.iter().filter(|l| !l.pending_remove).count()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[test]
    fn emits_in_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut event: Event<u32> = Event::new();
        let log1 = log.clone();
        event.subscribe(move |v| log1.borrow_mut().push((1, v)));
        let log2 = log.clone();
        event.subscribe(move |v| log2.borrow_mut().push((2, v)));
        event.emit(42);
        assert_eq!(*log.borrow(), alloc::vec![(1, 42), (2, 42)]);
    }

    #[test]
    fn unsubscribe_removes_listener_for_next_emit() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut event: Event<u32> = Event::new();
        let log1 = log.clone();
        let token = event.subscribe(move |v| log1.borrow_mut().push(v));
        event.emit(1);
        assert!(event.unsubscribe(token));
        event.emit(2);
        assert_eq!(*log.borrow(), alloc::vec![1]);
        assert_eq!(event.count(), 0);
    }
}
