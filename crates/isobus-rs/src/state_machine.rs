//! A tiny generic state-machine wrapper that only transitions (and emits
//! `on_transition`) when the new state actually differs from the current
//! one, so callers can call `transition` unconditionally without worrying
//! about spurious events.

use crate::event::Event;

pub struct StateMachine<S: Copy + PartialEq> {
    state: S,
    pub on_transition: Event<(S, S)>,
}

impl<S: Copy + PartialEq> StateMachine<S> {
    pub fn new(initial: S) -> Self {
        StateMachine {
            state: initial,
            on_transition: Event::new(),
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn is(&self, s: S) -> bool {
        self.state == s
    }

    /// Moves to `new_state`, emitting `on_transition(old, new)` only if it
    /// differs from the current state.
    pub fn transition(&mut self, new_state: S) {
        if new_state != self.state {
            let old = self.state;
            self.state = new_state;
            self.on_transition.emit((old, new_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
    }

    #[test]
    fn transition_to_same_state_is_a_no_op() {
        let mut sm = StateMachine::new(Light::Red);
        let count = alloc::rc::Rc::new(core::cell::RefCell::new(0u32));
        let count2 = count.clone();
        sm.on_transition.subscribe(move |_| *count2.borrow_mut() += 1);
        sm.transition(Light::Red);
        assert_eq!(*count.borrow(), 0);
        sm.transition(Light::Green);
        assert_eq!(*count.borrow(), 1);
        assert!(sm.is(Light::Green));
    }
}
