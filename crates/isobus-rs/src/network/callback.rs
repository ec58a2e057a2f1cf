//! PGN dispatch registry: application code subscribes to a PGN once and gets
//! every matching message handed back, instead of filtering a single
//! firehose event itself.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::frame::Message;
use crate::types::Pgn;

type PgnHandler = Box<dyn FnMut(&Message)>;

/// Maps a PGN to the handlers registered for it. `BTreeMap` over
/// `HashMap` because this core is `no_std`: there is no hasher available
/// without pulling in `std` or a third-party hashing crate for a registry
/// this small.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: BTreeMap<Pgn, Vec<PgnHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry { handlers: BTreeMap::new() }
    }

    pub fn register(&mut self, pgn: Pgn, handler: PgnHandler) {
        self.handlers.entry(pgn).or_default().push(handler);
    }

    pub fn dispatch(&mut self, message: &Message) {
        if let Some(handlers) = self.handlers.get_mut(&message.pgn) {
            for handler in handlers.iter_mut() {
                handler(message);
            }
        }
    }

    pub fn registered_pgns(&self) -> impl Iterator<Item = &Pgn> {
        self.handlers.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, BROADCAST_ADDRESS, NULL_ADDRESS};
    use alloc::vec;
    use core::cell::RefCell;
    use alloc::rc::Rc;

    #[test]
    fn dispatch_invokes_only_matching_pgn() {
        let mut registry = CallbackRegistry::new();
        let hits = Rc::new(RefCell::new(0u32));
        let hits_clone = hits.clone();
        registry.register(0x00_EE00, Box::new(move |_msg| *hits_clone.borrow_mut() += 1));

        let other = Message::new(0x00_FECA, vec![1, 2, 3], NULL_ADDRESS, BROADCAST_ADDRESS, Priority::DEFAULT);
        registry.dispatch(&other);
        assert_eq!(*hits.borrow(), 0);

        let matching = Message::new(0x00_EE00, vec![1], NULL_ADDRESS, BROADCAST_ADDRESS, Priority::DEFAULT);
        registry.dispatch(&matching);
        assert_eq!(*hits.borrow(), 1);
    }
}
