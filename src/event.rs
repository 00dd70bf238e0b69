//! A tiny synchronous event bus, letting the (out-of-scope) accessory
//! server react to pairing lifecycle events without the Pair-Setup
//! handler knowing anything about its consumers. Grounded on the
//! upstream `hap` crate's `event::{Event, EventEmitterPtr}`, referenced
//! from `pair_setup.rs`'s `handle_exchange` as
//! `event_emitter.lock().expect(...).emit(&Event::DevicePaired)`.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DevicePaired,
}

#[derive(Default)]
pub struct EventEmitter {
    listeners: Vec<Box<dyn Fn(&Event) + Send>>,
}

impl EventEmitter {
    pub fn new() -> EventEmitter {
        EventEmitter::default()
    }

    pub fn on<F: Fn(&Event) + Send + 'static>(&mut self, listener: F) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&self, event: &Event) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

pub type EventEmitterPtr = Arc<Mutex<EventEmitter>>;
