//! Typed publish/subscribe event bus with a single background dispatcher
//! thread and an independent 1 Hz timer thread.
//!
//! Handlers for a given event kind are invoked in registration order, on the
//! dispatcher thread, in arrival order across events of the same kind. A
//! handler that panics is caught and logged; it never blocks delivery to the
//! other handlers of that event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use otc_types::{AccountData, Contract, LogData, Order, StrategyEvent, Trade};

#[derive(Debug, Clone)]
pub enum Event {
    Timer,
    Order(Order),
    Trade(Trade),
    Position(otc_types::BrokerPosition),
    Account(AccountData),
    Contract(Contract),
    Log(LogData),
    Strategy(StrategyEvent),
}

/// Discriminant used as the dispatch key; mirrors `mem::discriminant` but
/// named so registration call sites read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Timer,
    Order,
    Trade,
    Position,
    Account,
    Contract,
    Log,
    Strategy,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Timer => EventKind::Timer,
            Event::Order(_) => EventKind::Order,
            Event::Trade(_) => EventKind::Trade,
            Event::Position(_) => EventKind::Position,
            Event::Account(_) => EventKind::Account,
            Event::Contract(_) => EventKind::Contract,
            Event::Log(_) => EventKind::Log,
            Event::Strategy(_) => EventKind::Strategy,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: std::collections::HashMap<EventKind, Vec<HandlerEntry>>,
    next_id: u64,
}

/// A token returned from `register`, used to `unregister` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    running: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    timer_period: Duration,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_timer_period(Duration::from_secs(1))
    }

    pub fn with_timer_period(timer_period: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(None),
            timer: Mutex::new(None),
            timer_period,
        }
    }

    /// Register a handler for `kind`. Idempotent in the sense that each call
    /// returns a fresh token; registering the same closure twice yields two
    /// independent invocations, matching the distilled core's handler-list
    /// semantics.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.handlers
            .entry(kind)
            .or_default()
            .push(HandlerEntry {
                id,
                handler: Arc::new(handler),
            });
        HandlerId(id)
    }

    /// Unregister a previously registered handler. A no-op if the id is
    /// unknown (already removed, or never registered) — idempotent.
    pub fn unregister(&self, kind: EventKind, id: HandlerId) {
        let mut reg = self.registry.lock();
        if let Some(list) = reg.handlers.get_mut(&kind) {
            list.retain(|entry| entry.id != id.0);
        }
    }

    /// Enqueue an event for dispatch. Non-blocking.
    pub fn put(&self, event: Event) {
        if self.sender.send(event).is_err() {
            error!("event bus channel closed, dropping event");
        }
    }

    /// Start the dispatcher and timer threads. Idempotent: calling `start`
    /// while already running has no effect.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let dispatcher_bus = Arc::clone(self);
        let dispatcher_handle = std::thread::spawn(move || dispatcher_bus.dispatch_loop());
        *self.dispatcher.lock() = Some(dispatcher_handle);

        let timer_bus = Arc::clone(self);
        let timer_handle = std::thread::spawn(move || timer_bus.timer_loop());
        *self.timer.lock() = Some(timer_handle);
    }

    /// Stop both background threads, joining them before returning.
    /// Idempotent: calling `stop` when not running has no effect.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Unblock the dispatcher's recv by pushing a harmless timer tick.
        let _ = self.sender.send(Event::Timer);
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.timer.lock().take() {
            let _ = handle.join();
        }
    }

    fn dispatch_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => self.dispatch(&event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn dispatch(&self, event: &Event) {
        let handlers: Vec<Handler> = {
            let reg = self.registry.lock();
            reg.handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|e| e.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(kind = ?event.kind(), message = %message, "event handler panicked, continuing");
            }
        }
    }

    fn timer_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(self.timer_period);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            debug!("timer tick");
            self.put(Event::Timer);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration as StdDuration;

    #[test]
    fn handlers_invoked_in_registration_order() {
        let bus = Arc::new(EventBus::with_timer_period(StdDuration::from_secs(3600)));
        let order_log = Arc::new(Mutex::new(Vec::<u32>::new()));

        for i in 0..3 {
            let log = Arc::clone(&order_log);
            bus.register(EventKind::Timer, move |_| log.lock().push(i));
        }

        bus.start();
        bus.put(Event::Timer);
        std::thread::sleep(StdDuration::from_millis(100));
        bus.stop();

        assert_eq!(*order_log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn unregister_stops_future_dispatch() {
        let bus = Arc::new(EventBus::with_timer_period(StdDuration::from_secs(3600)));
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let id = bus.register(EventKind::Timer, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.start();
        bus.put(Event::Timer);
        std::thread::sleep(StdDuration::from_millis(100));
        bus.unregister(EventKind::Timer, id);
        bus.put(Event::Timer);
        std::thread::sleep(StdDuration::from_millis(100));
        bus.stop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = Arc::new(EventBus::with_timer_period(StdDuration::from_secs(3600)));
        let count = Arc::new(AtomicU32::new(0));

        bus.register(EventKind::Timer, |_| panic!("boom"));
        let c = Arc::clone(&count);
        bus.register(EventKind::Timer, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.start();
        bus.put(Event::Timer);
        std::thread::sleep(StdDuration::from_millis(100));
        bus.stop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_stop_are_idempotent() {
        let bus = Arc::new(EventBus::with_timer_period(StdDuration::from_secs(3600)));
        bus.start();
        bus.start();
        bus.stop();
        bus.stop();
    }

    #[test]
    fn timer_thread_publishes_ticks_independently() {
        let bus = Arc::new(EventBus::with_timer_period(StdDuration::from_millis(30)));
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        bus.register(EventKind::Timer, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.start();
        std::thread::sleep(StdDuration::from_millis(150));
        bus.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
