use std::sync::{Arc, Mutex};

/// Events delivered to a plugin's event procedure.
///
/// Over a session's lifetime the order is: `Initialized`, `Connected`, any
/// number of `DataReceived`/`WriteComplete`/`WriteCancelled`, then
/// `Disconnected` and finally `Terminated`. `Attached`/`Detached` pairs may
/// be interleaved when the session is handed between clients.
#[derive(Debug)]
pub enum ChannelEvent {
    Initialized,
    Connected { hostname: String },
    DataReceived { data: Vec<u8> },
    WriteComplete { user_data: usize },
    WriteCancelled { user_data: usize },
    Attached,
    Detached,
    Disconnected,
    Terminated,
}

/// The callback a plugin registers to observe channel events.
///
/// Invoked on the reader or worker thread; implementations must not block
/// indefinitely and should move heavy work to their own thread.
pub type ChannelEventProc = Box<dyn FnMut(ChannelEvent) + Send>;

/// An event procedure shared between the reader and worker threads.
#[derive(Clone)]
pub(crate) struct SharedEventProc(Arc<Mutex<ChannelEventProc>>);

impl SharedEventProc {
    pub(crate) fn new(proc_: ChannelEventProc) -> Self {
        Self(Arc::new(Mutex::new(proc_)))
    }

    pub(crate) fn post(&self, event: ChannelEvent) {
        let mut guard = self.0.lock().expect("event proc poisoned");
        (*guard)(event);
    }
}

impl std::fmt::Debug for SharedEventProc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedEventProc")
    }
}
