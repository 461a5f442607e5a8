use crossbeam::channel::{bounded, Receiver, Sender};

/// Create a one-shot start signal: the trigger stays with the orchestrator,
/// the gate is cloned into each worker thread.
pub fn start_gate() -> (StartTrigger, StartGate) {
    let (tx, rx) = bounded(0);
    (StartTrigger { _signal: tx }, StartGate { signal: rx })
}

/// Opens the gate when consumed. Dropping it without calling
/// [`StartTrigger::open`] opens the gate as well.
#[derive(Debug)]
pub struct StartTrigger {
    _signal: Sender<()>,
}

impl StartTrigger {
    /// Release every current and future waiter.
    pub fn open(self) {
        drop(self);
    }
}

/// Waiters block until the trigger is gone. The channel never carries a
/// value, so a closed channel is the open state and a late waiter passes
/// straight through.
#[derive(Debug, Clone)]
pub struct StartGate {
    signal: Receiver<()>,
}

impl StartGate {
    pub fn wait(&self) {
        let _ = self.signal.recv();
    }
}
