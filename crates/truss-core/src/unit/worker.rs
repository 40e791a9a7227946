//! Background thread for multithreaded units.
//!
//! The worker and its unit share a single-slot channel. `step()` puts one
//! token in the slot and returns; the worker takes it, runs one frame and
//! goes back to waiting. Closing the channel is the termination signal.
//!
//! The thread only keeps a weak handle between frames, so dropping the last
//! [`Unit`] closes the channel and the thread exits on its own.

use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::{Unit, UnitId, UnitState, WeakUnit};

/// Request to run one frame.
pub(super) struct StepToken;

pub(super) struct Worker {
    tx: Sender<StepToken>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker thread for `unit`.
    pub(super) fn spawn(unit: &Unit) -> std::io::Result<Self> {
        let (tx, rx) = bounded(1);
        let id = unit.id();
        let weak = unit.downgrade();
        let handle = thread::Builder::new()
            .name(format!("truss-unit-{}", id))
            .spawn(move || run(id, weak, rx))?;
        Ok(Self { tx, handle })
    }

    /// Hand one step request to the worker without blocking.
    pub(super) fn request_step(&self) -> Result<(), TrySendError<StepToken>> {
        self.tx.try_send(StepToken)
    }

    pub(super) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Close the channel and wait for the thread to exit.
    ///
    /// When called from the worker thread itself the thread is detached
    /// instead; it exits as soon as the current step returns.
    pub(super) fn shutdown(self) {
        let Worker { tx, handle } = self;
        drop(tx);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Unit worker thread panicked");
        }
    }
}

fn run(id: UnitId, unit: WeakUnit, rx: Receiver<StepToken>) {
    log::debug!("Unit {} worker started", id);
    while let Ok(StepToken) = rx.recv() {
        let Some(unit) = unit.upgrade() else {
            break;
        };
        if unit.state() != UnitState::Running {
            break;
        }
        unit.run_step();
    }
    log::debug!("Unit {} worker exited", id);
}
