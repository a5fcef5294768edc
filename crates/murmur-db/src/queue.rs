//! Serialized task queue.
//!
//! One named worker thread owns a context `C` (the [`crate::worker::Worker`]
//! in production) and runs submitted units strictly in FIFO order. Callers
//! pick a submission mode:
//!
//! - [`TaskQueue::post`]: fire-and-forget
//! - [`TaskQueue::post_with`]: the result goes to a callback on the delivery thread
//! - [`TaskQueue::request`]: returns a [`Ticket`] to `.await`
//! - [`TaskQueue::call_sync`]: blocks the caller until the unit has run
//!
//! A panicking unit is caught and logged; the worker keeps draining.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::oneshot;

use crate::{Result, StorageError};

type Unit<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;
type Delivery = Box<dyn FnOnce() + Send + 'static>;

/// Commands accepted by the worker thread.
enum Command<C> {
    Run(Unit<C>),
    Shutdown,
}

/// Commands accepted by the delivery thread.
enum DeliveryCommand {
    Deliver(Delivery),
    Shutdown,
}

/// Whether the worker has queued units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining,
}

const IDLE: u8 = 0;
const DRAINING: u8 = 1;

pub struct TaskQueue<C> {
    name: String,
    sender: Sender<Command<C>>,
    delivery: Sender<DeliveryCommand>,
    worker_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    delivery_thread: Mutex<Option<JoinHandle<()>>>,
    state: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
}

impl<C: 'static> TaskQueue<C> {
    /// Spawn the worker thread and build its context on it.
    ///
    /// Blocks until `init` has finished and returns its error if it failed.
    pub fn spawn<F>(name: &str, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Command<C>>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let state = Arc::new(AtomicU8::new(IDLE));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = {
            let state = Arc::clone(&state);
            let pending = Arc::clone(&pending);
            let thread_name = name.to_string();
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let mut context = match init() {
                        Ok(context) => {
                            let _ = ready_tx.send(Ok(()));
                            context
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    worker_loop(&thread_name, &mut context, &receiver, &state, &pending);
                })?
        };

        ready_rx.recv().map_err(|_| StorageError::QueueClosed)??;

        let (delivery, delivery_rx) = mpsc::channel::<DeliveryCommand>();
        let delivery_thread = thread::Builder::new()
            .name(format!("{name}-delivery"))
            .spawn(move || delivery_loop(&delivery_rx))?;

        tracing::debug!(queue = name, "Task queue started");
        Ok(TaskQueue {
            name: name.to_string(),
            sender,
            delivery,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            delivery_thread: Mutex::new(Some(delivery_thread)),
            state,
            pending,
        })
    }

    /// Append a unit; returns immediately.
    pub fn post<F>(&self, unit: F) -> Result<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.state.store(DRAINING, Ordering::SeqCst);
        self.sender.send(Command::Run(Box::new(unit))).map_err(|_| {
            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.state.store(IDLE, Ordering::SeqCst);
            }
            StorageError::QueueClosed
        })
    }

    /// Run `unit` and hand its result to `callback` on the delivery thread.
    pub fn post_with<T, F, K>(&self, unit: F, callback: K) -> Result<()>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
        K: FnOnce(Result<T>) + Send + 'static,
    {
        let delivery = self.delivery.clone();
        self.post(move |context| {
            let result = unit(context);
            let _ = delivery.send(DeliveryCommand::Deliver(Box::new(move || callback(result))));
        })
    }

    /// Run `unit` and return a ticket resolving to its result.
    pub fn request<T, F>(&self, unit: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        // A closed queue drops the unit and with it `tx`; the ticket then
        // resolves to `QueueClosed`.
        let _ = self.post(move |context| {
            let _ = tx.send(unit(context));
        });
        Ticket {
            rx,
            worker_id: self.worker_id,
        }
    }

    /// Run `unit` and block the calling thread until it has finished.
    ///
    /// Fails with [`StorageError::Reentrant`] when called from the worker
    /// thread itself.
    pub fn call_sync<T, F>(&self, unit: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(StorageError::Reentrant);
        }
        let (tx, rx) = mpsc::channel();
        self.post(move |context| {
            let _ = tx.send(unit(context));
        })?;
        rx.recv().map_err(|_| StorageError::QueueClosed)?
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    pub fn state(&self) -> QueueState {
        match self.state.load(Ordering::SeqCst) {
            DRAINING => QueueState::Draining,
            _ => QueueState::Idle,
        }
    }

    /// Units submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Drain the queued units, then stop both threads. Idempotent.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = worker {
            let _ = self.sender.send(Command::Shutdown);
            if handle.join().is_err() {
                tracing::error!(queue = %self.name, "Worker thread panicked");
            }
        }
        let delivery = self.delivery_thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = delivery {
            let _ = self.delivery.send(DeliveryCommand::Shutdown);
            let _ = handle.join();
            tracing::debug!(queue = %self.name, "Task queue stopped");
        }
    }
}

impl<C> Drop for TaskQueue<C> {
    fn drop(&mut self) {
        // Worker and delivery threads exit once their channels report the
        // shutdown; join only when not on the worker itself.
        let on_worker = thread::current().id() == self.worker_id;
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(handle) = slot.take() {
                let _ = self.sender.send(Command::Shutdown);
                if !on_worker {
                    let _ = handle.join();
                }
            }
        }
        if let Ok(mut slot) = self.delivery_thread.lock() {
            if let Some(handle) = slot.take() {
                let _ = self.delivery.send(DeliveryCommand::Shutdown);
                if !on_worker {
                    let _ = handle.join();
                }
            }
        }
    }
}

fn worker_loop<C>(
    name: &str,
    context: &mut C,
    receiver: &Receiver<Command<C>>,
    state: &AtomicU8,
    pending: &AtomicUsize,
) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(unit) => {
                if catch_unwind(AssertUnwindSafe(|| unit(context))).is_err() {
                    tracing::error!(queue = name, "Storage unit panicked");
                }
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    state.store(IDLE, Ordering::SeqCst);
                }
            }
            Command::Shutdown => break,
        }
    }
}

fn delivery_loop(receiver: &Receiver<DeliveryCommand>) {
    while let Ok(command) = receiver.recv() {
        match command {
            DeliveryCommand::Deliver(callback) => {
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    tracing::error!("Result callback panicked");
                }
            }
            DeliveryCommand::Shutdown => break,
        }
    }
}

/// Pending result of a [`TaskQueue::request`].
///
/// `.await` it from async code, or call [`Ticket::wait`] from a plain thread.
#[must_use = "a ticket does nothing unless awaited or waited on"]
pub struct Ticket<T> {
    rx: oneshot::Receiver<Result<T>>,
    worker_id: ThreadId,
}

impl<T> Ticket<T> {
    /// Block until the unit has run. Not for use inside an async runtime.
    pub fn wait(self) -> Result<T> {
        if thread::current().id() == self.worker_id {
            return Err(StorageError::Reentrant);
        }
        self.rx.blocking_recv().map_err(|_| StorageError::QueueClosed)?
    }
}

impl<T> Future for Ticket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| StorageError::QueueClosed)?)
    }
}
