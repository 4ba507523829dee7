//! Streams are FIFO queues of device work.
//!
//! Each stream owns a worker thread draining boxed tasks in submission order. Host side calls
//! only enqueue, [`StreamWorker::synchronize`] is the only blocking point.

use super::GpuIndex;
use crate::error::{DeviceError, DeviceResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;

pub(crate) type Task = Box<dyn FnOnce() -> DeviceResult<()> + Send>;

/// Opaque handle on a stream created by the [`DeviceManager`](`super::DeviceManager`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub(crate) device: GpuIndex,
    pub(crate) id: u64,
}

impl StreamHandle {
    pub fn device(&self) -> GpuIndex {
        self.device
    }
}

#[derive(Default)]
struct StreamStatus {
    pending: usize,
    /// First failure since the last synchronization. Work enqueued after it is dropped.
    error: Option<DeviceError>,
}

#[derive(Default)]
struct StreamState {
    status: Mutex<StreamStatus>,
    idle: Condvar,
}

pub(crate) struct StreamWorker {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<StreamState>,
}

impl StreamWorker {
    pub(crate) fn spawn(handle: StreamHandle) -> DeviceResult<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let state = Arc::new(StreamState::default());
        let worker_state = state.clone();
        let worker = std::thread::Builder::new()
            .name(format!("gpu{}-stream{}", handle.device.0, handle.id))
            .spawn(move || {
                for task in receiver.iter() {
                    let poisoned = worker_state
                        .status
                        .lock()
                        .map(|status| status.error.is_some())
                        .unwrap_or(true);
                    let result = if poisoned {
                        Ok(())
                    } else {
                        panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
                            Err(DeviceError::DeviceApiFailure("kernel panicked".to_string()))
                        })
                    };

                    let Ok(mut status) = worker_state.status.lock() else {
                        return;
                    };
                    if let Err(err) = result {
                        tracing::debug!(?err, "Stream task failed, dropping the remaining work");
                        status.error.get_or_insert(err);
                    }
                    status.pending -= 1;
                    if status.pending == 0 {
                        worker_state.idle.notify_all();
                    }
                }
            })
            .map_err(|err| DeviceError::DeviceApiFailure(format!("stream creation: {err}")))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        })
    }

    pub(crate) fn enqueue(&self, task: Task) -> DeviceResult<()> {
        let sender = self.sender.lock().map_err(DeviceError::poisoned)?;
        let sender = sender
            .as_ref()
            .ok_or_else(|| DeviceError::DeviceApiFailure("stream was destroyed".to_string()))?;

        self.state
            .status
            .lock()
            .map_err(DeviceError::poisoned)?
            .pending += 1;
        sender.send(task).map_err(|_| {
            if let Ok(mut status) = self.state.status.lock() {
                status.pending -= 1;
            }
            DeviceError::DeviceApiFailure("stream worker is gone".to_string())
        })
    }

    /// Block until every task enqueued so far completed, reporting the first failure if any.
    pub(crate) fn synchronize(&self) -> DeviceResult<()> {
        let status = self.state.status.lock().map_err(DeviceError::poisoned)?;
        let mut status = self
            .state
            .idle
            .wait_while(status, |status| status.pending != 0)
            .map_err(DeviceError::poisoned)?;
        status.error.take().map_or(Ok(()), Err)
    }

    /// Wait for the queued work and join the worker thread.
    pub(crate) fn shutdown(&self) -> DeviceResult<()> {
        let result = self.synchronize();
        // Dropping the sender ends the worker loop
        self.sender.lock().map_err(DeviceError::poisoned)?.take();
        if let Some(worker) = self.worker.lock().map_err(DeviceError::poisoned)?.take() {
            worker
                .join()
                .map_err(|_| DeviceError::DeviceApiFailure("stream worker panicked".to_string()))?;
        }
        result
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(?err, "Stream dropped with unreported failure");
        }
    }
}
