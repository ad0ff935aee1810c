use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::warn;

use crate::call::AsyncTask;
use crate::error::Error;
use crate::util::lock_unpoisoned;

const DEFAULT_MAX_CALLS: usize = 64;
const DEFAULT_MAX_CALLS_PER_HOST: usize = 5;

/// Admission control and accounting for call execution.
///
/// Synchronous calls are only counted; asynchronous calls are run on
/// worker threads, bounded by a total in-flight limit and a per-host
/// limit. Tasks over the limits queue in FIFO order and are promoted as
/// running calls finish. The core reports exactly one `finished` per
/// started call regardless of outcome; the dispatcher reconciles its
/// books on that signal.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    max_calls: usize,
    max_calls_per_host: usize,
    state: Mutex<DispatchState>,
}

#[derive(Default)]
struct DispatchState {
    queued: VecDeque<AsyncTask>,
    running_async: usize,
    running_sync: usize,
    per_host: HashMap<String, usize>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CALLS, DEFAULT_MAX_CALLS_PER_HOST)
    }

    pub fn with_limits(max_calls: usize, max_calls_per_host: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                max_calls: max_calls.max(1),
                max_calls_per_host: max_calls_per_host.max(1),
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }

    /// Calls currently executing, synchronous and asynchronous.
    pub fn running_calls_count(&self) -> usize {
        let state = lock_unpoisoned(&self.inner.state);
        state.running_async + state.running_sync
    }

    /// Asynchronous calls admitted but not yet running.
    pub fn queued_calls_count(&self) -> usize {
        lock_unpoisoned(&self.inner.state).queued.len()
    }

    pub(crate) fn executed(&self) {
        let mut state = lock_unpoisoned(&self.inner.state);
        state.running_sync += 1;
    }

    pub(crate) fn finished_sync(&self) {
        let mut state = lock_unpoisoned(&self.inner.state);
        state.running_sync = state.running_sync.saturating_sub(1);
    }

    pub(crate) fn enqueue(&self, task: AsyncTask) {
        let admitted = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let host_count = state.per_host.get(task.host()).copied().unwrap_or(0);
            if state.running_async < self.inner.max_calls
                && host_count < self.inner.max_calls_per_host
            {
                state.running_async += 1;
                *state.per_host.entry(task.host().to_owned()).or_insert(0) += 1;
                Some(task)
            } else {
                state.queued.push_back(task);
                None
            }
        };
        if let Some(task) = admitted {
            self.spawn_worker(task);
        }
    }

    pub(crate) fn finished_async(&self, host: &str) {
        let promoted = {
            let mut state = lock_unpoisoned(&self.inner.state);
            state.running_async = state.running_async.saturating_sub(1);
            if let Some(count) = state.per_host.get_mut(host) {
                *count -= 1;
                if *count == 0 {
                    state.per_host.remove(host);
                }
            }
            self.collect_promotable(&mut state)
        };
        for task in promoted {
            self.spawn_worker(task);
        }
    }

    fn collect_promotable(&self, state: &mut DispatchState) -> Vec<AsyncTask> {
        let mut promoted = Vec::new();
        let mut index = 0;
        while index < state.queued.len() {
            if state.running_async >= self.inner.max_calls {
                break;
            }
            let host_count = state
                .per_host
                .get(state.queued[index].host())
                .copied()
                .unwrap_or(0);
            if host_count < self.inner.max_calls_per_host {
                if let Some(task) = state.queued.remove(index) {
                    *state.per_host.entry(task.host().to_owned()).or_insert(0) += 1;
                    state.running_async += 1;
                    promoted.push(task);
                }
            } else {
                index += 1;
            }
        }
        promoted
    }

    fn spawn_worker(&self, task: AsyncTask) {
        let host = task.host().to_owned();
        // The task sits in a shared slot so a failed spawn can recover
        // it and still deliver exactly one failure to the callback.
        let slot = Arc::new(Mutex::new(Some(task)));
        let worker_slot = Arc::clone(&slot);
        let dispatcher = self.clone();
        let worker_host = host.clone();

        let spawned = thread::Builder::new()
            .name(format!("callx {host}"))
            .spawn(move || {
                let _finished = FinishedGuard {
                    dispatcher,
                    host: worker_host,
                };
                if let Some(task) = lock_unpoisoned(&worker_slot).take() {
                    task.run();
                }
            });

        if let Err(source) = spawned {
            warn!(host = %host, error = %source, "failed to spawn dispatcher worker");
            let stranded = lock_unpoisoned(&slot).take();
            self.finished_async(&host);
            if let Some(task) = stranded {
                task.fail(Error::WorkerSpawn {
                    message: source.to_string(),
                });
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconciles `finished` bookkeeping on every worker exit path,
/// including panics in user callbacks.
struct FinishedGuard {
    dispatcher: Dispatcher,
    host: String,
}

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        self.dispatcher.finished_async(&self.host);
    }
}
