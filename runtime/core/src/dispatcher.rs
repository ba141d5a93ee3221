// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

/// Runs interval callbacks on a dedicated thread until stopped.
///
/// This replaces a glib `MainContext`/`MainLoop` pair: the engine has no
/// GObject surface of its own, so the event sources it needs (period
/// timers, a shutdown flag) are modelled directly on `std::thread` and
/// `mpsc` instead of attaching `Source`s to a context.
pub struct Dispatcher {
    name: String,
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!(dispatcher = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Dispatcher {
    pub fn new(name: String) -> Self {
        Dispatcher {
            name,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Spawns `cb` on its own thread; `cb` is called once per wakeup and
    /// should check the passed stop flag (or return `false`) to end early.
    pub fn attach_interval_handler<F>(&mut self, interval: Duration, mut cb: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = self.stop.clone();
        let handle = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if !cb() {
                    break;
                }
            }
        });
        self.handles.push(handle);
    }

    /// Spawns a worker that repeatedly calls `cb` as fast as it returns,
    /// checking the stop flag between iterations. Intended for a transport
    /// packet-pump loop rather than a fixed-interval timer.
    pub fn attach_worker<F>(&mut self, mut cb: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = self.stop.clone();
        let handle = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if !cb() {
                    break;
                }
            }
        });
        self.handles.push(handle);
    }
}

/// Installs a process-wide `SIGINT`/`SIGTERM` handler that sends `()` on
/// `tx` exactly once. `ctrlc` installs at the process level rather than on
/// a per-context source, so unlike the glib `unix_signal_source_new` this
/// is a free function, not a `Dispatcher` method; call it once per process.
pub fn install_shutdown_signal(tx: mpsc::Sender<()>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn interval_handler_runs_and_stops() {
        let mut dispatcher = Dispatcher::new("test".into());
        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = count.clone();
        dispatcher.attach_interval_handler(Duration::from_millis(1), move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
            true
        });
        thread::sleep(Duration::from_millis(20));
        dispatcher.stop();
        drop(dispatcher);
        assert!(count.load(Ordering::SeqCst) > 0);
    }
}
