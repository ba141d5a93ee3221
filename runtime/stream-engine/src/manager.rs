// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Owns every registered `StreamProcessor`, elects a sync master among them,
//! and drives start-up alignment, period-boundary notification and xrun
//! recovery for the client (spec.md §4.5).

use std::sync::{Condvar, Mutex};

use crate::processor::{SpDirection, SpError, SpState, StreamProcessor};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    XrunRecovery,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SyncMaster {
    Receive(usize),
    Transmit(usize),
}

struct Inner {
    receives: Vec<StreamProcessor>,
    transmits: Vec<StreamProcessor>,
    sync_master: Option<SyncMaster>,
    period_size: usize,
    state: ManagerState,
    period_ready: bool,
    xrun_pending: bool,
}

/// Coordinates every `StreamProcessor` belonging to one device: election,
/// start-up alignment, period scheduling and xrun recovery. The client
/// thread suspends in `wait_for_period` on a `Condvar` that a transport
/// worker posts via `notify_period_elapsed` once the sync master's ring has
/// a full period available (spec.md §5's "Suspension points").
pub struct StreamProcessorManager {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl StreamProcessorManager {
    pub fn new(period_size: usize) -> Self {
        StreamProcessorManager {
            inner: Mutex::new(Inner {
                receives: Vec::new(),
                transmits: Vec::new(),
                sync_master: None,
                period_size,
                state: ManagerState::Stopped,
                period_ready: false,
                xrun_pending: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn add_receive_sp(&self, sp: StreamProcessor) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.receives.push(sp);
        inner.receives.len() - 1
    }

    pub fn add_transmit_sp(&self, sp: StreamProcessor) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.transmits.push(sp);
        inner.transmits.len() - 1
    }

    pub fn state(&self) -> ManagerState {
        self.inner.lock().unwrap().state
    }

    /// Sync-master election (spec.md §4.5): prefer a receive SP explicitly
    /// flagged as tracking a physical clock master; failing that, the first
    /// receive SP; failing that, a flagged or else the first transmit SP.
    pub fn elect_sync_master(&self) {
        let mut inner = self.inner.lock().unwrap();
        let flagged_receive = inner.receives.iter().position(|sp| sp.is_sync_source());
        let flagged_transmit = inner.transmits.iter().position(|sp| sp.is_sync_source());
        inner.sync_master = flagged_receive
            .map(SyncMaster::Receive)
            .or_else(|| if !inner.receives.is_empty() { Some(SyncMaster::Receive(0)) } else { None })
            .or(flagged_transmit.map(SyncMaster::Transmit))
            .or_else(|| if !inner.transmits.is_empty() { Some(SyncMaster::Transmit(0)) } else { None });
    }

    pub fn is_sync_master(&self, direction: SpDirection, idx: usize) -> bool {
        let inner = self.inner.lock().unwrap();
        match (inner.sync_master, direction) {
            (Some(SyncMaster::Receive(m)), SpDirection::Receive) => m == idx,
            (Some(SyncMaster::Transmit(m)), SpDirection::Transmit) => m == idx,
            _ => false,
        }
    }

    /// Start-up (spec.md §4.5, step 1-2): every registered SP begins
    /// waiting for the same transport cycle.
    pub fn start(&self, start_cycle: u16) {
        let mut inner = self.inner.lock().unwrap();
        for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
            sp.start(start_cycle);
        }
        inner.state = ManagerState::Starting;
    }

    /// Called once the transport reports the requested start cycle has
    /// arrived: every SP begins dry-running.
    pub fn on_start_cycle_reached(&self) {
        let mut inner = self.inner.lock().unwrap();
        for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
            sp.begin_dry_running();
        }
    }

    /// Start-up alignment (spec.md §4.5, step 4): once the sync master has
    /// produced its first valid period, every slave's head timestamp is
    /// nudged to the master's, and every SP transitions to `Running`.
    pub fn align_and_run(&self) {
        let mut inner = self.inner.lock().unwrap();
        let master_head = match inner.sync_master {
            Some(SyncMaster::Receive(m)) => inner.receives[m].buffer().buffer_head_timestamp().0,
            Some(SyncMaster::Transmit(m)) => inner.transmits[m].buffer().buffer_head_timestamp().0,
            None => {
                for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
                    sp.begin_running();
                }
                inner.state = ManagerState::Running;
                return;
            }
        };

        for (idx, sp) in inner.receives.iter_mut().enumerate() {
            if Some(SyncMaster::Receive(idx)) != inner.sync_master {
                sp.buffer().set_head_timestamp(master_head);
            }
            sp.begin_running();
        }
        for (idx, sp) in inner.transmits.iter_mut().enumerate() {
            if Some(SyncMaster::Transmit(idx)) != inner.sync_master {
                sp.buffer().set_head_timestamp(master_head);
            }
            sp.begin_running();
        }
        inner.state = ManagerState::Running;
    }

    /// Posted by the sync master's packet-processing worker once its ring
    /// holds a full period. Wakes a client blocked in `wait_for_period`.
    pub fn notify_period_elapsed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.period_ready = true;
        self.cond.notify_all();
    }

    /// Any SP reporting an xrun while `Running` escalates here (spec.md
    /// §4.5): every SP is stopped (`sp.stop()` clears its buffer and drops
    /// it to `Stopped`, not to `WaitingToStart`). The *next* `wait_for_period`
    /// call reports the loss exactly once via `-1`; the owning runtime is
    /// expected to observe that and drive a fresh `start()`/alignment cycle
    /// through the transport, the same as a first-time start-up.
    pub fn report_xrun(&self, err: &SpError) {
        tracing::warn!(%err, "xrun, restarting stream group");
        let mut inner = self.inner.lock().unwrap();
        for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
            sp.stop();
        }
        inner.state = ManagerState::XrunRecovery;
        inner.xrun_pending = true;
        inner.period_ready = false;
        self.cond.notify_all();
    }

    /// Client contract (spec.md §6): blocks until a period is available,
    /// returning the period size in frames, or `-1` exactly once per xrun.
    pub fn wait_for_period(&self) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.xrun_pending {
                inner.xrun_pending = false;
                return -1;
            }
            if inner.period_ready {
                inner.period_ready = false;
                return inner.period_size as i64;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Moves one period between every SP's ring and its ports.
    pub fn transfer(&self) -> Result<(), SpError> {
        let mut inner = self.inner.lock().unwrap();
        let period_size = inner.period_size;
        for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
            if sp.state() == SpState::Running {
                sp.transfer_period(period_size)?;
            }
        }
        Ok(())
    }

    pub fn with_receive_port<R>(&self, sp_idx: usize, port_idx: usize, f: impl FnOnce(&mut crate::port::Port) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.receives.get_mut(sp_idx)?.port_mut(port_idx).map(f)
    }

    pub fn with_transmit_port<R>(&self, sp_idx: usize, port_idx: usize, f: impl FnOnce(&mut crate::port::Port) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.transmits.get_mut(sp_idx)?.port_mut(port_idx).map(f)
    }

    /// Runs `f` against a registered `StreamProcessor` by direction and
    /// index, for facade operations (`add_port`, port introspection) that
    /// need the whole processor rather than just one of its ports.
    pub fn with_sp_mut<R>(&self, direction: SpDirection, idx: usize, f: impl FnOnce(&mut StreamProcessor) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        let sp = match direction {
            SpDirection::Receive => inner.receives.get_mut(idx),
            SpDirection::Transmit => inner.transmits.get_mut(idx),
        }?;
        Some(f(sp))
    }

    /// How many SPs are registered for a direction.
    pub fn count_sps(&self, direction: SpDirection) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        Some(match direction {
            SpDirection::Receive => inner.receives.len(),
            SpDirection::Transmit => inner.transmits.len(),
        })
    }

    /// Total port count across every SP registered for a direction, for
    /// spec.md §6's flat `port_count(handle, direction)`.
    pub fn total_port_count(&self, direction: SpDirection) -> usize {
        let inner = self.inner.lock().unwrap();
        let sps = match direction {
            SpDirection::Receive => &inner.receives,
            SpDirection::Transmit => &inner.transmits,
        };
        sps.iter().map(|sp| sp.ports().len()).sum()
    }

    /// Maps a flat `(direction, idx)` port index — as spec.md §6's
    /// `port_name`/`port_type` address ports — across every SP registered
    /// for that direction, in registration order.
    pub fn with_flat_port<R>(&self, direction: SpDirection, idx: usize, f: impl FnOnce(&crate::port::Port) -> R) -> Option<R> {
        let inner = self.inner.lock().unwrap();
        let sps = match direction {
            SpDirection::Receive => &inner.receives,
            SpDirection::Transmit => &inner.transmits,
        };
        let mut remaining = idx;
        for sp in sps.iter() {
            let n = sp.ports().len();
            if remaining < n {
                return sp.port(remaining).map(f);
            }
            remaining -= n;
        }
        None
    }

    /// Stops every registered SP and resets the manager to `Stopped`,
    /// without the xrun-recovery notice.
    pub fn stop_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for sp in inner.receives.iter_mut().chain(inner.transmits.iter_mut()) {
            sp.stop();
        }
        inner.state = ManagerState::Stopped;
        inner.period_ready = false;
        inner.xrun_pending = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::processor::BlockingMode;
    use amdtp_timestamped_buffer::TimestampedBufferConfig;

    fn make_sp(direction: SpDirection) -> StreamProcessor {
        let config = TimestampedBufferConfig::new(4, 2, 64, 512.0, 8, 128.0 * 24_576_000.0).unwrap();
        StreamProcessor::new(config, 2, direction, BlockingMode::Blocking)
    }

    #[test]
    fn elects_first_receive_sp_absent_a_flagged_one() {
        let mgr = StreamProcessorManager::new(8);
        mgr.add_receive_sp(make_sp(SpDirection::Receive));
        mgr.add_transmit_sp(make_sp(SpDirection::Transmit));
        mgr.elect_sync_master();
        assert!(mgr.is_sync_master(SpDirection::Receive, 0));
        assert!(!mgr.is_sync_master(SpDirection::Transmit, 0));
    }

    #[test]
    fn elects_flagged_transmit_sp_absent_any_receive_sp() {
        let mgr = StreamProcessorManager::new(8);
        let mut tx = make_sp(SpDirection::Transmit);
        tx.set_sync_source(true);
        mgr.add_transmit_sp(tx);
        mgr.elect_sync_master();
        assert!(mgr.is_sync_master(SpDirection::Transmit, 0));
    }

    #[test]
    fn wait_for_period_reports_xrun_exactly_once() {
        let mgr = StreamProcessorManager::new(8);
        mgr.add_receive_sp(make_sp(SpDirection::Receive));
        mgr.start(0);
        mgr.on_start_cycle_reached();
        mgr.align_and_run();
        assert_eq!(mgr.state(), ManagerState::Running);

        mgr.report_xrun(&SpError::Xrun("ring overrun".into()));
        assert_eq!(mgr.wait_for_period(), -1);

        mgr.notify_period_elapsed();
        assert_eq!(mgr.wait_for_period(), 8);
    }
}
