// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! End-to-end coverage of `StreamProcessorManager`'s start-up alignment and
//! xrun escalation against a small multi-SP group.

use amdtp_stream_engine::{
    processor::{BlockingMode, SpDirection, SpError, StreamProcessor},
    ManagerState, StreamProcessorManager,
};
use amdtp_timestamped_buffer::TimestampedBufferConfig;
use ieee1394_cycle_timer::Timestamp;

const WRAP_AT: f64 = 128.0 * 24_576_000.0;

fn make_sp(direction: SpDirection) -> StreamProcessor {
    let config = TimestampedBufferConfig::new(4, 2, 64, 512.0, 8, WRAP_AT).unwrap();
    StreamProcessor::new(config, 2, direction, BlockingMode::Blocking)
}

// Property 8: after start-up alignment, every slave's head timestamp sits
// within one tick of the elected sync master's.
#[test]
fn slave_head_timestamp_aligns_to_master_within_one_tick() {
    let manager = StreamProcessorManager::new(8);
    let master_idx = manager.add_receive_sp(make_sp(SpDirection::Receive));
    let slave_idx = manager.add_receive_sp(make_sp(SpDirection::Receive));

    manager.with_sp_mut(SpDirection::Receive, master_idx, |sp| sp.set_sync_source(true));

    manager.with_sp_mut(SpDirection::Receive, master_idx, |sp| {
        sp.buffer().write_frames(8, &[0u8; 8 * 2 * 4], Timestamp::from_ticks(9000)).unwrap();
    });
    manager.with_sp_mut(SpDirection::Receive, slave_idx, |sp| {
        sp.buffer().write_frames(8, &[0u8; 8 * 2 * 4], Timestamp::from_ticks(100)).unwrap();
    });

    manager.elect_sync_master();
    manager.start(0);
    manager.on_start_cycle_reached();
    manager.align_and_run();

    assert_eq!(manager.state(), ManagerState::Running);

    let master_head = manager.with_sp_mut(SpDirection::Receive, master_idx, |sp| sp.buffer().buffer_head_timestamp().0).unwrap();
    let slave_head = manager.with_sp_mut(SpDirection::Receive, slave_idx, |sp| sp.buffer().buffer_head_timestamp().0).unwrap();
    assert!(master_head.diff(&slave_head).abs() <= 1);
}

// S6: an xrun while running stops and clears every SP; the client's next
// `wait_for_period` reports the loss exactly once.
#[test]
fn xrun_stops_every_sp_and_reports_once() {
    let manager = StreamProcessorManager::new(8);
    let rx = manager.add_receive_sp(make_sp(SpDirection::Receive));
    let tx = manager.add_transmit_sp(make_sp(SpDirection::Transmit));

    manager.elect_sync_master();
    manager.start(0);
    manager.on_start_cycle_reached();
    manager.align_and_run();
    assert_eq!(manager.state(), ManagerState::Running);

    manager.report_xrun(&SpError::Xrun("receive ring overrun".into()));

    let rx_state = manager.with_sp_mut(SpDirection::Receive, rx, |sp| sp.state()).unwrap();
    let tx_state = manager.with_sp_mut(SpDirection::Transmit, tx, |sp| sp.state()).unwrap();
    assert_eq!(rx_state, amdtp_stream_engine::SpState::Stopped);
    assert_eq!(tx_state, amdtp_stream_engine::SpState::Stopped);

    assert_eq!(manager.wait_for_period(), -1);

    manager.notify_period_elapsed();
    assert_eq!(manager.wait_for_period(), 8);
}
