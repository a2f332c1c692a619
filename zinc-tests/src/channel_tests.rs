//! Throttled zone command channels: admission cases, deferral, early fire
//! and the epoch timers.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use zinc_core::{ChannelConfig, ChannelKind, Request, RequestId};
use zinc_sched::{AdmitCase, ChannelPoll, EpochTimers, InsertOutcome, PendingCommand, ThrottledChannel};

use crate::scenarios::{configs, seeds, Harness};

#[test]
fn test_finish_admitted_under_low_pressure() {
    let mut h = Harness::conventional(configs::channels(3, 3));
    h.insert(Request::write(1, 0, 16), false).unwrap();
    assert_eq!(h.dispatch().map(|r| r.id.get()), Some(1));
    assert_eq!(
        h.scheduler().stats().channel(ChannelKind::Finish).in_flight_units,
        1
    );

    for id in 10..15 {
        assert_eq!(
            h.insert(Request::finish(id, id * 4096), false).unwrap(),
            InsertOutcome::Throttled(ChannelKind::Finish)
        );
    }
    h.scheduler().fire_epoch(ChannelKind::Finish);

    let rq = h.dispatch().unwrap();
    assert_eq!(rq.id, RequestId::new(10));
    let finish = *h.scheduler().stats().channel(ChannelKind::Finish);
    assert_eq!(finish.stats.low_pressure, 1);
    assert_eq!(finish.pending, 4);
    assert!(h.check().is_empty());
}

#[test]
fn test_reset_forced_after_three_holds() {
    let mut h = Harness::conventional(configs::channels(3, 3));
    // 128 units in flight, well below the 2000-unit token budget.
    h.insert(Request::write(1, 0, 2048), false).unwrap();
    h.dispatch().unwrap();
    h.insert(Request::reset(2, 8192), false).unwrap();
    assert_eq!(h.dispatch(), None);

    for round in 1..=3 {
        assert!(h.advance(64_000).contains(&ChannelKind::Reset));
        assert_eq!(h.dispatch(), None);
        assert_eq!(
            h.scheduler().pending_commands(ChannelKind::Reset),
            vec![(RequestId::new(2), round)]
        );
    }

    h.advance(64_000);
    assert_eq!(h.dispatch().map(|r| r.id.get()), Some(2));
    let reset = h.scheduler().stats().channel(ChannelKind::Reset).stats;
    assert_eq!((reset.holds, reset.starved, reset.evaluations), (3, 1, 4));
    assert!(h.check().is_empty());
}

#[test]
fn test_tokens_spent_admits_command() {
    let channel = ChannelConfig::default().with_command_tokens(100);
    let config = configs::channels(3, 3).with_channel(ChannelKind::Reset, channel);
    let mut h = Harness::conventional(config);
    h.insert(Request::write(1, 0, 2048), false).unwrap();
    h.dispatch().unwrap();
    h.insert(Request::reset(2, 8192), false).unwrap();

    h.scheduler().fire_epoch(ChannelKind::Reset);
    assert_eq!(h.dispatch().map(|r| r.id.get()), Some(2));
    let stats = h.scheduler().stats();
    assert_eq!(stats.channel(ChannelKind::Reset).stats.tokens_spent, 1);
    assert_eq!(stats.channel(ChannelKind::Reset).dispatched_units, 0);
    // The other channel's token count is independent.
    assert_eq!(stats.channel(ChannelKind::Finish).dispatched_units, 128);
}

#[test]
fn test_reset_served_before_finish() {
    let mut h = Harness::conventional(configs::channels(3, 3));
    h.insert(Request::finish(1, 0), false).unwrap();
    h.insert(Request::reset(2, 4096), false).unwrap();
    h.insert(Request::read(3, 64, 8), false).unwrap();

    assert_eq!(h.dispatch_all(), vec![2, 1, 3]);
}

#[test]
fn test_write_completion_fires_held_channel() {
    let mut h = Harness::conventional(configs::channels(3, 3));
    h.insert(Request::write(1, 0, 2048), false).unwrap();
    h.dispatch().unwrap();
    h.insert(Request::finish(2, 8192), false).unwrap();
    assert_eq!(h.dispatch(), None);

    h.complete(RequestId::new(1));
    let rq = h.dispatch().unwrap();
    assert_eq!(rq.id.get(), 2);
    assert_eq!(
        h.scheduler().stats().channel(ChannelKind::Finish).stats.low_pressure,
        1
    );
}

#[test]
fn test_channel_commands_drain_in_arrival_order() {
    let mut h = Harness::conventional(configs::channels(3, 3));
    h.insert_all((1..=6).map(|i| Request::reset(i, (7 - i) * 4096)))
        .unwrap();
    let order = h.run_to_idle(100);
    assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
    assert!(h.detach().is_ok());
}

/// Expected outcome of one evaluation, computed from the inputs alone.
fn expected_poll(
    pending: &[PendingCommand],
    config: &ChannelConfig,
    in_flight: u64,
    dispatched: u64,
) -> ChannelPoll {
    let Some(head) = pending.first() else {
        return ChannelPoll::Empty;
    };
    let case = if in_flight < config.minimum_concurrency {
        AdmitCase::LowPressure
    } else if dispatched > config.command_tokens {
        AdmitCase::TokensSpent
    } else if head.deferrals >= config.maximum_epoch_holds {
        AdmitCase::Starved
    } else {
        return ChannelPoll::Hold {
            pending: pending.len(),
        };
    };
    ChannelPoll::Admit { id: head.id, case }
}

#[test]
fn test_admission_cases_exclusive_and_holds_defer_everyone() {
    for &seed in seeds::REGRESSION_SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let config = ChannelConfig::new(1_000, 40, 8, 3);
        let mut channel = ThrottledChannel::new(ChannelKind::Reset, config, 0);
        let mut next_id = 1;

        for step in 0..2_000 {
            match rng.gen_range(0..4) {
                0 => {
                    channel.push(RequestId::new(next_id));
                    next_id += 1;
                }
                1 => channel.signal().add_write(rng.gen_range(1..16)),
                2 => {
                    let units = rng.gen_range(0..=channel.signal().in_flight_units());
                    channel.signal().release_write(units);
                }
                _ => {
                    let before: Vec<PendingCommand> = channel.pending().copied().collect();
                    let in_flight = channel.signal().in_flight_units();
                    let dispatched = channel.signal().dispatched_units();
                    let expected = expected_poll(&before, &config, in_flight, dispatched);

                    channel.signal().fire();
                    let outcome = channel.poll();
                    assert_eq!(outcome, expected, "seed {seed} step {step}");

                    let after: Vec<PendingCommand> = channel.pending().copied().collect();
                    match outcome {
                        ChannelPoll::Admit { .. } => {
                            assert_eq!(after, before[1..], "seed {seed} step {step}");
                            assert_eq!(channel.signal().dispatched_units(), 0);
                        }
                        ChannelPoll::Hold { .. } => {
                            let deferred: Vec<PendingCommand> = before
                                .iter()
                                .map(|p| PendingCommand {
                                    id: p.id,
                                    deferrals: p.deferrals + 1,
                                })
                                .collect();
                            assert_eq!(after, deferred, "seed {seed} step {step}");
                            assert!(after.iter().all(|p| p.deferrals <= config.maximum_epoch_holds));
                        }
                        ChannelPoll::Empty | ChannelPoll::NotFired => assert!(before.is_empty()),
                    }
                }
            }
        }

        let stats = channel.stats();
        assert!(stats.admitted() + stats.holds <= stats.evaluations);
    }
}

#[test]
fn test_unfired_channel_is_not_evaluated() {
    let mut channel = ThrottledChannel::new(ChannelKind::Finish, ChannelConfig::default(), 0);
    channel.push(RequestId::new(1));
    assert_eq!(channel.poll(), ChannelPoll::NotFired);
    assert_eq!(channel.stats().evaluations, 0);
    assert_eq!(channel.pending().next().map(|p| p.deferrals), Some(0));
}

#[tokio::test]
async fn test_epoch_timers_drive_admission() {
    let channel = ChannelConfig::default()
        .with_epoch_interval_us(1_000)
        .with_command_tokens(1);
    let config = configs::channels(3, 3).with_channel(ChannelKind::Reset, channel);
    let mut h = Harness::conventional(config);
    h.insert(Request::write(1, 0, 2048), false).unwrap();
    h.dispatch().unwrap();
    h.insert(Request::reset(2, 8192), false).unwrap();
    assert_eq!(h.dispatch(), None);

    let timers = EpochTimers::spawn(h.scheduler());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.dispatch().map(|r| r.id.get()), Some(2));
    assert_eq!(
        h.scheduler().stats().channel(ChannelKind::Reset).stats.tokens_spent,
        1
    );
    timers.shutdown().await;
}
