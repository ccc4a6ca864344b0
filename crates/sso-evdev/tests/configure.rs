use proptest::prelude::*;
use sso_evdev::regs::{ggrp_base, gws_base, GRPMSK_CHG_KEEP_OTHERS, SSOW_LF_GWS_GRPMSK_CHG};
use sso_evdev::{
    ConfigState, EventDevConfig, RegisterIo, SsoConfig, SsoDevice, SsoError, ValidationError,
    XaqSizing,
};
use sso_mbox::{LfClass, MboxError, MsgId, Request};
use sso_sim::agent::LfState;
use sso_sim::{SimBoard, SIM_BAR2, SIM_NPA_PF_FUNC};

fn configured(board: &SimBoard, ports: u16, queues: u16) -> SsoDevice {
    let mut dev = board.probe(SsoConfig::default()).unwrap();
    dev.configure(&EventDevConfig::new(ports, queues)).unwrap();
    dev
}

fn assert_nothing_held(board: &SimBoard, dev: &SsoDevice) {
    assert_eq!(dev.nb_ports(), 0);
    assert_eq!(dev.nb_queues(), 0);
    assert!(!dev.is_configured());
    assert_eq!(dev.state(), ConfigState::Unconfigured);
    for class in [LfClass::Ggrp, LfClass::Gws] {
        let lf = board.agent.lf(class);
        assert_eq!((lf.attached, lf.allocated), (0, 0), "{class} still held");
    }
    assert!(board.pool.live_pools().is_empty());
    assert_eq!(board.pool.live_regions(), 0);
    assert!(board.irq.registered().is_empty());
}

#[test]
fn probe_clamps_ceilings_and_halves_ports_for_dual_workslots() {
    let board = SimBoard::new(300, 100);
    let dual = board.probe(SsoConfig::default()).unwrap();
    assert_eq!((dual.max_ports(), dual.max_queues()), (26, 256));

    let single = board
        .probe(SsoConfig {
            single_ws: true,
            ..SsoConfig::default()
        })
        .unwrap();
    assert_eq!((single.max_ports(), single.max_queues()), (52, 256));

    let info = single.info();
    assert_eq!(info.max_event_queue_priority_levels, 8);
    assert_eq!(info.max_event_port_dequeue_depth, 1);
    assert_eq!(info.max_event_queue_flows, 1 << 20);
    assert_eq!(info.max_num_events, -1);
}

#[test]
fn probe_fails_without_provisioned_lfs() {
    let err = SimBoard::new(0, 8).probe(SsoConfig::default()).err().unwrap();
    assert!(matches!(err, SsoError::NotProvisioned { queues: 0, .. }));

    // One workslot cannot back a dual port.
    let err = SimBoard::new(4, 1).probe(SsoConfig::default()).err().unwrap();
    assert!(matches!(err, SsoError::NotProvisioned { ports: 0, .. }));
}

#[test]
fn configure_provisions_everything_and_clears_stale_links() {
    let board = SimBoard::new(16, 16);
    // Links left behind by a previous user of the same LFs.
    for ws in 0..4u16 {
        for grp in 0..4u64 {
            board.hw.write64(
                gws_base(SIM_BAR2, ws) + SSOW_LF_GWS_GRPMSK_CHG,
                grp | GRPMSK_CHG_KEEP_OTHERS | 1 << 14,
            );
        }
    }
    assert_eq!(board.hw.all_links().len(), 16);

    let dev = configured(&board, 2, 4);

    assert!(board.hw.all_links().is_empty());
    assert!(dev.is_configured());
    assert_eq!(dev.state(), ConfigState::Configured);
    assert_eq!((dev.nb_ports(), dev.nb_queues()), (2, 4));
    assert_eq!(
        board.agent.lf(LfClass::Gws),
        LfState {
            provisioned: 16,
            attached: 4,
            allocated: 4
        }
    );
    assert_eq!(board.agent.lf(LfClass::Ggrp).allocated, 4);

    let pool = dev.xaq_pool().unwrap();
    let setconfig = board.agent.state().setconfig.unwrap();
    assert_eq!(setconfig.npa_aura_id, pool.aura_id);
    assert_eq!(setconfig.npa_pf_func, SIM_NPA_PF_FUNC);
    assert_eq!(setconfig.hwgrps, 4);

    assert_eq!(dev.msix_offsets().gws, vec![0x40, 0x41, 0x42, 0x43]);
    assert_eq!(dev.msix_offsets().ggrp, vec![0x100, 0x101, 0x102, 0x103]);
    let vectors = board.irq.registered();
    assert_eq!(vectors.len(), 8);
    assert!(vectors
        .iter()
        .filter(|v| v.class == LfClass::Gws)
        .all(|v| v.base == gws_base(SIM_BAR2, v.lf)));
}

#[test]
fn every_port_knows_its_group_bases_once_configured() {
    let board = SimBoard::new(16, 16);
    let mut dev = configured(&board, 2, 3);

    let expected: Vec<u64> = (0..3).map(|q| ggrp_base(SIM_BAR2, q)).collect();
    let limit = dev.xaq_pool().unwrap().limit;
    for port in dev.ports() {
        assert_eq!(port.group_bases(), expected.as_slice());
        assert_eq!(port.xaq_limit(), limit);
    }

    dev.configure(&EventDevConfig::new(1, 5)).unwrap();
    assert_eq!(dev.ports().len(), 1);
    assert_eq!(dev.ports()[0].group_bases().len(), 5);
}

#[test]
fn lf_allocation_waits_without_a_timeout() {
    let board = SimBoard::new(8, 8);
    let _dev = configured(&board, 1, 1);
    let state = board.agent.state();
    for (req, timeout) in &state.log {
        let infinite = matches!(req, Request::LfAlloc { .. } | Request::LfFree { .. });
        assert_eq!(
            *timeout == sso_mbox::MboxTimeout::Infinite,
            infinite,
            "{req:?}"
        );
    }
}

#[test]
fn single_workslot_mode_uses_one_lf_per_port() {
    let board = SimBoard::new(8, 8);
    let mut dev = board
        .probe(SsoConfig {
            single_ws: true,
            ..SsoConfig::default()
        })
        .unwrap();
    dev.configure(&EventDevConfig::new(3, 2)).unwrap();

    assert_eq!(board.agent.lf(LfClass::Gws).allocated, 3);
    assert!(dev.ports().iter().all(|p| p.workslots().len() == 1));
    assert!(!dev.ports()[0].is_dual());
}

#[test]
fn reconfigure_releases_previous_lfs_before_attaching_new_ones() {
    let board = SimBoard::new(16, 16);
    let mut dev = configured(&board, 2, 2);
    board.agent.clear_log();

    dev.configure(&EventDevConfig::new(3, 4)).unwrap();

    let log = board.agent.requests();
    assert_eq!(
        log[..6],
        [
            Request::LfFree {
                class: LfClass::Ggrp,
                count: 2
            },
            Request::DetachResources {
                class: LfClass::Ggrp,
                partial: true
            },
            Request::LfFree {
                class: LfClass::Gws,
                count: 4
            },
            Request::DetachResources {
                class: LfClass::Gws,
                partial: true
            },
            Request::AttachResources {
                class: LfClass::Gws,
                count: 6,
                modify: true
            },
            Request::LfAlloc {
                class: LfClass::Gws,
                count: 6
            },
        ]
    );
    assert_eq!(board.agent.lf(LfClass::Gws).allocated, 6);
    assert_eq!(board.agent.lf(LfClass::Ggrp).allocated, 4);
    assert_eq!(board.irq.state().unregister_calls, 1);
    assert_eq!(board.irq.registered().len(), 6 + 4);
    assert_eq!(dev.ports().len(), 3);
    assert_eq!(dev.queues().len(), 4);
}

#[test]
fn every_configuration_round_gets_a_fresh_pool_name() {
    let board = SimBoard::new(8, 8);
    let mut dev = configured(&board, 1, 4);
    dev.configure(&EventDevConfig::new(1, 2)).unwrap();
    dev.configure(&EventDevConfig::new(2, 2)).unwrap();

    assert_eq!(
        board.pool.created(),
        [
            "sso_xaq_buf_pool_0",
            "sso_xaq_buf_pool_1",
            "sso_xaq_buf_pool_2"
        ]
    );
    assert_eq!(board.pool.live_pools().len(), 1);
    assert_eq!(board.pool.live_regions(), 1);
}

#[test]
fn xaq_pool_is_sized_from_group_geometry() {
    let board = SimBoard::new(8, 8);
    let dev = configured(&board, 1, 4);

    // 7 * 4 cached + 4096 / 32 in-unit + 8 * 4 slack
    let pool = dev.xaq_pool().unwrap();
    assert_eq!((pool.count, pool.limit), (188, 172));
    assert_eq!(pool.buf_size, 4096);

    let live = &board.pool.live_pools()[0];
    assert_eq!(live.count, 188);
    assert!(live.populated);
    let aura = live.aura.unwrap();
    assert!(aura.fc_ena);
    assert_eq!(aura.fc_hyst_bits, 0);
    assert_eq!(aura.fc_addr, pool.fc.iova);
}

#[test]
fn xaq_sizing_constants_are_configurable() {
    let board = SimBoard::new(8, 8);
    let mut dev = board
        .probe(SsoConfig {
            xaq_sizing: XaqSizing {
                cache_cnt: 2,
                slack: 2,
            },
            ..SsoConfig::default()
        })
        .unwrap();
    dev.configure(&EventDevConfig::new(1, 4)).unwrap();

    let pool = dev.xaq_pool().unwrap();
    assert_eq!((pool.count, pool.limit), (144, 140));
}

#[test]
fn explicit_event_estimate_bounds_the_backlog() {
    let board = SimBoard::new(8, 8);
    let mut dev = board
        .probe(SsoConfig {
            xae_cnt: Some(8192),
            ..SsoConfig::default()
        })
        .unwrap();
    dev.configure(&EventDevConfig::new(1, 2)).unwrap();

    assert_eq!(dev.xaq_pool().unwrap().count, 7 * 2 + 8192 / 32);
    assert_eq!(dev.info().max_num_events, 8192);
    assert_eq!(dev.port_def_conf().new_event_threshold, 8192);
}

#[test]
fn dequeue_timeout_defaults_to_minimum() {
    let board = SimBoard::new(8, 8);
    let dev = configured(&board, 1, 1);
    assert_eq!(dev.dequeue_timeout_ns(), 1_000);
}

#[test]
fn out_of_range_dequeue_timeout_and_depth_are_rejected() {
    let board = SimBoard::new(8, 8);
    let mut dev = board.probe(SsoConfig::default()).unwrap();

    let mut conf = EventDevConfig::new(1, 1);
    conf.dequeue_timeout_ns = 500;
    assert!(matches!(
        dev.configure(&conf),
        Err(SsoError::Validation(ValidationError::DequeueTimeout { ns: 500, .. }))
    ));
    conf.dequeue_timeout_ns = 1_024_000;
    assert!(dev.configure(&conf).is_err());

    let mut conf = EventDevConfig::new(1, 1);
    conf.nb_event_port_enqueue_depth = 2;
    assert!(matches!(
        dev.configure(&conf),
        Err(SsoError::Validation(ValidationError::Depth {
            which: "enqueue",
            depth: 2
        }))
    ));

    conf.nb_event_port_enqueue_depth = 0;
    conf.nb_event_port_dequeue_depth = 0;
    conf.dequeue_timeout_ns = 1_023_000;
    dev.configure(&conf).unwrap();
    assert_eq!(dev.dequeue_timeout_ns(), 1_023_000);
}

/// Where a configuration attempt is made to fail, and the error it must surface as.
struct FailurePoint {
    name: &'static str,
    arm: fn(&SimBoard),
    check: fn(&SsoError) -> bool,
}

#[test]
fn failure_at_any_step_releases_everything() {
    let points = [
        FailurePoint {
            name: "attach workslots",
            arm: |b| b.agent.fail_class(MsgId::AttachResources, LfClass::Gws, -28),
            check: |e| {
                matches!(
                    e,
                    SsoError::ResourceUnavailable {
                        class: LfClass::Gws,
                        ..
                    }
                )
            },
        },
        FailurePoint {
            name: "allocate workslots",
            arm: |b| b.agent.fail(MsgId::SsowLfAlloc, -12),
            check: |e| {
                matches!(
                    e,
                    SsoError::ResourceUnavailable {
                        class: LfClass::Gws,
                        ..
                    }
                )
            },
        },
        FailurePoint {
            name: "attach groups",
            arm: |b| b.agent.fail_class(MsgId::AttachResources, LfClass::Ggrp, -28),
            check: |e| {
                matches!(
                    e,
                    SsoError::ResourceUnavailable {
                        class: LfClass::Ggrp,
                        ..
                    }
                )
            },
        },
        FailurePoint {
            name: "allocate groups",
            arm: |b| b.agent.fail(MsgId::SsoLfAlloc, -12),
            check: |e| {
                matches!(
                    e,
                    SsoError::ResourceUnavailable {
                        class: LfClass::Ggrp,
                        ..
                    }
                )
            },
        },
        FailurePoint {
            name: "flow-control region",
            arm: |b| b.pool.state().fail_region = true,
            check: |e| matches!(e, SsoError::OutOfMemory { .. }),
        },
        FailurePoint {
            name: "create pool",
            arm: |b| b.pool.state().fail_create = true,
            check: |e| matches!(e, SsoError::OutOfMemory { .. }),
        },
        FailurePoint {
            name: "bind aura",
            arm: |b| b.pool.state().fail_ops = true,
            check: |e| matches!(e, SsoError::BufferPoolBind(_)),
        },
        FailurePoint {
            name: "populate pool",
            arm: |b| b.pool.state().fail_populate = true,
            check: |e| matches!(e, SsoError::BufferPoolBind(_)),
        },
        FailurePoint {
            name: "hw setconfig",
            arm: |b| b.agent.fail(MsgId::SsoHwSetconfig, -5),
            check: |e| {
                matches!(
                    e,
                    SsoError::Rpc(MboxError::Rejected {
                        id: MsgId::SsoHwSetconfig,
                        ..
                    })
                )
            },
        },
        FailurePoint {
            name: "msix offsets",
            arm: |b| b.agent.fail(MsgId::MsixOffset, -5),
            check: |e| matches!(e, SsoError::Rpc(_)),
        },
        FailurePoint {
            name: "register interrupts",
            arm: |b| b.irq.state().fail_register = true,
            check: |e| matches!(e, SsoError::Interrupt(_)),
        },
    ];

    for point in points {
        let board = SimBoard::new(8, 8);
        let mut dev = board.probe(SsoConfig::default()).unwrap();
        (point.arm)(&board);

        let err = dev.configure(&EventDevConfig::new(2, 2)).unwrap_err();
        assert!((point.check)(&err), "{}: unexpected error {err:?}", point.name);
        assert_nothing_held(&board, &dev);

        board.agent.clear_failures();
        dev.configure(&EventDevConfig::new(2, 2))
            .unwrap_or_else(|e| panic!("{}: retry failed: {e}", point.name));
    }
}

#[test]
fn failed_reconfigure_leaves_device_unconfigured() {
    let board = SimBoard::new(8, 8);
    let mut dev = configured(&board, 2, 2);
    board.pool.state().fail_populate = true;

    assert!(dev.configure(&EventDevConfig::new(1, 1)).is_err());
    assert_nothing_held(&board, &dev);
    assert!(matches!(dev.start(|_| {}), Err(SsoError::NotConfigured)));
}

#[test]
fn release_failures_do_not_mask_the_step_error() {
    let board = SimBoard::new(8, 8);
    let mut dev = board.probe(SsoConfig::default()).unwrap();
    board.agent.fail(MsgId::SsoHwSetconfig, -5);
    board.agent.fail(MsgId::SsoLfFree, -1);

    let err = dev.configure(&EventDevConfig::new(1, 1)).unwrap_err();
    assert!(matches!(
        err,
        SsoError::Rpc(MboxError::Rejected {
            id: MsgId::SsoHwSetconfig,
            rc: -5
        })
    ));
    // The detach that follows the failed free still went out.
    assert!(board.agent.requests().contains(&Request::DetachResources {
        class: LfClass::Ggrp,
        partial: true
    }));
    assert_eq!(dev.nb_queues(), 0);
}

#[test]
fn reconfigure_proceeds_when_the_previous_release_fails() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let board = SimBoard::new(8, 8);
    let mut dev = configured(&board, 2, 2);
    board.agent.fail_once(MsgId::SsowLfFree, -5);
    board.agent.clear_log();

    dev.configure(&EventDevConfig::new(1, 1)).unwrap();

    let requests = board.agent.requests();
    let detach = requests
        .iter()
        .position(|r| {
            *r == Request::DetachResources {
                class: LfClass::Gws,
                partial: true,
            }
        })
        .unwrap();
    let attach = requests
        .iter()
        .position(|r| matches!(r, Request::AttachResources { class: LfClass::Gws, .. }))
        .unwrap();
    assert!(detach < attach);
    assert!(dev.is_configured());
    assert_eq!(board.agent.lf(LfClass::Gws).allocated, 2);
}

#[test]
fn close_returns_every_resource() {
    let board = SimBoard::new(8, 8);
    let mut dev = configured(&board, 2, 3);
    dev.close().unwrap();
    assert_nothing_held(&board, &dev);

    board.agent.clear_log();
    dev.close().unwrap();
    assert!(board.agent.requests().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x550_0001),
        .. ProptestConfig::default()
    })]

    #[test]
    fn rejected_counts_leave_the_device_as_it_was(ports in 0u16..40, queues in 0u16..300) {
        let board = SimBoard::new(32, 32);
        let mut dev = configured(&board, 2, 2);
        board.agent.clear_log();

        let in_range = (1..=dev.max_ports()).contains(&ports)
            && (1..=dev.max_queues()).contains(&queues);
        let res = dev.configure(&EventDevConfig::new(ports, queues));

        if in_range {
            prop_assert!(res.is_ok());
            prop_assert_eq!((dev.nb_ports(), dev.nb_queues()), (ports, queues));
        } else {
            prop_assert!(matches!(res, Err(SsoError::Validation(_))));
            prop_assert_eq!((dev.nb_ports(), dev.nb_queues()), (2, 2));
            prop_assert!(dev.is_configured());
            prop_assert_eq!(dev.state(), ConfigState::Configured);
            prop_assert!(board.agent.requests().is_empty());
        }
    }
}
