mod support;

use chrono::{DateTime, Utc};
use port_manager::api::DpcState;
use port_manager::conntest::InjectedError;
use support::{consistently, eventually, fast_timings, make_aa, make_dpc, mock_eth0, mock_eth1, SelectedIfs};

#[tokio::test]
async fn falls_back_to_last_resort_and_climbs_back() {
    let harness = support::start(fast_timings()).await;
    harness.monitor.add_or_update_interface(mock_eth0());

    // Seed the zero-time last-resort entry; it verifies fine over eth0.
    let eth0_only = SelectedIfs {
        eth0: true,
        ..SelectedIfs::default()
    };
    let time_prio1 = DateTime::<Utc>::UNIX_EPOCH;
    harness.handle.update_aa(make_aa(eth0_only)).await.expect("aa");
    harness
        .handle
        .add_dpc(make_dpc("lastresort", time_prio1, eth0_only))
        .await
        .expect("add");

    eventually("last resort verified", || {
        let (index, entries) = harness.dpc_list();
        index == 0 && entries.len() == 1 && entries[0].state == DpcState::Success
    })
    .await;
    eventually("status reports last resort", || {
        harness.handle.dns().dpc_key == "lastresort"
    })
    .await;

    // A controller-pushed configuration names only the absent eth1; its
    // verification fails and the manager reverts to the last resort.
    let eth1_only = SelectedIfs {
        eth1: true,
        ..SelectedIfs::default()
    };
    let time_prio2 = Utc::now();
    harness
        .handle
        .add_dpc(make_dpc("zedagent", time_prio2, eth1_only))
        .await
        .expect("add");

    eventually("fallback to last resort", || {
        let (index, entries) = harness.dpc_list();
        index == 1 && entries.len() == 2 && entries[0].state == DpcState::Fail
    })
    .await;
    let (_, entries) = harness.dpc_list();
    assert_eq!(entries[0].key, "zedagent");
    assert_eq!(entries[0].time_priority, time_prio2);
    assert!(entries[0].test_results.last_failed > entries[0].test_results.last_succeeded);
    assert_eq!(
        entries[0].test_results.last_error,
        "network test failed: not enough working ports (0); failed with: [interface eth1 is missing]"
    );
    assert_eq!(entries[1].key, "lastresort");
    assert_eq!(entries[1].state, DpcState::Success);
    assert!(entries[1].test_results.last_error.is_empty());

    // A newer working configuration arrives; the broken one is compressed
    // out, the last resort survives.
    let time_prio3 = Utc::now();
    harness
        .handle
        .add_dpc(make_dpc("zedagent", time_prio3, eth0_only))
        .await
        .expect("add");

    eventually("list grows while testing", || harness.dpc_list().1.len() == 3).await;
    eventually("list compressed after success", || {
        let (index, entries) = harness.dpc_list();
        index == 0 && entries.len() == 2 && entries[0].state == DpcState::Success
    })
    .await;
    let (_, entries) = harness.dpc_list();
    assert_eq!(entries[0].key, "zedagent");
    assert_eq!(entries[0].time_priority, time_prio3);
    assert!(entries[0].test_results.last_error.is_empty());
    assert_eq!(entries[1].key, "lastresort");
    assert_eq!(entries[1].time_priority, time_prio1);
    assert_eq!(entries[1].state, DpcState::Success);

    // A remote temporary failure must not trigger a fallback.
    harness.tester.set_connectivity_error(
        "zedagent",
        "eth0",
        Some(InjectedError::RemoteTemporary {
            endpoint: "fake-url".into(),
            detail: "controller error".into(),
        }),
    );
    consistently("no verification campaign on remote failure", || {
        !harness.handle.dns().testing
    })
    .await;

    let (index, entries) = harness.dpc_list();
    assert_eq!(index, 0);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].state, DpcState::Success);
    assert!(entries[0].test_results.last_error.is_empty());
    assert_eq!(entries[1].state, DpcState::Success);

    // A real loss of connectivity does trigger the fallback.
    harness.tester.set_connectivity_error(
        "zedagent",
        "eth0",
        Some(InjectedError::Local("failed to connect".into())),
    );

    eventually("fallback after local failure", || {
        let (index, entries) = harness.dpc_list();
        index == 1 && entries[0].state == DpcState::FailWithIpDns
    })
    .await;
    let (_, entries) = harness.dpc_list();
    assert_eq!(
        entries[0].test_results.last_error,
        "network test failed: not enough working ports (0); failed with: [failed to connect]"
    );
    assert_eq!(entries[1].key, "lastresort");
    assert_eq!(entries[1].state, DpcState::Success);
    assert!(entries[1].test_results.was_working());
}

#[tokio::test]
async fn partial_success_across_multiple_ports_is_enough() {
    let harness = support::start(fast_timings()).await;
    harness.monitor.add_or_update_interface(mock_eth0());
    harness.monitor.add_or_update_interface(mock_eth1());

    // The last resort works through eth0 only; the pushed configuration
    // works through neither.
    harness.tester.set_connectivity_error(
        "lastresort",
        "eth1",
        Some(InjectedError::Local("failed to connect over eth1".into())),
    );
    harness.tester.set_connectivity_error(
        "zedagent",
        "eth0",
        Some(InjectedError::Local("failed to connect over eth0".into())),
    );
    harness.tester.set_connectivity_error(
        "zedagent",
        "eth1",
        Some(InjectedError::Local("failed to connect over eth1".into())),
    );

    let both = SelectedIfs {
        eth0: true,
        eth1: true,
        ..SelectedIfs::default()
    };
    let time_prio1 = DateTime::<Utc>::UNIX_EPOCH;
    harness.handle.update_aa(make_aa(both)).await.expect("aa");
    harness
        .handle
        .add_dpc(make_dpc("lastresort", time_prio1, both))
        .await
        .expect("add");

    // One working uplink satisfies the policy.
    eventually("verification succeeds over eth0", || {
        let (index, entries) = harness.dpc_list();
        index == 0 && entries.len() == 1 && entries[0].state == DpcState::Success
    })
    .await;
    eventually("per-port verdicts recorded", || {
        let dpc = harness.dpc(0);
        let eth0 = dpc.port("eth0").cloned().unwrap_or_default();
        let eth1 = dpc.port("eth1").cloned().unwrap_or_default();
        eth0.test_results.was_working()
            && eth0.test_results.last_error.is_empty()
            && eth1.test_results.last_error == "failed to connect over eth1"
    })
    .await;

    // The pushed configuration fails on both ports and the manager falls
    // back to the last resort.
    let time_prio2 = Utc::now();
    harness
        .handle
        .add_dpc(make_dpc("zedagent", time_prio2, both))
        .await
        .expect("add");

    eventually("fallback to last resort", || {
        let (index, entries) = harness.dpc_list();
        index == 1 && entries.len() == 2 && entries[0].state == DpcState::FailWithIpDns
    })
    .await;
    let (_, entries) = harness.dpc_list();
    let error = &entries[0].test_results.last_error;
    assert!(error.starts_with("network test failed: not enough working ports (0)"));
    assert!(error.contains("failed to connect over eth0"));
    assert!(error.contains("failed to connect over eth1"));
    assert_eq!(entries[1].key, "lastresort");
    assert_eq!(entries[1].state, DpcState::Success);
}
