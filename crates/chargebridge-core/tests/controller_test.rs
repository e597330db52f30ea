#![allow(clippy::unwrap_used)]
// End-to-end controller tests against a wiremock vendor API.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chargebridge_core::{
    ActiveLimit, Availability, ChargingMode, Command, ConnectionState, Controller, CoreError,
    SessionState,
};
use common::*;

async fn connected(server: &MockServer, strategy: &str, poll_delay: Duration) -> Controller {
    mount_password_grant(server).await;
    mount_station(server, charger(strategy, 100), poll_delay).await;
    let controller = Controller::new(bridge_config(server)).unwrap();
    controller.connect().await.unwrap();
    controller
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_seeds_store_from_first_poll() {
    let server = MockServer::start().await;
    let controller = connected(&server, "EXCESS_ONLY", Duration::ZERO).await;

    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Connected);
    let snap = controller.snapshot(&connector()).unwrap();
    assert_eq!(snap.mode, Some(ChargingMode::Solar));
    assert_eq!(snap.session_state, Some(SessionState::Charging));
    assert_eq!(snap.min_surplus_pct, Some(25));
    assert_eq!(snap.led_brightness, Some(70));
    assert!(snap.last_polled_at.is_some());

    let by_serial = controller.connector_by_serial(SERIAL, 1).unwrap();
    assert_eq!(by_serial.id(), &connector());
    assert!(matches!(
        controller.connector_by_serial(SERIAL, 2),
        Err(CoreError::ConnectorNotFound { .. })
    ));

    controller.disconnect().await;
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Disconnected);
    assert!(matches!(
        controller.execute(&connector(), Command::Stop).await,
        Err(CoreError::Disconnected)
    ));
}

#[tokio::test]
async fn test_connectors_discovered_when_not_configured() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_station(&server, charger("NONE", 50), Duration::ZERO).await;

    let mut config = bridge_config(&server);
    config.station.connectors.clear();
    let controller = Controller::new(config).unwrap();
    controller.connect().await.unwrap();

    let snaps = controller.snapshots();
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].identity.smart_device_id, DEVICE_ID);
    assert_eq!(snaps[0].identity.connector_number, 1);
    assert_eq!(snaps[0].percentage_limit, Some(50));
    controller.disconnect().await;
}

#[tokio::test]
async fn test_reload_rebuilds_state() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;

    controller.reload().await.unwrap();

    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Connected);
    assert_eq!(controller.snapshots().len(), 1);
    assert_eq!(
        controller.snapshot(&connector()).unwrap().mode,
        Some(ChargingMode::Normal)
    );
    controller.disconnect().await;
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pause_resets_mode_to_normal() {
    let server = MockServer::start().await;
    let controller = connected(&server, "EXCESS_ONLY", Duration::ZERO).await;
    mount_action(&server, "pauseCharging", Duration::ZERO).await;

    controller.execute(&connector(), Command::Pause).await.unwrap();

    let snap = controller.snapshot(&connector()).unwrap();
    assert_eq!(snap.session_state, Some(SessionState::Paused));
    assert_eq!(snap.mode, Some(ChargingMode::Normal));
    controller.disconnect().await;
}

#[tokio::test]
async fn test_second_command_in_flight_is_busy() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;
    mount_action(&server, "pauseCharging", Duration::from_millis(400)).await;
    mount_action(&server, "stopCharging", Duration::ZERO).await;

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.execute(&connector(), Command::Pause).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = controller.execute(&connector(), Command::Stop).await;
    assert!(matches!(second, Err(CoreError::Busy { .. })), "got {second:?}");

    first.await.unwrap().unwrap();
    let snap = controller.snapshot(&connector()).unwrap();
    assert_eq!(snap.session_state, Some(SessionState::Paused));

    // Free again once the first command finished.
    controller.execute(&connector(), Command::Stop).await.unwrap();
    controller.disconnect().await;
}

#[tokio::test]
async fn test_command_cancelled_by_disconnect_applies_nothing() {
    let server = MockServer::start().await;
    let controller = connected(&server, "EXCESS_ONLY", Duration::ZERO).await;
    mount_action(&server, "pauseCharging", Duration::from_millis(400)).await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.execute(&connector(), Command::Pause).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.disconnect().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled)), "got {result:?}");
    let snap = controller.snapshot(&connector()).unwrap();
    assert_eq!(snap.session_state, Some(SessionState::Charging));
    assert_eq!(snap.mode, Some(ChargingMode::Solar));
}

#[tokio::test]
async fn test_set_mode_twice_is_idempotent() {
    let server = MockServer::start().await;
    let controller = connected(&server, "EXCESS_ONLY", Duration::ZERO).await;
    mount_action(&server, "setChargingMode", Duration::ZERO).await;
    mount_action(&server, "setPercentageLimit", Duration::ZERO).await;

    let command = Command::SetMode {
        mode: ChargingMode::Normal,
        limit: Some(ActiveLimit::Current(16)),
    };
    controller.execute(&connector(), command.clone()).await.unwrap();
    let once = controller.snapshot(&connector()).unwrap();
    controller.execute(&connector(), command).await.unwrap();
    let twice = controller.snapshot(&connector()).unwrap();

    assert_eq!(once.mode, Some(ChargingMode::Normal));
    assert_eq!(once.current_limit_amps, Some(16));
    assert_eq!(once.active_limit(), Some(ActiveLimit::Current(16)));
    assert_eq!(
        (twice.mode, twice.current_limit_amps, twice.percentage_limit),
        (once.mode, once.current_limit_amps, once.percentage_limit)
    );
    controller.disconnect().await;
}

#[tokio::test]
async fn test_out_of_range_current_makes_no_calls() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path_regex(r"/actions/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    for amps in [0, 33] {
        let err = controller
            .execute(&connector(), Command::SetCurrentLimit { amps })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }), "got {err:?}");
    }
    let err = controller
        .execute(&connector(), Command::SetBrightness { brightness: 101 })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }), "got {err:?}");
    controller.disconnect().await;
}

#[tokio::test]
async fn test_brightness_targets_led_controller_and_all_connectors() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path(action_path("led-1", "setBrightness")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    controller
        .execute(&connector(), Command::SetBrightness { brightness: 40 })
        .await
        .unwrap();

    assert_eq!(controller.snapshot(&connector()).unwrap().led_brightness, Some(40));
    controller.disconnect().await;
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_started_before_command_does_not_roll_back() {
    let server = MockServer::start().await;
    let controller = connected(&server, "EXCESS_ONLY", Duration::from_millis(400)).await;
    mount_action(&server, "setChargingMode", Duration::ZERO).await;
    mount_action(&server, "setPercentageLimit", Duration::ZERO).await;

    // The poll fetch starts first and lands after the command confirmed.
    let poll = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller
        .execute(
            &connector(),
            Command::SetMode {
                mode: ChargingMode::Normal,
                limit: Some(ActiveLimit::Current(16)),
            },
        )
        .await
        .unwrap();
    let report = poll.await.unwrap();
    assert_eq!(report.refreshed, vec![connector()]);

    let snap = controller.snapshot(&connector()).unwrap();
    assert_eq!(snap.mode, Some(ChargingMode::Normal));
    assert_eq!(snap.current_limit_amps, Some(16));
    assert_eq!(snap.min_surplus_pct, Some(25));
    controller.disconnect().await;
}

#[tokio::test]
async fn test_three_poll_failures_mark_stale_and_keep_values() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;
    let before = controller.snapshot(&connector()).unwrap();
    assert_eq!(before.current_limit_amps, Some(32));

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    for pass in 1..=3 {
        let report = controller.refresh().await;
        assert_eq!(report.failed, vec![connector()]);
        assert_eq!(report.marked_stale.is_empty(), pass < 3);
    }

    let after = controller.snapshot(&connector()).unwrap();
    assert!(after.stale);
    assert_eq!(after.availability(), Availability::Unknown);
    assert_eq!(after.mode, before.mode);
    assert_eq!(after.current_limit_amps, before.current_limit_amps);
    assert_eq!(after.percentage_limit, before.percentage_limit);
    assert_eq!(controller.stale_warnings(Duration::from_secs(3600)).len(), 1);
    controller.disconnect().await;
}

#[tokio::test]
async fn test_connector_stays_stale_while_station_scan_succeeds() {
    let server = MockServer::start().await;
    let controller = connected(&server, "NONE", Duration::ZERO).await;

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(location_path("smartdevices")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([led_controller(), charger("NONE", 100)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(location_path(&format!("smartdevices/{DEVICE_ID}"))))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut marked = 0;
    for pass in 1..=5 {
        let report = controller.refresh().await;
        assert_eq!(report.failed, vec![connector()]);
        marked += report.marked_stale.len();

        let snap = controller.snapshot(&connector()).unwrap();
        assert_eq!(snap.stale, pass >= 3, "pass {pass}");
        if pass >= 3 {
            assert_eq!(controller.stale_warnings(Duration::from_secs(3600)).len(), 1);
        }
    }
    assert_eq!(marked, 1);
    controller.disconnect().await;
}
