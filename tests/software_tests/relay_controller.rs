use std::{thread, time::Duration};

use crate::simulation::*;
use nano_hil::firmata::{FirmataError, FirmwareInfo, HostMessage, Level, PinMode};
use nano_hil::relay::PinMapping;
use nano_hil::{RelayController, RelayError, RelayId, RelayState};
use test_case::test_case;

#[test]
fn relays_are_closed_after_construction() {
    let (board, handle) = SimulatedBoard::nano();
    let controller = connect(handle);
    controller.await_samples(SAMPLE_TIMEOUT).unwrap();

    assert_eq!(controller.read_state(RelayId::Relay1).unwrap(), RelayState::Closed);
    assert_eq!(controller.read_state(RelayId::Relay2).unwrap(), RelayState::Closed);
    assert_eq!(board.level(6), Level::Low);
    assert_eq!(board.level(7), Level::Low);
}

#[test]
fn pins_are_configured_during_construction() {
    let (board, handle) = SimulatedBoard::nano();
    let controller = connect(handle);

    assert_eq!(board.pin_mode(6), Some(PinMode::Output));
    assert_eq!(board.pin_mode(7), Some(PinMode::Output));
    assert_eq!(board.pin_mode(2), Some(PinMode::Input));
    assert_eq!(board.pin_mode(3), Some(PinMode::Input));

    let received = board.received();
    assert_eq!(received.first(), Some(&HostMessage::QueryVersion));
    assert!(received.contains(&HostMessage::ReportDigital { port: 0, enable: true }));
    assert!(received.contains(&HostMessage::DigitalPort { port: 0, mask: 0 }));

    assert_eq!(controller.board().firmware(), FirmwareInfo { major: 2, minor: 5 });
    assert!(controller.board().is_sampling());
}

#[test_case(RelayId::Relay1)]
#[test_case(RelayId::Relay2)]
fn state_pin_follows_commands(relay: RelayId) {
    let (_board, handle) = SimulatedBoard::nano();
    let mut controller = connect(handle);
    controller.await_samples(SAMPLE_TIMEOUT).unwrap();

    controller.open(relay).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(controller.read_state(relay).unwrap(), RelayState::Open);

    controller.close(relay).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(controller.read_state(relay).unwrap(), RelayState::Closed);
}

#[test]
fn toggle_both_relays_with_board_settle_time() {
    let (_board, handle) = SimulatedBoard::nano();
    let mut controller = connect(handle);
    controller.await_samples(SAMPLE_TIMEOUT).unwrap();
    let settle = Duration::from_millis(200);

    for relay in [RelayId::Relay1, RelayId::Relay2] {
        controller.open(relay).unwrap();
        thread::sleep(settle);
        assert_eq!(controller.read_state(relay).unwrap(), RelayState::Open);
        controller.close(relay).unwrap();
        thread::sleep(settle);
        assert_eq!(controller.read_state(relay).unwrap(), RelayState::Closed);
    }
}

#[test]
fn opening_twice_is_idempotent() {
    let (board, handle) = SimulatedBoard::nano();
    let mut controller = connect(handle);

    controller.open(RelayId::Relay2).unwrap();
    controller.open(RelayId::Relay2).unwrap();
    thread::sleep(SETTLE);

    assert_eq!(controller.read_state(RelayId::Relay2).unwrap(), RelayState::Open);
    assert_eq!(board.level(7), Level::High);
}

#[test]
fn relays_do_not_affect_each_other() {
    let (board, handle) = SimulatedBoard::nano();
    let mut controller = connect(handle);

    controller.open(RelayId::Relay1).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(controller.read_state(RelayId::Relay1).unwrap(), RelayState::Open);
    assert_eq!(controller.read_state(RelayId::Relay2).unwrap(), RelayState::Closed);

    // Both control pins live on port 0
    controller.open(RelayId::Relay2).unwrap();
    controller.close(RelayId::Relay1).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(controller.read_state(RelayId::Relay1).unwrap(), RelayState::Closed);
    assert_eq!(controller.read_state(RelayId::Relay2).unwrap(), RelayState::Open);
    assert_eq!(board.level(6), Level::Low);
    assert_eq!(board.level(7), Level::High);
}

#[test]
fn custom_mapping_is_used() {
    let (board, handle) = SimulatedBoard::with_wiring(&[(8, 4), (9, 5)]);
    let mut config = test_config();
    config.relays.insert(RelayId::Relay1, PinMapping::new(8, 4));
    config.relays.insert(RelayId::Relay2, PinMapping::new(9, 5));

    setup_logging();
    let mut controller = RelayController::with_handle(handle, &config).unwrap();
    controller.open(RelayId::Relay2).unwrap();
    thread::sleep(SETTLE);

    assert_eq!(board.pin_mode(9), Some(PinMode::Output));
    assert_eq!(controller.mapping(RelayId::Relay2).unwrap(), PinMapping::new(9, 5));
    assert_eq!(controller.read_state(RelayId::Relay2).unwrap(), RelayState::Open);
    assert_eq!(controller.read_state(RelayId::Relay1).unwrap(), RelayState::Closed);
}

#[test]
fn unknown_relays_are_rejected() {
    assert!(matches!(RelayId::parse("RELAY_3"), Err(RelayError::UnknownRelay(_))));
    assert!(matches!(RelayId::from_number(0), Err(RelayError::UnknownRelay(_))));
}

#[test]
fn unresponsive_board_fails_construction() {
    setup_logging();
    let (_board, handle) = SimulatedBoard::unresponsive();

    let result = RelayController::with_handle(handle, &test_config());

    assert!(matches!(result, Err(RelayError::Connection(FirmataError::HandshakeTimeout(_)))));
}

#[test]
fn missing_serial_port_fails_construction() {
    setup_logging();

    let result = RelayController::open_port("/dev/does-not-exist");

    assert!(matches!(result, Err(RelayError::Connection(FirmataError::Open { .. }))));
}

#[test]
fn overlapping_pins_fail_before_connecting() {
    setup_logging();
    let (board, handle) = SimulatedBoard::nano();
    let mut config = test_config();
    config.relays.insert(RelayId::Relay2, PinMapping::new(6, 3));

    let result = RelayController::with_handle(handle, &config);

    assert!(matches!(result, Err(RelayError::InvalidMapping(_))));
    assert!(board.received().is_empty());
}

#[test]
fn read_before_first_sample_is_pending() {
    let (_board, handle) = SimulatedBoard::without_reports();
    let controller = connect(handle);

    assert!(matches!(
        controller.read_state(RelayId::Relay1),
        Err(RelayError::SamplePending { relay: RelayId::Relay1, pin: 2 })
    ));
    assert!(matches!(
        controller.await_samples(Duration::from_millis(50)),
        Err(RelayError::SamplePending { .. })
    ));
}
