//! Connection lifecycle and hot-plug recovery

mod common;

use common::{ATR, SELECT, setup, setup_connected};
use nexum_apdu_reader_openct::prelude::*;
use nexum_apdu_reader_openct::sim::Operation;
use nexum_apdu_reader_openct::ServiceError;

#[test]
fn test_connect_stores_atr() {
    let (service, _driver, readers) = setup_connected();
    let reader = readers.get(0).unwrap();

    assert!(reader.is_connected());
    assert_eq!(reader.slots()[0].atr(), &ATR);
    assert_eq!(service.open_sessions(0), 1);
}

#[test]
fn test_disconnect_is_idempotent() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();

    driver.disconnect(reader, 0, Disposition::LeaveCard).unwrap();
    assert!(!reader.is_connected());
    assert_eq!(service.open_sessions(0), 0);

    let calls = service.calls();
    driver.disconnect(reader, 0, Disposition::ResetCard).unwrap();
    assert!(!reader.is_connected());
    assert_eq!(service.calls(), calls);
}

#[test]
fn test_reconnect_if_needed_leaves_live_session_alone() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let generation = reader.generation();

    assert_eq!(driver.reconnect_if_needed(reader, 0), Ok(Hotplug::Unchanged));
    assert_eq!(reader.generation(), generation);
    assert_eq!(service.calls().open, 1);
}

#[test]
fn test_reconnect_if_needed_reports_reattach() {
    let (service, driver, mut readers) = setup();
    let reader = readers.get_mut(0).unwrap();

    assert_eq!(driver.reconnect_if_needed(reader, 0), Ok(Hotplug::Reattached));
    assert!(reader.is_connected());
    assert_eq!(reader.slots()[0].atr(), &ATR);
    assert_eq!(service.open_sessions(0), 1);
}

#[test]
fn test_reconnect_if_needed_rejects_unknown_slot() {
    let (service, driver, mut readers) = setup();
    let reader = readers.get_mut(0).unwrap();

    assert!(matches!(
        driver.reconnect_if_needed(reader, 9),
        Err(ReaderError::InvalidArguments(_))
    ));
    assert!(!reader.is_connected());
    assert_eq!(service.calls().open, 0);
}

#[test]
fn test_reattach_as_error_code() {
    let (_service, driver, mut readers) = setup();
    let reader = readers.get_mut(0).unwrap();

    let signal = driver.reconnect_if_needed(reader, 0).unwrap().into_error();
    assert_eq!(signal, Some(ReaderError::ReaderReattached));
    assert!(signal.is_some_and(|err| err.is_hotplug()));

    assert_eq!(driver.reconnect_if_needed(reader, 0).unwrap().into_error(), None);
}

#[test]
fn test_reconnect_if_needed_reports_detach() {
    let (service, driver, mut readers) = setup();
    service.unplug(0);
    let reader = readers.get_mut(0).unwrap();

    assert_eq!(
        driver.reconnect_if_needed(reader, 0),
        Err(ReaderError::ReaderDetached)
    );
    assert!(!reader.is_connected());
    assert_eq!(service.calls().open, 1);
}

#[test]
fn test_transmit_on_lost_session_tears_down_and_recovers() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let mut response = [0u8; 258];

    service.restart();
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut response, false),
        Err(ReaderError::ReaderDetached)
    );
    assert!(!reader.is_connected());

    let opens = service.calls().open;
    let presence = driver.detect_card_presence(reader, 0).unwrap();
    assert!(presence.present);
    assert!(reader.is_connected());
    assert_eq!(service.calls().open, opens + 1);
}

#[test]
fn test_transmit_reattaches_replugged_reader() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let first = reader.generation().unwrap();
    let mut response = [0u8; 258];

    service.unplug(0);
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut response, false),
        Err(ReaderError::ReaderDetached)
    );
    // still unplugged, the single reconnect attempt fails
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut response, false),
        Err(ReaderError::ReaderDetached)
    );

    service.replug(0);
    service.push_response(0, 0, [0x61, 0x10]);
    let len = driver
        .transmit(reader, 0, &SELECT, &mut response, false)
        .unwrap();
    assert_eq!(&response[..len], &[0x61, 0x10]);
    assert!(reader.generation().unwrap() > first);
    assert_eq!(service.commands(0, 0), vec![SELECT.to_vec()]);
}

#[test]
fn test_transmit_translates_service_errors() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let mut response = [0u8; 258];

    service.fail_next(0, Operation::Transact, ServiceError::CommError);
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut response, false),
        Err(ReaderError::Reader(ServiceError::CommError))
    );
    assert!(reader.is_connected());

    let mut small = [0u8; 1];
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut small, false),
        Err(ReaderError::Reader(ServiceError::BufferTooSmall))
    );
}

#[test]
fn test_transmit_empty_response() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let mut response = [0u8; 258];

    service.push_response(0, 0, Vec::new());
    assert_eq!(
        driver.transmit(reader, 0, &SELECT, &mut response, true),
        Ok(0)
    );
}

#[test]
fn test_transmit_invalid_slot() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();
    let mut response = [0u8; 258];

    assert!(matches!(
        driver.transmit(reader, 3, &SELECT, &mut response, false),
        Err(ReaderError::InvalidArguments(_))
    ));
    assert_eq!(service.calls().transact, 0);
}

#[test]
fn test_detect_reports_changed_bit_separately() {
    let (service, driver, mut readers) = setup();
    let reader = readers.get_mut(0).unwrap();

    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Ok(CardPresence {
            present: true,
            changed: true
        })
    );
    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Ok(CardPresence {
            present: true,
            changed: false
        })
    );

    service.remove_card(0, 0);
    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Ok(CardPresence {
            present: false,
            changed: true
        })
    );
    assert_eq!(
        reader.slots()[0].presence(),
        CardPresence {
            present: false,
            changed: true
        }
    );
    assert!(!reader.slots()[0].is_card_present());
}

#[test]
fn test_detect_on_unreachable_terminal_reports_no_card() {
    let (service, driver, mut readers) = setup();
    service.unplug(0);
    let reader = readers.get_mut(0).unwrap();

    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Ok(CardPresence::ABSENT)
    );
    assert!(!reader.is_connected());
}

#[test]
fn test_detect_status_failure() {
    let (service, driver, mut readers) = setup_connected();
    let reader = readers.get_mut(0).unwrap();

    service.fail_next(0, Operation::Status, ServiceError::CommError);
    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Err(ReaderError::TransmitFailed(ServiceError::CommError))
    );
    assert!(reader.is_connected());
    assert!(!reader.slots()[0].is_card_present());

    service.restart();
    assert_eq!(
        driver.detect_card_presence(reader, 0),
        Err(ReaderError::TransmitFailed(ServiceError::NotConnected))
    );
    assert!(!reader.is_connected());
}

#[test]
fn test_connect_without_card() {
    let (service, driver, mut readers) = setup();
    service.remove_card(0, 0);
    let reader = readers.get_mut(0).unwrap();

    assert_eq!(driver.connect(reader, 0), Err(ReaderError::CardNotPresent));
    assert!(reader.slots()[0].atr().is_empty());
}

#[test]
fn test_release_all_closes_sessions() {
    let (service, driver, mut readers) = setup_connected();

    readers.release_all(&driver).unwrap();
    assert!(readers.is_empty());
    assert_eq!(service.open_sessions(0), 0);
}
