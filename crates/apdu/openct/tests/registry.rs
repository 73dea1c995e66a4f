//! Reader registration and late terminal binding

mod common;

use common::{ATR, Readers, init_tracing};
use nexum_apdu_reader_openct::prelude::*;
use nexum_apdu_reader_openct::reader::DETACHED_READER_NAME;
use nexum_apdu_reader_openct::sim::SimulatedService;

fn service() -> SimulatedService {
    init_tracing();
    SimulatedService::new()
        .with_terminal(0, TerminalInfo::new("Reader zero", 2).with_keypad(true))
        .with_terminal(2, TerminalInfo::new("Reader two", 1).with_display(true))
}

#[test]
fn test_driver_names() {
    let driver = OpenctDriver::new(SimulatedService::new());
    assert_eq!(driver.name(), "OpenCT Reader");
    assert_eq!(driver.short_name(), "openct");
}

#[test]
fn test_init_fills_gaps_with_placeholders() {
    let driver = OpenctDriver::new(service());
    let mut readers = Readers::new();

    let summary = driver.initialize(&mut readers).unwrap();
    assert_eq!(summary.attached, vec![0, 2]);
    assert_eq!(summary.placeholders, vec![1, 3, 4]);
    assert!(summary.failed.is_empty());

    let indices: Vec<u32> = readers.iter().map(|r| r.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    for reader in readers.iter().filter(|r| [1, 3, 4].contains(&r.index())) {
        assert_eq!(reader.name(), DETACHED_READER_NAME);
        assert_eq!(reader.slot_count(), 1);
        assert!(!reader.is_connected());
    }

    let zero = readers.get(0).unwrap();
    assert_eq!(zero.name(), "Reader zero");
    assert_eq!(zero.slot_count(), 2);
    assert!(zero.capabilities().pin_pad);
    assert!(zero.slots().iter().all(|s| s.capabilities().pin_pad));

    let two = readers.get(2).unwrap();
    assert_eq!(two.name(), "Reader two");
    assert!(two.capabilities().display);
    assert!(!two.capabilities().pin_pad);
}

#[test]
fn test_init_without_preallocation() {
    let driver = OpenctDriver::with_config(service(), DriverConfig::new().with_preallocate(0));
    let mut readers = Readers::new();

    driver.init(&mut readers).unwrap();
    assert_eq!(readers.len(), 2);
    assert!(readers.iter().all(|r| r.name() != DETACHED_READER_NAME));
}

#[test]
fn test_init_respects_scan_limit() {
    let driver = OpenctDriver::with_config(service(), DriverConfig::new().with_max_readers(2));
    let mut readers = Readers::new();

    let summary = driver.initialize(&mut readers).unwrap();
    assert_eq!(summary.attached, vec![0]);
    assert_eq!(summary.placeholders, vec![1]);
}

#[test]
fn test_placeholder_binds_late_terminal() {
    let service = service();
    let driver = OpenctDriver::new(service.clone());
    let mut readers = Readers::new();
    driver.init(&mut readers).unwrap();

    let placeholder = readers.get_mut(1).unwrap();
    assert_eq!(
        driver.detect_card_presence(placeholder, 0),
        Ok(CardPresence::ABSENT)
    );

    service.plug(1, TerminalInfo::new("Late reader", 1));
    service.insert_card(1, 0, ATR);

    assert!(driver.detect_card_presence(placeholder, 0).unwrap().present);
    driver.connect(placeholder, 0).unwrap();
    assert_eq!(placeholder.slots()[0].atr(), &ATR);
}

#[test]
fn test_release_all_finishes_driver() {
    let driver = OpenctDriver::new(service());
    let mut readers = Readers::new();
    driver.init(&mut readers).unwrap();

    readers.release_all(&driver).unwrap();
    assert!(readers.is_empty());
}
