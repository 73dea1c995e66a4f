//! Common test utilities

#![allow(dead_code)]

use nexum_apdu_reader_openct::prelude::*;
use nexum_apdu_reader_openct::sim::{SimulatedHandle, SimulatedService};
use tracing_subscriber::EnvFilter;

/// ATR of the card inserted by [`setup`]
pub const ATR: [u8; 4] = [0x3B, 0x02, 0x14, 0x50];

/// SELECT with empty AID
pub const SELECT: [u8; 5] = [0x00, 0xA4, 0x04, 0x00, 0x00];

/// Host reader table over simulated sessions
pub type Readers = ReaderTable<Reader<SimulatedHandle>>;

/// Install a subscriber printing driver logs through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One single-slot terminal with a card, registered with a fresh host table
///
/// The returned service shares its state with the driver's, so tests can
/// unplug terminals or restart the daemon behind the driver's back.
pub fn setup() -> (SimulatedService, OpenctDriver<SimulatedService>, Readers) {
    init_tracing();

    let service = SimulatedService::new().with_terminal(
        0,
        TerminalInfo::new("Simulated keypad reader", 1)
            .with_display(true)
            .with_keypad(true),
    );
    service.insert_card(0, 0, ATR);

    let driver = OpenctDriver::with_config(
        service.clone(),
        DriverConfig::new().with_preallocate(0),
    );
    let mut readers = Readers::new();
    driver.init(&mut readers).expect("init never fails");
    assert_eq!(readers.len(), 1);

    (service, driver, readers)
}

/// Like [`setup`], with reader 0 already connected
pub fn setup_connected() -> (SimulatedService, OpenctDriver<SimulatedService>, Readers) {
    let (service, driver, mut readers) = setup();
    let reader = readers.get_mut(0).expect("reader 0");
    driver.connect(reader, 0).expect("connect");
    (service, driver, readers)
}
