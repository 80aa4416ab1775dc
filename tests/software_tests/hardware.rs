//! Runs against a real board. Needs a `config.toml` naming its serial port.

#[cfg(feature = "hw")]
use nano_hil::{harness, Configuration, RelayController};

#[cfg(feature = "hw")]
#[test]
fn toggle_relays() {
    let config = Configuration::from_file("config.toml").unwrap();
    let mut controller = RelayController::connect(&config).unwrap();
    controller.await_samples(config.sample_timeout()).unwrap();

    harness::toggle_all(&mut controller, config.settle_time()).unwrap();
}
