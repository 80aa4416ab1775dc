use anyhow::Context;
use nano_hil::{harness, Configuration, RelayController};
use simplelog as sl;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let config = Configuration::from_file(&config_path)?;

    let log_file = std::fs::File::create(&config.log_path)
        .with_context(|| format!("Could not create log file {}", config.log_path))?;
    let _ = sl::CombinedLogger::init(vec![
        sl::TermLogger::new(
            sl::LevelFilter::Info,
            sl::Config::default(),
            sl::TerminalMode::Mixed,
            sl::ColorChoice::Auto,
        ),
        sl::WriteLogger::new(sl::LevelFilter::Debug, sl::Config::default(), log_file),
    ]);

    let ret = run(&config);
    if let Err(e) = &ret {
        log::error!("{e:#}");
    }
    ret
}

fn run(config: &Configuration) -> anyhow::Result<()> {
    let mut controller = RelayController::connect(config)?;
    controller.await_samples(config.sample_timeout())?;

    let relay = config.loop_relay;
    let mut cycle = 0u64;
    while config.cycles.map_or(true, |n| cycle < n) {
        harness::toggle_relay(&mut controller, relay, config.settle_time())
            .with_context(|| format!("Cycle {} failed", cycle + 1))?;
        cycle += 1;
        log::debug!("Completed cycle {cycle}");
    }

    log::info!("{relay} passed {cycle} cycles");
    Ok(())
}
