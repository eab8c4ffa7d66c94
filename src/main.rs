mod backoff;
mod broker;
mod config;
mod engine;
mod err;
mod future;
mod listener;
mod logging;
mod opt;
mod pid;
mod relay;
mod settings;
mod shutdown;
mod signal;
mod tcp;

use engine::Engine;
use pid::PidFile;
use settings::Settings;
use std::future::Future;
use std::io;

fn main() -> Result<(), err::DisplayError> {
    block_on(run())?
}

/// Runs `future` to completion on a fresh runtime. Blocking tasks still running
/// afterwards get at most `RUNTIME_SHUTDOWN_TIMEOUT` before they are abandoned.
fn block_on<F: Future>(future: F) -> Result<F::Output, io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(config::RUNTIME_SHUTDOWN_TIMEOUT);
    Ok(output)
}

async fn run() -> Result<(), err::DisplayError> {
    let opt::Options {
        config,
        verbose,
        test,
    } = clap::Parser::parse();

    let settings = Settings::load(&config)?;

    if test {
        println!("Configuration OK: {}", config.display());
        return Ok(());
    }

    let log_file = logging::init(&settings, verbose)?;
    let pid_file = match PidFile::create(&settings.pidfile) {
        Ok(pid_file) => pid_file,
        Err(e) => {
            log::error!("{}", e);
            return Err(e.into());
        }
    };

    log::info!("Starting pfwd {}", env!("CARGO_PKG_VERSION"));
    log::info!("Config file: {}", config.display());
    log::info!("Pid file: {}", pid_file.path().display());
    log::info!("Log file: {}", log_file.display());
    log::info!("Log level: {}", log::max_level());
    log::info!("Grace period: {:?}", settings.grace_period);
    for rule in &settings.forwards {
        log::info!("Forward: {} -> {}", rule.listen, rule.destination);
    }

    let engine = match Engine::start(settings.forwards, settings.grace_period).await {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{}", e);
            remove_pid_file(pid_file);
            return Err(e.into());
        }
    };
    log::info!(
        "pfwd running with pid {} ({} listeners)",
        std::process::id(),
        engine.local_addrs().len()
    );

    signal::terminated().await?;
    engine.request_shutdown().await;
    remove_pid_file(pid_file);
    log::info!("Shutdown completed");

    Ok(())
}

fn remove_pid_file(pid_file: PidFile) {
    if let Err(e) = pid_file.remove() {
        log::error!("{}", e);
        eprintln!("{}", e);
    }
}
