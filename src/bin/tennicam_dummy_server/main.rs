//! Publishes fake tennicam frames on the server address of the driver
//! configuration, so that `tennicam serve` can run without cameras.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::{error::Error, io::Write, path::PathBuf, process::ExitCode, thread, time::Duration};

use tennicam_client::{
    args::DummyServerArgs,
    cancel::{install_interrupt_handler, CancellationToken},
    driver_config::{default_config_file, DriverConfig},
    dummy_server::DummyServer,
};

fn run(args: DummyServerArgs) -> Result<(), Box<dyn Error>> {
    if args.period_ms == 0 {
        return Err("period should be at least 1 ms".into());
    }
    let path: PathBuf = args.config.unwrap_or_else(default_config_file);
    let config = DriverConfig::from_file(&path)?;
    info!("using configuration {}", path.display());

    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;

    let mut server = DummyServer::start(config.url(), Duration::from_millis(args.period_ms))?;
    server.set_noise(args.noise);
    server.set_dropout(args.dropout);

    while !token.is_cancelled() {
        thread::sleep(Duration::from_millis(10));
    }
    server.stop();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[tennicam_dummy_server | {} {}] {}",
                record.level(),
                buf.timestamp_seconds(),
                record.args()
            )
        })
        .init();

    match run(DummyServerArgs::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
