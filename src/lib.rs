pub mod config;
pub mod error;
pub mod family;
pub mod inverter;
pub mod options;
pub mod prelude;
pub mod protocol;
pub mod sensor;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::config::Config;
use crate::options::{Command, Options};
use crate::prelude::*;

use std::io::Write;

fn init_logging(filter: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
    if let Err(e) = result {
        eprintln!("logger already initialised: {}", e);
    }
}

#[derive(serde::Serialize)]
struct Report<'a, T> {
    host: &'a str,
    data: &'a T,
}

fn print_json<T: serde::Serialize>(host: &str, data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&Report { host, data })?);
    Ok(())
}

async fn run_command(inverter: &mut Inverter, host: &str, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Runtime { unknown } => {
            // narrows the sensor table to the detected model
            inverter.read_device_info().await?;
            print_json(host, &inverter.read_runtime_data(*unknown).await?)
        }
        Command::Info => print_json(host, inverter.read_device_info().await?),
        Command::Settings => print_json(host, &inverter.read_settings_data().await?),
        Command::ReadSetting { id } => print_json(host, &inverter.read_setting(id).await?),
        Command::WriteSetting { id, value } => {
            let value = inverter.parse_setting(id, value)?;
            inverter.write_setting(id, &value).await?;
            info!("{}: {} set to {}", host, id, value);
            Ok(())
        }
    }
}

async fn run_inverter(entry: &config::Inverter, command: &Command) -> anyhow::Result<()> {
    let mut inverter = Inverter::connect(
        entry.host(),
        entry.port(),
        entry.family().build(),
        entry.comm_addr(),
        entry.timeout(),
        entry.retries(),
    )
    .await?;
    run_command(&mut inverter, entry.host(), command).await
}

pub async fn app(options: Options) -> anyhow::Result<()> {
    let config = Config::new(options.config_file.clone())?;

    init_logging(config.loglevel());
    info!(
        "goodwe-udp {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    let mut failed = 0;
    for entry in config.enabled_inverters() {
        if let Err(e) = run_inverter(entry, &options.command).await {
            error!("{}: {:#}", entry.host(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} inverter(s) failed", failed);
    }
    Ok(())
}
