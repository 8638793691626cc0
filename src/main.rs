use clap::Parser as _;
use remko_smt_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Watch(commands::watch::Args),
    Write(commands::write::Args),
    Timeprogram(commands::timeprogram::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description =
        std::env::var("REMKO_SMT_TOOLS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .expect("REMKO_SMT_TOOLS_LOG must be a valid tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Watch(args) => end(commands::watch::run(args)),
        Commands::Write(args) => end(commands::write::run(args)),
        Commands::Timeprogram(args) => end(commands::timeprogram::run(args)),
    }
}
