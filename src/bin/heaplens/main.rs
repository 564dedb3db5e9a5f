use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod cmd_demo;
mod cmd_info;
mod cmd_inspect;
mod cmd_scan;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./heaplens scan crash.img
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Info { image, json } =>
            cmd_info::exec(image, json),

        cli::Cmd::Scan { image, json } =>
            cmd_scan::exec(image, json),

        cli::Cmd::Inspect { image } =>
            cmd_inspect::exec(image),

        cli::Cmd::Demo { out, threads, dangling } =>
            cmd_demo::exec(out, threads, dangling),
    }
}
