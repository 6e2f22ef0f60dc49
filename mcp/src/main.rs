use std::path::Path;

use clap::Parser;
use grafana_mcp_core::error::exit;

mod cli;
mod logging;
mod startup;

use cli::{Cli, env_file_arg};

fn load_env_file(explicit: Option<&Path>) -> Result<(), String> {
    match explicit {
        Some(path) => dotenvy::from_path(path)
            .map(|_| ())
            .map_err(|err| format!("cannot load env file {}: {err}", path.display())),
        None => {
            let _ = dotenvy::dotenv();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(message) = load_env_file(env_file_arg(&args).as_deref()) {
        eprintln!("{message}");
        std::process::exit(exit::CONFIG_ERROR);
    }

    let cli = Cli::parse_from(&args);
    if let Err(err) = logging::init(&cli.log_level) {
        eprintln!("{err}");
        std::process::exit(exit::CONFIG_ERROR);
    }

    let code = startup::run(cli).await;
    std::process::exit(code);
}
