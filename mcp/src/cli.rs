use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use grafana_mcp_api::settings::{DEFAULT_ADDRESS, DEFAULT_STREAMABLE_PATH};
use grafana_mcp_core::config::ConfigLayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Sse,
    StreamableHttp,
}

#[derive(Parser, Debug)]
#[command(
    name = "mcp-grafana",
    version,
    about = "Model Context Protocol server for Grafana"
)]
pub struct Cli {
    /// Transport to serve
    #[arg(short, long, env = "TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Listen address for the HTTP transports
    #[arg(long, env = "APP_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Path prefix for every HTTP route
    #[arg(long, env = "BASE_PATH", default_value = "")]
    pub base_path: String,

    /// Streamable HTTP endpoint; relative values are joined under the base path
    #[arg(long, env = "STREAMABLE_HTTP_PATH", default_value = DEFAULT_STREAMABLE_PATH)]
    pub streamable_http_path: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Include internal error detail in tool errors
    #[arg(long)]
    pub debug: bool,

    /// Run the connectivity checks, print the report and exit
    #[arg(long)]
    pub check_connection: bool,

    /// Require a reachable, authenticated Grafana before serving (default)
    #[arg(long, overrides_with = "no_require_grafana")]
    pub require_grafana: bool,

    /// Serve even if Grafana cannot be reached
    #[arg(long, overrides_with = "require_grafana")]
    pub no_require_grafana: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub ignore_ssl: bool,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[arg(long = "GRAFANA_URL", value_name = "URL")]
    pub grafana_url: Option<String>,

    #[arg(long = "GRAFANA_SERVICE_ACCOUNT_TOKEN", value_name = "TOKEN")]
    pub service_account_token: Option<String>,

    #[arg(long = "GRAFANA_API_KEY", value_name = "KEY")]
    pub api_key: Option<String>,

    #[arg(long = "GRAFANA_USERNAME")]
    pub username: Option<String>,

    #[arg(long = "GRAFANA_PASSWORD")]
    pub password: Option<String>,

    #[arg(long = "GRAFANA_ACCESS_TOKEN", value_name = "TOKEN")]
    pub access_token: Option<String>,

    #[arg(long = "GRAFANA_ID_TOKEN", value_name = "TOKEN")]
    pub id_token: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub tls_cert_file: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub tls_key_file: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub tls_ca_file: Option<String>,
}

impl Cli {
    pub fn require_grafana(&self) -> bool {
        !self.no_require_grafana
    }

    /// The command-line configuration layer. Never merged with the
    /// environment layer so precedence is kept per request.
    pub fn config_layer(&self) -> ConfigLayer {
        let clean = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        ConfigLayer {
            url: clean(&self.grafana_url),
            service_account_token: clean(&self.service_account_token),
            api_key: clean(&self.api_key),
            username: clean(&self.username),
            password: clean(&self.password),
            access_token: clean(&self.access_token),
            id_token: clean(&self.id_token),
            tls_cert_file: clean(&self.tls_cert_file),
            tls_key_file: clean(&self.tls_key_file),
            tls_ca_file: clean(&self.tls_ca_file),
            tls_skip_verify: self.ignore_ssl.then_some(true),
        }
    }
}

/// Find `--env-file` before clap runs, so the file can feed `env` defaults.
pub fn env_file_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--env-file" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--env-file=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}
