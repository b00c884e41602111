use clap::Parser;
use http_request_mock::{
    server::{start_proxy_server, ProxyServerConfig},
    HyperHttpClient, Mocker, MockerConfig,
};
use std::{path::PathBuf, process::exit, sync::Arc};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Holds command line parameters provided by the user.
#[derive(Parser, Debug)]
#[command(
    name = "http-request-mock",
    version,
    about = "Companion proxy server answering rewritten requests from mock files"
)]
pub struct ExecutionParameters {
    #[arg(short, long, env = "HRM_PORT", default_value = "9001")]
    pub port: u16,

    #[arg(short, long, env = "HRM_EXPOSE")]
    pub expose: bool,

    /// Directory containing YAML or JSON mock files.
    #[arg(short, long, env = "HRM_MOCK_DIR")]
    pub mock_dir: Option<PathBuf>,

    #[arg(long, env = "HRM_LOG", action = clap::ArgAction::Set, default_value_t = true)]
    pub log: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("http_request_mock=info")),
        )
        .init();

    let params: ExecutionParameters = ExecutionParameters::parse();

    tracing::info!(
        "Starting {} server V{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("{:?}", params);

    // The proxy server answers requests itself, so it never rewrites or notifies.
    let mocker = Arc::new(Mocker::new(MockerConfig::new().log(params.log)));

    if let Some(dir) = &params.mock_dir {
        match mocker.load_mock_files(dir) {
            Ok(count) => tracing::info!("Registered {} mock rules", count),
            Err(err) => {
                tracing::error!("Cannot load mock files: {}", err);
                exit(1);
            }
        }
    }

    let config = ProxyServerConfig {
        static_port: Some(params.port),
        expose: params.expose,
    };

    let result = start_proxy_server(
        config,
        mocker,
        Arc::new(HyperHttpClient::new()),
        None,
        async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", err);
            }
        },
    )
    .await;

    if let Err(err) = result {
        tracing::error!("{}", err);
        exit(1);
    }
}
