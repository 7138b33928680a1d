use flowsim_engine::{Connection, HeadlessPresenter, LoopConfig, Session};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::config::{ClientConfig, ConfigError, LaunchRequest, USAGE};
use super::tcp_transport::TcpLineTransport;

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) client: ClientConfig,
    pub(crate) session: Session<HeadlessPresenter>,
}

/// Reads configuration and builds the session. `Ok(None)` means help was
/// printed and there is nothing to run.
pub(crate) fn build_app(args: &[String]) -> Result<Option<AppWiring>, ConfigError> {
    init_tracing();
    info!("=== Flowsim Startup ===");

    let client = match ClientConfig::load(args, |key| std::env::var(key).ok())? {
        LaunchRequest::Run(client) => client,
        LaunchRequest::PrintHelp => {
            println!("{USAGE}");
            return Ok(None);
        }
    };
    info!(
        mode = %client.mode,
        server = %client.server_addr,
        headless = client.headless,
        seed = client.seed,
        run_for_ms = client.run_for.map(|limit| limit.as_millis() as u64),
        "client_config"
    );

    let transport = TcpLineTransport::new(client.server_addr.clone());
    let connection = Connection::new(Box::new(transport), client.handshake());
    let session = Session::new(
        client.mode.build(client.seed),
        HeadlessPresenter::new(),
        connection,
    );

    Ok(Some(AppWiring {
        config: LoopConfig::default(),
        client,
        session,
    }))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

pub(crate) fn usage() -> &'static str {
    USAGE
}
