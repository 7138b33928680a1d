use std::process::ExitCode;

use flowsim_engine::{run_headless, run_windowed, MetricsHandle};
use tracing::{error, info};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        client,
        mut session,
    } = app;

    if let Err(err) = session.connect() {
        error!(error = %err, server = %client.server_addr, "connect_failed");
        return ExitCode::FAILURE;
    }

    if client.headless {
        let stats = run_headless(config, &mut session, client.run_for, MetricsHandle::default());
        info!(ticks = stats.ticks, "headless_finished");
        return ExitCode::SUCCESS;
    }

    if let Err(err) = run_windowed(config, session) {
        error!(error = %err, "startup_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
