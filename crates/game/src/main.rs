use std::process::ExitCode;

use tracing::error;

mod app;

fn main() -> ExitCode {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    match app::bootstrap::build_app(&args) {
        Ok(Some(wiring)) => app::loop_runner::run(wiring),
        Ok(None) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "config_invalid");
            eprintln!("{err}\n\n{}", app::bootstrap::usage());
            ExitCode::from(2)
        }
    }
}
