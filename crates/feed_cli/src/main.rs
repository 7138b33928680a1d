use std::env;
use std::io;
use std::process::ExitCode;

use feed_cli::{serve, ServeOptions};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print!("{}", usage_text());
        return Ok(());
    }
    if args[0] != "serve" {
        return Err(format!("unknown subcommand '{}'\n{}", args[0], usage_text()));
    }

    let mut options = ServeOptions::default();
    let mut index = 1usize;
    while index < args.len() {
        match args[index].as_str() {
            "--port" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --port".to_string())?;
                options.port = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid --port value '{value}' (expected u16)"))?;
                index += 2;
            }
            "--script" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --script".to_string())?;
                options.script = Some(value.clone());
                index += 2;
            }
            "--interval-ms" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --interval-ms".to_string())?;
                options.interval_ms = value.parse::<u64>().map_err(|_| {
                    format!("invalid --interval-ms value '{value}' (expected u64)")
                })?;
                index += 2;
            }
            "--echo" => {
                options.echo = true;
                index += 1;
            }
            other => return Err(format!("unknown argument '{other}'\n{}", usage_text())),
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serve(&options, &mut out)
}

fn usage_text() -> String {
    [
        "usage: feed_cli serve [--port <u16>] [--script <path>] [--interval-ms <u64>] [--echo]",
        "",
        "Stands in for the workflow server: accepts one client, prints its handshake,",
        "then streams the script's JSON lines to it.",
        "",
        "script format: one JSON object or `sleep <ms>` per line, `#` starts a comment",
        "--echo answers {\"id\"} messages for scripted activities and stages",
        "",
    ]
    .join("\n")
}
