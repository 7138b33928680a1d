use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flowsim_engine::{Handshake, ModeKind, ModeParseError};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub(crate) const CONFIG_FILE_ENV_VAR: &str = "FLOWSIM_CONFIG";
const MODE_ENV_VAR: &str = "FLOWSIM_MODE";
const SERVER_ENV_VAR: &str = "FLOWSIM_SERVER";
const TIMEOUT_ENV_VAR: &str = "FLOWSIM_TIMEOUT_SECS";
const WORKFLOWS_ENV_VAR: &str = "FLOWSIM_WORKFLOWS";
const INCLUDED_ENV_VAR: &str = "FLOWSIM_INCLUDED";
const SEED_ENV_VAR: &str = "FLOWSIM_SEED";

pub(crate) const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:46100";
const DEFAULT_SEED: u64 = 7;

pub(crate) const USAGE: &str = "\
usage: flowsim [options]

options:
  --mode <space|fps>       world mode (default space)
  --server <host:port>     workflow server address (default 127.0.0.1:46100)
  --timeout-secs <secs>    handshake timeout in seconds (default 20)
  --workflows <names>      workflow names to subscribe to
  --included <true|false>  handshake 'included' flag
  --headless               run without a window
  --run-for-secs <secs>    stop after this many seconds (headless)
  --seed <n>               placement seed
  -h, --help               print this help

environment: FLOWSIM_CONFIG (json file), FLOWSIM_MODE, FLOWSIM_SERVER,
FLOWSIM_TIMEOUT_SECS, FLOWSIM_WORKFLOWS, FLOWSIM_INCLUDED, FLOWSIM_SEED";

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path} at {location}: {source}")]
    ParseFile {
        path: PathBuf,
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid mode in {origin}: {source}")]
    InvalidMode {
        origin: String,
        #[source]
        source: ModeParseError,
    },
    #[error("missing value for {flag}")]
    MissingValue { flag: String },
    #[error("invalid {flag} value '{value}' (expected {expected})")]
    InvalidValue {
        flag: String,
        value: String,
        expected: &'static str,
    },
    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LaunchRequest {
    Run(ClientConfig),
    PrintHelp,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClientConfig {
    pub(crate) mode: ModeKind,
    pub(crate) server_addr: String,
    pub(crate) timeout_seconds: Option<f64>,
    pub(crate) included: Option<bool>,
    pub(crate) workflow_names: Option<String>,
    pub(crate) headless: bool,
    pub(crate) run_for: Option<Duration>,
    pub(crate) seed: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: ModeKind::Space,
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            timeout_seconds: None,
            included: None,
            workflow_names: None,
            headless: false,
            run_for: None,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    mode: Option<String>,
    server: Option<String>,
    timeout_secs: Option<f64>,
    workflows: Option<String>,
    included: Option<bool>,
    headless: Option<bool>,
    run_for_secs: Option<f64>,
    seed: Option<u64>,
}

impl ClientConfig {
    /// Defaults, then the JSON file named by `FLOWSIM_CONFIG`, then the other
    /// env vars, then `args`.
    pub(crate) fn load(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<LaunchRequest, ConfigError> {
        let mut config = ClientConfig::default();
        if let Some(path) = env(CONFIG_FILE_ENV_VAR).filter(|value| !value.trim().is_empty()) {
            config.apply_file(Path::new(path.trim()))?;
        }
        config.apply_env(&env);
        config.apply_args(args)
    }

    pub(crate) fn handshake(&self) -> Handshake {
        Handshake::new(
            self.timeout_seconds,
            self.included,
            self.workflow_names.clone(),
        )
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut deserializer = serde_json::Deserializer::from_str(&raw);
        let file = serde_path_to_error::deserialize::<_, FileConfig>(&mut deserializer).map_err(
            |error| ConfigError::ParseFile {
                path: path.to_path_buf(),
                location: error.path().to_string(),
                source: error.into_inner(),
            },
        )?;

        if let Some(mode) = file.mode {
            self.mode = mode.parse().map_err(|source| ConfigError::InvalidMode {
                origin: path.display().to_string(),
                source,
            })?;
        }
        if let Some(server) = file.server {
            self.server_addr = server;
        }
        if file.timeout_secs.is_some() {
            self.timeout_seconds = file.timeout_secs;
        }
        if file.workflows.is_some() {
            self.workflow_names = file.workflows;
        }
        if file.included.is_some() {
            self.included = file.included;
        }
        if let Some(headless) = file.headless {
            self.headless = headless;
        }
        if let Some(seconds) = file.run_for_secs {
            self.run_for = Some(positive_duration("run_for_secs", &seconds.to_string())?);
        }
        if let Some(seed) = file.seed {
            self.seed = seed;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(raw) = env(MODE_ENV_VAR) {
            match raw.parse::<ModeKind>() {
                Ok(mode) => self.mode = mode,
                Err(_) => warn_invalid_env(MODE_ENV_VAR, &raw),
            }
        }
        if let Some(raw) = env(SERVER_ENV_VAR) {
            if raw.trim().is_empty() {
                warn_invalid_env(SERVER_ENV_VAR, &raw);
            } else {
                self.server_addr = raw.trim().to_string();
            }
        }
        if let Some(raw) = env(TIMEOUT_ENV_VAR) {
            match raw.trim().parse::<f64>() {
                Ok(seconds) => self.timeout_seconds = Some(seconds),
                Err(_) => warn_invalid_env(TIMEOUT_ENV_VAR, &raw),
            }
        }
        if let Some(raw) = env(WORKFLOWS_ENV_VAR) {
            self.workflow_names = Some(raw);
        }
        if let Some(raw) = env(INCLUDED_ENV_VAR) {
            match parse_bool(&raw) {
                Some(included) => self.included = Some(included),
                None => warn_invalid_env(INCLUDED_ENV_VAR, &raw),
            }
        }
        if let Some(raw) = env(SEED_ENV_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.seed = seed,
                Err(_) => warn_invalid_env(SEED_ENV_VAR, &raw),
            }
        }
    }

    fn apply_args(mut self, args: &[String]) -> Result<LaunchRequest, ConfigError> {
        let mut index = 0usize;
        while index < args.len() {
            let flag = args[index].as_str();
            match flag {
                "-h" | "--help" => return Ok(LaunchRequest::PrintHelp),
                "--headless" => {
                    self.headless = true;
                    index += 1;
                    continue;
                }
                _ => {}
            }

            let value = args
                .get(index + 1)
                .ok_or_else(|| ConfigError::MissingValue {
                    flag: flag.to_string(),
                })?;
            match flag {
                "--mode" => {
                    self.mode = value.parse().map_err(|source| ConfigError::InvalidMode {
                        origin: "--mode".to_string(),
                        source,
                    })?;
                }
                "--server" => self.server_addr = value.clone(),
                "--timeout-secs" => {
                    let seconds = value.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                        flag: flag.to_string(),
                        value: value.clone(),
                        expected: "seconds",
                    })?;
                    self.timeout_seconds = Some(seconds);
                }
                "--workflows" => self.workflow_names = Some(value.clone()),
                "--included" => {
                    let included = parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                        flag: flag.to_string(),
                        value: value.clone(),
                        expected: "true or false",
                    })?;
                    self.included = Some(included);
                }
                "--run-for-secs" => self.run_for = Some(positive_duration(flag, value)?),
                "--seed" => {
                    self.seed = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                        flag: flag.to_string(),
                        value: value.clone(),
                        expected: "u64",
                    })?;
                }
                _ => return Err(ConfigError::UnknownArgument(flag.to_string())),
            }
            index += 2;
        }
        Ok(LaunchRequest::Run(self))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn positive_duration(flag: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
            expected: "positive seconds",
        })
}

fn warn_invalid_env(env_var: &'static str, value: &str) {
    warn!(env_var, value, "invalid env var value; keeping previous setting");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    fn run_config(request: LaunchRequest) -> ClientConfig {
        match request {
            LaunchRequest::Run(config) => config,
            LaunchRequest::PrintHelp => panic!("expected run request"),
        }
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = run_config(ClientConfig::load(&[], env_from(&[])).expect("load"));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.handshake().timeout, 20_000);
    }

    #[test]
    fn cli_overrides_env_which_overrides_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("flowsim.json");
        fs::write(
            &path,
            r#"{ "mode": "fps", "server": "10.0.0.1:9000", "seed": 3, "workflows": "Claims" }"#,
        )
        .expect("write config");
        let path_text = path.display().to_string();

        let env = env_from(&[
            (CONFIG_FILE_ENV_VAR, path_text.as_str()),
            (SERVER_ENV_VAR, "10.0.0.2:9000"),
            (SEED_ENV_VAR, "11"),
        ]);
        let config = run_config(
            ClientConfig::load(&args(&["--seed", "99", "--headless"]), env).expect("load"),
        );

        assert_eq!(config.mode, ModeKind::Fps);
        assert_eq!(config.server_addr, "10.0.0.2:9000");
        assert_eq!(config.seed, 99);
        assert_eq!(config.workflow_names.as_deref(), Some("Claims"));
        assert!(config.headless);
    }

    #[test]
    fn invalid_env_values_fall_back() {
        let env = env_from(&[
            (MODE_ENV_VAR, "racing"),
            (TIMEOUT_ENV_VAR, "soon"),
            (INCLUDED_ENV_VAR, "maybe"),
        ]);
        let config = run_config(ClientConfig::load(&[], env).expect("load"));
        assert_eq!(config.mode, ModeKind::Space);
        assert_eq!(config.timeout_seconds, None);
        assert_eq!(config.included, None);
    }

    #[test]
    fn invalid_cli_values_are_errors() {
        let result = ClientConfig::load(&args(&["--mode", "racing"]), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::InvalidMode { .. })));

        let result = ClientConfig::load(&args(&["--run-for-secs", "0"]), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = ClientConfig::load(&args(&["--seed"]), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingValue { .. })));

        let result = ClientConfig::load(&args(&["--turbo"]), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingValue { .. })));

        let result = ClientConfig::load(&args(&["--turbo", "on"]), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::UnknownArgument(_))));
    }

    #[test]
    fn file_errors_report_field_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("flowsim.json");
        fs::write(&path, r#"{ "seed": "many" }"#).expect("write config");
        let path_text = path.display().to_string();

        let result = ClientConfig::load(
            &[],
            env_from(&[(CONFIG_FILE_ENV_VAR, path_text.as_str())]),
        );
        match result {
            Err(ConfigError::ParseFile { location, .. }) => assert_eq!(location, "seed"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn handshake_reflects_config() {
        let config = run_config(
            ClientConfig::load(
                &args(&["--timeout-secs", "2.5", "--included", "false", "--workflows", "A,B"]),
                env_from(&[]),
            )
            .expect("load"),
        );
        let handshake = config.handshake();
        assert_eq!(handshake.timeout, 2_500);
        assert_eq!(handshake.included, Some(false));
        assert_eq!(handshake.workflow_names.as_deref(), Some("A,B"));
    }

    #[test]
    fn help_flag_short_circuits() {
        let request = ClientConfig::load(&args(&["--mode", "fps", "--help"]), env_from(&[]));
        assert!(matches!(request, Ok(LaunchRequest::PrintHelp)));
    }
}
