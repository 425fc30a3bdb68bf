#![allow(missing_docs)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use common::config::{SysqConfig, load_yaml_file};
use common::facade::TargetReport;
use common::facade::directory::list_directory;
use common::facade::folders::query_folders;
use common::facade::services::query_services_batch;
use common::facade::sessions::query_sessions_batch;
use common::native::platform;
use common::resolve::{DnsResolver, HostResolver};
use common::telemetry::{LogFormat, init_telemetry};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "sysq", version, about = "Windows 原生系统信息查询")]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// json or text; filter directives come from SYSQ_LOG.
    #[arg(long = "log-format", default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sessions opened against each host.
    Sessions {
        #[arg(long = "host")]
        hosts: Vec<String>,

        /// 10 or 502.
        #[arg(long = "level")]
        level: Option<u32>,

        #[arg(long = "no-resolve")]
        no_resolve: bool,
    },

    /// Long-path directory listing.
    Dir {
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,

        #[arg(long = "depth")]
        depth: Option<u32>,

        #[arg(long = "hidden")]
        hidden: bool,
    },

    /// Known folder paths for the current user.
    Folders {
        #[arg(long = "name")]
        names: Vec<String>,
    },

    /// Service status and configuration.
    Services {
        #[arg(long = "host")]
        hosts: Vec<String>,

        #[arg(long = "name")]
        names: Vec<String>,

        #[arg(long = "drivers")]
        drivers: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    init_telemetry(cli.log_format).map_err(|e| format!("初始化日志失败: {e}"))?;

    let mut cfg = match cli.config.as_deref() {
        Some(path) => load_yaml_file(path)
            .map_err(|e| format!("加载配置失败（{}）: {e}", path.display()))?,
        None => SysqConfig::default(),
    };
    apply_overrides(&mut cfg, &cli.command);
    cfg.validate().map_err(|e| format!("配置校验失败: {e}"))?;

    let native = platform().map_err(|e| format!("初始化原生层失败: {e}"))?;
    tracing::info!(command = ?cli.command, "sysq started");

    match &cli.command {
        Command::Sessions { .. } => {
            let level = cfg
                .sessions
                .session_level()
                .map_err(|e| e.to_string())?;
            let mut dns = DnsResolver::new();
            let resolver: Option<&mut dyn HostResolver> = if cfg.sessions.resolve_hosts {
                Some(&mut dns)
            } else {
                None
            };
            print_json(&query_sessions_batch(&native, &cfg.targets.hosts, level, resolver))
        }
        Command::Dir { paths, .. } => {
            let options = cfg.directory.options();
            let reports: Vec<_> = paths
                .iter()
                .map(|path| {
                    let target = path.display().to_string();
                    let outcome = list_directory(&native, &target, &options);
                    if let Err(err) = &outcome {
                        tracing::warn!(
                            path = %target,
                            code = %err.code(),
                            error = %err,
                            "directory listing failed"
                        );
                    }
                    TargetReport { target, outcome }
                })
                .collect();
            print_json(&reports)
        }
        Command::Folders { .. } => print_json(&query_folders(&native, &cfg.folders.names)),
        Command::Services { .. } => {
            let options = cfg.services.options();
            print_json(&query_services_batch(&native, &cfg.targets.hosts, &options))
        }
    }
}

/// Command-line values win over the configuration file.
fn apply_overrides(cfg: &mut SysqConfig, command: &Command) {
    match command {
        Command::Sessions {
            hosts,
            level,
            no_resolve,
        } => {
            if !hosts.is_empty() {
                cfg.targets.hosts.clone_from(hosts);
            }
            if let Some(level) = level {
                cfg.sessions.level = *level;
            }
            if *no_resolve {
                cfg.sessions.resolve_hosts = false;
            }
        }
        Command::Dir { depth, hidden, .. } => {
            if let Some(depth) = depth {
                cfg.directory.max_depth = *depth;
            }
            if *hidden {
                cfg.directory.include_hidden = true;
            }
        }
        Command::Folders { names } => {
            if !names.is_empty() {
                cfg.folders.names.clone_from(names);
            }
        }
        Command::Services {
            hosts,
            names,
            drivers,
        } => {
            if !hosts.is_empty() {
                cfg.targets.hosts.clone_from(hosts);
            }
            if !names.is_empty() {
                cfg.services.names.clone_from(names);
            }
            if *drivers {
                cfg.services.include_drivers = true;
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| format!("序列化结果失败: {e}"))?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use common::config::SysqConfig;
    use common::telemetry::LogFormat;

    use super::{Cli, Command, apply_overrides};

    #[test]
    fn flags_override_file_values() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from([
            "sysq",
            "sessions",
            "--host",
            "srv01",
            "--host",
            "srv02",
            "--level",
            "502",
            "--no-resolve",
        ])?;
        let mut cfg = SysqConfig::default();
        cfg.targets.hosts = vec!["old".to_string()];
        apply_overrides(&mut cfg, &cli.command);
        assert_eq!(cfg.targets.hosts, ["srv01", "srv02"]);
        assert_eq!(cfg.sessions.level, 502);
        assert!(!cfg.sessions.resolve_hosts);
        Ok(())
    }

    #[test]
    fn dir_requires_a_path() {
        assert!(Cli::try_parse_from(["sysq", "dir"]).is_err());
        let cli = Cli::try_parse_from([
            "sysq", "--config", "a.yml", "dir", "--path", "C:\\x", "--depth", "3",
        ]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Command::Dir { depth: Some(3), .. })
        ));
    }

    #[test]
    fn log_format_defaults_to_json() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(["sysq", "folders"])?;
        assert_eq!(cli.log_format, LogFormat::Json);
        let cli = Cli::try_parse_from(["sysq", "--log-format", "text", "folders"])?;
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(Cli::try_parse_from(["sysq", "--log-format", "xml", "folders"]).is_err());
        Ok(())
    }
}
