//! CLI surface and dispatch configuration

use crate::dispatch::Strategy;
use crate::error::ConfigError;
use crate::fleet::{HostFileSource, HostListSource, WorkerSource};
use crate::runner::MAX_POOL_SIZE;
use clap::Parser;
use std::path::PathBuf;

const EXAMPLES: &str = "\
EXAMPLES:
    # Kernel version across a fleet listed inline
    fleet-exec --hosts 'web1 web2 web3' --cmd 'uname -r' -v

    # Restart a service on hosts from a file, one at a time, stop on failure
    fleet-exec --file prod-hosts.txt --cmd 'systemctl restart nginx' --serial --sudo

    # Grep processes on workers 2 and 4 only
    fleet-exec --file prod-hosts.txt -w 2,4 --ps java
";

/// Run one shell command across a fleet of remote workers
#[derive(Parser, Debug)]
#[command(name = "fleet-exec", version, about, after_help = EXAMPLES)]
pub struct CliArgs {
    /// Whitespace-separated list of hostnames
    #[arg(long, conflicts_with = "file")]
    pub hosts: Option<String>,

    /// File with one hostname per line ('#' comments and blanks skipped)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Restrict to these 1-based worker indexes, e.g. "2,4"
    #[arg(short = 'w', long = "workers", default_value = "")]
    pub workers: String,

    /// The shell command to run on each worker
    #[arg(long)]
    pub cmd: Option<String>,

    /// Shortcut: grep the process table for this pattern
    #[arg(long, conflicts_with = "cmd")]
    pub ps: Option<String>,

    /// SSH login name (defaults to the local user)
    #[arg(long)]
    pub user: Option<String>,

    /// SSH private key file
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Run the command under sudo; prompts once for the password
    #[arg(long)]
    pub sudo: bool,

    /// One worker at a time, stopping at the first failure
    #[arg(long, conflicts_with = "no_wait")]
    pub serial: bool,

    /// Print results as workers finish instead of in fleet order
    #[arg(long = "no-wait")]
    pub no_wait: bool,

    /// Suppress per-task progress lines
    #[arg(short, long)]
    pub quiet: bool,

    /// Treat a non-zero remote exit status as a failure
    #[arg(long)]
    pub check: bool,

    /// SSH connect timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Concurrent connections (defaults to the fleet size)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Print a progress line every N finished tasks
    #[arg(long, default_value_t = 1)]
    pub tasks_per_print: u64,

    /// Minimum milliseconds between progress lines (0 = no gate)
    #[arg(long, default_value_t = 0)]
    pub millis_per_print: i64,

    /// Print each worker's output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated dispatch settings derived from the CLI
#[derive(Debug)]
pub struct DispatchConfig {
    pub command: String,
    pub strategy: Strategy,
    pub worker_filter: String,
    pub user: Option<String>,
    pub key: Option<PathBuf>,
    pub sudo: bool,
    pub check_exit_status: bool,
    pub connect_timeout_secs: u64,
    pub pool_size: Option<usize>,
    pub tasks_per_print: u64,
    pub millis_per_print: i64,
    pub quiet: bool,
    pub verbose: bool,
    selector: Selector,
}

#[derive(Debug)]
enum Selector {
    Hosts(String),
    File(PathBuf),
}

impl DispatchConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let selector = match (&args.hosts, &args.file) {
            (Some(hosts), _) => Selector::Hosts(hosts.clone()),
            (None, Some(file)) => Selector::File(file.clone()),
            (None, None) => return Err(ConfigError::MissingSelector),
        };

        let command = match (&args.cmd, &args.ps) {
            (Some(cmd), _) => cmd.clone(),
            (None, Some(pattern)) => {
                format!("ps aux | grep {} | grep -v grep", pattern)
            }
            (None, None) => return Err(ConfigError::MissingCommand),
        };

        if let Some(size) = args.pool_size {
            if size == 0 || size > MAX_POOL_SIZE {
                return Err(ConfigError::InvalidPoolSize {
                    size,
                    max: MAX_POOL_SIZE,
                });
            }
        }
        if args.tasks_per_print == 0 {
            return Err(ConfigError::InvalidPrintCadence {
                tasks_per_print: args.tasks_per_print,
            });
        }
        if args.millis_per_print < 0 {
            return Err(ConfigError::InvalidPrintInterval {
                millis: args.millis_per_print,
            });
        }

        let strategy = if args.serial {
            Strategy::Serial
        } else if args.no_wait {
            Strategy::NoWait
        } else {
            Strategy::Ordered
        };

        Ok(Self {
            command,
            strategy,
            worker_filter: args.workers.clone(),
            user: args.user.clone(),
            key: args.key.clone(),
            sudo: args.sudo,
            check_exit_status: args.check,
            connect_timeout_secs: args.timeout,
            pool_size: args.pool_size,
            tasks_per_print: args.tasks_per_print,
            millis_per_print: args.millis_per_print,
            quiet: args.quiet,
            verbose: args.verbose,
            selector,
        })
    }

    pub fn worker_source(&self) -> Box<dyn WorkerSource> {
        match &self.selector {
            Selector::Hosts(hosts) => Box::new(HostListSource::new(hosts.clone())),
            Selector::File(path) => Box::new(HostFileSource::new(path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_ps_becomes_grep_pipeline() {
        let args = parse(&["fleet-exec", "--hosts", "a b", "--ps", "java"]);
        let config = DispatchConfig::from_args(&args).unwrap();
        assert_eq!(config.command, "ps aux | grep java | grep -v grep");
    }

    #[test]
    fn test_strategy_selection() {
        let args = parse(&["fleet-exec", "--hosts", "a", "--cmd", "id", "--serial"]);
        let config = DispatchConfig::from_args(&args).unwrap();
        assert_eq!(config.strategy, Strategy::Serial);

        let args = parse(&["fleet-exec", "--hosts", "a", "--cmd", "id", "--no-wait"]);
        let config = DispatchConfig::from_args(&args).unwrap();
        assert_eq!(config.strategy, Strategy::NoWait);

        let args = parse(&["fleet-exec", "--hosts", "a", "--cmd", "id"]);
        let config = DispatchConfig::from_args(&args).unwrap();
        assert_eq!(config.strategy, Strategy::Ordered);
    }

    #[test]
    fn test_missing_selector() {
        let args = parse(&["fleet-exec", "--cmd", "id"]);
        assert!(matches!(
            DispatchConfig::from_args(&args),
            Err(ConfigError::MissingSelector)
        ));
    }

    #[test]
    fn test_missing_command() {
        let args = parse(&["fleet-exec", "--hosts", "a"]);
        assert!(matches!(
            DispatchConfig::from_args(&args),
            Err(ConfigError::MissingCommand)
        ));
    }

    #[test]
    fn test_serial_conflicts_with_no_wait() {
        assert!(CliArgs::try_parse_from([
            "fleet-exec", "--hosts", "a", "--cmd", "id", "--serial", "--no-wait",
        ])
        .is_err());
    }

    #[test]
    fn test_invalid_pool_size() {
        let args = parse(&["fleet-exec", "--hosts", "a", "--cmd", "id", "--pool-size", "0"]);
        assert!(matches!(
            DispatchConfig::from_args(&args),
            Err(ConfigError::InvalidPoolSize { .. })
        ));
    }
}
