//! Command-line definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Ansible playbook diagnostics from the command line.
#[derive(Debug, Parser)]
#[command(name = "drover", version, arg_required_else_help = true)]
#[command(after_help = "Logging is controlled with RUST_LOG (default: info) and goes to stderr.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Validate playbooks and print diagnostics; exits 1 on any error.
    Check(CheckArgs),

    /// Show the Python environment and Ansible toolchain for DIR.
    Env {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct CheckArgs {
    /// Playbooks to validate.
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Use the syntax check even when ansible-lint is available.
    #[arg(long)]
    pub no_lint: bool,

    /// Per-tool timeout in seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("invalid number of seconds '{value}'"))?;
    if secs == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("drover").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn check_with_flags_and_files() {
        let command =
            parse(&["check", "--no-lint", "site.yml", "--timeout", "5", "web.yml"]).unwrap();
        assert_eq!(
            command,
            Command::Check(CheckArgs {
                files: vec![PathBuf::from("site.yml"), PathBuf::from("web.yml")],
                no_lint: true,
                timeout: Some(Duration::from_secs(5)),
            })
        );
    }

    #[test]
    fn check_rejects_bad_input() {
        assert!(parse(&["check"]).is_err());
        assert!(parse(&["check", "--timeout"]).is_err());
        assert!(parse(&["check", "--timeout", "0", "a.yml"]).is_err());
        assert!(parse(&["check", "--timeout", "soon", "a.yml"]).is_err());
        assert!(parse(&["check", "--fix", "a.yml"]).is_err());
    }

    #[test]
    fn env_defaults_to_the_current_directory() {
        assert_eq!(
            parse(&["env"]).unwrap(),
            Command::Env {
                dir: PathBuf::from(".")
            }
        );
        assert_eq!(
            parse(&["env", "/srv/play"]).unwrap(),
            Command::Env {
                dir: PathBuf::from("/srv/play")
            }
        );
        assert!(parse(&["env", "a", "b"]).is_err());
    }

    #[test]
    fn help_version_and_unknown() {
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(
            parse(&["--version"]).unwrap_err().kind(),
            ErrorKind::DisplayVersion
        );
        let usage = parse(&["lint"]).unwrap_err();
        assert_eq!(usage.kind(), ErrorKind::InvalidSubcommand);
        assert_eq!(usage.exit_code(), 2);
    }

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
