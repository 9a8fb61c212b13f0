use crate::build_info;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Attendance sync: HR ingest, incremental backup, reconcile and push",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    /// Step to run; defaults to the full sequence
    pub command: Option<Command>,

    #[arg(long = "log-level", default_value = "info", global = true)]
    pub log_level: String,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::All)
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ingest, backup, reconcile, then push
    All,
    /// Export new rows of every configured table to the remote archive
    Backup,
    /// Pull attendance punches from the HR API into the local tables
    Ingest,
    /// Remove device punches that duplicate an HR punch
    Reconcile,
    /// Send unsynced local punches to the HR API
    Push,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Backup => "backup",
            Self::Ingest => "ingest",
            Self::Reconcile => "reconcile",
            Self::Push => "push",
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from([
            "attendance_sync",
            "--version",
            "--this-flag-does-not-exist",
        ])
        .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn no_subcommand_means_all() {
        let cli = Cli::try_parse_from(["attendance_sync"]).unwrap();
        assert_eq!(cli.command(), Command::All);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn log_level_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from(["attendance_sync", "backup", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.command(), Command::Backup);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["attendance_sync", "sync"]).is_err());
    }
}
