//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "deckterm", about = "Inspect and manage deckterm terminal sessions")]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/deckterm/config.toml)
    #[arg(long, global = true, env = "DECKTERM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report where tmux was found and its version
    Detect,
    /// List recoverable (unattached) sessions
    Ls(LsOpts),
    /// Create a session, store its metadata and detach
    Open(OpenOpts),
    /// Re-attach a session and print what it belongs to
    Recover(RecoverOpts),
    /// Kill a session in tmux
    Kill(KillOpts),
}

#[derive(clap::Args, Default)]
pub struct LsOpts {
    /// Include sessions that have a client attached
    #[arg(long)]
    pub all: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct OpenOpts {
    /// Working directory (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    #[arg(long, default_value = "")]
    pub title: String,

    /// Start a direct shell instead of a tmux session
    #[arg(long)]
    pub direct: bool,
}

#[derive(clap::Args)]
pub struct RecoverOpts {
    /// tmux session name, e.g. deckterm-0badf00d
    pub name: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct KillOpts {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::parse_from(["deckterm", "ls", "--all", "--config", "/tmp/c.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        match cli.command {
            Command::Ls(opts) => {
                assert!(opts.all);
                assert!(!opts.json);
            }
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn open_defaults() {
        let cli = Cli::parse_from(["deckterm", "open"]);
        match cli.command {
            Command::Open(opts) => {
                assert_eq!(opts.title, "");
                assert!(opts.cwd.is_none());
                assert!(!opts.direct);
            }
            _ => panic!("expected open"),
        }
    }

    #[test]
    fn recover_requires_name() {
        assert!(Cli::try_parse_from(["deckterm", "recover"]).is_err());
    }
}
