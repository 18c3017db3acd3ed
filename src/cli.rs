use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_WORKERS: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "filegate", version, about = "Chunked file gateway over pluggable block backends")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "FILEGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Upload a local file and link it at a remote path
    Put {
        local: PathBuf,
        remote: String,
        /// Parts uploaded concurrently
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },
    /// Download the file linked at a remote path
    Get { remote: String, local: PathBuf },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show one entry
    Stat { path: String },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Unlink a path, recursively for directories
    Rm { path: String },
    Mv {
        src: String,
        dst: String,
        #[arg(long)]
        overwrite: bool,
    },
    Cp {
        src: String,
        dst: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Print the public link of a file
    Link { path: String },
    /// Delete files no path links to
    Purge {
        /// Only consider files untouched for this many seconds
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(
        &["put", "a.bin", "/x/a.bin"],
        Command::Put { local: "a.bin".into(), remote: "/x/a.bin".into(), workers: 5 }
    )]
    #[case(
        &["put", "a.bin", "/a", "--workers", "9"],
        Command::Put { local: "a.bin".into(), remote: "/a".into(), workers: 9 }
    )]
    #[case(&["ls"], Command::Ls { path: "/".into() })]
    #[case(&["mv", "/a", "/b", "--overwrite"], Command::Mv { src: "/a".into(), dst: "/b".into(), overwrite: true })]
    #[case(&["cp", "/a", "/b"], Command::Cp { src: "/a".into(), dst: "/b".into(), overwrite: false })]
    #[case(&["purge", "--older-than-secs", "60"], Command::Purge { older_than_secs: Some(60) })]
    fn test_parse(#[case] args: &[&str], #[case] expected: Command) {
        let cli = Cli::try_parse_from(std::iter::once("filegate").chain(args.iter().copied())).unwrap();
        assert_eq!(cli.command, expected);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["filegate", "stat", "/a", "-c", "/etc/filegate.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/filegate.toml")));
    }
}
