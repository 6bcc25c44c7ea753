//! Command-line interface definitions for coffer.
//!
//! This module defines the CLI structure using clap, including all
//! subcommands and their arguments. The main entry point is the [`Cli`]
//! struct; [`CliBuilder`] allows programmatic construction, which the
//! integration tests use to drive commands without spawning a process.

use clap::{Parser, Subcommand};

use crate::error::{CofferError, Result};

/// Main command-line interface for coffer.
#[derive(Debug, Parser)]
#[command(
    name = "coffer",
    bin_name = "coffer",
    author,
    version,
    about = "A content-tracking archive manager with checksummed commits and peer-to-peer sync",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    global_opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Global options that apply to all coffer commands.
#[derive(Debug, Parser)]
pub struct GlobalOpts {
    /// Enable verbose output (use multiple times for more verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, env = "COFFER_VERBOSE")]
    verbose: u8,

    /// Silence all output except for errors
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        env = "COFFER_QUIET"
    )]
    quiet: bool,
}

impl GlobalOpts {
    /// Get the verbose level
    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn quiet(&self) -> bool {
        self.quiet
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the global options
    pub fn global_opts(&self) -> &GlobalOpts {
        &self.global_opts
    }

    /// Get the command
    pub fn command(&self) -> &Commands {
        &self.command
    }

    /// Create a builder for programmatic construction
    pub fn builder() -> CliBuilder {
        CliBuilder::default()
    }
}

/// Builder for [`Cli`]
#[derive(Debug, Default)]
pub struct CliBuilder {
    verbose: u8,
    quiet: bool,
    command: Option<Commands>,
}

impl CliBuilder {
    /// Set the verbose level
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Enable quiet mode
    pub fn quiet(mut self, enabled: bool) -> Self {
        self.quiet = enabled;
        self
    }

    /// Set the command
    pub fn command(mut self, command: Commands) -> Self {
        self.command = Some(command);
        self
    }

    /// Build the Cli instance
    pub fn build(self) -> Result<Cli> {
        let command = self
            .command
            .ok_or_else(|| CofferError::Usage("Command is required".to_string()))?;
        Ok(Cli {
            global_opts: GlobalOpts {
                verbose: self.verbose,
                quiet: self.quiet,
            },
            command,
        })
    }
}

/// Available coffer subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a new repository in the current directory
    ///
    /// Creates the metadata directory with an empty database. Fails when
    /// the directory already belongs to a repository.
    Init {
        /// Name label for the new repository
        name: String,
    },

    /// Add files or directories to the staging set
    ///
    /// Directories are expanded to the regular files below them. A file
    /// that already has a pending operation (or is marked for revert) is
    /// reported and skipped.
    Add {
        /// Files or directories to be added
        #[arg(required = true)]
        filenames: Vec<String>,
    },

    /// Import files from an external directory, sorted by date
    ///
    /// Each file lands under `<YYYY-MM>/<basename>` derived from its
    /// modification time. Identical existing targets are skipped (and
    /// removed from the source); clashing different content gets a
    /// `-NNN` suffix.
    #[command(name = "add_from")]
    AddFrom {
        /// External directory to import; must lie outside the repository
        filename: String,
    },

    /// Remove files or directories from the repository
    ///
    /// Stages a delete for every matching tracked file and moves the
    /// physical file into the trash until the next commit.
    Rm {
        /// Files or directories to be removed
        #[arg(required = true)]
        filenames: Vec<String>,
    },

    /// Revert staged operations and local modifications
    ///
    /// Without arguments, everything staged is reverted. Files whose
    /// content can no longer be restored locally are marked for revert and
    /// restored by the next sync.
    Revert {
        /// Restrict the revert to these files or directories
        filenames: Vec<String>,
    },

    /// Commit staged operations into the history
    Commit {
        /// Additional message for this commit
        #[arg(short, long, default_value = "")]
        msg: String,

        /// Automatically stage modified and deleted tracked files first
        #[arg(short, long)]
        auto: bool,
    },

    /// Fast check for untracked, modified or deleted files
    ///
    /// Compares modification times only; use `verify` for a full checksum
    /// pass. Exits 1 when anything is off.
    Status,

    /// Verify file contents against the database checksums
    Verify {
        /// Check only specific files or directories
        filenames: Vec<String>,
    },

    /// Show commit history, optionally restricted to given files
    Log {
        /// Show only commits touching these files or directories
        filenames: Vec<String>,

        /// How many entries to show
        #[arg(short, long, default_value_t = 16)]
        count: usize,
    },

    /// List tracked files that share a checksum
    #[command(name = "find_dups")]
    FindDups,

    /// Synchronize this repository with a peer
    ///
    /// Accepts `file://<path>` (or a bare path) and
    /// `ssh://user@host:<path>` URLs. Conflicts are resolved
    /// interactively; an interrupted sync is resumed by running the same
    /// command again.
    Sync {
        /// URL of the peer repository
        url: String,

        /// Command used to reach an ssh:// peer
        #[arg(long, env = "COFFER_SSH_COMMAND", default_value = "ssh")]
        ssh_command: String,
    },

    /// Serve the wire protocol over stdio (used by ssh:// peers)
    #[command(name = "_server_mode", hide = true)]
    ServerMode {
        /// Base path of the repository to serve
        path: String,
    },
}
