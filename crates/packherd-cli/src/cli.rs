use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use packherd_core::models::{ConflictResolution, OperationKind};

#[derive(Parser)]
#[command(name = "herd")]
#[command(about = "Keep pools of machines converged on an agreed-upon package set")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the engine database file
    #[arg(long, value_name = "PATH", default_value = "herd.db", global = true)]
    pub db_path: PathBuf,

    /// Snapshots retained per endpoint (pool targets always survive)
    #[arg(long, value_name = "COUNT", default_value_t = 20, global = true)]
    pub retention: usize,

    /// Token signing secret (defaults to the development secret)
    #[arg(long, value_name = "SECRET", global = true)]
    pub token_secret: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage pools
    Pool {
        #[command(subcommand)]
        command: PoolCommands,
    },
    /// Manage endpoints
    Endpoint {
        #[command(subcommand)]
        command: EndpointCommands,
    },
    /// Recompute a pool's repository compatibility analysis
    Analyze {
        /// Pool name
        pool: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a pool's aggregate sync status
    Status {
        /// Pool name
        pool: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Act as an endpoint: report state and submit repositories
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Manage sync operations
    Op {
        #[command(subcommand)]
        command: OpCommands,
    },
    /// Inspect snapshot history
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
}

#[derive(Subcommand)]
pub enum PoolCommands {
    /// Create a pool
    Create {
        /// Unique pool name
        name: String,
        /// Free-form description
        #[arg(long, default_value = "")]
        description: String,
        /// Sync members automatically when the target changes
        #[arg(long)]
        auto_sync: bool,
        /// Let AUR packages participate in analysis
        #[arg(long)]
        include_aur: bool,
        /// Package names the coordinator must never schedule (repeatable)
        #[arg(long = "exclude", value_name = "PACKAGE")]
        exclude_packages: Vec<String>,
        /// Version divergence resolution strategy
        #[arg(long, value_enum, default_value_t = ResolutionArg::Manual)]
        resolution: ResolutionArg,
    },
    /// List pools
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a pool (members are unassigned, history is kept)
    Delete {
        /// Pool name
        name: String,
    },
    /// Make a snapshot the pool's target state
    SetTarget {
        /// Pool name
        name: String,
        /// Snapshot id
        snapshot: String,
    },
}

#[derive(Subcommand)]
pub enum EndpointCommands {
    /// Register an endpoint and print its bearer token
    Register {
        /// Display name
        name: String,
        /// Network hostname
        hostname: String,
    },
    /// List endpoints
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assign an unassigned endpoint to a pool
    Assign {
        /// Endpoint id
        endpoint: String,
        /// Pool name
        pool: String,
    },
    /// Move an endpoint between pools
    Move {
        /// Endpoint id
        endpoint: String,
        /// Source pool name
        from: String,
        /// Destination pool name
        to: String,
    },
    /// Soft-remove an endpoint
    Remove {
        /// Endpoint id
        endpoint: String,
    },
    /// Sweep silent endpoints into offline
    Sweep,
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Submit a status report with the current package list
    Report {
        /// Endpoint id
        endpoint: String,
        /// Bearer token issued at registration
        #[arg(long)]
        token: String,
        /// JSON file with the state report (architecture,
        /// pacman_version, packages)
        #[arg(long, value_name = "PATH")]
        state_file: PathBuf,
    },
    /// Submit one repository's package listing
    SubmitRepos {
        /// Endpoint id
        endpoint: String,
        /// Bearer token issued at registration
        #[arg(long)]
        token: String,
        /// Repository name (e.g. core, extra, aur)
        #[arg(long)]
        repo: String,
        /// JSON file with the repository packages
        #[arg(long, value_name = "PATH")]
        packages_file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum OpCommands {
    /// Request a sync operation for an endpoint
    Request {
        /// Endpoint id
        endpoint: String,
        /// Bearer token issued at registration
        #[arg(long)]
        token: String,
        /// Operation kind
        #[arg(value_enum)]
        kind: OperationKindArg,
    },
    /// Show an operation's current status, plan, and conflicts
    Poll {
        /// Operation id
        operation: String,
    },
    /// Cancel a pending operation
    Cancel {
        /// Operation id
        operation: String,
    },
    /// Report executor completion for an in-progress operation
    Complete {
        /// Operation id
        operation: String,
        /// Bearer token of the operation's endpoint
        #[arg(long)]
        token: String,
        /// JSON file with the resulting package list
        #[arg(long, value_name = "PATH")]
        packages_file: PathBuf,
        /// Report failure instead of success
        #[arg(long)]
        failed: bool,
    },
    /// List an endpoint's operations
    List {
        /// Endpoint id
        endpoint: String,
        /// Number of operations to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// List an endpoint's snapshots
    List {
        /// Endpoint id
        endpoint: String,
        /// Number of snapshots to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a snapshot's full package list
    Show {
        /// Snapshot id
        snapshot: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationKindArg {
    SyncToLatest,
    SetAsLatest,
    RevertToPrevious,
}

impl From<OperationKindArg> for OperationKind {
    fn from(value: OperationKindArg) -> Self {
        match value {
            OperationKindArg::SyncToLatest => Self::SyncToLatest,
            OperationKindArg::SetAsLatest => Self::SetAsLatest,
            OperationKindArg::RevertToPrevious => Self::RevertToPrevious,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    Manual,
    Newest,
    Oldest,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Manual => Self::Manual,
            ResolutionArg::Newest => Self::Newest,
            ResolutionArg::Oldest => Self::Oldest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_pool_create_with_policy() {
        let cli = Cli::parse_from([
            "herd",
            "pool",
            "create",
            "office",
            "--exclude",
            "nvidia-dkms",
            "--exclude",
            "linux-rt",
            "--resolution",
            "newest",
        ]);
        match cli.command {
            Commands::Pool {
                command:
                    PoolCommands::Create {
                        name,
                        exclude_packages,
                        resolution,
                        ..
                    },
            } => {
                assert_eq!(name, "office");
                assert_eq!(exclude_packages, vec!["nvidia-dkms", "linux-rt"]);
                assert_eq!(resolution, ResolutionArg::Newest);
            }
            _ => panic!("parsed into the wrong command"),
        }
    }

    #[test]
    fn parses_op_request_kind() {
        let cli = Cli::parse_from([
            "herd",
            "op",
            "request",
            "some-endpoint-id",
            "--token",
            "tok",
            "sync-to-latest",
        ]);
        match cli.command {
            Commands::Op {
                command: OpCommands::Request { kind, .. },
            } => assert_eq!(OperationKind::from(kind), OperationKind::SyncToLatest),
            _ => panic!("parsed into the wrong command"),
        }
    }
}
