mod cli;
mod commands;

use clap::Parser;
use packherd_core::{CoreConfig, Engine};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("packherd_core=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> packherd_core::Result<()> {
    let mut config = CoreConfig::new(cli.retention);
    if let Some(secret) = cli.token_secret {
        config = config.with_token_secret(secret);
    } else {
        tracing::warn!("using the development token secret; pass --token-secret in production");
    }

    let engine = Engine::open(&cli.db_path, config).await?;

    match cli.command {
        Commands::Pool { command } => commands::pool(&engine, command).await,
        Commands::Endpoint { command } => commands::endpoint(&engine, command).await,
        Commands::Analyze { pool, json } => commands::analyze(&engine, &pool, json).await,
        Commands::Status { pool, json } => commands::status(&engine, &pool, json).await,
        Commands::Agent { command } => commands::agent(&engine, command).await,
        Commands::Op { command } => commands::op(&engine, command).await,
        Commands::Snapshot { command } => commands::snapshot(&engine, command).await,
    }
}
