//! Command handlers: thin glue between clap and the engine.

use std::path::Path;

use packherd_core::error::{Error, Result};
use packherd_core::models::{
    EndpointId, OperationId, PackageEntry, RepositoryPackage, SnapshotId, SyncPolicy,
};
use packherd_core::sync::StateReport;
use packherd_core::Engine;

use crate::cli::{
    AgentCommands, EndpointCommands, OpCommands, PoolCommands, SnapshotCommands,
};

fn parse_endpoint_id(raw: &str) -> Result<EndpointId> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid endpoint id: {raw}")))
}

fn parse_operation_id(raw: &str) -> Result<OperationId> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid operation id: {raw}")))
}

fn parse_snapshot_id(raw: &str) -> Result<SnapshotId> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid snapshot id: {raw}")))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn pool(engine: &Engine, command: PoolCommands) -> Result<()> {
    match command {
        PoolCommands::Create {
            name,
            description,
            auto_sync,
            include_aur,
            exclude_packages,
            resolution,
        } => {
            let policy = SyncPolicy {
                auto_sync,
                exclude_packages: exclude_packages.into_iter().collect(),
                include_aur,
                conflict_resolution: resolution.into(),
            };
            let pool = engine.create_pool(name, description, policy).await?;
            println!("created pool {} ({})", pool.name, pool.id);
        }
        PoolCommands::List { json } => {
            let pools = engine.list_pools().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pools)?);
            } else {
                for pool in pools {
                    let target = pool
                        .target_state_id
                        .map_or_else(|| "no target".to_string(), |id| format!("target {id}"));
                    println!("{}  {}  {}", pool.id, pool.name, target);
                }
            }
        }
        PoolCommands::Delete { name } => {
            let pool = engine.get_pool_by_name(&name).await?;
            engine.delete_pool(&pool.id).await?;
            println!("deleted pool {name}, endpoints unassigned");
        }
        PoolCommands::SetTarget { name, snapshot } => {
            let pool = engine.get_pool_by_name(&name).await?;
            let snapshot_id = parse_snapshot_id(&snapshot)?;
            let changes = engine.set_target_state(&pool.id, &snapshot_id).await?;
            println!("target of {name} set to {snapshot_id}");
            for change in changes {
                println!("  {} -> {}", change.endpoint_id, change.status);
            }
        }
    }
    Ok(())
}

pub async fn endpoint(engine: &Engine, command: EndpointCommands) -> Result<()> {
    match command {
        EndpointCommands::Register { name, hostname } => {
            let registration = engine.register(name, hostname).await?;
            println!("endpoint {}", registration.endpoint.id);
            println!("token {}", registration.token);
        }
        EndpointCommands::List { json } => {
            let endpoints = engine.list_endpoints().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&endpoints)?);
            } else {
                for endpoint in endpoints {
                    let pool = endpoint
                        .pool_id
                        .map_or_else(|| "unassigned".to_string(), |id| id.to_string());
                    println!(
                        "{}  {}  {}  {}  {}",
                        endpoint.id, endpoint.name, endpoint.hostname, endpoint.sync_status, pool
                    );
                }
            }
        }
        EndpointCommands::Assign { endpoint, pool } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let pool = engine.get_pool_by_name(&pool).await?;
            engine.assign_endpoint(&endpoint_id, &pool.id).await?;
            println!("assigned {endpoint_id} to {}", pool.name);
        }
        EndpointCommands::Move { endpoint, from, to } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let from_pool = engine.get_pool_by_name(&from).await?;
            let to_pool = engine.get_pool_by_name(&to).await?;
            engine
                .move_endpoint(&endpoint_id, &from_pool.id, &to_pool.id)
                .await?;
            println!("moved {endpoint_id} from {from} to {to}");
        }
        EndpointCommands::Remove { endpoint } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            engine.remove_endpoint(&endpoint_id).await?;
            println!("removed {endpoint_id}");
        }
        EndpointCommands::Sweep => {
            let changes = engine.sweep_offline().await?;
            if changes.is_empty() {
                println!("no endpoints past the heartbeat window");
            }
            for change in changes {
                println!("{} -> {}", change.endpoint_id, change.status);
            }
        }
    }
    Ok(())
}

pub async fn analyze(engine: &Engine, pool: &str, json: bool) -> Result<()> {
    let pool = engine.get_pool_by_name(pool).await?;
    let analysis = engine.analyze_pool(&pool.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!(
        "{}: {} common, {} excluded, {} conflicts",
        pool.name,
        analysis.common_packages.len(),
        analysis.excluded_packages.len(),
        analysis.conflicts.len()
    );
    for package in &analysis.excluded_packages {
        println!("  excluded {package}");
    }
    for conflict in &analysis.conflicts {
        println!(
            "  conflict {} ({} vs {}): {}",
            conflict.package,
            conflict.current.as_deref().unwrap_or("?"),
            conflict.target.as_deref().unwrap_or("?"),
            conflict.suggested_resolution
        );
    }
    Ok(())
}

pub async fn status(engine: &Engine, pool: &str, json: bool) -> Result<()> {
    let pool = engine.get_pool_by_name(pool).await?;
    let status = engine.pool_status(&pool.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (status.sync_percentage * 100.0).round() as u32;
    println!("{}: {} ({percent}% in sync)", pool.name, status.overall_status);
    for (endpoint_id, sync_status) in status.endpoints {
        println!("  {endpoint_id}  {sync_status}");
    }
    Ok(())
}

pub async fn agent(engine: &Engine, command: AgentCommands) -> Result<()> {
    match command {
        AgentCommands::Report {
            endpoint,
            token,
            state_file,
        } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let report: StateReport = read_json(&state_file)?;
            let replayed = engine.report_status(&token, &endpoint_id, report).await?;
            println!("report accepted");
            for operation in replayed {
                println!("replayed operation {} -> {}", operation.id, operation.status);
            }
        }
        AgentCommands::SubmitRepos {
            endpoint,
            token,
            repo,
            packages_file,
        } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let packages: Vec<RepositoryPackage> = read_json(&packages_file)?;
            let analysis = engine
                .submit_repositories(&token, &endpoint_id, repo, packages)
                .await?;
            match analysis {
                Some(analysis) => println!(
                    "listing accepted, pool analysis: {} common, {} excluded",
                    analysis.common_packages.len(),
                    analysis.excluded_packages.len()
                ),
                None => println!("listing accepted (endpoint not in a pool)"),
            }
        }
    }
    Ok(())
}

pub async fn op(engine: &Engine, command: OpCommands) -> Result<()> {
    match command {
        OpCommands::Request {
            endpoint,
            token,
            kind,
        } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let operation = engine
                .request_operation(&token, &endpoint_id, kind.into())
                .await?;
            println!("operation {} -> {}", operation.id, operation.status);
            print_detail(&operation);
        }
        OpCommands::Poll { operation } => {
            let operation_id = parse_operation_id(&operation)?;
            let operation = engine.poll_operation(&operation_id).await?;
            println!("operation {} -> {}", operation.id, operation.status);
            print_detail(&operation);
        }
        OpCommands::Cancel { operation } => {
            let operation_id = parse_operation_id(&operation)?;
            let operation = engine.cancel_operation(&operation_id).await?;
            println!("operation {} -> {}", operation.id, operation.status);
        }
        OpCommands::Complete {
            operation,
            token,
            packages_file,
            failed,
        } => {
            let operation_id = parse_operation_id(&operation)?;
            let packages: Vec<PackageEntry> = read_json(&packages_file)?;
            let operation = engine
                .complete_operation(&token, &operation_id, packages, !failed)
                .await?;
            println!("operation {} -> {}", operation.id, operation.status);
        }
        OpCommands::List {
            endpoint,
            limit,
            json,
        } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let operations = engine.list_operations(&endpoint_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&operations)?);
            } else {
                for operation in operations {
                    println!(
                        "{}  {}  {}",
                        operation.id,
                        operation.kind.as_str(),
                        operation.status
                    );
                }
            }
        }
    }
    Ok(())
}

pub async fn snapshot(engine: &Engine, command: SnapshotCommands) -> Result<()> {
    match command {
        SnapshotCommands::List {
            endpoint,
            limit,
            json,
        } => {
            let endpoint_id = parse_endpoint_id(&endpoint)?;
            let snapshots = engine.list_snapshots(&endpoint_id, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else {
                for snapshot in snapshots {
                    println!(
                        "{}  {}  {} packages",
                        snapshot.id,
                        snapshot.captured_at,
                        snapshot.packages.len()
                    );
                }
            }
        }
        SnapshotCommands::Show { snapshot } => {
            let snapshot_id = parse_snapshot_id(&snapshot)?;
            let snapshot = engine.get_snapshot(&snapshot_id).await?;
            println!("snapshot {} for endpoint {}", snapshot.id, snapshot.endpoint_id);
            println!("captured {} on {}", snapshot.captured_at, snapshot.architecture);
            for package in snapshot.packages {
                println!("  {} {}", package.name, package.version);
            }
        }
    }
    Ok(())
}

fn print_detail(operation: &packherd_core::models::SyncOperation) {
    for action in &operation.detail.plan {
        println!(
            "  {:?} {} {}",
            action.kind,
            action.package,
            action.version.as_deref().unwrap_or("")
        );
    }
    for conflict in &operation.detail.conflicts {
        println!(
            "  conflict {} ({} vs {}): {}",
            conflict.package,
            conflict.current.as_deref().unwrap_or("?"),
            conflict.target.as_deref().unwrap_or("?"),
            conflict.suggested_resolution
        );
    }
    if let Some(reason) = &operation.detail.failure_reason {
        println!("  failure: {reason}");
    }
}
