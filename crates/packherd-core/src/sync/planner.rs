//! Diff planning: current state vs. desired snapshot → ordered actions.
//!
//! Planning is a pure function so policy behavior can be tested without
//! a database or coordinator around it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::models::{
    ConflictKind, ConflictResolution, PackageAction, PackageEntry, SyncConflict,
};
use crate::util::compare_versions;

/// Outcome of planning one endpoint against a desired package list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Ordered action list: removals, downgrades, upgrades, installs
    pub actions: Vec<PackageAction>,
    /// Divergence the policy could not resolve; a non-empty list fails
    /// the operation
    pub conflicts: Vec<SyncConflict>,
}

impl Plan {
    /// Whether the endpoint already matches the desired state
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && self.conflicts.is_empty()
    }
}

/// Compute the action list taking `current` to `desired`.
///
/// The desired snapshot is authoritative: plain version drift becomes
/// an upgrade or downgrade. Excluded packages are silently dropped from
/// the plan rather than failing the operation. Packages whose
/// repository versions diverge across the pool (`version_conflicts`,
/// from the latest compatibility analysis) are resolved by `policy`:
/// `Manual` surfaces a conflict, `Newest`/`Oldest` pick the
/// corresponding advertised version — except when the two versions
/// compare equal while the strings differ, which stays a manual
/// conflict (no deterministic tie-break is guessed).
#[must_use]
pub fn plan_transition(
    current: &[PackageEntry],
    desired: &[PackageEntry],
    excluded: &HashSet<String>,
    version_conflicts: &[SyncConflict],
    policy: ConflictResolution,
) -> Plan {
    // BTreeMap gives deterministic action ordering within each kind
    let current_map: BTreeMap<&str, &PackageEntry> = current
        .iter()
        .map(|entry| (entry.name.as_str(), entry))
        .collect();
    let desired_map: BTreeMap<&str, &PackageEntry> = desired
        .iter()
        .map(|entry| (entry.name.as_str(), entry))
        .collect();
    let conflicted: BTreeMap<&str, &SyncConflict> = version_conflicts
        .iter()
        .filter(|conflict| conflict.kind == ConflictKind::VersionMismatch)
        .map(|conflict| (conflict.package.as_str(), conflict))
        .collect();

    let mut plan = Plan::default();

    for (name, want) in &desired_map {
        if excluded.contains(*name) {
            tracing::debug!(package = name, "dropping excluded package from plan");
            continue;
        }

        let have = current_map.get(name).copied();
        match conflicted.get(name) {
            Some(mismatch) => resolve_mismatch(&mut plan, name, have, mismatch, policy),
            None => {
                let target_version = want.version.as_str();
                match have {
                    None => plan
                        .actions
                        .push(PackageAction::install(*name, target_version)),
                    Some(have) => push_version_step(&mut plan, name, &have.version, target_version),
                }
            }
        }
    }

    for (name, _have) in &current_map {
        if excluded.contains(*name) || desired_map.contains_key(name) {
            continue;
        }
        plan.actions.push(PackageAction::remove(*name));
    }

    // Removals and downgrades first, then upgrades, then installs;
    // stable within kinds because the maps iterate sorted by name
    plan.actions.sort_by_key(|action| action.kind);
    plan
}

/// Resolve one pool-wide version mismatch according to policy
fn resolve_mismatch(
    plan: &mut Plan,
    name: &str,
    have: Option<&PackageEntry>,
    mismatch: &SyncConflict,
    policy: ConflictResolution,
) {
    let (older, newer) = match (&mismatch.current, &mismatch.target) {
        (Some(older), Some(newer)) => (older.as_str(), newer.as_str()),
        // Malformed analysis entry: surface as-is rather than guessing
        _ => {
            plan.conflicts.push(mismatch.clone());
            return;
        }
    };

    let resolved = match policy {
        ConflictResolution::Manual => {
            plan.conflicts.push(SyncConflict::version_mismatch(
                name,
                have.map_or(older, |entry| entry.version.as_str()),
                newer,
                format!("set conflict_resolution to newest/oldest or align {name} manually"),
            ));
            return;
        }
        ConflictResolution::Newest | ConflictResolution::Oldest
            if compare_versions(older, newer) == Ordering::Equal =>
        {
            // Equivalent but distinct version strings (e.g. the same
            // release from different repositories): refuse to tie-break
            plan.conflicts.push(SyncConflict::version_mismatch(
                name,
                older,
                newer,
                format!("versions of {name} are equivalent but distinct, resolve manually"),
            ));
            return;
        }
        ConflictResolution::Newest => newer,
        ConflictResolution::Oldest => older,
    };

    match have {
        None => plan.actions.push(PackageAction::install(name, resolved)),
        Some(have) => push_version_step(plan, name, &have.version, resolved),
    }
}

/// Emit the upgrade/downgrade step from `have` to `want`, if any
fn push_version_step(plan: &mut Plan, name: &str, have: &str, want: &str) {
    match compare_versions(want, have) {
        Ordering::Greater => plan.actions.push(PackageAction::upgrade(name, want)),
        Ordering::Less => plan.actions.push(PackageAction::downgrade(name, want)),
        // Equivalent versions need no step
        Ordering::Equal => {}
    }
}
