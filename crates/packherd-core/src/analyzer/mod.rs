//! Pool-wide repository compatibility analysis.
//!
//! Listings live in memory: every analysis is a full recompute over the
//! latest submissions, so the cache can be dropped at any time without
//! drifting. Submission is bookkeeping only and never blocks on
//! operation locks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::RwLock;

use crate::models::{
    CompatibilityAnalysis, EndpointId, PoolId, RepositoryPackage, SyncConflict,
};
use crate::util::{compare_versions, unix_timestamp_ms};

/// Repository name used for AUR submissions; filtered out of analysis
/// unless the pool policy opts in
const AUR_REPOSITORY: &str = "aur";

#[derive(Default)]
struct AnalyzerState {
    /// endpoint → repository name → latest submitted listing
    listings: HashMap<EndpointId, HashMap<String, Vec<RepositoryPackage>>>,
    /// Cached analyses, valid until the next submission
    analyses: HashMap<PoolId, CompatibilityAnalysis>,
}

/// Ingests per-endpoint repository listings and computes which packages
/// are usable pool-wide
#[derive(Default)]
pub struct RepositoryAnalyzer {
    inner: RwLock<AnalyzerState>,
}

impl RepositoryAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listing for one endpoint+repository pair.
    ///
    /// Drops every cached analysis: the next `analyze` call recomputes
    /// from scratch.
    pub async fn submit(
        &self,
        endpoint_id: EndpointId,
        repo_name: impl Into<String>,
        packages: Vec<RepositoryPackage>,
    ) {
        let repo_name = repo_name.into();
        let mut state = self.inner.write().await;
        tracing::debug!(endpoint = %endpoint_id, repo = %repo_name, count = packages.len(),
            "repository listing submitted");
        state
            .listings
            .entry(endpoint_id)
            .or_default()
            .insert(repo_name, packages);
        state.analyses.clear();
    }

    /// Drop all listings for an endpoint (on removal) and invalidate
    /// cached analyses
    pub async fn forget_endpoint(&self, endpoint_id: &EndpointId) {
        let mut state = self.inner.write().await;
        state.listings.remove(endpoint_id);
        state.analyses.clear();
    }

    /// Whether an endpoint has submitted any listing yet
    pub async fn has_listings(&self, endpoint_id: &EndpointId) -> bool {
        let state = self.inner.read().await;
        state.listings.contains_key(endpoint_id)
    }

    /// Latest cached analysis for a pool, if still valid
    pub async fn latest(&self, pool_id: &PoolId) -> Option<CompatibilityAnalysis> {
        let state = self.inner.read().await;
        state.analyses.get(pool_id).cloned()
    }

    /// Compute (or return the still-valid cached) analysis for a pool.
    ///
    /// `members` is the pool's current membership; endpoints that have
    /// never submitted a listing are skipped rather than vetoing the
    /// whole intersection. Identical submissions yield an identical
    /// analysis (idempotence).
    pub async fn analyze(
        &self,
        pool_id: PoolId,
        members: &[EndpointId],
        include_aur: bool,
    ) -> CompatibilityAnalysis {
        let mut state = self.inner.write().await;
        if let Some(cached) = state.analyses.get(&pool_id) {
            return cached.clone();
        }

        let analysis = compute(pool_id, &state.listings, members, include_aur);
        state.analyses.insert(pool_id, analysis.clone());
        analysis
    }
}

/// Full recompute over the latest listings; no incremental diffing
fn compute(
    pool_id: PoolId,
    listings: &HashMap<EndpointId, HashMap<String, Vec<RepositoryPackage>>>,
    members: &[EndpointId],
    include_aur: bool,
) -> CompatibilityAnalysis {
    // Per participating member: package name → versions advertised
    // across its combined repositories
    let mut availability: Vec<BTreeMap<&str, BTreeSet<&str>>> = Vec::new();
    for member in members {
        let Some(repos) = listings.get(member) else {
            continue;
        };
        let mut combined: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (repo_name, packages) in repos {
            if !include_aur && repo_name == AUR_REPOSITORY {
                continue;
            }
            for package in packages {
                combined
                    .entry(package.name.as_str())
                    .or_default()
                    .insert(package.version.as_str());
            }
        }
        availability.push(combined);
    }

    let mut all_names: BTreeSet<&str> = BTreeSet::new();
    for combined in &availability {
        all_names.extend(combined.keys());
    }

    let mut common_packages = Vec::new();
    let mut excluded_packages = Vec::new();
    let mut conflicts = Vec::new();

    for name in all_names {
        let present_everywhere = availability.iter().all(|combined| combined.contains_key(name));
        if !present_everywhere {
            excluded_packages.push(name.to_string());
            continue;
        }

        let mut versions: BTreeSet<&str> = BTreeSet::new();
        for combined in &availability {
            if let Some(member_versions) = combined.get(name) {
                versions.extend(member_versions);
            }
        }

        if versions.len() > 1 {
            let oldest = versions
                .iter()
                .copied()
                .min_by(|a, b| compare_versions(a, b))
                .unwrap_or_default();
            let newest = versions
                .iter()
                .copied()
                .max_by(|a, b| match compare_versions(a, b) {
                    // On a tie keep the later iteration value so min/max differ
                    Ordering::Equal => Ordering::Less,
                    other => other,
                })
                .unwrap_or_default();
            conflicts.push(SyncConflict::version_mismatch(
                name,
                oldest,
                newest,
                format!("align repository versions of {name} across the pool"),
            ));
        }
        common_packages.push(name.to_string());
    }

    CompatibilityAnalysis {
        pool_id,
        common_packages,
        excluded_packages,
        conflicts,
        computed_at: unix_timestamp_ms(),
    }
}
