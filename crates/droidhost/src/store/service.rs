//! Store operations over the cached indexes.
//!
//! Search and upgrade computation run against the cached index-v2
//! documents; installs go through the session daemon, which is the only
//! process allowed to talk to the container.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tokio::sync::broadcast;

use crate::config::StoreConfig;
use crate::container::platform::AppInfo;
use crate::error::Error;
use crate::ipc::client::SessionClient;

use super::cache::{load_repositories, mirror_url, IndexCache, Repository};
use super::index::Index;

const INSTALLED_CHANNEL_CAPACITY: usize = 16;

/// A flattened search result: one package at its latest version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub package_name: String,
    pub name: String,
    pub summary: String,
    pub version_name: String,
    pub version_code: i64,
    pub repository: String,
    pub download_url: String,
    pub sha256: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeCandidate {
    pub package_name: String,
    pub installed_version: String,
    pub available_version: String,
    pub repository: String,
}

pub struct StoreService {
    config: StoreConfig,
    cache: IndexCache,
    session: SessionClient,
    installed_tx: broadcast::Sender<String>,
}

impl StoreService {
    pub fn new(config: StoreConfig, session: SessionClient) -> Result<Self> {
        let cache = IndexCache::new(config.cache_dir.clone())?;
        let (installed_tx, _) = broadcast::channel(INSTALLED_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            cache,
            session,
            installed_tx,
        })
    }

    /// Subscribers see the package name of every successful install.
    pub fn subscribe_installed(&self) -> broadcast::Receiver<String> {
        self.installed_tx.subscribe()
    }

    pub fn repositories(&self) -> Result<Vec<Repository>> {
        load_repositories(&self.config.repo_config_dir)
    }

    pub async fn update_cache(&self) -> Result<bool> {
        let repos = self.repositories()?;
        Ok(self.cache.refresh_all(&repos).await)
    }

    /// Repositories with a loadable cached index, in precedence order.
    fn loaded_indexes(&self) -> Result<Vec<(Repository, Index)>> {
        let mut loaded = Vec::new();
        for repo in self.repositories()? {
            match self.cache.load_index(&repo.name) {
                Ok(index) => loaded.push((repo, index)),
                Err(e) => debug!("skipping {}: {e:#}", repo.name),
            }
        }
        Ok(loaded)
    }

    pub fn search(&self, query: &str) -> Result<Vec<AppRecord>> {
        Ok(search_indexes(&self.loaded_indexes()?, query))
    }

    pub async fn installed_apps(&self) -> Result<Vec<AppInfo>> {
        self.session.get_apps_info().await
    }

    pub async fn upgradable(&self) -> Result<Vec<UpgradeCandidate>> {
        let installed = self.session.get_apps_info().await?;
        Ok(upgradable_from(&installed, &self.loaded_indexes()?))
    }

    /// Download, verify, and hand the package to the session daemon. The
    /// scratch file never outlives the attempt.
    pub async fn install(&self, package_name: &str) -> Result<()> {
        let indexes = self.loaded_indexes()?;
        let record = resolve_package(&indexes, package_name).ok_or_else(|| {
            Error::NotFound(format!("package {package_name} not in any repository"))
        })?;

        fs::create_dir_all(&self.config.download_dir).with_context(|| {
            format!(
                "creating download dir {}",
                self.config.download_dir.display()
            )
        })?;
        let scratch = self.config.download_dir.join(&record.file_name);

        let result = self.download_and_install(&record, &scratch).await;
        if scratch.exists() {
            if let Err(e) = fs::remove_file(&scratch) {
                warn!("could not remove {}: {e}", scratch.display());
            }
        }
        result?;

        let _ = self.installed_tx.send(package_name.to_string());
        info!("installed {package_name} {}", record.version_name);
        Ok(())
    }

    async fn download_and_install(&self, record: &AppRecord, scratch: &Path) -> Result<()> {
        self.cache.download(&record.download_url, scratch).await?;
        verify_sha256(scratch, &record.sha256)?;
        self.session.install_app(scratch).await
    }

    /// Upgrade the named packages, or everything upgradable when the list
    /// is empty. Returns whether every upgrade succeeded.
    pub async fn upgrade_packages(&self, packages: &[String]) -> Result<bool> {
        let candidates = self.upgradable().await?;
        let targets: Vec<_> = if packages.is_empty() {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|c| packages.contains(&c.package_name))
                .collect()
        };

        let mut all_ok = true;
        for candidate in targets {
            if let Err(e) = self.install(&candidate.package_name).await {
                error!("upgrade of {} failed: {e:#}", candidate.package_name);
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    pub async fn uninstall(&self, package_name: &str) -> Result<()> {
        self.session.remove_app(package_name).await
    }
}

/// Case-insensitive substring search on the localized name. Each package
/// surfaces once, from the first repository that carries it.
pub fn search_indexes(indexes: &[(Repository, Index)], query: &str) -> Vec<AppRecord> {
    let needle = query.to_lowercase();
    let mut seen = std::collections::BTreeSet::new();
    let mut hits = Vec::new();

    for (repo, index) in indexes {
        for (package_name, entry) in &index.packages {
            if seen.contains(package_name.as_str()) {
                continue;
            }
            if !entry.localized_name().to_lowercase().contains(&needle) {
                continue;
            }
            let Some(latest) = entry.latest_version() else {
                continue;
            };
            let Some(mirror) = repo.mirrors.first() else {
                continue;
            };
            hits.push(AppRecord {
                package_name: package_name.clone(),
                name: entry.localized_name().to_string(),
                summary: entry.metadata.localized_summary().to_string(),
                version_name: latest.manifest.version_name.clone(),
                version_code: latest.manifest.version_code,
                repository: repo.name.clone(),
                download_url: mirror_url(mirror, &latest.file.name),
                sha256: latest.file.sha256.clone(),
                file_name: latest
                    .file
                    .name
                    .trim_start_matches('/')
                    .to_string(),
            });
            seen.insert(package_name.clone());
        }
    }

    hits.sort_by(|a, b| a.name.cmp(&b.name));
    hits
}

/// An installed app is upgradable when the first repository carrying it
/// offers a latest version with a different versionName.
pub fn upgradable_from(
    installed: &[AppInfo],
    indexes: &[(Repository, Index)],
) -> Vec<UpgradeCandidate> {
    let mut candidates = Vec::new();
    for app in installed {
        for (repo, index) in indexes {
            let Some(entry) = index.packages.get(&app.package_name) else {
                continue;
            };
            if let Some(latest) = entry.latest_version() {
                if latest.manifest.version_name != app.version_name {
                    candidates.push(UpgradeCandidate {
                        package_name: app.package_name.clone(),
                        installed_version: app.version_name.clone(),
                        available_version: latest.manifest.version_name.clone(),
                        repository: repo.name.clone(),
                    });
                }
            }
            // first repository carrying the package wins
            break;
        }
    }
    candidates
}

/// Find a package's latest version record, first repository wins.
pub fn resolve_package(
    indexes: &[(Repository, Index)],
    package_name: &str,
) -> Option<AppRecord> {
    for (repo, index) in indexes {
        let Some(entry) = index.packages.get(package_name) else {
            continue;
        };
        let latest = entry.latest_version()?;
        let mirror = repo.mirrors.first()?;
        return Some(AppRecord {
            package_name: package_name.to_string(),
            name: entry.localized_name().to_string(),
            summary: entry.metadata.localized_summary().to_string(),
            version_name: latest.manifest.version_name.clone(),
            version_code: latest.manifest.version_code,
            repository: repo.name.clone(),
            download_url: mirror_url(mirror, &latest.file.name),
            sha256: latest.file.sha256.clone(),
            file_name: latest.file.name.trim_start_matches('/').to_string(),
        });
    }
    None
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let data = fs::read(path)?;
    let digest = hex::encode(Sha256::digest(&data));
    if !digest.eq_ignore_ascii_case(expected) {
        anyhow::bail!("checksum mismatch for {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::index::test_package;
    use tempfile::tempdir;

    fn repo(name: &str, mirror: &str) -> Repository {
        Repository {
            name: name.to_string(),
            mirrors: vec![mirror.to_string()],
        }
    }

    fn index_with(packages: &[(&str, &str, &[(&str, i64)])]) -> Index {
        let mut index = Index::default();
        for (package_name, display_name, versions) in packages {
            index
                .packages
                .insert(package_name.to_string(), test_package(display_name, versions));
        }
        index
    }

    fn installed(package_name: &str, version_name: &str) -> AppInfo {
        AppInfo {
            name: package_name.to_string(),
            package_name: package_name.to_string(),
            version_name: version_name.to_string(),
            version_code: 1,
            action: String::new(),
            launch_intent: String::new(),
            component_package_name: String::new(),
            component_class_name: String::new(),
            categories: vec![],
        }
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let indexes = vec![(
            repo("fdroid", "https://m.example/repo"),
            index_with(&[
                ("org.example.calc", "Calculator", &[("1.0", 1)]),
                ("org.example.cam", "Camera", &[("2.0", 2)]),
            ]),
        )];

        let hits = search_indexes(&indexes, "CALC");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].package_name, "org.example.calc");
        assert_eq!(hits[0].download_url, "https://m.example/repo/app_1.apk");

        assert_eq!(search_indexes(&indexes, "ca").len(), 2);
        assert!(search_indexes(&indexes, "zzz").is_empty());
    }

    #[test]
    fn test_search_dedupes_across_repositories() {
        let indexes = vec![
            (
                repo("first", "https://one.example/repo"),
                index_with(&[("org.example.app", "App", &[("1.0", 1)])]),
            ),
            (
                repo("second", "https://two.example/repo"),
                index_with(&[("org.example.app", "App", &[("9.9", 9)])]),
            ),
        ];
        let hits = search_indexes(&indexes, "app");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repository, "first");
        assert_eq!(hits[0].version_name, "1.0");
    }

    #[test]
    fn test_upgrade_detected_on_version_name_mismatch() {
        let indexes = vec![(
            repo("fdroid", "https://m.example/repo"),
            index_with(&[("org.example.app", "App", &[("1.0", 1), ("1.1", 2)])]),
        )];

        let candidates = upgradable_from(&[installed("org.example.app", "1.0")], &indexes);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].available_version, "1.1");

        // up to date means no candidate
        assert!(upgradable_from(&[installed("org.example.app", "1.1")], &indexes).is_empty());
    }

    #[test]
    fn test_upgrade_first_repository_wins() {
        let indexes = vec![
            (
                repo("first", "https://one.example/repo"),
                index_with(&[("org.example.app", "App", &[("1.0", 1)])]),
            ),
            (
                repo("second", "https://two.example/repo"),
                index_with(&[("org.example.app", "App", &[("2.0", 5)])]),
            ),
        ];

        // the first repo says 1.0 and the app has 1.0, so the newer
        // version in the second repo is invisible
        let candidates = upgradable_from(&[installed("org.example.app", "1.0")], &indexes);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_resolve_package_not_found() {
        let indexes = vec![(
            repo("fdroid", "https://m.example/repo"),
            index_with(&[("org.example.app", "App", &[("1.0", 1)])]),
        )];
        assert!(resolve_package(&indexes, "org.missing").is_none());
        let record = resolve_package(&indexes, "org.example.app").unwrap();
        assert_eq!(record.file_name, "app_1.apk");
    }

    #[test]
    fn test_sha256_verification() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.apk");
        fs::write(&path, b"payload").unwrap();

        let good = hex::encode(Sha256::digest(b"payload"));
        assert!(verify_sha256(&path, &good).is_ok());
        assert!(verify_sha256(&path, &good.to_uppercase()).is_ok());
        assert!(verify_sha256(&path, "deadbeef").is_err());
        // repositories without hashes skip verification
        assert!(verify_sha256(&path, "").is_ok());
    }
}
