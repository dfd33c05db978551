//! Repository configuration and index cache refresh.
//!
//! Each repository is one file in the repo config dir: one mirror URL per
//! line, `#` comments allowed. Refresh tries mirrors in order and takes
//! the first HTTP 200; the cached index is replaced atomically so a
//! concurrent reader never sees a torn file.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::index::Index;

pub const INDEX_FILE: &str = "index-v2.json";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub mirrors: Vec<String>,
}

/// Parse one repo config file.
pub fn parse_repo_file(name: &str, contents: &str) -> Repository {
    let mirrors = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    Repository {
        name: name.to_string(),
        mirrors,
    }
}

/// Load all repositories, in deterministic file-name order. That order is
/// also the precedence order for upgrade resolution.
pub fn load_repositories(dir: &Path) -> Result<Vec<Repository>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("reading repo config dir {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    let mut repos = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let contents = fs::read_to_string(entry.path())
            .with_context(|| format!("reading repo config {}", entry.path().display()))?;
        let repo = parse_repo_file(&name, &contents);
        if repo.mirrors.is_empty() {
            warn!("repository {name} has no mirrors, skipping");
            continue;
        }
        repos.push(repo);
    }
    Ok(repos)
}

/// Join a mirror base URL with a mirror-relative file path.
pub fn mirror_url(mirror: &str, file: &str) -> String {
    let base = mirror.trim_end_matches('/');
    if file.starts_with('/') {
        format!("{base}{file}")
    } else {
        format!("{base}/{file}")
    }
}

pub struct IndexCache {
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl IndexCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            cache_dir: cache_dir.into(),
            client,
        })
    }

    pub fn index_path(&self, repo_name: &str) -> PathBuf {
        self.cache_dir.join(repo_name).join(INDEX_FILE)
    }

    /// First mirror answering with HTTP 200 wins; the rest are skipped.
    async fn fetch_index(&self, repo: &Repository) -> Option<Vec<u8>> {
        for mirror in &repo.mirrors {
            let url = mirror_url(mirror, INDEX_FILE);
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => {
                        debug!("fetched index for {} from {url}", repo.name);
                        return Some(body.to_vec());
                    }
                    Err(e) => warn!("reading index body from {url} failed: {e}"),
                },
                Ok(resp) => warn!("mirror {url} answered {}", resp.status()),
                Err(e) => warn!("mirror {url} unreachable: {e}"),
            }
        }
        None
    }

    /// Refresh one repository's cached index. Returns false when no mirror
    /// produced a parseable document; the previous cache stays intact.
    pub async fn refresh_repo(&self, repo: &Repository) -> bool {
        let Some(body) = self.fetch_index(repo).await else {
            warn!("no usable mirror for {}", repo.name);
            return false;
        };

        if let Err(e) = serde_json::from_slice::<Index>(&body) {
            warn!("index for {} does not parse: {e}", repo.name);
            return false;
        }

        match self.replace_index(&repo.name, &body) {
            Ok(()) => {
                info!("updated index for {}", repo.name);
                true
            }
            Err(e) => {
                warn!("writing index for {} failed: {e}", repo.name);
                false
            }
        }
    }

    fn replace_index(&self, repo_name: &str, body: &[u8]) -> std::io::Result<()> {
        let dir = self.cache_dir.join(repo_name);
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{INDEX_FILE}.part"));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, dir.join(INDEX_FILE))
    }

    /// Refresh every repository concurrently. The overall result is the
    /// AND of the per-repo results.
    pub async fn refresh_all(&self, repos: &[Repository]) -> bool {
        let results =
            futures::future::join_all(repos.iter().map(|repo| self.refresh_repo(repo))).await;
        results.into_iter().all(|ok| ok)
    }

    pub fn load_index(&self, repo_name: &str) -> Result<Index> {
        let path = self.index_path(repo_name);
        let data = fs::read(&path)
            .with_context(|| format!("reading cached index {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing cached index for {repo_name}"))
    }

    /// Download a package file to `dest`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("downloading {url}"))?;
        if !resp.status().is_success() {
            bail!("download {url} answered {}", resp.status());
        }
        let body = resp.bytes().await.context("reading package body")?;
        fs::write(dest, &body)
            .with_context(|| format!("writing download to {}", dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_repo_file_skips_comments_and_blanks() {
        let repo = parse_repo_file(
            "fdroid",
            "# primary\nhttps://mirror.one/repo\n\n  https://mirror.two/repo  \n# trailing\n",
        );
        assert_eq!(repo.name, "fdroid");
        assert_eq!(
            repo.mirrors,
            vec![
                "https://mirror.one/repo".to_string(),
                "https://mirror.two/repo".to_string()
            ]
        );
    }

    #[test]
    fn test_load_repositories_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b-repo"), "https://b.example/repo\n").unwrap();
        fs::write(dir.path().join("a-repo"), "https://a.example/repo\n").unwrap();
        fs::write(dir.path().join("empty"), "# no mirrors\n").unwrap();

        let repos = load_repositories(dir.path()).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "a-repo");
        assert_eq!(repos[1].name, "b-repo");
    }

    #[test]
    fn test_mirror_url_join() {
        assert_eq!(
            mirror_url("https://m.example/repo/", "/app.apk"),
            "https://m.example/repo/app.apk"
        );
        assert_eq!(
            mirror_url("https://m.example/repo", "index-v2.json"),
            "https://m.example/repo/index-v2.json"
        );
    }

    /// Serve `count` requests with a canned HTTP response body.
    async fn one_shot_server(body: &'static str, count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..count {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_second_mirror() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path()).unwrap();
        let good = one_shot_server(r#"{"packages":{}}"#, 1).await;

        let repo = Repository {
            name: "fdroid".to_string(),
            // nothing listens on the first mirror
            mirrors: vec!["http://127.0.0.1:1".to_string(), good],
        };

        assert!(cache.refresh_repo(&repo).await);
        let index = cache.load_index("fdroid").unwrap();
        assert!(index.packages.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_fails_when_all_mirrors_fail() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path()).unwrap();

        let repo = Repository {
            name: "dead".to_string(),
            mirrors: vec![
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:2".to_string(),
            ],
        };

        assert!(!cache.refresh_repo(&repo).await);
        assert!(!cache.refresh_all(std::slice::from_ref(&repo)).await);
        assert!(cache.load_index("dead").is_err());
    }

    #[tokio::test]
    async fn test_refresh_rejects_unparseable_index() {
        let dir = tempdir().unwrap();
        let cache = IndexCache::new(dir.path()).unwrap();
        let bad = one_shot_server("this is not json", 1).await;

        let repo = Repository {
            name: "broken".to_string(),
            mirrors: vec![bad],
        };
        assert!(!cache.refresh_repo(&repo).await);
    }
}
