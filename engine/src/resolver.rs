//! Discovery of real mount paths behind logical storage locations.
//!
//! The same storage volume is reachable under several mount points depending
//! on the device and OS release, and not all of them are usable from a
//! privileged context. The resolver tries a fixed, ordered list of candidate
//! templates and remembers the first usable one per key for as long as the
//! resolver lives. Negative results are remembered too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Kind used by `MountPathResolver::resolve_shadow`.
pub const SHADOW_KIND: &str = "shadow";

const ANDROID_KIND: &str = "Android";

/// Decides whether a candidate path can be used.
pub trait UsablePath: Send + Sync {
    fn is_usable(&self, path: &Path) -> bool;
}

impl<F> UsablePath for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_usable(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Path exists, is readable and is writable (checked in that order).
#[derive(Debug, Clone, Copy, Default)]
pub struct WritablePath;

impl UsablePath for WritablePath {
    fn is_usable(&self, path: &Path) -> bool {
        path_exists(path) && is_readable(path) && is_writable(path)
    }
}

/// Path exists and is readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadablePath;

impl UsablePath for ReadablePath {
    fn is_usable(&self, path: &Path) -> bool {
        path_exists(path) && is_readable(path)
    }
}

fn path_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

#[cfg(unix)]
fn is_readable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::R_OK).is_ok()
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn is_readable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Candidate mount templates.
///
/// Templates may contain `{user}`, `{storage}` and `{subpath}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Ordered candidates per resolution kind
    pub candidates: BTreeMap<String, Vec<String>>,

    /// Ordered candidates for the per-user Android folder base
    pub android_base: Vec<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        let mut candidates = BTreeMap::new();
        candidates.insert(
            SHADOW_KIND.to_string(),
            vec![
                "/mnt/media_rw/{storage}/{subpath}".to_string(),
                "/mnt/pass_through/{user}/{storage}/{subpath}".to_string(),
                "/mnt/runtime/full/{storage}/{subpath}".to_string(),
                "/mnt/runtime/default/{storage}/{subpath}".to_string(),
            ],
        );
        MountConfig {
            candidates,
            android_base: vec![
                "/data/media/{user}/Android".to_string(),
                "/mnt/pass_through/{user}/emulated/{user}/Android".to_string(),
                "/mnt/user/{user}/emulated/{user}/Android".to_string(),
            ],
        }
    }
}

/// Substitute placeholders in `template`.
fn expand(template: &str, user: &str, storage: &str, sub_path: &str) -> PathBuf {
    let expanded = template
        .replace("{user}", user)
        .replace("{storage}", storage)
        .replace("{subpath}", sub_path.trim_matches('/'));
    let trimmed = expanded.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Resolves logical storage locations to real mount paths.
///
/// Share one resolver across workers (e.g. behind an `Arc`). Lookups and
/// inserts are safe from any thread; two workers racing on the same key both
/// probe and the last insert wins, which is harmless since the probe result
/// is the same for a given key.
#[derive(Debug, Default)]
pub struct MountPathResolver {
    config: MountConfig,
    cache: DashMap<String, Option<PathBuf>>,
}

impl MountPathResolver {
    pub fn new(config: MountConfig) -> Self {
        MountPathResolver {
            config,
            cache: DashMap::new(),
        }
    }

    /// Resolve `kind:user:storage:sub_path` to the first usable candidate.
    ///
    /// A cached result, positive or negative, is returned without probing.
    /// `None` means the storage is not reachable through any known mount on
    /// this device; it is not a transient condition.
    pub fn resolve(
        &self,
        kind: &str,
        user: &str,
        storage: &str,
        sub_path: &str,
        usable: &dyn UsablePath,
    ) -> Option<PathBuf> {
        let key = format!("{kind}:{user}:{storage}:{sub_path}");
        if let Some(cached) = self.cache.get(&key) {
            debug!(%key, "mount path served from cache");
            return cached.value().clone();
        }

        let templates = self.config.candidates.get(kind).map(Vec::as_slice).unwrap_or_default();
        if templates.is_empty() {
            warn!(%key, kind, "no mount candidates configured for kind");
        }

        let found = templates
            .iter()
            .map(|template| expand(template, user, storage, sub_path))
            .find(|candidate| usable.is_usable(candidate));

        match &found {
            Some(path) => info!(%key, path = %path.display(), "found mount path"),
            None => warn!(%key, candidates = templates.len(), "no usable mount path"),
        }
        self.cache.insert(key, found.clone());
        found
    }

    /// Resolve a shadow mount with the default writability check.
    pub fn resolve_shadow(&self, user: &str, storage: &str, sub_path: &str) -> Option<PathBuf> {
        self.resolve(SHADOW_KIND, user, storage, sub_path, &WritablePath)
    }

    /// Resolve `sub_path` inside the user's Android folder.
    ///
    /// Only the Android base is probed, once per user. The sub path is
    /// appended to the resolved base without checking that it exists.
    pub fn resolve_android_folder(&self, user: &str, sub_path: &str, usable: &dyn UsablePath) -> Option<PathBuf> {
        let key = format!("{ANDROID_KIND}:{user}:{sub_path}");
        if let Some(cached) = self.cache.get(&key) {
            return cached.value().clone();
        }

        let base_key = format!("{ANDROID_KIND}:{user}:");
        let cached_base = self.cache.get(&base_key).map(|entry| entry.value().clone());
        let base = match cached_base {
            Some(base) => base,
            None => {
                let found = self
                    .config
                    .android_base
                    .iter()
                    .map(|template| expand(template, user, "", ""))
                    .find(|candidate| usable.is_usable(candidate));
                match &found {
                    Some(path) => info!(key = %base_key, path = %path.display(), "found Android folder"),
                    None => warn!(key = %base_key, "no usable Android folder"),
                }
                self.cache.insert(base_key, found.clone());
                found
            }
        };

        // A missing base is already cached under the base key
        let target = base.map(|base| join_sub_path(&base, sub_path))?;
        self.cache.insert(key, Some(target.clone()));
        Some(target)
    }

    /// Look up a cache entry by its full key.
    pub fn cached(&self, key: &str) -> Option<Option<PathBuf>> {
        self.cache.get(key).map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

fn join_sub_path(base: &Path, sub_path: &str) -> PathBuf {
    let sub_path = sub_path.trim_matches('/');
    if sub_path.is_empty() {
        base.to_path_buf()
    } else {
        base.join(sub_path)
    }
}
