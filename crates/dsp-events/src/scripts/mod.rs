//! Event script discovery
//!
//! [`ScriptResolver`] maps event names to the script files that handle them.
//! Mappings come from the route map (see [`event_map`]) and, when new mapped
//! scripts turn up, from a recursive scan of the private script directory.
//! Only files that exist and can be opened are ever registered.

pub mod event_map;
pub mod runner;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

pub use event_map::{EventMap, EventMapSource, FileEventMap, MethodInfo, StaticEventMap};
pub use runner::{ProcessScriptRunner, ScriptOutput, ScriptRunner};

/// Event name → ordered, de-duplicated script paths
pub type ScriptTable = BTreeMap<String, Vec<PathBuf>>;

/// Resolves and caches event scripts
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    base_path: PathBuf,
    extension: String,
    scripts: ScriptTable,
}

impl ScriptResolver {
    /// Resolver for scripts under `base_path` ending in `.extension`
    pub fn new(base_path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            base_path: base_path.into(),
            extension: extension.trim_start_matches('.').to_string(),
            scripts: ScriptTable::new(),
        }
    }

    /// Script directory
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// The whole table
    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    /// Scripts mapped to `event_name`, in registration order
    pub fn scripts_for(&self, event_name: &str) -> &[PathBuf] {
        self.scripts
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether no scripts are mapped
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Drop every mapping
    pub fn clear(&mut self) {
        self.scripts.clear();
    }

    /// Merge `paths` into the mapping for `event_name`
    ///
    /// Missing or unreadable files are skipped. Returns how many paths were
    /// added.
    pub fn add_script<I, P>(&mut self, event_name: &str, paths: I, from_cache: bool) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = 0;

        for path in paths {
            let path = path.into();
            if !is_readable_file(&path) {
                if from_cache {
                    debug!(event_name, script = %path.display(), "Cached script no longer exists");
                } else {
                    warn!(event_name, script = %path.display(), "Script not found or unreadable, skipping");
                }
                continue;
            }

            if self.insert(event_name, path) {
                added += 1;
            }
        }

        added
    }

    /// Register every script the route map references
    ///
    /// When `scan_for_new` is set and this pass found anything new, the
    /// script directory is also scanned for drop-in files. Returns the newly
    /// mapped paths from the route map.
    pub fn check_mapped_scripts(&mut self, map: &EventMap, scan_for_new: bool) -> Vec<PathBuf> {
        let mut found = Vec::new();

        let scripts = map
            .values()
            .flat_map(|routes| routes.values())
            .flat_map(|methods| methods.values())
            .flat_map(|info| info.scripts.iter());

        for script in scripts {
            let event_key = self.event_key(script);
            let script_file = self.base_path.join(script);

            if is_readable_file(&script_file) && self.insert(&event_key, script_file.clone()) {
                found.push(script_file);
            }
        }

        if scan_for_new && !found.is_empty() {
            let scanned = self.scan_directory();
            debug!(mapped = found.len(), scanned, "Script mappings refreshed");
        }

        found
    }

    /// Register every script file under the base path not already known
    ///
    /// Event keys are the path relative to the base with `/` separators and
    /// the extension removed. Hidden files and directories are skipped.
    pub fn scan_directory(&mut self) -> usize {
        let mut added = 0;

        let entries = WalkDir::new(&self.base_path)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable script path: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file());

        let mut discovered = Vec::new();
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.base_path) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            discovered.push((self.event_key(&relative), path.to_path_buf()));
        }

        for (event_key, path) in discovered {
            if is_readable_file(&path) && self.insert(&event_key, path) {
                added += 1;
            }
        }

        added
    }

    /// The default handler script for `event_name`, if one exists on disk
    pub fn exists_for_event(&self, event_name: &str) -> Option<PathBuf> {
        let path = self
            .base_path
            .join(format!("{}.{}", event_name, self.extension));
        is_readable_file(&path).then_some(path)
    }

    /// Event key for a script file name
    pub fn event_key(&self, script: &str) -> String {
        let suffix = format!(".{}", self.extension);
        match script.len().checked_sub(suffix.len()) {
            Some(cut)
                if script.is_char_boundary(cut)
                    && script[cut..].eq_ignore_ascii_case(&suffix) =>
            {
                script[..cut].to_string()
            }
            _ => script.to_string(),
        }
    }

    fn insert(&mut self, event_key: &str, path: PathBuf) -> bool {
        let paths = self.scripts.entry(event_key.to_string()).or_default();
        if paths.contains(&path) {
            return false;
        }
        paths.push(path);
        true
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}
