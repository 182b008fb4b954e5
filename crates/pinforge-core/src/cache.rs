//! Descriptor cache with fingerprint-based invalidation
//!
//! Parsing the whole descriptor corpus is expensive, so the mapping from
//! part number to descriptor file is persisted in a flat text file. The
//! file contains two kinds of lines:
//! 1. `<part-number> <descriptor-path>`: used to populate the device list
//!    without parsing anything. The descriptor is only parsed on first
//!    access of one of its devices.
//! 2. `<absolute-path> <fingerprint>`: one per descriptor file in use, plus
//!    one per tracked repository root carrying an opaque root marker.
//!
//! Lines are told apart by whether the first token starts with `/`. A
//! missing, modified or deleted file forces a full rebuild; nothing is
//! repaired incrementally. Files that move are not detected, and cache
//! content beyond these two line shapes is rejected as stale rather
//! than interpreted. Paths must therefore be absolute Unix paths.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::{DescriptorError, DescriptorSource, Device};
use crate::fingerprint::{fingerprint, Fingerprint};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on cache file {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("No known device matches {0:?}")]
    UnknownDevice(String),
    #[error("Device {device} is not described by {}", .path.display())]
    MissingDevice { device: String, path: PathBuf },
    #[error("Descriptor {} disappeared during rebuild", .0.display())]
    Vanished(PathBuf),
}

/// Persistent storage for the serialized cache
pub trait CacheStore {
    /// Cache content, or `None` if no cache has been written yet
    fn load(&self) -> Result<Option<String>, CacheError>;

    /// Replace the cache content
    fn store(&mut self, content: &str) -> Result<(), CacheError>;
}

/// Cache stored in a single text file
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::IoError {
            path: self.path.clone(),
            source,
        }
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> Result<Option<String>, CacheError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn store(&mut self, content: &str) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&self.path, content).map_err(|e| self.io_error(e))
    }
}

/// Cache held in memory, mainly for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    content: Option<String>,
    writes: usize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Overwrite the stored content without counting it as a write
    pub fn set_content(&mut self, content: &str) {
        self.content = Some(content.to_string());
    }

    /// Number of times the cache was written
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self) -> Result<Option<String>, CacheError> {
        Ok(self.content.clone())
    }

    fn store(&mut self, content: &str) -> Result<(), CacheError> {
        self.content = Some(content.to_string());
        self.writes += 1;
        Ok(())
    }
}

/// Options controlling how the cache is validated and rebuilt
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Tracked repository roots (absolute paths)
    pub roots: Vec<PathBuf>,
    /// Family prefixes of descriptor files to parse; empty parses everything
    pub families: Vec<String>,
    /// Skip validation and always rebuild
    pub force_rebuild: bool,
}

impl CacheOptions {
    fn is_supported(&self, file: &Path) -> bool {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.families.is_empty() || self.families.iter().any(|f| name.starts_with(f.as_str()))
    }
}

/// A device known to the cache, parsed or not
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Known from the cache file, descriptor not parsed yet
    Deferred(PathBuf),
    Resolved(Device),
}

/// `<absolute-path> <fingerprint>`
fn parse_file_sha_line(line: &str) -> Option<(PathBuf, String)> {
    let (path, sha) = line.rsplit_once(' ')?;
    if !path.starts_with('/') || sha.is_empty() {
        return None;
    }
    Some((PathBuf::from(path), sha.to_string()))
}

/// `<device-identifier> <descriptor-path>`
fn parse_device_line(line: &str) -> Option<(String, PathBuf)> {
    let (device, file) = line.split_once(' ')?;
    if device.is_empty() || device.starts_with('/') || !file.starts_with('/') {
        return None;
    }
    Some((device.to_string(), PathBuf::from(file)))
}

/// Cache file content split by line shape
#[derive(Debug, Default)]
struct CacheSnapshot {
    files: Vec<(PathBuf, String)>,
    devices: Vec<(String, PathBuf)>,
}

impl CacheSnapshot {
    /// Split cache content into its two record kinds; the offending line on failure
    fn parse(text: &str) -> Result<Self, &str> {
        let mut snapshot = Self::default();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            if line.starts_with('/') {
                snapshot.files.push(parse_file_sha_line(line).ok_or(line)?);
            } else {
                snapshot.devices.push(parse_device_line(line).ok_or(line)?);
            }
        }
        Ok(snapshot)
    }
}

/// Outcome of validating a loaded cache
enum Freshness {
    Fresh(Vec<(String, PathBuf)>),
    Stale(String),
}

/// Mapping from part number to its device model, parsed on demand
pub struct DescriptorCache<S> {
    source: S,
    entries: BTreeMap<String, CacheEntry>,
    rebuilt: bool,
}

impl<S: DescriptorSource> DescriptorCache<S> {
    /// Load the cache from `store`, rebuilding it from `source` if stale
    pub fn build<C: CacheStore>(
        source: S,
        store: &mut C,
        options: &CacheOptions,
    ) -> Result<Self, CacheError> {
        let mut cache = Self {
            source,
            entries: BTreeMap::new(),
            rebuilt: false,
        };

        let freshness = if options.force_rebuild {
            Freshness::Stale("rebuild requested".to_string())
        } else {
            match store.load()? {
                None => Freshness::Stale("no cache file".to_string()),
                Some(text) => cache.validate(&text, &options.roots)?,
            }
        };

        match freshness {
            Freshness::Fresh(index) => {
                debug!(devices = index.len(), "Descriptor cache is fresh");
                for (device, file) in index {
                    cache.entries.insert(device, CacheEntry::Deferred(file));
                }
            }
            Freshness::Stale(reason) => {
                info!(reason = %reason, "Rebuilding descriptor cache");
                let content = cache.rebuild(options)?;
                store.store(&content)?;
                cache.rebuilt = true;
            }
        }

        Ok(cache)
    }

    /// Check every recorded fingerprint, stopping at the first stale record
    fn validate(&self, text: &str, roots: &[PathBuf]) -> Result<Freshness, CacheError> {
        let snapshot = match CacheSnapshot::parse(text) {
            Ok(snapshot) => snapshot,
            Err(line) => {
                warn!(line = %line, "Malformed descriptor cache line");
                return Ok(Freshness::Stale(format!("malformed line {line:?}")));
            }
        };

        for root in roots {
            let marker = self.source.root_marker(root)?;
            match snapshot.files.iter().find(|(path, _)| path == root) {
                None => {
                    return Ok(Freshness::Stale(format!("no marker for root {}", root.display())));
                }
                Some((_, stored)) if *stored != marker => {
                    return Ok(Freshness::Stale(format!("root {} changed", root.display())));
                }
                Some(_) => {}
            }
        }

        for (path, stored) in snapshot.files.iter().filter(|(path, _)| !roots.contains(path)) {
            match self.source.read(path)? {
                None => {
                    return Ok(Freshness::Stale(format!("{} no longer exists", path.display())));
                }
                Some(bytes) if fingerprint(&bytes) != Fingerprint::from_hex(stored) => {
                    return Ok(Freshness::Stale(format!("{} was modified", path.display())));
                }
                Some(_) => {}
            }
        }

        let tracked: HashSet<&PathBuf> = snapshot.files.iter().map(|(path, _)| path).collect();
        if let Some((device, file)) = snapshot.devices.iter().find(|(_, file)| !tracked.contains(file)) {
            warn!(device = %device, path = %file.display(), "Cache index references an untracked file");
            return Ok(Freshness::Stale(format!("{device} references untracked {}", file.display())));
        }

        Ok(Freshness::Fresh(snapshot.devices))
    }

    /// Parse every supported descriptor and return the new cache content
    fn rebuild(&mut self, options: &CacheOptions) -> Result<String, CacheError> {
        let files: Vec<PathBuf> = self
            .source
            .discover()?
            .into_iter()
            .filter(|file| options.is_supported(file))
            .collect();

        self.entries.clear();
        let mut index: BTreeMap<String, PathBuf> = BTreeMap::new();
        for file in &files {
            let devices = self.source.parse(file)?;
            debug!(path = %file.display(), devices = devices.len(), "Parsed descriptor");
            for device in devices {
                if let Some(previous) = index.insert(device.partname.clone(), file.clone()) {
                    warn!(
                        device = %device.partname,
                        previous = %previous.display(),
                        path = %file.display(),
                        "Device described by more than one descriptor"
                    );
                }
                self.entries.insert(device.partname.clone(), CacheEntry::Resolved(device));
            }
        }

        let referenced: BTreeSet<&PathBuf> = index.values().collect();
        let mut file_lines = Vec::with_capacity(referenced.len());
        for file in referenced {
            let bytes = self
                .source
                .read(file)?
                .ok_or_else(|| CacheError::Vanished(file.clone()))?;
            file_lines.push(format!("{} {}", file.display(), fingerprint(&bytes)));
        }
        file_lines.sort();

        let mut device_lines: Vec<String> = index
            .iter()
            .map(|(device, file)| format!("{} {}", device, file.display()))
            .collect();
        device_lines.sort();

        let mut lines = device_lines;
        lines.extend(file_lines);
        for root in &options.roots {
            lines.push(format!("{} {}", root.display(), self.source.root_marker(root)?));
        }

        info!(
            descriptors = files.len(),
            devices = index.len(),
            "Descriptor cache rebuilt"
        );

        let mut content = lines.join("\n");
        content.push('\n');
        Ok(content)
    }

    /// Whether building this cache required a full rebuild
    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// All known part numbers, sorted
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    /// First part number (in sorted order) starting with `prefix`
    pub fn find_prefix(&self, prefix: &str) -> Option<&str> {
        self.entries
            .range(prefix.to_string()..)
            .next()
            .map(|(id, _)| id.as_str())
            .filter(|id| id.starts_with(prefix))
    }

    /// Get the device model for a part number, parsing its descriptor if needed
    ///
    /// Parsing a descriptor resolves every device it describes, so later
    /// lookups of sibling part numbers are free.
    pub fn device(&mut self, id: &str) -> Result<&Device, CacheError> {
        let deferred = match self.entries.get(id) {
            None => return Err(CacheError::UnknownDevice(id.to_string())),
            Some(CacheEntry::Resolved(_)) => None,
            Some(CacheEntry::Deferred(file)) => Some(file.clone()),
        };

        if let Some(file) = &deferred {
            debug!(device = %id, path = %file.display(), "Parsing deferred descriptor");
            for device in self.source.parse(file)? {
                // Keep the rebuild's choice for part numbers indexed to another file
                let owned = match self.entries.get(&device.partname) {
                    None => true,
                    Some(CacheEntry::Deferred(indexed)) => indexed == file,
                    Some(CacheEntry::Resolved(_)) => false,
                };
                if owned {
                    self.entries.insert(device.partname.clone(), CacheEntry::Resolved(device));
                }
            }
        }

        match self.entries.get(id) {
            Some(CacheEntry::Resolved(device)) => Ok(device),
            _ => Err(CacheError::MissingDevice {
                device: id.to_string(),
                path: deferred.unwrap_or_default(),
            }),
        }
    }

    /// Get the device model for the first part number starting with `prefix`
    pub fn resolve_prefix(&mut self, prefix: &str) -> Result<&Device, CacheError> {
        let id = self
            .find_prefix(prefix)
            .ok_or_else(|| CacheError::UnknownDevice(prefix.to_string()))?
            .to_string();
        self.device(&id)
    }
}
