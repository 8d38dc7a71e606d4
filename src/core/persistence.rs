//! Descriptor persistence
//!
//! Stores the slot descriptors in `telescopes.json` inside the data
//! directory. The document is a JSON object with a `version` string and one
//! entry per configured slot, keyed by the slot number as a decimal string.
//!
//! Loading never fails: a missing, unreadable or unparsable file yields an
//! empty set, an older schema is moved aside to a timestamped backup, and
//! individual bad entries are dropped while the rest are kept. The file is
//! user-editable, so every entry goes through the same validation as
//! [`DescriptorStore::add`].

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use super::{
    types::{ConnectionDescriptor, SlotNumber, SCHEMA_VERSION},
    validation::{validate_descriptor, validate_entry, RejectReason},
};

pub const DESCRIPTORS_FILE_NAME: &str = "telescopes.json";

/// What happened during [`DescriptorStore::load`]
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: Vec<(String, RejectReason)>,
    /// Set when an obsolete document was renamed out of the way
    pub backup: Option<PathBuf>,
}

/// Schema versions are compared as plain strings.
///
/// This matches how existing documents were written ("0.2.0" < "0.3.0") but
/// would misorder a component that reaches two digits ("0.10.0" < "0.9.0").
pub fn is_older_version(found: &str, current: &str) -> bool {
    found < current
}

/// Rename `path` to `<path>.backup.<timestamp>` and return the new name.
pub fn backup_file(path: &Path) -> Result<PathBuf> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(
        ".backup.{}",
        Local::now().format("%Y-%m-%d-%H-%M-%S")
    ));
    let backup = PathBuf::from(backup);
    fs::rename(path, &backup)
        .with_context(|| format!("Failed to back up {path:?} as {backup:?}"))?;
    Ok(backup)
}

/// Read the `version` field of a JSON document, defaulting to "0.0.0".
pub fn document_version(document: &Map<String, Value>) -> &str {
    document
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("0.0.0")
}

fn descriptor_to_json(descriptor: &ConnectionDescriptor) -> Value {
    let mut entry = Map::new();
    entry.insert("name".into(), Value::from(descriptor.name.clone()));
    entry.insert(
        "connection".into(),
        Value::from(descriptor.connection_kind.as_ref()),
    );
    entry.insert("equinox".into(), Value::from(descriptor.equinox.as_ref()));
    if let Some(host) = &descriptor.host {
        entry.insert("host_name".into(), Value::from(host.clone()));
    }
    if let Some(port) = descriptor.tcp_port {
        entry.insert("tcp_port".into(), Value::from(port));
    }
    if let Some(delay) = descriptor.delay_micros {
        entry.insert("delay".into(), Value::from(delay));
    }
    entry.insert(
        "connect_at_startup".into(),
        Value::from(descriptor.connect_at_startup),
    );
    if !descriptor.fov_circles.is_empty() {
        entry.insert("circles".into(), Value::from(descriptor.fov_circles.clone()));
    }
    if let Some(model) = &descriptor.device_model_name {
        entry.insert("device_model".into(), Value::from(model.clone()));
    }
    if let Some(port) = &descriptor.serial_port {
        entry.insert("serial_port".into(), Value::from(port.clone()));
    }
    Value::Object(entry)
}

/// Fold the entries of a parsed document into a descriptor map.
fn collect_entries(
    document: &Map<String, Value>,
) -> (
    BTreeMap<SlotNumber, ConnectionDescriptor>,
    Vec<(String, RejectReason)>,
) {
    document
        .iter()
        .filter(|(key, _)| key.as_str() != "version")
        .fold(
            (BTreeMap::new(), Vec::new()),
            |(mut accepted, mut rejected), (key, raw)| {
                match validate_entry(key, raw) {
                    Ok((slot, descriptor)) => {
                        accepted.insert(slot, descriptor);
                    }
                    Err(reason) => {
                        log::debug!("Dropping telescope entry '{key}': {reason}");
                        rejected.push((key.clone(), reason));
                    }
                }
                (accepted, rejected)
            },
        )
}

/// In-memory descriptor map backed by `telescopes.json`
pub struct DescriptorStore {
    path: PathBuf,
    descriptors: RwLock<BTreeMap<SlotNumber, ConnectionDescriptor>>,
}

impl DescriptorStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::with_path(data_dir.as_ref().join(DESCRIPTORS_FILE_NAME))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            descriptors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory set with the contents of the file.
    pub fn load(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let loaded = match self.read_document(&mut report) {
            Some(document) => {
                let (accepted, rejected) = collect_entries(&document);
                report.accepted = accepted.len();
                report.rejected = rejected;
                accepted
            }
            None => BTreeMap::new(),
        };

        if !report.rejected.is_empty() {
            log::warn!(
                "Dropped {} invalid telescope entries from {:?}",
                report.rejected.len(),
                self.path
            );
        }
        log::info!(
            "Loaded {} telescope descriptors from {:?}",
            report.accepted,
            self.path
        );
        *self.descriptors.write() = loaded;
        report
    }

    fn read_document(&self, report: &mut LoadReport) -> Option<Map<String, Value>> {
        if !self.path.exists() {
            log::debug!("No telescopes file found at {:?}", self.path);
            return None;
        }

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Can't read telescopes from {:?}: {err}", self.path);
                return None;
            }
        };
        let document = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(document)) => document,
            Ok(_) => {
                log::warn!("Telescopes file {:?} is not a JSON object", self.path);
                return None;
            }
            Err(err) => {
                log::warn!("Can't parse telescopes file {:?}: {err}", self.path);
                return None;
            }
        };

        let version = document_version(&document);
        if is_older_version(version, SCHEMA_VERSION) {
            match backup_file(&self.path) {
                Ok(backup) => {
                    log::warn!(
                        "Telescopes file version {version} is obsolete, backed up as {backup:?}"
                    );
                    report.backup = Some(backup);
                }
                Err(err) => log::warn!("{err:#}"),
            }
            return None;
        }

        Some(document)
    }

    /// Write every descriptor, stamped with the current schema version.
    ///
    /// The map stays read-locked for the whole write, so concurrent
    /// `add`/`remove` calls wait until the file is complete.
    pub fn save(&self) -> Result<()> {
        let descriptors = self.descriptors.read();

        let mut document = Map::new();
        document.insert("version".into(), Value::from(SCHEMA_VERSION));
        for (slot, descriptor) in descriptors.iter() {
            document.insert(slot.to_string(), descriptor_to_json(descriptor));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {parent:?}"))?;
            }
        }
        let json = serde_json::to_string_pretty(&Value::Object(document))
            .context("Failed to serialize telescopes")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write telescopes to {:?}", self.path))?;

        log::debug!(
            "Saved {} telescope descriptors to {:?}",
            descriptors.len(),
            self.path
        );
        Ok(())
    }

    /// Validate and store a descriptor, replacing any previous one.
    pub fn add(&self, slot: SlotNumber, descriptor: ConnectionDescriptor) -> Result<(), RejectReason> {
        let descriptor = validate_descriptor(descriptor)?;
        self.descriptors.write().insert(slot, descriptor);
        Ok(())
    }

    pub fn get(&self, slot: SlotNumber) -> Option<ConnectionDescriptor> {
        self.descriptors.read().get(&slot).cloned()
    }

    /// Returns whether a descriptor was present.
    pub fn remove(&self, slot: SlotNumber) -> bool {
        self.descriptors.write().remove(&slot).is_some()
    }

    pub fn contains(&self, slot: SlotNumber) -> bool {
        self.descriptors.read().contains_key(&slot)
    }

    /// Configured slots in ascending order
    pub fn slots(&self) -> Vec<SlotNumber> {
        self.descriptors.read().keys().copied().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<SlotNumber, ConnectionDescriptor> {
        self.descriptors.read().clone()
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConnectionKind, Equinox};

    fn slot(n: i64) -> SlotNumber {
        SlotNumber::new(n).unwrap()
    }

    #[test]
    fn version_comparison_is_lexicographic() {
        assert!(is_older_version("0.2.0", "0.3.0"));
        assert!(!is_older_version("0.3.0", "0.3.0"));
        assert!(is_older_version("0.0.0", SCHEMA_VERSION));
        // Documented limitation of string ordering.
        assert!(is_older_version("0.10.0", "0.9.0"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        let report = store.load();
        assert_eq!(report.accepted, 0);
        assert!(report.backup.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        store.load();
        assert!(store.is_empty());
    }

    #[test]
    fn crud_is_independent_of_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        let descriptor =
            ConnectionDescriptor::new("Sim", ConnectionKind::Virtual).with_equinox(Equinox::JNow);

        store.add(slot(2), descriptor.clone()).unwrap();
        assert_eq!(store.get(slot(2)), Some(descriptor));
        assert!(!store.path().exists());
        assert!(store.remove(slot(2)));
        assert!(!store.remove(slot(2)));
        assert_eq!(store.get(slot(2)), None);
    }

    #[test]
    fn invalid_descriptor_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        let remote_without_host =
            ConnectionDescriptor::new("Far", ConnectionKind::Remote).with_tcp(10001, 500);
        assert!(store.add(slot(1), remote_without_host).is_err());
        assert!(store.get(slot(1)).is_none());
    }

    #[test]
    fn save_stamps_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::new(dir.path());
        store
            .add(slot(4), ConnectionDescriptor::new("Sim", ConnectionKind::Virtual))
            .unwrap();
        store.save().unwrap();

        let document: Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(document_version(document.as_object().unwrap()), SCHEMA_VERSION);
        assert_eq!(document["4"]["connection"], "virtual");
        assert_eq!(document["4"]["equinox"], "J2000");
        assert!(document["4"].get("circles").is_none());
    }
}
