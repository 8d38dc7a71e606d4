/// Device model catalog
///
/// `device_models.json` lists the hardware the slot manager knows how to
/// talk to and which helper server speaks each model's serial protocol. A
/// copy of the document is compiled into the binary and is used whenever
/// the on-disk one is missing, unreadable or older than [`SCHEMA_VERSION`].
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use super::{
    persistence::{backup_file, is_older_version},
    types::{DEFAULT_DELAY, SCHEMA_VERSION},
};

pub const DEVICE_MODELS_FILE_NAME: &str = "device_models.json";

/// File name prefix shared by every helper server executable
pub const SERVER_EXECUTABLE_PREFIX: &str = "TelescopeServer";

/// Servers with an in-process implementation
pub const EMBEDDED_SERVERS: &[&str] = &[
    "TelescopeServerDummy",
    "TelescopeServerLx200",
    "TelescopeServerNexStar",
];

pub const EMBEDDED_CATALOG: &str = include_str!("../../res/device_models.json");

const DEFAULT_DESCRIPTION: &str = "No description is available.";

pub fn is_embedded_server(server: &str) -> bool {
    EMBEDDED_SERVERS.contains(&server)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceModel {
    pub name: String,
    pub description: String,
    /// Executable base name, e.g. `TelescopeServerLx200`
    pub server: String,
    pub default_delay: u32,
    /// Drive this model through an external helper process
    pub use_executable: bool,
}

/// Where the model list of the last [`DeviceModelCatalog::load`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    Disk,
    Embedded,
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

#[cfg(not(any(unix, windows)))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Collect the base names of the helper executables found in `dir`.
pub fn scan_server_executables(dir: &Path) -> BTreeSet<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("No telescope server directory at {dir:?}: {err}");
            return BTreeSet::new();
        }
    };

    let servers: BTreeSet<String> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_executable(path))
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        })
        .filter(|stem| stem.starts_with(SERVER_EXECUTABLE_PREFIX))
        .collect();

    if servers.is_empty() {
        log::warn!("No telescope server executables found in {dir:?}");
    }
    servers
}

/// Location of a helper executable inside `dir`.
pub fn server_executable_path(dir: &Path, server: &str) -> PathBuf {
    if cfg!(windows) {
        dir.join(format!("{server}.exe"))
    } else {
        dir.join(server)
    }
}

/// Turn the raw `list` of a catalog document into usable models.
///
/// Models without a name or server, duplicates, and models whose server is
/// neither an available executable nor embedded are dropped.
pub fn build_models(
    list: &[Value],
    executables: &BTreeSet<String>,
    use_server_executables: bool,
) -> BTreeMap<String, DeviceModel> {
    let mut models = BTreeMap::new();
    for raw in list {
        let Some(entry) = raw.as_object() else {
            continue;
        };
        let name = match entry.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                log::warn!("Skipping device model without a name");
                continue;
            }
        };
        if models.contains_key(&name) {
            log::warn!("Skipping device model: duplicate name {name}");
            continue;
        }
        let server = match entry.get("server").and_then(Value::as_str) {
            Some(server) if !server.trim().is_empty() => server.to_string(),
            _ => {
                log::warn!("Skipping device model: no server specified for {name}");
                continue;
            }
        };

        let use_executable = if use_server_executables && executables.contains(&server) {
            log::debug!("Using telescope server executable for {name}");
            true
        } else if is_embedded_server(&server) {
            if use_server_executables {
                log::warn!("No external server executable for {name}, using embedded {server}");
            }
            false
        } else {
            log::warn!("Skipping device model: no server {server} found for {name}");
            continue;
        };

        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DESCRIPTION)
            .to_string();
        let default_delay = entry
            .get("default_delay")
            .and_then(Value::as_u64)
            .and_then(|delay| u32::try_from(delay).ok())
            .unwrap_or(DEFAULT_DELAY);

        models.insert(
            name.clone(),
            DeviceModel {
                name,
                description,
                server,
                default_delay,
                use_executable,
            },
        );
    }
    models
}

pub struct DeviceModelCatalog {
    path: PathBuf,
    models: BTreeMap<String, DeviceModel>,
    server_executables: BTreeSet<String>,
    source: CatalogSource,
}

impl DeviceModelCatalog {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(DEVICE_MODELS_FILE_NAME),
            models: BTreeMap::new(),
            server_executables: BTreeSet::new(),
            source: CatalogSource::Embedded,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the embedded catalog to `path`.
    pub fn restore_default_to(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {parent:?}"))?;
        }
        fs::write(path, EMBEDDED_CATALOG)
            .with_context(|| format!("Failed to copy default device models to {path:?}"))?;
        let mut permissions = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
        log::debug!("Default device models list copied to {path:?}");
        Ok(())
    }

    /// Make sure the on-disk catalog is present and current.
    ///
    /// Returns the source the models should be read from.
    fn prepare_source(&self) -> CatalogSource {
        if !self.path.exists() {
            return match Self::restore_default_to(&self.path) {
                Ok(()) => CatalogSource::Disk,
                Err(err) => {
                    log::warn!("{err:#}");
                    CatalogSource::Embedded
                }
            };
        }

        let document = match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str::<Value>(&text).ok(),
            Err(err) => {
                log::warn!("Can't read device models from {:?}: {err}", self.path);
                return CatalogSource::Embedded;
            }
        };
        let version = document
            .as_ref()
            .and_then(|doc| doc.get("version"))
            .and_then(Value::as_str)
            .unwrap_or("0.0.0");
        if !is_older_version(version, SCHEMA_VERSION) {
            return CatalogSource::Disk;
        }

        match backup_file(&self.path) {
            Ok(backup) => {
                log::warn!("Device models list is obsolete, backed up as {backup:?}");
                match Self::restore_default_to(&self.path) {
                    Ok(()) => CatalogSource::Disk,
                    Err(err) => {
                        log::warn!("{err:#}");
                        CatalogSource::Embedded
                    }
                }
            }
            Err(err) => {
                log::warn!("Device models list is obsolete: {err:#}");
                CatalogSource::Embedded
            }
        }
    }

    fn read_list(&self, source: CatalogSource) -> Vec<Value> {
        let text = match source {
            CatalogSource::Disk => match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(err) => {
                    log::warn!("Can't read device models from {:?}: {err}", self.path);
                    EMBEDDED_CATALOG.to_string()
                }
            },
            CatalogSource::Embedded => EMBEDDED_CATALOG.to_string(),
        };
        let document = serde_json::from_str::<Value>(&text).unwrap_or_else(|err| {
            log::warn!("Can't parse device models list: {err}");
            serde_json::from_str(EMBEDDED_CATALOG).unwrap_or(Value::Null)
        });
        document
            .get("list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild the model list.
    ///
    /// `server_dir` is scanned for helper executables only when
    /// `use_server_executables` is set.
    pub fn load(&mut self, use_server_executables: bool, server_dir: Option<&Path>) -> CatalogSource {
        let source = self.prepare_source();
        if source == CatalogSource::Embedded {
            log::warn!("Using embedded device models list");
        }
        let list = self.read_list(source);

        self.server_executables = match server_dir {
            Some(dir) if use_server_executables => scan_server_executables(dir),
            _ => BTreeSet::new(),
        };
        if use_server_executables && self.server_executables.is_empty() {
            log::warn!("Only embedded telescope servers are available");
        }

        self.models = build_models(&list, &self.server_executables, use_server_executables);
        self.source = source;
        if self.models.is_empty() {
            log::error!("No telescope device models are available");
        } else {
            log::info!("Loaded {} device models", self.models.len());
        }
        source
    }

    pub fn get(&self, name: &str) -> Option<&DeviceModel> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &DeviceModel> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn server_executables(&self) -> &BTreeSet<String> {
        &self.server_executables
    }

    pub fn source(&self) -> CatalogSource {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executables(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn embedded_catalog_is_current() {
        let document: Value = serde_json::from_str(EMBEDDED_CATALOG).unwrap();
        assert_eq!(document["version"], SCHEMA_VERSION);
        assert!(!document["list"].as_array().unwrap().is_empty());
    }

    #[test]
    fn executable_wins_when_enabled() {
        let list = vec![json!({"name": "Meade-ETX", "server": "TelescopeServerLx200"})];
        let models = build_models(&list, &executables(&["TelescopeServerLx200"]), true);
        assert!(models["Meade-ETX"].use_executable);
        assert_eq!(models["Meade-ETX"].default_delay, DEFAULT_DELAY);
        assert_eq!(models["Meade-ETX"].description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn disabled_executables_fall_back_to_embedded_or_drop() {
        let list = vec![
            json!({"name": "Meade-ETX", "server": "TelescopeServerLx200"}),
            json!({"name": "Autostar", "server": "TelescopeServerAutostar"}),
        ];
        let found = executables(&["TelescopeServerLx200", "TelescopeServerAutostar"]);

        let models = build_models(&list, &found, false);
        assert!(!models["Meade-ETX"].use_executable);
        assert!(!models.contains_key("Autostar"));

        let models = build_models(&list, &found, true);
        assert!(models["Autostar"].use_executable);
    }

    #[test]
    fn missing_executable_without_embedded_is_dropped() {
        let list = vec![json!({"name": "Autostar", "server": "TelescopeServerAutostar"})];
        assert!(build_models(&list, &BTreeSet::new(), true).is_empty());
    }

    #[test]
    fn duplicates_and_blank_entries_are_skipped() {
        let list = vec![
            json!({"name": "Mount", "server": "TelescopeServerDummy", "default_delay": 42}),
            json!({"name": "Mount", "server": "TelescopeServerLx200"}),
            json!({"name": "", "server": "TelescopeServerDummy"}),
            json!({"name": "No server", "server": ""}),
            json!("not an object"),
        ];
        let models = build_models(&list, &BTreeSet::new(), false);
        assert_eq!(models.len(), 1);
        assert_eq!(models["Mount"].server, "TelescopeServerDummy");
        assert_eq!(models["Mount"].default_delay, 42);
    }

    #[test]
    fn missing_catalog_is_restored_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = DeviceModelCatalog::new(dir.path());
        assert_eq!(catalog.load(false, None), CatalogSource::Disk);
        assert!(catalog.path().exists());
        assert!(catalog.contains("Meade-ETX"));
        assert!(!catalog.contains("Meade Autostar compatible"));
    }

    #[test]
    fn stale_catalog_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = DeviceModelCatalog::new(dir.path());
        let stale = r#"{"version": "0.1.0", "list": [{"name": "Old", "server": "TelescopeServerDummy"}]}"#;
        fs::write(catalog.path(), stale).unwrap();

        catalog.load(false, None);
        assert!(!catalog.contains("Old"));
        assert!(catalog.contains("Virtual Telescope"));

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(backups[0].path()).unwrap(), stale);
    }

    #[test]
    fn unwritable_directory_uses_embedded_list() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the data directory should be makes every write fail.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();
        let mut catalog = DeviceModelCatalog::new(&blocker);
        assert_eq!(catalog.load(false, None), CatalogSource::Embedded);
        assert!(!catalog.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn scan_finds_only_prefixed_executables() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        for (name, mode) in [
            ("TelescopeServerLx200", 0o755),
            ("TelescopeServerNotExec", 0o644),
            ("OtherTool", 0o755),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        }
        assert_eq!(
            scan_server_executables(dir.path()),
            executables(&["TelescopeServerLx200"])
        );
    }
}
