/// Per-slot communication logs
///
/// Every active slot owns a [`LogChannel`]. With logging disabled the
/// channel silently discards what it is given, so connection code can
/// always write to it without checking any flag first.
use chrono::Local;
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use super::types::SlotNumber;

/// Deterministic log file location for a slot
pub fn log_file_path(data_dir: &Path, slot: SlotNumber) -> PathBuf {
    data_dir.join(format!("log_TelescopeServer{slot}.txt"))
}

/// Log sink of one slot
pub enum LogChannel {
    Discard,
    File { path: PathBuf, file: File },
}

impl LogChannel {
    /// Create (truncating) the log file, falling back to a discarding sink.
    pub fn create(path: PathBuf) -> Self {
        match File::create(&path) {
            Ok(file) => LogChannel::File { path, file },
            Err(err) => {
                log::warn!("Unable to create a log file {path:?}: {err}");
                LogChannel::Discard
            }
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, LogChannel::File { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LogChannel::File { path, .. } => Some(path),
            LogChannel::Discard => None,
        }
    }

    /// Write one timestamped line. Write errors are ignored.
    pub fn line(&mut self, message: impl fmt::Display) {
        if let LogChannel::File { file, .. } = self {
            let _ = writeln!(
                file,
                "{} {message}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
            );
        }
    }
}

impl Write for LogChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogChannel::Discard => Ok(buf.len()),
            LogChannel::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogChannel::Discard => Ok(()),
            LogChannel::File { file, .. } => file.flush(),
        }
    }
}

impl fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogChannel::Discard => write!(f, "LogChannel::Discard"),
            LogChannel::File { path, .. } => write!(f, "LogChannel::File({path:?})"),
        }
    }
}

/// Owns the log channels of all active slots
pub struct LogChannelRegistry {
    data_dir: PathBuf,
    enabled: bool,
    channels: BTreeMap<SlotNumber, LogChannel>,
    current: Option<SlotNumber>,
}

impl LogChannelRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            enabled,
            channels: BTreeMap::new(),
            current: None,
        }
    }

    /// Only affects channels opened afterwards.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Channel of `slot`, created on first use.
    pub fn open(&mut self, slot: SlotNumber) -> &mut LogChannel {
        let enabled = self.enabled;
        let data_dir = &self.data_dir;
        self.channels.entry(slot).or_insert_with(|| {
            if enabled {
                LogChannel::create(log_file_path(data_dir, slot))
            } else {
                LogChannel::Discard
            }
        })
    }

    /// Register a discarding channel for a slot whose log file belongs to a
    /// helper process.
    pub fn open_discarding(&mut self, slot: SlotNumber) -> &mut LogChannel {
        self.channels.entry(slot).or_insert(LogChannel::Discard)
    }

    /// Make `slot`'s channel the current one and hand it out.
    pub fn touch(&mut self, slot: SlotNumber) -> &mut LogChannel {
        self.current = Some(slot);
        self.open(slot)
    }

    pub fn current_slot(&self) -> Option<SlotNumber> {
        self.current
    }

    pub fn current(&mut self) -> Option<&mut LogChannel> {
        let slot = self.current?;
        self.channels.get_mut(&slot)
    }

    /// Close and forget the channel of `slot`.
    pub fn remove(&mut self, slot: SlotNumber) -> bool {
        if self.current == Some(slot) {
            self.current = None;
        }
        match self.channels.remove(&slot) {
            Some(mut channel) => {
                let _ = channel.flush();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, slot: SlotNumber) -> bool {
        self.channels.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
