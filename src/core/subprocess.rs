/// Helper server process supervision
///
/// Some device models are driven by an external `TelescopeServer*`
/// executable that bridges the mount's serial protocol to a local TCP
/// port. This module starts one such process per slot and terminates it
/// when the slot stops.
use anyhow::{anyhow, bail, Context, Result};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use super::{
    device_models::{server_executable_path, DeviceModelCatalog},
    logs::log_file_path,
    types::SlotNumber,
    validation::is_valid_port,
};
use crate::protocol::tty::{normalize_serial_port_name, Platform};

/// How long a helper gets to exit after the termination request
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything needed to launch the helper of one slot
#[derive(Debug, Clone, PartialEq)]
pub struct ServerLaunch {
    pub slot: SlotNumber,
    pub server: String,
    pub executable: PathBuf,
    pub tcp_port: u16,
    pub serial_port: String,
    pub log_file: Option<PathBuf>,
}

impl ServerLaunch {
    /// `<tcp port> <serial port> [log file]`
    pub fn args(&self, platform: Platform) -> Vec<String> {
        let mut args = vec![
            self.tcp_port.to_string(),
            normalize_serial_port_name(platform, &self.serial_port),
        ];
        if let Some(log_file) = &self.log_file {
            args.push(log_file.to_string_lossy().into_owned());
        }
        args
    }
}

/// A running helper process, terminated on drop
pub struct ManagedServer {
    pub launch: ServerLaunch,
    child: Child,
}

impl ManagedServer {
    pub fn spawn(launch: ServerLaunch) -> Result<Self> {
        let args = launch.args(Platform::current());
        log::info!(
            "Starting telescope server at slot {} with path {:?} and arguments {}",
            launch.slot,
            launch.executable,
            args.join(" ")
        );

        // The helper opens its own log file; nothing is read from its pipes.
        let child = Command::new(&launch.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", launch.executable))?;

        log::info!(
            "Telescope server for slot {} spawned with PID {}",
            launch.slot,
            child.id()
        );
        Ok(Self { launch, child })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::info!(
                    "Telescope server at slot {} exited with status {status:?}",
                    self.launch.slot
                );
                false
            }
            Ok(None) => true,
            Err(err) => {
                log::warn!(
                    "Failed to poll telescope server at slot {}: {err}",
                    self.launch.slot
                );
                false
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> Result<()> {
        let pid = libc::pid_t::try_from(self.child.id())
            .map_err(|_| anyhow!("PID {} out of range", self.child.id()))?;
        // SAFETY: plain signal delivery to a child we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            bail!(
                "SIGTERM to telescope server {pid} failed: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> Result<()> {
        self.child
            .kill()
            .context("Failed to close telescope server")
    }

    /// Ask the helper to exit and wait for it, killing it after `timeout`.
    ///
    /// An error means the process had to be killed or could not be reaped;
    /// either way it is no longer tracked by this handle.
    pub fn terminate(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        if let Err(err) = self.request_exit() {
            log::warn!("{err:#}");
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!(
                        "Telescope server at slot {} stopped ({status})",
                        self.launch.slot
                    );
                    return Ok(());
                }
                Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
                Err(err) => {
                    return Err(anyhow!(
                        "Waiting for telescope server at slot {} failed: {err}",
                        self.launch.slot
                    ))
                }
            }
        }

        log::warn!(
            "Telescope server at slot {} ignored the exit request, killing it",
            self.launch.slot
        );
        match self.force_kill() {
            Some(status) => bail!(
                "Telescope server at slot {} did not exit within {timeout:?}, killed ({status})",
                self.launch.slot
            ),
            None => bail!(
                "Telescope server {} at slot {} did not exit within {timeout:?} and could not be reaped",
                self.child.id(),
                self.launch.slot
            ),
        }
    }

    /// Kill and reap the helper. `None` means the process may still exist.
    fn force_kill(&mut self) -> Option<ExitStatus> {
        if let Err(err) = self.child.kill() {
            log::warn!(
                "Failed to kill telescope server {} at slot {}: {err}",
                self.child.id(),
                self.launch.slot
            );
        }
        match self.child.wait() {
            Ok(status) => Some(status),
            Err(err) => {
                log::error!(
                    "Failed to reap telescope server {} at slot {}, it may be left running: {err}",
                    self.child.id(),
                    self.launch.slot
                );
                None
            }
        }
    }
}

impl Drop for ManagedServer {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.force_kill();
        }
    }
}

/// Owns the helper processes of all slots, at most one per slot
pub struct ServerProcessSupervisor {
    server_dir: Option<PathBuf>,
    log_dir: PathBuf,
    use_logs: bool,
    stop_timeout: Duration,
    processes: BTreeMap<SlotNumber, ManagedServer>,
}

impl ServerProcessSupervisor {
    pub fn new(server_dir: Option<PathBuf>, log_dir: impl Into<PathBuf>, use_logs: bool) -> Self {
        Self {
            server_dir,
            log_dir: log_dir.into(),
            use_logs,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            processes: BTreeMap::new(),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn set_server_dir(&mut self, server_dir: Option<PathBuf>) {
        self.server_dir = server_dir;
    }

    pub fn server_dir(&self) -> Option<&Path> {
        self.server_dir.as_deref()
    }

    pub fn set_use_logs(&mut self, use_logs: bool) {
        self.use_logs = use_logs;
    }

    /// Resolve everything needed to launch the helper for `device_model`.
    pub fn plan(
        &self,
        slot: SlotNumber,
        device_model: &str,
        tcp_port: u16,
        serial_port: &str,
        catalog: &DeviceModelCatalog,
    ) -> Result<ServerLaunch> {
        if !is_valid_port(tcp_port as i64) {
            bail!("Invalid TCP port {tcp_port} for telescope server at slot {slot}");
        }
        let model = catalog
            .get(device_model)
            .ok_or_else(|| anyhow!("Unknown device model {device_model}"))?;
        let server = model.server.clone();
        if !catalog.server_executables().contains(&server) {
            bail!("No such telescope server executable: {server}");
        }
        let server_dir = self
            .server_dir
            .as_deref()
            .ok_or_else(|| anyhow!("No telescope server directory configured"))?;
        let executable = server_executable_path(server_dir, &server);
        if !executable.is_file() {
            bail!("Can't find telescope server executable {executable:?}");
        }

        Ok(ServerLaunch {
            slot,
            server,
            executable,
            tcp_port,
            serial_port: serial_port.to_string(),
            log_file: self
                .use_logs
                .then(|| log_file_path(&self.log_dir, slot)),
        })
    }

    /// Spawn the helper for `slot`. Returns as soon as the process exists;
    /// the helper starts listening on its own schedule.
    pub fn start(
        &mut self,
        slot: SlotNumber,
        device_model: &str,
        tcp_port: u16,
        serial_port: &str,
        catalog: &DeviceModelCatalog,
    ) -> Result<u32> {
        if self.processes.contains_key(&slot) {
            bail!("A telescope server is already running at slot {slot}");
        }
        let launch = self.plan(slot, device_model, tcp_port, serial_port, catalog)?;
        let server = ManagedServer::spawn(launch)?;
        let pid = server.pid();
        self.processes.insert(slot, server);
        Ok(pid)
    }

    /// Terminate the helper of `slot`. Stopping a slot without a helper
    /// succeeds. The handle is dropped even when termination fails.
    pub fn stop(&mut self, slot: SlotNumber) -> Result<()> {
        match self.processes.remove(&slot) {
            Some(mut server) => server.terminate(self.stop_timeout),
            None => Ok(()),
        }
    }

    pub fn is_running(&self, slot: SlotNumber) -> bool {
        self.processes.contains_key(&slot)
    }

    pub fn pid(&self, slot: SlotNumber) -> Option<u32> {
        self.processes.get(&slot).map(ManagedServer::pid)
    }

    pub fn slots(&self) -> Vec<SlotNumber> {
        self.processes.keys().copied().collect()
    }

    /// Forget helpers that exited on their own, returning their slots.
    pub fn reap_dead_processes(&mut self) -> Vec<SlotNumber> {
        let dead: Vec<SlotNumber> = self
            .processes
            .iter_mut()
            .filter_map(|(slot, server)| (!server.is_alive()).then_some(*slot))
            .collect();
        for slot in &dead {
            self.processes.remove(slot);
        }
        dead
    }

    pub fn shutdown_all(&mut self) {
        let slots = self.slots();
        for slot in slots {
            log::info!("Shutting down telescope server at slot {slot}");
            if let Err(err) = self.stop(slot) {
                log::warn!("{err:#}");
            }
        }
    }
}

impl Drop for ServerProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
