use super::{logs::LogChannelRegistry, slots::SlotRegistry, types::SlotNumber};

/// Outcome of one communication tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub communicated: Vec<SlotNumber>,
    /// Not ready this tick
    pub skipped: Vec<SlotNumber>,
    pub failed: Vec<SlotNumber>,
}

/// Give every live connection its turn, in slot order.
///
/// Each slot's log channel becomes the current one before its connection
/// runs. A failing connection is logged and the remaining slots still run.
pub fn communicate(registry: &mut SlotRegistry, logs: &mut LogChannelRegistry) -> PumpReport {
    let mut report = PumpReport::default();
    for (slot, client) in registry.iter_mut() {
        let channel = logs.touch(slot);
        if !client.prepare_communication(channel) {
            report.skipped.push(slot);
            continue;
        }
        match client.perform_communication(channel) {
            Ok(()) => report.communicated.push(slot),
            Err(err) => {
                log::warn!("Communication with {} at slot {slot} failed: {err:#}", client.name());
                report.failed.push(slot);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        client::TelescopeClient,
        logs::LogChannel,
        types::J2000Position,
    };
    use anyhow::{bail, Result};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Scripted {
        name: String,
        ready: bool,
        fail: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TelescopeClient for Scripted {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_connected(&self) -> bool {
            self.ready
        }
        fn has_known_position(&self) -> bool {
            false
        }
        fn prepare_communication(&mut self, _log: &mut LogChannel) -> bool {
            self.calls.lock().push(format!("prepare {}", self.name));
            self.ready
        }
        fn perform_communication(&mut self, _log: &mut LogChannel) -> Result<()> {
            self.calls.lock().push(format!("perform {}", self.name));
            if self.fail {
                bail!("wire error");
            }
            Ok(())
        }
        fn goto_position(&mut self, _target: J2000Position) {}
        fn add_fov_circle(&mut self, _radius_degrees: f64) {}
        fn fov_circles(&self) -> &[f64] {
            &[]
        }
        fn disconnect(&mut self) {}
    }

    fn register(
        registry: &mut SlotRegistry,
        n: i64,
        ready: bool,
        fail: bool,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> SlotNumber {
        let slot = SlotNumber::new(n).unwrap();
        registry.begin_start(slot).unwrap();
        registry.finish_start(
            slot,
            Box::new(Scripted {
                name: format!("s{n}"),
                ready,
                fail,
                calls: calls.clone(),
            }),
        );
        slot
    }

    #[test]
    fn runs_in_slot_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = LogChannelRegistry::new(dir.path(), false);
        let mut registry = SlotRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let s7 = register(&mut registry, 7, true, false, &calls);
        let s2 = register(&mut registry, 2, true, true, &calls);
        let s5 = register(&mut registry, 5, false, false, &calls);

        let report = communicate(&mut registry, &mut logs);
        assert_eq!(
            *calls.lock(),
            vec!["prepare s2", "perform s2", "prepare s5", "prepare s7", "perform s7"]
        );
        assert_eq!(report.failed, vec![s2]);
        assert_eq!(report.skipped, vec![s5]);
        assert_eq!(report.communicated, vec![s7]);
        assert_eq!(logs.current_slot(), Some(s7));
    }

    #[test]
    fn empty_registry_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = LogChannelRegistry::new(dir.path(), true);
        let report = communicate(&mut SlotRegistry::new(), &mut logs);
        assert_eq!(report, PumpReport::default());
        assert!(logs.is_empty());
    }
}
