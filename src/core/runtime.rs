/// Tick loop driving a [`SlotManager`]
///
/// Each iteration applies pending [`SlotCommand`]s, runs one communication
/// tick, reports connection changes and sleeps for the tick interval.
use anyhow::{anyhow, Result};
use std::{collections::BTreeMap, time::Duration};

use super::{
    bus::{SlotCommand, SlotEvent},
    manager::SlotManager,
    types::SlotNumber,
};

pub struct RuntimeConfig {
    pub tick_interval: Duration,
    /// Forget helper processes that exited on their own every this many ticks
    pub reap_every: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            reap_every: 10,
        }
    }
}

fn send(events: &flume::Sender<SlotEvent>, event: SlotEvent) -> Result<()> {
    events
        .send(event)
        .map_err(|err| anyhow!("Failed to send slot event: {err}"))
}

fn connection_map(manager: &SlotManager) -> BTreeMap<SlotNumber, bool> {
    manager
        .live_slots()
        .into_iter()
        .map(|slot| (slot, manager.is_connected_client_at_slot(slot)))
        .collect()
}

/// Apply one command. Returns `false` when the loop should end.
fn apply(
    command: SlotCommand,
    manager: &mut SlotManager,
    events: &flume::Sender<SlotEvent>,
) -> Result<bool> {
    let outcome = match command {
        SlotCommand::Start(slot) => manager.start_slot(slot).map(|()| SlotEvent::Started(slot)),
        SlotCommand::Stop(slot) => manager.stop_slot(slot).map(|()| SlotEvent::Stopped(slot)),
        SlotCommand::Goto { slot, target } => {
            if let Err(err) = manager.goto_position(slot, target) {
                send(events, SlotEvent::CommandFailed(err))?;
            }
            return Ok(true);
        }
        SlotCommand::StopAll => {
            let slots: Vec<SlotNumber> = connection_map(manager).into_keys().collect();
            if !manager.stop_all() {
                log::warn!("Not every slot stopped cleanly");
            }
            for slot in slots {
                send(events, SlotEvent::Stopped(slot))?;
            }
            return Ok(true);
        }
        SlotCommand::Quit => {
            log::info!("Received quit signal");
            manager.stop_all();
            send(events, SlotEvent::Quit)?;
            return Ok(false);
        }
    };
    match outcome {
        Ok(event) => send(events, event)?,
        Err(err) => {
            log::warn!("{err}");
            send(events, SlotEvent::CommandFailed(err))?;
        }
    }
    Ok(true)
}

/// Run until [`SlotCommand::Quit`] or until every command sender is gone.
///
/// All slots are stopped before returning. A dropped event receiver ends
/// the loop with an error.
pub fn run_tick_loop(
    commands: flume::Receiver<SlotCommand>,
    events: flume::Sender<SlotEvent>,
    manager: &mut SlotManager,
    config: RuntimeConfig,
) -> Result<()> {
    let mut connected = connection_map(manager);
    let mut tick: u32 = 0;

    loop {
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if !apply(command, manager, &events)? {
                        return Ok(());
                    }
                }
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    log::info!("Command channel closed, stopping all slots");
                    manager.stop_all();
                    return Ok(());
                }
            }
        }

        let report = manager.communicate();
        if !report.failed.is_empty() {
            log::debug!("Communication failed for slots {:?}", report.failed);
        }

        tick = tick.wrapping_add(1);
        if config.reap_every > 0 && tick % config.reap_every == 0 {
            for slot in manager.reap_dead_servers() {
                log::warn!("Telescope server of slot {slot} exited, stopping the slot");
                if let Err(err) = manager.stop_slot(slot) {
                    log::warn!("{err}");
                }
                send(&events, SlotEvent::Stopped(slot))?;
            }
        }

        let now = connection_map(manager);
        for (slot, is_connected) in &now {
            if connected.get(slot) != Some(is_connected) {
                send(
                    &events,
                    SlotEvent::ConnectionChanged {
                        slot: *slot,
                        connected: *is_connected,
                    },
                )?;
            }
        }
        connected = now;

        std::thread::sleep(config.tick_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        bus::channels,
        settings::Settings,
        slots::SlotError,
        types::{ConnectionDescriptor, ConnectionKind},
    };

    fn slot(n: i64) -> SlotNumber {
        SlotNumber::new(n).unwrap()
    }

    #[test]
    fn commands_are_applied_until_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SlotManager::new(dir.path(), Settings::default());
        manager
            .add(1, ConnectionDescriptor::new("Sim", ConnectionKind::Virtual))
            .unwrap();

        let (bus, commands, events) = channels();
        bus.command_tx.send(SlotCommand::Start(slot(1))).unwrap();
        bus.command_tx.send(SlotCommand::Start(slot(2))).unwrap();
        bus.command_tx.send(SlotCommand::Quit).unwrap();

        run_tick_loop(
            commands,
            events,
            &mut manager,
            RuntimeConfig {
                tick_interval: Duration::from_millis(1),
                reap_every: 1,
            },
        )
        .unwrap();

        let received: Vec<SlotEvent> = bus.event_rx.drain().collect();
        assert_eq!(received[0], SlotEvent::Started(slot(1)));
        assert!(matches!(
            received[1],
            SlotEvent::CommandFailed(SlotError::NotConfigured { .. })
        ));
        assert_eq!(received[2], SlotEvent::Quit);
        assert!(!manager.is_existing_client_at_slot(1));
    }

    #[test]
    fn closed_command_channel_stops_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SlotManager::new(dir.path(), Settings::default());
        manager
            .add(3, ConnectionDescriptor::new("Sim", ConnectionKind::Virtual))
            .unwrap();
        manager.start_slot(3).unwrap();

        let (bus, commands, events) = channels();
        drop(bus.command_tx);
        run_tick_loop(commands, events, &mut manager, RuntimeConfig::default()).unwrap();
        assert!(!manager.is_existing_client_at_slot(3));
    }
}
