// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bridge between readiness notifications of I/O sources and scheduler events.
//!
//! The scheduler does not own sockets or files. A module registers the
//! sources it wants to hear about, and whatever watches those sources reports
//! readiness through the bridge, which turns it into an event for the owning
//! module. Pausing or stopping a module drops its registrations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::errors::PollError;
use crate::event::EventType;
use crate::module::ModuleId;
use crate::scheduler::SchedulerHandle;

/// Opaque identity of a pollable source (socket, file, pipe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Read,
    Write,
    Accept,
    Disconnect,
}

impl Readiness {
    #[must_use]
    pub fn event_type(self) -> EventType {
        match self {
            Readiness::Read => EventType::Read,
            Readiness::Write => EventType::Write,
            Readiness::Accept => EventType::Accept,
            Readiness::Disconnect => EventType::Disconnect,
        }
    }
}

pub trait PollBridge: Send {
    fn register(
        &mut self,
        module: ModuleId,
        source: SourceId,
        interest: Interest,
    ) -> Result<(), PollError>;

    /// Drops every registration of `module`.
    fn deregister(&mut self, module: ModuleId);
}

/// Bridge for schedulers without pollable sources.
#[derive(Debug, Default)]
pub struct NoopBridge;

impl PollBridge for NoopBridge {
    fn register(&mut self, _: ModuleId, _: SourceId, _: Interest) -> Result<(), PollError> {
        Ok(())
    }

    fn deregister(&mut self, _: ModuleId) {}
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    module: ModuleId,
    interest: Interest,
}

/// Bridge whose readiness is reported by calling [`NotifyBridge::notify`]
/// from any thread.
#[derive(Debug, Clone)]
pub struct NotifyBridge {
    registrations: Arc<Mutex<HashMap<SourceId, Registration>>>,
    handle: SchedulerHandle,
}

impl NotifyBridge {
    #[must_use]
    pub fn new(handle: SchedulerHandle) -> Self {
        Self {
            registrations: Arc::new(Mutex::new(HashMap::new())),
            handle,
        }
    }

    /// Reports readiness of `source`. Returns `Ok(false)` when nobody is
    /// registered for it.
    pub fn notify(&self, source: SourceId, readiness: Readiness) -> Result<bool, PollError> {
        let registration = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source)
            .copied();
        let Some(registration) = registration else {
            debug!("POLL | readiness for unregistered source {source:?} ignored");
            return Ok(false);
        };
        let wanted = matches!(
            (registration.interest, readiness),
            (Interest::Read, Readiness::Read)
                | (Interest::Write, Readiness::Write)
                | (Interest::Accept, Readiness::Accept)
                | (_, Readiness::Disconnect)
        );
        if !wanted {
            return Ok(false);
        }
        self.handle
            .notify(registration.module, readiness.event_type())
            .map_err(|_| PollError::SchedulerGone)?;
        Ok(true)
    }

    #[must_use]
    pub fn is_registered(&self, source: SourceId) -> bool {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&source)
    }
}

impl PollBridge for NotifyBridge {
    fn register(
        &mut self,
        module: ModuleId,
        source: SourceId,
        interest: Interest,
    ) -> Result<(), PollError> {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = registrations.get(&source) {
            if existing.module != module {
                return Err(PollError::AlreadyRegistered(source.0));
            }
        }
        registrations.insert(source, Registration { module, interest });
        Ok(())
    }

    fn deregister(&mut self, module: ModuleId) {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, registration| registration.module != module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerCommand;
    use tokio::sync::mpsc;

    #[test]
    fn test_notify_posts_event_for_registered_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = NotifyBridge::new(SchedulerHandle::from_sender(tx));
        let module = ModuleId::new(2);
        bridge
            .register(module, SourceId(7), Interest::Read)
            .expect("register");

        assert!(bridge.notify(SourceId(7), Readiness::Read).expect("notify"));
        assert!(!bridge.notify(SourceId(7), Readiness::Write).expect("notify"));
        assert!(!bridge.notify(SourceId(8), Readiness::Read).expect("notify"));

        match rx.try_recv().expect("command") {
            SchedulerCommand::Notify { module: m, kind } => {
                assert_eq!(m, module);
                assert_eq!(kind, EventType::Read);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deregister_drops_module_sources() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bridge = NotifyBridge::new(SchedulerHandle::from_sender(tx));
        bridge
            .register(ModuleId::new(1), SourceId(1), Interest::Read)
            .expect("register");
        bridge
            .register(ModuleId::new(2), SourceId(2), Interest::Accept)
            .expect("register");
        assert!(matches!(
            bridge.register(ModuleId::new(2), SourceId(1), Interest::Read),
            Err(PollError::AlreadyRegistered(1))
        ));

        bridge.deregister(ModuleId::new(1));
        assert!(!bridge.is_registered(SourceId(1)));
        assert!(bridge.is_registered(SourceId(2)));
    }

    #[test]
    fn test_notify_after_scheduler_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut bridge = NotifyBridge::new(SchedulerHandle::from_sender(tx));
        bridge
            .register(ModuleId::new(0), SourceId(1), Interest::Read)
            .expect("register");
        drop(rx);
        assert!(matches!(
            bridge.notify(SourceId(1), Readiness::Disconnect),
            Err(PollError::SchedulerGone)
        ));
    }
}
