//! Fixed-capacity pool of session slots.
//!
//! The slot table is the only state shared across sessions. The lock is
//! held for slot scans and swaps; building a session (socket binds,
//! thread spawns) and joining its workers both happen outside it.

use log::info;
use parking_lot::Mutex;

use crate::config::SlotPorts;
use crate::error::{Error, Result};
use crate::session::{Session, SessionState};

pub struct SessionManager {
    slots: Mutex<Vec<Option<Session>>>,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        SessionManager { slots: Mutex::new(slots) }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Sessions currently holding a slot, `Starting` and `Stopping` ones
    /// included.
    pub fn active_len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn state_of(&self, slot: usize) -> Option<SessionState> {
        self.slots
            .lock()
            .get(slot)
            .and_then(|s| s.as_ref().map(Session::state))
    }

    /// Claims a free slot and fills it with the session `build` produces.
    /// Only the accept loop allocates, so the slot cannot be taken between
    /// the scan and the insert.
    pub fn allocate_with(
        &self,
        build: impl FnOnce(usize) -> Result<Session>,
    ) -> Result<(usize, SlotPorts)> {
        let slot = {
            let slots = self.slots.lock();
            match slots.iter().position(Option::is_none) {
                Some(slot) => slot,
                None => return Err(Error::ErrNoFreeSlot),
            }
        };
        let session = build(slot)?;
        let ports = session.ports();
        self.slots.lock()[slot] = Some(session);
        info!("slot {slot}: session started on ports {ports:?}");
        Ok((slot, ports))
    }

    /// Joins every session that has entered `Stopping` and frees its slot.
    /// Returns how many slots were reclaimed.
    pub fn reap(&self) -> usize {
        let mut finished = Vec::new();
        {
            let mut slots = self.slots.lock();
            for (index, slot) in slots.iter_mut().enumerate() {
                let stopping = matches!(
                    slot.as_ref().map(Session::state),
                    Some(SessionState::Stopping) | Some(SessionState::Stopped)
                );
                if stopping {
                    if let Some(session) = slot.take() {
                        finished.push((index, session));
                    }
                }
            }
        }
        let reclaimed = finished.len();
        for (index, session) in finished {
            session.join();
            info!("slot {index}: session reclaimed");
        }
        reclaimed
    }

    /// Stops and joins every session. Used at shutdown.
    pub fn stop_all(&self) {
        let drained: Vec<Session> = {
            let mut slots = self.slots.lock();
            slots.iter_mut().filter_map(Option::take).collect()
        };
        for session in drained {
            session.stop();
            session.join();
        }
    }
}
