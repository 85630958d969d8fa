//! Slot table
//!
//! Fixed-capacity registry mapping slot numbers to sessions. Allocation
//! always picks the lowest free number; freed numbers become reusable.
//! Invariant: a slot number never resolves to more than one live session.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::SessionError;

use super::{Session, SessionCore};

/// Handle onto one occupied slot.
///
/// The core is reachable without the session mutex so status/focus reads
/// and subscription updates stay lock-free.
#[derive(Clone)]
pub struct SlotEntry {
    pub core: Arc<SessionCore>,
    pub session: Arc<Mutex<Session>>,
}

pub struct SlotTable {
    slots: Mutex<Vec<Option<SlotEntry>>>,
    max_slots: usize,
}

impl SlotTable {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            max_slots,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Option<SlotEntry>>>, SessionError> {
        self.slots.lock().map_err(|_| SessionError::LockPoisoned {
            component: "slot_table",
        })
    }

    /// Allocate the lowest free slot and build its session in place.
    ///
    /// # Errors
    /// `CapacityExceeded` once the configured maximum is reached; whatever
    /// `build` reports, in which case no slot is consumed.
    pub fn allocate<F>(&self, build: F) -> Result<(usize, SlotEntry), SessionError>
    where
        F: FnOnce(usize) -> Result<(Arc<SessionCore>, Session), SessionError>,
    {
        let mut slots = self.lock()?;

        let slot_no = match slots.iter().position(Option::is_none) {
            Some(free) => free,
            None if slots.len() < self.max_slots => {
                slots.push(None);
                slots.len() - 1
            }
            None => {
                return Err(SessionError::CapacityExceeded {
                    max_slots: self.max_slots,
                })
            }
        };

        let (core, session) = build(slot_no)?;
        let entry = SlotEntry {
            core,
            session: Arc::new(Mutex::new(session)),
        };
        slots[slot_no] = Some(entry.clone());
        debug!("allocated slot {}", slot_no);
        Ok((slot_no, entry))
    }

    /// # Errors
    /// `UnknownSlot` if the number is out of range or freed.
    pub fn lookup(&self, slot_no: usize) -> Result<SlotEntry, SessionError> {
        self.lock()?
            .get(slot_no)
            .and_then(Option::clone)
            .ok_or(SessionError::UnknownSlot { slot_no })
    }

    /// Remove the entry. Idempotent: freeing an already-free slot is a
    /// no-op.
    pub fn free(&self, slot_no: usize) {
        if let Ok(mut slots) = self.lock() {
            if let Some(entry) = slots.get_mut(slot_no) {
                if entry.take().is_some() {
                    debug!("freed slot {}", slot_no);
                }
            }
        }
    }

    /// Snapshot of all occupied slots, lowest first.
    pub fn occupied(&self) -> Vec<(usize, SlotEntry)> {
        match self.lock() {
            Ok(slots) => slots
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| entry.clone().map(|e| (i, e)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ManualTimeSource;
    use crate::player::PlayerEngine;
    use crate::session::events::EventSink;
    use crate::session::focus::FocusArbiter;
    use crate::session::SessionKind;
    use std::time::Duration;

    fn build_player(slot_no: usize) -> Result<(Arc<SessionCore>, Session), SessionError> {
        let (sink, _rx) = EventSink::channel();
        // Receiver dropped on purpose; these tests only exercise the table.
        let core = Arc::new(SessionCore::new(
            slot_no,
            SessionKind::Player,
            sink,
            Arc::new(ManualTimeSource::new()),
            Duration::ZERO,
        ));
        let engine = PlayerEngine::new(Arc::clone(&core), Arc::new(FocusArbiter::new()));
        Ok((core, Session::Player(engine)))
    }

    #[test]
    fn test_allocate_lowest_free() {
        let table = SlotTable::new(4);
        let (a, _) = table.allocate(build_player).unwrap();
        let (b, _) = table.allocate(build_player).unwrap();
        assert_eq!((a, b), (0, 1));

        table.free(0);
        let (c, _) = table.allocate(build_player).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let table = SlotTable::new(2);
        table.allocate(build_player).unwrap();
        table.allocate(build_player).unwrap();
        match table.allocate(build_player) {
            Err(SessionError::CapacityExceeded { max_slots }) => assert_eq!(max_slots, 2),
            other => panic!("expected CapacityExceeded, got {:?}", other.map(|(n, _)| n)),
        }
    }

    #[test]
    fn test_lookup_unknown_slot() {
        let table = SlotTable::new(2);
        assert!(matches!(
            table.lookup(0),
            Err(SessionError::UnknownSlot { slot_no: 0 })
        ));
        let (slot_no, _) = table.allocate(build_player).unwrap();
        assert!(table.lookup(slot_no).is_ok());
    }

    #[test]
    fn test_free_is_idempotent() {
        let table = SlotTable::new(2);
        let (slot_no, _) = table.allocate(build_player).unwrap();
        table.free(slot_no);
        table.free(slot_no);
        table.free(99);
        assert!(table.lookup(slot_no).is_err());
    }

    #[test]
    fn test_no_two_live_sessions_share_a_slot() {
        let table = SlotTable::new(8);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (slot_no, _) = table.allocate(build_player).unwrap();
            assert!(!seen.contains(&slot_no));
            seen.push(slot_no);
        }
        table.free(2);
        table.free(4);
        let (first, _) = table.allocate(build_player).unwrap();
        let (second, _) = table.allocate(build_player).unwrap();
        assert_eq!((first, second), (2, 4));
    }

    #[test]
    fn test_failed_build_consumes_no_slot() {
        let table = SlotTable::new(2);
        let result = table.allocate(|_| {
            Err(SessionError::DeviceFailure {
                details: "no device".to_string(),
            })
        });
        assert!(result.is_err());
        let (slot_no, _) = table.allocate(build_player).unwrap();
        assert_eq!(slot_no, 0);
    }
}
