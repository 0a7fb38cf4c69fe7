//! Priority-ordered list of candidate port configurations.
//!
//! Ordering: entries with a non-zero arrival timestamp first, newest to
//! oldest; zero-time fallback entries ("lastresort") always sort last.
//! Ties on the timestamp are broken in favour of the later arrival.

use chrono::{DateTime, Utc};

use crate::api::{DevicePortConfig, DevicePortConfigList, DpcState};

#[derive(Debug, Default)]
pub(crate) struct DpcList {
    entries: Vec<DevicePortConfig>,
    current_index: i32,
}

impl DpcList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current_index: -1,
        }
    }

    pub fn from_snapshot(snapshot: DevicePortConfigList) -> Self {
        let mut list = Self {
            current_index: snapshot.current_index,
            entries: snapshot.entries,
        };
        if list.current_index >= list.entries.len() as i32 {
            list.current_index = -1;
        }
        list
    }

    pub fn snapshot(&self) -> DevicePortConfigList {
        DevicePortConfigList {
            current_index: self.current_index,
            entries: self.entries.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DevicePortConfig> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DevicePortConfig> {
        self.entries.get_mut(index)
    }

    pub fn current_index(&self) -> i32 {
        self.current_index
    }

    pub fn current(&self) -> Option<&DevicePortConfig> {
        if self.current_index < 0 {
            return None;
        }
        self.entries.get(self.current_index as usize)
    }

    pub fn set_current(&mut self, index: usize) {
        debug_assert!(index < self.entries.len());
        self.current_index = index as i32;
    }

    /// Insert a configuration at its priority position, or merge it into an
    /// existing entry with the same (key, time_priority) identity. Returns
    /// the index the entry ended up at.
    pub fn add(&mut self, dpc: DevicePortConfig) -> usize {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.same_identity(&dpc.key, dpc.time_priority))
        {
            let entry = &mut self.entries[pos];
            entry.version = dpc.version;
            let mut ports = dpc.ports;
            for port in &mut ports {
                if let Some(old) = entry.port(&port.if_name) {
                    port.test_results = old.test_results.clone();
                }
            }
            entry.ports = ports;
            return pos;
        }

        let pos = self
            .entries
            .iter()
            .position(|e| takes_precedence(&dpc, e))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, dpc);
        if self.current_index >= pos as i32 {
            self.current_index += 1;
        }
        pos
    }

    /// Remove the entry with the given identity. Returns its former index.
    /// When the active entry itself is removed, the current index becomes −1
    /// and the caller must pick a new active entry.
    pub fn delete(&mut self, key: &str, time_priority: DateTime<Utc>) -> Option<usize> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.same_identity(key, time_priority))?;
        self.entries.remove(pos);
        if self.current_index == pos as i32 {
            self.current_index = -1;
        } else if self.current_index > pos as i32 {
            self.current_index -= 1;
        }
        Some(pos)
    }

    /// Drop superseded entries once the highest-priority entry has been
    /// verified working. The active entry and every zero-time fallback are
    /// always preserved. Returns the number of removed entries.
    pub fn compress(&mut self) -> usize {
        if self.current_index != 0 {
            return 0;
        }
        match self.entries.first() {
            Some(first) if first.state == DpcState::Success => {}
            _ => return 0,
        }

        let before = self.entries.len();
        let mut index = 0;
        self.entries.retain(|entry| {
            let keep = index == 0 || entry.is_last_resort();
            index += 1;
            keep
        });
        before - self.entries.len()
    }
}

fn takes_precedence(a: &DevicePortConfig, b: &DevicePortConfig) -> bool {
    match (a.is_last_resort(), b.is_last_resort()) {
        (false, true) => true,
        (true, false) => false,
        // equal timestamps: the later arrival wins
        _ => a.time_priority >= b.time_priority,
    }
}
