//! Generation-checked slot table.
//!
//! Stores values behind stable [`ConnectionId`] handles. Removing a value
//! bumps its slot's generation, so a handle kept past removal never resolves
//! to whatever later reuses the slot. Handles are plain `Copy` data; nothing
//! outside the table holds a reference into its storage.

use std::fmt;

/// Stable handle to a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    /// Slot index. Unique among live handles, reused after removal.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by generation-checked handles.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), len: 0 }
    }

    /// Store `value` and return its handle.
    pub fn insert(&mut self, value: T) -> ConnectionId {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return ConnectionId { index, generation: slot.generation };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        debug_assert!(index < u32::MAX, "slot table exhausted");
        self.slots.push(Slot { generation: 0, value: Some(value) });
        ConnectionId { index, generation: 0 }
    }

    /// Remove and return the value behind `id`. `None` if the handle is stale.
    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Value behind `id`. `None` if the handle is stale.
    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutable value behind `id`. `None` if the handle is stale.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check whether `id` still resolves.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table stores nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handles of all stored values, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.value.is_some()).map(
            |(index, slot)| ConnectionId { index: index as u32, generation: slot.generation },
        )
    }
}
