// ============================================================================
// Handle Registry
// ============================================================================
//
// Slot arena tracking the transient native resources of one session.
// Freed slots are reused through a free list; every slot carries a generation
// so an id that outlived its entry can never address the slot's next tenant.
//
// ============================================================================

use crate::core::{HandleClass, HandleKind, RawHandle};

/// Caller-visible id of a registered handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle_{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleEntry {
    pub raw: RawHandle,
    pub kind: HandleKind,
    pub class: HandleClass,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<HandleEntry>,
}

#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Live ids, most recently registered last
    order: Vec<HandleId>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: HandleEntry) -> HandleId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(entry);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                HandleId { index, generation: 0 }
            }
        };
        self.order.push(id);
        id
    }

    /// Remove `id`, returning its entry if it was still registered
    pub fn remove(&mut self, id: HandleId) -> Option<HandleEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;

        self.free.push(id.index);
        if let Some(pos) = self.order.iter().rposition(|live| *live == id) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    pub fn get(&self, id: HandleId) -> Option<&HandleEntry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.get(id).is_some()
    }

    /// Remove the most recently registered entry
    pub fn pop_latest(&mut self) -> Option<(HandleId, HandleEntry)> {
        let id = *self.order.last()?;
        self.remove(id).map(|entry| (id, entry))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &HandleEntry)> + '_ {
        self.order
            .iter()
            .rev()
            .filter_map(move |id| self.get(*id).map(|entry| (*id, entry)))
    }
}
