use std::{collections::VecDeque, marker::PhantomData};

use derive_where::derive_where;

/// Stable reference to a value in an [`IndexingContainer`].
///
/// A `Handle` stays valid until the value is removed. Afterwards the slot may be reused but the
/// generation of the slot has changed, so the old `Handle` resolves to `None`.
#[derive_where(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle<T> {
    index: usize,
    generation: usize,
    phantom_data: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: usize, generation: usize) -> Self {
        Self {
            index,
            generation,
            phantom_data: PhantomData,
        }
    }

    /// Returns the index of the handle.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the generation of the handle.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

struct Slot<T> {
    generation: usize,
    value: Option<T>,
}

/// Arena that owns its values and hands out generational [`Handle`]s.
///
/// Insertion and removal are O(1). Freed slots are reused in FIFO order.
pub struct IndexingContainer<T> {
    slots: Vec<Slot<T>>,
    free_list: VecDeque<usize>,
    len: usize,
}

impl<T> Default for IndexingContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IndexingContainer<T> {
    /// Creates a new empty container.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: VecDeque::new(),
            len: 0,
        }
    }

    /// Inserts a new element into the container.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(free_index) = self.free_list.pop_front() {
            let slot = &mut self.slots[free_index];
            slot.value = Some(value);
            Handle::new(free_index, slot.generation)
        } else {
            let index = self.slots.len();
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle::new(index, 0)
        }
    }

    /// Removes the element at the given handle and returns it.
    pub fn remove(&mut self, handle: &Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation += 1;
        self.free_list.push_back(handle.index());
        self.len -= 1;
        Some(value)
    }

    /// Returns a reference to the element at the given handle.
    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Returns a mutable reference to the element at the given handle.
    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Returns whether the handle still refers to a value in the container.
    pub fn contains(&self, handle: &Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Returns the number of elements in the container.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the container holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots that can be reused without growing the container.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}
