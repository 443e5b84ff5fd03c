//! Fixed-capacity resource slot pools
//!
//! Every GPU resource kind lives in its own pool with a capacity fixed at construction. Slots never
//! move and the pool never grows, so a slot id handed to the application keeps referring to the same
//! slot for the lifetime of the pool. Each slot carries a generation counter that is bumped whenever
//! the slot is released, which turns ids that outlived their resource into a detectable error instead
//! of silently aliasing a newer resource.

use std::fmt;

use crate::error::RenderError;

/// Resource kinds managed by the renderer, one pool each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Compiled and linked shader pipelines
    Pipeline,
    /// Vertex buffers
    VertexBuffer,
    /// Index buffers
    IndexBuffer,
    /// Constant (uniform) buffers
    ConstantBuffer,
    /// 2D textures
    Texture,
}

impl ResourceKind {
    /// All resource kinds, in teardown order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Pipeline,
        ResourceKind::VertexBuffer,
        ResourceKind::IndexBuffer,
        ResourceKind::ConstantBuffer,
        ResourceKind::Texture,
    ];

    /// Returns the human-readable name of this resource kind
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::VertexBuffer => "vertex buffer",
            ResourceKind::IndexBuffer => "index buffer",
            ResourceKind::ConstantBuffer => "constant buffer",
            ResourceKind::Texture => "texture",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable identity of a pool slot
///
/// The index addresses the slot, the generation tells whether the slot still holds the resource
/// this id was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Returns the slot index within its pool
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the slot generation this id was issued with
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    used: bool,
    value: Option<T>,
}

/// A fixed-capacity pool of reusable slots
///
/// Allocation pops the next index from a free stack and release pushes it back, both in constant
/// time. A fresh (or cleared) pool hands out index 0 first, then 1, 2 and so on.
///
/// A slot can be reserved before its value exists. This lets callers claim capacity up front, build
/// the value, and either [`fill`](Self::fill) the slot or [`free`](Self::free) it again if building
/// failed. Freeing a reserved slot that was never filled is valid and yields no value.
#[derive(Debug)]
pub struct ResourcePool<T> {
    /// Resource kind stored in this pool, used for diagnostics
    kind: ResourceKind,
    /// Slot storage, never resized after construction
    slots: Vec<Slot<T>>,
    /// Stack of unused slot indices
    free: Vec<u32>,
}

impl<T> ResourcePool<T> {
    /// Creates an empty pool with a fixed number of slots
    ///
    /// # Arguments
    /// * `kind` - The resource kind stored in this pool
    /// * `capacity` - Number of slots; the pool never grows beyond it
    pub fn new(kind: ResourceKind, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                used: false,
                value: None,
            })
            .collect();

        Self {
            kind,
            slots,
            free: Self::fresh_free_list(capacity),
        }
    }

    /// Builds a free stack that pops the lowest index first
    fn fresh_free_list(capacity: usize) -> Vec<u32> {
        (0..capacity as u32).rev().collect()
    }

    /// Returns the resource kind stored in this pool
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the fixed number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of used (reserved or filled) slots
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns true if no slot is in use
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if every slot is in use
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Claims an unused slot without storing a value yet
    ///
    /// # Returns
    /// The id of the reserved slot
    ///
    /// # Errors
    /// Returns [`RenderError::Capacity`] if every slot is in use
    pub fn reserve(&mut self) -> Result<SlotId, RenderError> {
        let Some(index) = self.free.pop() else {
            tracing::warn!(kind = %self.kind, capacity = self.capacity(), "resource pool exhausted");
            return Err(RenderError::Capacity {
                kind: self.kind,
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index as usize];
        slot.used = true;

        Ok(SlotId {
            index,
            generation: slot.generation,
        })
    }

    /// Claims an unused slot and stores `value` in it
    ///
    /// # Errors
    /// Returns [`RenderError::Capacity`] if every slot is in use; `value` is dropped in that case
    pub fn allocate(&mut self, value: T) -> Result<SlotId, RenderError> {
        let id = self.reserve()?;
        self.slots[id.index as usize].value = Some(value);
        Ok(id)
    }

    /// Stores `value` in a previously reserved slot, replacing any value it held
    pub fn fill(&mut self, id: SlotId, value: T) -> Result<(), RenderError> {
        self.slot_mut(id)?.value = Some(value);
        Ok(())
    }

    /// Returns the value stored in a slot
    ///
    /// # Errors
    /// Returns [`RenderError::InvalidHandle`] if the id is stale, out of range, or refers to a slot
    /// that is reserved but not filled yet
    pub fn get(&self, id: SlotId) -> Result<&T, RenderError> {
        self.slot(id)?.value.as_ref().ok_or(RenderError::InvalidHandle { kind: self.kind })
    }

    /// Returns the value stored in a slot, mutably
    pub fn get_mut(&mut self, id: SlotId) -> Result<&mut T, RenderError> {
        let kind = self.kind;
        self.slot_mut(id)?.value.as_mut().ok_or(RenderError::InvalidHandle { kind })
    }

    /// Returns true if `id` refers to a filled slot
    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_ok()
    }

    /// Releases a slot and returns the value it held
    ///
    /// The slot generation is bumped, so `id` and every copy of it become stale.
    ///
    /// # Returns
    /// The stored value, or `None` if the slot was only reserved
    pub fn free(&mut self, id: SlotId) -> Result<Option<T>, RenderError> {
        let value = {
            let slot = self.slot_mut(id)?;
            slot.used = false;
            slot.generation = slot.generation.wrapping_add(1);
            slot.value.take()
        };
        self.free.push(id.index);
        Ok(value)
    }

    /// Force-releases every slot and resets the pool to empty
    ///
    /// All ids issued so far become stale.
    ///
    /// # Returns
    /// The values that were still stored, so the caller can release what they own
    pub fn clear(&mut self) -> Vec<T> {
        let mut live = Vec::new();
        for slot in &mut self.slots {
            if slot.used {
                slot.generation = slot.generation.wrapping_add(1);
                slot.used = false;
            }
            live.extend(slot.value.take());
        }
        self.free = Self::fresh_free_list(self.slots.len());
        live
    }

    /// Iterates over the filled slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter(|(_, slot)| slot.used).filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    fn slot(&self, id: SlotId) -> Result<&Slot<T>, RenderError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.used && slot.generation == id.generation)
            .ok_or(RenderError::InvalidHandle { kind: self.kind })
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut Slot<T>, RenderError> {
        let kind = self.kind;
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.used && slot.generation == id.generation)
            .ok_or(RenderError::InvalidHandle { kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_full() {
        let mut pool = ResourcePool::new(ResourceKind::Pipeline, 3);

        let ids: Vec<_> = (0..3).map(|i| pool.allocate(i).unwrap()).collect();
        assert_eq!(ids.iter().map(SlotId::index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(pool.is_full());

        match pool.allocate(3) {
            Err(RenderError::Capacity { kind, capacity }) => {
                assert_eq!(kind, ResourceKind::Pipeline);
                assert_eq!(capacity, 3);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
    }

    #[test]
    fn test_slot_reuse_after_free() {
        let mut pool = ResourcePool::new(ResourceKind::VertexBuffer, 2);
        let a = pool.allocate("a").unwrap();
        let _b = pool.allocate("b").unwrap();
        assert!(pool.allocate("c").is_err());

        assert_eq!(pool.free(a).unwrap(), Some("a"));
        let c = pool.allocate("c").unwrap();

        // Same slot, new generation
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(*pool.get(c).unwrap(), "c");
    }

    #[test]
    fn test_stale_id_is_rejected() {
        let mut pool = ResourcePool::new(ResourceKind::Texture, 1);
        let old = pool.allocate(1u32).unwrap();
        pool.free(old).unwrap();
        let _new = pool.allocate(2u32).unwrap();

        assert!(matches!(pool.get(old), Err(RenderError::InvalidHandle { kind: ResourceKind::Texture })));
        assert!(pool.free(old).is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_reserved_slot_can_be_freed_without_value() {
        let mut pool = ResourcePool::<String>::new(ResourceKind::Pipeline, 1);
        let id = pool.reserve().unwrap();

        // Reserved slots count towards capacity but hold nothing yet
        assert!(pool.is_full());
        assert!(!pool.contains(id));

        assert_eq!(pool.free(id).unwrap(), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_fill_reserved_slot() {
        let mut pool = ResourcePool::new(ResourceKind::Pipeline, 1);
        let id = pool.reserve().unwrap();
        pool.fill(id, 42).unwrap();
        assert_eq!(*pool.get(id).unwrap(), 42);
        *pool.get_mut(id).unwrap() += 1;
        assert_eq!(*pool.get(id).unwrap(), 43);
    }

    #[test]
    fn test_clear_empties_pool_and_invalidates_ids() {
        let mut pool = ResourcePool::new(ResourceKind::ConstantBuffer, 4);
        let ids: Vec<_> = (0..3).map(|i| pool.allocate(i).unwrap()).collect();
        let reserved = pool.reserve().unwrap();

        let mut live = pool.clear();
        live.sort();
        assert_eq!(live, vec![0, 1, 2]);
        assert!(pool.is_empty());

        for id in ids.into_iter().chain([reserved]) {
            assert!(pool.get(id).is_err());
        }

        // Allocation restarts from the lowest index
        assert_eq!(pool.allocate(9).unwrap().index(), 0);
    }

    #[test]
    fn test_iter_skips_free_and_reserved_slots() {
        let mut pool = ResourcePool::new(ResourceKind::IndexBuffer, 4);
        let a = pool.allocate('a').unwrap();
        let b = pool.allocate('b').unwrap();
        let _reserved = pool.reserve().unwrap();
        pool.free(a).unwrap();

        let items: Vec<_> = pool.iter().map(|(id, value)| (id, *value)).collect();
        assert_eq!(items, vec![(b, 'b')]);
    }
}
