//! Component types.
//!
//! A component type (`Ct`) is a raw `(size, destructor)` pair, not a Rust
//! generic type -- the destructor is a plain function pointer, mirroring
//! the `void (*)(void*)` callback the core is grounded on. Callers
//! building a higher-level typed API on top are expected to capture
//! `size_of::<T>()`/`drop_in_place::<T>` themselves when calling
//! [`crate::world::World::create_component_type`].

use crate::id::{Id, IdAllocator};
use crate::typeset::TypeSet;

/// Handle to a registered component type. Opaque; stable across the
/// type's lifetime (component types are never destroyed, per the core's
/// Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(Id);

impl ComponentTypeId {
    pub(crate) fn from_raw(raw: u32) -> Self {
        ComponentTypeId(Id::from_raw(raw))
    }

    pub(crate) fn raw(self) -> u32 {
        self.0.raw()
    }

    pub(crate) fn id(self) -> Id {
        self.0
    }
}

/// A no-op destructor, substituted when a component type is created
/// without one.
pub fn noop_destructor(_ptr: *mut u8) {}

/// Per-component-type record: byte size and destructor, plus the set of
/// archetypes currently containing this type (the fast path system
/// matching and edge creation scan through, per §4.5).
pub struct ComponentTypeRecord {
    pub size: usize,
    pub destructor: fn(*mut u8),
    pub(crate) archetypes: Vec<crate::archetype::ArchetypeId>,
}

/// Owns the component-type allocator and dense registry.
#[derive(Default)]
pub struct ComponentTypeRegistry {
    allocator: IdAllocator,
    records: crate::registry::RegistryMap<ComponentTypeRecord>,
}

impl ComponentTypeRegistry {
    pub fn new() -> Self {
        Self {
            allocator: IdAllocator::new("component_type"),
            records: crate::registry::RegistryMap::new(),
        }
    }

    /// Creates a new component type. `destructor` of `None` is replaced
    /// with [`noop_destructor`].
    pub fn create(&mut self, size: usize, destructor: Option<fn(*mut u8)>) -> ComponentTypeId {
        tracing::debug!(size, "creating component type");
        let id = self.allocator.allocate();
        let ty = ComponentTypeId(id);
        self.records.insert(
            id,
            ComponentTypeRecord {
                size,
                destructor: destructor.unwrap_or(noop_destructor),
                archetypes: Vec::new(),
            },
        );
        tracing::info!(component_type = ty.raw(), size, "created component type");
        ty
    }

    pub fn exists(&self, ty: ComponentTypeId) -> bool {
        self.records.contains(ty.0)
    }

    pub fn get(&self, ty: ComponentTypeId) -> Option<&ComponentTypeRecord> {
        self.records.get(ty.0)
    }

    pub fn get_mut(&mut self, ty: ComponentTypeId) -> Option<&mut ComponentTypeRecord> {
        self.records.get_mut(ty.0)
    }

    /// Records that `arct` now contains `ty` (called when a fresh
    /// archetype is created over a TypeSet including `ty`).
    pub(crate) fn note_archetype_created(
        &mut self,
        ty: ComponentTypeId,
        arct: crate::archetype::ArchetypeId,
    ) {
        if let Some(record) = self.records.get_mut(ty.0) {
            record.archetypes.push(arct);
        }
    }

    /// Builds a `TypeSet` out of raw component-type ids, validating each
    /// exists. Returns `None` (and logs) if any does not.
    pub fn checked_type_set(&self, types: &[ComponentTypeId]) -> Option<TypeSet> {
        for &ty in types {
            if !self.exists(ty) {
                tracing::warn!(component_type = ty.raw(), "unknown component type");
                return None;
            }
        }
        Some(TypeSet::from_iter(types.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_distinct_ids() {
        let mut reg = ComponentTypeRegistry::new();
        let a = reg.create(4, None);
        let b = reg.create(8, None);
        assert_ne!(a, b);
        assert!(reg.exists(a));
        assert!(reg.exists(b));
    }

    #[test]
    fn missing_destructor_defaults_to_noop() {
        let mut reg = ComponentTypeRegistry::new();
        let ty = reg.create(4, None);
        let record = reg.get(ty).unwrap();
        let mut value: u32 = 42;
        (record.destructor)(&mut value as *mut u32 as *mut u8);
        assert_eq!(value, 42);
    }
}
