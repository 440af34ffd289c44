//! Systems: requirement type sets plus lifecycle callbacks.
//!
//! A system is matched against every archetype whose `TypeSet` is a
//! superset of its requirements. Matching is maintained incrementally: a
//! system records the archetypes that currently match it, and a newly
//! created archetype scans existing systems to populate its own matched
//! list (§4.5's "system matching on archetype creation").
//!
//! Callbacks take a mutable handle to the whole [`crate::world::World`]
//! because system bodies legitimately mutate arbitrary entities --
//! including ones outside the table currently being iterated, or (via the
//! deferred-removal machinery) the one being visited. This mirrors the
//! `struct CGroup` passed to every callback in the reference
//! implementation, generalized from a raw global-state pointer to an
//! explicit `&mut World`.

use crate::entity::EntityId;
use crate::id::{Id, IdAllocator};
use crate::registry::RegistryMap;
use crate::typeset::TypeSet;
use crate::world::World;

/// Handle to a registered system. Stable for the program's lifetime
/// (until `destroy_system` releases it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(Id);

impl SystemId {
    pub(crate) fn from_raw(id: Id) -> Self {
        SystemId(id)
    }

    pub fn raw(self) -> u32 {
        self.0.raw()
    }

    pub(crate) fn id(self) -> Id {
        self.0
    }
}

/// Which of a system's four lifecycle callbacks is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysPhase {
    Start,
    Update,
    Draw,
    Destroy,
}

/// (entity, system) pair passed to every callback, used to restrict
/// component access to the system's own requirements via
/// `World::get_component_for_group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentGroup {
    pub entity: EntityId,
    pub system: SystemId,
}

/// A boxed system callback. Takes the whole world because callback
/// bodies may read or mutate any entity, not only the one they were
/// invoked for.
pub type SysCallback = Box<dyn Fn(&mut World, ComponentGroup)>;

/// A system's record: its immutable requirement set and its four
/// optional phase callbacks.
pub struct System {
    pub id: SystemId,
    pub requirements: TypeSet,
    pub start: Option<SysCallback>,
    pub update: Option<SysCallback>,
    pub draw: Option<SysCallback>,
    pub destroy: Option<SysCallback>,
}

impl System {
    pub fn callback(&self, phase: SysPhase) -> Option<&SysCallback> {
        match phase {
            SysPhase::Start => self.start.as_ref(),
            SysPhase::Update => self.update.as_ref(),
            SysPhase::Draw => self.draw.as_ref(),
            SysPhase::Destroy => self.destroy.as_ref(),
        }
    }

    pub fn set_callback(&mut self, phase: SysPhase, callback: Option<SysCallback>) {
        match phase {
            SysPhase::Start => self.start = callback,
            SysPhase::Update => self.update = callback,
            SysPhase::Draw => self.draw = callback,
            SysPhase::Destroy => self.destroy = callback,
        }
    }

    /// Mutable access to a single phase slot, used by `World` to
    /// temporarily take a callback out for invocation.
    pub(crate) fn callback_mut(&mut self, phase: SysPhase) -> &mut Option<SysCallback> {
        match phase {
            SysPhase::Start => &mut self.start,
            SysPhase::Update => &mut self.update,
            SysPhase::Draw => &mut self.draw,
            SysPhase::Destroy => &mut self.destroy,
        }
    }
}

/// Owns the system allocator and dense registry. Archetype matching and
/// the update/draw dispatch loop live on `World` (see module docs).
#[derive(Default)]
pub struct SystemRegistry {
    allocator: IdAllocator,
    systems: RegistryMap<System>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self {
            allocator: IdAllocator::new("system"),
            systems: RegistryMap::new(),
        }
    }

    /// Allocates a system id and inserts its record with the given
    /// requirements and start callback. The caller (`World::create_system`)
    /// is responsible for the non-empty-requirements check and for
    /// integrating the new system with existing archetypes.
    pub(crate) fn insert_new(
        &mut self,
        requirements: TypeSet,
        start: Option<SysCallback>,
    ) -> SystemId {
        let id = SystemId(self.allocator.allocate());
        tracing::debug!(system = id.raw(), "creating system");
        self.systems.insert(
            id.id(),
            System {
                id,
                requirements,
                start,
                update: None,
                draw: None,
                destroy: None,
            },
        );
        tracing::info!(system = id.raw(), "created system");
        id
    }

    pub fn exists(&self, id: SystemId) -> bool {
        self.systems.contains(id.id())
    }

    pub fn get(&self, id: SystemId) -> Option<&System> {
        self.systems.get(id.id())
    }

    pub fn get_mut(&mut self, id: SystemId) -> Option<&mut System> {
        self.systems.get_mut(id.id())
    }

    pub fn remove(&mut self, id: SystemId) -> Option<System> {
        self.systems.remove(id.id())
    }

    pub(crate) fn release_id(&mut self, id: SystemId) -> bool {
        self.allocator.release(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &System> {
        self.systems.iter().map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_new_assigns_distinct_ids() {
        let mut reg = SystemRegistry::new();
        let a = reg.insert_new(TypeSet::new(), None);
        let b = reg.insert_new(TypeSet::new(), None);
        assert_ne!(a, b);
        assert!(reg.exists(a));
    }

    #[test]
    fn set_callback_replaces_phase() {
        let mut reg = SystemRegistry::new();
        let id = reg.insert_new(TypeSet::new(), None);
        let system = reg.get_mut(id).unwrap();
        assert!(system.callback(SysPhase::Update).is_none());
        system.set_callback(SysPhase::Update, Some(Box::new(|_, _| {})));
        assert!(system.callback(SysPhase::Update).is_some());
    }
}
