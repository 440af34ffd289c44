//! Archetypes: entities grouped by their exact component-type set.
//!
//! An archetype is identified by id and characterized by an immutable
//! [`TypeSet`]. Archetypes are deduped -- at most one exists per distinct
//! `TypeSet` -- and are never destroyed. This module owns archetype
//! storage and the add/remove edge cache; the coordination of archetype
//! creation with component-type membership lists and system matching
//! lives on [`crate::world::World`], since it is the only place that
//! holds all three registries at once (mirroring how the C source's
//! `create_arct` reaches directly into the global component-type and
//! system maps).

use std::collections::HashMap;

use crate::component::ComponentTypeId;
use crate::id::{Id, IdAllocator};
use crate::registry::RegistryMap;
use crate::system::SystemId;
use crate::table::ComponentTable;
use crate::typeset::TypeSet;

/// Handle to an archetype. Stable for the program's lifetime; archetypes
/// are never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(Id);

impl ArchetypeId {
    pub(crate) fn from_raw(id: Id) -> Self {
        ArchetypeId(id)
    }

    pub fn raw(self) -> u32 {
        self.0.raw()
    }

    pub(crate) fn id(self) -> Id {
        self.0
    }
}

/// One archetype's record: its type set, component table, the cached
/// add/remove edges to neighboring archetypes, and the systems currently
/// matched against it.
pub struct Archetype {
    pub id: ArchetypeId,
    pub type_set: TypeSet,
    pub table: ComponentTable,
    /// Edge cache keyed by the toggled component type's raw id, per §4.5.
    edges: HashMap<u32, ArchetypeId>,
    pub systems: Vec<SystemId>,
}

impl Archetype {
    /// The archetype obtained by toggling `ty` in this archetype's type
    /// set, if that edge has already been created and cached.
    pub fn cached_edge(&self, ty: ComponentTypeId) -> Option<ArchetypeId> {
        self.edges.get(&ty.raw()).copied()
    }

    pub fn cache_edge(&mut self, ty: ComponentTypeId, target: ArchetypeId) {
        self.edges.insert(ty.raw(), target);
    }
}

/// Owns archetype storage: the allocator, the dense registry map, and a
/// dedup index from `TypeSet` to `ArchetypeId`. This index gives O(1)
/// dedup for a set that has been seen before; `World::find_or_create`
/// additionally consults each component type's own archetype list for
/// the narrower "does an archetype containing t also match S" scan
/// described in §4.5 step 2.
#[derive(Default)]
pub struct ArchetypeGraph {
    allocator: IdAllocator,
    archetypes: RegistryMap<Archetype>,
    by_type_set: HashMap<TypeSet, ArchetypeId>,
}

impl ArchetypeGraph {
    pub fn new() -> Self {
        Self {
            allocator: IdAllocator::new("archetype"),
            archetypes: RegistryMap::new(),
            by_type_set: HashMap::new(),
        }
    }

    pub fn find_by_type_set(&self, type_set: &TypeSet) -> Option<ArchetypeId> {
        self.by_type_set.get(type_set).copied()
    }

    /// Allocates a fresh archetype id and inserts its record. Does *not*
    /// perform component-type membership bookkeeping or system matching
    /// -- that is the caller's (`World`'s) responsibility, since it needs
    /// the other registries.
    pub fn insert_new(&mut self, type_set: TypeSet, table: ComponentTable) -> ArchetypeId {
        let id = ArchetypeId(self.allocator.allocate());
        tracing::debug!(archetype = id.raw(), "creating archetype");
        self.by_type_set.insert(type_set.clone(), id);
        self.archetypes.insert(
            id.id(),
            Archetype {
                id,
                type_set,
                table,
                edges: HashMap::new(),
                systems: Vec::new(),
            },
        );
        tracing::info!(archetype = id.raw(), "created archetype");
        id
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.id())
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.id())
    }

    /// Borrows two distinct archetypes mutably at once, needed to move an
    /// entity's row directly from one table into another.
    pub fn get_two_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (Option<&mut Archetype>, Option<&mut Archetype>) {
        self.archetypes.get_two_mut(a.id(), b.id())
    }

    /// Iterates archetypes in registry-map order -- the order
    /// `update_all`/`draw_all` walk, per §5's ordering guarantee.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().map(|(_, a)| a)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.archetypes.iter_mut().map(|(_, a)| a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_table() -> ComponentTable {
        ComponentTable::new(&TypeSet::new(), |_| (0, crate::component::noop_destructor))
    }

    #[test]
    fn dedup_by_type_set() {
        let mut graph = ArchetypeGraph::new();
        let set = TypeSet::new();
        assert!(graph.find_by_type_set(&set).is_none());
        let id = graph.insert_new(set.clone(), empty_table());
        assert_eq!(graph.find_by_type_set(&set), Some(id));
    }

    #[test]
    fn edges_cache_round_trips() {
        let mut graph = ArchetypeGraph::new();
        let id = graph.insert_new(TypeSet::new(), empty_table());
        let ty = ComponentTypeId::from_raw(3);
        assert!(graph.get(id).unwrap().cached_edge(ty).is_none());
        let other = ArchetypeId::from_raw(Id::from_raw(99));
        graph.get_mut(id).unwrap().cache_edge(ty, other);
        assert_eq!(graph.get(id).unwrap().cached_edge(ty), Some(other));
    }
}
