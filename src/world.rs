//! The `World`: ties id allocation, component types, archetypes, and
//! systems together behind the public entity/component API.
//!
//! The distilled design this core is built from describes four id
//! allocators and four registry maps as process-wide globals with an
//! explicit `init()` and no teardown. This module adopts the
//! re-architecture such a design's own notes allow for: hoisting them
//! into a context passed explicitly rather than touched through global
//! state. Ambient global mutability has no idiomatic place in a linkable
//! Rust library. Every contract (relocation-on-insert, deferred removal,
//! edge caching, dispatch ordering) is unchanged; only where the state
//! lives moved.

use crate::archetype::{Archetype, ArchetypeGraph, ArchetypeId};
use crate::component::{ComponentTypeId, ComponentTypeRegistry};
use crate::entity::EntityId;
use crate::id::IdAllocator;
use crate::registry::RegistryMap;
use crate::system::{ComponentGroup, SysCallback, SysPhase, SystemId, SystemRegistry};
use crate::table::ComponentTable;
use crate::typeset::TypeSet;
use crate::EcsError;

struct EntityRecord {
    archetype: ArchetypeId,
}

/// One ECS instance: entities, component types, archetypes, and systems,
/// all scoped to this value. Independent `World`s never interact.
pub struct World {
    entity_allocator: IdAllocator,
    entities: RegistryMap<EntityRecord>,
    component_types: ComponentTypeRegistry,
    archetypes: ArchetypeGraph,
    systems: SystemRegistry,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Builds a fresh, empty world, with the (always-present) empty
    /// archetype already created.
    pub fn new() -> Self {
        tracing::info!("initializing ecs world");
        let mut world = Self {
            entity_allocator: IdAllocator::new("entity"),
            entities: RegistryMap::new(),
            component_types: ComponentTypeRegistry::new(),
            archetypes: ArchetypeGraph::new(),
            systems: SystemRegistry::new(),
        };
        world.find_or_create_archetype(&TypeSet::new());
        world
    }

    // -- component types --------------------------------------------------

    pub fn create_component_type(
        &mut self,
        size: usize,
        destructor: Option<fn(*mut u8)>,
    ) -> ComponentTypeId {
        self.component_types.create(size, destructor)
    }

    // -- entities ----------------------------------------------------------

    pub fn create_entity(&mut self) -> EntityId {
        tracing::debug!("creating entity");
        let id = self.entity_allocator.allocate();
        let entity = EntityId::from_raw(id);
        let empty = self.find_or_create_archetype(&TypeSet::new());
        self.entities.insert(id, EntityRecord { archetype: empty });
        if let Some(arct) = self.archetypes.get_mut(empty) {
            // Safety: the empty archetype has no columns, so there is no
            // initial data to supply.
            #[allow(unsafe_code)]
            unsafe {
                arct.table.add_row(entity, &[]);
            }
        }
        tracing::info!(entity = entity.raw(), "created entity");
        entity
    }

    /// Destroys `entity`. A no-op (logged, not an error) if `entity` is
    /// already unknown.
    pub fn destroy_entity(&mut self, entity: EntityId) {
        let Some(record) = self.entities.get(entity.id()) else {
            tracing::debug!(entity = entity.raw(), "destroy of unknown entity is a no-op");
            return;
        };
        let arct = record.archetype;
        tracing::info!(entity = entity.raw(), "destroying entity");

        let matched_systems = self
            .archetypes
            .get(arct)
            .map(|a| a.systems.clone())
            .unwrap_or_default();
        for sys_id in matched_systems {
            self.invoke_callback(sys_id, SysPhase::Destroy, entity);
        }

        if let Some(arct) = self.archetypes.get_mut(arct) {
            arct.table.remove(entity, true);
        }
        self.entities.remove(entity.id());
        if !self.entity_allocator.release(entity.id()) {
            // Unreachable under correct internal bookkeeping -- `entity`
            // was just confirmed present in `self.entities` above -- but
            // the spec-mandated error path is logged rather than silently
            // discarded, in case that invariant is ever violated.
            let err = EcsError::NotInUse(entity.raw());
            tracing::error!(entity = entity.raw(), %err, "entity id release failed unexpectedly");
        }
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains(entity.id())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_of(&self, entity: EntityId) -> Result<ArchetypeId, EcsError> {
        self.entities
            .get(entity.id())
            .map(|r| r.archetype)
            .ok_or(EcsError::UnknownEntity(entity.raw()))
    }

    // -- components ----------------------------------------------------------

    pub fn contains_component(
        &self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Result<bool, EcsError> {
        self.check_entity(entity)?;
        self.check_component_type(ty)?;
        let arct = self.archetype_of(entity)?;
        Ok(self.type_set_of(arct).contains(ty))
    }

    /// Adds `ty` to `entity`, migrating it to the archetype with `ty`
    /// toggled in. Fires START for every system newly matched by the
    /// destination archetype, in that archetype's systems-list order.
    pub fn add_component(&mut self, entity: EntityId, ty: ComponentTypeId) -> Result<(), EcsError> {
        self.check_entity(entity)?;
        self.check_component_type(ty)?;
        let old_arct = self.archetype_of(entity)?;
        if self.type_set_of(old_arct).contains(ty) {
            return Err(EcsError::DuplicateComponent {
                entity: entity.raw(),
                component_type: ty.raw(),
            });
        }
        tracing::debug!(entity = entity.raw(), component_type = ty.raw(), "adding component");

        let new_arct = self.edge_toggling(old_arct, ty);
        self.move_entity_row(entity, old_arct, new_arct);
        if let Some(record) = self.entities.get_mut(entity.id()) {
            record.archetype = new_arct;
        }

        let old_systems = self
            .archetypes
            .get(old_arct)
            .map(|a| a.systems.clone())
            .unwrap_or_default();
        let new_systems = self
            .archetypes
            .get(new_arct)
            .map(|a| a.systems.clone())
            .unwrap_or_default();
        for sys_id in new_systems {
            if !old_systems.contains(&sys_id) {
                self.invoke_callback(sys_id, SysPhase::Start, entity);
            }
        }

        tracing::info!(entity = entity.raw(), component_type = ty.raw(), "added component");
        Ok(())
    }

    /// Removes `ty` from `entity`. The component's destructor is invoked
    /// before the migration -- `move_entity` never calls destructors, and
    /// a dropped type must not survive into the destination table.
    pub fn remove_component(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Result<(), EcsError> {
        self.check_entity(entity)?;
        self.check_component_type(ty)?;
        let old_arct = self.archetype_of(entity)?;
        if !self.type_set_of(old_arct).contains(ty) {
            return Err(EcsError::MissingComponent {
                entity: entity.raw(),
                component_type: ty.raw(),
            });
        }
        tracing::debug!(entity = entity.raw(), component_type = ty.raw(), "removing component");

        if let Some(arct) = self.archetypes.get_mut(old_arct) {
            arct.table.drop_component(entity, ty);
        }

        let new_arct = self.edge_toggling(old_arct, ty);
        self.move_entity_row(entity, old_arct, new_arct);
        if let Some(record) = self.entities.get_mut(entity.id()) {
            record.archetype = new_arct;
        }

        tracing::info!(entity = entity.raw(), component_type = ty.raw(), "removed component");
        Ok(())
    }

    /// Raw pointer to `entity`'s `ty` cell, valid until the next
    /// structural mutation of its archetype's table.
    pub fn get_component_from_entity(
        &self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Result<*const u8, EcsError> {
        if !self.contains_component(entity, ty)? {
            return Err(EcsError::MissingComponent {
                entity: entity.raw(),
                component_type: ty.raw(),
            });
        }
        let arct = self.archetype_of(entity)?;
        Ok(self
            .archetypes
            .get(arct)
            .and_then(|a| a.table.get(entity, ty))
            .expect("presence already checked"))
    }

    pub fn get_component_from_entity_mut(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Result<*mut u8, EcsError> {
        if !self.contains_component(entity, ty)? {
            return Err(EcsError::MissingComponent {
                entity: entity.raw(),
                component_type: ty.raw(),
            });
        }
        let arct = self.archetype_of(entity)?;
        Ok(self
            .archetypes
            .get_mut(arct)
            .and_then(|a| a.table.get_mut(entity, ty))
            .expect("presence already checked"))
    }

    /// Component access restricted to a system's own requirements,
    /// mirroring the reference pattern of a group object that only
    /// exposes the component types a system declared.
    pub fn get_component(
        &self,
        group: ComponentGroup,
        ty: ComponentTypeId,
    ) -> Result<*const u8, EcsError> {
        let system = self
            .systems
            .get(group.system)
            .ok_or(EcsError::UnknownSystem(group.system.raw()))?;
        if !system.requirements.contains(ty) {
            return Err(EcsError::MissingComponent {
                entity: group.entity.raw(),
                component_type: ty.raw(),
            });
        }
        self.get_component_from_entity(group.entity, ty)
    }

    // -- systems -------------------------------------------------------------

    /// Creates a system. `requirements` must be non-empty. Fails if any
    /// table is currently being iterated, since integrating the new
    /// system fires START against every entity of every newly matched
    /// archetype -- a nested iteration of an already-iterating table.
    pub fn create_system(
        &mut self,
        requirements: TypeSet,
        start: Option<SysCallback>,
    ) -> Result<SystemId, EcsError> {
        if requirements.is_empty() {
            return Err(EcsError::EmptyRequirements);
        }
        if self.any_table_iterating() {
            return Err(EcsError::IterationInProgress);
        }

        let sys_id = self.systems.insert_new(requirements.clone(), start);

        let anchor = requirements.first().expect("checked non-empty above");
        let candidate_archetypes = self
            .component_types
            .get(anchor)
            .map(|record| record.archetypes.clone())
            .unwrap_or_default();

        for arct_id in candidate_archetypes {
            let matches = self
                .archetypes
                .get(arct_id)
                .map(|a| requirements.is_subset(&a.type_set))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(arct) = self.archetypes.get_mut(arct_id) {
                arct.systems.push(sys_id);
            }
            let entities = self
                .archetypes
                .get(arct_id)
                .map(|a| a.table.entities())
                .unwrap_or_default();
            for entity in entities {
                self.invoke_callback(sys_id, SysPhase::Start, entity);
            }
        }

        Ok(sys_id)
    }

    /// Convenience wrapper around [`World::create_system`] for callers
    /// that have a raw slice of component-type ids rather than a
    /// hand-built `TypeSet`. Validates every id exists before delegating.
    pub fn create_system_from_types(
        &mut self,
        types: &[ComponentTypeId],
        start: Option<SysCallback>,
    ) -> Result<SystemId, EcsError> {
        let requirements = self.component_types.checked_type_set(types).ok_or_else(|| {
            let bad = types
                .iter()
                .copied()
                .find(|&ty| !self.component_types.exists(ty))
                .expect("checked_type_set only returns None when a type is missing");
            EcsError::UnknownComponentType(bad.raw())
        })?;
        self.create_system(requirements, start)
    }

    pub fn set_system_callback(
        &mut self,
        sys: SystemId,
        phase: SysPhase,
        callback: Option<SysCallback>,
    ) -> Result<(), EcsError> {
        let system = self
            .systems
            .get_mut(sys)
            .ok_or(EcsError::UnknownSystem(sys.raw()))?;
        system.set_callback(phase, callback);
        Ok(())
    }

    /// Removes `sys` from every archetype's systems list and releases its
    /// id. DESTROY is not fired for any currently-alive entity matched by
    /// `sys` -- teardown of a system is not itself an entity lifecycle
    /// event.
    pub fn destroy_system(&mut self, sys: SystemId) -> Result<(), EcsError> {
        if !self.systems.exists(sys) {
            return Err(EcsError::UnknownSystem(sys.raw()));
        }
        for arct in self.archetypes.iter_mut() {
            arct.systems.retain(|&s| s != sys);
        }
        self.systems.remove(sys);
        self.systems.release_id(sys);
        Ok(())
    }

    pub fn update_all(&mut self) {
        self.dispatch_all(SysPhase::Update);
    }

    pub fn draw_all(&mut self) {
        self.dispatch_all(SysPhase::Draw);
    }

    fn dispatch_all(&mut self, phase: SysPhase) {
        let archetype_ids: Vec<ArchetypeId> = self.archetypes.iter().map(|a| a.id).collect();
        for arct_id in archetype_ids {
            let system_ids = self
                .archetypes
                .get(arct_id)
                .map(|a| a.systems.clone())
                .unwrap_or_default();
            for sys_id in system_ids {
                let has_callback = self
                    .systems
                    .get(sys_id)
                    .map(|s| s.callback(phase).is_some())
                    .unwrap_or(false);
                if has_callback {
                    self.run_table_iteration(arct_id, sys_id, phase);
                }
            }
        }
    }

    fn run_table_iteration(&mut self, arct_id: ArchetypeId, sys_id: SystemId, phase: SysPhase) {
        let mut cursor = match self.archetypes.get_mut(arct_id) {
            Some(arct) => arct.table.first(),
            None => return,
        };
        while let Some(entity) = cursor {
            self.invoke_callback(sys_id, phase, entity);
            cursor = match self.archetypes.get_mut(arct_id) {
                Some(arct) => arct.table.next(entity),
                None => None,
            };
        }
    }

    fn any_table_iterating(&self) -> bool {
        self.archetypes.iter().any(|a| a.table.is_iterating())
    }

    /// Invokes a system's callback for `phase`, if set. The callback is
    /// temporarily taken out of the registry before invocation (and put
    /// back afterward) so the callback body can freely call back into
    /// `&mut World` -- including mutating the very system it is running
    /// under -- without aliasing the boxed closure storage itself.
    fn invoke_callback(&mut self, sys_id: SystemId, phase: SysPhase, entity: EntityId) {
        let Some(system) = self.systems.get_mut(sys_id) else {
            return;
        };
        let Some(callback) = system.callback_mut(phase).take() else {
            return;
        };

        callback(self, ComponentGroup { entity, system: sys_id });

        // The callback may have reassigned its own phase via
        // `set_system_callback` while it ran (e.g. a self-disabling "run
        // once" handler). Only restore the callback we took if the slot
        // is still empty -- otherwise the body's own reassignment wins.
        if let Some(system) = self.systems.get_mut(sys_id) {
            let slot = system.callback_mut(phase);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    // -- archetype graph ------------------------------------------------------

    fn type_set_of(&self, arct: ArchetypeId) -> TypeSet {
        self.archetypes
            .get(arct)
            .map(|a| a.type_set.clone())
            .unwrap_or_default()
    }

    /// Finds the unique archetype with exactly `type_set`'s members,
    /// creating it (and wiring its component-type membership lists and
    /// matched systems) if absent.
    fn find_or_create_archetype(&mut self, type_set: &TypeSet) -> ArchetypeId {
        if let Some(id) = self.archetypes.find_by_type_set(type_set) {
            return id;
        }

        let component_types = &self.component_types;
        let table = ComponentTable::new(type_set, |ty| {
            let record = component_types
                .get(ty)
                .expect("archetype type set member must be a registered component type");
            (record.size, record.destructor)
        });
        let id = self.archetypes.insert_new(type_set.clone(), table);

        for ty in type_set.iter() {
            self.component_types.note_archetype_created(ty, id);
        }

        let matched: Vec<SystemId> = self
            .systems
            .iter()
            .filter(|s| s.requirements.is_subset(type_set))
            .map(|s| s.id)
            .collect();
        if let Some(arct) = self.archetypes.get_mut(id) {
            arct.systems = matched;
        }

        id
    }

    /// Both the add-edge and remove-edge cases reduce to "toggle `ty` in
    /// `arct`'s type set, find-or-create the result, cache it". Must
    /// re-resolve `arct` after `find_or_create_archetype`, since that call
    /// may have inserted into (and thus relocated) the archetype registry.
    fn edge_toggling(&mut self, arct: ArchetypeId, ty: ComponentTypeId) -> ArchetypeId {
        if let Some(cached) = self.archetypes.get(arct).and_then(|a| a.cached_edge(ty)) {
            return cached;
        }
        let toggled = self.type_set_of(arct).toggled(ty);
        let target = self.find_or_create_archetype(&toggled);
        if let Some(a) = self.archetypes.get_mut(arct) {
            a.cache_edge(ty, target);
        }
        target
    }

    fn move_entity_row(&mut self, entity: EntityId, src: ArchetypeId, dest: ArchetypeId) {
        let (src_arct, dest_arct) = self.archetypes.get_two_mut(src, dest);
        let src_arct: &mut Archetype = src_arct.expect("source archetype must exist");
        let dest_arct: &mut Archetype = dest_arct.expect("destination archetype must exist");
        crate::table::move_entity(entity, &mut dest_arct.table, &mut src_arct.table);
    }

    // -- preconditions --------------------------------------------------------

    fn check_entity(&self, entity: EntityId) -> Result<(), EcsError> {
        if self.entities.contains(entity.id()) {
            Ok(())
        } else {
            tracing::warn!(entity = entity.raw(), "unknown entity");
            Err(EcsError::UnknownEntity(entity.raw()))
        }
    }

    fn check_component_type(&self, ty: ComponentTypeId) -> Result<(), EcsError> {
        if self.component_types.exists(ty) {
            Ok(())
        } else {
            tracing::warn!(component_type = ty.raw(), "unknown component type");
            Err(EcsError::UnknownComponentType(ty.raw()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn add_and_remove_moves_between_archetypes() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);
        let t2 = world.create_component_type(8, None);
        let e = world.create_entity();

        assert!(!world.contains_component(e, t1).unwrap());
        world.add_component(e, t1).unwrap();
        assert!(world.contains_component(e, t1).unwrap());
        world.add_component(e, t2).unwrap();

        let arct = world.archetype_of(e).unwrap();
        let ts = world.type_set_of(arct);
        assert!(ts.contains(t1) && ts.contains(t2));

        world.remove_component(e, t1).unwrap();
        let arct = world.archetype_of(e).unwrap();
        let ts = world.type_set_of(arct);
        assert!(!ts.contains(t1) && ts.contains(t2));
    }

    #[test]
    fn start_fires_once_per_new_match() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);
        let t2 = world.create_component_type(4, None);

        let starts = Rc::new(RefCell::new(0u32));
        let starts_clone = starts.clone();
        let mut reqs = TypeSet::new();
        reqs.insert(t1);
        world
            .create_system(
                reqs,
                Some(Box::new(move |_world, _group| {
                    *starts_clone.borrow_mut() += 1;
                })),
            )
            .unwrap();

        let e = world.create_entity();
        world.add_component(e, t1).unwrap();
        assert_eq!(*starts.borrow(), 1);

        world.add_component(e, t2).unwrap();
        assert_eq!(*starts.borrow(), 1);

        world.remove_component(e, t1).unwrap();
        assert_eq!(*starts.borrow(), 1);
    }

    #[test]
    fn update_visits_in_descending_row_order() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);

        let order = Rc::new(RefCell::new(Vec::new()));
        let order_clone = order.clone();
        let mut reqs = TypeSet::new();
        reqs.insert(t1);
        let sys = world.create_system(reqs, None).unwrap();
        world
            .set_system_callback(
                sys,
                SysPhase::Update,
                Some(Box::new(move |_world, group| {
                    order_clone.borrow_mut().push(group.entity);
                })),
            )
            .unwrap();

        let e1 = world.create_entity();
        world.add_component(e1, t1).unwrap();
        let e2 = world.create_entity();
        world.add_component(e2, t1).unwrap();
        let e3 = world.create_entity();
        world.add_component(e3, t1).unwrap();

        world.update_all();
        assert_eq!(*order.borrow(), vec![e3, e2, e1]);
    }

    #[test]
    fn destroy_during_update_is_deferred() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);

        let visits = Rc::new(RefCell::new(0u32));
        let to_destroy: Rc<RefCell<Option<EntityId>>> = Rc::new(RefCell::new(None));

        let mut reqs = TypeSet::new();
        reqs.insert(t1);
        let sys = world.create_system(reqs, None).unwrap();

        let e1 = world.create_entity();
        world.add_component(e1, t1).unwrap();
        let e2 = world.create_entity();
        world.add_component(e2, t1).unwrap();
        let e3 = world.create_entity();
        world.add_component(e3, t1).unwrap();
        *to_destroy.borrow_mut() = Some(e2);

        let visits_clone = visits.clone();
        let to_destroy_clone = to_destroy.clone();
        world
            .set_system_callback(
                sys,
                SysPhase::Update,
                Some(Box::new(move |world, group| {
                    *visits_clone.borrow_mut() += 1;
                    if Some(group.entity) == *to_destroy_clone.borrow() {
                        world.destroy_entity(group.entity);
                    }
                })),
            )
            .unwrap();

        world.update_all();
        assert_eq!(*visits.borrow(), 3);
        assert_eq!(world.entity_count(), 2);

        world.update_all();
        assert_eq!(*visits.borrow(), 5);
    }

    #[test]
    fn unknown_entity_operations_return_errors() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);
        let ghost = EntityId::from_raw(Id::from_raw(999));
        assert_eq!(
            world.add_component(ghost, t1),
            Err(EcsError::UnknownEntity(999))
        );
        assert_eq!(
            world.contains_component(ghost, t1),
            Err(EcsError::UnknownEntity(999))
        );
    }

    #[test]
    fn create_system_from_types_validates_ids() {
        let mut world = World::new();
        let t1 = world.create_component_type(4, None);
        let ghost = ComponentTypeId::from_raw(999);

        let sys = world.create_system_from_types(&[t1], None).unwrap();
        assert!(world.systems.exists(sys));

        assert_eq!(
            world.create_system_from_types(&[t1, ghost], None),
            Err(EcsError::UnknownComponentType(999))
        );
    }

    #[test]
    fn empty_requirements_are_rejected() {
        let mut world = World::new();
        assert_eq!(
            world.create_system(TypeSet::new(), None),
            Err(EcsError::EmptyRequirements)
        );
    }
}
