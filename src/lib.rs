//! Archetype-based entity-component-system core.
//!
//! A [`World`](world::World) groups entities by the exact set of
//! component types they carry (an *archetype*), stores components in
//! cache-friendly column tables, and dispatches per-archetype system
//! callbacks. See `SPEC_FULL.md` for the full design.
//!
//! Scheduling, timing, CLI/driver glue, persistence, and multithreaded
//! execution are deliberately outside this crate -- see `SPEC_FULL.md`
//! §1.

#![deny(unsafe_code)]

pub mod archetype;
pub mod component;
pub mod entity;
pub mod id;
pub mod registry;
pub mod system;
#[allow(unsafe_code)]
pub mod table;
pub mod typeset;
pub mod world;

/// Errors produced by fallible public operations.
///
/// Every variant corresponds to a precondition violation enumerated in
/// `SPEC_FULL.md` §7 that a caller can trigger through the public API
/// with an id of the right *kind* but the wrong *liveness* -- the type
/// system cannot rule these out because ids are plain integers, not
/// capability tokens tied to a particular `World`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EcsError {
    #[error("unknown entity {0}")]
    UnknownEntity(u32),
    #[error("unknown component type {0}")]
    UnknownComponentType(u32),
    #[error("unknown system {0}")]
    UnknownSystem(u32),
    #[error("unknown archetype {0}")]
    UnknownArchetype(u32),
    #[error("entity {entity} already has component type {component_type}")]
    DuplicateComponent { entity: u32, component_type: u32 },
    #[error("entity {entity} has no component type {component_type}")]
    MissingComponent { entity: u32, component_type: u32 },
    #[error("system requirements must be non-empty")]
    EmptyRequirements,
    #[error("cannot perform this operation while a component table is being iterated")]
    IterationInProgress,
    #[error("id {0} is not currently in use")]
    NotInUse(u32),
}

/// Common imports for users of this crate.
pub mod prelude {
    pub use crate::archetype::ArchetypeId;
    pub use crate::component::ComponentTypeId;
    pub use crate::entity::EntityId;
    pub use crate::system::{ComponentGroup, SysPhase, SystemId};
    pub use crate::typeset::TypeSet;
    pub use crate::world::World;
    pub use crate::EcsError;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn smoke_create_entity_add_and_remove_component() {
        let mut world = World::new();
        let t1 = world.create_component_type(std::mem::size_of::<u32>(), None);
        let e = world.create_entity();

        assert!(!world.contains_component(e, t1).unwrap());
        world.add_component(e, t1).unwrap();
        assert!(world.contains_component(e, t1).unwrap());
        world.remove_component(e, t1).unwrap();
        assert!(!world.contains_component(e, t1).unwrap());
    }

    #[test]
    fn destroy_unknown_entity_is_a_soft_noop() {
        let mut world = World::new();
        let e = world.create_entity();
        world.destroy_entity(e);
        // Destroying it again is a silent no-op, not an error.
        world.destroy_entity(e);
    }

    #[test]
    fn duplicate_error_variants_carry_ids() {
        let err = EcsError::DuplicateComponent {
            entity: 1,
            component_type: 2,
        };
        assert_eq!(
            err.to_string(),
            "entity 1 already has component type 2"
        );
    }
}
