//! Identifier allocation.
//!
//! Every entity, component type, system, and archetype is named by an
//! opaque 32-bit id. Id 0 is reserved as the invalid sentinel and is never
//! handed out by [`IdAllocator::allocate`]. Ids are not generational --
//! reuse is immediate once an id is released, which is why callers must not
//! retain an id across a `release` of that same id.

use std::fmt;

/// A 32-bit identifier. `0` is the invalid sentinel (see [`Id::INVALID`]).
///
/// Comparability is only meaningful between ids drawn from the same
/// [`IdAllocator`] -- ids from different kinds may collide numerically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u32);

impl Id {
    /// The sentinel value meaning "no id" / "not found".
    pub const INVALID: Id = Id(0);

    /// Raw numeric value, mostly useful for indexing parallel arrays.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Constructs an `Id` from a raw value. Restricted to this crate: the
    /// typed wrapper ids (`EntityId`, `ComponentTypeId`, `SystemId`,
    /// `ArchetypeId`) are the only supported way to name a record, and
    /// they only ever wrap values handed out by an [`IdAllocator`].
    #[inline]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Id(raw)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Id({})", self.0)
        } else {
            write!(f, "Id(invalid)")
        }
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::INVALID
    }
}

/// A monotonic id allocator with free-list reuse.
///
/// `allocate` pops from the free pool if non-empty, otherwise issues a
/// fresh id by pre-incrementing `max_issued`. `release` returns an id to
/// the pool. The pool is kept in two parallel forms: an unordered `Vec`
/// for O(1) pop, and a bitset (by id) for O(1) membership test -- the same
/// shape as a C free-list paired with a presence bitmap.
#[derive(Debug, Default)]
pub struct IdAllocator {
    max_issued: u32,
    free_contents: Vec<u32>,
    // Indexed by id; true means the id is currently sitting in the free pool.
    in_pool: Vec<bool>,
    kind: &'static str,
}

impl IdAllocator {
    pub fn new(kind: &'static str) -> Self {
        Self {
            max_issued: 0,
            free_contents: Vec::new(),
            in_pool: Vec::new(),
            kind,
        }
    }

    fn set_in_pool(&mut self, id: u32, value: bool) {
        if self.in_pool.len() <= id as usize {
            self.in_pool.resize(id as usize + 1, false);
        }
        self.in_pool[id as usize] = value;
    }

    fn is_in_pool(&self, id: u32) -> bool {
        self.in_pool.get(id as usize).copied().unwrap_or(false)
    }

    /// Returns a previously-unused id. Never returns [`Id::INVALID`].
    pub fn allocate(&mut self) -> Id {
        let raw = if let Some(id) = self.free_contents.pop() {
            self.set_in_pool(id, false);
            tracing::debug!(kind = self.kind, id, "reusing freed id");
            id
        } else {
            self.max_issued += 1;
            tracing::debug!(kind = self.kind, id = self.max_issued, "issuing fresh id");
            self.max_issued
        };
        Id(raw)
    }

    /// Marks `id` reusable. `id` must currently be in use (i.e. have been
    /// returned by `allocate` and not yet released); violating this is a
    /// programmer error surfaced to the caller as `false`.
    #[must_use]
    pub fn release(&mut self, id: Id) -> bool {
        let raw = id.raw();
        if raw == 0 || raw > self.max_issued || self.is_in_pool(raw) {
            tracing::warn!(kind = self.kind, id = raw, "release of id not currently in use");
            return false;
        }
        self.set_in_pool(raw, true);
        self.free_contents.push(raw);
        tracing::debug!(kind = self.kind, id = raw, "released id");
        true
    }

    /// O(1) membership test: is `id` currently allocated (in use, not free)?
    pub fn in_use(&self, id: Id) -> bool {
        let raw = id.raw();
        raw != 0 && raw <= self.max_issued && !self.is_in_pool(raw)
    }
}
