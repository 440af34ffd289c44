//! Per-archetype component storage.
//!
//! [`ComponentTable`] holds one type-erased [`Column`] per component type
//! in the owning archetype's `TypeSet`, plus an entity<->row bimap and the
//! deferred-removal machinery that makes it safe to destroy or move
//! entities while a system is mid-iteration over this same table.

use std::alloc::{self, Layout};

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::typeset::TypeSet;

const INVALID_ROW: u32 = u32::MAX;

/// A type-erased, growable column of fixed-size component values.
///
/// Storage is a single heap allocation grown geometrically (x2) on
/// overflow, exactly as the reference implementation's columns grow. The
/// column does not know the Rust type it stores -- only its size, and a
/// destructor function pointer used to drop a row's bytes in place.
#[allow(unsafe_code)]
struct Column {
    data: *mut u8,
    len: usize,
    capacity: usize,
    item_size: usize,
    item_align: usize,
    destructor: fn(*mut u8),
}

#[allow(unsafe_code)]
impl Column {
    fn new(item_size: usize, item_align: usize, destructor: fn(*mut u8)) -> Self {
        // Zero-sized components are permitted; they never allocate.
        let item_size = item_size.max(1);
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            capacity: 0,
            item_size,
            item_align: item_align.max(1),
            destructor,
        }
    }

    fn layout_for(&self, capacity: usize) -> Layout {
        Layout::from_size_align(self.item_size * capacity, self.item_align)
            .expect("component column layout overflow")
    }

    fn grow_if_needed(&mut self) {
        if self.len < self.capacity {
            return;
        }
        let new_capacity = if self.capacity == 0 { 4 } else { self.capacity * 2 };
        let new_layout = self.layout_for(new_capacity);
        let new_data = unsafe { alloc::alloc(new_layout) };
        if new_data.is_null() {
            alloc::handle_alloc_error(new_layout);
        }
        if self.capacity > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(self.data, new_data, self.item_size * self.len);
                alloc::dealloc(self.data, self.layout_for(self.capacity));
            }
        }
        self.data = new_data;
        self.capacity = new_capacity;
    }

    fn shrink_if_sparse(&mut self) {
        if self.capacity == 0 || self.len * 2 > self.capacity {
            return;
        }
        let new_capacity = (self.capacity / 2).max(4);
        if new_capacity >= self.capacity {
            return;
        }
        let new_layout = self.layout_for(new_capacity);
        let new_data = unsafe { alloc::alloc(new_layout) };
        if new_data.is_null() {
            alloc::handle_alloc_error(new_layout);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(self.data, new_data, self.item_size * self.len);
            alloc::dealloc(self.data, self.layout_for(self.capacity));
        }
        self.data = new_data;
        self.capacity = new_capacity;
    }

    /// Reserves space for one more row and advances `len`, leaving the new
    /// row's bytes uninitialised. The caller must either write into it
    /// immediately or guarantee no read happens before a write.
    fn reserve_row(&mut self) -> usize {
        self.grow_if_needed();
        let row = self.len;
        self.len += 1;
        row
    }

    /// # Safety
    /// `row < self.len` and `src` points to `item_size` readable bytes.
    unsafe fn write_row(&mut self, row: usize, src: *const u8) {
        debug_assert!(row < self.len);
        let dst = self.data.add(row * self.item_size);
        std::ptr::copy_nonoverlapping(src, dst, self.item_size);
    }

    fn get_raw(&self, row: usize) -> *const u8 {
        debug_assert!(row < self.len);
        unsafe { self.data.add(row * self.item_size) }
    }

    fn get_raw_mut(&mut self, row: usize) -> *mut u8 {
        debug_assert!(row < self.len);
        unsafe { self.data.add(row * self.item_size) }
    }

    /// Invokes the destructor on `row`'s bytes in place.
    fn drop_row(&mut self, row: usize) {
        let ptr = self.get_raw_mut(row);
        (self.destructor)(ptr);
    }

    /// Copies the last row's bytes over `row`, then drops `len` by one
    /// (the source slot's old contents at `row` must already have been
    /// handled by the caller -- either dropped or logically moved out).
    fn swap_last_into(&mut self, row: usize) {
        let last = self.len - 1;
        if row != last {
            unsafe {
                let src = self.get_raw(last);
                let dst = self.get_raw_mut(row);
                std::ptr::copy_nonoverlapping(src, dst, self.item_size);
            }
        }
        self.len -= 1;
        self.shrink_if_sparse();
    }
}

#[allow(unsafe_code)]
impl Drop for Column {
    fn drop(&mut self) {
        for row in 0..self.len {
            self.drop_row(row);
        }
        if self.capacity > 0 {
            unsafe {
                alloc::dealloc(self.data, self.layout_for(self.capacity));
            }
        }
    }
}

// Columns only ever hold POD-ish component bytes moved around by this
// crate on a single thread; there's no thread-confined interior state
// beyond the raw pointer itself.
#[allow(unsafe_code)]
unsafe impl Send for Column {}
#[allow(unsafe_code)]
unsafe impl Sync for Column {}

/// The column-store of components for one archetype's entities, with
/// deferred-removal support for safe mutation during iteration.
pub struct ComponentTable {
    columns: Vec<(ComponentTypeId, Column)>,
    entity_to_row: Vec<u32>,
    row_to_entity: Vec<EntityId>,
    row_skipped: Vec<bool>,
    pending_remove: Vec<EntityId>,
    pending_destroy: Vec<EntityId>,
    iter_cursor: Option<EntityId>,
}

impl ComponentTable {
    /// Builds an empty table over `type_set`, with one column per member
    /// type using the sizes/destructors looked up from `sizes`.
    pub fn new(
        type_set: &TypeSet,
        sizes: impl Fn(ComponentTypeId) -> (usize, fn(*mut u8)),
    ) -> Self {
        let mut columns: Vec<(ComponentTypeId, Column)> = type_set
            .iter()
            .map(|ty| {
                let (size, destructor) = sizes(ty);
                (ty, Column::new(size, std::mem::align_of::<usize>(), destructor))
            })
            .collect();
        columns.sort_by_key(|(ty, _)| ty.raw());
        Self {
            columns,
            entity_to_row: Vec::new(),
            row_to_entity: Vec::new(),
            row_skipped: Vec::new(),
            pending_remove: Vec::new(),
            pending_destroy: Vec::new(),
            iter_cursor: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_to_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_to_entity.is_empty()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.row_of(entity).is_some()
    }

    fn row_of(&self, entity: EntityId) -> Option<usize> {
        let raw = entity.raw() as usize;
        match self.entity_to_row.get(raw) {
            Some(&row) if row != INVALID_ROW => Some(row as usize),
            _ => None,
        }
    }

    fn set_row_of(&mut self, entity: EntityId, row: Option<usize>) {
        let raw = entity.raw() as usize;
        if self.entity_to_row.len() <= raw {
            self.entity_to_row.resize(raw + 1, INVALID_ROW);
        }
        self.entity_to_row[raw] = row.map(|r| r as u32).unwrap_or(INVALID_ROW);
    }

    fn column_index(&self, ty: ComponentTypeId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&ty.raw(), |(t, _)| t.raw())
            .ok()
    }

    /// Appends a new row for `entity`. `initial` supplies raw pointers for
    /// any subset of this table's columns; columns not mentioned are left
    /// uninitialised (the caller must write them before they are read, see
    /// §4.4 "Move entity between tables").
    ///
    /// # Safety
    /// Every pointer in `initial` must be valid to read `item_size` bytes
    /// for its column's component type.
    #[allow(unsafe_code)]
    pub unsafe fn add_row(
        &mut self,
        entity: EntityId,
        initial: &[(ComponentTypeId, *const u8)],
    ) -> usize {
        let row = self.row_to_entity.len();
        for (ty, column) in &mut self.columns {
            let reserved = column.reserve_row();
            debug_assert_eq!(reserved, row);
            if let Some((_, src)) = initial.iter().find(|(t, _)| t == ty) {
                column.write_row(row, *src);
            }
        }
        self.row_to_entity.push(entity);
        self.row_skipped.push(false);
        self.set_row_of(entity, Some(row));
        tracing::debug!(entity = entity.raw(), row, "added row to component table");
        row
    }

    /// Raw pointer to `entity`'s cell for `ty`. `None` if the entity is
    /// not in this table or `ty` is not one of its columns.
    pub fn get(&self, entity: EntityId, ty: ComponentTypeId) -> Option<*const u8> {
        let row = self.row_of(entity)?;
        let idx = self.column_index(ty)?;
        Some(self.columns[idx].1.get_raw(row))
    }

    pub fn get_mut(&mut self, entity: EntityId, ty: ComponentTypeId) -> Option<*mut u8> {
        let row = self.row_of(entity)?;
        let idx = self.column_index(ty)?;
        Some(self.columns[idx].1.get_raw_mut(row))
    }

    /// Invokes `ty`'s destructor on `entity`'s cell without removing the
    /// row. Used by `remove_component` (§4.7) before moving the entity to
    /// an archetype that no longer has `ty`.
    pub fn drop_component(&mut self, entity: EntityId, ty: ComponentTypeId) {
        if let (Some(row), Some(idx)) = (self.row_of(entity), self.column_index(ty)) {
            self.columns[idx].1.drop_row(row);
        }
    }

    /// Removes `entity`'s row. If a traversal is in progress, the removal
    /// is deferred: the row is tombstoned and the entity enqueued for
    /// processing at the next `refresh`.
    pub fn remove(&mut self, entity: EntityId, destroy: bool) {
        let Some(row) = self.row_of(entity) else {
            return;
        };
        if self.iter_cursor.is_some() {
            if destroy {
                self.pending_destroy.push(entity);
            } else {
                self.pending_remove.push(entity);
            }
            self.row_skipped[row] = true;
            return;
        }
        self.remove_row_now(row, destroy);
    }

    fn remove_row_now(&mut self, row: usize, destroy: bool) {
        let entity = self.row_to_entity[row];
        if destroy {
            for (_, column) in &mut self.columns {
                column.drop_row(row);
            }
        }

        let last = self.row_to_entity.len() - 1;
        for (_, column) in &mut self.columns {
            column.swap_last_into(row);
        }
        if row != last {
            let moved_entity = self.row_to_entity[last];
            self.row_to_entity[row] = moved_entity;
            self.row_skipped[row] = self.row_skipped[last];
            self.set_row_of(moved_entity, Some(row));
        }
        self.row_to_entity.pop();
        self.row_skipped.pop();
        self.set_row_of(entity, None);
        tracing::debug!(entity = entity.raw(), row, destroy, "removed row from component table");
    }

    /// Begins a descending-row-index traversal. Requires no traversal is
    /// already in progress.
    pub fn first(&mut self) -> Option<EntityId> {
        debug_assert!(self.iter_cursor.is_none(), "table already iterating");
        if self.row_to_entity.is_empty() {
            return None;
        }
        self.advance_from(self.row_to_entity.len() - 1)
    }

    /// Advances past `current`, which must be the entity most recently
    /// yielded by `first`/`next` on this table.
    pub fn next(&mut self, current: EntityId) -> Option<EntityId> {
        debug_assert_eq!(self.iter_cursor, Some(current), "iteration cursor mismatch");
        let Some(row) = self.row_of(current) else {
            self.refresh();
            return None;
        };
        if row == 0 {
            self.refresh();
            return None;
        }
        self.advance_from(row - 1)
    }

    fn advance_from(&mut self, start_row: usize) -> Option<EntityId> {
        let mut row = start_row as i64;
        while row >= 0 {
            let r = row as usize;
            if !self.row_skipped[r] {
                let entity = self.row_to_entity[r];
                self.iter_cursor = Some(entity);
                return Some(entity);
            }
            row -= 1;
        }
        self.refresh();
        None
    }

    /// Aborts an in-progress traversal early, running the same refresh
    /// that natural exhaustion would.
    pub fn halt(&mut self) {
        if self.iter_cursor.is_some() {
            self.refresh();
        }
    }

    fn refresh(&mut self) {
        self.iter_cursor = None;
        let to_destroy = std::mem::take(&mut self.pending_destroy);
        let to_remove = std::mem::take(&mut self.pending_remove);
        for entity in to_destroy {
            if let Some(row) = self.row_of(entity) {
                self.remove_row_now(row, true);
            }
        }
        for entity in to_remove {
            if let Some(row) = self.row_of(entity) {
                self.remove_row_now(row, false);
            }
        }
        for skipped in &mut self.row_skipped {
            *skipped = false;
        }
    }

    pub fn is_iterating(&self) -> bool {
        self.iter_cursor.is_some()
    }

    /// A snapshot of the entities currently in this table, in row order.
    /// Used by `World::create_system` to fire START callbacks for every
    /// entity already present in a newly matched archetype (§4.6) without
    /// disturbing the descending-iteration cursor machinery.
    pub fn entities(&self) -> Vec<EntityId> {
        self.row_to_entity.clone()
    }

    pub(crate) fn column_ty_at(&self, idx: usize) -> ComponentTypeId {
        self.columns[idx].0
    }

    pub(crate) fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Moves `entity` from `src` to `dest`. Shared component types are copied
/// byte-for-byte; types unique to `dest` are left uninitialised (the
/// caller fills them in); types unique to `src` are *not* destroyed here
/// -- see `SPEC_FULL.md` §4.4/§4.7, the entity API destroys dropped types
/// explicitly before calling this.
#[allow(unsafe_code)]
pub fn move_entity(entity: EntityId, dest: &mut ComponentTable, src: &mut ComponentTable) -> usize {
    let shared: Vec<(ComponentTypeId, *const u8)> = (0..dest.column_count())
        .filter_map(|i| {
            let ty = dest.column_ty_at(i);
            src.get(entity, ty).map(|ptr| (ty, ptr))
        })
        .collect();
    // Safety: each pointer in `shared` was just fetched from `src`'s live
    // column storage for a type that also exists in `dest`, with
    // identical layout (components are keyed by ComponentTypeId, whose
    // registered size/align never changes).
    let new_row = unsafe { dest.add_row(entity, &shared) };
    src.remove(entity, false);
    new_row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_sizes(_ty: ComponentTypeId) -> (usize, fn(*mut u8)) {
        (std::mem::size_of::<u32>(), crate::component::noop_destructor)
    }

    fn ty(raw: u32) -> ComponentTypeId {
        ComponentTypeId::from_raw(raw)
    }

    fn entity(raw: u32) -> EntityId {
        EntityId::from_raw(crate::id::Id::from_raw(raw))
    }

    #[allow(unsafe_code)]
    unsafe fn add_u32(table: &mut ComponentTable, e: EntityId, ty: ComponentTypeId, value: u32) {
        let row = table.add_row(e, &[]);
        let ptr = table.columns[table.column_index(ty).unwrap()].1.get_raw_mut(row) as *mut u32;
        *ptr = value;
    }

    #[test]
    fn add_and_get_round_trip() {
        let mut set = TypeSet::new();
        set.insert(ty(1));
        let mut table = ComponentTable::new(&set, u32_sizes);
        let e = entity(1);
        unsafe { add_u32(&mut table, e, ty(1), 42) };
        let ptr = table.get(e, ty(1)).unwrap() as *const u32;
        assert_eq!(unsafe { *ptr }, 42);
    }

    #[test]
    fn descending_iteration_order() {
        let mut set = TypeSet::new();
        set.insert(ty(1));
        let mut table = ComponentTable::new(&set, u32_sizes);
        let e1 = entity(1);
        let e2 = entity(2);
        let e3 = entity(3);
        unsafe {
            add_u32(&mut table, e1, ty(1), 1);
            add_u32(&mut table, e2, ty(1), 2);
            add_u32(&mut table, e3, ty(1), 3);
        }

        let mut seen = Vec::new();
        let mut cur = table.first();
        while let Some(e) = cur {
            seen.push(e);
            cur = table.next(e);
        }
        assert_eq!(seen, vec![e3, e2, e1]);
    }

    #[test]
    fn removal_during_iteration_is_deferred_and_refreshed() {
        let mut set = TypeSet::new();
        set.insert(ty(1));
        let mut table = ComponentTable::new(&set, u32_sizes);
        let e1 = entity(1);
        let e2 = entity(2);
        let e3 = entity(3);
        unsafe {
            add_u32(&mut table, e1, ty(1), 1);
            add_u32(&mut table, e2, ty(1), 2);
            add_u32(&mut table, e3, ty(1), 3);
        }

        let mut visited = Vec::new();
        let mut cur = table.first();
        while let Some(e) = cur {
            visited.push(e);
            if e == e2 {
                table.remove(e2, true);
            }
            cur = table.next(e);
        }
        assert_eq!(visited, vec![e3, e2, e1]);
        assert_eq!(table.row_count(), 2);
        assert!(!table.contains(e2));
        assert!(table.contains(e1));
        assert!(table.contains(e3));

        let mut second_pass = Vec::new();
        let mut cur = table.first();
        while let Some(e) = cur {
            second_pass.push(e);
            cur = table.next(e);
        }
        assert_eq!(second_pass.len(), 2);
    }

    #[test]
    fn halt_runs_refresh() {
        let mut set = TypeSet::new();
        set.insert(ty(1));
        let mut table = ComponentTable::new(&set, u32_sizes);
        let e1 = entity(1);
        unsafe { add_u32(&mut table, e1, ty(1), 1) };
        table.first();
        table.remove(e1, true);
        table.halt();
        assert!(!table.is_iterating());
        assert_eq!(table.row_count(), 0);
    }
}
