//! Optimistic mutation with exact rollback.
//!
//! A gesture mutates the local collection immediately and keeps a snapshot
//! of the untouched entity. If the remote store later rejects the write,
//! the snapshot restores exactly that entity; siblings keep whatever has
//! happened to them in the meantime.

use crate::{
    Result, ToposyncError,
    model::{DiagramEdge, DiagramNode},
};

/// Entities addressable by id inside a flat collection.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for DiagramNode {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for DiagramEdge {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Pre-mutation snapshot of one entity, sufficient to undo it.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    original: T,
    index: usize,
}

impl<T> Snapshot<T> {
    pub fn original(&self) -> &T {
        &self.original
    }
}

pub struct OptimisticStore;

impl OptimisticStore {
    /// Apply `mutator` to the entity with `id`, in place. Returns the
    /// snapshot needed to roll the entity back.
    pub fn apply<T, F>(
        items: &mut Vec<T>,
        id: &str,
        mutator: F,
    ) -> Result<Snapshot<T>>
    where
        T: Identified + Clone,
        F: FnOnce(&T) -> T,
    {
        let index = items.iter().position(|e| e.id() == id).ok_or_else(|| ToposyncError::Model(format!("entity {} not found", id)))?;

        let original = items[index].clone();
        items[index] = mutator(&original);

        Ok(Snapshot {
            original,
            index,
        })
    }

    /// Restore exactly the snapshotted entity into `items`.
    ///
    /// The entity is replaced where it currently sits; if it has vanished,
    /// it is re-inserted at its remembered position (clamped). Every other
    /// entry is left untouched.
    pub fn rollback<T>(
        items: &mut Vec<T>,
        snapshot: Snapshot<T>,
    ) where
        T: Identified,
    {
        match items.iter().position(|e| e.id() == snapshot.original.id()) {
            Some(index) => items[index] = snapshot.original,
            None => {
                let at = snapshot.index.min(items.len());
                items.insert(at, snapshot.original);
            }
        }
    }
}
