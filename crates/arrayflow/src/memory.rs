//! Host buffers and views.
//!
//! A [`RootBuffer`] owns a flat `f64` allocation; a [`Collection`] is a shaped
//! window (offset + shape) over one root. Several collections may view the same
//! root; kernel operations taking several views verify they agree on it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::MemoryError;
use crate::shape::TraversalPolicy;

static ROOT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct RootBuffer {
    id: u64,
    data: Arc<RwLock<Vec<f64>>>,
}

impl RootBuffer {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            id: ROOT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            data: Arc::new(RwLock::new(values)),
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        self.data.read().expect("root buffer lock poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<f64>> {
        self.data.write().expect("root buffer lock poisoned")
    }
}

impl fmt::Debug for RootBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootBuffer")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct Collection {
    root: RootBuffer,
    offset: usize,
    shape: TraversalPolicy,
}

impl Collection {
    pub fn zeros(shape: TraversalPolicy) -> Self {
        Self {
            root: RootBuffer::zeros(shape.total_size()),
            offset: 0,
            shape,
        }
    }

    pub fn from_vec(shape: TraversalPolicy, values: Vec<f64>) -> Result<Self, MemoryError> {
        if values.len() != shape.total_size() {
            return Err(MemoryError::LengthMismatch {
                expected: shape.total_size(),
                actual: values.len(),
            });
        }
        Ok(Self {
            root: RootBuffer::new(values),
            offset: 0,
            shape,
        })
    }

    /// One-dimensional collection holding `values`.
    pub fn pack(values: &[f64]) -> Self {
        Self {
            root: RootBuffer::new(values.to_vec()),
            offset: 0,
            shape: TraversalPolicy::new(vec![values.len()]),
        }
    }

    /// A view of `shape` starting `offset` elements into this view.
    pub fn view(&self, offset: usize, shape: TraversalPolicy) -> Result<Collection, MemoryError> {
        let start = self.offset + offset;
        let len = shape.total_size();
        let capacity = self.root.len();
        if start.checked_add(len).map_or(true, |end| end > capacity) {
            return Err(MemoryError::OutOfBounds {
                offset: start,
                len,
                capacity,
            });
        }
        Ok(Collection {
            root: self.root.clone(),
            offset: start,
            shape,
        })
    }

    /// Same elements under a different shape of equal size.
    pub fn reshape(&self, shape: TraversalPolicy) -> Result<Collection, MemoryError> {
        if shape.total_size() != self.len() {
            return Err(MemoryError::LengthMismatch {
                expected: self.len(),
                actual: shape.total_size(),
            });
        }
        Ok(Collection {
            root: self.root.clone(),
            offset: self.offset,
            shape,
        })
    }

    pub fn traverse(&self, axis: usize) -> Collection {
        Collection {
            root: self.root.clone(),
            offset: self.offset,
            shape: self.shape.traverse(axis),
        }
    }

    pub fn shape(&self) -> &TraversalPolicy {
        &self.shape
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.shape.total_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root(&self) -> &RootBuffer {
        &self.root
    }

    pub fn shares_root(&self, other: &Collection) -> bool {
        self.root.id == other.root.id
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let data = self.root.read();
        data[self.offset..self.offset + self.len()].to_vec()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        if index >= self.len() {
            return None;
        }
        self.root.read().get(self.offset + index).copied()
    }

    pub fn value_at(&self, position: &[usize]) -> Option<f64> {
        if position.len() != self.shape.rank() {
            return None;
        }
        self.get(self.shape.index(position))
    }

    pub fn set(&self, index: usize, value: f64) -> Result<(), MemoryError> {
        if index >= self.len() {
            return Err(MemoryError::OutOfBounds {
                offset: self.offset + index,
                len: 1,
                capacity: self.offset + self.len(),
            });
        }
        self.root.write()[self.offset + index] = value;
        Ok(())
    }

    /// Overwrites the whole view.
    pub fn write_all(&self, values: &[f64]) -> Result<(), MemoryError> {
        if values.len() != self.len() {
            return Err(MemoryError::LengthMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        let mut data = self.root.write();
        data[self.offset..self.offset + values.len()].copy_from_slice(values);
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("root", &self.root.id)
            .field("offset", &self.offset)
            .field("shape", &self.shape.to_string())
            .finish()
    }
}

/// Fails unless every view shares the first view's root buffer.
pub fn ensure_same_root(views: &[Collection]) -> Result<(), MemoryError> {
    let Some(first) = views.first() else {
        return Ok(());
    };
    for view in &views[1..] {
        if !view.shares_root(first) {
            return Err(MemoryError::CrossRoot {
                expected: first.root.id,
                found: view.root.id,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    #[test]
    fn views_share_writes_through_the_root() {
        let base = Collection::zeros(shape![6]);
        let tail = base.view(3, shape![3]).expect("in bounds");
        tail.set(1, 7.0).expect("in bounds");
        assert_eq!(base.to_vec(), vec![0.0, 0.0, 0.0, 0.0, 7.0, 0.0]);
        assert!(base.view(4, shape![3]).is_err());
    }

    #[test]
    fn same_root_check_rejects_foreign_views() {
        let a = Collection::zeros(shape![4]);
        let b = a.view(2, shape![2]).expect("in bounds");
        let c = Collection::zeros(shape![2]);
        assert!(ensure_same_root(&[a.clone(), b]).is_ok());
        assert!(matches!(
            ensure_same_root(&[a, c]),
            Err(MemoryError::CrossRoot { .. })
        ));
    }
}
