//! Shape algebra.
//!
//! A [`TraversalPolicy`] is a list of row-major dimension extents plus a
//! traversal axis. Dimensions before the axis are iterated in bulk (their
//! product is the *count*); dimensions from the axis onward form one item
//! (their product is the *size*, a.k.a. mem length). Every transform returns a
//! new value.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::ShapeError;
use crate::expr::Expr;

/// Largest element count a shape may describe. Keeps index arithmetic inside
/// `i64` with headroom for offsets.
pub const MAX_ELEMENTS: usize = (i64::MAX / 4) as usize;

/// Per-axis coordinates of one element.
pub type Position = SmallVec<[usize; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraversalPolicy {
    dims: Vec<usize>,
    axis: usize,
}

/// Builds a [`TraversalPolicy`] with traversal axis 0, panicking on overflow.
#[macro_export]
macro_rules! shape {
    ($($dim:expr),* $(,)?) => {
        $crate::shape::TraversalPolicy::new(vec![$($dim as usize),*])
    };
}

impl TraversalPolicy {
    /// Panicking form of [`TraversalPolicy::try_new`].
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        match Self::try_new(dims) {
            Ok(shape) => shape,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_new(dims: impl Into<Vec<usize>>) -> Result<Self, ShapeError> {
        let dims = dims.into();
        checked_product(&dims)?;
        Ok(Self { dims, axis: 0 })
    }

    /// Resolves a single `-1` placeholder so the result holds `total` elements.
    pub fn infer(dims: &[isize], total: usize) -> Result<Self, ShapeError> {
        let mut known = 1usize;
        let mut unknown = None;
        for (axis, &dim) in dims.iter().enumerate() {
            if dim == -1 {
                if unknown.replace(axis).is_some() {
                    return Err(ShapeError::Inference {
                        dims: dims.to_vec(),
                        reason: "more than one -1 placeholder".to_string(),
                    });
                }
            } else if dim < 0 {
                return Err(ShapeError::Inference {
                    dims: dims.to_vec(),
                    reason: format!("negative extent {dim}"),
                });
            } else {
                known = known
                    .checked_mul(dim as usize)
                    .ok_or_else(|| ShapeError::Overflow {
                        dims: dims.iter().map(|&d| d.max(0) as usize).collect(),
                    })?;
            }
        }
        let resolved: Vec<usize> = match unknown {
            None => dims.iter().map(|&d| d as usize).collect(),
            Some(slot) => {
                if known == 0 || total % known != 0 {
                    return Err(ShapeError::Inference {
                        dims: dims.to_vec(),
                        reason: format!("{total} elements do not divide by {known}"),
                    });
                }
                dims.iter()
                    .enumerate()
                    .map(|(axis, &d)| if axis == slot { total / known } else { d as usize })
                    .collect()
            }
        };
        let shape = Self::try_new(resolved)?;
        if shape.total_size() != total {
            return Err(ShapeError::Inference {
                dims: dims.to_vec(),
                reason: format!("resolves to {} elements, expected {total}", shape.total_size()),
            });
        }
        Ok(shape)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn traversal_axis(&self) -> usize {
        self.axis
    }

    /// Extent of one axis.
    pub fn length(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Product of the extents from `depth` onward (1 past the last axis).
    pub fn size_from(&self, depth: usize) -> usize {
        self.dims[depth.min(self.dims.len())..].iter().product()
    }

    pub fn total_size(&self) -> usize {
        self.size_from(0)
    }

    /// Elements per item, i.e. the product of extents from the traversal axis.
    pub fn size(&self) -> usize {
        self.size_from(self.axis)
    }

    /// Number of items at the traversal axis.
    pub fn count(&self) -> usize {
        let size = self.size();
        if size == 0 {
            0
        } else {
            self.total_size() / size
        }
    }

    pub fn strides(&self) -> Vec<usize> {
        (0..self.dims.len()).map(|axis| self.size_from(axis + 1)).collect()
    }

    /// Linear index of a per-axis position.
    pub fn index(&self, position: &[usize]) -> usize {
        debug_assert_eq!(position.len(), self.dims.len());
        position
            .iter()
            .zip(self.strides())
            .map(|(pos, stride)| pos * stride)
            .sum()
    }

    /// Per-axis position of a linear index.
    pub fn position(&self, index: usize) -> Position {
        let mut remaining = index;
        self.strides()
            .into_iter()
            .map(|stride| {
                if stride == 0 {
                    return 0;
                }
                let pos = remaining / stride;
                remaining %= stride;
                pos
            })
            .collect()
    }

    pub fn index_expr(&self, position: &[Expr]) -> Expr {
        debug_assert_eq!(position.len(), self.dims.len());
        let terms = position
            .iter()
            .zip(self.strides())
            .filter(|(_, stride)| *stride != 0)
            .map(|(pos, stride)| {
                if stride == 1 {
                    pos.clone()
                } else {
                    pos.clone() * Expr::int(stride as i64)
                }
            })
            .collect();
        Expr::sum(terms)
    }

    /// Symbolic position of `index`, assuming `0 <= index < total_size()`.
    pub fn position_expr(&self, index: &Expr) -> Vec<Expr> {
        let strides = self.strides();
        self.dims
            .iter()
            .zip(strides)
            .enumerate()
            .map(|(axis, (&dim, stride))| {
                if dim <= 1 {
                    return Expr::int(0);
                }
                let scaled = if stride == 1 {
                    index.clone()
                } else {
                    Expr::quotient(index.clone(), Expr::int(stride as i64))
                };
                if axis == 0 {
                    scaled
                } else {
                    Expr::modulo(scaled, Expr::int(dim as i64))
                }
            })
            .collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.total_size()).map(move |index| self.position(index))
    }

    /// Same extents with the traversal boundary at `axis` (clamped to the rank).
    pub fn traverse(&self, axis: usize) -> Self {
        Self {
            dims: self.dims.clone(),
            axis: axis.min(self.dims.len()),
        }
    }

    /// Moves the traversal boundary one axis deeper.
    pub fn traverse_next(&self) -> Self {
        self.traverse(self.axis + 1)
    }

    /// Every element is its own item.
    pub fn traverse_each(&self) -> Self {
        self.traverse(self.dims.len())
    }

    /// The whole shape is one item.
    pub fn consolidate(&self) -> Self {
        self.traverse(0)
    }

    pub fn prepend_dimension(&self, extent: usize) -> Result<Self, ShapeError> {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(extent);
        dims.extend_from_slice(&self.dims);
        checked_product(&dims)?;
        Ok(Self {
            dims,
            axis: self.axis + 1,
        })
    }

    pub fn append_dimension(&self, extent: usize) -> Result<Self, ShapeError> {
        let mut dims = self.dims.clone();
        dims.push(extent);
        checked_product(&dims)?;
        Ok(Self {
            dims,
            axis: self.axis,
        })
    }

    /// Concatenates `other`'s extents after this shape's (`S ++ T`).
    pub fn append(&self, other: &TraversalPolicy) -> Result<Self, ShapeError> {
        let mut dims = self.dims.clone();
        dims.extend_from_slice(&other.dims);
        checked_product(&dims)?;
        Ok(Self {
            dims,
            axis: self.axis,
        })
    }

    pub fn replace_dimension(&self, axis: usize, extent: usize) -> Result<Self, ShapeError> {
        if axis >= self.dims.len() {
            return Err(ShapeError::AxisOutOfRange {
                axis,
                rank: self.dims.len(),
            });
        }
        let mut dims = self.dims.clone();
        dims[axis] = extent;
        checked_product(&dims)?;
        Ok(Self {
            dims,
            axis: self.axis,
        })
    }

    /// Shape of one item: the extents from the traversal axis onward.
    pub fn item(&self) -> Self {
        Self {
            dims: self.dims[self.axis..].to_vec(),
            axis: 0,
        }
    }

    /// Keeps the leading (count) extents and swaps the item for `item`.
    pub fn replace(&self, item: &TraversalPolicy) -> Self {
        let mut dims = self.dims[..self.axis].to_vec();
        dims.extend_from_slice(&item.dims);
        Self {
            dims,
            axis: self.axis,
        }
    }

    /// Extents from `depth` onward.
    pub fn drop_leading(&self, depth: usize) -> Self {
        let depth = depth.min(self.dims.len());
        Self {
            dims: self.dims[depth..].to_vec(),
            axis: self.axis.saturating_sub(depth),
        }
    }

    /// One-dimensional shape with the same total size.
    pub fn flatten(&self) -> Self {
        Self {
            dims: vec![self.total_size()],
            axis: 0,
        }
    }

    /// `(count, size)` with the traversal axis between them.
    pub fn flatten_items(&self) -> Self {
        Self {
            dims: vec![self.count(), self.size()],
            axis: 1,
        }
    }

    pub fn reshape(&self, target: &TraversalPolicy) -> Result<Self, ShapeError> {
        if target.total_size() != self.total_size() {
            return Err(ShapeError::ReshapeMismatch {
                from: self.to_string(),
                from_size: self.total_size(),
                to: target.to_string(),
                to_size: target.total_size(),
            });
        }
        Ok(target.clone())
    }

    /// Shape whose axis `i` has extent `dims[order[i]]`.
    pub fn permute(&self, order: &[usize]) -> Result<Self, ShapeError> {
        validate_permutation(order, self.dims.len())?;
        Ok(Self {
            dims: order.iter().map(|&axis| self.dims[axis]).collect(),
            axis: self.axis,
        })
    }

    /// Maps an index of `self.permute(order)` to the matching index of `self`.
    ///
    /// The output position is routed through `order` and flattened with this
    /// (input) shape's strides.
    pub fn permute_index(&self, order: &[usize], index: &Expr) -> Result<Expr, ShapeError> {
        let permuted = self.permute(order)?;
        let out_position = permuted.position_expr(index);
        let mut in_position = vec![Expr::int(0); self.dims.len()];
        for (out_axis, &in_axis) in order.iter().enumerate() {
            in_position[in_axis] = out_position[out_axis].clone();
        }
        Ok(self.index_expr(&in_position))
    }

    /// Concrete form of [`TraversalPolicy::permute_index`].
    pub fn permute_position(&self, order: &[usize], index: usize) -> Result<usize, ShapeError> {
        let permuted = self.permute(order)?;
        let out_position = permuted.position(index);
        let mut in_position: Position = smallvec::smallvec![0; self.dims.len()];
        for (out_axis, &in_axis) in order.iter().enumerate() {
            in_position[in_axis] = out_position[out_axis];
        }
        Ok(self.index(&in_position))
    }

    /// Checks that `subset` placed at `offsets` fits inside this shape.
    pub fn validate_subset(
        &self,
        subset: &TraversalPolicy,
        offsets: &[usize],
    ) -> Result<(), ShapeError> {
        if subset.rank() != self.rank() {
            return Err(ShapeError::RankMismatch {
                expected: self.rank(),
                actual: subset.rank(),
            });
        }
        if offsets.len() != self.rank() {
            return Err(ShapeError::RankMismatch {
                expected: self.rank(),
                actual: offsets.len(),
            });
        }
        let fits = self
            .dims
            .iter()
            .zip(&subset.dims)
            .zip(offsets)
            .all(|((&outer, &inner), &offset)| {
                offset.checked_add(inner).is_some_and(|end| end <= outer)
            });
        if !fits {
            return Err(ShapeError::SubsetOutOfRange {
                container: self.to_string(),
                subset: subset.to_string(),
                offsets: offsets.to_vec(),
            });
        }
        Ok(())
    }

    /// Maps `index` of `subset` into this container, offset per axis.
    pub fn subset(
        &self,
        subset: &TraversalPolicy,
        index: &Expr,
        offsets: &[usize],
    ) -> Result<Expr, ShapeError> {
        self.validate_subset(subset, offsets)?;
        let position: Vec<Expr> = subset
            .position_expr(index)
            .into_iter()
            .zip(offsets)
            .map(|(pos, &offset)| {
                if offset == 0 {
                    pos
                } else {
                    pos + Expr::int(offset as i64)
                }
            })
            .collect();
        Ok(self.index_expr(&position))
    }

    /// Same extents, ignoring the traversal axis.
    pub fn same_extents(&self, other: &TraversalPolicy) -> bool {
        self.dims == other.dims
    }

    /// Diagnostic form including the traversal axis, e.g. `(2, 3)[axis=1|2x3]`.
    pub fn detail(&self) -> String {
        format!("{self}[axis={}|{}x{}]", self.axis, self.count(), self.size())
    }
}

impl fmt::Display for TraversalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, ")")
    }
}

/// Inverse of a permutation: `invert(order)[order[i]] == i`.
pub fn invert_permutation(order: &[usize]) -> Result<Vec<usize>, ShapeError> {
    validate_permutation(order, order.len())?;
    let mut inverse = vec![0; order.len()];
    for (i, &axis) in order.iter().enumerate() {
        inverse[axis] = i;
    }
    Ok(inverse)
}

fn validate_permutation(order: &[usize], rank: usize) -> Result<(), ShapeError> {
    let invalid = || ShapeError::InvalidPermutation {
        order: order.to_vec(),
        rank,
    };
    if order.len() != rank {
        return Err(invalid());
    }
    let mut seen = vec![false; rank];
    for &axis in order {
        if axis >= rank || seen[axis] {
            return Err(invalid());
        }
        seen[axis] = true;
    }
    Ok(())
}

fn checked_product(dims: &[usize]) -> Result<usize, ShapeError> {
    let total = dims
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .filter(|&total| total <= MAX_ELEMENTS);
    total.ok_or_else(|| ShapeError::Overflow {
        dims: dims.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_size_follow_traversal_axis() {
        let shape = shape![2, 3, 4].traverse(1);
        assert_eq!(shape.count(), 2);
        assert_eq!(shape.size(), 12);
        assert_eq!(shape.traverse_each().size(), 1);
        assert_eq!(shape.consolidate().count(), 1);
    }

    #[test]
    fn infer_resolves_placeholder() {
        let shape = TraversalPolicy::infer(&[2, -1], 12).expect("inferable");
        assert_eq!(shape.dims(), &[2, 6]);
        assert!(TraversalPolicy::infer(&[-1, -1], 12).is_err());
        assert!(TraversalPolicy::infer(&[5, -1], 12).is_err());
    }
}
