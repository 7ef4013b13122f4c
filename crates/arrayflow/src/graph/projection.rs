use serde::{Deserialize, Serialize};

use crate::error::ShapeError;
use crate::expr::Expr;
use crate::shape::TraversalPolicy;

/// Index projections: single-input nodes whose element `i` is the input's
/// element at a computed index (optionally masked to zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// Same linear index.
    Reshape,
    /// Output axis `k` walks input axis `order[k]`.
    Permute { order: Vec<usize> },
    /// Window of the input starting at `offsets`.
    Subset { offsets: Vec<usize> },
    /// Input placed into a larger zero canvas at `offsets`.
    Pad { offsets: Vec<usize> },
    /// Input repeated cyclically to fill the output.
    Tile,
    /// Every input element repeated `inner` times in a row (`S -> S ++ E`).
    Expand { inner: usize },
    /// `base` applied to the leading part of the index with `trailing`
    /// innermost elements carried through unchanged.
    WithTrailing {
        base: Box<Projection>,
        base_output: TraversalPolicy,
        base_input: TraversalPolicy,
        trailing: usize,
    },
}

/// Input index for one output index, plus the mask under which it is read.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub index: Expr,
    pub guard: Option<Expr>,
}

impl Projected {
    fn direct(index: Expr) -> Self {
        Self { index, guard: None }
    }
}

impl Projection {
    pub fn name(&self) -> &'static str {
        match self {
            Projection::Reshape => "reshape",
            Projection::Permute { .. } => "permute",
            Projection::Subset { .. } => "subset",
            Projection::Pad { .. } => "pad",
            Projection::Tile => "tile",
            Projection::Expand { .. } => "expand",
            Projection::WithTrailing { .. } => "project",
        }
    }

    pub fn project(
        &self,
        output: &TraversalPolicy,
        input: &TraversalPolicy,
        index: &Expr,
    ) -> Result<Projected, ShapeError> {
        match self {
            Projection::Reshape => Ok(Projected::direct(index.clone())),
            Projection::Permute { order } => {
                Ok(Projected::direct(input.permute_index(order, index)?))
            }
            Projection::Subset { offsets } => {
                Ok(Projected::direct(input.subset(output, index, offsets)?))
            }
            Projection::Pad { offsets } => pad(output, input, offsets, index),
            Projection::Tile => Ok(Projected::direct(match input.total_size() {
                1 => Expr::int(0),
                total if total == output.total_size() => index.clone(),
                total => Expr::modulo(index.clone(), Expr::int(total as i64)),
            })),
            Projection::Expand { inner } => Ok(Projected::direct(if *inner == 1 {
                index.clone()
            } else {
                Expr::quotient(index.clone(), Expr::int(*inner as i64))
            })),
            Projection::WithTrailing {
                base,
                base_output,
                base_input,
                trailing,
            } => {
                let trailing = *trailing as i64;
                let outer = Expr::quotient(index.clone(), Expr::int(trailing));
                let inner = Expr::modulo(index.clone(), Expr::int(trailing));
                let projected = base.project(base_output, base_input, &outer)?;
                Ok(Projected {
                    index: projected.index * Expr::int(trailing) + inner,
                    guard: projected.guard,
                })
            }
        }
    }

    /// This projection carried over `trailing` extra innermost elements, as
    /// needed to project a derivative shaped `input ++ T` to `output ++ T`.
    pub fn lift(
        &self,
        output: &TraversalPolicy,
        input: &TraversalPolicy,
        trailing: usize,
    ) -> Projection {
        Projection::WithTrailing {
            base: Box::new(self.clone()),
            base_output: output.clone(),
            base_input: input.clone(),
            trailing,
        }
    }
}

fn pad(
    output: &TraversalPolicy,
    input: &TraversalPolicy,
    offsets: &[usize],
    index: &Expr,
) -> Result<Projected, ShapeError> {
    output.validate_subset(input, offsets)?;
    let position = output.position_expr(index);
    let mut guards = Vec::new();
    let mut source = Vec::with_capacity(position.len());
    for ((pos, &offset), (&extent, &canvas)) in position
        .into_iter()
        .zip(offsets)
        .zip(input.dims().iter().zip(output.dims()))
    {
        let lo = offset as i64;
        let hi = lo + extent as i64;
        if offset > 0 || extent < canvas {
            guards.push(pos.clone().within(Expr::int(lo), Expr::int(hi)));
        }
        source.push(if offset == 0 {
            pos
        } else {
            pos - Expr::int(lo)
        });
    }
    Ok(Projected {
        index: input.index_expr(&source),
        guard: if guards.is_empty() {
            None
        } else {
            Some(Expr::all(guards))
        },
    })
}
