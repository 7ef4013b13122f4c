use crate::expr::Expr;

/// Integer sequence `offset + scale * ((pos % modulus) / granularity)` over
/// positions `0..len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithmeticIndexSequence {
    pub offset: i64,
    pub scale: i64,
    pub granularity: i64,
    pub modulus: i64,
    pub len: usize,
}

impl ArithmeticIndexSequence {
    pub fn new(offset: i64, scale: i64, len: usize) -> Self {
        Self {
            offset,
            scale,
            granularity: 1,
            modulus: len.max(1) as i64,
            len,
        }
    }

    pub fn value_at(&self, pos: i64) -> i64 {
        self.offset + self.scale * ((pos % self.modulus) / self.granularity)
    }

    pub fn values(&self) -> Vec<i64> {
        (0..self.len as i64).map(|pos| self.value_at(pos)).collect()
    }

    pub fn multiply(&self, operand: i64) -> Self {
        Self {
            offset: self.offset * operand,
            scale: self.scale * operand,
            ..*self
        }
    }

    pub fn minus(&self) -> Self {
        self.multiply(-1)
    }

    /// The sequence as an expression of `index`, assuming
    /// `0 <= index < len`.
    pub fn to_expr(&self, index: &Expr) -> Expr {
        if self.scale == 0 {
            return Expr::int(self.offset);
        }
        let mut position = index.clone();
        if (self.modulus as usize) < self.len {
            position = Expr::modulo(position, Expr::int(self.modulus));
        }
        if self.granularity > 1 {
            position = Expr::quotient(position, Expr::int(self.granularity));
        }
        let scaled = match self.scale {
            1 => position,
            -1 => -position,
            scale => Expr::int(scale) * position,
        };
        if self.offset == 0 {
            scaled
        } else {
            scaled + Expr::int(self.offset)
        }
    }

    /// Fits a sequence to `values`, where `None` marks positions whose value
    /// is unconstrained. Prefers the widest modulus and the finest
    /// granularity.
    pub fn fit(values: &[Option<i64>]) -> Option<Self> {
        let len = values.len();
        if len == 0 {
            return None;
        }
        let mut moduli = divisors(len);
        moduli.reverse();
        for modulus in moduli {
            for granularity in divisors(modulus) {
                if let Some(sequence) = fit_with(values, modulus as i64, granularity as i64) {
                    return Some(sequence);
                }
            }
        }
        None
    }
}

fn fit_with(values: &[Option<i64>], modulus: i64, granularity: i64) -> Option<ArithmeticIndexSequence> {
    let group = |pos: usize| (pos as i64 % modulus) / granularity;
    let mut known = values
        .iter()
        .enumerate()
        .filter_map(|(pos, value)| value.map(|value| (group(pos), value)));
    let (first_group, first_value) = known.next().unwrap_or((0, 0));
    let second = known.find(|(g, _)| *g != first_group);
    let scale = match second {
        Some((g, value)) => {
            let rise = value - first_value;
            let run = g - first_group;
            if rise % run != 0 {
                return None;
            }
            rise / run
        }
        None => 0,
    };
    let sequence = ArithmeticIndexSequence {
        offset: first_value - scale * first_group,
        scale,
        granularity,
        modulus,
        len: values.len(),
    };
    let consistent = values
        .iter()
        .enumerate()
        .all(|(pos, value)| value.map_or(true, |v| sequence.value_at(pos as i64) == v));
    consistent.then_some(sequence)
}

fn divisors(n: usize) -> Vec<usize> {
    (1..=n).filter(|d| n % d == 0).collect()
}
