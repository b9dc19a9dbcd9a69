//! Affine index polynomials.
//!
//! An [`Affine`] is a linear combination of index names plus a constant, e.g.
//! `2*i + j + 5`. Affines appear in refinement access vectors, in location
//! units, and as keys of scheduler-side maps, so they carry value equality
//! and a total order that is stable across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Affine {
    terms: BTreeMap<String, i64>,
    constant: i64,
}

impl Affine {
    /// The constant polynomial `value`.
    pub fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    /// The polynomial `1 * name`.
    pub fn ident(name: impl Into<String>) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.into(), 1);
        Self { terms, constant: 0 }
    }

    /// The per-index coefficients, zero coefficients elided.
    pub fn terms(&self) -> &BTreeMap<String, i64> {
        &self.terms
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty() && self.constant == 0
    }
}

impl Add for Affine {
    type Output = Affine;

    fn add(self, rhs: Affine) -> Affine {
        self + &rhs
    }
}

impl Add<&Affine> for Affine {
    type Output = Affine;

    fn add(mut self, rhs: &Affine) -> Affine {
        for (name, coeff) in &rhs.terms {
            let entry = self.terms.entry(name.clone()).or_insert(0);
            *entry += coeff;
            if *entry == 0 {
                self.terms.remove(name);
            }
        }
        self.constant += rhs.constant;
        self
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, coeff) in &self.terms {
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            if *coeff == 1 {
                write!(f, "{name}")?;
            } else {
                write!(f, "{coeff}*{name}")?;
            }
        }
        if self.constant != 0 || first {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{}", self.constant)?;
        }
        Ok(())
    }
}
