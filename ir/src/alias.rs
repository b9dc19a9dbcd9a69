//! Alias analysis results consumed by scheduling passes.
//!
//! The analyzer itself runs earlier in the pipeline; this module carries its
//! per-refinement output and the pairwise comparison passes use to decide
//! ordering constraints.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::affine::Affine;
use crate::shape::TensorShape;

/// How two refinements relate in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasType {
    /// Provably disjoint.
    None,
    /// May overlap.
    Partial,
    /// Same memory.
    Exact,
}

/// Inclusive bounds of one access dimension, in elements of the base tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub min: i64,
    pub max: i64,
}

/// Aliasing facts for one refinement, relative to its base tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    /// Identity of the underlying allocation.
    pub base_ref: String,
    pub access: SmallVec<[Affine; 4]>,
    pub shape: TensorShape,
    pub extents: SmallVec<[Extent; 4]>,
}

impl AliasInfo {
    pub fn compare(a: &AliasInfo, b: &AliasInfo) -> AliasType {
        if a.base_ref != b.base_ref {
            return AliasType::None;
        }
        if a.access == b.access {
            return AliasType::Exact;
        }
        if a.extents.len() == b.extents.len() {
            let disjoint = a
                .extents
                .iter()
                .zip(&b.extents)
                .any(|(ea, eb)| ea.max < eb.min || eb.max < ea.min);
            if disjoint {
                return AliasType::None;
            }
        }
        AliasType::Partial
    }
}

/// Alias facts for every refinement of a block, keyed by `into` name.
pub type AliasMap = BTreeMap<String, AliasInfo>;
