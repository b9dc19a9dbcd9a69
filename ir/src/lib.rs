//! Block IR for the twill compiler.
//!
//! The IR describes computation as a nested hierarchy of blocks, each with a
//! list of loop indices, a list of refinements (named tensor views), and a
//! list of sub-statements. Passes mutate blocks in place.
//!
//! # Module Organization
//!
//! - [`block`] - Blocks, statements, refinements, and the statement list
//! - [`affine`] - Affine index polynomials
//! - [`shape`] - Strided tensor shapes
//! - [`alias`] - Alias analysis output consumed by passes
//! - [`fixup`] - Refinement change propagation through nested blocks

pub mod affine;
pub mod alias;
pub mod block;
pub mod dtype;
pub mod fixup;
pub mod shape;

pub use affine::Affine;
pub use alias::{AliasInfo, AliasMap, AliasType, Extent};
pub use block::{Block, Index, Location, RefDir, Refinement, Statement, StmtId, StmtKind, StmtList};
pub use dtype::DType;
pub use fixup::fixup_refs;
pub use shape::{Dim, TensorShape};
