//! The block IR: nested blocks of statements over named tensor refinements.
//!
//! A [`Block`] owns its index list, its refinement list, and a [`StmtList`]
//! of sub-statements. Statement identity is positional and stable: the list
//! is an arena-backed doubly-linked list, so a [`StmtId`] handle survives
//! insertion of neighbors, and dependency edges between sibling statements
//! are stored as `StmtId`s.

use smallvec::SmallVec;

use crate::affine::Affine;
use crate::shape::TensorShape;

/// Direction of a refinement relative to its block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefDir {
    #[default]
    None,
    In,
    Out,
    InOut,
}

impl RefDir {
    pub fn union(self, other: RefDir) -> RefDir {
        match (self, other) {
            (RefDir::None, dir) | (dir, RefDir::None) => dir,
            (RefDir::In, RefDir::In) => RefDir::In,
            (RefDir::Out, RefDir::Out) => RefDir::Out,
            _ => RefDir::InOut,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, RefDir::In | RefDir::InOut)
    }

    pub fn is_write(self) -> bool {
        matches!(self, RefDir::Out | RefDir::InOut)
    }
}

/// A placement in the memory hierarchy: a device name plus a bank unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub name: String,
    pub unit: Affine,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), unit: Affine::default() }
    }
}

/// A loop index of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub range: u64,
    /// Binding to enclosing indices; zero for a free index.
    pub affine: Affine,
}

impl Index {
    pub fn range(name: impl Into<String>, range: u64) -> Self {
        Self { name: name.into(), range, affine: Affine::default() }
    }
}

/// A named view of a tensor within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    pub dir: RefDir,
    /// The name the parent block knows the tensor by; empty for allocations.
    pub from: String,
    /// The name this block knows the tensor by.
    pub into: String,
    /// One access affine per dimension, in terms of this block's indices.
    pub access: SmallVec<[Affine; 4]>,
    pub interior_shape: TensorShape,
    pub agg_op: String,
    pub location: Location,
    pub is_const: bool,
    /// Byte offset within the location's memory.
    pub offset: usize,
    pub bank_dim: Option<usize>,
    /// Overrides the cache location's unit when this tensor is cached.
    pub cache_unit: Option<Affine>,
}

/// Statement payload: a closed sum over the statement kinds.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Read one element of a refinement into a local value.
    Load { from: String, into: String },
    /// Write a local value into one element of a refinement.
    Store { from: String, into: String },
    /// An opaque multi-input multi-output primitive over whole tensors.
    Special { name: String, inputs: Vec<String>, outputs: Vec<String> },
    /// A scalar operation over local values.
    Intrinsic { name: String, inputs: Vec<String>, outputs: Vec<String> },
    /// A scalar constant definition.
    Constant { name: String },
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StmtKind,
    /// Sibling statements that must complete before this one runs.
    pub deps: Vec<StmtId>,
}

impl Statement {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, deps: Vec::new() }
    }

    /// Names of the refinements this statement reads.
    pub fn buffer_reads(&self) -> Vec<&str> {
        match &self.kind {
            StmtKind::Load { from, .. } => vec![from.as_str()],
            StmtKind::Special { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            StmtKind::Block(block) => {
                block.refs.iter().filter(|r| r.dir.is_read()).map(|r| r.from.as_str()).collect()
            }
            StmtKind::Store { .. } | StmtKind::Intrinsic { .. } | StmtKind::Constant { .. } => Vec::new(),
        }
    }

    /// Names of the refinements this statement writes.
    pub fn buffer_writes(&self) -> Vec<&str> {
        match &self.kind {
            StmtKind::Store { into, .. } => vec![into.as_str()],
            StmtKind::Special { outputs, .. } => outputs.iter().map(String::as_str).collect(),
            StmtKind::Block(block) => {
                block.refs.iter().filter(|r| r.dir.is_write()).map(|r| r.from.as_str()).collect()
            }
            StmtKind::Load { .. } | StmtKind::Intrinsic { .. } | StmtKind::Constant { .. } => Vec::new(),
        }
    }
}

/// Stable handle to a statement within one [`StmtList`].
///
/// Handles index an append-only arena, so they are never invalidated or
/// reused while the list is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct StmtNode {
    stmt: Statement,
    prev: Option<StmtId>,
    next: Option<StmtId>,
}

/// Doubly-linked statement list over an arena.
///
/// Insertion near a cursor does not disturb any other handle, which is what
/// lets a pass walk the list in reverse while splicing new statements around
/// the cursor.
#[derive(Debug, Clone, Default)]
pub struct StmtList {
    nodes: Vec<StmtNode>,
    head: Option<StmtId>,
    tail: Option<StmtId>,
    len: usize,
}

impl StmtList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<StmtId> {
        self.head
    }

    pub fn last(&self) -> Option<StmtId> {
        self.tail
    }

    pub fn next(&self, id: StmtId) -> Option<StmtId> {
        self.nodes[id.index()].next
    }

    pub fn prev(&self, id: StmtId) -> Option<StmtId> {
        self.nodes[id.index()].prev
    }

    pub fn get(&self, id: StmtId) -> &Statement {
        &self.nodes[id.index()].stmt
    }

    pub fn get_mut(&mut self, id: StmtId) -> &mut Statement {
        &mut self.nodes[id.index()].stmt
    }

    pub fn push_back(&mut self, stmt: Statement) -> StmtId {
        self.insert_before(None, stmt)
    }

    pub fn push_front(&mut self, stmt: Statement) -> StmtId {
        self.insert_before(self.head, stmt)
    }

    /// Insert before `at`; `None` inserts at the end.
    pub fn insert_before(&mut self, at: Option<StmtId>, stmt: Statement) -> StmtId {
        let id = StmtId(u32::try_from(self.nodes.len()).expect("statement arena overflow"));
        let prev = match at {
            Some(at) => self.nodes[at.index()].prev,
            None => self.tail,
        };
        self.nodes.push(StmtNode { stmt, prev, next: at });
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(id),
            None => self.head = Some(id),
        }
        match at {
            Some(at) => self.nodes[at.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
        id
    }

    /// Statement ids in list order.
    pub fn ids(&self) -> impl Iterator<Item = StmtId> + '_ {
        std::iter::successors(self.head, |&id| self.next(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (StmtId, &Statement)> + '_ {
        self.ids().map(|id| (id, self.get(id)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub name: String,
    pub location: Location,
    pub idxs: Vec<Index>,
    pub refs: Vec<Refinement>,
    pub stmts: StmtList,
}

impl Block {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn ref_by_into(&self, name: &str) -> Option<&Refinement> {
        self.refs.iter().find(|r| r.into == name)
    }

    pub fn ref_by_into_mut(&mut self, name: &str) -> Option<&mut Refinement> {
        self.refs.iter_mut().find(|r| r.into == name)
    }

    /// A refinement name not yet present in this block, derived from `base`.
    pub fn unique_ref_name(&self, base: &str) -> String {
        if self.ref_by_into(base).is_none() {
            return base.to_string();
        }
        let mut n = 0;
        loop {
            let candidate = format!("{base}_{n}");
            if self.ref_by_into(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// An index name not yet present in this block, derived from `base`.
    pub fn unique_idx_name(&self, base: &str) -> String {
        let taken = |name: &str| self.idxs.iter().any(|idx| idx.name == name);
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 0;
        loop {
            let candidate = format!("{base}_{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block {} {{", self.name)?;
        for idx in &self.idxs {
            writeln!(f, "  idx {}:{}", idx.name, idx.range)?;
        }
        for r in &self.refs {
            writeln!(f, "  {:?} {} <- {} {} off={}", r.dir, r.into, r.from, r.interior_shape, r.offset)?;
        }
        for (id, stmt) in self.stmts.iter() {
            write!(f, "  [{}]", id.index())?;
            if !stmt.deps.is_empty() {
                write!(f, " deps={:?}", stmt.deps.iter().map(|d| d.index()).collect::<Vec<_>>())?;
            }
            match &stmt.kind {
                StmtKind::Load { from, into } => writeln!(f, " {into} = load({from})")?,
                StmtKind::Store { from, into } => writeln!(f, " {into} = store({from})")?,
                StmtKind::Special { name, inputs, outputs } => {
                    writeln!(f, " special {name}({}) -> ({})", inputs.join(", "), outputs.join(", "))?
                }
                StmtKind::Intrinsic { name, inputs, outputs } => {
                    writeln!(f, " {} = {name}({})", outputs.join(", "), inputs.join(", "))?
                }
                StmtKind::Constant { name } => writeln!(f, " const {name}")?,
                StmtKind::Block(block) => {
                    let nested = block.to_string();
                    for line in nested.lines() {
                        writeln!(f, "  {line}")?;
                    }
                }
            }
        }
        write!(f, "}}")
    }
}
