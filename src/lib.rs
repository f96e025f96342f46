// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Tensor Shape Constraint engine

This crate is the constraint core of a symbolic tensor-shape analyzer. The
symbolic interpreter that walks the program IR is an external collaborator:
it mints symbols here, builds [`NumExp`]/[`BoolExp`]/[`ShapeExp`]/[`StrExp`]
trees, wraps them into [`Constraint`]s through the factory methods of
[`ConstraintSet`], and installs them with `require` / `guarantee` / `add_if`.

The central structure is a [`ConstraintSet`] snapshot. Snapshots are value
types: every installer returns a new snapshot sharing structure with its
parent, which is the substrate on which the interpreter forks paths at
branches. Sibling snapshots stay consistent because they share one
[`IdManager`] behind an `Arc`, so symbol and constraint ids are unique
program-wide.

Three layers sit below the snapshot:

- the expression algebra ([`exp`]) with structural equality and free-symbol
  traversal,
- the interval domain ([`range`]) used as the abstract value of numeric
  symbols,
- the immediate decision procedure ([`decide`]) that classifies a constraint
  as true / false / unknown without an external solver.

Anything the immediate layer cannot decide is kept in the pool and exported
to an external solver through [`ConstraintSet::constraint_json`].

[`NumExp`]: crate::NumExp
[`BoolExp`]: crate::BoolExp
[`ShapeExp`]: crate::ShapeExp
[`StrExp`]: crate::StrExp
[`Constraint`]: crate::Constraint
[`ConstraintSet`]: crate::ConstraintSet
[`IdManager`]: crate::IdManager
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub(crate) type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub mod ctr;
pub mod ctrset;
pub mod decide;
pub mod exp;
pub mod range;
pub mod simplify;

pub use ctr::{CmpKind, Constraint, CtrId, CtrKind};
pub use ctrset::{ConstraintBundle, ConstraintSet, CtrClass};
pub use decide::{BroadcastDim, Decision};
pub use exp::{BoolExp, DimVec, NumBop, NumExp, NumUop, ShapeExp, SingleVar, StrExp, SymExp};
pub use range::{Bound, NumRange, Scalar};

/// Errors raised by misuse of the engine API.
///
/// These indicate a bug in the caller (the interpreter or a library shim),
/// never in the analyzed program; they abort the interpreter step and are
/// surfaced to the user as a tool bug. Queries and installers on well-formed
/// input never produce them.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UsageError {
    #[error("shape rank must be non-negative, got {0}")]
    NegativeRank(i64),
    #[error("equality between a numeric and a non-numeric expression ({lhs} vs {rhs})")]
    MixedNumericEquality { lhs: ExpKind, rhs: ExpKind },
    #[error("forall index must be an integer symbol, got a {0} symbol")]
    NonIntQuantifier(SymKind),
}

/// The value kind a symbol ranges over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum SymKind {
    #[strum(to_string = "int")]
    Int,
    #[strum(to_string = "float")]
    Float,
    #[strum(to_string = "bool")]
    Bool,
    #[strum(to_string = "string")]
    String,
    #[strum(to_string = "shape")]
    Shape,
}

/// The result kind of a [`SymExp`].
///
/// [`SymExp`]: crate::SymExp
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum ExpKind {
    #[strum(to_string = "num")]
    Num,
    #[strum(to_string = "bool")]
    Bool,
    #[strum(to_string = "shape")]
    Shape,
    #[strum(to_string = "string")]
    Str,
}

/// Identifier of a symbol, unique across every snapshot descended from one
/// root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymId(pub u64);

impl std::fmt::Display for SymId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source position in the analyzed program, carried for diagnostics.
///
/// Already in the sanitized `{file, line, column}` form the external solver
/// bundle expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSource {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl CodeSource {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        CodeSource {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for CodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A symbolic value minted by the engine.
///
/// Equality and hashing go through the id alone; the name is a display aid
/// and is not required to be unique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymId,
    pub kind: SymKind,
    pub name: Arc<str>,
    pub source: Option<CodeSource>,
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The process-wide id well.
///
/// Every snapshot descended from a common root references (not copies) the
/// same manager, so ids stay unique across forked paths. Two counters: one
/// for symbols, one for constraints — the id spaces are disjoint by
/// construction.
///
/// Mixing managers across a fork is a caller bug; [`ConstraintSet`] clones
/// always carry their parent's handle.
///
/// [`ConstraintSet`]: crate::ConstraintSet
#[derive(Debug, Default)]
pub struct IdManager {
    next_sym: AtomicU64,
    next_ctr: AtomicU64,
}

impl IdManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_sym_id(&self) -> SymId {
        SymId(self.next_sym.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_ctr_id(&self) -> CtrId {
        CtrId(self.next_ctr.fetch_add(1, Ordering::Relaxed))
    }
}

/// When false, [`ConstraintSet::check_immediate`] answers `Unknown` for
/// everything and installs become plain appends. The service layer flips
/// this off during bulk analysis where only the exported bundle matters.
///
/// [`ConstraintSet::check_immediate`]: crate::ConstraintSet::check_immediate
static IMMEDIATE_CHECKS: AtomicBool = AtomicBool::new(true);

pub fn set_immediate_checks(enabled: bool) {
    IMMEDIATE_CHECKS.store(enabled, Ordering::Relaxed);
}

pub(crate) fn immediate_checks_enabled() -> bool {
    IMMEDIATE_CHECKS.load(Ordering::Relaxed)
}
