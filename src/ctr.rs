// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Constraint records.

A [`Constraint`] is an id-tagged, source-tagged node over the expression
algebra. Ids are minted by the shared [`IdManager`] through the
[`ConstraintSet`] factories; two constraints with the same id are the same
constraint as far as pooling and dedup are concerned, regardless of their
bodies.

[`IdManager`]: crate::IdManager
[`ConstraintSet`]: crate::ConstraintSet
*/

use serde::{Deserialize, Serialize};

use crate::exp::{single_var_of, BoolExp, CollectSyms, NumExp, ShapeExp, SingleVar, SymExp};
use crate::{CodeSource, FastHashMap, SymId, SymKind, Symbol};

/// Identifier of a constraint. Distinct id space from [`SymId`].
///
/// [`SymId`]: crate::SymId
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CtrId(pub u64);

impl std::fmt::Display for CtrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric ordering comparisons. `Lt` is strict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum CmpKind {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CtrKind {
    /// A bare boolean expression asserted true.
    ExpBool(BoolExp),
    Eq(SymExp, SymExp),
    NotEq(SymExp, SymExp),
    Lt(NumExp, NumExp),
    Le(NumExp, NumExp),
    And(Box<Constraint>, Box<Constraint>),
    Or(Box<Constraint>, Box<Constraint>),
    Not(Box<Constraint>),
    /// The two shapes broadcast together under the NumPy rule.
    Broadcastable(ShapeExp, ShapeExp),
    /// `body` holds for every integer value of `sym` in `[lo, hi]`.
    Forall {
        sym: Symbol,
        lo: NumExp,
        hi: NumExp,
        body: Box<Constraint>,
    },
    /// Unconditional failure; carries the reason verbatim for diagnostics.
    Fail(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Constraint {
    pub id: CtrId,
    pub source: Option<CodeSource>,
    pub kind: CtrKind,
}

impl PartialEq for Constraint {
    /// Ids are authoritative: the factories never reuse one.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Constraint {
    #[must_use]
    pub fn new(id: CtrId, kind: CtrKind, source: Option<CodeSource>) -> Self {
        Constraint { id, source, kind }
    }

    /// Whether an expression or sub-constraint anywhere below mentions the
    /// given symbol.
    #[must_use]
    pub fn mentions(&self, id: SymId) -> bool {
        let mut map = FastHashMap::default();
        self.collect_syms(&mut map);
        map.contains_key(&id)
    }

    /// The distinct shape symbols mentioned, for the per-symbol shape
    /// constraint index.
    #[must_use]
    pub fn shape_syms(&self) -> Vec<Symbol> {
        self.free_syms()
            .into_iter()
            .filter(|sym| sym.kind == SymKind::Shape)
            .collect()
    }

    /// See [`NumExp::single_var`].
    ///
    /// [`NumExp::single_var`]: crate::NumExp::single_var
    #[must_use]
    pub fn single_var(&self) -> SingleVar {
        single_var_of(self)
    }
}

impl CollectSyms for Constraint {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match &self.kind {
            CtrKind::ExpBool(e) => e.collect_syms(out),
            CtrKind::Eq(l, r) | CtrKind::NotEq(l, r) => {
                l.collect_syms(out);
                r.collect_syms(out);
            }
            CtrKind::Lt(l, r) | CtrKind::Le(l, r) => {
                l.collect_syms(out);
                r.collect_syms(out);
            }
            CtrKind::And(l, r) | CtrKind::Or(l, r) => {
                l.collect_syms(out);
                r.collect_syms(out);
            }
            CtrKind::Not(c) => c.collect_syms(out),
            CtrKind::Broadcastable(l, r) => {
                l.collect_syms(out);
                r.collect_syms(out);
            }
            CtrKind::Forall { sym, lo, hi, body } => {
                // The bound symbol is still reported; callers narrowing by
                // single_var never see Forall (the propagator skips it).
                out.entry(sym.id).or_insert_with(|| (sym.kind, sym.clone()));
                lo.collect_syms(out);
                hi.collect_syms(out);
                body.collect_syms(out);
            }
            CtrKind::Fail(_) => {}
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CtrKind::ExpBool(e) => write!(f, "{e}"),
            CtrKind::Eq(l, r) => write!(f, "{l} == {r}"),
            CtrKind::NotEq(l, r) => write!(f, "{l} != {r}"),
            CtrKind::Lt(l, r) => write!(f, "{l} < {r}"),
            CtrKind::Le(l, r) => write!(f, "{l} <= {r}"),
            CtrKind::And(l, r) => write!(f, "({l}) && ({r})"),
            CtrKind::Or(l, r) => write!(f, "({l}) || ({r})"),
            CtrKind::Not(c) => write!(f, "!({c})"),
            CtrKind::Broadcastable(l, r) => write!(f, "broadcastable({l}, {r})"),
            CtrKind::Forall { sym, lo, hi, body } => {
                write!(f, "forall {sym} in [{lo}, {hi}]. ({body})")
            }
            CtrKind::Fail(reason) => write!(f, "fail({reason})"),
        }
    }
}
