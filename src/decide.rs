// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The immediate decision procedure.

Classifies a constraint as `True` / `False` / `Unknown` using only structure
and the snapshot's interval caches, without the external solver. The
procedure is sound in both directions: `True` means the constraint follows
from the installed hard and path constraints, `False` means its negation
does. Everything else is `Unknown` — in particular, universally quantified
constraints are never decided here.

Structural equality is deliberately one-sided (it may miss semantic
equalities); the procedure inherits that and must never be "improved" into
answering `True` from anything weaker.
*/

use crate::ctr::{Constraint, CtrKind};
use crate::ctrset::ConstraintSet;
use crate::exp::{BoolExp, NumExp, ShapeExp, StrExp, SymExp};
use crate::simplify::Simplifier;
use crate::{immediate_checks_enabled, range::NumRange, Scalar};

/// Three-valued answer of an immediate check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Decision {
    True,
    False,
    Unknown,
}

impl Decision {
    #[must_use]
    pub fn from_bool(b: bool) -> Self {
        if b {
            Decision::True
        } else {
            Decision::False
        }
    }

    /// Flip a defined result; `Unknown` stays `Unknown`.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Decision::True => Decision::False,
            Decision::False => Decision::True,
            Decision::Unknown => Decision::Unknown,
        }
    }
}

/// Outcome of broadcasting one pair of dimensions.
#[derive(Clone, Debug, PartialEq)]
pub enum BroadcastDim {
    /// The pair broadcasts; this is the resulting dimension.
    Dim(NumExp),
    /// The pair can never broadcast.
    Never,
    Unknown,
}

impl ConstraintSet {
    /// Decide a constraint immediately, or answer `Unknown` when the
    /// process-wide switch has disabled immediate checks.
    #[must_use]
    pub fn check_immediate(&self, ctr: &Constraint) -> Decision {
        if !immediate_checks_enabled() {
            return Decision::Unknown;
        }
        let decision = self.decide(ctr);
        log::trace!("immediate #{}: {decision} <- {ctr}", ctr.id);
        decision
    }

    fn decide(&self, ctr: &Constraint) -> Decision {
        match &ctr.kind {
            CtrKind::ExpBool(e) => self.decide_bool(e),
            CtrKind::Eq(l, r) => self.decide_eq(l, r),
            CtrKind::NotEq(l, r) => self.decide_noteq(l, r),
            CtrKind::Lt(l, r) => self.decide_cmp(l, r, NumRange::lt_range, NumRange::lte_range),
            CtrKind::Le(l, r) => self.decide_cmp(l, r, NumRange::lte_range, NumRange::lt_range),
            CtrKind::And(l, r) => match (self.decide(l), self.decide(r)) {
                (Decision::False, _) | (_, Decision::False) => Decision::False,
                (Decision::True, Decision::True) => Decision::True,
                _ => Decision::Unknown,
            },
            CtrKind::Or(l, r) => match (self.decide(l), self.decide(r)) {
                (Decision::True, _) | (_, Decision::True) => Decision::True,
                (Decision::False, Decision::False) => Decision::False,
                _ => Decision::Unknown,
            },
            CtrKind::Not(inner) => self.decide(inner).negate(),
            CtrKind::Broadcastable(l, r) => self.decide_broadcast(l, r),
            CtrKind::Forall { .. } => Decision::Unknown,
            CtrKind::Fail(_) => Decision::False,
        }
    }

    /// Truth of a bare boolean expression: constants directly, symbols
    /// through a pinned `{0, 1}` range.
    pub(crate) fn decide_bool(&self, exp: &BoolExp) -> Decision {
        match exp {
            BoolExp::Const(b) => Decision::from_bool(*b),
            BoolExp::Symbol(sym) => {
                match self.symbol_range(sym).and_then(|r| r.as_const()) {
                    Some(c) if c.is_zero() => Decision::False,
                    Some(_) => Decision::True,
                    None => Decision::Unknown,
                }
            }
        }
    }

    /// Ordering comparisons, `Lt` and `Le` sharing one skeleton: `holds`
    /// proves the comparison, `refutes` proves the flipped strict one.
    fn decide_cmp(
        &self,
        lhs: &NumExp,
        rhs: &NumExp,
        holds: fn(&NumRange, &NumRange) -> bool,
        refutes: fn(&NumRange, &NumRange) -> bool,
    ) -> Decision {
        let s = Simplifier::new(self);
        let (lhs, rhs) = (s.num(lhs), s.num(rhs));
        let (Some(a), Some(b)) = (self.cached_range(&lhs), self.cached_range(&rhs)) else {
            return Decision::Unknown;
        };
        if holds(&a, &b) {
            Decision::True
        } else if refutes(&b, &a) {
            Decision::False
        } else {
            Decision::Unknown
        }
    }

    fn decide_eq(&self, lhs: &SymExp, rhs: &SymExp) -> Decision {
        let s = Simplifier::new(self);
        let (lhs, rhs) = (s.sym_exp(lhs), s.sym_exp(rhs));
        if lhs.kind() != rhs.kind() {
            return Decision::False;
        }
        match (&lhs, &rhs) {
            (SymExp::Num(a), SymExp::Num(b)) => {
                if let (Some(ca), Some(cb)) = (
                    self.cached_range(a).and_then(|r| r.as_const()),
                    self.cached_range(b).and_then(|r| r.as_const()),
                ) {
                    return Decision::from_bool(ca.compare(cb) == std::cmp::Ordering::Equal);
                }
                if a == b {
                    Decision::True
                } else {
                    Decision::Unknown
                }
            }
            (SymExp::Bool(a), SymExp::Bool(b)) => {
                match (self.decide_bool(a), self.decide_bool(b)) {
                    (Decision::Unknown, _) | (_, Decision::Unknown) => Decision::Unknown,
                    (x, y) => Decision::from_bool(x == y),
                }
            }
            (SymExp::Shape(a), SymExp::Shape(b)) => self.decide_shape_eq(a, b),
            (SymExp::Str(a), SymExp::Str(b)) => {
                match (self.cached_string(a), self.cached_string(b)) {
                    (Some(x), Some(y)) => Decision::from_bool(x == y),
                    _ => {
                        if a == b {
                            Decision::True
                        } else {
                            Decision::Unknown
                        }
                    }
                }
            }
            _ => Decision::Unknown,
        }
    }

    fn decide_shape_eq(&self, lhs: &ShapeExp, rhs: &ShapeExp) -> Decision {
        if lhs == rhs {
            return Decision::True;
        }
        match (lhs, rhs) {
            (ShapeExp::Const(a), ShapeExp::Const(b)) => {
                if a.len() != b.len() {
                    return Decision::False;
                }
                for (da, db) in a.iter().zip(b.iter()) {
                    if let (Some(ca), Some(cb)) = (
                        self.cached_range(da).and_then(|r| r.as_const()),
                        self.cached_range(db).and_then(|r| r.as_const()),
                    ) {
                        if ca.compare(cb) != std::cmp::Ordering::Equal {
                            return Decision::False;
                        }
                    }
                }
                Decision::Unknown
            }
            _ => Decision::Unknown,
        }
    }

    fn decide_noteq(&self, lhs: &SymExp, rhs: &SymExp) -> Decision {
        let s = Simplifier::new(self);
        let (lhs, rhs) = (s.sym_exp(lhs), s.sym_exp(rhs));
        if lhs.kind() != rhs.kind() {
            return Decision::True;
        }
        match (&lhs, &rhs) {
            (SymExp::Num(a), SymExp::Num(b)) => {
                if let (Some(ra), Some(rb)) = (self.cached_range(a), self.cached_range(b)) {
                    if ra.disjoint(&rb) {
                        return Decision::True;
                    }
                }
                if a == b {
                    Decision::False
                } else if let (Some(ca), Some(cb)) = (
                    self.cached_range(a).and_then(|r| r.as_const()),
                    self.cached_range(b).and_then(|r| r.as_const()),
                ) {
                    Decision::from_bool(ca.compare(cb) != std::cmp::Ordering::Equal)
                } else {
                    Decision::Unknown
                }
            }
            (SymExp::Bool(a), SymExp::Bool(b)) => {
                match (self.decide_bool(a), self.decide_bool(b)) {
                    (Decision::Unknown, _) | (_, Decision::Unknown) => Decision::Unknown,
                    (x, y) => Decision::from_bool(x != y),
                }
            }
            (SymExp::Shape(a), SymExp::Shape(b)) => self.decide_shape_eq(a, b).negate(),
            (SymExp::Str(a), SymExp::Str(b)) => {
                if let (Some(x), Some(y)) = (self.cached_string(a), self.cached_string(b)) {
                    return Decision::from_bool(x != y);
                }
                if let (_, StrExp::Const(value)) = (&a, &b) {
                    if self.check_non_string(a, value) {
                        return Decision::True;
                    }
                }
                if let (StrExp::Const(value), _) = (&a, &b) {
                    if self.check_non_string(b, value) {
                        return Decision::True;
                    }
                }
                if a == b {
                    Decision::False
                } else {
                    Decision::Unknown
                }
            }
            _ => Decision::Unknown,
        }
    }

    fn decide_broadcast(&self, lhs: &ShapeExp, rhs: &ShapeExp) -> Decision {
        let s = Simplifier::new(self);
        let (lhs, rhs) = (s.shape(lhs), s.shape(rhs));
        let (ShapeExp::Const(a), ShapeExp::Const(b)) = (&lhs, &rhs) else {
            return Decision::Unknown;
        };
        // Align right-to-left; the shorter shape is padded on the left with
        // implicit 1s.
        let rank = a.len().max(b.len());
        let one = NumExp::Int(1);
        let mut undecided = false;
        for i in 0..rank {
            let da = i
                .checked_sub(rank - a.len())
                .and_then(|i| a.get(i))
                .unwrap_or(&one);
            let db = i
                .checked_sub(rank - b.len())
                .and_then(|i| b.get(i))
                .unwrap_or(&one);
            match self.select_broadcastable(da, db) {
                BroadcastDim::Never => return Decision::False,
                BroadcastDim::Unknown => undecided = true,
                BroadcastDim::Dim(_) => {}
            }
        }
        if undecided {
            Decision::Unknown
        } else {
            Decision::True
        }
    }

    /// Broadcast one pair of dimensions under the NumPy rule: equal dims or
    /// a 1 on either side.
    #[must_use]
    pub fn select_broadcastable(&self, a: &NumExp, b: &NumExp) -> BroadcastDim {
        let ra = self.cached_range(a);
        let rb = self.cached_range(b);
        let ca = ra.and_then(|r| r.as_const());
        let cb = rb.and_then(|r| r.as_const());
        let is_one = |c: Option<Scalar>| {
            c.is_some_and(|c| c.compare(Scalar::Int(1)) == std::cmp::Ordering::Equal)
        };

        if is_one(ca) {
            return BroadcastDim::Dim(b.clone());
        }
        if is_one(cb) {
            return BroadcastDim::Dim(a.clone());
        }
        if let (Some(ca), Some(cb)) = (ca, cb) {
            return if ca.compare(cb) == std::cmp::Ordering::Equal {
                BroadcastDim::Dim(a.clone())
            } else {
                BroadcastDim::Never
            };
        }
        if let (Some(ca), Some(rb)) = (ca, rb) {
            if !rb.contains(ca) {
                return BroadcastDim::Never;
            }
        }
        if let (Some(cb), Some(ra)) = (cb, ra) {
            if !ra.contains(cb) {
                return BroadcastDim::Never;
            }
        }
        if let (Some(ra), Some(rb)) = (ra, rb) {
            if ra.disjoint(&rb) {
                return BroadcastDim::Never;
            }
        }
        if a == b {
            return BroadcastDim::Dim(a.clone());
        }
        BroadcastDim::Unknown
    }
}
