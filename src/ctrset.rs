// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The constraint-set snapshot.

A [`ConstraintSet`] is an immutable value: a monotonically appending pool of
constraints partitioned into *hard* (engine-asserted invariants), *soft*
(obligations the analyzed program must satisfy) and *path* (branch
predicates), together with per-symbol caches narrowed from the hard and path
classes.

Every installer returns a new snapshot sharing structure with its parent
through persistent containers; the interpreter forks an execution path by
calling [`add_if`] with a branch condition on one copy and with its negation
on another. Soft constraints are deliberately excluded from cache narrowing:
they are assertions the program must *prove*, and narrowing from them would
hide exactly the violations the analysis exists to find.

[`ConstraintSet`]: crate::ConstraintSet
[`add_if`]: crate::ConstraintSet::add_if
*/

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ctr::{CmpKind, Constraint, CtrId, CtrKind};
use crate::decide::Decision;
use crate::exp::{BoolExp, DimVec, NumExp, ShapeExp, StrExp, SymExp};
use crate::range::{NumRange, Scalar};
use crate::simplify::Simplifier;
use crate::{CodeSource, ExpKind, IdManager, SymId, SymKind, Symbol, UsageError};

/// Which class an installed constraint lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum CtrClass {
    #[strum(to_string = "hard")]
    Hard,
    #[strum(to_string = "soft")]
    Soft,
    #[strum(to_string = "path")]
    Path,
}

impl CtrClass {
    /// Hard and path constraints feed the caches; soft never does.
    fn narrows(self) -> bool {
        !matches!(self, CtrClass::Soft)
    }
}

/// An immutable constraint-set snapshot. See the module docs.
#[derive(Clone, Debug)]
pub struct ConstraintSet {
    pool: im::Vector<Constraint>,
    hard_idx: im::Vector<usize>,
    soft_idx: im::Vector<usize>,
    path_idx: im::Vector<usize>,
    /// Ids already pooled; a second install of the same id is a no-op.
    ctr_ids: im::HashSet<CtrId>,
    /// Numeric symbol domains (Int/Float/Bool; Bool lives in `[0, 1]`).
    range_cache: im::HashMap<SymId, NumRange>,
    /// Per shape symbol, the installed constraints that mention it.
    shape_ctr_cache: im::HashMap<SymId, im::Vector<Constraint>>,
    /// Concrete dimension vectors for shape symbols whose rank is settled.
    shape_cache: im::HashMap<SymId, DimVec>,
    /// Exact values of string symbols.
    string_cache: im::HashMap<SymId, String>,
    /// Known-unequal values of string symbols.
    non_string_cache: im::HashMap<SymId, im::HashSet<String>>,
    /// `Some(false)` once any contradiction is detected; `None` until the
    /// first install.
    valid: Option<bool>,
    ids: Arc<IdManager>,
}

impl ConstraintSet {
    /// A fresh root snapshot with its own id-manager. Every snapshot of one
    /// analysis must descend from a single root.
    #[must_use]
    pub fn root() -> Self {
        Self::with_ids(IdManager::new())
    }

    #[must_use]
    pub fn with_ids(ids: Arc<IdManager>) -> Self {
        ConstraintSet {
            pool: im::Vector::new(),
            hard_idx: im::Vector::new(),
            soft_idx: im::Vector::new(),
            path_idx: im::Vector::new(),
            ctr_ids: im::HashSet::new(),
            range_cache: im::HashMap::new(),
            shape_ctr_cache: im::HashMap::new(),
            shape_cache: im::HashMap::new(),
            string_cache: im::HashMap::new(),
            non_string_cache: im::HashMap::new(),
            valid: None,
            ids,
        }
    }

    #[must_use]
    pub fn id_manager(&self) -> &Arc<IdManager> {
        &self.ids
    }

    /// Tri-state validity: `Some(false)` = contradicted (dead path),
    /// `None` = nothing decided yet.
    #[must_use]
    pub fn valid(&self) -> Option<bool> {
        self.valid
    }

    /// Whether this path is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.valid != Some(false)
    }

    /// Number of pooled constraints.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn hard_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.hard_idx.iter().copied()
    }

    #[must_use]
    pub fn soft_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.soft_idx.iter().copied()
    }

    #[must_use]
    pub fn path_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.path_idx.iter().copied()
    }

    #[must_use]
    pub fn pooled(&self, idx: usize) -> Option<&Constraint> {
        self.pool.get(idx)
    }
}

/* Symbol minting. Pure on the snapshot: only the shared id-manager moves. */

impl ConstraintSet {
    fn mint(&self, kind: SymKind, name: &str, source: Option<CodeSource>) -> Symbol {
        Symbol {
            id: self.ids.next_sym_id(),
            kind,
            name: name.into(),
            source,
        }
    }

    #[must_use]
    pub fn gen_sym_int(&self, name: &str, source: Option<CodeSource>) -> Symbol {
        self.mint(SymKind::Int, name, source)
    }

    #[must_use]
    pub fn gen_sym_float(&self, name: &str, source: Option<CodeSource>) -> Symbol {
        self.mint(SymKind::Float, name, source)
    }

    #[must_use]
    pub fn gen_sym_bool(&self, name: &str, source: Option<CodeSource>) -> Symbol {
        self.mint(SymKind::Bool, name, source)
    }

    #[must_use]
    pub fn gen_sym_string(&self, name: &str, source: Option<CodeSource>) -> Symbol {
        self.mint(SymKind::String, name, source)
    }

    /// Mint a shape symbol with the given rank expression, returned
    /// directly as a [`ShapeExp`] since a bare shape symbol is never useful
    /// without its rank.
    ///
    /// [`ShapeExp`]: crate::ShapeExp
    #[must_use]
    pub fn gen_sym_shape(&self, name: &str, rank: NumExp, source: Option<CodeSource>) -> ShapeExp {
        ShapeExp::Symbol {
            sym: self.mint(SymKind::Shape, name, source),
            rank: Box::new(rank),
        }
    }
}

/* Constraint factories.

Each factory mints a fresh constraint id and returns the record unappended,
so the caller can compose nested structures (every node with a distinct id)
before installing the outermost one. */

impl ConstraintSet {
    fn make(&self, kind: CtrKind, source: Option<CodeSource>) -> Constraint {
        Constraint::new(self.ids.next_ctr_id(), kind, source)
    }

    #[must_use]
    pub fn gen_from_bool(&self, exp: BoolExp, source: Option<CodeSource>) -> Constraint {
        self.make(CtrKind::ExpBool(exp), source)
    }

    /// Equality (`negate = false`) or inequality (`negate = true`) between
    /// two expressions of any kind.
    ///
    /// # Errors
    /// Numeric expressions may only be equated with numeric expressions;
    /// mixing a numeric side with any other kind is a usage error. Other
    /// cross-kind pairs are representable and simply decide to false.
    pub fn gen_equality(
        &self,
        lhs: SymExp,
        rhs: SymExp,
        negate: bool,
        source: Option<CodeSource>,
    ) -> Result<Constraint, UsageError> {
        let (lk, rk) = (lhs.kind(), rhs.kind());
        if (lk == ExpKind::Num) != (rk == ExpKind::Num) {
            return Err(UsageError::MixedNumericEquality { lhs: lk, rhs: rk });
        }
        let kind = if negate {
            CtrKind::NotEq(lhs, rhs)
        } else {
            CtrKind::Eq(lhs, rhs)
        };
        Ok(self.make(kind, source))
    }

    #[must_use]
    pub fn gen_num_compare(
        &self,
        cmp: CmpKind,
        lhs: NumExp,
        rhs: NumExp,
        source: Option<CodeSource>,
    ) -> Constraint {
        let kind = match cmp {
            CmpKind::Lt => CtrKind::Lt(lhs, rhs),
            CmpKind::Le => CtrKind::Le(lhs, rhs),
        };
        self.make(kind, source)
    }

    #[must_use]
    pub fn gen_and(&self, lhs: Constraint, rhs: Constraint, source: Option<CodeSource>) -> Constraint {
        self.make(CtrKind::And(Box::new(lhs), Box::new(rhs)), source)
    }

    #[must_use]
    pub fn gen_or(&self, lhs: Constraint, rhs: Constraint, source: Option<CodeSource>) -> Constraint {
        self.make(CtrKind::Or(Box::new(lhs), Box::new(rhs)), source)
    }

    #[must_use]
    pub fn gen_not(&self, inner: Constraint, source: Option<CodeSource>) -> Constraint {
        self.make(CtrKind::Not(Box::new(inner)), source)
    }

    #[must_use]
    pub fn gen_broad(
        &self,
        lhs: ShapeExp,
        rhs: ShapeExp,
        source: Option<CodeSource>,
    ) -> Constraint {
        self.make(CtrKind::Broadcastable(lhs, rhs), source)
    }

    /// Universal quantification of `body` over an integer symbol in
    /// `[lo, hi]`. Never decided immediately; carried for the external
    /// solver.
    ///
    /// # Errors
    /// The bound symbol must be an Int symbol.
    pub fn gen_forall(
        &self,
        sym: Symbol,
        bounds: (NumExp, NumExp),
        body: Constraint,
        source: Option<CodeSource>,
    ) -> Result<Constraint, UsageError> {
        if sym.kind != SymKind::Int {
            return Err(UsageError::NonIntQuantifier(sym.kind));
        }
        Ok(self.make(
            CtrKind::Forall {
                sym,
                lo: bounds.0,
                hi: bounds.1,
                body: Box::new(body),
            },
            source,
        ))
    }

    #[must_use]
    pub fn gen_fail(&self, reason: impl Into<String>, source: Option<CodeSource>) -> Constraint {
        self.make(CtrKind::Fail(reason.into()), source)
    }

    /// Structural falsy test for interpreter heap values.
    ///
    /// Not yet implemented: the intended semantics has not been settled, so
    /// the hook conservatively has no answer for any input rather than
    /// guessing one.
    #[must_use]
    pub fn gen_falsy(&self, _exp: &SymExp) -> Option<Constraint> {
        None
    }
}

/* Installers. */

impl ConstraintSet {
    /// Install a *soft* constraint: an obligation the analyzed program must
    /// satisfy. Never narrows caches.
    #[must_use]
    pub fn require(&self, ctr: Constraint) -> Self {
        self.install(ctr, CtrClass::Soft)
    }

    /// Install a *hard* constraint: a fact the engine itself vouches for
    /// (e.g. a library shim's return-value invariant). Narrows caches.
    #[must_use]
    pub fn guarantee(&self, ctr: Constraint) -> Self {
        self.install(ctr, CtrClass::Hard)
    }

    /// Install a *path* constraint: the branch predicate of the current
    /// trace. Narrows caches like a hard constraint.
    #[must_use]
    pub fn add_if(&self, ctr: Constraint) -> Self {
        self.install(ctr, CtrClass::Path)
    }

    #[must_use]
    pub fn require_all(&self, ctrs: impl IntoIterator<Item = Constraint>) -> Self {
        ctrs.into_iter().fold(self.clone(), |set, c| set.require(c))
    }

    #[must_use]
    pub fn guarantee_all(&self, ctrs: impl IntoIterator<Item = Constraint>) -> Self {
        ctrs.into_iter().fold(self.clone(), |set, c| set.guarantee(c))
    }

    #[must_use]
    pub fn add_if_all(&self, ctrs: impl IntoIterator<Item = Constraint>) -> Self {
        ctrs.into_iter().fold(self.clone(), |set, c| set.add_if(c))
    }

    fn install(&self, ctr: Constraint, class: CtrClass) -> Self {
        if self.ctr_ids.contains(&ctr.id) {
            return self.clone();
        }
        match self.check_immediate(&ctr) {
            // Trivially true: nothing to remember.
            Decision::True => self.clone(),
            Decision::False => {
                log::warn!("{class} constraint #{} is unsatisfiable: {ctr}", ctr.id);
                let mut next = self.append(ctr.clone(), class);
                next.valid = Some(false);
                if class.narrows() {
                    next.propagate(&ctr);
                }
                next
            }
            Decision::Unknown => {
                let mut next = self.append(ctr.clone(), class);
                if next.valid.is_none() {
                    next.valid = Some(true);
                }
                if class.narrows() {
                    next.propagate(&ctr);
                }
                next
            }
        }
    }

    /// Append without deciding. The pool keeps even unsatisfiable
    /// constraints so diagnostics can point at them.
    fn append(&self, ctr: Constraint, class: CtrClass) -> Self {
        let mut next = self.clone();
        let idx = next.pool.len();
        log::debug!("pool[{idx}] <- {class}: {ctr}");
        next.ctr_ids.insert(ctr.id);
        next.pool.push_back(ctr);
        match class {
            CtrClass::Hard => next.hard_idx.push_back(idx),
            CtrClass::Soft => next.soft_idx.push_back(idx),
            CtrClass::Path => next.path_idx.push_back(idx),
        }
        next
    }
}

/* Local propagator (cache narrowing).

Sound but conservative: only single-symbol facts with a constant side are
folded into the caches; anything more complex stays pool-only, and the
decision procedure re-derives what it needs from ranges on demand. */

impl ConstraintSet {
    fn propagate(&mut self, ctr: &Constraint) {
        for sym in ctr.shape_syms() {
            self.shape_ctr_cache
                .entry(sym.id)
                .or_default()
                .push_back(ctr.clone());
        }
        self.narrow(ctr);
    }

    fn narrow(&mut self, ctr: &Constraint) {
        // Simplification may expose a constant side (e.g. a symbol pinned
        // to a point range earlier on this path).
        match &ctr.kind {
            CtrKind::And(l, r) => {
                self.narrow(l);
                self.narrow(r);
            }
            CtrKind::Le(l, r) => {
                let (l, r) = {
                    let s = Simplifier::new(self);
                    (s.num(l), s.num(r))
                };
                match (&l, l.as_const(), &r, r.as_const()) {
                    (NumExp::Symbol(sym), _, _, Some(k)) => {
                        self.meet_range(sym, NumRange::lte(k));
                    }
                    (_, Some(k), NumExp::Symbol(sym), _) => {
                        self.meet_range(sym, NumRange::gte(k));
                    }
                    _ => {}
                }
            }
            CtrKind::Lt(l, r) => {
                let (l, r) = {
                    let s = Simplifier::new(self);
                    (s.num(l), s.num(r))
                };
                match (&l, l.as_const(), &r, r.as_const()) {
                    (NumExp::Symbol(sym), _, _, Some(k)) => {
                        let bound = strict_upper(sym.kind, k);
                        self.meet_range(sym, NumRange::lte(bound));
                    }
                    (_, Some(k), NumExp::Symbol(sym), _) => {
                        let bound = strict_lower(sym.kind, k);
                        self.meet_range(sym, NumRange::gte(bound));
                    }
                    _ => {}
                }
            }
            CtrKind::Eq(l, r) => {
                let (l, r) = {
                    let s = Simplifier::new(self);
                    (s.sym_exp(l), s.sym_exp(r))
                };
                self.narrow_eq(&l, &r);
                self.narrow_eq(&r, &l);
            }
            CtrKind::NotEq(l, r) => {
                let (l, r) = {
                    let s = Simplifier::new(self);
                    (s.sym_exp(l), s.sym_exp(r))
                };
                self.narrow_noteq(&l, &r);
                self.narrow_noteq(&r, &l);
            }
            // Or / Not / Broadcastable / Forall / ExpBool / Fail carry no
            // single-symbol fact the caches can hold.
            _ => {}
        }
    }

    fn narrow_eq(&mut self, lhs: &SymExp, rhs: &SymExp) {
        match (lhs, rhs) {
            (SymExp::Num(NumExp::Symbol(sym)), SymExp::Num(r)) => {
                if let Some(c) = r.as_const() {
                    self.meet_range(sym, NumRange::from_const(c));
                }
            }
            (SymExp::Bool(BoolExp::Symbol(sym)), SymExp::Bool(BoolExp::Const(v))) => {
                self.meet_range(sym, NumRange::from_const(i64::from(*v)));
            }
            (SymExp::Str(StrExp::Symbol(sym)), SymExp::Str(StrExp::Const(value))) => {
                let banned = self
                    .non_string_cache
                    .get(&sym.id)
                    .is_some_and(|set| set.contains(value));
                let conflicting = self
                    .string_cache
                    .get(&sym.id)
                    .is_some_and(|known| known != value);
                if banned || conflicting {
                    log::warn!("string symbol {sym} cannot equal {value:?}");
                    self.valid = Some(false);
                }
                self.string_cache.insert(sym.id, value.clone());
            }
            (SymExp::Shape(ShapeExp::Symbol { sym, rank }), SymExp::Shape(shape)) => {
                let dims = {
                    let s = Simplifier::new(self);
                    match s.shape(shape) {
                        ShapeExp::Const(dims) => Some(dims),
                        _ => None,
                    }
                };
                if let Some(dims) = dims {
                    self.pin_shape(sym, rank, dims);
                }
            }
            _ => {}
        }
    }

    fn narrow_noteq(&mut self, lhs: &SymExp, rhs: &SymExp) {
        if let (SymExp::Str(StrExp::Symbol(sym)), SymExp::Str(StrExp::Const(value))) = (lhs, rhs) {
            if self
                .string_cache
                .get(&sym.id)
                .is_some_and(|known| known == value)
            {
                log::warn!("string symbol {sym} is known to equal {value:?}");
                self.valid = Some(false);
            }
            self.non_string_cache
                .entry(sym.id)
                .or_default()
                .insert(value.clone());
        }
    }

    fn pin_shape(&mut self, sym: &Symbol, rank: &NumExp, dims: DimVec) {
        // Consistency against the rank expression and any earlier pin.
        let rank_const = self
            .cached_range(rank)
            .and_then(|r| r.as_const())
            .and_then(Scalar::floor_int);
        if let Some(r) = rank_const {
            if r != dims.len() as i64 {
                log::warn!("shape symbol {sym} has rank {r} but was pinned to {} dims", dims.len());
                self.valid = Some(false);
                return;
            }
        }
        if let Some(existing) = self.shape_cache.get(&sym.id) {
            if existing.len() != dims.len() {
                log::warn!("shape symbol {sym} pinned to two different ranks");
                self.valid = Some(false);
                return;
            }
        }
        self.shape_cache.insert(sym.id, dims);
    }

    /// Intersect the cached range of `sym` with `narrow`; integer symbols
    /// keep integer endpoints. An empty meet kills the snapshot.
    fn meet_range(&mut self, sym: &Symbol, narrow: NumRange) {
        let narrow = if matches!(sym.kind, SymKind::Int | SymKind::Bool) {
            narrow.int_tighten()
        } else {
            narrow
        };
        let current = self
            .range_cache
            .get(&sym.id)
            .copied()
            .unwrap_or_else(|| default_range(sym.kind));
        let met = current.intersect(&narrow);
        if !met.valid() {
            log::warn!("range of {sym} became empty: {current} ∩ {narrow}");
            self.valid = Some(false);
        }
        self.range_cache.insert(sym.id, met);
    }
}

/// The uncached domain of a numeric symbol. Bool symbols live in `[0, 1]`.
pub(crate) fn default_range(kind: SymKind) -> NumRange {
    match kind {
        SymKind::Bool => NumRange::new(
            crate::Bound::Fin(Scalar::Int(0)),
            crate::Bound::Fin(Scalar::Int(1)),
        ),
        _ => NumRange::top(),
    }
}

/// Largest admissible value strictly below `k` for a symbol of `kind`.
/// Integer symbols step by one; float symbols fall back to the closed
/// bound, which is a sound over-approximation.
fn strict_upper(kind: SymKind, k: Scalar) -> Scalar {
    if kind == SymKind::Float {
        return k;
    }
    match k {
        Scalar::Int(i) => Scalar::Int(i.saturating_sub(1)),
        Scalar::Float(f) => {
            let floor = f.floor();
            if floor == f {
                Scalar::Float(floor - 1.0)
            } else {
                Scalar::Float(floor)
            }
        }
    }
}

/// Smallest admissible value strictly above `k`; dual of [`strict_upper`].
fn strict_lower(kind: SymKind, k: Scalar) -> Scalar {
    if kind == SymKind::Float {
        return k;
    }
    match k {
        Scalar::Int(i) => Scalar::Int(i.saturating_add(1)),
        Scalar::Float(f) => {
            let ceil = f.ceil();
            if ceil == f {
                Scalar::Float(ceil + 1.0)
            } else {
                Scalar::Float(ceil)
            }
        }
    }
}

/* Constrained minters and casts: the generators with side effects. */

impl ConstraintSet {
    /// Mint an Int symbol guaranteed to be `>= lower`.
    #[must_use]
    pub fn gen_sym_int_gte(
        &self,
        name: &str,
        lower: i64,
        source: Option<CodeSource>,
    ) -> (NumExp, Self) {
        let sym = self.gen_sym_int(name, source.clone());
        let exp = NumExp::sym(sym);
        let ctr = self.gen_num_compare(CmpKind::Le, NumExp::Int(lower), exp.clone(), source);
        (exp, self.guarantee(ctr))
    }

    /// Mint a Float symbol guaranteed to be `>= lower`.
    #[must_use]
    pub fn gen_sym_float_gte(
        &self,
        name: &str,
        lower: f64,
        source: Option<CodeSource>,
    ) -> (NumExp, Self) {
        let sym = self.gen_sym_float(name, source.clone());
        let exp = NumExp::sym(sym);
        let ctr = self.gen_num_compare(CmpKind::Le, NumExp::Float(lower), exp.clone(), source);
        (exp, self.guarantee(ctr))
    }

    /// Build a concrete shape of the given rank.
    ///
    /// With `dims` present the numbers are lifted to constants and no
    /// symbol is minted. Without `dims`, one non-negative Int symbol is
    /// minted and guaranteed per dimension.
    ///
    /// # Errors
    /// Negative rank is a usage error.
    pub fn gen_shaped(
        &self,
        name: &str,
        rank: i64,
        dims: Option<&[i64]>,
        source: Option<CodeSource>,
    ) -> Result<(ShapeExp, Self), UsageError> {
        if rank < 0 {
            return Err(UsageError::NegativeRank(rank));
        }
        if let Some(dims) = dims {
            return Ok((ShapeExp::from_ints(dims), self.clone()));
        }
        let mut set = self.clone();
        let mut out = DimVec::new();
        for axis in 0..rank {
            let (dim, next) =
                set.gen_sym_int_gte(&format!("{name}_{axis}"), 0, source.clone());
            out.push(dim);
            set = next;
        }
        Ok((ShapeExp::Const(out), set))
    }

    /// Embed a boolean as the integer 0 or 1.
    ///
    /// Folds to a constant when the boolean is immediately decidable;
    /// otherwise mints a fresh Int symbol `n` and guarantees
    /// `(e && n == 1) || (!e && n == 0)`.
    #[must_use]
    pub fn cast_bool_to_int(&self, exp: &BoolExp, source: Option<CodeSource>) -> (NumExp, Self) {
        match self.decide_bool(exp) {
            Decision::True => (NumExp::Int(1), self.clone()),
            Decision::False => (NumExp::Int(0), self.clone()),
            Decision::Unknown => {
                let n = NumExp::sym(self.gen_sym_int("bool2int", source.clone()));
                let when_true = {
                    let holds = self.gen_from_bool(exp.clone(), source.clone());
                    let one = self.make(
                        CtrKind::Eq(SymExp::Num(n.clone()), SymExp::Num(NumExp::Int(1))),
                        source.clone(),
                    );
                    self.gen_and(holds, one, source.clone())
                };
                let when_false = {
                    let fails = self.gen_not(
                        self.gen_from_bool(exp.clone(), source.clone()),
                        source.clone(),
                    );
                    let zero = self.make(
                        CtrKind::Eq(SymExp::Num(n.clone()), SymExp::Num(NumExp::Int(0))),
                        source.clone(),
                    );
                    self.gen_and(fails, zero, source.clone())
                };
                let bridge = self.gen_or(when_true, when_false, source);
                (n, self.guarantee(bridge))
            }
        }
    }

    /// Truthiness of a number: zero is false, everything else true.
    ///
    /// Decides by range when possible; otherwise mints a Bool symbol `b`
    /// and guarantees `(b && e != 0) || (!b && e == 0)`.
    #[must_use]
    pub fn cast_num_to_bool(&self, exp: &NumExp, source: Option<CodeSource>) -> (BoolExp, Self) {
        if let Some(range) = self.cached_range(exp) {
            if !range.contains(0) {
                return (BoolExp::TRUE, self.clone());
            }
            if range.as_const().is_some_and(Scalar::is_zero) {
                return (BoolExp::FALSE, self.clone());
            }
        }
        let b = BoolExp::Symbol(self.gen_sym_bool("num2bool", source.clone()));
        let zero = SymExp::Num(NumExp::Int(0));
        let when_true = {
            let holds = self.gen_from_bool(b.clone(), source.clone());
            let nonzero = self.make(
                CtrKind::NotEq(SymExp::Num(exp.clone()), zero.clone()),
                source.clone(),
            );
            self.gen_and(holds, nonzero, source.clone())
        };
        let when_false = {
            let fails = self.gen_not(
                self.gen_from_bool(b.clone(), source.clone()),
                source.clone(),
            );
            let is_zero = self.make(
                CtrKind::Eq(SymExp::Num(exp.clone()), zero),
                source.clone(),
            );
            self.gen_and(fails, is_zero, source.clone())
        };
        let bridge = self.gen_or(when_true, when_false, source);
        (b, self.guarantee(bridge))
    }
}

/* Pure queries. */

impl ConstraintSet {
    /// Evaluate the interval of a numeric expression against the range
    /// cache. Uncached symbols default to their kind's full domain; `None`
    /// means some sub-expression could not be evaluated or the composite
    /// interval came out invalid.
    #[must_use]
    pub fn cached_range(&self, exp: &NumExp) -> Option<NumRange> {
        let range = self.eval_range(exp)?;
        range.valid().then_some(range)
    }

    fn eval_range(&self, exp: &NumExp) -> Option<NumRange> {
        match exp {
            NumExp::Int(i) => Some(NumRange::from_const(*i)),
            NumExp::Float(f) => Some(NumRange::from_const(*f)),
            NumExp::Symbol(sym) => match sym.kind {
                SymKind::Int | SymKind::Float | SymKind::Bool => Some(
                    self.range_cache
                        .get(&sym.id)
                        .copied()
                        .unwrap_or_else(|| default_range(sym.kind)),
                ),
                SymKind::String | SymKind::Shape => None,
            },
            NumExp::Unary { op, operand } => {
                let r = self.eval_range(operand)?;
                Some(match op {
                    crate::NumUop::Neg => r.neg(),
                    crate::NumUop::Ceil => r.ceil(),
                    crate::NumUop::Floor => r.floor(),
                    crate::NumUop::Abs => r.abs(),
                })
            }
            NumExp::Binary { op, lhs, rhs } => {
                let a = self.eval_range(lhs)?;
                let b = self.eval_range(rhs)?;
                Some(match op {
                    crate::NumBop::Add => a.add(&b),
                    crate::NumBop::Sub => a.sub(&b),
                    crate::NumBop::Mul => a.mul(&b),
                    crate::NumBop::TrueDiv => a.truediv(&b),
                    crate::NumBop::FloorDiv => a.floordiv(&b),
                    crate::NumBop::Mod => a.modulo(&b),
                })
            }
            NumExp::Max(items) => self.eval_fold(items, NumRange::max_range),
            NumExp::Min(items) => self.eval_fold(items, NumRange::min_range),
            NumExp::Dim { shape, index } => {
                let dims = self.cached_shape(shape)?;
                let idx = self.eval_range(index)?.as_const()?.floor_int()?;
                let dim = dims.get(usize::try_from(idx).ok()?)?;
                self.eval_range(dim)
            }
            NumExp::Numel(shape) => {
                let dims = self.cached_shape(shape)?;
                let mut acc = NumRange::from_const(1);
                for dim in &dims {
                    acc = acc.mul(&self.eval_range(dim)?);
                }
                Some(acc)
            }
        }
    }

    fn eval_fold(
        &self,
        items: &[NumExp],
        combine: impl Fn(&NumRange, &NumRange) -> NumRange,
    ) -> Option<NumRange> {
        let mut ranges = items.iter().map(|e| self.eval_range(e));
        let mut acc = ranges.next()??;
        for r in ranges {
            acc = combine(&acc, &r?);
        }
        Some(acc)
    }

    /// Resolve a shape expression to its dimension vector, when the caches
    /// allow. `slice`/`concat`/`broadcast` over non-constant operands are
    /// left to the simplifier and answer `None` here.
    #[must_use]
    pub fn cached_shape(&self, exp: &ShapeExp) -> Option<DimVec> {
        match exp {
            ShapeExp::Const(dims) => Some(dims.clone()),
            ShapeExp::Symbol { sym, .. } => self.shape_cache.get(&sym.id).cloned(),
            ShapeExp::Set { base, axis, dim } => {
                let mut dims = self.cached_shape(base)?;
                let axis = self.cached_range(axis)?.as_const()?.floor_int()?;
                let slot = dims.get_mut(usize::try_from(axis).ok()?)?;
                *slot = (**dim).clone();
                Some(dims)
            }
            ShapeExp::Slice { .. } | ShapeExp::Concat { .. } | ShapeExp::Broadcast { .. } => None,
        }
    }

    /// Resolve a string expression to its exact value, when known.
    #[must_use]
    pub fn cached_string(&self, exp: &StrExp) -> Option<String> {
        match exp {
            StrExp::Const(s) => Some(s.clone()),
            StrExp::Symbol(sym) => self.string_cache.get(&sym.id).cloned(),
            StrExp::Concat { left, right } => {
                let mut l = self.cached_string(left)?;
                l.push_str(&self.cached_string(right)?);
                Some(l)
            }
            StrExp::Slice { base, start, end } => {
                let base = self.cached_string(base)?;
                let len = base.chars().count() as i64;
                let lo = match start {
                    Some(e) => abs_index(self.cached_range(e)?.as_const()?.floor_int()?, len),
                    None => 0,
                };
                let hi = match end {
                    Some(e) => abs_index(self.cached_range(e)?.as_const()?.floor_int()?, len),
                    None => len,
                };
                if lo >= hi {
                    return Some(String::new());
                }
                Some(
                    base.chars()
                        .skip(lo as usize)
                        .take((hi - lo) as usize)
                        .collect(),
                )
            }
        }
    }

    /// Whether `exp` is known to differ from the literal `value`.
    #[must_use]
    pub fn check_non_string(&self, exp: &StrExp, value: &str) -> bool {
        if let Some(known) = self.cached_string(exp) {
            return known != value;
        }
        match exp {
            StrExp::Symbol(sym) => self
                .non_string_cache
                .get(&sym.id)
                .is_some_and(|set| set.contains(value)),
            _ => false,
        }
    }

    /// Raw range-cache read, without expression evaluation.
    #[must_use]
    pub fn symbol_range(&self, sym: &Symbol) -> Option<NumRange> {
        self.range_cache.get(&sym.id).copied()
    }

    /// Installed constraints mentioning the given shape symbol.
    #[must_use]
    pub fn shape_constraints(&self, sym: &Symbol) -> Vec<Constraint> {
        self.shape_ctr_cache
            .get(&sym.id)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Simplified snapshots of the whole pool, in pool order.
    #[must_use]
    pub fn constraints(&self) -> Vec<Constraint> {
        let s = Simplifier::new(self);
        self.pool.iter().map(|c| s.ctr(c)).collect()
    }
}

/// Python-style absolute index: negative values count from the end; the
/// result is clamped into `[0, len]`.
fn abs_index(index: i64, len: i64) -> i64 {
    let idx = if index < 0 { index + len } else { index };
    idx.clamp(0, len)
}

/* External solver bundle. */

/// The serialized form consumed by the external solver: the simplified
/// pool plus the three class index lists. The solver checks
/// `hard ∧ path ⇒ soft_i` for each soft constraint and reports the
/// failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintBundle {
    pub ctr_pool: Vec<Constraint>,
    pub hard_ctr: Vec<usize>,
    pub soft_ctr: Vec<usize>,
    pub path_ctr: Vec<usize>,
}

impl ConstraintSet {
    #[must_use]
    pub fn bundle(&self) -> ConstraintBundle {
        ConstraintBundle {
            ctr_pool: self.constraints(),
            hard_ctr: self.hard_idx.iter().copied().collect(),
            soft_ctr: self.soft_idx.iter().copied().collect(),
            path_ctr: self.path_idx.iter().copied().collect(),
        }
    }

    /// The bundle as a UTF-8 JSON document.
    ///
    /// # Errors
    /// Propagates serializer failures; the bundle itself is always
    /// serializable.
    pub fn constraint_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.bundle())
    }
}

/* Pretty listing. */

const ANSI_MAGENTA: &str = "\u{1b}[35m";
const ANSI_YELLOW: &str = "\u{1b}[33m";
const ANSI_RESET: &str = "\u{1b}[0m";

impl std::fmt::Display for ConstraintSet {
    /// Newline-separated listing of the simplified pool, hard constraints
    /// in magenta and path constraints in yellow.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let simplified = self.constraints();
        for (idx, ctr) in simplified.iter().enumerate() {
            let (color, class) = if self.hard_idx.contains(&idx) {
                (ANSI_MAGENTA, CtrClass::Hard)
            } else if self.path_idx.contains(&idx) {
                (ANSI_YELLOW, CtrClass::Path)
            } else {
                ("", CtrClass::Soft)
            };
            let reset = if color.is_empty() { "" } else { ANSI_RESET };
            writeln!(f, "{color}#{idx} [{class}] {ctr}{reset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bound;
    use rstest::{fixture, rstest};

    #[fixture]
    fn root() -> ConstraintSet {
        ConstraintSet::root()
    }

    fn int_range(lo: i64, hi: i64) -> NumRange {
        NumRange::new(Bound::Fin(Scalar::Int(lo)), Bound::Fin(Scalar::Int(hi)))
    }

    #[rstest]
    fn test_pool_and_classes(root: ConstraintSet) {
        let x = NumExp::sym(root.gen_sym_int("x", None));
        let c1 = root.gen_num_compare(CmpKind::Le, NumExp::Int(0), x.clone(), None);
        let c2 = root.gen_num_compare(CmpKind::Lt, x.clone(), NumExp::Int(10), None);
        let c3 = root.gen_num_compare(CmpKind::Lt, NumExp::Int(3), x, None);
        let set = root.guarantee(c1).require(c2).add_if(c3);
        assert_eq!(set.count(), 3);
        assert_eq!(set.hard_indices().collect::<Vec<_>>(), vec![0]);
        assert_eq!(set.soft_indices().collect::<Vec<_>>(), vec![1]);
        assert_eq!(set.path_indices().collect::<Vec<_>>(), vec![2]);
        // all class indices stay inside the pool
        for i in set
            .hard_indices()
            .chain(set.soft_indices())
            .chain(set.path_indices())
        {
            assert!(i < set.count());
        }
    }

    #[rstest]
    fn test_install_is_idempotent_by_id(root: ConstraintSet) {
        let x = NumExp::sym(root.gen_sym_int("x", None));
        let c = root.gen_num_compare(CmpKind::Le, NumExp::Int(0), x, None);
        let once = root.guarantee(c.clone());
        let twice = once.guarantee(c);
        assert_eq!(once.count(), twice.count());
        assert_eq!(
            once.hard_indices().collect::<Vec<_>>(),
            twice.hard_indices().collect::<Vec<_>>()
        );
    }

    #[rstest]
    fn test_trivially_true_is_dropped(root: ConstraintSet) {
        let c = root.gen_num_compare(CmpKind::Lt, NumExp::Int(1), NumExp::Int(2), None);
        let set = root.require(c);
        assert_eq!(set.count(), 0);
    }

    #[rstest]
    fn test_trivially_false_invalidates_but_pools(root: ConstraintSet) {
        let eq = root
            .gen_equality(
                SymExp::Num(NumExp::Int(1)),
                SymExp::Num(NumExp::Int(2)),
                false,
                None,
            )
            .unwrap();
        let set = root.guarantee(eq);
        assert_eq!(set.valid(), Some(false));
        assert_eq!(set.count(), 1);
        assert!(matches!(set.pooled(0).unwrap().kind, CtrKind::Eq(..)));
    }

    #[rstest]
    fn test_soft_does_not_narrow(root: ConstraintSet) {
        let (x, set) = root.gen_sym_int_gte("x", 0, None);
        let eq = set
            .gen_equality(
                SymExp::Num(x.clone()),
                SymExp::Num(NumExp::Int(5)),
                false,
                None,
            )
            .unwrap();
        let set = set.require(eq);
        assert_eq!(set.valid(), Some(true));
        assert_eq!(set.cached_range(&x).unwrap(), NumRange::gte(0));
    }

    #[rstest]
    fn test_guarantee_narrows_to_point(root: ConstraintSet) {
        let (x, set) = root.gen_sym_int_gte("x", 0, None);
        let eq = set
            .gen_equality(
                SymExp::Num(x.clone()),
                SymExp::Num(NumExp::Int(5)),
                false,
                None,
            )
            .unwrap();
        let set = set.guarantee(eq);
        assert_eq!(set.cached_range(&x).unwrap(), int_range(5, 5));
    }

    #[rstest]
    fn test_lt_narrowing_steps_integers(root: ConstraintSet) {
        let x = root.gen_sym_int("x", None);
        let c = root.gen_num_compare(
            CmpKind::Lt,
            NumExp::sym(x.clone()),
            NumExp::Int(10),
            None,
        );
        let set = root.add_if(c);
        assert_eq!(set.symbol_range(&x).unwrap(), NumRange::lte(9).int_tighten());
    }

    #[rstest]
    fn test_conflicting_guarantees_kill_the_path(root: ConstraintSet) {
        let (x, set) = root.gen_sym_int_gte("x", 10, None);
        let c = set.gen_num_compare(CmpKind::Le, x, NumExp::Int(3), None);
        let set = set.guarantee(c);
        assert_eq!(set.valid(), Some(false));
    }

    #[rstest]
    fn test_string_caches(root: ConstraintSet) {
        let s = root.gen_sym_string("mode", None);
        let exp = StrExp::Symbol(s.clone());
        let ne = root
            .gen_equality(
                SymExp::Str(exp.clone()),
                SymExp::Str(StrExp::lit("bilinear")),
                true,
                None,
            )
            .unwrap();
        let set = root.guarantee(ne);
        assert!(set.check_non_string(&exp, "bilinear"));
        assert!(!set.check_non_string(&exp, "nearest"));

        let eq = set
            .gen_equality(
                SymExp::Str(exp.clone()),
                SymExp::Str(StrExp::lit("bilinear")),
                false,
                None,
            )
            .unwrap();
        let dead = set.guarantee(eq);
        assert_eq!(dead.valid(), Some(false));
    }

    #[rstest]
    fn test_shape_pinning_and_rank_conflict(root: ConstraintSet) {
        let shape = root.gen_sym_shape("s", NumExp::Int(2), None);
        let eq = root
            .gen_equality(
                SymExp::Shape(shape.clone()),
                SymExp::Shape(ShapeExp::from_ints(&[3, 4])),
                false,
                None,
            )
            .unwrap();
        let set = root.guarantee(eq);
        assert_eq!(
            set.cached_shape(&shape).unwrap().to_vec(),
            vec![NumExp::Int(3), NumExp::Int(4)]
        );

        // rank expression says 2, pinning 3 dims is a contradiction
        let bad = set
            .gen_equality(
                SymExp::Shape(shape),
                SymExp::Shape(ShapeExp::from_ints(&[1, 2, 3])),
                false,
                None,
            )
            .unwrap();
        let dead = set.guarantee(bad);
        assert_eq!(dead.valid(), Some(false));
    }

    #[rstest]
    fn test_gen_shaped(root: ConstraintSet) {
        let (shape, set) = root.gen_shaped("t", 3, None, None).unwrap();
        let ShapeExp::Const(dims) = &shape else {
            panic!("expected a concrete shape")
        };
        assert_eq!(dims.len(), 3);
        for dim in dims {
            assert_eq!(set.cached_range(dim).unwrap(), NumRange::gte(0));
        }
        assert_eq!(set.count(), 3);

        assert!(root.gen_shaped("bad", -1, None, None).is_err());

        let (given, unchanged) = root.gen_shaped("g", 2, Some(&[7, 9]), None).unwrap();
        assert_eq!(given, ShapeExp::from_ints(&[7, 9]));
        assert_eq!(unchanged.count(), 0);
    }

    #[rstest]
    fn test_cast_bool_to_int_folds_constants(root: ConstraintSet) {
        let (n, set) = root.cast_bool_to_int(&BoolExp::TRUE, None);
        assert_eq!(set.cached_range(&n).unwrap(), int_range(1, 1));
        let (z, _) = root.cast_bool_to_int(&BoolExp::FALSE, None);
        assert_eq!(z, NumExp::Int(0));
    }

    #[rstest]
    fn test_cast_bool_to_int_symbolic(root: ConstraintSet) {
        let b = BoolExp::Symbol(root.gen_sym_bool("b", None));
        let (n, set) = root.cast_bool_to_int(&b, None);
        assert!(matches!(n, NumExp::Symbol(_)));
        // the bridging disjunction is pooled as a hard constraint
        assert_eq!(set.count(), 1);
        assert_eq!(set.hard_indices().count(), 1);
    }

    #[rstest]
    fn test_cast_num_to_bool_by_range(root: ConstraintSet) {
        let (x, set) = root.gen_sym_int_gte("x", 3, None);
        let (b, _) = set.cast_num_to_bool(&x, None);
        assert_eq!(b, BoolExp::TRUE);
        let (z, _) = set.cast_num_to_bool(&NumExp::Int(0), None);
        assert_eq!(z, BoolExp::FALSE);
    }

    #[rstest]
    fn test_cached_string_slice(root: ConstraintSet) {
        let e = StrExp::Slice {
            base: Box::new(StrExp::lit("bilinear")),
            start: Some(Box::new(NumExp::Int(-4))),
            end: None,
        };
        assert_eq!(root.cached_string(&e).unwrap(), "near");
    }

    #[rstest]
    fn test_numel_over_cached_shape(root: ConstraintSet) {
        let (shape, set) = root.gen_shaped("t", 2, Some(&[4, 5]), None).unwrap();
        let n = NumExp::numel(shape);
        assert_eq!(set.cached_range(&n).unwrap(), int_range(20, 20));
    }

    #[rstest]
    fn test_json_bundle_roundtrip(root: ConstraintSet) {
        let (x, set) = root.gen_sym_int_gte("x", 0, None);
        let soft = set.gen_num_compare(CmpKind::Lt, x.clone(), NumExp::Int(100), None);
        let path = set.gen_num_compare(CmpKind::Le, NumExp::Int(1), x, None);
        let set = set.require(soft).add_if(path);

        let text = set.constraint_json().unwrap();
        let decoded: ConstraintBundle = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.ctr_pool.len(), set.count());
        assert_eq!(decoded.hard_ctr, vec![0]);
        assert_eq!(decoded.soft_ctr, vec![1]);
        assert_eq!(decoded.path_ctr, vec![2]);

        // the wire keys are fixed
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        for key in ["ctrPool", "hardCtr", "softCtr", "pathCtr"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }

    #[rstest]
    fn test_display_listing(root: ConstraintSet) {
        let x = root.gen_sym_int("batch", None);
        let eq = root
            .gen_equality(
                SymExp::Num(NumExp::sym(x)),
                SymExp::Num(NumExp::Int(32)),
                false,
                None,
            )
            .unwrap();
        let set = root.require(eq);
        let listing = set.to_string();
        assert!(listing.contains("batch"));
        assert!(listing.contains("32"));
        assert!(listing.contains("[soft]"));
    }

    #[rstest]
    fn test_fork_shares_ids(root: ConstraintSet) {
        let x = NumExp::sym(root.gen_sym_int("x", None));
        let cond = root.gen_num_compare(CmpKind::Lt, x.clone(), NumExp::Int(0), None);
        let neg = root.gen_not(cond.clone(), None);
        let then_branch = root.add_if(cond);
        let else_branch = root.add_if(neg);
        // both descend from the same root: fresh symbols never collide
        let a = then_branch.gen_sym_int("a", None);
        let b = else_branch.gen_sym_int("b", None);
        assert_ne!(a.id, b.id);
        // and the parent snapshot is untouched
        assert_eq!(root.count(), 0);
    }

    #[rstest]
    fn test_gen_falsy_is_unanswered(root: ConstraintSet) {
        assert!(root.gen_falsy(&SymExp::Num(NumExp::Int(0))).is_none());
    }

    /// Every guarantee can only shrink a cached range, never widen it.
    #[rstest]
    fn test_cache_narrowing_is_monotone(root: ConstraintSet) {
        let x = root.gen_sym_int("x", None);
        let lower = root.gen_num_compare(CmpKind::Le, NumExp::Int(0), NumExp::sym(x.clone()), None);
        let s1 = root.guarantee(lower);
        let before = s1.symbol_range(&x).unwrap();

        let upper = s1.gen_num_compare(CmpKind::Le, NumExp::sym(x.clone()), NumExp::Int(7), None);
        let s2 = s1.guarantee(upper);
        let after = s2.symbol_range(&x).unwrap();
        assert!(before.subsumes(&after));
        assert_eq!(after, int_range(0, 7));
    }
}
