// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Symbolic expression trees.

One sum type per result kind — [`NumExp`], [`BoolExp`], [`ShapeExp`],
[`StrExp`] — plus the cross-kind wrapper [`SymExp`] used where an operation
accepts any kind (equality, JSON export).

Constructors are total and perform no normalization; the simplifier is a
separate, on-demand pass. Structural equality (`==`, derived) compares tags
and recurses, with symbols comparing by id. It is a deliberate
under-approximation of semantic equality: it may answer "not equal" for
semantically equal trees, and the decision procedure depends on exactly that
one-sidedness.
*/

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{ExpKind, FastHashMap, SymId, SymKind, Symbol};

/// Dimension vectors; ranks beyond 4 are rare enough to spill.
pub type DimVec = SmallVec<[NumExp; 4]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum NumUop {
    #[strum(to_string = "-")]
    Neg,
    #[strum(to_string = "ceil")]
    Ceil,
    #[strum(to_string = "floor")]
    Floor,
    #[strum(to_string = "abs")]
    Abs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
pub enum NumBop {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    TrueDiv,
    #[strum(to_string = "//")]
    FloorDiv,
    #[strum(to_string = "%")]
    Mod,
}

/// A numeric expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NumExp {
    Int(i64),
    Float(f64),
    Symbol(Symbol),
    Unary {
        op: NumUop,
        operand: Box<NumExp>,
    },
    Binary {
        op: NumBop,
        lhs: Box<NumExp>,
        rhs: Box<NumExp>,
    },
    /// Maximum over a non-empty sequence.
    Max(Vec<NumExp>),
    /// Minimum over a non-empty sequence.
    Min(Vec<NumExp>),
    /// The dimension of `shape` at `index`.
    Dim {
        shape: Box<ShapeExp>,
        index: Box<NumExp>,
    },
    /// The element count of `shape`: the product of its dimensions.
    Numel(Box<ShapeExp>),
}

impl NumExp {
    #[must_use]
    pub fn sym(sym: Symbol) -> Self {
        NumExp::Symbol(sym)
    }

    #[must_use]
    pub fn unary(op: NumUop, operand: NumExp) -> Self {
        NumExp::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn binary(op: NumBop, lhs: NumExp, rhs: NumExp) -> Self {
        NumExp::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn add(lhs: NumExp, rhs: NumExp) -> Self {
        Self::binary(NumBop::Add, lhs, rhs)
    }

    #[must_use]
    pub fn mul(lhs: NumExp, rhs: NumExp) -> Self {
        Self::binary(NumBop::Mul, lhs, rhs)
    }

    #[must_use]
    pub fn neg(operand: NumExp) -> Self {
        Self::unary(NumUop::Neg, operand)
    }

    #[must_use]
    pub fn dim(shape: ShapeExp, index: NumExp) -> Self {
        NumExp::Dim {
            shape: Box::new(shape),
            index: Box::new(index),
        }
    }

    #[must_use]
    pub fn numel(shape: ShapeExp) -> Self {
        NumExp::Numel(Box::new(shape))
    }

    /// The constant value, when this node is a literal.
    #[must_use]
    pub fn as_const(&self) -> Option<crate::Scalar> {
        match *self {
            NumExp::Int(i) => Some(crate::Scalar::Int(i)),
            NumExp::Float(f) => Some(crate::Scalar::Float(f)),
            _ => None,
        }
    }
}

impl From<i64> for NumExp {
    fn from(v: i64) -> Self {
        NumExp::Int(v)
    }
}

impl From<f64> for NumExp {
    fn from(v: f64) -> Self {
        NumExp::Float(v)
    }
}

/// A boolean expression. Logical connectives live at the constraint layer;
/// what remains here are the leaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BoolExp {
    Const(bool),
    Symbol(Symbol),
}

impl BoolExp {
    pub const TRUE: BoolExp = BoolExp::Const(true);
    pub const FALSE: BoolExp = BoolExp::Const(false);
}

/// A tensor shape: an ordered vector of dimension expressions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShapeExp {
    /// A concrete rank with per-dimension expressions.
    Const(DimVec),
    /// A shape symbol together with its rank expression.
    Symbol { sym: Symbol, rank: Box<NumExp> },
    /// `base` with the dimension at `axis` replaced by `dim`.
    Set {
        base: Box<ShapeExp>,
        axis: Box<NumExp>,
        dim: Box<NumExp>,
    },
    /// The sub-shape `base[start..end]`; missing bounds default to the ends.
    Slice {
        base: Box<ShapeExp>,
        start: Option<Box<NumExp>>,
        end: Option<Box<NumExp>>,
    },
    Concat {
        left: Box<ShapeExp>,
        right: Box<ShapeExp>,
    },
    /// The NumPy-style broadcast of two shapes.
    Broadcast {
        left: Box<ShapeExp>,
        right: Box<ShapeExp>,
    },
}

impl ShapeExp {
    #[must_use]
    pub fn from_dims(dims: impl IntoIterator<Item = NumExp>) -> Self {
        ShapeExp::Const(dims.into_iter().collect())
    }

    #[must_use]
    pub fn from_ints(dims: &[i64]) -> Self {
        ShapeExp::Const(dims.iter().map(|&d| NumExp::Int(d)).collect())
    }

    #[must_use]
    pub fn set(base: ShapeExp, axis: NumExp, dim: NumExp) -> Self {
        ShapeExp::Set {
            base: Box::new(base),
            axis: Box::new(axis),
            dim: Box::new(dim),
        }
    }

    #[must_use]
    pub fn slice(base: ShapeExp, start: Option<NumExp>, end: Option<NumExp>) -> Self {
        ShapeExp::Slice {
            base: Box::new(base),
            start: start.map(Box::new),
            end: end.map(Box::new),
        }
    }

    #[must_use]
    pub fn concat(left: ShapeExp, right: ShapeExp) -> Self {
        ShapeExp::Concat {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn broadcast(left: ShapeExp, right: ShapeExp) -> Self {
        ShapeExp::Broadcast {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// A string expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StrExp {
    Const(String),
    Symbol(Symbol),
    Concat {
        left: Box<StrExp>,
        right: Box<StrExp>,
    },
    /// `base[start..end]` with Python index semantics (negative indices
    /// count from the end).
    Slice {
        base: Box<StrExp>,
        start: Option<Box<NumExp>>,
        end: Option<Box<NumExp>>,
    },
}

impl StrExp {
    #[must_use]
    pub fn lit(s: impl Into<String>) -> Self {
        StrExp::Const(s.into())
    }

    #[must_use]
    pub fn concat(left: StrExp, right: StrExp) -> Self {
        StrExp::Concat {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Cross-kind expression wrapper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SymExp {
    Num(NumExp),
    Bool(BoolExp),
    Shape(ShapeExp),
    Str(StrExp),
}

impl SymExp {
    #[must_use]
    pub fn kind(&self) -> ExpKind {
        match self {
            SymExp::Num(_) => ExpKind::Num,
            SymExp::Bool(_) => ExpKind::Bool,
            SymExp::Shape(_) => ExpKind::Shape,
            SymExp::Str(_) => ExpKind::Str,
        }
    }

    #[must_use]
    pub fn as_num(&self) -> Option<&NumExp> {
        match self {
            SymExp::Num(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NumExp> for SymExp {
    fn from(e: NumExp) -> Self {
        SymExp::Num(e)
    }
}

impl From<BoolExp> for SymExp {
    fn from(e: BoolExp) -> Self {
        SymExp::Bool(e)
    }
}

impl From<ShapeExp> for SymExp {
    fn from(e: ShapeExp) -> Self {
        SymExp::Shape(e)
    }
}

impl From<StrExp> for SymExp {
    fn from(e: StrExp) -> Self {
        SymExp::Str(e)
    }
}

/* Free-symbol traversal.

The walk is shared by `single_var` and by the propagator's shape-constraint
indexing; it collects ids with their kinds into a transient map. */

pub(crate) trait CollectSyms {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>);

    /// All distinct symbols mentioned, in no particular order.
    fn free_syms(&self) -> Vec<Symbol> {
        let mut map = FastHashMap::default();
        self.collect_syms(&mut map);
        map.into_values().map(|(_, s)| s).collect()
    }
}

fn visit_sym(sym: &Symbol, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
    out.entry(sym.id).or_insert_with(|| (sym.kind, sym.clone()));
}

impl CollectSyms for NumExp {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match self {
            NumExp::Int(_) | NumExp::Float(_) => {}
            NumExp::Symbol(sym) => visit_sym(sym, out),
            NumExp::Unary { operand, .. } => operand.collect_syms(out),
            NumExp::Binary { lhs, rhs, .. } => {
                lhs.collect_syms(out);
                rhs.collect_syms(out);
            }
            NumExp::Max(items) | NumExp::Min(items) => {
                for item in items {
                    item.collect_syms(out);
                }
            }
            NumExp::Dim { shape, index } => {
                shape.collect_syms(out);
                index.collect_syms(out);
            }
            NumExp::Numel(shape) => shape.collect_syms(out),
        }
    }
}

impl CollectSyms for BoolExp {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match self {
            BoolExp::Const(_) => {}
            BoolExp::Symbol(sym) => visit_sym(sym, out),
        }
    }
}

impl CollectSyms for ShapeExp {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match self {
            ShapeExp::Const(dims) => {
                for d in dims {
                    d.collect_syms(out);
                }
            }
            ShapeExp::Symbol { sym, rank } => {
                visit_sym(sym, out);
                rank.collect_syms(out);
            }
            ShapeExp::Set { base, axis, dim } => {
                base.collect_syms(out);
                axis.collect_syms(out);
                dim.collect_syms(out);
            }
            ShapeExp::Slice { base, start, end } => {
                base.collect_syms(out);
                if let Some(s) = start {
                    s.collect_syms(out);
                }
                if let Some(e) = end {
                    e.collect_syms(out);
                }
            }
            ShapeExp::Concat { left, right } | ShapeExp::Broadcast { left, right } => {
                left.collect_syms(out);
                right.collect_syms(out);
            }
        }
    }
}

impl CollectSyms for StrExp {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match self {
            StrExp::Const(_) => {}
            StrExp::Symbol(sym) => visit_sym(sym, out),
            StrExp::Concat { left, right } => {
                left.collect_syms(out);
                right.collect_syms(out);
            }
            StrExp::Slice { base, start, end } => {
                base.collect_syms(out);
                if let Some(s) = start {
                    s.collect_syms(out);
                }
                if let Some(e) = end {
                    e.collect_syms(out);
                }
            }
        }
    }
}

impl CollectSyms for SymExp {
    fn collect_syms(&self, out: &mut FastHashMap<SymId, (SymKind, Symbol)>) {
        match self {
            SymExp::Num(e) => e.collect_syms(out),
            SymExp::Bool(e) => e.collect_syms(out),
            SymExp::Shape(e) => e.collect_syms(out),
            SymExp::Str(e) => e.collect_syms(out),
        }
    }
}

/// Result of the "mentions exactly one symbol" probe used by the
/// range-narrowing heuristics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleVar {
    /// No symbol at all; the expression is ground.
    None,
    /// Exactly one distinct symbol.
    One(Symbol),
    /// Two or more distinct symbols.
    Many,
}

pub(crate) fn single_var_of(collect: &impl CollectSyms) -> SingleVar {
    let mut map = FastHashMap::default();
    collect.collect_syms(&mut map);
    let mut syms = map.into_values();
    match (syms.next(), syms.next()) {
        (None, _) => SingleVar::None,
        (Some((_, sym)), None) => SingleVar::One(sym),
        _ => SingleVar::Many,
    }
}

impl NumExp {
    #[must_use]
    pub fn single_var(&self) -> SingleVar {
        single_var_of(self)
    }
}

impl SymExp {
    #[must_use]
    pub fn single_var(&self) -> SingleVar {
        single_var_of(self)
    }
}

/* Display.

The grammar here doubles as the human-readable constraint listing, so it
stays close to the surface syntax of the analyzed programs. */

impl std::fmt::Display for NumExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumExp::Int(i) => write!(f, "{i}"),
            NumExp::Float(v) => write!(f, "{v}"),
            NumExp::Symbol(sym) => write!(f, "{sym}"),
            NumExp::Unary {
                op: NumUop::Neg,
                operand,
            } => write!(f, "-{operand}"),
            NumExp::Unary { op, operand } => write!(f, "{op}({operand})"),
            NumExp::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            NumExp::Max(items) => write_call(f, "max", items),
            NumExp::Min(items) => write_call(f, "min", items),
            NumExp::Dim { shape, index } => write!(f, "{shape}[{index}]"),
            NumExp::Numel(shape) => write!(f, "numel({shape})"),
        }
    }
}

fn write_call(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    items: &[NumExp],
) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, ")")
}

impl std::fmt::Display for BoolExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoolExp::Const(b) => write!(f, "{b}"),
            BoolExp::Symbol(sym) => write!(f, "{sym}"),
        }
    }
}

impl std::fmt::Display for ShapeExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeExp::Const(dims) => {
                write!(f, "[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, "]")
            }
            ShapeExp::Symbol { sym, .. } => write!(f, "{sym}"),
            ShapeExp::Set { base, axis, dim } => write!(f, "set({base}, {axis}, {dim})"),
            ShapeExp::Slice { base, start, end } => {
                write!(f, "{base}[")?;
                if let Some(s) = start {
                    write!(f, "{s}")?;
                }
                write!(f, ":")?;
                if let Some(e) = end {
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            ShapeExp::Concat { left, right } => write!(f, "({left} ++ {right})"),
            ShapeExp::Broadcast { left, right } => write!(f, "broadcast({left}, {right})"),
        }
    }
}

impl std::fmt::Display for StrExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrExp::Const(s) => write!(f, "{s:?}"),
            StrExp::Symbol(sym) => write!(f, "{sym}"),
            StrExp::Concat { left, right } => write!(f, "({left} + {right})"),
            StrExp::Slice { base, start, end } => {
                write!(f, "{base}[")?;
                if let Some(s) = start {
                    write!(f, "{s}")?;
                }
                write!(f, ":")?;
                if let Some(e) = end {
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::fmt::Display for SymExp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymExp::Num(e) => write!(f, "{e}"),
            SymExp::Bool(e) => write!(f, "{e}"),
            SymExp::Shape(e) => write!(f, "{e}"),
            SymExp::Str(e) => write!(f, "{e}"),
        }
    }
}
