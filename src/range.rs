// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! The interval abstract domain for numeric symbols.

A [`NumRange`] is a closed interval `[start, end]` over a two-sorted scalar
type (exact `i64` integers and finite `f64` floats) extended with ±∞
sentinels. It is the abstract value the engine tracks per numeric symbol and
the vehicle for every arithmetic transfer function of the immediate decision
procedure.

The interval is considered invalid if `start > end`; invalid ranges appear
transiently as the result of an empty intersection and poison whatever
consumed them.
*/

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An exact scalar endpoint: integers stay exact, floats are finite.
///
/// Mixed arithmetic promotes to float. Integer arithmetic that would
/// overflow `i64` escapes to the corresponding infinity at the [`Bound`]
/// level rather than wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    #[inline]
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_zero(self) -> bool {
        match self {
            Scalar::Int(i) => i == 0,
            Scalar::Float(f) => f == 0.0,
        }
    }

    /// Total order. Int-int comparisons are exact; anything involving a
    /// float goes through `f64::total_cmp` (floats here are always finite).
    #[must_use]
    pub fn compare(self, other: Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(&b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }

    /// Exact on integers, `f64::ceil` on floats.
    #[must_use]
    pub fn ceil(self) -> Scalar {
        match self {
            Scalar::Int(i) => Scalar::Int(i),
            Scalar::Float(f) => Scalar::Float(f.ceil()),
        }
    }

    /// Exact on integers, `f64::floor` on floats.
    #[must_use]
    pub fn floor(self) -> Scalar {
        match self {
            Scalar::Int(i) => Scalar::Int(i),
            Scalar::Float(f) => Scalar::Float(f.floor()),
        }
    }

    /// Smallest integer `>= self`, as an `i64` when it fits.
    #[must_use]
    pub fn ceil_int(self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(i),
            Scalar::Float(f) => {
                let c = f.ceil();
                (c >= i64::MIN as f64 && c <= i64::MAX as f64).then_some(c as i64)
            }
        }
    }

    /// Largest integer `<= self`, as an `i64` when it fits.
    #[must_use]
    pub fn floor_int(self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(i),
            Scalar::Float(f) => {
                let c = f.floor();
                (c >= i64::MIN as f64 && c <= i64::MAX as f64).then_some(c as i64)
            }
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// An interval endpoint: a finite scalar or an infinity sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Bound {
    NegInf,
    Fin(Scalar),
    PosInf,
}

impl Bound {
    #[inline]
    #[must_use]
    pub fn finite(self) -> Option<Scalar> {
        match self {
            Bound::Fin(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn compare(self, other: Bound) -> Ordering {
        match (self, other) {
            (Bound::NegInf, Bound::NegInf) | (Bound::PosInf, Bound::PosInf) => Ordering::Equal,
            (Bound::NegInf, _) | (_, Bound::PosInf) => Ordering::Less,
            (_, Bound::NegInf) | (Bound::PosInf, _) => Ordering::Greater,
            (Bound::Fin(a), Bound::Fin(b)) => a.compare(b),
        }
    }

    #[must_use]
    pub fn min(self, other: Bound) -> Bound {
        if self.compare(other) == Ordering::Greater {
            other
        } else {
            self
        }
    }

    #[must_use]
    pub fn max(self, other: Bound) -> Bound {
        if self.compare(other) == Ordering::Less {
            other
        } else {
            self
        }
    }

    fn fin_add(a: Scalar, b: Scalar) -> Bound {
        match (a, b) {
            (Scalar::Int(x), Scalar::Int(y)) => match x.checked_add(y) {
                Some(v) => Bound::Fin(Scalar::Int(v)),
                None if x > 0 => Bound::PosInf,
                None => Bound::NegInf,
            },
            _ => Bound::Fin(Scalar::Float(a.as_f64() + b.as_f64())),
        }
    }

    #[must_use]
    pub fn add(self, other: Bound) -> Bound {
        match (self, other) {
            // Mixed infinities only arise from invalid inputs.
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
            (Bound::Fin(a), Bound::Fin(b)) => Self::fin_add(a, b),
        }
    }

    #[must_use]
    pub fn neg(self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::PosInf => Bound::NegInf,
            Bound::Fin(Scalar::Int(i)) => match i.checked_neg() {
                Some(v) => Bound::Fin(Scalar::Int(v)),
                None => Bound::PosInf,
            },
            Bound::Fin(Scalar::Float(f)) => Bound::Fin(Scalar::Float(-f)),
        }
    }

    fn sign(self) -> Ordering {
        match self {
            Bound::NegInf => Ordering::Less,
            Bound::PosInf => Ordering::Greater,
            Bound::Fin(s) => s.compare(Scalar::Int(0)),
        }
    }

    #[must_use]
    pub fn mul(self, other: Bound) -> Bound {
        // 0 × ∞ is pinned to 0, the usual interval-arithmetic convention.
        if self.sign() == Ordering::Equal || other.sign() == Ordering::Equal {
            // a float zero keeps its sort
            if let (Bound::Fin(a), Bound::Fin(b)) = (self, other) {
                if matches!(a, Scalar::Float(_)) || matches!(b, Scalar::Float(_)) {
                    return Bound::Fin(Scalar::Float(0.0));
                }
            }
            return Bound::Fin(Scalar::Int(0));
        }
        match (self, other) {
            (Bound::Fin(a), Bound::Fin(b)) => match (a, b) {
                (Scalar::Int(x), Scalar::Int(y)) => match x.checked_mul(y) {
                    Some(v) => Bound::Fin(Scalar::Int(v)),
                    None if (x > 0) == (y > 0) => Bound::PosInf,
                    None => Bound::NegInf,
                },
                _ => Bound::Fin(Scalar::Float(a.as_f64() * b.as_f64())),
            },
            (a, b) => {
                if (a.sign() == Ordering::Greater) == (b.sign() == Ordering::Greater) {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    /// True division. Divisors of zero must be excluded by the caller.
    #[must_use]
    pub fn div(self, other: Bound) -> Bound {
        match (self, other) {
            (Bound::Fin(a), Bound::Fin(b)) => Bound::Fin(Scalar::Float(a.as_f64() / b.as_f64())),
            // finite / ∞ tends to 0
            (Bound::Fin(_), _) => Bound::Fin(Scalar::Int(0)),
            (a, b) => {
                if (a.sign() == Ordering::Greater) == (b.sign() == Ordering::Greater) {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    #[must_use]
    pub fn ceil(self) -> Bound {
        match self {
            Bound::Fin(s) => Bound::Fin(s.ceil()),
            inf => inf,
        }
    }

    #[must_use]
    pub fn floor(self) -> Bound {
        match self {
            Bound::Fin(s) => Bound::Fin(s.floor()),
            inf => inf,
        }
    }
}

impl From<Scalar> for Bound {
    fn from(s: Scalar) -> Self {
        Bound::Fin(s)
    }
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-inf"),
            Bound::PosInf => write!(f, "inf"),
            Bound::Fin(s) => write!(f, "{s}"),
        }
    }
}

/// A closed interval `[start, end]` over extended scalars.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumRange {
    start: Bound,
    end: Bound,
}

impl NumRange {
    #[must_use]
    pub const fn new(start: Bound, end: Bound) -> Self {
        NumRange { start, end }
    }

    /// `(−∞, +∞)`.
    #[must_use]
    pub const fn top() -> Self {
        NumRange {
            start: Bound::NegInf,
            end: Bound::PosInf,
        }
    }

    /// `[c, c]`.
    #[must_use]
    pub fn from_const(c: impl Into<Scalar>) -> Self {
        let s = Bound::Fin(c.into());
        NumRange { start: s, end: s }
    }

    /// `[k, +∞]`.
    #[must_use]
    pub fn gte(k: impl Into<Scalar>) -> Self {
        NumRange {
            start: Bound::Fin(k.into()),
            end: Bound::PosInf,
        }
    }

    /// `[−∞, k]`.
    #[must_use]
    pub fn lte(k: impl Into<Scalar>) -> Self {
        NumRange {
            start: Bound::NegInf,
            end: Bound::Fin(k.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> Bound {
        self.start
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> Bound {
        self.end
    }

    /// False iff `start > end`.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.start.compare(self.end) != Ordering::Greater
    }

    /// `Some(c)` when the interval holds exactly one value.
    #[must_use]
    pub fn as_const(&self) -> Option<Scalar> {
        match (self.start, self.end) {
            (Bound::Fin(a), Bound::Fin(b)) if a.compare(b) == Ordering::Equal => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_top(&self) -> bool {
        matches!(self.start, Bound::NegInf) && matches!(self.end, Bound::PosInf)
    }

    #[must_use]
    pub fn contains(&self, n: impl Into<Scalar>) -> bool {
        let b = Bound::Fin(n.into());
        self.start.compare(b) != Ordering::Greater && b.compare(self.end) != Ordering::Greater
    }

    /// Every value of `self` is strictly below every value of `other`.
    #[must_use]
    pub fn lt_range(&self, other: &NumRange) -> bool {
        self.end.compare(other.start) == Ordering::Less
    }

    /// Every value of `self` is below-or-equal every value of `other`.
    #[must_use]
    pub fn lte_range(&self, other: &NumRange) -> bool {
        match (self.end, other.start) {
            // an unbounded end is never <= anything
            (Bound::PosInf, _) | (_, Bound::NegInf) => false,
            (a, b) => a.compare(b) != Ordering::Greater,
        }
    }

    /// The ranges share no value.
    #[must_use]
    pub fn disjoint(&self, other: &NumRange) -> bool {
        self.lt_range(other) || other.lt_range(self)
    }

    #[must_use]
    pub fn neg(&self) -> NumRange {
        NumRange {
            start: self.end.neg(),
            end: self.start.neg(),
        }
    }

    #[must_use]
    pub fn ceil(&self) -> NumRange {
        NumRange {
            start: self.start.ceil(),
            end: self.end.ceil(),
        }
    }

    #[must_use]
    pub fn floor(&self) -> NumRange {
        NumRange {
            start: self.start.floor(),
            end: self.end.floor(),
        }
    }

    #[must_use]
    pub fn abs(&self) -> NumRange {
        let zero = Bound::Fin(Scalar::Int(0));
        if self.start.compare(zero) != Ordering::Less {
            *self
        } else if self.end.compare(zero) != Ordering::Greater {
            self.neg()
        } else {
            NumRange {
                start: zero,
                end: self.start.neg().max(self.end),
            }
        }
    }

    #[must_use]
    pub fn add(&self, other: &NumRange) -> NumRange {
        NumRange {
            start: self.start.add(other.start),
            end: self.end.add(other.end),
        }
    }

    #[must_use]
    pub fn sub(&self, other: &NumRange) -> NumRange {
        self.add(&other.neg())
    }

    #[must_use]
    pub fn mul(&self, other: &NumRange) -> NumRange {
        let candidates = [
            self.start.mul(other.start),
            self.start.mul(other.end),
            self.end.mul(other.start),
            self.end.mul(other.end),
        ];
        let mut lo = candidates[0];
        let mut hi = candidates[0];
        for &c in &candidates[1..] {
            lo = lo.min(c);
            hi = hi.max(c);
        }
        NumRange { start: lo, end: hi }
    }

    /// True division. A divisor range straddling (or touching) zero yields
    /// `top`.
    #[must_use]
    pub fn truediv(&self, other: &NumRange) -> NumRange {
        if other.contains(0) {
            return NumRange::top();
        }
        let candidates = [
            self.start.div(other.start),
            self.start.div(other.end),
            self.end.div(other.start),
            self.end.div(other.end),
        ];
        let mut lo = candidates[0];
        let mut hi = candidates[0];
        for &c in &candidates[1..] {
            lo = lo.min(c);
            hi = hi.max(c);
        }
        NumRange { start: lo, end: hi }
    }

    /// Floor division: true division with the lower bound rounded toward
    /// −∞ and the upper bound toward +∞.
    #[must_use]
    pub fn floordiv(&self, other: &NumRange) -> NumRange {
        let q = self.truediv(other);
        if q.is_top() {
            return q;
        }
        let start = match q.start.floor() {
            Bound::Fin(s) => match s.floor_int() {
                Some(i) => Bound::Fin(Scalar::Int(i)),
                None => Bound::NegInf,
            },
            inf => inf,
        };
        let end = match q.end.ceil() {
            Bound::Fin(s) => match s.ceil_int() {
                Some(i) => Bound::Fin(Scalar::Int(i)),
                None => Bound::PosInf,
            },
            inf => inf,
        };
        NumRange { start, end }
    }

    /// `x mod m`: `[0, m−1]` when the divisor is a positive constant,
    /// otherwise `top`.
    #[must_use]
    pub fn modulo(&self, other: &NumRange) -> NumRange {
        match other.as_const() {
            Some(m) if m.compare(Scalar::Int(0)) == Ordering::Greater => {
                let hi = match m {
                    Scalar::Int(i) => Scalar::Int(i - 1),
                    Scalar::Float(f) => Scalar::Float(f),
                };
                NumRange {
                    start: Bound::Fin(Scalar::Int(0)),
                    end: Bound::Fin(hi),
                }
            }
            _ => NumRange::top(),
        }
    }

    #[must_use]
    pub fn max_range(&self, other: &NumRange) -> NumRange {
        NumRange {
            start: self.start.max(other.start),
            end: self.end.max(other.end),
        }
    }

    #[must_use]
    pub fn min_range(&self, other: &NumRange) -> NumRange {
        NumRange {
            start: self.start.min(other.start),
            end: self.end.min(other.end),
        }
    }

    /// Meet. May produce an invalid range; callers check [`valid`].
    ///
    /// [`valid`]: NumRange::valid
    #[must_use]
    pub fn intersect(&self, other: &NumRange) -> NumRange {
        NumRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }

    /// Join (interval hull).
    #[must_use]
    pub fn union(&self, other: &NumRange) -> NumRange {
        NumRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Whether `other` lies entirely within `self`.
    #[must_use]
    pub fn subsumes(&self, other: &NumRange) -> bool {
        self.start.compare(other.start) != Ordering::Greater
            && other.end.compare(self.end) != Ordering::Greater
    }

    /// Round both endpoints inward to integers, for narrowing integer
    /// symbols: the lower bound rises to the next integer, the upper drops.
    #[must_use]
    pub fn int_tighten(&self) -> NumRange {
        let start = match self.start {
            Bound::Fin(s) => match s.ceil_int() {
                Some(i) => Bound::Fin(Scalar::Int(i)),
                None => self.start,
            },
            inf => inf,
        };
        let end = match self.end {
            Bound::Fin(s) => match s.floor_int() {
                Some(i) => Bound::Fin(Scalar::Int(i)),
                None => self.end,
            },
            inf => inf,
        };
        NumRange { start, end }
    }
}

impl PartialEq<Scalar> for NumRange {
    /// A range equals a scalar only when it is that single point.
    fn eq(&self, other: &Scalar) -> bool {
        self.as_const()
            .is_some_and(|c| c.compare(*other) == Ordering::Equal)
    }
}

impl PartialOrd<Scalar> for NumRange {
    /// Ordering against a scalar: defined only when every value of the
    /// range falls on one side, or the range is exactly the point.
    fn partial_cmp(&self, other: &Scalar) -> Option<Ordering> {
        let point = Bound::Fin(*other);
        if self.end.compare(point) == Ordering::Less {
            Some(Ordering::Less)
        } else if self.start.compare(point) == Ordering::Greater {
            Some(Ordering::Greater)
        } else if self == other {
            Some(Ordering::Equal)
        } else {
            None
        }
    }
}

impl std::fmt::Display for NumRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid() {
            write!(f, "[]")
        } else {
            write!(f, "[{}, {}]", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int(lo: i64, hi: i64) -> NumRange {
        NumRange::new(Bound::Fin(Scalar::Int(lo)), Bound::Fin(Scalar::Int(hi)))
    }

    #[rstest]
    #[case(int(1, 2), int(3, 4), int(4, 6))]
    #[case(int(-1, 2), int(-3, 4), int(-4, 6))]
    fn test_add(#[case] a: NumRange, #[case] b: NumRange, #[case] expect: NumRange) {
        assert_eq!(a.add(&b), expect);
    }

    #[rstest]
    #[case(int(2, 3), int(4, 5), int(8, 15))]
    #[case(int(-2, 3), int(4, 5), int(-10, 15))]
    #[case(int(-2, -1), int(-3, -2), int(2, 6))]
    fn test_mul_endpoint_enumeration(
        #[case] a: NumRange,
        #[case] b: NumRange,
        #[case] expect: NumRange,
    ) {
        assert_eq!(a.mul(&b), expect);
    }

    #[test]
    fn test_mul_with_infinity() {
        let r = NumRange::gte(1).mul(&int(2, 3));
        assert_eq!(r.start(), Bound::Fin(Scalar::Int(2)));
        assert_eq!(r.end(), Bound::PosInf);
    }

    #[test]
    fn test_div_straddling_zero_is_top() {
        assert!(int(1, 10).truediv(&int(-1, 1)).is_top());
        assert!(int(1, 10).truediv(&int(0, 5)).is_top());
    }

    #[test]
    fn test_floordiv_rounds_outward() {
        // [1,5] // [2,2]: true quotient [0.5, 2.5], floor lower, ceil upper
        let q = int(1, 5).floordiv(&int(2, 2));
        assert_eq!(q, int(0, 3));
    }

    #[test]
    fn test_mod_positive_const() {
        assert_eq!(int(-10, 100).modulo(&int(7, 7)), int(0, 6));
        assert!(int(-10, 100).modulo(&int(-7, -7)).is_top());
        assert!(int(0, 5).modulo(&int(1, 7)).is_top());
    }

    #[test]
    fn test_abs() {
        assert_eq!(int(3, 5).abs(), int(3, 5));
        assert_eq!(int(-5, -3).abs(), int(3, 5));
        assert_eq!(int(-2, 5).abs(), int(0, 5));
        assert_eq!(int(-7, 5).abs(), int(0, 7));
    }

    #[test]
    fn test_intersect_invalid() {
        let meet = int(0, 1).intersect(&int(5, 9));
        assert!(!meet.valid());
    }

    #[test]
    fn test_union_hull() {
        assert_eq!(int(0, 1).union(&int(5, 9)), int(0, 9));
    }

    #[test]
    fn test_order_queries() {
        assert!(int(0, 2).lt_range(&int(3, 4)));
        assert!(!int(0, 3).lt_range(&int(3, 4)));
        assert!(int(0, 3).lte_range(&int(3, 4)));
        assert!(!NumRange::gte(0).lte_range(&NumRange::top()));
        assert!(int(0, 2).disjoint(&int(3, 4)));
        assert!(!int(0, 3).disjoint(&int(3, 4)));
    }

    #[test]
    fn test_const_queries() {
        assert_eq!(int(4, 4).as_const(), Some(Scalar::Int(4)));
        assert_eq!(int(4, 5).as_const(), None);
        assert!(NumRange::top().contains(0));
        assert!(int(1, 3).contains(2));
        assert!(!int(1, 3).contains(4));
    }

    #[test]
    fn test_scalar_comparisons() {
        assert!(int(0, 2) < Scalar::Int(3));
        assert!(int(4, 9) > Scalar::Int(3));
        assert_eq!(int(3, 3), Scalar::Int(3));
        // overlapping is unordered
        assert_eq!(int(0, 5).partial_cmp(&Scalar::Int(3)), None);
    }

    #[test]
    fn test_int_tighten() {
        let r = NumRange::new(
            Bound::Fin(Scalar::Float(0.5)),
            Bound::Fin(Scalar::Float(3.5)),
        );
        assert_eq!(r.int_tighten(), int(1, 3));
    }

    #[test]
    fn test_overflow_escapes_to_infinity() {
        let r = int(i64::MAX - 1, i64::MAX).add(&int(10, 10));
        assert_eq!(r.start(), Bound::PosInf);
        assert_eq!(r.end(), Bound::PosInf);
    }

    /// Transfer soundness spot checks: for sampled points a ∈ A, b ∈ B,
    /// `a op b` lands inside `transfer_op(A, B)`. The reference semantics
    /// for `//` and `%` is the source language's: quotients round toward
    /// −∞ and the remainder takes the divisor's sign, so negative divisors
    /// are sampled too.
    #[rstest]
    #[case(2, 5)]
    #[case(-3, -2)]
    fn test_transfer_soundness_sampling(#[case] ylo: i64, #[case] yhi: i64) {
        let a = int(-3, 4);
        let b = int(ylo, yhi);
        for x in -3i64..=4 {
            for y in ylo..=yhi {
                let fdiv = (x as f64 / y as f64).floor() as i64;
                let fmod = x - y * fdiv;
                assert!(a.add(&b).contains(x + y));
                assert!(a.sub(&b).contains(x - y));
                assert!(a.mul(&b).contains(x * y));
                assert!(a.floordiv(&b).contains(fdiv));
                assert!(a.modulo(&b).is_top() || a.modulo(&b).contains(fmod));
                assert!(a.max_range(&b).contains(x.max(y)));
                assert!(a.min_range(&b).contains(x.min(y)));
            }
        }
    }
}
