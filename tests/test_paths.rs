//! End-to-end scenarios driving the public snapshot API the way the
//! symbolic interpreter does: mint, constrain, fork, query.

use rstest::{fixture, rstest};

use tsc_engine::{
    Bound, CmpKind, ConstraintBundle, ConstraintSet, CtrKind, Decision, NumExp, NumRange, Scalar,
    ShapeExp, SymExp,
};

#[fixture]
fn root() -> ConstraintSet {
    let _ = env_logger::builder().is_test(true).try_init();
    ConstraintSet::root()
}

fn int_range(lo: i64, hi: i64) -> NumRange {
    NumRange::new(Bound::Fin(Scalar::Int(lo)), Bound::Fin(Scalar::Int(hi)))
}

/// Two constrained minters; ranges and ordering queries behave as the
/// interpreter expects before any branch is taken.
#[rstest]
fn test_constrained_minting(root: ConstraintSet) {
    let (x, s1) = root.gen_sym_int_gte("x", 0, None);
    let (y, s2) = s1.gen_sym_int_gte("y", 3, None);

    assert_eq!(s2.cached_range(&y).unwrap(), NumRange::gte(3));

    let open = s2.gen_num_compare(CmpKind::Lt, x.clone(), y, None);
    assert_eq!(s2.check_immediate(&open), Decision::Unknown);

    let provable = s2.gen_num_compare(CmpKind::Lt, NumExp::Int(-1), x, None);
    assert_eq!(s2.check_immediate(&provable), Decision::True);
}

/// A soft equality is recorded but never narrows the symbol's domain.
#[rstest]
fn test_require_keeps_domains(root: ConstraintSet) {
    let (x, s1) = root.gen_sym_int_gte("x", 0, None);
    let (_, s2) = s1.gen_sym_int_gte("y", 3, None);

    let eq = s2
        .gen_equality(SymExp::Num(x.clone()), SymExp::Num(NumExp::Int(5)), false, None)
        .unwrap();
    let s3 = s2.require(eq);

    assert_eq!(s3.valid(), Some(true));
    assert_eq!(s3.cached_range(&x).unwrap(), NumRange::gte(0));
    assert_eq!(s3.count(), 3);
}

/// The same equality guaranteed pins the symbol, and ordering queries
/// sharpen accordingly — but an unrelated symbol stays unconstrained.
#[rstest]
fn test_guarantee_narrows_domains(root: ConstraintSet) {
    let (x, s1) = root.gen_sym_int_gte("x", 0, None);
    let (y, s2) = s1.gen_sym_int_gte("y", 3, None);

    let eq = s2
        .gen_equality(SymExp::Num(x.clone()), SymExp::Num(NumExp::Int(5)), false, None)
        .unwrap();
    let s3 = s2.guarantee(eq);

    assert_eq!(s3.cached_range(&x).unwrap(), int_range(5, 5));

    let still_open = s3.gen_num_compare(CmpKind::Lt, x.clone(), y, None);
    assert_eq!(s3.check_immediate(&still_open), Decision::Unknown);

    let le = s3.gen_num_compare(CmpKind::Le, x, NumExp::Int(5), None);
    assert_eq!(s3.check_immediate(&le), Decision::True);
}

#[rstest]
fn test_broadcastability(root: ConstraintSet) {
    let ok = root.gen_broad(
        ShapeExp::from_ints(&[1, 3, 1]),
        ShapeExp::from_ints(&[4, 1, 5]),
        None,
    );
    assert_eq!(root.check_immediate(&ok), Decision::True);

    let bad = root.gen_broad(
        ShapeExp::from_ints(&[1, 3, 1]),
        ShapeExp::from_ints(&[4, 2, 5]),
        None,
    );
    assert_eq!(root.check_immediate(&bad), Decision::False);
}

#[rstest]
fn test_cast_round_trip(root: ConstraintSet) {
    let (n, set) = root.cast_bool_to_int(&tsc_engine::BoolExp::TRUE, None);
    assert_eq!(set.cached_range(&n).unwrap(), int_range(1, 1));
}

/// A contradiction between constants poisons the snapshot but keeps the
/// constraint pooled for diagnostics.
#[rstest]
fn test_invalidation_keeps_trace(root: ConstraintSet) {
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

/// Branch forking: both arms descend from one snapshot, narrow differently,
/// and never disturb each other or the parent.
#[rstest]
fn test_fork_isolation(root: ConstraintSet) {
    let (x, set) = root.gen_sym_int_gte("x", 0, None);

    let cond = set.gen_num_compare(CmpKind::Le, NumExp::Int(10), x.clone(), None);
    let negated = set.gen_not(cond.clone(), None);

    let then_arm = set.add_if(cond);
    let else_arm = set.add_if(negated);

    assert_eq!(then_arm.cached_range(&x).unwrap(), NumRange::gte(10));
    // Not(10 <= x) is not a single-symbol fact; the else arm keeps [0, +inf)
    assert_eq!(else_arm.cached_range(&x).unwrap(), NumRange::gte(0));
    // the parent snapshot saw neither
    assert_eq!(set.count(), 1);
    assert_eq!(then_arm.count(), 2);
    assert_eq!(else_arm.count(), 2);

    // both arms keep minting non-colliding ids through the shared manager
    let a = then_arm.gen_sym_int("a", None);
    let b = else_arm.gen_sym_int("b", None);
    assert_ne!(a.id, b.id);
}

/// Pool growth is monotone along any chain of installers, and count always
/// equals the pool length reported through the bundle.
#[rstest]
fn test_count_monotone(root: ConstraintSet) {
    let x = NumExp::sym(root.gen_sym_int("x", None));
    let mut set = root.clone();
    let mut last = 0;
    for i in 0..6 {
        let c = set.gen_num_compare(CmpKind::Le, NumExp::Int(i), x.clone(), None);
        set = match i % 3 {
            0 => set.guarantee(c),
            1 => set.require(c),
            _ => set.add_if(c),
        };
        assert!(set.count() >= last);
        last = set.count();
    }
    let bundle = set.bundle();
    assert_eq!(bundle.ctr_pool.len(), set.count());
}

/// Printing a freshly installed equality shows the display name and the
/// literal.
#[rstest]
fn test_print_round_trip(root: ConstraintSet) {
    let w = root.gen_sym_int("width", None);
    let eq = root
        .gen_equality(
            SymExp::Num(NumExp::sym(w)),
            SymExp::Num(NumExp::Int(224)),
            false,
            None,
        )
        .unwrap();
    let set = root.require(eq);
    let listing = set.to_string();
    assert!(listing.contains("width"));
    assert!(listing.contains("224"));
}

/// Decoding the JSON bundle recovers the three index lists and the pool
/// size exactly.
#[rstest]
fn test_json_round_trip(root: ConstraintSet) {
    let (x, set) = root.gen_sym_int_gte("x", 1, None);
    let soft = set.gen_num_compare(CmpKind::Le, x.clone(), NumExp::Int(64), None);
    let cond = set.gen_num_compare(CmpKind::Lt, NumExp::Int(2), x, None);
    let set = set.require(soft).add_if(cond);

    let text = set.constraint_json().unwrap();
    let bundle: ConstraintBundle = serde_json::from_str(&text).unwrap();
    assert_eq!(bundle.ctr_pool.len(), set.count());
    assert_eq!(bundle.hard_ctr, set.hard_indices().collect::<Vec<_>>());
    assert_eq!(bundle.soft_ctr, set.soft_indices().collect::<Vec<_>>());
    assert_eq!(bundle.path_ctr, set.path_indices().collect::<Vec<_>>());
}

/// A library-shim style flow: an image tensor reshaped and broadcast, with
/// the soft obligations that make the ops well-formed.
#[rstest]
fn test_shim_flow(root: ConstraintSet) {
    // conv input: [batch, 3, h, w] with batch symbolic
    let (batch, set) = root.gen_sym_int_gte("batch", 1, None);
    let input = ShapeExp::from_dims([
        batch.clone(),
        NumExp::Int(3),
        NumExp::Int(224),
        NumExp::Int(224),
    ]);

    // bias of shape [3, 1, 1] broadcasts against the input: the symbolic
    // batch dim lines up with an implicit left-padded 1
    let bias = ShapeExp::from_ints(&[3, 1, 1]);
    let broad = set.gen_broad(input.clone(), bias, None);
    assert_eq!(set.check_immediate(&broad), Decision::True);
    let set = set.require(broad); // trivially true, dropped from the pool
    assert_eq!(set.count(), 1);

    // numel(input) = batch * 3 * 224 * 224
    let numel = NumExp::numel(input);
    let expected = NumExp::mul(batch, NumExp::Int(3 * 224 * 224));
    let (le, ge) = (
        set.gen_num_compare(CmpKind::Le, numel.clone(), expected.clone(), None),
        set.gen_num_compare(CmpKind::Le, expected, numel, None),
    );
    let set = set.require_all([le, ge]);
    assert!(set.is_live());
}
