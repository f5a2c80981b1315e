use assay_declaration::ExperimentPath;
use proptest::prelude::*;
use std::cmp::Ordering;

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

fn arb_path() -> impl Strategy<Value = ExperimentPath> {
    (
        any::<bool>(),
        0..4usize,
        proptest::collection::vec(arb_id(), 0..5),
    )
        .prop_map(|(absolute, ancestors, ids)| {
            let base = if absolute {
                ExperimentPath::define_absolute()
            } else {
                ExperimentPath::define_ancestor(ancestors)
            };
            base.resolve_all(ids)
        })
}

proptest! {
    #[test]
    fn prop_equality_is_reflexive_and_symmetric(a in arb_path(), b in arb_path()) {
        prop_assert_eq!(&a, &a.clone());
        prop_assert_eq!(a == b, b == a);
    }

    #[test]
    fn prop_ordering_consistent_with_equality(a in arb_path(), b in arb_path()) {
        prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn prop_ordering_is_transitive(a in arb_path(), b in arb_path(), c in arb_path()) {
        let mut sorted = [a, b, c];
        sorted.sort();
        prop_assert!(sorted[0] <= sorted[1]);
        prop_assert!(sorted[1] <= sorted[2]);
        prop_assert!(sorted[0] <= sorted[2]);
    }

    #[test]
    fn prop_resolve_then_parent_is_identity(path in arb_path(), id in arb_id()) {
        prop_assert_eq!(path.resolve(id).parent(), Some(path));
    }

    #[test]
    fn prop_same_operations_same_path(ids in proptest::collection::vec(arb_id(), 0..5)) {
        let a = ExperimentPath::define_relative().resolve_all(ids.clone());
        let b = ids.iter().fold(ExperimentPath::define_relative(), |path, id| path.resolve(id.as_str()));
        prop_assert_eq!(a.cmp(&b), Ordering::Equal);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_display_parses_back(path in arb_path()) {
        let parsed: ExperimentPath = path.to_string().parse().unwrap();
        prop_assert_eq!(parsed, path);
    }

    #[test]
    fn prop_relative_to_then_resolve(
        target in proptest::collection::vec(arb_id(), 0..5),
        base in proptest::collection::vec(arb_id(), 0..5),
    ) {
        let target = ExperimentPath::define_absolute().resolve_all(target);
        let base = ExperimentPath::define_absolute().resolve_all(base);
        let relative = target.relative_to(&base).unwrap();
        prop_assert_eq!(relative.resolve_against(&base).unwrap(), target);
    }

    #[test]
    fn prop_absolute_sorts_after_relative(
        absolute in proptest::collection::vec(arb_id(), 0..5),
        relative in proptest::collection::vec(arb_id(), 0..5),
        ancestors in 0..4usize,
    ) {
        let absolute = ExperimentPath::define_absolute().resolve_all(absolute);
        let relative = ExperimentPath::define_ancestor(ancestors).resolve_all(relative);
        prop_assert!(relative < absolute);
    }
}

#[test]
fn empty_absolute_has_no_depth_or_ids() {
    let path = ExperimentPath::define_absolute();
    assert_eq!(path.ancestor_depth(), 0);
    assert_eq!(path.ids().next(), None);
}

#[test]
fn deeper_ancestor_sorts_first() {
    let mut paths: Vec<ExperimentPath> = ["/a", "a", "../a", "../../a", "../../b"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    paths.sort();

    let sorted: Vec<String> = paths.iter().map(ToString::to_string).collect();
    assert_eq!(sorted, vec!["../../a", "../../b", "../a", "a", "/a"]);
}
