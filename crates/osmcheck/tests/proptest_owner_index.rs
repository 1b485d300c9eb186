//! Property tests for the owner index (insert/mark → prepare → query)


use osmcheck::OwnerIndexBuilder;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

proptest! {
    /// query(m) returns one entry per listing of m, with the right marks
    #[test]
    fn query_matches_listings(lists in generators::arb_owner_lists()) {
        let mut builder = OwnerIndexBuilder::new();
        let mut marked: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
        let mut expected: BTreeMap<u64, Vec<u64>> = BTreeMap::new();

        for (owner, members) in &lists {
            builder.insert_all(*owner, members.iter().map(|(m, _)| *m));
            builder.mark(
                *owner,
                members.iter().filter(|(_, mark)| *mark).map(|(m, _)| *m),
            );
            for (member, mark) in members {
                expected.entry(*member).or_default().push(*owner);
                if *mark {
                    marked.entry(*owner).or_default().insert(*member);
                }
            }
        }

        let total: usize = lists.iter().map(|(_, m)| m.len()).sum();
        prop_assert_eq!(builder.len(), total);

        let index = builder.prepare();
        prop_assert_eq!(index.len(), total);

        for member in 0u64..32 {
            let got: Vec<(u64, bool)> = index
                .query(member)
                .iter()
                .map(|e| {
                    assert_eq!(e.member_id, member);
                    (e.owner_id, e.marked)
                })
                .collect();

            let mut want: Vec<(u64, bool)> = expected
                .get(&member)
                .map(|owners| {
                    owners
                        .iter()
                        .map(|o| (*o, marked.get(o).map_or(false, |s| s.contains(&member))))
                        .collect()
                })
                .unwrap_or_default();
            want.sort();

            prop_assert_eq!(&got, &want);
            prop_assert_eq!(index.contains(member), !want.is_empty());
        }
    }

    /// Preparing the same listings twice gives identical indexes
    #[test]
    fn prepare_is_deterministic(lists in generators::arb_owner_lists()) {
        let build = || {
            let mut builder = OwnerIndexBuilder::new();
            for (owner, members) in &lists {
                builder.insert_all(*owner, members.iter().map(|(m, _)| *m));
                builder.mark(*owner, members.iter().filter(|(_, k)| *k).map(|(m, _)| *m));
            }
            builder.prepare()
        };
        prop_assert_eq!(build(), build());
    }
}

#[test]
fn never_inserted_member_has_empty_range() {
    let mut builder = OwnerIndexBuilder::new();
    builder.insert(10, 1);
    builder.insert(30, 1);
    let index = builder.prepare();

    assert!(index.query(20).is_empty());
    assert!(index.query(5).is_empty());
    assert!(index.query(31).is_empty());
    assert!(OwnerIndexBuilder::new().prepare().query(0).is_empty());
}
