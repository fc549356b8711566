use std::sync::Arc;
use std::thread;

use ctx_props::{MergePolicy, PropertyBag, PropertyDifference, PropertyMap, ReplicationProbe};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug)]
struct AlwaysOn;

impl ReplicationProbe for AlwaysOn {
    fn replication_active(&self) -> bool {
        true
    }
}

#[test]
fn test_concurrent_writers_never_lose_keys() {
    let bag = Arc::new(PropertyBag::with_probe(Arc::new(AlwaysOn)));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let bag = Arc::clone(&bag);
            thread::spawn(move || {
                for i in 0..200 {
                    bag.set(format!("t{t}-k{i}"), json!(i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bag.len(), 8 * 200);
    assert_eq!(bag.take_differences().len(), 8 * 200);
}

#[test]
fn test_differences_reflect_final_state_per_key() {
    let bag = PropertyBag::with_probe(Arc::new(AlwaysOn));
    bag.set("a", json!(1));
    bag.remove("a");
    bag.set("b", json!("x"));

    assert_eq!(
        bag.take_differences(),
        vec![
            PropertyDifference::removed("a"),
            PropertyDifference::set("b", json!("x")),
        ]
    );
}

fn small_map() -> impl Strategy<Value = PropertyMap> {
    proptest::collection::vec(("[a-e]", 0i64..5), 0..6).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(k, v)| (k, json!(v)))
            .collect::<PropertyMap>()
    })
}

proptest! {
    #[test]
    fn prop_keep_existing_never_changes_present_keys(live in small_map(), incoming in small_map()) {
        let bag = PropertyBag::new().with_values(live.clone());
        bag.merge(&incoming, MergePolicy::KeepExisting);

        for (key, value) in &live {
            let got = bag.get_local(key);
            prop_assert_eq!(got.as_ref(), Some(value));
        }
        for (key, value) in &incoming {
            if !live.contains_key(key) {
                let got = bag.get_local(key);
                prop_assert_eq!(got.as_ref(), Some(value));
            }
        }
    }

    #[test]
    fn prop_overwrite_always_takes_incoming(live in small_map(), incoming in small_map()) {
        let bag = PropertyBag::new().with_values(live.clone());
        let written = bag.merge(&incoming, MergePolicy::Overwrite);

        prop_assert_eq!(written, incoming.len());
        for (key, value) in &incoming {
            let got = bag.get_local(key);
            prop_assert_eq!(got.as_ref(), Some(value));
        }
    }
}
