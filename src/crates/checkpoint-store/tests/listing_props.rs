//! Property tests for listing order and the `before` cursor

use checkpoint_store::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

fn saver_with(ids: &BTreeSet<u32>) -> InMemoryCheckpointSaver {
    let saver = InMemoryCheckpointSaver::new();
    let config = CheckpointConfig::new().with_thread_id("t");
    for id in ids {
        let checkpoint = Checkpoint::new(format!("{:08}", id), HashMap::new(), HashMap::new(), HashMap::new());
        saver
            .put(&config, checkpoint, CheckpointMetadata::new(), HashMap::new())
            .unwrap();
    }
    saver
}

fn listed(
    saver: &InMemoryCheckpointSaver,
    before: Option<&CheckpointConfig>,
    limit: Option<usize>,
) -> Vec<String> {
    saver
        .list(Some(&CheckpointConfig::new().with_thread_id("t")), None, before, limit)
        .unwrap()
        .map(|tuple| tuple.unwrap().checkpoint.id)
        .collect()
}

proptest! {
    #[test]
    fn listing_is_strictly_descending(ids in prop::collection::btree_set(0u32..10_000, 0..40)) {
        let saver = saver_with(&ids);
        let got = listed(&saver, None, None);

        let expected: Vec<String> = ids.iter().rev().map(|id| format!("{:08}", id)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn before_is_an_exclusive_upper_bound(
        ids in prop::collection::btree_set(0u32..1_000, 1..30),
        cursor in 0u32..1_000,
    ) {
        let saver = saver_with(&ids);
        let before = CheckpointConfig::new()
            .with_thread_id("t")
            .with_checkpoint_id(format!("{:08}", cursor));
        let got = listed(&saver, Some(&before), None);

        let expected: Vec<String> = ids
            .iter()
            .rev()
            .filter(|id| **id < cursor)
            .map(|id| format!("{:08}", id))
            .collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn pages_cover_history_exactly_once(
        ids in prop::collection::btree_set(0u32..1_000, 0..30),
        page_size in 1usize..7,
    ) {
        let saver = saver_with(&ids);
        let mut seen = Vec::new();
        let mut cursor: Option<CheckpointConfig> = None;
        loop {
            let page = listed(&saver, cursor.as_ref(), Some(page_size));
            prop_assert!(page.len() <= page_size);
            let Some(last) = page.last().cloned() else {
                break;
            };
            seen.extend(page);
            cursor = Some(CheckpointConfig::new().with_thread_id("t").with_checkpoint_id(last));
        }

        prop_assert_eq!(seen, listed(&saver, None, None));
    }
}
