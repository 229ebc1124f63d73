use std::collections::HashMap;

use lumbung::{
    storage::page_index::PageIndex,
    types::{PAGE_SIZE, page::MAX_FREE_SPACE},
};
use proptest::prelude::*;

#[test]
fn test_empty_index_selects_nothing() {
    let index = PageIndex::new();
    assert_eq!(index.select(1), None);
}

#[test]
fn test_selected_page_is_handed_out_once() {
    let index = PageIndex::new();
    index.add(2, MAX_FREE_SPACE);
    let info = index.select(100).unwrap();
    assert_eq!(info.page_no, 2);
    assert_eq!(info.free_space, MAX_FREE_SPACE);
    assert_eq!(index.select(100), None);

    index.add(info.page_no, info.free_space - 100);
    assert_eq!(index.select(100).map(|info| info.page_no), Some(2));
}

#[test]
fn test_prefers_tighter_bucket() {
    let index = PageIndex::new();
    index.add(2, MAX_FREE_SPACE);
    index.add(3, PAGE_SIZE / 4);
    assert_eq!(index.select(100).map(|info| info.page_no), Some(3));
    assert_eq!(index.select(100).map(|info| info.page_no), Some(2));
}

#[derive(Debug, Clone)]
enum Op {
    Add(u32, usize),
    Select(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (2u32..40, 0usize..=MAX_FREE_SPACE).prop_map(|(page_no, free)| Op::Add(page_no, free)),
        (1usize..=MAX_FREE_SPACE).prop_map(Op::Select),
    ]
}

proptest! {
    #[test]
    fn selected_page_always_fits(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let index = PageIndex::new();
        let mut filed: HashMap<u32, usize> = HashMap::new();
        for op in ops {
            match op {
                Op::Add(page_no, free) => {
                    // a page is only ever filed once at a time
                    if filed.contains_key(&page_no) {
                        continue;
                    }
                    index.add(page_no, free);
                    filed.insert(page_no, free);
                }
                Op::Select(size) => {
                    if let Some(info) = index.select(size) {
                        prop_assert!(info.free_space >= size);
                        prop_assert_eq!(filed.remove(&info.page_no), Some(info.free_space));
                    }
                }
            }
        }
        prop_assert_eq!(index.len(), filed.len());
    }
}
