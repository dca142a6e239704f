// Remux
// Copyright (c) 2026 The Project Remux Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Search, ordered-insertion, and dependency-ordering helpers shared by the demuxers.

use std::collections::HashMap;
use std::hash::Hash;

/// Find the index of the last element whose key is less than or equal to `target`, in a slice
/// sorted ascending by `key`. Returns `None` when every element is greater than `target`.
pub fn binary_search_less_or_equal<T, K, F>(items: &[T], target: K, key: F) -> Option<usize>
where
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    let idx = items.partition_point(|item| key(item) <= target);
    idx.checked_sub(1)
}

/// Insert `item` into a slice sorted ascending by `key`, keeping equal keys in insertion order.
/// Returns the insertion index.
pub fn insert_sorted<T, K, F>(items: &mut Vec<T>, item: T, key: F) -> usize
where
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    let item_key = key(&item);
    let idx = items.partition_point(|existing| key(existing) <= item_key);
    items.insert(idx, item);
    idx
}

/// Order items so that every item appears after the items it references.
///
/// `deps(item)` yields the keys of the items that must precede it. A depth-first search marks
/// nodes in progress; re-entering an in-progress node (a reference cycle) is treated as a no-op,
/// short-circuiting the cycle. Items whose referenced keys are absent simply have those references
/// ignored. The sort is stable for independent items.
pub fn sort_by_references<T, K, FK, FD>(items: Vec<T>, item_key: FK, deps: FD) -> Vec<T>
where
    K: Eq + Hash + Copy,
    FK: Fn(&T) -> K,
    FD: Fn(&T) -> Vec<K>,
{
    #[derive(Copy, Clone, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let index_of: HashMap<K, usize> =
        items.iter().enumerate().map(|(i, item)| (item_key(item), i)).collect();

    let mut marks = vec![Mark::Unvisited; items.len()];
    let mut order = Vec::with_capacity(items.len());

    fn visit<T, K, FD>(
        idx: usize,
        items: &[T],
        index_of: &HashMap<K, usize>,
        deps: &FD,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) where
        K: Eq + Hash + Copy,
        FD: Fn(&T) -> Vec<K>,
    {
        match marks[idx] {
            Mark::Done | Mark::InProgress => return,
            Mark::Unvisited => (),
        }

        marks[idx] = Mark::InProgress;

        for dep in deps(&items[idx]) {
            if let Some(&dep_idx) = index_of.get(&dep) {
                visit(dep_idx, items, index_of, deps, marks, order);
            }
        }

        marks[idx] = Mark::Done;
        order.push(idx);
    }

    for idx in 0..items.len() {
        visit(idx, &items, &index_of, &deps, &mut marks, &mut order);
    }

    // Reorder the items by the computed order.
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order.into_iter().map(|idx| slots[idx].take().unwrap()).collect()
}

#[cfg(test)]
mod tests {
    use super::{binary_search_less_or_equal, insert_sorted, sort_by_references};

    #[test]
    fn verify_binary_search_less_or_equal() {
        let items = [1, 3, 3, 7, 9];

        assert_eq!(binary_search_less_or_equal(&items, 0, |&x| x), None);
        assert_eq!(binary_search_less_or_equal(&items, 1, |&x| x), Some(0));
        assert_eq!(binary_search_less_or_equal(&items, 3, |&x| x), Some(2));
        assert_eq!(binary_search_less_or_equal(&items, 8, |&x| x), Some(3));
        assert_eq!(binary_search_less_or_equal(&items, 100, |&x| x), Some(4));
    }

    #[test]
    fn verify_insert_sorted() {
        let mut items = vec![1, 3, 7];
        insert_sorted(&mut items, 5, |&x| x);
        insert_sorted(&mut items, 0, |&x| x);
        insert_sorted(&mut items, 9, |&x| x);
        assert_eq!(items, vec![0, 1, 3, 5, 7, 9]);
    }

    #[test]
    fn verify_reference_sort() {
        // Blocks at t0..t6 where t2 references t0 and t4, t4 references t0, t6 references t4.
        // Decode order must place every referenced block before its referrer.
        let blocks = vec![(0i64, vec![]), (2, vec![0, 4]), (4, vec![0]), (6, vec![4])];

        let sorted = sort_by_references(blocks, |b| b.0, |b| b.1.clone());
        let times: Vec<i64> = sorted.iter().map(|b| b.0).collect();

        let pos = |t: i64| times.iter().position(|&x| x == t).unwrap();
        assert!(pos(0) < pos(2));
        assert!(pos(0) < pos(4));
        assert!(pos(4) < pos(2));
        assert!(pos(4) < pos(6));
    }

    #[test]
    fn verify_reference_cycle_short_circuits() {
        let blocks = vec![(0i64, vec![1]), (1, vec![0])];
        let sorted = sort_by_references(blocks, |b| b.0, |b| b.1.clone());
        assert_eq!(sorted.len(), 2);
    }
}
