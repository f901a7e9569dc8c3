//! Dense ordering arithmetic shared by the server and the client store.
//!
//! Every sortable item (a project inside a board, a task inside a project)
//! carries an integer order that is dense within its container: for `n`
//! siblings the orders are exactly `0..n`. Mutations never splice arrays;
//! they are expressed as [`Shift`]s, i.e. "add `delta` to every sibling whose
//! order lies in a range", which maps 1:1 onto a bulk SQL `UPDATE` and onto
//! an in-memory pass over the siblings.

use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

/// Bulk `order += delta` for siblings whose order lies in `from..=to`.
/// `to == None` means the range is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub from: i64,
    pub to: Option<i64>,
    pub delta: i64,
}

impl Shift {
    pub fn applies_to(&self, order: i64) -> bool {
        order >= self.from && self.to.is_none_or(|to| order <= to)
    }

    pub fn apply(&self, order: i64) -> i64 {
        if self.applies_to(order) {
            order + self.delta
        } else {
            order
        }
    }

    /// Upper bound usable in SQL (`i64::MAX` when unbounded).
    pub fn upper(&self) -> i64 {
        self.to.unwrap_or(i64::MAX)
    }
}

/// Closes the gap left by removing the item at `old`.
pub fn removal_shift(old: i64) -> Shift {
    Shift {
        from: old + 1,
        to: None,
        delta: -1,
    }
}

/// Opens a gap at `new` for an inserted item.
pub fn insertion_shift(new: i64) -> Shift {
    Shift {
        from: new,
        to: None,
        delta: 1,
    }
}

/// Shift for moving an item from `old` to `new` inside one container.
/// Returns `None` when the move is a no-op.
pub fn reorder_shift(old: i64, new: i64) -> Option<Shift> {
    use std::cmp::Ordering;
    match new.cmp(&old) {
        Ordering::Equal => None,
        Ordering::Greater => Some(Shift {
            from: old + 1,
            to: Some(new),
            delta: -1,
        }),
        Ordering::Less => Some(Shift {
            from: new,
            to: Some(old - 1),
            delta: 1,
        }),
    }
}

/// Sibling updates required to relocate one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePlan {
    Noop,
    Within { container: i64, shift: Shift },
    Across {
        source: i64,
        source_shift: Shift,
        dest: i64,
        dest_shift: Shift,
    },
}

impl MovePlan {
    /// Containers whose children change under this plan.
    pub fn touched(&self) -> Vec<i64> {
        match self {
            Self::Noop => Vec::new(),
            Self::Within { container, .. } => vec![*container],
            Self::Across { source, dest, .. } => vec![*source, *dest],
        }
    }
}

/// Plan the move of an item currently at `(from, old)` to `(to, new)`.
///
/// `old` must be read before any write; the plan is computed entirely from
/// that snapshot.
pub fn plan_move(from: i64, old: i64, to: i64, new: i64) -> MovePlan {
    if from == to {
        match reorder_shift(old, new) {
            Some(shift) => MovePlan::Within {
                container: from,
                shift,
            },
            None => MovePlan::Noop,
        }
    } else {
        MovePlan::Across {
            source: from,
            source_shift: removal_shift(old),
            dest: to,
            dest_shift: insertion_shift(new),
        }
    }
}

/// A reorder target must address an existing slot: `0..len`.
pub fn check_reorder_index(index: i64, len: i64) -> Result<(), BoardError> {
    if index < 0 || index >= len {
        return Err(BoardError::IndexOutOfRange { index, len });
    }
    Ok(())
}

/// An insertion target may also address the slot after the last item.
pub fn check_insert_index(index: i64, len: i64) -> Result<(), BoardError> {
    if index < 0 || index > len {
        return Err(BoardError::IndexOutOfRange { index, len });
    }
    Ok(())
}

/// Anything carrying a dense order inside a container.
pub trait Ordered {
    fn order(&self) -> i64;
    fn set_order(&mut self, order: i64);
}

/// Apply a shift to every item in a container, skipping `except` (the moved
/// item, whose order is assigned separately).
pub fn apply_shift<T, F>(items: &mut [T], shift: &Shift, mut except: F)
where
    T: Ordered,
    F: FnMut(&T) -> bool,
{
    for item in items.iter_mut() {
        if except(item) {
            continue;
        }
        let order = item.order();
        item.set_order(shift.apply(order));
    }
}

/// True when the orders are exactly `0..n` with no duplicates.
pub fn is_dense(orders: impl IntoIterator<Item = i64>) -> bool {
    let mut orders: Vec<i64> = orders.into_iter().collect();
    orders.sort_unstable();
    orders.iter().enumerate().all(|(i, o)| *o == i as i64)
}

/// Renumber items to `0..n`, keeping relative order. Ties keep their
/// incoming sequence, so callers sort by a stable secondary key first.
pub fn densify<T: Ordered>(items: &mut [T]) {
    items.sort_by_key(|item| item.order());
    for (i, item) in items.iter_mut().enumerate() {
        item.set_order(i as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: char,
        order: i64,
    }

    impl Ordered for Item {
        fn order(&self) -> i64 {
            self.order
        }
        fn set_order(&mut self, order: i64) {
            self.order = order;
        }
    }

    fn items(ids: &str) -> Vec<Item> {
        ids.chars()
            .enumerate()
            .map(|(i, id)| Item { id, order: i as i64 })
            .collect()
    }

    fn sequence(items: &[Item]) -> String {
        let mut sorted = items.to_vec();
        sorted.sort_by_key(|i| i.order);
        sorted.iter().map(|i| i.id).collect()
    }

    fn move_within(list: &mut [Item], id: char, new: i64) {
        let old = list.iter().find(|i| i.id == id).unwrap().order;
        if let Some(shift) = reorder_shift(old, new) {
            apply_shift(list, &shift, |i| i.id == id);
            list.iter_mut().find(|i| i.id == id).unwrap().order = new;
        }
    }

    #[test]
    fn test_reorder_shift_noop_when_index_unchanged() {
        assert_eq!(reorder_shift(2, 2), None);
        assert_eq!(plan_move(1, 2, 1, 2), MovePlan::Noop);
    }

    #[test]
    fn test_reorder_shift_downward_range() {
        let shift = reorder_shift(1, 3).unwrap();
        assert_eq!(shift, Shift { from: 2, to: Some(3), delta: -1 });
    }

    #[test]
    fn test_reorder_shift_upward_range() {
        let shift = reorder_shift(3, 1).unwrap();
        assert_eq!(shift, Shift { from: 1, to: Some(2), delta: 1 });
    }

    #[test]
    fn test_move_last_item_to_index_one() {
        let mut list = items("abcd");
        move_within(&mut list, 'd', 1);
        assert_eq!(sequence(&list), "adbc");
        assert!(is_dense(list.iter().map(|i| i.order)));
    }

    #[test]
    fn test_move_round_trip_restores_orders() {
        let original = items("abcde");
        let mut list = original.clone();
        move_within(&mut list, 'b', 4);
        assert_eq!(sequence(&list), "acdeb");
        move_within(&mut list, 'b', 1);
        assert_eq!(list, original);
    }

    #[test]
    fn test_removal_closes_gap() {
        let mut list = items("abcd");
        list.retain(|i| i.id != 'c');
        apply_shift(&mut list, &removal_shift(2), |_| false);
        assert_eq!(sequence(&list), "abd");
        assert!(is_dense(list.iter().map(|i| i.order)));
    }

    #[test]
    fn test_cross_container_plan_shifts_both_sides() {
        let plan = plan_move(1, 1, 2, 0);
        let MovePlan::Across { source_shift, dest_shift, .. } = plan else {
            panic!("expected cross-container plan");
        };
        let mut source = items("abc");
        let mut dest = items("xy");
        let moved = source.remove(1);
        apply_shift(&mut source, &source_shift, |_| false);
        apply_shift(&mut dest, &dest_shift, |_| false);
        dest.push(Item { id: moved.id, order: 0 });
        assert_eq!(sequence(&source), "ac");
        assert_eq!(sequence(&dest), "bxy");
        assert!(is_dense(source.iter().map(|i| i.order)));
        assert!(is_dense(dest.iter().map(|i| i.order)));
        assert_eq!(plan.touched(), vec![1, 2]);
    }

    #[test]
    fn test_index_validation_bounds() {
        assert!(check_reorder_index(0, 1).is_ok());
        assert!(check_reorder_index(1, 1).is_err());
        assert!(check_reorder_index(-1, 3).is_err());
        assert!(check_insert_index(3, 3).is_ok());
        assert!(check_insert_index(4, 3).is_err());
    }

    #[test]
    fn test_is_dense_rejects_gaps_and_duplicates() {
        assert!(is_dense(vec![2, 0, 1]));
        assert!(is_dense(Vec::<i64>::new()));
        assert!(!is_dense(vec![0, 2]));
        assert!(!is_dense(vec![0, 1, 1]));
    }

    #[test]
    fn test_densify_keeps_relative_order() {
        let mut list = vec![
            Item { id: 'a', order: 0 },
            Item { id: 'c', order: 5 },
            Item { id: 'b', order: 2 },
        ];
        densify(&mut list);
        assert_eq!(sequence(&list), "abc");
        assert!(is_dense(list.iter().map(|i| i.order)));
    }

    #[test]
    fn test_unbounded_shift_upper() {
        assert_eq!(insertion_shift(0).upper(), i64::MAX);
        assert!(insertion_shift(3).applies_to(1_000));
        assert!(!insertion_shift(3).applies_to(2));
    }
}
