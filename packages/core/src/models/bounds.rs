//! Interval Algebra for Nested-Set Bounds
//!
//! Every indexed node owns an interval `[left, right]`. Containment of
//! intervals encodes ancestry, so ancestor/descendant/subtree questions
//! reduce to integer comparisons.
//!
//! Everything in this module is pure: no storage, no clocks, no locks. The
//! SQL in `db::database` mirrors the shift arithmetic defined here, and the
//! property tests exercise both against each other.
//!
//! # Invariants (per tenant)
//!
//! 1. `left < right` for every node
//! 2. Any two intervals are either disjoint or strictly nested
//! 3. A node's parent is the innermost interval that strictly contains it

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Left/right bounds of one node in the nested-set index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i64,
    pub right: i64,
}

/// How two intervals relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `a` ends before `b` starts
    Before,
    /// `a` starts after `b` ends
    After,
    /// `a` strictly contains `b` (a is an ancestor of b)
    Contains,
    /// `b` strictly contains `a` (a is a descendant of b)
    ContainedBy,
    /// Same bounds (only legal when comparing a node with itself)
    Identical,
    /// Intervals cross without nesting. Always corruption.
    PartialOverlap,
}

impl Bounds {
    pub const fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    /// Bounds of a leaf starting at `left`
    pub const fn leaf(left: i64) -> Self {
        Self {
            left,
            right: left + 1,
        }
    }

    /// `left < right`
    pub fn is_well_formed(&self) -> bool {
        self.left < self.right
    }

    /// Number of integer slots the interval occupies (`right - left + 1`)
    ///
    /// Always even for an index built by rebuild/insert: a subtree of `n`
    /// nodes has width `2n`.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Number of nodes in the subtree rooted here (including itself)
    pub fn subtree_size(&self) -> i64 {
        self.width() / 2
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }

    /// `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Bounds) -> bool {
        self.left < other.left && other.right < self.right
    }

    pub fn is_descendant_of(&self, other: &Bounds) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn is_disjoint_from(&self, other: &Bounds) -> bool {
        self.right < other.left || other.right < self.left
    }

    /// Whether `value` falls inside the closed interval
    pub fn covers(&self, value: i64) -> bool {
        self.left <= value && value <= self.right
    }

    pub fn relation_to(&self, other: &Bounds) -> Relation {
        if self == other {
            Relation::Identical
        } else if self.right < other.left {
            Relation::Before
        } else if other.right < self.left {
            Relation::After
        } else if self.is_ancestor_of(other) {
            Relation::Contains
        } else if other.is_ancestor_of(self) {
            Relation::ContainedBy
        } else {
            Relation::PartialOverlap
        }
    }

    /// Bounds after a child is appended under a parent whose old right bound was `anchor`
    ///
    /// Mirrors the two shift statements run by insert:
    /// `right >= anchor` moves by 2, `left > anchor` moves by 2.
    pub fn shifted_for_insert(&self, anchor: i64) -> Bounds {
        Bounds {
            left: if self.left > anchor {
                self.left + 2
            } else {
                self.left
            },
            right: if self.right >= anchor {
                self.right + 2
            } else {
                self.right
            },
        }
    }

    /// Bounds after the subtree `removed` is deleted
    ///
    /// Mirror image of [`Bounds::shifted_for_insert`]: everything past
    /// `removed.right` contracts by the removed width.
    pub fn shifted_for_delete(&self, removed: &Bounds) -> Bounds {
        let width = removed.width();
        Bounds {
            left: if self.left > removed.right {
                self.left - width
            } else {
                self.left
            },
            right: if self.right > removed.right {
                self.right - width
            } else {
                self.right
            },
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.left, self.right)
    }
}

impl PartialOrd for Bounds {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Preorder: by left bound
impl Ord for Bounds {
    fn cmp(&self, other: &Self) -> Ordering {
        self.left
            .cmp(&other.left)
            .then_with(|| self.right.cmp(&other.right))
    }
}

/// Innermost interval among `candidates` that strictly contains `target`
///
/// Among all ancestors the parent is the one with the largest left bound.
pub fn parent_candidate<'a, T>(
    target: &Bounds,
    candidates: impl IntoIterator<Item = &'a T>,
    bounds_of: impl Fn(&T) -> Bounds,
) -> Option<&'a T>
where
    T: 'a,
{
    candidates
        .into_iter()
        .filter(|c| bounds_of(*c).is_ancestor_of(target))
        .max_by_key(|c| bounds_of(*c).left)
}

/// Count of intervals in `all` that strictly contain `target`
pub fn depth_of<'a>(target: &Bounds, all: impl IntoIterator<Item = &'a Bounds>) -> usize {
    all.into_iter().filter(|b| b.is_ancestor_of(target)).count()
}

/// Depth of every interval in `sorted`, which must be ordered by left bound
///
/// Linear alternative to calling [`depth_of`] per node: keeps a stack of the
/// intervals still open at the current position.
pub fn preorder_depths(sorted: &[Bounds]) -> Vec<usize> {
    let mut open: Vec<Bounds> = Vec::new();
    let mut depths = Vec::with_capacity(sorted.len());
    for bounds in sorted {
        while let Some(top) = open.last() {
            if top.is_ancestor_of(bounds) {
                break;
            }
            open.pop();
        }
        depths.push(open.len());
        open.push(*bounds);
    }
    depths
}

/// One row handed to [`verify_forest`]
#[derive(Debug, Clone, Copy)]
pub struct IndexedEntry<'a> {
    pub id: &'a str,
    pub parent_id: Option<&'a str>,
    pub bounds: Bounds,
}

/// First invariant violation found in a tenant's index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Malformed {
        id: String,
        bounds: Bounds,
    },
    SharedBound {
        first: String,
        second: String,
        value: i64,
    },
    Overlap {
        first: String,
        second: String,
    },
    ParentMismatch {
        id: String,
        stored_parent: Option<String>,
        innermost_container: Option<String>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Malformed { id, bounds } => {
                write!(f, "node '{}' has malformed bounds {}", id, bounds)
            }
            Violation::SharedBound {
                first,
                second,
                value,
            } => write!(
                f,
                "nodes '{}' and '{}' both use bound value {}",
                first, second, value
            ),
            Violation::Overlap { first, second } => write!(
                f,
                "intervals of '{}' and '{}' partially overlap",
                first, second
            ),
            Violation::ParentMismatch {
                id,
                stored_parent,
                innermost_container,
            } => write!(
                f,
                "node '{}' has parent {:?} but its innermost container is {:?}",
                id, stored_parent, innermost_container
            ),
        }
    }
}

/// Check invariants 1-3 over one tenant's rows
///
/// Runs in `O(n log n)`: sort by left bound, then sweep with a stack of open
/// intervals. The top of the stack when a node is reached is its innermost
/// container, which must agree with the stored parent pointer.
pub fn verify_forest(entries: &[IndexedEntry<'_>]) -> Result<(), Violation> {
    let mut sorted: Vec<&IndexedEntry<'_>> = entries.iter().collect();
    sorted.sort_by_key(|e| e.bounds);

    let mut seen_values = std::collections::HashMap::with_capacity(entries.len() * 2);
    for entry in &sorted {
        if !entry.bounds.is_well_formed() {
            return Err(Violation::Malformed {
                id: entry.id.to_string(),
                bounds: entry.bounds,
            });
        }
        for value in [entry.bounds.left, entry.bounds.right] {
            if let Some(other) = seen_values.insert(value, entry.id) {
                return Err(Violation::SharedBound {
                    first: other.to_string(),
                    second: entry.id.to_string(),
                    value,
                });
            }
        }
    }

    let mut open: Vec<&IndexedEntry<'_>> = Vec::new();
    for entry in sorted {
        while let Some(top) = open.last() {
            match top.bounds.relation_to(&entry.bounds) {
                Relation::Contains => break,
                Relation::Before => {
                    open.pop();
                }
                _ => {
                    return Err(Violation::Overlap {
                        first: top.id.to_string(),
                        second: entry.id.to_string(),
                    })
                }
            }
        }

        let container = open.last().map(|top| top.id);
        if container != entry.parent_id {
            return Err(Violation::ParentMismatch {
                id: entry.id.to_string(),
                stored_parent: entry.parent_id.map(str::to_string),
                innermost_container: container.map(str::to_string),
            });
        }
        open.push(entry);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<(&'static str, Option<&'static str>, Bounds)> {
        vec![
            ("1", None, Bounds::new(1, 20)),
            ("2", Some("1"), Bounds::new(2, 9)),
            ("3", Some("2"), Bounds::new(3, 4)),
            ("4", Some("2"), Bounds::new(5, 6)),
            ("5", Some("2"), Bounds::new(7, 8)),
            ("6", Some("1"), Bounds::new(10, 19)),
            ("7", Some("6"), Bounds::new(11, 14)),
            ("8", Some("7"), Bounds::new(12, 13)),
            ("9", Some("6"), Bounds::new(15, 16)),
            ("10", Some("6"), Bounds::new(17, 18)),
        ]
    }

    fn entries<'a>(
        rows: &'a [(&'static str, Option<&'static str>, Bounds)],
    ) -> Vec<IndexedEntry<'a>> {
        rows.iter()
            .map(|(id, parent_id, bounds)| IndexedEntry {
                id,
                parent_id: *parent_id,
                bounds: *bounds,
            })
            .collect()
    }

    #[test]
    fn test_is_ancestor_is_strict() {
        let outer = Bounds::new(1, 20);
        let inner = Bounds::new(12, 13);
        assert!(outer.is_ancestor_of(&inner));
        assert!(inner.is_descendant_of(&outer));
        assert!(!inner.is_ancestor_of(&outer));
        assert!(!outer.is_ancestor_of(&outer));
    }

    #[test]
    fn test_relation_covers_every_case() {
        let a = Bounds::new(2, 9);
        assert_eq!(a.relation_to(&Bounds::new(10, 19)), Relation::Before);
        assert_eq!(a.relation_to(&Bounds::new(0, 1)), Relation::After);
        assert_eq!(a.relation_to(&Bounds::new(3, 4)), Relation::Contains);
        assert_eq!(a.relation_to(&Bounds::new(1, 20)), Relation::ContainedBy);
        assert_eq!(a.relation_to(&a), Relation::Identical);
        assert_eq!(a.relation_to(&Bounds::new(5, 12)), Relation::PartialOverlap);
    }

    #[test]
    fn test_width_and_subtree_size() {
        assert_eq!(Bounds::new(1, 20).width(), 20);
        assert_eq!(Bounds::new(1, 20).subtree_size(), 10);
        assert!(Bounds::leaf(12).is_leaf());
        assert_eq!(Bounds::leaf(12), Bounds::new(12, 13));
    }

    #[test]
    fn test_parent_candidate_picks_innermost() {
        let rows = fixture();
        let flash = Bounds::new(12, 13);
        let parent = parent_candidate(&flash, rows.iter(), |r| r.2).unwrap();
        assert_eq!(parent.0, "7");

        let root = Bounds::new(1, 20);
        assert!(parent_candidate(&root, rows.iter(), |r| r.2).is_none());
    }

    #[test]
    fn test_depth_of_counts_ancestors() {
        let rows = fixture();
        let all: Vec<Bounds> = rows.iter().map(|r| r.2).collect();
        assert_eq!(depth_of(&Bounds::new(1, 20), &all), 0);
        assert_eq!(depth_of(&Bounds::new(2, 9), &all), 1);
        assert_eq!(depth_of(&Bounds::new(12, 13), &all), 3);
    }

    #[test]
    fn test_preorder_depths_matches_depth_of() {
        let rows = fixture();
        let mut all: Vec<Bounds> = rows.iter().map(|r| r.2).collect();
        all.sort();
        let fast = preorder_depths(&all);
        let slow: Vec<usize> = all.iter().map(|b| depth_of(b, &all)).collect();
        assert_eq!(fast, slow);
        assert_eq!(fast, vec![0, 1, 2, 2, 2, 1, 2, 3, 2, 2]);
    }

    #[test]
    fn test_preorder_depths_handles_forest() {
        let all = vec![Bounds::new(1, 4), Bounds::new(2, 3), Bounds::new(5, 6)];
        assert_eq!(preorder_depths(&all), vec![0, 1, 0]);
    }

    #[test]
    fn test_insert_shift_grows_ancestors_only() {
        // Appending under TELEVISIONS (2, 9): anchor is 9
        let anchor = 9;
        assert_eq!(
            Bounds::new(1, 20).shifted_for_insert(anchor),
            Bounds::new(1, 22)
        );
        assert_eq!(
            Bounds::new(2, 9).shifted_for_insert(anchor),
            Bounds::new(2, 11)
        );
        assert_eq!(
            Bounds::new(7, 8).shifted_for_insert(anchor),
            Bounds::new(7, 8)
        );
        assert_eq!(
            Bounds::new(10, 19).shifted_for_insert(anchor),
            Bounds::new(12, 21)
        );
    }

    #[test]
    fn test_delete_shift_is_inverse_of_insert_shift() {
        let anchor = 9;
        let inserted = Bounds::leaf(anchor);
        for (_, _, bounds) in fixture() {
            let grown = bounds.shifted_for_insert(anchor);
            assert_eq!(grown.shifted_for_delete(&inserted), bounds);
        }
    }

    #[test]
    fn test_verify_forest_accepts_fixture() {
        let rows = fixture();
        assert_eq!(verify_forest(&entries(&rows)), Ok(()));
    }

    #[test]
    fn test_verify_forest_rejects_partial_overlap() {
        let rows = vec![
            ("a", None, Bounds::new(1, 6)),
            ("b", None, Bounds::new(4, 9)),
        ];
        let result = verify_forest(&entries(&rows));
        assert!(matches!(result, Err(Violation::Overlap { .. })));
    }

    #[test]
    fn test_verify_forest_rejects_malformed_bounds() {
        let rows = vec![("a", None, Bounds::new(5, 5))];
        let result = verify_forest(&entries(&rows));
        assert!(matches!(result, Err(Violation::Malformed { .. })));
    }

    #[test]
    fn test_verify_forest_rejects_shared_bound() {
        let rows = vec![
            ("a", None, Bounds::new(1, 4)),
            ("b", Some("a"), Bounds::new(2, 4)),
        ];
        let result = verify_forest(&entries(&rows));
        assert!(matches!(result, Err(Violation::SharedBound { .. })));
    }

    #[test]
    fn test_verify_forest_rejects_wrong_parent_pointer() {
        let mut rows = fixture();
        // FLASH claims PORTABLE ELECTRONICS but sits inside MP3 PLAYERS
        rows[7].1 = Some("6");
        let result = verify_forest(&entries(&rows));
        assert_eq!(
            result,
            Err(Violation::ParentMismatch {
                id: "8".to_string(),
                stored_parent: Some("6".to_string()),
                innermost_container: Some("7".to_string()),
            })
        );
    }
}
