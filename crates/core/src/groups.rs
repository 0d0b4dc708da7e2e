//! Group membership diffing.

use rustc_hash::FxHashSet;

/// Membership changes needed to turn `current` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDiff {
    /// Groups in `desired` but not in `current`, in `desired` scan order.
    pub to_add: Vec<String>,
    /// Groups in `current` but not in `desired`, in `current` scan order.
    pub to_remove: Vec<String>,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool { self.to_add.is_empty() && self.to_remove.is_empty() }
}

/// Both inputs are treated as sets; duplicates collapse onto their first occurrence.
pub fn diff_groups<S: AsRef<str>>(desired: &[S], current: &[S]) -> GroupDiff {
    let want: FxHashSet<&str> = desired.iter().map(|g| g.as_ref()).collect();
    let have: FxHashSet<&str> = current.iter().map(|g| g.as_ref()).collect();
    GroupDiff { to_add: left_difference(desired, &have), to_remove: left_difference(current, &want) }
}

fn left_difference<S: AsRef<str>>(left: &[S], right: &FxHashSet<&str>) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = Vec::new();
    for g in left.iter().map(|g| g.as_ref()) {
        if right.contains(g) || !seen.insert(g) { continue; }
        out.push(g.to_string());
    }
    out
}

/// Set equality over two membership lists, ignoring order and duplicates.
pub fn same_members<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    let left: FxHashSet<&str> = a.iter().map(|g| g.as_ref()).collect();
    let right: FxHashSet<&str> = b.iter().map(|g| g.as_ref()).collect();
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn v(items: &[&str]) -> Vec<String> { items.iter().map(|s| s.to_string()).collect() }

    fn apply(current: &[String], diff: &GroupDiff) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = current.iter().cloned().collect();
        out.extend(diff.to_add.iter().cloned());
        for g in &diff.to_remove { out.remove(g); }
        out
    }

    #[test]
    fn overlapping_sets_keep_scan_order() {
        let d = diff_groups(&v(&["c", "a", "d", "b"]), &v(&["b", "e", "a", "f"]));
        assert_eq!(d.to_add, v(&["c", "d"]));
        assert_eq!(d.to_remove, v(&["e", "f"]));
    }

    #[test]
    fn empty_desired_removes_everything() {
        let d = diff_groups(&v(&[]), &v(&["a", "b"]));
        assert!(d.to_add.is_empty());
        assert_eq!(d.to_remove, v(&["a", "b"]));
    }

    #[test]
    fn empty_current_adds_everything() {
        let d = diff_groups(&v(&["a", "b"]), &v(&[]));
        assert_eq!(d.to_add, v(&["a", "b"]));
        assert!(d.to_remove.is_empty());
    }

    #[test]
    fn identical_sets_are_a_noop() {
        let d = diff_groups(&v(&["a", "b"]), &v(&["b", "a"]));
        assert!(d.is_empty());
    }

    #[test]
    fn disjoint_sets_swap_fully() {
        let d = diff_groups(&v(&["a", "b"]), &v(&["x", "y"]));
        assert_eq!(d.to_add, v(&["a", "b"]));
        assert_eq!(d.to_remove, v(&["x", "y"]));
    }

    #[test]
    fn duplicates_produce_single_calls() {
        let d = diff_groups(&v(&["a", "a", "b", "a"]), &v(&["c", "c", "b"]));
        assert_eq!(d.to_add, v(&["a"]));
        assert_eq!(d.to_remove, v(&["c"]));
    }

    #[test]
    fn applying_the_diff_reaches_desired() {
        let cases: Vec<(Vec<String>, Vec<String>)> = vec![
            (v(&[]), v(&[])),
            (v(&["a"]), v(&[])),
            (v(&[]), v(&["a"])),
            (v(&["a", "b", "c"]), v(&["c", "d"])),
            (v(&["dns-management", "test-group"]), v(&["test-group", "admins", "admins"])),
        ];
        for (desired, current) in cases {
            let d = diff_groups(&desired, &current);
            let want: BTreeSet<String> = desired.iter().cloned().collect();
            assert_eq!(apply(&current, &d), want, "desired={:?} current={:?}", desired, current);
            assert!(d.to_add.iter().all(|g| !current.contains(g)));
            assert!(d.to_remove.iter().all(|g| !desired.contains(g)));
        }
    }

    #[test]
    fn same_members_ignores_order_and_duplicates() {
        assert!(same_members(&v(&["a", "b"]), &v(&["b", "a", "a"])));
        assert!(!same_members(&v(&["a"]), &v(&["a", "b"])));
    }
}
