//! Order-preserving grouping.

use std::collections::HashMap;
use std::hash::Hash;

/// Groups `items` by key, keeping groups in the order their key was first
/// seen and items in input order within each group.
pub(crate) fn group_first_seen<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a T>)> = Vec::new();

    for item in items {
        let k = key(item);
        if let Some(&idx) = index.get(&k) {
            groups[idx].1.push(item);
        } else {
            index.insert(k.clone(), groups.len());
            groups.push((k, vec![item]));
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_seen_order() {
        let items = ["b1", "a1", "b2", "c1", "a2"];
        let groups = group_first_seen(&items, |s| s.chars().next().unwrap_or_default());
        let keys: Vec<char> = groups.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!['b', 'a', 'c']);
        assert_eq!(groups[0].1, vec![&"b1", &"b2"]);
        assert_eq!(groups[1].1, vec![&"a1", &"a2"]);
    }
}
