//! Trie data structure for MQTT topic filter matching.
//!
//! Supports MQTT wildcards:
//! - `+` matches exactly one topic level
//! - `#` matches any number of remaining topic levels (must be last)
//!
//! A lookup returns the values of every filter that matches the topic.

use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::topic::validate_filter;

/// Trie node for MQTT topic filter matching.
pub struct TrieNode<T> {
    children: HashMap<String, TrieNode<T>>,
    match_any: Option<Box<TrieNode<T>>>, // + wildcard
    match_all: Vec<T>,                   // # wildcard
    values: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrieNode<T> {
    /// Create a new empty trie node.
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
            match_any: None,
            match_all: Vec::new(),
            values: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.match_all.is_empty()
            && self.match_any.is_none()
            && self.children.is_empty()
    }

    /// Value list stored for the filter spelled by `levels`, creating
    /// nodes on the way. The filter must already be validated.
    fn entry<'s, I>(&mut self, mut levels: I) -> &mut Vec<T>
    where
        I: Iterator<Item = &'s str>,
    {
        match levels.next() {
            None => &mut self.values,
            Some("#") => &mut self.match_all,
            Some("+") => self
                .match_any
                .get_or_insert_with(|| Box::new(TrieNode::new()))
                .entry(levels),
            Some(level) => self
                .children
                .entry(level.to_string())
                .or_default()
                .entry(levels),
        }
    }

    fn remove_where<'a, I, F>(&mut self, mut levels: I, pred: &F) -> usize
    where
        I: Iterator<Item = &'a str>,
        F: Fn(&T) -> bool,
    {
        match levels.next() {
            None => retain_not(&mut self.values, pred),
            Some("#") => retain_not(&mut self.match_all, pred),
            Some("+") => match self.match_any.as_mut() {
                Some(node) => {
                    let n = node.remove_where(levels, pred);
                    if node.is_empty() {
                        self.match_any = None;
                    }
                    n
                }
                None => 0,
            },
            Some(level) => match self.children.get_mut(level) {
                Some(node) => {
                    let n = node.remove_where(levels, pred);
                    if node.is_empty() {
                        self.children.remove(level);
                    }
                    n
                }
                None => 0,
            },
        }
    }

    fn collect<'a>(&'a self, levels: &[&str], at_root: bool, out: &mut Vec<&'a T>) {
        // $ topics only match explicit $ filters, never
        // root-level wildcards
        let dollar = at_root && levels.first().is_some_and(|l| l.starts_with('$'));

        if !dollar {
            out.extend(self.match_all.iter());
        }

        let Some((first, rest)) = levels.split_first() else {
            out.extend(self.values.iter());
            return;
        };

        if let Some(child) = self.children.get(*first) {
            child.collect(rest, false, out);
        }
        if !dollar {
            if let Some(ref match_any) = self.match_any {
                match_any.collect(rest, false, out);
            }
        }
    }
}

fn retain_not<T, F: Fn(&T) -> bool>(values: &mut Vec<T>, pred: &F) -> usize {
    let before = values.len();
    values.retain(|v| !pred(v));
    before - values.len()
}

/// Topic filter trie.
pub struct Trie<T> {
    root: TrieNode<T>,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    /// Create a new empty trie.
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
        }
    }

    /// Insert a value under the given filter, replacing any value for which
    /// `same` returns true.
    pub fn replace<F>(&mut self, filter: &str, value: T, same: F) -> Result<()>
    where
        F: Fn(&T) -> bool,
    {
        validate_filter(filter)?;
        let values = self.root.entry(filter.split('/'));
        values.retain(|v| !same(v));
        values.push(value);
        Ok(())
    }

    /// Remove every value stored under `filter` for which `pred` returns
    /// true. Returns the number of removed values.
    pub fn remove<F>(&mut self, filter: &str, pred: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.root.remove_where(filter.split('/'), &pred)
    }

    /// Get the values of every filter matching `topic`.
    pub fn matches(&self, topic: &str) -> Vec<&T> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut out = Vec::new();
        self.root.collect(&levels, true, &mut out);
        out
    }

    /// Reports whether the trie holds no values.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

impl<T> fmt::Debug for Trie<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn count<T>(node: &TrieNode<T>) -> usize {
            node.values.len()
                + node.match_all.len()
                + node.match_any.as_deref().map_or(0, count)
                + node.children.values().map(count).sum::<usize>()
        }
        f.debug_struct("Trie").field("values", &count(&self.root)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<T> Trie<T> {
        fn insert(&mut self, filter: &str, value: T) -> Result<()> {
            self.replace(filter, value, |_| false)
        }
    }

    fn sorted(mut v: Vec<&i32>) -> Vec<i32> {
        v.sort();
        v.into_iter().copied().collect()
    }

    #[test]
    fn test_trie_collects_all_matches() {
        let mut trie = Trie::new();
        trie.insert("device/status/A1/1/STATE", 1).unwrap();
        trie.insert("device/status/+/+/STATE", 2).unwrap();
        trie.insert("device/#", 3).unwrap();
        trie.insert("#", 4).unwrap();
        trie.insert("sysvar/#", 5).unwrap();

        assert_eq!(sorted(trie.matches("device/status/A1/1/STATE")), vec![1, 2, 3, 4]);
        assert_eq!(sorted(trie.matches("device/status/A1/2/LEVEL")), vec![3, 4]);
        assert_eq!(sorted(trie.matches("device")), vec![3, 4]);
        assert_eq!(sorted(trie.matches("sysvar/status/42")), vec![4, 5]);
    }

    #[test]
    fn test_trie_dollar_topics() {
        let mut trie = Trie::new();
        trie.insert("#", 1).unwrap();
        trie.insert("+/broker", 2).unwrap();
        trie.insert("$SYS/#", 3).unwrap();

        assert_eq!(sorted(trie.matches("$SYS/broker")), vec![3]);
    }

    #[test]
    fn test_trie_remove_prunes() {
        let mut trie = Trie::new();
        trie.insert("a/+/c", 1).unwrap();
        trie.insert("a/+/c", 2).unwrap();
        trie.insert("a/#", 3).unwrap();

        assert_eq!(trie.remove("a/+/c", |v| *v == 1), 1);
        assert_eq!(sorted(trie.matches("a/b/c")), vec![2, 3]);
        assert_eq!(trie.remove("a/+/c", |_| true), 1);
        assert_eq!(trie.remove("a/#", |_| true), 1);
        assert_eq!(trie.remove("x/y", |_| true), 0);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_trie_replace() {
        let mut trie = Trie::new();
        trie.insert("a/b", (1, 'x')).unwrap();
        trie.replace("a/b", (1, 'y'), |v| v.0 == 1).unwrap();
        let got: Vec<_> = trie.matches("a/b").into_iter().copied().collect();
        assert_eq!(got, vec![(1, 'y')]);
    }

    #[test]
    fn test_trie_rejects_invalid_filter() {
        let mut trie: Trie<i32> = Trie::new();
        assert!(trie.insert("a/#/b", 1).is_err());
        assert!(trie.insert("", 1).is_err());
    }
}
