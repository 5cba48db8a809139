use std::collections::HashMap;
use std::hash::Hash;

/// 频数统计，保留键的首次出现顺序。
///
/// `top()` 在并列最大值时返回最先出现的键，保证结果可复现。
#[derive(Debug, Clone)]
pub struct Tally<K> {
    counts: Vec<(K, usize)>,
    index: HashMap<K, usize>,
    total: usize,
}

impl<K: Hash + Eq + Clone> Tally<K> {
    pub fn new() -> Self {
        Self { counts: Vec::new(), index: HashMap::new(), total: 0 }
    }

    pub fn add(&mut self, key: K) {
        self.total += 1;
        match self.index.get(&key) {
            Some(&slot) => self.counts[slot].1 += 1,
            None => {
                self.index.insert(key.clone(), self.counts.len());
                self.counts.push((key, 1));
            }
        }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn top(&self) -> Option<(&K, usize)> {
        let mut best: Option<(&K, usize)> = None;
        for (key, n) in &self.counts {
            if best.map_or(true, |(_, b)| *n > b) {
                best = Some((key, *n));
            }
        }
        best
    }
}

impl<K: Hash + Eq + Clone> Default for Tally<K> {
    fn default() -> Self {
        Self::new()
    }
}
