use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::ConfigError;

/// BOLD 默认的七级分类阶元，由粗到细
pub const DEFAULT_RANKS: [&str; 7] = ["kingdom", "phylum", "class", "order", "family", "genus", "species"];

/// 分类阶元在 [`RankSchema`] 中的位置。0 为最粗的阶元。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(usize);

impl Rank {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// 有序、有限的阶元表（coarsest first）。
///
/// 构造时拒绝空表、空名称和重复名称，之后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankSchema {
    names: Vec<String>,
}

impl RankSchema {
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(|s| s.into().trim().to_string()).collect();
        if names.is_empty() {
            return Err(ConfigError::EmptySchema);
        }
        let mut seen = HashSet::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(ConfigError::EmptyRankName(i));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateRank(name.clone()));
            }
        }
        Ok(Self { names })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 按名称查找阶元
    pub fn rank(&self, name: &str) -> Option<Rank> {
        self.names.iter().position(|n| n == name).map(Rank)
    }

    pub fn name(&self, rank: Rank) -> &str {
        &self.names[rank.0]
    }

    pub fn coarsest(&self) -> Rank {
        Rank(0)
    }

    pub fn finest(&self) -> Rank {
        Rank(self.names.len() - 1)
    }

    pub fn coarser(&self, rank: Rank) -> Option<Rank> {
        rank.0.checked_sub(1).map(Rank)
    }

    pub fn finer(&self, rank: Rank) -> Option<Rank> {
        let next = rank.0 + 1;
        (next < self.names.len()).then_some(Rank(next))
    }

    /// Coarser ranks order before finer ones.
    pub fn compare(&self, a: Rank, b: Rank) -> Ordering {
        a.0.cmp(&b.0)
    }

    /// All ranks, coarsest first. Use `.rev()` to walk finest first.
    pub fn ranks(&self) -> impl DoubleEndedIterator<Item = Rank> + ExactSizeIterator {
        (0..self.names.len()).map(Rank)
    }
}

impl Default for RankSchema {
    fn default() -> Self {
        Self { names: DEFAULT_RANKS.iter().map(|r| r.to_string()).collect() }
    }
}
