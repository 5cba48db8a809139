use crate::config::ConfigError;

use super::rank::Rank;

/// 单条记录的谱系：每个阶元一个可缺失的标签。
///
/// 构造时空字符串被视为缺失，因此 `Some(label)` 永远非空。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lineage {
    labels: Vec<Option<String>>,
}

impl Lineage {
    pub fn new(labels: Vec<Option<String>>) -> Self {
        let labels = labels
            .into_iter()
            .map(|l| l.filter(|s| !s.is_empty()))
            .collect();
        Self { labels }
    }

    /// Builds a lineage from plain strings; `""` marks a missing rank.
    pub fn from_strs(labels: &[&str]) -> Self {
        Self::new(labels.iter().map(|s| Some(s.to_string())).collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn get(&self, rank: Rank) -> Option<&str> {
        self.labels.get(rank.index()).and_then(|l| l.as_deref())
    }

    pub fn labels(&self) -> &[Option<String>] {
        &self.labels
    }

    /// Labels at every rank coarser than `rank`.
    pub fn ancestry(&self, rank: Rank) -> &[Option<String>] {
        &self.labels[..rank.index()]
    }

    /// Labels from the coarsest rank down to and including `rank`.
    pub fn path(&self, rank: Rank) -> &[Option<String>] {
        &self.labels[..=rank.index()]
    }

    /// Label at the rank immediately coarser than `rank`.
    pub fn parent(&self, rank: Rank) -> Option<&str> {
        let idx = rank.index().checked_sub(1)?;
        self.labels[idx].as_deref()
    }

    pub(crate) fn set(&mut self, rank: Rank, label: Option<String>) {
        self.labels[rank.index()] = label.filter(|s| !s.is_empty());
    }

    /// 分号连接的谱系字符串，缺失阶元留空（用于日志）
    pub fn joined(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// 一条标本记录。引擎只产生派生副本，从不原地修改输入。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub seq: String,
    pub lineage: Lineage,
    pub bin: Option<String>,
}

/// 填充标签的书写格式：`base + separator + marker * run`，例如 `Hermaeidae_XX`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillStyle {
    separator: String,
    marker: char,
}

impl FillStyle {
    pub fn new(separator: impl Into<String>, marker: char) -> Result<Self, ConfigError> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        if marker.is_whitespace() || separator.contains(marker) {
            return Err(ConfigError::Marker(marker.to_string()));
        }
        Ok(Self { separator, marker })
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn marker(&self) -> char {
        self.marker
    }

    pub fn label(&self, base: &str, run: usize) -> String {
        let mut out = String::with_capacity(base.len() + self.separator.len() + run);
        out.push_str(base);
        out.push_str(&self.separator);
        out.extend(std::iter::repeat(self.marker).take(run));
        out
    }

    /// Splits a filled label into `(base, run)`. Returns `None` for original labels.
    pub fn parse<'a>(&self, label: &'a str) -> Option<(&'a str, usize)> {
        let trimmed = label.trim_end_matches(self.marker);
        let run = (label.len() - trimmed.len()) / self.marker.len_utf8();
        if run == 0 {
            return None;
        }
        let base = trimmed.strip_suffix(self.separator.as_str())?;
        if base.is_empty() {
            return None;
        }
        Some((base, run))
    }

    #[inline]
    pub fn is_filled(&self, label: &str) -> bool {
        self.parse(label).is_some()
    }

    /// Re-derives a filled label after its base was renamed. `None` if `label`
    /// was not synthesized from `old_base`.
    pub fn rebase(&self, label: &str, old_base: &str, new_base: &str) -> Option<String> {
        match self.parse(label) {
            Some((base, run)) if base == old_base => Some(self.label(new_base, run)),
            _ => None,
        }
    }
}

impl Default for FillStyle {
    fn default() -> Self {
        Self { separator: "_".to_string(), marker: 'X' }
    }
}
