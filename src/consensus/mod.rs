//! BIN 共识分类计算。
//!
//! 从最细阶元向最粗阶元逐级统计成员标签（`rank` 方法）或完整路径（`full` 方法）的
//! 频数，首个达到阈值的阶元即为共识阶元：更粗的阶元沿用代表成员的标签，更细的
//! 阶元标记为 `unresolved.<label>`。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::config::ConfigError;
use crate::taxonomy::{FillStyle, Lineage, Rank, RankSchema};

mod tally;

pub use tally::Tally;

pub const UNRESOLVED_PREFIX: &str = "unresolved.";

/// 共识计算方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Vote on the bare label at each rank.
    #[default]
    Rank,
    /// Vote on the full path from the coarsest rank down to each rank.
    Full,
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rank" => Ok(Self::Rank),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rank => f.write_str("rank"),
            Self::Full => f.write_str("full"),
        }
    }
}

/// 共识参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusOpt {
    /// Required share of eligible members, in percent, `(0, 100]`.
    pub threshold: f64,
    pub method: Method,
    /// Filled labels do not vote (the members still count for carrying labels).
    pub exclude_filled: bool,
}

impl Default for ConsensusOpt {
    fn default() -> Self {
        Self { threshold: 80.0, method: Method::Rank, exclude_filled: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Agreement met the threshold at this rank.
    Resolved,
    /// Coarser than the resolved rank, taken from a representative member.
    Carried,
    /// Finer than the resolved rank.
    Unresolved,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Carried => "carried",
            Self::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusLabel {
    pub label: Option<String>,
    pub origin: Origin,
}

/// 一个 BIN 的共识谱系
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusLineage {
    pub bin: String,
    pub labels: Vec<ConsensusLabel>,
    pub resolved_rank: Rank,
    /// Winning share at the resolved rank, in percent.
    pub share: f64,
    /// Number of eligible members that voted at the resolved rank.
    pub voters: usize,
    /// No rank reached the threshold; the coarsest rank was chosen by plurality.
    pub forced: bool,
}

impl ConsensusLineage {
    pub fn label(&self, rank: Rank) -> Option<&str> {
        self.labels.get(rank.index()).and_then(|l| l.label.as_deref())
    }

    pub fn origin(&self, rank: Rank) -> Option<Origin> {
        self.labels.get(rank.index()).map(|l| l.origin)
    }

    pub fn resolved_label(&self) -> Option<&str> {
        self.label(self.resolved_rank)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("BIN '{0}' has no members")]
    Empty(String),
    #[error("BIN '{0}' has no member with a label at the coarsest rank")]
    NoLabels(String),
}

#[inline]
fn vote_key(lineage: &Lineage, rank: Rank, method: Method) -> &[Option<String>] {
    match method {
        Method::Rank => &lineage.labels()[rank.index()..=rank.index()],
        Method::Full => lineage.path(rank),
    }
}

#[inline]
fn meets_threshold(count: usize, total: usize, threshold: f64) -> bool {
    count as f64 * 100.0 >= threshold * total as f64
}

/// 计算一个 BIN 的共识谱系。
///
/// `members` 的顺序即并列时的决胜顺序（先出现者胜）。若任何阶元都未达到阈值，
/// 则在最粗阶元上取相对多数（忽略 `exclude_filled`），并设置 `forced`。
pub fn calculate(
    bin: &str,
    members: &[&Lineage],
    schema: &RankSchema,
    style: &FillStyle,
    opt: &ConsensusOpt,
) -> Result<ConsensusLineage, ConsensusError> {
    if members.is_empty() {
        return Err(ConsensusError::Empty(bin.to_string()));
    }

    for rank in schema.ranks().rev() {
        let mut tally = Tally::new();
        for lineage in members {
            let Some(label) = lineage.get(rank) else { continue };
            if opt.exclude_filled && style.is_filled(label) {
                continue;
            }
            tally.add(vote_key(lineage, rank, opt.method));
        }

        let Some((key, count)) = tally.top() else {
            debug!("{}: no eligible labels at {}", bin, schema.name(rank));
            continue;
        };
        if meets_threshold(count, tally.total(), opt.threshold) {
            return Ok(resolve(bin, members, schema, rank, key, count, tally.total(), opt.method, false));
        }
        debug!(
            "{}: best {} label has {}/{} votes, below {}%",
            bin,
            schema.name(rank),
            count,
            tally.total(),
            opt.threshold
        );
    }

    let coarsest = schema.coarsest();
    let mut tally = Tally::new();
    for lineage in members {
        if lineage.get(coarsest).is_some() {
            tally.add(vote_key(lineage, coarsest, opt.method));
        }
    }
    let (key, count) = tally.top().ok_or_else(|| ConsensusError::NoLabels(bin.to_string()))?;
    Ok(resolve(bin, members, schema, coarsest, key, count, tally.total(), opt.method, true))
}

fn resolve(
    bin: &str,
    members: &[&Lineage],
    schema: &RankSchema,
    rank: Rank,
    key: &[Option<String>],
    count: usize,
    voters: usize,
    method: Method,
    forced: bool,
) -> ConsensusLineage {
    // the rank label closes both key shapes
    let winner = key.last().cloned().flatten();
    let unresolved = format!("{}{}", UNRESOLVED_PREFIX, winner.as_deref().unwrap_or_default());
    let representative = members.iter().find(|l| vote_key(l, rank, method) == key);

    let labels = schema
        .ranks()
        .map(|r| match schema.compare(r, rank) {
            Ordering::Less => ConsensusLabel {
                label: representative.and_then(|l| l.get(r)).map(str::to_string),
                origin: Origin::Carried,
            },
            Ordering::Equal => ConsensusLabel { label: winner.clone(), origin: Origin::Resolved },
            Ordering::Greater => ConsensusLabel { label: Some(unresolved.clone()), origin: Origin::Unresolved },
        })
        .collect();

    ConsensusLineage {
        bin: bin.to_string(),
        labels,
        resolved_rank: rank,
        share: count as f64 * 100.0 / voters as f64,
        voters,
        forced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineages(rows: &[(usize, &[&str])]) -> Vec<Lineage> {
        rows.iter()
            .flat_map(|&(n, labels)| std::iter::repeat(Lineage::from_strs(labels)).take(n))
            .collect()
    }

    fn run(members: &[Lineage], schema: &RankSchema, opt: ConsensusOpt) -> ConsensusLineage {
        let refs: Vec<&Lineage> = members.iter().collect();
        calculate("BOLD:TEST", &refs, schema, &FillStyle::default(), &opt).unwrap()
    }

    fn labels(c: &ConsensusLineage) -> Vec<&str> {
        c.labels.iter().map(|l| l.label.as_deref().unwrap_or("")).collect()
    }

    fn opt(threshold: f64, method: Method, exclude_filled: bool) -> ConsensusOpt {
        ConsensusOpt { threshold, method, exclude_filled }
    }

    fn mixed_species_bin() -> Vec<Lineage> {
        lineages(&[
            (4, &["K", "P", "C", "O", "F", "G", "S"]),
            (1, &["K", "P", "C", "O", "F", "G", "S2"]),
            (4, &["K", "P", "C", "O", "F", "G", "G_X"]),
        ])
    }

    #[test]
    fn species_split_resolves_at_genus() {
        let s = RankSchema::default();
        let c = run(&mixed_species_bin(), &s, opt(80.0, Method::Rank, false));
        assert_eq!(labels(&c), ["K", "P", "C", "O", "F", "G", "unresolved.G"]);
        assert_eq!(c.resolved_rank, s.rank("genus").unwrap());
        assert_eq!(c.share, 100.0);
        assert_eq!(c.voters, 9);
        assert!(!c.forced);
        assert_eq!(c.origin(s.rank("family").unwrap()), Some(Origin::Carried));
        assert_eq!(c.origin(s.rank("genus").unwrap()), Some(Origin::Resolved));
        assert_eq!(c.origin(s.finest()), Some(Origin::Unresolved));
    }

    #[test]
    fn excluding_filled_labels_resolves_species() {
        let s = RankSchema::default();
        let c = run(&mixed_species_bin(), &s, opt(80.0, Method::Rank, true));
        assert_eq!(labels(&c), ["K", "P", "C", "O", "F", "G", "S"]);
        assert_eq!(c.voters, 5);
        assert_eq!(c.share, 80.0);
        assert_eq!(c.resolved_rank, s.finest());
    }

    fn arhodia() -> Vec<Lineage> {
        lineages(&[
            (6, &["Animalia", "Arthropoda", "Insecta", "Lepidoptera", "Geometridae", "Arhodia", "Arhodia AH03"]),
            (2, &["Animalia", "Arthropoda", "Insecta", "Lepidoptera", "Geometridae", "Arhodia", "Arhodia lasiocamparia"]),
            (2, &["Animalia", "Arthropoda", "Insecta", "Lepidoptera", "Lepidoptera_X", "Lepidoptera_XX", "Arhodia AH03"]),
        ])
    }

    #[test]
    fn arhodia_full_and_rank_methods() {
        let s = RankSchema::default();
        let genus = s.rank("genus").unwrap();

        let full = run(&arhodia(), &s, opt(80.0, Method::Full, false));
        assert_eq!(full.label(s.finest()), Some("unresolved.Arhodia"));
        assert_eq!(full.label(genus), Some("Arhodia"));

        let rank = run(&arhodia(), &s, opt(80.0, Method::Rank, false));
        assert_eq!(rank.label(s.finest()), Some("Arhodia AH03"));
        assert_eq!(rank.label(genus), Some("Arhodia"));

        for method in [Method::Rank, Method::Full] {
            let c = run(&arhodia(), &s, opt(90.0, method, false));
            assert_eq!(c.label(genus), Some("unresolved.Lepidoptera"));
            assert_eq!(c.resolved_label(), Some("Lepidoptera"));
        }
    }

    #[test]
    fn arhodia_without_species_rank() {
        let s = RankSchema::new(["kingdom", "phylum", "class", "order", "family", "genus"]).unwrap();
        let rows: Vec<Lineage> = arhodia()
            .iter()
            .map(|l| Lineage::new(l.labels()[..6].to_vec()))
            .collect();
        for method in [Method::Rank, Method::Full] {
            let c = run(&rows, &s, opt(80.0, method, false));
            assert_eq!(c.label(s.finest()), Some("Arhodia"));
            assert_eq!(c.resolved_rank, s.finest());
        }
    }

    #[test]
    fn forced_fallback_at_coarsest_rank() {
        let s = RankSchema::default();
        let members = lineages(&[
            (1, &["Animalia", "Arthropoda", "Insecta", "Diptera", "Muscidae", "Musca", "Musca domestica"]),
            (1, &["Plantae", "Tracheophyta", "Magnoliopsida", "Rosales", "Rosaceae", "Rosa", "Rosa canina"]),
        ]);
        let c = run(&members, &s, opt(100.0, Method::Rank, false));
        assert!(c.forced);
        assert_eq!(c.resolved_rank, s.coarsest());
        assert_eq!(c.share, 50.0);
        let l = labels(&c);
        assert_eq!(l[0], "Animalia");
        assert!(l[1..].iter().all(|x| *x == "unresolved.Animalia"));
    }

    #[test]
    fn ties_use_member_order() {
        let s = RankSchema::default();
        let members = lineages(&[
            (1, &["K", "P", "C", "O", "F", "G", "Sb"]),
            (1, &["K", "P", "C", "O", "F", "G", "Sa"]),
        ]);
        let c = run(&members, &s, opt(50.0, Method::Rank, false));
        assert_eq!(c.label(s.finest()), Some("Sb"));
        assert_eq!(c.share, 50.0);
    }

    #[test]
    fn rank_without_eligible_members_is_skipped() {
        let s = RankSchema::default();
        let members = lineages(&[(3, &["K", "P", "C", "O", "F", "G", "G_X"])]);
        let c = run(&members, &s, opt(80.0, Method::Rank, true));
        assert_eq!(c.resolved_rank, s.rank("genus").unwrap());
        assert_eq!(c.label(s.finest()), Some("unresolved.G"));
    }

    #[test]
    fn full_method_requires_matching_ancestry() {
        let s = RankSchema::default();
        let members = lineages(&[
            (4, &["K", "P", "C", "O", "F1", "G", "S"]),
            (1, &["K", "P", "C", "O", "F2", "G", "S"]),
        ]);
        let rank = run(&members, &s, opt(100.0, Method::Rank, false));
        assert_eq!(rank.resolved_rank, s.finest());
        assert_eq!(rank.label(s.rank("family").unwrap()), Some("F1"));
        let full = run(&members, &s, opt(100.0, Method::Full, false));
        assert_eq!(full.resolved_rank, s.rank("order").unwrap());
        assert_eq!(full.label(s.finest()), Some("unresolved.O"));
    }

    #[test]
    fn empty_and_unlabelled_bins_fail() {
        let s = RankSchema::default();
        let st = FillStyle::default();
        let o = ConsensusOpt::default();
        assert_eq!(calculate("BOLD:E", &[], &s, &st, &o), Err(ConsensusError::Empty("BOLD:E".into())));
        let blank = Lineage::from_strs(&["", "", "", "", "", "", ""]);
        assert_eq!(
            calculate("BOLD:N", &[&blank], &s, &st, &o),
            Err(ConsensusError::NoLabels("BOLD:N".into()))
        );
    }

    #[test]
    fn invariants_hold_on_generated_bins() {
        let s = RankSchema::default();
        let pools: [&[&str]; 7] = [
            &["Animalia", "Plantae"],
            &["Arthropoda", "Chordata", "Animalia_X"],
            &["Insecta", "Arachnida"],
            &["Diptera", "Araneae", "Insecta_X"],
            &["Muscidae", "Salticidae"],
            &["Musca", "Salticus", "Muscidae_X"],
            &["Musca domestica", "Salticus scenicus", "Musca_X", ""],
        ];
        let mut x: u32 = 7;
        let mut next = |m: usize| {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (x >> 16) as usize % m
        };
        for round in 0..200 {
            let n = 1 + next(12);
            let members: Vec<Lineage> = (0..n)
                .map(|_| {
                    let labels: Vec<&str> = pools.iter().map(|p| p[next(p.len())]).collect();
                    Lineage::from_strs(&labels)
                })
                .collect();
            let threshold = [51.0, 66.0, 80.0, 95.0][round % 4];
            let method = if round % 2 == 0 { Method::Rank } else { Method::Full };
            let o = opt(threshold, method, round % 3 == 0);
            let c = run(&members, &s, o);

            assert!(c.share >= threshold || (c.forced && c.resolved_rank == s.coarsest()));
            let winner = c.resolved_label().unwrap().to_string();
            for r in s.ranks() {
                match s.compare(r, c.resolved_rank) {
                    Ordering::Greater => {
                        assert_eq!(c.label(r), Some(format!("unresolved.{winner}").as_str()));
                    }
                    Ordering::Less => assert_eq!(c.origin(r), Some(Origin::Carried)),
                    Ordering::Equal => assert_eq!(c.origin(r), Some(Origin::Resolved)),
                }
            }
        }
    }

    #[test]
    fn method_parsing() {
        assert_eq!("rank".parse::<Method>(), Ok(Method::Rank));
        assert_eq!("FULL".parse::<Method>(), Ok(Method::Full));
        assert!("vote".parse::<Method>().is_err());
        assert_eq!(Method::Full.to_string(), "full");
    }
}
