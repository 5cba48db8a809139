use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use super::lineage::{FillStyle, Lineage, Record};
use super::rank::{Rank, RankSchema};

/// 记录被移除的原因：冲突标签没有可用的父级标签作为前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The immediate parent label is missing.
    MissingParent,
    /// Every rank between the coarsest rank and the label is a filled placeholder.
    NoResolvableAncestry,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParent => f.write_str("parent label missing"),
            Self::NoResolvableAncestry => f.write_str("no resolvable coarser ancestry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Dropped,
    Prefixed,
    DroppedAndPrefixed,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped => f.write_str("dropped"),
            Self::Prefixed => f.write_str("prefixed"),
            Self::DroppedAndPrefixed => f.write_str("dropped+prefixed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub record: usize,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub record: usize,
    pub reason: DropReason,
}

/// 一个 (rank, label) 冲突及其处理结果，对应报告表中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub rank: String,
    pub label: String,
    pub ancestries: usize,
    pub decision: Decision,
    pub renamed: usize,
    pub dropped: Vec<String>,
}

/// 单个阶元的处理计划。由当前快照纯函数计算，整批应用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankPlan {
    pub rank: Rank,
    pub renames: Vec<Rename>,
    pub removals: Vec<Removal>,
    pub collisions: Vec<Collision>,
}

impl RankPlan {
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub record: Record,
    pub rank: String,
    pub label: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default)]
pub struct Disambiguated {
    pub records: Vec<Record>,
    pub dropped: Vec<DroppedRecord>,
    pub collisions: Vec<Collision>,
}

fn rename_blocker(lineage: &Lineage, rank: Rank, style: &FillStyle) -> Option<DropReason> {
    if lineage.parent(rank).is_none() {
        return Some(DropReason::MissingParent);
    }
    let between = &lineage.labels()[1..rank.index()];
    let anchored = between.is_empty()
        || between
            .iter()
            .any(|l| l.as_deref().is_some_and(|l| !style.is_filled(l)));
    (!anchored).then_some(DropReason::NoResolvableAncestry)
}

/// 计算某一阶元上的消歧计划。
///
/// 按该阶元的标签分组；组内祖先谱系多于一种即为冲突。无法安全加前缀的记录
/// 被移除，其余记录若仍有多种祖先，则把标签改写为 `parent + sep + label`。
pub fn plan_rank(records: &[Record], rank: Rank, style: &FillStyle, schema: &RankSchema) -> RankPlan {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        if let Some(label) = rec.lineage.get(rank) {
            groups.entry(label).or_default().push(i);
        }
    }

    let mut plan = RankPlan { rank, renames: Vec::new(), removals: Vec::new(), collisions: Vec::new() };
    for (label, members) in groups {
        let ancestries: HashSet<&[Option<String>]> =
            members.iter().map(|&i| records[i].lineage.ancestry(rank)).collect();
        if ancestries.len() < 2 {
            continue;
        }

        let mut kept = Vec::with_capacity(members.len());
        let mut dropped = Vec::new();
        for &i in &members {
            match rename_blocker(&records[i].lineage, rank, style) {
                Some(reason) => {
                    plan.removals.push(Removal { record: i, reason });
                    dropped.push(records[i].id.clone());
                }
                None => kept.push(i),
            }
        }

        let remaining: HashSet<&[Option<String>]> =
            kept.iter().map(|&i| records[i].lineage.ancestry(rank)).collect();
        let prefix = remaining.len() > 1;
        let mut renamed = 0;
        if prefix {
            for &i in &kept {
                if let Some(parent) = records[i].lineage.parent(rank) {
                    plan.renames.push(Rename {
                        record: i,
                        from: label.to_string(),
                        to: format!("{}{}{}", parent, style.separator(), label),
                    });
                    renamed += 1;
                }
            }
        }

        let decision = if dropped.is_empty() {
            Decision::Prefixed
        } else if prefix {
            Decision::DroppedAndPrefixed
        } else {
            Decision::Dropped
        };
        plan.collisions.push(Collision {
            rank: schema.name(rank).to_string(),
            label: label.to_string(),
            ancestries: ancestries.len(),
            decision,
            renamed,
            dropped,
        });
    }
    plan
}

/// 应用计划，返回新的快照和被移除的记录
pub fn apply_plan(
    records: Vec<Record>,
    plan: &RankPlan,
    style: &FillStyle,
    schema: &RankSchema,
) -> (Vec<Record>, Vec<DroppedRecord>) {
    let removals: HashMap<usize, DropReason> = plan.removals.iter().map(|r| (r.record, r.reason)).collect();
    let renames: HashMap<usize, &Rename> = plan.renames.iter().map(|r| (r.record, r)).collect();
    let rank_name = schema.name(plan.rank);

    let mut kept = Vec::with_capacity(records.len() - removals.len());
    let mut dropped = Vec::with_capacity(removals.len());
    for (i, rec) in records.into_iter().enumerate() {
        if let Some(&reason) = removals.get(&i) {
            dropped.push(DroppedRecord {
                rank: rank_name.to_string(),
                label: rec.lineage.get(plan.rank).unwrap_or_default().to_string(),
                reason,
                record: rec,
            });
            continue;
        }
        match renames.get(&i) {
            Some(rn) => {
                let mut lineage = rec.lineage.clone();
                lineage.set(plan.rank, Some(rn.to.clone()));
                // placeholders derived from the old label follow it
                for finer in schema.ranks().skip(plan.rank.index() + 1) {
                    let rebased = lineage.get(finer).and_then(|l| style.rebase(l, &rn.from, &rn.to));
                    if rebased.is_some() {
                        lineage.set(finer, rebased);
                    }
                }
                kept.push(Record { lineage, ..rec });
            }
            None => kept.push(rec),
        }
    }
    (kept, dropped)
}

/// 对整个记录集合逐阶元（由粗到细）消歧。
///
/// 输入应为已填充的谱系。每个阶元先基于当前快照计算计划，再整批应用；
/// 改写后的名字可能与该阶元已有的标签重名，因此同一阶元重复计划直到没有冲突，
/// 下一阶元的分组在新快照上重新计算。
pub fn disambiguate(records: Vec<Record>, schema: &RankSchema, style: &FillStyle) -> Disambiguated {
    let mut out = Disambiguated { records, ..Default::default() };
    for rank in schema.ranks().skip(1) {
        // every pass lengthens the renamed labels, so this bound is never hit in practice
        let max_passes = out.records.len() + 1;
        let mut pass = 0;
        loop {
            let plan = plan_rank(&out.records, rank, style, schema);
            if plan.is_empty() {
                debug!("{}: no conflicting labels after {} pass(es)", schema.name(rank), pass);
                break;
            }
            if pass == max_passes {
                warn!("{}: conflicts remain after {} passes", schema.name(rank), pass);
                break;
            }
            pass += 1;
            for c in &plan.collisions {
                info!(
                    "{}:{} has {} ancestries, {} ({} renamed, {} dropped)",
                    c.rank,
                    c.label,
                    c.ancestries,
                    c.decision,
                    c.renamed,
                    c.dropped.len()
                );
            }

            let records = std::mem::take(&mut out.records);
            let (next, gone) = apply_plan(records, &plan, style, schema);
            for d in &gone {
                warn!(
                    "dropping record {} ({}:{}, lineage {}): {}",
                    d.record.id,
                    d.rank,
                    d.label,
                    d.record.lineage.joined(),
                    d.reason
                );
            }
            out.records = next;
            out.dropped.extend(gone);
            out.collisions.extend(plan.collisions);
        }
    }
    out
}

/// 列出仍然存在多种祖先谱系的 (rank, label)；消歧之后应为空
pub fn conflicting_labels(records: &[Record], schema: &RankSchema) -> Vec<(Rank, String)> {
    let mut out = Vec::new();
    for rank in schema.ranks().skip(1) {
        let mut seen: HashMap<&str, &[Option<String>]> = HashMap::new();
        let mut flagged: HashSet<&str> = HashSet::new();
        for rec in records {
            let Some(label) = rec.lineage.get(rank) else { continue };
            let ancestry = rec.lineage.ancestry(rank);
            match seen.get(label) {
                Some(&prev) if prev != ancestry => {
                    if flagged.insert(label) {
                        out.push((rank, label.to_string()));
                    }
                }
                Some(_) => {}
                None => {
                    seen.insert(label, ancestry);
                }
            }
        }
    }
    out
}
