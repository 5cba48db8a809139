//! 流水线编排：填充 → 全局消歧 → 按 BIN 分组 → 逐 BIN 共识 → 回填到每条记录。
//!
//! 填充与消歧都作用于整个记录集合，必须在任何 BIN 开始计算前完成；之后各 BIN
//! 的共识互不依赖，`threads > 1` 时在独立的 rayon 线程池中并行计算，输出顺序与
//! 单线程一致（按 BIN 标识排序，成员保持输入顺序）。

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, UnfillablePolicy};
use crate::consensus::{calculate, ConsensusError, ConsensusLineage};
use crate::taxonomy::{disambiguate, fill_lineage, Collision, DropReason, FillError, Lineage, RankSchema, Record};

/// 记录在哪一步被移除
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropStage {
    Unfillable { missing: usize },
    Disambiguation { rank: String, label: String, reason: DropReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dropped {
    pub record: Record,
    pub stage: DropStage,
}

/// 每条输出记录与共识表的对应关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Index into the consensus table.
    Bin(usize),
    /// The record has no BIN and bypasses consensus.
    Unassigned,
    /// The record's BIN produced no consensus.
    NoConsensus,
}

impl Assignment {
    pub fn consensus<'a>(&self, table: &'a [ConsensusLineage]) -> Option<&'a ConsensusLineage> {
        match *self {
            Self::Bin(i) => table.get(i),
            _ => None,
        }
    }

    /// `consensus_status` 列的取值：`resolved@<rank>`、`forced`、`unassigned` 或 `none`
    pub fn status(&self, table: &[ConsensusLineage], schema: &RankSchema) -> String {
        match (self, self.consensus(table)) {
            (_, Some(c)) if c.forced => "forced".to_string(),
            (_, Some(c)) => format!("resolved@{}", schema.name(c.resolved_rank)),
            (Self::Unassigned, None) => "unassigned".to_string(),
            _ => "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input: usize,
    pub dropped_unfillable: usize,
    pub dropped_disambiguation: usize,
    pub unassigned: usize,
    pub bins: usize,
    pub forced_bins: usize,
    pub failed_bins: usize,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            "run started {} finished {}: {} input records, {} dropped (unfillable), {} dropped (disambiguation), {} unassigned",
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339(),
            self.input,
            self.dropped_unfillable,
            self.dropped_disambiguation,
            self.unassigned
        );
        info!("{} BINs, {} forced, {} without consensus", self.bins, self.forced_bins, self.failed_bins);
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Filled and disambiguated records, in input order.
    pub records: Vec<Record>,
    /// One entry per record in `records`.
    pub assignments: Vec<Assignment>,
    /// One entry per BIN with a consensus, in BIN identifier order.
    pub consensus: Vec<ConsensusLineage>,
    pub failed_bins: Vec<String>,
    pub dropped: Vec<Dropped>,
    pub collisions: Vec<Collision>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Default)]
pub struct Filled {
    pub records: Vec<Record>,
    pub dropped: Vec<Dropped>,
}

/// 填充所有记录；无法填充的谱系按 `unfillable` 策略移除或原样保留（前导阶元仍缺失）
pub fn fill_records(records: Vec<Record>, cfg: &EngineConfig) -> Filled {
    let mut out = Filled { records: Vec::with_capacity(records.len()), ..Default::default() };
    for rec in records {
        match fill_lineage(&rec.lineage, &cfg.schema, &cfg.style) {
            Ok(lineage) => out.records.push(Record { lineage, ..rec }),
            Err(FillError::Unfillable { rank, missing, partial }) => match cfg.unfillable {
                UnfillablePolicy::Drop => {
                    warn!("dropping record {}: no {} label ({})", rec.id, rank, rec.lineage.joined());
                    out.dropped.push(Dropped { record: rec, stage: DropStage::Unfillable { missing } });
                }
                UnfillablePolicy::PassThrough => {
                    warn!("record {} has no {} label, {} leading rank(s) left missing", rec.id, rank, missing);
                    out.records.push(Record { lineage: partial, ..rec });
                }
            },
        }
    }
    out
}

/// 按 BIN 标识分组（有序），值为记录下标，保持输入顺序；无 BIN 的记录不出现
pub fn group_by_bin(records: &[Record]) -> BTreeMap<&str, Vec<usize>> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        if let Some(bin) = rec.bin.as_deref() {
            groups.entry(bin).or_default().push(i);
        }
    }
    groups
}

/// 对每个分组计算共识，结果顺序与 `groups` 的迭代顺序一致
pub fn consensus_bins(
    records: &[Record],
    groups: &BTreeMap<&str, Vec<usize>>,
    cfg: &EngineConfig,
) -> Result<Vec<Result<ConsensusLineage, ConsensusError>>> {
    let bins: Vec<(&str, &[usize])> = groups.iter().map(|(bin, idx)| (*bin, idx.as_slice())).collect();
    let compute = |&(bin, idx): &(&str, &[usize])| {
        let members: Vec<&Lineage> = idx.iter().map(|&i| &records[i].lineage).collect();
        calculate(bin, &members, &cfg.schema, &cfg.style, &cfg.consensus)
    };

    if cfg.threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.threads)
            .build()
            .context("cannot build consensus worker pool")?;
        debug!("computing {} BINs on {} threads", bins.len(), cfg.threads);
        Ok(pool.install(|| bins.par_iter().map(&compute).collect()))
    } else {
        Ok(bins.iter().map(&compute).collect())
    }
}

fn log_bin(c: &ConsensusLineage, members: usize, schema: &RankSchema, threshold: f64) {
    let rank = schema.name(c.resolved_rank);
    let label = c.resolved_label().unwrap_or_default();
    if c.forced {
        warn!(
            "{}: no rank reached {}% among {} members, forced {} {} by plurality ({:.1}%)",
            c.bin, threshold, members, rank, label, c.share
        );
    } else {
        info!("{}: consensus at {} {} ({:.1}% of {} voters, {} members)", c.bin, rank, label, c.share, c.voters, members);
    }
}

/// 完整运行：填充、消歧、分组、共识
pub fn run(records: Vec<Record>, cfg: &EngineConfig) -> Result<RunOutput> {
    let started_at = Utc::now();
    let input = records.len();

    let filled = fill_records(records, cfg);
    let dis = disambiguate(filled.records, &cfg.schema, &cfg.style);
    let mut dropped = filled.dropped;
    let dropped_unfillable = dropped.len();
    dropped.extend(dis.dropped.into_iter().map(|d| Dropped {
        record: d.record,
        stage: DropStage::Disambiguation { rank: d.rank, label: d.label, reason: d.reason },
    }));
    let dropped_disambiguation = dropped.len() - dropped_unfillable;

    let records = dis.records;
    let mut assignments = vec![Assignment::Unassigned; records.len()];
    let mut consensus = Vec::new();
    let mut failed_bins = Vec::new();

    let groups = group_by_bin(&records);
    let results = consensus_bins(&records, &groups, cfg)?;
    for ((bin, members), result) in groups.iter().zip(results) {
        match result {
            Ok(c) => {
                log_bin(&c, members.len(), &cfg.schema, cfg.consensus.threshold);
                for &i in members {
                    assignments[i] = Assignment::Bin(consensus.len());
                }
                consensus.push(c);
            }
            Err(e) => {
                warn!("{}", e);
                for &i in members {
                    assignments[i] = Assignment::NoConsensus;
                }
                failed_bins.push(bin.to_string());
            }
        }
    }
    let bins = groups.len();

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        input,
        dropped_unfillable,
        dropped_disambiguation,
        unassigned: assignments.iter().filter(|a| **a == Assignment::Unassigned).count(),
        bins,
        forced_bins: consensus.iter().filter(|c| c.forced).count(),
        failed_bins: failed_bins.len(),
    };
    summary.log();

    Ok(RunOutput {
        records,
        assignments,
        consensus,
        failed_bins,
        dropped,
        collisions: dis.collisions,
        summary,
    })
}
