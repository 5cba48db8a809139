//! BOLD 数据包预过滤。
//!
//! 只保留 COI-5P 标记、带合法 BIN、长度达标且序列只含 ACGT 的行，并把结果写成
//! 流水线的记录表格式。

use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use tracing::{debug, info};

use super::records::{cell, column, tsv_reader, RecordWriter, BIN_COLUMN, ID_COLUMN};
use crate::taxonomy::{Lineage, RankSchema, Record};
use crate::util::dna::{clean_seq, is_clean_dna};

pub const MARKER_COLUMN: &str = "marker_code";
pub const LENGTH_COLUMN: &str = "nuc_basecount";
pub const NUC_COLUMN: &str = "nuc";
pub const DEFAULT_MARKER: &str = "COI-5P";
pub const DEFAULT_MIN_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOpt {
    pub marker: String,
    pub min_len: usize,
}

impl Default for FilterOpt {
    fn default() -> Self {
        Self { marker: DEFAULT_MARKER.to_string(), min_len: DEFAULT_MIN_LEN }
    }
}

/// 每条过滤规则拒绝的行数，按规则顺序取首个失败的规则计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub read: usize,
    pub kept: usize,
    pub wrong_marker: usize,
    pub no_bin: usize,
    pub too_short: usize,
    pub non_dna: usize,
}

/// `BOLD:` 后跟至少一个大写字母或数字
pub fn is_bold_bin(s: &str) -> bool {
    s.strip_prefix("BOLD:")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()))
}

struct Columns {
    id: usize,
    marker: usize,
    bin: usize,
    len: usize,
    nuc: usize,
    ranks: Vec<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord, schema: &RankSchema) -> Result<Self> {
        let ranks = schema
            .names()
            .iter()
            .map(|name| column(headers, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: column(headers, ID_COLUMN)?,
            marker: column(headers, MARKER_COLUMN)?,
            bin: column(headers, BIN_COLUMN)?,
            len: column(headers, LENGTH_COLUMN)?,
            nuc: column(headers, NUC_COLUMN)?,
            ranks,
        })
    }
}

/// 过滤 BOLD TSV 数据包，把保留的行写为记录表，返回各规则的计数
pub fn filter_bold<R: Read, W: Write>(reader: R, writer: W, schema: &RankSchema, opt: &FilterOpt) -> Result<FilterStats> {
    let mut rdr = tsv_reader().flexible(true).from_reader(reader);
    let headers = rdr.headers().context("cannot read BOLD header")?.clone();
    let cols = Columns::locate(&headers, schema)?;
    let mut out = RecordWriter::new(writer, schema)?;
    let mut stats = FilterStats::default();
    let mut row = StringRecord::new();

    while rdr.read_record(&mut row).context("malformed BOLD row")? {
        stats.read += 1;
        let field = |i: usize| row.get(i).unwrap_or("");

        if field(cols.marker).trim() != opt.marker {
            stats.wrong_marker += 1;
            continue;
        }
        let bin = field(cols.bin).trim();
        if !is_bold_bin(bin) {
            stats.no_bin += 1;
            continue;
        }
        // Unparsable lengths fail the length rule.
        match field(cols.len).trim().parse::<usize>() {
            Ok(n) if n >= opt.min_len => {}
            _ => {
                stats.too_short += 1;
                continue;
            }
        }
        let seq = clean_seq(field(cols.nuc));
        if !is_clean_dna(&seq) {
            stats.non_dna += 1;
            continue;
        }

        let line = row.position().map_or(0, |p| p.line());
        let id = cell(field(cols.id)).ok_or_else(|| anyhow!("line {}: empty {}", line, ID_COLUMN))?;
        let lineage = Lineage::new(cols.ranks.iter().map(|&i| cell(field(i))).collect());
        out.write(&Record { id, seq, lineage, bin: Some(bin.to_string()) })?;
        stats.kept += 1;
    }
    out.finish()?;

    debug!("{:?}", stats);
    info!(
        "kept {}/{} rows (marker {}, bin {}, length {}, non-ACGT {})",
        stats.kept, stats.read, stats.wrong_marker, stats.no_bin, stats.too_short, stats.non_dna
    );
    Ok(stats)
}
