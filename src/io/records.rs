use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;

use crate::consensus::ConsensusLineage;
use crate::pipeline::Assignment;
use crate::taxonomy::{Collision, Lineage, RankSchema, Record};

pub const ID_COLUMN: &str = "processid";
pub const BIN_COLUMN: &str = "bin_uri";
pub const SEQ_COLUMN: &str = "seq";

/// 空单元格与字面量 `None` 均视为缺失
pub(crate) fn cell(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s == "None" {
        None
    } else {
        Some(s.to_string())
    }
}

pub(crate) fn column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| anyhow!("missing column '{}'", name))
}

/// BOLD 导出的 TSV 不使用引号转义
pub(crate) fn tsv_reader() -> ReaderBuilder {
    let mut b = ReaderBuilder::new();
    b.delimiter(b'\t').has_headers(true).quoting(false);
    b
}

pub(crate) fn tsv_writer() -> WriterBuilder {
    let mut b = WriterBuilder::new();
    b.delimiter(b'\t').has_headers(false).quote_style(QuoteStyle::Never);
    b
}

pub(crate) fn record_header(schema: &RankSchema) -> Vec<String> {
    let mut header = vec![ID_COLUMN.to_string()];
    header.extend(schema.names().iter().cloned());
    header.push(BIN_COLUMN.to_string());
    header.push(SEQ_COLUMN.to_string());
    header
}

fn record_fields(rec: &Record) -> Vec<&str> {
    let mut row = Vec::with_capacity(rec.lineage.len() + 3);
    row.push(rec.id.as_str());
    row.extend(rec.lineage.labels().iter().map(|l| l.as_deref().unwrap_or("")));
    row.push(rec.bin.as_deref().unwrap_or(""));
    row.push(rec.seq.as_str());
    row
}

/// 逐行读取记录表：`processid`、各阶元列、`bin_uri`、`seq`，其余列忽略
pub struct RecordReader<R: Read> {
    inner: csv::Reader<R>,
    row: StringRecord,
    id: usize,
    bin: usize,
    seq: usize,
    ranks: Vec<usize>,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R, schema: &RankSchema) -> Result<Self> {
        let mut inner = tsv_reader().from_reader(reader);
        let headers = inner.headers().context("cannot read table header")?.clone();
        let ranks = schema
            .names()
            .iter()
            .map(|name| column(&headers, name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: column(&headers, ID_COLUMN)?,
            bin: column(&headers, BIN_COLUMN)?,
            seq: column(&headers, SEQ_COLUMN)?,
            ranks,
            inner,
            row: StringRecord::new(),
        })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if !self.inner.read_record(&mut self.row).context("malformed table row")? {
            return Ok(None);
        }
        let line = self.row.position().map_or(0, |p| p.line());
        let field = |i: usize| self.row.get(i).unwrap_or("");

        let id = cell(field(self.id)).ok_or_else(|| anyhow!("line {}: empty {}", line, ID_COLUMN))?;
        let lineage = Lineage::new(self.ranks.iter().map(|&i| cell(field(i))).collect());
        Ok(Some(Record {
            id,
            seq: field(self.seq).trim().to_string(),
            lineage,
            bin: cell(field(self.bin)),
        }))
    }
}

pub fn read_records<R: Read>(reader: R, schema: &RankSchema) -> Result<Vec<Record>> {
    let mut rdr = RecordReader::new(reader, schema)?;
    let mut out = Vec::new();
    while let Some(rec) = rdr.next_record()? {
        out.push(rec);
    }
    Ok(out)
}

pub fn read_records_path(path: &Path, schema: &RankSchema) -> Result<Vec<Record>> {
    let fh = File::open(path).with_context(|| format!("cannot open record table '{}'", path.display()))?;
    read_records(BufReader::new(fh), schema).with_context(|| format!("cannot read record table '{}'", path.display()))
}

/// 流式写出记录表（与 [`RecordReader`] 的列格式一致）
pub struct RecordWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W, schema: &RankSchema) -> Result<Self> {
        let mut inner = tsv_writer().from_writer(writer);
        inner.write_record(record_header(schema))?;
        Ok(Self { inner })
    }

    pub fn write(&mut self, rec: &Record) -> Result<()> {
        self.inner.write_record(record_fields(rec))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

pub fn write_records<W: Write>(writer: W, schema: &RankSchema, records: &[Record]) -> Result<()> {
    let mut w = RecordWriter::new(writer, schema)?;
    for rec in records {
        w.write(rec)?;
    }
    w.finish()
}

/// 规范化记录表：原始列 + 每个阶元的共识标签 + `consensus_status`
pub fn write_normalized<W: Write>(
    writer: W,
    schema: &RankSchema,
    records: &[Record],
    assignments: &[Assignment],
    consensus: &[ConsensusLineage],
) -> Result<()> {
    let mut w = tsv_writer().from_writer(writer);
    let mut header = record_header(schema);
    header.extend(schema.names().iter().map(|n| format!("consensus_{}", n)));
    header.push("consensus_status".to_string());
    w.write_record(&header)?;

    for (rec, assignment) in records.iter().zip(assignments) {
        let mut row: Vec<String> = record_fields(rec).into_iter().map(str::to_string).collect();
        match assignment.consensus(consensus) {
            Some(c) => row.extend(schema.ranks().map(|r| c.label(r).unwrap_or_default().to_string())),
            None => row.extend(std::iter::repeat(String::new()).take(schema.len())),
        }
        row.push(assignment.status(consensus, schema));
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

/// 共识表：每个 BIN 一行，每个阶元带 `<rank>_origin` 列
pub fn write_consensus<W: Write>(writer: W, schema: &RankSchema, consensus: &[ConsensusLineage]) -> Result<()> {
    let mut w = tsv_writer().from_writer(writer);
    let mut header = vec![BIN_COLUMN.to_string()];
    for name in schema.names() {
        header.push(name.clone());
        header.push(format!("{}_origin", name));
    }
    header.extend(["resolved_rank", "share", "voters", "forced"].map(String::from));
    w.write_record(&header)?;

    for c in consensus {
        let mut row = vec![c.bin.clone()];
        for l in &c.labels {
            row.push(l.label.clone().unwrap_or_default());
            row.push(l.origin.to_string());
        }
        row.push(schema.name(c.resolved_rank).to_string());
        row.push(format!("{:.2}", c.share));
        row.push(c.voters.to_string());
        row.push(c.forced.to_string());
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct CollisionRow<'a> {
    rank: &'a str,
    label: &'a str,
    ancestries: usize,
    decision: String,
    renamed: usize,
    dropped: String,
}

const COLLISION_HEADER: [&str; 6] = ["rank", "label", "ancestries", "decision", "renamed", "dropped"];

/// 消歧报告：每个冲突标签一行
pub fn write_collisions<W: Write>(writer: W, collisions: &[Collision]) -> Result<()> {
    let mut w = tsv_writer().from_writer(writer);
    w.write_record(COLLISION_HEADER)?;
    for c in collisions {
        w.serialize(CollisionRow {
            rank: &c.rank,
            label: &c.label,
            ancestries: c.ancestries,
            decision: c.decision.to_string(),
            renamed: c.renamed,
            dropped: c.dropped.join(","),
        })?;
    }
    w.flush()?;
    Ok(())
}
