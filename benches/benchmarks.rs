use criterion::{black_box, criterion_group, criterion_main, Criterion};

use coidb_rust::config::EngineConfig;
use coidb_rust::consensus;
use coidb_rust::pipeline;
use coidb_rust::taxonomy::{disambiguate, fill_lineage, FillStyle, Lineage, RankSchema, Record};

struct Lcg(u32);

impl Lcg {
    fn next(&mut self, n: usize) -> usize {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.0 >> 16) as usize % n
    }
}

/// 合成记录：少量分支的分类树，随机截断末端阶元，每 BIN 约 20 条
fn make_records(n: usize) -> Vec<Record> {
    let mut rng = Lcg(42);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let bin = i / 20;
        let labels: Vec<String> = (0..7)
            .map(|depth| {
                let fanout = 2 + depth;
                let branch = if rng.next(10) == 0 { rng.next(fanout) } else { bin % fanout };
                format!("T{}_{}", depth, branch)
            })
            .collect();
        let keep = 7 - rng.next(3);
        let lineage = Lineage::new((0..7).map(|d| (d < keep).then(|| labels[d].clone())).collect());
        out.push(Record {
            id: format!("R{:06}", i),
            seq: "ACGT".to_string(),
            lineage,
            bin: Some(format!("BOLD:A{:05}", bin)),
        });
    }
    out
}

fn bench_fill(c: &mut Criterion) {
    let schema = RankSchema::default();
    let style = FillStyle::default();
    let records = make_records(10_000);

    c.bench_function("fill_10k", |b| {
        b.iter(|| {
            for rec in &records {
                black_box(fill_lineage(black_box(&rec.lineage), &schema, &style).ok());
            }
        })
    });
}

fn bench_disambiguate(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let filled = pipeline::fill_records(make_records(10_000), &cfg).records;

    c.bench_function("disambiguate_10k", |b| {
        b.iter(|| {
            black_box(disambiguate(black_box(filled.clone()), &cfg.schema, &cfg.style));
        })
    });
}

fn bench_consensus(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let filled = pipeline::fill_records(make_records(200), &cfg).records;
    let members: Vec<&Lineage> = filled.iter().take(20).map(|r| &r.lineage).collect();

    c.bench_function("consensus_bin_20", |b| {
        b.iter(|| {
            black_box(consensus::calculate("BOLD:A00000", black_box(&members), &cfg.schema, &cfg.style, &cfg.consensus).ok());
        })
    });
}

fn bench_run(c: &mut Criterion) {
    let records = make_records(10_000);
    let cfg = EngineConfig { threads: 4, ..EngineConfig::default() };

    c.bench_function("run_10k_4_threads", |b| {
        b.iter(|| {
            black_box(pipeline::run(black_box(records.clone()), &cfg).ok());
        })
    });
}

criterion_group!(benches, bench_fill, bench_disambiguate, bench_consensus, bench_run);
criterion_main!(benches);
