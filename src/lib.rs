//! # coidb-rust
//!
//! BOLD COI-5P 参考库的分类谱系规范化与 BIN 共识引擎。
//!
//! 本 crate 提供：
//!
//! - **谱系填充**：缺失阶元写为 `<最近祖先>_X...`，连续缺口逐级累加 `X`
//! - **同名消歧**：同一阶元上祖先不同的同名标签加父级前缀，无法加前缀的记录移除
//! - **BIN 共识**：由细到粗按阈值投票（`rank` / `full` 两种方法），可排除填充标签
//! - **BOLD 预过滤**：COI-5P 标记、合法 BIN、长度与 ACGT 序列检查
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use coidb_rust::config::EngineConfig;
//! use coidb_rust::pipeline;
//! use coidb_rust::taxonomy::{Lineage, Record};
//!
//! let cfg = EngineConfig::default();
//! let records = vec![Record {
//!     id: "AAA001-10".to_string(),
//!     seq: "ACGTACGT".to_string(),
//!     lineage: Lineage::from_strs(&["Animalia", "Arthropoda", "Insecta", "Diptera", "Culicidae", "Aedes", ""]),
//!     bin: Some("BOLD:AAA0001".to_string()),
//! }];
//!
//! let out = pipeline::run(records, &cfg).unwrap();
//! for c in &out.consensus {
//!     println!("{} -> {:?}", c.bin, c.resolved_label());
//! }
//! ```
//!
//! ## 模块说明
//!
//! - [`config`]：TOML 配置与校验后的引擎参数
//! - [`taxonomy`]：阶元表、谱系、填充与消歧
//! - [`consensus`]：单个 BIN 的共识计算
//! - [`pipeline`]：分组与整体编排，可并行
//! - [`io`]：记录表 / 共识表 / 报告的 TSV 读写，BOLD 预过滤
//! - [`util`]：序列清洗工具函数

pub mod config;
pub mod consensus;
pub mod io;
pub mod pipeline;
pub mod taxonomy;
pub mod util;
