//! 分类阶元、谱系以及两个全局规范化步骤：缺失阶元填充与同名标签消歧。

pub mod disambiguate;
pub mod fill;
pub mod lineage;
pub mod rank;

pub use disambiguate::{conflicting_labels, disambiguate, Collision, Decision, Disambiguated, DropReason, DroppedRecord};
pub use fill::{fill_lineage, FillError};
pub use lineage::{FillStyle, Lineage, Record};
pub use rank::{Rank, RankSchema, DEFAULT_RANKS};
