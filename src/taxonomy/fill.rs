use thiserror::Error;

use super::lineage::{FillStyle, Lineage};
use super::rank::RankSchema;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FillError {
    /// 从最粗阶元开始就缺失标签，没有可以向下传播的祖先。
    /// `partial` 中其余阶元已按常规规则填充，前 `missing` 个阶元仍为缺失。
    #[error("no label at coarsest rank '{rank}': {missing} leading rank(s) cannot be filled")]
    Unfillable {
        rank: String,
        missing: usize,
        partial: Lineage,
    },
}

/// 补全单条谱系中缺失的阶元标签。
///
/// 由粗到细扫描，记录最近一个原始标签 `base` 和其后连续缺失的阶元数 `run`；
/// 缺失的阶元写为 `base + sep + marker * run`。已存在的填充标签（如 `Gastropoda_X`）
/// 会继承其 base 与 run，因此后续缺口继续累加 marker，重复调用结果不变。
pub fn fill_lineage(lineage: &Lineage, schema: &RankSchema, style: &FillStyle) -> Result<Lineage, FillError> {
    let mut labels: Vec<Option<String>> = Vec::with_capacity(lineage.len());
    let mut base: Option<String> = None;
    let mut run = 0usize;
    let mut leading = 0usize;

    for slot in lineage.labels() {
        match slot {
            Some(label) => {
                match style.parse(label) {
                    Some((b, r)) => {
                        base = Some(b.to_string());
                        run = r;
                    }
                    None => {
                        base = Some(label.clone());
                        run = 0;
                    }
                }
                labels.push(Some(label.clone()));
            }
            None => match &base {
                Some(b) => {
                    run += 1;
                    labels.push(Some(style.label(b, run)));
                }
                None => {
                    leading += 1;
                    labels.push(None);
                }
            },
        }
    }

    let filled = Lineage::new(labels);
    if leading > 0 {
        return Err(FillError::Unfillable {
            rank: schema.name(schema.coarsest()).to_string(),
            missing: leading,
            partial: filled,
        });
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(labels: &[&str]) -> Result<Lineage, FillError> {
        fill_lineage(&Lineage::from_strs(labels), &RankSchema::default(), &FillStyle::default())
    }

    #[test]
    fn fills_trailing_and_inner_gaps() {
        // BOLD:ACQ8069 / BOLD:AAN1572 style rows
        let a = fill(&["Animalia", "Mollusca", "Gastropoda", "", "Hermaeidae", "Mourgona", ""]).unwrap();
        assert_eq!(
            a,
            Lineage::from_strs(&["Animalia", "Mollusca", "Gastropoda", "Gastropoda_X", "Hermaeidae", "Mourgona", "Mourgona_X"])
        );
        let b = fill(&["Animalia", "Mollusca", "Gastropoda", "", "Hermaeidae", "", ""]).unwrap();
        assert_eq!(
            b,
            Lineage::from_strs(&["Animalia", "Mollusca", "Gastropoda", "Gastropoda_X", "Hermaeidae", "Hermaeidae_X", "Hermaeidae_XX"])
        );
    }

    #[test]
    fn complete_lineage_untouched() {
        let l = ["K", "P", "C", "O", "F", "G", "S"];
        assert_eq!(fill(&l).unwrap(), Lineage::from_strs(&l));
    }

    #[test]
    fn idempotent() {
        let inputs: [&[&str]; 4] = [
            &["Animalia", "", "", "", "", "", ""],
            &["Animalia", "Arthropoda", "", "Diptera", "", "", "Musca domestica"],
            &["Animalia", "Arthropoda", "Insecta", "Diptera", "Muscidae", "Musca", ""],
            &["Fungi", "Fungi_X", "", "Agaricales", "", "", ""],
        ];
        for l in inputs {
            let once = fill(l).unwrap();
            let twice = fill_lineage(&once, &RankSchema::default(), &FillStyle::default()).unwrap();
            assert_eq!(once, twice, "refill changed {:?}", l);
        }
    }

    #[test]
    fn run_length_grows_by_one() {
        let st = FillStyle::default();
        let out = fill(&["Animalia", "", "", "", "", "", ""]).unwrap();
        for (i, label) in out.labels().iter().enumerate().skip(1) {
            let (base, run) = st.parse(label.as_deref().unwrap()).unwrap();
            assert_eq!(base, "Animalia");
            assert_eq!(run, i);
        }
    }

    #[test]
    fn existing_filled_label_continues_run() {
        let out = fill(&["Fungi", "Fungi_X", "", "Agaricales", "", "", ""]).unwrap();
        assert_eq!(out.labels()[2].as_deref(), Some("Fungi_XX"));
        assert_eq!(out.labels()[4].as_deref(), Some("Agaricales_X"));
        assert_eq!(out.labels()[6].as_deref(), Some("Agaricales_XXX"));
    }

    #[test]
    fn missing_coarsest_rank_is_unfillable() {
        let err = fill(&["", "", "Insecta", "", "", "", ""]).unwrap_err();
        let FillError::Unfillable { rank, missing, partial } = err;
        assert_eq!(rank, "kingdom");
        assert_eq!(missing, 2);
        assert_eq!(partial.labels()[0], None);
        assert_eq!(partial.labels()[1], None);
        assert_eq!(partial.labels()[3].as_deref(), Some("Insecta_X"));
        assert_eq!(partial.labels()[6].as_deref(), Some("Insecta_XXXX"));
    }

    #[test]
    fn fully_missing_lineage_is_unfillable() {
        let err = fill(&["", "", "", "", "", "", ""]).unwrap_err();
        assert!(matches!(err, FillError::Unfillable { missing: 7, .. }));
    }
}
