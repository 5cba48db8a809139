/// Gap character used by BOLD in aligned nucleotide strings.
pub const GAP: u8 = b'-';

#[inline]
pub fn is_acgt(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

/// 大写化并去掉两端的 gap，内部字符保持不变
pub fn clean_seq(seq: &str) -> String {
    let upper = seq.trim().to_ascii_uppercase();
    upper.trim_matches(GAP as char).to_string()
}

/// 序列非空且只包含 A/C/G/T
pub fn is_clean_dna(seq: &str) -> bool {
    !seq.is_empty() && seq.bytes().all(is_acgt)
}
