pub mod bold;
pub mod records;
