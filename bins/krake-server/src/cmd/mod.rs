pub mod segments;
pub mod serve;
