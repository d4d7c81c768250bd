pub mod cli;
pub mod json;
