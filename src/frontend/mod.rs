//! 模型前端：语法解析与语义检查。

pub mod check;
pub mod parser;

pub use check::{check_model, CheckError};
pub use parser::parse;
