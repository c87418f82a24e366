mod result_set;
mod row;

pub use result_set::{ExecResult, ResultSet};
pub use row::CustomDbRow;
