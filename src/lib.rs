pub mod analysis;
pub mod canon;
pub mod capture;
pub mod config;
pub mod error;
pub mod expr;
mod fixed;
pub mod ir;
pub mod oracle;
pub mod query;
pub mod realize;
pub mod scenarios;
pub mod solver;

pub use config::Config;
pub use error::{Error, Result};
pub use query::ConstraintSolver;

/// Working width of every non-boolean integer and pointer.
pub const WORD_WIDTH: u32 = 32;

/// Width of comparison results and `i1` values.
pub const BOOL_WIDTH: u32 = 1;

pub const INT_MAX: i64 = i32::MAX as i64;
