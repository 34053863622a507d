use std::path::PathBuf;

/// Engine configuration. The binary fills this from its command line.
#[derive(Clone, Debug)]
pub struct Config {
    /// Solver executable speaking SMT-LIB2 on stdin.
    pub solver_program: String,
    pub solver_args: Vec<String>,
    /// Every command sent to the solver is copied here.
    pub replay_file: Option<PathBuf>,
    /// Run capture but keep the fact set empty.
    pub disable_constraints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solver_program: "z3".to_string(),
            solver_args: vec!["-smt2".to_string(), "-in".to_string()],
            replay_file: None,
            disable_constraints: false,
        }
    }
}
