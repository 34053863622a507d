use std::env;
use std::sync::{Mutex, MutexGuard, PoisonError};

use int_constraints::solver::Solver;
use int_constraints::{Config, Error};

static SOLVER: Mutex<()> = Mutex::new(());

/// Set to anything but `0` to fail, rather than skip, when the solver is
/// missing.
const REQUIRE_SOLVER: &str = "INT_CONSTRAINTS_REQUIRE_SOLVER";

fn solver_required(setting: Option<&str>) -> bool {
    setting.is_some_and(|v| !v.is_empty() && v != "0")
}

/// Serializes solver use within this test binary. `None` when the default
/// solver cannot be spawned, in which case the caller skips.
pub fn solver_lock() -> Option<MutexGuard<'static, ()>> {
    let guard = SOLVER.lock().unwrap_or_else(PoisonError::into_inner);
    match Solver::new(&Config::default()) {
        Ok(_) => Some(guard),
        Err(Error::Io(e)) => {
            let program = Config::default().solver_program;
            if solver_required(env::var(REQUIRE_SOLVER).ok().as_deref()) {
                panic!("{REQUIRE_SOLVER} is set but {program} cannot start: {e}");
            }
            eprintln!("skipping, cannot start {program}: {e}");
            None
        }
        Err(e) => panic!("{e}"),
    }
}

#[test]
fn test_solver_requirement() {
    assert!(!solver_required(None));
    assert!(!solver_required(Some("")));
    assert!(!solver_required(Some("0")));
    assert!(solver_required(Some("1")));
    assert!(solver_required(Some("yes")));
}
