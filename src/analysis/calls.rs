use std::collections::{HashMap, HashSet};

use crate::ir::{FuncId, Program, ValueId};

pub(crate) struct CallInfo {
    pub sites: Vec<Vec<ValueId>>,
    pub callees: HashMap<ValueId, Vec<FuncId>>,
}

impl CallInfo {
    /// Direct calls to defined functions, plus thread spawns naming their
    /// entry function.
    pub fn new(program: &Program) -> Self {
        let mut sites = vec![vec![]; program.functions().count()];
        let mut callees: HashMap<ValueId, Vec<FuncId>> = HashMap::new();
        for inst in program.instructions() {
            let target = program
                .spawned_function(inst)
                .or_else(|| program.call_target(inst));
            if let Some(func) = target {
                if !program.func(func).is_declaration() {
                    sites[func.index()].push(inst);
                    callees.entry(inst).or_default().push(func);
                }
            }
        }
        Self { sites, callees }
    }

    fn callees_of_function<'a>(
        &'a self,
        program: &'a Program,
        func: FuncId,
    ) -> impl Iterator<Item = FuncId> + 'a {
        program
            .func(func)
            .blocks
            .iter()
            .flat_map(move |b| program.block(*b).insts.iter())
            .filter_map(move |inst| self.callees.get(inst))
            .flatten()
            .copied()
    }

    /// Functions reachable from `roots` through call edges, roots included.
    pub fn reachable_from(&self, program: &Program, roots: &[FuncId]) -> HashSet<FuncId> {
        let mut seen: HashSet<FuncId> = roots.iter().copied().collect();
        let mut work = roots.to_vec();
        while let Some(func) = work.pop() {
            for callee in self.callees_of_function(program, func) {
                if seen.insert(callee) {
                    work.push(callee);
                }
            }
        }
        seen
    }

    pub fn is_recursive(&self, program: &Program, func: FuncId) -> bool {
        let callees: Vec<FuncId> = self.callees_of_function(program, func).collect();
        self.reachable_from(program, &callees).contains(&func)
    }
}
