use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, HdlScope,
    ahdl::{AStm, Target},
};
use polyphony_utils::Id;
use std::collections::HashSet;

/// Removes states that cannot be reached from the init state, and states
/// that do nothing but transition to another state.
#[derive(Default)]
pub struct StateReduce;

impl Named for StateReduce {
    fn name() -> &'static str {
        "state-reduce"
    }

    fn description() -> &'static str {
        "Remove unreachable and empty states"
    }
}

/// The target of a state whose only code is an unconditional transition.
fn forward_target(codes: &[AStm]) -> Option<Id> {
    match codes {
        [AStm::Transition(Target::State(t))] => Some(*t),
        _ => None,
    }
}

fn remove_unreachable(hs: &mut HdlScope, si: usize) -> usize {
    let stg = &hs.stgs[si];
    let Some(init) = stg.states.first().map(|s| s.name) else {
        return 0;
    };
    let mut seen: HashSet<Id> = HashSet::new();
    let mut work = vec![init];
    while let Some(n) = work.pop() {
        if !seen.insert(n) {
            continue;
        }
        if let Some(st) = stg.state(n) {
            for t in st.transition_targets() {
                if let Target::State(t) = t {
                    work.push(t);
                }
            }
        }
    }
    let dead: Vec<Id> = stg
        .states
        .iter()
        .map(|s| s.name)
        .filter(|n| !seen.contains(n))
        .collect();
    for n in dead.iter() {
        hs.stgs[si].remove_state(*n);
        hs.replace_state_ref(*n, None);
    }
    dead.len()
}

fn remove_empty(hs: &mut HdlScope, si: usize) -> usize {
    let mut removed = 0;
    loop {
        let stg = &hs.stgs[si];
        let found = stg.states.iter().skip(1).find_map(|st| {
            let t = forward_target(&st.codes)?;
            (t != st.name && !st.is_pipeline()).then_some((st.name, t))
        });
        let Some((empty, target)) = found else {
            return removed;
        };
        for st in hs.stgs[si].states.iter_mut() {
            st.for_each_target_mut(&mut |t| {
                if *t == Target::State(empty) {
                    *t = Target::State(target);
                }
            });
        }
        hs.stgs[si].remove_state(empty);
        hs.replace_state_ref(empty, Some(target));
        removed += 1;
    }
}

/// Reduce every STG of `hs`. Returns the number of removed states.
pub fn reduce_states(hs: &mut HdlScope) -> usize {
    let mut removed = 0;
    for si in 0..hs.stgs.len() {
        removed += remove_unreachable(hs, si);
        removed += remove_empty(hs, si);
        // Bypassing may orphan states.
        removed += remove_unreachable(hs, si);
    }
    removed
}

impl Visitor for StateReduce {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        for (_, hs) in ctx.hdl.scopes.iter_mut() {
            let n = reduce_states(hs);
            if n > 0 {
                log::debug!("{}: {n} state(s) removed", hs.name);
            }
        }
        Ok(Action::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{
        BlockId, ScopeId,
        ahdl::{AExpr, State, Stg},
    };
    use polyphony_utils::idx::IndexRef;
    use proptest::prelude::*;

    fn go(n: &str) -> AStm {
        AStm::Transition(Target::State(Id::from(n)))
    }

    #[test]
    fn empty_and_unreachable_states_go() {
        let mut hs = HdlScope::new(Id::from("f"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states = vec![
            State::new(Id::from("f_INIT"), 0, vec![go("f_S0")]),
            State::new(Id::from("f_S0"), 0, vec![go("f_S1")]),
            State::new(
                Id::from("f_S1"),
                0,
                vec![AStm::Expr(AExpr::Const(0)), go("f_FINISH")],
            ),
            State::new(Id::from("f_DEAD"), 0, vec![go("f_S1")]),
            State::new(
                Id::from("f_FINISH"),
                0,
                vec![AStm::Expr(AExpr::Const(1)), go("f_INIT")],
            ),
        ];
        stg.finish_state = Some(Id::from("f_FINISH"));
        hs.stgs.push(stg);
        let b0 = BlockId::new(0);
        hs.blk2states.insert(b0, vec![(0, Id::from("f_S0"))]);

        assert_eq!(reduce_states(&mut hs), 2);
        let names: Vec<Id> = hs.stgs[0].states.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["f_INIT", "f_S1", "f_FINISH"]);
        assert_eq!(hs.stgs[0].states[0].codes, vec![go("f_S1")]);
        assert_eq!(hs.blk2states[&b0], vec![(0, Id::from("f_S1"))]);
    }

    #[test]
    fn self_loops_are_kept() {
        let mut hs = HdlScope::new(Id::from("t"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("t"), None);
        stg.states = vec![
            State::new(Id::from("t_INIT"), 0, vec![go("t_FINISH")]),
            State::new(Id::from("t_FINISH"), 0, vec![go("t_FINISH")]),
        ];
        hs.stgs.push(stg);
        assert_eq!(reduce_states(&mut hs), 0);
        assert_eq!(hs.stgs[0].states.len(), 2);
    }

    proptest! {
        #[test]
        fn reduction_reaches_a_fixpoint(
            shape in prop::collection::vec((0usize..8, any::<bool>()), 1..8)
        ) {
            let n = shape.len();
            let name = |k: usize| format!("f_S{k}");
            let mut hs = HdlScope::new(Id::from("f"), ScopeId::new(0));
            let mut stg = Stg::new(Id::from("f"), None);
            for (k, (to, empty)) in shape.iter().enumerate() {
                let mut codes = vec![go(&name(to % n))];
                if !*empty {
                    codes.insert(0, AStm::Expr(AExpr::Const(k as i64)));
                }
                stg.states.push(State::new(Id::from(name(k)), 0, codes));
            }
            hs.stgs.push(stg);

            reduce_states(&mut hs);
            let stg = &hs.stgs[0];
            prop_assert_eq!(stg.states[0].name, Id::from("f_S0"));
            for st in stg.states.iter() {
                for t in st.transition_targets() {
                    let Target::State(t) = t else { unreachable!() };
                    prop_assert!(stg.has_state(t));
                }
            }
            prop_assert_eq!(reduce_states(&mut hs), 0);
        }
    }
}
