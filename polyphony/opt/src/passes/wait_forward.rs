use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, HdlScope,
    ahdl::{
        AStm, MetaWaitKind, Stg, Target,
        visitor::{read_signals, written_signals},
    },
};
use polyphony_utils::Id;

/// Merges the state following a wait into the wait.
///
/// When the target of a user wait's transition is entered only from that
/// wait and does not wait itself, its codes run in the cycle the wait is
/// released. Handshake waits are left alone.
#[derive(Default)]
pub struct WaitForward;

impl Named for WaitForward {
    fn name() -> &'static str {
        "wait-forward"
    }

    fn description() -> &'static str {
        "Inline the single successor of a wait into the wait"
    }
}

fn has_wait(codes: &[AStm]) -> bool {
    codes
        .iter()
        .any(|c| c.is_wait() || c.blocks().into_iter().any(|b| has_wait(b)))
}

/// Whether the codes of `target` may run in the same cycle as `before`.
pub(super) fn can_inline(stg: &Stg, from: Id, target: Id, before: &[AStm]) -> bool {
    if target == from || stg.is_init(target) {
        return false;
    }
    let Some(t) = stg.state(target) else {
        return false;
    };
    if t.is_pipeline() || has_wait(&t.codes) {
        return false;
    }
    let preds = stg.preds();
    if preds.get(&target).map(|p| p.len()) != Some(1) {
        return false;
    }
    // Values written before are only visible a cycle later.
    let written = written_signals(before);
    read_signals(&t.codes).is_disjoint(&written)
}

/// One merge per call; returns whether something changed.
fn forward_one(hs: &mut HdlScope, si: usize) -> bool {
    let stg = &hs.stgs[si];
    let mut found = None;
    'search: for st in stg.states.iter() {
        for (i, c) in st.codes.iter().enumerate() {
            let AStm::MetaWait {
                kind,
                transition: Some(Target::State(t)),
                codes,
                ..
            } = c
            else {
                continue;
            };
            // Handshake states are kept apart from the body.
            if matches!(kind, MetaWaitKind::InputReady | MetaWaitKind::OutputAccept) {
                continue;
            }
            let mut before: Vec<AStm> = st.codes[..i].to_vec();
            before.extend(codes.iter().cloned());
            if can_inline(stg, st.name, *t, &before) {
                found = Some((st.name, i, *t));
                break 'search;
            }
        }
    }
    let Some((from, i, target)) = found else {
        return false;
    };
    let Some(t) = hs.stgs[si].remove_state(target) else {
        return false;
    };
    if let Some(st) = hs.stgs[si].state_mut(from) {
        if let AStm::MetaWait {
            codes, transition, ..
        } = &mut st.codes[i]
        {
            *transition = None;
            codes.extend(t.codes);
        }
    }
    hs.replace_state_ref(target, Some(from));
    true
}

pub fn forward_waits(hs: &mut HdlScope) -> usize {
    let mut n = 0;
    for si in 0..hs.stgs.len() {
        while forward_one(hs, si) {
            n += 1;
        }
    }
    n
}

impl Visitor for WaitForward {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        for (_, hs) in ctx.hdl.scopes.iter_mut() {
            let n = forward_waits(hs);
            if n > 0 {
                log::debug!("{}: {n} wait(s) forwarded", hs.name);
            }
        }
        Ok(Action::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{
        ScopeId, SignalId,
        ahdl::{AExpr, State},
    };
    use polyphony_utils::idx::IndexRef;

    fn go(n: &str) -> Target {
        Target::State(Id::from(n))
    }

    fn wait(on: SignalId, codes: Vec<AStm>, to: &str) -> AStm {
        AStm::MetaWait {
            kind: MetaWaitKind::Value,
            args: vec![AExpr::Var(on)],
            codes,
            transition: Some(go(to)),
        }
    }

    #[test]
    fn successor_joins_the_wait() {
        let (v, x, y) = (SignalId::new(0), SignalId::new(1), SignalId::new(2));
        let mut hs = HdlScope::new(Id::from("f"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states = vec![
            State::new(Id::from("f_INIT"), 0, vec![AStm::Transition(go("f_S0"))]),
            State::new(Id::from("f_S0"), 0, vec![wait(v, vec![], "f_S1")]),
            State::new(
                Id::from("f_S1"),
                0,
                vec![
                    AStm::mv(AExpr::Var(x), AExpr::Var(y)),
                    AStm::Transition(go("f_INIT")),
                ],
            ),
        ];
        hs.stgs.push(stg);

        assert_eq!(forward_waits(&mut hs), 1);
        let stg = &hs.stgs[0];
        assert_eq!(stg.states.len(), 2);
        assert_eq!(
            stg.states[1].codes,
            vec![AStm::MetaWait {
                kind: MetaWaitKind::Value,
                args: vec![AExpr::Var(v)],
                codes: vec![
                    AStm::mv(AExpr::Var(x), AExpr::Var(y)),
                    AStm::Transition(go("f_INIT")),
                ],
                transition: None,
            }]
        );
    }

    #[test]
    fn values_written_by_the_wait_block_merging() {
        let (v, x, y) = (SignalId::new(0), SignalId::new(1), SignalId::new(2));
        let mut hs = HdlScope::new(Id::from("f"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states = vec![
            State::new(Id::from("f_INIT"), 0, vec![AStm::Transition(go("f_S0"))]),
            State::new(
                Id::from("f_S0"),
                0,
                vec![wait(v, vec![AStm::mv(AExpr::Var(y), AExpr::Const(1))], "f_S1")],
            ),
            State::new(
                Id::from("f_S1"),
                0,
                vec![
                    AStm::mv(AExpr::Var(x), AExpr::Var(y)),
                    AStm::Transition(go("f_INIT")),
                ],
            ),
        ];
        hs.stgs.push(stg);
        assert_eq!(forward_waits(&mut hs), 0);
    }
}
