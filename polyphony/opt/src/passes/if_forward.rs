use super::wait_forward::can_inline;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, HdlScope,
    ahdl::{AStm, Target},
};

/// Pulls the target of a conditional transition into the branch taking it.
///
/// Applies only when the branch is the target's sole entry, so the target
/// state disappears and the branch does its work one cycle earlier.
#[derive(Default)]
pub struct IfForward;

impl Named for IfForward {
    fn name() -> &'static str {
        "if-forward"
    }

    fn description() -> &'static str {
        "Inline single-entry branch targets into the branch"
    }
}

fn forward_one(hs: &mut HdlScope, si: usize) -> bool {
    let stg = &hs.stgs[si];
    let mut found = None;
    'search: for st in stg.states.iter() {
        if st.is_pipeline() {
            continue;
        }
        for (i, c) in st.codes.iter().enumerate() {
            let AStm::TransitionIf { blocks, .. } = c else {
                continue;
            };
            for (bi, b) in blocks.iter().enumerate() {
                let Some(AStm::Transition(Target::State(t))) = b.last() else {
                    continue;
                };
                // The state's codes before the branch, and the branch itself.
                let mut before: Vec<AStm> = st.codes[..i].to_vec();
                before.extend(b[..b.len() - 1].iter().cloned());
                if can_inline(stg, st.name, *t, &before) {
                    found = Some((st.name, i, bi, *t));
                    break 'search;
                }
            }
        }
    }
    let Some((from, i, bi, target)) = found else {
        return false;
    };
    let Some(t) = hs.stgs[si].remove_state(target) else {
        return false;
    };
    if let Some(st) = hs.stgs[si].state_mut(from) {
        if let AStm::TransitionIf { blocks, .. } = &mut st.codes[i] {
            let b = &mut blocks[bi];
            b.pop();
            b.extend(t.codes);
        }
    }
    hs.replace_state_ref(target, Some(from));
    true
}

pub fn forward_ifs(hs: &mut HdlScope) -> usize {
    let mut n = 0;
    for si in 0..hs.stgs.len() {
        while forward_one(hs, si) {
            n += 1;
        }
    }
    n
}

impl Visitor for IfForward {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        for (_, hs) in ctx.hdl.scopes.iter_mut() {
            let n = forward_ifs(hs);
            if n > 0 {
                log::debug!("{}: {n} branch target(s) forwarded", hs.name);
            }
        }
        Ok(Action::Stop)
    }
}
