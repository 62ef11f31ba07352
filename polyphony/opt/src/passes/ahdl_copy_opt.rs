use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, HdlContext, HdlScope, HdlScopeId, SignalId,
    ahdl::{
        AExpr, AStm, SigTag,
        visitor::{AhdlMutator, SignalReplacer, SignalUsage, read_signals},
    },
};
use std::collections::{HashMap, HashSet};

/// Removes nets that only rename another signal.
///
/// A net with a single definition `net <- sig` and a single use in the same
/// state is dropped and its use reads `sig` instead.
#[derive(Default)]
pub struct AhdlCopyOpt;

impl Named for AhdlCopyOpt {
    fn name() -> &'static str {
        "ahdl-copy-opt"
    }

    fn description() -> &'static str {
        "Replace single-use net aliases with their source"
    }
}

/// The source of the move defining `sig`, removed from `codes`.
fn take_def(codes: &mut Vec<AStm>, sig: SignalId) -> Option<AExpr> {
    if let Some(pos) = codes.iter().position(|c| {
        matches!(c, AStm::Move { dst: AExpr::Var(d), src: AExpr::Var(_) } if *d == sig)
    }) {
        if let AStm::Move { src, .. } = codes.remove(pos) {
            return Some(src);
        }
    }
    codes
        .iter_mut()
        .find_map(|c| c.blocks_mut().into_iter().find_map(|b| take_def(b, sig)))
}

/// Whether `codes` hold the move `sig <- var`, nested ones included.
fn copies_into(codes: &[AStm], sig: SignalId) -> bool {
    codes.iter().any(|c| {
        matches!(c, AStm::Move { dst: AExpr::Var(d), src: AExpr::Var(_) } if *d == sig)
            || c.blocks().into_iter().any(|b| copies_into(b, sig))
    })
}

/// The first state, as `(stg, state)` indices, with a code list matching
/// `pred`.
fn locate<F: Fn(&[AStm]) -> bool>(hs: &HdlScope, pred: F) -> Option<(usize, usize)> {
    hs.stgs.iter().enumerate().find_map(|(i, stg)| {
        stg.states.iter().position(|st| {
            pred(&st.codes)
                || st
                    .pipeline
                    .as_ref()
                    .is_some_and(|p| p.stages.iter().any(|s| pred(&s.codes)))
        })
        .map(|k| (i, k))
    })
}

fn is_alias_net(hdl: &HdlContext, s: SignalId) -> bool {
    let sig = hdl.signal(s);
    sig.is_net()
        && !sig.width.is_array()
        && !sig.is_input()
        && !sig.is_output()
        && !sig.has_tag(SigTag::Ctrl)
        && !sig.has_tag(SigTag::PipelineCtrl)
        && !sig.has_tag(SigTag::Field)
}

/// Rewrite one alias per round until none is left. Returns the count.
///
/// A net only carries its value within the cycle it is driven in, so the
/// copy is folded only when it is read in the state that drives it.
pub fn copy_opt_scope(hdl: &mut HdlContext, h: HdlScopeId) -> usize {
    let mut removed = 0;
    let mut kept: HashSet<SignalId> = HashSet::new();
    loop {
        let usage = SignalUsage::of(hdl.scope(h));
        let candidate = hdl.signals_of(h).into_iter().find(|s| {
            !kept.contains(s)
                && is_alias_net(hdl, *s)
                && usage.defs.get(s) == Some(&1)
                && !usage.decl_defs.contains(s)
                && usage.use_count(*s) == 1
        });
        let Some(net) = candidate else {
            return removed;
        };
        let hs = hdl.scope(h);
        let def_at = locate(hs, |codes| copies_into(codes, net));
        let use_at = locate(hs, |codes| read_signals(codes).contains(&net));
        let Some((si, k)) = def_at.filter(|d| Some(*d) == use_at) else {
            kept.insert(net);
            continue;
        };
        let st = &mut hdl.scope_mut(h).stgs[si].states[k];
        let Some(src) = st
            .code_lists_mut()
            .into_iter()
            .find_map(|codes| take_def(codes, net))
        else {
            kept.insert(net);
            continue;
        };
        let map: HashMap<SignalId, AExpr> = [(net, src)].into_iter().collect();
        SignalReplacer { map: &map }.mutate_scope(hdl.scope_mut(h));
        hdl.remove_sig(net);
        removed += 1;
    }
}

impl Visitor for AhdlCopyOpt {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        let scopes: Vec<HdlScopeId> = ctx.hdl.scopes.keys().collect();
        for h in scopes {
            let n = copy_opt_scope(&mut ctx.hdl, h);
            if n > 0 {
                log::debug!("{}: {n} net alias(es) removed", ctx.hdl.scope(h).name);
            }
        }
        Ok(Action::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{
        BinOpKind, ScopeId,
        ahdl::{SigSpec, State, Stg, sig_tags},
    };
    use polyphony_utils::{Id, idx::IndexRef};

    #[test]
    fn alias_net_is_bypassed() {
        let mut hdl = HdlContext::default();
        let h = hdl.add_scope(Id::from("f"), ScopeId::new(0));
        let reg = || SigSpec::scalar(8, sig_tags(&[SigTag::Reg]));
        let a = hdl.gen_sig(h, "a", reg());
        let b = hdl.gen_sig(h, "b", reg());
        let n = hdl.gen_sig(h, "n", SigSpec::scalar(8, sig_tags(&[SigTag::Net])));
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states.push(State::new(
            Id::from("f_S0"),
            0,
            vec![
                AStm::mv(AExpr::Var(n), AExpr::Var(a)),
                AStm::mv(
                    AExpr::Var(b),
                    AExpr::bin(BinOpKind::Add, AExpr::Var(n), AExpr::Const(1)),
                ),
            ],
        ));
        hdl.scope_mut(h).stgs.push(stg);

        assert_eq!(copy_opt_scope(&mut hdl, h), 1);
        assert_eq!(
            hdl.scope(h).stgs[0].states[0].codes,
            vec![AStm::mv(
                AExpr::Var(b),
                AExpr::bin(BinOpKind::Add, AExpr::Var(a), AExpr::Const(1))
            )]
        );
        assert_eq!(hdl.sig_by_name(h, "n"), None);
        // Nothing left to do.
        assert_eq!(copy_opt_scope(&mut hdl, h), 0);
    }

    #[test]
    fn nets_used_twice_stay() {
        let mut hdl = HdlContext::default();
        let h = hdl.add_scope(Id::from("f"), ScopeId::new(0));
        let a = hdl.gen_sig(h, "a", SigSpec::scalar(8, sig_tags(&[SigTag::Reg])));
        let n = hdl.gen_sig(h, "n", SigSpec::scalar(8, sig_tags(&[SigTag::Net])));
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states.push(State::new(
            Id::from("f_S0"),
            0,
            vec![
                AStm::mv(AExpr::Var(n), AExpr::Var(a)),
                AStm::mv(
                    AExpr::Var(a),
                    AExpr::bin(BinOpKind::Add, AExpr::Var(n), AExpr::Var(n)),
                ),
            ],
        ));
        hdl.scope_mut(h).stgs.push(stg);
        assert_eq!(copy_opt_scope(&mut hdl, h), 0);
    }

    #[test]
    fn computed_and_cross_state_nets_are_skipped() {
        let mut hdl = HdlContext::default();
        let h = hdl.add_scope(Id::from("f"), ScopeId::new(0));
        let reg = || SigSpec::scalar(8, sig_tags(&[SigTag::Reg]));
        let net = || SigSpec::scalar(8, sig_tags(&[SigTag::Net]));
        let a = hdl.gen_sig(h, "a", reg());
        let b = hdl.gen_sig(h, "b", reg());
        let sum = hdl.gen_sig(h, "sum", net());
        let late = hdl.gen_sig(h, "late", net());
        let copy = hdl.gen_sig(h, "copy", net());
        let mut stg = Stg::new(Id::from("f"), None);
        stg.states.push(State::new(
            Id::from("f_S0"),
            0,
            vec![
                AStm::mv(
                    AExpr::Var(sum),
                    AExpr::bin(BinOpKind::Add, AExpr::Var(a), AExpr::Const(1)),
                ),
                AStm::mv(AExpr::Var(b), AExpr::Var(sum)),
                AStm::mv(AExpr::Var(late), AExpr::Var(a)),
            ],
        ));
        stg.states.push(State::new(
            Id::from("f_S1"),
            1,
            vec![
                AStm::mv(AExpr::Var(b), AExpr::Var(late)),
                AStm::mv(AExpr::Var(copy), AExpr::Var(b)),
                AStm::mv(AExpr::Var(a), AExpr::Var(copy)),
            ],
        ));
        hdl.scope_mut(h).stgs.push(stg);

        assert_eq!(copy_opt_scope(&mut hdl, h), 1);
        assert_eq!(hdl.sig_by_name(h, "copy"), None);
        assert_eq!(hdl.sig_by_name(h, "sum"), Some(sum));
        // Driven in S0 but read in S1, where the net no longer holds `a`.
        assert_eq!(hdl.sig_by_name(h, "late"), Some(late));
        assert_eq!(
            hdl.scope(h).stgs[0].states[1].codes[1],
            AStm::mv(AExpr::Var(a), AExpr::Var(b))
        );
    }
}
