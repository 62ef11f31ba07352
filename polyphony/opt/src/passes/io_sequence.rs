use crate::traversal::{Action, Named, VisResult, Visitor};
use polyphony_ir::{
    self as ir, HdlScope, HdlScopeId, SignalId,
    ahdl::{
        AStm, SigTag, State, Target,
        visitor::{read_signals, written_signals},
    },
};
use polyphony_utils::Id;
use std::{collections::HashSet, slice};

/// Splits states that touch one port more than once.
///
/// A port is sampled once per cycle, so a second access to the same port
/// in a state moves it and everything after it into a new state.
#[derive(Default)]
pub struct IoSequence;

impl Named for IoSequence {
    fn name() -> &'static str {
        "io-sequence"
    }

    fn description() -> &'static str {
        "Split states accessing the same port twice"
    }
}

fn ports_of(c: &AStm, ports: &HashSet<SignalId>) -> HashSet<SignalId> {
    let one = slice::from_ref(c);
    read_signals(one)
        .into_iter()
        .chain(written_signals(one))
        .filter(|s| ports.contains(s))
        .collect()
}

/// Index of the first code repeating a port access, if the state may be
/// split there.
fn split_point(codes: &[AStm], ports: &HashSet<SignalId>) -> Option<usize> {
    let mut seen = HashSet::new();
    for (i, c) in codes.iter().enumerate() {
        let used = ports_of(c, ports);
        if i > 0 && !used.is_disjoint(&seen) {
            return Some(i);
        }
        if c.is_wait() || c.is_transition() {
            return None;
        }
        seen.extend(used);
    }
    None
}

fn fresh_name(hs: &HdlScope, si: usize, base: Id) -> Id {
    let mut n = 1;
    loop {
        let name = Id::from(format!("{base}_{n}"));
        if !hs.stgs[si].has_state(name) {
            return name;
        }
        n += 1;
    }
}

fn split_one(hs: &mut HdlScope, si: usize, ports: &HashSet<SignalId>) -> bool {
    let found = hs.stgs[si].states.iter().enumerate().find_map(|(pos, st)| {
        if st.is_pipeline() {
            return None;
        }
        split_point(&st.codes, ports).map(|i| (pos, i))
    });
    let Some((pos, i)) = found else {
        return false;
    };
    let old = hs.stgs[si].states[pos].name;
    let name = fresh_name(hs, si, old);
    let st = &mut hs.stgs[si].states[pos];
    let mut rest = st.codes.split_off(i);
    if rest.is_empty() {
        rest.push(AStm::Transition(Target::Next));
    }
    st.codes.push(AStm::Transition(Target::State(name)));
    let step = st.step;
    hs.stgs[si]
        .states
        .insert(pos + 1, State::new(name, step, rest));
    for v in hs.blk2states.values_mut() {
        if let Some(at) = v.iter().position(|(s, n)| *s == si && *n == old) {
            v.insert(at + 1, (si, name));
        }
    }
    true
}

/// Split the states of `hs` until no state touches a port twice.
pub fn sequence_io(hs: &mut HdlScope, ports: &HashSet<SignalId>) -> usize {
    let mut n = 0;
    for si in 0..hs.stgs.len() {
        while split_one(hs, si, ports) {
            n += 1;
        }
    }
    n
}

fn port_signals(ctx: &ir::Context, h: HdlScopeId) -> HashSet<SignalId> {
    ctx.hdl
        .signals_of(h)
        .into_iter()
        .filter(|s| {
            let sig = ctx.hdl.signal(*s);
            if sig.has_tag(SigTag::Ctrl) {
                return false;
            }
            match sig.sym {
                Some(sym) => ctx.sym(sym).typ.is_port(),
                None => false,
            }
        })
        .collect()
}

impl Visitor for IoSequence {
    fn start_context(&mut self, ctx: &mut ir::Context) -> VisResult {
        let scopes: Vec<HdlScopeId> = ctx.hdl.scopes.keys().collect();
        for h in scopes {
            let ports = port_signals(ctx, h);
            if ports.is_empty() {
                continue;
            }
            let n = sequence_io(ctx.hdl.scope_mut(h), &ports);
            if n > 0 {
                log::debug!("{}: {n} state(s) split on port access", ctx.hdl.scope(h).name);
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
        ahdl::{AExpr, Stg},
    };
    use polyphony_utils::idx::IndexRef;

    fn go(n: &str) -> AStm {
        AStm::Transition(Target::State(Id::from(n)))
    }

    #[test]
    fn second_port_write_moves_to_a_new_state() {
        let (p, x) = (SignalId::new(0), SignalId::new(1));
        let mut hs = HdlScope::new(Id::from("w"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("w"), None);
        stg.states = vec![
            State::new(Id::from("w_INIT"), 0, vec![go("w_S0")]),
            State::new(
                Id::from("w_S0"),
                0,
                vec![
                    AStm::mv(AExpr::Var(p), AExpr::Const(1)),
                    AStm::mv(AExpr::Var(x), AExpr::Const(3)),
                    AStm::mv(AExpr::Var(p), AExpr::Const(0)),
                    go("w_INIT"),
                ],
            ),
        ];
        hs.stgs.push(stg);
        let b = BlockId::new(1);
        hs.blk2states.insert(b, vec![(0, Id::from("w_S0"))]);
        let ports: HashSet<SignalId> = [p].into_iter().collect();

        assert_eq!(sequence_io(&mut hs, &ports), 1);
        let stg = &hs.stgs[0];
        let names: Vec<Id> = stg.states.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["w_INIT", "w_S0", "w_S0_1"]);
        assert_eq!(
            stg.states[1].codes,
            vec![
                AStm::mv(AExpr::Var(p), AExpr::Const(1)),
                AStm::mv(AExpr::Var(x), AExpr::Const(3)),
                go("w_S0_1"),
            ]
        );
        assert_eq!(
            stg.states[2].codes,
            vec![AStm::mv(AExpr::Var(p), AExpr::Const(0)), go("w_INIT")]
        );
        assert_eq!(
            hs.blk2states[&b],
            vec![(0, Id::from("w_S0")), (0, Id::from("w_S0_1"))]
        );
    }

    #[test]
    fn distinct_ports_share_a_state() {
        let (p, q) = (SignalId::new(0), SignalId::new(1));
        let mut hs = HdlScope::new(Id::from("w"), ScopeId::new(0));
        let mut stg = Stg::new(Id::from("w"), None);
        stg.states = vec![State::new(
            Id::from("w_S0"),
            0,
            vec![
                AStm::mv(AExpr::Var(p), AExpr::Const(1)),
                AStm::mv(AExpr::Var(q), AExpr::Const(1)),
                go("w_S0"),
            ],
        )];
        hs.stgs.push(stg);
        let ports: HashSet<SignalId> = [p, q].into_iter().collect();
        assert_eq!(sequence_io(&mut hs, &ports), 0);
    }
}
