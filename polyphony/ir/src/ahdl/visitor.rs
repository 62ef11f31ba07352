//! Walking and rewriting AHDL statements.
use super::{ADecl, AExpr, AStm, HdlScope, State};
use crate::SignalId;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Read-only traversal. Default methods recurse into every child.
pub trait AhdlVisitor {
    fn visit_expr(&mut self, e: &AExpr) {
        for k in e.kids() {
            self.visit_expr(k);
        }
    }

    /// Called for the written side of moves and loads.
    fn visit_def(&mut self, _sig: SignalId, _stm: &AStm) {}

    fn visit_stm(&mut self, s: &AStm) {
        for e in s.read_exprs() {
            self.visit_expr(e);
        }
        if let Some(sig) = s.def_signal() {
            self.visit_def(sig, s);
        }
        if let AStm::Seq { factor, .. } = s {
            self.visit_stm(factor);
        }
        for b in s.blocks() {
            self.visit_stms(b);
        }
    }

    fn visit_stms(&mut self, codes: &[AStm]) {
        for c in codes {
            self.visit_stm(c);
        }
    }

    fn visit_state(&mut self, st: &State) {
        self.visit_stms(&st.codes);
        if let Some(p) = &st.pipeline {
            for stage in &p.stages {
                if let Some(en) = &stage.enable {
                    self.visit_expr(en);
                }
                self.visit_stms(&stage.codes);
            }
        }
    }

    fn visit_decl(&mut self, d: &ADecl) {
        match d {
            ADecl::Assign { src, .. } => self.visit_expr(src),
            ADecl::Comb { codes } => self.visit_stms(codes),
            ADecl::Function { .. } | ADecl::Mux { .. } | ADecl::Demux { .. } => {}
        }
    }

    fn visit_scope(&mut self, hs: &HdlScope) {
        for d in &hs.decls {
            self.visit_decl(d);
        }
        for stg in &hs.stgs {
            for st in &stg.states {
                self.visit_state(st);
            }
        }
    }
}

/// In-place rewriting. `rewrite_expr` runs bottom-up on every expression;
/// `rewrite_stms` runs on every statement list after its children.
pub trait AhdlMutator {
    fn rewrite_expr(&mut self, _e: &mut AExpr) {}

    fn rewrite_stms(&mut self, _codes: &mut Vec<AStm>) {}

    fn mutate_expr(&mut self, e: &mut AExpr) {
        for k in e.kids_mut() {
            self.mutate_expr(k);
        }
        self.rewrite_expr(e);
    }

    fn mutate_stm(&mut self, s: &mut AStm) {
        for e in s.read_exprs_mut() {
            self.mutate_expr(e);
        }
        if let AStm::Seq { factor, .. } = s {
            self.mutate_stm(factor);
        }
        for b in s.blocks_mut() {
            self.mutate_stms(b);
        }
    }

    fn mutate_stms(&mut self, codes: &mut Vec<AStm>) {
        for c in codes.iter_mut() {
            self.mutate_stm(c);
        }
        self.rewrite_stms(codes);
    }

    fn mutate_state(&mut self, st: &mut State) {
        self.mutate_stms(&mut st.codes);
        if let Some(p) = &mut st.pipeline {
            for stage in &mut p.stages {
                if let Some(en) = &mut stage.enable {
                    self.mutate_expr(en);
                }
                self.mutate_stms(&mut stage.codes);
            }
        }
    }

    fn mutate_scope(&mut self, hs: &mut HdlScope) {
        for d in &mut hs.decls {
            match d {
                ADecl::Assign { src, .. } => self.mutate_expr(src),
                ADecl::Comb { codes } => self.mutate_stms(codes),
                _ => {}
            }
        }
        for stg in &mut hs.stgs {
            for st in &mut stg.states {
                self.mutate_state(st);
            }
        }
    }
}

/// Def and use counts of every signal in an HDL scope.
#[derive(Default, Debug)]
pub struct SignalUsage {
    pub defs: HashMap<SignalId, usize>,
    pub uses: HashMap<SignalId, usize>,
    /// Signals assigned by a module-level declaration.
    pub decl_defs: HashSet<SignalId>,
}

impl SignalUsage {
    pub fn of(hs: &HdlScope) -> Self {
        let mut u = SignalUsage::default();
        u.visit_scope(hs);
        for d in &hs.decls {
            match d {
                ADecl::Assign { dst, .. } => {
                    u.decl_defs.insert(*dst);
                }
                ADecl::Function { output, input, .. } => {
                    u.decl_defs.insert(*output);
                    *u.uses.entry(*input).or_default() += 1;
                }
                ADecl::Mux {
                    output,
                    selector,
                    inputs,
                } => {
                    u.decl_defs.insert(*output);
                    *u.uses.entry(*selector).or_default() += 1;
                    for i in inputs {
                        *u.uses.entry(*i).or_default() += 1;
                    }
                }
                ADecl::Demux {
                    outputs,
                    selector,
                    input,
                } => {
                    u.decl_defs.extend(outputs.iter().copied());
                    *u.uses.entry(*selector).or_default() += 1;
                    *u.uses.entry(*input).or_default() += 1;
                }
                ADecl::Comb { .. } => {}
            }
        }
        u
    }

    pub fn def_count(&self, s: SignalId) -> usize {
        self.defs.get(&s).copied().unwrap_or(0)
            + usize::from(self.decl_defs.contains(&s))
    }

    pub fn use_count(&self, s: SignalId) -> usize {
        self.uses.get(&s).copied().unwrap_or(0)
    }
}

impl AhdlVisitor for SignalUsage {
    fn visit_expr(&mut self, e: &AExpr) {
        if let Some(s) = e.signal() {
            *self.uses.entry(s).or_default() += 1;
        }
        for k in e.kids() {
            self.visit_expr(k);
        }
    }

    fn visit_def(&mut self, sig: SignalId, _stm: &AStm) {
        *self.defs.entry(sig).or_default() += 1;
    }
}

#[derive(Default)]
struct Written(BTreeSet<SignalId>);

impl AhdlVisitor for Written {
    fn visit_def(&mut self, sig: SignalId, _stm: &AStm) {
        self.0.insert(sig);
    }
}

#[derive(Default)]
struct Read(BTreeSet<SignalId>);

impl AhdlVisitor for Read {
    fn visit_expr(&mut self, e: &AExpr) {
        if let Some(s) = e.signal() {
            self.0.insert(s);
        }
        for k in e.kids() {
            self.visit_expr(k);
        }
    }
}

/// Signals written anywhere in `codes`.
pub fn written_signals(codes: &[AStm]) -> BTreeSet<SignalId> {
    let mut w = Written::default();
    w.visit_stms(codes);
    w.0
}

/// Signals read anywhere in `codes`.
pub fn read_signals(codes: &[AStm]) -> BTreeSet<SignalId> {
    let mut r = Read::default();
    r.visit_stms(codes);
    r.0
}

/// Replaces reads of a signal with an expression.
pub struct SignalReplacer<'a> {
    pub map: &'a HashMap<SignalId, AExpr>,
}

impl AhdlMutator for SignalReplacer<'_> {
    fn rewrite_expr(&mut self, e: &mut AExpr) {
        if let AExpr::Var(s) = e {
            if let Some(new) = self.map.get(s) {
                *e = new.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOpKind, ScopeId};
    use polyphony_utils::{Id, idx::IndexRef};

    #[test]
    fn usage_counts_and_replacement() {
        let (a, b, c) = (SignalId::new(0), SignalId::new(1), SignalId::new(2));
        let mut hs = HdlScope::new(Id::from("m"), ScopeId::new(0));
        let mut stg = super::super::Stg::new(Id::from("m"), None);
        stg.states.push(State::new(
            Id::from("m_INIT"),
            0,
            vec![
                AStm::mv(AExpr::Var(a), AExpr::Const(1)),
                AStm::mv(
                    AExpr::Var(c),
                    AExpr::bin(BinOpKind::Add, AExpr::Var(a), AExpr::Var(b)),
                ),
            ],
        ));
        hs.stgs.push(stg);
        let u = SignalUsage::of(&hs);
        assert_eq!(u.def_count(a), 1);
        assert_eq!(u.use_count(a), 1);
        assert_eq!(u.use_count(c), 0);

        let map: HashMap<_, _> = [(a, AExpr::Const(1))].into_iter().collect();
        SignalReplacer { map: &map }.mutate_scope(&mut hs);
        let u = SignalUsage::of(&hs);
        assert_eq!(u.use_count(a), 0);
    }
}
