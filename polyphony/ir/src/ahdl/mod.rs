//! The hardware-level IR: HDL scopes, signals, state transition graphs and
//! AHDL statements.
mod hdlscope;
mod nodes;
mod printer;
mod signal;
pub mod visitor;

pub use hdlscope::{
    HdlScope, PipelineSignals, PipelineStage, PipelineState, SigSpec, State, Stg,
    SubModule,
};
pub use nodes::{ADecl, AExpr, AOp, AStm, MetaWaitKind, Target};
pub use printer::AhdlPrinter;
pub use signal::{SigTag, SigWidth, Signal, sig_tags};

use crate::{HdlScopeId, ScopeId, SignalId, SymbolId};
use polyphony_utils::{Id, idx::IndexedMap};
use std::collections::HashMap;

/// Owns every HDL scope and signal, and maps IR scopes to HDL scopes.
#[derive(Clone, Debug, Default)]
pub struct HdlContext {
    pub scopes: IndexedMap<HdlScopeId, HdlScope>,
    pub signals: IndexedMap<SignalId, Signal>,
    pub scope_map: HashMap<ScopeId, HdlScopeId>,
}

impl HdlContext {
    /// Create (or return the existing) HDL scope for `scope`.
    pub fn add_scope(&mut self, name: Id, scope: ScopeId) -> HdlScopeId {
        if let Some(h) = self.scope_map.get(&scope) {
            return *h;
        }
        let h = self.scopes.push(HdlScope::new(name, scope));
        self.scope_map.insert(scope, h);
        h
    }

    /// Let `scope` share the HDL scope `h`; used for workers, whose FSMs
    /// live in their module.
    pub fn alias_scope(&mut self, scope: ScopeId, h: HdlScopeId) {
        self.scope_map.insert(scope, h);
        if !self.scopes[h].fsm_owners.contains(&scope) {
            self.scopes[h].fsm_owners.push(scope);
        }
    }

    pub fn hdl_of(&self, scope: ScopeId) -> Option<HdlScopeId> {
        self.scope_map.get(&scope).copied()
    }

    pub fn scope(&self, h: HdlScopeId) -> &HdlScope {
        &self.scopes[h]
    }

    pub fn scope_mut(&mut self, h: HdlScopeId) -> &mut HdlScope {
        &mut self.scopes[h]
    }

    pub fn signal(&self, s: SignalId) -> &Signal {
        &self.signals[s]
    }

    pub fn signal_mut(&mut self, s: SignalId) -> &mut Signal {
        &mut self.signals[s]
    }

    pub fn sig_name(&self, s: SignalId) -> Id {
        self.signals[s].name
    }

    /// Get or create the signal `name` in `h`. An existing signal keeps its
    /// width and gains the requested tags.
    pub fn gen_sig(&mut self, h: HdlScopeId, name: &str, spec: SigSpec) -> SignalId {
        let name = Id::from(name);
        if let Some(s) = self.scopes[h].signals.get(&name).copied() {
            let tags = spec.tags;
            self.signals[s].tags.extend(tags);
            if let Some(sym) = spec.sym {
                self.scopes[h].sym2sig.insert(sym, s);
            }
            return s;
        }
        let sym = spec.sym;
        let id = self.signals.push(spec.build(name, h));
        self.scopes[h].signals.insert(name, id);
        if let Some(sym) = sym {
            self.scopes[h].sym2sig.insert(sym, id);
        }
        id
    }

    pub fn sig_by_name(&self, h: HdlScopeId, name: &str) -> Option<SignalId> {
        self.scopes[h].signals.get(&Id::from(name)).copied()
    }

    pub fn sig_of_sym(&self, h: HdlScopeId, sym: SymbolId) -> Option<SignalId> {
        self.scopes[h].sym2sig.get(&sym).copied()
    }

    /// Drop a signal from its scope's table. The arena slot stays.
    pub fn remove_sig(&mut self, s: SignalId) {
        let (h, name) = (self.signals[s].scope, self.signals[s].name);
        self.scopes[h].signals.remove(&name);
        self.scopes[h].sym2sig.retain(|_, v| *v != s);
    }

    /// Signals of `h` in creation order.
    pub fn signals_of(&self, h: HdlScopeId) -> Vec<SignalId> {
        self.scopes[h].signals.values().copied().collect()
    }

    /// Mark `s` as naming an instance of `sub`.
    pub fn set_subscope(&mut self, s: SignalId, sub: HdlScopeId) {
        self.signals[s].subscope = Some(sub);
        self.signals[s].add_tag(SigTag::Subscope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyphony_utils::idx::IndexRef;

    #[test]
    fn signal_names_are_unique_per_scope() {
        let mut hdl = HdlContext::default();
        let a = hdl.add_scope(Id::from("a"), ScopeId::new(1));
        let b = hdl.add_scope(Id::from("b"), ScopeId::new(2));
        assert_eq!(hdl.add_scope(Id::from("a"), ScopeId::new(1)), a);
        let x = hdl.gen_sig(a, "x", SigSpec::scalar(8, sig_tags(&[SigTag::Reg])));
        let x2 = hdl.gen_sig(a, "x", SigSpec::scalar(32, sig_tags(&[SigTag::Output])));
        let y = hdl.gen_sig(b, "x", SigSpec::scalar(8, sig_tags(&[SigTag::Net])));
        assert_eq!(x, x2);
        assert_ne!(x, y);
        assert_eq!(hdl.signal(x).width, SigWidth::Scalar(8));
        assert!(hdl.signal(x).is_output() && hdl.signal(x).is_reg());
        hdl.remove_sig(x);
        assert_eq!(hdl.sig_by_name(a, "x"), None);
    }
}
