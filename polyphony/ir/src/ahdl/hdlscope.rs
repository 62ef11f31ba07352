use super::{ADecl, AExpr, AStm, SigTag, SigWidth, Signal};
use crate::{BlockId, HdlScopeId, ScopeId, SignalId, SymbolId};
use linked_hash_map::LinkedHashMap;
use polyphony_utils::{GetName, Id};
use std::collections::{BTreeSet, HashMap};

/// One stage of a pipelined loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStage {
    pub name: Id,
    pub step: u32,
    pub codes: Vec<AStm>,
    /// The stage only advances while this holds (stages that wait on I/O).
    pub enable: Option<AExpr>,
}

/// Control signals of a pipeline, one entry per stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineSignals {
    pub valid: Vec<SignalId>,
    pub ready: Vec<SignalId>,
    pub hold: Vec<SignalId>,
    pub last: Vec<SignalId>,
    pub enable: Vec<SignalId>,
    pub exit: Option<SignalId>,
    /// Counts the cycles of one initiation interval; only when `ii > 1`.
    pub substate: Option<SignalId>,
    /// High in the first cycle after the pipeline state is entered.
    pub init: Option<SignalId>,
}

/// A state running the stages of a pipelined loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub stages: Vec<PipelineStage>,
    pub signals: PipelineSignals,
    pub ii: u32,
    /// Loop condition evaluated when an iteration enters the first stage.
    pub cond: AExpr,
    /// No stage waits on I/O, so the stall-free control chain is used.
    pub stall_free: bool,
    /// Block to continue in when the loop finishes.
    pub exit_block: Option<BlockId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub name: Id,
    pub step: u32,
    pub codes: Vec<AStm>,
    pub pipeline: Option<PipelineState>,
}

impl State {
    pub fn new(name: Id, step: u32, codes: Vec<AStm>) -> Self {
        State {
            name,
            step,
            codes,
            pipeline: None,
        }
    }

    /// Targets of every transition in this state, nested ones included.
    pub fn transition_targets(&self) -> Vec<super::Target> {
        fn walk(codes: &[AStm], out: &mut Vec<super::Target>) {
            for c in codes {
                match c {
                    AStm::Transition(t) => out.push(t.clone()),
                    AStm::MetaWait {
                        transition: Some(t),
                        codes,
                        ..
                    } => {
                        walk(codes, out);
                        out.push(t.clone());
                    }
                    _ => {
                        for b in c.blocks() {
                            walk(b, out);
                        }
                    }
                }
            }
        }
        let mut out = vec![];
        walk(&self.codes, &mut out);
        out
    }

    pub fn is_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// The state's own codes followed by those of its pipeline stages.
    pub fn code_lists_mut(&mut self) -> Vec<&mut Vec<AStm>> {
        let mut out = vec![&mut self.codes];
        if let Some(p) = &mut self.pipeline {
            out.extend(p.stages.iter_mut().map(|s| &mut s.codes));
        }
        out
    }

    /// Apply `f` to every transition target of the state.
    pub fn for_each_target_mut<F: FnMut(&mut super::Target)>(&mut self, f: &mut F) {
        fn walk<F: FnMut(&mut super::Target)>(codes: &mut [AStm], f: &mut F) {
            for c in codes.iter_mut() {
                match c {
                    AStm::Transition(t)
                    | AStm::MetaWait {
                        transition: Some(t),
                        ..
                    } => f(t),
                    _ => {}
                }
                for b in c.blocks_mut() {
                    walk(b, f);
                }
            }
        }
        walk(&mut self.codes, f);
    }
}

impl GetName for State {
    fn name(&self) -> Id {
        self.name
    }
}

/// A state transition graph. `states[0]` is the init state.
#[derive(Clone, Debug, PartialEq)]
pub struct Stg {
    pub name: Id,
    pub states: Vec<State>,
    pub init_state: Option<Id>,
    pub finish_state: Option<Id>,
    /// Index of the enclosing STG in the owner's STG list.
    pub parent: Option<usize>,
}

impl Stg {
    pub fn new(name: Id, parent: Option<usize>) -> Self {
        Stg {
            name,
            states: vec![],
            init_state: None,
            finish_state: None,
            parent,
        }
    }

    pub fn state(&self, name: Id) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn state_mut(&mut self, name: Id) -> Option<&mut State> {
        self.states.iter_mut().find(|s| s.name == name)
    }

    pub fn has_state(&self, name: Id) -> bool {
        self.state(name).is_some()
    }

    pub fn is_main(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_init(&self, name: Id) -> bool {
        self.states.first().is_some_and(|s| s.name == name)
    }

    /// For each state, the states transitioning to it; a state appears
    /// once per transition.
    pub fn preds(&self) -> HashMap<Id, Vec<Id>> {
        let mut preds: HashMap<Id, Vec<Id>> = HashMap::new();
        for st in self.states.iter() {
            for t in st.transition_targets() {
                if let super::Target::State(n) = t {
                    preds.entry(n).or_default().push(st.name);
                }
            }
        }
        preds
    }

    /// Remove state `name`; returns it.
    pub fn remove_state(&mut self, name: Id) -> Option<State> {
        let pos = self.states.iter().position(|s| s.name == name)?;
        if self.finish_state == Some(name) {
            self.finish_state = None;
        }
        Some(self.states.remove(pos))
    }
}

/// An instance of another HDL scope wired into its parent.
#[derive(Clone, Debug, PartialEq)]
pub struct SubModule {
    pub name: Id,
    pub target: HdlScopeId,
    /// `(port name, connected signal)`.
    pub connections: Vec<(Id, SignalId)>,
    pub params: Vec<(Id, i64)>,
}

/// The hardware mirror of a scope.
#[derive(Clone, Debug, PartialEq)]
pub struct HdlScope {
    pub name: Id,
    pub scope: ScopeId,
    pub signals: LinkedHashMap<Id, SignalId>,
    pub sym2sig: HashMap<SymbolId, SignalId>,
    pub stgs: Vec<Stg>,
    pub submodules: Vec<SubModule>,
    pub decls: Vec<ADecl>,
    /// CFG block to `(stg index, state name)` of its states.
    pub blk2states: HashMap<BlockId, Vec<(usize, Id)>>,
    /// The HDL scopes whose FSMs live in this scope (module workers).
    pub fsm_owners: Vec<ScopeId>,
}

impl HdlScope {
    pub fn new(name: Id, scope: ScopeId) -> Self {
        HdlScope {
            name,
            scope,
            signals: LinkedHashMap::new(),
            sym2sig: HashMap::new(),
            stgs: vec![],
            submodules: vec![],
            decls: vec![],
            blk2states: HashMap::new(),
            fsm_owners: vec![],
        }
    }

    pub fn main_stgs(&self) -> impl Iterator<Item = (usize, &Stg)> {
        self.stgs.iter().enumerate().filter(|(_, s)| s.is_main())
    }

    /// Find a state by name in any STG.
    pub fn find_state(&self, name: Id) -> Option<(usize, &State)> {
        self.stgs
            .iter()
            .enumerate()
            .find_map(|(i, stg)| stg.state(name).map(|s| (i, s)))
    }

    pub fn find_state_mut(&mut self, name: Id) -> Option<&mut State> {
        self.stgs.iter_mut().find_map(|stg| stg.state_mut(name))
    }

    pub fn all_states(&self) -> impl Iterator<Item = &State> {
        self.stgs.iter().flat_map(|s| s.states.iter())
    }

    /// Point the blocks mapped to state `old` at `new`, or forget them.
    pub fn replace_state_ref(&mut self, old: Id, new: Option<Id>) {
        for v in self.blk2states.values_mut() {
            v.retain_mut(|(_, s)| {
                if *s != old {
                    return true;
                }
                match new {
                    Some(n) => {
                        *s = n;
                        true
                    }
                    None => false,
                }
            });
            v.dedup();
        }
        self.blk2states.retain(|_, v| !v.is_empty());
    }
}

impl GetName for HdlScope {
    fn name(&self) -> Id {
        self.name
    }
}

/// Helper for signal creation requests.
pub struct SigSpec {
    pub width: SigWidth,
    pub signed: bool,
    pub tags: BTreeSet<SigTag>,
    pub init: Option<i64>,
    pub sym: Option<SymbolId>,
}

impl SigSpec {
    pub fn scalar(width: u32, tags: BTreeSet<SigTag>) -> Self {
        SigSpec {
            width: SigWidth::Scalar(width),
            signed: false,
            tags,
            init: None,
            sym: None,
        }
    }

    pub fn signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    pub fn init(mut self, init: Option<i64>) -> Self {
        self.init = init;
        self
    }

    pub fn sym(mut self, sym: SymbolId) -> Self {
        self.sym = Some(sym);
        self
    }

    pub fn array(elm: u32, len: u32, tags: BTreeSet<SigTag>) -> Self {
        SigSpec {
            width: SigWidth::Array { elm, len },
            signed: false,
            tags,
            init: None,
            sym: None,
        }
    }

    pub(super) fn build(self, name: Id, scope: HdlScopeId) -> Signal {
        Signal {
            name,
            width: self.width,
            signed: self.signed,
            tags: self.tags,
            init: self.init,
            scope,
            sym: self.sym,
            subscope: None,
        }
    }
}
