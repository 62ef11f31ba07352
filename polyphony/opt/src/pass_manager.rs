//! The PassManager registers passes by name, groups them into aliases and
//! runs a plan built from inclusion and exclusion lists.
use crate::traversal;
use polyphony_ir as ir;
use polyphony_utils::{Error, MultiError};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Instant;

pub type PassResult<T> = std::result::Result<T, MultiError>;

/// A registered pass, ready to run on a whole program.
pub type PassClosure = Box<dyn Fn(&mut ir::Context) -> PassResult<()>>;

#[derive(Default)]
pub struct PassManager {
    passes: HashMap<String, PassClosure>,
    /// Alias name to the passes it expands to, in order.
    aliases: HashMap<String, Vec<String>>,
    help: HashMap<String, String>,
}

impl PassManager {
    /// Register a pass; fails if the name is taken.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let mut pm = PassManager::default();
    /// pm.register_pass::<BlockReduce>()?;
    /// ```
    pub fn register_pass<Pass>(&mut self) -> PassResult<()>
    where
        Pass: traversal::Visitor + traversal::ConstructVisitor + traversal::Named,
    {
        self.register_generic_pass::<Pass>(Box::new(|ctx| {
            Pass::do_pass_default(ctx)?;
            Ok(())
        }))
    }

    /// Register a pass that gathers diagnostics. Every error it collected is
    /// reported together; warnings are only logged when there are no errors.
    pub fn register_diagnostic<Pass>(&mut self) -> PassResult<()>
    where
        Pass: traversal::Visitor
            + traversal::ConstructVisitor
            + traversal::Named
            + traversal::DiagnosticPass,
    {
        self.register_generic_pass::<Pass>(Box::new(|ctx| {
            let mut visitor = Pass::from(ctx)?;
            visitor.do_pass(ctx)?;

            let errors: Vec<_> = visitor.diagnostics().errors_iter().cloned().collect();
            if !errors.is_empty() {
                return Err(MultiError::from(errors));
            }
            for warning in visitor.diagnostics().warning_iter() {
                log::warn!(target: Pass::name(), "{}", ctx.sources.format_error(warning));
                ctx.warnings.push(warning.clone());
            }
            Ok(())
        }))
    }

    fn register_generic_pass<Pass>(&mut self, pass_closure: PassClosure) -> PassResult<()>
    where
        Pass: traversal::Visitor + traversal::ConstructVisitor + traversal::Named,
    {
        let name = Pass::name().to_string();
        if self.passes.contains_key(&name) {
            return Err(Error::misc(format!("Pass with name '{name}' is already registered.")).into());
        }
        self.passes.insert(name.clone(), pass_closure);
        let mut help = format!("- {}: {}", name, Pass::description());
        for opt in Pass::opts() {
            let _ = write!(
                &mut help,
                "\n  * {}: {} (default: {})",
                opt.name(),
                opt.description(),
                opt.default()
            );
        }
        self.help.insert(name, help);
        Ok(())
    }

    /// Add an alias for a group of passes. Members may themselves be aliases,
    /// which are expanded in place.
    pub fn add_alias(&mut self, name: String, passes: Vec<String>) -> PassResult<()> {
        if self.aliases.contains_key(&name) {
            return Err(Error::misc(format!("Alias with name '{name}' already registered.")).into());
        }
        let mut all_passes = vec![];
        for pass in passes {
            if let Some(members) = self.aliases.get(&pass) {
                all_passes.extend(members.iter().cloned());
            } else if self.passes.contains_key(&pass) {
                all_passes.push(pass);
            } else {
                return Err(Error::misc(format!("No pass or alias named: {pass}")).into());
            }
        }
        self.aliases.insert(name, all_passes);
        Ok(())
    }

    /// Help text of one pass or alias.
    pub fn specific_help(&self, pass: &str) -> Option<String> {
        self.help.get(pass).cloned().or_else(|| {
            self.aliases.get(pass).map(|passes| {
                let pass_str = passes
                    .iter()
                    .map(|p| format!("- {p}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("`{pass}' is an alias for pass pipeline:\n{pass_str}")
            })
        })
    }

    /// Help text listing every pass and alias.
    pub fn complete_help(&self) -> String {
        let mut ret = String::with_capacity(1000);

        let mut pass_names = self.passes.keys().collect::<Vec<_>>();
        pass_names.sort();
        ret.push_str("Passes:\n");
        for pass in pass_names {
            let _ = writeln!(ret, "{}", self.help[pass]);
        }

        let mut aliases = self.aliases.iter().collect::<Vec<_>>();
        aliases.sort_by(|a, b| a.0.cmp(b.0));
        ret.push_str("\nAliases:\n");
        for (alias, passes) in aliases {
            let _ = writeln!(ret, "- {}: {}", alias, passes.join(", "));
        }
        ret
    }

    /// The passes an alias stands for, or the name itself when it is not an
    /// alias.
    fn resolve_alias(&self, maybe_alias: &str) -> Vec<String> {
        self.aliases
            .get(maybe_alias)
            .cloned()
            .unwrap_or_else(|| vec![maybe_alias.to_string()])
    }

    /// Expand the inclusion and exclusion lists and check every name.
    pub fn create_plan(
        &self,
        incls: &[String],
        excls: &[String],
    ) -> PassResult<(Vec<String>, HashSet<String>)> {
        let passes = incls
            .iter()
            .flat_map(|maybe_alias| self.resolve_alias(maybe_alias))
            .collect::<Vec<_>>();

        let excl_set = excls
            .iter()
            .flat_map(|maybe_alias| self.resolve_alias(maybe_alias))
            .collect::<HashSet<String>>();

        for pass in passes.iter().chain(excl_set.iter()) {
            if !self.passes.contains_key(pass) {
                return Err(Error::misc(format!(
                    "Unknown pass: {pass}. Run the compiler with --list-passes to view registered passes."
                ))
                .into());
            }
        }
        Ok((passes, excl_set))
    }

    /// Run the plan built from `incl` and `excl` on `ctx`.
    pub fn execute_plan(
        &self,
        ctx: &mut ir::Context,
        incl: &[String],
        excl: &[String],
        dump_ir: bool,
    ) -> PassResult<()> {
        let (passes, excl_set) = self.create_plan(incl, excl)?;

        for name in passes {
            if excl_set.contains(&name) {
                log::info!("{name}: Ignored");
                continue;
            }
            // Names were validated by create_plan.
            let pass = &self.passes[&name];
            let start = Instant::now();
            pass(ctx)?;
            if dump_ir {
                println!("# after {name}");
                ir::Printer::write_context(ctx, &mut std::io::stdout()).map_err(Error::from)?;
            }
            let elapsed = start.elapsed();
            if elapsed.as_secs() > 5 {
                log::warn!("{name}: {}ms", elapsed.as_millis());
            } else {
                log::info!("{name}: {}ms", elapsed.as_millis());
            }
        }
        Ok(())
    }
}

/// Register an alias with a pass manager.
///
/// ## Example
/// ```rust,ignore
/// let mut pm = PassManager::default();
/// register_alias!(pm, "validate", [ScopeRules, TypeCheck]);
/// ```
#[macro_export]
macro_rules! register_alias {
    (@unwrap_name $pass:ident) => {
        $pass::name().to_string()
    };

    (@unwrap_name $pass:literal) => {
        $pass.to_string()
    };

    ($manager:expr, $alias:literal, [ $($pass:tt),* $(,)? ]) => {
        $manager.add_alias($alias.to_string(), vec![
            $(register_alias!(@unwrap_name $pass)),*
        ])?;
    };
}
