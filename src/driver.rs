//! Driver for the Polyphony compiler.
use crate::cmdline::Opts;
use polyphony_ir::{self as ir, ahdl::AhdlPrinter};
use polyphony_opt::pass_manager::{PassManager, PassResult};
use polyphony_utils::{Error, Id, MultiError};
use std::{fs, io::Write, path::Path};

/// Load a program serialized by the frontend.
fn load_context(path: &Path) -> PassResult<ir::Context> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::misc(format!("{}: {e}", path.display())))?;
    let ctx = serde_json::from_str(&text)
        .map_err(|e| Error::misc(format!("{}: malformed IR: {e}", path.display())))?;
    Ok(ctx)
}

/// Attach the source line to every error.
fn render(ctx: &ir::Context, errs: MultiError) -> MultiError {
    errs.into_errors()
        .into_iter()
        .map(|e| Error::misc(ctx.sources.format_error(&e)))
        .collect::<Vec<_>>()
        .into()
}

/// Run the compiler from the command line.
pub fn run_compiler() -> PassResult<()> {
    // parse the command line arguments into Opts struct
    let opts: Opts = argh::from_env();

    // enable tracing
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(opts.log_level)
        .target(env_logger::Target::Stderr)
        .init();

    let pm = PassManager::default_passes()?;

    // list all the avaliable passes when flag --list-passes is enabled
    if opts.list_passes {
        println!("{}", pm.complete_help());
        return Ok(());
    }

    let Some(file) = &opts.file else {
        return Err(Error::misc("No input file. Run with --help for usage.").into());
    };
    let mut ctx = load_context(file)?;
    opts.apply(&mut ctx.config);
    for src in opts.sources.iter() {
        let text = fs::read_to_string(src).map_err(Error::from)?;
        ctx.sources.add_file(Id::from(src.to_string_lossy().as_ref()), text);
    }
    // Extra options for the passes
    ctx.extra_opts = opts.extra_opts.clone();
    log::info!(
        "{}: {} scope(s), {} statement(s)",
        file.display(),
        ctx.scopes.len(),
        ctx.stms.len()
    );

    // Run all passes specified by the command line
    if let Err(errs) = pm.execute_plan(&mut ctx, &opts.pass, &opts.disable_pass, opts.dump_ir) {
        return Err(render(&ctx, errs));
    }
    for warning in ctx.warnings.iter() {
        log::warn!("{}", ctx.sources.format_error(warning));
    }

    // Print out the state machines after transformation.
    let out = &mut opts.output.get_write().map_err(Error::from)?;
    AhdlPrinter::write_all(&ctx, out).map_err(Error::from)?;
    out.flush().map_err(Error::from)?;
    Ok(())
}
