mod cmdline;
mod driver;

use polyphony_opt::pass_manager::PassResult;

fn main() -> PassResult<()> {
    driver::run_compiler()
}
