use jake::cli;
use jake::error::JakeError;
use jake::orchestrator::{self, RunRequest};
use std::process::exit;

fn entry() -> Result<(), JakeError> {
  let invocation = cli::parse_args();

  if let Some(shell) = &invocation.completions_shell {
    return cli::print_completions(shell);
  }

  cli::set_up_logging(invocation.verbose, &invocation.config);
  let interrupted = cli::set_up_signal_handler()?;

  if invocation.list || invocation.summary {
    let jakefile = orchestrator::load(&invocation.jakefile_path)?;
    orchestrator::list_recipes(&jakefile);
    return Ok(());
  }

  if let Some(name) = &invocation.show {
    let jakefile = orchestrator::load(&invocation.jakefile_path)?;
    return orchestrator::show_recipe(&jakefile, name);
  }

  let request = RunRequest {
    jakefile_path: invocation.jakefile_path,
    target: invocation.target,
    trailing_args: invocation.trailing_args,
    dry_run: invocation.dry_run,
    verbose: invocation.verbose,
    auto_yes: invocation.auto_yes,
    watch_mode: invocation.watch_mode,
    jobs: invocation.jobs,
    interrupted,
    default_shell: invocation.config.shell.clone(),
  };

  orchestrator::run(request)
}

fn main() {
  if let Err(error) = entry() {
    error.report();
    exit(1);
  }
}
