use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use cmd::DepSection;
use output::{Line, emit};

/// wharf - monorepo dependency manager and job scheduler
#[derive(Parser)]
#[command(name = "wharf")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Directory to discover the workspace from
  #[arg(short = 'C', long = "cwd", global = true, default_value = ".")]
  cwd: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Reconcile lockfiles and link dependencies
  Install {
    /// Project (name or path) whose graph to install; every project when omitted
    project: Option<PathBuf>,

    /// Fail if any lockfile would change
    #[arg(long)]
    frozen_lockfile: bool,

    /// Only update lockfiles
    #[arg(long)]
    skip_link: bool,
  },

  /// Add a dependency to a project
  Add {
    /// Package, optionally with a range (`lodash@^4.17.0`)
    package: String,

    /// Project to modify
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Dependency section to add to
    #[arg(short = 'S', long, value_enum, default_value_t = DepSection::Dependencies)]
    section: DepSection,
  },

  /// Remove a dependency from a project
  Remove {
    /// Package name
    name: String,

    /// Project to modify
    #[arg(short, long, default_value = ".")]
    project: PathBuf,
  },

  /// Change a dependency's range
  Upgrade {
    /// Package, optionally with a range; newest version when omitted
    package: String,

    /// Only upgrade declarations intersecting this range
    #[arg(long)]
    from: Option<String>,

    /// Limit the upgrade to one project
    #[arg(short, long)]
    project: Option<PathBuf>,
  },

  /// Upgrade a dependency across every project, updating lockfiles only
  Greenkeep {
    /// Package, optionally with a range; newest version when omitted
    package: String,
  },

  /// Align every lockfile on the newest shared versions
  Dedupe,

  /// Report cycles, version policy violations and stale lockfiles
  Doctor {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Split project scripts across CI nodes
  Plan {
    /// Scripts to schedule
    #[arg(required = true)]
    actions: Vec<String>,

    /// Number of CI nodes
    #[arg(short, long, default_value_t = 1)]
    nodes: usize,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Run a job list on local workers
  Batch {
    /// JSON file holding a job list, or a plan when `--node` is given
    file: PathBuf,

    /// Index of the plan node to run
    #[arg(long)]
    node: Option<usize>,

    /// Worker processes (defaults to the workspace setting, then core count)
    #[arg(short, long)]
    workers: Option<usize>,
  },

  /// Run a script in every project that defines it
  Each {
    /// Script name
    action: String,

    /// Arguments passed to every script
    #[arg(last = true)]
    args: Vec<String>,

    /// Worker processes (defaults to the workspace setting, then core count)
    #[arg(short, long)]
    workers: Option<usize>,
  },

  /// Build projects in dependency order, skipping unchanged ones
  Build {
    /// Project (name or path) whose graph to build; every project when omitted
    project: Option<PathBuf>,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      emit(&[Line::Failed(format!("{:#}", e))]);
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let cwd = cli.cwd.as_path();
  match cli.command {
    Commands::Install {
      project,
      frozen_lockfile,
      skip_link,
    } => cmd::cmd_install(cwd, project.as_deref(), frozen_lockfile, skip_link),
    Commands::Add {
      package,
      project,
      section,
    } => cmd::cmd_add(cwd, &project, &package, section),
    Commands::Remove { name, project } => cmd::cmd_remove(cwd, &project, &name),
    Commands::Upgrade { package, from, project } => {
      cmd::cmd_upgrade(cwd, project.as_deref(), &package, from.as_deref())
    }
    Commands::Greenkeep { package } => cmd::cmd_greenkeep(cwd, &package),
    Commands::Dedupe => cmd::cmd_dedupe(cwd),
    Commands::Doctor { json } => cmd::cmd_doctor(cwd, json),
    Commands::Plan { actions, nodes, json } => cmd::cmd_plan(cwd, &actions, nodes, json),
    Commands::Batch { file, node, workers } => cmd::cmd_batch(cwd, &file, node, workers),
    Commands::Each { action, args, workers } => cmd::cmd_each(cwd, &action, &args, workers),
    Commands::Build { project } => cmd::cmd_build(cwd, project.as_deref()),
  }
}
