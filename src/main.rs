mod repl;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snippet_kernel::{KernelConfig, Repl};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// log the source of every snippet before it runs
    #[arg(long, env = "KERNEL_LOG_EXECUTION")]
    log_execution: bool,

    /// write every compiled unit into a fresh temporary directory
    #[arg(long, env = "KERNEL_WRITE_CLASSES")]
    write_classes: bool,

    /// write the archived units to this directory on exit
    #[arg(long, value_name = "DIR")]
    archive_dir: Option<PathBuf>,

    /// maximum number of renderer applications for one result
    #[arg(long, default_value_t = KernelConfig::default().max_render_steps)]
    max_render_steps: usize,

    /// maximum call depth inside a snippet
    #[arg(long, default_value_t = KernelConfig::default().max_call_depth)]
    max_call_depth: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// run a file, cells are separated by lines containing only `%%`
    Run {
        #[arg(name = "FILE")]
        file: PathBuf,
    },
}

impl Cli {
    fn config(&self) -> KernelConfig {
        KernelConfig {
            log_execution: self.log_execution,
            write_compiled_units: self.write_classes,
            max_render_steps: self.max_render_steps,
            max_call_depth: self.max_call_depth,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repl = Repl::new(&cli.config())?;
    if let Some(dir) = repl.class_output_dir() {
        eprintln!("writing compiled units to {}", dir.display());
    }

    match &cli.command {
        Some(Commands::Run { file }) => {
            let source = fs::read_to_string(file)
                .with_context(|| format!("could not read {}", file.display()))?;
            repl::run_cells(&repl, &source);
        }
        None => repl::start(&repl)?,
    }

    if let Some(dir) = &cli.archive_dir {
        write_archive(&repl, dir)?;
    }

    Ok(())
}

fn write_archive(repl: &Repl, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("could not create {}", dir.display()))?;
    for unit in repl.drain_archived_units() {
        let path = dir.join(unit.file_name());
        fs::write(&path, &unit.data).with_context(|| format!("could not write {}", path.display()))?;
    }
    Ok(())
}
