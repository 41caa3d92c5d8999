use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TYPEINST_LOG";

#[derive(Parser, Debug)]
#[command(name = "typeinst", version)]
#[command(about = "Instantiates generic Rust template packages into specialized source.", long_about = None)]
struct Cli {
    /// Log filter (error, warn, info, debug, trace). Defaults to $TYPEINST_LOG, then warn.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the module described by a manifest.
    Gen {
        #[arg(long)]
        manifest: PathBuf,
        /// Output Rust file.
        #[arg(long)]
        out: PathBuf,
        /// If set, fail if output differs; do not write.
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Resolve a manifest and print a JSON report of the packages.
    Inspect {
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Print the diagnostics catalog as Markdown.
    Diagnostics,
}

fn main() -> Result<()> {
    try_main().map_err(|err| {
        eprintln!("{err:#}");
        err
    })
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    match cli.command {
        Command::Gen {
            manifest,
            out,
            check,
        } => run_gen(&manifest, &out, check),
        Command::Inspect { manifest } => run_inspect(&manifest),
        Command::Diagnostics => {
            print!("{}", typeinst_core::diagnostics::render_diagnostics_md());
            Ok(())
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn manifest_base_dir(manifest_path: &Path) -> &Path {
    match manifest_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn run_gen(manifest_path: &Path, out_path: &Path, check: bool) -> Result<()> {
    let m = typeinst_core::manifest::load_manifest(manifest_path)?;
    let src = typeinst_core::generate(&m, manifest_base_dir(manifest_path))
        .with_context(|| format!("generate module {:?}", m.module))?;
    write_output(out_path, &src, check)?;
    info!("wrote {}", out_path.display());
    Ok(())
}

fn run_inspect(manifest_path: &Path) -> Result<()> {
    let m = typeinst_core::manifest::load_manifest(manifest_path)?;
    let session = typeinst_core::prepare(&m, manifest_base_dir(manifest_path))
        .with_context(|| format!("resolve module {:?}", m.module))?;
    let json = serde_json::to_string_pretty(&session.report()).context("encode report JSON")?;
    println!("{json}");
    Ok(())
}

fn write_output(out_path: &Path, src: &str, check: bool) -> Result<()> {
    if check {
        let cur = std::fs::read_to_string(out_path)
            .with_context(|| format!("read existing output: {}", out_path.display()))?;
        if cur != src {
            anyhow::bail!("generated output differs: {}", out_path.display());
        }
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
        }
    }
    std::fs::write(out_path, src.as_bytes())
        .with_context(|| format!("write output: {}", out_path.display()))?;
    Ok(())
}
