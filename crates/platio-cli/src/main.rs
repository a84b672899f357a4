//! `platio`: command-line interface for platform signals and controls.
//!
//! ```text
//! USAGE:
//!   platio read <name> <domain> <index>            Read one signal
//!   platio write <name> <domain> <index> <value>   Write one control
//!   platio batch [file] [--strict]                 Run a batch request script
//!   platio domains                                 Domain counts on this node
//!   platio nested <inner> <outer> <index>          Inner indices within an outer instance
//!   platio info [name]                             List signals and controls
//!   platio cache                                   Create the topology cache
//! ```
//!
//! Configuration comes from `PLATIO_TOPO_CACHE`, `PLATIO_BACKEND` and
//! `PLATIO_SYSFS_ROOT`; the global flags override them.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use platio_driver::{
    run_batch, select_backend, BackendSelection, BatchMode, DomainRef, PioConfig, PlatformIo,
    TopologyCache,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "platio", about = "Platform signal and control access", version)]
struct Cli {
    /// Backend: auto, sysfs or software.
    #[arg(long, global = true)]
    backend: Option<BackendSelection>,

    /// Topology cache file.
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Root of the sysfs tree.
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read one signal immediately.
    Read {
        /// Signal name (e.g. CPU_FREQUENCY_STATUS).
        name: String,
        /// Domain name (e.g. package) or integer value.
        domain: String,
        /// Domain index.
        index: i64,
    },
    /// Write one control immediately.
    Write {
        /// Control name (e.g. CPU_FREQUENCY_MAX_CONTROL).
        name: String,
        /// Domain name (e.g. package) or integer value.
        domain: String,
        /// Domain index.
        index: i64,
        /// Setting to apply.
        value: f64,
    },
    /// Run a batch request script: `NAME DOMAIN INDEX [VALUE]` per line.
    Batch {
        /// Script file; standard input if omitted or `-`.
        file: Option<PathBuf>,
        /// Abort on the first bad line before writing anything.
        #[arg(long)]
        strict: bool,
    },
    /// Print the number of instances of every domain.
    Domains,
    /// Print the inner-domain indices contained in one outer instance.
    Nested {
        /// Inner domain.
        inner: String,
        /// Outer domain.
        outer: String,
        /// Outer domain index.
        index: i64,
    },
    /// List signals and controls, or describe one.
    Info {
        /// Signal or control name.
        name: Option<String>,
    },
    /// Create the topology cache if it is missing or invalid.
    Cache,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config(&cli);
    tracing::debug!("{config:?}");

    match cli.command {
        Cmd::Read { name, domain, index } => cmd_read(&config, &name, &domain, index)?,
        Cmd::Write {
            name,
            domain,
            index,
            value,
        } => cmd_write(&config, &name, &domain, index, value)?,
        Cmd::Batch { file, strict } => cmd_batch(&config, file, strict)?,
        Cmd::Domains => cmd_domains(&config)?,
        Cmd::Nested {
            inner,
            outer,
            index,
        } => cmd_nested(&config, &inner, &outer, index)?,
        Cmd::Info { name } => cmd_info(&config, name.as_deref())?,
        Cmd::Cache => cmd_cache(&config)?,
    }

    Ok(())
}

fn config(cli: &Cli) -> PioConfig {
    let mut config = PioConfig::from_env();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(path) = &cli.cache_path {
        config.cache_path.clone_from(path);
    }
    if let Some(root) = &cli.sysfs_root {
        config.sysfs_root.clone_from(root);
    }
    config
}

/// Integer strings are domain values, anything else a domain name
fn domain_arg(text: &str) -> DomainRef {
    text.parse::<i64>()
        .map_or_else(|_| DomainRef::from(text), DomainRef::Index)
}

fn open(config: &PioConfig) -> Result<PlatformIo> {
    PlatformIo::from_config(config).context("Failed to initialize platform I/O")
}

fn cmd_read(config: &PioConfig, name: &str, domain: &str, index: i64) -> Result<()> {
    let pio = open(config)?;
    let value = pio
        .read_signal(name, domain_arg(domain), index)
        .with_context(|| format!("Cannot read {name} {domain} {index}"))?;
    println!("{}", pio.format_signal(name, value)?);
    Ok(())
}

fn cmd_write(config: &PioConfig, name: &str, domain: &str, index: i64, value: f64) -> Result<()> {
    let pio = open(config)?;
    pio.write_control(name, domain_arg(domain), index, value)
        .with_context(|| format!("Cannot write {name} {domain} {index}"))?;
    Ok(())
}

fn cmd_batch(config: &PioConfig, file: Option<PathBuf>, strict: bool) -> Result<()> {
    let input = match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?,
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Cannot read standard input")?;
            text
        }
    };

    let mode = if strict {
        BatchMode::Strict
    } else {
        BatchMode::PerLine
    };
    let pio = open(config)?;
    let report = run_batch(&pio, &input, mode)?;

    for read in &report.reads {
        let value = pio.format_signal(read.request.name(), read.value)?;
        println!("{value}");
    }
    for (line, err) in report.rejected.iter().chain(&report.unread) {
        eprintln!("line {line}: {err}");
    }
    for failure in &report.failed {
        eprintln!("write failed: {failure}");
    }

    if !report.is_success() {
        bail!(
            "{} line(s) rejected, {} read(s) failed, {} write(s) failed",
            report.rejected.len(),
            report.unread.len(),
            report.failed.len()
        );
    }
    Ok(())
}

fn cmd_domains(config: &PioConfig) -> Result<()> {
    let pio = open(config)?;
    for (domain, count) in pio.topology().domain_counts()? {
        println!("{domain:<28}{count}");
    }
    Ok(())
}

fn cmd_nested(config: &PioConfig, inner: &str, outer: &str, index: i64) -> Result<()> {
    let pio = open(config)?;
    let nested = pio
        .topology()
        .domain_nested(domain_arg(inner), domain_arg(outer), index)?;
    let text: Vec<String> = nested.iter().map(ToString::to_string).collect();
    println!("{}", text.join(" "));
    Ok(())
}

fn cmd_info(config: &PioConfig, name: Option<&str>) -> Result<()> {
    let pio = open(config)?;
    let registry = pio.registry();

    let Some(name) = name else {
        println!("Signals:");
        for s in registry.signal_names() {
            println!("  {s}");
        }
        println!("Controls:");
        for c in registry.control_names() {
            println!("  {c}");
        }
        return Ok(());
    };

    if !registry.has_signal(name) && !registry.has_control(name) {
        bail!("No signal or control named {name}");
    }
    if let Ok(info) = registry.signal_info(name) {
        println!("{name} (signal)");
        println!("  description : {}", registry.signal_description(name)?);
        println!("  domain      : {}", info.domain);
        println!("  aggregation : {}", info.aggregation.name());
        println!("  format      : {}", info.format.name());
        println!("  behavior    : {}", info.behavior.name());
        println!("  id          : {:#018x}", info.id);
    }
    if registry.has_control(name) {
        println!("{name} (control)");
        println!("  description : {}", registry.control_description(name)?);
        println!("  domain      : {}", registry.control_domain_type(name)?);
    }
    Ok(())
}

fn cmd_cache(config: &PioConfig) -> Result<()> {
    let backend = select_backend(config.backend, config)?;
    let cache = TopologyCache::new(&config.cache_path);
    cache
        .ensure_cache(backend.as_ref())
        .with_context(|| format!("Cannot create {}", cache.path().display()))?;
    println!("{}: {:?}", cache.path().display(), cache.status()?);
    Ok(())
}
