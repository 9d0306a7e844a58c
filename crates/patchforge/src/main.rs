use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use patchforge::driver::{ApplySelection, Driver, StdoutSink};
use patchforge::registry::{Registry, ToggleOutcome};
use patchforge::vcs::GitVcs;
use patchforge::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    roots: RootArgs,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct RootArgs {
    /// Path to the patch registry TOML
    #[arg(long, default_value = "patches/patches.toml")]
    config: PathBuf,
    /// Directory holding the patch artifacts
    #[arg(long, default_value = "patches")]
    patch_dir: PathBuf,
    /// Target working tree the patches apply to
    #[arg(long, default_value = "upstream")]
    tree: PathBuf,
    /// Directory for per-patch failure logs
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply the selected patches in dependency order
    Apply {
        /// Explicit patch ids (repeatable; may name disabled patches)
        #[arg(long = "patch", value_name = "ID")]
        patches: Vec<String>,
        /// Restrict the root set to one category's enabled patches
        #[arg(long, value_name = "KEY")]
        category: Option<String>,
        /// Apply every declared patch, enabled or not
        #[arg(long)]
        all: bool,
        /// Validate the selection without touching the tree
        #[arg(long)]
        dry_run: bool,
    },
    /// Report enabled/applied state per patch, grouped by category
    Status {
        #[arg(long, value_name = "KEY")]
        category: Option<String>,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// List declared patches grouped by category
    List {
        #[arg(long, value_name = "KEY")]
        category: Option<String>,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Enable a patch and persist the registry
    Enable {
        #[arg(long = "patch", value_name = "ID")]
        patch: String,
    },
    /// Disable a patch and persist the registry
    Disable {
        #[arg(long = "patch", value_name = "ID")]
        patch: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Apply {
            patches,
            category,
            all,
            dry_run,
        } => cmd_apply(
            &cli.roots,
            ApplySelection {
                patches,
                category,
                all,
                dry_run,
            },
        ),
        Command::Status { category, json } => cmd_status(&cli.roots, category.as_deref(), json),
        Command::List { category, json } => cmd_list(&cli.roots, category.as_deref(), json),
        Command::Enable { patch } => cmd_enable(&cli.roots, &patch),
        Command::Disable { patch } => cmd_disable(&cli.roots, &patch),
    }
}

fn cmd_apply(roots: &RootArgs, sel: ApplySelection) -> Result<()> {
    let vcs = GitVcs;
    let sink = StdoutSink::new(Some(roots.log_dir.clone()));
    let driver = Driver::new(
        Registry::load(&roots.config)?,
        roots.tree.clone(),
        roots.patch_dir.clone(),
        &vcs,
        &sink,
    );

    let outcome = driver.apply(&sel)?;
    let failed = outcome.failed_ids();
    if !failed.is_empty() {
        return Err(Error::application(format!(
            "{} patch(es) failed: {}",
            failed.len(),
            failed.join(", ")
        )));
    }
    Ok(())
}

fn cmd_status(roots: &RootArgs, category: Option<&str>, json: bool) -> Result<()> {
    let vcs = GitVcs;
    let sink = StdoutSink::new(None);
    let driver = Driver::new(
        Registry::load(&roots.config)?,
        roots.tree.clone(),
        roots.patch_dir.clone(),
        &vcs,
        &sink,
    );

    let report = driver.status(category)?;
    if json {
        println!("{}", render_json(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn cmd_list(roots: &RootArgs, category: Option<&str>, json: bool) -> Result<()> {
    let vcs = GitVcs;
    let sink = StdoutSink::new(None);
    let driver = Driver::new(
        Registry::load(&roots.config)?,
        roots.tree.clone(),
        roots.patch_dir.clone(),
        &vcs,
        &sink,
    );

    let report = driver.list(category)?;
    if json {
        println!("{}", render_json(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn cmd_enable(roots: &RootArgs, patch: &str) -> Result<()> {
    let vcs = GitVcs;
    let sink = StdoutSink::new(None);
    let mut driver = Driver::new(
        Registry::load(&roots.config)?,
        roots.tree.clone(),
        roots.patch_dir.clone(),
        &vcs,
        &sink,
    );

    match driver.enable(patch)? {
        ToggleOutcome::Changed => println!("enabled: {patch}"),
        ToggleOutcome::AlreadySet => println!("already enabled: {patch}"),
    }
    Ok(())
}

fn cmd_disable(roots: &RootArgs, patch: &str) -> Result<()> {
    let vcs = GitVcs;
    let sink = StdoutSink::new(None);
    let mut driver = Driver::new(
        Registry::load(&roots.config)?,
        roots.tree.clone(),
        roots.patch_dir.clone(),
        &vcs,
        &sink,
    );

    match driver.disable(patch)? {
        ToggleOutcome::Changed => println!("disabled: {patch}"),
        ToggleOutcome::AlreadySet => println!("already disabled: {patch}"),
    }
    Ok(())
}

fn render_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::environment(format!("json encode error: {e}")))
}
