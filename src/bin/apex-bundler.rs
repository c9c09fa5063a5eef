//! apex-bundler - assemble APEX-style package images.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use apex_bundler::bundle::{load_bundles, BundleSpec};
use apex_bundler::config::BuildConfig;
use apex_bundler::graph::registry::ModuleRegistry;
use apex_bundler::invoke::run::BuildOutcome;
use apex_bundler::invoke::NINJA_RULE;
use apex_bundler::{build_bundle, plan_bundle, preflight};

#[derive(Parser)]
#[command(name = "apex-bundler")]
#[command(about = "Assemble APEX-style package images from declared dependencies")]
#[command(
    after_help = "QUICK START:\n  apex-bundler preflight   Check host tools\n  apex-bundler plan        Show what would be built\n  apex-bundler build       Build every bundle"
)]
struct Cli {
    /// Build configuration (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bundle definitions
    #[arg(long, global = true, default_value = "apex.toml")]
    bundles: PathBuf,

    /// Already-built modules the bundles depend on
    #[arg(long, global = true, default_value = "modules.toml")]
    modules: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and plan bundles without building anything
    Plan {
        /// Only this bundle
        #[arg(long)]
        bundle: Option<String>,

        #[arg(long, value_enum, default_value = "text")]
        format: PlanFormat,
    },

    /// Build bundle images
    Build {
        /// Only this bundle
        #[arg(long)]
        bundle: Option<String>,

        /// Skip the host tool check
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Check that every host tool is present in the host bin directory
    Preflight,

    /// Print make install descriptors for the bundles
    Androidmk {
        /// Only this bundle
        #[arg(long)]
        bundle: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
    Ninja,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Preflight => cmd_preflight(&config),
        Commands::Plan { bundle, format } => {
            let bundles = select_bundles(&cli.bundles, bundle.as_deref())?;
            cmd_plan(&config, &cli.modules, &bundles, format)
        }
        Commands::Build {
            bundle,
            skip_preflight,
        } => {
            let bundles = select_bundles(&cli.bundles, bundle.as_deref())?;
            if !skip_preflight {
                cmd_preflight(&config)?;
            }
            cmd_build(&config, &cli.modules, &bundles)
        }
        Commands::Androidmk { bundle } => {
            let bundles = select_bundles(&cli.bundles, bundle.as_deref())?;
            cmd_androidmk(&config, &cli.modules, &bundles)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BuildConfig> {
    match path {
        Some(path) => BuildConfig::load(path)
            .with_context(|| format!("loading build config '{}'", path.display())),
        None => Ok(BuildConfig::default()),
    }
}

fn select_bundles(path: &Path, only: Option<&str>) -> Result<Vec<BundleSpec>> {
    let bundles = load_bundles(path)
        .with_context(|| format!("loading bundle definitions '{}'", path.display()))?;
    match only {
        None => Ok(bundles),
        Some(name) => {
            let selected: Vec<BundleSpec> = bundles.into_iter().filter(|b| b.name == name).collect();
            if selected.is_empty() {
                bail!("no bundle named '{}' in '{}'", name, path.display());
            }
            Ok(selected)
        }
    }
}

fn load_graph(config: &BuildConfig, path: &Path) -> Result<ModuleRegistry> {
    ModuleRegistry::load(path, config.os, config.arches())
        .with_context(|| format!("loading module graph '{}'", path.display()))
}

fn cmd_preflight(config: &BuildConfig) -> Result<()> {
    let found = preflight::check_host_tools(config).context("preflight failed")?;
    println!("[OK] {} host tools found", found.len());
    for path in found {
        println!("  {}", path.display());
    }
    Ok(())
}

fn cmd_plan(
    config: &BuildConfig,
    modules: &Path,
    bundles: &[BundleSpec],
    format: PlanFormat,
) -> Result<()> {
    let graph = load_graph(config, modules)?;

    if matches!(format, PlanFormat::Ninja) {
        print!("{NINJA_RULE}");
    }
    for spec in bundles {
        let plan = plan_bundle(spec, &graph, config)?;
        match format {
            PlanFormat::Json => println!("{}", plan.to_json()?),
            PlanFormat::Ninja => {
                println!();
                print!("{}", plan.invocation.ninja_build_edge());
            }
            PlanFormat::Text => {
                println!("{}:", plan.bundle);
                println!("  dependencies:");
                for edge in &plan.edges {
                    println!("    {edge}");
                }
                println!("  layout:");
                for entry in &plan.layout.copy_manifest {
                    println!(
                        "    {} -> {}",
                        entry.source.display(),
                        entry.destination.display()
                    );
                }
                println!("  output: {}", plan.invocation.output.display());
                println!("  command: {}", plan.invocation.command_line());
            }
        }
    }
    Ok(())
}

fn cmd_build(config: &BuildConfig, modules: &Path, bundles: &[BundleSpec]) -> Result<()> {
    let graph = load_graph(config, modules)?;

    for spec in bundles {
        let plan = plan_bundle(spec, &graph, config)?;
        let outcome = build_bundle(&plan)?;
        let status = match outcome {
            BuildOutcome::Built => "built",
            BuildOutcome::UpToDate => "up to date",
        };
        println!("[OK] {} ({status}): {}", plan.bundle, plan.invocation.output.display());
    }
    Ok(())
}

fn cmd_androidmk(config: &BuildConfig, modules: &Path, bundles: &[BundleSpec]) -> Result<()> {
    let graph = load_graph(config, modules)?;

    for spec in bundles {
        let plan = plan_bundle(spec, &graph, config)?;
        print!("{}", plan.install.render_make());
    }
    Ok(())
}
