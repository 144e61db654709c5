use std::fs::{self, File};

use anyhow::{bail, Context, Result};
use kestrel_hooks::cli::HarnessArgs;
use kestrel_hooks::config::HookConfig;
use kestrel_hooks::script_harness::{load_fixture, run_fixture_with_config, HarnessOutput};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("[hook-harness] error: {err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = HarnessArgs::parse_from_env()?;
    if args.help {
        println!("{}", HarnessArgs::usage());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => HookConfig::load(path)?,
        None => HookConfig::default(),
    };
    config.apply_overrides(&args.config_overrides());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let fixture = load_fixture(&args.fixture)?;
    let output = run_fixture_with_config(&fixture, config)?;

    if let Some(path) = &args.write_output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory '{}'", parent.display()))?;
            }
        }
        let file =
            File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        println!("[hook-harness] wrote {}", path.display());
    }

    if let Some(path) = &args.golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if expected != output {
            bail!(
                "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                args.fixture.display(),
                serde_json::to_string(&expected).unwrap_or_default(),
                serde_json::to_string(&output).unwrap_or_default(),
            );
        }
        println!("[hook-harness] matched golden {}", path.display());
    } else if args.write_output.is_none() {
        serde_json::to_writer_pretty(std::io::stdout(), &output)?;
        println!();
    }

    Ok(())
}
