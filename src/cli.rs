use crate::config::HookConfigOverrides;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HarnessArgs {
    pub fixture: PathBuf,
    pub golden: Option<PathBuf>,
    pub write_output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    log_filter: Option<String>,
    no_save: Vec<String>,
    pub help: bool,
}

impl HarnessArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = HarnessArgs::default();
        let mut fixture = None;
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if flag == "--help" || flag == "-h" {
                parsed.help = true;
                return Ok(parsed);
            }
            if !flag.starts_with('-') {
                bail!("Unexpected argument '{flag}'. Use --fixture <path>.");
            }
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match flag {
                "--fixture" | "-f" => fixture = Some(PathBuf::from(value)),
                "--golden" | "-g" => parsed.golden = Some(PathBuf::from(value)),
                "--write-output" | "-o" => parsed.write_output = Some(PathBuf::from(value)),
                "--config" | "-c" => parsed.config = Some(PathBuf::from(value)),
                "--log" => parsed.log_filter = Some(value),
                "--no-save" => parsed.no_save.push(value),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --fixture, --golden, --write-output, --config, --log, --no-save."
                ),
            }
        }
        let Some(fixture) = fixture else {
            bail!("--fixture <path> is required");
        };
        parsed.fixture = fixture;
        Ok(parsed)
    }

    pub fn config_overrides(&self) -> HookConfigOverrides {
        HookConfigOverrides { log_filter: self.log_filter.clone(), extra_no_save: self.no_save.clone() }
    }

    pub fn usage() -> &'static str {
        "Usage: hook_harness --fixture <path> [--golden <path>] [--write-output <path>] [--config <path>]\n\
         \x20 -f, --fixture        Path to a harness fixture JSON file\n\
         \x20 -g, --golden         Optional golden output file to compare against\n\
         \x20 -o, --write-output   Optional path to write the actual output JSON\n\
         \x20 -c, --config         Optional hook config JSON\n\
         \x20     --log            tracing filter, e.g. kestrel_hooks=debug\n\
         \x20     --no-save        Extra stack to exclude from saves (repeatable)"
    }
}
