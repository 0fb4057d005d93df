use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use dexsimplify::config::{ClassFilter, Config, ResourceBounds, SafeList};
use dexsimplify::launcher::Launcher;
use dexsimplify::test_support::{InMemoryClassManager, InMemoryDexBuilder};

/// CLI arguments for dexsimplify execution (§6).
#[derive(Parser, Debug)]
#[command(
    name = "dexsimplify",
    about = "Symbolic-execution deobfuscator for Dalvik executables (DEX).",
    version
)]
struct Cli {
    /// Path to the APK or DEX class dump to analyze.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    #[arg(long, value_name = "REGEX")]
    include_filter: Option<String>,
    #[arg(long, value_name = "REGEX")]
    exclude_filter: Option<String>,
    #[arg(long)]
    include_support_library: bool,
    #[arg(long, value_name = "LEVEL", default_value_t = 21)]
    output_api_level: u32,

    #[arg(long, value_name = "N")]
    max_address_visits: Option<u32>,
    #[arg(long, value_name = "N")]
    max_call_depth: Option<u32>,
    #[arg(long, value_name = "N")]
    max_method_visits: Option<u32>,
    #[arg(long, value_name = "SECONDS")]
    max_execution_time: Option<u64>,
    #[arg(long, value_name = "N")]
    max_optimization_passes: Option<u32>,

    #[arg(long)]
    quiet: bool,
    #[arg(long, value_name = "LEVEL", num_args = 0..=1, default_missing_value = "1")]
    verbose: Option<u8>,

    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,

    #[arg(long, value_name = "PATH")]
    safe_list: Option<PathBuf>,

    #[arg(long, value_name = "URL", help = "OTLP HTTP collector URL.")]
    otel: Option<String>,
}

fn main() -> std::process::ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return std::process::ExitCode::from(255);
        }
    };

    init_logging(&cli);

    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            std::process::ExitCode::from(1)
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        match cli.verbose.unwrap_or(0) {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

fn run(cli: Cli) -> Result<()> {
    let telemetry = match &cli.otel {
        Some(url) => Some(dexsimplify::telemetry::Telemetry::new(Some(url.as_str()))?),
        None => None,
    };

    let config = build_config(&cli)?;
    let class_manager =
        InMemoryClassManager::load(&cli.input).with_context(|| format!("failed to load {:?}", cli.input))?;
    let mut dex_builder = InMemoryDexBuilder::default();

    let launcher = Launcher::new(&class_manager, &config);
    let summary = {
        let _span = telemetry
            .as_ref()
            .map(|t| t.span("dexsimplify.run", vec![opentelemetry::KeyValue::new("input", cli.input.display().to_string())]));
        launcher.run(&mut dex_builder)?
    };

    if let Some(telemetry) = &telemetry {
        telemetry.shutdown();
    }

    if let Some(out) = &cli.out {
        let edit_log = serde_json::json!({
            "outputApiLevel": cli.output_api_level,
            "summary": summary.to_json(),
        });
        std::fs::write(out, serde_json::to_vec_pretty(&edit_log)?)
            .with_context(|| format!("failed to write {out:?}"))?;
    }

    if cli.verbose.unwrap_or(0) >= 3 {
        println!("{}", serde_json::to_string_pretty(&summary.to_json())?);
    } else if !cli.quiet {
        println!("{}", summary.summary_line());
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config> {
    let defaults = ResourceBounds::default();
    let bounds = ResourceBounds {
        max_address_visits: cli.max_address_visits.unwrap_or(defaults.max_address_visits),
        max_call_depth: cli.max_call_depth.unwrap_or(defaults.max_call_depth),
        max_method_visits: cli.max_method_visits.unwrap_or(defaults.max_method_visits),
        max_execution_time: cli
            .max_execution_time
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_execution_time),
        max_optimization_passes: cli
            .max_optimization_passes
            .unwrap_or(defaults.max_optimization_passes),
    };

    let filter = ClassFilter::new(
        cli.include_filter.as_deref(),
        cli.exclude_filter.as_deref(),
        cli.include_support_library,
    )?;

    let safe_list = match &cli.safe_list {
        Some(path) => SafeList::default_table().merge(SafeList::load(path)?),
        None => SafeList::default_table(),
    };

    Ok(Config {
        bounds,
        filter,
        safe_list,
        safe_classes: dexsimplify::config::SafeClasses::default_table(),
        output_api_level: cli.output_api_level,
        jobs: cli.jobs.max(1),
    })
}
