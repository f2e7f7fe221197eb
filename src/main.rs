use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use iamframe::aggregate::report_keys;
use iamframe::{
    concat, read_file, write_csv, AppConfig, Args, ConfigManager, IamFrame, RunOptions,
    ScenarioKey,
};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Outcome of a run, printed when no output file is given.
#[derive(Debug, Serialize)]
struct Summary {
    rows: usize,
    time_domain: String,
    models: Vec<String>,
    scenarios: Vec<String>,
    regions: Vec<String>,
    variables: Vec<String>,
    excluded: Vec<ScenarioKey>,
    /// Rows failing the consistency check, when `--check` was given
    inconsistent_rows: Option<usize>,
}

impl Summary {
    fn of(frame: &IamFrame, inconsistent_rows: Option<usize>) -> Result<Self> {
        Ok(Self {
            rows: frame.len(),
            time_domain: frame.time_col().to_string(),
            models: frame.models()?,
            scenarios: frame.scenarios()?,
            regions: frame.regions()?,
            variables: frame.variables()?,
            excluded: frame.meta().excluded_keys()?,
            inconsistent_rows,
        })
    }

    fn print(&self) {
        println!("{} rows indexed by `{}`", self.rows, self.time_domain);
        println!("models:    {}", self.models.join(", "));
        println!("scenarios: {}", self.scenarios.join(", "));
        println!("regions:   {}", self.regions.join(", "));
        println!("variables: {}", self.variables.len());
        if !self.excluded.is_empty() {
            let excluded: Vec<String> = self.excluded.iter().map(|k| k.to_string()).collect();
            println!("excluded:  {}", excluded.join(", "));
        }
        if let Some(n) = self.inconsistent_rows {
            println!("inconsistent rows: {}", n);
        }
    }
}

fn init_logging(args: &Args, config: &AppConfig) {
    let level = if args.verbose {
        "info"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        let config_manager = ConfigManager::new(iamframe::APP_NAME)?;
        let path = config_manager.write_default_config(args.force)?;
        println!("Configuration written to {}", path.display());
        return Ok(Some(()));
    }
    Ok(None)
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let opts = RunOptions::from_args_and_config(args, config)?;

    let frames = args
        .paths
        .iter()
        .map(|path| read_file(path, &opts.read))
        .collect::<iamframe::Result<Vec<_>>>()?;
    let mut frame = concat(&frames)?;

    if let Some(meta) = &args.meta {
        frame.load_meta(meta, &opts.read)?;
    }
    if !opts.filter.is_empty() {
        frame.filter_inplace(&opts.filter)?;
    }
    if !opts.rename.is_empty() {
        frame.rename_inplace(&opts.rename, opts.rename_options)?;
    }

    for variable in &args.aggregate {
        frame.aggregate_append(&[variable.as_str()], None, &opts.method)?;
    }
    for variable in &args.aggregate_region {
        frame.aggregate_region_append(&[variable.as_str()], &opts.region)?;
    }
    for variable in &args.aggregate_time {
        frame.aggregate_time_append(&[variable.as_str()], &opts.time)?;
    }

    let mut inconsistent_rows = None;
    if args.check {
        let report = frame.check_internal_consistency(true, opts.check.tolerance)?;
        let n = report.as_ref().map_or(0, DataFrame::height);
        if let Some(report) = &report {
            warn!("{} rows are not consistent with their components", n);
            if opts.check.exclude_on_fail {
                frame.exclude_on_fail(&report_keys(report)?)?;
            }
            if !args.json {
                println!("{}", report);
            }
        } else {
            info!("all variables are consistent with their components");
        }
        inconsistent_rows = Some(n);
    }

    match &args.output {
        Some(path) => write_csv(&frame, path, args.iamc_index)?,
        None => {
            let summary = Summary::of(&frame, inconsistent_rows)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                summary.print();
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    let config = AppConfig::load(iamframe::APP_NAME)?;
    init_logging(&args, &config);

    if args.paths.is_empty() {
        return Err(eyre!("no input files given"));
    }
    run(&args, &config)
}
