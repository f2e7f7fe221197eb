//! IAMC scenario timeseries: filtering, aggregation, consistency checks and metadata for
//! integrated-assessment model results.
//!
//! The central type is [`IamFrame`], a long-form table of
//! `model, scenario, region, variable, unit, year|time, [extra...], value` rows together with a
//! per-scenario metadata table ([`MetaTable`]).

pub mod aggregate;
pub mod config;
pub mod data;
mod error;
pub mod filter;
mod frame;
pub mod io;
pub mod meta;
pub mod pattern;
pub mod rename;
pub mod validate;

pub use aggregate::{
    AggMethod, CheckOptions, RegionAggregation, RegionComponents, TimeAggregation, Tolerance,
};
pub use config::{AppConfig, ConfigManager};
pub use data::{LongTable, TimeDomain, TimeValue};
pub use error::{Error, Result};
pub use filter::{Criterion, Filter};
pub use frame::{compare, concat, IamFrame, PivotAgg};
pub use iamframe_cli::{Args, FileFormat};
pub use io::{read_file, write_csv, ReadOptions};
pub use meta::{MetaTable, MetaValue, ScenarioKey};
pub use rename::{Rename, RenameOptions};
pub use validate::Bounds;

/// Application name used for the config directory
pub const APP_NAME: &str = "iamframe";

/// Everything the command-line pipeline needs, resolved from arguments and configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub read: ReadOptions,
    pub filter: Filter,
    pub rename: Rename,
    pub rename_options: RenameOptions,
    pub region: RegionAggregation,
    pub time: TimeAggregation,
    pub method: AggMethod,
    pub check: CheckOptions,
}

impl RunOptions {
    /// CLI args override config.
    pub fn from_args_and_config(args: &Args, config: &AppConfig) -> Result<Self> {
        let mut read = ReadOptions::default();
        read.format = args.format;
        if let Some(delimiter) = args.delimiter.or(config.io.delimiter) {
            read.delimiter = delimiter;
        }
        if let Some(sheet) = args
            .data_sheet
            .clone()
            .or_else(|| config.io.data_sheet.clone())
        {
            read.data_sheet = sheet;
        }
        if let Some(sheet) = args
            .meta_sheet
            .clone()
            .or_else(|| config.io.meta_sheet.clone())
        {
            read.meta_sheet = Some(sheet);
        }

        let filter = args.filter.iter().try_fold(
            Filter::new().regexp(args.regexp).keep(!args.invert),
            |filter, arg| filter.parse_arg(arg),
        )?;
        let rename = args
            .rename
            .iter()
            .try_fold(Rename::new(), |rename, arg| rename.parse_arg(arg))?;
        let rename_options = RenameOptions {
            append: args.rename_append,
            ..Default::default()
        };

        let method: AggMethod = args
            .method
            .as_deref()
            .unwrap_or(config.aggregation.method.as_str())
            .parse()?;
        let region = RegionAggregation::new(
            args.region
                .clone()
                .unwrap_or_else(|| config.aggregation.region.clone()),
        )
        .method(method.clone());
        let time = TimeAggregation::new(
            config.aggregation.subannual_column.clone(),
            config.aggregation.subannual_value.clone(),
        )
        .method(method.clone());

        let configured = config.tolerance();
        let tolerance = Tolerance::new(
            args.rtol.unwrap_or(configured.rtol),
            args.atol.unwrap_or(configured.atol),
        );
        let check = CheckOptions::new()
            .tolerance(tolerance)
            .exclude_on_fail(args.exclude_on_fail);

        Ok(Self {
            read,
            filter,
            rename,
            rename_options,
            region,
            time,
            method,
            check,
        })
    }
}
