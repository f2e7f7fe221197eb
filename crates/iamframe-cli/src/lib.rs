//! Shared CLI definitions for iamframe.
//!
//! Used by the main application and by the build script (manpage) and
//! gen_docs binary (command-line-options markdown).

use clap::{Arg, CommandFactory, Parser, ValueEnum};
use std::path::Path;

const INPUT: &str = "Input";
const SELECTION: &str = "Selection";
const AGGREGATION: &str = "Aggregation";
const CHECKS: &str = "Checks and tolerance";
const OUTPUT: &str = "Output";
const CONFIGURATION: &str = "Configuration";

/// File format for IAMC data files (used to bypass extension-based detection).
/// When `--format` is not specified, format is auto-detected from the file extension.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FileFormat {
    /// Comma-separated values (long or wide IAMC layout)
    Csv,
    /// Excel (.xls, .xlsx, .xlsm, .xlsb) with a `data` sheet and an optional `meta` sheet
    Excel,
}

impl FileFormat {
    /// Detect file format from path extension. Returns None when extension is missing or unknown.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Parse format from extension string (e.g. "csv", "xlsx").
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "xls" | "xlsx" | "xlsm" | "xlsb" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// Command-line arguments for iamframe
#[derive(Clone, Parser, Debug)]
#[command(
    name = "iamframe",
    version,
    about = "Filter, aggregate and validate IAMC scenario timeseries",
    long_about = include_str!("../long_about.txt")
)]
pub struct Args {
    /// Path(s) to the IAMC data file(s) to read.
    /// Multiple files are concatenated into one frame (not required with --generate-config)
    #[arg(
        help_heading = INPUT,
        required_unless_present = "generate_config",
        num_args = 1..,
        value_name = "PATH"
    )]
    pub paths: Vec<std::path::PathBuf>,

    /// Force file format (csv, excel). By default format is auto-detected from the file extension.
    #[arg(help_heading = INPUT, long = "format", value_enum)]
    pub format: Option<FileFormat>,

    /// Specify the delimiter to use when reading a CSV file
    #[arg(help_heading = INPUT, long = "delimiter")]
    pub delimiter: Option<u8>,

    /// Excel sheet holding the timeseries data (default: data)
    #[arg(help_heading = INPUT, long = "sheet", value_name = "SHEET")]
    pub data_sheet: Option<String>,

    /// Excel sheet holding the scenario metadata (default: meta)
    #[arg(help_heading = INPUT, long = "meta-sheet", value_name = "SHEET")]
    pub meta_sheet: Option<String>,

    /// Metadata table (csv, or Excel with a meta sheet) loaded onto the data after reading
    #[arg(help_heading = INPUT, long = "meta", value_name = "PATH")]
    pub meta: Option<std::path::PathBuf>,

    /// Keep rows matching KEY=VALUE. Repeatable; every filter must match.
    /// Separate alternatives with commas and give integer ranges as START..END (end excluded).
    /// Example: --filter "variable=Primary Energy|*" --filter year=2010..2050
    #[arg(help_heading = SELECTION, long = "filter", short = 'f', value_name = "KEY=VALUE")]
    pub filter: Vec<String>,

    /// Interpret filter strings as regular expressions instead of `*` wildcards
    #[arg(help_heading = SELECTION, long = "regexp", action)]
    pub regexp: bool,

    /// Drop the rows matched by --filter instead of keeping them
    #[arg(help_heading = SELECTION, long = "invert", action)]
    pub invert: bool,

    /// Rename values of a dimension. Repeatable. Example: --rename region:EU=Europe
    #[arg(help_heading = SELECTION, long = "rename", value_name = "DIM:OLD=NEW")]
    pub rename: Vec<String>,

    /// Append renamed rows as a copy instead of relabelling the original rows
    #[arg(help_heading = SELECTION, long = "rename-append", action)]
    pub rename_append: bool,

    /// Compute a variable from its sub-categories and add it to the frame. Repeatable
    #[arg(help_heading = AGGREGATION, long = "aggregate", value_name = "VARIABLE")]
    pub aggregate: Vec<String>,

    /// Compute a variable for --region from its subregions and add it to the frame. Repeatable
    #[arg(help_heading = AGGREGATION, long = "aggregate-region", value_name = "VARIABLE")]
    pub aggregate_region: Vec<String>,

    /// Compute the annual value of a variable from its subannual time slices and add it to the frame. Repeatable
    #[arg(help_heading = AGGREGATION, long = "aggregate-time", value_name = "VARIABLE")]
    pub aggregate_time: Vec<String>,

    /// Target region for --aggregate-region (default from config, usually World)
    #[arg(help_heading = AGGREGATION, long = "region", value_name = "REGION")]
    pub region: Option<String>,

    /// Aggregation method: sum, mean, min, max, median (default from config, usually sum)
    #[arg(help_heading = AGGREGATION, long = "method", value_name = "METHOD")]
    pub method: Option<String>,

    /// Check that every variable equals the sum of its components and subregions, and report mismatches
    #[arg(help_heading = CHECKS, long = "check", action)]
    pub check: bool,

    /// Mark scenarios failing --check as excluded in the metadata
    #[arg(help_heading = CHECKS, long = "exclude-on-fail", requires = "check", action)]
    pub exclude_on_fail: bool,

    /// Relative tolerance for --check (overrides config [tolerance] rtol)
    #[arg(help_heading = CHECKS, long = "rtol", value_name = "RTOL")]
    pub rtol: Option<f64>,

    /// Absolute tolerance for --check (overrides config [tolerance] atol)
    #[arg(help_heading = CHECKS, long = "atol", value_name = "ATOL")]
    pub atol: Option<f64>,

    /// Write the resulting timeseries as wide CSV to this path
    #[arg(help_heading = OUTPUT, long = "output", short = 'o', value_name = "PATH")]
    pub output: Option<std::path::PathBuf>,

    /// Drop extra columns from the written timeseries and keep only the IAMC index
    #[arg(help_heading = OUTPUT, long = "iamc-index", action)]
    pub iamc_index: bool,

    /// Print the summary as JSON instead of plain text
    #[arg(help_heading = OUTPUT, long = "json", action)]
    pub json: bool,

    /// Log informational messages (equivalent to RUST_LOG=info)
    #[arg(help_heading = OUTPUT, long = "verbose", short = 'v', action)]
    pub verbose: bool,

    /// Generate default configuration file at ~/.config/iamframe/config.toml
    #[arg(help_heading = CONFIGURATION, long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(
        help_heading = CONFIGURATION,
        long = "force",
        requires = "generate_config",
        action
    )]
    pub force: bool,
}

/// `-f, --filter <KEY=VALUE>` style label of an argument.
fn option_label(arg: &Arg) -> String {
    let value = arg
        .get_value_names()
        .unwrap_or_default()
        .iter()
        .map(|n| format!("<{}>", n.as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    if arg.is_positional() {
        return format!("{value}...");
    }
    let flags = [
        arg.get_short().map(|s| format!("-{s}")),
        arg.get_long().map(|l| format!("--{l}")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ");
    if arg.get_action().takes_values() && !value.is_empty() {
        format!("{flags} {value}")
    } else {
        flags
    }
}

/// Option reference for the docs: usage, then one section per help heading in pipeline order.
pub fn render_options_markdown() -> String {
    let mut cmd = Args::command();
    cmd.build();

    let mut out = format!("# iamframe options\n\n```\n{}\n```\n", cmd.render_usage());
    for heading in [INPUT, SELECTION, AGGREGATION, CHECKS, OUTPUT, CONFIGURATION] {
        out.push_str(&format!("\n## {heading}\n\n"));
        for arg in cmd
            .get_arguments()
            .filter(|a| a.get_help_heading() == Some(heading))
        {
            let help = arg
                .get_help()
                .map(|h| h.to_string().replace('\n', " "))
                .unwrap_or_default();
            out.push_str(&format!("- `{}`: {help}\n", option_label(arg)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(
            FileFormat::from_path(Path::new("scenarios.csv")),
            Some(FileFormat::Csv)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("scenarios.XLSX")),
            Some(FileFormat::Excel)
        );
        assert_eq!(
            FileFormat::from_path(Path::new("legacy.xls")),
            Some(FileFormat::Excel)
        );
        assert_eq!(FileFormat::from_path(Path::new("data.parquet")), None);
        assert_eq!(FileFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_args_parse_filters_and_renames() {
        let args = Args::parse_from([
            "iamframe",
            "data.csv",
            "--filter",
            "region=World",
            "-f",
            "year=2010..2020",
            "--rename",
            "region:EU=Europe",
            "--check",
        ]);
        assert_eq!(args.paths.len(), 1);
        assert_eq!(args.filter, vec!["region=World", "year=2010..2020"]);
        assert_eq!(args.rename, vec!["region:EU=Europe"]);
        assert!(args.check);
        assert!(!args.exclude_on_fail);
    }

    #[test]
    fn test_generate_config_needs_no_path() {
        let args = Args::parse_from(["iamframe", "--generate-config"]);
        assert!(args.generate_config);
        assert!(args.paths.is_empty());
    }

    #[test]
    fn test_render_options_markdown_groups_options() {
        let md = render_options_markdown();
        assert!(md.starts_with("# iamframe options"));
        let at = |needle: &str| md.find(needle).unwrap();

        assert!(at("## Selection") < at("`-f, --filter <KEY=VALUE>`"));
        assert!(at("`-f, --filter <KEY=VALUE>`") < at("## Aggregation"));
        assert!(at("## Aggregation") < at("`--aggregate-region <VARIABLE>`"));
        assert!(at("## Checks and tolerance") < at("`--rtol <RTOL>`"));
        assert!(at("`--rtol <RTOL>`") < at("## Output"));
        assert!(at("## Output") < at("`-o, --output <PATH>`"));
        assert!(at("## Configuration") < at("`--generate-config`"));
        assert!(!md.contains("--help"));
    }
}
