//! Long-form IAMC table: one row per (model, scenario, region, variable, unit, time, *extra).
//!
//! Input tables are normalized here: column names are lower-cased, wide layouts (one column per
//! year or timestamp) are unpivoted, dimension columns are cast to strings, the time column to
//! `Int64` (`year`) or `Datetime(µs)` (`time`), and rows without a value are dropped.

use crate::error::{Error, Result};
use crate::meta::ScenarioKey;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::datatypes::TimeUnit;
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::info;

pub const MODEL: &str = "model";
pub const SCENARIO: &str = "scenario";
pub const REGION: &str = "region";
pub const VARIABLE: &str = "variable";
pub const UNIT: &str = "unit";
pub const YEAR: &str = "year";
pub const TIME: &str = "time";
pub const VALUE: &str = "value";

pub const IAMC_IDX: [&str; 5] = [MODEL, SCENARIO, REGION, VARIABLE, UNIT];
pub const META_IDX: [&str; 2] = [MODEL, SCENARIO];

const MELT_COLUMN: &str = "__time";
const DUP_COUNT: &str = "__count";

/// Whether a table is indexed by integer years or by full timestamps. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDomain {
    Year,
    Datetime,
}

impl TimeDomain {
    pub fn column(self) -> &'static str {
        match self {
            TimeDomain::Year => YEAR,
            TimeDomain::Datetime => TIME,
        }
    }
}

/// A single point on the time axis, matching the table's [`TimeDomain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeValue {
    Year(i64),
    Datetime(NaiveDateTime),
}

#[derive(Debug, Clone)]
pub struct LongTable {
    df: DataFrame,
    time_domain: TimeDomain,
    extra_cols: Vec<String>,
}

impl LongTable {
    /// Build from a long (`value` column) or wide (year/timestamp columns) layout.
    pub fn from_frame(mut df: DataFrame) -> Result<Self> {
        lowercase_column_names(&mut df)?;
        let names = column_names(&df);

        let missing: Vec<&str> = IAMC_IDX
            .iter()
            .copied()
            .filter(|c| !names.iter().any(|n| n == c))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Schema(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }

        let has = |name: &str| names.iter().any(|n| n == name);
        if has(YEAR) && has(TIME) {
            return Err(Error::Schema(
                "table has both `year` and `time` columns".to_string(),
            ));
        }

        if has(VALUE) {
            let time_domain = if has(YEAR) {
                TimeDomain::Year
            } else if has(TIME) {
                TimeDomain::Datetime
            } else {
                return Err(Error::Schema(
                    "long-format table needs a `year` or `time` column".to_string(),
                ));
            };
            let extra_cols = names
                .iter()
                .filter(|n| !is_reserved(n, time_domain))
                .cloned()
                .collect();
            Self::from_long(df, time_domain, extra_cols)
        } else {
            Self::from_wide(df, &names)
        }
    }

    /// Build from a table that is already in long layout with known time domain and extras.
    pub fn from_long(
        mut df: DataFrame,
        time_domain: TimeDomain,
        extra_cols: Vec<String>,
    ) -> Result<Self> {
        let time_col = time_domain.column();
        let names = column_names(&df);
        for required in IAMC_IDX
            .iter()
            .copied()
            .chain([time_col, VALUE])
            .chain(extra_cols.iter().map(String::as_str))
        {
            if !names.iter().any(|n| n == required) {
                return Err(Error::Schema(format!("missing column `{required}`")));
            }
        }

        for name in IAMC_IDX.iter().copied().chain(extra_cols.iter().map(String::as_str)) {
            let casted = df.column(name)?.cast(&DataType::String)?;
            df.with_column(casted)?;
        }
        let value = df.column(VALUE)?.cast(&DataType::Float64)?;
        df.with_column(value)?;
        let time = normalize_time_column(df.column(time_col)?, time_domain)?;
        df.with_column(time)?;

        let keep: Vec<bool> = {
            let values = df.column(VALUE)?.f64()?;
            let times = df.column(time_col)?;
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.is_some_and(|v| !v.is_nan()) && !times.get(i).is_ok_and(|t| t.is_null())
                })
                .collect()
        };
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            info!("dropping {} rows with missing time or value", dropped);
            df = df.filter(&mask_chunked(&keep))?;
        }

        let table = Self {
            df,
            time_domain,
            extra_cols,
        };
        let df = table.df.select(table.columns())?;
        let table = table.with_frame(df);

        let duplicates = duplicate_rows(&table.df, &table.long_index())?;
        if !duplicates.is_empty() {
            return Err(Error::Schema(format!(
                "duplicate rows in `data`:\n{}",
                duplicates.join("\n")
            )));
        }
        Ok(table)
    }

    fn from_wide(df: DataFrame, names: &[String]) -> Result<Self> {
        let mut year_cols = Vec::new();
        let mut time_cols = Vec::new();
        let mut extra_cols = Vec::new();
        for name in names.iter().filter(|n| !IAMC_IDX.contains(&n.as_str())) {
            if parse_year_header(name).is_some() {
                year_cols.push(name.clone());
            } else if parse_datetime_str(name).is_some() {
                time_cols.push(name.clone());
            } else {
                extra_cols.push(name.clone());
            }
        }
        let (time_domain, on) = match (year_cols.is_empty(), time_cols.is_empty()) {
            (false, true) => (TimeDomain::Year, year_cols),
            (true, false) => (TimeDomain::Datetime, time_cols),
            (true, true) => {
                return Err(Error::Schema(
                    "wide-format table has no year or timestamp columns".to_string(),
                ))
            }
            (false, false) => {
                return Err(Error::Schema(
                    "wide-format table mixes year and timestamp columns".to_string(),
                ))
            }
        };

        let mut df = df;
        for name in &on {
            let casted = df.column(name)?.cast(&DataType::Float64)?;
            df.with_column(casted)?;
        }
        let index: Vec<&str> = IAMC_IDX
            .iter()
            .copied()
            .chain(extra_cols.iter().map(String::as_str))
            .collect();
        let args = UnpivotArgsDSL {
            on: cols(on.iter().map(|s| s.as_str())),
            index: cols(index),
            variable_name: Some(PlSmallStr::from_static(MELT_COLUMN)),
            value_name: Some(PlSmallStr::from_static(VALUE)),
        };
        let mut long = df.lazy().unpivot(args).collect()?;

        let headers: Vec<Option<String>> = long
            .column(MELT_COLUMN)?
            .str()?
            .into_iter()
            .map(|h| h.map(str::to_string))
            .collect();
        let time = match time_domain {
            TimeDomain::Year => {
                let years: Vec<Option<i64>> = headers
                    .iter()
                    .map(|h| h.as_deref().and_then(parse_year_header))
                    .collect();
                Column::new(YEAR.into(), years)
            }
            TimeDomain::Datetime => {
                let times: Vec<Option<NaiveDateTime>> = headers
                    .iter()
                    .map(|h| h.as_deref().and_then(parse_datetime_str))
                    .collect();
                datetime_column(TIME, &times)?
            }
        };
        long.with_column(time)?;
        let long = long.drop(MELT_COLUMN)?;
        Self::from_long(long, time_domain, extra_cols)
    }

    /// A table whose `df` is already normalized and in canonical column order.
    pub(crate) fn from_parts(
        df: DataFrame,
        time_domain: TimeDomain,
        extra_cols: Vec<String>,
    ) -> Self {
        Self {
            df,
            time_domain,
            extra_cols,
        }
    }

    /// Same domain and extra columns, different rows. `df` must already be in canonical layout.
    pub(crate) fn with_frame(&self, df: DataFrame) -> Self {
        Self {
            df,
            time_domain: self.time_domain,
            extra_cols: self.extra_cols.clone(),
        }
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_frame(self) -> DataFrame {
        self.df
    }

    pub fn time_domain(&self) -> TimeDomain {
        self.time_domain
    }

    pub fn time_col(&self) -> &'static str {
        self.time_domain.column()
    }

    pub fn extra_cols(&self) -> &[String] {
        &self.extra_cols
    }

    /// `model, scenario, region, variable, unit, <time>, *extra`
    pub fn long_index(&self) -> Vec<String> {
        long_index_for(self.time_domain, &self.extra_cols)
    }

    /// Long index followed by `value`.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = self.long_index();
        cols.push(VALUE.to_string());
        cols
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub(crate) fn str_column(&self, name: &str) -> Result<&StringChunked> {
        Ok(self.df.column(name)?.str()?)
    }

    pub fn values(&self) -> Result<Vec<f64>> {
        Ok(self
            .df
            .column(VALUE)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    /// Year of every row; the year component of the timestamp in datetime mode.
    pub(crate) fn years(&self) -> Result<Vec<Option<i64>>> {
        match self.time_domain {
            TimeDomain::Year => Ok(self.df.column(YEAR)?.i64()?.into_iter().collect()),
            TimeDomain::Datetime => Ok(self
                .datetimes()?
                .into_iter()
                .map(|t| t.map(|t| i64::from(t.year())))
                .collect()),
        }
    }

    pub(crate) fn datetimes(&self) -> Result<Vec<Option<NaiveDateTime>>> {
        if self.time_domain != TimeDomain::Datetime {
            return Err(Error::invalid("table is indexed by `year`, not `time`"));
        }
        let micros = self.df.column(TIME)?.cast(&DataType::Int64)?;
        let out = micros
            .i64()?
            .into_iter()
            .map(|v| v.and_then(micros_to_datetime))
            .collect();
        Ok(out)
    }

    pub(crate) fn row_keys(&self) -> Result<Vec<ScenarioKey>> {
        let models = self.str_column(MODEL)?;
        let scenarios = self.str_column(SCENARIO)?;
        Ok(models
            .into_iter()
            .zip(scenarios)
            .map(|(m, s)| ScenarioKey::new(m.unwrap_or_default(), s.unwrap_or_default()))
            .collect())
    }

    /// Distinct scenario keys in order of first appearance.
    pub fn scenario_keys(&self) -> Result<Vec<ScenarioKey>> {
        let mut seen = HashSet::new();
        Ok(self
            .row_keys()?
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect())
    }

    /// Sorted distinct non-null values of a string column.
    pub fn unique_strings(&self, name: &str) -> Result<Vec<String>> {
        let set: BTreeSet<&str> = self.str_column(name)?.into_iter().flatten().collect();
        Ok(set.into_iter().map(str::to_string).collect())
    }

    pub(crate) fn filter_mask(&self, mask: &[bool]) -> Result<Self> {
        Ok(self.with_frame(self.df.filter(&mask_chunked(mask))?))
    }

    pub(crate) fn sorted(&self) -> Result<Self> {
        let df = self
            .df
            .clone()
            .lazy()
            .sort_by_exprs(index_exprs(&self.long_index()), Default::default())
            .collect()?;
        Ok(self.with_frame(df))
    }
}

pub(crate) fn long_index_for(time_domain: TimeDomain, extra_cols: &[String]) -> Vec<String> {
    IAMC_IDX
        .iter()
        .map(|c| c.to_string())
        .chain([time_domain.column().to_string()])
        .chain(extra_cols.iter().cloned())
        .collect()
}

fn is_reserved(name: &str, time_domain: TimeDomain) -> bool {
    IAMC_IDX.contains(&name) || name == VALUE || name == time_domain.column()
}

pub(crate) fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect()
}

pub(crate) fn lowercase_column_names(df: &mut DataFrame) -> Result<()> {
    for name in column_names(df) {
        let lower = name.to_lowercase();
        if lower != name {
            df.rename(&name, lower.into())?;
        }
    }
    Ok(())
}

fn normalize_time_column(column: &Column, time_domain: TimeDomain) -> Result<Column> {
    let name = time_domain.column();
    match (time_domain, column.dtype()) {
        (TimeDomain::Year, DataType::String) => {
            let years = column
                .str()?
                .into_iter()
                .map(|s| {
                    s.map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            s.parse::<i64>().map_err(|_| {
                                Error::Schema(format!("`{s}` in column `{name}` is not a year"))
                            })
                        })
                        .transpose()
                })
                .collect::<Result<Vec<Option<i64>>>>()?;
            Ok(Column::new(name.into(), years))
        }
        (TimeDomain::Year, dtype) if dtype.is_integer() => Ok(column.cast(&DataType::Int64)?),
        (TimeDomain::Year, dtype) if dtype.is_float() => {
            let floats = column.cast(&DataType::Float64)?;
            let fractional = floats
                .f64()?
                .into_iter()
                .flatten()
                .find(|y| y.is_finite() && y.fract() != 0.0);
            if let Some(year) = fractional {
                return Err(Error::Schema(format!(
                    "{year} in column `{name}` is not a whole year"
                )));
            }
            Ok(floats.cast(&DataType::Int64)?)
        }
        (TimeDomain::Datetime, DataType::String) => {
            let times: Vec<Option<NaiveDateTime>> = column
                .str()?
                .into_iter()
                .map(|s| s.and_then(parse_datetime_str))
                .collect();
            datetime_column(name, &times)
        }
        (TimeDomain::Datetime, DataType::Date | DataType::Datetime(_, _)) => {
            Ok(column.cast(&DataType::Datetime(TimeUnit::Microseconds, None))?)
        }
        (_, dtype) => Err(Error::Schema(format!(
            "column `{name}` has unsupported type {dtype}"
        ))),
    }
}

/// `2015`, or R-style `X2015` (already lower-cased to `x2015`).
fn parse_year_header(s: &str) -> Option<i64> {
    let digits = s.strip_prefix(['x', 'X']).unwrap_or(s);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses an ISO-style date/datetime string; tries FORMATS in order.
pub(crate) fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub(crate) fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

pub(crate) fn datetime_column(name: &str, values: &[Option<NaiveDateTime>]) -> Result<Column> {
    let micros: Vec<Option<i64>> = values
        .iter()
        .map(|v| v.map(|dt| dt.and_utc().timestamp_micros()))
        .collect();
    let series = Series::new(name.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
    Ok(series.into())
}

pub(crate) fn mask_chunked(mask: &[bool]) -> BooleanChunked {
    BooleanChunked::from_slice("mask".into(), mask)
}

pub(crate) fn index_exprs(columns: &[String]) -> Vec<Expr> {
    columns.iter().map(|c| col(c.as_str())).collect()
}

/// Rows are aligned on `on`: nulls in the key columns match each other and the left order is
/// kept.
pub(crate) fn index_join(how: JoinType) -> JoinArgs {
    JoinArgs {
        nulls_equal: true,
        maintain_order: MaintainOrderJoin::Left,
        ..JoinArgs::new(how)
    }
}

/// Render each row as `name=value, ...` over the given columns, for messages.
pub(crate) fn describe_rows(df: &DataFrame, columns: &[String]) -> Result<Vec<String>> {
    let rendered = columns
        .iter()
        .map(|c| df.column(c)?.cast(&DataType::String))
        .collect::<PolarsResult<Vec<Column>>>()?;
    let strings = rendered
        .iter()
        .map(|c| c.str())
        .collect::<PolarsResult<Vec<&StringChunked>>>()?;
    Ok((0..df.height())
        .map(|i| {
            columns
                .iter()
                .zip(&strings)
                .map(|(name, values)| format!("{name}={}", values.get(i).unwrap_or("null")))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect())
}

/// Every index tuple that occurs more than once, rendered with [`describe_rows`].
pub(crate) fn duplicate_rows(df: &DataFrame, index: &[String]) -> Result<Vec<String>> {
    let duplicated = df
        .clone()
        .lazy()
        .group_by_stable(index_exprs(index))
        .agg([len().alias(DUP_COUNT)])
        .filter(col(DUP_COUNT).gt(lit(1)))
        .collect()?;
    describe_rows(&duplicated, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_df() -> DataFrame {
        df!(
            "Model" => ["m", "m", "m"],
            "Scenario" => ["s", "s", "s"],
            "Region" => ["World", "World", "World"],
            "Variable" => ["Primary Energy", "Primary Energy", "Primary Energy|Coal"],
            "Unit" => ["EJ/yr", "EJ/yr", "EJ/yr"],
            "Year" => [2005i64, 2010, 2005],
            "Value" => [1.0, 6.0, 0.5]
        )
        .unwrap()
    }

    #[test]
    fn test_long_layout_lowercases_and_orders_columns() {
        let table = LongTable::from_frame(long_df()).unwrap();
        assert_eq!(table.time_domain(), TimeDomain::Year);
        assert_eq!(column_names(table.df()), table.columns());
        assert_eq!(table.height(), 3);
        assert!(table.extra_cols().is_empty());
    }

    #[test]
    fn test_wide_layout_is_unpivoted() {
        let df = df!(
            "model" => ["m"],
            "scenario" => ["s"],
            "region" => ["World"],
            "variable" => ["Primary Energy"],
            "unit" => ["EJ/yr"],
            "X2005" => [1.0],
            "2010" => [6.0]
        )
        .unwrap();
        let table = LongTable::from_frame(df).unwrap();
        assert_eq!(table.height(), 2);
        let mut years: Vec<i64> = table.years().unwrap().into_iter().flatten().collect();
        years.sort();
        assert_eq!(years, vec![2005, 2010]);
    }

    #[test]
    fn test_wide_layout_keeps_extra_columns() {
        let df = df!(
            "model" => ["m", "m"],
            "scenario" => ["s", "s"],
            "region" => ["World", "World"],
            "variable" => ["Primary Energy", "Primary Energy"],
            "unit" => ["EJ/yr", "EJ/yr"],
            "subannual" => ["year", "summer"],
            "2010" => [6.0, 2.0]
        )
        .unwrap();
        let table = LongTable::from_frame(df).unwrap();
        assert_eq!(table.extra_cols(), ["subannual".to_string()]);
        assert_eq!(table.long_index().last().map(String::as_str), Some("subannual"));
    }

    #[test]
    fn test_missing_values_are_dropped() {
        let df = df!(
            "model" => ["m", "m"],
            "scenario" => ["s", "s"],
            "region" => ["World", "World"],
            "variable" => ["Primary Energy", "Primary Energy"],
            "unit" => ["EJ/yr", "EJ/yr"],
            "year" => [2005i64, 2010],
            "value" => [Some(1.0), None]
        )
        .unwrap();
        let table = LongTable::from_frame(df).unwrap();
        assert_eq!(table.height(), 1);
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let df = long_df().drop("Unit").unwrap();
        let err = LongTable::from_frame(df).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("unit")));
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let df = df!(
            "model" => ["m", "m"],
            "scenario" => ["s", "s"],
            "region" => ["World", "World"],
            "variable" => ["Primary Energy", "Primary Energy"],
            "unit" => ["EJ/yr", "EJ/yr"],
            "year" => [2005i64, 2005],
            "value" => [1.0, 2.0]
        )
        .unwrap();
        let err = LongTable::from_frame(df).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_datetime_strings_are_parsed() {
        let df = df!(
            "model" => ["m", "m"],
            "scenario" => ["s", "s"],
            "region" => ["World", "World"],
            "variable" => ["Primary Energy", "Primary Energy"],
            "unit" => ["EJ/yr", "EJ/yr"],
            "time" => ["2010-07-21 12:00:00", "2010-07-21"],
            "value" => [1.0, 2.0]
        )
        .unwrap();
        let table = LongTable::from_frame(df).unwrap();
        assert_eq!(table.time_domain(), TimeDomain::Datetime);
        let times = table.datetimes().unwrap();
        assert_eq!(
            times[0],
            NaiveDate::from_ymd_opt(2010, 7, 21).and_then(|d| d.and_hms_opt(12, 0, 0))
        );
        assert_eq!(table.years().unwrap(), vec![Some(2010), Some(2010)]);
    }

    #[test]
    fn test_fractional_and_unparsable_years_are_rejected() {
        let mut df = long_df();
        df.with_column(Column::new("Year".into(), [2005.0, 2010.5, 2005.0]))
            .unwrap();
        let err = LongTable::from_frame(df).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("2010.5")));

        let mut df = long_df();
        df.with_column(Column::new("Year".into(), ["2005", "abc", "2005"]))
            .unwrap();
        let err = LongTable::from_frame(df).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("abc")));

        let mut df = long_df();
        df.with_column(Column::new("Year".into(), [2005.0, 2010.0, 2005.0]))
            .unwrap();
        assert_eq!(
            LongTable::from_frame(df).unwrap().years().unwrap(),
            vec![Some(2005), Some(2010), Some(2005)]
        );
    }

    #[test]
    fn test_parse_year_header() {
        assert_eq!(parse_year_header("2015"), Some(2015));
        assert_eq!(parse_year_header("x2015"), Some(2015));
        assert_eq!(parse_year_header("subannual"), None);
        assert_eq!(parse_year_header("x"), None);
    }
}
