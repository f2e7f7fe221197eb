//! `IamFrame`: a long-form timeseries table and its per-scenario metadata, kept in step.
//!
//! Every operation that changes the rows also restricts (or extends) the metadata so that its
//! keys are exactly the scenario keys present in the data.

use crate::aggregate::{group_reduce, AggMethod, Tolerance};
use crate::data::{
    duplicate_rows, index_exprs, index_join, long_index_for, mask_chunked, LongTable, TimeDomain,
    TimeValue, IAMC_IDX, META_IDX, MODEL, REGION, SCENARIO, TIME, UNIT, VALUE, VARIABLE, YEAR,
};
use crate::error::{Error, Result};
use crate::filter::{row_mask, Filter};
use crate::meta::{MetaTable, MetaValue, ScenarioKey, EXCLUDE};
use polars::lazy::frame::pivot::pivot_stable;
use polars::prelude::*;
use std::collections::HashSet;
use tracing::{info, warn};

const LEFT: &str = "left";
const RIGHT: &str = "right";
const BASE: &str = "__base";

/// Reduction applied to the cells of [`IamFrame::pivot_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PivotAgg {
    #[default]
    Count,
    Mean,
    Sum,
}

impl PivotAgg {
    fn expr(self) -> Expr {
        let cell = col(PlSmallStr::from_static(""));
        match self {
            PivotAgg::Count => cell.count(),
            PivotAgg::Mean => cell.mean(),
            PivotAgg::Sum => cell.sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IamFrame {
    data: LongTable,
    meta: MetaTable,
}

impl IamFrame {
    /// Build from a long or wide IAMC table. Metadata starts with `exclude = false` for every
    /// scenario.
    pub fn new(df: DataFrame) -> Result<Self> {
        Self::from_table(LongTable::from_frame(df)?)
    }

    pub fn from_long(
        df: DataFrame,
        time_domain: TimeDomain,
        extra_cols: Vec<String>,
    ) -> Result<Self> {
        Self::from_table(LongTable::from_long(df, time_domain, extra_cols)?)
    }

    pub fn from_table(data: LongTable) -> Result<Self> {
        let data = data.sorted()?;
        let meta = MetaTable::from_keys(data.scenario_keys()?)?;
        Ok(Self { data, meta })
    }

    /// Pair `data` with the rows of `meta` for its scenarios; unknown scenarios get default rows.
    pub(crate) fn from_parts(data: LongTable, meta: &MetaTable) -> Result<Self> {
        let keys = data.scenario_keys()?;
        let mut meta = meta.restrict(&keys)?;
        let missing: Vec<ScenarioKey> = keys.into_iter().filter(|k| !meta.contains(k)).collect();
        if !missing.is_empty() {
            meta = meta.merge(&MetaTable::from_keys(missing)?, true)?;
        }
        Ok(Self { data, meta })
    }

    /// A frame over new long-form rows with the same time domain and extra columns as `self`.
    pub(crate) fn derive(&self, df: DataFrame) -> Result<Self> {
        let data = self.data.with_frame(df).sorted()?;
        Self::from_parts(data, &self.meta)
    }

    pub fn data(&self) -> &LongTable {
        &self.data
    }

    pub fn meta(&self) -> &MetaTable {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.data.height()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn time_domain(&self) -> TimeDomain {
        self.data.time_domain()
    }

    pub fn time_col(&self) -> &'static str {
        self.data.time_col()
    }

    pub fn extra_cols(&self) -> &[String] {
        self.data.extra_cols()
    }

    pub fn long_index(&self) -> Vec<String> {
        self.data.long_index()
    }

    pub fn models(&self) -> Result<Vec<String>> {
        self.data.unique_strings(MODEL)
    }

    pub fn scenarios(&self) -> Result<Vec<String>> {
        self.data.unique_strings(SCENARIO)
    }

    pub fn regions(&self) -> Result<Vec<String>> {
        self.data.unique_strings(REGION)
    }

    pub fn variables(&self) -> Result<Vec<String>> {
        self.data.unique_strings(VARIABLE)
    }

    /// Distinct `(variable, unit)` pairs, sorted.
    pub fn variables_with_units(&self) -> Result<DataFrame> {
        let pairs = self
            .data
            .df()
            .select([VARIABLE, UNIT])?
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .sort_by_exprs([col(VARIABLE), col(UNIT)], Default::default())
            .collect()?;
        Ok(pairs)
    }

    /// Boolean mask of the rows selected by `filter`.
    pub fn apply_filters(&self, filter: &Filter) -> Result<BooleanChunked> {
        Ok(mask_chunked(&row_mask(&self.data, &self.meta, filter)?))
    }

    pub fn filter(&self, filter: &Filter) -> Result<IamFrame> {
        let mask = row_mask(&self.data, &self.meta, filter)?;
        let filtered = self.select_rows(&mask)?;
        if filtered.is_empty() {
            warn!("filtered IamFrame is empty");
        }
        Ok(filtered)
    }

    pub fn filter_inplace(&mut self, filter: &Filter) -> Result<()> {
        *self = self.filter(filter)?;
        Ok(())
    }

    pub(crate) fn select_rows(&self, mask: &[bool]) -> Result<IamFrame> {
        Self::from_parts(self.data.filter_mask(mask)?, &self.meta)
    }

    /// Union of rows and metadata of `self` and `other`.
    ///
    /// Metadata of shared scenarios must agree on shared columns unless `ignore_meta_conflict`
    /// is set, in which case `self` wins. Rows present in both frames are an error.
    pub fn append(&self, other: &IamFrame, ignore_meta_conflict: bool) -> Result<IamFrame> {
        if self.time_domain() != other.time_domain() {
            return Err(Error::Schema(
                "incompatible time format (year vs. datetime)".to_string(),
            ));
        }
        let meta = self.meta.merge(&other.meta, ignore_meta_conflict)?;

        let mut extra_cols = self.extra_cols().to_vec();
        for name in other.extra_cols() {
            if !extra_cols.contains(name) {
                extra_cols.push(name.clone());
            }
        }
        let mut df = aligned_frame(&self.data, &extra_cols)?;
        df.vstack_mut(&aligned_frame(&other.data, &extra_cols)?)?;

        let data = LongTable::from_parts(df, self.time_domain(), extra_cols);
        let rows = duplicate_rows(data.df(), &data.long_index())?;
        if !rows.is_empty() {
            return Err(Error::DuplicateRow { rows });
        }
        Ok(Self {
            data: data.sorted()?,
            meta,
        })
    }

    pub fn append_inplace(&mut self, other: &IamFrame, ignore_meta_conflict: bool) -> Result<()> {
        *self = self.append(other, ignore_meta_conflict)?;
        Ok(())
    }

    /// No row differs beyond the default tolerance and the metadata is equal.
    pub fn equals(&self, other: &IamFrame) -> Result<bool> {
        let diff = compare(self, other, Tolerance::default())?;
        Ok(diff.height() == 0 && self.meta.equals(&other.meta))
    }

    /// Identical layout, rows (in canonical order) and metadata.
    pub fn frame_equal(&self, other: &IamFrame) -> bool {
        self.time_domain() == other.time_domain()
            && self.extra_cols() == other.extra_cols()
            && self.data.df().equals_missing(other.data.df())
            && self.meta.equals(&other.meta)
    }

    fn check_meta_name(&self, name: &str) -> Result<()> {
        if self.data.columns().iter().any(|c| c == name) {
            return Err(Error::invalid(format!(
                "a column `{name}` already exists in `data`"
            )));
        }
        Ok(())
    }

    /// Set a metadata column to the same value for every scenario.
    pub fn set_meta(&mut self, name: &str, value: impl Into<MetaValue>) -> Result<()> {
        self.check_meta_name(name)?;
        self.meta.set_column(name, value.into())
    }

    /// Set a metadata column per scenario. Missing values keep what was there before.
    pub fn set_meta_by_key(
        &mut self,
        name: &str,
        values: Vec<(ScenarioKey, Option<MetaValue>)>,
    ) -> Result<()> {
        self.check_meta_name(name)?;
        self.meta.set_values(name, values)
    }

    /// Derive a metadata column from the values of the rows selected by `filter`.
    ///
    /// Without `method` the selection must hold at most one row per scenario.
    pub fn set_meta_from_data(
        &mut self,
        name: &str,
        filter: &Filter,
        method: Option<&AggMethod>,
    ) -> Result<()> {
        let mask = row_mask(&self.data, &self.meta, filter)?;
        let selected = self.data.filter_mask(&mask)?;
        let values: Vec<(ScenarioKey, Option<MetaValue>)> = match method {
            Some(method) => {
                let by: Vec<String> = META_IDX.iter().map(|c| c.to_string()).collect();
                let reduced = group_reduce(selected.df(), &by, method)?;
                let table = selected.with_frame(reduced);
                table
                    .row_keys()?
                    .into_iter()
                    .zip(table.values()?)
                    .map(|(k, v)| (k, Some(MetaValue::Float(v))))
                    .collect()
            }
            None => {
                let keys = selected.row_keys()?;
                let mut seen = HashSet::new();
                if let Some(dup) = keys.iter().find(|k| !seen.insert(*k)) {
                    return Err(Error::invalid(format!(
                        "multiple values for scenario {dup} in `{name}`, pass an aggregation method"
                    )));
                }
                keys.into_iter()
                    .zip(selected.values()?)
                    .map(|(k, v)| (k, Some(MetaValue::Float(v))))
                    .collect()
            }
        };
        self.set_meta_by_key(name, values)
    }

    pub fn reset_exclude(&mut self) -> Result<()> {
        self.meta.reset_exclude()
    }

    /// Mark the given scenarios `exclude = true`.
    pub fn exclude_on_fail(&mut self, keys: &[ScenarioKey]) -> Result<()> {
        let unique: HashSet<&ScenarioKey> = keys.iter().collect();
        self.meta.set_exclude(keys)?;
        let n = unique.len();
        info!(
            "{} non-valid scenario{} will be excluded",
            n,
            if n == 1 { "" } else { "s" }
        );
        Ok(())
    }

    /// Merge an imported metadata table (needs `model`, `scenario` and `exclude` columns).
    ///
    /// Scenarios not in this frame are ignored; imported values win over existing ones.
    pub fn load_meta_frame(&mut self, mut df: DataFrame) -> Result<()> {
        for (given, name) in [("Model", MODEL), ("Scenario", SCENARIO), ("Exclude", EXCLUDE)] {
            if df.get_column_index(given).is_some() && df.get_column_index(name).is_none() {
                df.rename(given, name.into())?;
            }
        }
        let missing: Vec<&str> = [MODEL, SCENARIO, EXCLUDE]
            .into_iter()
            .filter(|c| df.get_column_index(c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Schema(format!(
                "metadata table is missing required columns: {}",
                missing.join(", ")
            )));
        }

        let imported = MetaTable::from_dataframe(&df)?;
        let valid: Vec<ScenarioKey> = imported
            .keys()?
            .into_iter()
            .filter(|k| self.meta.contains(k))
            .collect();
        let n_invalid = imported.len() - valid.len();
        if n_invalid > 0 {
            info!(
                "ignoring {} scenario{} from imported metadata",
                n_invalid,
                if n_invalid > 1 { "s" } else { "" }
            );
        }
        if valid.is_empty() {
            return Err(Error::invalid("no valid scenarios in imported metadata"));
        }
        info!(
            "importing metadata for {} scenario{} (for total of {})",
            valid.len(),
            if valid.len() > 1 { "s" } else { "" },
            self.meta.len()
        );

        for name in imported.column_names() {
            let values = valid
                .iter()
                .map(|k| (k.clone(), imported.get(k, &name)))
                .collect();
            self.meta.set_values(&name, values)?;
        }
        self.meta.coerce_exclude()
    }

    /// Wide layout: one row per timeseries, one column per year or timestamp.
    ///
    /// With `iamc_index` the extra columns are dropped, which must not produce duplicates.
    pub fn timeseries(&self, iamc_index: bool) -> Result<DataFrame> {
        if self.is_empty() {
            return Err(Error::invalid("this IamFrame is empty"));
        }
        let mut index: Vec<String> = IAMC_IDX.iter().map(|c| c.to_string()).collect();
        if !iamc_index {
            index.extend(self.extra_cols().iter().cloned());
        }
        let time_col = self.time_col();
        let mut df = self.data.df().clone();
        if iamc_index && !self.extra_cols().is_empty() {
            let mut key = index.clone();
            key.push(time_col.to_string());
            if !duplicate_rows(&df, &key)?.is_empty() {
                return Err(Error::invalid(
                    "timeseries has duplicates in index, use `iamc_index = false`",
                ));
            }
        }
        if self.time_domain() == TimeDomain::Datetime {
            let labels: Vec<Option<String>> = self
                .data
                .datetimes()?
                .into_iter()
                .map(|t| t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()))
                .collect();
            df.with_column(Column::new(TIME.into(), labels))?;
        }

        let index_str: Vec<&str> = index.iter().map(String::as_str).collect();
        let wide = pivot_stable(
            &df,
            [time_col],
            Some(index_str),
            Some([VALUE]),
            true,
            Some(col(PlSmallStr::from_static("")).first()),
            None,
        )?;
        Ok(wide)
    }

    /// Replace the `time` column by its year component.
    pub fn swap_time_for_year(&self) -> Result<IamFrame> {
        if self.time_domain() != TimeDomain::Datetime {
            return Err(Error::invalid(
                "time column must be datetime to use this method",
            ));
        }
        let mut df = self.data.df().clone();
        df.with_column(Column::new(YEAR.into(), self.data.years()?))?;
        let df = df.drop(TIME)?;

        let extra_cols = self.extra_cols().to_vec();
        let mut columns = long_index_for(TimeDomain::Year, &extra_cols);
        columns.push(VALUE.to_string());
        let data = LongTable::from_parts(df.select(columns)?, TimeDomain::Year, extra_cols);
        let rows = duplicate_rows(data.df(), &data.long_index())?;
        if !rows.is_empty() {
            return Err(Error::DuplicateRow { rows });
        }
        Self::from_parts(data.sorted()?, &self.meta)
    }

    /// Long index without the time column: one entry per timeseries.
    fn series_index(&self) -> Vec<String> {
        let time_col = self.time_col();
        self.long_index()
            .into_iter()
            .filter(|c| c != time_col)
            .collect()
    }

    /// Rows at `time`; `purpose` names the caller in the error for a mismatched time domain.
    fn at_time(&self, time: TimeValue, purpose: &str) -> Result<Expr> {
        match (time, self.time_domain()) {
            (TimeValue::Year(year), TimeDomain::Year) => Ok(col(YEAR).eq(lit(year))),
            (TimeValue::Datetime(dt), TimeDomain::Datetime) => Ok(col(TIME)
                .cast(DataType::Int64)
                .eq(lit(dt.and_utc().timestamp_micros()))),
            _ => Err(Error::invalid(format!(
                "{purpose} time must match the `{}` column",
                self.time_col()
            ))),
        }
    }

    /// Divide every timeseries by its value at `time`. Timeseries without that point are dropped.
    pub fn normalize(&self, time: TimeValue) -> Result<IamFrame> {
        let at_time = self.at_time(time, "normalization")?;
        let series = index_exprs(&self.series_index());
        let mut base = series.clone();
        base.push(col(VALUE).alias(BASE));

        let df = self
            .data
            .df()
            .clone()
            .lazy()
            .join(
                self.data.df().clone().lazy().filter(at_time).select(base),
                series.clone(),
                series,
                index_join(JoinType::Inner),
            )
            .with_column((col(VALUE) / col(BASE)).alias(VALUE))
            .select(index_exprs(&self.data.columns()))
            .collect()?;
        let dropped = self.len() - df.height();
        if dropped > 0 {
            info!("dropping {} rows without a value to normalize by", dropped);
        }
        Self::from_parts(self.data.with_frame(df), &self.meta)
    }

    /// Add a value at `time` to every timeseries lacking one, interpolated linearly between its
    /// neighbouring points. Timeseries that do not bracket `time` are left unchanged.
    pub fn interpolate(&self, time: TimeValue) -> Result<IamFrame> {
        let at_time = self.at_time(time, "interpolation")?;
        let time_col = self.time_col();
        let series = index_exprs(&self.series_index());
        let stamp = match time {
            TimeValue::Year(year) => lit(year),
            TimeValue::Datetime(dt) => lit(dt.and_utc().timestamp_micros())
                .cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        };

        let rows = self.data.df().clone().lazy();
        let missing = rows
            .clone()
            .select(series.clone())
            .unique_stable(None, UniqueKeepStrategy::First)
            .join(
                rows.clone().filter(at_time).select(series.clone()),
                series.clone(),
                series.clone(),
                index_join(JoinType::Anti),
            )
            .with_columns([
                stamp.alias(time_col),
                lit(NULL).cast(DataType::Float64).alias(VALUE),
            ])
            .select(index_exprs(&self.data.columns()));

        let mut order = series.clone();
        order.push(col(time_col));
        let df = polars::prelude::concat([rows, missing], UnionArgs::default())?
            .sort_by_exprs(order, Default::default())
            .with_column(
                col(VALUE)
                    .interpolate_by(col(time_col).cast(DataType::Int64))
                    .over(series),
            )
            .filter(col(VALUE).is_not_null())
            .collect()?;
        let added = df.height() - self.len();
        info!("interpolated {} value{} at {:?}", added, if added == 1 { "" } else { "s" }, time);
        Self::from_parts(self.data.with_frame(df).sorted()?, &self.meta)
    }

    /// Spreadsheet-style summary: one row per distinct `index`, one column per distinct
    /// `columns`, cells reduced from `values` by `aggfunc`.
    pub fn pivot_table(
        &self,
        index: &[&str],
        columns: &[&str],
        values: &str,
        aggfunc: PivotAgg,
    ) -> Result<DataFrame> {
        let known = self.data.columns();
        if let Some(unknown) = index
            .iter()
            .chain(columns)
            .chain([&values])
            .find(|c| !known.iter().any(|k| k == *c))
        {
            return Err(Error::invalid(format!("`{unknown}` is not a data column")));
        }
        if index.is_empty() || columns.is_empty() {
            return Err(Error::invalid("pivot_table needs index and columns"));
        }
        let wide = pivot_stable(
            self.data.df(),
            columns.iter().copied(),
            Some(index.iter().copied()),
            Some([values]),
            true,
            Some(aggfunc.expr()),
            None,
        )?;
        let order: Vec<Expr> = index.iter().map(|c| col(*c)).collect();
        Ok(wide.lazy().sort_by_exprs(order, Default::default()).collect()?)
    }

    /// Long rows with the named metadata columns joined on `(model, scenario)`.
    pub fn as_long_with_meta(&self, columns: &[&str]) -> Result<DataFrame> {
        if let Some(unknown) = columns.iter().find(|c| !self.meta.has_column(c)) {
            return Err(Error::invalid(format!("`{unknown}` is not a metadata column")));
        }
        let mut selection = vec![MODEL, SCENARIO];
        selection.extend(columns);
        let meta = self.meta.df().select(selection)?;
        let keys = [col(MODEL), col(SCENARIO)];
        let joined = self
            .data
            .df()
            .clone()
            .lazy()
            .join(meta.lazy(), keys.clone(), keys, JoinArgs::new(JoinType::Left))
            .sort_by_exprs(index_exprs(&self.long_index()), Default::default())
            .collect()?;
        Ok(joined)
    }
}

/// `table`'s rows widened to `extra_cols` (missing ones null) in canonical column order.
fn aligned_frame(table: &LongTable, extra_cols: &[String]) -> Result<DataFrame> {
    let mut df = table.df().clone();
    for name in extra_cols {
        if !table.extra_cols().contains(name) {
            let nulls = Column::full_null(name.as_str().into(), df.height(), &DataType::String);
            df.with_column(nulls)?;
        }
    }
    let mut columns = long_index_for(table.time_domain(), extra_cols);
    columns.push(VALUE.to_string());
    Ok(df.select(columns)?)
}

/// Rows whose values differ beyond `tolerance`, including rows present on one side only.
///
/// Columns: the long index, then `left` and `right` values (null where a side lacks the row).
pub fn compare(left: &IamFrame, right: &IamFrame, tolerance: Tolerance) -> Result<DataFrame> {
    if left.time_domain() != right.time_domain() {
        return Err(Error::Schema(
            "incompatible time format (year vs. datetime)".to_string(),
        ));
    }
    let mut extra_cols = left.extra_cols().to_vec();
    for name in right.extra_cols() {
        if !extra_cols.contains(name) {
            extra_cols.push(name.clone());
        }
    }
    let index = long_index_for(left.time_domain(), &extra_cols);
    let side = |frame: &IamFrame, label: &str| -> Result<LazyFrame> {
        Ok(aligned_frame(&frame.data, &extra_cols)?
            .lazy()
            .rename([VALUE], [label], true))
    };

    let joined = side(left, LEFT)?
        .join(
            side(right, RIGHT)?,
            index_exprs(&index),
            index_exprs(&index),
            index_join(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .collect()?;

    let lhs: Vec<Option<f64>> = joined.column(LEFT)?.f64()?.into_iter().collect();
    let rhs: Vec<Option<f64>> = joined.column(RIGHT)?.f64()?.into_iter().collect();
    let differs: Vec<bool> = lhs
        .iter()
        .zip(&rhs)
        .map(|(l, r)| match (l, r) {
            (Some(l), Some(r)) => !tolerance.is_close(*l, *r),
            _ => true,
        })
        .collect();

    let mut columns = index.clone();
    columns.extend([LEFT.to_string(), RIGHT.to_string()]);
    let diff = joined
        .filter(&mask_chunked(&differs))?
        .select(columns)?
        .lazy()
        .sort_by_exprs(index_exprs(&index), Default::default())
        .collect()?;
    Ok(diff)
}

/// Append all frames in order. Metadata conflicts between them are errors.
pub fn concat(frames: &[IamFrame]) -> Result<IamFrame> {
    let (first, rest) = frames
        .split_first()
        .ok_or_else(|| Error::invalid("concat needs at least one IamFrame"))?;
    rest.iter()
        .try_fold(first.clone(), |acc, frame| acc.append(frame, false))
}
