//! Aggregation of variables, regions and subannual time slices, and checks of reported
//! aggregates against the values computed from their components.

use crate::data::{
    index_exprs, index_join, mask_chunked, MODEL, REGION, SCENARIO, UNIT, VALUE, VARIABLE,
};
use crate::error::{Error, Result};
use crate::filter::{row_mask, Filter};
use crate::frame::IamFrame;
use crate::meta::ScenarioKey;
use crate::pattern::{pattern_match, LevelSpec};
use polars::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const EXISTING: &str = "existing";
pub const AGGREGATE: &str = "aggregate";
pub const CHECK: &str = "check";

const WEIGHT: &str = "__weight";
const TOTAL: &str = "__total";
const SHARE: &str = "__share";

pub type Reducer = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// How the values of a group of rows are reduced to one.
#[derive(Clone, Default)]
pub enum AggMethod {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    Median,
    Custom(Reducer),
}

impl AggMethod {
    pub fn custom(f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        AggMethod::Custom(Arc::new(f))
    }

    fn expr(&self) -> Option<Expr> {
        let value = col(VALUE);
        match self {
            AggMethod::Sum => Some(value.sum()),
            AggMethod::Mean => Some(value.mean()),
            AggMethod::Min => Some(value.min()),
            AggMethod::Max => Some(value.max()),
            AggMethod::Median => Some(value.median()),
            AggMethod::Custom(_) => None,
        }
    }
}

impl fmt::Debug for AggMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggMethod::Sum => f.write_str("Sum"),
            AggMethod::Mean => f.write_str("Mean"),
            AggMethod::Min => f.write_str("Min"),
            AggMethod::Max => f.write_str("Max"),
            AggMethod::Median => f.write_str("Median"),
            AggMethod::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FromStr for AggMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(AggMethod::Sum),
            "mean" | "avg" | "average" => Ok(AggMethod::Mean),
            "min" => Ok(AggMethod::Min),
            "max" => Ok(AggMethod::Max),
            "median" => Ok(AggMethod::Median),
            other => Err(Error::invalid(format!(
                "unknown aggregation method `{other}`"
            ))),
        }
    }
}

/// Closeness thresholds for consistency checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

impl Tolerance {
    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    /// `|a - b| <= atol + rtol * |b|`
    pub fn is_close(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.atol + self.rtol * b.abs()
    }

    /// `|existing - multiplier * aggregate| > atol + rtol * |aggregate|`
    pub fn exceeds(&self, existing: f64, aggregate: f64, multiplier: f64) -> bool {
        (existing - multiplier * aggregate).abs() > self.atol + self.rtol * aggregate.abs()
    }
}

/// Options for aggregating a variable over regions.
#[derive(Debug, Clone)]
pub struct RegionAggregation {
    pub region: String,
    /// Regions to aggregate; all other regions holding the variable when `None`.
    pub subregions: Option<Vec<String>>,
    pub components: RegionComponents,
    pub method: AggMethod,
    /// Variable whose values weight the aggregation (weighted mean).
    pub weight: Option<String>,
}

/// Variables reported only at the target region that are added to the subregion aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RegionComponents {
    #[default]
    None,
    /// Sub-variables present in the target region but in none of the subregions.
    Auto,
    List(Vec<String>),
}

impl Default for RegionAggregation {
    fn default() -> Self {
        Self {
            region: "World".to_string(),
            subregions: None,
            components: RegionComponents::None,
            method: AggMethod::Sum,
            weight: None,
        }
    }
}

impl RegionAggregation {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    pub fn subregions<S: Into<String>>(mut self, subregions: impl IntoIterator<Item = S>) -> Self {
        self.subregions = Some(subregions.into_iter().map(Into::into).collect());
        self
    }

    pub fn components(mut self, components: RegionComponents) -> Self {
        self.components = components;
        self
    }

    pub fn method(mut self, method: AggMethod) -> Self {
        self.method = method;
        self
    }

    pub fn weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = Some(weight.into());
        self
    }
}

/// Options for aggregating subannual time slices held in an extra column.
#[derive(Debug, Clone)]
pub struct TimeAggregation {
    pub column: String,
    /// Label of the aggregate in `column`.
    pub value: String,
    /// Slices to aggregate; every slice other than `value` when `None`.
    pub components: Option<Vec<String>>,
    pub method: AggMethod,
}

impl Default for TimeAggregation {
    fn default() -> Self {
        Self {
            column: "subannual".to_string(),
            value: "year".to_string(),
            components: None,
            method: AggMethod::Sum,
        }
    }
}

impl TimeAggregation {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn components<S: Into<String>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.components = Some(components.into_iter().map(Into::into).collect());
        self
    }

    pub fn method(mut self, method: AggMethod) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    pub multiplier: f64,
    pub tolerance: Tolerance,
    /// Mark every scenario with a mismatching row `exclude = true`.
    pub exclude_on_fail: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            tolerance: Tolerance::default(),
            exclude_on_fail: false,
        }
    }
}

impl CheckOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn exclude_on_fail(mut self, exclude_on_fail: bool) -> Self {
        self.exclude_on_fail = exclude_on_fail;
        self
    }
}

/// Group `df` by `by` and reduce `value` in every group, keeping first-appearance order.
pub(crate) fn group_reduce(df: &DataFrame, by: &[String], method: &AggMethod) -> Result<DataFrame> {
    let grouped = df.clone().lazy().group_by_stable(index_exprs(by));
    let Some(expr) = method.expr() else {
        let AggMethod::Custom(reduce) = method else {
            return Err(Error::invalid("aggregation method has no expression"));
        };
        let mut listed = grouped.agg([col(VALUE)]).collect()?;
        let reduced: Vec<Option<f64>> = listed
            .column(VALUE)?
            .list()?
            .into_iter()
            .map(|group| {
                group.and_then(|s| {
                    s.f64().ok().map(|values| {
                        let values: Vec<f64> = values.into_iter().flatten().collect();
                        reduce(&values)
                    })
                })
            })
            .collect();
        listed.with_column(Column::new(VALUE.into(), reduced))?;
        return Ok(listed);
    };
    Ok(grouped.agg([expr]).collect()?)
}

fn rows(frame: &IamFrame, filter: Filter) -> Result<Vec<bool>> {
    row_mask(frame.data(), frame.meta(), &filter)
}

fn both(a: &[bool], b: &[bool]) -> Vec<bool> {
    a.iter().zip(b).map(|(x, y)| *x && *y).collect()
}

/// Entries of `candidates` below `variable`; only `level` levels deep when given.
fn components_of(candidates: Vec<String>, variable: &str, level: Option<usize>) -> Result<Vec<String>> {
    let level = level.map(|l| LevelSpec::Exact(vec![l]));
    let pattern = [format!("{variable}|*")];
    let mask = pattern_match(
        candidates.iter().map(|v| Some(v.as_str())),
        &pattern,
        level.as_ref(),
        false,
    )?;
    Ok(candidates
        .into_iter()
        .zip(mask)
        .filter(|(_, m)| *m)
        .map(|(v, _)| v)
        .collect())
}

/// Distinct scenario keys of a check report, sorted.
pub fn report_keys(report: &DataFrame) -> Result<Vec<ScenarioKey>> {
    let models = report.column(MODEL)?.str()?;
    let scenarios = report.column(SCENARIO)?.str()?;
    let keys: BTreeSet<ScenarioKey> = models
        .into_iter()
        .zip(scenarios)
        .map(|(m, s)| ScenarioKey::new(m.unwrap_or_default(), s.unwrap_or_default()))
        .collect();
    Ok(keys.into_iter().collect())
}

impl IamFrame {
    /// Direct children (`level = Some(0)`) or all descendants (`None`) of `variable`.
    pub fn variable_components(&self, variable: &str, level: Option<usize>) -> Result<Vec<String>> {
        components_of(self.variables()?, variable, level)
    }

    fn distinct_variables(&self, mask: &[bool]) -> Result<Vec<String>> {
        let names = self.data().str_column(VARIABLE)?;
        let set: BTreeSet<&str> = names
            .into_iter()
            .zip(mask)
            .filter(|(_, m)| **m)
            .filter_map(|(n, _)| n)
            .collect();
        Ok(set.into_iter().map(str::to_string).collect())
    }

    /// Regions other than `region` holding any of `variables`, sorted.
    fn other_regions(&self, region: &str, variables: &[&str]) -> Result<Vec<String>> {
        let mask = rows(self, Filter::new().variable(variables.to_vec()))?;
        let regions = self.data().str_column(REGION)?;
        let set: BTreeSet<&str> = regions
            .into_iter()
            .zip(&mask)
            .filter(|(_, m)| **m)
            .filter_map(|(r, _)| r)
            .filter(|r| *r != region)
            .collect();
        Ok(set.into_iter().map(str::to_string).collect())
    }

    /// Rows with a target get `column` replaced by it and are reduced over the long index.
    fn relabel_and_reduce(
        &self,
        column: &str,
        targets: &[Option<&str>],
        method: &AggMethod,
    ) -> Result<Option<DataFrame>> {
        let mask: Vec<bool> = targets.iter().map(Option::is_some).collect();
        if !mask.contains(&true) {
            return Ok(None);
        }
        let mut df = self.data().df().filter(&mask_chunked(&mask))?;
        let labels: Vec<&str> = targets.iter().flatten().copied().collect();
        df.with_column(Column::new(column.into(), labels))?;
        Ok(Some(group_reduce(&df, &self.long_index(), method)?))
    }

    fn variable_aggregate(
        &self,
        variables: &[&str],
        components: Option<&[&str]>,
        method: &AggMethod,
    ) -> Result<Option<DataFrame>> {
        if components.is_some() && variables.len() > 1 {
            return Err(Error::invalid(
                "explicit components cannot be used when aggregating several variables",
            ));
        }
        let names = self.data().str_column(VARIABLE)?;
        let mut targets: Vec<Option<&str>> = vec![None; self.len()];
        for variable in variables {
            let hits = match components {
                Some(components) => pattern_match(names, components, None, false)?,
                None => {
                    let children = self.variable_components(variable, Some(0))?;
                    names
                        .into_iter()
                        .map(|n| n.is_some_and(|n| children.iter().any(|c| c == n)))
                        .collect()
                }
            };
            for (target, hit) in targets.iter_mut().zip(hits) {
                if hit && target.is_none() {
                    *target = Some(*variable);
                }
            }
        }
        self.relabel_and_reduce(VARIABLE, &targets, method)
    }

    /// Compute `variables` from their components within every region.
    ///
    /// Components default to the direct children of each variable. Returns `None` when there
    /// is nothing to aggregate.
    pub fn aggregate(
        &self,
        variables: &[&str],
        components: Option<&[&str]>,
        method: &AggMethod,
    ) -> Result<Option<IamFrame>> {
        match self.variable_aggregate(variables, components, method)? {
            Some(df) => Ok(Some(self.derive(df)?)),
            None => {
                info!(
                    "cannot aggregate variable `{}` because it has no components",
                    variables.join("`, `")
                );
                Ok(None)
            }
        }
    }

    pub fn aggregate_append(
        &mut self,
        variables: &[&str],
        components: Option<&[&str]>,
        method: &AggMethod,
    ) -> Result<()> {
        if let Some(aggregate) = self.aggregate(variables, components, method)? {
            self.append_inplace(&aggregate, false)?;
        }
        Ok(())
    }

    fn region_aggregate(
        &self,
        variables: &[&str],
        opts: &RegionAggregation,
    ) -> Result<Option<DataFrame>> {
        let with_components = opts.components != RegionComponents::None;
        if with_components && variables.len() != 1 {
            return Err(Error::invalid(
                "region components cannot be used when aggregating several variables",
            ));
        }
        if with_components && opts.weight.is_some() {
            return Err(Error::invalid(
                "weights and region components cannot be combined",
            ));
        }

        let subregions = match &opts.subregions {
            Some(subregions) => subregions.clone(),
            None => self.other_regions(&opts.region, variables)?,
        };
        if subregions.is_empty() {
            info!(
                "cannot aggregate variable `{}` to `{}` because it does not exist in any subregion",
                variables.join("`, `"),
                opts.region
            );
            return Ok(None);
        }

        let in_subregions = rows(self, Filter::new().region(subregions))?;
        let selected = both(
            &in_subregions,
            &rows(self, Filter::new().variable(variables.to_vec()))?,
        );
        let mut aggregate = match &opts.weight {
            None => {
                let targets: Vec<Option<&str>> = selected
                    .iter()
                    .map(|s| s.then_some(opts.region.as_str()))
                    .collect();
                self.relabel_and_reduce(REGION, &targets, &opts.method)?
            }
            Some(weight) => {
                let weights = both(
                    &in_subregions,
                    &rows(self, Filter::new().variable(weight.as_str()))?,
                );
                Some(self.weighted_region_mean(&selected, &weights, &opts.region, &opts.method)?)
            }
        };

        if with_components {
            let variable = variables[0];
            let in_region = rows(self, Filter::new().region(opts.region.as_str()))?;
            let components = match &opts.components {
                RegionComponents::List(list) => list.clone(),
                _ => {
                    let at_region = components_of(self.distinct_variables(&in_region)?, variable, None)?;
                    let below: HashSet<String> =
                        components_of(self.distinct_variables(&in_subregions)?, variable, None)?
                            .into_iter()
                            .collect();
                    at_region
                        .into_iter()
                        .filter(|v| !below.contains(v))
                        .collect()
                }
            };
            if !components.is_empty() {
                let of_components = rows(self, Filter::new().variable(components))?;
                let targets: Vec<Option<&str>> = both(&in_region, &of_components)
                    .iter()
                    .map(|s| s.then_some(variable))
                    .collect();
                if let Some(extra) = self.relabel_and_reduce(VARIABLE, &targets, &AggMethod::Sum)? {
                    aggregate = Some(match aggregate {
                        Some(mut df) => {
                            df.vstack_mut(&extra)?;
                            group_reduce(&df, &self.long_index(), &AggMethod::Sum)?
                        }
                        None => extra,
                    });
                }
            }
        }
        Ok(aggregate.filter(|df| df.height() > 0))
    }

    /// `Σ(value·weight) / Σ(weight)` over the subregions, per scenario, time and extra columns.
    fn weighted_region_mean(
        &self,
        selected: &[bool],
        weights: &[bool],
        region: &str,
        method: &AggMethod,
    ) -> Result<DataFrame> {
        if !matches!(method, AggMethod::Sum) {
            return Err(Error::invalid(
                "only method `sum` is allowed for weighted aggregation",
            ));
        }
        let values = self.data().filter_mask(selected)?.into_frame();
        let weights = self.data().filter_mask(weights)?.into_frame();
        let weight_names: Vec<String> = self
            .long_index()
            .into_iter()
            .filter(|c| c != VARIABLE && c != UNIT)
            .collect();
        let weight_index = index_exprs(&weight_names);

        let unmatched = |a: &DataFrame, b: &DataFrame| -> Result<usize> {
            let rows = a
                .clone()
                .lazy()
                .join(
                    b.clone().lazy(),
                    weight_index.clone(),
                    weight_index.clone(),
                    index_join(JoinType::Anti),
                )
                .collect()?;
            Ok(rows.height())
        };
        if unmatched(&values, &weights)? + unmatched(&weights, &values)? > 0 {
            return Err(Error::invalid(
                "inconsistent index between variable and weight",
            ));
        }

        let mut weight_columns = weight_index.clone();
        weight_columns.push(col(VALUE).alias(WEIGHT));
        let numerator = values
            .lazy()
            .join(
                weights.clone().lazy().select(weight_columns),
                weight_index.clone(),
                weight_index,
                index_join(JoinType::Inner),
            )
            .with_columns([
                (col(VALUE) * col(WEIGHT)).alias(VALUE),
                lit(region).alias(REGION),
            ])
            .group_by_stable(index_exprs(&self.long_index()))
            .agg([col(VALUE).sum()]);

        let total_names: Vec<String> = weight_names
            .into_iter()
            .filter(|c| c != REGION)
            .collect();
        let total_index = index_exprs(&total_names);
        let totals = weights
            .lazy()
            .group_by_stable(total_index.clone())
            .agg([col(VALUE).sum().alias(TOTAL)]);

        let averaged = numerator
            .join(
                totals,
                total_index.clone(),
                total_index,
                index_join(JoinType::Left),
            )
            .with_column((col(VALUE) / col(TOTAL)).alias(VALUE))
            .select(index_exprs(&self.data().columns()))
            .collect()?;
        Ok(averaged)
    }

    /// Compute `variables` at `opts.region` from their values in the subregions.
    pub fn aggregate_region(
        &self,
        variables: &[&str],
        opts: &RegionAggregation,
    ) -> Result<Option<IamFrame>> {
        self.region_aggregate(variables, opts)?
            .map(|df| self.derive(df))
            .transpose()
    }

    pub fn aggregate_region_append(
        &mut self,
        variables: &[&str],
        opts: &RegionAggregation,
    ) -> Result<()> {
        if let Some(aggregate) = self.aggregate_region(variables, opts)? {
            self.append_inplace(&aggregate, false)?;
        }
        Ok(())
    }

    /// Spread `variables` reported at `region` over `subregions` in proportion to the `proxy`
    /// variable there, per scenario, time and extra columns.
    ///
    /// Subregions default to every other region reporting the proxy. Returns `None` when
    /// there is nothing to downscale.
    pub fn downscale_region(
        &self,
        variables: &[&str],
        region: &str,
        proxy: &str,
        subregions: Option<&[&str]>,
    ) -> Result<Option<IamFrame>> {
        let subregions: Vec<String> = match subregions {
            Some(subregions) => subregions.iter().map(|s| s.to_string()).collect(),
            None => self.other_regions(region, &[proxy])?,
        };
        let values = both(
            &rows(self, Filter::new().region(region))?,
            &rows(self, Filter::new().variable(variables.to_vec()))?,
        );
        let proxies = both(
            &rows(self, Filter::new().region(subregions))?,
            &rows(self, Filter::new().variable(proxy))?,
        );
        if !values.contains(&true) || !proxies.contains(&true) {
            info!(
                "cannot downscale variable `{}` from `{region}` by proxy `{proxy}`",
                variables.join("`, `")
            );
            return Ok(None);
        }

        let share_names: Vec<String> = self
            .long_index()
            .into_iter()
            .filter(|c| c != REGION && c != VARIABLE && c != UNIT)
            .collect();
        let share_index = index_exprs(&share_names);
        let mut share_columns = share_index.clone();
        share_columns.extend([col(REGION), col(SHARE)]);
        let shares = self
            .data()
            .filter_mask(&proxies)?
            .into_frame()
            .lazy()
            .with_column((col(VALUE) / col(VALUE).sum().over(share_index.clone())).alias(SHARE))
            .select(share_columns);

        let df = self
            .data()
            .filter_mask(&values)?
            .into_frame()
            .lazy()
            .drop(cols([REGION]))
            .join(
                shares,
                share_index.clone(),
                share_index,
                index_join(JoinType::Inner),
            )
            .with_column((col(VALUE) * col(SHARE)).alias(VALUE))
            .select(index_exprs(&self.data().columns()))
            .collect()?;
        if df.height() == 0 {
            return Ok(None);
        }
        Ok(Some(self.derive(df)?))
    }

    pub fn downscale_region_append(
        &mut self,
        variables: &[&str],
        region: &str,
        proxy: &str,
        subregions: Option<&[&str]>,
    ) -> Result<()> {
        if let Some(downscaled) = self.downscale_region(variables, region, proxy, subregions)? {
            self.append_inplace(&downscaled, false)?;
        }
        Ok(())
    }

    fn time_aggregate(
        &self,
        variables: &[&str],
        opts: &TimeAggregation,
    ) -> Result<Option<DataFrame>> {
        if !self.extra_cols().iter().any(|c| *c == opts.column) {
            return Err(Error::invalid(format!(
                "`{}` is not an extra column of the data",
                opts.column
            )));
        }
        let components = match &opts.components {
            Some(components) => components.clone(),
            None => self
                .data()
                .unique_strings(&opts.column)?
                .into_iter()
                .filter(|v| *v != opts.value)
                .collect(),
        };
        if components.is_empty() {
            info!(
                "cannot aggregate variable `{}` because `{}` has no components",
                variables.join("`, `"),
                opts.column
            );
            return Ok(None);
        }
        let selected = both(
            &rows(self, Filter::new().variable(variables.to_vec()))?,
            &rows(self, Filter::new().with(opts.column.as_str(), components))?,
        );
        let targets: Vec<Option<&str>> = selected
            .iter()
            .map(|s| s.then_some(opts.value.as_str()))
            .collect();
        self.relabel_and_reduce(&opts.column, &targets, &opts.method)
    }

    /// Collapse subannual slices of `variables` into `opts.value` of `opts.column`.
    pub fn aggregate_time(
        &self,
        variables: &[&str],
        opts: &TimeAggregation,
    ) -> Result<Option<IamFrame>> {
        self.time_aggregate(variables, opts)?
            .map(|df| self.derive(df))
            .transpose()
    }

    pub fn aggregate_time_append(
        &mut self,
        variables: &[&str],
        opts: &TimeAggregation,
    ) -> Result<()> {
        if let Some(aggregate) = self.aggregate_time(variables, opts)? {
            self.append_inplace(&aggregate, false)?;
        }
        Ok(())
    }

    /// Rows selected by `existing` whose value differs from the aligned aggregate row.
    ///
    /// Rows without a counterpart in `aggregate` are not compared.
    fn mismatches(
        &self,
        existing: &[bool],
        aggregate: &DataFrame,
        opts: &CheckOptions,
        variable: &str,
        against: &str,
    ) -> Result<Option<DataFrame>> {
        let index = index_exprs(&self.long_index());
        let mut reported = index.clone();
        reported.push(col(VALUE).alias(EXISTING));
        let mut computed = index.clone();
        computed.push(col(VALUE).alias(AGGREGATE));

        let joined = self
            .data()
            .filter_mask(existing)?
            .into_frame()
            .lazy()
            .select(reported)
            .join(
                aggregate.clone().lazy().select(computed),
                index.clone(),
                index,
                index_join(JoinType::Inner),
            )
            .collect()?;
        let failing: Vec<bool> = joined
            .column(EXISTING)?
            .f64()?
            .into_iter()
            .zip(joined.column(AGGREGATE)?.f64()?)
            .map(|(value, agg)| {
                opts.tolerance.exceeds(
                    value.unwrap_or(f64::NAN),
                    agg.unwrap_or(f64::NAN),
                    opts.multiplier,
                )
            })
            .collect();
        let n_failing = failing.iter().filter(|f| **f).count();
        if n_failing == 0 {
            return Ok(None);
        }
        info!(
            "`{}` - {} of {} rows are not aggregates of {}",
            variable,
            n_failing,
            joined.height(),
            against
        );
        Ok(Some(joined.filter(&mask_chunked(&failing))?))
    }

    fn flag_failures(&mut self, report: Option<&DataFrame>, opts: &CheckOptions) -> Result<()> {
        if let (Some(report), true) = (report, opts.exclude_on_fail) {
            let keys = report_keys(report)?;
            self.exclude_on_fail(&keys)?;
        }
        Ok(())
    }

    fn variable_check(
        &self,
        variable: &str,
        components: Option<&[&str]>,
        method: &AggMethod,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let Some(aggregate) = self.variable_aggregate(&[variable], components, method)? else {
            info!("cannot aggregate variable `{variable}` because it has no components");
            return Ok(None);
        };
        let existing = rows(self, Filter::new().variable(variable))?;
        self.mismatches(&existing, &aggregate, opts, variable, "components")
    }

    fn region_check(
        &self,
        variable: &str,
        aggregation: &RegionAggregation,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let Some(aggregate) = self.region_aggregate(&[variable], aggregation)? else {
            return Ok(None);
        };
        let existing = rows(
            self,
            Filter::new()
                .region(aggregation.region.as_str())
                .variable(variable),
        )?;
        if !existing.contains(&true) {
            info!(
                "variable `{variable}` does not exist in region `{}`",
                aggregation.region
            );
            return Ok(None);
        }
        self.mismatches(&existing, &aggregate, opts, variable, "subregions")
    }

    fn time_check(
        &self,
        variable: &str,
        aggregation: &TimeAggregation,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let Some(aggregate) = self.time_aggregate(&[variable], aggregation)? else {
            return Ok(None);
        };
        let existing = rows(
            self,
            Filter::new()
                .variable(variable)
                .with(aggregation.column.as_str(), aggregation.value.as_str()),
        )?;
        self.mismatches(&existing, &aggregate, opts, variable, "time slices")
    }

    /// Rows of `variable` that do not match the aggregate of their components, with columns
    /// long index, `existing` and `aggregate`. `None` when everything is consistent or there
    /// is nothing to compare.
    pub fn check_aggregate(
        &mut self,
        variable: &str,
        components: Option<&[&str]>,
        method: &AggMethod,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let report = self.variable_check(variable, components, method, opts)?;
        self.flag_failures(report.as_ref(), opts)?;
        Ok(report)
    }

    pub fn check_aggregate_region(
        &mut self,
        variable: &str,
        aggregation: &RegionAggregation,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let report = self.region_check(variable, aggregation, opts)?;
        self.flag_failures(report.as_ref(), opts)?;
        Ok(report)
    }

    pub fn check_aggregate_time(
        &mut self,
        variable: &str,
        aggregation: &TimeAggregation,
        opts: &CheckOptions,
    ) -> Result<Option<DataFrame>> {
        let report = self.time_check(variable, aggregation, opts)?;
        self.flag_failures(report.as_ref(), opts)?;
        Ok(report)
    }

    /// Check every variable against the sum of its components and, at `World`, against the sum
    /// of its subregions. The reports are tagged in a `check` column (`variable` or `region`).
    pub fn check_internal_consistency(
        &self,
        components: bool,
        tolerance: Tolerance,
    ) -> Result<Option<DataFrame>> {
        let opts = CheckOptions::new().tolerance(tolerance);
        let regional = RegionAggregation::default().components(if components {
            RegionComponents::Auto
        } else {
            RegionComponents::None
        });

        let mut combined: Option<DataFrame> = None;
        for variable in self.variables()? {
            let reports = [
                ("variable", self.variable_check(&variable, None, &AggMethod::Sum, &opts)?),
                ("region", self.region_check(&variable, &regional, &opts)?),
            ];
            for (check, report) in reports {
                let Some(mut report) = report else { continue };
                report.with_column(Column::new(CHECK.into(), vec![check; report.height()]))?;
                match combined.as_mut() {
                    Some(df) => {
                        df.vstack_mut(&report)?;
                    }
                    None => combined = Some(report),
                }
            }
        }

        let Some(combined) = combined else {
            return Ok(None);
        };
        let mut order = self.long_index();
        order.push(CHECK.to_string());
        let sorted = combined
            .lazy()
            .sort_by_exprs(index_exprs(&order), Default::default())
            .collect()?;
        Ok(Some(sorted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> IamFrame {
        let df = df!(
            "model" => ["m"; 6],
            "scenario" => ["s"; 6],
            "region" => ["World", "World", "World", "R1", "R2", "World"],
            "variable" => ["A", "A|x", "A|y", "A", "A", "A|x|deep"],
            "unit" => ["U"; 6],
            "year" => [2010i64; 6],
            "value" => [5.0, 2.0, 3.0, 1.0, 4.0, 2.0]
        )
        .unwrap();
        IamFrame::new(df).unwrap()
    }

    fn value_of(frame: &IamFrame, region: &str, variable: &str) -> Option<f64> {
        let regions = frame.data().str_column(REGION).unwrap();
        let variables = frame.data().str_column(VARIABLE).unwrap();
        let values = frame.data().values().unwrap();
        regions
            .into_iter()
            .zip(variables)
            .zip(values)
            .find(|((r, v), _)| *r == Some(region) && *v == Some(variable))
            .map(|(_, value)| value)
    }

    #[test]
    fn test_method_from_str() {
        assert!(matches!("avg".parse::<AggMethod>(), Ok(AggMethod::Mean)));
        assert!(matches!("MAX".parse::<AggMethod>(), Ok(AggMethod::Max)));
        assert!("mode".parse::<AggMethod>().is_err());
    }

    #[test]
    fn test_tolerance_formula() {
        let tol = Tolerance::new(0.0, 0.5);
        assert!(!tol.exceeds(5.0, 5.4, 1.0));
        assert!(tol.exceeds(5.0, 5.6, 1.0));
        assert!(!tol.exceeds(10.0, 5.0, 2.0));
    }

    #[test]
    fn test_aggregate_uses_direct_children_only() {
        let agg = frame().aggregate(&["A"], None, &AggMethod::Sum).unwrap().unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(value_of(&agg, "World", "A"), Some(5.0));
    }

    #[test]
    fn test_aggregate_without_components_is_none() {
        assert!(frame()
            .aggregate(&["A|y"], None, &AggMethod::Sum)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_custom_reducer() {
        let product = AggMethod::custom(|values| values.iter().product());
        let agg = frame().aggregate(&["A"], None, &product).unwrap().unwrap();
        assert_eq!(value_of(&agg, "World", "A"), Some(6.0));
    }

    #[test]
    fn test_explicit_components_with_several_variables_is_invalid() {
        let err = frame()
            .aggregate(&["A", "B"], Some(&["A|x"]), &AggMethod::Sum)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_aggregate_region_defaults_to_other_regions() {
        let agg = frame()
            .aggregate_region(&["A"], &RegionAggregation::default())
            .unwrap()
            .unwrap();
        assert_eq!(value_of(&agg, "World", "A"), Some(5.0));
    }

    #[test]
    fn test_weighted_region_aggregation_requires_sum() {
        let opts = RegionAggregation::default()
            .weight("A")
            .method(AggMethod::Mean);
        assert!(frame().aggregate_region(&["A"], &opts).is_err());
    }

    #[test]
    fn test_check_aggregate_passes_and_fails() {
        let mut df = frame();
        assert!(df
            .check_aggregate("A", None, &AggMethod::Sum, &CheckOptions::default())
            .unwrap()
            .is_none());

        let opts = CheckOptions::new().multiplier(2.0).exclude_on_fail(true);
        let report = df
            .check_aggregate("A", None, &AggMethod::Sum, &opts)
            .unwrap()
            .unwrap();
        assert_eq!(report.height(), 1);
        assert!(report.column(EXISTING).is_ok());
        assert!(report.column(AGGREGATE).is_ok());
        assert!(df.meta().is_excluded(&ScenarioKey::new("m", "s")));
    }

    #[test]
    fn test_check_internal_consistency_is_clean() {
        assert!(frame()
            .check_internal_consistency(false, Tolerance::default())
            .unwrap()
            .is_none());
    }
}
