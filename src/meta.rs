//! Per-scenario metadata: one row per (model, scenario) with an open set of scalar columns.

use crate::data::{column_names, index_join, MODEL, SCENARIO};
use crate::error::{Error, Result};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const EXCLUDE: &str = "exclude";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScenarioKey {
    pub model: String,
    pub scenario: String,
}

impl ScenarioKey {
    pub fn new(model: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            scenario: scenario.into(),
        }
    }

    pub(crate) fn dimension(&self, dim: &str) -> Option<&str> {
        match dim {
            MODEL => Some(&self.model),
            SCENARIO => Some(&self.scenario),
            _ => None,
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.model, self.scenario)
    }
}

/// A scalar metadata indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

impl MetaValue {
    fn to_expr(&self) -> Expr {
        match self {
            MetaValue::Bool(b) => lit(*b),
            MetaValue::Int(i) => lit(*i),
            MetaValue::Float(x) => lit(*x),
            MetaValue::Str(s) => lit(s.clone()),
        }
    }
}

const INCOMING: &str = "__incoming";
const SELECTED: &str = "__selected";
const IN_LEFT: &str = "__in_left";
const IN_RIGHT: &str = "__in_right";
const OTHER_SUFFIX: &str = "__other";
const COUNT: &str = "__count";

/// Metadata indexed by [`ScenarioKey`]: a frame of `model`, `scenario`, the boolean `exclude`
/// column and any number of indicator columns, one row per scenario.
#[derive(Debug, Clone)]
pub struct MetaTable {
    df: DataFrame,
}

impl MetaTable {
    /// One row per distinct key in order of first appearance, `exclude = false`.
    pub fn from_keys(keys: impl IntoIterator<Item = ScenarioKey>) -> Result<Self> {
        let keys: Vec<ScenarioKey> = keys.into_iter().collect();
        let mut df = keys_frame(&keys)?
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()?;
        df.with_column(Column::new(EXCLUDE.into(), vec![false; df.height()]))?;
        Ok(Self { df })
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn keys(&self) -> Result<Vec<ScenarioKey>> {
        keys_of(&self.df)
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    fn position(&self, key: &ScenarioKey) -> Option<usize> {
        let models = self.df.column(MODEL).ok()?.str().ok()?;
        let scenarios = self.df.column(SCENARIO).ok()?.str().ok()?;
        models.into_iter().zip(scenarios).position(|(m, s)| {
            m == Some(key.model.as_str()) && s == Some(key.scenario.as_str())
        })
    }

    pub fn contains(&self, key: &ScenarioKey) -> bool {
        self.position(key).is_some()
    }

    /// Indicator columns, without the key columns.
    pub fn column_names(&self) -> Vec<String> {
        column_names(&self.df)
            .into_iter()
            .filter(|n| n != MODEL && n != SCENARIO)
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        name != MODEL && name != SCENARIO && self.df.get_column_index(name).is_some()
    }

    /// Values of a column aligned with [`MetaTable::keys`].
    pub fn values(&self, name: &str) -> Option<Vec<Option<MetaValue>>> {
        if !self.has_column(name) {
            return None;
        }
        polars_column_to_meta(self.df.column(name).ok()?).ok()
    }

    pub fn get(&self, key: &ScenarioKey, name: &str) -> Option<MetaValue> {
        if !self.has_column(name) {
            return None;
        }
        let row = self.position(key)?;
        let cell = self.df.column(name).ok()?.slice(row as i64, 1);
        polars_column_to_meta(&cell).ok()?.pop().flatten()
    }

    pub fn is_excluded(&self, key: &ScenarioKey) -> bool {
        matches!(self.get(key, EXCLUDE), Some(MetaValue::Bool(true)))
    }

    pub fn excluded_keys(&self) -> Result<Vec<ScenarioKey>> {
        let excluded = self
            .df
            .clone()
            .lazy()
            .filter(col(EXCLUDE).eq(lit(true)))
            .collect()?;
        keys_of(&excluded)
    }

    /// Assign the same value to every scenario.
    pub(crate) fn set_column(&mut self, name: &str, value: MetaValue) -> Result<()> {
        self.df = self
            .df
            .clone()
            .lazy()
            .with_column(value.to_expr().alias(name))
            .collect()?;
        Ok(())
    }

    /// Combine-first assignment: an explicit value wins, a missing one keeps the prior value.
    pub(crate) fn set_values(
        &mut self,
        name: &str,
        values: Vec<(ScenarioKey, Option<MetaValue>)>,
    ) -> Result<()> {
        let (keys, values): (Vec<ScenarioKey>, Vec<Option<MetaValue>>) =
            values.into_iter().unzip();
        let mut incoming = keys_frame(&keys)?;
        if let Some(key) = duplicate_keys(&incoming)?.first() {
            return Err(Error::invalid(format!(
                "non-unique index for meta column `{name}`: {key}"
            )));
        }
        let unknown = incoming
            .clone()
            .lazy()
            .join(
                self.df.clone().lazy(),
                key_exprs(),
                key_exprs(),
                JoinArgs::new(JoinType::Anti),
            )
            .collect()?;
        if let Some(key) = keys_of(&unknown)?.first() {
            return Err(Error::invalid(format!(
                "scenario {key} is not in the metadata index"
            )));
        }

        let mut column = meta_values_to_column(INCOMING, &values);
        let assigned = if self.has_column(name) {
            let dtype = common_dtype(self.df.column(name)?, &column);
            column = column.cast(&dtype)?;
            coalesce(&[col(INCOMING), col(name).cast(dtype)])
        } else {
            col(INCOMING)
        };
        incoming.with_column(column)?;
        self.df = self
            .df
            .clone()
            .lazy()
            .join(
                incoming.lazy(),
                key_exprs(),
                key_exprs(),
                index_join(JoinType::Left),
            )
            .with_column(assigned.alias(name))
            .drop(cols([INCOMING]))
            .collect()?;
        Ok(())
    }

    /// Flag the given scenarios `exclude = true`; keys not in the table are skipped.
    pub(crate) fn set_exclude(&mut self, keys: &[ScenarioKey]) -> Result<()> {
        let flagged = keys_frame(keys)?
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .join(
                self.df.clone().lazy(),
                key_exprs(),
                key_exprs(),
                JoinArgs::new(JoinType::Semi),
            )
            .collect()?;
        let values = keys_of(&flagged)?
            .into_iter()
            .map(|k| (k, Some(MetaValue::Bool(true))))
            .collect();
        self.set_values(EXCLUDE, values)
    }

    pub(crate) fn reset_exclude(&mut self) -> Result<()> {
        self.set_column(EXCLUDE, MetaValue::Bool(false))
    }

    /// Read `exclude` as booleans: non-zero numbers and `true` in any case are set.
    pub(crate) fn coerce_exclude(&mut self) -> Result<()> {
        let Some(values) = self.values(EXCLUDE) else {
            return self.reset_exclude();
        };
        let flags: Vec<bool> = values
            .into_iter()
            .map(|v| match v {
                Some(MetaValue::Bool(b)) => b,
                Some(MetaValue::Int(i)) => i != 0,
                Some(MetaValue::Float(x)) => x != 0.0,
                Some(MetaValue::Str(s)) => s.trim().eq_ignore_ascii_case("true"),
                None => false,
            })
            .collect();
        self.df.with_column(Column::new(EXCLUDE.into(), flags))?;
        Ok(())
    }

    /// Keep only the given keys, preserving this table's order.
    pub(crate) fn restrict(&self, keys: &[ScenarioKey]) -> Result<MetaTable> {
        let df = self
            .df
            .clone()
            .lazy()
            .join(
                keys_frame(keys)?.lazy(),
                key_exprs(),
                key_exprs(),
                JoinArgs::new(JoinType::Semi),
            )
            .collect()?;
        Ok(Self { df })
    }

    /// Rewrite the `model` or `scenario` part of the selected keys.
    pub(crate) fn rename_keys(
        &mut self,
        dim: &str,
        mapping: &HashMap<String, String>,
        selected: &HashSet<ScenarioKey>,
    ) -> Result<()> {
        let selected: Vec<ScenarioKey> = selected.iter().cloned().collect();
        let mut marks = keys_frame(&selected)?;
        marks.with_column(Column::new(SELECTED.into(), vec![true; marks.height()]))?;

        let hit = col(SELECTED).fill_null(lit(false));
        let renamed = mapping.iter().fold(col(dim), |expr, (old, new)| {
            when(hit.clone().and(col(dim).eq(lit(old.clone()))))
                .then(lit(new.clone()))
                .otherwise(expr)
        });
        let df = self
            .df
            .clone()
            .lazy()
            .join(
                marks.lazy(),
                key_exprs(),
                key_exprs(),
                index_join(JoinType::Left),
            )
            .with_column(renamed.alias(dim))
            .drop(cols([SELECTED]))
            .collect()?;

        let collisions = duplicate_keys(&df)?;
        if !collisions.is_empty() {
            return Err(Error::DuplicateKey { keys: collisions });
        }
        self.df = df;
        Ok(())
    }

    /// Merge `other` into a copy of `self`.
    ///
    /// Shared scenarios must agree on shared columns unless `ignore_conflict` is set, in which
    /// case non-null values of `self` win. Columns new to `self` are always merged and new
    /// scenarios appended.
    pub(crate) fn merge(&self, other: &MetaTable, ignore_conflict: bool) -> Result<MetaTable> {
        let own = self.column_names();
        let theirs = other.column_names();
        let suffixed = |name: &str| format!("{name}{OTHER_SUFFIX}");

        let mut left = self.df.clone();
        left.with_column(Column::new(IN_LEFT.into(), vec![true; left.height()]))?;
        let mut right: Vec<Expr> = key_exprs().to_vec();
        right.extend(theirs.iter().map(|c| col(c.as_str()).alias(suffixed(c.as_str()))));
        right.push(lit(true).alias(IN_RIGHT));

        let joined = left
            .lazy()
            .join(
                other.df.clone().lazy().select(right),
                key_exprs(),
                key_exprs(),
                JoinArgs {
                    maintain_order: MaintainOrderJoin::LeftRight,
                    ..JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns)
                },
            )
            .with_columns([
                col(IN_LEFT).fill_null(lit(false)),
                col(IN_RIGHT).fill_null(lit(false)),
            ])
            .collect()?;

        let shared: Vec<&String> = theirs.iter().filter(|c| own.contains(c)).collect();
        if !ignore_conflict {
            let differs = shared.iter().fold(lit(false), |acc, c| {
                acc.or(col(c.as_str())
                    .cast(DataType::String)
                    .neq_missing(col(suffixed(c.as_str())).cast(DataType::String)))
            });
            let conflicts = joined
                .clone()
                .lazy()
                .filter(col(IN_LEFT).and(col(IN_RIGHT)).and(differs))
                .collect()?;
            let keys = keys_of(&conflicts)?;
            if !keys.is_empty() {
                return Err(Error::MetaConflict { keys });
            }
        }

        let mut merged: Vec<Expr> = key_exprs().to_vec();
        for name in &own {
            if shared.contains(&name) {
                let theirs_name = suffixed(name.as_str());
                let dtype = common_dtype(joined.column(name)?, joined.column(&theirs_name)?);
                merged.push(
                    coalesce(&[col(name.as_str()).cast(dtype.clone()), col(theirs_name).cast(dtype)])
                        .alias(name.as_str()),
                );
            } else {
                merged.push(col(name.as_str()));
            }
        }
        for name in theirs.iter().filter(|c| !own.contains(c)) {
            merged.push(col(suffixed(name.as_str())).alias(name.as_str()));
        }
        let df = joined.lazy().select(merged).collect()?;
        Ok(Self { df })
    }

    /// Key sets, column sets, and every value agree, regardless of row or column order.
    pub fn equals(&self, other: &MetaTable) -> bool {
        let mut names = self.column_names();
        let mut theirs = other.column_names();
        names.sort();
        theirs.sort();
        if names != theirs || self.len() != other.len() {
            return false;
        }
        let mut order: Vec<Expr> = key_exprs().to_vec();
        order.extend(names.iter().map(|n| col(n.as_str())));
        let canonical = |df: &DataFrame| {
            df.clone()
                .lazy()
                .select(order.clone())
                .sort_by_exprs(key_exprs(), Default::default())
                .collect()
        };
        match (canonical(&self.df), canonical(&other.df)) {
            (Ok(a), Ok(b)) => a.equals_missing(&b),
            _ => false,
        }
    }

    /// Read a metadata table with `model` and `scenario` columns; other columns become indicators.
    pub fn from_dataframe(df: &DataFrame) -> Result<MetaTable> {
        let names = column_names(df);
        for required in [MODEL, SCENARIO] {
            if !names.iter().any(|n| n == required) {
                return Err(Error::Schema(format!(
                    "metadata table is missing column `{required}`"
                )));
            }
        }
        let mut columns = vec![
            df.column(MODEL)?.cast(&DataType::String)?,
            df.column(SCENARIO)?.cast(&DataType::String)?,
        ];
        for name in names.iter().filter(|n| *n != MODEL && *n != SCENARIO) {
            let values = polars_column_to_meta(df.column(name)?)?;
            columns.push(meta_values_to_column(name, &values));
        }
        let mut table = DataFrame::new(columns)?;
        if let Some(key) = duplicate_keys(&table)?.first() {
            return Err(Error::Schema(format!(
                "metadata table has duplicate scenario {key}"
            )));
        }
        if table.get_column_index(EXCLUDE).is_none() {
            table.with_column(Column::new(EXCLUDE.into(), vec![false; table.height()]))?;
        }
        Ok(Self { df: table })
    }
}

fn key_exprs() -> [Expr; 2] {
    [col(MODEL), col(SCENARIO)]
}

fn keys_frame(keys: &[ScenarioKey]) -> Result<DataFrame> {
    let models: Vec<&str> = keys.iter().map(|k| k.model.as_str()).collect();
    let scenarios: Vec<&str> = keys.iter().map(|k| k.scenario.as_str()).collect();
    Ok(DataFrame::new(vec![
        Column::new(MODEL.into(), models),
        Column::new(SCENARIO.into(), scenarios),
    ])?)
}

fn keys_of(df: &DataFrame) -> Result<Vec<ScenarioKey>> {
    let models = df.column(MODEL)?.str()?;
    let scenarios = df.column(SCENARIO)?.str()?;
    Ok(models
        .into_iter()
        .zip(scenarios)
        .map(|(m, s)| ScenarioKey::new(m.unwrap_or_default(), s.unwrap_or_default()))
        .collect())
}

/// Keys occurring more than once, sorted.
fn duplicate_keys(df: &DataFrame) -> Result<Vec<ScenarioKey>> {
    let repeated = df
        .clone()
        .lazy()
        .group_by_stable(key_exprs())
        .agg([len().alias(COUNT)])
        .filter(col(COUNT).gt(lit(1)))
        .sort_by_exprs(key_exprs(), Default::default())
        .collect()?;
    keys_of(&repeated)
}

/// Type holding the values of `a` and `b`; an all-null side takes the other's type.
fn common_dtype(a: &Column, b: &Column) -> DataType {
    let empty = |c: &Column| c.null_count() == c.len();
    let numeric = |d: &DataType| d.is_integer() || d.is_float();
    match (a.dtype(), b.dtype()) {
        (x, y) if x == y => x.clone(),
        _ if empty(b) => a.dtype().clone(),
        _ if empty(a) => b.dtype().clone(),
        (x, y) if numeric(x) && numeric(y) => DataType::Float64,
        _ => DataType::String,
    }
}

fn meta_values_to_column(name: &str, values: &[Option<MetaValue>]) -> Column {
    let name: PlSmallStr = name.into();
    let present = || values.iter().flatten();
    if present().all(|v| matches!(v, MetaValue::Bool(_))) {
        let v: Vec<Option<bool>> = values
            .iter()
            .map(|v| match v {
                Some(MetaValue::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        Column::new(name, v)
    } else if present().all(|v| matches!(v, MetaValue::Int(_))) {
        let v: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                Some(MetaValue::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        Column::new(name, v)
    } else if present().all(|v| v.as_f64().is_some()) {
        let v: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.as_ref().and_then(MetaValue::as_f64))
            .collect();
        Column::new(name, v)
    } else {
        let v: Vec<Option<String>> = values
            .iter()
            .map(|v| v.as_ref().map(|v| v.to_string()))
            .collect();
        Column::new(name, v)
    }
}

fn polars_column_to_meta(column: &Column) -> Result<Vec<Option<MetaValue>>> {
    let dtype = column.dtype();
    let values = if dtype == &DataType::Boolean {
        column
            .bool()?
            .into_iter()
            .map(|v| v.map(MetaValue::Bool))
            .collect()
    } else if dtype.is_integer() {
        column
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.map(MetaValue::Int))
            .collect()
    } else if dtype.is_float() {
        column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|f| !f.is_nan()).map(MetaValue::Float))
            .collect()
    } else {
        column
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map(|s| MetaValue::Str(s.to_string())))
            .collect()
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(m: &str, s: &str) -> ScenarioKey {
        ScenarioKey::new(m, s)
    }

    fn table() -> MetaTable {
        MetaTable::from_keys([key("m", "a"), key("m", "b"), key("m", "a")]).unwrap()
    }

    #[test]
    fn test_from_keys_dedupes_and_sets_exclude() {
        let meta = table();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.keys().unwrap(), vec![key("m", "a"), key("m", "b")]);
        assert_eq!(meta.column_names(), vec![EXCLUDE]);
        assert_eq!(meta.get(&key("m", "b"), EXCLUDE), Some(MetaValue::Bool(false)));
    }

    #[test]
    fn test_set_values_combines_first() {
        let mut meta = table();
        meta.set_values("category", vec![(key("m", "a"), Some("low".into()))])
            .unwrap();
        assert_eq!(meta.get(&key("m", "b"), "category"), None);
        meta.set_values(
            "category",
            vec![(key("m", "a"), None), (key("m", "b"), Some("high".into()))],
        )
        .unwrap();
        assert_eq!(meta.get(&key("m", "a"), "category"), Some("low".into()));
        assert_eq!(meta.get(&key("m", "b"), "category"), Some("high".into()));
    }

    #[test]
    fn test_set_values_widens_numeric_columns() {
        let mut meta = table();
        meta.set_column("number", MetaValue::Int(1)).unwrap();
        meta.set_values("number", vec![(key("m", "b"), Some(MetaValue::Float(2.5)))])
            .unwrap();
        assert_eq!(meta.df().column("number").unwrap().dtype(), &DataType::Float64);
        assert_eq!(meta.get(&key("m", "a"), "number"), Some(MetaValue::Float(1.0)));
        assert_eq!(meta.get(&key("m", "b"), "number"), Some(MetaValue::Float(2.5)));
    }

    #[test]
    fn test_set_values_rejects_unknown_and_repeated_keys() {
        let mut meta = table();
        assert!(meta
            .set_values("x", vec![(key("m", "zzz"), Some(MetaValue::Int(1)))])
            .is_err());
        assert!(meta
            .set_values(
                "x",
                vec![(key("m", "a"), Some(MetaValue::Int(1))), (key("m", "a"), Some(MetaValue::Int(2)))]
            )
            .is_err());
    }

    #[test]
    fn test_exclude_flags_and_coercion() {
        let mut meta = table();
        meta.set_exclude(&[key("m", "b"), key("m", "unknown")]).unwrap();
        assert_eq!(meta.excluded_keys().unwrap(), vec![key("m", "b")]);
        assert!(!meta.is_excluded(&key("m", "a")));

        meta.set_column(EXCLUDE, MetaValue::Str("TRUE".into())).unwrap();
        meta.coerce_exclude().unwrap();
        assert_eq!(meta.excluded_keys().unwrap().len(), 2);
        meta.reset_exclude().unwrap();
        assert!(meta.excluded_keys().unwrap().is_empty());
    }

    #[test]
    fn test_rename_keys_only_touches_selected() {
        let mut meta = MetaTable::from_keys([key("m", "a"), key("n", "a")]).unwrap();
        let mapping = HashMap::from([("a".to_string(), "z".to_string())]);
        let selected = HashSet::from([key("n", "a")]);
        meta.rename_keys(SCENARIO, &mapping, &selected).unwrap();
        assert_eq!(meta.keys().unwrap(), vec![key("m", "a"), key("n", "z")]);
    }

    #[test]
    fn test_rename_keys_detects_collapse() {
        let mut meta = table();
        let mapping = HashMap::from([("a".to_string(), "b".to_string())]);
        let selected = HashSet::from([key("m", "a")]);
        let err = meta.rename_keys(SCENARIO, &mapping, &selected).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { keys } if keys == vec![key("m", "b")]));
    }

    #[test]
    fn test_merge_reports_conflicting_keys_only() {
        let mut left = table();
        left.set_column("number", MetaValue::Int(1)).unwrap();
        let mut right = MetaTable::from_keys([key("m", "a"), key("m", "c")]).unwrap();
        right.set_column("number", MetaValue::Int(1)).unwrap();
        right
            .set_values("number", vec![(key("m", "a"), Some(MetaValue::Int(2)))])
            .unwrap();

        let err = left.merge(&right, false).unwrap_err();
        assert!(matches!(err, Error::MetaConflict { keys } if keys == vec![key("m", "a")]));

        let merged = left.merge(&right, true).unwrap();
        assert_eq!(merged.keys().unwrap(), vec![key("m", "a"), key("m", "b"), key("m", "c")]);
        assert_eq!(merged.get(&key("m", "a"), "number"), Some(MetaValue::Int(1)));
        assert_eq!(merged.get(&key("m", "c"), "number"), Some(MetaValue::Int(1)));
    }

    #[test]
    fn test_merge_takes_new_columns_from_other() {
        let left = table();
        let mut right = MetaTable::from_keys([key("m", "b")]).unwrap();
        right.set_column("category", "high".into()).unwrap();

        let merged = left.merge(&right, false).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&key("m", "b"), "category"), Some("high".into()));
        assert_eq!(merged.get(&key("m", "a"), "category"), None);
    }

    #[test]
    fn test_dataframe_round_trip() {
        let mut meta = table();
        meta.set_column("share", MetaValue::Float(0.5)).unwrap();
        let df = meta.df().clone();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("share").unwrap().dtype(), &DataType::Float64);
        let back = MetaTable::from_dataframe(&df).unwrap();
        assert!(back.equals(&meta));
    }
}
