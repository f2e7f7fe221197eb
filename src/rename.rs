//! Renaming of scenario keys and data dimensions, merging rows that end up identical.

use crate::aggregate::{group_reduce, AggMethod};
use crate::data::{
    describe_rows, index_exprs, index_join, IAMC_IDX, META_IDX, MODEL, REGION, SCENARIO, UNIT,
    VARIABLE,
};
use crate::error::{Error, Result};
use crate::filter::{row_mask, Filter};
use crate::frame::IamFrame;
use crate::meta::ScenarioKey;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

const RENAMED: &str = "__renamed";

/// Substitutions per dimension: `dimension -> [(old, new)]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rename {
    mappings: Vec<(String, Vec<(String, String)>)>,
}

impl Rename {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        dimension: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        let dimension = dimension.into();
        let pair = (old.into(), new.into());
        match self.mappings.iter_mut().find(|(d, _)| *d == dimension) {
            Some((_, pairs)) => {
                pairs.retain(|(o, _)| *o != pair.0);
                pairs.push(pair);
            }
            None => self.mappings.push((dimension, vec![pair])),
        }
        self
    }

    pub fn model(self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.with(MODEL, old, new)
    }

    pub fn scenario(self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.with(SCENARIO, old, new)
    }

    pub fn region(self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.with(REGION, old, new)
    }

    pub fn variable(self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.with(VARIABLE, old, new)
    }

    pub fn unit(self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.with(UNIT, old, new)
    }

    /// Parse `dimension:old=new`.
    pub fn parse_arg(self, arg: &str) -> Result<Self> {
        let parsed = arg
            .split_once(':')
            .and_then(|(dim, pair)| pair.split_once('=').map(|(old, new)| (dim, old, new)));
        match parsed {
            Some((dim, old, new)) if !dim.trim().is_empty() && !old.is_empty() => {
                Ok(self.with(dim.trim().to_lowercase(), old, new))
            }
            _ => Err(Error::invalid(format!(
                "invalid rename `{arg}`, expected DIMENSION:OLD=NEW"
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|(d, _)| d.as_str())
    }

    fn lookup(&self) -> Vec<(&str, HashMap<String, String>)> {
        self.mappings
            .iter()
            .map(|(dim, pairs)| (dim.as_str(), pairs.iter().cloned().collect()))
            .collect()
    }

    /// Rows matching every dimension's old values.
    fn selection(&self) -> Filter {
        self.mappings.iter().fold(Filter::new(), |filter, (dim, pairs)| {
            let olds: Vec<String> = pairs.iter().map(|(old, _)| old.clone()).collect();
            filter.with(dim.as_str(), olds)
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenameOptions {
    /// Keep the original rows and add a renamed copy of the matching ones.
    pub append: bool,
    /// Fail when a renamed row lands on an existing one instead of summing them.
    pub check_duplicates: bool,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            append: false,
            check_duplicates: true,
        }
    }
}

impl IamFrame {
    pub fn rename(&self, mapping: &Rename, opts: RenameOptions) -> Result<IamFrame> {
        let mut renamed = self.clone();
        renamed.rename_inplace(mapping, opts)?;
        Ok(renamed)
    }

    /// Rewrite values of the rows matching all old values in `mapping`; rows that become
    /// identical are summed.
    pub fn rename_inplace(&mut self, mapping: &Rename, opts: RenameOptions) -> Result<()> {
        if mapping.is_empty() {
            return Ok(());
        }
        let renames_index = mapping.dimensions().any(|d| META_IDX.contains(&d));
        let renames_data = mapping.dimensions().any(|d| !META_IDX.contains(&d));
        if renames_index && renames_data {
            return Err(Error::ConflictingRename);
        }
        let data_dims: Vec<String> = IAMC_IDX
            .iter()
            .map(|c| c.to_string())
            .chain(self.extra_cols().iter().cloned())
            .collect();
        if let Some(dim) = mapping.dimensions().find(|d| !data_dims.iter().any(|c| c == d)) {
            return Err(Error::invalid(format!("renaming by `{dim}` is not supported")));
        }

        let selection = mapping.selection();
        if opts.append {
            let subset = self.filter(&selection)?;
            let renamed = subset.rename(
                mapping,
                RenameOptions {
                    append: false,
                    ..opts
                },
            )?;
            return self.append_inplace(&renamed, false);
        }

        let mask = row_mask(self.data(), self.meta(), &selection)?;
        let mut meta = self.meta().clone();
        let mut df = self.data().df().clone();

        if renames_index {
            let mut selected: HashSet<ScenarioKey> = self
                .data()
                .row_keys()?
                .into_iter()
                .zip(&mask)
                .filter(|(_, m)| **m)
                .map(|(k, _)| k)
                .collect();
            for (dim, lookup) in mapping.lookup() {
                meta.rename_keys(dim, &lookup, &selected)?;
                selected = selected
                    .into_iter()
                    .map(|mut key| {
                        let current = key.dimension(dim).unwrap_or_default().to_string();
                        if let Some(new) = lookup.get(&current) {
                            match dim {
                                MODEL => key.model = new.clone(),
                                _ => key.scenario = new.clone(),
                            }
                        }
                        key
                    })
                    .collect();
            }
        }

        let substitutions: Vec<Expr> = mapping
            .mappings
            .iter()
            .map(|(dim, pairs)| {
                pairs
                    .iter()
                    .fold(col(dim.as_str()), |expr, (old, new)| {
                        when(col(RENAMED).and(col(dim.as_str()).eq(lit(old.clone()))))
                            .then(lit(new.clone()))
                            .otherwise(expr)
                    })
                    .alias(dim.as_str())
            })
            .collect();
        let mut df = self.data().df().clone();
        df.with_column(Column::new(RENAMED.into(), mask))?;
        let df = df.lazy().with_columns(substitutions).collect()?;

        let index = self.long_index();
        if opts.check_duplicates {
            let keys = index_exprs(&index);
            let collisions = df
                .clone()
                .lazy()
                .filter(col(RENAMED))
                .join(
                    df.clone().lazy().filter(col(RENAMED).not()),
                    keys.clone(),
                    keys,
                    index_join(JoinType::Semi),
                )
                .collect()?;
            let rows: BTreeSet<String> = describe_rows(&collisions, &index)?.into_iter().collect();
            if !rows.is_empty() {
                return Err(Error::DuplicateRow {
                    rows: rows.into_iter().collect(),
                });
            }
        }
        let df = df.drop(RENAMED)?;

        let merged = group_reduce(&df, &index, &AggMethod::Sum)?;
        let data = self.data().with_frame(merged).sorted()?;
        *self = IamFrame::from_parts(data, &meta)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> IamFrame {
        let df = df!(
            "model" => ["m", "m", "m", "m"],
            "scenario" => ["a", "a", "a", "b"],
            "region" => ["World", "World", "World", "World"],
            "variable" => ["A", "B", "C", "A"],
            "unit" => ["U", "U", "U", "U"],
            "year" => [2010i64, 2010, 2010, 2010],
            "value" => [1.0, 2.0, 3.0, 4.0]
        )
        .unwrap();
        IamFrame::new(df).unwrap()
    }

    #[test]
    fn test_parse_arg() {
        let rename = Rename::new().parse_arg("Region:EU=Europe").unwrap();
        assert_eq!(rename, Rename::new().with(REGION, "EU", "Europe"));
        assert!(Rename::new().parse_arg("region=EU").is_err());
    }

    #[test]
    fn test_index_and_data_rename_conflict() {
        let rename = Rename::new().scenario("a", "c").region("World", "Earth");
        let err = frame().rename(&rename, RenameOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ConflictingRename));
    }

    #[test]
    fn test_rename_scenario_moves_meta() {
        let mut df = frame();
        df.set_meta("note", "x").unwrap();
        let renamed = df
            .rename(&Rename::new().scenario("a", "c"), RenameOptions::default())
            .unwrap();
        assert_eq!(renamed.scenarios().unwrap(), vec!["b", "c"]);
        assert!(renamed.meta().contains(&ScenarioKey::new("m", "c")));
        assert!(!renamed.meta().contains(&ScenarioKey::new("m", "a")));
    }

    #[test]
    fn test_rename_scenario_onto_existing_key_fails() {
        let err = frame()
            .rename(&Rename::new().scenario("a", "b"), RenameOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn test_rename_collision_reports_duplicates() {
        let err = frame()
            .rename(&Rename::new().variable("B", "A"), RenameOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRow { rows } if rows.len() == 1));
    }

    #[test]
    fn test_rename_keeps_null_and_literal_null_extras_apart() {
        let df = df!(
            "model" => ["m", "m"],
            "scenario" => ["a", "a"],
            "region" => ["World", "World"],
            "variable" => ["A", "B"],
            "unit" => ["U", "U"],
            "subannual" => [None, Some("null")],
            "year" => [2010i64, 2010],
            "value" => [1.0, 2.0]
        )
        .unwrap();
        let renamed = IamFrame::new(df)
            .unwrap()
            .rename(&Rename::new().variable("B", "A"), RenameOptions::default())
            .unwrap();
        assert_eq!(renamed.len(), 2);
        assert_eq!(renamed.variables().unwrap(), vec!["A"]);
    }

    #[test]
    fn test_rename_without_check_sums_collisions() {
        let opts = RenameOptions {
            check_duplicates: false,
            ..Default::default()
        };
        let renamed = frame()
            .rename(&Rename::new().variable("B", "A").variable("C", "A"), opts)
            .unwrap();
        assert_eq!(renamed.len(), 2);
        let values = renamed.data().values().unwrap();
        assert_eq!(values, vec![6.0, 4.0]);
    }

    #[test]
    fn test_rename_append_keeps_originals() {
        let opts = RenameOptions {
            append: true,
            ..Default::default()
        };
        let renamed = frame()
            .rename(&Rename::new().variable("C", "D"), opts)
            .unwrap();
        assert_eq!(renamed.len(), 5);
        assert!(renamed.variables().unwrap().contains(&"C".to_string()));
        assert!(renamed.variables().unwrap().contains(&"D".to_string()));
    }

    #[test]
    fn test_rename_by_non_dimension_is_invalid() {
        let err = frame()
            .rename(&Rename::new().with("year", "2010", "2020"), RenameOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
