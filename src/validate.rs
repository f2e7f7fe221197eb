//! Scenario validation: required variables, value bounds and bound-based categorization.

use crate::data::{mask_chunked, UNIT, VARIABLE};
use crate::error::{Error, Result};
use crate::filter::{row_mask, Filter};
use crate::frame::IamFrame;
use crate::meta::{MetaValue, ScenarioKey};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Upper and lower bound on the values of a variable, optionally at a single year.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub up: Option<f64>,
    pub lo: Option<f64>,
    pub year: Option<i64>,
}

impl Bounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up(mut self, up: f64) -> Self {
        self.up = Some(up);
        self
    }

    pub fn lo(mut self, lo: f64) -> Self {
        self.lo = Some(lo);
        self
    }

    pub fn year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }

    fn ensure_bounded(&self, variable: &str) -> Result<()> {
        if self.up.is_none() && self.lo.is_none() {
            return Err(Error::invalid(format!(
                "criteria for `{variable}` need an upper or lower bound"
            )));
        }
        Ok(())
    }

    fn within(&self, value: f64) -> bool {
        self.up.is_none_or(|up| value <= up) && self.lo.is_none_or(|lo| value >= lo)
    }

    fn violated_by(&self, value: f64) -> bool {
        self.up.is_some_and(|up| value > up) || self.lo.is_some_and(|lo| value < lo)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

impl IamFrame {
    /// Rows of `variable` at the bounds' year, grouped by scenario in row order.
    fn rows_by_scenario(
        &self,
        variable: &str,
        bounds: &Bounds,
    ) -> Result<BTreeMap<ScenarioKey, Vec<usize>>> {
        let variables = self.data().str_column(VARIABLE)?;
        let years = self.data().years()?;
        let keys = self.data().row_keys()?;
        let mut groups: BTreeMap<ScenarioKey, Vec<usize>> = BTreeMap::new();
        for (i, key) in keys.into_iter().enumerate() {
            let same_variable = variables.get(i) == Some(variable);
            let same_year = bounds.year.is_none_or(|y| years[i] == Some(y));
            if same_variable && same_year {
                groups.entry(key).or_default().push(i);
            }
        }
        Ok(groups)
    }

    /// Scenarios lacking `variable` (optionally in `unit`, or at any of `years`).
    ///
    /// Returns `None` when every scenario has it.
    pub fn require_variable(
        &mut self,
        variable: &str,
        unit: Option<&str>,
        years: Option<&[i64]>,
        exclude_on_fail: bool,
    ) -> Result<Option<Vec<ScenarioKey>>> {
        let mut filter = Filter::new().with(VARIABLE, variable);
        if let Some(unit) = unit {
            filter = filter.with(UNIT, unit);
        }
        if let Some(years) = years {
            filter = filter.year(years.to_vec());
        }
        let mask = row_mask(self.data(), self.meta(), &filter)?;
        let present: BTreeSet<ScenarioKey> = self
            .data()
            .row_keys()?
            .into_iter()
            .zip(mask)
            .filter(|(_, m)| *m)
            .map(|(k, _)| k)
            .collect();
        let missing: Vec<ScenarioKey> = self
            .meta()
            .keys()?
            .into_iter()
            .filter(|k| !present.contains(k))
            .collect();

        let n = missing.len();
        if n == 0 {
            info!("All scenarios have the required variable `{}`", variable);
            return Ok(None);
        }
        if exclude_on_fail {
            self.exclude_on_fail(&missing)?;
        }
        info!(
            "{} scenario{} not include required variable `{}`",
            n,
            if n == 1 { " does" } else { "s do" },
            variable
        );
        Ok(Some(missing))
    }

    /// Rows outside the bounds given per variable; `None` when every row satisfies them.
    pub fn validate(
        &mut self,
        criteria: &[(&str, Bounds)],
        exclude_on_fail: bool,
    ) -> Result<Option<DataFrame>> {
        let values = self.data().values()?;
        let mut failing = vec![false; self.len()];
        for (variable, bounds) in criteria {
            bounds.ensure_bounded(variable)?;
            for rows in self.rows_by_scenario(variable, bounds)?.values() {
                for &i in rows {
                    if bounds.violated_by(values[i]) {
                        failing[i] = true;
                    }
                }
            }
        }

        let n = failing.iter().filter(|f| **f).count();
        if n == 0 {
            return Ok(None);
        }
        info!(
            "{} of {} data points do not satisfy the criteria",
            n,
            self.len()
        );
        let report = self.data().df().filter(&mask_chunked(&failing))?;
        if exclude_on_fail {
            let keys = self.data().filter_mask(&failing)?.scenario_keys()?;
            self.exclude_on_fail(&keys)?;
        }
        Ok(Some(report))
    }

    /// Set meta column `name` to `value` for every scenario whose rows of some criterion's
    /// variable all lie within its bounds.
    pub fn categorize(
        &mut self,
        name: &str,
        value: impl Into<MetaValue>,
        criteria: &[(&str, Bounds)],
    ) -> Result<()> {
        let values = self.data().values()?;
        let mut matched: BTreeSet<ScenarioKey> = BTreeSet::new();
        for (variable, bounds) in criteria {
            bounds.ensure_bounded(variable)?;
            for (key, rows) in self.rows_by_scenario(variable, bounds)? {
                if rows.iter().all(|&i| bounds.within(values[i])) {
                    matched.insert(key);
                }
            }
        }

        let n = matched.len();
        if n == 0 {
            info!("No scenarios satisfy the criteria");
            return Ok(());
        }
        let value = value.into();
        let label = value.to_string();
        let assignments = matched
            .into_iter()
            .map(|k| (k, Some(value.clone())))
            .collect();
        self.set_meta_by_key(name, assignments)?;
        info!(
            "{} scenario{} categorized as `{}: {}`",
            n,
            plural(n),
            name,
            label
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::EXCLUDE;

    fn frame() -> IamFrame {
        let df = df!(
            "model" => ["m", "m", "m", "m", "m"],
            "scenario" => ["a", "a", "b", "b", "c"],
            "region" => ["World", "World", "World", "World", "World"],
            "variable" => ["Primary Energy", "Primary Energy", "Primary Energy", "Primary Energy", "Emissions"],
            "unit" => ["EJ/yr", "EJ/yr", "EJ/yr", "EJ/yr", "Mt"],
            "year" => [2005i64, 2010, 2005, 2010, 2010],
            "value" => [1.0, 6.0, 2.0, 7.0, 3.0]
        )
        .unwrap();
        IamFrame::new(df).unwrap()
    }

    #[test]
    fn test_require_variable_reports_missing() {
        let mut df = frame();
        let missing = df
            .require_variable("Primary Energy", None, None, true)
            .unwrap()
            .unwrap();
        assert_eq!(missing, vec![ScenarioKey::new("m", "c")]);
        assert!(df.meta().is_excluded(&ScenarioKey::new("m", "c")));
        assert!(!df.meta().is_excluded(&ScenarioKey::new("m", "a")));
    }

    #[test]
    fn test_require_variable_all_present() {
        let mut df = frame().filter(&Filter::new().scenario(vec!["a", "b"])).unwrap();
        assert!(df
            .require_variable("Primary Energy", Some("EJ/yr"), Some(&[2005]), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_validate_returns_violating_rows() {
        let mut df = frame();
        let report = df
            .validate(&[("Primary Energy", Bounds::new().up(6.5).year(2010))], true)
            .unwrap()
            .unwrap();
        assert_eq!(report.height(), 1);
        assert_eq!(
            report.column("scenario").unwrap().str().unwrap().get(0),
            Some("b")
        );
        assert_eq!(
            df.meta().get(&ScenarioKey::new("m", "b"), EXCLUDE),
            Some(MetaValue::Bool(true))
        );
    }

    #[test]
    fn test_validate_passes() {
        let mut df = frame();
        let report = df
            .validate(&[("Primary Energy", Bounds::new().lo(0.0))], false)
            .unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_validate_needs_a_bound() {
        let mut df = frame();
        let err = df
            .validate(&[("Primary Energy", Bounds::new().year(2010))], false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_categorize() {
        let mut df = frame();
        df.categorize("level", "low", &[("Primary Energy", Bounds::new().up(6.5))])
            .unwrap();
        assert_eq!(
            df.meta().get(&ScenarioKey::new("m", "a"), "level"),
            Some(MetaValue::Str("low".into()))
        );
        assert_eq!(df.meta().get(&ScenarioKey::new("m", "b"), "level"), None);
        assert_eq!(df.meta().get(&ScenarioKey::new("m", "c"), "level"), None);
    }

    #[test]
    fn test_categorize_without_matches_adds_no_column() {
        let mut df = frame();
        df.categorize("level", "tiny", &[("Primary Energy", Bounds::new().up(0.5))])
            .unwrap();
        assert!(!df.meta().has_column("level"));
    }
}
