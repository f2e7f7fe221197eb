//! Declarative row selection over a long table and its metadata.

use crate::data::{LongTable, TimeDomain, IAMC_IDX, TIME, VARIABLE, YEAR};
use crate::error::{Error, Result};
use crate::meta::{MetaTable, MetaValue, ScenarioKey};
use crate::pattern::{find_depth, pattern_match, LevelSpec};
use chrono::{Datelike, Month, NaiveDateTime, Timelike, Weekday};
use std::collections::HashSet;
use std::ops::Range;

const LEVEL: &str = "level";
const MONTH: &str = "month";
const DAY: &str = "day";
const HOUR: &str = "hour";

/// Accepted values for one filter key.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Strings(Vec<String>),
    Ints(Vec<i64>),
    /// Half-open: `start` included, `end` excluded.
    IntRange(Range<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    Datetimes(Vec<NaiveDateTime>),
    /// Half-open: `start` included, `end` excluded.
    DatetimeRange(Range<NaiveDateTime>),
}

impl Criterion {
    fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            Criterion::Strings(v) => Some(v.clone()),
            Criterion::Ints(v) => Some(v.iter().map(|i| i.to_string()).collect()),
            Criterion::Floats(v) => Some(v.iter().map(|f| f.to_string()).collect()),
            Criterion::Bools(v) => Some(v.iter().map(|b| b.to_string()).collect()),
            _ => None,
        }
    }

    fn contains_int(&self, value: i64) -> Option<bool> {
        match self {
            Criterion::Ints(v) => Some(v.contains(&value)),
            Criterion::IntRange(r) => Some(r.contains(&value)),
            Criterion::Strings(v) => Some(
                v.iter()
                    .any(|s| s.trim().parse::<i64>().ok() == Some(value)),
            ),
            _ => None,
        }
    }
}

impl From<&str> for Criterion {
    fn from(v: &str) -> Self {
        Criterion::Strings(vec![v.to_string()])
    }
}

impl From<String> for Criterion {
    fn from(v: String) -> Self {
        Criterion::Strings(vec![v])
    }
}

impl From<&String> for Criterion {
    fn from(v: &String) -> Self {
        Criterion::Strings(vec![v.clone()])
    }
}

impl From<Vec<&str>> for Criterion {
    fn from(v: Vec<&str>) -> Self {
        Criterion::Strings(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Criterion {
    fn from(v: Vec<String>) -> Self {
        Criterion::Strings(v)
    }
}

impl<const N: usize> From<[&str; N]> for Criterion {
    fn from(v: [&str; N]) -> Self {
        Criterion::Strings(v.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[&str]> for Criterion {
    fn from(v: &[&str]) -> Self {
        Criterion::Strings(v.iter().map(|s| s.to_string()).collect())
    }
}

impl From<i64> for Criterion {
    fn from(v: i64) -> Self {
        Criterion::Ints(vec![v])
    }
}

impl From<i32> for Criterion {
    fn from(v: i32) -> Self {
        Criterion::Ints(vec![i64::from(v)])
    }
}

impl From<Vec<i64>> for Criterion {
    fn from(v: Vec<i64>) -> Self {
        Criterion::Ints(v)
    }
}

impl From<Vec<i32>> for Criterion {
    fn from(v: Vec<i32>) -> Self {
        Criterion::Ints(v.into_iter().map(i64::from).collect())
    }
}

impl<const N: usize> From<[i32; N]> for Criterion {
    fn from(v: [i32; N]) -> Self {
        Criterion::Ints(v.iter().map(|i| i64::from(*i)).collect())
    }
}

impl From<Range<i64>> for Criterion {
    fn from(v: Range<i64>) -> Self {
        Criterion::IntRange(v)
    }
}

impl From<Range<i32>> for Criterion {
    fn from(v: Range<i32>) -> Self {
        Criterion::IntRange(i64::from(v.start)..i64::from(v.end))
    }
}

impl From<f64> for Criterion {
    fn from(v: f64) -> Self {
        Criterion::Floats(vec![v])
    }
}

impl From<bool> for Criterion {
    fn from(v: bool) -> Self {
        Criterion::Bools(vec![v])
    }
}

impl From<NaiveDateTime> for Criterion {
    fn from(v: NaiveDateTime) -> Self {
        Criterion::Datetimes(vec![v])
    }
}

impl From<Vec<NaiveDateTime>> for Criterion {
    fn from(v: Vec<NaiveDateTime>) -> Self {
        Criterion::Datetimes(v)
    }
}

impl From<Range<NaiveDateTime>> for Criterion {
    fn from(v: Range<NaiveDateTime>) -> Self {
        Criterion::DatetimeRange(v)
    }
}

/// Conjunction of per-key criteria.
///
/// Keys are metadata columns, `model`, `scenario`, `region`, `variable`, `unit`, extra columns,
/// `level`, `year`, and in datetime mode `month`, `day`, `hour` and `time`.
#[derive(Debug, Clone)]
pub struct Filter {
    criteria: Vec<(String, Criterion)>,
    regexp: bool,
    keep: bool,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            regexp: false,
            keep: true,
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the criterion for `key`, replacing any earlier one.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Criterion>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.criteria.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.criteria.push((key, value)),
        }
        self
    }

    pub fn model(self, value: impl Into<Criterion>) -> Self {
        self.with("model", value)
    }

    pub fn scenario(self, value: impl Into<Criterion>) -> Self {
        self.with("scenario", value)
    }

    pub fn region(self, value: impl Into<Criterion>) -> Self {
        self.with("region", value)
    }

    pub fn variable(self, value: impl Into<Criterion>) -> Self {
        self.with(VARIABLE, value)
    }

    pub fn unit(self, value: impl Into<Criterion>) -> Self {
        self.with("unit", value)
    }

    pub fn level(self, value: impl Into<Criterion>) -> Self {
        self.with(LEVEL, value)
    }

    pub fn year(self, value: impl Into<Criterion>) -> Self {
        self.with(YEAR, value)
    }

    pub fn month(self, value: impl Into<Criterion>) -> Self {
        self.with(MONTH, value)
    }

    pub fn day(self, value: impl Into<Criterion>) -> Self {
        self.with(DAY, value)
    }

    pub fn hour(self, value: impl Into<Criterion>) -> Self {
        self.with(HOUR, value)
    }

    pub fn time(self, value: impl Into<Criterion>) -> Self {
        self.with(TIME, value)
    }

    /// Treat string criteria as regular expressions (anchored at the start).
    pub fn regexp(mut self, regexp: bool) -> Self {
        self.regexp = regexp;
        self
    }

    /// `false` inverts the selection.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Criterion> {
        self.criteria
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, c)| c)
    }

    pub fn criteria(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.criteria.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Add a criterion written as `key=value[,value...]`.
    ///
    /// Integer keys (`year`, `level`, `month`, `day`, `hour`) accept `start..end` ranges and
    /// integer lists; `time` accepts timestamps and timestamp ranges; other keys take strings.
    pub fn parse_arg(self, arg: &str) -> Result<Self> {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::invalid(format!("filter `{arg}` is not of the form KEY=VALUE")))?;
        let key = key.trim();
        let value = value.trim();
        let criterion = match key {
            YEAR | LEVEL | MONTH | DAY | HOUR => parse_int_criterion(value),
            TIME => parse_time_criterion(value)?,
            _ => Criterion::Strings(split_list(value)),
        };
        Ok(self.with(key, criterion))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).collect()
}

fn parse_int_criterion(value: &str) -> Criterion {
    if let Some((start, end)) = value.split_once("..") {
        if let (Ok(start), Ok(end)) = (start.trim().parse(), end.trim().parse()) {
            return Criterion::IntRange(start..end);
        }
    }
    let items = split_list(value);
    match items
        .iter()
        .map(|s| s.parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
    {
        Ok(ints) => Criterion::Ints(ints),
        Err(_) => Criterion::Strings(items),
    }
}

fn parse_time_criterion(value: &str) -> Result<Criterion> {
    let parse = |s: &str| {
        crate::data::parse_datetime_str(s)
            .ok_or_else(|| Error::unsupported_filter(TIME, format!("invalid timestamp `{s}`")))
    };
    if let Some((start, end)) = value.split_once("..") {
        return Ok(Criterion::DatetimeRange(parse(start)?..parse(end)?));
    }
    let times = split_list(value)
        .iter()
        .map(|s| parse(s.as_str()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Criterion::Datetimes(times))
}

/// Row mask for `filter` over `data`, resolving metadata keys through `meta`.
pub(crate) fn row_mask(data: &LongTable, meta: &MetaTable, filter: &Filter) -> Result<Vec<bool>> {
    let mut mask = vec![true; data.height()];
    let mut row_keys: Option<Vec<ScenarioKey>> = None;
    let string_dims: Vec<String> = IAMC_IDX
        .iter()
        .map(|c| c.to_string())
        .chain(data.extra_cols().iter().cloned())
        .collect();

    for (key, criterion) in filter.criteria() {
        let sub: Vec<bool> = if meta.has_column(key) {
            let keys = matching_meta_keys(meta, key, criterion, filter.regexp)?;
            if row_keys.is_none() {
                row_keys = Some(data.row_keys()?);
            }
            row_keys
                .iter()
                .flatten()
                .map(|k| keys.contains(k))
                .collect()
        } else {
            match key {
                VARIABLE => {
                    let level = filter.get(LEVEL).map(level_spec).transpose()?;
                    string_match(data, key, criterion, level.as_ref(), filter.regexp)?
                }
                LEVEL => {
                    if filter.get(VARIABLE).is_some() {
                        continue;
                    }
                    find_depth(data.str_column(VARIABLE)?, &level_spec(criterion)?)
                }
                YEAR => {
                    let years = data.years()?;
                    int_match(key, &years, criterion)?
                }
                MONTH | DAY | HOUR | TIME => {
                    if data.time_domain() != TimeDomain::Datetime {
                        return Err(Error::unsupported_filter(
                            key,
                            "only available for datetime-indexed data",
                        ));
                    }
                    datetime_match(key, &data.datetimes()?, criterion)?
                }
                _ if string_dims.iter().any(|d| d == key) => {
                    string_match(data, key, criterion, None, filter.regexp)?
                }
                _ => {
                    return Err(Error::unsupported_filter(
                        key,
                        "not a data or metadata column",
                    ))
                }
            }
        };
        for (m, s) in mask.iter_mut().zip(sub) {
            *m &= s;
        }
    }

    if !filter.keep {
        mask.iter_mut().for_each(|m| *m = !*m);
    }
    Ok(mask)
}

fn string_match(
    data: &LongTable,
    key: &str,
    criterion: &Criterion,
    level: Option<&LevelSpec>,
    regexp: bool,
) -> Result<Vec<bool>> {
    let patterns = criterion
        .as_strings()
        .ok_or_else(|| Error::unsupported_filter(key, "expected strings"))?;
    let regexp = regexp && matches!(criterion, Criterion::Strings(_));
    pattern_match(data.str_column(key)?, &patterns, level, regexp)
}

fn level_spec(criterion: &Criterion) -> Result<LevelSpec> {
    let to_level = |i: i64| {
        usize::try_from(i).map_err(|_| Error::unsupported_filter(LEVEL, "level must not be negative"))
    };
    match criterion {
        Criterion::Ints(v) => Ok(LevelSpec::Exact(
            v.iter().map(|i| to_level(*i)).collect::<Result<_>>()?,
        )),
        Criterion::IntRange(r) if r.end > r.start => {
            Ok(LevelSpec::Between(to_level(r.start)?, to_level(r.end - 1)?))
        }
        Criterion::Strings(v) if v.len() == 1 => LevelSpec::parse(&v[0]),
        _ => Err(Error::unsupported_filter(
            LEVEL,
            "expected an integer, a list of integers, or a range such as `1-` or `2+`",
        )),
    }
}

fn int_match(key: &str, values: &[Option<i64>], criterion: &Criterion) -> Result<Vec<bool>> {
    values
        .iter()
        .map(|v| match v {
            Some(v) => criterion
                .contains_int(*v)
                .ok_or_else(|| Error::unsupported_filter(key, "expected integers or a range")),
            None => Ok(false),
        })
        .collect()
}

fn datetime_match(
    key: &str,
    times: &[Option<NaiveDateTime>],
    criterion: &Criterion,
) -> Result<Vec<bool>> {
    match key {
        MONTH => {
            let criterion = match criterion {
                Criterion::Strings(names) => Criterion::Ints(
                    names
                        .iter()
                        .map(|n| month_number(n))
                        .collect::<Result<_>>()?,
                ),
                other => other.clone(),
            };
            let months: Vec<Option<i64>> = times
                .iter()
                .map(|t| t.map(|t| i64::from(t.month())))
                .collect();
            int_match(key, &months, &criterion)
        }
        DAY => {
            if let Criterion::Strings(names) = criterion {
                let days = names
                    .iter()
                    .map(|n| {
                        n.parse::<Weekday>().map_err(|_| {
                            Error::unsupported_filter(DAY, format!("unknown weekday `{n}`"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                return Ok(times
                    .iter()
                    .map(|t| t.is_some_and(|t| days.contains(&t.weekday())))
                    .collect());
            }
            let days: Vec<Option<i64>> =
                times.iter().map(|t| t.map(|t| i64::from(t.day()))).collect();
            int_match(key, &days, criterion)
        }
        HOUR => {
            let hours: Vec<Option<i64>> = times
                .iter()
                .map(|t| t.map(|t| i64::from(t.hour())))
                .collect();
            int_match(key, &hours, criterion)
        }
        _ => {
            let accepted: Box<dyn Fn(&NaiveDateTime) -> bool> = match criterion {
                Criterion::Datetimes(v) => {
                    let v = v.clone();
                    Box::new(move |t| v.contains(t))
                }
                Criterion::DatetimeRange(r) => {
                    let r = r.clone();
                    Box::new(move |t| r.contains(t))
                }
                _ => {
                    return Err(Error::unsupported_filter(
                        key,
                        "expected timestamps or a timestamp range",
                    ))
                }
            };
            Ok(times
                .iter()
                .map(|t| t.as_ref().is_some_and(|t| accepted(t)))
                .collect())
        }
    }
}

fn month_number(name: &str) -> Result<i64> {
    name.trim()
        .parse::<Month>()
        .map(|m| i64::from(m.number_from_month()))
        .map_err(|_| Error::unsupported_filter(MONTH, format!("unknown month `{name}`")))
}

fn matching_meta_keys(
    meta: &MetaTable,
    name: &str,
    criterion: &Criterion,
    regexp: bool,
) -> Result<HashSet<ScenarioKey>> {
    let values = meta.values(name).unwrap_or_default();
    let mask: Vec<bool> = match criterion {
        Criterion::Strings(patterns) => {
            let rendered: Vec<Option<String>> = values
                .iter()
                .map(|v| v.as_ref().map(|v| v.to_string()))
                .collect();
            let mut mask =
                pattern_match(rendered.iter().map(|s| s.as_deref()), patterns, None, regexp)?;
            for (hit, value) in mask.iter_mut().zip(&values) {
                if let Some(MetaValue::Bool(b)) = value {
                    let word = if *b { "true" } else { "false" };
                    *hit = patterns.iter().any(|p| p.trim().eq_ignore_ascii_case(word));
                }
            }
            mask
        }
        Criterion::Bools(accepted) => values
            .iter()
            .map(|v| matches!(v, Some(MetaValue::Bool(b)) if accepted.contains(b)))
            .collect(),
        Criterion::Ints(accepted) => values
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(MetaValue::as_f64)
                    .is_some_and(|x| accepted.iter().any(|a| *a as f64 == x))
            })
            .collect(),
        Criterion::Floats(accepted) => values
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(MetaValue::as_f64)
                    .is_some_and(|x| accepted.contains(&x))
            })
            .collect(),
        Criterion::IntRange(r) => values
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(MetaValue::as_f64)
                    .is_some_and(|x| x >= r.start as f64 && x < r.end as f64)
            })
            .collect(),
        _ => {
            return Err(Error::unsupported_filter(
                name,
                "timestamps cannot be matched against metadata",
            ))
        }
    };
    Ok(meta
        .keys()?
        .into_iter()
        .zip(mask)
        .filter(|(_, m)| *m)
        .map(|(k, _)| k)
        .collect())
}
