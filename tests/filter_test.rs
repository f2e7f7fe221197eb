mod common;

use iamframe::{Filter, IamFrame, MetaValue, ScenarioKey};
use polars::prelude::*;

fn two_model_frame() -> IamFrame {
    let df = df!(
        "model" => ["M1", "M1", "M2", "M2"],
        "scenario" => ["S1", "S1", "S2", "S2"],
        "region" => ["World", "R1", "World", "R1"],
        "variable" => ["A", "A|x", "A", "A|x"],
        "unit" => ["U"; 4],
        "year" => [2010i64, 2020, 2010, 2020],
        "value" => [1.0, 2.0, 3.0, 4.0]
    )
    .unwrap();
    IamFrame::new(df).unwrap()
}

#[test]
fn test_filter_composes() {
    let df = two_model_frame();
    let a = Filter::new().region("World");
    let b = Filter::new().year(2010);
    let both = Filter::new().region("World").year(2010);

    let chained = df.filter(&a).unwrap().filter(&b).unwrap();
    let combined = df.filter(&both).unwrap();
    assert!(chained.frame_equal(&combined));
    assert_eq!(combined.len(), 2);
}

#[test]
fn test_keep_and_invert_partition_rows() {
    let df = two_model_frame();
    let filter = Filter::new().variable("A|*");
    let kept = df.filter(&filter).unwrap();
    let dropped = df.filter(&filter.clone().keep(false)).unwrap();

    assert_eq!(kept.len() + dropped.len(), df.len());
    assert_eq!(kept.variables().unwrap(), vec!["A|x"]);
    assert_eq!(dropped.variables().unwrap(), vec!["A"]);
    let rejoined = kept.append(&dropped, false).unwrap();
    assert!(rejoined.frame_equal(&df));
}

#[test]
fn test_filter_by_exclude_flag() {
    let mut df = two_model_frame();
    df.exclude_on_fail(&[ScenarioKey::new("M1", "S1")]).unwrap();

    let kept = df.filter(&Filter::new().with("exclude", false)).unwrap();
    assert_eq!(kept.models().unwrap(), vec!["M2"]);
    assert_eq!(kept.meta().keys().unwrap(), [ScenarioKey::new("M2", "S2")]);
    assert_eq!(
        kept.meta().get(&ScenarioKey::new("M2", "S2"), "exclude"),
        Some(MetaValue::Bool(false))
    );
}

#[test]
fn test_filter_parsed_from_arguments() {
    let df = two_model_frame();
    let filter = Filter::new()
        .parse_arg("model=M2")
        .unwrap()
        .parse_arg("year=2015..2025")
        .unwrap();
    let kept = df.filter(&filter).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept.regions().unwrap(), vec!["R1"]);
}

#[test]
fn test_filter_by_level() {
    let df = common::test_frame();
    let top = df.filter(&Filter::new().variable("Primary Energy|*").level(0)).unwrap();
    assert_eq!(top.variables().unwrap(), vec!["Primary Energy|Coal"]);
    let roots = df.filter(&Filter::new().level(0)).unwrap();
    assert_eq!(roots.variables().unwrap(), vec!["Primary Energy"]);
}

#[test]
fn test_filter_without_matches_is_empty() {
    let df = common::test_frame();
    let empty = df.filter(&Filter::new().region("Mars")).unwrap();
    assert!(empty.is_empty());
    assert!(empty.meta().is_empty());
}

#[test]
fn test_regexp_switches_off_pseudo_regexp_translation() {
    let df = df!(
        "model" => ["M", "M"],
        "scenario" => ["S", "S"],
        "region" => ["World", "World"],
        "variable" => ["AxB", "A.B"],
        "unit" => ["U", "U"],
        "year" => [2010i64, 2010],
        "value" => [1.0, 2.0]
    )
    .unwrap();
    let df = IamFrame::new(df).unwrap();

    let literal = df.filter(&Filter::new().variable("A.B")).unwrap();
    assert_eq!(literal.variables().unwrap(), vec!["A.B"]);

    let regexp = df.filter(&Filter::new().variable("A.B").regexp(true)).unwrap();
    assert_eq!(regexp.variables().unwrap(), vec!["A.B", "AxB"]);
}
