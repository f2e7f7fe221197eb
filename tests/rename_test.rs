mod common;

use iamframe::{concat, Error, IamFrame, MetaValue, Rename, RenameOptions, ScenarioKey};
use polars::prelude::*;

#[test]
fn test_rename_round_trip() {
    let df = common::test_frame();
    let there = df
        .rename(&Rename::new().region("World", "Earth"), RenameOptions::default())
        .unwrap();
    assert_eq!(there.regions().unwrap(), vec!["Earth"]);

    let back = there
        .rename(&Rename::new().region("Earth", "World"), RenameOptions::default())
        .unwrap();
    assert!(back.frame_equal(&df));
}

#[test]
fn test_rename_scenario_round_trip_keeps_meta() {
    let mut df = common::test_frame();
    df.set_meta("category", "baseline").unwrap();
    let renamed = df
        .rename(&Rename::new().scenario("scen_a", "scen_c"), RenameOptions::default())
        .unwrap();
    assert_eq!(
        renamed.meta().get(&ScenarioKey::new("model_a", "scen_c"), "category"),
        Some(MetaValue::Str("baseline".into()))
    );
    let back = renamed
        .rename(&Rename::new().scenario("scen_c", "scen_a"), RenameOptions::default())
        .unwrap();
    assert!(back.frame_equal(&df));
}

#[test]
fn test_rename_into_existing_variable_is_rejected() {
    let df = common::test_frame();
    let err = df
        .rename(
            &Rename::new().variable("Primary Energy|Coal", "Primary Energy"),
            RenameOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateRow { rows } if rows.len() == 2));
}

fn meta_frame(scenario: &str, value: f64, category: &str) -> IamFrame {
    let df = df!(
        "model" => ["M"],
        "scenario" => [scenario],
        "region" => ["World"],
        "variable" => ["A"],
        "unit" => ["U"],
        "year" => [2010i64],
        "value" => [value]
    )
    .unwrap();
    let mut df = IamFrame::new(df).unwrap();
    df.set_meta("category", category).unwrap();
    df
}

#[test]
fn test_append_with_identical_meta() {
    let left = meta_frame("S", 1.0, "low");
    let mut right = meta_frame("S", 2.0, "low");
    right = right
        .rename(&Rename::new().variable("A", "B"), RenameOptions::default())
        .unwrap();

    let combined = left.append(&right, false).unwrap();
    assert_eq!(combined.len(), 2);
    assert_eq!(combined.meta().len(), 1);
}

#[test]
fn test_append_with_conflicting_meta() {
    let left = meta_frame("S", 1.0, "low");
    let right = meta_frame("S", 2.0, "high")
        .rename(&Rename::new().variable("A", "B"), RenameOptions::default())
        .unwrap();

    let err = left.append(&right, false).unwrap_err();
    assert!(matches!(err, Error::MetaConflict { keys } if keys == vec![ScenarioKey::new("M", "S")]));

    let combined = left.append(&right, true).unwrap();
    assert_eq!(
        combined.meta().get(&ScenarioKey::new("M", "S"), "category"),
        Some(MetaValue::Str("low".into()))
    );
}

#[test]
fn test_append_duplicate_rows_is_rejected() {
    let left = meta_frame("S", 1.0, "low");
    let right = meta_frame("S", 2.0, "low");
    let err = left.append(&right, false).unwrap_err();
    assert!(matches!(err, Error::DuplicateRow { .. }));
}

#[test]
fn test_concat_many() {
    let frames = [
        meta_frame("S1", 1.0, "low"),
        meta_frame("S2", 2.0, "mid"),
        meta_frame("S3", 3.0, "high"),
    ];
    let combined = concat(&frames).unwrap();
    assert_eq!(combined.scenarios().unwrap(), vec!["S1", "S2", "S3"]);
    assert_eq!(combined.meta().len(), 3);
}
