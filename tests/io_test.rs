mod common;

use iamframe::{read_file, write_csv, Error, MetaValue, ReadOptions, ScenarioKey, TimeDomain};
use polars::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_read_wide_csv() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = common::write_csv_fixture(dir.path(), "wide.csv", &mut common::wide_df());

    let df = read_file(&path, &ReadOptions::default()).unwrap();
    assert_eq!(df.time_domain(), TimeDomain::Year);
    assert_eq!(df.len(), 6);
    assert!(df.frame_equal(&common::test_frame()));
}

#[test]
fn test_write_then_read_csv() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("out.csv");
    let df = common::test_frame();

    write_csv(&df, &path, false).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    let header = content.lines().next().unwrap();
    assert_eq!(header, "Model,Scenario,Region,Variable,Unit,2005,2010");

    let back = read_file(&path, &ReadOptions::default()).unwrap();
    assert!(back.frame_equal(&df));
}

#[test]
fn test_read_semicolon_delimited_long_csv() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("long.csv");
    fs::write(
        &path,
        "model;scenario;region;variable;unit;year;value\n\
         M;S;World;A;U;2010;1.5\n\
         M;S;World;A;U;2020;2.5\n",
    )
    .unwrap();

    let options = ReadOptions::default().with_delimiter(b';');
    let df = read_file(&path, &options).unwrap();
    assert_eq!(df.len(), 2);
    assert_eq!(df.scenarios().unwrap(), vec!["S"]);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("data.json");
    fs::write(&path, "{}").unwrap();
    let err = read_file(&path, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_load_meta_from_csv() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut meta = df!(
        "Model" => ["model_a", "model_a", "model_z"],
        "Scenario" => ["scen_a", "scen_b", "scen_z"],
        "Exclude" => [true, false, false],
        "category" => ["low", "high", "none"]
    )
    .unwrap();
    let path = common::write_csv_fixture(dir.path(), "meta.csv", &mut meta);

    let mut df = common::test_frame();
    df.load_meta(&path, &ReadOptions::default()).unwrap();

    assert!(df.meta().is_excluded(&ScenarioKey::new("model_a", "scen_a")));
    assert!(!df.meta().is_excluded(&ScenarioKey::new("model_a", "scen_b")));
    assert_eq!(
        df.meta().get(&ScenarioKey::new("model_a", "scen_b"), "category"),
        Some(MetaValue::Str("high".into()))
    );
    assert!(!df.meta().contains(&ScenarioKey::new("model_z", "scen_z")));
}

#[test]
fn test_load_meta_without_known_scenarios_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut meta = df!(
        "model" => ["other"],
        "scenario" => ["other"],
        "exclude" => [false]
    )
    .unwrap();
    let path = common::write_csv_fixture(dir.path(), "meta.csv", &mut meta);

    let mut df = common::test_frame();
    assert!(df.load_meta(&path, &ReadOptions::default()).is_err());
}
