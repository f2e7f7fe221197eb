mod common;

use chrono::NaiveDate;
use iamframe::{compare, Bounds, Filter, IamFrame, ScenarioKey, TimeDomain, TimeValue, Tolerance};
use polars::prelude::*;

fn datetime_frame() -> IamFrame {
    let df = df!(
        "model" => ["M"; 3],
        "scenario" => ["S"; 3],
        "region" => ["World"; 3],
        "variable" => ["Load"; 3],
        "unit" => ["GW"; 3],
        "time" => ["2010-01-01 00:00:00", "2010-07-01 12:00:00", "2020-01-01 00:00:00"],
        "value" => [1.0, 2.0, 3.0]
    )
    .unwrap();
    IamFrame::new(df).unwrap()
}

#[test]
fn test_datetime_filters() {
    let df = datetime_frame();
    assert_eq!(df.time_domain(), TimeDomain::Datetime);

    let july = df.filter(&Filter::new().month(7)).unwrap();
    assert_eq!(july.len(), 1);

    let start = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let decade = df.filter(&Filter::new().time(start..end)).unwrap();
    assert_eq!(decade.len(), 2);

    let by_year = df.filter(&Filter::new().year(2020)).unwrap();
    assert_eq!(by_year.len(), 1);
}

#[test]
fn test_swap_time_for_year_detects_collisions() {
    let df = datetime_frame();
    assert!(df.swap_time_for_year().is_err());

    let unique = df.filter(&Filter::new().hour(0)).unwrap();
    let swapped = unique.swap_time_for_year().unwrap();
    assert_eq!(swapped.time_domain(), TimeDomain::Year);
    assert_eq!(swapped.len(), 2);
}

#[test]
fn test_timeseries_of_datetime_frame() {
    let wide = datetime_frame().timeseries(false).unwrap();
    assert_eq!(wide.height(), 1);
    assert!(wide.get_column_index("2010-07-01 12:00:00").is_some());
}

#[test]
fn test_normalize_by_base_year() {
    let df = common::test_frame();
    let normalized = df.normalize(TimeValue::Year(2005)).unwrap();
    let at_2010 = normalized.filter(&Filter::new().year(2010)).unwrap();
    let values: Vec<Option<f64>> = at_2010
        .data()
        .df()
        .column("value")
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(values, vec![Some(6.0), Some(6.0), Some(3.5)]);
}

#[test]
fn test_compare_reports_differences_and_missing_rows() {
    let left = common::test_frame();
    let mut right_df = common::wide_df();
    right_df
        .with_column(Column::new("2010".into(), vec![6.0, 3.1, 7.0]))
        .unwrap();
    let right = IamFrame::new(right_df)
        .unwrap()
        .filter(&Filter::new().scenario("scen_a"))
        .unwrap();

    let diff = compare(&left, &right, Tolerance::default()).unwrap();
    // Coal at 2010 differs, scen_b is missing on the right
    assert_eq!(diff.height(), 3);
    assert!(!left.equals(&right).unwrap());
    assert!(left.equals(&left.clone()).unwrap());
}

#[test]
fn test_validation_marks_scenarios() {
    let mut df = common::test_frame();
    let report = df
        .validate(&[("Primary Energy", Bounds::new().up(6.5).year(2010))], true)
        .unwrap()
        .unwrap();
    assert_eq!(report.height(), 1);
    assert!(df.meta().is_excluded(&ScenarioKey::new("model_a", "scen_b")));

    let missing = df
        .require_variable("Primary Energy|Coal", None, None, false)
        .unwrap()
        .unwrap();
    assert_eq!(missing, vec![ScenarioKey::new("model_a", "scen_b")]);

    let kept = df.filter(&Filter::new().with("exclude", false)).unwrap();
    assert_eq!(kept.scenarios().unwrap(), vec!["scen_a"]);
}

#[test]
fn test_meta_from_data_and_join() {
    let mut df = common::test_frame();
    df.set_meta_from_data(
        "pe_2010",
        &Filter::new().variable("Primary Energy").year(2010),
        None,
    )
    .unwrap();
    let long = df.as_long_with_meta(&["pe_2010"]).unwrap();
    assert_eq!(long.height(), df.len());
    let first = long.column("pe_2010").unwrap().f64().unwrap().get(0);
    assert_eq!(first, Some(6.0));
}
