use iamframe::IamFrame;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Two scenarios of one model in wide layout, `Primary Energy` with a `Coal` component.
pub fn wide_df() -> DataFrame {
    df!(
        "Model" => ["model_a", "model_a", "model_a"],
        "Scenario" => ["scen_a", "scen_a", "scen_b"],
        "Region" => ["World", "World", "World"],
        "Variable" => ["Primary Energy", "Primary Energy|Coal", "Primary Energy"],
        "Unit" => ["EJ/yr", "EJ/yr", "EJ/yr"],
        "2005" => [1.0, 0.5, 2.0],
        "2010" => [6.0, 3.0, 7.0]
    )
    .unwrap()
}

pub fn test_frame() -> IamFrame {
    IamFrame::new(wide_df()).unwrap()
}

/// `A = A|x + A|y` at World, and `A` reported for two subregions summing to World.
pub fn hierarchy_frame() -> IamFrame {
    let df = df!(
        "model" => ["M"; 5],
        "scenario" => ["S"; 5],
        "region" => ["World", "World", "World", "R1", "R2"],
        "variable" => ["A", "A|x", "A|y", "A", "A"],
        "unit" => ["U"; 5],
        "year" => [2010i64; 5],
        "value" => [5.0, 2.0, 3.0, 1.0, 4.0]
    )
    .unwrap();
    IamFrame::new(df).unwrap()
}

pub fn write_csv_fixture(dir: &Path, name: &str, df: &mut DataFrame) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();
    path
}
