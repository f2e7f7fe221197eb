//! Reading IAMC tables from CSV and Excel files, and writing the wide timeseries back as CSV.

use crate::data::parse_datetime_str;
use crate::error::{Error, Result};
use crate::frame::IamFrame;
use calamine::{open_workbook_auto, Data, DataType as _, Range, Reader};
use chrono::NaiveDateTime;
use iamframe_cli::FileFormat;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Overrides detection by extension.
    pub format: Option<FileFormat>,
    pub delimiter: u8,
    pub data_sheet: String,
    /// Sheet merged into the metadata when present in the workbook.
    pub meta_sheet: Option<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: None,
            delimiter: b',',
            data_sheet: "data".to_string(),
            meta_sheet: Some("meta".to_string()),
        }
    }
}

impl ReadOptions {
    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_data_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.data_sheet = sheet.into();
        self
    }

    pub fn with_meta_sheet(mut self, sheet: Option<String>) -> Self {
        self.meta_sheet = sheet;
        self
    }

    fn format_for(&self, path: &Path) -> Result<FileFormat> {
        self.format
            .or_else(|| FileFormat::from_path(path))
            .ok_or_else(|| {
                Error::invalid(format!(
                    "cannot detect the file format of `{}`, pass a format explicitly",
                    path.display()
                ))
            })
    }
}

/// Read an IAMC table (long or wide layout) from `path`.
pub fn read_file(path: impl AsRef<Path>, options: &ReadOptions) -> Result<IamFrame> {
    let path = path.as_ref();
    info!("reading `{}`", path.display());
    match options.format_for(path)? {
        FileFormat::Csv => IamFrame::new(read_csv(path, options.delimiter)?),
        FileFormat::Excel => {
            let mut workbook = open_workbook_auto(path)?;
            let data = workbook.worksheet_range(&options.data_sheet)?;
            let mut frame = IamFrame::new(range_to_dataframe(&data)?)?;
            let meta_sheet = options
                .meta_sheet
                .as_ref()
                .filter(|sheet| workbook.sheet_names().contains(*sheet));
            if let Some(sheet) = meta_sheet {
                let meta = workbook.worksheet_range(sheet)?;
                frame.load_meta_frame(range_to_dataframe(&meta)?)?;
            }
            Ok(frame)
        }
    }
}

/// Write the wide timeseries of `frame` with title-cased headers.
pub fn write_csv(frame: &IamFrame, path: impl AsRef<Path>, iamc_index: bool) -> Result<()> {
    let mut df = frame.timeseries(iamc_index)?;
    for name in crate::data::column_names(&df) {
        let title = title_case(&name);
        if title != name {
            df.rename(&name, title.into())?;
        }
    }
    let mut file = File::create(path.as_ref())?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    info!("wrote {} timeseries to `{}`", df.height(), path.as_ref().display());
    Ok(())
}

impl IamFrame {
    /// Merge a metadata table from a CSV file or the meta sheet of a workbook.
    pub fn load_meta(&mut self, path: impl AsRef<Path>, options: &ReadOptions) -> Result<()> {
        let path = path.as_ref();
        let df = match options.format_for(path)? {
            FileFormat::Csv => read_csv(path, options.delimiter)?,
            FileFormat::Excel => {
                let sheet = options.meta_sheet.as_deref().unwrap_or("meta");
                let mut workbook = open_workbook_auto(path)?;
                range_to_dataframe(&workbook.worksheet_range(sheet)?)?
            }
        };
        self.load_meta_frame(df)
    }
}

fn read_csv(path: &Path, delimiter: u8) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|opts| opts.with_separator(delimiter))
        .try_into_reader_with_file_path(Some(path.into()))?
        .finish()?;
    Ok(df)
}

/// Python-style title case: a letter is upper-cased when it does not follow another letter.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut after_letter = false;
    for c in s.chars() {
        if after_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        after_letter = c.is_alphabetic();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Int64,
    Float64,
    Boolean,
    Datetime,
    Utf8,
}

/// First row is the header; empty header cells become `column_N`.
fn range_to_dataframe(range: &Range<Data>) -> Result<DataFrame> {
    let rows: Vec<&[Data]> = range.rows().collect();
    let Some((header, body)) = rows.split_first() else {
        return Ok(DataFrame::empty());
    };
    let mut columns = Vec::with_capacity(header.len());
    for (idx, cell) in header.iter().enumerate() {
        let name = cell
            .as_string()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("column_{}", idx + 1));
        let cells: Vec<Option<&Data>> = body
            .iter()
            .map(|row| row.get(idx).filter(|c| !c.is_empty()))
            .collect();
        columns.push(cells_to_column(&name, &cells, infer_kind(&cells))?);
    }
    Ok(DataFrame::new(columns)?)
}

/// Whole-number floats become Int64; strings that all parse as timestamps become Datetime.
fn infer_kind(cells: &[Option<&Data>]) -> CellKind {
    let present: Vec<&Data> = cells.iter().flatten().copied().collect();
    if present.is_empty() {
        return CellKind::Utf8;
    }
    if present.iter().any(|c| c.is_string()) {
        return if present.iter().all(|c| cell_datetime(c).is_some()) {
            CellKind::Datetime
        } else {
            CellKind::Utf8
        };
    }
    if present.iter().any(|c| c.is_datetime() || c.is_datetime_iso()) {
        return CellKind::Datetime;
    }
    if present.iter().all(|c| c.is_bool()) {
        return CellKind::Boolean;
    }
    let whole = present.iter().all(|c| {
        c.is_int()
            || c.as_f64()
                .is_some_and(|f| f.is_finite() && (f - f.trunc()).abs() < 1e-10)
    });
    if whole {
        CellKind::Int64
    } else {
        CellKind::Float64
    }
}

fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    if let Some(dt) = cell.as_datetime() {
        return Some(dt);
    }
    let s = cell.get_datetime_iso().or_else(|| cell.get_string())?;
    parse_datetime_str(s)
}

fn cells_to_column(name: &str, cells: &[Option<&Data>], kind: CellKind) -> Result<Column> {
    let column = match kind {
        CellKind::Int64 => {
            let v: Vec<Option<i64>> = cells.iter().map(|c| c.and_then(|c| c.as_i64())).collect();
            Column::new(name.into(), v)
        }
        CellKind::Float64 => {
            let v: Vec<Option<f64>> = cells.iter().map(|c| c.and_then(|c| c.as_f64())).collect();
            Column::new(name.into(), v)
        }
        CellKind::Boolean => {
            let v: Vec<Option<bool>> = cells.iter().map(|c| c.and_then(|c| c.get_bool())).collect();
            Column::new(name.into(), v)
        }
        CellKind::Utf8 => {
            let v: Vec<Option<String>> =
                cells.iter().map(|c| c.and_then(|c| c.as_string())).collect();
            Column::new(name.into(), v)
        }
        CellKind::Datetime => {
            let v: Vec<Option<NaiveDateTime>> =
                cells.iter().map(|c| c.and_then(cell_datetime)).collect();
            crate::data::datetime_column(name, &v)?
        }
    };
    Ok(column)
}
