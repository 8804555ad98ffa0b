//! Tabular product dataset: CSV load, in-place mutation and full snapshots.
//!
//! Columns other than the four the job cares about are carried through
//! untouched so snapshots mirror the input schema.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const SKU_COLUMN: &str = "sku";
pub const NAME_COLUMN: &str = "name";
pub const PARENT_SKU_COLUMN: &str = "parent_sku";
pub const BASE_IMAGE_COLUMN: &str = "base_image";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("required column `{0}` missing from header")]
    MissingColumn(&'static str),
}

/// One row of the input dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub sku: String,
    pub name: String,
    /// Present iff this row is a variant that inherits its parent's image.
    pub parent_sku: Option<String>,
    pub base_image: String,
    passthrough: Vec<String>,
}

impl ProductRecord {
    pub fn new(sku: &str, name: &str, parent_sku: Option<&str>) -> Self {
        Self {
            sku: sku.to_string(),
            name: name.to_string(),
            parent_sku: normalize_parent(parent_sku.unwrap_or("")),
            base_image: String::new(),
            passthrough: Vec::new(),
        }
    }
}

fn normalize_parent(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Sku,
    Name,
    ParentSku,
    BaseImage,
    Other(usize),
}

/// The ordered collection of records plus the column layout it was read with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    layout: Vec<Column>,
    records: Vec<ProductRecord>,
}

impl Dataset {
    /// Build a dataset with the minimal four-column schema.
    pub fn from_records(records: Vec<ProductRecord>) -> Self {
        Self {
            headers: vec![
                SKU_COLUMN.to_string(),
                NAME_COLUMN.to_string(),
                PARENT_SKU_COLUMN.to_string(),
                BASE_IMAGE_COLUMN.to_string(),
            ],
            layout: vec![Column::Sku, Column::Name, Column::ParentSku, Column::BaseImage],
            records,
        }
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ds = Self::from_reader(file)?;
        debug!(path = %path.display(), rows = ds.len(), "dataset loaded");
        Ok(ds)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::None)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let position = |name: &'static str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or(DatasetError::MissingColumn(name))
        };
        let idx_sku = position(SKU_COLUMN)?;
        let idx_name = position(NAME_COLUMN)?;
        let idx_parent = position(PARENT_SKU_COLUMN)?;
        let idx_image = position(BASE_IMAGE_COLUMN)?;

        let mut layout = Vec::with_capacity(headers.len());
        let mut other = 0usize;
        for i in 0..headers.len() {
            let col = if i == idx_sku {
                Column::Sku
            } else if i == idx_name {
                Column::Name
            } else if i == idx_parent {
                Column::ParentSku
            } else if i == idx_image {
                Column::BaseImage
            } else {
                other += 1;
                Column::Other(other - 1)
            };
            layout.push(col);
        }

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let mut rec = ProductRecord {
                sku: String::new(),
                name: String::new(),
                parent_sku: None,
                base_image: String::new(),
                passthrough: Vec::with_capacity(other),
            };
            for (cell, col) in row.iter().zip(&layout) {
                match col {
                    Column::Sku => rec.sku = cell.trim().to_string(),
                    Column::Name => rec.name = cell.to_string(),
                    Column::ParentSku => rec.parent_sku = normalize_parent(cell),
                    Column::BaseImage => rec.base_image = cell.to_string(),
                    Column::Other(_) => rec.passthrough.push(cell.to_string()),
                }
            }
            records.push(rec);
        }

        Ok(Self {
            headers,
            layout,
            records,
        })
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        let mut row: Vec<&str> = Vec::with_capacity(self.layout.len());
        for rec in &self.records {
            row.clear();
            for col in &self.layout {
                let cell = match col {
                    Column::Sku => rec.sku.as_str(),
                    Column::Name => rec.name.as_str(),
                    Column::ParentSku => rec.parent_sku.as_deref().unwrap_or(""),
                    Column::BaseImage => rec.base_image.as_str(),
                    Column::Other(i) => rec.passthrough.get(*i).map(String::as_str).unwrap_or(""),
                };
                row.push(cell);
            }
            wtr.write_record(&row)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// Full overwrite of `path`. Written to a sibling temp file first and renamed,
    /// so an interrupted write never leaves a truncated snapshot behind.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), DatasetError> {
        let io_err = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        {
            let file = File::create(&tmp).map_err(io_err)?;
            self.write_to(file)?;
        }
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&ProductRecord> {
        self.records.get(index)
    }

    pub fn set_base_image(&mut self, index: usize, path: &str) {
        if let Some(rec) = self.records.get_mut(index) {
            rec.base_image = path.to_string();
        }
    }

    /// Set `base_image` on every row whose parent is `parent_sku`, wherever it sits.
    /// Returns the number of rows touched.
    pub fn propagate_to_children(&mut self, parent_sku: &str, path: &str) -> usize {
        let mut n = 0;
        for rec in self
            .records
            .iter_mut()
            .filter(|r| r.parent_sku.as_deref() == Some(parent_sku))
        {
            rec.base_image = path.to_string();
            n += 1;
        }
        n
    }

    /// Fill empty `base_image` cells of rows selected by `covered` with the value
    /// `previous` holds for the same SKU. Returns the number of rows filled.
    pub fn restore_images<F>(&mut self, previous: &Dataset, covered: F) -> usize
    where
        F: Fn(usize, &str) -> bool,
    {
        let known: HashMap<&str, &str> = previous
            .records
            .iter()
            .filter(|r| !r.base_image.is_empty())
            .map(|r| (r.sku.as_str(), r.base_image.as_str()))
            .collect();
        let mut n = 0;
        for (i, rec) in self.records.iter_mut().enumerate() {
            if !rec.base_image.is_empty() || !covered(i, &rec.sku) {
                continue;
            }
            if let Some(path) = known.get(rec.sku.as_str()) {
                rec.base_image = path.to_string();
                n += 1;
            }
        }
        n
    }

    /// True when SKUs are in non-decreasing lexicographic order.
    pub fn is_sorted_by_sku(&self) -> bool {
        self.records.windows(2).all(|w| w[0].sku <= w[1].sku)
    }

    pub fn last_position_of(&self, sku: &str) -> Option<usize> {
        self.records.iter().rposition(|r| r.sku == sku)
    }
}

/// Destination for full-dataset snapshots.
pub trait SnapshotSink {
    /// Periodic snapshot; each call overwrites the previous one.
    fn write_checkpoint(&mut self, dataset: &Dataset) -> Result<(), DatasetError>;
    /// Written once after the last record.
    fn write_final(&mut self, dataset: &Dataset) -> Result<(), DatasetError>;
}

/// CSV files on disk.
#[derive(Debug, Clone)]
pub struct CsvSnapshots {
    pub checkpoint_path: PathBuf,
    pub final_path: PathBuf,
}

impl CsvSnapshots {
    pub fn new(checkpoint_path: impl Into<PathBuf>, final_path: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            final_path: final_path.into(),
        }
    }
}

impl SnapshotSink for CsvSnapshots {
    fn write_checkpoint(&mut self, dataset: &Dataset) -> Result<(), DatasetError> {
        dataset.write_snapshot(&self.checkpoint_path)
    }

    fn write_final(&mut self, dataset: &Dataset) -> Result<(), DatasetError> {
        dataset.write_snapshot(&self.final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INPUT: &str = "\
sku,brand,name,parent_sku,base_image,price
A1,Ray,Foo Bar,,,10
A2,Ray,Foo Bar 52,A1,,11
B1,Oak,Baz/Qux,,placeholder,12
";

    #[test]
    fn load_maps_core_columns_and_keeps_others() {
        let ds = Dataset::from_reader(INPUT.as_bytes()).unwrap();
        assert_eq!(ds.len(), 3);
        let a2 = ds.get(1).unwrap();
        assert_eq!(a2.sku, "A2");
        assert_eq!(a2.name, "Foo Bar 52");
        assert_eq!(a2.parent_sku.as_deref(), Some("A1"));
        assert_eq!(ds.get(0).unwrap().parent_sku, None);
        assert_eq!(ds.get(2).unwrap().base_image, "placeholder");
    }

    #[test]
    fn write_preserves_column_order_and_passthrough() {
        let mut ds = Dataset::from_reader(INPUT.as_bytes()).unwrap();
        ds.set_base_image(0, "/img/A1.png");
        let mut out = Vec::new();
        ds.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "\
sku,brand,name,parent_sku,base_image,price
A1,Ray,Foo Bar,,/img/A1.png,10
A2,Ray,Foo Bar 52,A1,,11
B1,Oak,Baz/Qux,,placeholder,12
"
        );
    }

    #[test]
    fn missing_column_is_reported() {
        let err = Dataset::from_reader("sku,name,base_image\nA1,x,\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn("parent_sku")));
    }

    #[test]
    fn propagate_touches_rows_before_and_after_parent() {
        let mut ds = Dataset::from_records(vec![
            ProductRecord::new("A0", "child early", Some("A1")),
            ProductRecord::new("A1", "parent", None),
            ProductRecord::new("A2", "child late", Some("A1")),
            ProductRecord::new("B1", "other", Some("B0")),
        ]);
        assert_eq!(ds.propagate_to_children("A1", "/img/A1.png"), 2);
        assert_eq!(ds.get(0).unwrap().base_image, "/img/A1.png");
        assert_eq!(ds.get(1).unwrap().base_image, "");
        assert_eq!(ds.get(2).unwrap().base_image, "/img/A1.png");
        assert_eq!(ds.get(3).unwrap().base_image, "");
    }

    #[test]
    fn restore_fills_only_empty_covered_rows() {
        let mut previous = Dataset::from_reader(INPUT.as_bytes()).unwrap();
        previous.set_base_image(0, "/img/A1.png");
        previous.set_base_image(1, "/img/A1.png");

        let mut ds = Dataset::from_reader(INPUT.as_bytes()).unwrap();
        let filled = ds.restore_images(&previous, |i, _| i < 1);
        assert_eq!(filled, 1);
        assert_eq!(ds.get(0).unwrap().base_image, "/img/A1.png");
        // not covered
        assert_eq!(ds.get(1).unwrap().base_image, "");
        // already set in the input
        assert_eq!(ds.restore_images(&previous, |_, sku| sku == "B1"), 0);
        assert_eq!(ds.get(2).unwrap().base_image, "placeholder");
    }

    #[test]
    fn sortedness_and_positions() {
        let sorted = Dataset::from_records(vec![
            ProductRecord::new("A1", "a", None),
            ProductRecord::new("A1", "a dup", None),
            ProductRecord::new("B2", "b", None),
        ]);
        assert!(sorted.is_sorted_by_sku());
        assert_eq!(sorted.last_position_of("A1"), Some(1));
        assert_eq!(sorted.last_position_of("Z9"), None);

        let unsorted = Dataset::from_records(vec![
            ProductRecord::new("B2", "b", None),
            ProductRecord::new("A1", "a", None),
        ]);
        assert!(!unsorted.is_sorted_by_sku());
    }

    #[test]
    fn snapshot_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("snap.csv");
        let mut ds = Dataset::from_reader(INPUT.as_bytes()).unwrap();
        ds.write_snapshot(&path).unwrap();
        ds.set_base_image(1, "/img/A1.png");
        ds.write_snapshot(&path).unwrap();

        let reread = Dataset::load(&path).unwrap();
        assert_eq!(reread, ds);
        assert!(!dir.path().join("out").join("snap.csv.tmp").exists());
    }
}
