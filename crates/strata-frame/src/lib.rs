#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use strata_index::{Index, IndexError, SetCombine};
use strata_series::{Series, SeriesBuilder, SeriesError, SeriesKind};
use strata_types::{HashKey, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("column {label} has height {actual}, expected {expected}")]
    ColumnHeightMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("index has {index_len} labels but {columns} columns were provided")]
    WidthMismatch { index_len: usize, columns: usize },
    #[error("row has {actual} values, expected {expected}")]
    RowWidthMismatch { expected: usize, actual: usize },
    #[error("row position {position} out of bounds for frame of height {height}")]
    RowOutOfBounds { position: usize, height: usize },
    #[error("filter mask must be a Bool series, found {actual:?}")]
    NonBoolMask { actual: SeriesKind },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// An immutable table: a shared column [`Index`] plus one equal-length
/// [`Series`] per label.
///
/// Derivations never mutate the parent. Row-level transforms compute a
/// position selector and apply it to every column, so derived frames
/// share column storage with their source until materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    index: Arc<Index>,
    columns: Vec<Series>,
}

impl DataFrame {
    /// Build a frame, checking that column count matches the index and
    /// that every column has the same height.
    pub fn new(index: Index, columns: Vec<Series>) -> Result<Self, FrameError> {
        Self::with_index(Arc::new(index), columns)
    }

    fn with_index(index: Arc<Index>, columns: Vec<Series>) -> Result<Self, FrameError> {
        if index.len() != columns.len() {
            return Err(FrameError::WidthMismatch {
                index_len: index.len(),
                columns: columns.len(),
            });
        }
        if let Some(first) = columns.first() {
            let expected = first.len();
            for (pos, column) in columns.iter().enumerate() {
                if column.len() != expected {
                    return Err(FrameError::ColumnHeightMismatch {
                        label: index.label_at(pos)?.to_string(),
                        expected,
                        actual: column.len(),
                    });
                }
            }
        }
        Ok(Self { index, columns })
    }

    /// Convenience constructor from label/series pairs.
    pub fn of(pairs: Vec<(&str, Series)>) -> Result<Self, FrameError> {
        let labels: Vec<&str> = pairs.iter().map(|(l, _)| *l).collect();
        let columns = pairs.into_iter().map(|(_, s)| s).collect();
        Ok(Self::new(Index::of(&labels)?, columns)?)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            index: Arc::new(Index::empty()),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, Series::len)
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn shared_index(&self) -> Arc<Index> {
        Arc::clone(&self.index)
    }

    #[must_use]
    pub fn columns(&self) -> &[Series] {
        &self.columns
    }

    pub fn column(&self, label: &str) -> Result<&Series, FrameError> {
        let pos = self.index.position(label)?;
        Ok(&self.columns[pos])
    }

    pub fn column_at(&self, position: usize) -> Result<&Series, FrameError> {
        self.index.label_at(position)?;
        Ok(&self.columns[position])
    }

    pub fn row(&self, position: usize) -> Result<RowProxy<'_>, FrameError> {
        if position >= self.height() {
            return Err(FrameError::RowOutOfBounds {
                position,
                height: self.height(),
            });
        }
        Ok(RowProxy {
            frame: self,
            position,
        })
    }

    /// Apply one position selector to every column. Negative positions
    /// produce null rows; the index is shared structurally.
    pub fn select_rows(&self, positions: &[i32]) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|column| column.select(positions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: Arc::clone(&self.index),
            columns,
        })
    }

    /// Keep rows where the Bool mask is true.
    pub fn filter_by_mask(&self, mask: &Series) -> Result<Self, FrameError> {
        if mask.len() != self.height() {
            return Err(SeriesError::LengthMismatch {
                left: self.height(),
                right: mask.len(),
            }
            .into());
        }
        let dense = mask.materialize();
        if dense.kind() != SeriesKind::Bool {
            return Err(FrameError::NonBoolMask {
                actual: dense.kind(),
            });
        }
        let positions = dense.index_where(|v| matches!(v, Value::Bool(true)));
        self.select_rows(&positions)
    }

    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.height());
        let positions: Vec<i32> = (0..n as i32).collect();
        // Positions are in range, so selection cannot fail.
        self.select_rows(&positions).unwrap_or_else(|_| self.clone())
    }

    #[must_use]
    pub fn tail(&self, n: usize) -> Self {
        let height = self.height();
        let start = height.saturating_sub(n);
        let positions: Vec<i32> = (start as i32..height as i32).collect();
        self.select_rows(&positions).unwrap_or_else(|_| self.clone())
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns(&self, labels: &[&str]) -> Result<Self, FrameError> {
        let index = self.index.select_labels(labels)?;
        let columns = labels
            .iter()
            .map(|label| self.column(label).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: Arc::new(index),
            columns,
        })
    }

    pub fn drop_columns(&self, labels: &[&str]) -> Result<Self, FrameError> {
        let index = self.index.drop_labels(labels)?;
        let keep: Vec<&str> = index.labels().iter().map(String::as_str).collect();
        let columns = keep
            .iter()
            .map(|label| self.column(label).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: Arc::new(index),
            columns,
        })
    }

    /// Add a column under a fresh label. An existing label is a
    /// duplicate error; use [`DataFrame::replace_column`] to overwrite.
    pub fn add_column(&self, label: &str, series: Series) -> Result<Self, FrameError> {
        if self.index.contains(label) {
            return Err(IndexError::DuplicateLabel {
                label: label.to_string(),
            }
            .into());
        }
        self.with_column(label, series)
    }

    /// Replace an existing column, keeping its position.
    pub fn replace_column(&self, label: &str, series: Series) -> Result<Self, FrameError> {
        self.index.position(label)?;
        self.with_column(label, series)
    }

    /// Convert an existing column in place by mapping every value
    /// through `mapper`. The storage kind of the result follows the
    /// mapped values.
    pub fn convert_column<F: Fn(&Value) -> Value>(
        &self,
        label: &str,
        mapper: F,
    ) -> Result<Self, FrameError> {
        let position = self.index.position(label)?;
        self.with_column(label, self.columns[position].map(mapper))
    }

    /// Add a new column, or replace an existing one in place when the
    /// label is already present.
    pub fn with_column(&self, label: &str, series: Series) -> Result<Self, FrameError> {
        if self.width() > 0 && series.len() != self.height() {
            return Err(FrameError::ColumnHeightMismatch {
                label: label.to_string(),
                expected: self.height(),
                actual: series.len(),
            });
        }
        match self.index.position_of(label) {
            Some(pos) => {
                let mut columns = self.columns.clone();
                columns[pos] = series;
                Ok(Self {
                    index: Arc::clone(&self.index),
                    columns,
                })
            }
            None => {
                let mut labels = self.index.labels().to_vec();
                labels.push(label.to_string());
                let mut columns = self.columns.clone();
                columns.push(series);
                Ok(Self {
                    index: Arc::new(Index::new(labels)?),
                    columns,
                })
            }
        }
    }

    /// Iterate rows in position order.
    pub fn rows(&self) -> impl Iterator<Item = RowProxy<'_>> {
        (0..self.height()).map(|position| RowProxy {
            frame: self,
            position,
        })
    }

    /// Force every column into its dense backing form.
    #[must_use]
    pub fn materialize(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            columns: self.columns.iter().map(Series::materialize).collect(),
        }
    }

    /// Vertically concatenate frames under a column-label set algebra.
    ///
    /// The result is laid out as one dense value buffer per output
    /// column spanning the total height; each source frame bulk-copies
    /// its matching columns into its row-offset slice, and columns a
    /// source frame lacks stay null over that frame's row range.
    pub fn vconcat(mode: SetCombine, frames: &[&DataFrame]) -> Result<Self, FrameError> {
        let indexes: Vec<&Index> = frames.iter().map(|f| f.index()).collect();
        let combined = Index::combine(mode, &indexes);
        let total_height: usize = frames.iter().map(|f| f.height()).sum();

        let mut buffers: Vec<Vec<Value>> = combined
            .labels()
            .iter()
            .map(|_| vec![Value::Null; total_height])
            .collect();

        let mut offset = 0;
        for frame in frames {
            let height = frame.height();
            for (out_pos, label) in combined.labels().iter().enumerate() {
                if let Some(src_pos) = frame.index().position_of(label) {
                    frame.columns[src_pos].copy_to(&mut buffers[out_pos], 0, offset, height)?;
                }
            }
            offset += height;
        }

        let columns = buffers.into_iter().map(Series::of_values).collect();
        Self::with_index(Arc::new(combined), columns)
    }

    #[must_use]
    pub fn to_string_with(&self, options: &FormatOptions) -> String {
        format_frame(self, options)
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_frame(self, &FormatOptions::default()))
    }
}

/// A positional row view over a frame. Borrowed, zero-copy except for
/// the values it extracts.
#[derive(Debug, Clone, Copy)]
pub struct RowProxy<'a> {
    frame: &'a DataFrame,
    position: usize,
}

impl RowProxy<'_> {
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn get(&self, label: &str) -> Result<Value, FrameError> {
        let column = self.frame.column(label)?;
        Ok(column.value(self.position).unwrap_or(Value::Null))
    }

    pub fn get_at(&self, column_position: usize) -> Result<Value, FrameError> {
        let column = self.frame.column_at(column_position)?;
        Ok(column.value(self.position).unwrap_or(Value::Null))
    }

    pub fn get_int(&self, label: &str) -> Result<i32, FrameError> {
        Ok(self.frame.column(label)?.get_int(self.position)?)
    }

    pub fn get_long(&self, label: &str) -> Result<i64, FrameError> {
        Ok(self.frame.column(label)?.get_long(self.position)?)
    }

    pub fn get_double(&self, label: &str) -> Result<f64, FrameError> {
        Ok(self.frame.column(label)?.get_double(self.position)?)
    }

    pub fn get_bool(&self, label: &str) -> Result<bool, FrameError> {
        Ok(self.frame.column(label)?.get_bool(self.position)?)
    }
}

/// A pure row-to-key function used to build hash-join and group-by
/// partitions. Composes with [`Hasher::and`] into combination keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hasher {
    Col(String),
    ColAt(usize),
    Combination(Vec<Hasher>),
}

impl Hasher {
    #[must_use]
    pub fn col(label: &str) -> Self {
        Self::Col(label.to_string())
    }

    #[must_use]
    pub fn col_at(position: usize) -> Self {
        Self::ColAt(position)
    }

    /// Chain another hasher, flattening nested combinations so the key
    /// shape stays one flat tuple.
    #[must_use]
    pub fn and(self, other: Hasher) -> Self {
        let mut parts = match self {
            Self::Combination(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::Combination(others) => parts.extend(others),
            single => parts.push(single),
        }
        Self::Combination(parts)
    }

    /// Compute the key for one row position of a frame.
    pub fn key_at(&self, frame: &DataFrame, position: usize) -> Result<HashKey, FrameError> {
        match self {
            Self::Col(label) => {
                let column = frame.column(label)?;
                Ok(HashKey::of(&column.value(position).unwrap_or(Value::Null)))
            }
            Self::ColAt(col_pos) => {
                let column = frame.column_at(*col_pos)?;
                Ok(HashKey::of(&column.value(position).unwrap_or(Value::Null)))
            }
            Self::Combination(parts) => {
                let keys = parts
                    .iter()
                    .map(|part| part.key_at(frame, position))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HashKey::combine(keys))
            }
        }
    }

    pub fn of(&self, row: &RowProxy<'_>) -> Result<HashKey, FrameError> {
        self.key_at(row.frame, row.position)
    }
}

// ── Row-by-row accumulation ────────────────────────────────────────────

/// Mutable row-appending buffer that freezes into a [`DataFrame`].
///
/// One [`SeriesBuilder`] per column; `build` consumes the appender so a
/// frozen buffer cannot be appended to.
#[derive(Debug)]
pub struct DataFrameAppender {
    index: Index,
    builders: Vec<SeriesBuilder>,
}

impl DataFrameAppender {
    #[must_use]
    pub fn new(index: Index) -> Self {
        let builders = (0..index.len()).map(|_| SeriesBuilder::new()).collect();
        Self { index, builders }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.builders.first().map_or(0, SeriesBuilder::len)
    }

    pub fn append_row(&mut self, values: &[Value]) -> Result<(), FrameError> {
        if values.len() != self.builders.len() {
            return Err(FrameError::RowWidthMismatch {
                expected: self.builders.len(),
                actual: values.len(),
            });
        }
        for (builder, value) in self.builders.iter_mut().zip(values.iter()) {
            builder.push_value(value.clone());
        }
        Ok(())
    }

    /// Freeze the buffers into an immutable frame, consuming the
    /// appender.
    pub fn build(self) -> Result<DataFrame, FrameError> {
        let columns = self
            .builders
            .into_iter()
            .map(SeriesBuilder::build)
            .collect();
        DataFrame::new(self.index, columns)
    }
}

// ── Formatting ─────────────────────────────────────────────────────────

/// Explicit display configuration, passed per call rather than held in
/// shared process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub max_rows: usize,
    pub max_col_width: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_rows: 20,
            max_col_width: 30,
        }
    }
}

fn format_frame(frame: &DataFrame, options: &FormatOptions) -> String {
    let shown = frame.height().min(options.max_rows);
    let width = frame.width();

    let mut cells: Vec<Vec<String>> = Vec::with_capacity(shown + 1);
    cells.push(
        frame
            .index()
            .labels()
            .iter()
            .map(|l| clip(l, options.max_col_width))
            .collect(),
    );
    for row in 0..shown {
        cells.push(
            (0..width)
                .map(|col| {
                    let value = frame.columns[col].value(row).unwrap_or(Value::Null);
                    clip(&value.to_string(), options.max_col_width)
                })
                .collect(),
        );
    }

    let mut col_widths = vec![0_usize; width];
    for row in &cells {
        for (col, cell) in row.iter().enumerate() {
            col_widths[col] = col_widths[col].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for (line, row) in cells.iter().enumerate() {
        let rendered: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col, cell)| format!("{cell:<width$}", width = col_widths[col]))
            .collect();
        out.push_str(rendered.join("  ").trim_end());
        out.push('\n');
        if line == 0 {
            let rule: Vec<String> = col_widths.iter().map(|w| "-".repeat(*w)).collect();
            out.push_str(&rule.join("  "));
            out.push('\n');
        }
    }
    if frame.height() > shown {
        out.push_str(&format!("... {} more rows\n", frame.height() - shown));
    }
    out.push_str(&format!(
        "[{} rows x {} columns]",
        frame.height(),
        frame.width()
    ));
    out
}

fn clip(text: &str, max_width: usize) -> String {
    if max_width == 0 || text.chars().count() <= max_width {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_width.saturating_sub(2)).collect();
    format!("{kept}..")
}
