//! Readers for flat CSV image files.
//!
//! Each row holds one image flattened in `(C, H, W)` order, optionally
//! preceded by an integer class label (the Kaggle MNIST layout:
//! `label,pixel0,...,pixel783`). Raw pixels are divided by 255.

use std::io::Cursor;
use std::path::Path;

use ndarray::Array4;
use polars::prelude::*;

use camlab_core::ImageShape;

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};

/// Shape of an MNIST digit.
pub const MNIST_SHAPE: ImageShape = ImageShape::new(1, 28, 28);

const PIXEL_SCALE: f32 = 255.0;

/// Read an MNIST-style CSV file (with a header row) into 1×28×28 images.
///
/// Files with 785 columns are labeled (label first); files with 784
/// columns are unlabeled.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a cell is malformed.
pub fn read_mnist_csv(path: impl AsRef<Path>) -> Result<ImageDataset> {
    read_image_csv(path, MNIST_SHAPE, true)
}

/// Read a flat CSV image file with records of the given shape.
///
/// # Arguments
///
/// * `path` - Path to the CSV file
/// * `shape` - Shape of one record
/// * `has_header` - Whether the first row holds column names
///
/// # Errors
///
/// Returns an error if the file cannot be read or a cell is malformed.
pub fn read_image_csv(
    path: impl AsRef<Path>,
    shape: ImageShape,
    has_header: bool,
) -> Result<ImageDataset> {
    let path = path.as_ref();
    let df = csv_options(has_header)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| DataError::Csv(format!("Failed to create CSV reader: {}", e)))?
        .finish()
        .map_err(|e| DataError::Csv(format!("Failed to read CSV: {}", e)))?;

    let dataset = frame_to_dataset(&df, shape, has_header)?;
    tracing::debug!(
        path = %path.display(),
        n_samples = dataset.len(),
        labeled = dataset.has_targets(),
        "Loaded image CSV"
    );
    Ok(dataset)
}

/// Parse flat CSV image rows held in memory.
///
/// The label column is detected from the column count: `numel + 1`
/// columns means labeled, `numel` means unlabeled.
///
/// # Errors
///
/// Returns [`DataError::Format`] for a wrong column count or a cell that is
/// empty or not numeric, [`DataError::Csv`] if the text is not valid CSV,
/// and [`DataError::EmptyDataset`] if there are no data rows.
pub fn parse_image_csv(data: &[u8], shape: ImageShape, has_header: bool) -> Result<ImageDataset> {
    let df = csv_options(has_header)
        .into_reader_with_file_handle(Cursor::new(data))
        .finish()
        .map_err(|e| DataError::Csv(format!("Failed to read CSV: {}", e)))?;
    frame_to_dataset(&df, shape, has_header)
}

fn csv_options(has_header: bool) -> CsvReadOptions {
    // Scan every row before fixing column types so a late float or text
    // cell is seen instead of failing the parse.
    CsvReadOptions::default()
        .with_has_header(has_header)
        .with_infer_schema_length(None)
}

/// Cast one column to `f64`, rejecting empty and non-numeric cells.
fn numeric_column(column: &Series, first_line: usize) -> Result<Vec<f64>> {
    let values = column
        .cast(&DataType::Float64)
        .map_err(|e| DataError::Csv(format!("Failed to cast column '{}': {}", column.name(), e)))?;
    let values = values
        .f64()
        .map_err(|e| DataError::Csv(format!("Failed to get f64 values: {}", e)))?;

    values
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| DataError::Format {
                line: first_line + row,
                message: format!("empty or non-numeric value in column '{}'", column.name()),
            })
        })
        .collect()
}

fn frame_to_dataset(df: &DataFrame, shape: ImageShape, has_header: bool) -> Result<ImageDataset> {
    let numel = shape.numel();
    let first_line = if has_header { 2 } else { 1 };

    let columns = df.get_columns();
    let labeled = match columns.len() {
        n if n == numel + 1 => true,
        n if n == numel => false,
        n => {
            return Err(DataError::Format {
                line: 1,
                message: format!("expected {} or {} columns, got {}", numel, numel + 1, n),
            })
        }
    };

    let n_rows = df.height();
    if n_rows == 0 {
        return Err(DataError::EmptyDataset);
    }

    let (label_column, pixel_columns) = if labeled {
        (Some(&columns[0]), &columns[1..])
    } else {
        (None, columns)
    };

    let [_, height, width] = shape.as_array();
    let mut x = Array4::<f32>::zeros(shape.batch_dims(n_rows));
    for (col_idx, column) in pixel_columns.iter().enumerate() {
        let channel = col_idx / (height * width);
        let h = (col_idx / width) % height;
        let w = col_idx % width;
        for (row, value) in numeric_column(column, first_line)?.into_iter().enumerate() {
            x[[row, channel, h, w]] = value as f32 / PIXEL_SCALE;
        }
    }

    let y = match label_column {
        Some(column) => {
            let labels = numeric_column(column, first_line)?
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    if value >= 0.0 && value.fract() == 0.0 {
                        Ok(value as usize)
                    } else {
                        Err(DataError::Format {
                            line: first_line + row,
                            message: format!("invalid label '{}'", value),
                        })
                    }
                })
                .collect::<Result<Vec<usize>>>()?;
            Some(labels)
        }
        None => None,
    };

    ImageDataset::from_arrays(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn row(label: Option<usize>, value: u8, numel: usize) -> String {
        let mut fields: Vec<String> = label.into_iter().map(|l| l.to_string()).collect();
        fields.extend(std::iter::repeat(value.to_string()).take(numel));
        fields.join(",")
    }

    #[test]
    fn test_parse_labeled_with_header() {
        let shape = ImageShape::grayscale(2, 2);
        let text = format!(
            "label,p0,p1,p2,p3\n{}\n{}\n",
            row(Some(3), 255, 4),
            row(Some(7), 51, 4)
        );
        let ds = parse_image_csv(text.as_bytes(), shape, true).unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.labels().unwrap(), &[3, 7]);
        assert_relative_eq!(ds.x()[[0, 0, 1, 1]], 1.0);
        assert_relative_eq!(ds.x()[[1, 0, 0, 0]], 0.2);
    }

    #[test]
    fn test_parse_unlabeled_without_header() {
        let shape = ImageShape::grayscale(2, 2);
        let text = "0,51,0,0\n0,0,0,255\n";
        let ds = parse_image_csv(text.as_bytes(), shape, false).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(!ds.has_targets());
        assert_relative_eq!(ds.x()[[0, 0, 0, 1]], 0.2);
        assert_relative_eq!(ds.x()[[1, 0, 1, 1]], 1.0);
    }

    #[test]
    fn test_pixel_order_is_row_major() {
        let shape = ImageShape::grayscale(2, 3);
        let ds = parse_image_csv(b"0,0,0,0,0,255\n", shape, false).unwrap();
        assert_relative_eq!(ds.x()[[0, 0, 1, 2]], 1.0);
        assert_relative_eq!(ds.x()[[0, 0, 0, 2]], 0.0);
    }

    #[test]
    fn test_corrupt_first_row_is_an_error() {
        let shape = ImageShape::grayscale(2, 2);
        let text = "?,0,0,0,0\n1,255,0,0,0\n2,0,255,0,0\n";
        let err = parse_image_csv(text.as_bytes(), shape, false).unwrap_err();
        assert!(matches!(err, DataError::Format { line: 1, .. }));
    }

    #[test]
    fn test_corrupt_cell_reports_its_line() {
        let shape = ImageShape::grayscale(2, 2);
        let text = "label,p0,p1,p2,p3\n1,0,0,0,0\n2,0,x,0,0\n";
        let err = parse_image_csv(text.as_bytes(), shape, true).unwrap_err();
        assert!(matches!(err, DataError::Format { line: 3, .. }));

        let empty_cell = "1,0,,0,0\n";
        assert!(parse_image_csv(empty_cell.as_bytes(), shape, false).is_err());

        let bad_label = "1.5,0,0,0,0\n";
        let err = parse_image_csv(bad_label.as_bytes(), shape, false).unwrap_err();
        assert!(matches!(err, DataError::Format { line: 1, .. }));
    }

    #[test]
    fn test_quoted_fields_are_read() {
        let shape = ImageShape::grayscale(2, 2);
        let text = "\"1\",\"0\",\"0\",\"0\",\"255\"\n\"0\",\"51\",\"0\",\"0\",\"0\"\n";
        let ds = parse_image_csv(text.as_bytes(), shape, false).unwrap();
        assert_eq!(ds.labels().unwrap(), &[1, 0]);
        assert_relative_eq!(ds.x()[[0, 0, 1, 1]], 1.0);
        assert_relative_eq!(ds.x()[[1, 0, 0, 0]], 0.2);
    }

    #[test]
    fn test_wrong_column_count() {
        let shape = ImageShape::grayscale(2, 2);
        let err = parse_image_csv(b"1,2,3\n", shape, false).unwrap_err();
        assert!(matches!(err, DataError::Format { line: 1, .. }));
    }

    #[test]
    fn test_header_only_is_empty() {
        let result = parse_image_csv(b"label,p0\n", ImageShape::grayscale(1, 1), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_mnist_csv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let header: Vec<String> = std::iter::once("label".to_string())
            .chain((0..784).map(|i| format!("pixel{}", i)))
            .collect();
        writeln!(file, "{}", header.join(",")).unwrap();
        writeln!(file, "{}", row(Some(5), 128, 784)).unwrap();
        writeln!(file, "{}", row(Some(0), 0, 784)).unwrap();
        file.flush().unwrap();

        let ds = read_mnist_csv(file.path()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.image_shape(), MNIST_SHAPE);
        assert_eq!(ds.n_classes(), 6);
    }
}
