use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::EngineError;
use crate::model::{MaterializedArray, Row};

/// Header of an exported array: dimension names, then attribute names.
pub fn header(array: &MaterializedArray) -> Vec<String> {
    let schema = array.schema();
    schema
        .dimensions
        .iter()
        .map(|d| d.name.clone())
        .chain(schema.attributes.iter().map(|a| a.name.clone()))
        .collect()
}

fn record(row: &Row) -> Vec<String> {
    row.coords
        .iter()
        .map(i64::to_string)
        .chain(row.values.iter().map(ToString::to_string))
        .collect()
}

/// Serializes every cell as one tab-separated line in coordinate order.
/// Nulls are written as `\N`.
pub fn write_tsv<W: Write>(array: &MaterializedArray, writer: W) -> Result<(), EngineError> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(writer);
    out.write_record(header(array))?;
    for row in array.rows() {
        out.write_record(record(&row))?;
    }
    out.flush()?;
    Ok(())
}

/// Writes an array to `path`, creating or truncating the file.
pub fn write_tsv_file(array: &MaterializedArray, path: &Path) -> Result<(), EngineError> {
    let file = BufWriter::new(File::create(path)?);
    write_tsv(array, file)?;
    log::info!("Wrote {} rows to {}", array.cell_count(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArrayBuilder, Attribute, Dimension, ScalarType, Schema, Value};

    #[test]
    fn rows_are_written_in_coordinate_order() {
        let schema = Schema::new(
            vec![Dimension::new("i", 0, 9, 2)],
            vec![
                Attribute::nullable("name", ScalarType::String),
                Attribute::nullable("x", ScalarType::Float64),
            ],
        )
        .unwrap();
        let mut builder = ArrayBuilder::new(schema);
        builder.insert(vec![5], vec![Value::str("b"), Value::Null]).unwrap();
        builder.insert(vec![1], vec![Value::str("a"), Value::Float(0.5)]).unwrap();
        let array = builder.finish();

        let mut buffer = Vec::new();
        write_tsv(&array, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "i\tname\tx\n1\ta\t0.5\n5\tb\t\\N\n");
    }
}
