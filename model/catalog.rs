use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::array::{ArrayBuilder, MaterializedArray, Row};
use super::schema::Schema;
use super::value::Value;
use crate::error::EngineError;
use crate::shared::export;

const MANIFEST_FILE: &str = "catalog.toml";

/// Who is responsible for releasing an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// Owned by the catalog until explicitly dropped.
    Persistent,
    /// Owned by an evaluator; released once no expression node refers to it.
    Scoped,
}

/// A named reference to a materialized, immutable array.
#[derive(Clone, Debug)]
pub struct ArrayHandle {
    name: Arc<str>,
    lifetime: Lifetime,
    array: Arc<MaterializedArray>,
}

impl ArrayHandle {
    pub(crate) fn new(name: &str, lifetime: Lifetime, array: MaterializedArray) -> Self {
        Self {
            name: Arc::from(name),
            lifetime,
            array: Arc::new(array),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn schema(&self) -> &Schema {
        self.array.schema()
    }

    pub fn array(&self) -> &MaterializedArray {
        &self.array
    }

    pub(crate) fn shared(&self) -> Arc<MaterializedArray> {
        Arc::clone(&self.array)
    }

    /// Identity comparison: both handles refer to the same realized cells.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.array, &other.array)
    }

    pub fn cell_count(&self) -> usize {
        self.array.cell_count()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.array.rows()
    }
}

impl fmt::Display for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.array.schema())
    }
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    arrays: Vec<ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    file: String,
    schema: Schema,
}

/// The registry of persistent arrays.
///
/// Names are append/drop only: a name denotes one fixed schema for as long as
/// it is registered, and declaring a taken name is a [`EngineError::NameCollision`].
/// Readers never block each other; concurrent declarations of the same name
/// are serialized and exactly one of them wins.
#[derive(Debug, Default)]
pub struct Catalog {
    arrays: DashMap<String, ArrayHandle>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty array.
    pub fn declare(&self, name: &str, schema: Schema) -> Result<ArrayHandle, EngineError> {
        self.declare_array(name, MaterializedArray::empty(schema))
    }

    /// Registers an array together with its cells.
    pub fn declare_array(&self, name: &str, array: MaterializedArray) -> Result<ArrayHandle, EngineError> {
        if name.is_empty() {
            return Err(EngineError::schema("array names must not be empty"));
        }
        match self.arrays.entry(name.to_string()) {
            Entry::Occupied(_) => Err(EngineError::NameCollision(name.to_string())),
            Entry::Vacant(slot) => {
                let handle = ArrayHandle::new(name, Lifetime::Persistent, array);
                log::debug!(
                    "Declared array {} with {} cells",
                    handle,
                    handle.cell_count()
                );
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<ArrayHandle, EngineError> {
        self.arrays
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    pub fn resolve(&self, name: &str) -> Result<Schema, EngineError> {
        self.lookup(name).map(|handle| handle.schema().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    /// Removes a persistent array. Expression nodes that already captured its
    /// handle keep reading the old cells.
    pub fn drop_array(&self, name: &str) -> Result<ArrayHandle, EngineError> {
        let (_, handle) = self
            .arrays
            .remove(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        log::debug!("Dropped array {name}");
        Ok(handle)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.arrays.iter().map(|e| e.key().clone()).collect();
        names.sort_by(|a, b| natord::compare(a, b));
        names
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Writes a TOML manifest of schemas plus one TSV of rows per array.
    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        fs::create_dir_all(dir)?;
        let mut entries = Vec::new();
        for (index, name) in self.names().into_iter().enumerate() {
            let handle = self.lookup(&name)?;
            // The index keeps file names unique when stems coincide.
            let file = format!("{index:04}-{}.tsv", readable_stem(&name));
            let writer = fs::File::create(dir.join(&file))?;
            export::write_tsv(handle.array(), writer)?;
            entries.push(ManifestEntry {
                name,
                file,
                schema: handle.schema().clone(),
            });
        }
        let manifest = toml::to_string_pretty(&Manifest { arrays: entries })
            .map_err(|err| EngineError::Persist(err.to_string()))?;
        fs::write(dir.join(MANIFEST_FILE), manifest)?;
        log::info!("Saved {} arrays to {}", self.len(), dir.display());
        Ok(())
    }

    /// Reopens a catalog written by [`Catalog::save`]. Every cell is
    /// revalidated against its schema on the way in.
    pub fn open(dir: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: Manifest =
            toml::from_str(&text).map_err(|err| EngineError::Persist(err.to_string()))?;
        let catalog = Self::new();
        for entry in manifest.arrays {
            let array = read_rows(&dir.join(&entry.file), entry.schema)?;
            catalog.declare_array(&entry.name, array)?;
        }
        Ok(catalog)
    }
}

fn readable_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect()
}

fn read_rows(path: &Path, schema: Schema) -> Result<MaterializedArray, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;
    let ndim = schema.ndim();
    let mut builder = ArrayBuilder::new(schema);
    for record in reader.records() {
        let record = record?;
        let mut coords = Vec::with_capacity(ndim);
        for field in record.iter().take(ndim) {
            let c = field.parse::<i64>().map_err(|err| {
                EngineError::Persist(format!("{}: bad coordinate '{field}': {err}", path.display()))
            })?;
            coords.push(c);
        }
        let values = builder
            .schema()
            .attributes
            .iter()
            .zip(record.iter().skip(ndim))
            .map(|(attr, field)| {
                Value::parse(field, attr.ty).ok_or_else(|| {
                    EngineError::Persist(format!(
                        "{}: cannot read '{field}' as {}",
                        path.display(),
                        attr.ty
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        builder.insert(coords, values)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{Attribute, Dimension};
    use crate::model::value::{NULL_TEXT, ScalarType};
    use std::thread;

    fn schema() -> Schema {
        Schema::new(
            vec![Dimension::new("variant_id", 0, 9, 5)],
            vec![
                Attribute::required("chrom", ScalarType::String),
                Attribute::nullable("af", ScalarType::Float64),
            ],
        )
        .unwrap()
    }

    #[test]
    fn redeclaring_a_name_collides() {
        let catalog = Catalog::new();
        catalog.declare("variants", schema()).unwrap();
        let err = catalog.declare("variants", schema()).unwrap_err();
        assert!(matches!(err, EngineError::NameCollision(_)));
        assert_eq!(catalog.resolve("variants").unwrap(), schema());
    }

    #[test]
    fn lookup_of_missing_array_is_not_found() {
        let catalog = Catalog::new();
        assert!(matches!(catalog.lookup("nope"), Err(EngineError::NotFound(_))));
        catalog.declare("x", schema()).unwrap();
        catalog.drop_array("x").unwrap();
        assert!(!catalog.contains("x"));
    }

    #[test]
    fn concurrent_declarations_have_one_winner() {
        let catalog = Arc::new(Catalog::new());
        let outcomes: Vec<bool> = (0..8)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || catalog.declare("shared", schema()).is_ok())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    }

    #[test]
    fn saved_catalog_reopens_with_equal_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut builder = ArrayBuilder::new(schema());
        builder
            .insert(vec![1], vec![Value::str("chr1"), Value::Float(0.25)])
            .unwrap();
        builder
            .insert(vec![7], vec![Value::str("chr2"), Value::Null])
            .unwrap();
        catalog.declare_array("variants", builder.finish()).unwrap();
        catalog.save(dir.path()).unwrap();

        let reopened = Catalog::open(dir.path()).unwrap();
        let original = catalog.lookup("variants").unwrap();
        let restored = reopened.lookup("variants").unwrap();
        assert_eq!(restored.schema(), original.schema());
        assert!(restored.array().same_content(original.array()));
    }

    #[test]
    fn names_with_the_same_file_stem_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        for (name, chrom) in [("a_b", "1"), ("a-b", "2"), ("A-B", "3"), ("a b", "4")] {
            let mut builder = ArrayBuilder::new(schema());
            builder
                .insert(vec![0], vec![Value::str(chrom), Value::Null])
                .unwrap();
            catalog.declare_array(name, builder.finish()).unwrap();
        }
        catalog.save(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 5);

        let reopened = Catalog::open(dir.path()).unwrap();
        for (name, chrom) in [("a_b", "1"), ("a-b", "2"), ("A-B", "3"), ("a b", "4")] {
            let restored = reopened.lookup(name).unwrap();
            assert_eq!(restored.array().value(&[0], "chrom"), Some(&Value::str(chrom)), "{name}");
        }
    }

    #[test]
    fn literal_null_marker_strings_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let mut builder = ArrayBuilder::new(schema());
        builder
            .insert(vec![0], vec![Value::str(NULL_TEXT), Value::Null])
            .unwrap();
        builder
            .insert(vec![1], vec![Value::str("\\\\N"), Value::Float(1.5)])
            .unwrap();
        catalog.declare_array("odd", builder.finish()).unwrap();
        catalog.save(dir.path()).unwrap();

        let restored = Catalog::open(dir.path()).unwrap().lookup("odd").unwrap();
        assert_eq!(restored.array().value(&[0], "chrom"), Some(&Value::str("\\N")));
        assert_eq!(restored.array().value(&[0], "af"), Some(&Value::Null));
        assert_eq!(restored.array().value(&[1], "chrom"), Some(&Value::str("\\\\N")));
    }
}
