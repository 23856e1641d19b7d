//! JSON export.
//!
//! Values are encoded by shape rather than by type: an n-dimensional array
//! becomes a nested list by recursing over its outer axis until a 0-d value
//! remains, which is written as a native JSON number or boolean. Non-finite
//! floats cannot be represented in JSON and fail the whole export.

use ndarray::{ArrayBase, ArrayViewD, Axis, Data, Dimension};
use serde::ser::{Error as _, SerializeSeq};
use serde::{Serialize, Serializer};
use std::io::Write;
use std::path::Path;

use crate::document::OcrDocument;

const INDENT: &[u8] = b"    ";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("JSON serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A value that can be written as a plain JSON scalar.
pub trait JsonScalar {
    fn serialize_scalar<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error>;
}

macro_rules! integer_scalar {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl JsonScalar for $ty {
                fn serialize_scalar<S: Serializer>(
                    &self,
                    serializer: S,
                ) -> Result<S::Ok, S::Error> {
                    serializer.$method(*self)
                }
            }
        )*
    };
}

integer_scalar!(
    u8 => serialize_u8,
    u16 => serialize_u16,
    u32 => serialize_u32,
    u64 => serialize_u64,
    i8 => serialize_i8,
    i16 => serialize_i16,
    i32 => serialize_i32,
    i64 => serialize_i64,
    bool => serialize_bool,
);

impl JsonScalar for f32 {
    fn serialize_scalar<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.is_finite() {
            return Err(S::Error::custom(format!("non-finite number {}", self)));
        }
        serializer.serialize_f32(*self)
    }
}

impl JsonScalar for f64 {
    fn serialize_scalar<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.is_finite() {
            return Err(S::Error::custom(format!("non-finite number {}", self)));
        }
        serializer.serialize_f64(*self)
    }
}

struct NestedArray<'a, A>(ArrayViewD<'a, A>);

impl<A: JsonScalar> Serialize for NestedArray<'_, A> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.ndim() == 0 {
            return match self.0.first() {
                Some(value) => value.serialize_scalar(serializer),
                None => serializer.serialize_unit(),
            };
        }

        let mut seq = serializer.serialize_seq(Some(self.0.len_of(Axis(0))))?;
        for sub in self.0.outer_iter() {
            seq.serialize_element(&NestedArray(sub))?;
        }
        seq.end()
    }
}

/// `serialize_with` adapter writing an array of any dimension as nested lists.
pub fn nested<A, Sd, D, S>(array: &ArrayBase<Sd, D>, serializer: S) -> Result<S::Ok, S::Error>
where
    A: JsonScalar,
    Sd: Data<Elem = A>,
    D: Dimension,
    S: Serializer,
{
    NestedArray(array.view().into_dyn()).serialize(serializer)
}

/// `serialize_with` adapter for scalar fields.
pub fn finite<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: JsonScalar,
    S: Serializer,
{
    value.serialize_scalar(serializer)
}

/// Pretty-printed UTF-8 JSON, 4-space indent, non-ASCII kept literal.
pub fn to_json_bytes(document: &OcrDocument) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut serializer)?;
    Ok(buf)
}

/// Write the document to `path`; the file either appears complete or not at
/// all.
pub fn write_json(document: &OcrDocument, path: &Path) -> Result<(), ExportError> {
    let bytes = to_json_bytes(document)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(&bytes)?;
    file.flush()?;
    file.persist(path).map_err(|e| ExportError::Io(e.error))?;

    log::info!("[Export] wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Block, Line, Page, Prediction, Word};
    use ndarray::{arr0, arr2, arr3, Array2, ArrayD};

    #[derive(Serialize)]
    struct Wrap {
        #[serde(serialize_with = "nested")]
        value: ArrayD<f32>,
    }

    fn word(value: &str, confidence: f32) -> Word {
        Word {
            value: value.to_string(),
            confidence,
            geometry: arr2(&[[0.1, 0.2], [0.3, 0.2], [0.3, 0.25], [0.1, 0.25]]),
            objectness_score: 0.9,
        }
    }

    fn document(words: Vec<Word>) -> OcrDocument {
        OcrDocument {
            pages: vec![Page {
                page_idx: 0,
                dimensions: (100, 80),
                orientation: Prediction::default(),
                language: Prediction::default(),
                blocks: vec![Block {
                    geometry: Array2::zeros((4, 2)),
                    objectness_score: 0.9,
                    lines: vec![Line {
                        geometry: Array2::zeros((4, 2)),
                        objectness_score: 0.9,
                        words,
                    }],
                    artefacts: Vec::new(),
                }],
            }],
        }
    }

    #[test]
    fn test_nested_follows_shape() {
        let two = serde_json::to_string(&Wrap {
            value: arr2(&[[1.0, 2.0], [3.0, 4.5]]).into_dyn(),
        })
        .unwrap();
        assert_eq!(two, r#"{"value":[[1.0,2.0],[3.0,4.5]]}"#);

        let three = serde_json::to_string(&Wrap {
            value: arr3(&[[[1.0], [2.0]]]).into_dyn(),
        })
        .unwrap();
        assert_eq!(three, r#"{"value":[[[1.0],[2.0]]]}"#);

        let zero = serde_json::to_string(&Wrap { value: arr0(0.5).into_dyn() }).unwrap();
        assert_eq!(zero, r#"{"value":0.5}"#);
    }

    #[test]
    fn test_nested_rejects_non_finite() {
        let result = serde_json::to_string(&Wrap { value: arr2(&[[f32::NAN, 0.0]]).into_dyn() });
        assert!(result.is_err());
    }

    #[test]
    fn test_finite_rejects_infinity() {
        let doc = document(vec![word("x", f32::INFINITY)]);
        assert!(matches!(to_json_bytes(&doc), Err(ExportError::Serialize(_))));
    }

    #[test]
    fn test_pretty_output_with_four_space_indent() {
        let bytes = to_json_bytes(&document(vec![word("a", 0.5)])).unwrap();
        let json = String::from_utf8(bytes).unwrap();
        assert!(json.starts_with("{\n    \"pages\": ["));
        assert!(json.contains("\"orientation\": {\n"));
        assert!(json.contains("\"value\": null"));
    }

    #[test]
    fn test_non_ascii_written_literally() {
        let bytes = to_json_bytes(&document(vec![word("Çà été 東京", 0.8)])).unwrap();
        let json = String::from_utf8(bytes).unwrap();
        assert!(json.contains("Çà été 東京"));
        assert!(!json.contains("\\u"));
    }

    #[test]
    fn test_output_parses_as_plain_json() {
        let bytes = to_json_bytes(&document(vec![word("Hello", 0.99)])).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let w = &value["pages"][0]["blocks"][0]["lines"][0]["words"][0];
        assert_eq!(w["value"], "Hello");
        assert_eq!(value["pages"][0]["dimensions"], serde_json::json!([100, 80]));
        let geometry = w["geometry"].as_array().unwrap();
        assert_eq!(geometry.len(), 4);
        assert!(geometry
            .iter()
            .all(|p| p.as_array().unwrap().iter().all(|c| c.is_f64())));
    }

    #[test]
    fn test_write_json_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&document(vec![word("a", 0.5)]), &path).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, to_json_bytes(&document(vec![word("a", 0.5)])).unwrap());
        // no temp file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_json_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        assert!(write_json(&document(vec![word("a", f32::NAN)]), &path).is_err());
        assert!(!path.exists());
    }
}
