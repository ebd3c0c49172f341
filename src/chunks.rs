//! JSON chunk files.
//!
//! ```json
//! { "B3": { "color": ["red", "blue"], "next": "@B7" },
//!   "B7": { "color": "red", "size": 4 } }
//! ```
//!
//! Top-level keys are local labels for chunks. A string starting with `@`
//! refers to another label; other strings, integers and floats are
//! constants. Labels only tie the file together: installing a file mints
//! fresh identifiers (keeping each label's letter) so it never collides
//! with names already in working memory or the store.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

use crate::symbol::{Constant, IdName, SymbolRef};
use crate::wm::WorkingMemory;

#[derive(Debug, Error, Diagnostic)]
pub enum ChunkError {
    #[error("failed to read chunk file {path}")]
    #[diagnostic(code(ltm::chunks::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid chunk file: {message}")]
    #[diagnostic(
        code(ltm::chunks::parse),
        help(
            "A chunk file is a JSON object of objects: {{\"B3\": {{\"color\": [\"red\", \"blue\"], \"next\": \"@B7\"}}}}."
        )
    )]
    Parse { message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Values {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl Values {
    fn into_vec(self) -> Vec<Scalar> {
        match self {
            Values::One(s) => vec![s],
            Values::Many(v) => v,
        }
    }
}

/// A value in a chunk file.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkValue {
    Constant(Constant),
    /// `@Label`
    Ref(String),
}

impl From<Scalar> for ChunkValue {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Int(i) => ChunkValue::Constant(Constant::Int(i)),
            Scalar::Float(x) => ChunkValue::Constant(Constant::Float(x)),
            Scalar::Str(s) => match s.strip_prefix('@') {
                Some(label) if !label.is_empty() => ChunkValue::Ref(label.to_string()),
                _ => ChunkValue::Constant(Constant::Str(s)),
            },
        }
    }
}

/// A parsed chunk file, labels in sorted order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkFile {
    pub chunks: Vec<(String, Vec<(String, ChunkValue)>)>,
}

impl ChunkFile {
    pub fn from_json_str(text: &str) -> Result<Self, ChunkError> {
        let raw: BTreeMap<String, BTreeMap<String, Values>> =
            serde_json::from_str(text).map_err(|e| ChunkError::Parse {
                message: e.to_string(),
            })?;
        let chunks = raw
            .into_iter()
            .map(|(label, attrs)| {
                let edges = attrs
                    .into_iter()
                    .flat_map(|(attr, values)| {
                        values
                            .into_vec()
                            .into_iter()
                            .map(move |v| (attr.clone(), ChunkValue::from(v)))
                    })
                    .collect();
                (label, edges)
            })
            .collect();
        Ok(Self { chunks })
    }

    pub fn load(path: &Path) -> Result<Self, ChunkError> {
        let text = std::fs::read_to_string(path).map_err(|e| ChunkError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&text)
    }

    /// Build the chunks in working memory at `level`. Returns the identifiers
    /// of the top-level labels, in file order.
    pub fn install(&self, wm: &mut WorkingMemory, level: u32) -> Vec<SymbolRef> {
        let mut ids: HashMap<&str, SymbolRef> = HashMap::new();
        let mut roots = Vec::with_capacity(self.chunks.len());
        for (label, edges) in &self.chunks {
            let root = identifier_for(wm, &mut ids, label, level);
            for (attr, value) in edges {
                let value = match value {
                    ChunkValue::Constant(c) => wm.symbols_mut().constant(c.clone()),
                    ChunkValue::Ref(target) => identifier_for(wm, &mut ids, target, level),
                };
                wm.add_str_attr(&root, attr, &value);
            }
            roots.push(root);
        }
        roots
    }
}

fn identifier_for<'a>(
    wm: &mut WorkingMemory,
    ids: &mut HashMap<&'a str, SymbolRef>,
    label: &'a str,
    level: u32,
) -> SymbolRef {
    ids.entry(label)
        .or_insert_with(|| {
            let letter = IdName::parse(label)
                .map(|n| n.letter)
                .or_else(|| label.chars().next())
                .unwrap_or('I');
            wm.new_identifier(letter, level)
        })
        .clone()
}
