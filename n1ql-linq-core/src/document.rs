//! Core traits and types for documents stored in a bucket.
//!
//! A [`Document`] is a serializable model with a key. Keys are resolved through
//! [`DocumentKey`], so the key member may be a string, an integer or an optional
//! value; an empty or absent key surfaces as [`N1qlError::DocumentKeyMissing`] when the
//! unit of work tries to write the document.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{
    error::{N1qlError, N1qlResult},
    types::Model,
};

pub trait Document: Model + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The document key, or `None` if it is not set.
    fn document_key(&self) -> Option<String>;

    /// The `type` discriminator stored in the document metadata.
    fn document_type() -> &'static str;
}

pub trait DocumentExt: Document {
    /// The document key, or [`N1qlError::DocumentKeyMissing`].
    fn require_key(&self) -> N1qlResult<String>;

    fn to_json(&self) -> N1qlResult<Value>;

    fn from_json(value: Value) -> N1qlResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn require_key(&self) -> N1qlResult<String> {
        self.document_key()
            .ok_or_else(|| N1qlError::DocumentKeyMissing(D::document_type().to_string()))
    }

    fn to_json(&self) -> N1qlResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> N1qlResult<Self> {
        Ok(from_value(value)?)
    }
}

/// A value usable as a document key.
pub trait DocumentKey {
    fn to_document_key(&self) -> Option<String>;
}

impl DocumentKey for String {
    fn to_document_key(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.clone())
    }
}

impl DocumentKey for &str {
    fn to_document_key(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.to_string())
    }
}

impl<K: DocumentKey> DocumentKey for Option<K> {
    fn to_document_key(&self) -> Option<String> {
        self.as_ref().and_then(DocumentKey::to_document_key)
    }
}

macro_rules! integer_document_key {
    ($($ty:ty),*) => {
        $(
            impl DocumentKey for $ty {
                fn to_document_key(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

integer_document_key!(i32, i64, u32, u64);

/// Out-of-band bookkeeping for a stored document, as returned by `META()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Optimistic concurrency token.
    #[serde(default)]
    pub cas: u64,
    #[serde(default)]
    pub flags: u32,
    pub id: String,
    #[serde(rename = "type", default)]
    pub document_type: String,
}

impl DocumentMetadata {
    pub fn new(id: impl Into<String>, document_type: impl Into<String>) -> Self {
        Self { cas: 0, flags: 0, id: id.into(), document_type: document_type.into() }
    }
}

/// A document read together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct WithMetadata<D> {
    pub document: D,
    pub metadata: Option<DocumentMetadata>,
}

impl<D: DeserializeOwned> WithMetadata<D> {
    /// Splits a row projected with `META(extent) as __metadata` into the document and
    /// its metadata.
    pub fn from_row(mut row: Value) -> N1qlResult<Self> {
        let metadata = match row.as_object_mut().and_then(|object| object.remove("__metadata")) {
            Some(metadata) => Some(from_value(metadata)?),
            None => None,
        };

        Ok(Self { document: from_value(row)?, metadata })
    }
}
