//! Conversion between query values and BSON.
//!
//! A [`Codec`] describes how one value travels over the wire: the
//! translator uses it to encode constants next to the fields they are
//! compared with, and the shaper compiler uses it to decode field values
//! back into [`Value`]s.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, oid::ObjectId};
use indexmap::IndexMap;
use prax_model::ScalarKind;
use prax_query::{QueryError, QueryResult, TypeRef, Value};
use smol_str::SmolStr;
use uuid::Uuid;

/// Record type name given to documents decoded without a mapped type.
pub const DOCUMENT_TYPE: &str = "Document";

/// Wire representation of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Codec {
    /// A mapped scalar.
    Scalar {
        /// Declared kind.
        kind: ScalarKind,
        /// Whether null is accepted.
        nullable: bool,
    },
    /// A document holding a mapped entity.
    Entity(SmolStr),
    /// An array of elements.
    Array(Box<Codec>),
    /// An untyped document.
    Document,
    /// Anything; decoded structurally.
    Raw,
}

impl Codec {
    /// Codec of a scalar kind.
    pub fn scalar(kind: ScalarKind) -> Self {
        Self::Scalar {
            kind,
            nullable: false,
        }
    }

    /// Codec for values of a static type.
    pub fn for_type(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Scalar { kind, nullable } => Self::Scalar {
                kind: *kind,
                nullable: *nullable,
            },
            TypeRef::Entity(name) => Self::Entity(name.clone()),
            TypeRef::Record(_) => Self::Document,
            TypeRef::Sequence(element) => Self::Array(Box::new(Self::for_type(element))),
            TypeRef::Unknown => Self::Raw,
        }
    }

    /// Scalar kind, if this is a scalar codec.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Scalar { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Encode a value, converting it to the codec's kind first.
    pub fn encode(&self, value: &Value) -> QueryResult<Bson> {
        match (self, value) {
            (_, Value::Null) => Ok(Bson::Null),
            (Self::Scalar { kind, .. }, value) => value_to_bson(&value.clone().coerce(*kind)?),
            (Self::Array(element), Value::List(items)) => items
                .iter()
                .map(|item| element.encode(item))
                .collect::<QueryResult<Vec<_>>>()
                .map(Bson::Array),
            (_, value) => value_to_bson(value),
        }
    }

    /// Decode a wire value.
    pub fn decode(&self, bson: &Bson) -> QueryResult<Value> {
        match (self, bson) {
            (_, Bson::Null | Bson::Undefined) => Ok(Value::Null),
            (Self::Scalar { kind, .. }, bson) => decode_scalar(bson, *kind),
            (Self::Array(element), Bson::Array(items)) => items
                .iter()
                .map(|item| element.decode(item))
                .collect::<QueryResult<Vec<_>>>()
                .map(Value::List),
            (_, bson) => Ok(bson_to_value(bson)),
        }
    }
}

/// Encode a value with its natural BSON type.
pub fn value_to_bson(value: &Value) -> QueryResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int32(v) => Bson::Int32(*v),
        Value::Int64(v) => Bson::Int64(*v),
        Value::Double(v) => Bson::Double(*v),
        Value::String(s) => Bson::String(s.clone()),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::Uuid(uuid) => Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }),
        Value::ObjectId(bytes) => Bson::ObjectId(ObjectId::from_bytes(*bytes)),
        Value::Binary(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::List(items) => Bson::Array(
            items
                .iter()
                .map(value_to_bson)
                .collect::<QueryResult<Vec<_>>>()?,
        ),
        Value::Record { fields, .. } => {
            let mut doc = Document::new();
            for (name, field) in fields {
                doc.insert(name.as_str(), value_to_bson(field)?);
            }
            Bson::Document(doc)
        }
        Value::Entity(id) => {
            return Err(QueryError::serialization(format!(
                "Entity instance {} cannot be used as a query value",
                id
            )));
        }
    })
}

/// Decode a wire value structurally.
pub fn bson_to_value(bson: &Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(v) => Value::Int32(*v),
        Bson::Int64(v) => Value::Int64(*v),
        Bson::Double(v) => Value::Double(*v),
        Bson::String(s) => Value::String(s.clone()),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
        Bson::ObjectId(oid) => Value::ObjectId(oid.bytes()),
        Bson::Binary(binary) => match binary.subtype {
            BinarySubtype::Uuid | BinarySubtype::UuidOld => Uuid::from_slice(&binary.bytes)
                .map(Value::Uuid)
                .unwrap_or_else(|_| Value::Binary(binary.bytes.clone())),
            _ => Value::Binary(binary.bytes.clone()),
        },
        Bson::Array(items) => Value::List(items.iter().map(bson_to_value).collect()),
        Bson::Document(doc) => document_to_value(doc),
        other => Value::String(other.to_string()),
    }
}

/// Decode a document into an untyped record.
pub fn document_to_value(doc: &Document) -> Value {
    let fields: IndexMap<SmolStr, Value> = doc
        .iter()
        .map(|(name, value)| (SmolStr::new(name), bson_to_value(value)))
        .collect();
    Value::Record {
        type_name: SmolStr::new(DOCUMENT_TYPE),
        fields,
    }
}

/// Decode a wire value as a mapped scalar kind.
pub fn decode_scalar(bson: &Bson, kind: ScalarKind) -> QueryResult<Value> {
    let value = match (kind, bson) {
        (ScalarKind::String, Bson::ObjectId(oid)) => Value::String(oid.to_hex()),
        (ScalarKind::Uuid, Bson::Binary(binary)) => Uuid::from_slice(&binary.bytes)
            .map(Value::Uuid)
            .map_err(|e| QueryError::deserialization(format!("invalid UUID bytes: {}", e)))?,
        (_, bson) => bson_to_value(bson),
    };
    value.coerce(kind).map_err(|e| {
        QueryError::deserialization(format!("cannot read {} as {}: {}", bson, kind, e.message))
    })
}

/// Read a value at a dotted path of element names.
pub fn lookup<'d, S: AsRef<str>>(doc: &'d Document, path: &[S]) -> Option<&'d Bson> {
    let (first, rest) = path.split_first()?;
    let value = doc.get(first.as_ref())?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Bson::Document(inner) => lookup(inner, rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scalar_codec_converts_constants() {
        let codec = Codec::scalar(ScalarKind::Int64);
        assert_eq!(codec.encode(&Value::Int32(4)).unwrap(), Bson::Int64(4));

        let oid = Codec::scalar(ScalarKind::ObjectId)
            .encode(&Value::from("5f1d7f3e9d3b2a0011223344"))
            .unwrap();
        assert_eq!(
            oid,
            Bson::ObjectId(ObjectId::parse_str("5f1d7f3e9d3b2a0011223344").unwrap())
        );
    }

    #[test]
    fn test_decode_scalar_kinds() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let bson = Bson::DateTime(bson::DateTime::from_chrono(when));
        assert_eq!(
            decode_scalar(&bson, ScalarKind::DateTime).unwrap(),
            Value::DateTime(when)
        );
        assert_eq!(
            decode_scalar(&Bson::Int32(7), ScalarKind::Double).unwrap(),
            Value::Double(7.0)
        );

        let uuid = Uuid::new_v4();
        let encoded = value_to_bson(&Value::Uuid(uuid)).unwrap();
        assert_eq!(decode_scalar(&encoded, ScalarKind::Uuid).unwrap(), Value::Uuid(uuid));
    }

    #[test]
    fn test_decode_scalar_rejects_mismatch() {
        let err = decode_scalar(&Bson::String("x".into()), ScalarKind::Int32).unwrap_err();
        assert_eq!(err.code, prax_query::ErrorCode::DeserializationError);
    }

    #[test]
    fn test_vector_codec() {
        let codec = Codec::for_type(&TypeRef::scalar(ScalarKind::Vector));
        let bson = codec.encode(&Value::from(vec![0.5f64, 1.0])).unwrap();
        assert_eq!(bson, Bson::Array(vec![Bson::Double(0.5), Bson::Double(1.0)]));
        assert_eq!(codec.decode(&bson).unwrap(), Value::from(vec![0.5f64, 1.0]));
    }

    #[test]
    fn test_lookup_nested_path() {
        let doc = doc! { "_id": { "Region": "EU", "Number": 3 }, "Title": "x" };
        assert_eq!(lookup(&doc, &["_id", "Number"]), Some(&Bson::Int32(3)));
        assert_eq!(lookup(&doc, &["Title", "Nope"]), None);
        assert_eq!(lookup::<&str>(&doc, &[]), None);
    }

    #[test]
    fn test_entities_are_not_query_values() {
        assert!(value_to_bson(&Value::Entity(prax_query::EntityId(0))).is_err());
    }
}
