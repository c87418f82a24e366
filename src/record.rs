use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::SqlPreloadError;
use crate::results::CustomDbRow;
use crate::schema::{AssociationKind, ColumnType, Model, Schema};
use crate::types::{JoinKey, RowValues};

/// Contents of one association slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    #[must_use]
    pub fn zero(kind: AssociationKind) -> Self {
        if kind.is_collection() {
            Related::Many(Vec::new())
        } else {
            Related::One(None)
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Related::One(one) => one.is_none(),
            Related::Many(many) => many.is_empty(),
        }
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        match self {
            Related::One(Some(one)) => std::slice::from_ref(one.as_ref()),
            Related::One(None) => &[],
            Related::Many(many) => many,
        }
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        match self {
            Related::One(Some(one)) => std::slice::from_mut(one.as_mut()),
            Related::One(None) => &mut [],
            Related::Many(many) => many,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Related::One(None) => JsonValue::Null,
            Related::One(Some(one)) => one.to_json(),
            Related::Many(many) => JsonValue::Array(many.iter().map(Record::to_json).collect()),
        }
    }
}

/// A row of some model plus its association slots.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<(String, RowValues)>,
    associations: Vec<(String, Related)>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.table == other.schema.table
            && self.values == other.values
            && self.associations == other.associations
    }
}

impl Record {
    /// Empty record with every association slot in its zero state.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        let associations = schema
            .associations
            .iter()
            .map(|a| (a.name.clone(), Related::zero(a.kind)))
            .collect();
        Self {
            schema,
            values: Vec::new(),
            associations,
        }
    }

    /// Build from a result row, normalising values to the declared column types.
    #[must_use]
    pub fn from_row(schema: Arc<Schema>, row: &CustomDbRow) -> Self {
        let mut record = Record::new(schema);
        for (name, value) in row.iter() {
            let normalised = match record.schema.column(name) {
                Some(column) => normalise(value.clone(), column.ty),
                None => value.clone(),
            };
            record.values.push((name.to_owned(), normalised));
        }
        record
    }

    /// Encode a typed model. Association fields are ignored.
    ///
    /// # Errors
    /// `DecodeError` if the model does not serialise to an object,
    /// `ParameterError` if a column value does not fit its declared type.
    pub fn from_model<M: Model>(schema: Arc<Schema>, model: &M) -> Result<Self, SqlPreloadError> {
        let json = serde_json::to_value(model)?;
        let JsonValue::Object(map) = json else {
            return Err(SqlPreloadError::ParameterError(format!(
                "model `{}` must serialise to an object",
                schema.name
            )));
        };
        let mut record = Record::new(schema);
        for column in &record.schema.columns {
            let value = match map.get(&column.name) {
                Some(v) => value_from_json(&column.name, v, column.ty)?,
                None => continue,
            };
            record.values.push((column.name.clone(), value));
        }
        Ok(record)
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn values(&self) -> &[(String, RowValues)] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&RowValues> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, column: &str, value: RowValues) {
        match self.values.iter_mut().find(|(name, _)| name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_owned(), value)),
        }
    }

    /// Join key of `column`; `None` when absent or NULL.
    #[must_use]
    pub fn key(&self, column: &str) -> Option<JoinKey> {
        self.get(column).and_then(RowValues::join_key)
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&RowValues> {
        self.get(&self.schema.primary_key)
    }

    #[must_use]
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.associations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.associations
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn set_related(&mut self, name: &str, related: Related) {
        match self.related_mut(name) {
            Some(slot) => *slot = related,
            None => self.associations.push((name.to_owned(), related)),
        }
    }

    /// Columns first, then one key per association slot.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.values.len() + self.associations.len());
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        for (name, related) in &self.associations {
            map.insert(name.clone(), related.to_json());
        }
        JsonValue::Object(map)
    }

    /// Decode into a typed value, usually the record's own model.
    ///
    /// # Errors
    /// `DecodeError` when the record does not match `T`'s serde shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SqlPreloadError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn normalise(value: RowValues, ty: ColumnType) -> RowValues {
    match (ty, value) {
        (ColumnType::Timestamp, v @ RowValues::Text(_)) => {
            v.as_timestamp().map_or(v, RowValues::Timestamp)
        }
        (ColumnType::Bool, RowValues::Int(i)) => RowValues::Bool(i != 0),
        #[allow(clippy::cast_precision_loss)]
        (ColumnType::Float, RowValues::Int(i)) => RowValues::Float(i as f64),
        (ColumnType::Json, RowValues::Text(s)) => match serde_json::from_str(&s) {
            Ok(json) => RowValues::JSON(json),
            Err(_) => RowValues::Text(s),
        },
        (_, v) => v,
    }
}

/// Convert a serde value to the storage value of a column.
///
/// # Errors
/// `ParameterError` when the JSON shape does not fit `ty`.
pub fn value_from_json(
    column: &str,
    value: &JsonValue,
    ty: ColumnType,
) -> Result<RowValues, SqlPreloadError> {
    let mismatch =
        || SqlPreloadError::ParameterError(format!("column `{column}` expects {ty:?}, got {value}"));
    if value.is_null() {
        return Ok(RowValues::Null);
    }
    Ok(match ty {
        ColumnType::Integer => match value {
            JsonValue::Bool(b) => RowValues::Int(i64::from(*b)),
            _ => RowValues::Int(value.as_i64().ok_or_else(mismatch)?),
        },
        ColumnType::Float => RowValues::Float(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::Text => RowValues::Text(value.as_str().ok_or_else(mismatch)?.to_owned()),
        ColumnType::Bool => match value {
            JsonValue::Bool(b) => RowValues::Bool(*b),
            _ => RowValues::Bool(value.as_i64().ok_or_else(mismatch)? != 0),
        },
        ColumnType::Timestamp => {
            let text = RowValues::Text(value.as_str().ok_or_else(mismatch)?.to_owned());
            RowValues::Timestamp(text.as_timestamp().ok_or_else(mismatch)?)
        }
        ColumnType::Json => RowValues::JSON(value.clone()),
        ColumnType::Blob => match value {
            JsonValue::Array(items) => RowValues::Blob(
                items
                    .iter()
                    .map(|i| i.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(mismatch)?,
            ),
            _ => return Err(mismatch()),
        },
    })
}
