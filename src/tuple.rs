use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{RecordId, Result, StorageError};

/// Width used by [`FieldType::string`] when a layout does not pick its own
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    /// Fixed-width string: a length prefix followed by this many bytes
    Str(usize),
}

impl FieldType {
    pub const INT_BYTES: usize = 4;

    pub fn string() -> Self {
        FieldType::Str(STRING_LEN)
    }

    /// Number of bytes a value of this type occupies inside a slot
    pub fn byte_width(&self) -> usize {
        match self {
            FieldType::Int => Self::INT_BYTES,
            FieldType::Str(max_len) => Self::INT_BYTES + max_len,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "INT"),
            FieldType::Str(max_len) => write!(f, "STR({max_len})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(value) => Some(*value),
            Field::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Int(_) => None,
            Field::Str(value) => Some(value),
        }
    }

    /// Check that this value can be stored under `field_type`
    fn check(&self, field_type: FieldType) -> Result<()> {
        match (self, field_type) {
            (Field::Int(_), FieldType::Int) => Ok(()),
            (Field::Str(value), FieldType::Str(max)) => {
                if value.len() > max {
                    return Err(StorageError::FieldTooLong {
                        len: value.len(),
                        max,
                    });
                }
                Ok(())
            }
            (field, field_type) => Err(StorageError::SchemaMismatch(format!(
                "{field:?} is not a {field_type} value"
            ))),
        }
    }

    fn write_to<W: Write>(&self, field_type: FieldType, out: &mut W) -> io::Result<()> {
        match (self, field_type) {
            (Field::Int(value), _) => out.write_i32::<BigEndian>(*value),
            (Field::Str(value), FieldType::Str(max)) => {
                let bytes = value.as_bytes();
                out.write_u32::<BigEndian>(bytes.len() as u32)?;
                out.write_all(bytes)?;
                out.write_all(&vec![0; max - bytes.len()])
            }
            (Field::Str(_), FieldType::Int) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "string value in an INT column",
            )),
        }
    }

    fn read_from<R: Read>(field_type: FieldType, input: &mut R) -> io::Result<Self> {
        match field_type {
            FieldType::Int => Ok(Field::Int(input.read_i32::<BigEndian>()?)),
            FieldType::Str(max) => {
                let len = input.read_u32::<BigEndian>()? as usize;
                if len > max {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("string length {len} exceeds field width {max}"),
                    ));
                }
                let mut bytes = vec![0; max];
                input.read_exact(&mut bytes)?;
                bytes.truncate(len);
                String::from_utf8(bytes)
                    .map(Field::Str)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(value) => write!(f, "{value}"),
            Field::Str(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdItem {
    pub field_type: FieldType,
    pub name: Option<String>,
}

/// The layout shared by every tuple of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(items: Vec<TdItem>) -> Self {
        Self { items }
    }

    /// A layout of anonymous fields
    pub fn from_types(types: &[FieldType]) -> Self {
        Self::new(
            types
                .iter()
                .map(|field_type| TdItem {
                    field_type: *field_type,
                    name: None,
                })
                .collect(),
        )
    }

    pub fn with_names(types: &[FieldType], names: &[&str]) -> Self {
        Self::new(
            types
                .iter()
                .zip(names)
                .map(|(field_type, name)| TdItem {
                    field_type: *field_type,
                    name: Some(name.to_string()),
                })
                .collect(),
        )
    }

    /// Concatenate two layouts, `first`'s fields before `second`'s
    pub fn merge(first: &TupleDesc, second: &TupleDesc) -> Self {
        let mut items = first.items.clone();
        items.extend(second.items.iter().cloned());
        Self::new(items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }

    pub fn field_type(&self, index: usize) -> Option<FieldType> {
        self.items.get(index).map(|item| item.field_type)
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.items.get(index).and_then(|item| item.name.as_deref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// Fixed number of bytes one tuple of this layout occupies in a slot
    pub fn byte_width(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_width()).sum()
    }

    /// Two layouts are interchangeable when their field types line up; names are ignored
    pub fn same_layout(&self, other: &TupleDesc) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{}({})", item.field_type, name)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        Ok(())
    }
}

/// A row of field values plus, once stored, the location it was read from or written to
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.len() {
            return Err(StorageError::SchemaMismatch(format!(
                "{} values for a layout of {} fields",
                fields.len(),
                desc.len()
            )));
        }
        for (field, item) in fields.iter().zip(desc.items()) {
            field.check(item.field_type)?;
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn set_field(&mut self, index: usize, field: Field) -> Result<()> {
        let field_type = self.desc.field_type(index).ok_or_else(|| {
            StorageError::SchemaMismatch(format!("no field at index {index}"))
        })?;
        field.check(field_type)?;
        self.fields[index] = field;
        Ok(())
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// The same values and record id under another descriptor of the same layout
    pub(crate) fn with_desc(&self, desc: Arc<TupleDesc>) -> Self {
        Self {
            desc,
            fields: self.fields.clone(),
            record_id: self.record_id,
        }
    }

    /// Serialize into exactly `desc.byte_width()` bytes
    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (field, item) in self.fields.iter().zip(self.desc.items()) {
            field.write_to(item.field_type, out)?;
        }
        Ok(())
    }

    pub(crate) fn read_from<R: Read>(desc: &Arc<TupleDesc>, input: &mut R) -> io::Result<Self> {
        let fields = desc
            .items()
            .map(|item| Field::read_from(item.field_type, input))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            desc: Arc::clone(desc),
            fields,
            record_id: None,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tuple_tests {
    use std::{io::Cursor, sync::Arc};

    use super::*;

    fn people() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::with_names(
            &[FieldType::Int, FieldType::Str(8)],
            &["id", "name"],
        ))
    }

    #[test]
    fn test_layout_width_and_lookup() {
        let desc = people();
        assert_eq!(desc.byte_width(), 4 + 4 + 8);
        assert_eq!(desc.index_of("name"), Some(1));
        assert_eq!(desc.index_of("missing"), None);
        assert_eq!(desc.field_name(0), Some("id"));
        assert_eq!(desc.to_string(), "INT(id), STR(8)(name)");
    }

    #[test]
    fn test_same_layout_ignores_names() {
        let anonymous = TupleDesc::from_types(&[FieldType::Int, FieldType::Str(8)]);
        assert!(people().same_layout(&anonymous));
        assert!(!people().same_layout(&TupleDesc::from_types(&[FieldType::Int])));
    }

    #[test]
    fn test_merge_concatenates_fields() {
        let merged = TupleDesc::merge(&people(), &TupleDesc::from_types(&[FieldType::Int]));
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.field_type(2), Some(FieldType::Int));
        assert_eq!(merged.field_name(1), Some("name"));
    }

    #[test]
    fn test_constructor_validates_values() {
        let desc = people();
        assert!(matches!(
            Tuple::new(Arc::clone(&desc), vec![Field::Int(1)]),
            Err(StorageError::SchemaMismatch(_))
        ));
        assert!(matches!(
            Tuple::new(
                Arc::clone(&desc),
                vec![Field::Str("x".into()), Field::Str("y".into())]
            ),
            Err(StorageError::SchemaMismatch(_))
        ));
        assert!(matches!(
            Tuple::new(desc, vec![Field::Int(1), Field::Str("far too long".into())]),
            Err(StorageError::FieldTooLong { len: 12, max: 8 })
        ));
    }

    #[test]
    fn test_serialized_form_is_fixed_width() {
        let desc = people();
        let tuple = Tuple::new(Arc::clone(&desc), vec![Field::Int(-7), Field::Str("ann".into())])
            .unwrap();
        let mut bytes = Vec::new();
        tuple.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), desc.byte_width());
        assert_eq!(&bytes[0..4], &(-7i32).to_be_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_be_bytes());

        let read = Tuple::read_from(&desc, &mut Cursor::new(bytes)).unwrap();
        assert_eq!(read.fields(), tuple.fields());
    }

    #[test]
    fn test_rejects_oversized_string_length_on_read() {
        let desc = people();
        let mut bytes = vec![0u8; desc.byte_width()];
        bytes[4..8].copy_from_slice(&99u32.to_be_bytes());
        let err = Tuple::read_from(&desc, &mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
