use log::warn;
use winnow::binary::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, i8, u8};
use winnow::prelude::*;

use crate::classdesc::{ClassDesc, FieldType};
use crate::content::{ArrayData, Content, Instance, InstanceRef, NativeValue, Value};
use crate::cursor::DataCursor;
use crate::errors::StreamError;
use crate::parser::{JavaStreamParser, Marker};
use crate::transform::{InstanceLoader, Transformer};

/// Built-in mappings from well-known Java classes to native values.
///
/// Covers the common collections, the boxed primitives and the
/// `java.time.Ser` envelope. Recognition is by exact class name.
pub struct DefaultTransformer;

impl Transformer for DefaultTransformer {
    fn instance_loader(&self, classdesc: &ClassDesc) -> Option<Box<dyn InstanceLoader>> {
        classdesc.name.as_deref().and_then(loader_for)
    }
}

/// Whether the default transformer has a mapping for this class name.
pub fn is_known_class(name: &str) -> bool {
    loader_for(name).is_some()
}

fn loader_for(name: &str) -> Option<Box<dyn InstanceLoader>> {
    let loader: Box<dyn InstanceLoader> = match name {
        "java.util.ArrayList" | "java.util.LinkedList" => Box::new(ListLoader),
        "java.util.HashMap" | "java.util.TreeMap" => Box::new(MapLoader),
        "java.util.LinkedHashMap" => Box::new(LinkedHashMapLoader),
        // the first annotation entry is the capacity block, TreeSet also
        // writes its size before the elements
        "java.util.HashSet" | "java.util.LinkedHashSet" => Box::new(SetLoader { skip: 1 }),
        "java.util.TreeSet" => Box::new(SetLoader { skip: 2 }),
        "java.lang.Boolean" | "java.lang.Integer" | "java.lang.Long" => Box::new(BoxedValueLoader),
        "java.time.Ser" => Box::new(TimeLoader),
        _ => return None,
    };
    Some(loader)
}

const LIST_CLASSES: [&str; 2] = ["java.util.ArrayList", "java.util.LinkedList"];
const MAP_CLASSES: [&str; 2] = ["java.util.HashMap", "java.util.TreeMap"];
const SET_CLASSES: [&str; 3] = [
    "java.util.HashSet",
    "java.util.LinkedHashSet",
    "java.util.TreeSet",
];

fn annotations_for<'i>(instance: &'i Instance, classes: &[&str]) -> Option<&'i [Content]> {
    instance
        .annotations
        .iter()
        .find(|(cd, _)| {
            cd.borrow()
                .name
                .as_deref()
                .is_some_and(|name| classes.contains(&name))
        })
        .map(|(_, annotations)| annotations.as_slice())
}

/// `java.util.ArrayList` / `java.util.LinkedList`: the elements are the
/// annotation entries after the capacity block.
struct ListLoader;

impl InstanceLoader for ListLoader {
    fn load_from_instance(&self, instance: &Instance) -> Option<NativeValue> {
        let annotations = annotations_for(instance, &LIST_CLASSES)?;
        Some(NativeValue::List(
            annotations.get(1..).unwrap_or_default().to_vec(),
        ))
    }
}

/// `java.util.HashMap` / `java.util.TreeMap`: annotation entries after the
/// header pair up as key, value, key, value in wire order.
struct MapLoader;

impl InstanceLoader for MapLoader {
    fn load_from_instance(&self, instance: &Instance) -> Option<NativeValue> {
        let annotations = annotations_for(instance, &MAP_CLASSES)?;
        let pairs = annotations
            .get(1..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Some(NativeValue::Map(pairs))
    }
}

/// `java.util.LinkedHashMap` writes its entries through block data: bucket
/// count, size, then `size` key/value pairs, closed by an end-of-block-data
/// code and a zero byte.
struct LinkedHashMapLoader;

impl InstanceLoader for LinkedHashMapLoader {
    fn load_from_blockdata(
        &self,
        parser: &mut JavaStreamParser<'_>,
        instance: &InstanceRef,
    ) -> Result<bool, StreamError> {
        let _buckets = parser.cursor().read_int()?;
        let size = parser.cursor().read_int()?.max(0);

        let mut pairs = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let key_code = parser.cursor().read_ubyte()?;
            let key = parser.read_content(key_code, true, None)?;
            let value_code = parser.cursor().read_ubyte()?;
            let value = parser.read_content(value_code, true, None)?;
            pairs.push((key, value));
        }

        let offset = parser.cursor().tell();
        let end_code = parser.cursor().read_ubyte()?;
        if Marker::from_byte(end_code) != Some(Marker::EndBlockData) {
            return Err(StreamError::InvalidStructure {
                reason: "missing end of block data after map entries",
                offset,
            });
        }

        let offset = parser.cursor().tell();
        let trailer = parser.cursor().read_ubyte()?;
        if trailer != 0 {
            return Err(StreamError::InvalidStructure {
                reason: "missing trailing zero byte after map entries",
                offset,
            });
        }

        instance.borrow_mut().native = Some(NativeValue::Map(pairs));
        Ok(true)
    }
}

/// `java.util.HashSet` and friends: annotation entries after `skip` header
/// items are the elements.
struct SetLoader {
    skip: usize,
}

impl InstanceLoader for SetLoader {
    fn load_from_instance(&self, instance: &Instance) -> Option<NativeValue> {
        let annotations = annotations_for(instance, &SET_CLASSES)?;
        Some(NativeValue::Set(
            annotations.get(self.skip..).unwrap_or_default().to_vec(),
        ))
    }
}

/// `java.lang.Boolean` / `Integer` / `Long`: copy the single declared
/// `value` field.
struct BoxedValueLoader;

impl InstanceLoader for BoxedValueLoader {
    fn load_from_instance(&self, instance: &Instance) -> Option<NativeValue> {
        for (_, values) in &instance.field_data {
            for (field, value) in values {
                if field.name == "value" {
                    return match value {
                        Value::Boolean(v) => Some(NativeValue::Boolean(*v)),
                        Value::Int(v) => Some(NativeValue::Int(*v)),
                        Value::Long(v) => Some(NativeValue::Long(*v)),
                        _ => None,
                    };
                }
            }
        }
        None
    }
}

/// `java.time.Ser`: the externalizable envelope of the whole `java.time`
/// package. The payload arrives as the first annotation block; the
/// block-data hook itself has nothing to consume.
struct TimeLoader;

impl InstanceLoader for TimeLoader {
    fn load_from_blockdata(
        &self,
        _parser: &mut JavaStreamParser<'_>,
        _instance: &InstanceRef,
    ) -> Result<bool, StreamError> {
        Ok(true)
    }

    fn load_from_instance(&self, instance: &Instance) -> Option<NativeValue> {
        let annotations = annotations_for(instance, &["java.time.Ser"])?;
        let Some(Content::BlockData(block)) = annotations.first() else {
            warn!("java.time.Ser without a leading block data annotation");
            return None;
        };

        match JavaTime::from_block(&block.data) {
            Ok(time) => Some(NativeValue::Time(time)),
            Err(err) => {
                warn!("unreadable java.time payload: {err}");
                None
            }
        }
    }
}

/// Discriminator of a `java.time.Ser` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Duration = 1,
    Instant = 2,
    LocalDate = 3,
    LocalTime = 4,
    LocalDateTime = 5,
    ZonedDateTime = 6,
    ZoneRegion = 7,
    ZoneOffset = 8,
    OffsetTime = 9,
    OffsetDateTime = 10,
    Year = 11,
    YearMonth = 12,
    MonthDay = 13,
    Period = 14,
}

impl TimeKind {
    fn from_discriminator(value: i8) -> Option<TimeKind> {
        Some(match value {
            1 => TimeKind::Duration,
            2 => TimeKind::Instant,
            3 => TimeKind::LocalDate,
            4 => TimeKind::LocalTime,
            5 => TimeKind::LocalDateTime,
            6 => TimeKind::ZonedDateTime,
            7 => TimeKind::ZoneRegion,
            8 => TimeKind::ZoneOffset,
            9 => TimeKind::OffsetTime,
            10 => TimeKind::OffsetDateTime,
            11 => TimeKind::Year,
            12 => TimeKind::YearMonth,
            13 => TimeKind::MonthDay,
            14 => TimeKind::Period,
            _ => return None,
        })
    }
}

/// A decoded `java.time` value. Which fields are set depends on [TimeKind].
#[derive(Debug, Clone)]
pub struct JavaTime {
    pub kind: TimeKind,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub day: Option<i32>,
    pub hour: Option<i32>,
    pub minute: Option<i32>,
    pub second: Option<i64>,
    pub nano: Option<i32>,
    /// Zone offset in seconds.
    pub offset: Option<i32>,
    pub zone: Option<String>,
}

impl JavaTime {
    fn new(kind: TimeKind) -> JavaTime {
        JavaTime {
            kind,
            year: None,
            month: None,
            day: None,
            hour: None,
            minute: None,
            second: None,
            nano: None,
            offset: None,
            zone: None,
        }
    }

    /// Decodes one `java.time.Ser` payload: a one-byte discriminator, then
    /// the per-kind field layout.
    pub fn from_block(data: &[u8]) -> Result<JavaTime, StreamError> {
        let mut cursor = DataCursor::new(data);
        let discriminator = cursor.read_byte()?;
        let kind = TimeKind::from_discriminator(discriminator).ok_or(
            StreamError::InvalidStructure {
                reason: "unknown time discriminator",
                offset: 0,
            },
        )?;

        let mut time = JavaTime::new(kind);
        match kind {
            TimeKind::Duration | TimeKind::Instant => {
                time.second = Some(cursor.read_long()?);
                time.nano = Some(cursor.read_int()?);
            }
            TimeKind::LocalDate => time.read_date(&mut cursor)?,
            TimeKind::LocalTime => time.read_time(&mut cursor)?,
            TimeKind::LocalDateTime => {
                time.read_date(&mut cursor)?;
                time.read_time(&mut cursor)?;
            }
            TimeKind::ZonedDateTime => {
                time.read_date(&mut cursor)?;
                time.read_time(&mut cursor)?;
                time.read_offset(&mut cursor)?;
                time.read_region(&mut cursor)?;
            }
            TimeKind::ZoneRegion => time.read_region(&mut cursor)?,
            TimeKind::ZoneOffset => time.read_offset(&mut cursor)?,
            TimeKind::OffsetTime => {
                time.read_time(&mut cursor)?;
                time.read_offset(&mut cursor)?;
            }
            TimeKind::OffsetDateTime => {
                time.read_date(&mut cursor)?;
                time.read_time(&mut cursor)?;
                time.read_offset(&mut cursor)?;
            }
            TimeKind::Year => time.year = Some(cursor.read_int()?),
            TimeKind::YearMonth => {
                time.year = Some(cursor.read_int()?);
                time.month = Some(cursor.read_byte()? as i32);
            }
            TimeKind::MonthDay => {
                time.month = Some(cursor.read_byte()? as i32);
                time.day = Some(cursor.read_byte()? as i32);
            }
            TimeKind::Period => {
                time.year = Some(cursor.read_int()?);
                time.month = Some(cursor.read_int()?);
                time.day = Some(cursor.read_int()?);
            }
        }

        Ok(time)
    }

    fn read_date(&mut self, cursor: &mut DataCursor<'_>) -> Result<(), StreamError> {
        self.year = Some(cursor.read_int()?);
        self.month = Some(cursor.read_byte()? as i32);
        self.day = Some(cursor.read_byte()? as i32);
        Ok(())
    }

    // A negative byte means "the inverted value, and everything finer is
    // zero", which is how the producer compresses round times.
    fn read_time(&mut self, cursor: &mut DataCursor<'_>) -> Result<(), StreamError> {
        let mut hour = cursor.read_byte()?;
        let mut minute = 0i8;
        let mut second = 0i8;
        let mut nano = 0i32;

        if hour < 0 {
            hour = !hour;
        } else {
            minute = cursor.read_byte()?;
            if minute < 0 {
                minute = !minute;
            } else {
                second = cursor.read_byte()?;
                if second < 0 {
                    second = !second;
                } else {
                    nano = cursor.read_int()?;
                }
            }
        }

        self.hour = Some(hour as i32);
        self.minute = Some(minute as i32);
        self.second = Some(second as i64);
        self.nano = Some(nano);
        Ok(())
    }

    fn read_offset(&mut self, cursor: &mut DataCursor<'_>) -> Result<(), StreamError> {
        let offset_byte = cursor.read_byte()?;
        self.offset = Some(if offset_byte == 127 {
            cursor.read_int()?
        } else {
            offset_byte as i32 * 900
        });
        Ok(())
    }

    fn read_region(&mut self, cursor: &mut DataCursor<'_>) -> Result<(), StreamError> {
        let (zone, _) = cursor.read_utf()?;
        self.zone = Some(zone);
        Ok(())
    }
}

/// Bulk-reads primitive arrays into dense typed buffers. Attached by the
/// front-end when the caller asks for dense arrays; reference arrays are
/// left to the element-by-element decoder.
pub struct DenseArrayTransformer;

impl Transformer for DenseArrayTransformer {
    fn load_array(
        &self,
        cursor: &mut DataCursor<'_>,
        element_type: FieldType,
        size: usize,
    ) -> Result<Option<ArrayData>, StreamError> {
        Ok(Some(match element_type {
            FieldType::Boolean => ArrayData::Boolean(cursor.read_repeated(size, u8.map(|b| b != 0))?),
            FieldType::Byte => ArrayData::Byte(cursor.read_repeated(size, i8)?),
            FieldType::Char => ArrayData::Char(cursor.read_repeated(size, be_u16)?),
            FieldType::Short => ArrayData::Short(cursor.read_repeated(size, be_i16)?),
            FieldType::Int => ArrayData::Int(cursor.read_repeated(size, be_i32)?),
            FieldType::Long => ArrayData::Long(cursor.read_repeated(size, be_i64)?),
            FieldType::Float => ArrayData::Float(cursor.read_repeated(size, be_f32)?),
            FieldType::Double => ArrayData::Double(cursor.read_repeated(size, be_f64)?),
            FieldType::Object | FieldType::Array => return Ok(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::classdesc::{ClassDescKind, ClassDescRef, Field};
    use crate::content::JavaString;
    use crate::handles::Handle;

    fn desc(name: &str) -> ClassDescRef {
        let mut desc = ClassDesc::new(ClassDescKind::Normal, Handle::BASE);
        desc.name = Some(name.to_owned());
        Rc::new(RefCell::new(desc))
    }

    fn string(value: &str) -> Content {
        Content::String(Rc::new(JavaString {
            handle: Handle(0x7E0001),
            value: value.to_owned(),
            length: value.chars().count(),
        }))
    }

    fn block(data: &[u8]) -> Content {
        Content::BlockData(Rc::new(crate::content::BlockData::new(data.to_vec())))
    }

    #[test]
    fn known_classes_are_recognised() {
        assert!(is_known_class("java.util.HashMap"));
        assert!(is_known_class("java.time.Ser"));
        assert!(!is_known_class("com.example.Custom"));
    }

    #[test]
    fn list_loader_drops_the_capacity_block() {
        let classdesc = desc("java.util.ArrayList");
        let mut instance = Instance::new(Handle(0x7E0002), classdesc.clone());
        instance.annotations.push((
            classdesc,
            vec![block(&[0, 0, 0, 10]), string("a"), string("b")],
        ));

        match ListLoader.load_from_instance(&instance) {
            Some(NativeValue::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].as_str(), Some("a"));
                assert_eq!(items[1].as_str(), Some("b"));
            }
            other => panic!("expected a list, got {other:?}"),
        }
    }

    #[test]
    fn map_loader_pairs_entries_in_wire_order() {
        let classdesc = desc("java.util.HashMap");
        let mut instance = Instance::new(Handle(0x7E0002), classdesc.clone());
        instance.annotations.push((
            classdesc,
            vec![block(&[0; 8]), string("k1"), string("v1"), string("k2"), string("v2")],
        ));

        match MapLoader.load_from_instance(&instance) {
            Some(NativeValue::Map(pairs)) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.as_str(), Some("k1"));
                assert_eq!(pairs[0].1.as_str(), Some("v1"));
                assert_eq!(pairs[1].0.as_str(), Some("k2"));
            }
            other => panic!("expected a map, got {other:?}"),
        }
    }

    #[test]
    fn tree_set_skips_the_stored_size() {
        let classdesc = desc("java.util.TreeSet");
        let mut instance = Instance::new(Handle(0x7E0002), classdesc.clone());
        instance.annotations.push((
            classdesc,
            vec![Content::Null, block(&[0, 0, 0, 1]), string("only")],
        ));

        match (SetLoader { skip: 2 }).load_from_instance(&instance) {
            Some(NativeValue::Set(items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].as_str(), Some("only"));
            }
            other => panic!("expected a set, got {other:?}"),
        }
    }

    #[test]
    fn boxed_value_loader_copies_the_value_field() {
        let classdesc = desc("java.lang.Integer");
        let mut instance = Instance::new(Handle(0x7E0002), classdesc.clone());
        instance.field_data.push((
            classdesc,
            vec![(
                Field {
                    type_tag: FieldType::Int,
                    name: "value".to_owned(),
                    class_name: None,
                },
                Value::Int(42),
            )],
        ));

        assert!(matches!(
            BoxedValueLoader.load_from_instance(&instance),
            Some(NativeValue::Int(42))
        ));
    }

    #[test]
    fn duration_payload() {
        let mut data = vec![1u8];
        data.extend_from_slice(&10i64.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());

        let time = JavaTime::from_block(&data).unwrap();
        assert_eq!(time.kind, TimeKind::Duration);
        assert_eq!(time.second, Some(10));
        assert_eq!(time.nano, Some(0));
        assert_eq!(time.hour, None);
    }

    #[test]
    fn local_time_folds_negative_bytes() {
        // hour 13, minute 37 stored inverted (0xDA == !37), the rest elided
        let time = JavaTime::from_block(&[4, 13, 0xDA]).unwrap();
        assert_eq!(time.hour, Some(13));
        assert_eq!(time.minute, Some(37));
        assert_eq!(time.second, Some(0));
        assert_eq!(time.nano, Some(0));

        // full precision
        let mut data = vec![4u8, 13, 37, 11];
        data.extend_from_slice(&999i32.to_be_bytes());
        let time = JavaTime::from_block(&data).unwrap();
        assert_eq!(time.second, Some(11));
        assert_eq!(time.nano, Some(999));

        // midnight: hour is stored inverted
        let time = JavaTime::from_block(&[4, !0i8 as u8]).unwrap();
        assert_eq!(time.hour, Some(0));
        assert_eq!(time.minute, Some(0));
    }

    #[test]
    fn zone_offset_uses_quarter_hours_and_the_escape_byte() {
        let time = JavaTime::from_block(&[8, 4]).unwrap();
        assert_eq!(time.offset, Some(3600));

        let mut data = vec![8u8, 127];
        data.extend_from_slice(&4500i32.to_be_bytes());
        let time = JavaTime::from_block(&data).unwrap();
        assert_eq!(time.offset, Some(4500));
    }

    #[test]
    fn zone_region_reads_a_utf_id() {
        let mut data = vec![7u8, 0, 13];
        data.extend_from_slice(b"Europe/Berlin");
        let time = JavaTime::from_block(&data).unwrap();
        assert_eq!(time.zone.as_deref(), Some("Europe/Berlin"));
    }

    #[test]
    fn period_uses_full_ints() {
        let mut data = vec![14u8];
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&2i32.to_be_bytes());
        data.extend_from_slice(&3i32.to_be_bytes());
        let time = JavaTime::from_block(&data).unwrap();
        assert_eq!(time.year, Some(1));
        assert_eq!(time.month, Some(2));
        assert_eq!(time.day, Some(3));
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        assert!(JavaTime::from_block(&[99]).is_err());
    }

    #[test]
    fn dense_transformer_reads_primitives_and_declines_references() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        let mut cursor = DataCursor::new(&data);
        match DenseArrayTransformer
            .load_array(&mut cursor, FieldType::Int, 2)
            .unwrap()
        {
            Some(ArrayData::Int(values)) => assert_eq!(values, vec![1, 2]),
            other => panic!("expected ints, got {other:?}"),
        }

        let mut cursor = DataCursor::new(&[]);
        assert!(
            DenseArrayTransformer
                .load_array(&mut cursor, FieldType::Object, 0)
                .unwrap()
                .is_none()
        );
    }
}
