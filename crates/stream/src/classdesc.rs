use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use bitflags::bitflags;
use log::warn;
use smallvec::SmallVec;

use crate::content::{Content, JavaString};
use crate::errors::StreamError;
use crate::handles::Handle;

/// Shared, interior-mutable reference to a class descriptor.
///
/// Descriptors are registered in the handle table before their fields,
/// annotations and super class are parsed, so later records (including the
/// descriptor's own children) can point back at them.
pub type ClassDescRef = Rc<RefCell<ClassDesc>>;

bitflags! {
    /// Class description flag byte.
    ///
    /// `WRITE_METHOD` is meaningful for serializable classes, `BLOCK_DATA`
    /// for externalizable ones. Unknown bits are retained as read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescFlags: u8 {
        /// `SC_WRITE_METHOD (0x01)`: the class has a custom `writeObject`.
        const WRITE_METHOD = 0x01;

        /// `SC_SERIALIZABLE (0x02)`: field values follow the descriptor.
        const SERIALIZABLE = 0x02;

        /// `SC_EXTERNALIZABLE (0x04)`: the class writes an opaque payload.
        const EXTERNALIZABLE = 0x04;

        /// `SC_BLOCK_DATA (0x08)`: externalizable payload uses block data.
        const BLOCK_DATA = 0x08;

        /// `SC_ENUM (0x10)`: the class is an enumeration.
        const ENUM = 0x10;
    }
}

/// How the data of one class level in an instance record is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDataType {
    /// Serializable without a write method: declared field values only.
    NoWriteMethod,

    /// Serializable with a write method: field values, then an annotation
    /// stream.
    WriteMethod,

    /// Externalizable without block data: raw bytes only the class itself
    /// could interpret.
    ExternalContents,

    /// Externalizable with block data or a write method: an annotation
    /// stream, usually opened through the block-data hook.
    ObjectAnnotation,
}

/// Type tag of a class field, one character of a JVM type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Byte = b'B',
    Char = b'C',
    Double = b'D',
    Float = b'F',
    Int = b'I',
    Long = b'J',
    Short = b'S',
    Boolean = b'Z',
    Object = b'L',
    Array = b'[',
}

impl FieldType {
    /// Maps a type-descriptor character to its field type.
    pub fn from_type_code(code: u8) -> Option<FieldType> {
        match code {
            b'B' => Some(FieldType::Byte),
            b'C' => Some(FieldType::Char),
            b'D' => Some(FieldType::Double),
            b'F' => Some(FieldType::Float),
            b'I' => Some(FieldType::Int),
            b'J' => Some(FieldType::Long),
            b'S' => Some(FieldType::Short),
            b'Z' => Some(FieldType::Boolean),
            b'L' => Some(FieldType::Object),
            b'[' => Some(FieldType::Array),
            _ => None,
        }
    }

    #[inline]
    pub fn type_code(self) -> u8 {
        self as u8
    }

    /// `true` for every type read inline from the stream, `false` for
    /// object and array references.
    #[inline]
    pub fn is_primitive(self) -> bool {
        !matches!(self, FieldType::Object | FieldType::Array)
    }
}

/// A declared field in a class description.
///
/// `class_name` is present only for object and array fields, where the wire
/// format follows the field name with a string record holding the declared
/// type descriptor.
#[derive(Debug, Clone)]
pub struct Field {
    pub type_tag: FieldType,
    pub name: String,
    pub class_name: Option<Rc<JavaString>>,
}

/// Whether a descriptor came from a `CLASSDESC` or a `PROXYCLASSDESC`
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassDescKind {
    Normal,
    Proxy,
}

/// Description of a class, preceding every instance of it in the stream.
pub struct ClassDesc {
    pub kind: ClassDescKind,

    /// Dotted class name. Proxy descriptors have none.
    pub name: Option<String>,

    pub serial_version_uid: i64,

    pub handle: Handle,

    pub flags: DescFlags,

    /// Declared fields in wire order; this order is also the read order for
    /// instance data of this class level.
    pub fields: Vec<Field>,

    /// Contents of the class annotation stream.
    pub annotations: Vec<Content>,

    pub super_class: Option<ClassDescRef>,

    /// Set when this descriptor was reached as another descriptor's super
    /// class.
    pub is_super_class: bool,

    /// Interface names, for proxy descriptors.
    pub interfaces: Vec<String>,

    /// Enum literals observed for this class.
    pub enum_constants: AHashSet<String>,
}

impl ClassDesc {
    pub fn new(kind: ClassDescKind, handle: Handle) -> ClassDesc {
        ClassDesc {
            kind,
            name: None,
            serial_version_uid: 0,
            handle,
            flags: DescFlags::empty(),
            fields: Vec::new(),
            annotations: Vec::new(),
            super_class: None,
            is_super_class: false,
            interfaces: Vec::new(),
            enum_constants: AHashSet::new(),
        }
    }

    /// Derives how instance data for this class level is laid out.
    pub fn data_type(&self) -> Result<ClassDataType, StreamError> {
        if self.flags.contains(DescFlags::SERIALIZABLE) {
            Ok(if self.flags.contains(DescFlags::WRITE_METHOD) {
                ClassDataType::WriteMethod
            } else {
                ClassDataType::NoWriteMethod
            })
        } else if self.flags.contains(DescFlags::EXTERNALIZABLE) {
            Ok(
                if self
                    .flags
                    .intersects(DescFlags::WRITE_METHOD | DescFlags::BLOCK_DATA)
                {
                    ClassDataType::ObjectAnnotation
                } else {
                    ClassDataType::ExternalContents
                },
            )
        } else {
            Err(StreamError::InvalidClassDesc(
                "class is neither serializable nor externalizable",
            ))
        }
    }

    /// Checks the flag combinations forbidden by the protocol.
    pub fn validate(&self) -> Result<(), StreamError> {
        let serial_or_extern = DescFlags::SERIALIZABLE | DescFlags::EXTERNALIZABLE;
        if !self.flags.intersects(serial_or_extern) && !self.fields.is_empty() {
            return Err(StreamError::InvalidClassDesc(
                "non-serializable, non-externalizable class declares fields",
            ));
        }

        if self.flags.contains(serial_or_extern) {
            return Err(StreamError::InvalidClassDesc(
                "class is both serializable and externalizable",
            ));
        }

        if self.flags.contains(DescFlags::ENUM) {
            if !self.fields.is_empty() || !self.interfaces.is_empty() {
                return Err(StreamError::InvalidClassDesc(
                    "enum class declares fields or interfaces",
                ));
            }
        } else if !self.enum_constants.is_empty() {
            return Err(StreamError::InvalidClassDesc(
                "non-enum class has enum constants",
            ));
        }

        Ok(())
    }

    /// Whether the descriptor names an array class (`[I`, `[Ljava.lang.Object;`, ...).
    pub fn is_array_class(&self) -> bool {
        self.name.as_deref().is_some_and(|name| name.starts_with('['))
    }

    /// Name to show in diagnostics when the descriptor might be a proxy.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<proxy>".to_owned())
    }
}

impl fmt::Debug for ClassDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDesc")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("serial_version_uid", &self.serial_version_uid)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Collects the class hierarchy in the order instance data is stored: super
/// class first, then subclasses down to `desc` itself.
///
/// A proxy descriptor in the super chain is skipped, its field layout is
/// undefined in the protocol.
pub fn hierarchy(desc: &ClassDescRef) -> SmallVec<[ClassDescRef; 4]> {
    let mut classes = SmallVec::new();
    collect(desc, &mut classes);
    classes
}

fn collect(desc: &ClassDescRef, classes: &mut SmallVec<[ClassDescRef; 4]>) {
    let super_class = desc.borrow().super_class.clone();
    if let Some(super_class) = super_class {
        if super_class.borrow().kind == ClassDescKind::Proxy {
            warn!("hit a proxy class in a super class hierarchy, skipping it");
        } else {
            collect(&super_class, classes);
        }
    }
    classes.push(desc.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Handle;

    fn desc_with_flags(flags: u8) -> ClassDesc {
        let mut desc = ClassDesc::new(ClassDescKind::Normal, Handle::BASE);
        desc.flags = DescFlags::from_bits_retain(flags);
        desc
    }

    #[test]
    fn data_type_follows_the_flag_byte() {
        assert_eq!(
            desc_with_flags(0x02).data_type().unwrap(),
            ClassDataType::NoWriteMethod
        );
        assert_eq!(
            desc_with_flags(0x03).data_type().unwrap(),
            ClassDataType::WriteMethod
        );
        assert_eq!(
            desc_with_flags(0x04).data_type().unwrap(),
            ClassDataType::ExternalContents
        );
        assert_eq!(
            desc_with_flags(0x0C).data_type().unwrap(),
            ClassDataType::ObjectAnnotation
        );
        assert_eq!(
            desc_with_flags(0x05).data_type().unwrap(),
            ClassDataType::ObjectAnnotation
        );
        assert!(desc_with_flags(0x00).data_type().is_err());
    }

    #[test]
    fn serializable_and_externalizable_is_rejected() {
        assert!(desc_with_flags(0x06).validate().is_err());
        assert!(desc_with_flags(0x02).validate().is_ok());
    }

    #[test]
    fn plain_class_with_fields_is_rejected() {
        let mut desc = desc_with_flags(0x00);
        desc.fields.push(Field {
            type_tag: FieldType::Int,
            name: "value".to_owned(),
            class_name: None,
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn enum_constraints() {
        let mut desc = desc_with_flags(0x12);
        assert!(desc.validate().is_ok());

        desc.interfaces.push("java.lang.Comparable".to_owned());
        assert!(desc.validate().is_err());

        let mut plain = desc_with_flags(0x02);
        plain.enum_constants.insert("NORTH".to_owned());
        assert!(plain.validate().is_err());
    }

    #[test]
    fn field_type_codes_round_trip() {
        for code in [b'B', b'C', b'D', b'F', b'I', b'J', b'S', b'Z', b'L', b'['] {
            let ty = FieldType::from_type_code(code).unwrap();
            assert_eq!(ty.type_code(), code);
        }
        assert!(FieldType::from_type_code(b'Q').is_none());
        assert!(FieldType::Int.is_primitive());
        assert!(!FieldType::Array.is_primitive());
    }

    #[test]
    fn hierarchy_is_super_first_and_skips_proxies() {
        let root = Rc::new(RefCell::new(desc_with_flags(0x02)));
        root.borrow_mut().name = Some("java.lang.Object".to_owned());

        let proxy = Rc::new(RefCell::new(ClassDesc::new(
            ClassDescKind::Proxy,
            Handle(Handle::BASE.0 + 1),
        )));
        proxy.borrow_mut().super_class = Some(root.clone());

        let leaf = Rc::new(RefCell::new(desc_with_flags(0x02)));
        leaf.borrow_mut().name = Some("com.example.Leaf".to_owned());
        leaf.borrow_mut().super_class = Some(proxy.clone());

        // proxy super chain is cut off entirely
        let classes = hierarchy(&leaf);
        assert_eq!(classes.len(), 1);
        assert!(Rc::ptr_eq(&classes[0], &leaf));

        leaf.borrow_mut().super_class = Some(root.clone());
        let classes = hierarchy(&leaf);
        assert_eq!(classes.len(), 2);
        assert!(Rc::ptr_eq(&classes[0], &root));
        assert!(Rc::ptr_eq(&classes[1], &leaf));
    }
}
