use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::classdesc::{ClassDescRef, Field, FieldType};
use crate::defaults::JavaTime;
use crate::handles::Handle;

/// Shared, interior-mutable reference to an instance.
///
/// Instances are registered before their field data is read, so a field can
/// legally point back at the instance being built.
pub type InstanceRef = Rc<RefCell<Instance>>;

/// One decoded item from the stream.
///
/// Contents are cheap to clone: the payloads are reference counted, and a
/// clone preserves node identity. Two references to the same handle compare
/// equal with `Rc::ptr_eq` on their payloads.
#[derive(Clone)]
pub enum Content {
    /// Absence marker (`NULL`).
    Null,
    String(Rc<JavaString>),
    ClassDesc(ClassDescRef),
    /// A reified class object (`CLASS`).
    Class(Rc<JavaClass>),
    Enum(Rc<JavaEnum>),
    Instance(InstanceRef),
    Array(Rc<RefCell<JavaArray>>),
    /// Raw block data; the only content kind without a handle.
    BlockData(Rc<BlockData>),
    /// A top-level item that the producer wrote as a thrown exception.
    Exception(Rc<ExceptionState>),
}

impl Content {
    /// The node's handle, if the variant is handleable.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Content::Null | Content::BlockData(_) => None,
            Content::String(s) => Some(s.handle),
            Content::ClassDesc(cd) => Some(cd.borrow().handle),
            Content::Class(c) => Some(c.handle),
            Content::Enum(e) => Some(e.handle),
            Content::Instance(i) => Some(i.borrow().handle),
            Content::Array(a) => Some(a.borrow().handle),
            Content::Exception(e) => Some(e.handle),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Content::Null)
    }

    /// Whether this node was marked as a thrown exception. Only instances
    /// can carry the mark.
    pub fn is_exception(&self) -> bool {
        match self {
            Content::Instance(i) => i.borrow().is_exception,
            _ => false,
        }
    }

    pub fn as_string(&self) -> Option<&Rc<JavaString>> {
        match self {
            Content::String(s) => Some(s),
            _ => None,
        }
    }

    /// Shortcut to the text of a string node.
    pub fn as_str(&self) -> Option<&str> {
        self.as_string().map(|s| s.value.as_str())
    }

    pub fn as_classdesc(&self) -> Option<&ClassDescRef> {
        match self {
            Content::ClassDesc(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<JavaClass>> {
        match self {
            Content::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Rc<JavaEnum>> {
        match self {
            Content::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceRef> {
        match self {
            Content::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<RefCell<JavaArray>>> {
        match self {
            Content::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_block_data(&self) -> Option<&Rc<BlockData>> {
        match self {
            Content::BlockData(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&Rc<ExceptionState>> {
        match self {
            Content::Exception(e) => Some(e),
            _ => None,
        }
    }
}

// Contents form arbitrary graphs, cycles included, so the representation
// stays shallow: one line per node, children by handle only.
impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Null => write!(f, "Null"),
            Content::String(s) => write!(f, "String({}: {:?})", s.handle, s.value),
            Content::ClassDesc(cd) => match cd.try_borrow() {
                Ok(cd) => write!(f, "ClassDesc({}: {})", cd.handle, cd.display_name()),
                Err(_) => write!(f, "ClassDesc(<in construction>)"),
            },
            Content::Class(c) => write!(f, "Class({})", c.handle),
            Content::Enum(e) => write!(f, "Enum({}: {})", e.handle, e.value.value),
            Content::Instance(i) => match i.try_borrow() {
                Ok(i) => write!(f, "Instance({}: {})", i.handle, i.class_name()),
                Err(_) => write!(f, "Instance(<in construction>)"),
            },
            Content::Array(a) => match a.try_borrow() {
                Ok(a) => write!(f, "Array({}: {} items)", a.handle, a.data.len()),
                Err(_) => write!(f, "Array(<in construction>)"),
            },
            Content::BlockData(b) => write!(f, "BlockData({} bytes)", b.data.len()),
            Content::Exception(e) => write!(f, "Exception({})", e.handle),
        }
    }
}

/// A decoded Java string.
#[derive(Debug, Clone)]
pub struct JavaString {
    pub handle: Handle,
    pub value: String,
    /// Codepoint count reported by the modified UTF-8 decoder. This is what
    /// `String.length()` would have returned for BMP-only text; surrogate
    /// pairs decode to a single codepoint here.
    pub length: usize,
}

impl fmt::Display for JavaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A reified class object.
#[derive(Debug)]
pub struct JavaClass {
    pub handle: Handle,
    pub classdesc: ClassDescRef,
}

impl JavaClass {
    pub fn name(&self) -> Option<String> {
        self.classdesc.borrow().name.clone()
    }
}

/// An enumeration constant.
#[derive(Debug)]
pub struct JavaEnum {
    pub handle: Handle,
    pub classdesc: ClassDescRef,
    /// The constant's name. The string is registered under its own handle,
    /// distinct from the enum's.
    pub value: Rc<JavaString>,
}

/// Dense element storage for arrays.
///
/// Primitive arrays store their values directly; reference arrays store
/// content nodes (which may include `Null` entries and back-references).
#[derive(Debug, Clone)]
pub enum ArrayData {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Object(Vec<Content>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Boolean(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded Java array.
#[derive(Debug)]
pub struct JavaArray {
    pub handle: Handle,
    pub classdesc: ClassDescRef,
    pub element_type: FieldType,
    pub data: ArrayData,
}

/// The value of one instance field or one array element.
#[derive(Debug, Clone)]
pub enum Value {
    Byte(i8),
    Char(u16),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(Content),
}

impl Value {
    pub fn as_content(&self) -> Option<&Content> {
        match self {
            Value::Object(content) => Some(content),
            _ => None,
        }
    }
}

/// Native rendering of a well-known Java class, produced by a transformer.
#[derive(Debug)]
pub enum NativeValue {
    List(Vec<Content>),
    /// Key/value pairs in wire order. Content nodes are not hashable, so
    /// maps stay as ordered pair lists.
    Map(Vec<(Content, Content)>),
    Set(Vec<Content>),
    Boolean(bool),
    Int(i32),
    Long(i64),
    Time(JavaTime),
}

/// An instance of a Java object.
pub struct Instance {
    pub handle: Handle,
    pub classdesc: ClassDescRef,

    /// Field values per class level, walked super class first. The entry
    /// order matches `classdesc::hierarchy`.
    pub field_data: Vec<(ClassDescRef, Vec<(Field, Value)>)>,

    /// Annotation streams per class level, in the same order.
    pub annotations: Vec<(ClassDescRef, Vec<Content>)>,

    /// Set when a user transformer claimed this instance for a class the
    /// default transformer does not recognise. Such classes get their
    /// `writeObject` levels read as plain annotation streams.
    pub is_external: bool,

    /// Set when the instance was written through the `EXCEPTION` wrapper.
    pub is_exception: bool,

    /// Native rendering supplied by the instance's loader, if any.
    pub native: Option<NativeValue>,
}

impl Instance {
    pub fn new(handle: Handle, classdesc: ClassDescRef) -> Instance {
        Instance {
            handle,
            classdesc,
            field_data: Vec::new(),
            annotations: Vec::new(),
            is_external: false,
            is_exception: false,
            native: None,
        }
    }

    pub fn class_name(&self) -> String {
        self.classdesc.borrow().display_name()
    }

    /// Looks a field value up by name, walking the hierarchy top-down.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.field_data
            .iter()
            .flat_map(|(_, values)| values.iter())
            .find(|(field, _)| field.name == name)
            .map(|(_, value)| value)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({}: {})", self.handle, self.class_name())
    }
}

/// A top-level item the producer wrote through the `EXCEPTION` wrapper.
#[derive(Debug)]
pub struct ExceptionState {
    /// Same handle as the wrapped content.
    pub handle: Handle,
    pub content: Content,
    /// The raw bytes of the whole top-level item, from its first tag byte to
    /// the position where parsing of the wrapped object finished.
    pub raw_bytes: Vec<u8>,
}

impl ExceptionState {
    pub fn new(content: Content, raw_bytes: Vec<u8>) -> ExceptionState {
        ExceptionState {
            handle: content.handle().unwrap_or(Handle(0)),
            content,
            raw_bytes,
        }
    }
}

/// Raw bytes written between objects by `writeObject`'s block-data mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub data: Vec<u8>,
}

impl BlockData {
    pub fn new(data: Vec<u8>) -> BlockData {
        BlockData { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classdesc::{ClassDesc, ClassDescKind};

    fn desc(name: &str) -> ClassDescRef {
        let mut desc = ClassDesc::new(ClassDescKind::Normal, Handle::BASE);
        desc.name = Some(name.to_owned());
        Rc::new(RefCell::new(desc))
    }

    #[test]
    fn accessors_match_variants() {
        let string = Content::String(Rc::new(JavaString {
            handle: Handle(0x7E0001),
            value: "abc".to_owned(),
            length: 3,
        }));
        assert_eq!(string.as_str(), Some("abc"));
        assert_eq!(string.handle(), Some(Handle(0x7E0001)));
        assert!(string.as_instance().is_none());
        assert!(!string.is_exception());

        assert!(Content::Null.is_null());
        assert_eq!(Content::Null.handle(), None);
    }

    #[test]
    fn field_lookup_walks_all_class_levels() {
        let classdesc = desc("com.example.Widget");
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

        assert!(matches!(instance.field("value"), Some(Value::Int(42))));
        assert!(instance.field("missing").is_none());
    }

    #[test]
    fn debug_output_stays_shallow_on_cycles() {
        let classdesc = desc("com.example.Node");
        let instance = Rc::new(RefCell::new(Instance::new(
            Handle(0x7E0001),
            classdesc.clone(),
        )));
        let content = Content::Instance(instance.clone());

        // point the instance's only field back at itself
        instance.borrow_mut().field_data.push((
            classdesc,
            vec![(
                Field {
                    type_tag: FieldType::Object,
                    name: "next".to_owned(),
                    class_name: None,
                },
                Value::Object(content.clone()),
            )],
        ));

        let rendered = format!("{content:?}");
        assert!(rendered.contains("com.example.Node"));
    }
}
