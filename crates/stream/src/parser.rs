use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::classdesc::{
    self, ClassDataType, ClassDesc, ClassDescKind, ClassDescRef, DescFlags, Field, FieldType,
};
use crate::content::{
    ArrayData, BlockData, Content, ExceptionState, Instance, InstanceRef, JavaArray, JavaClass,
    JavaEnum, JavaString, Value,
};
use crate::cursor::DataCursor;
use crate::defaults::{self, DefaultTransformer, DenseArrayTransformer};
use crate::errors::StreamError;
use crate::handles::HandleTable;
use crate::transform::{InstanceLoader, Transformer};

/// First two bytes of every serialized stream.
pub const STREAM_MAGIC: u16 = 0xACED;

/// The only stream protocol version this crate reads.
pub const STREAM_VERSION: u16 = 0x0005;

/// Single-byte type codes driving the grammar.
///
/// Every content record starts with one of these. 0x7E doubles as the
/// documented upper bound of the code range; it is only ever an enum record
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Marker {
    Null = 0x70,
    Reference = 0x71,
    ClassDesc = 0x72,
    Object = 0x73,
    String = 0x74,
    Array = 0x75,
    Class = 0x76,
    BlockData = 0x77,
    EndBlockData = 0x78,
    Reset = 0x79,
    BlockDataLong = 0x7A,
    Exception = 0x7B,
    LongString = 0x7C,
    ProxyClassDesc = 0x7D,
    Enum = 0x7E,
}

impl Marker {
    pub fn from_byte(byte: u8) -> Option<Marker> {
        Some(match byte {
            0x70 => Marker::Null,
            0x71 => Marker::Reference,
            0x72 => Marker::ClassDesc,
            0x73 => Marker::Object,
            0x74 => Marker::String,
            0x75 => Marker::Array,
            0x76 => Marker::Class,
            0x77 => Marker::BlockData,
            0x78 => Marker::EndBlockData,
            0x79 => Marker::Reset,
            0x7A => Marker::BlockDataLong,
            0x7B => Marker::Exception,
            0x7C => Marker::LongString,
            0x7D => Marker::ProxyClassDesc,
            0x7E => Marker::Enum,
            _ => return None,
        })
    }

    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Recursive-descent decoder for one serialized stream.
///
/// The parser pulls type codes from the cursor, builds [Content] nodes,
/// threads identity through the handle table and delegates typed
/// construction to the registered transformers. One parser decodes one
/// stream; it is not reusable and not shareable across threads.
pub struct JavaStreamParser<'a> {
    cursor: DataCursor<'a>,
    transformers: Rc<Vec<Box<dyn Transformer>>>,
    handles: HandleTable,
}

impl<'a> JavaStreamParser<'a> {
    /// Parser over `data` with the given user transformers. The default
    /// transformer is always appended after them.
    pub fn new(data: &'a [u8], transformers: Vec<Box<dyn Transformer>>) -> JavaStreamParser<'a> {
        Self::with_options(data, transformers, false)
    }

    /// Like [JavaStreamParser::new]; `dense_arrays` additionally appends the
    /// bulk-reading array transformer.
    pub fn with_options(
        data: &'a [u8],
        mut transformers: Vec<Box<dyn Transformer>>,
        dense_arrays: bool,
    ) -> JavaStreamParser<'a> {
        transformers.push(Box::new(DefaultTransformer));
        if dense_arrays {
            transformers.push(Box::new(DenseArrayTransformer));
        }

        JavaStreamParser {
            cursor: DataCursor::new(data),
            transformers: Rc::new(transformers),
            handles: HandleTable::new(),
        }
    }

    /// The underlying cursor. Intended for transformers that consume raw
    /// bytes mid-parse.
    pub fn cursor(&mut self) -> &mut DataCursor<'a> {
        &mut self.cursor
    }

    /// The handle table, including archived epochs.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Parses the whole stream and returns its top-level contents.
    pub fn run(&mut self) -> Result<Vec<Content>, StreamError> {
        let magic = self.cursor.read_ushort()?;
        if magic != STREAM_MAGIC {
            return Err(StreamError::InvalidMagic(magic));
        }

        let version = self.cursor.read_ushort()?;
        if version != STREAM_VERSION {
            return Err(StreamError::InvalidVersion(version));
        }

        let mut contents = Vec::new();
        while !self.cursor.is_empty() {
            let start = self.cursor.tell();
            let byte = self.cursor.read_ubyte()?;
            if Marker::from_byte(byte) == Some(Marker::Reset) {
                self.handles.reset();
                continue;
            }

            let mut content = self.read_content(byte, true, None)?;
            debug!("read top-level content: {content:?}");

            if content.is_exception() {
                // keep the raw bytes of the whole item for post-mortem use
                let end = self.cursor.tell();
                let raw_bytes = self.cursor.span(start, end).to_vec();
                content = Content::Exception(Rc::new(ExceptionState::new(content, raw_bytes)));
            }

            contents.push(content);
        }

        for content in self.handles.contents() {
            if let Content::ClassDesc(classdesc) = content {
                classdesc.borrow().validate()?;
            }
        }
        self.handles.archive_current();

        Ok(contents)
    }

    /// Parses one content record whose type code was already consumed.
    ///
    /// `block_data` controls whether block-data records are legal at this
    /// point; `class_desc` is the enclosing class description, used to route
    /// unrecognised bytes to the custom-writeObject escape. Intended for
    /// transformers; everything else goes through [JavaStreamParser::run].
    pub fn read_content(
        &mut self,
        byte: u8,
        block_data: bool,
        class_desc: Option<&ClassDescRef>,
    ) -> Result<Content, StreamError> {
        match self.dispatch(byte, block_data, class_desc) {
            // a thrown exception unwinds to the nearest dispatcher and
            // becomes the result of the record that was being read
            Err(StreamError::ExceptionDuringRead(content)) => Ok(content),
            other => other,
        }
    }

    fn dispatch(
        &mut self,
        byte: u8,
        block_data: bool,
        class_desc: Option<&ClassDescRef>,
    ) -> Result<Content, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        let Some(marker) = Marker::from_byte(byte) else {
            return self.unknown_tag(byte, offset, class_desc);
        };

        if !block_data && matches!(marker, Marker::BlockData | Marker::BlockDataLong) {
            return Err(StreamError::InvalidStructure {
                reason: "block data is not allowed here",
                offset,
            });
        }

        match marker {
            Marker::Null => Ok(Content::Null),
            Marker::Reference => self.read_reference(),
            Marker::ClassDesc | Marker::ProxyClassDesc => Ok(self
                .read_classdesc_tagged(marker)?
                .map(Content::ClassDesc)
                .unwrap_or(Content::Null)),
            Marker::Object => self.read_object(),
            Marker::String | Marker::LongString => {
                self.read_new_string_tagged(marker).map(Content::String)
            }
            Marker::Array => self.read_array(),
            Marker::Class => self.read_class(),
            Marker::BlockData => self.read_block_data(false),
            Marker::BlockDataLong => self.read_block_data(true),
            Marker::Exception => self.read_exception(),
            Marker::Enum => self.read_enum(),
            // structural codes are consumed by the loops that expect them
            Marker::EndBlockData | Marker::Reset => self.unknown_tag(byte, offset, class_desc),
        }
    }

    /// No handler for this byte: either the enclosing class has a custom
    /// `writeObject` a transformer may know how to read, or the stream is
    /// broken.
    fn unknown_tag(
        &mut self,
        byte: u8,
        offset: usize,
        class_desc: Option<&ClassDescRef>,
    ) -> Result<Content, StreamError> {
        if let Some(class_desc) = class_desc {
            let (name, data_type) = {
                let classdesc = class_desc.borrow();
                (classdesc.name.clone(), classdesc.data_type().ok())
            };
            if let (Some(name), Some(ClassDataType::WriteMethod)) = (name, data_type) {
                return self.custom_read_object(&name);
            }
        }

        Err(StreamError::UnknownTag { tag: byte, offset })
    }

    /// Rewinds over the unrecognised byte and offers the payload to the
    /// transformers.
    fn custom_read_object(&mut self, class_name: &str) -> Result<Content, StreamError> {
        self.cursor.seek_relative(-1)?;
        let offset = self.cursor.tell();

        let transformers = Rc::clone(&self.transformers);
        for transformer in transformers.iter() {
            if let Some(content) = transformer.load_custom_data(self, class_name)? {
                return Ok(content);
            }
        }

        Err(StreamError::CustomReadObjectUnhandled {
            class: class_name.to_owned(),
            offset,
        })
    }

    fn read_reference(&mut self) -> Result<Content, StreamError> {
        let offset = self.cursor.tell();
        let handle = self.cursor.read_uint()?;
        self.handles.lookup(handle, offset)
    }

    /// Reads a class description record starting at its type code.
    fn read_classdesc(&mut self) -> Result<Option<ClassDescRef>, StreamError> {
        let offset = self.cursor.tell();
        let byte = self.cursor.read_ubyte()?;
        let marker = Marker::from_byte(byte).ok_or(StreamError::UnknownTag { tag: byte, offset })?;
        self.read_classdesc_tagged(marker)
    }

    fn read_classdesc_tagged(
        &mut self,
        marker: Marker,
    ) -> Result<Option<ClassDescRef>, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        match marker {
            Marker::ClassDesc => self.read_new_classdesc().map(Some),
            Marker::ProxyClassDesc => self.read_new_proxy_classdesc().map(Some),
            Marker::Null => Ok(None),
            Marker::Reference => {
                let content = self.read_reference()?;
                content
                    .as_classdesc()
                    .cloned()
                    .map(Some)
                    .ok_or(StreamError::InvalidStructure {
                        reason: "reference does not point to a class description",
                        offset,
                    })
            }
            _ => Err(StreamError::InvalidStructure {
                reason: "expected a class description record",
                offset,
            }),
        }
    }

    fn read_new_classdesc(&mut self) -> Result<ClassDescRef, StreamError> {
        let (name, _) = self.cursor.read_utf()?;
        let serial_version_uid = self.cursor.read_long()?;
        let handle = self.handles.allocate();
        debug!("reading class description {name} at handle {handle}");

        let desc = Rc::new(RefCell::new(ClassDesc::new(ClassDescKind::Normal, handle)));
        {
            let mut d = desc.borrow_mut();
            d.name = Some(name);
            d.serial_version_uid = serial_version_uid;
        }
        // referencable from here on, its own children included
        self.handles
            .register(handle, Content::ClassDesc(desc.clone()))?;

        desc.borrow_mut().flags = DescFlags::from_bits_retain(self.cursor.read_ubyte()?);

        let field_count = self.cursor.read_ushort()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let offset = self.cursor.tell();
            let type_byte = self.cursor.read_ubyte()?;
            let type_tag = FieldType::from_type_code(type_byte).ok_or(
                StreamError::InvalidFieldType {
                    tag: type_byte,
                    offset,
                },
            )?;
            let (field_name, _) = self.cursor.read_utf()?;
            let class_name = if type_tag.is_primitive() {
                None
            } else {
                Some(self.read_string_record()?)
            };
            fields.push(Field {
                type_tag,
                name: field_name,
                class_name,
            });
        }
        desc.borrow_mut().fields = fields;

        let annotations = self.read_class_annotations(Some(&desc))?;
        desc.borrow_mut().annotations = annotations;

        let super_class = self.read_classdesc()?;
        if let Some(super_class) = &super_class {
            super_class.borrow_mut().is_super_class = true;
        }
        desc.borrow_mut().super_class = super_class;

        Ok(desc)
    }

    fn read_new_proxy_classdesc(&mut self) -> Result<ClassDescRef, StreamError> {
        let handle = self.handles.allocate();
        let desc = Rc::new(RefCell::new(ClassDesc::new(ClassDescKind::Proxy, handle)));
        self.handles
            .register(handle, Content::ClassDesc(desc.clone()))?;

        let interface_count = self.cursor.read_uint()?;
        let mut interfaces = Vec::new();
        for _ in 0..interface_count {
            interfaces.push(self.cursor.read_utf()?.0);
        }
        desc.borrow_mut().interfaces = interfaces;

        let annotations = self.read_class_annotations(None)?;
        desc.borrow_mut().annotations = annotations;

        let super_class = self.read_classdesc()?;
        if let Some(super_class) = &super_class {
            super_class.borrow_mut().is_super_class = true;
        }
        desc.borrow_mut().super_class = super_class;

        Ok(desc)
    }

    /// Reads a `STRING`, `LONGSTRING` or `REFERENCE` record, starting at its
    /// type code.
    fn read_string_record(&mut self) -> Result<Rc<JavaString>, StreamError> {
        let offset = self.cursor.tell();
        let byte = self.cursor.read_ubyte()?;
        match Marker::from_byte(byte) {
            Some(marker @ (Marker::String | Marker::LongString | Marker::Reference)) => {
                self.read_new_string_tagged(marker)
            }
            _ => Err(StreamError::InvalidStructure {
                reason: "expected a string record",
                offset,
            }),
        }
    }

    fn read_new_string_tagged(&mut self, marker: Marker) -> Result<Rc<JavaString>, StreamError> {
        if marker == Marker::Reference {
            let offset = self.cursor.tell();
            let content = self.read_reference()?;
            return content
                .as_string()
                .cloned()
                .ok_or(StreamError::InvalidStructure {
                    reason: "reference does not point to a string",
                    offset,
                });
        }

        let handle = self.handles.allocate();
        let length = match marker {
            Marker::String => self.cursor.read_ushort()? as usize,
            _ => {
                let offset = self.cursor.tell();
                let length = self.cursor.read_long()?;
                if !(0..=i32::MAX as i64).contains(&length) {
                    return Err(StreamError::InvalidStringLength { length, offset });
                }
                if length < 65536 {
                    warn!("small string stored as a long string");
                }
                length as usize
            }
        };

        let (value, raw_length) = self.cursor.read_mutf8(length)?;
        let string = Rc::new(JavaString {
            handle,
            value,
            length: raw_length,
        });
        self.handles
            .register(handle, Content::String(string.clone()))?;
        Ok(string)
    }

    fn read_object(&mut self) -> Result<Content, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        let classdesc = self
            .read_classdesc()?
            .ok_or(StreamError::InvalidStructure {
                reason: "object without a class description",
                offset,
            })?;

        let handle = self.handles.allocate();
        debug!(
            "reading new object: handle {handle}, class {}",
            classdesc.borrow().display_name()
        );

        let loader_info = self.create_loader(&classdesc);
        let instance = Rc::new(RefCell::new(Instance::new(handle, classdesc)));
        if let Some((_, is_external)) = &loader_info {
            instance.borrow_mut().is_external = *is_external;
        }
        self.handles
            .register(handle, Content::Instance(instance.clone()))?;

        let loader = loader_info.as_ref().map(|(loader, _)| loader.as_ref());
        self.read_class_data(&instance, loader)?;
        debug!("done reading object handle {handle}");
        Ok(Content::Instance(instance))
    }

    /// Asks the transformers for typed behavior. The second slot is the
    /// external-instance mark: set when the claimed class is unknown to the
    /// default transformer.
    fn create_loader(
        &self,
        classdesc: &ClassDescRef,
    ) -> Option<(Box<dyn InstanceLoader>, bool)> {
        let classdesc = classdesc.borrow();
        for transformer in self.transformers.iter() {
            if let Some(loader) = transformer.instance_loader(&classdesc) {
                let is_external = classdesc
                    .name
                    .as_deref()
                    .map(|name| !defaults::is_known_class(name))
                    .unwrap_or(false);
                return Some((loader, is_external));
            }
        }
        None
    }

    /// Walks the class hierarchy super class first and reads each level's
    /// data per its layout.
    fn read_class_data(
        &mut self,
        instance: &InstanceRef,
        loader: Option<&dyn InstanceLoader>,
    ) -> Result<(), StreamError> {
        let classdesc = instance.borrow().classdesc.clone();
        let classes = classdesc::hierarchy(&classdesc);
        let is_external = instance.borrow().is_external;

        let mut field_data = Vec::new();
        let mut annotations = Vec::new();

        for class in classes.iter() {
            let (fields, data_type, class_name) = {
                let classdesc = class.borrow();
                classdesc.validate()?;
                (
                    classdesc.fields.clone(),
                    classdesc.data_type()?,
                    classdesc.display_name(),
                )
            };

            match data_type {
                ClassDataType::NoWriteMethod | ClassDataType::WriteMethod => {
                    if data_type == ClassDataType::WriteMethod && is_external {
                        // unknown custom writer: the whole level can only be
                        // consumed as an annotation stream
                        annotations.push((class.clone(), self.read_class_annotations(Some(class))?));
                    } else {
                        let mut values = Vec::with_capacity(fields.len());
                        for field in fields {
                            let value = self.read_field_value(field.type_tag)?;
                            values.push((field, value));
                        }
                        field_data.push((class.clone(), values));

                        if data_type == ClassDataType::WriteMethod {
                            annotations
                                .push((class.clone(), self.read_class_annotations(Some(class))?));
                        }
                    }
                }
                ClassDataType::ObjectAnnotation => {
                    let handled = match loader {
                        Some(loader) => loader.load_from_blockdata(self, instance)?,
                        None => false,
                    };
                    if !handled {
                        return Err(StreamError::UnhandledExternal { class: class_name });
                    }
                    annotations.push((class.clone(), self.read_class_annotations(Some(class))?));
                }
                ClassDataType::ExternalContents => {
                    return Err(StreamError::ExternalContentsUnsupported { class: class_name });
                }
            }
        }

        {
            let mut instance = instance.borrow_mut();
            instance.field_data = field_data;
            instance.annotations = annotations;
        }

        if let Some(loader) = loader {
            let native = loader.load_from_instance(&instance.borrow());
            if native.is_some() {
                instance.borrow_mut().native = native;
            }
        }

        Ok(())
    }

    fn read_field_value(&mut self, field_type: FieldType) -> Result<Value, StreamError> {
        Ok(match field_type {
            FieldType::Byte => Value::Byte(self.cursor.read_byte()?),
            FieldType::Char => Value::Char(self.cursor.read_char()?),
            FieldType::Double => Value::Double(self.cursor.read_double()?),
            FieldType::Float => Value::Float(self.cursor.read_float()?),
            FieldType::Int => Value::Int(self.cursor.read_int()?),
            FieldType::Long => Value::Long(self.cursor.read_long()?),
            FieldType::Short => Value::Short(self.cursor.read_short()?),
            FieldType::Boolean => Value::Boolean(self.cursor.read_bool()?),
            FieldType::Object | FieldType::Array => {
                Value::Object(self.read_reference_value(field_type)?)
            }
        })
    }

    /// Reads the content of an object or array field/element.
    ///
    /// Array-typed slots additionally accept bare `NULL` and `REFERENCE`
    /// headers; anything else must be an `ARRAY` record.
    fn read_reference_value(&mut self, field_type: FieldType) -> Result<Content, StreamError> {
        let offset = self.cursor.tell();
        let byte = self.cursor.read_ubyte()?;

        if field_type == FieldType::Array {
            match Marker::from_byte(byte) {
                Some(Marker::Null) => return Ok(Content::Null),
                Some(Marker::Reference) => return self.read_reference(),
                Some(Marker::Array) => {}
                _ => {
                    return Err(StreamError::InvalidArray {
                        reason: "array value does not start an array record",
                        offset,
                    });
                }
            }
        }

        let content = self.read_content(byte, false, None)?;
        if content.is_exception() {
            return Err(StreamError::ExceptionDuringRead(content));
        }
        Ok(content)
    }

    fn read_array(&mut self) -> Result<Content, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        let classdesc = self.read_classdesc()?.ok_or(StreamError::InvalidArray {
            reason: "array without a class description",
            offset,
        })?;
        let handle = self.handles.allocate();

        let element_type = {
            let classdesc = classdesc.borrow();
            let name = classdesc.name.as_deref().unwrap_or_default();
            if !name.starts_with('[') {
                return Err(StreamError::InvalidArray {
                    reason: "array class name has no '[' prefix",
                    offset,
                });
            }
            name.as_bytes()
                .get(1)
                .copied()
                .and_then(FieldType::from_type_code)
                .ok_or(StreamError::InvalidArray {
                    reason: "unknown array element type",
                    offset,
                })?
        };

        let size_offset = self.cursor.tell();
        let size = self.cursor.read_int()?;
        if size < 0 {
            return Err(StreamError::InvalidArray {
                reason: "negative array size",
                offset: size_offset,
            });
        }
        let size = size as usize;

        let array = Rc::new(RefCell::new(JavaArray {
            handle,
            classdesc,
            element_type,
            data: ArrayData::Object(Vec::new()),
        }));
        self.handles
            .register(handle, Content::Array(array.clone()))?;

        let data = match self.transform_array(element_type, size)? {
            Some(data) => data,
            None => self.read_array_elements(element_type, size)?,
        };
        array.borrow_mut().data = data;

        Ok(Content::Array(array))
    }

    /// Offers the array to the transformers for a bulk read.
    fn transform_array(
        &mut self,
        element_type: FieldType,
        size: usize,
    ) -> Result<Option<ArrayData>, StreamError> {
        let transformers = Rc::clone(&self.transformers);
        for transformer in transformers.iter() {
            if let Some(data) = transformer.load_array(&mut self.cursor, element_type, size)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    fn read_array_elements(
        &mut self,
        element_type: FieldType,
        size: usize,
    ) -> Result<ArrayData, StreamError> {
        macro_rules! elements {
            ($variant:ident, $read:ident) => {{
                let mut values = Vec::with_capacity(size);
                for _ in 0..size {
                    values.push(self.cursor.$read()?);
                }
                ArrayData::$variant(values)
            }};
        }

        Ok(match element_type {
            FieldType::Boolean => elements!(Boolean, read_bool),
            FieldType::Byte => elements!(Byte, read_byte),
            FieldType::Char => elements!(Char, read_char),
            FieldType::Short => elements!(Short, read_short),
            FieldType::Int => elements!(Int, read_int),
            FieldType::Long => elements!(Long, read_long),
            FieldType::Float => elements!(Float, read_float),
            FieldType::Double => elements!(Double, read_double),
            FieldType::Object | FieldType::Array => {
                let mut items = Vec::with_capacity(size);
                for _ in 0..size {
                    items.push(self.read_reference_value(element_type)?);
                }
                ArrayData::Object(items)
            }
        })
    }

    fn read_class(&mut self) -> Result<Content, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        let classdesc = self
            .read_classdesc()?
            .ok_or(StreamError::InvalidStructure {
                reason: "class without a class description",
                offset,
            })?;

        let handle = self.handles.allocate();
        let class = Rc::new(JavaClass { handle, classdesc });
        self.handles
            .register(handle, Content::Class(class.clone()))?;
        Ok(Content::Class(class))
    }

    fn read_enum(&mut self) -> Result<Content, StreamError> {
        let offset = self.cursor.tell().saturating_sub(1);
        let classdesc = self
            .read_classdesc()?
            .ok_or(StreamError::InvalidStructure {
                reason: "enum without a class description",
                offset,
            })?;

        let handle = self.handles.allocate();
        let value = self.read_string_record()?;
        classdesc
            .borrow_mut()
            .enum_constants
            .insert(value.value.clone());

        let value = Rc::new(JavaEnum {
            handle,
            classdesc,
            value,
        });
        self.handles
            .register(handle, Content::Enum(value.clone()))?;
        Ok(Content::Enum(value))
    }

    fn read_block_data(&mut self, long: bool) -> Result<Content, StreamError> {
        let size = if long {
            let offset = self.cursor.tell();
            let size = self.cursor.read_int()?;
            if size < 0 {
                return Err(StreamError::InvalidStructure {
                    reason: "negative block data length",
                    offset,
                });
            }
            size as usize
        } else {
            self.cursor.read_ubyte()? as usize
        };

        let data = self.cursor.read_bytes(size)?.to_vec();
        Ok(Content::BlockData(Rc::new(BlockData::new(data))))
    }

    /// Reads the annotation stream of one class: content records up to
    /// `ENDBLOCKDATA`, with `RESET` handled in place.
    fn read_class_annotations(
        &mut self,
        class_desc: Option<&ClassDescRef>,
    ) -> Result<Vec<Content>, StreamError> {
        let mut contents = Vec::new();
        loop {
            let byte = self.cursor.read_ubyte()?;
            match Marker::from_byte(byte) {
                Some(Marker::EndBlockData) => return Ok(contents),
                Some(Marker::Reset) => {
                    self.handles.reset();
                    continue;
                }
                _ => {}
            }

            let content = self.read_content(byte, true, class_desc)?;
            if content.is_exception() {
                return Err(StreamError::ExceptionDuringRead(content));
            }
            contents.push(content);
        }
    }

    /// The `EXCEPTION` wrapper: both sides of the wrapped object get a
    /// handle reset, and the object itself must be a fresh instance.
    fn read_exception(&mut self) -> Result<Content, StreamError> {
        self.handles.reset();

        let offset = self.cursor.tell();
        let byte = self.cursor.read_ubyte()?;
        if Marker::from_byte(byte) == Some(Marker::Reset) {
            return Err(StreamError::InvalidStructure {
                reason: "reset inside the exception wrapper",
                offset,
            });
        }

        let content = self.read_content(byte, false, None)?;
        if content.is_null() {
            return Err(StreamError::InvalidStructure {
                reason: "null exception object",
                offset,
            });
        }
        let Some(instance) = content.as_instance().cloned() else {
            return Err(StreamError::InvalidStructure {
                reason: "exception object is not an instance",
                offset,
            });
        };
        if content.is_exception() {
            return Err(StreamError::ExceptionDuringRead(content));
        }

        instance.borrow_mut().is_exception = true;
        self.handles.reset();
        Ok(content)
    }
}
