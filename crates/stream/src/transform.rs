use crate::classdesc::{ClassDesc, FieldType};
use crate::content::{ArrayData, Content, Instance, InstanceRef, NativeValue};
use crate::cursor::DataCursor;
use crate::errors::StreamError;
use crate::parser::JavaStreamParser;

/// Plug-in that maps well-known Java classes to native values and decodes
/// payloads the generic decoder cannot.
///
/// Transformers are consulted in registration order; for every hook the
/// first transformer returning something wins. The engine always appends
/// [crate::defaults::DefaultTransformer] after any user transformers. All
/// hooks are optional.
pub trait Transformer {
    /// Supplies the typed behavior for instances of this class, or `None`
    /// when the class is not recognised.
    ///
    /// The engine builds the [Instance] itself (handle, class description,
    /// registration) and keeps the returned loader for the duration of
    /// class-data reading.
    fn instance_loader(&self, _classdesc: &ClassDesc) -> Option<Box<dyn InstanceLoader>> {
        None
    }

    /// Bulk-read opportunity for an array of `size` elements, offered before
    /// the element-by-element decode.
    ///
    /// A transformer that cannot handle the array must return `Ok(None)`
    /// without consuming any bytes.
    fn load_array(
        &self,
        _cursor: &mut DataCursor<'_>,
        _element_type: FieldType,
        _size: usize,
    ) -> Result<Option<ArrayData>, StreamError> {
        Ok(None)
    }

    /// Decodes the custom `writeObject` payload of `class_name`.
    ///
    /// Called when class data of a class with a write method contains bytes
    /// that start with no known type code. The cursor is positioned at the
    /// first unrecognised byte. A transformer that does not know the class
    /// must return `Ok(None)` without consuming any bytes.
    fn load_custom_data(
        &self,
        _parser: &mut JavaStreamParser<'_>,
        _class_name: &str,
    ) -> Result<Option<Content>, StreamError> {
        Ok(None)
    }
}

/// Typed behavior attached to one instance by a [Transformer].
pub trait InstanceLoader {
    /// Consumes the externalizable block data of an instance whose class has
    /// both the externalizable and block-data flags set.
    ///
    /// Returning `Ok(false)` means the loader cannot interpret the data and
    /// fails the parse.
    fn load_from_blockdata(
        &self,
        _parser: &mut JavaStreamParser<'_>,
        _instance: &InstanceRef,
    ) -> Result<bool, StreamError> {
        Ok(false)
    }

    /// Summarises the collected fields and annotations into a native value,
    /// once the whole class hierarchy has been read.
    fn load_from_instance(&self, _instance: &Instance) -> Option<NativeValue> {
        None
    }
}
