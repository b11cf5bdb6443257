pub mod classdesc;
pub mod content;
pub mod cursor;
pub mod defaults;
pub mod errors;
pub mod handles;
pub mod parser;
pub mod transform;

pub use classdesc::{ClassDataType, ClassDesc, ClassDescKind, ClassDescRef, DescFlags, Field, FieldType};
pub use content::{
    ArrayData, BlockData, Content, ExceptionState, Instance, InstanceRef, JavaArray, JavaClass,
    JavaEnum, JavaString, NativeValue, Value,
};
pub use cursor::DataCursor;
pub use defaults::{DefaultTransformer, DenseArrayTransformer, JavaTime, TimeKind};
pub use errors::StreamError;
pub use handles::{Handle, HandleTable};
pub use parser::{JavaStreamParser, Marker};
pub use transform::{InstanceLoader, Transformer};
