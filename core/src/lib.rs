//! Deserializer for Java object streams.
//!
//! Reads the binary format written by `java.io.ObjectOutputStream` and
//! reconstructs the value graph as [Content] nodes, with well-known classes
//! (collections, boxed primitives, `java.time`) mapped to native values.
//!
//! ```no_run
//! let bytes = std::fs::read("object.ser").unwrap();
//! match jobj::loads(&bytes).unwrap() {
//!     jobj::Deserialized::Single(content) => println!("{content:?}"),
//!     other => println!("{other:?}"),
//! }
//! ```

use std::borrow::Cow;
use std::io::Read;

use flate2::read::GzDecoder;

pub mod errors;

pub use errors::JobjError;
pub use jobj_stream::{
    Content, InstanceLoader, JavaStreamParser, NativeValue, StreamError, Transformer, Value,
};

/// Front-end knobs.
#[derive(Debug, Default, Clone)]
pub struct ParseOptions {
    /// Bulk-read primitive arrays into dense typed buffers.
    pub dense_arrays: bool,
}

/// Outcome of deserializing one stream: nothing, the single top-level item,
/// or all of them.
#[derive(Debug)]
pub enum Deserialized {
    Empty,
    Single(Content),
    Multiple(Vec<Content>),
}

impl Deserialized {
    fn from_contents(mut contents: Vec<Content>) -> Deserialized {
        match contents.len() {
            0 => Deserialized::Empty,
            1 => Deserialized::Single(contents.remove(0)),
            _ => Deserialized::Multiple(contents),
        }
    }

    /// The single top-level item, if there was exactly one.
    pub fn single(&self) -> Option<&Content> {
        match self {
            Deserialized::Single(content) => Some(content),
            _ => None,
        }
    }

    pub fn into_contents(self) -> Vec<Content> {
        match self {
            Deserialized::Empty => Vec::new(),
            Deserialized::Single(content) => vec![content],
            Deserialized::Multiple(contents) => contents,
        }
    }
}

/// Deserializes a stream from a reader, with default options.
pub fn load<R: Read>(reader: R) -> Result<Deserialized, JobjError> {
    load_with(reader, Vec::new(), &ParseOptions::default())
}

/// Deserializes a stream from a reader with custom transformers and options.
pub fn load_with<R: Read>(
    mut reader: R,
    transformers: Vec<Box<dyn Transformer>>,
    options: &ParseOptions,
) -> Result<Deserialized, JobjError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    loads_with(&data, transformers, options)
}

/// Deserializes a stream from bytes, with default options.
pub fn loads(data: &[u8]) -> Result<Deserialized, JobjError> {
    loads_with(data, Vec::new(), &ParseOptions::default())
}

/// Deserializes a stream from bytes with custom transformers and options.
///
/// The default transformer is always active after any user transformers;
/// [ParseOptions::dense_arrays] additionally enables bulk array reads.
pub fn loads_with(
    data: &[u8],
    transformers: Vec<Box<dyn Transformer>>,
    options: &ParseOptions,
) -> Result<Deserialized, JobjError> {
    let data = unwrap_gzip(data)?;
    let mut parser = JavaStreamParser::with_options(&data, transformers, options.dense_arrays);
    let contents = parser.run()?;
    Ok(Deserialized::from_contents(contents))
}

/// Producers sometimes gzip whole streams. Sniff the two-byte gzip magic and
/// inflate if present; anything else is handed to the parser as-is, which
/// rejects garbage with its own magic check.
fn unwrap_gzip(data: &[u8]) -> Result<Cow<'_, [u8]>, JobjError> {
    if data.starts_with(&[0x1F, 0x8B]) {
        let mut decoded = Vec::new();
        GzDecoder::new(data).read_to_end(&mut decoded)?;
        Ok(Cow::Owned(decoded))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    const EMPTY_STREAM: &[u8] = &[0xAC, 0xED, 0x00, 0x05];

    fn string_stream(values: &[&str]) -> Vec<u8> {
        let mut bytes = EMPTY_STREAM.to_vec();
        for value in values {
            bytes.push(0x74);
            bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
            bytes.extend_from_slice(value.as_bytes());
        }
        bytes
    }

    #[test]
    fn empty_stream_is_empty() {
        assert!(matches!(loads(EMPTY_STREAM), Ok(Deserialized::Empty)));
    }

    #[test]
    fn single_item_is_returned_alone() {
        let result = loads(&string_stream(&["hello"])).unwrap();
        assert_eq!(result.single().and_then(Content::as_str), Some("hello"));
    }

    #[test]
    fn multiple_items_come_back_as_a_list() {
        let result = loads(&string_stream(&["a", "b"])).unwrap();
        let contents = result.into_contents();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1].as_str(), Some("b"));
    }

    #[test]
    fn gzipped_streams_are_unwrapped() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&string_stream(&["zipped"])).unwrap();
        let compressed = encoder.finish().unwrap();

        let result = loads(&compressed).unwrap();
        assert_eq!(result.single().and_then(Content::as_str), Some("zipped"));
    }

    #[test]
    fn garbage_is_reported_by_the_magic_check() {
        assert!(matches!(
            loads(&[0x00, 0x01, 0x02, 0x03]),
            Err(JobjError::StreamError(StreamError::InvalidMagic(0x0001)))
        ));
    }

    #[test]
    fn reader_front_end_matches_the_byte_front_end() {
        let bytes = string_stream(&["via reader"]);
        let result = load(&bytes[..]).unwrap();
        assert_eq!(
            result.single().and_then(Content::as_str),
            Some("via reader")
        );
    }
}
