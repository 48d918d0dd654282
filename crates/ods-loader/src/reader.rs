//! Streaming record reader.
//!
//! Walks an XML byte stream forward-only and yields one record subtree at a
//! time. Only the record currently being assembled is held in memory; events
//! outside a record are skipped without buffering.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use crate::types::{ImportError, ImportResult};

/// Read buffer size for source files.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// One element of a record subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name (namespace prefix stripped).
    pub name: String,
    /// Attributes in document order, namespace prefixes stripped.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<XmlElement>,
    /// Concatenated text and CDATA content, entities resolved.
    pub text: String,
}

/// One top-level record as it comes out of the reader.
pub type RawRecord = XmlElement;

impl XmlElement {
    /// Creates an element with no attributes, children or text.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the value of the first attribute with the given name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Returns every child with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Follows a path of child names, taking the first match at each step.
    pub fn find(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |element, name| element.child(name))
    }

    /// Returns the trimmed text of the first child with the given name, if
    /// it is non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|child| child.text.trim())
            .filter(|text| !text.is_empty())
    }
}

/// A streaming reader yielding one record per matching element.
///
/// Records are elements whose local name equals the record tag, at any depth.
/// Parsing is best effort: end-tag names are not checked against the open
/// elements, an unmatched end tag is ignored, and a record left open at end
/// of input is closed and yielded. Ill-formed markup the tokenizer can step
/// over (a stray `&`, a bad comment) is logged and skipped, and the record
/// being assembled keeps whatever was read around it.
///
/// A syntax or I/O error, or a stream with no element in it at all, is
/// returned once as [`ImportError::MalformedInput`], after which the reader
/// is exhausted.
pub struct RecordReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    record_tag: String,
    open: Vec<XmlElement>,
    records_read: usize,
    seen_element: bool,
    last_recovered_at: Option<u64>,
    finished: bool,
}

impl RecordReader<BufReader<File>> {
    /// Creates a reader over a file.
    ///
    /// # Errors
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn from_path<P: AsRef<Path>>(path: P, record_tag: &str) -> ImportResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ImportError::SourceNotFound {
                path: path.display().to_string(),
            });
        }

        let file = File::open(path)?;
        let reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
        Ok(Self::from_reader(reader, record_tag))
    }
}

impl<R: BufRead> RecordReader<R> {
    /// Creates a reader over any buffered byte stream.
    pub fn from_reader(reader: R, record_tag: &str) -> Self {
        let mut reader = Reader::from_reader(reader);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        Self {
            reader,
            buf: Vec::new(),
            record_tag: record_tag.to_string(),
            open: Vec::new(),
            records_read: 0,
            seen_element: false,
            last_recovered_at: None,
            finished: false,
        }
    }

    /// Returns the number of records yielded so far.
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    fn fail(&mut self, reason: String, source: Option<quick_xml::Error>) -> ImportError {
        self.finished = true;
        self.open.clear();
        ImportError::MalformedInput {
            position: self.reader.buffer_position() as u64,
            reason,
            source,
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = ImportResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(quick_xml::Error::IllFormed(error)) => {
                    let position = self.reader.buffer_position() as u64;
                    // No progress since the last recovery means the tokenizer is stuck
                    if self.last_recovered_at == Some(position) {
                        let reason = error.to_string();
                        let source = quick_xml::Error::IllFormed(error);
                        return Some(Err(self.fail(reason, Some(source))));
                    }
                    self.last_recovered_at = Some(position);
                    warn!(
                        position,
                        record = self.records_read + 1,
                        "skipping ill-formed markup: {}",
                        error
                    );
                    continue;
                }
                Err(source) => {
                    let reason = source.to_string();
                    return Some(Err(self.fail(reason, Some(source))));
                }
            };

            if matches!(event, Event::Start(_) | Event::Empty(_)) {
                self.seen_element = true;
            }

            match event {
                Event::Start(start) => {
                    let element = open_element(&start);
                    if self.open.is_empty() && element.name != self.record_tag {
                        continue;
                    }
                    self.open.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&start);
                    match self.open.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None if element.name == self.record_tag => {
                            self.records_read += 1;
                            return Some(Ok(element));
                        }
                        None => {}
                    }
                }
                Event::End(end) => {
                    if self.open.is_empty() {
                        continue;
                    }
                    let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                    if let Some(depth) = self.open.iter().rposition(|open| open.name == name) {
                        if let Some(record) = close_to(&mut self.open, depth) {
                            self.records_read += 1;
                            return Some(Ok(record));
                        }
                    }
                }
                Event::Text(text) => {
                    if !self.open.is_empty() {
                        let text = unescape_lossy(&text);
                        append_text(&mut self.open, &text);
                    }
                }
                Event::CData(data) => {
                    if !self.open.is_empty() {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        append_text(&mut self.open, &text);
                    }
                }
                Event::GeneralRef(reference) => {
                    if !self.open.is_empty() {
                        let name = String::from_utf8_lossy(&reference).into_owned();
                        let text = unescape_lossy(format!("&{name};").as_bytes());
                        append_text(&mut self.open, &text);
                    }
                }
                Event::Eof => {
                    if !self.seen_element {
                        let reason = "no XML element found in the input".to_string();
                        return Some(Err(self.fail(reason, None)));
                    }
                    self.finished = true;
                    if self.open.is_empty() {
                        return None;
                    }
                    warn!(
                        record = self.records_read + 1,
                        "input ended inside an unterminated record; closing it"
                    );
                    let record = close_to(&mut self.open, 0);
                    self.records_read += 1;
                    return record.map(Ok);
                }
                _ => {}
            }
        }
    }
}

/// Closes every open element down to and including `depth`, attaching each
/// to its parent. Returns the record when the outermost element closes.
fn close_to(open: &mut Vec<XmlElement>, depth: usize) -> Option<XmlElement> {
    while open.len() > depth + 1 {
        if let Some(inner) = open.pop() {
            if let Some(parent) = open.last_mut() {
                parent.children.push(inner);
            }
        }
    }

    let closed = open.pop()?;
    match open.last_mut() {
        Some(parent) => {
            parent.children.push(closed);
            None
        }
        None => Some(closed),
    }
}

fn append_text(open: &mut [XmlElement], text: &str) {
    if let Some(current) = open.last_mut() {
        current.text.push_str(text);
    }
}

fn open_element(start: &BytesStart<'_>) -> XmlElement {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.local_name().as_ref()));
    // Malformed attributes are skipped rather than failing the record.
    for attribute in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = unescape_lossy(&attribute.value);
        element.attributes.push((key, value));
    }
    element
}

/// Resolves entities, keeping the raw text when an entity is unknown.
fn unescape_lossy(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let unescaped = escape::unescape(&text).map(|resolved| resolved.into_owned());
    unescaped.unwrap_or_else(|_| text.to_string())
}
