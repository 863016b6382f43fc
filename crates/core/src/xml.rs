//! Minimal mutable XML element tree used for experiment and workflow config
//! documents.
//!
//! Documents are small and edited attribute-by-attribute, so the whole tree is
//! held in memory. Attribute order is preserved on write-back.

use crate::error::{CactusError, CactusResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::path::Path;

/// A single XML element with ordered attributes and child elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child append
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> CactusResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        // Open elements; the bottom of the stack is the root once it closes
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(Self::from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| CactusError::Xml("unbalanced closing tag".to_string()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let value = text.unescape()?;
                        if !value.is_empty() {
                            current.text = Some(value.into_owned());
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text = Some(String::from_utf8_lossy(&data).into_owned());
                    }
                }
                Event::Eof => break,
                // Declarations, comments and processing instructions are dropped
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(CactusError::Xml(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].tag
            )));
        }

        root.ok_or_else(|| CactusError::Xml("document has no root element".to_string()))
    }

    /// Read and parse a document from disk
    pub fn from_file(path: &Path) -> CactusResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CactusError::io(path, e))?;
        Self::parse(&content)
    }

    fn from_start(start: &BytesStart<'_>) -> CactusResult<Self> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn attach(
        stack: &mut [Element],
        root: &mut Option<Element>,
        element: Element,
    ) -> CactusResult<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => {
                if root.is_some() {
                    return Err(CactusError::Xml(
                        "document has more than one root element".to_string(),
                    ));
                }
                *root = Some(element);
            }
        }
        Ok(())
    }

    /// Get an attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Get an attribute value, failing when it is absent
    pub fn require_attr(&self, name: &str) -> CactusResult<&str> {
        self.attr(name)
            .ok_or_else(|| CactusError::missing_attribute(&self.tag, name))
    }

    /// Set (or overwrite in place) an attribute value
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// First direct child with the given tag
    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.tag == tag)
    }

    pub fn find_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|child| child.tag == tag)
    }

    /// First direct child with the given tag, failing when absent
    pub fn require(&self, tag: &str) -> CactusResult<&Element> {
        self.find(tag)
            .ok_or_else(|| CactusError::MissingElement(tag.to_string()))
    }

    pub fn require_mut(&mut self, tag: &str) -> CactusResult<&mut Element> {
        self.find_mut(tag)
            .ok_or_else(|| CactusError::MissingElement(tag.to_string()))
    }

    /// First direct child with the given tag, appending an empty one if needed
    pub fn find_or_insert(&mut self, tag: &str) -> &mut Element {
        let index = match self.children.iter().position(|child| child.tag == tag) {
            Some(index) => index,
            None => {
                self.children.push(Element::new(tag));
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Serialize on a single line with no indentation
    pub fn to_compact_string(&self) -> CactusResult<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| CactusError::Xml(e.to_string()))
    }

    /// Serialize with an XML declaration and two-space indentation
    pub fn to_pretty_string(&self) -> CactusResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
            .map_err(|e| CactusError::Xml(e.to_string()))?;
        self.write_to(&mut writer)?;
        let mut xml =
            String::from_utf8(writer.into_inner()).map_err(|e| CactusError::Xml(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }

    /// Write the pretty-printed document to a file
    pub fn write_pretty(&self, path: &Path) -> CactusResult<()> {
        let xml = self.to_pretty_string()?;
        std::fs::write(path, xml).map_err(|e| CactusError::io(path, e))
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> CactusResult<()> {
        let mut start = BytesStart::new(self.tag.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            writer
                .write_event(Event::Empty(start))
                .map_err(|e| CactusError::Xml(e.to_string()))?;
            return Ok(());
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| CactusError::Xml(e.to_string()))?;
        if let Some(text) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| CactusError::Xml(e.to_string()))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.tag.as_str())))
            .map_err(|e| CactusError::Xml(e.to_string()))?;
        Ok(())
    }
}
