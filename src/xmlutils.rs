use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use xml::common::XmlVersion;
use xml::reader::{EventReader, ParserConfig, XmlEvent as ReaderEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriterEvent};

pub const NS_OPF: &str = "http://www.idpf.org/2007/opf";
pub const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
pub const NS_XHTML: &str = "http://www.w3.org/1999/xhtml";
pub const NS_NCX: &str = "http://www.daisy.org/z3986/2005/ncx/";
pub const NS_EPUB: &str = "http://www.idpf.org/2007/ops";
pub const NS_CONTAINER: &str = "urn:oasis:names:tc:opendocument:xmlns:container";

// Using RefCell because we need to edit the children vec during the parsing.
// Using rc because a Node will be referenced by its parent and by the parser stack.
pub type ChildNodeRef = Rc<RefCell<XMLNode>>;

#[derive(Debug, thiserror::Error)]
pub enum XMLError {
    #[error("XML Reader Error: {0}")]
    Reader(#[from] xml::reader::Error),
    #[error("XML Writer Error: {0}")]
    Writer(#[from] xml::writer::Error),
    #[error("Attribute not found: {0}")]
    AttrNotFound(String),
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("No XML elements found")]
    NoElements,
    #[error("Namespace prefix `{prefix}` used in <{element}> is not declared")]
    UnboundPrefix { prefix: String, element: String },
    #[error("Namespace {uri} is not declared on <{element}>")]
    MissingNamespace { uri: String, element: String },
    #[error("Serialized XML is not valid UTF-8")]
    Encoding,
}

fn parser_config() -> ParserConfig {
    // xhtml content documents use html entities that plain xml doesn't know
    ParserConfig::new()
        .add_entity("nbsp", '\u{a0}')
        .add_entity("copy", '©')
        .add_entity("reg", '®')
        .add_entity("trade", '™')
        .add_entity("mdash", '—')
        .add_entity("ndash", '–')
        .add_entity("hellip", '…')
        .add_entity("lsquo", '‘')
        .add_entity("rsquo", '’')
        .add_entity("ldquo", '“')
        .add_entity("rdquo", '”')
        .add_entity("laquo", '«')
        .add_entity("raquo", '»')
        .add_entity("middot", '·')
        .add_entity("ensp", '\u{2002}')
        .add_entity("emsp", '\u{2003}')
        .add_entity("thinsp", '\u{2009}')
}

pub struct XMLReader;

impl XMLReader {
    /// Parses `content` into an element tree, returning the root element.
    pub fn parse(content: &[u8]) -> Result<ChildNodeRef, XMLError> {
        let reader: EventReader<&[u8]> = parser_config().create_reader(content);
        let mut root: Option<ChildNodeRef> = None;
        let mut parents: Vec<ChildNodeRef> = vec![];

        for e in reader {
            match e? {
                ReaderEvent::StartElement {
                    name,
                    attributes,
                    namespace,
                } => {
                    let node = Rc::new(RefCell::new(XMLNode {
                        name,
                        attrs: attributes,
                        namespace,
                        text: None,
                        inner_text: String::new(),
                        children: vec![],
                    }));

                    if let Some(parent) = parents.last() {
                        parent.borrow_mut().children.push(node.clone());
                    } else if root.is_none() {
                        root = Some(node.clone());
                    }
                    parents.push(node);
                }
                ReaderEvent::EndElement { .. } => {
                    parents.pop();
                }
                ReaderEvent::Characters(text) | ReaderEvent::CData(text) => {
                    if let Some(current) = parents.last() {
                        current
                            .borrow_mut()
                            .text
                            .get_or_insert_with(String::new)
                            .push_str(&text);
                    }
                    for p in &parents {
                        p.borrow_mut().inner_text.push_str(&text);
                    }
                }
                ReaderEvent::Whitespace(text) => {
                    for p in &parents {
                        p.borrow_mut().inner_text.push_str(&text);
                    }
                }
                _ => continue,
            }
        }

        root.ok_or(XMLError::NoElements)
    }
}

#[derive(Debug)]
pub struct XMLNode {
    pub name: xml::name::OwnedName,
    pub attrs: Vec<xml::attribute::OwnedAttribute>,
    pub namespace: xml::namespace::Namespace,
    /// Text directly inside this element.
    pub text: Option<String>,
    /// Text of this element and all its descendants, in document order.
    pub inner_text: String,
    pub children: Vec<ChildNodeRef>,
}

impl XMLNode {
    /// Looks up an attribute by local name, ignoring its prefix.
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|attr| attr.name.local_name == name)
            .map(|attr| attr.value.clone())
    }

    /// Depth-first search for the first descendant with local name `tag`.
    pub fn find(&self, tag: &str) -> Option<ChildNodeRef> {
        for c in &self.children {
            if c.borrow().name.local_name == tag {
                return Some(c.clone());
            }
            if let Some(n) = c.borrow().find(tag) {
                return Some(n);
            }
        }
        None
    }

    /// Direct children with local name `tag`.
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a ChildNodeRef> {
        self.children
            .iter()
            .filter(move |c| c.borrow().name.local_name == tag)
    }

    pub fn is(&self, tag: &str) -> bool {
        self.name.local_name == tag
    }
}

/// Element of a document being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XMLElement {
    pub name: String,
    pub namespaces: Vec<(String, String)>,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XMLContent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XMLContent {
    Element(XMLElement),
    Text(String),
}

impl XMLElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: vec![],
            attrs: vec![],
            children: vec![],
        }
    }

    pub fn default_ns(self, uri: &str) -> Self {
        self.ns("", uri)
    }

    pub fn ns(mut self, prefix: &str, uri: &str) -> Self {
        if !self.namespaces.iter().any(|(p, _)| p == prefix) {
            self.namespaces.push((prefix.into(), uri.into()));
        }
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.into(), value)),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XMLContent::Text(text.into()));
        self
    }

    pub fn child(mut self, child: XMLElement) -> Self {
        self.children.push(XMLContent::Element(child));
        self
    }

    pub fn push(&mut self, child: XMLElement) {
        self.children.push(XMLContent::Element(child));
    }

    /// Copies a parsed element, keeping the prefixes it was written with.
    pub fn from_node(node: &XMLNode) -> Self {
        let mut el = Self::new(qualified(&node.name));
        for attr in &node.attrs {
            el.attrs.push((qualified(&attr.name), attr.value.clone()));
        }
        if let Some(text) = &node.text {
            if node.children.is_empty() {
                el.children.push(XMLContent::Text(text.clone()));
            } else if !text.trim().is_empty() {
                el.children.push(XMLContent::Text(text.trim().to_string()));
            }
        }
        for c in &node.children {
            el.push(Self::from_node(&c.borrow()));
        }
        el
    }

    fn local_name(&self) -> &str {
        self.name.split_once(':').map_or(&self.name, |(_, l)| l)
    }

    /// Checks that every prefix used in this tree is declared on the way
    /// down from the root.
    fn check_prefixes(&self, scope: &mut Vec<String>) -> Result<(), XMLError> {
        let declared = self.namespaces.len();
        scope.extend(self.namespaces.iter().map(|(p, _)| p.clone()));

        let names = std::iter::once(self.name.as_str()).chain(self.attrs.iter().map(|(k, _)| k.as_str()));
        for name in names {
            if let Some((prefix, _)) = name.split_once(':') {
                if prefix != "xml" && !scope.iter().any(|p| p == prefix) {
                    return Err(XMLError::UnboundPrefix {
                        prefix: prefix.into(),
                        element: self.name.clone(),
                    });
                }
            }
        }
        for c in &self.children {
            if let XMLContent::Element(e) = c {
                e.check_prefixes(scope)?;
            }
        }

        scope.truncate(scope.len() - declared);
        Ok(())
    }

    fn emit<W: std::io::Write>(&self, writer: &mut EventWriter<W>) -> Result<(), XMLError> {
        let mut start = WriterEvent::start_element(self.name.as_str());
        for (prefix, uri) in &self.namespaces {
            start = if prefix.is_empty() {
                start.default_ns(uri.as_str())
            } else {
                start.ns(prefix.as_str(), uri.as_str())
            };
        }
        for (k, v) in &self.attrs {
            start = start.attr(k.as_str(), v.as_str());
        }
        writer.write(start)?;

        for c in &self.children {
            match c {
                XMLContent::Text(t) => writer.write(WriterEvent::characters(t))?,
                XMLContent::Element(e) => e.emit(writer)?,
            }
        }
        writer.write(WriterEvent::end_element())?;
        Ok(())
    }
}

fn qualified(name: &xml::name::OwnedName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local_name),
        None => name.local_name.clone(),
    }
}

/// Prefix → namespace uri pairs used by `node` and its descendants.
pub fn used_namespaces(node: &XMLNode, found: &mut BTreeMap<String, String>) {
    let names = std::iter::once(&node.name).chain(node.attrs.iter().map(|a| &a.name));
    for name in names {
        if let (Some(prefix), Some(uri)) = (&name.prefix, &name.namespace) {
            if prefix != "xml" && prefix != "xmlns" {
                found.entry(prefix.clone()).or_insert_with(|| uri.clone());
            }
        }
    }
    for c in &node.children {
        used_namespaces(&c.borrow(), found);
    }
}

/// Serializes `root` as an indented utf-8 document.
///
/// Before writing anything it checks that `root` declares every `(prefix,
/// uri)` pair in `required` and that every prefix used in the tree is bound.
pub fn write_document(root: &XMLElement, required: &[(&str, &str)]) -> Result<String, XMLError> {
    for (prefix, uri) in required {
        if !root.namespaces.iter().any(|(p, u)| p == prefix && u == uri) {
            return Err(XMLError::MissingNamespace {
                uri: (*uri).into(),
                element: root.local_name().into(),
            });
        }
    }
    root.check_prefixes(&mut vec![])?;

    let mut out = Vec::new();
    {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .indent_string("  ")
            .create_writer(&mut out);
        writer.write(WriterEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("UTF-8"),
            standalone: None,
        })?;
        root.emit(&mut writer)?;
    }
    String::from_utf8(out).map_err(|_| XMLError::Encoding)
}

/// Re-indents an xml document, dropping the whitespace between elements.
pub fn reindent(xmldoc: &[u8]) -> Result<String, XMLError> {
    let mut b = Vec::new();

    {
        let reader = parser_config().create_reader(xmldoc);
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .indent_string("  ")
            .create_writer(&mut b);

        for e in reader {
            let e = e?;
            if let ReaderEvent::Whitespace(_) = e {
                continue;
            }
            if let Some(ev) = e.as_writer_event() {
                writer.write(ev)?;
            }
        }
    }

    String::from_utf8(b).map_err(|_| XMLError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_text_follows_document_order() {
        let doc = br#"<a href="x.xhtml"><b>1.</b> The <i>Start</i></a>"#;
        let root = XMLReader::parse(doc).unwrap();
        assert_eq!("1. The Start", root.borrow().inner_text);
        assert_eq!(Some("x.xhtml".to_string()), root.borrow().get_attr("href"));
    }

    #[test]
    fn entities_from_html_are_known() {
        let root = XMLReader::parse("<p>a&nbsp;b&mdash;c</p>".as_bytes()).unwrap();
        assert_eq!("a\u{a0}b—c", root.borrow().inner_text);
    }

    #[test]
    fn unbound_prefix_is_rejected() {
        let root = XMLElement::new("package")
            .default_ns(NS_OPF)
            .child(XMLElement::new("dc:title").text("x"));
        match write_document(&root, &[("", NS_OPF)]) {
            Err(XMLError::UnboundPrefix { prefix, .. }) => assert_eq!("dc", prefix),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_required_namespace_is_rejected() {
        let root = XMLElement::new("ncx");
        assert!(matches!(
            write_document(&root, &[("", NS_NCX)]),
            Err(XMLError::MissingNamespace { .. })
        ));
    }

    #[test]
    fn written_document_parses_back() {
        let root = XMLElement::new("package")
            .default_ns(NS_OPF)
            .ns("dc", NS_DC)
            .attr("version", "3.0")
            .child(XMLElement::new("dc:title").text("Fish & Chips"));
        let text = write_document(&root, &[("", NS_OPF), ("dc", NS_DC)]).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("Fish &amp; Chips"));

        let parsed = XMLReader::parse(text.as_bytes()).unwrap();
        let title = parsed.borrow().find("title").unwrap();
        assert_eq!(Some(NS_DC.to_string()), title.borrow().name.namespace);
        assert_eq!("Fish & Chips", title.borrow().inner_text);
    }
}
