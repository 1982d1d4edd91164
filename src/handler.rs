//! Content events streamed to a caller while a document is validated.

/// Namespace-qualified name of an element or attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualifiedName {
    /// Empty when the name is in no namespace.
    pub namespace_uri: String,
    pub local_name: String,
    /// The name as written, including any prefix.
    pub qualified_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

/// Streaming document events.
///
/// Every method defaults to a no-op so implementors only override what they
/// need. Namespace declarations are not reported as attributes.
pub trait ContentHandler {
    fn start_document(&mut self) {}

    fn end_document(&mut self) {}

    fn start_element(&mut self, _name: &QualifiedName, _attributes: &[Attribute]) {}

    fn end_element(&mut self, _name: &QualifiedName) {}

    fn characters(&mut self, _text: &str) {}

    fn ignorable_whitespace(&mut self, _text: &str) {}

    fn processing_instruction(&mut self, _target: &str, _data: &str) {}
}

/// Records every event as a line of text. Handy for tests and debugging.
#[derive(Debug, Default)]
pub struct EventRecorder {
    pub events: Vec<String>,
}

impl ContentHandler for EventRecorder {
    fn start_document(&mut self) {
        self.events.push("start-document".to_string());
    }

    fn end_document(&mut self) {
        self.events.push("end-document".to_string());
    }

    fn start_element(&mut self, name: &QualifiedName, attributes: &[Attribute]) {
        let mut event = format!("start {}", name.qualified_name);
        for attribute in attributes {
            event.push_str(&format!(" {}={}", attribute.name.qualified_name, attribute.value));
        }
        self.events.push(event);
    }

    fn end_element(&mut self, name: &QualifiedName) {
        self.events.push(format!("end {}", name.qualified_name));
    }

    fn characters(&mut self, text: &str) {
        self.events.push(format!("text {}", text));
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        self.events.push(format!("pi {} {}", target, data));
    }
}
