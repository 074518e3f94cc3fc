//! Snapshot of the DOM around a click
//!
//! A platform binding hands the instrument an [`Element`] chain for the
//! click target. Elements are immutable and point upward to their parent,
//! which is all interaction capture needs to resolve the nearest
//! interactive ancestor.

use std::collections::BTreeMap;
use std::sync::Arc;

/// One element and its ancestry
#[derive(Debug, Clone, Default)]
pub struct Element {
    tag: String,
    id: String,
    class_name: String,
    attributes: BTreeMap<String, String>,
    inner_text: Option<String>,
    parent: Option<Arc<Element>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the `class` attribute (space-separated class list)
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Set an attribute; names are case-insensitive
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.inner_text = Some(text.into());
        self
    }

    /// Attach this element under `parent`
    pub fn within(mut self, parent: Arc<Element>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Lower-case tag name
    pub fn tag_name(&self) -> String {
        self.tag.to_ascii_lowercase()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class_name.split_ascii_whitespace().any(|c| c == class)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Rendered text, if the platform supplied it
    pub fn inner_text(&self) -> Option<&str> {
        self.inner_text.as_deref()
    }

    pub fn parent(&self) -> Option<&Arc<Element>> {
        self.parent.as_ref()
    }

    /// This element followed by each ancestor up to the root
    pub fn ancestors_inclusive(&self) -> impl Iterator<Item = &Element> {
        std::iter::successors(Some(self), |el| el.parent.as_deref())
    }

    /// Nearest inclusive ancestor satisfying `predicate`
    pub fn closest(&self, predicate: impl Fn(&Element) -> bool) -> Option<&Element> {
        self.ancestors_inclusive().find(|el| predicate(el))
    }

    fn is_input_of_type(&self, kind: &str) -> bool {
        self.tag.eq_ignore_ascii_case("input")
            && self
                .attribute("type")
                .is_some_and(|t| t.eq_ignore_ascii_case(kind))
    }

    pub fn is_password_input(&self) -> bool {
        self.is_input_of_type("password")
    }

    pub fn is_submit_input(&self) -> bool {
        self.is_input_of_type("submit")
    }
}

/// A click dispatched on the document
#[derive(Debug, Clone, Default)]
pub struct ClickEvent {
    /// Element the click landed on; `None` for clicks on non-element nodes
    pub target: Option<Arc<Element>>,
}

impl ClickEvent {
    pub fn on(target: Arc<Element>) -> Self {
        Self {
            target: Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_walks_ancestors() {
        let link = Arc::new(Element::new("A").with_attr("href", "/cart"));
        let span = Element::new("span").within(Arc::clone(&link));

        let found = span.closest(|el| el.tag_name() == "a").unwrap();
        assert_eq!(found.attribute("HREF"), Some("/cart"));
        assert!(span.closest(|el| el.tag_name() == "button").is_none());
    }

    #[test]
    fn test_class_list() {
        let el = Element::new("button").with_class("btn  primary iris-ignore");
        assert!(el.has_class("primary"));
        assert!(el.has_class("iris-ignore"));
        assert!(!el.has_class("btn primary"));
    }

    #[test]
    fn test_input_types() {
        assert!(Element::new("INPUT")
            .with_attr("type", "Password")
            .is_password_input());
        assert!(Element::new("input").with_attr("type", "submit").is_submit_input());
        assert!(!Element::new("input").is_submit_input());
    }
}
