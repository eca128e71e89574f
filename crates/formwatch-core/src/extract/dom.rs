//! Minimal DOM view used by extraction helpers.
//!
//! Selector synthesis only needs tag names, attributes, parents and element
//! children, so it is written against [`DomNode`] instead of a particular
//! parser. The `scraper` element handle is the implementation used at runtime.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to a single space and trim the ends.
pub fn normalize_text(input: &str) -> String {
    WHITESPACE_RE.replace_all(input, " ").trim().to_string()
}

/// Ordered, de-duplicated class list of a `class` attribute value.
pub fn class_list(value: Option<&str>) -> Vec<&str> {
    let mut classes: Vec<&str> = Vec::new();
    for class in value.unwrap_or_default().split_ascii_whitespace() {
        if !classes.contains(&class) {
            classes.push(class);
        }
    }
    classes
}

pub trait DomNode: Copy + PartialEq {
    /// Lowercase tag name.
    fn tag_name(&self) -> String;

    fn attribute(&self, name: &str) -> Option<&str>;

    /// Parent element; `None` at the document root.
    fn parent_element(&self) -> Option<Self>;

    /// Element children in document order (text and comments skipped).
    fn element_children(&self) -> Vec<Self>;

    /// Attribute value, treating an empty value as absent.
    fn non_empty_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name).filter(|value| !value.is_empty())
    }
}

impl<'a> DomNode for ElementRef<'a> {
    fn tag_name(&self) -> String {
        self.value().name().to_ascii_lowercase()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn parent_element(&self) -> Option<Self> {
        self.parent().and_then(ElementRef::wrap)
    }

    fn element_children(&self) -> Vec<Self> {
        self.children().filter_map(ElementRef::wrap).collect()
    }
}

/// Normalized text content of an element.
pub fn element_text(element: &ElementRef<'_>) -> String {
    normalize_text(&element.text().collect::<String>())
}
