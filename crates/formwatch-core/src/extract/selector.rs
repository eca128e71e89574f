//! CSS selector synthesis for form controls and submit candidates.

use crate::extract::dom::{class_list, DomNode};

/// Build a selector that locates `element` on an unchanged document.
///
/// An element with an id short-circuits to `tag#id`. Otherwise the path runs
/// from the document root down to the element, each step written as the tag
/// plus its classes. Ancestors gain `:nth-of-type(n)` only when their parent
/// has more than one child of the same tag. The result depends only on tree
/// shape and attributes, never on node identity.
pub fn css_path<N: DomNode>(element: N) -> String {
    let tag = element.tag_name();
    if let Some(id) = element.non_empty_attribute("id") {
        return format!("{tag}#{id}");
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(element);
    while let Some(node) = current {
        let node_tag = node.tag_name();
        let mut part = node_tag.clone();
        let classes = class_list(node.attribute("class"));
        if !classes.is_empty() {
            part.push('.');
            part.push_str(&classes.join("."));
        }

        let parent = node.parent_element();
        if node != element {
            if let Some(parent) = parent {
                let same_tag: Vec<N> = parent
                    .element_children()
                    .into_iter()
                    .filter(|sibling| sibling.tag_name() == node_tag)
                    .collect();
                if same_tag.len() > 1 {
                    if let Some(pos) = same_tag.iter().position(|sibling| *sibling == node) {
                        part.push_str(&format!(":nth-of-type({})", pos + 1));
                    }
                }
            }
        }

        parts.push(part);
        current = parent;
    }

    parts.reverse();
    parts.join(" > ")
}
