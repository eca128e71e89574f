//! Structured form extraction over a rendered document.
//!
//! Produces one [`FormDescriptor`] per `<form>` in document order. Each
//! descriptor lists the controls the form owns with their resolved labels,
//! its `data-*` attributes, and the buttons or links likely used to submit it.
//!
//! A control belongs to the form named by its `form` attribute, else to its
//! nearest `<form>` ancestor. Markup such as `<table><form><tr>` leaves the
//! parsed `<form>` empty inside the table; controls later in that table
//! section are given to it, as the parser's form pointer does in a browser.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};

use crate::extract::dom::{element_text, normalize_text, DomNode};
use crate::extract::selector::css_path;
use crate::models::{FieldDescriptor, FormDescriptor, SubmitCandidate};

static FORM_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());

static CONTROL_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("button, fieldset, input, object, output, select, textarea").unwrap()
});

static SUBMITTER_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "button, input[type=\"submit\"], input[type=\"button\"], a[role=\"button\"]",
    )
    .unwrap()
});

static LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("label").unwrap());

static LABELABLE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("button, input, meter, output, progress, select, textarea").unwrap()
});

static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[id]").unwrap());

/// Elements that honour a `form="<id>"` owner attribute.
const FORM_ASSOCIATED_TAGS: &[&str] = &[
    "button", "fieldset", "input", "object", "output", "select", "textarea",
];

/// Parents under which the parser inserts a `<form>` and pops it at once.
const TABLE_SECTION_TAGS: &[&str] = &["table", "tbody", "thead", "tfoot", "tr"];

/// Tags whose `required` attribute is reflected as a boolean property.
const REQUIRABLE_TAGS: &[&str] = &["input", "select", "textarea"];

/// Tags that expose a `placeholder` property.
const PLACEHOLDER_TAGS: &[&str] = &["input", "textarea"];

/// Document-wide lookups shared by every form on the page.
struct DocumentIndex<'a> {
    labels: Vec<ElementRef<'a>>,
    by_id: HashMap<&'a str, ElementRef<'a>>,
}

impl<'a> DocumentIndex<'a> {
    fn build(document: &'a Html) -> Self {
        let mut by_id: HashMap<&'a str, ElementRef<'a>> = HashMap::new();
        for element in document.select(&ID_SEL) {
            if let Some(id) = element.value().attr("id").filter(|id| !id.is_empty()) {
                // First element wins, as with getElementById.
                by_id.entry(id).or_insert(element);
            }
        }
        Self {
            labels: document.select(&LABEL_SEL).collect(),
            by_id,
        }
    }
}

/// Extract every form of `document` in document order.
pub fn extract_forms(document: &Html) -> Vec<FormDescriptor> {
    let index = DocumentIndex::build(document);
    assign_owners(document, &index)
        .into_iter()
        .enumerate()
        .map(|(idx, owned)| describe_form(idx, owned, &index))
        .collect()
}

/// A form and the elements it owns, each list in document order.
struct OwnedElements<'a> {
    form: ElementRef<'a>,
    controls: Vec<ElementRef<'a>>,
    submitters: Vec<ElementRef<'a>>,
}

fn assign_owners<'a>(document: &'a Html, doc: &DocumentIndex<'a>) -> Vec<OwnedElements<'a>> {
    let mut owned: Vec<OwnedElements<'a>> = document
        .select(&FORM_SEL)
        .map(|form| OwnedElements {
            form,
            controls: Vec::new(),
            submitters: Vec::new(),
        })
        .collect();
    let forms: Vec<ElementRef<'a>> = owned.iter().map(|entry| entry.form).collect();

    // Empty form sitting directly in a table section, with that section.
    let mut table_form: Option<(usize, ElementRef<'a>)> = None;

    for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
        if let Some(pos) = forms.iter().position(|form| *form == element) {
            table_form = element
                .parent_element()
                .filter(|parent| {
                    element.children().next().is_none()
                        && TABLE_SECTION_TAGS.contains(&parent.tag_name().as_str())
                })
                .map(|parent| (pos, parent));
            continue;
        }

        let is_control = CONTROL_SEL.matches(&element) && is_listed_control(&element);
        let is_submitter = SUBMITTER_SEL.matches(&element);
        if !is_control && !is_submitter {
            continue;
        }
        let Some(pos) = form_owner(element, &forms, doc, table_form) else {
            continue;
        };
        if is_control {
            owned[pos].controls.push(element);
        }
        if is_submitter {
            owned[pos].submitters.push(element);
        }
    }
    owned
}

fn form_owner<'a>(
    element: ElementRef<'a>,
    forms: &[ElementRef<'a>],
    doc: &DocumentIndex<'a>,
    table_form: Option<(usize, ElementRef<'a>)>,
) -> Option<usize> {
    if FORM_ASSOCIATED_TAGS.contains(&element.tag_name().as_str()) {
        if let Some(form_id) = element.attribute("form") {
            let target = doc.by_id.get(form_id)?;
            return forms.iter().position(|form| form == target);
        }
    }
    if let Some(ancestor) = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|node| node.value().name() == "form")
    {
        return forms.iter().position(|form| *form == ancestor);
    }
    let (pos, section) = table_form?;
    element
        .ancestors()
        .any(|node| ElementRef::wrap(node) == Some(section))
        .then_some(pos)
}

fn describe_form(index: usize, owned: OwnedElements<'_>, doc: &DocumentIndex<'_>) -> FormDescriptor {
    let form = owned.form;
    let fields = owned
        .controls
        .into_iter()
        .map(|control| describe_field(control, doc))
        .collect();

    let submitters = owned.submitters.into_iter().map(describe_submitter).collect();

    let method = form
        .non_empty_attribute("method")
        .unwrap_or("get")
        .to_lowercase();

    FormDescriptor {
        index,
        action: form.attribute("action").map(str::to_string),
        method,
        dataset: dataset(&form),
        fields,
        submitters,
    }
}

/// Image inputs are not part of a form's listed elements.
fn is_listed_control(control: &ElementRef<'_>) -> bool {
    !(control.tag_name() == "input"
        && control
            .attribute("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("image")))
}

fn describe_field(control: ElementRef<'_>, doc: &DocumentIndex<'_>) -> FieldDescriptor {
    let tag = control.tag_name();
    let field_type = match control.attribute("type") {
        Some(t) => Some(t.to_lowercase()),
        None if tag == "input" => Some("text".to_string()),
        None => None,
    };
    let required =
        REQUIRABLE_TAGS.contains(&tag.as_str()) && control.attribute("required").is_some();
    let placeholder = if PLACEHOLDER_TAGS.contains(&tag.as_str()) {
        control.non_empty_attribute("placeholder").map(str::to_string)
    } else {
        None
    };

    FieldDescriptor {
        name: control.non_empty_attribute("name").map(str::to_string),
        id: control.non_empty_attribute("id").map(str::to_string),
        field_type,
        required,
        placeholder,
        labels: read_labels(control, doc),
        aria_required: control.attribute("aria-required").map(str::to_string),
        autocomplete: control.attribute("autocomplete").map(str::to_string),
        tag,
    }
}

/// Labels of a control, in order: associated `<label>` elements, then
/// `aria-describedby` targets, then `aria-label`. Empty texts are dropped.
fn read_labels(control: ElementRef<'_>, doc: &DocumentIndex<'_>) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();

    if is_labelable(&control) {
        for label in &doc.labels {
            let associated = match label.attribute("for") {
                Some(target) => doc.by_id.get(target) == Some(&control),
                None => first_labelable(label) == Some(control),
            };
            if associated {
                labels.push(element_text(label));
            }
        }
    }

    if let Some(described_by) = control.attribute("aria-describedby") {
        for id in described_by.split_whitespace() {
            if let Some(described) = doc.by_id.get(id) {
                labels.push(element_text(described));
            }
        }
    }

    if let Some(aria_label) = control.attribute("aria-label") {
        labels.push(normalize_text(aria_label));
    }

    labels.retain(|text| !text.is_empty());
    labels
}

fn first_labelable<'a>(label: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    label.select(&LABELABLE_SEL).find(is_labelable)
}

fn is_labelable(control: &ElementRef<'_>) -> bool {
    match control.tag_name().as_str() {
        "button" | "meter" | "output" | "progress" | "select" | "textarea" => true,
        "input" => !control
            .attribute("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("hidden")),
        _ => false,
    }
}

fn describe_submitter(element: ElementRef<'_>) -> SubmitCandidate {
    let mut text = element_text(&element);
    if text.is_empty() {
        text = normalize_text(element.attribute("value").unwrap_or_default());
    }
    let kind = element
        .attribute("type")
        .map(str::to_lowercase)
        .unwrap_or_else(|| element.tag_name());
    SubmitCandidate {
        selector: css_path(element),
        text,
        kind,
    }
}

/// `data-*` attributes keyed the way `HTMLElement.dataset` names them,
/// sorted by key so the map does not depend on attribute storage order.
fn dataset(form: &ElementRef<'_>) -> IndexMap<String, String> {
    let mut entries: IndexMap<String, String> = form
        .value()
        .attrs()
        .filter_map(|(name, value)| {
            let suffix = name.strip_prefix("data-")?;
            Some((dataset_key(suffix), value.to_string()))
        })
        .collect();
    entries.sort_keys();
    entries
}

/// `step-count` -> `stepCount`: a dash followed by a lowercase ASCII letter
/// becomes the uppercase letter; any other dash is kept.
fn dataset_key(suffix: &str) -> String {
    let mut key = String::with_capacity(suffix.len());
    let mut chars = suffix.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '-' {
            if let Some(next) = chars.peek().copied().filter(char::is_ascii_lowercase) {
                key.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        key.push(ch);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNUP: &str = r##"
<html><body>
  <div class="hero"><form id="search" action="/search"><input name="q" aria-label="Search"></form></div>
  <div class="panel">
    <form action="/submit" method="POST" data-step="1" data-flow-name="listing">
      <label for="biz">  Business
         name </label>
      <input id="biz" name="business_name" required placeholder="Acme Inc.">
      <label>Email <input type="EMAIL" name="email" autocomplete="email"></label>
      <span id="phone-help">Digits only</span>
      <input type="tel" name="phone" aria-describedby="phone-help missing" aria-required="true">
      <select name="state" required><option>CA</option></select>
      <textarea name="about" placeholder=""></textarea>
      <input type="hidden" name="token" value="x">
      <input type="image" src="go.png">
      <button type="submit" class="btn primary">Next  step</button>
      <input type="button" value="Back">
      <a role="button" href="#">Skip</a>
    </form>
  </div>
</body></html>"##;

    #[test]
    fn test_forms_in_document_order() {
        let doc = Html::parse_document(SIGNUP);
        let forms = extract_forms(&doc);
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[0].index, 0);
        assert_eq!(forms[0].action.as_deref(), Some("/search"));
        assert_eq!(forms[0].method, "get");
        assert_eq!(forms[1].index, 1);
        assert_eq!(forms[1].method, "post");
    }

    #[test]
    fn test_dataset_uses_dom_keys() {
        let doc = Html::parse_document(SIGNUP);
        let forms = extract_forms(&doc);
        let keys: Vec<&str> = forms[1].dataset.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["flowName", "step"]);
        assert_eq!(forms[1].dataset["step"], "1");
        assert!(forms[0].dataset.is_empty());
    }

    #[test]
    fn test_field_attributes() {
        let doc = Html::parse_document(SIGNUP);
        let forms = extract_forms(&doc);
        let fields = &forms[1].fields;
        let names: Vec<Option<&str>> = fields.iter().map(|f| f.name.as_deref()).collect();
        assert_eq!(
            names,
            vec![
                Some("business_name"),
                Some("email"),
                Some("phone"),
                Some("state"),
                Some("about"),
                Some("token"),
                None,
                None,
            ]
        );

        let biz = &fields[0];
        assert_eq!(biz.tag, "input");
        assert_eq!(biz.field_type.as_deref(), Some("text"));
        assert!(biz.required);
        assert_eq!(biz.placeholder.as_deref(), Some("Acme Inc."));
        assert_eq!(biz.id.as_deref(), Some("biz"));

        let email = &fields[1];
        assert_eq!(email.field_type.as_deref(), Some("email"));
        assert_eq!(email.autocomplete.as_deref(), Some("email"));
        assert!(!email.required);

        let state = &fields[3];
        assert_eq!(state.tag, "select");
        assert_eq!(state.field_type, None);
        assert!(state.required);

        assert_eq!(fields[4].placeholder, None);

        let button = &fields[6];
        assert_eq!(button.tag, "button");
        assert_eq!(button.field_type.as_deref(), Some("submit"));
    }

    #[test]
    fn test_label_resolution_precedence() {
        let doc = Html::parse_document(SIGNUP);
        let forms = extract_forms(&doc);
        let fields = &forms[1].fields;
        assert_eq!(fields[0].labels, vec!["Business name".to_string()]);
        assert_eq!(fields[1].labels, vec!["Email".to_string()]);
        assert_eq!(fields[2].labels, vec!["Digits only".to_string()]);
        assert_eq!(fields[2].aria_required.as_deref(), Some("true"));
        assert_eq!(forms[0].fields[0].labels, vec!["Search".to_string()]);
        assert!(fields[5].labels.is_empty());
    }

    #[test]
    fn test_all_label_sources_collected() {
        let doc = Html::parse_document(
            r#"<form>
                 <label for="e">Email</label>
                 <p id="hint">We never share it</p>
                 <input id="e" aria-describedby="hint" aria-label=" Your email ">
                 <label for="e">Work email</label>
               </form>"#,
        );
        let forms = extract_forms(&doc);
        assert_eq!(
            forms[0].fields[0].labels,
            vec!["Email", "Work email", "We never share it", "Your email"]
        );
    }

    #[test]
    fn test_submit_candidates() {
        let doc = Html::parse_document(SIGNUP);
        let forms = extract_forms(&doc);
        let submitters = &forms[1].submitters;
        assert_eq!(submitters.len(), 3);

        assert_eq!(submitters[0].text, "Next step");
        assert_eq!(submitters[0].kind, "submit");
        assert_eq!(
            submitters[0].selector,
            "html > body > div.panel:nth-of-type(2) > form > button.btn.primary"
        );

        assert_eq!(submitters[1].text, "Back");
        assert_eq!(submitters[1].kind, "button");

        assert_eq!(submitters[2].text, "Skip");
        assert_eq!(submitters[2].kind, "a");
        assert!(forms[0].submitters.is_empty());
    }

    #[test]
    fn test_extraction_is_repeatable() {
        let doc = Html::parse_document(SIGNUP);
        assert_eq!(extract_forms(&doc), extract_forms(&doc));
        let again = Html::parse_document(SIGNUP);
        assert_eq!(extract_forms(&doc), extract_forms(&again));
    }

    #[test]
    fn test_dataset_key_conversion() {
        assert_eq!(dataset_key("step"), "step");
        assert_eq!(dataset_key("step-count"), "stepCount");
        assert_eq!(dataset_key("a-1"), "a-1");
        assert_eq!(dataset_key("wizard-step-id"), "wizardStepId");
    }

    #[test]
    fn test_duplicate_id_label_goes_to_first_element() {
        let doc = Html::parse_document(
            r#"<form>
                 <label for="dup">Phone</label>
                 <input id="dup" name="home">
                 <input id="dup" name="work">
               </form>"#,
        );
        let fields = &extract_forms(&doc)[0].fields;
        assert_eq!(fields[0].labels, vec!["Phone".to_string()]);
        assert!(fields[1].labels.is_empty());
    }

    #[test]
    fn test_controls_owned_through_form_attribute() {
        let doc = Html::parse_document(
            r#"<body>
                 <form id="main" action="/a"><input name="inside" form="side"></form>
                 <form id="side" action="/b"></form>
                 <input name="outside" form="side">
                 <button form="side" type="submit">Send</button>
                 <input name="orphan" form="nowhere">
                 <input name="loose">
               </body>"#,
        );
        let forms = extract_forms(&doc);
        assert_eq!(forms.len(), 2);
        assert!(forms[0].fields.is_empty());
        let names: Vec<Option<&str>> = forms[1].fields.iter().map(|f| f.name.as_deref()).collect();
        assert_eq!(names, vec![Some("inside"), Some("outside"), None]);
        assert_eq!(forms[1].submitters.len(), 1);
        assert_eq!(forms[1].submitters[0].text, "Send");
    }

    #[test]
    fn test_controls_owned_by_form_opened_inside_table() {
        let doc = Html::parse_document(
            r#"<body>
                 <table><form action="/legacy" method="post">
                   <tr><td><input name="email"></td><td><button type="submit">Go</button></td></tr>
                 </form></table>
                 <input name="after">
               </body>"#,
        );
        let forms = extract_forms(&doc);
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].method, "post");
        let names: Vec<Option<&str>> = forms[0].fields.iter().map(|f| f.name.as_deref()).collect();
        assert_eq!(names, vec![Some("email"), None]);
        assert_eq!(forms[0].submitters.len(), 1);
        assert_eq!(forms[0].submitters[0].text, "Go");
    }

    #[test]
    fn test_empty_form_outside_table_owns_nothing() {
        let doc = Html::parse_document(r#"<body><form action="/x"></form><input name="loose"></body>"#);
        let forms = extract_forms(&doc);
        assert!(forms[0].fields.is_empty());
    }
}
