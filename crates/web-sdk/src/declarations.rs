//! Experiment declarations read from markup attributes.

use serde::{Deserialize, Serialize};
use splitlane_experiments::Declaration;
use std::collections::HashMap;
use tracing::debug;

pub const ATTR_EXPERIMENT: &str = "data-ab-test";
pub const ATTR_VARIANT: &str = "data-variant";
pub const ATTR_COPY: &str = "data-copy";
pub const ATTR_STYLE: &str = "data-style";
pub const ATTR_WEIGHT: &str = "data-weight";

/// A page element as seen by the adapter: its attributes and text content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkupElement {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MarkupElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            attributes: HashMap::new(),
            text: Some(text.into()),
        }
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

/// Build a declaration from an element's attributes. Returns `None` for
/// elements without an experiment attribute; incomplete declarations are
/// still returned so discovery can report them.
pub fn parse_declaration(
    attributes: &HashMap<String, String>,
    content: Option<&str>,
) -> Option<Declaration> {
    let experiment = attributes.get(ATTR_EXPERIMENT)?;
    let weight = attributes.get(ATTR_WEIGHT).map(|raw| {
        // unparsable weights fail declaration validation
        raw.trim().parse::<f64>().unwrap_or(f64::NAN)
    });

    Some(Declaration {
        experiment: Some(experiment.clone()),
        variant: attributes.get(ATTR_VARIANT).cloned(),
        copy: attributes.get(ATTR_COPY).cloned(),
        style: attributes.get(ATTR_STYLE).cloned(),
        weight,
        content: content.map(str::to_string),
    })
}

/// Collect declarations from every experiment-bearing element, in page order.
pub fn scan_elements(elements: &[MarkupElement]) -> Vec<Declaration> {
    let declarations: Vec<Declaration> = elements
        .iter()
        .filter_map(|el| parse_declaration(&el.attributes, el.text.as_deref()))
        .collect();
    debug!(
        elements = elements.len(),
        declarations = declarations.len(),
        "Scanned markup for experiments"
    );
    declarations
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_declaration() {
        let el = MarkupElement::new("Start Free")
            .attr(ATTR_EXPERIMENT, "cta-test")
            .attr(ATTR_VARIANT, "B")
            .attr(ATTR_COPY, "Try Now")
            .attr(ATTR_STYLE, "btn-green")
            .attr(ATTR_WEIGHT, "2.5")
            .attr("class", "hero-button");

        let decl = parse_declaration(&el.attributes, el.text.as_deref()).unwrap();
        assert_eq!(decl.experiment.as_deref(), Some("cta-test"));
        assert_eq!(decl.variant.as_deref(), Some("B"));
        assert_eq!(decl.copy.as_deref(), Some("Try Now"));
        assert_eq!(decl.style.as_deref(), Some("btn-green"));
        assert_eq!(decl.weight, Some(2.5));
        assert_eq!(decl.content.as_deref(), Some("Start Free"));
    }

    #[test]
    fn test_elements_without_experiment_are_ignored() {
        let el = MarkupElement::new("Plain").attr(ATTR_VARIANT, "A");
        assert!(parse_declaration(&el.attributes, None).is_none());
    }

    #[test]
    fn test_bad_weight_fails_validation() {
        let el = MarkupElement::new("Grid")
            .attr(ATTR_EXPERIMENT, "layout")
            .attr(ATTR_VARIANT, "grid")
            .attr(ATTR_WEIGHT, "heavy");
        let decl = parse_declaration(&el.attributes, None).unwrap();
        assert!(decl.validate().is_err());
    }

    #[test]
    fn test_scan_keeps_incomplete_declarations() {
        let elements = vec![
            MarkupElement::new("Start Free")
                .attr(ATTR_EXPERIMENT, "cta-test")
                .attr(ATTR_VARIANT, "A"),
            MarkupElement::new("Footer"),
            MarkupElement::new("Orphan").attr(ATTR_EXPERIMENT, "cta-test"),
        ];
        let declarations = scan_elements(&elements);
        assert_eq!(declarations.len(), 2);
        assert!(declarations[1].variant.is_none());
    }
}
