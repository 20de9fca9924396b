//! Declarative record extraction
//!
//! A rule is a root selector locating data cells plus an ordered list of
//! fields evaluated relative to each cell. Every cell yields one record.

use crate::config::{ExtractConfig, FieldConfig};
use crate::output::Record;
use crate::targets::TargetId;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Clone)]
struct CompiledField {
    name: String,
    selector: Option<Selector>,
    attr: Option<String>,
}

impl CompiledField {
    /// Evaluates the field against one cell; a field matching nothing is ""
    fn evaluate(&self, cell: ElementRef<'_>) -> String {
        let node = match &self.selector {
            Some(selector) => match cell.select(selector).next() {
                Some(node) => node,
                None => return String::new(),
            },
            None => cell,
        };

        match &self.attr {
            Some(attr) => node.value().attr(attr).unwrap_or("").trim().to_string(),
            None => collapse_whitespace(node.text()),
        }
    }
}

/// A compiled extraction rule
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    root: Selector,
    fields: Vec<CompiledField>,
}

fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

impl ExtractionRule {
    /// Compiles every selector of the rule
    pub fn compile(config: &ExtractConfig) -> Result<Self, ConfigError> {
        let root = compile_selector(&config.root)?;
        let fields = config
            .fields
            .iter()
            .map(|field: &FieldConfig| -> Result<CompiledField, ConfigError> {
                Ok(CompiledField {
                    name: field.name.clone(),
                    selector: field.selector.as_deref().map(compile_selector).transpose()?,
                    attr: field.attr.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { root, fields })
    }

    /// Field names in column order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Applies `rule` to `markup`, producing one record per matched cell
///
/// An empty result means the page had no cells at all.
pub fn extract(markup: &str, rule: &ExtractionRule, target: &TargetId) -> Vec<Record> {
    let document = Html::parse_document(markup);

    document
        .select(&rule.root)
        .map(|cell| Record {
            target: target.clone(),
            fields: rule
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.evaluate(cell)))
                .collect(),
        })
        .collect()
}

fn collapse_whitespace<'a>(text: impl Iterator<Item = &'a str>) -> String {
    let joined: String = text.collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}
