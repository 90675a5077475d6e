//! Entity type → cache tag templates.
//!
//! Templates may use two placeholders, `{tenant}` and `{id}`. A template that
//! needs `{id}` is skipped when the mutated entity has no id.

use crate::error::{CacheError, CacheResult};
use std::collections::{BTreeMap, BTreeSet};

const PLACEHOLDERS: &[&str] = &["{tenant}", "{id}"];

/// Static mapping from entity type to the tags a mutation invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTagMap {
    templates: BTreeMap<String, Vec<String>>,
}

impl Default for EntityTagMap {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        for (entity, collection, item) in [
            ("Client", "clients", "client"),
            ("Case", "cases", "case"),
            ("Document", "documents", "document"),
            ("Invoice", "invoices", "invoice"),
            ("Pricelist", "pricelists", "pricelist"),
        ] {
            templates.insert(
                entity.to_string(),
                vec![
                    format!("{}:{{tenant}}", collection),
                    format!("{}:{{tenant}}:{{id}}", item),
                ],
            );
        }
        Self { templates }
    }
}

impl EntityTagMap {
    /// Built-in mapping for the domain entities.
    ///
    /// ```
    /// use citadel_cache::EntityTagMap;
    ///
    /// let tags = EntityTagMap::new().tags_for("Client", "acme", Some("c-9"));
    /// assert_eq!(tags, vec!["clients:acme", "client:acme:c-9"]);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// A map with no entries.
    pub fn empty() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    /// Set the templates for one entity type, replacing any existing ones.
    pub fn with_templates<I, S>(mut self, entity_type: impl Into<String>, templates: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let templates: Vec<String> = templates.into_iter().map(Into::into).collect();
        for template in &templates {
            validate_template(template)?;
        }
        self.templates.insert(entity_type.into(), templates);
        Ok(self)
    }

    /// Layer configured overrides over this map.
    pub fn extend(mut self, overrides: &BTreeMap<String, Vec<String>>) -> CacheResult<Self> {
        for (entity, templates) in overrides {
            self = self.with_templates(entity.clone(), templates.iter().cloned())?;
        }
        Ok(self)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Render the tags for a mutation, in template order without duplicates.
    pub fn tags_for(&self, entity_type: &str, tenant_id: &str, entity_id: Option<&str>) -> Vec<String> {
        let Some(templates) = self.templates.get(entity_type) else {
            tracing::debug!(entity_type = %entity_type, "No cache tags mapped for entity type");
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        templates
            .iter()
            .filter_map(|template| {
                let rendered = template.replace("{tenant}", tenant_id);
                if rendered.contains("{id}") {
                    entity_id.map(|id| rendered.replace("{id}", id))
                } else {
                    Some(rendered)
                }
            })
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }
}

fn validate_template(template: &str) -> CacheResult<()> {
    if template.trim().is_empty() {
        return Err(CacheError::Config("empty tag template".to_string()));
    }

    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            return Err(CacheError::Config(format!("unclosed placeholder in {:?}", template)));
        };
        let placeholder = &rest[start..start + len + 1];
        if !PLACEHOLDERS.contains(&placeholder) {
            return Err(CacheError::Config(format!(
                "unknown placeholder {} in {:?}",
                placeholder, template
            )));
        }
        rest = &rest[start + len + 1..];
    }
    Ok(())
}
