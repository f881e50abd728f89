//! Filters over page content: image links and maintenance templates

use serde::{Deserialize, Serialize};

use super::{require_meta, FlawAction, FlawFilter, PageContext};

/// Templates marking missing or insufficient sources
pub const MISSING_SOURCES_TEMPLATES: &[&str] = &[
    "Refimprove",
    "More citations needed",
    "Unreferenced",
    "Belege fehlen",
];

/// Flags articles without any image links
#[derive(Debug, Clone, Default)]
pub struct NoImagesFilter;

impl FlawFilter for NoImagesFilter {
    fn name(&self) -> &str {
        "NoImages"
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let meta = require_meta!(ctx);
        if meta.is_article() && meta.image_count == 0 {
            FlawAction::flawed(self.name(), "no image links", 0)
        } else {
            FlawAction::NotFlawed
        }
    }
}

/// Whether a template's presence or absence is the flaw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Page transcludes one of the templates
    #[default]
    Present,
    /// Page transcludes none of the templates
    Absent,
}

/// Flags pages by maintenance template
#[derive(Debug, Clone)]
pub struct TemplateFilter {
    name: String,
    templates: Vec<String>,
    mode: TemplateMode,
}

impl TemplateFilter {
    /// Filter named `name` over a template list
    pub fn new(name: impl Into<String>, templates: Vec<String>, mode: TemplateMode) -> Self {
        Self {
            name: name.into(),
            templates,
            mode,
        }
    }

    /// Pages carrying a "missing sources" template
    pub fn missing_sources() -> Self {
        Self::new(
            "MissingSources",
            MISSING_SOURCES_TEMPLATES.iter().map(|t| t.to_string()).collect(),
            TemplateMode::Present,
        )
    }

    /// Templates checked
    pub fn templates(&self) -> &[String] {
        &self.templates
    }
}

impl FlawFilter for TemplateFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let meta = require_meta!(ctx);
        let found = self.templates.iter().find(|t| meta.has_template(t));

        match (self.mode, found) {
            (TemplateMode::Present, Some(template)) => {
                FlawAction::flawed(&self.name, format!("Template:{}", template), 0)
            }
            (TemplateMode::Absent, None) => FlawAction::flawed(
                &self.name,
                format!("missing Template:{}", self.templates.join(", Template:")),
                0,
            ),
            _ => FlawAction::NotFlawed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flaws::fixtures;
    use crate::page::PageMeta;

    fn eval(filter: &dyn FlawFilter, meta: PageMeta) -> FlawAction {
        let page = meta.page.clone();
        let lookup = fixtures::lookup(vec![meta]);
        let ctx = PageContext::new(&page, &lookup);
        filter.evaluate(&ctx)
    }

    #[test]
    fn test_no_images() {
        let mut bare = fixtures::meta(1, 100);
        bare.image_count = 0;
        assert!(eval(&NoImagesFilter, bare).is_flawed());
        assert_eq!(eval(&NoImagesFilter, fixtures::meta(2, 100)), FlawAction::NotFlawed);
    }

    #[test]
    fn test_template_present() {
        let mut meta = fixtures::meta(1, 100);
        meta.templates = vec!["Belege_fehlen".to_string()];

        match eval(&TemplateFilter::missing_sources(), meta) {
            FlawAction::Flawed(evidence) => {
                assert_eq!(evidence.notes[0].filter, "MissingSources");
                assert_eq!(evidence.notes[0].info, "Template:Belege fehlen");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            eval(&TemplateFilter::missing_sources(), fixtures::meta(2, 100)),
            FlawAction::NotFlawed
        );
    }

    #[test]
    fn test_template_absent() {
        let filter = TemplateFilter::new(
            "NoInfobox",
            vec!["Infobox".to_string()],
            TemplateMode::Absent,
        );
        assert!(eval(&filter, fixtures::meta(1, 100)).is_flawed());

        let mut meta = fixtures::meta(2, 100);
        meta.templates = vec!["infobox".to_string()];
        assert_eq!(eval(&filter, meta), FlawAction::NotFlawed);
    }
}
