//! Filter configuration, textual filter specs and the flaw catalogue

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlgcache::{CacheConfig, CacheFactory, ListCache, DEFAULT_HISTORY_LEN};

use super::changedetector::{ChangeDetectorFilter, PageSnapshot, DEFAULT_BASELINE_NAMESPACE};
use super::content::{NoImagesFilter, TemplateFilter, TemplateMode};
use super::recent::{RecentlyChangedFilter, DEFAULT_WINDOW};
use super::size::{SizeDirection, SizeFilter};
use super::testing::{AllFilter, NopFilter, UnluckyFilter, UnluckyMode};
use super::FlawFilter;
use crate::done::DoneMarks;

const DEFAULT_LARGE: u64 = 60_000;
const DEFAULT_SMALL: u64 = 1_500;

/// Bad textual filter spec
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterSpecError {
    /// No filter with that name
    #[error("unknown flaw '{0}'")]
    Unknown(String),

    /// Filter needs an argument
    #[error("flaw '{0}' needs an argument")]
    MissingArgument(String),

    /// Argument could not be parsed
    #[error("invalid argument '{arg}' for flaw '{filter}'")]
    InvalidArgument {
        /// Filter name
        filter: String,
        /// Offending argument
        arg: String,
    },
}

/// Serializable description of one filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Byte-length threshold
    Size {
        /// Threshold in bytes
        threshold: u64,
        /// Which side is flawed
        direction: SizeDirection,
    },
    /// No image links
    NoImages,
    /// Template presence or absence
    Template {
        /// Templates to look for
        templates: Vec<String>,
        /// Presence or absence is the flaw
        #[serde(default)]
        mode: TemplateMode,
    },
    /// One of the "missing sources" templates is present
    MissingSources,
    /// Touched within a window
    RecentlyChanged {
        /// Window in seconds
        window_secs: u64,
    },
    /// Revision differs from the recorded baseline
    ChangeDetector,
    /// Never flawed
    Nop,
    /// Always flawed
    All,
    /// Fault injection
    Unlucky {
        /// When to fail
        #[serde(default)]
        mode: UnluckyMode,
    },
}

/// Shared state some filters need
#[derive(Clone)]
pub struct FilterResources {
    /// Change-detector baseline history
    pub baseline: Arc<ListCache<String, PageSnapshot>>,
    /// Flaws marked as done
    pub done: DoneMarks,
}

impl FilterResources {
    /// Resources backed by the given cache factory
    pub fn from_factory(factory: &CacheFactory) -> Self {
        Self {
            baseline: Arc::new(factory.build_list(
                CacheConfig::new(DEFAULT_BASELINE_NAMESPACE),
                DEFAULT_HISTORY_LEN,
            )),
            done: DoneMarks::from_factory(factory),
        }
    }

    /// Resources held in memory only
    pub fn in_memory() -> Self {
        Self::from_factory(&CacheFactory::memory())
    }
}

impl FilterConfig {
    /// Instantiate the filter
    pub fn build(&self, resources: &FilterResources) -> Arc<dyn FlawFilter> {
        match self {
            FilterConfig::Size {
                threshold,
                direction,
            } => Arc::new(SizeFilter::new(*threshold, *direction)),
            FilterConfig::NoImages => Arc::new(NoImagesFilter),
            FilterConfig::Template { templates, mode } => {
                let name = match mode {
                    TemplateMode::Present => "Template",
                    TemplateMode::Absent => "NoTemplate",
                };
                Arc::new(TemplateFilter::new(name, templates.clone(), *mode))
            }
            FilterConfig::MissingSources => Arc::new(TemplateFilter::missing_sources()),
            FilterConfig::RecentlyChanged { window_secs } => {
                Arc::new(RecentlyChangedFilter::new(Duration::from_secs(*window_secs)))
            }
            FilterConfig::ChangeDetector => {
                Arc::new(ChangeDetectorFilter::new(resources.baseline.clone()))
            }
            FilterConfig::Nop => Arc::new(NopFilter),
            FilterConfig::All => Arc::new(AllFilter),
            FilterConfig::Unlucky { mode } => Arc::new(UnluckyFilter::new(*mode)),
        }
    }

    /// Parse a whitespace- or comma-separated list of specs.
    ///
    /// Commas inside an `Unlucky:p=..,seed=..` argument stay with it.
    pub fn parse_list(input: &str) -> Result<Vec<FilterConfig>, FilterSpecError> {
        let mut specs: Vec<String> = Vec::new();
        for token in input.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            match specs.last_mut() {
                Some(prev) if token.starts_with("seed=") && prev.contains("p=") => {
                    prev.push(',');
                    prev.push_str(token);
                }
                _ => specs.push(token.to_string()),
            }
        }
        specs.iter().map(|s| s.parse()).collect()
    }
}

fn parse_num<T: FromStr>(filter: &str, arg: &str) -> Result<T, FilterSpecError> {
    arg.trim().parse().map_err(|_| FilterSpecError::InvalidArgument {
        filter: filter.to_string(),
        arg: arg.to_string(),
    })
}

fn parse_unlucky(arg: Option<&str>) -> Result<UnluckyMode, FilterSpecError> {
    let Some(arg) = arg else {
        return Ok(UnluckyMode::default());
    };
    if arg.eq_ignore_ascii_case("always") {
        return Ok(UnluckyMode::Always);
    }
    if !arg.contains('=') {
        return Ok(UnluckyMode::Modulo(parse_num("Unlucky", arg)?));
    }

    let mut probability = None;
    let mut seed = None;
    for part in arg.split(',') {
        match part.split_once('=') {
            Some(("p", value)) => probability = Some(parse_num::<f64>("Unlucky", value)?),
            Some(("seed", value)) => seed = Some(parse_num::<u64>("Unlucky", value)?),
            _ => {
                return Err(FilterSpecError::InvalidArgument {
                    filter: "Unlucky".to_string(),
                    arg: arg.to_string(),
                })
            }
        }
    }
    let probability = probability.ok_or_else(|| FilterSpecError::MissingArgument("Unlucky".to_string()))?;
    if !(0.0..=1.0).contains(&probability) {
        return Err(FilterSpecError::InvalidArgument {
            filter: "Unlucky".to_string(),
            arg: arg.to_string(),
        });
    }
    Ok(UnluckyMode::Chance { probability, seed })
}

fn required<'a>(name: &str, arg: Option<&'a str>) -> Result<&'a str, FilterSpecError> {
    arg.filter(|a| !a.is_empty())
        .ok_or_else(|| FilterSpecError::MissingArgument(name.to_string()))
}

fn template_list(arg: &str) -> Vec<String> {
    arg.split('|')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl FromStr for FilterConfig {
    type Err = FilterSpecError;

    /// `Name` or `Name:argument`, names case-insensitive
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match spec.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (spec.trim(), None),
        };
        let config = match name.to_ascii_lowercase().as_str() {
            "sizebelow" => FilterConfig::Size {
                threshold: parse_num(name, required(name, arg)?)?,
                direction: SizeDirection::Below,
            },
            "sizeabove" => FilterConfig::Size {
                threshold: parse_num(name, required(name, arg)?)?,
                direction: SizeDirection::Above,
            },
            "small" => FilterConfig::Size {
                threshold: arg.map(|a| parse_num(name, a)).transpose()?.unwrap_or(DEFAULT_SMALL),
                direction: SizeDirection::Below,
            },
            "large" => FilterConfig::Size {
                threshold: arg.map(|a| parse_num(name, a)).transpose()?.unwrap_or(DEFAULT_LARGE),
                direction: SizeDirection::Above,
            },
            "noimages" => FilterConfig::NoImages,
            "template" => FilterConfig::Template {
                templates: template_list(required(name, arg)?),
                mode: TemplateMode::Present,
            },
            "notemplate" => FilterConfig::Template {
                templates: template_list(required(name, arg)?),
                mode: TemplateMode::Absent,
            },
            "missingsources" | "templatemissingsources" => FilterConfig::MissingSources,
            "recentlychanged" => FilterConfig::RecentlyChanged {
                window_secs: arg
                    .map(|a| parse_num(name, a))
                    .transpose()?
                    .unwrap_or(DEFAULT_WINDOW.as_secs()),
            },
            "changedetector" => FilterConfig::ChangeDetector,
            "nop" => FilterConfig::Nop,
            "all" => FilterConfig::All,
            "unlucky" => FilterConfig::Unlucky {
                mode: parse_unlucky(arg)?,
            },
            _ => return Err(FilterSpecError::Unknown(name.to_string())),
        };

        if let FilterConfig::Template { templates, .. } = &config {
            if templates.is_empty() {
                return Err(FilterSpecError::MissingArgument(name.to_string()));
            }
        }
        Ok(config)
    }
}

/// Catalogue entry describing a filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterInfo {
    /// Name used in specs
    pub shortname: &'static str,
    /// Display label
    pub label: &'static str,
    /// Longer description
    pub description: &'static str,
    /// Display group
    pub group: Option<&'static str>,
}

/// Every filter this build knows
pub fn catalogue() -> Vec<FilterInfo> {
    vec![
        FilterInfo {
            shortname: "ALL",
            label: "All Pages",
            description: "Every page from the category query.",
            group: None,
        },
        FilterInfo {
            shortname: "ChangeDetector",
            label: "Change Detector",
            description: "Page revision differs from the one recorded on the previous run.",
            group: Some("Currentness"),
        },
        FilterInfo {
            shortname: "Large",
            label: "Large Pages",
            description: "Page is larger than the byte threshold (SizeAbove:N).",
            group: None,
        },
        FilterInfo {
            shortname: "MissingSources",
            label: "Missing Sources/References Template",
            description: "Page has a 'missing sources' template set.",
            group: None,
        },
        FilterInfo {
            shortname: "NoImages",
            label: "No Images",
            description: "Article has no image links.",
            group: None,
        },
        FilterInfo {
            shortname: "NoTemplate",
            label: "Missing Template",
            description: "Page has none of the given templates (NoTemplate:A|B).",
            group: None,
        },
        FilterInfo {
            shortname: "Nop",
            label: "Nop",
            description: "Flaw filter test class, never matches.",
            group: Some("Testing"),
        },
        FilterInfo {
            shortname: "RecentlyChanged",
            label: "Recently Changed",
            description: "Page was touched within the window (RecentlyChanged:SECONDS).",
            group: Some("Timeliness"),
        },
        FilterInfo {
            shortname: "Small",
            label: "Small Pages",
            description: "Page is smaller than the byte threshold (SizeBelow:N).",
            group: None,
        },
        FilterInfo {
            shortname: "Template",
            label: "Template",
            description: "Page has one of the given templates set (Template:A|B).",
            group: None,
        },
        FilterInfo {
            shortname: "Unlucky",
            label: "Unlucky",
            description: "Fails evaluation for unlucky pages (Unlucky:N, Unlucky:always, Unlucky:p=P,seed=S).",
            group: Some("Testing"),
        },
    ]
}

/// Catalogue as a JSON object keyed by short name
pub fn catalogue_json() -> serde_json::Result<String> {
    let map: BTreeMap<&str, serde_json::Value> = catalogue()
        .into_iter()
        .map(|info| {
            (
                info.shortname,
                serde_json::json!({
                    "group": info.group,
                    "label": info.label,
                    "description": info.description,
                }),
            )
        })
        .collect();
    serde_json::to_string_pretty(&map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_specs() {
        assert_eq!(
            "SizeBelow:500".parse::<FilterConfig>().unwrap(),
            FilterConfig::Size {
                threshold: 500,
                direction: SizeDirection::Below
            }
        );
        assert_eq!(
            "large".parse::<FilterConfig>().unwrap(),
            FilterConfig::Size {
                threshold: DEFAULT_LARGE,
                direction: SizeDirection::Above
            }
        );
        assert_eq!(
            "SizeBelow".parse::<FilterConfig>(),
            Err(FilterSpecError::MissingArgument("SizeBelow".to_string()))
        );
        assert!(matches!(
            "SizeAbove:lots".parse::<FilterConfig>(),
            Err(FilterSpecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_parse_templates() {
        assert_eq!(
            "NoTemplate:Infobox|Taxobox".parse::<FilterConfig>().unwrap(),
            FilterConfig::Template {
                templates: vec!["Infobox".to_string(), "Taxobox".to_string()],
                mode: TemplateMode::Absent
            }
        );
        assert!("Template:".parse::<FilterConfig>().is_err());
    }

    #[test]
    fn test_parse_unlucky() {
        assert_eq!(
            "Unlucky".parse::<FilterConfig>().unwrap(),
            FilterConfig::Unlucky {
                mode: UnluckyMode::Modulo(13)
            }
        );
        assert_eq!(
            "Unlucky:always".parse::<FilterConfig>().unwrap(),
            FilterConfig::Unlucky {
                mode: UnluckyMode::Always
            }
        );
        assert_eq!(
            "Unlucky:p=0.5,seed=7".parse::<FilterConfig>().unwrap(),
            FilterConfig::Unlucky {
                mode: UnluckyMode::Chance {
                    probability: 0.5,
                    seed: Some(7)
                }
            }
        );
        assert!("Unlucky:p=2".parse::<FilterConfig>().is_err());
    }

    #[test]
    fn test_parse_list() {
        let list = FilterConfig::parse_list("SizeBelow:500, NoImages Unlucky:p=0.1,seed=3").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1], FilterConfig::NoImages);
        assert!(matches!(
            list[2],
            FilterConfig::Unlucky {
                mode: UnluckyMode::Chance { seed: Some(3), .. }
            }
        ));
        assert_eq!(
            FilterConfig::parse_list("Bogus"),
            Err(FilterSpecError::Unknown("Bogus".to_string()))
        );
    }

    #[test]
    fn test_serde_tagged() {
        let json = r#"{"kind": "size", "threshold": 500, "direction": "below"}"#;
        let config: FilterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, "SizeBelow:500".parse().unwrap());

        let json = r#"{"kind": "unlucky"}"#;
        let config: FilterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, "Unlucky".parse().unwrap());
    }

    #[test]
    fn test_every_catalogue_entry_parses() {
        let resources = FilterResources::in_memory();
        for info in catalogue() {
            let spec = match info.shortname {
                "Template" | "NoTemplate" => format!("{}:Stub", info.shortname),
                other => other.to_string(),
            };
            let config: FilterConfig = spec.parse().unwrap();
            let filter = config.build(&resources);
            assert_eq!(filter.name(), info.shortname);
        }
    }

    #[test]
    fn test_catalogue_json_keys() {
        let json = catalogue_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["NoImages"]["label"], "No Images");
        assert_eq!(value["RecentlyChanged"]["group"], "Timeliness");
    }
}
