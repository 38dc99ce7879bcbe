//! Component identifiers and generated component payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifest::ManifestItem;

/// Identifies a kind of exhibit component.
///
/// Known kinds are enumerated so that dispatch tables can be checked for
/// coverage; kinds added at runtime travel as [`ComponentId::Custom`].
/// Serialized as a kebab-case string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentId {
    /// Opening narrative that frames the exhibit.
    CuratorBrief,
    /// Grid of flip cards, one concept each.
    ConceptCardGrid,
    /// Part-whole bar model.
    BarModel,
    /// Number line with marked points.
    NumberLine,
    /// Side-by-side comparison of two ideas.
    ComparisonPanel,
    /// Quick multiple-choice knowledge check.
    KnowledgeCheck,
    /// Flashcard deck for recall practice.
    FlashcardDeck,
    /// Free-form visualization rendered by a generated script.
    CustomVisual,
    /// Any kind registered at runtime.
    Custom(String),
}

impl ComponentId {
    /// Every enumerated (non-custom) component kind.
    pub const KNOWN: [Self; 8] = [
        Self::CuratorBrief,
        Self::ConceptCardGrid,
        Self::BarModel,
        Self::NumberLine,
        Self::ComparisonPanel,
        Self::KnowledgeCheck,
        Self::FlashcardDeck,
        Self::CustomVisual,
    ];

    /// Returns the wire name of this component kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CuratorBrief => "curator-brief",
            Self::ConceptCardGrid => "concept-card-grid",
            Self::BarModel => "bar-model",
            Self::NumberLine => "number-line",
            Self::ComparisonPanel => "comparison-panel",
            Self::KnowledgeCheck => "knowledge-check",
            Self::FlashcardDeck => "flashcard-deck",
            Self::CustomVisual => "custom-visual",
            Self::Custom(name) => name,
        }
    }

    /// Parses a component name case-insensitively. Unknown names become
    /// `Custom`, lowercased, so one kind never maps to two registry keys.
    ///
    /// Returns `None` for blank input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();
        let known = Self::KNOWN
            .into_iter()
            .find(|id| id.as_str() == lowered);
        Some(known.unwrap_or_else(|| Self::Custom(lowered)))
    }

    /// The canonical form of this id: custom names trimmed and lowercased,
    /// custom names of known kinds resolved to the known variant.
    #[must_use]
    pub fn normalized(&self) -> Self {
        match self {
            Self::Custom(name) => Self::parse(name).unwrap_or_else(|| self.clone()),
            known => known.clone(),
        }
    }

    /// Returns `true` for kinds added at runtime.
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ComponentId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom("component id must not be empty"))
    }
}

impl Serialize for ComponentId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// The successful output of a generator for one manifest item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedComponent {
    /// Component kind, mirrored from the manifest item.
    #[serde(rename = "type")]
    pub component_id: ComponentId,
    /// Instance id of the manifest item this output fills.
    pub instance_id: String,
    /// Component-specific content.
    pub data: Value,
}

impl GeneratedComponent {
    /// Creates a component for `item` carrying `data`.
    #[must_use]
    pub fn for_item(item: &ManifestItem, data: Value) -> Self {
        Self {
            component_id: item.component_id.clone(),
            instance_id: item.instance_id.clone(),
            data,
        }
    }

    /// Returns the executable script in this component, if it carries one.
    #[must_use]
    pub fn executable(&self, default_library: &str) -> Option<ExecutableContent> {
        ExecutableContent::from_data(&self.data, default_library)
    }

    /// Replaces the script after a successful (possibly repaired) execution.
    pub fn apply_script(&mut self, script: &str, repair_count: u32) {
        if let Value::Object(map) = &mut self.data {
            map.insert("script".to_string(), Value::String(script.to_string()));
            map.insert("repairCount".to_string(), Value::from(repair_count));
        }
    }
}

/// A script generated to run against a rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableContent {
    /// Script source.
    pub script: String,
    /// Library the script targets (e.g. "d3").
    pub library: String,
}

impl ExecutableContent {
    /// Classifies component data as executable when it is an object with a
    /// non-blank string `script` field.
    #[must_use]
    pub fn from_data(data: &Value, default_library: &str) -> Option<Self> {
        let script = data.get("script")?.as_str()?;
        if script.trim().is_empty() {
            return None;
        }
        let library = data
            .get("library")
            .and_then(Value::as_str)
            .filter(|lib| !lib.trim().is_empty())
            .unwrap_or(default_library);
        Some(Self {
            script: script.to_string(),
            library: library.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_component_id_parse_known_case_insensitive() {
        assert_eq!(ComponentId::parse("bar-model"), Some(ComponentId::BarModel));
        assert_eq!(ComponentId::parse("NUMBER-LINE"), Some(ComponentId::NumberLine));
        assert_eq!(
            ComponentId::parse("  Custom-Visual "),
            Some(ComponentId::CustomVisual)
        );
    }

    #[test]
    fn test_component_id_parse_unknown_is_custom() {
        let id = ComponentId::parse("periodic-table").unwrap();
        assert_eq!(id, ComponentId::Custom("periodic-table".to_string()));
        assert!(id.is_custom());
        assert_eq!(id.to_string(), "periodic-table");
    }

    #[test]
    fn test_custom_names_ignore_case() {
        let upper = ComponentId::parse("Periodic-Table").unwrap();
        let lower = ComponentId::parse("periodic-table").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "periodic-table");

        let raw = ComponentId::Custom(" Periodic-TABLE ".to_string());
        assert_eq!(raw.normalized(), lower);
        assert_eq!(
            ComponentId::Custom("Bar-Model".to_string()).normalized(),
            ComponentId::BarModel
        );
    }

    #[test]
    fn test_component_id_parse_blank() {
        assert_eq!(ComponentId::parse("   "), None);
        let result: std::result::Result<ComponentId, _> = serde_json::from_str(r#""""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_component_id_known_names_roundtrip() {
        for id in ComponentId::KNOWN {
            assert_eq!(ComponentId::parse(id.as_str()), Some(id.clone()));
            assert!(!id.is_custom());
        }
    }

    #[test]
    fn test_generated_component_serialization() {
        let component = GeneratedComponent {
            component_id: ComponentId::BarModel,
            instance_id: "a".to_string(),
            data: json!({"bars": [1, 2]}),
        };
        let json = serde_json::to_string(&component).unwrap();
        assert!(json.contains(r#""type":"bar-model""#));
        assert!(json.contains(r#""instanceId":"a""#));
    }

    #[test]
    fn test_executable_classification() {
        let data = json!({"script": "svg.append('g')", "library": "d3"});
        let exec = ExecutableContent::from_data(&data, "p5").unwrap();
        assert_eq!(exec.library, "d3");

        let data = json!({"script": "draw()"});
        let exec = ExecutableContent::from_data(&data, "p5").unwrap();
        assert_eq!(exec.library, "p5");

        assert!(ExecutableContent::from_data(&json!({"script": "  "}), "d3").is_none());
        assert!(ExecutableContent::from_data(&json!({"cards": []}), "d3").is_none());
        assert!(ExecutableContent::from_data(&json!("script"), "d3").is_none());
    }

    #[test]
    fn test_apply_script_writes_back() {
        let mut component = GeneratedComponent {
            component_id: ComponentId::CustomVisual,
            instance_id: "viz".to_string(),
            data: json!({"script": "broken()"}),
        };
        component.apply_script("fixed()", 1);
        assert_eq!(component.data["script"], "fixed()");
        assert_eq!(component.data["repairCount"], 1);
    }
}
