//! Read-only project catalog

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_permission_mode() -> String {
    "default".to_string()
}

/// A project the bridge can start sessions against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
}

impl ProjectProfile {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.slug
        } else {
            &self.name
        }
    }
}

/// Projects loaded from configuration, looked up by slug
#[derive(Debug, Clone, Default)]
pub struct ProjectCatalog {
    projects: Vec<ProjectProfile>,
}

impl ProjectCatalog {
    pub fn new(projects: Vec<ProjectProfile>) -> Self {
        Self { projects }
    }

    /// Case-insensitive slug lookup
    pub fn get(&self, slug: &str) -> Option<&ProjectProfile> {
        self.projects
            .iter()
            .find(|p| p.slug.eq_ignore_ascii_case(slug))
    }

    pub fn list(&self) -> &[ProjectProfile] {
        &self.projects
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(slug: &str, name: &str) -> ProjectProfile {
        ProjectProfile {
            slug: slug.to_string(),
            name: name.to_string(),
            cwd: PathBuf::from("/tmp"),
            model: None,
            permission_mode: default_permission_mode(),
        }
    }

    #[test]
    fn test_lookup_ignores_case() {
        let catalog = ProjectCatalog::new(vec![profile("Web", "Website")]);
        assert_eq!(catalog.get("web").map(|p| p.slug.as_str()), Some("Web"));
        assert!(catalog.get("api").is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_slug() {
        assert_eq!(profile("api", "").display_name(), "api");
        assert_eq!(profile("api", "Public API").display_name(), "Public API");
    }

    #[test]
    fn test_profile_defaults() {
        let p: ProjectProfile = toml::from_str("slug = \"x\"\ncwd = \"/srv/x\"").unwrap();
        assert_eq!(p.permission_mode, "default");
        assert!(p.model.is_none());
        assert_eq!(p.display_name(), "x");
    }
}
