use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One saved profile and the lists it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub profile_urn: String,
    pub full_name: String,
    pub profile_url: String,
    #[serde(default)]
    pub list_membership: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocument {
    /// Lists only apply once the operator has switched the feature on.
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    profiles: Vec<ListRecord>,
}

/// Key-value list storage backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonListStore {
    path: PathBuf,
}

impl JsonListStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn load(&self) -> Result<Option<ListDocument>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .with_context(|| format!("Failed to parse list file: {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read list file: {}", self.path.display())),
        }
    }

    /// Members of `list`. `Ok(None)` when there is no usable store (file
    /// missing or the enabling flag absent/false); a list that simply has
    /// no members is `Ok(Some(vec![]))`.
    pub fn members(&self, list: &str) -> Result<Option<Vec<ListRecord>>> {
        let Some(doc) = self.load()? else {
            tracing::debug!(path = %self.path.display(), "no list file");
            return Ok(None);
        };
        if doc.enabled != Some(true) {
            tracing::debug!("lists not enabled");
            return Ok(None);
        }
        let wanted = list.trim().to_lowercase();
        Ok(Some(
            doc.profiles
                .into_iter()
                .filter(|p| p.list_membership.iter().any(|m| m.trim().to_lowercase() == wanted))
                .collect(),
        ))
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        let Some(doc) = self.load()? else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = doc
            .profiles
            .iter()
            .flat_map(|p| p.list_membership.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "enabled": true,
        "profiles": [
            {"profileUrn": "urn:li:fs_miniProfile:A", "fullName": "Jane Doe",
             "profileUrl": "https://www.linkedin.com/in/jane-doe", "listMembership": ["Leads", "VIP"]},
            {"profileUrn": "urn:li:fs_miniProfile:B", "fullName": "Kim Park",
             "profileUrl": "https://www.linkedin.com/in/kim-park", "listMembership": ["leads"]},
            {"profileUrn": "urn:li:fs_miniProfile:C", "fullName": "Bo Chen",
             "profileUrl": "https://www.linkedin.com/in/bo-chen"}
        ]
    }"#;

    fn store_with(content: &str) -> (tempfile::TempDir, JsonListStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists.json");
        std::fs::write(&path, content).unwrap();
        let store = JsonListStore::new(&path);
        (dir, store)
    }

    #[test]
    fn test_members_case_insensitive() {
        let (_dir, store) = store_with(DOC);
        let leads = store.members("LEADS").unwrap().unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(store.members("VIP").unwrap().unwrap()[0].full_name, "Jane Doe");
        assert_eq!(store.members("nobody").unwrap(), Some(vec![]));
        assert_eq!(store.list_names().unwrap(), vec!["Leads", "VIP", "leads"]);
    }

    #[test]
    fn test_missing_flag_is_empty_not_error() {
        let (_dir, store) = store_with(r#"{"profiles": []}"#);
        assert_eq!(store.members("Leads").unwrap(), None);
        let (_dir, store) = store_with(r#"{"enabled": false, "profiles": []}"#);
        assert_eq!(store.members("Leads").unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonListStore::new(&dir.path().join("absent.json"));
        assert_eq!(store.members("Leads").unwrap(), None);
        assert!(store.list_names().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_errors() {
        let (_dir, store) = store_with("[1,2");
        assert!(store.members("Leads").is_err());
    }
}
