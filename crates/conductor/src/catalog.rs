//! Model Catalogs
//!
//! Map model names to capability sets. Static entries are declared up
//! front; a remote catalog fetches a roster once and merges it over the
//! static base; the fallback catalog accepts any name with a permissive
//! capability set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::CatalogError;
use crate::model::{Capability, Model};

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model family or provider class (informational).
    #[serde(default)]
    pub class: String,

    /// Human-readable label.
    #[serde(default)]
    pub label: String,

    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
}

impl ModelEntry {
    /// Entry with just capabilities.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            class: String::new(),
            label: String::new(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    fn to_model(&self, name: &str) -> Model {
        Model::new(name, self.capabilities.iter().copied())
    }
}

/// Name to model resolution.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Resolve a model by name.
    async fn get_model(&self, name: &str) -> Result<Model, CatalogError>;

    /// Names of models whose capability set is a superset of the request,
    /// in catalog order.
    async fn find_models_with_capabilities(&self, capabilities: &[Capability]) -> Vec<String>;
}

/// Catalog over a fixed entry table.
pub struct StaticCatalog {
    // Insertion order matters: capability search returns the first match.
    order: Vec<String>,
    entries: HashMap<String, ModelEntry>,
}

impl StaticCatalog {
    /// Build from (name, entry) pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, ModelEntry)>) -> Self {
        let mut order = Vec::new();
        let mut map = HashMap::new();
        for (name, entry) in entries {
            if !map.contains_key(&name) {
                order.push(name.clone());
            }
            map.insert(name, entry);
        }
        Self {
            order,
            entries: map,
        }
    }

    fn lookup(&self, name: &str) -> Result<Model, CatalogError> {
        self.entries
            .get(name)
            .map(|entry| entry.to_model(name))
            .ok_or_else(|| CatalogError::UnknownModel(name.to_string()))
    }

    fn search(&self, capabilities: &[Capability]) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                self.entries
                    .get(*name)
                    .map(|e| capabilities.iter().all(|c| e.capabilities.contains(c)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn get_model(&self, name: &str) -> Result<Model, CatalogError> {
        self.lookup(name)
    }

    async fn find_models_with_capabilities(&self, capabilities: &[Capability]) -> Vec<String> {
        self.search(capabilities)
    }
}

/// Catalog that fetches a remote roster on first lookup and merges it
/// over a static base. The fetch is memoized for the catalog lifetime.
pub struct RemoteCatalog {
    url: String,
    client: reqwest::Client,
    base: StaticCatalog,
    merged: OnceCell<StaticCatalog>,
}

impl RemoteCatalog {
    /// Fetch from `url`, merging over `base` (remote entries win).
    pub fn new(url: impl Into<String>, base: StaticCatalog) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            base,
            merged: OnceCell::new(),
        }
    }

    async fn merged(&self) -> Result<&StaticCatalog, CatalogError> {
        self.merged
            .get_or_try_init(|| async {
                let remote: HashMap<String, ModelEntry> = self
                    .client
                    .get(&self.url)
                    .send()
                    .await
                    .map_err(|e| CatalogError::Fetch(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| CatalogError::Fetch(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| CatalogError::Fetch(e.to_string()))?;

                tracing::info!(url = %self.url, models = remote.len(), "Fetched remote catalog");

                let mut pairs: Vec<(String, ModelEntry)> = self
                    .base
                    .order
                    .iter()
                    .filter_map(|name| {
                        self.base
                            .entries
                            .get(name)
                            .map(|e| (name.clone(), e.clone()))
                    })
                    .collect();

                let mut names: Vec<String> = remote.keys().cloned().collect();
                names.sort();
                for name in names {
                    if let Some(entry) = remote.get(&name) {
                        pairs.retain(|(n, _)| n != &name);
                        pairs.push((name.clone(), entry.clone()));
                    }
                }

                Ok(StaticCatalog::new(pairs))
            })
            .await
    }
}

#[async_trait]
impl ModelCatalog for RemoteCatalog {
    async fn get_model(&self, name: &str) -> Result<Model, CatalogError> {
        self.merged().await?.lookup(name)
    }

    async fn find_models_with_capabilities(&self, capabilities: &[Capability]) -> Vec<String> {
        match self.merged().await {
            Ok(catalog) => catalog.search(capabilities),
            Err(e) => {
                tracing::warn!(error = %e, "Capability search against unfetched remote catalog");
                self.base.search(capabilities)
            }
        }
    }
}

/// Catalog that accepts any model name.
///
/// Returned by the failover platform, which cannot know which downstream
/// catalog the next call will use: every name resolves, with a capability
/// set permissive enough to never block dispatch.
#[derive(Debug, Default)]
pub struct FallbackCatalog;

impl FallbackCatalog {
    /// Create a fallback catalog.
    pub fn new() -> Self {
        Self
    }

    /// Shared instance.
    pub fn shared() -> Arc<dyn ModelCatalog> {
        Arc::new(Self)
    }

    fn permissive_capabilities() -> Vec<Capability> {
        vec![
            Capability::InputMessages,
            Capability::InputText,
            Capability::InputImage,
            Capability::InputAudio,
            Capability::InputPdf,
            Capability::InputVideo,
            Capability::InputMultiple,
            Capability::OutputText,
            Capability::OutputStreaming,
            Capability::OutputStructured,
            Capability::ToolCalling,
            Capability::Embeddings,
        ]
    }
}

#[async_trait]
impl ModelCatalog for FallbackCatalog {
    async fn get_model(&self, name: &str) -> Result<Model, CatalogError> {
        Ok(Model::new(name, Self::permissive_capabilities()))
    }

    async fn find_models_with_capabilities(&self, _capabilities: &[Capability]) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_entry() -> ModelEntry {
        ModelEntry::new([Capability::InputText, Capability::OutputText])
    }

    fn vision_entry() -> ModelEntry {
        ModelEntry::new([
            Capability::InputText,
            Capability::InputImage,
            Capability::OutputText,
        ])
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let catalog = StaticCatalog::new([
            ("tinytext".to_string(), text_entry()),
            ("vision-9b".to_string(), vision_entry()),
        ]);

        let model = catalog.get_model("vision-9b").await.unwrap();
        assert!(model.supports(Capability::InputImage));

        let err = catalog.get_model("nope").await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_capability_search_preserves_order() {
        let catalog = StaticCatalog::new([
            ("tinytext".to_string(), text_entry()),
            ("vision-9b".to_string(), vision_entry()),
            ("vision-70b".to_string(), vision_entry()),
        ]);

        let names = catalog
            .find_models_with_capabilities(&[Capability::InputImage])
            .await;
        assert_eq!(names, vec!["vision-9b", "vision-70b"]);

        let all_text = catalog
            .find_models_with_capabilities(&[Capability::InputText])
            .await;
        assert_eq!(all_text.len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_accepts_anything() {
        let catalog = FallbackCatalog::new();
        let model = catalog.get_model("completely-made-up").await.unwrap();
        assert!(model.supports(Capability::InputText));
        assert!(model.supports(Capability::Embeddings));
    }

    /// Serve one canned HTTP response, then stop listening.
    fn single_shot_http_server(body: &'static str) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            use std::io::{Read, Write};
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        format!("http://{}/models", addr)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_fetch_merges_and_memoizes() {
        let url = single_shot_http_server(
            r#"{"remote-9b": {"class": "remote", "label": "Remote", "capabilities": ["input-text", "output-text"]}}"#,
        );

        let base = StaticCatalog::new([("tinytext".to_string(), text_entry())]);
        let catalog = RemoteCatalog::new(url, base);

        let model = catalog.get_model("remote-9b").await.unwrap();
        assert!(model.supports(Capability::InputText));

        // The static base survives the merge.
        assert!(catalog.get_model("tinytext").await.is_ok());

        // The listener served exactly one request; a second lookup working
        // proves the fetch was memoized.
        let again = catalog.get_model("remote-9b").await.unwrap();
        assert_eq!(again.name, "remote-9b");
    }
}
