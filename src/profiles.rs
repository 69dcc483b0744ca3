//! Resolving target-list members to the display names the feed shows.

use crate::engine::batch::settle_all;
use crate::engine::names::normalize_name;
use crate::page::dom;
use crate::store::lists::ListRecord;
use crate::store::lookup_cache::{LookupCache, SharedCache};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

pub const PLATFORM: &str = "linkedin";
pub const RESOLVE_CONCURRENCY: usize = 10;

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Current display name for the member's profile.
    async fn resolve(&self, record: &ListRecord) -> Result<String>;
}

/// Trusts the name saved with the list entry.
pub struct StoredNameResolver;

#[async_trait]
impl ProfileResolver for StoredNameResolver {
    async fn resolve(&self, record: &ListRecord) -> Result<String> {
        let name = record.full_name.trim();
        anyhow::ensure!(!name.is_empty(), "list entry {} has no name", record.profile_urn);
        Ok(name.to_string())
    }
}

/// Fetches the profile page and reads the name from its title.
pub struct HttpProfileResolver {
    client: Client,
}

impl HttpProfileResolver {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpProfileResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileResolver for HttpProfileResolver {
    async fn resolve(&self, record: &ListRecord) -> Result<String> {
        let body = self
            .client
            .get(&record.profile_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", record.profile_url))?
            .error_for_status()
            .context("profile fetch returned an error status")?
            .text()
            .await
            .context("failed to read profile page")?;
        title_name(&body).with_context(|| format!("no name on profile page {}", record.profile_url))
    }
}

/// "Jane Doe | LinkedIn" -> "Jane Doe", preferring `og:title`.
fn title_name(html: &str) -> Option<String> {
    let doc = dom::parse(html);
    let raw = dom::first_in_doc(&doc, &["meta[property='og:title']"])
        .and_then(|m| m.value().attr("content").map(str::to_string))
        .or_else(|| dom::first_in_doc(&doc, &["title"]).map(dom::full_text))?;
    let name = raw
        .split(" | ")
        .next()
        .and_then(|s| s.split(" - ").next())
        .unwrap_or("")
        .trim()
        .to_string();
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Normalized names to match against, in list order.
    pub names: Vec<String>,
    /// Normalized names of members whose lookup failed. They still match
    /// by their stored name.
    pub missing: Vec<String>,
}

/// Resolve every member with bounded concurrency, serving fresh cache hits
/// without a lookup. A failed lookup never fails the batch.
pub async fn resolve_members(
    resolver: Arc<dyn ProfileResolver>,
    cache: SharedCache<String>,
    members: Vec<ListRecord>,
) -> Resolution {
    let stored: Vec<String> = members.iter().map(|m| normalize_name(&m.full_name)).collect();
    let results = settle_all(members, RESOLVE_CONCURRENCY, |record| {
        let resolver = resolver.clone();
        let cache = cache.clone();
        async move {
            let key = LookupCache::<String>::key(PLATFORM, &record.profile_url);
            let hit = cache.lock().ok().and_then(|c| c.get(&key, Instant::now()));
            if let Some(name) = hit {
                return Ok::<_, anyhow::Error>(name);
            }
            let name = resolver.resolve(&record).await?;
            if let Ok(mut c) = cache.lock() {
                c.insert(key, name.clone(), Instant::now());
            }
            Ok(name)
        }
    })
    .await;

    let mut out = Resolution::default();
    for (resolved, stored_name) in results.into_iter().zip(stored) {
        match resolved {
            Some(name) => out.names.push(normalize_name(&name)),
            None => {
                if !stored_name.is_empty() {
                    out.names.push(stored_name.clone());
                    out.missing.push(stored_name);
                }
            }
        }
    }
    let mut seen = HashSet::new();
    out.names.retain(|n| seen.insert(n.clone()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::lookup_cache::LOOKUP_TTL;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(name: &str, url: &str) -> ListRecord {
        ListRecord {
            profile_urn: format!("urn:{name}"),
            full_name: name.to_string(),
            profile_url: url.to_string(),
            list_membership: vec!["Leads".to_string()],
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProfileResolver for CountingResolver {
        async fn resolve(&self, record: &ListRecord) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if record.full_name.starts_with("Broken") {
                anyhow::bail!("profile gone");
            }
            Ok(format!("{} (live)", record.full_name))
        }
    }

    #[test]
    fn test_title_name() {
        assert_eq!(title_name("<title>Jane Doe | LinkedIn</title>").as_deref(), Some("Jane Doe"));
        assert_eq!(
            title_name(r#"<head><meta property="og:title" content="Kim Park - Engineer"><title>x</title></head>"#)
                .as_deref(),
            Some("Kim Park")
        );
        assert_eq!(title_name("<title>Mary-Jane Watson | LinkedIn</title>").as_deref(), Some("Mary-Jane Watson"));
        assert_eq!(title_name("<p>nothing</p>"), None);
    }

    #[tokio::test]
    async fn test_failures_fall_back_and_cache_is_used() {
        let resolver = Arc::new(CountingResolver { calls: AtomicUsize::new(0) });
        let cache: SharedCache<String> = Arc::new(Mutex::new(LookupCache::new(LOOKUP_TTL)));
        let members = vec![
            record("Jane Doe", "https://x/in/jane"),
            record("Broken Link", "https://x/in/broken"),
            record("Kim Park", "https://x/in/kim"),
        ];

        let first = resolve_members(resolver.clone(), cache.clone(), members.clone()).await;
        assert_eq!(first.names, vec!["jane doe (live)", "broken link", "kim park (live)"]);
        assert_eq!(first.missing, vec!["broken link"]);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);

        let second = resolve_members(resolver.clone(), cache, members).await;
        assert_eq!(second, first);
        // Only the failed lookup is retried.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_http_resolver_reads_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/in/jane"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><title>Jane Q. Doe | LinkedIn</title></head></html>",
            ))
            .mount(&server)
            .await;
        let r = record("Jane Doe", &format!("{}/in/jane", server.uri()));
        let name = HttpProfileResolver::new().resolve(&r).await.unwrap();
        assert_eq!(name, "Jane Q. Doe");
    }

    #[tokio::test]
    async fn test_repeated_names_collapse_in_order() {
        let cache: SharedCache<String> = Arc::new(Mutex::new(LookupCache::new(LOOKUP_TTL)));
        let members = vec![
            record("Jane Doe", "https://x/in/jane"),
            record("Kim Park", "https://x/in/kim"),
            record("jane  doe", "https://x/in/jane-2"),
        ];
        let out = resolve_members(Arc::new(StoredNameResolver), cache, members).await;
        assert_eq!(out.names, vec!["jane doe", "kim park"]);
    }

    #[tokio::test]
    async fn test_stored_name_resolver_rejects_blank() {
        assert!(StoredNameResolver.resolve(&record("  ", "u")).await.is_err());
        assert_eq!(StoredNameResolver.resolve(&record("Bo", "u")).await.unwrap(), "Bo");
    }
}
