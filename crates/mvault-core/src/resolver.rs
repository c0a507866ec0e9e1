//! Asset Resolver: tiered URL selection for a remote agent. Given a hash and/or relpath, produce an ordered list of
//! candidate sources: registered download URLs before local/lake byte
//! streams, and for bundles, split the set between them by size so small
//! files ride the local stream and large ones use the public URL.
//!
//! Grounded in `original_source/app/services/asset_resolver.py`'s
//! `resolve_sources` / `resolve_bundle`.

use crate::error::Side;
use crate::indexer::Indexer;
use crate::source::SourceRegistry;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Web,
    Local,
    Lake,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSource {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceType,
    /// Lower sorts first; web mappings outrank either side's stream.
    pub priority: u32,
}

#[derive(Clone)]
pub struct AssetResolver {
    store: crate::store::Store,
    remote_base_url: String,
}

impl AssetResolver {
    pub fn new(store: crate::store::Store, remote_base_url: String) -> Self {
        AssetResolver { store, remote_base_url }
    }

    /// Tiered resolution:
    /// 1. SourceMapping keyed by hash
    /// 2. SourceMapping keyed by `relpath:<relpath>`
    /// 3. Local stream, if Local has the file
    /// 4. Lake stream, if Lake has the file
    pub async fn resolve(&self, hash: Option<&str>, relpath: Option<&str>) -> Result<Vec<ResolvedSource>> {
        let registry = SourceRegistry::new(self.store.clone());
        let mut out = Vec::new();

        if let Some(hash) = hash {
            if let Some(mapping) = registry.get_by_hash(hash).await? {
                out.push(ResolvedSource { url: mapping.url, kind: SourceType::Web, priority: 0 });
            }
        }
        if let Some(relpath) = relpath {
            if let Some(mapping) = registry.get_by_relpath(relpath).await? {
                out.push(ResolvedSource { url: mapping.url, kind: SourceType::Web, priority: 1 });
            }
        }

        if let Some(relpath) = relpath {
            let indexer = Indexer::new(self.store.clone());
            if indexer.get_files(Side::Local, "", relpath).await?.iter().any(|f| f.relpath == relpath) {
                out.push(ResolvedSource {
                    url: self.stream_url(Side::Local, relpath),
                    kind: SourceType::Local,
                    priority: 2,
                });
            }
            if indexer.get_files(Side::Lake, "", relpath).await?.iter().any(|f| f.relpath == relpath) {
                out.push(ResolvedSource {
                    url: self.stream_url(Side::Lake, relpath),
                    kind: SourceType::Lake,
                    priority: 3,
                });
            }
        }

        Ok(out)
    }

    fn stream_url(&self, side: Side, relpath: &str) -> String {
        format!(
            "{}/api/remote/assets/file?side={}&relpath={}",
            self.remote_base_url.trim_end_matches('/'),
            side.as_str(),
            urlencode(relpath)
        )
    }

    /// Resolve every asset in a bundle, then split the union roughly in
    /// half by ascending size: small files are pinned to their local/lake
    /// stream (when one exists) to save egress on the public URL, large
    /// files keep only the public URL.
    pub async fn resolve_bundle(&self, relpaths: &[(String, i64)]) -> Result<Vec<(String, Vec<ResolvedSource>)>> {
        let mut with_size = relpaths.to_vec();
        with_size.sort_by_key(|(_, size)| *size);
        let midpoint = with_size.len() / 2;

        let mut out = Vec::with_capacity(with_size.len());
        for (index, (relpath, _size)) in with_size.into_iter().enumerate() {
            let mut sources = self.resolve(None, Some(&relpath)).await?;
            let has_web = sources.iter().any(|s| s.kind == SourceType::Web);
            let has_stream = sources.iter().any(|s| matches!(s.kind, SourceType::Local | SourceType::Lake));
            if has_web && has_stream {
                if index < midpoint {
                    sources.retain(|s| !matches!(s.kind, SourceType::Web));
                } else {
                    sources.retain(|s| matches!(s.kind, SourceType::Web));
                }
            }
            out.push((relpath, sources));
        }
        Ok(out)
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Side;
    use crate::store::Store;

    async fn index_file(store: &Store, side: Side, relpath: &str, size: i64) {
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES (?1, ?2, ?3, 0, '2024-01-01')",
        )
        .bind(side.as_str())
        .bind(relpath)
        .bind(size)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn prefers_hash_mapping_over_streams() {
        let store = Store::open_memory().await.unwrap();
        let registry = SourceRegistry::new(store.clone());
        registry.upsert_for_hash("h1", "https://cdn.example.com/f.bin", None, None).await.unwrap();
        index_file(&store, Side::Local, "f.bin", 10).await;

        let resolver = AssetResolver::new(store, "https://ext.example".to_string());
        let sources = resolver.resolve(Some("h1"), Some("f.bin")).await.unwrap();
        assert_eq!(sources[0].kind, SourceType::Web);
        assert_eq!(sources[0].url, "https://cdn.example.com/f.bin");
        assert!(sources.iter().any(|s| s.kind == SourceType::Local));
    }

    #[tokio::test]
    async fn falls_back_to_local_and_lake_streams() {
        let store = Store::open_memory().await.unwrap();
        index_file(&store, Side::Local, "a/f.bin", 10).await;
        index_file(&store, Side::Lake, "a/f.bin", 10).await;

        let resolver = AssetResolver::new(store, "https://ext.example".to_string());
        let sources = resolver.resolve(None, Some("a/f.bin")).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceType::Local);
        assert_eq!(sources[1].kind, SourceType::Lake);
        assert!(sources[0].url.contains("side=local"));
    }

    #[tokio::test]
    async fn bundle_splits_by_size_between_web_and_stream() {
        let store = Store::open_memory().await.unwrap();
        let registry = SourceRegistry::new(store.clone());
        for relpath in ["small.bin", "big.bin"] {
            registry
                .upsert_for_relpath(relpath, &format!("https://cdn.example.com/{relpath}"), None, None)
                .await
                .unwrap();
        }
        index_file(&store, Side::Local, "small.bin", 10).await;
        index_file(&store, Side::Local, "big.bin", 10_000).await;

        let resolver = AssetResolver::new(store, "https://ext.example".to_string());
        let resolved = resolver
            .resolve_bundle(&[("small.bin".to_string(), 10), ("big.bin".to_string(), 10_000)])
            .await
            .unwrap();

        let small = &resolved.iter().find(|(p, _)| p == "small.bin").unwrap().1;
        let big = &resolved.iter().find(|(p, _)| p == "big.bin").unwrap().1;
        assert!(small.iter().all(|s| s.kind == SourceType::Local));
        assert!(big.iter().all(|s| s.kind == SourceType::Web));
    }
}
