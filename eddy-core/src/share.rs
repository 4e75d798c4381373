//! Local file index seam.
//!
//! Hashing and catalog generation live outside the core; sessions only need
//! to resolve requested identifiers and answer searches.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::protocol::search::FileType;
use crate::protocol::types::{BZ_LIST, DC_LIST, XML_BZ_LIST};
use crate::protocol::SearchRequest;

/// A shared file as seen by remote peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Backslash separated path relative to the share root
    pub name: String,
    /// Location on local disk
    pub path: PathBuf,
    pub size: u64,
    pub tth: Option<String>,
}

/// Whether `name` is one of the file catalog names peers request.
pub fn is_catalog_name(name: &str) -> bool {
    matches!(name, XML_BZ_LIST | BZ_LIST | DC_LIST)
}

/// Resolves shared files for uploads and searches.
#[async_trait]
pub trait LocalFileIndex: Send + Sync {
    /// Resolves a path, `TTH/<hash>` identifier or catalog name.
    async fn lookup(&self, identifier: &str) -> Option<Listing>;

    /// Listings matching a search request.
    async fn search(&self, request: &SearchRequest) -> Vec<Listing>;

    /// Total bytes shared.
    async fn share_size(&self) -> u64;
}

/// In-memory index over a fixed set of listings.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    listings: Vec<Listing>,
    catalog: Option<Listing>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listing: Listing) {
        self.listings.push(listing);
    }

    /// Serves `path` for every catalog name.
    pub fn set_catalog(&mut self, path: PathBuf, size: u64) {
        self.catalog = Some(Listing {
            name: XML_BZ_LIST.to_string(),
            path,
            size,
            tth: None,
        });
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Indexes every regular file below `root` without hashing.
    pub async fn scan(root: &Path) -> std::io::Result<Self> {
        let mut index = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let size = entry.metadata().await?.len();
                    let Ok(relative) = path.strip_prefix(root) else {
                        continue;
                    };
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("\\");
                    index.add(Listing {
                        name,
                        path,
                        size,
                        tth: None,
                    });
                }
            }
        }

        tracing::info!("Indexed {} files under {}", index.len(), root.display());
        Ok(index)
    }

    fn matches(listing: &Listing, request: &SearchRequest) -> bool {
        if let Some(tth) = request.tth() {
            return listing.tth.as_deref() == Some(tth);
        }
        if request.file_type == FileType::Folder || !request.accepts_size(listing.size) {
            return false;
        }
        let name = listing.name.to_lowercase();
        let terms = request.terms();
        !terms.is_empty() && terms.iter().all(|term| name.contains(term.as_str()))
    }
}

#[async_trait]
impl LocalFileIndex for MemoryIndex {
    async fn lookup(&self, identifier: &str) -> Option<Listing> {
        if is_catalog_name(identifier) {
            return self.catalog.clone();
        }
        if let Some(tth) = identifier.strip_prefix("TTH/") {
            return self
                .listings
                .iter()
                .find(|listing| listing.tth.as_deref() == Some(tth))
                .cloned();
        }
        self.listings
            .iter()
            .find(|listing| listing.name == identifier)
            .cloned()
    }

    async fn search(&self, request: &SearchRequest) -> Vec<Listing> {
        self.listings
            .iter()
            .filter(|listing| Self::matches(listing, request))
            .cloned()
            .collect()
    }

    async fn share_size(&self) -> u64 {
        self.listings.iter().map(|listing| listing.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SearchOrigin;

    fn index() -> MemoryIndex {
        let mut index = MemoryIndex::new();
        index.add(Listing {
            name: "music\\Song One.mp3".to_string(),
            path: PathBuf::from("/share/music/Song One.mp3"),
            size: 100,
            tth: Some("AAAA".to_string()),
        });
        index.add(Listing {
            name: "music\\song two.ogg".to_string(),
            path: PathBuf::from("/share/music/song two.ogg"),
            size: 5000,
            tth: None,
        });
        index
    }

    fn origin() -> SearchOrigin {
        SearchOrigin::Passive {
            nick: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_lookup_by_path_and_tth() {
        let index = index();
        assert_eq!(
            index.lookup("music\\song two.ogg").await.map(|l| l.size),
            Some(5000)
        );
        assert_eq!(index.lookup("TTH/AAAA").await.map(|l| l.size), Some(100));
        assert!(index.lookup("TTH/ZZZZ").await.is_none());
        assert!(index.lookup("files.xml.bz2").await.is_none());
    }

    #[tokio::test]
    async fn test_catalog_served_for_every_catalog_name() {
        let mut index = index();
        index.set_catalog(PathBuf::from("/tmp/files.xml.bz2"), 42);
        for name in [XML_BZ_LIST, BZ_LIST, DC_LIST] {
            assert_eq!(index.lookup(name).await.map(|l| l.size), Some(42));
        }
    }

    #[tokio::test]
    async fn test_search_matches_all_terms_case_insensitively() {
        let index = index();
        let hits = index.search(&SearchRequest::for_query(origin(), "SONG")).await;
        assert_eq!(hits.len(), 2);

        let hits = index.search(&SearchRequest::for_query(origin(), "song ogg")).await;
        assert_eq!(hits.len(), 1);

        let mut limited = SearchRequest::for_query(origin(), "song");
        limited.size_restricted = true;
        limited.size = 1000;
        assert_eq!(index.search(&limited).await.len(), 1);

        let by_hash = SearchRequest::for_tth(origin(), "AAAA");
        assert_eq!(index.search(&by_hash).await.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"abc").await.unwrap();
        tokio::fs::write(dir.path().join("sub").join("b.bin"), b"12345").await.unwrap();

        let index = MemoryIndex::scan(dir.path()).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.share_size().await, 8);
        assert_eq!(index.lookup("sub\\b.bin").await.map(|l| l.size), Some(5));
    }
}
