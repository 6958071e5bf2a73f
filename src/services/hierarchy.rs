//! Hierarchy resolver
//!
//! Maps a classified item onto its container chain (show/season for
//! episodes, artist/album for tracks) creating containers on first sight.
//! A per-resolver cache plus a creation lock guarantees exactly one create
//! per key even when scan workers race on the same new show or artist.
//!
//! Persistence sits behind `CollectionStore`; the production store is the
//! `Database` wrapper, tests substitute an in-memory one.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::db::Database;

/// Find-or-create surface the resolver drives. Find misses are not
/// errors; create is expected to be idempotent per key.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn find_show(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>>;
    async fn create_show(&self, library_id: Uuid, name: &str, year: Option<i32>) -> Result<Uuid>;
    async fn find_season(&self, show_id: Uuid, season_number: i32) -> Result<Option<Uuid>>;
    async fn create_season(&self, show_id: Uuid, season_number: i32) -> Result<Uuid>;
    async fn find_artist(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>>;
    async fn create_artist(&self, library_id: Uuid, name: &str) -> Result<Uuid>;
    async fn find_album(&self, artist_id: Uuid, title: &str) -> Result<Option<Uuid>>;
    async fn create_album(
        &self,
        artist_id: Uuid,
        library_id: Uuid,
        title: &str,
        year: Option<i32>,
    ) -> Result<Uuid>;
}

#[async_trait]
impl CollectionStore for Database {
    async fn find_show(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>> {
        Ok(self
            .collections()
            .find_show(library_id, name)
            .await?
            .map(|r| r.id))
    }

    async fn create_show(&self, library_id: Uuid, name: &str, year: Option<i32>) -> Result<Uuid> {
        Ok(self.collections().create_show(library_id, name, year).await?.id)
    }

    async fn find_season(&self, show_id: Uuid, season_number: i32) -> Result<Option<Uuid>> {
        Ok(self
            .collections()
            .find_season(show_id, season_number)
            .await?
            .map(|r| r.id))
    }

    async fn create_season(&self, show_id: Uuid, season_number: i32) -> Result<Uuid> {
        Ok(self.collections().create_season(show_id, season_number).await?.id)
    }

    async fn find_artist(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>> {
        Ok(self
            .collections()
            .find_artist(library_id, name)
            .await?
            .map(|r| r.id))
    }

    async fn create_artist(&self, library_id: Uuid, name: &str) -> Result<Uuid> {
        Ok(self.collections().create_artist(library_id, name).await?.id)
    }

    async fn find_album(&self, artist_id: Uuid, title: &str) -> Result<Option<Uuid>> {
        Ok(self
            .collections()
            .find_album(artist_id, title)
            .await?
            .map(|r| r.id))
    }

    async fn create_album(
        &self,
        artist_id: Uuid,
        library_id: Uuid,
        title: &str,
        year: Option<i32>,
    ) -> Result<Uuid> {
        Ok(self
            .collections()
            .create_album(artist_id, library_id, title, year)
            .await?
            .id)
    }
}

/// Resolved container for one item, if its type has a hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedParent {
    pub parent_id: Uuid,
}

pub struct HierarchyResolver<S = Database> {
    store: S,
    shows: RwLock<HashMap<(Uuid, String), Uuid>>,
    seasons: RwLock<HashMap<(Uuid, i32), Uuid>>,
    artists: RwLock<HashMap<(Uuid, String), Uuid>>,
    albums: RwLock<HashMap<(Uuid, String), Uuid>>,
    // Serializes the find-or-create slow path; cache reads stay lock-free
    // of it entirely
    create_lock: Mutex<()>,
}

impl<S: CollectionStore> HierarchyResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            shows: RwLock::new(HashMap::new()),
            seasons: RwLock::new(HashMap::new()),
            artists: RwLock::new(HashMap::new()),
            albums: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Drop all cached ids. Called between scans so renames and manual
    /// database edits are picked up.
    pub fn clear(&self) {
        self.shows.write().clear();
        self.seasons.write().clear();
        self.artists.write().clear();
        self.albums.write().clear();
    }

    /// Resolve show -> season for an episode, creating both as needed.
    /// Returns the season id (or the show id when the library does not
    /// group by season).
    pub async fn resolve_episode(
        &self,
        library_id: Uuid,
        show_name: &str,
        year: Option<i32>,
        season_number: Option<i32>,
        group_by_season: bool,
    ) -> Result<ResolvedParent> {
        let show_id = self.resolve_show(library_id, show_name, year).await?;

        if !group_by_season {
            return Ok(ResolvedParent { parent_id: show_id });
        }

        // Unnumbered episodes fall into season 0, the specials bucket
        let season_number = season_number.unwrap_or(0);
        let season_id = self.resolve_season(show_id, season_number).await?;

        Ok(ResolvedParent { parent_id: season_id })
    }

    /// Resolve artist -> album for a track, creating both as needed
    pub async fn resolve_track(
        &self,
        library_id: Uuid,
        artist_name: &str,
        album_title: &str,
        year: Option<i32>,
    ) -> Result<ResolvedParent> {
        let artist_id = self.resolve_artist(library_id, artist_name).await?;
        let album_id = self.resolve_album(artist_id, library_id, album_title, year).await?;

        Ok(ResolvedParent { parent_id: album_id })
    }

    async fn resolve_show(&self, library_id: Uuid, name: &str, year: Option<i32>) -> Result<Uuid> {
        let key = (library_id, name.to_lowercase());

        if let Some(id) = self.shows.read().get(&key) {
            return Ok(*id);
        }

        let _guard = self.create_lock.lock().await;

        // Double check: another worker may have created it while we waited
        if let Some(id) = self.shows.read().get(&key) {
            return Ok(*id);
        }

        let id = match self.store.find_show(library_id, name).await? {
            Some(id) => id,
            None => {
                debug!(library_id = %library_id, show = name, "creating show");
                self.store.create_show(library_id, name, year).await?
            }
        };

        self.shows.write().insert(key, id);
        Ok(id)
    }

    async fn resolve_season(&self, show_id: Uuid, season_number: i32) -> Result<Uuid> {
        let key = (show_id, season_number);

        if let Some(id) = self.seasons.read().get(&key) {
            return Ok(*id);
        }

        let _guard = self.create_lock.lock().await;

        if let Some(id) = self.seasons.read().get(&key) {
            return Ok(*id);
        }

        let id = match self.store.find_season(show_id, season_number).await? {
            Some(id) => id,
            None => self.store.create_season(show_id, season_number).await?,
        };

        self.seasons.write().insert(key, id);
        Ok(id)
    }

    async fn resolve_artist(&self, library_id: Uuid, name: &str) -> Result<Uuid> {
        let key = (library_id, name.to_lowercase());

        if let Some(id) = self.artists.read().get(&key) {
            return Ok(*id);
        }

        let _guard = self.create_lock.lock().await;

        if let Some(id) = self.artists.read().get(&key) {
            return Ok(*id);
        }

        let id = match self.store.find_artist(library_id, name).await? {
            Some(id) => id,
            None => {
                debug!(library_id = %library_id, artist = name, "creating artist");
                self.store.create_artist(library_id, name).await?
            }
        };

        self.artists.write().insert(key, id);
        Ok(id)
    }

    async fn resolve_album(
        &self,
        artist_id: Uuid,
        library_id: Uuid,
        title: &str,
        year: Option<i32>,
    ) -> Result<Uuid> {
        let key = (artist_id, title.to_lowercase());

        if let Some(id) = self.albums.read().get(&key) {
            return Ok(*id);
        }

        let _guard = self.create_lock.lock().await;

        if let Some(id) = self.albums.read().get(&key) {
            return Ok(*id);
        }

        let id = match self.store.find_album(artist_id, title).await? {
            Some(id) => id,
            None => {
                self.store
                    .create_album(artist_id, library_id, title, year)
                    .await?
            }
        };

        self.albums.write().insert(key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory store that counts creates and yields around every call
    /// to widen interleaving windows.
    #[derive(Clone, Default)]
    struct MemoryStore {
        shows: Arc<parking_lot::Mutex<HashMap<(Uuid, String), Uuid>>>,
        seasons: Arc<parking_lot::Mutex<HashMap<(Uuid, i32), Uuid>>>,
        artists: Arc<parking_lot::Mutex<HashMap<(Uuid, String), Uuid>>>,
        albums: Arc<parking_lot::Mutex<HashMap<(Uuid, String), Uuid>>>,
        creates: Arc<AtomicUsize>,
    }

    impl MemoryStore {
        fn create_count(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CollectionStore for MemoryStore {
        async fn find_show(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>> {
            tokio::task::yield_now().await;
            Ok(self.shows.lock().get(&(library_id, name.to_lowercase())).copied())
        }

        async fn create_show(
            &self,
            library_id: Uuid,
            name: &str,
            _year: Option<i32>,
        ) -> Result<Uuid> {
            tokio::task::yield_now().await;
            let id = Uuid::new_v4();
            self.shows.lock().insert((library_id, name.to_lowercase()), id);
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        }

        async fn find_season(&self, show_id: Uuid, season_number: i32) -> Result<Option<Uuid>> {
            tokio::task::yield_now().await;
            Ok(self.seasons.lock().get(&(show_id, season_number)).copied())
        }

        async fn create_season(&self, show_id: Uuid, season_number: i32) -> Result<Uuid> {
            tokio::task::yield_now().await;
            let id = Uuid::new_v4();
            self.seasons.lock().insert((show_id, season_number), id);
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        }

        async fn find_artist(&self, library_id: Uuid, name: &str) -> Result<Option<Uuid>> {
            tokio::task::yield_now().await;
            Ok(self.artists.lock().get(&(library_id, name.to_lowercase())).copied())
        }

        async fn create_artist(&self, library_id: Uuid, name: &str) -> Result<Uuid> {
            tokio::task::yield_now().await;
            let id = Uuid::new_v4();
            self.artists.lock().insert((library_id, name.to_lowercase()), id);
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        }

        async fn find_album(&self, artist_id: Uuid, title: &str) -> Result<Option<Uuid>> {
            tokio::task::yield_now().await;
            Ok(self.albums.lock().get(&(artist_id, title.to_lowercase())).copied())
        }

        async fn create_album(
            &self,
            artist_id: Uuid,
            _library_id: Uuid,
            title: &str,
            _year: Option<i32>,
        ) -> Result<Uuid> {
            tokio::task::yield_now().await;
            let id = Uuid::new_v4();
            self.albums.lock().insert((artist_id, title.to_lowercase()), id);
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        }
    }

    #[tokio::test]
    async fn concurrent_track_resolution_creates_each_container_once() {
        let store = MemoryStore::default();
        let resolver = Arc::new(HierarchyResolver::new(store.clone()));
        let library_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_track(library_id, "Radiohead", "OK Computer", Some(1997))
                    .await
                    .unwrap()
            }));
        }

        let mut parents = Vec::new();
        for handle in handles {
            parents.push(handle.await.unwrap().parent_id);
        }

        // One artist plus one album, no matter how the workers interleaved
        assert_eq!(store.create_count(), 2);
        assert!(parents.iter().all(|p| *p == parents[0]));
    }

    #[tokio::test]
    async fn concurrent_episode_resolution_creates_show_and_season_once() {
        let store = MemoryStore::default();
        let resolver = Arc::new(HierarchyResolver::new(store.clone()));
        let library_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve_episode(library_id, "The Wire", None, Some(2), true)
                    .await
                    .unwrap()
            }));
        }

        let mut parents = Vec::new();
        for handle in handles {
            parents.push(handle.await.unwrap().parent_id);
        }

        assert_eq!(store.create_count(), 2);
        assert!(parents.iter().all(|p| *p == parents[0]));
    }

    #[tokio::test]
    async fn unnumbered_episode_lands_in_specials_bucket() {
        let store = MemoryStore::default();
        let resolver = HierarchyResolver::new(store.clone());
        let library_id = Uuid::new_v4();

        resolver
            .resolve_episode(library_id, "Show", None, None, true)
            .await
            .unwrap();

        let show_id = *store
            .shows
            .lock()
            .get(&(library_id, "show".to_string()))
            .expect("show created");
        assert!(store.seasons.lock().contains_key(&(show_id, 0)));
    }

    #[tokio::test]
    async fn without_season_grouping_show_is_the_parent() {
        let store = MemoryStore::default();
        let resolver = HierarchyResolver::new(store.clone());
        let library_id = Uuid::new_v4();

        let resolved = resolver
            .resolve_episode(library_id, "Show", None, Some(3), false)
            .await
            .unwrap();

        let show_id = *store.shows.lock().get(&(library_id, "show".to_string())).unwrap();
        assert_eq!(resolved.parent_id, show_id);
        assert!(store.seasons.lock().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_cached_ids() {
        let store = MemoryStore::default();
        let resolver = HierarchyResolver::new(store.clone());
        let library_id = Uuid::new_v4();

        resolver
            .resolve_track(library_id, "Artist", "Album", None)
            .await
            .unwrap();
        resolver.clear();
        resolver
            .resolve_track(library_id, "Artist", "Album", None)
            .await
            .unwrap();

        // After clear the resolver re-finds the existing rows; nothing is
        // created twice
        assert_eq!(store.create_count(), 2);
    }
}
