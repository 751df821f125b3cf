use crate::models::{
    Category, Combination, Item, PreferenceKind, PreferenceRecord, RecordOutcome,
};
use crate::password::{CredentialHasher, Scheme};
use crate::sampler::Wardrobe;
use crate::user_models::User;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Everything the service persists. Written as a single JSON file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub dislikes: Vec<PreferenceRecord>,
    #[serde(default)]
    pub favorites: Vec<PreferenceRecord>,
}

impl StoreData {
    fn preferences(&self, kind: PreferenceKind) -> &Vec<PreferenceRecord> {
        match kind {
            PreferenceKind::Dislike => &self.dislikes,
            PreferenceKind::Favorite => &self.favorites,
        }
    }

    fn preferences_mut(&mut self, kind: PreferenceKind) -> &mut Vec<PreferenceRecord> {
        match kind {
            PreferenceKind::Dislike => &mut self.dislikes,
            PreferenceKind::Favorite => &mut self.favorites,
        }
    }
}

pub struct WardrobeStorage {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl WardrobeStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_from_disk(&path)?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the username is taken.
    pub async fn create_user(&self, user: User) -> Result<Option<User>> {
        let mut data = self.data.write().await;

        if data.users.iter().any(|u| u.username == user.username) {
            return Ok(None);
        }

        data.users.push(user.clone());
        self.save_to_disk(&data)?;
        Ok(Some(user))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.username == username).cloned())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.id == user_id).cloned())
    }

    /// Re-hash credentials that are not a recognised hash. Returns how many
    /// were upgraded.
    pub async fn upgrade_plaintext_passwords(&self, hasher: &dyn CredentialHasher) -> Result<usize> {
        let mut data = self.data.write().await;
        let mut upgraded = 0;

        for user in data.users.iter_mut() {
            if Scheme::detect(&user.password_hash).is_none() {
                user.password_hash = hasher
                    .hash(&user.password_hash)
                    .with_context(|| format!("Failed to upgrade password for {}", user.username))?;
                upgraded += 1;
            }
        }

        if upgraded > 0 {
            self.save_to_disk(&data)?;
        }
        Ok(upgraded)
    }

    pub async fn add_item(&self, item: Item) -> Result<Item> {
        let mut data = self.data.write().await;
        data.items.push(item.clone());
        self.save_to_disk(&data)?;
        Ok(item)
    }

    /// Categorise the user's item at `path`, creating it if the path is not
    /// indexed yet. One write lock covers the lookup and the insert.
    pub async fn upsert_item(&self, user_id: &str, path: String, category: Category) -> Result<Item> {
        let mut data = self.data.write().await;

        let item = match data
            .items
            .iter_mut()
            .find(|i| i.user_id == user_id && i.path == path)
        {
            Some(item) => {
                item.category = category;
                item.clone()
            }
            None => {
                let item = Item::new(user_id.to_string(), category, path);
                data.items.push(item.clone());
                item
            }
        };

        self.save_to_disk(&data)?;
        Ok(item)
    }

    /// Insert an uncategorized item for every path not yet indexed for the
    /// user. Existing records are never removed.
    pub async fn index_missing_paths(&self, user_id: &str, paths: Vec<String>) -> Result<Vec<Item>> {
        let mut data = self.data.write().await;

        let known: HashSet<&str> = data
            .items
            .iter()
            .filter(|i| i.user_id == user_id)
            .map(|i| i.path.as_str())
            .collect();
        let added: Vec<Item> = paths
            .into_iter()
            .filter(|p| !known.contains(p.as_str()))
            .map(|p| Item::new(user_id.to_string(), Category::Uncategorized, p))
            .collect();

        if !added.is_empty() {
            data.items.extend(added.iter().cloned());
            self.save_to_disk(&data)?;
        }
        Ok(added)
    }

    pub async fn get_user_items(&self, user_id: &str, category: Option<Category>) -> Result<Vec<Item>> {
        let data = self.data.read().await;
        Ok(data
            .items
            .iter()
            .filter(|i| i.user_id == user_id)
            .filter(|i| category.map_or(true, |c| i.category == c))
            .cloned()
            .collect())
    }

    pub async fn get_item(&self, item_id: &str, user_id: &str) -> Result<Option<Item>> {
        let data = self.data.read().await;
        Ok(data
            .items
            .iter()
            .find(|i| i.id == item_id && i.user_id == user_id)
            .cloned())
    }

    pub async fn set_item_category(
        &self,
        item_id: &str,
        user_id: &str,
        category: Category,
    ) -> Result<Option<Item>> {
        let mut data = self.data.write().await;

        let Some(item) = data
            .items
            .iter_mut()
            .find(|i| i.id == item_id && i.user_id == user_id)
        else {
            return Ok(None);
        };
        item.category = category;
        let item = item.clone();

        self.save_to_disk(&data)?;
        Ok(Some(item))
    }

    /// Removes the record only; the caller owns the backing file.
    pub async fn delete_item(&self, item_id: &str, user_id: &str) -> Result<Option<Item>> {
        let mut data = self.data.write().await;

        let Some(index) = data
            .items
            .iter()
            .position(|i| i.id == item_id && i.user_id == user_id)
        else {
            return Ok(None);
        };
        let item = data.items.remove(index);

        self.save_to_disk(&data)?;
        Ok(Some(item))
    }

    /// The user's items by slot together with their dislike set.
    pub async fn wardrobe(&self, user_id: &str) -> Result<Wardrobe> {
        let data = self.data.read().await;
        let items = data.items.iter().filter(|i| i.user_id == user_id).cloned();
        let dislikes = data
            .dislikes
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.combination.clone())
            .collect();
        Ok(Wardrobe::from_items(items, dislikes))
    }

    /// Existence check and insert happen under one write lock, so concurrent
    /// identical submissions store a single record.
    pub async fn record_preference(
        &self,
        kind: PreferenceKind,
        user_id: &str,
        combination: Combination,
    ) -> Result<RecordOutcome> {
        let mut data = self.data.write().await;

        let exists = data
            .preferences(kind)
            .iter()
            .any(|r| r.user_id == user_id && r.combination == combination);
        if exists {
            return Ok(RecordOutcome::AlreadyExisted);
        }

        data.preferences_mut(kind)
            .push(PreferenceRecord::new(user_id.to_string(), combination));
        self.save_to_disk(&data)?;
        Ok(RecordOutcome::Recorded)
    }

    pub async fn get_preferences(&self, kind: PreferenceKind, user_id: &str) -> Result<Vec<PreferenceRecord>> {
        let data = self.data.read().await;
        Ok(data
            .preferences(kind)
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    pub async fn remove_preference(&self, kind: PreferenceKind, record_id: &str, user_id: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        let records = data.preferences_mut(kind);

        let before = records.len();
        records.retain(|r| !(r.id == record_id && r.user_id == user_id));
        if records.len() == before {
            return Ok(false);
        }

        self.save_to_disk(&data)?;
        Ok(true)
    }

    /// Look up any items by id, regardless of owner.
    pub async fn get_items_by_ids(&self, ids: &[&str]) -> Result<Vec<Item>> {
        let data = self.data.read().await;
        Ok(data
            .items
            .iter()
            .filter(|i| ids.contains(&i.id.as_str()))
            .cloned()
            .collect())
    }

    /// Run `f` against the store file while writers are held off.
    pub async fn snapshot<T>(&self, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let data = self.data.read().await;
        if !self.path.exists() {
            self.save_to_disk(&data)?;
        }
        f(&self.path)
    }

    /// Run `f`, which may replace the store file, then reload it. The reload
    /// happens even when `f` fails, since `f` may have replaced the file
    /// before failing.
    pub async fn restore<T>(&self, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let mut data = self.data.write().await;
        let result = f(&self.path);

        *data = load_from_disk(&self.path)?;
        tracing::info!(
            users = data.users.len(),
            items = data.items.len(),
            "store reloaded from {}",
            self.path.display()
        );
        result
    }

    fn save_to_disk(&self, data: &StoreData) -> Result<()> {
        let json = serde_json::to_string_pretty(data)
            .context("Failed to serialize store")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write store file {}", self.path.display()))?;
        Ok(())
    }
}

fn load_from_disk(path: &Path) -> Result<StoreData> {
    if !path.exists() {
        return Ok(StoreData::default());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read store file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse store file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::BcryptHasher;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, WardrobeStorage) {
        let dir = TempDir::new().unwrap();
        let storage = WardrobeStorage::open(dir.path().join("wardrobe.json")).unwrap();
        (dir, storage)
    }

    fn combo(top: &str, bottom: &str, shoes: Option<&str>) -> Combination {
        Combination {
            top: top.to_string(),
            bottom: bottom.to_string(),
            shoes: shoes.map(str::to_string),
            accessory: None,
        }
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let (_dir, storage) = open_temp();
        let first = storage
            .create_user(User::new("alice".into(), "h".into()))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = storage
            .create_user(User::new("alice".into(), "h2".into()))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn recording_same_dislike_twice_stores_once() {
        let (_dir, storage) = open_temp();
        let c = combo("t", "b", None);

        let first = storage
            .record_preference(PreferenceKind::Dislike, "u1", c.clone())
            .await
            .unwrap();
        let second = storage
            .record_preference(PreferenceKind::Dislike, "u1", c.clone())
            .await
            .unwrap();

        assert_eq!(first, RecordOutcome::Recorded);
        assert_eq!(second, RecordOutcome::AlreadyExisted);
        assert_eq!(
            storage.get_preferences(PreferenceKind::Dislike, "u1").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn absent_slot_is_part_of_identity() {
        let (_dir, storage) = open_temp();
        storage
            .record_preference(PreferenceKind::Dislike, "u1", combo("t", "b", None))
            .await
            .unwrap();
        let with_shoes = storage
            .record_preference(PreferenceKind::Dislike, "u1", combo("t", "b", Some("s")))
            .await
            .unwrap();
        assert_eq!(with_shoes, RecordOutcome::Recorded);
    }

    #[tokio::test]
    async fn favorites_and_dislikes_are_independent() {
        let (_dir, storage) = open_temp();
        let c = combo("t", "b", None);
        storage
            .record_preference(PreferenceKind::Dislike, "u1", c.clone())
            .await
            .unwrap();
        let fav = storage
            .record_preference(PreferenceKind::Favorite, "u1", c)
            .await
            .unwrap();
        assert_eq!(fav, RecordOutcome::Recorded);
    }

    #[tokio::test]
    async fn concurrent_identical_dislikes_store_one_record() {
        let (_dir, storage) = open_temp();
        let storage = std::sync::Arc::new(storage);
        let c = combo("t", "b", None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                let c = c.clone();
                tokio::spawn(async move {
                    storage
                        .record_preference(PreferenceKind::Dislike, "u1", c)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap() == RecordOutcome::Recorded {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn wardrobe_is_scoped_to_user() {
        let (_dir, storage) = open_temp();
        storage
            .add_item(Item::new("alice".into(), Category::Top, "a/top.jpg".into()))
            .await
            .unwrap();
        storage
            .add_item(Item::new("bob".into(), Category::Top, "b/top.jpg".into()))
            .await
            .unwrap();
        storage
            .record_preference(PreferenceKind::Dislike, "bob", combo("x", "y", None))
            .await
            .unwrap();

        let wardrobe = storage.wardrobe("alice").await.unwrap();
        assert_eq!(wardrobe.tops.len(), 1);
        assert!(wardrobe.tops.iter().all(|i| i.user_id == "alice"));
        assert!(wardrobe.dislikes.is_empty());
    }

    #[tokio::test]
    async fn index_missing_paths_only_adds_new_paths() {
        let (_dir, storage) = open_temp();
        storage
            .add_item(Item::new("u1".into(), Category::Top, "uploads/u/a.jpg".into()))
            .await
            .unwrap();

        let added = storage
            .index_missing_paths(
                "u1",
                vec!["uploads/u/a.jpg".to_string(), "uploads/u/b.jpg".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].path, "uploads/u/b.jpg");
        assert_eq!(added[0].category, Category::Uncategorized);
        assert_eq!(storage.get_user_items("u1", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_item_updates_existing_path() {
        let (_dir, storage) = open_temp();
        let first = storage
            .upsert_item("u1", "uploads/u/a.jpg".into(), Category::Top)
            .await
            .unwrap();
        let second = storage
            .upsert_item("u1", "uploads/u/a.jpg".into(), Category::Shoes)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let items = storage.get_user_items("u1", None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].category, Category::Shoes);
    }

    #[tokio::test]
    async fn upsert_after_directory_scan_keeps_one_record() {
        let (_dir, storage) = open_temp();
        let path = "uploads/u/a.jpg".to_string();

        let scan = storage.index_missing_paths("u1", vec![path.clone()]);
        let upload = storage.upsert_item("u1", path.clone(), Category::Bottom);
        let (scanned, uploaded) = tokio::join!(scan, upload);
        scanned.unwrap();
        let uploaded = uploaded.unwrap();

        let items = storage.get_user_items("u1", None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, uploaded.id);
        assert_eq!(items[0].path, path);

        // Whichever ran first, a later upload still categorises the same record.
        storage.upsert_item("u1", path, Category::Top).await.unwrap();
        let items = storage.get_user_items("u1", None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].category, Category::Top);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let (dir, storage) = open_temp();
        storage
            .create_user(User::new("alice".into(), "h".into()))
            .await
            .unwrap();
        drop(storage);

        let reopened = WardrobeStorage::open(dir.path().join("wardrobe.json")).unwrap();
        assert!(reopened.get_user_by_username("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn plaintext_passwords_are_upgraded_once() {
        let (_dir, storage) = open_temp();
        storage
            .create_user(User::new("legacy".into(), "secret".into()))
            .await
            .unwrap();
        let hasher = BcryptHasher::new(4);

        assert_eq!(storage.upgrade_plaintext_passwords(&hasher).await.unwrap(), 1);
        assert_eq!(storage.upgrade_plaintext_passwords(&hasher).await.unwrap(), 0);

        let user = storage.get_user_by_username("legacy").await.unwrap().unwrap();
        assert!(crate::password::verify_password("secret", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn remove_preference_checks_owner() {
        let (_dir, storage) = open_temp();
        storage
            .record_preference(PreferenceKind::Favorite, "u1", combo("t", "b", None))
            .await
            .unwrap();
        let id = storage
            .get_preferences(PreferenceKind::Favorite, "u1")
            .await
            .unwrap()[0]
            .id
            .clone();

        assert!(!storage
            .remove_preference(PreferenceKind::Favorite, &id, "u2")
            .await
            .unwrap());
        assert!(storage
            .remove_preference(PreferenceKind::Favorite, &id, "u1")
            .await
            .unwrap());
    }
}
