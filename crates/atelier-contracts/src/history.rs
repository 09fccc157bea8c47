use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::KvStore;

pub const MAX_HISTORY: usize = 20;
const IMAGES_KEY: &str = "images";

/// One generated image. `url` holds the embedded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub url: String,
    pub timestamp: i64,
}

impl GeneratedImage {
    /// Ids are `{millis}-{index}` within one generation batch.
    pub fn from_batch(urls: Vec<String>, millis: i64) -> Vec<GeneratedImage> {
        urls.into_iter()
            .enumerate()
            .map(|(idx, url)| GeneratedImage {
                id: format!("{millis}-{idx}"),
                url,
                timestamp: millis,
            })
            .collect()
    }
}

/// Bounded local history of generated images, keyed by id and kept in
/// insertion order. Holds at most [`MAX_HISTORY`] entries; inserting into a
/// full store evicts the oldest insertion first.
#[derive(Debug, Clone)]
pub struct HistoryStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> HistoryStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save_image(&mut self, image: GeneratedImage) -> anyhow::Result<()> {
        let mut entries = self.load();
        if !entries.contains_key(&image.id) && entries.len() >= MAX_HISTORY {
            entries.shift_remove_index(0);
        }
        entries.insert(image.id.clone(), image);
        self.persist(&entries)
    }

    /// All entries, most recent timestamp first. Equal timestamps list the
    /// later insertion first.
    pub fn get_all_images(&self) -> Vec<GeneratedImage> {
        let mut images: Vec<GeneratedImage> = self.load().into_values().rev().collect();
        images.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        images
    }

    pub fn get_image(&self, id: &str) -> Option<GeneratedImage> {
        self.load().shift_remove(id)
    }

    /// Returns whether an entry was removed.
    pub fn delete_image(&mut self, id: &str) -> anyhow::Result<bool> {
        let mut entries = self.load();
        if entries.shift_remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self) -> IndexMap<String, GeneratedImage> {
        let rows: Vec<GeneratedImage> = self
            .store
            .get(IMAGES_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        rows.into_iter()
            .map(|image| (image.id.clone(), image))
            .collect()
    }

    fn persist(&mut self, entries: &IndexMap<String, GeneratedImage>) -> anyhow::Result<()> {
        let rows: Vec<&GeneratedImage> = entries.values().collect();
        self.store.set(IMAGES_KEY, serde_json::to_value(rows)?)
    }
}
