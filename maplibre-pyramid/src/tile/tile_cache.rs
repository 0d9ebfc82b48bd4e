//! Tile cache.

use std::collections::{hash_map, HashMap, VecDeque};

use crate::tile::tile_id::OverscaledTileID;

/// Stores tiles which are no longer visible for reuse when they are needed again.
///
/// Entries are evicted in insertion order once the cache holds more than `size` tiles. Taking a
/// tile out of the cache transfers its ownership to the caller.
pub struct TileCache<T> {
    size: usize,
    tiles: HashMap<OverscaledTileID, T>,
    order: VecDeque<OverscaledTileID>,
}

impl<T> TileCache<T> {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            tiles: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Changes the capacity. Shrinking evicts the oldest entries immediately.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
        self.evict();
    }

    /// Adds `tile`. An entry with the same id is replaced and dropped.
    pub fn add(&mut self, id: OverscaledTileID, tile: T) {
        if self.size == 0 {
            return;
        }

        match self.tiles.entry(id) {
            hash_map::Entry::Occupied(mut entry) => {
                entry.insert(tile);
                self.order.retain(|cached| *cached != id);
            }
            hash_map::Entry::Vacant(entry) => {
                entry.insert(tile);
            }
        }
        self.order.push_back(id);
        self.evict();
    }

    /// Removes the tile with `id` from the cache and returns it.
    pub fn pop(&mut self, id: &OverscaledTileID) -> Option<T> {
        let tile = self.tiles.remove(id)?;
        self.order.retain(|cached| cached != id);
        Some(tile)
    }

    pub fn has(&self, id: &OverscaledTileID) -> bool {
        self.tiles.contains_key(id)
    }

    /// Accesses a cached tile without taking it out of the cache.
    pub fn peek_mut(&mut self, id: &OverscaledTileID) -> Option<&mut T> {
        self.tiles.get_mut(id)
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.order.clear();
    }

    fn evict(&mut self) {
        while self.order.len() > self.size {
            if let Some(oldest) = self.order.pop_front() {
                log::trace!("evicting tile {oldest} from cache");
                self.tiles.remove(&oldest);
            }
        }
    }
}
