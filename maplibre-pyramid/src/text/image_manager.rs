//! Sprite images used as icons.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, ParseError},
    io::{
        scheduler::MailboxSender,
        source_client::{AsyncRequest, FileSource, Resource, Response},
    },
    message::{Message, TileKey},
};

fn default_pixel_ratio() -> f64 {
    1.0
}

/// Position and size of an image within the sprite sheet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ImageMetrics {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    #[serde(rename = "pixelRatio", default = "default_pixel_ratio")]
    pub pixel_ratio: f64,
    #[serde(default)]
    pub sdf: bool,
}

pub type ImageMap = HashMap<String, ImageMetrics>;

pub fn parse_sprite(json: &[u8]) -> Result<ImageMap, ParseError> {
    serde_json::from_slice(json).map_err(|e| ParseError::Sprite(e.to_string()))
}

/// Loads the sprite index of the style and keeps track of tiles waiting for it.
///
/// Tiles can only lay out icons once the sprite is loaded, since missing images can not be told
/// apart from images which are still loading before that.
pub struct ImageManager {
    sprite_url: Option<String>,
    pixel_ratio: f64,
    loaded: bool,
    images: Arc<ImageMap>,
    request: Option<AsyncRequest>,
    waiting: HashSet<TileKey>,
}

impl ImageManager {
    pub fn new(sprite_url: Option<String>, pixel_ratio: f64) -> Self {
        Self {
            loaded: sprite_url.is_none(),
            sprite_url,
            pixel_ratio,
            images: Arc::new(ImageMap::new()),
            request: None,
            waiting: HashSet::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn images(&self) -> Arc<ImageMap> {
        self.images.clone()
    }

    /// Requests the sprite index once.
    pub fn load(&mut self, file_source: &dyn FileSource, sender: &MailboxSender<Message>) {
        let Some(sprite_url) = &self.sprite_url else {
            return;
        };
        if self.loaded || self.request.is_some() {
            return;
        }

        log::debug!("loading sprite {sprite_url}");
        let sender = sender.clone();
        self.request = Some(file_source.request(
            Resource::sprite_json(sprite_url, self.pixel_ratio),
            Box::new(move |response| {
                sender.send(Message::Sprite(response));
            }),
        ));
    }

    /// Whether the images are available. Otherwise `requestor` is notified once they are.
    pub fn get_images(&mut self, requestor: TileKey) -> bool {
        if self.loaded {
            return true;
        }
        self.waiting.insert(requestor);
        false
    }

    pub fn remove_requestor(&mut self, requestor: &TileKey) {
        self.waiting.remove(requestor);
    }

    /// Adds or replaces an image at runtime.
    pub fn add_image(&mut self, name: &str, metrics: ImageMetrics) {
        Arc::make_mut(&mut self.images).insert(name.to_string(), metrics);
    }

    /// Stores the sprite index. A failed request leaves the sprite empty, so that waiting tiles
    /// proceed without icons. Returns the tiles to notify.
    pub fn on_response(&mut self, response: Response) -> (Vec<TileKey>, Option<Error>) {
        self.request = None;

        let error = if let Some(error) = response.error {
            Some(Error::from(error))
        } else if let Some(data) = &response.data {
            match parse_sprite(data) {
                Ok(images) => {
                    let current = Arc::make_mut(&mut self.images);
                    for (name, metrics) in images {
                        current.entry(name).or_insert(metrics);
                    }
                    None
                }
                Err(error) => Some(error.into()),
            }
        } else {
            None
        };

        if let Some(error) = &error {
            log::warn!("failed to load sprite: {error}");
        }
        self.loaded = true;
        (self.waiting.drain().collect(), error)
    }
}
