//! Loading of glyph ranges on behalf of tiles.

use std::{collections::HashMap, sync::Arc};

use crate::{
    error::Error,
    io::{
        scheduler::MailboxSender,
        source_client::{AsyncRequest, FileSource, Resource, Response},
    },
    message::{Message, TileKey},
    text::{
        glyph::{FontStack, GlyphDependencies, GlyphMap},
        glyph_pbf::parse_glyphs,
    },
};

/// Requests each glyph range at most once and notifies tiles as soon as all glyphs they depend
/// on are loaded.
pub struct GlyphManager {
    url: Option<String>,
    glyphs: Arc<GlyphMap>,
    requests: HashMap<(FontStack, u32), AsyncRequest>,
    waiting: HashMap<TileKey, GlyphDependencies>,
}

impl GlyphManager {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            glyphs: Arc::new(GlyphMap::default()),
            requests: HashMap::new(),
            waiting: HashMap::new(),
        }
    }

    /// Snapshot of the loaded glyphs which can be handed to workers.
    pub fn glyphs(&self) -> Arc<GlyphMap> {
        self.glyphs.clone()
    }

    /// Whether all `dependencies` are loaded. Otherwise the missing ranges are requested and
    /// `requestor` is notified once they are available.
    pub fn get_glyphs(
        &mut self,
        requestor: TileKey,
        dependencies: &GlyphDependencies,
        file_source: &dyn FileSource,
        sender: &MailboxSender<Message>,
    ) -> bool {
        let missing = self.glyphs.missing(dependencies);
        if missing.is_empty() {
            return true;
        }

        let Some(url) = &self.url else {
            // Without a glyph server every range is empty.
            let glyphs = Arc::make_mut(&mut self.glyphs);
            for (font_stack, ranges) in &missing {
                for range in ranges {
                    glyphs.insert_range(font_stack, *range, []);
                }
            }
            return true;
        };

        for (font_stack, ranges) in &missing {
            for range in ranges {
                let key = (font_stack.clone(), *range);
                if self.requests.contains_key(&key) {
                    continue;
                }

                log::debug!("requesting glyphs {}-{} of {font_stack:?}", range, range + 255);
                let sender = sender.clone();
                let (callback_font_stack, callback_range) = key.clone();
                let request = file_source.request(
                    Resource::glyphs(url, font_stack, *range),
                    Box::new(move |response| {
                        sender.send(Message::Glyphs {
                            font_stack: callback_font_stack,
                            range: callback_range,
                            response,
                        });
                    }),
                );
                self.requests.insert(key, request);
            }
        }

        self.waiting.insert(requestor, missing);
        false
    }

    pub fn remove_requestor(&mut self, requestor: &TileKey) {
        self.waiting.remove(requestor);
    }

    /// Stores a loaded range. Ranges which fail to load are stored empty. Returns the tiles whose
    /// dependencies are now complete.
    pub fn on_response(
        &mut self,
        font_stack: &FontStack,
        range: u32,
        response: Response,
    ) -> (Vec<TileKey>, Option<Error>) {
        self.requests.remove(&(font_stack.clone(), range));

        let mut error = response.error.map(Error::from);
        let glyphs = match (&error, &response.data) {
            (None, Some(data)) => match parse_glyphs(data, range) {
                Ok(glyphs) => glyphs,
                Err(parse_error) => {
                    error = Some(parse_error.into());
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        if let Some(error) = &error {
            log::warn!("failed to load glyphs {range} of {font_stack:?}: {error}");
        }

        Arc::make_mut(&mut self.glyphs).insert_range(font_stack, range, glyphs);

        let complete: Vec<TileKey> = self
            .waiting
            .iter()
            .filter(|(_, dependencies)| self.glyphs.satisfies(dependencies))
            .map(|(requestor, _)| requestor.clone())
            .collect();
        for requestor in &complete {
            self.waiting.remove(requestor);
        }
        (complete, error)
    }
}
