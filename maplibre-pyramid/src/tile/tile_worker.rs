//! Dispatch of tile layouts to the worker pool.

use std::sync::Arc;

use crate::{
    io::scheduler::{MailboxSender, ScheduleError, Scheduler},
    layout::{
        layout, layout_symbols, symbol_layout::SymbolLayout, LayoutInput, LayoutResult,
        SymbolLayoutInput, TileSourceData,
    },
    message::{Message, TileKey, TileMessage},
    style::layer::StyleLayer,
    text::{glyph::GlyphMap, image_manager::ImageMap},
};

/// Keeps the inputs of a tile's layout and runs at most one layout of the tile at a time.
///
/// Every change of the data or the layers asks for a new layout. Glyphs and images only finish
/// the symbol layouts which waited for them; the other layers are not laid out again. Changes
/// which arrive while a layout is running are coalesced into a single follow-up layout which
/// starts once the running one reported back through [`TileWorker::on_layout`].
pub struct TileWorker {
    key: TileKey,
    scheduler: Arc<dyn Scheduler>,
    sender: MailboxSender<Message>,

    data: Option<TileSourceData>,
    layers: Vec<Arc<StyleLayer>>,
    glyphs: Arc<GlyphMap>,
    images: Option<Arc<ImageMap>>,

    /// Symbol layouts of the last layout still missing glyphs or images.
    symbol_layouts: Option<Arc<Vec<SymbolLayout>>>,

    correlation_id: u64,
    in_flight: Option<u64>,
    needs_layout: bool,
    needs_symbol_layout: bool,
    data_changed: bool,
}

impl TileWorker {
    pub fn new(
        key: TileKey,
        scheduler: Arc<dyn Scheduler>,
        sender: MailboxSender<Message>,
        layers: Vec<Arc<StyleLayer>>,
        glyphs: Arc<GlyphMap>,
        images: Option<Arc<ImageMap>>,
    ) -> Self {
        Self {
            key,
            scheduler,
            sender,
            data: None,
            layers,
            glyphs,
            images,
            symbol_layouts: None,
            correlation_id: 0,
            in_flight: None,
            needs_layout: false,
            needs_symbol_layout: false,
            data_changed: false,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Whether neither a layout is running nor one is waiting to run.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && !self.needs_layout && !self.needs_symbol_layout
    }

    pub fn set_data(&mut self, data: TileSourceData) -> Result<(), ScheduleError> {
        self.data = Some(data);
        self.data_changed = true;
        self.request_layout()
    }

    /// Forgets the data of the tile, for example when the source answered with no content.
    pub fn clear_data(&mut self) {
        self.data = None;
        self.symbol_layouts = None;
        self.data_changed = true;
    }

    pub fn set_layers(&mut self, layers: Vec<Arc<StyleLayer>>) -> Result<(), ScheduleError> {
        self.layers = layers;
        self.request_layout()
    }

    pub fn on_glyphs_available(&mut self, glyphs: Arc<GlyphMap>) -> Result<(), ScheduleError> {
        self.glyphs = glyphs;
        self.request_symbol_layout()
    }

    pub fn on_images_available(&mut self, images: Arc<ImageMap>) -> Result<(), ScheduleError> {
        self.images = Some(images);
        self.request_symbol_layout()
    }

    /// Accepts the result of the running layout. Results of layouts which were abandoned are
    /// stale and dropped.
    ///
    /// Call [`TileWorker::resume`] afterwards to start a layout which was asked for meanwhile.
    pub fn on_layout(&mut self, result: LayoutResult) -> Option<LayoutResult> {
        if self.in_flight != Some(result.correlation_id) {
            log::debug!(
                "dropping stale layout {} of {:?}",
                result.correlation_id,
                self.key
            );
            return None;
        }
        self.in_flight = None;

        if let Ok(data) = &result.result {
            self.symbol_layouts = data.symbol_layouts.clone();
            // Layouts started later can reuse the decoded geometry.
            if !self.data_changed {
                if let Some(geometry) = &data.geometry {
                    self.data = Some(TileSourceData::Geometry(geometry.clone()));
                }
            }
        }

        Some(result)
    }

    /// Starts the layout which was asked for while another one was running.
    pub fn resume(&mut self) -> Result<(), ScheduleError> {
        if self.needs_layout {
            self.request_layout()
        } else if self.needs_symbol_layout {
            self.request_symbol_layout()
        } else {
            Ok(())
        }
    }

    /// Abandons the running layout. Its result is dropped on arrival; the work itself is not
    /// interrupted.
    pub fn cancel(&mut self) {
        self.in_flight = None;
        self.needs_layout = false;
        self.needs_symbol_layout = false;
    }

    fn request_layout(&mut self) -> Result<(), ScheduleError> {
        let Some(data) = self.data.clone() else {
            return Ok(());
        };
        if self.in_flight.is_some() {
            self.needs_layout = true;
            return Ok(());
        }

        self.correlation_id += 1;
        let input = LayoutInput {
            tile: self.key.tile,
            correlation_id: self.correlation_id,
            data,
            layers: self.layers.clone(),
            glyphs: self.glyphs.clone(),
            images: self.images.clone(),
        };
        self.needs_layout = false;
        // A full layout finishes the symbols with the latest glyphs and images as well.
        self.needs_symbol_layout = false;
        self.symbol_layouts = None;
        self.data_changed = false;
        self.dispatch(move || layout(input))
    }

    fn request_symbol_layout(&mut self) -> Result<(), ScheduleError> {
        if self.in_flight.is_some() {
            self.needs_symbol_layout = true;
            return Ok(());
        }
        self.needs_symbol_layout = false;
        let Some(symbol_layouts) = self.symbol_layouts.clone() else {
            return Ok(());
        };

        self.correlation_id += 1;
        let input = SymbolLayoutInput {
            tile: self.key.tile,
            correlation_id: self.correlation_id,
            symbol_layouts,
            glyphs: self.glyphs.clone(),
            images: self.images.clone(),
        };
        self.dispatch(move || layout_symbols(input))
    }

    /// Runs `job` on the scheduler as the layout with the current correlation id.
    fn dispatch<F>(&mut self, job: F) -> Result<(), ScheduleError>
    where
        F: FnOnce() -> LayoutResult + Send + 'static,
    {
        self.in_flight = Some(self.correlation_id);

        let key = self.key.clone();
        let sender = self.sender.clone();
        let scheduled = self.scheduler.schedule(Box::new(move || {
            let result = job();
            sender.send(Message::Tile {
                key,
                message: TileMessage::Layout(Box::new(result)),
            });
        }));

        if let Err(error) = scheduled {
            log::error!("failed to schedule layout of {:?}: {error}", self.key);
            self.in_flight = None;
            return Err(error);
        }
        Ok(())
    }
}
