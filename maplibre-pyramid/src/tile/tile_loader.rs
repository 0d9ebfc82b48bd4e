//! Request lifecycle of a single tile.
//!
//! A loader first asks its [`FileSource`] for a cached copy with [`Necessity::Optional`]. Once the
//! tile is required and the cache could not satisfy it, the request is issued again with network
//! access. At most one request is outstanding; answers are delivered through the mailbox tagged
//! with a request id so answers to superseded requests can be recognized.

use std::{sync::Arc, time::SystemTime};

use crate::{
    error::{ErrorReason, ResponseError},
    io::{
        scheduler::MailboxSender,
        source_client::{AsyncRequest, FileSource, Necessity, Resource, Response},
    },
    message::{Message, TileKey, TileMessage},
};

/// What a response means for the tile.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// New data which needs to be parsed.
    Data(Arc<Vec<u8>>),
    /// The data the tile already has is still valid.
    NotModified,
    /// The tile exists but is empty.
    NoContent,
    /// The cache had nothing. Required tiles continue over the network, optional ones wait
    /// until they become required.
    Pending,
    Error(ResponseError),
    /// Answer to a request which was superseded or cancelled.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Cache,
    Network,
}

pub struct TileLoader {
    key: TileKey,
    resource: Resource,
    file_source: Arc<dyn FileSource>,
    sender: MailboxSender<Message>,

    request: Option<AsyncRequest>,
    request_id: u64,
    phase: Phase,
    necessity: Necessity,

    tried_cache: bool,
    loaded_from_network: bool,
    has_data: bool,
    modified: Option<String>,
    expires: Option<SystemTime>,
}

impl TileLoader {
    /// Creates the loader and asks the cache for the tile right away.
    pub fn new(
        key: TileKey,
        resource: Resource,
        necessity: Necessity,
        file_source: Arc<dyn FileSource>,
        sender: MailboxSender<Message>,
    ) -> Self {
        let mut loader = Self {
            key,
            resource,
            file_source,
            sender,
            request: None,
            request_id: 0,
            phase: Phase::Cache,
            necessity,
            tried_cache: false,
            loaded_from_network: false,
            has_data: false,
            modified: None,
            expires: None,
        };
        loader.issue(Phase::Cache);
        loader
    }

    pub fn necessity(&self) -> Necessity {
        self.necessity
    }

    pub fn is_loading(&self) -> bool {
        self.request.is_some()
    }

    /// Whether the cache has been asked for this tile.
    pub fn tried_cache(&self) -> bool {
        self.tried_cache
    }

    pub fn modified(&self) -> Option<&str> {
        self.modified.as_deref()
    }

    pub fn expires(&self) -> Option<SystemTime> {
        self.expires
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Required tiles go to the network once the cache could not answer. Optional tiles give up
    /// an outstanding network request.
    pub fn set_necessity(&mut self, necessity: Necessity) {
        if necessity == self.necessity {
            return;
        }
        self.necessity = necessity;

        match necessity {
            Necessity::Required => {
                if self.request.is_none() && self.tried_cache && self.needs_network() {
                    self.issue(Phase::Network);
                }
            }
            Necessity::Optional => {
                if self.request.is_some() && self.phase == Phase::Network {
                    log::debug!("dropping network request of optional tile {:?}", self.key);
                    self.cancel();
                }
            }
        }
    }

    /// Forgets the outstanding request. Its answer, if already queued, becomes stale.
    pub fn cancel(&mut self) {
        self.request = None;
        self.request_id += 1;
    }

    /// Interprets the answer to request `request_id` and follows up with a network request if
    /// the cache could not satisfy a required tile.
    #[tracing::instrument(skip_all)]
    pub fn on_response(&mut self, request_id: u64, response: Response) -> LoaderEvent {
        if request_id != self.request_id || self.request.is_none() {
            log::debug!("ignoring stale response for tile {:?}", self.key);
            return LoaderEvent::Stale;
        }
        self.request = None;

        let event = match self.phase {
            Phase::Cache => self.on_cache_response(response),
            Phase::Network => self.on_network_response(response),
        };
        tracing::debug!("tile {} loader event {}", self.key.tile, event_name(&event));
        event
    }

    fn on_cache_response(&mut self, response: Response) -> LoaderEvent {
        self.tried_cache = true;

        let miss = response.no_content
            || matches!(&response.error, Some(error) if error.reason == ErrorReason::NotFound);
        if miss {
            self.resource.prior_modified = response.modified;
            self.resource.prior_etag = response.etag;
            if self.necessity == Necessity::Required {
                self.issue(Phase::Network);
            }
            return LoaderEvent::Pending;
        }

        let event = self.loaded(response);
        if self.necessity == Necessity::Required
            && !matches!(event, LoaderEvent::Error(_))
            && self.needs_network()
        {
            self.issue(Phase::Network);
        }
        event
    }

    fn on_network_response(&mut self, mut response: Response) -> LoaderEvent {
        self.loaded_from_network = true;
        // Tiles the server does not have are empty, not broken.
        if matches!(&response.error, Some(error) if error.reason == ErrorReason::NotFound) {
            response.error = None;
            response.no_content = true;
        }
        self.loaded(response)
    }

    fn loaded(&mut self, response: Response) -> LoaderEvent {
        if let Some(error) = response.error {
            return LoaderEvent::Error(error);
        }

        if response.not_modified {
            self.expires = response.expires;
            return LoaderEvent::NotModified;
        }

        self.resource.prior_modified = response.modified.clone();
        self.resource.prior_etag = response.etag;
        self.modified = response.modified;
        self.expires = response.expires;

        match response.data {
            Some(data) if !response.no_content && !data.is_empty() => {
                self.has_data = true;
                LoaderEvent::Data(data)
            }
            _ => {
                self.has_data = true;
                LoaderEvent::NoContent
            }
        }
    }

    /// Cached data without an expiry date counts as fresh.
    fn needs_network(&self) -> bool {
        if self.loaded_from_network {
            return false;
        }
        if !self.has_data {
            return true;
        }
        matches!(self.expires, Some(expires) if expires <= SystemTime::now())
    }

    fn issue(&mut self, phase: Phase) {
        self.request_id += 1;
        self.phase = phase;

        let mut resource = self.resource.clone();
        resource.necessity = match phase {
            Phase::Cache => Necessity::Optional,
            Phase::Network => Necessity::Required,
        };

        let key = self.key.clone();
        let request_id = self.request_id;
        let sender = self.sender.clone();

        // The placeholder marks the request as outstanding even if the file source answers
        // before `request` returns.
        self.request = Some(AsyncRequest::completed());
        let request = self.file_source.request(
            resource,
            Box::new(move |response| {
                sender.send(Message::Tile {
                    key,
                    message: TileMessage::Response {
                        request_id,
                        response,
                    },
                });
            }),
        );
        self.request = Some(request);
    }
}

fn event_name(event: &LoaderEvent) -> &'static str {
    match event {
        LoaderEvent::Data(_) => "data",
        LoaderEvent::NotModified => "not modified",
        LoaderEvent::NoContent => "no content",
        LoaderEvent::Pending => "pending",
        LoaderEvent::Error(_) => "error",
        LoaderEvent::Stale => "stale",
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, SystemTime},
    };

    use crate::{
        error::{ErrorReason, ResponseError},
        io::{
            scheduler::Mailbox,
            source_client::{
                AsyncRequest, FileSource, Necessity, Resource, Response, ResponseCallback,
                StaticFileSource,
            },
        },
        message::{Message, TileKey, TileMessage},
        style::source::TileAddressingScheme,
        tile::{
            tile_id::{CanonicalTileID, OverscaledTileID},
            tile_loader::{LoaderEvent, TileLoader},
        },
    };

    const URL: &str = "https://tiles/3/2/1.pbf";

    fn key() -> TileKey {
        TileKey::new("source", OverscaledTileID::new(3, 0, CanonicalTileID::new(3, 2, 1)))
    }

    fn resource() -> Resource {
        Resource::tile(
            "https://tiles/{z}/{x}/{y}.pbf",
            1.0,
            &CanonicalTileID::new(3, 2, 1),
            TileAddressingScheme::XYZ,
            Necessity::Required,
        )
    }

    /// Delivers the next queued response to the loader.
    fn deliver(mailbox: &Mailbox<Message>, loader: &mut TileLoader) -> LoaderEvent {
        match mailbox.try_recv() {
            Some(Message::Tile {
                key: message_key,
                message: TileMessage::Response {
                    request_id,
                    response,
                },
            }) => {
                assert_eq!(message_key, key());
                loader.on_response(request_id, response)
            }
            _ => panic!("expected a tile response"),
        }
    }

    #[test]
    fn cached_data_is_used() {
        let source = Arc::new(StaticFileSource::new());
        source.insert(URL, vec![1, 2, 3]);
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Required,
            source.clone(),
            mailbox.sender(),
        );
        assert!(loader.is_loading());
        assert_eq!(
            deliver(&mailbox, &mut loader),
            LoaderEvent::Data(Arc::new(vec![1, 2, 3]))
        );
        assert!(!loader.is_loading());
        assert!(loader.tried_cache());
        assert_eq!(source.requests(), vec![(URL.to_string(), Necessity::Optional)]);
    }

    #[test]
    fn required_tiles_fall_back_to_the_network() {
        let source = Arc::new(StaticFileSource::new());
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Required,
            source.clone(),
            mailbox.sender(),
        );
        assert_eq!(deliver(&mailbox, &mut loader), LoaderEvent::Pending);
        assert!(loader.is_loading());
        // The server does not have the tile either.
        assert_eq!(deliver(&mailbox, &mut loader), LoaderEvent::NoContent);
        assert_eq!(
            source.requests(),
            vec![
                (URL.to_string(), Necessity::Optional),
                (URL.to_string(), Necessity::Required)
            ]
        );
    }

    #[test]
    fn optional_tiles_wait_until_required() {
        let source = Arc::new(StaticFileSource::new());
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Optional,
            source.clone(),
            mailbox.sender(),
        );
        assert_eq!(deliver(&mailbox, &mut loader), LoaderEvent::Pending);
        assert!(!loader.is_loading());

        source.insert(URL, vec![7]);
        loader.set_necessity(Necessity::Required);
        assert!(loader.is_loading());
        assert_eq!(
            deliver(&mailbox, &mut loader),
            LoaderEvent::Data(Arc::new(vec![7]))
        );
        assert_eq!(source.requests().len(), 2);
    }

    #[test]
    fn superseded_responses_are_stale() {
        let source = Arc::new(StaticFileSource::new());
        source.insert(URL, vec![1]);
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Required,
            source,
            mailbox.sender(),
        );
        loader.cancel();
        assert_eq!(deliver(&mailbox, &mut loader), LoaderEvent::Stale);
        assert!(!loader.is_loading());
    }

    #[test]
    fn errors_are_reported_once() {
        let source = Arc::new(StaticFileSource::new());
        source.insert_error(
            URL,
            ResponseError::new(ErrorReason::Connection, "connection refused"),
        );
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Required,
            source.clone(),
            mailbox.sender(),
        );
        match deliver(&mailbox, &mut loader) {
            LoaderEvent::Error(error) => assert!(error.is_transient()),
            event => panic!("unexpected {event:?}"),
        }
        // No retry inside the loader.
        assert!(!loader.is_loading());
        assert!(mailbox.try_recv().is_none());
        assert_eq!(source.requests().len(), 1);
    }

    /// Answers cache lookups with expired data and network requests with `not_modified`.
    #[derive(Default)]
    struct RevalidatingSource {
        resources: Mutex<Vec<Resource>>,
    }

    impl FileSource for RevalidatingSource {
        fn request(&self, resource: Resource, callback: ResponseCallback) -> AsyncRequest {
            let response = match resource.necessity {
                Necessity::Optional => Response {
                    etag: Some("v1".to_string()),
                    expires: Some(SystemTime::now() - Duration::from_secs(60)),
                    ..Response::with_data(vec![1])
                },
                Necessity::Required => Response {
                    expires: Some(SystemTime::now() + Duration::from_secs(60)),
                    ..Response::not_modified()
                },
            };
            self.resources.lock().unwrap().push(resource);
            callback(response);
            AsyncRequest::completed()
        }
    }

    #[test]
    fn expired_cache_entries_are_revalidated() {
        let source = Arc::new(RevalidatingSource::default());
        let mailbox = Mailbox::new();

        let mut loader = TileLoader::new(
            key(),
            resource(),
            Necessity::Required,
            source.clone(),
            mailbox.sender(),
        );
        assert_eq!(
            deliver(&mailbox, &mut loader),
            LoaderEvent::Data(Arc::new(vec![1]))
        );
        assert!(loader.is_loading());
        assert_eq!(deliver(&mailbox, &mut loader), LoaderEvent::NotModified);
        assert!(loader.expires().unwrap() > SystemTime::now());

        let resources = source.resources.lock().unwrap();
        assert_eq!(resources[1].prior_etag.as_deref(), Some("v1"));
    }
}
