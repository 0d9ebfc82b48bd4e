//! Resource loading: requests, responses and the file sources answering them.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::task::LocalPoolHandle;

use crate::{
    error::{ErrorReason, ResponseError},
    io::url_template,
    style::source::TileAddressingScheme,
    tile::tile_id::CanonicalTileID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Tile,
    Glyphs,
    SpriteJson,
    Source,
}

/// Whether a resource may be fetched from the network.
///
/// `Optional` resources are answered from caches only. Tiles start out optional while they serve
/// as placeholders and become `Required` once they are part of the ideal cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Necessity {
    Optional,
    Required,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub url_template: String,
    pub pixel_ratio: f64,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub url: String,
    pub tile: Option<TileData>,
    pub necessity: Necessity,
    pub prior_modified: Option<String>,
    pub prior_etag: Option<String>,
}

impl Resource {
    fn new(kind: ResourceKind, url: String) -> Self {
        Self {
            kind,
            url,
            tile: None,
            necessity: Necessity::Required,
            prior_modified: None,
            prior_etag: None,
        }
    }

    pub fn tile(
        url_template: &str,
        pixel_ratio: f64,
        tile: &CanonicalTileID,
        scheme: TileAddressingScheme,
        necessity: Necessity,
    ) -> Self {
        let url = url_template::tile_url(url_template, tile, pixel_ratio, scheme);
        Self {
            tile: Some(TileData {
                url_template: url_template.to_string(),
                pixel_ratio,
                z: tile.z,
                x: tile.x,
                y: tile.y,
            }),
            necessity,
            ..Self::new(ResourceKind::Tile, url)
        }
    }

    pub fn glyphs(url_template: &str, font_stack: &[String], range_start: u32) -> Self {
        Self::new(
            ResourceKind::Glyphs,
            url_template::glyphs_url(url_template, font_stack, range_start),
        )
    }

    pub fn sprite_json(base: &str, pixel_ratio: f64) -> Self {
        Self::new(
            ResourceKind::SpriteJson,
            url_template::sprite_json_url(base, pixel_ratio),
        )
    }

    pub fn source(url: &str) -> Self {
        Self::new(ResourceKind::Source, url.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub data: Option<Arc<Vec<u8>>>,
    pub error: Option<ResponseError>,
    /// The resource exists but is empty, or a cache-only lookup missed.
    pub no_content: bool,
    /// The cached copy identified by the prior validators is still valid.
    pub not_modified: bool,
    /// Value of the `Last-Modified` validator.
    pub modified: Option<String>,
    pub expires: Option<SystemTime>,
    pub etag: Option<String>,
}

impl Response {
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Some(Arc::new(data)),
            ..Self::default()
        }
    }

    pub fn with_error(error: ResponseError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn no_content() -> Self {
        Self {
            no_content: true,
            ..Self::default()
        }
    }

    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            ..Self::default()
        }
    }
}

pub type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

/// Handle of an outstanding request. Dropping it cancels the request: the callback is not
/// invoked afterwards.
pub struct AsyncRequest {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl AsyncRequest {
    pub fn new(cancelled: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self { cancelled, task }
    }

    /// A request which was answered synchronously.
    pub fn completed() -> Self {
        Self::new(Arc::new(AtomicBool::new(true)), None)
    }
}

impl Drop for AsyncRequest {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Supplies resources asynchronously. Callbacks may be invoked on any thread, including the
/// calling one before `request` returns.
pub trait FileSource: Send + Sync + 'static {
    fn request(&self, resource: Resource, callback: ResponseCallback) -> AsyncRequest;
}

#[derive(Error, Debug)]
#[error("failed to fetch from source: {reason}")]
pub struct SourceFetchError {
    pub reason: ErrorReason,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl SourceFetchError {
    pub fn new<E>(reason: ErrorReason, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            reason,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub url: String,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// `max-age` of the `Cache-Control` header.
    pub max_age: Option<Duration>,
}

/// Futures of the HTTP client run pinned to one worker thread, so they do not need to be `Send`
/// unless the `thread-safe-futures` feature asks for it.
#[cfg_attr(not(feature = "thread-safe-futures"), async_trait(?Send))]
#[cfg_attr(feature = "thread-safe-futures", async_trait)]
pub trait HttpClient: Clone + Sync + Send + 'static {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, SourceFetchError>;
}

/// Translates an HTTP exchange into a [`Response`].
pub fn http_response(result: Result<HttpResponse, SourceFetchError>) -> Response {
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            return Response::with_error(ResponseError::new(error.reason, error.to_string()))
        }
    };

    let reason = match response.status {
        200..=299 if response.status == 204 || response.body.is_empty() => {
            return Response::no_content()
        }
        200..=299 => None,
        304 => return Response::not_modified(),
        404 => Some(ErrorReason::NotFound),
        429 => Some(ErrorReason::RateLimit),
        500..=599 => Some(ErrorReason::Server),
        _ => Some(ErrorReason::Other),
    };
    if let Some(reason) = reason {
        return Response::with_error(ResponseError::new(
            reason,
            format!("HTTP status code {}", response.status),
        ));
    }

    Response {
        data: Some(Arc::new(response.body)),
        modified: response.last_modified,
        expires: response.max_age.map(|max_age| SystemTime::now() + max_age),
        etag: response.etag,
        ..Response::default()
    }
}

/// Loads resources over HTTP on a pool of worker threads.
///
/// Optional requests never reach the network and are answered with `no_content`; the HTTP client
/// may serve required ones from its own cache.
pub struct HttpFileSource<HC: HttpClient> {
    client: HC,
    runtime: Handle,
    pool: LocalPoolHandle,
}

impl<HC: HttpClient> HttpFileSource<HC> {
    pub fn new(client: HC, runtime: Handle, pool_size: usize) -> Self {
        Self {
            client,
            runtime,
            pool: LocalPoolHandle::new(pool_size.max(1)),
        }
    }
}

impl<HC: HttpClient> FileSource for HttpFileSource<HC> {
    #[tracing::instrument(skip_all)]
    fn request(&self, resource: Resource, callback: ResponseCallback) -> AsyncRequest {
        if resource.necessity == Necessity::Optional {
            callback(Response::no_content());
            return AsyncRequest::completed();
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let request = HttpRequest {
            url: resource.url,
            if_none_match: resource.prior_etag,
            if_modified_since: resource.prior_modified,
        };
        let client = self.client.clone();
        let task_cancelled = cancelled.clone();

        let _guard = self.runtime.enter();
        let task = self.pool.spawn_pinned(move || async move {
            let result = client.fetch(&request).await;
            if let Err(error) = &result {
                log::warn!("request to {} failed: {error}", request.url);
            }
            if !task_cancelled.load(Ordering::SeqCst) {
                callback(http_response(result));
            }
        });

        AsyncRequest::new(cancelled, Some(task))
    }
}

#[derive(Debug, Clone)]
enum StaticEntry {
    Data(Arc<Vec<u8>>),
    Error(ResponseError),
}

/// Serves resources from memory. Every request is answered synchronously.
#[derive(Default)]
pub struct StaticFileSource {
    entries: Mutex<HashMap<String, StaticEntry>>,
    requests: Mutex<Vec<(String, Necessity)>>,
}

impl StaticFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.into(), StaticEntry::Data(Arc::new(data)));
        }
    }

    /// Answers every request for `url` with `error`.
    pub fn insert_error(&self, url: impl Into<String>, error: ResponseError) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.into(), StaticEntry::Error(error));
        }
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<(String, Necessity)> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl FileSource for StaticFileSource {
    fn request(&self, resource: Resource, callback: ResponseCallback) -> AsyncRequest {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((resource.url.clone(), resource.necessity));
        }

        let entry = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&resource.url).cloned());

        let response = match entry {
            Some(StaticEntry::Data(data)) => Response {
                data: Some(data),
                ..Response::default()
            },
            Some(StaticEntry::Error(error)) => Response::with_error(error),
            None if resource.necessity == Necessity::Optional => Response::no_content(),
            None => Response::with_error(ResponseError::new(
                ErrorReason::NotFound,
                format!("{} not found", resource.url),
            )),
        };
        callback(response);
        AsyncRequest::completed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        mpsc,
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use crate::{
        error::ErrorReason,
        io::source_client::{
            http_response, FileSource, HttpClient, HttpFileSource, HttpRequest, HttpResponse,
            Necessity, Resource, SourceFetchError, StaticFileSource,
        },
        style::source::TileAddressingScheme,
        tile::tile_id::CanonicalTileID,
    };

    fn tile_resource(necessity: Necessity) -> Resource {
        Resource::tile(
            "https://tiles/{z}/{x}/{y}.pbf",
            1.0,
            &CanonicalTileID::new(1, 0, 1),
            TileAddressingScheme::XYZ,
            necessity,
        )
    }

    #[test]
    fn static_source_answers_synchronously() {
        let source = StaticFileSource::new();
        source.insert("https://tiles/1/0/1.pbf", vec![1, 2, 3]);

        let (sender, receiver) = mpsc::channel();
        let _request = source.request(
            tile_resource(Necessity::Required),
            Box::new(move |response| sender.send(response).unwrap()),
        );
        let response = receiver.try_recv().unwrap();
        assert_eq!(response.data.unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(
            source.requests(),
            vec![("https://tiles/1/0/1.pbf".to_string(), Necessity::Required)]
        );
    }

    #[test]
    fn static_source_misses() {
        let source = StaticFileSource::new();

        let (sender, receiver) = mpsc::channel();
        let optional_sender = sender.clone();
        let _optional = source.request(
            tile_resource(Necessity::Optional),
            Box::new(move |response| optional_sender.send(response).unwrap()),
        );
        let _required = source.request(
            tile_resource(Necessity::Required),
            Box::new(move |response| sender.send(response).unwrap()),
        );

        assert!(receiver.try_recv().unwrap().no_content);
        assert_eq!(
            receiver.try_recv().unwrap().error.unwrap().reason,
            ErrorReason::NotFound
        );
    }

    #[test]
    fn maps_http_status() {
        let ok = http_response(Ok(HttpResponse {
            status: 200,
            body: vec![1],
            etag: Some("abc".to_string()),
            ..HttpResponse::default()
        }));
        assert_eq!(ok.etag.as_deref(), Some("abc"));
        assert!(ok.data.is_some());

        assert!(http_response(Ok(HttpResponse {
            status: 304,
            ..HttpResponse::default()
        }))
        .not_modified);
        assert!(http_response(Ok(HttpResponse {
            status: 200,
            ..HttpResponse::default()
        }))
        .no_content);

        let server = http_response(Ok(HttpResponse {
            status: 503,
            ..HttpResponse::default()
        }));
        assert_eq!(server.error.unwrap().reason, ErrorReason::Server);

        let connection = http_response(Err(SourceFetchError::new(
            ErrorReason::Connection,
            "connection refused",
        )));
        assert!(connection.error.unwrap().is_transient());
    }

    #[derive(Clone, Default)]
    struct CountingClient {
        calls: Arc<AtomicUsize>,
    }

    #[cfg_attr(not(feature = "thread-safe-futures"), async_trait(?Send))]
    #[cfg_attr(feature = "thread-safe-futures", async_trait)]
    impl HttpClient for CountingClient {
        async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, SourceFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                body: request.url.as_bytes().to_vec(),
                ..HttpResponse::default()
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_source_skips_network_for_optional_requests() {
        let client = CountingClient::default();
        let source = HttpFileSource::new(client.clone(), tokio::runtime::Handle::current(), 1);

        let (sender, receiver) = mpsc::channel();
        let optional_sender = sender.clone();
        let _optional = source.request(
            tile_resource(Necessity::Optional),
            Box::new(move |response| optional_sender.send(response).unwrap()),
        );
        assert!(receiver.recv().unwrap().no_content);

        let _required = source.request(
            tile_resource(Necessity::Required),
            Box::new(move |response| sender.send(response).unwrap()),
        );
        let response = tokio::task::spawn_blocking(move || receiver.recv().unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.data.unwrap().as_slice(),
            b"https://tiles/1/0/1.pbf"
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
