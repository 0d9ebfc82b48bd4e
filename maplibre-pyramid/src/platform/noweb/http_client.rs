use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use http_cache_reqwest::{CACacheManager, Cache, CacheMode, HttpCache, HttpCacheOptions};
use reqwest::{header, Client, StatusCode};
use reqwest_middleware::ClientWithMiddleware;

use crate::{
    error::ErrorReason,
    io::source_client::{HttpClient, HttpRequest, HttpResponse, SourceFetchError},
};

#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: ClientWithMiddleware,
}

impl From<reqwest::Error> for SourceFetchError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_connect() || err.is_timeout() {
            ErrorReason::Connection
        } else {
            ErrorReason::Other
        };
        SourceFetchError::new(reason, err)
    }
}

impl From<reqwest_middleware::Error> for SourceFetchError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => {
                SourceFetchError::new(ErrorReason::Other, err.to_string())
            }
        }
    }
}

impl ReqwestHttpClient {
    /// cache_path: Under which path should we cache requests.
    pub fn new<P>(cache_path: Option<P>) -> Self
    where
        P: Into<PathBuf>,
    {
        let mut builder = reqwest_middleware::ClientBuilder::new(Client::new());

        if let Some(cache_path) = cache_path {
            builder = builder.with(Cache(HttpCache {
                mode: CacheMode::Default,
                manager: CACacheManager {
                    path: cache_path.into(),
                },
                options: HttpCacheOptions::default(),
            }))
        }
        let client = builder.build();

        Self { client }
    }
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|seconds| seconds.parse().ok())
        .map(Duration::from_secs)
}

#[cfg_attr(not(feature = "thread-safe-futures"), async_trait(?Send))]
#[cfg_attr(feature = "thread-safe-futures", async_trait)]
impl HttpClient for ReqwestHttpClient {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, SourceFetchError> {
        let mut builder = self.client.get(&request.url);
        if let Some(etag) = &request.if_none_match {
            builder = builder.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(modified) = &request.if_modified_since {
            builder = builder.header(header::IF_MODIFIED_SINCE, modified);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            log::info!("Using data from cache");
        }

        let etag = header_string(&response, header::ETAG);
        let last_modified = header_string(&response, header::LAST_MODIFIED);
        let max_age = header_string(&response, header::CACHE_CONTROL)
            .as_deref()
            .and_then(max_age);
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status: status.as_u16(),
            body: Vec::from(body.as_ref()),
            etag,
            last_modified,
            max_age,
        })
    }
}
