//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use url::Url;

use crate::upstream::transport::{HttpTransport, UpstreamResponse};
use crate::upstream::types::{BodyStream, UpstreamError, UpstreamResult};

/// A request seen by `StaticTransport`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Response {
        status: StatusCode,
        headers: Vec<(String, String)>,
        chunks: Vec<Vec<u8>>,
        invalidate_on_read: bool,
    },
    NetworkError(String),
}

/// Transport answering from a queue of canned responses.
///
/// The last scripted response is repeated once the queue runs dry.
#[derive(Debug, Default)]
pub struct StaticTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, content_type: &str, chunks: Vec<Vec<u8>>) -> Self {
        self.push(Scripted::Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers: vec![("content-type".to_string(), content_type.to_string())],
            chunks,
            invalidate_on_read: false,
        })
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Scripted::NetworkError(message.to_string()))
    }

    /// Add a header to the most recently scripted response.
    pub fn with_header(self, name: &str, value: &str) -> Self {
        self.edit_last(|scripted| {
            if let Scripted::Response { headers, .. } = scripted {
                headers.push((name.to_ascii_lowercase(), value.to_string()));
            }
        })
    }

    /// Make the most recent response forget its headers once the body is taken.
    pub fn invalidate_headers_on_read(self) -> Self {
        self.edit_last(|scripted| {
            if let Scripted::Response { invalidate_on_read, .. } = scripted {
                *invalidate_on_read = true;
            }
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(self, scripted: Scripted) -> Self {
        self.script.lock().unwrap().push_back(scripted);
        self
    }

    fn edit_last(self, edit: impl FnOnce(&mut Scripted)) -> Self {
        if let Some(last) = self.script.lock().unwrap().back_mut() {
            edit(last);
        }
        self
    }

    fn next(&self, request: RecordedRequest) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(request);

        let scripted = match self.script.lock().unwrap().pop_front() {
            Some(next) => {
                *self.last.lock().unwrap() = Some(next.clone());
                next
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Scripted::NetworkError("no scripted response".into())),
        };

        match scripted {
            Scripted::Response {
                status,
                headers,
                chunks,
                invalidate_on_read,
            } => Ok(Box::new(StaticResponse {
                status,
                headers: Some(headers),
                chunks: Some(chunks),
                invalidate_on_read,
                disposed: false,
            })),
            Scripted::NetworkError(message) => Err(UpstreamError::Network { url, message }),
        }
    }
}

#[async_trait]
impl HttpTransport for StaticTransport {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        self.next(RecordedRequest {
            method: Method::GET,
            url: url.clone(),
            headers: headers.clone(),
            body: None,
        })
    }

    async fn post(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
        _content_type: &str,
    ) -> UpstreamResult<Box<dyn UpstreamResponse>> {
        self.next(RecordedRequest {
            method: Method::POST,
            url: url.clone(),
            headers: headers.clone(),
            body: Some(body.to_vec()),
        })
    }
}

struct StaticResponse {
    status: StatusCode,
    headers: Option<Vec<(String, String)>>,
    chunks: Option<Vec<Vec<u8>>>,
    invalidate_on_read: bool,
    disposed: bool,
}

impl UpstreamResponse for StaticResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.headers
            .as_ref()?
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    }

    fn header_all(&self, name: &str) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .flatten()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn take_body(&mut self) -> UpstreamResult<BodyStream> {
        if self.disposed {
            return Err(UpstreamError::Disposed);
        }
        let chunks = self.chunks.take().ok_or(UpstreamError::BodyConsumed)?;
        if self.invalidate_on_read {
            self.headers = None;
        }
        Ok(stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed())
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.headers = None;
        self.chunks = None;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
