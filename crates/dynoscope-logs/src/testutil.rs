//! In-memory fakes shared by the streaming tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dynoscope_api::{
    ApiError, ApiResult, ByteStream, LogSessionDescriptor, LogSessionRequest, PlatformApi,
};
use dynoscope_types::{AddOn, App, Dyno, Formation};

use crate::visibility::PresentationSurface;

/// Platform fake whose log streams are fed by the test through channels
pub struct FakePlatform {
    streams: Mutex<HashMap<String, mpsc::UnboundedReceiver<ApiResult<Vec<u8>>>>>,
    pub sessions_created: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(HashMap::new()),
            sessions_created: AtomicUsize::new(0),
        })
    }

    /// Register a pending stream for an app; the returned sender feeds it.
    /// Dropping the sender ends the stream.
    pub fn expect_stream(&self, app: &str) -> mpsc::UnboundedSender<ApiResult<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().insert(app.to_string(), rx);
        tx
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

fn receiver_stream(rx: mpsc::UnboundedReceiver<ApiResult<Vec<u8>>>) -> ByteStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn get_app(&self, name: &str, _cancel: &CancellationToken) -> ApiResult<App> {
        Ok(App::new(format!("id-{name}"), name.to_string()))
    }

    async fn list_dynos(&self, _app: &str, _cancel: &CancellationToken) -> ApiResult<Vec<Dyno>> {
        Ok(Vec::new())
    }

    async fn get_dyno(
        &self,
        _app: &str,
        dyno: &str,
        _cancel: &CancellationToken,
    ) -> ApiResult<Dyno> {
        Err(ApiError::NotFound(dyno.to_string()))
    }

    async fn list_formations(
        &self,
        _app: &str,
        _cancel: &CancellationToken,
    ) -> ApiResult<Vec<Formation>> {
        Ok(Vec::new())
    }

    async fn list_addons(&self, _app: &str, _cancel: &CancellationToken) -> ApiResult<Vec<AddOn>> {
        Ok(Vec::new())
    }

    async fn create_log_session(
        &self,
        app: &str,
        _request: &LogSessionRequest,
        _cancel: &CancellationToken,
    ) -> ApiResult<LogSessionDescriptor> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(LogSessionDescriptor {
            url: format!("fake://{app}"),
        })
    }

    async fn open_log_stream(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> ApiResult<ByteStream> {
        let app = url.trim_start_matches("fake://");
        match self.streams.lock().remove(app) {
            Some(rx) => Ok(receiver_stream(rx)),
            None => Err(ApiError::NotFound(url.to_string())),
        }
    }
}

/// Presentation surface that records appends and counts clears
#[derive(Default)]
pub struct RecordingSurface {
    lines: Mutex<Vec<String>>,
    clears: AtomicUsize,
}

impl RecordingSurface {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl PresentationSurface for RecordingSurface {
    fn append(&self, app: &str, line: &str) {
        self.lines.lock().push(format!("{app}: {line}"));
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.lines.lock().clear();
    }
}
