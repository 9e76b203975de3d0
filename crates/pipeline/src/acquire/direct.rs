use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{AcquiredPayload, FetchRequest, Fetcher, PayloadItem};

use super::{Acquire, AcquireContext, AcquireFuture, or_cancelled, with_byte_progress};
use crate::config::AcquireConfig;
use crate::error::AcquisitionError;
use crate::intake::{http_host, is_magnet};

/// Plain http(s) downloads through a [`Fetcher`].
pub struct DirectSource {
    fetcher: Arc<dyn Fetcher>,
    attempts: u32,
    timeout: Duration,
}

impl DirectSource {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &AcquireConfig) -> Self {
        Self {
            fetcher,
            attempts: config.fetch_retries.max(1),
            timeout: Duration::from_secs(config.fetch_timeout_secs.max(1)),
        }
    }

    async fn download(&self, url: &str, ctx: &AcquireContext<'_>) -> Result<AcquiredPayload, AcquisitionError> {
        if is_magnet(url) {
            return Err(AcquisitionError::invalid(
                "magnet links go through the torrent flow, use /torrent",
            ));
        }
        if http_host(url).is_none() {
            return Err(AcquisitionError::invalid(format!("not a valid http(s) URL: {url}")));
        }

        let request = FetchRequest {
            url: url.to_string(),
            dest_dir: ctx.dest.to_path_buf(),
            headers: Vec::new(),
            timeout: self.timeout,
            attempts: self.attempts,
            abort_on: None,
        };

        let file = with_byte_progress(ctx.notifier, |progress| self.fetcher.fetch(&request, progress)).await?;

        let item = PayloadItem::new(file.path, file.file_name.clone(), file.size);
        Ok(AcquiredPayload::new(file.file_name, vec![item], ctx.dest.to_path_buf()))
    }
}

impl Acquire for DirectSource {
    fn acquire<'a>(&'a self, locator: &'a str, ctx: &'a AcquireContext<'a>) -> AcquireFuture<'a> {
        Box::pin(or_cancelled(ctx.cancel, self.download(locator, ctx)))
    }
}
