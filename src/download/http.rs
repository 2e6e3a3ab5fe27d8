use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, RANGE};

use super::{Fetched, ImageSource};
use crate::error::DevboxError;
use crate::progress;

/// Streams the image over HTTP(S), resuming with a `Range` header.
pub struct HttpImageSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    show_progress: bool,
}

impl HttpImageSource {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, DevboxError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DevboxError::Transport {
                context: "building HTTP client".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            connect_timeout,
            idle_timeout,
            show_progress: true,
        })
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, offset: u64) -> Result<Fetched, DevboxError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        tracing::info!(url = %self.url, offset, "requesting image");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DevboxError::Timeout {
                    operation: format!("connecting to {}", self.url),
                    secs: self.connect_timeout.as_secs(),
                }
            } else {
                DevboxError::Transport {
                    context: format!("GET {}", self.url),
                    message: e.to_string(),
                }
            }
        })?;

        if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::info!(offset, "nothing left to fetch");
            return Ok(Fetched {
                start: offset,
                body: Box::pin(futures_util::stream::empty()),
            });
        }
        check_status(response.status(), &self.url)?;
        let start = if response.status() == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            if offset > 0 {
                tracing::warn!(status = %response.status(), "server ignored range request");
            }
            0
        };

        let total = response.content_length().map(|len| len + start);
        let pb = progress::download_bar(total, start);
        if !self.show_progress {
            pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        let idle = self.idle_timeout;
        let url = self.url.clone();
        let body = Box::pin(response.bytes_stream());
        let stream = futures_util::stream::unfold(Some((body, pb)), move |state| {
            let url = url.clone();
            async move {
                let (mut body, pb) = state?;
                match tokio::time::timeout(idle, body.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        pb.inc(chunk.len() as u64);
                        Some((Ok(chunk), Some((body, pb))))
                    }
                    Ok(Some(Err(e))) => {
                        pb.abandon();
                        let err = DevboxError::Transport {
                            context: format!("reading {url}"),
                            message: e.to_string(),
                        };
                        Some((Err(err), None))
                    }
                    Ok(None) => {
                        pb.finish_and_clear();
                        None
                    }
                    Err(_) => {
                        pb.abandon();
                        let err = DevboxError::Timeout {
                            operation: format!("reading {url}"),
                            secs: idle.as_secs(),
                        };
                        Some((Err(err), None))
                    }
                }
            }
        });

        Ok(Fetched {
            start,
            body: Box::pin(stream),
        })
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<(), DevboxError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(DevboxError::ImageAuth {
            message: "invalid API token: set DEVBOX_TOKEN or [image] token".into(),
        }),
        StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => Err(DevboxError::ImageAuth {
            message: format!("you must accept the image's terms of use before downloading {url}"),
        }),
        other => Err(DevboxError::Transport {
            context: format!("GET {url}"),
            message: format!("server returned {other}"),
        }),
    }
}
