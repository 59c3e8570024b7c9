//! Live network access for the offline controller, over reqwest.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use super::request::{Request, Response};
use super::traits::Network;
use crate::error::CacheError;

/// Network access over HTTP(S).
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
    let failed = |e: reqwest::Error| CacheError::Network {
      url: request.url.to_string(),
      reason: e.to_string(),
    };

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    if let Some(accept) = &request.accept {
      builder = builder.header(reqwest::header::ACCEPT, accept);
    }

    let response = builder.send().await.map_err(failed)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(failed)?.to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "fetched");
    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
