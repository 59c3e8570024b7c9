//! Requests, responses and cache keys as seen by the offline controller.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How a request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  /// Subresource load (script, stylesheet, image, ...)
  Subresource,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  /// Value of the Accept header, if any
  pub accept: Option<String>,
}

impl Request {
  /// A plain GET for a subresource.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      accept: None,
    }
  }

  /// A document navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
      accept: Some("text/html".to_string()),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  /// Navigations and anything that accepts HTML are handled network-first.
  pub fn wants_document(&self) -> bool {
    self.mode == RequestMode::Navigate
      || self
        .accept
        .as_deref()
        .is_some_and(|a| a.contains("text/html"))
  }

  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// A full response copy, as fetched or as stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Drop the cache-busting parameter from same-origin URLs.
///
/// `app.js?v=3` and `app.js?v=9` both become `app.js`; other query
/// parameters are kept in order. Foreign URLs are returned untouched.
pub fn strip_cache_buster(url: &Url, origin: &Url, bust_param: &str) -> Url {
  if url.origin() != origin.origin() || !url.query_pairs().any(|(k, _)| k == bust_param) {
    return url.clone();
  }

  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != bust_param)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  let mut out = url.clone();
  if kept.is_empty() {
    out.set_query(None);
  } else {
    out.query_pairs_mut().clear().extend_pairs(kept);
  }
  out
}

/// Identity of a stored response inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  /// SHA-256 of method and URL, hex encoded
  pub hash: String,
  pub url: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());

    Self {
      hash: hex::encode(hasher.finalize()),
      url: url.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://shop.example/").unwrap()
  }

  #[test]
  fn test_versioned_urls_share_a_key() {
    let a = Url::parse("https://shop.example/asset.js?v=3").unwrap();
    let b = Url::parse("https://shop.example/asset.js?v=9").unwrap();

    let a = strip_cache_buster(&a, &origin(), "v");
    let b = strip_cache_buster(&b, &origin(), "v");
    assert_eq!(a.as_str(), "https://shop.example/asset.js");
    assert_eq!(CacheKey::new(&Method::GET, &a), CacheKey::new(&Method::GET, &b));
  }

  #[test]
  fn test_other_query_parameters_survive() {
    let url = Url::parse("https://shop.example/a.css?theme=dark&v=2&x=1").unwrap();
    let stripped = strip_cache_buster(&url, &origin(), "v");
    assert_eq!(stripped.as_str(), "https://shop.example/a.css?theme=dark&x=1");
  }

  #[test]
  fn test_foreign_origin_untouched() {
    let url = Url::parse("https://cdn.example/lib.js?v=3").unwrap();
    assert_eq!(strip_cache_buster(&url, &origin(), "v"), url);
  }

  #[test]
  fn test_method_is_part_of_the_key() {
    let url = Url::parse("https://shop.example/api").unwrap();
    assert_ne!(
      CacheKey::new(&Method::GET, &url),
      CacheKey::new(&Method::POST, &url)
    );
  }

  #[test]
  fn test_html_accepting_request_wants_document() {
    let url = Url::parse("https://shop.example/").unwrap();
    assert!(Request::navigate(url.clone()).wants_document());
    assert!(Request::get(url.clone())
      .with_accept("text/html,application/xhtml+xml")
      .wants_document());
    assert!(!Request::get(url).with_accept("image/png").wants_document());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let mut response = Response::new(200, "body");
    response
      .headers
      .push(("Content-Type".to_string(), "text/css".to_string()));
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert!(response.is_ok());
    assert!(!Response::new(404, "").is_ok());
  }
}
