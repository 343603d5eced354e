//! Resource reads and writes on top of the cache, throttle and session.
//!
//! Reads never fail: errors are logged and degrade to an empty list or
//! `None`. Writes return their errors and invalidate the response cache.

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheKey, CacheLayer};
use crate::coalesce::Coalescer;
use crate::config::ApiConfig;
use crate::connectivity::ConnectivityBus;
use crate::error::ClientError;
use crate::session::TokenMonitor;
use crate::throttle::{RequestThrottle, ThrottleWindow};

struct Inner {
  client: reqwest::Client,
  api: ApiConfig,
  cache: CacheLayer,
  throttle: Arc<RequestThrottle>,
  window: ThrottleWindow,
  session: TokenMonitor,
  bus: ConnectivityBus,
  in_flight: Option<Coalescer<String, Result<Value, ClientError>>>,
}

/// Per-resource API access shared by every view of the client.
#[derive(Clone)]
pub struct ResourceService {
  inner: Arc<Inner>,
}

pub struct ResourceServiceParts {
  pub client: reqwest::Client,
  pub api: ApiConfig,
  pub cache: CacheLayer,
  pub throttle: Arc<RequestThrottle>,
  pub window: ThrottleWindow,
  pub session: TokenMonitor,
  pub bus: ConnectivityBus,
  pub dedup: bool,
}

impl ResourceService {
  pub fn new(parts: ResourceServiceParts) -> Self {
    Self {
      inner: Arc::new(Inner {
        client: parts.client,
        api: parts.api,
        cache: parts.cache,
        throttle: parts.throttle,
        window: parts.window,
        session: parts.session,
        bus: parts.bus,
        in_flight: parts.dedup.then(Coalescer::new),
      }),
    }
  }

  /// List a resource collection, e.g. `list("categories", &json!({"page": 1}))`.
  pub async fn list(&self, kind: &str, params: &Value) -> Vec<Value> {
    let key = CacheKey::from_json(kind, params);
    let url = match self.inner.endpoint(&[kind]) {
      Ok(mut url) => {
        if !key.params().is_empty() {
          url.query_pairs_mut().extend_pairs(key.query_pairs());
        }
        url
      }
      Err(e) => {
        warn!(kind, error = %e, "Cannot build list URL");
        return Vec::new();
      }
    };

    match self.read(&key, url, None).await {
      Ok(body) => match unwrap_list(body) {
        Some(items) => items,
        None => {
          warn!(kind, "List response was not an array");
          Vec::new()
        }
      },
      Err(e) => {
        warn!(kind, error = %e, "List failed, returning empty result");
        Vec::new()
      }
    }
  }

  /// Fetch one item of a collection by slug or id. Missing items are `None`.
  pub async fn get_by_slug_or_id(&self, kind: &str, slug_or_id: &str) -> Option<Value> {
    let key = CacheKey::with_params(kind, [("slugOrId", json!(slug_or_id))]);
    let url = match self.inner.endpoint(&[kind, slug_or_id]) {
      Ok(url) => url,
      Err(e) => {
        warn!(kind, error = %e, "Cannot build detail URL");
        return None;
      }
    };

    let ttl = Some(self.inner.api.cache_ttl());
    match self.read(&key, url, ttl).await {
      Ok(Value::Null) => None,
      Ok(body) => Some(unwrap_item(body)),
      Err(ClientError::NotFound { .. }) => {
        debug!(kind, slug_or_id, "Item not found");
        None
      }
      Err(e) => {
        warn!(kind, slug_or_id, error = %e, "Detail fetch failed");
        None
      }
    }
  }

  pub async fn create(&self, kind: &str, body: &Value) -> Result<Value, ClientError> {
    let url = self.inner.endpoint(&[kind])?;
    self.write(Method::POST, url, Some(body)).await
  }

  pub async fn update(&self, kind: &str, id: &str, body: &Value) -> Result<Value, ClientError> {
    let url = self.inner.endpoint(&[kind, id])?;
    self.write(Method::PUT, url, Some(body)).await
  }

  pub async fn delete(&self, kind: &str, id: &str) -> Result<(), ClientError> {
    let url = self.inner.endpoint(&[kind, id])?;
    self.write(Method::DELETE, url, None).await.map(|_| ())
  }

  /// Every mutation goes through here so the cache is always cleared after
  /// a successful write.
  async fn write(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, ClientError> {
    let result = self.inner.send(method, &url, body, false).await;
    if result.is_ok() {
      self.inner.cache.invalidate_all();
    }
    result
  }

  async fn read(&self, key: &CacheKey, url: Url, ttl: Option<Duration>) -> Result<Value, ClientError> {
    let inner = self.inner.clone();
    let rendered = key.to_string();

    let result = self
      .inner
      .cache
      .fetch(key, ttl, || async move {
        let Some(in_flight) = &inner.in_flight else {
          return inner.gated_get(&rendered, &url).await;
        };
        let leader = inner.clone();
        let target = url.to_string();
        in_flight
          .run(rendered.clone(), move || async move {
            leader.gated_get(&rendered, &url).await
          })
          .await
          .unwrap_or_else(|e| {
            Err(ClientError::Network {
              url: target,
              reason: e.to_string(),
            })
          })
      })
      .await?;
    Ok(result.data)
  }
}

impl Inner {
  fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
    let raw = format!("{}{}", self.api.base(), self.api.resource_prefix);
    let mut url = Url::parse(&raw).map_err(|e| ClientError::Network {
      url: raw.clone(),
      reason: e.to_string(),
    })?;
    url
      .path_segments_mut()
      .map_err(|_| ClientError::Network {
        url: raw.clone(),
        reason: "base URL cannot carry a path".to_string(),
      })?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  /// A throttled GET; the throttle key is the rendered cache key.
  async fn gated_get(&self, key: &str, url: &Url) -> Result<Value, ClientError> {
    if !self.throttle.admit(key, self.window) {
      return Err(ClientError::Throttled {
        key: key.to_string(),
      });
    }
    self.send(Method::GET, url, None, true).await
  }

  /// Send with bearer auth, one refresh-and-replay on 401, and retries for
  /// transient failures when `retry` is set.
  async fn send(
    &self,
    method: Method,
    url: &Url,
    body: Option<&Value>,
    retry: bool,
  ) -> Result<Value, ClientError> {
    let mut attempt = 0;
    let mut refreshed = false;

    loop {
      let err = match self.send_once(method.clone(), url, body).await {
        Ok(value) => {
          self.bus.success();
          return Ok(value);
        }
        Err(err) => err,
      };

      if err.is_network_failure() {
        self.bus.failure(&err);
      } else {
        // The server answered, so the channel itself is up
        self.bus.success();
      }

      match err {
        ClientError::AuthRequired { .. } if !refreshed && self.session.is_authenticated() => {
          refreshed = true;
          if let Err(refresh_err) = self.session.refresh().await {
            warn!(error = %refresh_err, "Refresh after 401 failed");
            return Err(err);
          }
          debug!(url = %url, "Replaying request with refreshed token");
        }
        err if retry && err.is_retryable() && attempt < self.api.max_retries => {
          attempt += 1;
          debug!(url = %url, attempt, error = %err, "Retrying request");
          tokio::time::sleep(self.api.retry_delay()).await;
        }
        err => return Err(err),
      }
    }
  }

  async fn send_once(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Value, ClientError> {
    let timeout = self.api.request_timeout();
    let mut request = self
      .client
      .request(method, url.clone())
      .timeout(timeout);
    if let Some(token) = self.session.token() {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| ClientError::from_transport(url.as_str(), timeout, &e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(ClientError::from_status(url.as_str(), status));
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| ClientError::from_transport(url.as_str(), timeout, &e))?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
      url: url.to_string(),
      reason: e.to_string(),
    })
  }
}

/// Collections come back bare or wrapped in `data`/`items`.
fn unwrap_list(body: Value) -> Option<Vec<Value>> {
  match body {
    Value::Array(items) => Some(items),
    Value::Object(mut map) => match map.remove("data").or_else(|| map.remove("items")) {
      Some(Value::Array(items)) => Some(items),
      _ => None,
    },
    _ => None,
  }
}

/// Single items come back bare or wrapped in `data`.
fn unwrap_item(body: Value) -> Value {
  match body {
    Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
      map.remove("data").unwrap_or(Value::Null)
    }
    other => other,
  }
}
