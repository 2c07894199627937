//! Tower [`Layer`]/[`Service`] wiring for the request-cache workflow: a cheap
//! `Clone`-able layer stamps out a service per connection. Bodies are fully buffered
//! into [`bytes::Bytes`] rather than streamed, since the workflow always needs the whole
//! response before it can decide whether to cache it.

use super::body::{hash_request_body, BodyHash};
use super::{
    derive_exact_key, derive_similarity_key, is_request_eligible, is_response_cacheable, strip_denylisted_headers, CacheMode,
    CachedResponse, RequestCachePolicy, ResponseMetadataHeaders,
};
use crate::orchestrator::CacheOrchestrator;
use crate::similarity::{canonicalize, similarity_permitted, SimilarityEngine};
use bytes::Bytes;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower layer that caches whole-body HTTP responses behind a shared
/// [`CacheOrchestrator`]. When `policy.mode` is [`CacheMode::Similarity`], also consults a
/// [`SimilarityEngine`] supplied via [`Self::with_similarity`]; without one, a
/// `Similarity`-mode policy degrades to passing every request straight through uncached.
#[derive(Clone)]
pub struct RequestCacheLayer {
    orchestrator: Arc<CacheOrchestrator>,
    policy: RequestCachePolicy,
    similarity: Option<Arc<SimilarityEngine>>,
}

impl RequestCacheLayer {
    pub fn new(orchestrator: Arc<CacheOrchestrator>, policy: RequestCachePolicy) -> Self {
        Self { orchestrator, policy, similarity: None }
    }

    /// Attach the similarity engine consulted when `policy.mode == CacheMode::Similarity`.
    pub fn with_similarity(mut self, engine: Arc<SimilarityEngine>) -> Self {
        self.similarity = Some(engine);
        self
    }
}

impl<S> Layer<S> for RequestCacheLayer {
    type Service = RequestCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCacheService {
            inner,
            orchestrator: Arc::clone(&self.orchestrator),
            policy: self.policy.clone(),
            similarity: self.similarity.clone(),
        }
    }
}

/// The service produced by [`RequestCacheLayer`]. Wraps `inner` and consults the cache
/// facade before forwarding.
#[derive(Clone)]
pub struct RequestCacheService<S> {
    inner: S,
    orchestrator: Arc<CacheOrchestrator>,
    policy: RequestCachePolicy,
    similarity: Option<Arc<SimilarityEngine>>,
}

impl<S> Service<Request<Bytes>> for RequestCacheService<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Bytes>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let mut inner = self.inner.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let policy = self.policy.clone();
        let similarity = self.similarity.clone();

        Box::pin(async move {
            if !is_request_eligible(&policy, request.method(), request.uri().path(), request.headers()) {
                return inner.call(request).await;
            }

            match (policy.mode, &similarity) {
                (CacheMode::Similarity, Some(engine)) => {
                    call_similarity(&mut inner, request, &orchestrator, &policy, engine).await
                }
                _ => call_exact(&mut inner, request, &orchestrator, &policy).await,
            }
        })
    }
}

async fn call_exact<S>(
    inner: &mut S,
    request: Request<Bytes>,
    orchestrator: &Arc<CacheOrchestrator>,
    policy: &RequestCachePolicy,
) -> Result<Response<Bytes>, S::Error>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    let body_hash = if policy.include_body {
        match hash_request_body(request.body(), policy.max_request_body_size_bytes) {
            BodyHash::Hash(hash) => Some(hash),
            BodyHash::TooLarge => None,
        }
    } else {
        None
    };

    let query_pairs: Vec<(String, String)> = request.uri().query().map(url_search_params).unwrap_or_default();
    let cache_key =
        derive_exact_key(policy, request.method(), request.uri().path(), &query_pairs, request.headers(), body_hash.as_deref());

    use crate::orchestrator::GetResult;
    match orchestrator.get::<CachedResponse>(&cache_key).await {
        Ok(GetResult::Fresh(cached)) => {
            let stale = cached.is_stale(chrono::Utc::now());
            return Ok(render_hit(&cached, policy, stale, &cache_key, None));
        }
        Ok(GetResult::Stale { value, .. }) => {
            return Ok(render_hit(&value, policy, true, &cache_key, None));
        }
        Ok(GetResult::Miss) | Err(_) => {}
    }

    let response = inner.call(request).await?;
    let (parts, body) = response.into_parts();

    if is_response_cacheable(policy, parts.status, &parts.headers) && body.len() <= policy.max_response_body_size_bytes {
        let cached = build_cached_response(&parts, &body, policy);
        let opts = crate::options::EntryOptions { ttl: Some(policy.duration), ..Default::default() };
        let _ = orchestrator.set(&cache_key, &cached, Some(opts)).await;
    }

    let mut response = Response::from_parts(parts, body);
    ResponseMetadataHeaders { cache: "MISS", stale: false, similarity: None, cache_key: policy.include_cache_key_header.then(|| cache_key.clone()) }
        .apply(response.headers_mut());
    Ok(response)
}

/// Three-step probe per the near-duplicate request workflow: an exact-canonical-body hit
/// scores `1.0`; failing that, a gated similarity probe against the SimHash/LSH index;
/// failing that, a miss that runs `inner` and records both the response and the index
/// entry for future probes.
async fn call_similarity<S>(
    inner: &mut S,
    request: Request<Bytes>,
    orchestrator: &Arc<CacheOrchestrator>,
    policy: &RequestCachePolicy,
    engine: &Arc<SimilarityEngine>,
) -> Result<Response<Bytes>, S::Error>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>> + Send,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    use crate::orchestrator::GetResult;

    let content_type = request.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let body_text = String::from_utf8_lossy(request.body()).into_owned();
    let config = engine.config();

    let canonical = (body_text.len() <= config.max_canonical_length)
        .then(|| canonicalize(&content_type, &body_text, &config.ignored_json_fields))
        .flatten();

    let Some(canonical) = canonical else {
        // Malformed JSON or an oversized body: similarity mode aborts for this request.
        return inner.call(request).await;
    };

    let query_pairs: Vec<(String, String)> = request.uri().query().map(url_search_params).unwrap_or_default();
    let sim_key = derive_similarity_key(policy, request.method(), request.uri().path(), &query_pairs, request.headers(), &canonical);

    // Step 1: exact canonical-body match, score 1.0.
    match orchestrator.get::<CachedResponse>(&sim_key).await {
        Ok(GetResult::Fresh(cached)) => {
            let stale = cached.is_stale(chrono::Utc::now());
            return Ok(render_hit(&cached, policy, stale, &sim_key, Some(1.0)));
        }
        Ok(GetResult::Stale { value, .. }) => {
            return Ok(render_hit(&value, policy, true, &sim_key, Some(1.0)));
        }
        Ok(GetResult::Miss) | Err(_) => {}
    }

    let signature = engine.sign(&canonical);

    // Step 2: gated similarity probe against the LSH index.
    if similarity_permitted(config, request.headers(), request.body().len()) {
        if let Some(hit) = engine.probe(signature.bits, None, chrono::Utc::now()) {
            if hit.score >= config.min_similarity {
                match orchestrator.get::<CachedResponse>(&hit.cache_key).await {
                    Ok(GetResult::Fresh(cached)) => {
                        crate::metrics::record_similarity_hit();
                        return Ok(render_hit(&cached, policy, false, &hit.cache_key, Some(hit.score)));
                    }
                    Ok(GetResult::Stale { value, .. }) => {
                        crate::metrics::record_similarity_hit();
                        return Ok(render_hit(&value, policy, true, &hit.cache_key, Some(hit.score)));
                    }
                    Ok(GetResult::Miss) | Err(_) => {
                        // The index pointed at a response no longer in the store
                        // (evicted, or never written back) — drop the stale entry
                        // and fall through to step 3.
                        engine.evict(&hit.cache_key);
                    }
                }
            }
        }
        crate::metrics::record_similarity_miss();
    }

    // Step 3: full miss. Run `inner`, then write back both the response and the index
    // entry so future near-duplicate requests can find it.
    let response = inner.call(request).await?;
    let (parts, body) = response.into_parts();

    if is_response_cacheable(policy, parts.status, &parts.headers) && body.len() <= policy.max_response_body_size_bytes {
        let cached = build_cached_response(&parts, &body, policy);
        let opts = crate::options::EntryOptions { ttl: Some(policy.duration), ..Default::default() };
        if orchestrator.set(&sim_key, &cached, Some(opts)).await.is_ok() {
            engine.record(sim_key.clone(), signature.bits, signature.token_count, None, chrono::Utc::now());
        }
    }

    let mut response = Response::from_parts(parts, body);
    ResponseMetadataHeaders { cache: "MISS", stale: false, similarity: None, cache_key: policy.include_cache_key_header.then(|| sim_key.clone()) }
        .apply(response.headers_mut());
    Ok(response)
}

fn build_cached_response(parts: &http::response::Parts, body: &Bytes, policy: &RequestCachePolicy) -> CachedResponse {
    CachedResponse {
        status_code: parts.status.as_u16(),
        body: body.to_vec(),
        headers: strip_denylisted_headers(&parts.headers),
        content_type: parts.headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from),
        cached_at: chrono::Utc::now(),
        duration_secs: policy.duration.as_secs(),
    }
}

fn render_hit(cached: &CachedResponse, policy: &RequestCachePolicy, stale: bool, cache_key: &str, similarity: Option<f64>) -> Response<Bytes> {
    let mut builder = Response::builder().status(cached.status_code);
    for (name, values) in &cached.headers {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    let mut response = builder.body(Bytes::from(cached.body.clone())).unwrap_or_else(|_| Response::new(Bytes::new()));
    tracing::debug!(served_from_cache = true, mode = if similarity.is_some() { "similarity" } else { "exact" });
    ResponseMetadataHeaders { cache: "HIT", stale, similarity, cache_key: policy.include_cache_key_header.then(|| cache_key.to_string()) }
        .apply(response.headers_mut());
    response
}

fn url_search_params(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next().unwrap_or_default().to_string();
            let value = split.next().unwrap_or_default().to_string();
            (key, value)
        })
        .collect()
}
