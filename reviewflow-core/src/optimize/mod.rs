//! Unified AI optimization cache.
//!
//! One provider call produces title, SEO and FAQ suggestions for an article.
//! The result is stored per article and served from the store on later
//! requests until the caller asks to regenerate. Every outcome is logged as an
//! [`OptimizationEvent`] for the cost monitor.
//!
//! Concurrent `generate` calls for the same article share one in-flight
//! provider call, so an article is never billed twice for the same request.
//! The call runs as its own tokio task: a caller that goes away mid-flight
//! does not lose a generation that has already been paid for.

pub mod model;
pub mod provider;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::GenerationConfig;
use crate::db::now_secs;
use crate::error::{Error, ProviderError, Result};
use crate::types::ArticleId;

use model::{
    normalize, parse_bundle, OptimizationEvent, OptimizationMetadata, OptimizationOptions,
    OptimizationRecord, OptimizationStatus, Savings,
};
use provider::{GenerationProvider, GenerationRequest, ProviderOutput};
use store::RecordStore;

type GenerationOutcome = std::result::Result<OptimizationRecord, Arc<Error>>;
type SharedGeneration = Shared<BoxFuture<'static, GenerationOutcome>>;
type InFlight = Arc<Mutex<HashMap<ArticleId, SharedGeneration>>>;

pub struct OptimizationService {
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn RecordStore>,
    settings: GenerationConfig,
    timeout: Duration,
    in_flight: InFlight,
}

impl OptimizationService {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn RecordStore>,
        settings: GenerationConfig,
    ) -> Self {
        let timeout = settings.timeout();
        Self {
            provider,
            store,
            settings,
            timeout,
            in_flight: Arc::default(),
        }
    }

    /// Overrides the per-call provider timeout from the settings.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Handle to the backing store, shared with the cost monitor.
    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Options built from the configured defaults.
    pub fn default_options(&self) -> OptimizationOptions {
        OptimizationOptions {
            title_count: self.settings.default_title_count,
            faq_target_count: self.settings.default_faq_target_count,
        }
    }

    /// Returns the stored bundle for `article_id`, generating it if needed.
    ///
    /// With `regenerate == false` an existing record is returned unchanged with
    /// `metadata.cached` set and no provider call. Otherwise the provider is
    /// called once (plus one retry on a transient failure) and the result
    /// replaces any previous record. A caller that joins another caller's
    /// in-flight generation gets its record marked `cached`.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` for out-of-range options, before any provider call.
    /// - `Error::Generation` when the provider fails, times out, or returns an
    ///   unusable payload. No record is written and a previous one stays valid.
    #[instrument(skip(self, options), fields(title_count = options.title_count, faq_target_count = options.faq_target_count))]
    pub async fn generate(
        &self,
        article_id: ArticleId,
        options: &OptimizationOptions,
        regenerate: bool,
    ) -> Result<OptimizationRecord> {
        options.validate()?;

        if !regenerate {
            if let Some(mut record) = self.store.get(article_id).await? {
                debug!(article_id, "serving cached optimization");
                record.metadata.cached = true;
                self.store
                    .append_event(&OptimizationEvent::cache_read(article_id, now_secs()))
                    .await?;
                return Ok(record);
            }
        }

        let (generation, joined) = self.join_or_start(article_id, options, regenerate);
        if joined {
            debug!(article_id, "joining in-flight generation");
        }
        let mut record = generation.await.map_err(Error::from_shared)?;
        if joined || record.metadata.cached {
            // Served without a provider call of our own.
            record.metadata.cached = true;
            self.store
                .append_event(&OptimizationEvent::cache_read(article_id, now_secs()))
                .await?;
        }
        Ok(record)
    }

    /// Returns the stored record without generating.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the article has no record.
    pub async fn get(&self, article_id: ArticleId) -> Result<OptimizationRecord> {
        self.store
            .get(article_id)
            .await?
            .ok_or_else(|| Error::not_found("optimization record", article_id))
    }

    /// Reports what has been generated; all false / zero before generation.
    pub async fn get_status(&self, article_id: ArticleId) -> Result<OptimizationStatus> {
        let record = self.store.get(article_id).await?;
        Ok(OptimizationStatus::from_record(record.as_ref()))
    }

    /// Removes the record of `article_id`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if there was nothing to delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, article_id: ArticleId) -> Result<()> {
        if self.store.remove(article_id).await? {
            info!(article_id, "optimization record deleted");
            Ok(())
        } else {
            Err(Error::not_found("optimization record", article_id))
        }
    }

    fn join_or_start(
        &self,
        article_id: ArticleId,
        options: &OptimizationOptions,
        regenerate: bool,
    ) -> (SharedGeneration, bool) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = in_flight.get(&article_id) {
            return (existing.clone(), true);
        }

        let job = GenerationJob {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            timeout: self.timeout,
            in_flight: Arc::clone(&self.in_flight),
            article_id,
            options: options.clone(),
            regenerate,
        };
        let registry = Arc::clone(&self.in_flight);
        let generation = tokio::spawn(job.run().in_current_span())
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    // The job never reached its own cleanup.
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&article_id);
                    Err(Arc::new(Error::GenerationTask {
                        article_id,
                        reason: e.to_string(),
                    }))
                })
            })
            .boxed()
            .shared();
        in_flight.insert(article_id, generation.clone());
        (generation, false)
    }
}

/// Everything one provider round-trip needs, owned so it can outlive the caller.
struct GenerationJob {
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn RecordStore>,
    settings: GenerationConfig,
    timeout: Duration,
    in_flight: InFlight,
    article_id: ArticleId,
    options: OptimizationOptions,
    regenerate: bool,
}

impl GenerationJob {
    async fn run(self) -> GenerationOutcome {
        let outcome = self.stored_or_fresh().await;
        // Deregister only after the record is stored, so a later caller either
        // joins this job or finds the record.
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.article_id);
        outcome.map_err(Arc::new)
    }

    /// Without `regenerate`, a record stored after the caller's own lookup
    /// (by a job that has since finished) is served instead of billing again.
    async fn stored_or_fresh(&self) -> Result<OptimizationRecord> {
        if !self.regenerate {
            if let Some(mut record) = self.store.get(self.article_id).await? {
                debug!(article_id = self.article_id, "record appeared before generation started");
                record.metadata.cached = true;
                return Ok(record);
            }
        }
        self.generate_fresh().await
    }

    async fn generate_fresh(&self) -> Result<OptimizationRecord> {
        let article_id = self.article_id;
        let request = GenerationRequest {
            article_id,
            title_count: self.options.title_count,
            faq_target_count: self.options.faq_target_count,
        };

        let started = Instant::now();
        let output = self
            .call_provider(&request)
            .await
            .map_err(|source| Error::Generation { article_id, source })?;
        let payload = parse_bundle(&output.content)
            .and_then(|raw| normalize(raw, &self.options))
            .map_err(|source| Error::Generation { article_id, source })?;

        let cost_usd = output.cost_usd.unwrap_or_else(|| {
            self.settings
                .pricing
                .estimate_cost(output.input_tokens, output.output_tokens)
        });
        let metadata = OptimizationMetadata {
            cost_usd,
            total_tokens: output.input_tokens.saturating_add(output.output_tokens),
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cached: false,
            generated_at: now_secs(),
            savings: Savings::estimate(cost_usd, output.input_tokens, output.output_tokens),
        };
        let record = OptimizationRecord::new(article_id, payload, metadata);

        self.store.put(&record).await?;
        self.store
            .append_event(&OptimizationEvent::generation(&record))
            .await?;

        info!(
            article_id,
            cost_usd,
            duration_ms = record.metadata.duration_ms,
            titles = record.title_suggestions.len(),
            faqs = record.faqs.len(),
            "optimization generated"
        );
        Ok(record)
    }

    async fn call_provider(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<ProviderOutput, ProviderError> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.provider.generate(request)).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) if e.is_transient() && attempt < self.settings.transient_retries => {
                    attempt += 1;
                    warn!(
                        article_id = request.article_id,
                        attempt,
                        error = %e,
                        "retrying generation after transient failure"
                    );
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(article_id = request.article_id, timeout = ?self.timeout, "generation timed out");
                    return Err(ProviderError::Timeout(self.timeout));
                }
            }
        }
    }
}
