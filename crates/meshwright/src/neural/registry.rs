//! Provider lookup, lazy construction and selection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use meshconf::{MeshConfig, ProviderEndpoint, ProvidersConfig};

use super::base::HttpBase;
use super::hunyuan::{self, HunyuanClient, HunyuanKind};
use super::meshy::{self, MeshyClient};
use super::partfield::PartfieldClient;
use super::trellis::{self, TrellisClient};
use super::tripo::{self, TripoClient};
use super::{all_meta, meta, GenerationRequest, GenerationResult, NeuralProvider, ProviderError, ProviderMeta};
use crate::stage::StageId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Segmentation is one synchronous call bounded by this deadline.
const PARTFIELD_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub slug: &'static str,
    pub configured: bool,
    pub healthy: bool,
}

/// Knows every provider's metadata; builds clients on first use.
pub struct ProviderRegistry {
    endpoints: ProvidersConfig,
    output_dir: PathBuf,
    http: reqwest::Client,
    cache: Mutex<HashMap<&'static str, Arc<dyn NeuralProvider>>>,
}

impl ProviderRegistry {
    pub fn new(endpoints: ProvidersConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoints,
            output_dir: output_dir.into(),
            http: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &MeshConfig) -> Self {
        Self::new(
            config.bootstrap.providers.clone(),
            config.infra.paths.output_dir.clone(),
        )
    }

    /// Install a ready-made client under its slug, bypassing the factory.
    pub fn with_provider(self, provider: Arc<dyn NeuralProvider>) -> Self {
        let slug = provider.slug();
        self.lock_cache().insert(slug, provider);
        self
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<&'static str, Arc<dyn NeuralProvider>>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn endpoint(&self, slug: &str) -> Option<&ProviderEndpoint> {
        self.endpoints.get(slug).filter(|e| !e.url.trim().is_empty())
    }

    /// Endpoint present, plus a key where the service needs one.
    pub fn is_configured(&self, meta: &ProviderMeta) -> bool {
        if self.lock_cache().contains_key(meta.slug) {
            return true;
        }
        match self.endpoint(meta.slug) {
            Some(endpoint) => {
                !meta.requires_api_key
                    || endpoint.api_key.as_deref().is_some_and(|k| !k.is_empty())
            }
            None => false,
        }
    }

    /// Client for `slug`, constructed on first request.
    pub fn provider(&self, slug: &str) -> Result<Arc<dyn NeuralProvider>, ProviderError> {
        let meta = meta(slug).ok_or_else(|| ProviderError::UnknownProvider(slug.to_string()))?;
        if let Some(existing) = self.lock_cache().get(meta.slug) {
            return Ok(existing.clone());
        }
        if !self.is_configured(meta) {
            return Err(ProviderError::NotConfigured(slug.to_string()));
        }

        let built = self.build(meta)?;
        debug!(provider = meta.slug, "provider client constructed");
        Ok(self.lock_cache().entry(meta.slug).or_insert(built).clone())
    }

    fn build(&self, meta: &'static ProviderMeta) -> Result<Arc<dyn NeuralProvider>, ProviderError> {
        let endpoint = self
            .endpoint(meta.slug)
            .ok_or_else(|| ProviderError::NotConfigured(meta.slug.to_string()))?;
        let base = |interval: Duration, deadline: Duration| {
            HttpBase::new(
                meta.slug,
                self.http.clone(),
                endpoint,
                self.output_dir.clone(),
                interval,
                deadline,
            )
        };

        let provider: Arc<dyn NeuralProvider> = match meta.slug {
            "hunyuan-shape" => Arc::new(HunyuanClient::new(
                base(hunyuan::DEFAULT_POLL_INTERVAL, hunyuan::DEFAULT_DEADLINE),
                HunyuanKind::Shape,
            )),
            "hunyuan-paint" => Arc::new(HunyuanClient::new(
                base(hunyuan::DEFAULT_POLL_INTERVAL, hunyuan::DEFAULT_DEADLINE),
                HunyuanKind::Paint,
            )),
            "trellis" => Arc::new(TrellisClient::new(base(
                trellis::DEFAULT_POLL_INTERVAL,
                trellis::DEFAULT_DEADLINE,
            ))),
            "partfield" => Arc::new(PartfieldClient::new(base(
                Duration::from_secs(1),
                PARTFIELD_DEADLINE,
            ))),
            "tripo" => Arc::new(TripoClient::new(base(
                tripo::DEFAULT_POLL_INTERVAL,
                tripo::DEFAULT_DEADLINE,
            ))),
            "meshy" => Arc::new(MeshyClient::new(base(
                meshy::DEFAULT_POLL_INTERVAL,
                meshy::DEFAULT_DEADLINE,
            ))),
            other => return Err(ProviderError::UnknownProvider(other.to_string())),
        };
        Ok(provider)
    }

    /// An explicit preference wins when it serves `stage`; otherwise the
    /// configured candidates rank self-hosted first, then by ascending VRAM.
    pub fn select_best_provider(
        &self,
        stage: StageId,
        preferred: Option<&str>,
    ) -> Option<&'static ProviderMeta> {
        if let Some(slug) = preferred {
            match meta(slug) {
                Some(m) if m.supports_stage(stage) => return Some(m),
                _ => debug!(preferred = slug, %stage, "preferred provider ignored"),
            }
        }

        let mut candidates: Vec<&'static ProviderMeta> = all_meta()
            .iter()
            .filter(|m| m.supports_stage(stage) && self.is_configured(m))
            .collect();
        candidates.sort_by_key(|m| (!m.self_hosted, m.vram_gb.unwrap_or(0)));
        candidates.into_iter().next()
    }

    /// Resolve a provider for `stage` (honouring `request.provider`) and run it.
    #[tracing::instrument(skip(self, request, cancel), fields(provider))]
    pub async fn generate(
        &self,
        stage: StageId,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ProviderError> {
        let meta = self
            .select_best_provider(stage, request.provider.as_deref())
            .ok_or(ProviderError::NoProvider(stage))?;
        tracing::Span::current().record("provider", meta.slug);

        let mode = request.effective_mode();
        if !meta.supports_mode(mode) {
            return Err(ProviderError::UnsupportedMode {
                provider: meta.slug.to_string(),
                mode,
            });
        }

        let provider = self.provider(meta.slug)?;
        info!(provider = meta.slug, %stage, ?mode, "dispatching generation");
        provider.generate(request, cancel).await
    }

    /// Configuration and liveness of every known provider.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(all_meta().len());
        for m in all_meta() {
            let configured = self.is_configured(m);
            let healthy = match self.provider(m.slug) {
                Ok(provider) if configured => provider.health_check().await,
                _ => false,
            };
            report.push(ProviderHealth {
                slug: m.slug,
                configured,
                healthy,
            });
        }
        report
    }
}
