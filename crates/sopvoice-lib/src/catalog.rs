//! Voice catalog resolver: binds each preset to a local voice.
//!
//! The local engine may still be loading its catalog when the first request
//! arrives. Resolution waits a bounded time for the loaded notification and
//! then goes ahead with whatever exists; an empty catalog just means every
//! preset resolves to `None` and speech goes remote. Bindings computed before
//! the catalog finished loading are provisional and are recomputed on the
//! first lookup after it lands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sopvoice_core::presets::{VoicePreset, resolve_all};
use sopvoice_core::types::{LocalVoice, ResolvedVoice};

use crate::device::SpeechCatalog;

pub struct VoiceCatalogResolver {
    catalog: Arc<dyn SpeechCatalog>,
    presets: Vec<VoicePreset>,
    timeout: Duration,
    cache: Mutex<Option<Bindings>>,
}

struct Bindings {
    resolved: Arc<Vec<ResolvedVoice>>,
    /// Computed from the final catalog rather than a timed-out wait.
    complete: bool,
}

impl VoiceCatalogResolver {
    pub fn new(catalog: Arc<dyn SpeechCatalog>, presets: Vec<VoicePreset>, timeout: Duration) -> Self {
        Self {
            catalog,
            presets,
            timeout,
            cache: Mutex::new(None),
        }
    }

    pub fn presets(&self) -> &[VoicePreset] {
        &self.presets
    }

    /// Voices the local engine currently offers.
    pub fn local_voice_count(&self) -> usize {
        self.catalog.voices().len()
    }

    /// Resolve `presets` against the catalog without touching the cache.
    pub async fn resolve(&self, presets: &[VoicePreset]) -> Vec<ResolvedVoice> {
        let (voices, _) = self.load_voices().await;
        resolve_all(presets, &voices)
    }

    /// Bindings for the configured presets, computed on first use and again
    /// once a late catalog arrives.
    pub async fn resolved(&self) -> Arc<Vec<ResolvedVoice>> {
        let mut cache = self.cache.lock().await;
        if let Some(bindings) = cache.as_ref() {
            if bindings.complete || !self.catalog.is_loaded() {
                return bindings.resolved.clone();
            }
            debug!("catalog: local voices arrived late, resolving again");
        }
        let (voices, complete) = self.load_voices().await;
        let resolved = Arc::new(resolve_all(&self.presets, &voices));
        info!(
            presets = resolved.len(),
            bound = resolved.iter().filter(|r| r.voice.is_some()).count(),
            complete,
            "catalog: presets resolved"
        );
        *cache = Some(Bindings {
            resolved: resolved.clone(),
            complete,
        });
        resolved
    }

    /// Drop cached bindings; the next lookup resolves again.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
        debug!("catalog: cache invalidated");
    }

    pub async fn voice_for(&self, preset_id: &str) -> Option<LocalVoice> {
        self.resolved()
            .await
            .iter()
            .find(|r| r.preset_id == preset_id)
            .and_then(|r| r.voice.clone())
    }

    /// Current voices, plus whether they are the final catalog.
    async fn load_voices(&self) -> (Vec<LocalVoice>, bool) {
        if !self.catalog.is_loaded()
            && tokio::time::timeout(self.timeout, self.catalog.voices_loaded())
                .await
                .is_err()
        {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "catalog: local voices not loaded in time, using remote synthesis only"
            );
        }
        // Loaded state first: once set, `voices()` can no longer change.
        let loaded = self.catalog.is_loaded();
        let voices = self.catalog.voices();
        if loaded && voices.is_empty() {
            warn!("catalog: no local voices available");
        }
        (voices, loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCatalog, voice};
    use sopvoice_core::presets::default_presets;

    fn espeak_voices() -> Vec<LocalVoice> {
        vec![
            voice("af", "Afrikaans", "af"),
            voice("en-gb", "English", "en-gb"),
            voice("en-us", "English (America)", "en-us"),
            voice("en-gb-x-rp", "English (Received Pronunciation)", "en-gb-x-rp"),
        ]
    }

    fn resolver(catalog: Arc<FakeCatalog>, timeout_ms: u64) -> VoiceCatalogResolver {
        VoiceCatalogResolver::new(catalog, default_presets(), Duration::from_millis(timeout_ms))
    }

    fn bound<'a>(resolved: &'a [ResolvedVoice], preset: &str) -> Option<&'a str> {
        resolved
            .iter()
            .find(|r| r.preset_id == preset)
            .and_then(|r| r.voice.as_ref())
            .map(|v| v.id.as_str())
    }

    #[tokio::test]
    async fn loaded_catalog_binds_presets() {
        let r = resolver(FakeCatalog::loaded(espeak_voices()), 1800);
        let resolved = r.resolved().await;
        assert_eq!(resolved.len(), 6);
        assert_eq!(bound(&resolved, "nova"), Some("en-us"));
        assert_eq!(bound(&resolved, "alloy"), Some("en-gb"));
        assert_eq!(bound(&resolved, "echo"), Some("en-gb-x-rp"));
    }

    #[tokio::test]
    async fn resolution_is_idempotent_and_cached() {
        let r = resolver(FakeCatalog::loaded(espeak_voices()), 1800);
        let first = r.resolved().await;
        let second = r.resolved().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(r.resolve(r.presets()).await, *first);
    }

    #[tokio::test]
    async fn waits_for_late_catalog() {
        let catalog = FakeCatalog::pending();
        let r = resolver(catalog.clone(), 2000);
        let loader = {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                catalog.load(espeak_voices());
            })
        };
        assert_eq!(r.voice_for("nova").await.map(|v| v.id), Some("en-us".into()));
        loader.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_resolves_everything_to_none() {
        let r = resolver(FakeCatalog::pending(), 30);
        let resolved = r.resolved().await;
        assert_eq!(resolved.len(), 6);
        assert!(resolved.iter().all(|v| v.voice.is_none()));
        assert_eq!(r.local_voice_count(), 0);
    }

    #[tokio::test]
    async fn catalog_loaded_after_timeout_is_picked_up() {
        let catalog = FakeCatalog::pending();
        let r = resolver(catalog.clone(), 10);
        assert!(r.voice_for("alloy").await.is_none());

        // Still loading: the provisional bindings are served without waiting again.
        let started = std::time::Instant::now();
        assert!(r.voice_for("alloy").await.is_none());
        assert!(started.elapsed() < Duration::from_millis(10));

        catalog.load(espeak_voices());
        assert_eq!(r.voice_for("alloy").await.map(|v| v.id), Some("en-gb".into()));
        let first = r.resolved().await;
        assert!(Arc::ptr_eq(&first, &r.resolved().await));
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_resolution() {
        let r = resolver(FakeCatalog::loaded(espeak_voices()), 100);
        let first = r.resolved().await;
        r.invalidate().await;
        let second = r.resolved().await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn non_english_only_catalog_uses_first_voice() {
        let r = resolver(FakeCatalog::loaded(vec![voice("de", "German", "de")]), 100);
        assert_eq!(r.voice_for("shimmer").await.map(|v| v.id), Some("de".into()));
    }

    #[tokio::test]
    async fn unknown_preset_has_no_voice() {
        let r = resolver(FakeCatalog::loaded(espeak_voices()), 100);
        assert!(r.voice_for("nope").await.is_none());
    }
}
