//! VisAsset registry
//!
//! Caches decoded VisAssets by UUID and fetches missing ones through the
//! configured fetcher chain. All methods take `&self`, so one manager can
//! be shared between the host thread and prefetch workers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::fetch::{EmbeddedFetcher, FetchSource, MediaDirectoryFetcher, VisAssetFetcher};
use super::{VisAsset, VisAssetGradient, VisAssetType};
use crate::config::EngineConfig;
use crate::error::{VisAssetError, VisAssetResult};

/// Registry of VisAssets and VisAsset gradients
pub struct VisAssetManager {
    cache: RwLock<HashMap<Uuid, Arc<VisAsset>>>,
    gradients: RwLock<HashMap<Uuid, Arc<VisAssetGradient>>>,
    fetchers: Vec<Arc<dyn VisAssetFetcher>>,
    local: Arc<EmbeddedFetcher>,
    defaults: HashMap<VisAssetType, Arc<VisAsset>>,
}

impl VisAssetManager {
    /// A manager whose only source is state-local VisAssets
    pub fn new() -> Self {
        let local = Arc::new(EmbeddedFetcher::new());
        let defaults = [
            VisAssetType::Colormap,
            VisAssetType::Glyph,
            VisAssetType::SurfaceTexture,
            VisAssetType::LineTexture,
        ]
        .into_iter()
        .map(|t| (t, Arc::new(VisAsset::default_for(t))))
        .collect();

        Self {
            cache: RwLock::new(HashMap::new()),
            gradients: RwLock::new(HashMap::new()),
            fetchers: vec![local.clone() as Arc<dyn VisAssetFetcher>],
            local,
            defaults,
        }
    }

    /// Build the fetcher chain in the configured order
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut manager = Self::new();
        manager.fetchers.clear();
        let media = MediaDirectoryFetcher::new(config.visassets_dir());

        for source in &config.fetch_order {
            match source {
                FetchSource::Media => manager.fetchers.push(Arc::new(media.clone())),
                FetchSource::Local => manager.fetchers.push(manager.local.clone()),
                FetchSource::Http => {
                    #[cfg(feature = "http")]
                    if let Some(url) = &config.server_url {
                        let base = format!("{}/media", url.trim_end_matches('/'));
                        match super::fetch::HttpFetcher::new(base, config.http_timeout()) {
                            Ok(http) => manager.fetchers.push(Arc::new(http.with_cache(media.clone()))),
                            Err(e) => tracing::warn!("HTTP VisAsset fetcher unavailable: {}", e),
                        }
                    };
                }
            }
        }
        manager
    }

    /// Append a fetcher to the chain
    pub fn add_fetcher(&mut self, fetcher: Arc<dyn VisAssetFetcher>) {
        self.fetchers.push(fetcher);
    }

    /// Sources in the order they are consulted
    pub fn sources(&self) -> Vec<FetchSource> {
        self.fetchers.iter().map(|f| f.source()).collect()
    }

    /// State-local VisAssets
    pub fn local(&self) -> &EmbeddedFetcher {
        &self.local
    }

    /// Cached VisAsset, without fetching
    pub fn get(&self, uuid: &Uuid) -> Option<Arc<VisAsset>> {
        self.cache.read().ok()?.get(uuid).cloned()
    }

    pub fn is_cached(&self, uuid: &Uuid) -> bool {
        self.get(uuid).is_some()
    }

    /// Return a cached VisAsset or fetch it
    ///
    /// With `force_reload`, the cache is bypassed and a successful fetch
    /// replaces the cached instance. Failures are logged; a failed forced
    /// reload keeps the previous instance.
    pub fn load(&self, uuid: Uuid, force_reload: bool) -> Option<Arc<VisAsset>> {
        if !force_reload {
            if let Some(asset) = self.get(&uuid) {
                return Some(asset);
            }
        }

        match self.try_fetch(uuid) {
            Ok(asset) => {
                let asset = Arc::new(asset);
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(uuid, Arc::clone(&asset));
                }
                tracing::debug!("Loaded VisAsset {} ({})", uuid, asset.asset_type());
                Some(asset)
            }
            Err(e) => {
                tracing::warn!("Unable to load VisAsset {}: {}", uuid, e);
                self.get(&uuid)
            }
        }
    }

    /// Load a VisAsset, falling back to the default of `asset_type`
    pub fn load_or_default(&self, uuid: Uuid, asset_type: VisAssetType) -> Arc<VisAsset> {
        self.load(uuid, false)
            .filter(|a| a.asset_type() == asset_type)
            .unwrap_or_else(|| self.default_asset(asset_type))
    }

    /// Designated fallback asset for a type
    pub fn default_asset(&self, asset_type: VisAssetType) -> Arc<VisAsset> {
        self.defaults
            .get(&asset_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(VisAsset::default_for(asset_type)))
    }

    fn try_fetch(&self, uuid: Uuid) -> VisAssetResult<VisAsset> {
        for fetcher in &self.fetchers {
            match fetcher.fetch(uuid) {
                Ok(asset) => return Ok(asset),
                Err(VisAssetError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::warn!("{:?} source failed for VisAsset {}: {}", fetcher.source(), uuid, e);
                }
            }
        }
        Err(VisAssetError::NotFound(uuid))
    }

    /// Drop a VisAsset from the cache
    pub fn unload(&self, uuid: &Uuid) -> bool {
        self.cache
            .write()
            .map(|mut c| c.remove(uuid).is_some())
            .unwrap_or(false)
    }

    pub fn cached_uuids(&self) -> Vec<Uuid> {
        self.cache
            .read()
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every VisAsset the sources can enumerate
    pub fn available(&self) -> Vec<Uuid> {
        let mut all = BTreeSet::new();
        for fetcher in &self.fetchers {
            match fetcher.list() {
                Ok(uuids) => all.extend(uuids),
                Err(e) => tracing::warn!("{:?} source could not list VisAssets: {}", fetcher.source(), e),
            }
        }
        all.into_iter().collect()
    }

    /// Register a gradient, resolving its members
    ///
    /// Members that cannot be loaded are logged; the gradient is stored
    /// either way so that a later member fetch can complete it. Members of
    /// differing types reject the gradient.
    pub fn set_gradient(&self, mut gradient: VisAssetGradient) -> VisAssetResult<Arc<VisAssetGradient>> {
        let types: Vec<VisAssetType> = gradient
            .members
            .iter()
            .filter_map(|m| self.load(*m, false))
            .map(|a| a.asset_type())
            .collect();
        if !types.is_empty() {
            gradient.check_member_types(&types)?;
        }
        let gradient = Arc::new(gradient);
        if let Ok(mut gradients) = self.gradients.write() {
            gradients.insert(gradient.uuid, Arc::clone(&gradient));
        }
        Ok(gradient)
    }

    pub fn gradient(&self, uuid: &Uuid) -> Option<Arc<VisAssetGradient>> {
        self.gradients.read().ok()?.get(uuid).cloned()
    }

    pub fn remove_gradient(&self, uuid: &Uuid) -> bool {
        self.gradients
            .write()
            .map(|mut g| g.remove(uuid).is_some())
            .unwrap_or(false)
    }

    pub fn gradient_ids(&self) -> Vec<Uuid> {
        self.gradients
            .read()
            .map(|g| g.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Gradients that include a VisAsset
    pub fn gradients_containing(&self, member: &Uuid) -> Vec<Uuid> {
        self.gradients
            .read()
            .map(|g| {
                g.values()
                    .filter(|gradient| gradient.contains(member))
                    .map(|gradient| gradient.uuid)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for VisAssetManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visasset::{GradientScale, Manifest};

    const XML: &str = r#"<ColorMaps><ColorMap><Point x="0" r="0" g="0" b="1"/><Point x="1" r="1" g="0" b="0"/></ColorMap></ColorMaps>"#;

    fn add_local_colormap(manager: &VisAssetManager, uuid: Uuid, xml: &str) {
        let manifest = Manifest::from_json(
            r#"{"type": "colormap", "artifactData": {"colormap": "colormap.xml"}}"#,
        )
        .unwrap();
        manager.local().insert(
            uuid,
            manifest,
            HashMap::from([("colormap.xml".to_string(), xml.as_bytes().to_vec())]),
        );
    }

    #[test]
    fn test_load_caches() {
        let manager = VisAssetManager::new();
        let uuid = Uuid::new_v4();
        add_local_colormap(&manager, uuid, XML);

        let first = manager.load(uuid, false).unwrap();
        let second = manager.load(uuid, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let reloaded = manager.load(uuid, true).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[test]
    fn test_missing_visasset_is_none() {
        let manager = VisAssetManager::new();
        assert!(manager.load(Uuid::new_v4(), false).is_none());
        let fallback = manager.load_or_default(Uuid::new_v4(), VisAssetType::Colormap);
        assert_eq!(fallback.uuid(), Uuid::nil());
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let manager = VisAssetManager::new();
        let uuid = Uuid::new_v4();
        add_local_colormap(&manager, uuid, XML);
        let first = manager.load(uuid, false).unwrap();
        manager.local().remove(&uuid);
        let again = manager.load(uuid, true).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_config_fetch_order() {
        let mut config = EngineConfig::with_media_root("/nonexistent");
        config.fetch_order = vec![FetchSource::Local, FetchSource::Media];
        let manager = VisAssetManager::from_config(&config);
        assert_eq!(manager.sources(), vec![FetchSource::Local, FetchSource::Media]);
    }

    #[test]
    fn test_gradient_registration() {
        let manager = VisAssetManager::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        add_local_colormap(&manager, a, XML);
        add_local_colormap(&manager, b, XML);
        let gradient =
            VisAssetGradient::new(Uuid::new_v4(), vec![a, b], vec![0.5], GradientScale::Smooth)
                .unwrap();
        let id = gradient.uuid;
        let stored = manager.set_gradient(gradient).unwrap();
        assert_eq!(stored.member_type, Some(VisAssetType::Colormap));
        assert_eq!(manager.gradients_containing(&a), vec![id]);
        assert!(manager.remove_gradient(&id));
    }
}
