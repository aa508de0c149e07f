//! Engine context
//!
//! `Engine` owns every registry (data, VisAssets, impressions, scene) plus
//! the rendered-object mapping and the render host. Components receive
//! what they need from it by reference; there is no global instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use abr_io::{FileDataLoader, RawDataset};
use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::data_manager::{DataManager, SharedLoader};
use crate::dataset::DataRange;
use crate::error::{AbrResult, DataError, InputError, StateError};
use crate::impression::{DataImpression, DirtyFlags};
use crate::indexer;
use crate::input::AbrInput;
use crate::primitive::PrimitiveGradient;
use crate::render::{RenderContext, RenderHost, RenderReport, Renderer};
use crate::scene::Scene;
use crate::state::{apply_state, ApplyContext, ApplyOutcome, StateDocument, StateLoader};
use crate::visasset::{FetchSource, VisAssetManager};

/// Clears the update flag when an application ends, however it ends
struct UpdateGuard<'a>(&'a AtomicBool);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    config: EngineConfig,
    data: DataManager,
    visassets: Arc<VisAssetManager>,
    impressions: BTreeMap<Uuid, DataImpression>,
    primitive_gradients: HashMap<Uuid, PrimitiveGradient>,
    scene: Scene,
    renderer: Renderer,
    host: Box<dyn RenderHost>,
    state_loader: Option<Box<dyn StateLoader>>,
    previous: Option<Value>,
    update_in_progress: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine whose data and VisAsset sources follow `config`
    pub fn new(config: EngineConfig, host: Box<dyn RenderHost>) -> Self {
        let mut data = DataManager::new(config.container_bounds);
        for source in &config.fetch_order {
            match source {
                FetchSource::Media => data.add_loader(Arc::new(FileDataLoader::new(&config.media_root))),
                FetchSource::Http => {
                    #[cfg(feature = "http")]
                    if let Some(url) = &config.server_url {
                        let base = format!("{}/media", url.trim_end_matches('/'));
                        match abr_io::HttpDataLoader::new(base, config.http_timeout()) {
                            Ok(loader) => data.add_loader(Arc::new(loader)),
                            Err(e) => tracing::warn!("HTTP data loader unavailable: {}", e),
                        }
                    };
                }
                FetchSource::Local => {}
            }
        }
        let visassets = Arc::new(VisAssetManager::from_config(&config));
        let mut engine = Self::with_parts(config, data, visassets, host);
        engine.state_loader = engine.default_state_loader();
        engine
    }

    /// Build an engine from ready-made registries
    pub fn with_parts(
        config: EngineConfig,
        data: DataManager,
        visassets: Arc<VisAssetManager>,
        host: Box<dyn RenderHost>,
    ) -> Self {
        let scene = Scene::new(config.container_bounds);
        Self {
            config,
            data,
            visassets,
            impressions: BTreeMap::new(),
            primitive_gradients: HashMap::new(),
            scene,
            renderer: Renderer::new(),
            host,
            state_loader: None,
            previous: None,
            update_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    fn default_state_loader(&self) -> Option<Box<dyn StateLoader>> {
        let states_dir = self.config.media_root.join("states");
        #[cfg(feature = "http")]
        if let Some(url) = &self.config.server_url {
            match crate::state::HttpStateLoader::new(url.clone(), self.config.http_timeout()) {
                Ok(http) => {
                    let loader: Box<dyn StateLoader> = if self.config.keep_state_copy {
                        Box::new(crate::state::CachingStateLoader::new(
                            Box::new(http),
                            self.config.media_root.join("state-cache"),
                        ))
                    } else {
                        Box::new(http)
                    };
                    return Some(loader);
                }
                Err(e) => tracing::warn!("HTTP state loader unavailable: {}", e),
            }
        }
        Some(Box::new(crate::state::FileStateLoader::new(states_dir)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn data(&self) -> &DataManager {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataManager {
        &mut self.data
    }

    pub fn add_data_loader(&mut self, loader: SharedLoader) {
        self.data.add_loader(loader);
    }

    pub fn visassets(&self) -> &Arc<VisAssetManager> {
        &self.visassets
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn set_state_loader(&mut self, loader: Box<dyn StateLoader>) {
        self.state_loader = Some(loader);
    }

    /// Shared flag that is set while a state is being applied
    pub fn update_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.update_in_progress)
    }

    pub fn is_updating(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    /// Last successfully applied state
    pub fn current_state(&self) -> Option<&Value> {
        self.previous.as_ref()
    }

    pub fn primitive_gradient(&self, uuid: &Uuid) -> Option<&PrimitiveGradient> {
        self.primitive_gradients.get(uuid)
    }

    // State

    /// Fetch a state through the configured loader and apply it
    pub fn load_state(&mut self, locator: &str) -> AbrResult<ApplyOutcome> {
        let loader = self
            .state_loader
            .as_ref()
            .ok_or_else(|| StateError::load(locator, "no state loader configured"))?;
        let text = loader.get_state(locator)?;
        self.apply_state(&text)
    }

    /// Parse, validate and apply state text
    ///
    /// A state that fails to parse or validate changes nothing and the
    /// previous state stays current. Dirty flags are set but nothing is
    /// rendered; see [`Engine::apply_state_and_render`].
    pub fn apply_state(&mut self, text: &str) -> AbrResult<ApplyOutcome> {
        let state = match StateDocument::parse(text, &self.config.schema_version) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Rejected state: {}", e);
                return Err(e.into());
            }
        };

        if self.update_in_progress.swap(true, Ordering::SeqCst) {
            return Err(StateError::UpdateInProgress.into());
        }
        let _guard = UpdateGuard(&self.update_in_progress);

        let outcome = apply_state(
            ApplyContext {
                impressions: &mut self.impressions,
                renderer: &mut self.renderer,
                host: self.host.as_mut(),
                data: &mut self.data,
                visassets: &self.visassets,
                primitive_gradients: &mut self.primitive_gradients,
                scene: &mut self.scene,
            },
            self.previous.as_ref(),
            &state,
        );
        self.previous = Some(state.json);
        Ok(outcome)
    }

    /// Apply a state, then run a render pass
    pub fn apply_state_and_render(&mut self, text: &str) -> AbrResult<(ApplyOutcome, RenderReport)> {
        let outcome = self.apply_state(text)?;
        let report = self.render();
        Ok((outcome, report))
    }

    /// Store the current state through the configured loader
    pub fn save_state(&self, name: &str) -> AbrResult<()> {
        let state = self
            .previous
            .as_ref()
            .ok_or_else(|| StateError::load(name, "no state has been applied"))?;
        let loader = self
            .state_loader
            .as_ref()
            .ok_or_else(|| StateError::load(name, "no state loader configured"))?;
        let json = serde_json::to_string_pretty(state).map_err(|e| StateError::load(name, e))?;
        loader.save_state(name, &json)?;
        Ok(())
    }

    // Rendering

    /// Run the four render sweeps over every impression
    pub fn render(&mut self) -> RenderReport {
        self.renderer.render(RenderContext {
            impressions: &mut self.impressions,
            data: &mut self.data,
            visassets: &self.visassets,
            scene: &self.scene,
            host: self.host.as_mut(),
        })
    }

    // Impressions

    pub fn impressions(&self) -> impl Iterator<Item = &DataImpression> {
        self.impressions.values()
    }

    pub fn impression(&self, uuid: &Uuid) -> Option<&DataImpression> {
        self.impressions.get(uuid)
    }

    pub fn impression_count(&self) -> usize {
        self.impressions.len()
    }

    /// Add (or replace) an impression outside of state application
    pub fn register_impression(&mut self, impression: DataImpression) {
        let uuid = impression.uuid();
        if self.impressions.insert(uuid, impression).is_some() {
            self.renderer.destroy(&uuid, self.host.as_mut());
        }
        self.scene.add_to_group(uuid, None);
    }

    /// Remove an impression and destroy its rendered object
    pub fn unregister_impression(&mut self, uuid: &Uuid) -> Option<DataImpression> {
        let removed = self.impressions.remove(uuid);
        self.renderer.destroy(uuid, self.host.as_mut());
        self.scene.remove_impression(uuid);
        removed
    }

    /// Remove every impression
    pub fn clear(&mut self) {
        self.renderer.destroy_all(self.host.as_mut());
        self.impressions.clear();
        self.scene.clear();
    }

    /// Assign an input directly, flagging the slot's update level
    pub fn set_input(&mut self, impression: &Uuid, name: &str, value: Option<AbrInput>) -> AbrResult<()> {
        let imp = self
            .impressions
            .get_mut(impression)
            .ok_or_else(|| InputError::UnknownInput {
                plate: impression.to_string(),
                input: name.to_string(),
            })?;
        let level = indexer::slot(imp.kind(), name)
            .map(|s| s.update_level)
            .ok_or_else(|| InputError::UnknownInput {
                plate: imp.kind().to_string(),
                input: name.to_string(),
            })?;
        indexer::assign_input(imp, name, value)?;
        imp.mark(level.dirty_flag());
        Ok(())
    }

    pub fn set_visible(&mut self, impression: &Uuid, visible: bool) -> bool {
        match self.impressions.get_mut(impression) {
            Some(imp) if imp.hints.visible != visible => {
                imp.hints.visible = visible;
                imp.mark(DirtyFlags::VISIBILITY_CHANGED);
                true
            }
            _ => false,
        }
    }

    // Data

    /// Import a raw dataset and flag impressions that draw it
    pub fn import_raw_dataset(&mut self, key_data_path: &str, raw: Arc<RawDataset>) -> AbrResult<()> {
        self.data.import_raw_dataset(key_data_path, raw)?;
        for imp in self.impressions.values_mut() {
            if imp.key_data().map_or(false, |kd| kd.path() == key_data_path) {
                imp.mark(DirtyFlags::DATA_CHANGED);
            }
        }
        Ok(())
    }

    /// Override a variable's range and restyle impressions using it
    pub fn set_variable_range(&mut self, variable_path: &str, range: DataRange) -> AbrResult<()> {
        let variable = self
            .data
            .scalar_variable_mut(variable_path)
            .ok_or_else(|| DataError::VariableNotFound(variable_path.to_string()))?;
        variable.set_range(range);
        for imp in self.impressions.values_mut() {
            if imp.scalar_variables().any(|p| p == variable_path) {
                imp.mark(DirtyFlags::STYLE_CHANGED);
            }
        }
        Ok(())
    }
}
