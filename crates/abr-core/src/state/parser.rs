//! State application
//!
//! Takes a validated state and the previously applied state JSON, and
//! brings the impression registry in line with the new state while doing
//! as little work as possible:
//!
//! 1. diff the two documents
//! 2. clear everything when the new state replaces, rather than edits, the
//!    previous one
//! 3. drop removed impressions and their rendered objects
//! 4. refresh local VisAssets and gradients, force-reloading edited ones
//! 5. rebuild only the impressions the diff touches (or whose referenced
//!    VisAssets, gradients or ranges changed), flagging each input change
//!    at its slot's update level
//! 6. apply data-range overrides, then the scene
//!
//! Steps 2 to 5 must stay in this order: clearing and removal free
//! rendered-object slots before new ones are created, and VisAssets must be
//! fresh before inputs resolve against them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use uuid::Uuid;

use super::diff::StateDiff;
use super::document::{ImpressionState, StateDocument, ValidatedState};
use crate::data_manager::DataManager;
use crate::error::AbrResult;
use crate::impression::{DataImpression, DirtyFlags, ImpressionKind};
use crate::indexer::{self, assign_input};
use crate::input::{AbrInput, InputGenre, RawAbrInput, ResolveContext};
use crate::primitive::PrimitiveGradient;
use crate::render::{RenderHost, Renderer};
use crate::scene::Scene;
use crate::visasset::{Manifest, VisAssetGradient, VisAssetManager};

const IMPRESSIONS: &str = "impressions";

/// Engine state a state application mutates
pub struct ApplyContext<'a> {
    pub impressions: &'a mut BTreeMap<Uuid, DataImpression>,
    pub renderer: &'a mut Renderer,
    pub host: &'a mut dyn RenderHost,
    pub data: &'a mut DataManager,
    pub visassets: &'a VisAssetManager,
    pub primitive_gradients: &'a mut HashMap<Uuid, PrimitiveGradient>,
    pub scene: &'a mut Scene,
}

/// What one state application did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Every impression was dropped before processing
    pub cleared: bool,
    pub removed: Vec<Uuid>,
    pub processed: Vec<Uuid>,
    /// Impressions the diff did not touch
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
    /// Flags raised by this application, per processed impression
    pub changes: BTreeMap<Uuid, DirtyFlags>,
    /// VisAssets and gradients that were reloaded or re-resolved
    pub refreshed_visassets: BTreeSet<Uuid>,
}

impl ApplyOutcome {
    pub fn flags(&self, impression: &Uuid) -> DirtyFlags {
        self.changes.get(impression).copied().unwrap_or_default()
    }
}

/// Things other than an impression's own entry whose change restyles it
struct ChangedReferences {
    visassets: BTreeSet<Uuid>,
    primitive_gradients: BTreeSet<Uuid>,
    ranges: BTreeSet<String>,
}

impl ChangedReferences {
    fn affects(&self, raw: &RawAbrInput) -> bool {
        match raw.input_genre {
            InputGenre::VisAsset => raw.uuid().map_or(false, |u| self.visassets.contains(&u)),
            InputGenre::PrimitiveGradient => raw.uuid().map_or(false, |u| self.primitive_gradients.contains(&u)),
            InputGenre::Variable => self.ranges.contains(raw.input_value.trim()),
            InputGenre::KeyData | InputGenre::Primitive => false,
        }
    }

    fn affects_impression(&self, state: &ImpressionState) -> bool {
        state.input_values.values().any(|raw| self.affects(raw))
    }
}

/// Apply a validated state on top of `previous`
pub fn apply_state(ctx: ApplyContext<'_>, previous: Option<&Value>, new: &ValidatedState) -> ApplyOutcome {
    let ApplyContext {
        impressions,
        renderer,
        host,
        data,
        visassets,
        primitive_gradients,
        scene,
    } = ctx;
    let mut outcome = ApplyOutcome::default();
    let empty = Value::Object(Default::default());
    let previous = previous.unwrap_or(&empty);
    let doc = &new.document;

    let diff = StateDiff::compute(previous, &new.json);
    tracing::debug!("State diff has {} edits", diff.len());

    // Full clear: the previous state had no impressions, or all of them go
    let previous_keys = uuid_keys(previous.get(IMPRESSIONS).and_then(Value::as_object).map(|m| m.keys()));
    let removed = uuid_keys(Some(diff.removed_keys(&[IMPRESSIONS]).iter()));
    if previous_keys.is_empty() || previous_keys.iter().all(|k| removed.contains(k)) {
        if !impressions.is_empty() {
            tracing::info!("Clearing {} impressions", impressions.len());
        }
        outcome.removed.extend(impressions.keys().copied());
        renderer.destroy_all(host);
        impressions.clear();
        scene.clear();
        outcome.cleared = true;
    } else {
        for uuid in &removed {
            if impressions.remove(uuid).is_some() {
                tracing::info!("Removed impression {}", uuid);
                outcome.removed.push(*uuid);
            }
            renderer.destroy(uuid, host);
            scene.remove_impression(uuid);
        }
    }

    let changed = ChangedReferences {
        visassets: refresh_visassets(doc, &diff, visassets),
        primitive_gradients: refresh_primitive_gradients(doc, &diff, primitive_gradients),
        ranges: diff
            .touched_keys(&["dataRanges", "scalarRanges"])
            .into_iter()
            .chain(diff.touched_keys(&["dataRanges", "specificScalarRanges"]))
            .collect(),
    };
    outcome.refreshed_visassets = changed.visassets.clone();

    // Visibility flips only count for the application that made them
    for impression in impressions.values_mut() {
        impression.hints.flags.remove(DirtyFlags::VISIBILITY_CHANGED);
    }

    let touched = uuid_keys(Some(diff.touched_keys(&[IMPRESSIONS]).iter()));
    for (uuid, state) in &doc.impressions {
        let untouched = !touched.contains(uuid) && !changed.affects_impression(state);
        if untouched && impressions.contains_key(uuid) {
            outcome.skipped.push(*uuid);
            continue;
        }

        let previous_state = previous_impression(previous, uuid);
        let result = apply_impression(
            *uuid,
            state,
            previous_state,
            &changed,
            impressions,
            renderer,
            host,
            data,
            visassets,
            primitive_gradients,
        );
        match result {
            Ok(flags) => {
                outcome.changes.insert(*uuid, flags);
                outcome.processed.push(*uuid);
            }
            Err(e) => {
                tracing::error!("Impression {} skipped: {}", uuid, e);
                outcome.failed.push((*uuid, e.to_string()));
            }
        }
    }

    let restyled = apply_data_ranges(doc, &diff, data);
    if !restyled.is_empty() {
        for (uuid, impression) in impressions.iter_mut() {
            if impression.inputs.values().any(|input| uses_variable(input, &restyled)) {
                impression.mark(DirtyFlags::STYLE_CHANGED);
                *outcome.changes.entry(*uuid).or_default() |= DirtyFlags::STYLE_CHANGED;
            }
        }
    }

    scene.reconcile_lights(&doc.scene.lighting);
    scene.set_background(doc.scene.background_color.as_deref());
    let registered: Vec<Uuid> = impressions.keys().copied().collect();
    scene.reconcile_groups(&doc.scene, registered.iter());

    tracing::info!(
        "Applied state: {} processed, {} skipped, {} removed, {} failed",
        outcome.processed.len(),
        outcome.skipped.len(),
        outcome.removed.len(),
        outcome.failed.len()
    );
    outcome
}

fn uuid_keys<'a>(keys: Option<impl Iterator<Item = &'a String>>) -> BTreeSet<Uuid> {
    keys.into_iter()
        .flatten()
        .filter_map(|k| match Uuid::parse_str(k) {
            Ok(uuid) => Some(uuid),
            Err(_) => {
                tracing::warn!("Ignoring non-UUID key {}", k);
                None
            }
        })
        .collect()
}

fn previous_impression<'a>(previous: &'a Value, uuid: &Uuid) -> Option<&'a Value> {
    previous
        .get(IMPRESSIONS)?
        .as_object()?
        .iter()
        .find(|(k, _)| Uuid::parse_str(k).map_or(false, |u| u == *uuid))
        .map(|(_, v)| v)
}

/// Register local VisAssets and gradients; returns what changed
fn refresh_visassets(doc: &StateDocument, diff: &StateDiff, visassets: &VisAssetManager) -> BTreeSet<Uuid> {
    let mut changed = BTreeSet::new();

    for uuid in uuid_keys(Some(diff.touched_keys(&["localVisAssets"]).iter())) {
        match doc.local_vis_assets.get(&uuid) {
            Some(local) => match Manifest::from_value(local.artifact_json.clone()) {
                Ok(manifest) => {
                    let files = local
                        .artifact_data_contents
                        .iter()
                        .map(|(name, contents)| (name.clone(), contents.as_bytes().to_vec()))
                        .collect();
                    visassets.local().insert(uuid, manifest, files);
                    if visassets.load(uuid, true).is_some() {
                        tracing::debug!("Reloaded local VisAsset {}", uuid);
                    }
                }
                Err(e) => tracing::warn!("Local VisAsset {} has an invalid manifest: {}", uuid, e),
            },
            None => {
                visassets.local().remove(&uuid);
                visassets.unload(&uuid);
            }
        }
        changed.insert(uuid);
    }

    let mut gradients = uuid_keys(Some(diff.touched_keys(&["visAssetGradients"]).iter()));
    for member in &changed {
        gradients.extend(visassets.gradients_containing(member));
    }
    for uuid in doc.vis_asset_gradients.keys() {
        if visassets.gradient(uuid).is_none() && !gradients.contains(uuid) {
            register_gradient(doc, *uuid, visassets);
        }
    }
    for uuid in gradients {
        register_gradient(doc, uuid, visassets);
        changed.insert(uuid);
    }
    changed
}

fn register_gradient(doc: &StateDocument, uuid: Uuid, visassets: &VisAssetManager) {
    let Some(state) = doc.vis_asset_gradients.get(&uuid) else {
        visassets.remove_gradient(&uuid);
        return;
    };
    let result = VisAssetGradient::new(uuid, state.vis_assets.clone(), state.points.clone(), state.gradient_scale)
        .and_then(|g| visassets.set_gradient(g));
    if let Err(e) = result {
        tracing::warn!("VisAsset gradient {} rejected: {}", uuid, e);
        visassets.remove_gradient(&uuid);
    }
}

/// Rebuild the primitive gradient table; returns the changed ones
fn refresh_primitive_gradients(
    doc: &StateDocument,
    diff: &StateDiff,
    table: &mut HashMap<Uuid, PrimitiveGradient>,
) -> BTreeSet<Uuid> {
    table.clear();
    for (uuid, state) in &doc.primitive_gradients {
        match PrimitiveGradient::parse(*uuid, state.points.clone(), &state.values) {
            Ok(gradient) => {
                table.insert(*uuid, gradient);
            }
            Err(e) => tracing::warn!("Primitive gradient {} rejected: {}", uuid, e),
        }
    }
    uuid_keys(Some(diff.touched_keys(&["primitiveGradients"]).iter()))
}

/// Load what an input refers to, if it is not resident yet
fn prefetch_input(raw: &RawAbrInput, data: &mut DataManager, visassets: &VisAssetManager) {
    match raw.input_genre {
        InputGenre::KeyData => {
            let path = raw.input_value.trim();
            if !data.is_resident(path) {
                if let Err(e) = data.load_key_data(path) {
                    tracing::warn!("Could not load key data {}: {}", path, e);
                }
            }
        }
        InputGenre::VisAsset => {
            let Some(uuid) = raw.uuid() else { return };
            match visassets.gradient(&uuid) {
                Some(gradient) => {
                    for member in &gradient.members {
                        visassets.load(*member, false);
                    }
                }
                None => {
                    visassets.load(uuid, false);
                }
            }
        }
        InputGenre::Variable | InputGenre::Primitive | InputGenre::PrimitiveGradient => {}
    }
}

fn same_value(a: Option<&RawAbrInput>, b: Option<&RawAbrInput>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_value(b),
        _ => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_impression(
    uuid: Uuid,
    state: &ImpressionState,
    previous: Option<&Value>,
    changed: &ChangedReferences,
    impressions: &mut BTreeMap<Uuid, DataImpression>,
    renderer: &mut Renderer,
    host: &mut dyn RenderHost,
    data: &mut DataManager,
    visassets: &VisAssetManager,
    primitive_gradients: &HashMap<Uuid, PrimitiveGradient>,
) -> AbrResult<DirtyFlags> {
    let kind = ImpressionKind::from_plate_type(&state.plate_type)?;
    for name in state.input_values.keys() {
        if indexer::slot(kind, name).is_none() {
            tracing::warn!("Impression {}: {} has no input {}; ignoring it", uuid, kind, name);
        }
    }

    for raw in state.input_values.values() {
        prefetch_input(raw, data, visassets);
    }

    if impressions.get(&uuid).map_or(false, |imp| imp.kind() != kind) {
        tracing::info!("Impression {} changed plate type to {}", uuid, kind);
        impressions.remove(&uuid);
        renderer.destroy(&uuid, host);
    }
    let mut created = false;
    let impression = impressions.entry(uuid).or_insert_with(|| {
        created = true;
        DataImpression::new(kind, uuid)
    });
    let mut flags = if created {
        DirtyFlags::DATA_CHANGED | DirtyFlags::STYLE_CHANGED
    } else {
        DirtyFlags::empty()
    };

    if let Some(name) = &state.name {
        impression.name = name.clone();
    }
    impression.tags = state.tags.clone();

    let resolver = ResolveContext {
        data: &*data,
        visassets,
        primitive_gradients,
    };
    let previous_inputs = previous.and_then(|p| p.get("inputValues"));

    for slot in indexer::input_slots(kind) {
        let new_raw = state.input_values.get(slot.name);
        let previous_raw: Option<RawAbrInput> = previous_inputs
            .and_then(|inputs| inputs.get(slot.name))
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let before = impression.input(slot.name).map(|i| i.to_raw());
        let resolved = new_raw.and_then(|raw| resolver.resolve(raw));
        if let Err(e) = assign_input(impression, slot.name, resolved) {
            tracing::warn!("Impression {}: {}; leaving it unset", uuid, e);
            assign_input(impression, slot.name, None)?;
        }
        let after = impression.input(slot.name).map(|i| i.to_raw());

        if !same_value(previous_raw.as_ref(), new_raw) || !same_value(before.as_ref(), after.as_ref()) {
            flags |= slot.update_level.dirty_flag();
        }
        if new_raw.map_or(false, |raw| changed.affects(raw)) {
            flags |= DirtyFlags::STYLE_CHANGED;
        }
    }

    // Visibility is only flagged when it actually flips
    let visible = state.render_hints.visible;
    let was_visible = previous.map(|p| {
        p.get("renderHints")
            .and_then(|h| h.get("visible"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    });
    if was_visible.map_or(false, |was| was != visible) {
        flags |= DirtyFlags::VISIBILITY_CHANGED;
    }
    impression.hints.visible = visible;
    impression.mark(flags);

    tracing::debug!("Impression {} ({}) flags {:?}", uuid, kind, flags);
    Ok(flags)
}

fn uses_variable(input: &AbrInput, paths: &BTreeSet<String>) -> bool {
    match input {
        AbrInput::ScalarVariable(path) | AbrInput::VectorVariable(path) => paths.contains(path),
        _ => false,
    }
}

/// Bring loaded variables in line with the state's range section
///
/// Ranges the diff added, changed or removed are applied or reset. A state
/// range the diff left alone only lands on a variable that carries no
/// override yet, so ranges set through the engine API survive unrelated
/// states. Returns the variables restyled that way.
fn apply_data_ranges(doc: &StateDocument, diff: &StateDiff, data: &mut DataManager) -> BTreeSet<String> {
    let ranges = &doc.data_ranges;
    let touched: BTreeSet<String> = diff
        .touched_keys(&["dataRanges", "scalarRanges"])
        .into_iter()
        .chain(diff.touched_keys(&["dataRanges", "specificScalarRanges"]))
        .collect();
    let mut restyled = BTreeSet::new();

    for variable in data.scalar_variables_mut() {
        let path = variable.path().to_string();
        let global = ranges.scalar_ranges.get(&path).copied();
        let specific = ranges.specific_scalar_ranges.get(&path);
        let in_diff = touched.contains(&path);
        if global.is_none() && specific.is_none() {
            if in_diff && variable.is_customized() {
                tracing::debug!("Range override for {} removed", path);
                variable.reset();
            }
            continue;
        }
        if !in_diff {
            if variable.is_customized() {
                continue;
            }
            restyled.insert(path.clone());
        }
        variable.reset();
        if let Some(range) = global {
            variable.set_range(range);
        }
        for (key_data, range) in specific.into_iter().flatten() {
            variable.set_specific_range(key_data.clone(), *range);
        }
    }

    for path in ranges.scalar_ranges.keys() {
        if data.scalar_variable(path).is_none() {
            tracing::debug!("Range for {} waits for its variable to load", path);
        }
    }
    restyled
}
