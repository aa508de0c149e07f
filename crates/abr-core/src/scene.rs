//! Scene-level entities: lights, background and impression groups

use std::collections::{BTreeMap, BTreeSet};

use abr_io::Bounds;
use uuid::Uuid;

use crate::state::document::{LightState, SceneState};
use crate::visasset::Color;

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: String,
    pub intensity: f32,
    pub color: Color,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

impl Light {
    fn update_from(&mut self, state: &LightState) {
        self.intensity = state.intensity;
        self.color = Color::from_hex(&state.color).unwrap_or_else(|| {
            tracing::warn!("Light {} has invalid color {}", state.name, state.color);
            Color::rgb(1.0, 1.0, 1.0)
        });
        self.position = state.position;
        self.rotation = state.rotation;
    }
}

/// A set of impressions sharing a data container
#[derive(Debug, Clone, PartialEq)]
pub struct ImpressionGroup {
    pub uuid: Uuid,
    pub name: String,
    pub container_bounds: Bounds,
    pub impressions: BTreeSet<Uuid>,
}

impl ImpressionGroup {
    pub fn new(uuid: Uuid, name: impl Into<String>, container_bounds: Bounds) -> Self {
        Self {
            uuid,
            name: name.into(),
            container_bounds,
            impressions: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scene {
    lights: Vec<Light>,
    background: Color,
    groups: BTreeMap<Uuid, ImpressionGroup>,
    default_group: Uuid,
    default_bounds: Bounds,
}

pub const DEFAULT_GROUP_NAME: &str = "Default";

impl Scene {
    pub fn new(default_bounds: Bounds) -> Self {
        let default_group = Uuid::new_v4();
        let mut groups = BTreeMap::new();
        groups.insert(
            default_group,
            ImpressionGroup::new(default_group, DEFAULT_GROUP_NAME, default_bounds),
        );
        Self {
            lights: Vec::new(),
            background: Color::rgb(0.0, 0.0, 0.0),
            groups,
            default_group,
            default_bounds,
        }
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn groups(&self) -> impl Iterator<Item = &ImpressionGroup> {
        self.groups.values()
    }

    pub fn group(&self, uuid: &Uuid) -> Option<&ImpressionGroup> {
        self.groups.get(uuid)
    }

    pub fn default_group(&self) -> Uuid {
        self.default_group
    }

    /// Group an impression belongs to
    pub fn group_of(&self, impression: &Uuid) -> Option<&ImpressionGroup> {
        self.groups.values().find(|g| g.impressions.contains(impression))
    }

    /// Move an impression into a group (the default group for `None`)
    pub fn add_to_group(&mut self, impression: Uuid, group: Option<Uuid>) {
        let target = group.unwrap_or(self.default_group);
        for g in self.groups.values_mut() {
            if g.uuid != target {
                g.impressions.remove(&impression);
            }
        }
        let default_bounds = self.default_bounds;
        self.groups
            .entry(target)
            .or_insert_with(|| ImpressionGroup::new(target, target.to_string(), default_bounds))
            .impressions
            .insert(impression);
    }

    pub fn remove_impression(&mut self, impression: &Uuid) {
        for g in self.groups.values_mut() {
            g.impressions.remove(impression);
        }
    }

    /// Match lights by name, creating missing ones and dropping stale ones
    pub fn reconcile_lights(&mut self, lighting: &[LightState]) -> bool {
        let before = self.lights.clone();
        self.lights.retain(|l| lighting.iter().any(|s| s.name == l.name));
        for state in lighting {
            match self.lights.iter_mut().find(|l| l.name == state.name) {
                Some(light) => light.update_from(state),
                None => {
                    let mut light = Light {
                        name: state.name.clone(),
                        intensity: 1.0,
                        color: Color::rgb(1.0, 1.0, 1.0),
                        position: [0.0; 3],
                        rotation: [0.0; 3],
                    };
                    light.update_from(state);
                    tracing::debug!("Created light {}", state.name);
                    self.lights.push(light);
                }
            }
        }
        self.lights != before
    }

    pub fn set_background(&mut self, hex: Option<&str>) -> bool {
        let color = match hex {
            Some(hex) => match Color::from_hex(hex) {
                Some(color) => color,
                None => {
                    tracing::warn!("Invalid background color {}", hex);
                    return false;
                }
            },
            None => Color::rgb(0.0, 0.0, 0.0),
        };
        let changed = color != self.background;
        self.background = color;
        changed
    }

    /// Apply groups from the state, then place every listed impression
    ///
    /// Impressions not claimed by a group go to the default group.
    pub fn reconcile_groups<'a>(&mut self, scene: &SceneState, impressions: impl IntoIterator<Item = &'a Uuid>) {
        let default_group = self.default_group;
        self.groups.retain(|uuid, _| *uuid == default_group || scene.impression_groups.contains_key(uuid));
        for group in self.groups.values_mut() {
            group.impressions.clear();
        }

        for (uuid, state) in &scene.impression_groups {
            let default_bounds = self.default_bounds;
            let group = self
                .groups
                .entry(*uuid)
                .or_insert_with(|| ImpressionGroup::new(*uuid, state.name.clone(), default_bounds));
            group.name = state.name.clone();
            group.container_bounds = state.container_bounds.unwrap_or(default_bounds);
        }

        for impression in impressions {
            let declared = scene
                .impression_groups
                .iter()
                .find(|(_, g)| g.impressions.contains(impression))
                .map(|(uuid, _)| *uuid);
            self.add_to_group(*impression, declared);
        }
    }

    pub fn clear(&mut self) {
        for g in self.groups.values_mut() {
            g.impressions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::document::ImpressionGroupState;

    fn bounds() -> Bounds {
        Bounds::from_min_max([-1.0; 3], [1.0; 3])
    }

    fn light(name: &str, intensity: f32) -> LightState {
        LightState {
            name: name.to_string(),
            intensity,
            color: "#FF0000".to_string(),
            position: [0.0; 3],
            rotation: [0.0; 3],
        }
    }

    #[test]
    fn test_lights_match_by_name() {
        let mut scene = Scene::new(bounds());
        assert!(scene.reconcile_lights(&[light("Key", 1.0), light("Fill", 0.5)]));
        assert_eq!(scene.lights().len(), 2);
        assert!(!scene.reconcile_lights(&[light("Key", 1.0), light("Fill", 0.5)]));
        assert!(scene.reconcile_lights(&[light("Key", 2.0)]));
        assert_eq!(scene.lights().len(), 1);
        assert_eq!(scene.lights()[0].intensity, 2.0);
    }

    #[test]
    fn test_groups_and_default() {
        let mut scene = Scene::new(bounds());
        let (a, b, group) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut state = SceneState::default();
        state.impression_groups.insert(
            group,
            ImpressionGroupState {
                name: "Left".to_string(),
                container_bounds: Some(Bounds::from_min_max([0.0; 3], [2.0; 3])),
                impressions: vec![a],
            },
        );
        scene.reconcile_groups(&state, [&a, &b]);
        assert_eq!(scene.group_of(&a).map(|g| g.uuid), Some(group));
        assert_eq!(scene.group_of(&b).map(|g| g.uuid), Some(scene.default_group()));

        scene.reconcile_groups(&SceneState::default(), [&a]);
        assert!(scene.group(&group).is_none());
        assert_eq!(scene.group_of(&a).map(|g| g.uuid), Some(scene.default_group()));
    }

    #[test]
    fn test_background() {
        let mut scene = Scene::new(bounds());
        assert!(scene.set_background(Some("#336699")));
        assert!(!scene.set_background(Some("#336699")));
        assert!(!scene.set_background(Some("nope")));
    }
}
