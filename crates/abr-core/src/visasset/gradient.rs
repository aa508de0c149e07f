//! VisAsset gradients
//!
//! A gradient is an ordered list of VisAssets of one type plus `n - 1`
//! boundary points in 0..1. Sampling at `t` picks the member whose interval
//! contains `t`; in smooth mode it also reports the blend towards the next
//! member.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VisAssetError, VisAssetResult};
use crate::visasset::VisAssetType;

/// Interpolation between gradient members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientScale {
    #[default]
    Discrete,
    Smooth,
}

/// An ordered list of VisAssets sampled by a normalized value
#[derive(Debug, Clone, PartialEq)]
pub struct VisAssetGradient {
    pub uuid: Uuid,
    pub members: Vec<Uuid>,
    pub points: Vec<f32>,
    pub scale: GradientScale,
    /// Type shared by every member, once resolved
    pub member_type: Option<VisAssetType>,
}

/// One sample of a gradient: the member to use and the blend to the next
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientSample {
    pub index: usize,
    pub next: usize,
    pub blend: f32,
}

impl VisAssetGradient {
    pub fn new(uuid: Uuid, members: Vec<Uuid>, points: Vec<f32>, scale: GradientScale) -> VisAssetResult<Self> {
        if members.is_empty() || points.len() + 1 != members.len() {
            return Err(VisAssetError::GradientPoints {
                uuid,
                points: points.len(),
                members: members.len(),
            });
        }
        Ok(Self {
            uuid,
            members,
            points,
            scale,
            member_type: None,
        })
    }

    /// Check that every member has the same type and remember it
    pub fn check_member_types(&mut self, types: &[VisAssetType]) -> VisAssetResult<VisAssetType> {
        let first = *types.first().ok_or(VisAssetError::MixedGradient(self.uuid))?;
        if types.iter().any(|t| *t != first) {
            return Err(VisAssetError::MixedGradient(self.uuid));
        }
        self.member_type = Some(first);
        Ok(first)
    }

    pub fn contains(&self, member: &Uuid) -> bool {
        self.members.contains(member)
    }

    /// Which member applies at normalized position `t`
    pub fn sample(&self, t: f32) -> GradientSample {
        let index = self.points.iter().take_while(|&&p| t >= p).count();
        let last = self.members.len().saturating_sub(1);
        let index = index.min(last);
        match self.scale {
            GradientScale::Discrete => GradientSample {
                index,
                next: index,
                blend: 0.0,
            },
            GradientScale::Smooth => {
                // Blend towards the next member across this member's interval
                let lo = if index == 0 { 0.0 } else { self.points[index - 1] };
                let hi = self.points.get(index).copied().unwrap_or(1.0);
                let next = (index + 1).min(last);
                let blend = if hi > lo && next != index {
                    ((t - lo) / (hi - lo)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                GradientSample { index, next, blend }
            }
        }
    }
}
