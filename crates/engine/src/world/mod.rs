//! Mode-specific orchestration. A [`WorldMode`] is picked once when the
//! session is built and binds the shared registry, targeting and effects to
//! one game's rules.

mod fps;
mod platforms;
mod space;

pub use fps::{FpsPlacement, FpsWorld, SWITCH_REACH, TARGET_RADIUS};
pub use platforms::{
    DoorStep, Platform, PlatformChain, PlatformIndex, SwitchPart, DOOR_CLEAR_OFFSET,
    DOOR_FALL_PER_SECOND, DOOR_REST_OFFSET, DOOR_START_OFFSET, PLATFORM_SPACING,
    SAFE_ANCHOR_HEIGHT,
};
pub use space::{
    SpacePlacement, SpaceView, SpaceWorld, RING_PASSAGE_DISTANCE, RING_PASSAGE_MIN_SPEED,
};

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::app::InputSnapshot;
use crate::clock::SimTime;
use crate::collision::{CollisionWorld, Ray, Triangle};
use crate::effects::{Burst, EffectKind, TransientEffects};
use crate::player::{MotionProfile, PlayerController, Viewpoint};
use crate::presentation::{Presenter, VisualRole};
use crate::protocol::Outbox;
use crate::registry::{
    Entity, EntityId, EntityKind, EntityRegistry, PlacementPolicy, RegistryError, RenderHandle,
    Spatial,
};
use crate::targeting::InteractiveGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Space,
    Fps,
}

impl ModeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ModeKind::Space => "space",
            ModeKind::Fps => "fps",
        }
    }

    /// Builds the orchestrator for this mode. `seed` drives placement jitter.
    pub fn build(self, seed: u64) -> Box<dyn WorldMode> {
        match self {
            ModeKind::Space => Box::new(SpaceWorld::new(seed)),
            ModeKind::Fps => Box::new(FpsWorld::new(seed)),
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown world mode '{0}' (expected 'space' or 'fps')")]
pub struct ModeParseError(pub String);

impl FromStr for ModeKind {
    type Err = ModeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "space" => Ok(ModeKind::Space),
            "fps" => Ok(ModeKind::Fps),
            _ => Err(ModeParseError(raw.to_string())),
        }
    }
}

/// Shared session state a mode may touch while handling one call.
pub struct WorldContext<'a> {
    pub registry: &'a mut EntityRegistry,
    pub presenter: &'a mut dyn Presenter,
    pub effects: &'a mut TransientEffects,
    pub outbox: &'a mut Outbox,
    pub now: SimTime,
}

impl WorldContext<'_> {
    /// Starts a burst effect and tells the presenter about it.
    pub fn burst(&mut self, kind: EffectKind, burst: Burst) {
        let Some(set) = self.effects.burst_set_mut(kind) else {
            return;
        };
        set.trigger(self.now, burst);
        self.presenter.effect_started(kind, &burst);
    }
}

/// Game rules for one world mode.
///
/// Message handlers must tolerate unknown and repeated ids: removal events
/// can race with local state. `take_geometry_dirty` reports whether
/// `static_geometry` changed since it was last asked.
pub trait WorldMode {
    fn kind(&self) -> ModeKind;

    fn motion_profile(&self) -> MotionProfile;

    /// Builds the initial scene and places the player.
    fn load(&mut self, ctx: &mut WorldContext<'_>, player: &mut PlayerController);

    fn add_activity(&mut self, ctx: &mut WorldContext<'_>, payload: Value);

    fn remove_activity(&mut self, ctx: &mut WorldContext<'_>, id: &EntityId);

    fn add_transition(&mut self, ctx: &mut WorldContext<'_>, payload: Value);

    fn remove_transition(&mut self, ctx: &mut WorldContext<'_>, id: &EntityId);

    /// Samples one tick of input into camera and thrust changes.
    fn apply_controls(&mut self, input: &InputSnapshot, player: &mut PlayerController, dt: f32);

    /// Camera transform for rendering.
    fn viewpoint(&self, player: &PlayerController) -> Viewpoint;

    /// Ray used for continuous targeting.
    fn aim_ray(&self, player: &PlayerController) -> Ray {
        self.viewpoint(player).ray()
    }

    fn shoot(
        &mut self,
        ctx: &mut WorldContext<'_>,
        player: &PlayerController,
        target: Option<&EntityId>,
        collision: &CollisionWorld,
    );

    /// Per-tick mode logic after physics and targeting.
    fn tick(&mut self, ctx: &mut WorldContext<'_>, player: &mut PlayerController, dt: f32);

    /// Pickables the crosshair and projectiles are tested against.
    fn active_group(&self) -> &InteractiveGroup;

    fn static_geometry(&self) -> Vec<Triangle>;

    fn take_geometry_dirty(&mut self) -> bool;
}

/// Spawns an entity and its visual, binding the handle. Rejected spawns are
/// logged and yield `None`.
pub(crate) fn spawn_entity(
    ctx: &mut WorldContext<'_>,
    kind: EntityKind,
    payload: Value,
    placement: &mut dyn PlacementPolicy,
    role: VisualRole,
) -> Option<(EntityId, RenderHandle, Spatial)> {
    let entity = match ctx.registry.spawn(kind, payload, placement) {
        Ok(entity) => entity,
        Err(RegistryError::DuplicateId { id }) => {
            warn!(id = %id, kind = %kind, "duplicate_spawn_ignored");
            return None;
        }
        Err(err) => {
            warn!(kind = %kind, error = %err, "spawn_rejected");
            return None;
        }
    };
    let id = entity.id.clone();
    let spatial = entity.spatial;
    let handle = ctx.presenter.spawn_visual(entity, role);
    if let Err(err) = ctx.registry.bind_render_handle(&id, handle) {
        warn!(id = %id, error = %err, "render_handle_bind_failed");
    }
    Some((id, handle, spatial))
}

/// Removes a live entity of `kind`. Unknown ids and ids of the other kind
/// are no-ops.
pub(crate) fn remove_entity(
    ctx: &mut WorldContext<'_>,
    kind: EntityKind,
    id: &EntityId,
) -> Option<Entity> {
    match ctx.registry.kind_of(id) {
        Some(live_kind) if live_kind == kind => {}
        Some(live_kind) => {
            debug!(id = %id, expected = %kind, actual = %live_kind, "remove_kind_mismatch_ignored");
            return None;
        }
        None => {
            debug!(id = %id, kind = %kind, "remove_unknown_ignored");
            return None;
        }
    }
    ctx.registry.remove(id).ok()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::presentation::HeadlessPresenter;

    /// Owns everything a [`WorldContext`] borrows.
    #[derive(Default)]
    pub(crate) struct Harness {
        pub registry: EntityRegistry,
        pub presenter: HeadlessPresenter,
        pub effects: TransientEffects,
        pub outbox: Outbox,
        pub now: SimTime,
    }

    impl Harness {
        pub(crate) fn ctx(&mut self) -> WorldContext<'_> {
            WorldContext {
                registry: &mut self.registry,
                presenter: &mut self.presenter,
                effects: &mut self.effects,
                outbox: &mut self.outbox,
                now: self.now,
            }
        }

        pub(crate) fn sent_ids(&mut self) -> Vec<String> {
            self.outbox
                .drain()
                .map(|message| message.id().as_str().to_string())
                .collect()
        }
    }
}
