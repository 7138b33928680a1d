use std::collections::{HashMap, HashSet};

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, info};

use super::{remove_entity, spawn_entity, ModeKind, WorldContext, WorldMode};
use crate::app::{InputAction, InputSnapshot};
use crate::collision::{mesh, CollisionWorld, Ray, Triangle};
use crate::effects::{Burst, EffectKind, LaserBolt};
use crate::player::{FirstPersonLook, MotionProfile, OrbitRig, PlayerController, Viewpoint};
use crate::presentation::VisualRole;
use crate::registry::{EntityId, EntityKind, PlacementPolicy, Spatial};
use crate::targeting::{InteractiveGroup, PickShape, Pickable};

pub const RING_PASSAGE_DISTANCE: f32 = 0.4;
pub const RING_PASSAGE_MIN_SPEED: f32 = 0.1;
const RING_RADIUS_FACTOR: f32 = 1.01;
const MODEL_FOLLOW_RATE: f32 = 0.1;
const FIRST_SPAWN_DEPTH: f32 = 30.0;
const SPAWN_DEPTH_STEP: f32 = 30.0;
const ROCK_JITTER: f32 = 15.0;
const RING_JITTER: f32 = 5.0;
const RING_SCALE: f32 = 15.0;

/// Rocks and rings further down +Z with every spawn.
#[derive(Debug)]
pub struct SpacePlacement {
    rng: StdRng,
}

impl SpacePlacement {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self, extent: f32) -> f32 {
        (-1.0 + 2.0 * self.rng.gen::<f32>()) * extent
    }
}

impl PlacementPolicy for SpacePlacement {
    fn place(&mut self, kind: EntityKind, spawn_counter: u64) -> Spatial {
        let depth = FIRST_SPAWN_DEPTH + spawn_counter as f32 * SPAWN_DEPTH_STEP;
        match kind {
            EntityKind::Activity => {
                let position = Vec3::new(self.jitter(ROCK_JITTER), self.jitter(ROCK_JITTER), depth);
                let scale = Vec3::new(
                    (self.rng.gen::<f32>() + 0.5) * 10.0,
                    (self.rng.gen::<f32>() + 0.5) * 10.0,
                    (self.rng.gen::<f32>() + 0.5) * 10.0,
                );
                let rotation = Quat::from_euler(
                    glam::EulerRot::YXZ,
                    self.rng.gen::<f32>() * std::f32::consts::TAU,
                    self.rng.gen::<f32>() * std::f32::consts::TAU,
                    0.0,
                );
                Spatial {
                    position,
                    scale,
                    rotation: Some(rotation),
                }
            }
            EntityKind::Stage => Spatial::at(
                Vec3::new(self.jitter(RING_JITTER), self.jitter(RING_JITTER), depth),
                Vec3::splat(RING_SCALE),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceView {
    ThirdPerson,
    FirstPerson,
}

/// Flight shooter: activities are rocks to shoot, stages are rings to fly
/// through.
#[derive(Debug)]
pub struct SpaceWorld {
    placement: SpacePlacement,
    view: SpaceView,
    orbit: OrbitRig,
    look: FirstPersonLook,
    model: Quat,
    rocks: HashMap<EntityId, Spatial>,
    rings: HashMap<EntityId, PickShape>,
    passed_rings: HashSet<EntityId>,
    group: InteractiveGroup,
    geometry_dirty: bool,
}

impl SpaceWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            placement: SpacePlacement::new(seed),
            view: SpaceView::ThirdPerson,
            orbit: OrbitRig::default(),
            look: FirstPersonLook::default(),
            model: Quat::IDENTITY,
            rocks: HashMap::new(),
            rings: HashMap::new(),
            passed_rings: HashSet::new(),
            group: InteractiveGroup::new(),
            geometry_dirty: false,
        }
    }

    pub fn view(&self) -> SpaceView {
        self.view
    }

    pub fn model_orientation(&self) -> Quat {
        self.model
    }

    pub fn model_forward(&self) -> Vec3 {
        self.model * Vec3::Z
    }

    fn camera_orientation(&self, player: &PlayerController) -> Quat {
        self.viewpoint(player).orientation
    }

    /// Direction lasers and thrust follow: the ship's nose in third person,
    /// the camera in first person.
    fn aim_direction(&self) -> Vec3 {
        match self.view {
            SpaceView::ThirdPerson => self.model_forward(),
            SpaceView::FirstPerson => self.look.forward(),
        }
    }

    fn aim_orientation(&self) -> Quat {
        match self.view {
            SpaceView::ThirdPerson => self.model,
            SpaceView::FirstPerson => self.look.orientation(),
        }
    }

    fn toggle_view(&mut self) {
        self.view = match self.view {
            SpaceView::ThirdPerson => {
                self.look.reset();
                SpaceView::FirstPerson
            }
            SpaceView::FirstPerson => SpaceView::ThirdPerson,
        };
        debug!(first_person = self.view == SpaceView::FirstPerson, "view_toggled");
    }

    fn check_ring_passage(&mut self, ctx: &mut WorldContext<'_>, player: &PlayerController) {
        if player.speed() <= RING_PASSAGE_MIN_SPEED {
            return;
        }
        let ray = Ray::new(player.position(), self.model_forward());
        let passed = self
            .rings
            .iter()
            .filter(|(id, _)| !self.passed_rings.contains(*id))
            .filter_map(|(id, ring)| {
                let (distance, _) = ring.intersect(&ray)?;
                (distance <= RING_PASSAGE_DISTANCE).then(|| id.clone())
            })
            .collect::<Vec<_>>();
        for id in passed {
            info!(id = %id, "ring_passed");
            ctx.outbox.send_id(id.clone());
            self.passed_rings.insert(id);
        }
    }
}

impl WorldMode for SpaceWorld {
    fn kind(&self) -> ModeKind {
        ModeKind::Space
    }

    fn motion_profile(&self) -> MotionProfile {
        MotionProfile::ship()
    }

    fn load(&mut self, _ctx: &mut WorldContext<'_>, player: &mut PlayerController) {
        player.teleport(Vec3::ZERO);
        player.set_safe_anchor(Vec3::ZERO);
        self.geometry_dirty = true;
    }

    fn add_activity(&mut self, ctx: &mut WorldContext<'_>, payload: Value) {
        let Some((id, handle, spatial)) = spawn_entity(
            ctx,
            EntityKind::Activity,
            payload,
            &mut self.placement,
            VisualRole::Rock,
        ) else {
            return;
        };
        self.group.insert(Pickable {
            handle,
            parent: None,
            shape: PickShape::Sphere {
                center: spatial.position,
                radius: spatial.scale.max_element() * 0.5,
            },
        });
        self.rocks.insert(id, spatial);
        self.geometry_dirty = true;
    }

    fn remove_activity(&mut self, ctx: &mut WorldContext<'_>, id: &EntityId) {
        let Some(entity) = remove_entity(ctx, EntityKind::Activity, id) else {
            return;
        };
        if let Some(handle) = entity.render_handle() {
            self.group.remove(handle);
            ctx.presenter.despawn_visual(handle);
        }
        self.rocks.remove(id);
        self.geometry_dirty = true;
        let mut burst = Burst::oriented(entity.spatial.position, entity.spatial.rotation);
        burst.scale = entity.spatial.scale.max_element();
        ctx.burst(EffectKind::Explosion, burst);
    }

    fn add_transition(&mut self, ctx: &mut WorldContext<'_>, payload: Value) {
        let Some((id, _handle, spatial)) = spawn_entity(
            ctx,
            EntityKind::Stage,
            payload,
            &mut self.placement,
            VisualRole::Ring,
        ) else {
            return;
        };
        // Rings are flown through, never picked.
        let shape = PickShape::Disc {
            center: spatial.position,
            normal: Vec3::Z,
            radius: RING_RADIUS_FACTOR * spatial.scale.x,
        };
        self.rings.insert(id, shape);
    }

    fn remove_transition(&mut self, ctx: &mut WorldContext<'_>, id: &EntityId) {
        let Some(entity) = remove_entity(ctx, EntityKind::Stage, id) else {
            return;
        };
        self.rings.remove(id);
        self.passed_rings.remove(id);
        if let Some(handle) = entity.render_handle() {
            ctx.presenter.despawn_visual(handle);
        }
    }

    fn apply_controls(&mut self, input: &InputSnapshot, player: &mut PlayerController, dt: f32) {
        if input.toggle_view_pressed() {
            self.toggle_view();
        }
        let (dx, dy) = input.pointer_delta();
        match self.view {
            SpaceView::ThirdPerson => self.orbit.apply_pointer(dx, dy),
            SpaceView::FirstPerson => self.look.apply_pointer(dx, dy),
        }

        let forward = self.aim_direction();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        if input.is_down(InputAction::MoveForward) {
            player.thrust(forward, dt);
        }
        if input.is_down(InputAction::MoveLeft) {
            player.thrust(-right, dt);
        }
        if input.is_down(InputAction::MoveRight) {
            player.thrust(right, dt);
        }
        if input.is_down(InputAction::MoveBack) {
            player.brake();
        }

        if player.speed() > RING_PASSAGE_MIN_SPEED {
            let target = self.camera_orientation(player);
            self.model = self.model.slerp(target, MODEL_FOLLOW_RATE).normalize();
        }
    }

    fn viewpoint(&self, player: &PlayerController) -> Viewpoint {
        match self.view {
            SpaceView::ThirdPerson => self.orbit.viewpoint(player.position()),
            SpaceView::FirstPerson => Viewpoint {
                eye: player.position(),
                forward: self.look.forward(),
                orientation: self.look.orientation(),
            },
        }
    }

    fn aim_ray(&self, player: &PlayerController) -> Ray {
        Ray::new(player.position(), self.aim_direction())
    }

    fn shoot(
        &mut self,
        ctx: &mut WorldContext<'_>,
        player: &PlayerController,
        _target: Option<&EntityId>,
        _collision: &CollisionWorld,
    ) {
        let origin = player.position();
        let orientation = self.aim_orientation();
        let bolt = LaserBolt::launch(origin, self.aim_direction(), orientation);
        ctx.effects.lasers.trigger(ctx.now, bolt);
        ctx.presenter
            .effect_started(EffectKind::Laser, &Burst::oriented(origin, Some(orientation)));
    }

    fn tick(&mut self, ctx: &mut WorldContext<'_>, player: &mut PlayerController, _dt: f32) {
        self.check_ring_passage(ctx, player);
    }

    /// Rocks only.
    fn active_group(&self) -> &InteractiveGroup {
        &self.group
    }

    fn static_geometry(&self) -> Vec<Triangle> {
        self.rocks
            .values()
            .flat_map(|spatial| {
                mesh::rock_hull(
                    spatial.position,
                    spatial.scale,
                    spatial.rotation.unwrap_or(Quat::IDENTITY),
                )
            })
            .collect()
    }

    fn take_geometry_dirty(&mut self) -> bool {
        std::mem::take(&mut self.geometry_dirty)
    }
}
