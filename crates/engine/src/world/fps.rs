use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, info};

use super::platforms::{
    Platform, PlatformChain, PlatformIndex, SwitchPart, DOOR_HALF_EXTENTS,
    PLATFORM_HALF_EXTENTS, PLATFORM_SPACING,
};
use super::{remove_entity, spawn_entity, ModeKind, WorldContext, WorldMode};
use crate::app::{InputAction, InputSnapshot};
use crate::collision::{mesh, CollisionWorld, Triangle};
use crate::effects::{Burst, EffectKind};
use crate::player::{look_rotation, FirstPersonLook, MotionProfile, PlayerController, Viewpoint};
use crate::presentation::VisualRole;
use crate::registry::{EntityId, EntityKind, PlacementPolicy, RenderHandle, Spatial};
use crate::targeting::{InteractiveGroup, PickShape, Pickable};

pub const TARGET_RADIUS: f32 = 0.5;
/// Walking this close to a switch turns it on.
pub const SWITCH_REACH: f32 = 2.5;
const SWITCH_RADIUS: f32 = 0.75;
const SWITCH_LOCAL: Vec3 = Vec3::new(-8.0, -2.5, -0.2);
const TARGET_SPREAD: Vec3 = Vec3::new(6.0, 1.5, 0.0);
const TARGET_DEPTH: f32 = -0.3;
const PLATFORM_HEIGHT_JITTER: f32 = 2.0;
const SHOT_RANGE: f32 = 1000.0;
const START_NAME: &str = "Start";

/// Targets scatter across the current door face; platforms line up along +Z.
///
/// The owning world sets `door_center` and `next_platform` before each spawn.
#[derive(Debug)]
pub struct FpsPlacement {
    rng: StdRng,
    pub door_center: Vec3,
    pub next_platform: usize,
}

impl FpsPlacement {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            door_center: Vec3::ZERO,
            next_platform: 1,
        }
    }

    fn jitter(&mut self, extent: f32) -> f32 {
        (-1.0 + 2.0 * self.rng.gen::<f32>()) * extent
    }
}

impl PlacementPolicy for FpsPlacement {
    fn place(&mut self, kind: EntityKind, _spawn_counter: u64) -> Spatial {
        match kind {
            EntityKind::Activity => {
                let local = Vec3::new(
                    self.jitter(TARGET_SPREAD.x),
                    self.jitter(TARGET_SPREAD.y),
                    TARGET_DEPTH,
                );
                Spatial::at(self.door_center + local, Vec3::splat(TARGET_RADIUS))
            }
            EntityKind::Stage => Spatial::at(
                Vec3::new(
                    0.0,
                    self.jitter(PLATFORM_HEIGHT_JITTER),
                    self.next_platform as f32 * PLATFORM_SPACING,
                ),
                PLATFORM_HALF_EXTENTS * 2.0,
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct TargetSlot {
    id: EntityId,
    handle: RenderHandle,
    /// Offset from the current door center.
    local: Vec3,
}

fn slab_spatial(position: Vec3) -> Spatial {
    Spatial::at(position, PLATFORM_HALF_EXTENTS * 2.0)
}

fn door_spatial(platform: &Platform) -> Spatial {
    Spatial::at(platform.door_center(), DOOR_HALF_EXTENTS * 2.0)
}

fn switch_spatial(door_center: Vec3, switch: &SwitchPart) -> Spatial {
    let mut spatial = Spatial::at(door_center + switch.local, Vec3::splat(SWITCH_RADIUS * 2.0));
    if switch.on {
        spatial.rotation = Some(Quat::from_rotation_z(std::f32::consts::PI));
    }
    spatial
}

/// Platform puzzle: activities are targets on the current door, stages are
/// platforms behind switch-operated doors.
#[derive(Debug)]
pub struct FpsWorld {
    placement: FpsPlacement,
    look: FirstPersonLook,
    chain: Option<PlatformChain>,
    targets: Vec<TargetSlot>,
    group: InteractiveGroup,
    geometry_dirty: bool,
}

impl FpsWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            placement: FpsPlacement::new(seed),
            look: FirstPersonLook::default(),
            chain: None,
            targets: Vec::new(),
            group: InteractiveGroup::new(),
            geometry_dirty: false,
        }
    }

    /// `None` until the world is loaded.
    pub fn chain(&self) -> Option<&PlatformChain> {
        self.chain.as_ref()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Turns on the switch leading to `stage_id` and reports the stage. A
    /// switch only fires once.
    fn use_switch(&mut self, ctx: &mut WorldContext<'_>, stage_id: &EntityId) -> bool {
        let Some(chain) = self.chain.as_mut() else {
            return false;
        };
        let Some(index) = chain.find_stage(stage_id) else {
            return false;
        };
        let door_center = chain
            .predecessor(index)
            .and_then(|previous| chain.get(previous))
            .map(Platform::door_center);
        let Some(switch) = chain
            .get_mut(index)
            .and_then(|platform| platform.switch.as_mut())
        else {
            return false;
        };
        if switch.on {
            return false;
        }
        switch.on = true;
        if let Some(door_center) = door_center {
            ctx.presenter
                .move_visual(switch.handle, &switch_spatial(door_center, switch));
        }
        info!(id = %stage_id, platform = index.get(), "switch_activated");
        ctx.outbox.send_id(stage_id.clone());
        self.refresh_group();
        true
    }

    fn switch_in_reach(&self, player: &PlayerController) -> Option<EntityId> {
        let chain = self.chain.as_ref()?;
        let current = chain.current();
        let next = chain.get(current.next?)?;
        let switch = next.switch.as_ref().filter(|switch| !switch.on)?;
        let center = current.door_center() + switch.local;
        (player.position().distance(center) <= SWITCH_REACH).then(|| next.stage_id.clone())?
    }

    /// Moves target visuals and entity positions onto the current door.
    fn sync_targets(&self, ctx: &mut WorldContext<'_>) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };
        let door_center = chain.current().door_center();
        for target in &self.targets {
            let Some(entity) = ctx.registry.get_mut(&target.id) else {
                continue;
            };
            entity.spatial.position = door_center + target.local;
            let spatial = entity.spatial;
            ctx.presenter.move_visual(target.handle, &spatial);
        }
    }

    fn sync_door(&self, ctx: &mut WorldContext<'_>, index: PlatformIndex) {
        let Some(chain) = self.chain.as_ref() else {
            return;
        };
        let Some(platform) = chain.get(index) else {
            return;
        };
        if let Some(door) = platform.door {
            ctx.presenter.move_visual(door, &door_spatial(platform));
        }
        let switch = platform
            .next
            .and_then(|next| chain.get(next))
            .and_then(|next| next.switch.as_ref());
        if let Some(switch) = switch {
            ctx.presenter
                .move_visual(switch.handle, &switch_spatial(platform.door_center(), switch));
        }
    }

    fn clear_door(
        &mut self,
        ctx: &mut WorldContext<'_>,
        player: &mut PlayerController,
        index: PlatformIndex,
    ) {
        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        self.geometry_dirty = true;
        let entered = chain
            .get(index)
            .and_then(|platform| platform.next)
            .and_then(|next| chain.get(next))
            .and_then(|next| next.stage_id.clone());
        info!(
            platform = index.get(),
            stage = entered.as_ref().map(EntityId::as_str).unwrap_or("none"),
            "door_cleared"
        );
        if let Some(stage_id) = entered {
            if ctx.registry.remove(&stage_id).is_err() {
                debug!(id = %stage_id, "cleared_stage_already_removed");
            }
        }
        if let Some(promoted) = chain.promote() {
            if let Some(platform) = chain.get(promoted) {
                player.set_safe_anchor(platform.safe_anchor());
                info!(platform = promoted.get(), name = %platform.name, "platform_promoted");
            }
            self.sync_targets(ctx);
        }
    }

    fn refresh_group(&mut self) {
        self.group.clear();
        let Some(chain) = self.chain.as_ref() else {
            return;
        };
        let current = chain.current();
        let door_center = current.door_center();
        for target in &self.targets {
            self.group.insert(Pickable {
                handle: target.handle,
                parent: None,
                shape: PickShape::Disc {
                    center: door_center + target.local,
                    normal: Vec3::NEG_Z,
                    radius: TARGET_RADIUS,
                },
            });
        }
        let next = current.next.and_then(|next| chain.get(next));
        if let Some(next) = next {
            if let Some(switch) = next.switch.as_ref().filter(|switch| !switch.on) {
                self.group.insert(Pickable {
                    handle: switch.handle,
                    parent: Some(next.slab),
                    shape: PickShape::Disc {
                        center: door_center + switch.local,
                        normal: Vec3::NEG_Z,
                        radius: SWITCH_RADIUS,
                    },
                });
            }
        }
    }
}

impl WorldMode for FpsWorld {
    fn kind(&self) -> ModeKind {
        ModeKind::Fps
    }

    fn motion_profile(&self) -> MotionProfile {
        MotionProfile::walker()
    }

    fn load(&mut self, ctx: &mut WorldContext<'_>, player: &mut PlayerController) {
        if self.chain.is_some() {
            return;
        }
        let slab = ctx
            .presenter
            .spawn_part(None, VisualRole::Platform, &slab_spatial(Vec3::ZERO));
        let mut start = Platform::new(None, START_NAME, Vec3::ZERO, slab);
        start.door = Some(ctx.presenter.spawn_part(
            Some(slab),
            VisualRole::Door,
            &door_spatial(&start),
        ));
        let anchor = start.safe_anchor();
        self.chain = Some(PlatformChain::new(start));
        player.teleport(anchor);
        player.set_safe_anchor(anchor);
        self.look.reset();
        self.geometry_dirty = true;
        self.refresh_group();
    }

    fn add_activity(&mut self, ctx: &mut WorldContext<'_>, payload: Value) {
        let Some(chain) = self.chain.as_ref() else {
            debug!("activity_before_load_ignored");
            return;
        };
        let door_center = chain.current().door_center();
        self.placement.door_center = door_center;
        let Some((id, handle, spatial)) = spawn_entity(
            ctx,
            EntityKind::Activity,
            payload,
            &mut self.placement,
            VisualRole::Target,
        ) else {
            return;
        };
        self.targets.push(TargetSlot {
            id,
            handle,
            local: spatial.position - door_center,
        });
        self.refresh_group();
    }

    fn remove_activity(&mut self, ctx: &mut WorldContext<'_>, id: &EntityId) {
        let Some(entity) = remove_entity(ctx, EntityKind::Activity, id) else {
            return;
        };
        self.targets.retain(|target| &target.id != id);
        if let Some(handle) = entity.render_handle() {
            ctx.presenter.despawn_visual(handle);
        }
        ctx.burst(
            EffectKind::Shatter,
            Burst::oriented(entity.spatial.position, entity.spatial.rotation),
        );
        self.refresh_group();
    }

    fn add_transition(&mut self, ctx: &mut WorldContext<'_>, payload: Value) {
        let Some(chain) = self.chain.as_ref() else {
            debug!("stage_before_load_ignored");
            return;
        };
        self.placement.next_platform = chain.len();
        let Some((id, slab, spatial)) = spawn_entity(
            ctx,
            EntityKind::Stage,
            payload,
            &mut self.placement,
            VisualRole::Platform,
        ) else {
            return;
        };
        let name = ctx
            .registry
            .get(&id)
            .and_then(|entity| entity.display_name())
            .unwrap_or(id.as_str())
            .to_string();

        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        let mut platform = Platform::new(Some(id.clone()), name, spatial.position, slab);
        platform.door = Some(ctx.presenter.spawn_part(
            Some(slab),
            VisualRole::Door,
            &door_spatial(&platform),
        ));
        let previous = chain.tail();
        let handle = ctx.presenter.spawn_part(
            previous.door,
            VisualRole::Switch,
            &Spatial::at(
                previous.door_center() + SWITCH_LOCAL,
                Vec3::splat(SWITCH_RADIUS * 2.0),
            ),
        );
        platform.switch = Some(SwitchPart {
            handle,
            local: SWITCH_LOCAL,
            on: false,
        });
        let index = chain.push(platform);
        info!(id = %id, platform = index.get(), "platform_added");
        self.geometry_dirty = true;
        self.refresh_group();
    }

    fn remove_transition(&mut self, _ctx: &mut WorldContext<'_>, id: &EntityId) {
        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        let Some(index) = chain.find_stage(id) else {
            debug!(id = %id, "remove_unknown_ignored");
            return;
        };
        if let Some(switch) = chain
            .get_mut(index)
            .and_then(|platform| platform.switch.as_mut())
        {
            switch.on = true;
        }
        let Some(previous) = chain
            .predecessor(index)
            .and_then(|previous| chain.get_mut(previous))
        else {
            return;
        };
        if !previous.opening {
            previous.opening = true;
            info!(id = %id, "door_opening");
        }
        self.refresh_group();
    }

    fn apply_controls(&mut self, input: &InputSnapshot, player: &mut PlayerController, dt: f32) {
        let (dx, dy) = input.pointer_delta();
        self.look.apply_pointer(dx, dy);

        let axis = |positive: InputAction, negative: InputAction| {
            f32::from(u8::from(input.is_down(positive))) - f32::from(u8::from(input.is_down(negative)))
        };
        let direction = self.look.flat_forward()
            * axis(InputAction::MoveForward, InputAction::MoveBack)
            + self.look.right() * axis(InputAction::MoveRight, InputAction::MoveLeft);
        if direction != Vec3::ZERO {
            player.thrust(direction, dt);
        }
        if input.is_down(InputAction::Jump) {
            player.jump();
        }
    }

    fn viewpoint(&self, player: &PlayerController) -> Viewpoint {
        Viewpoint {
            eye: player.position(),
            forward: self.look.forward(),
            orientation: self.look.orientation(),
        }
    }

    fn shoot(
        &mut self,
        ctx: &mut WorldContext<'_>,
        player: &PlayerController,
        target: Option<&EntityId>,
        collision: &CollisionWorld,
    ) {
        let ray = self.viewpoint(player).ray();
        let surface = collision
            .intersect_ray(&ray, SHOT_RANGE)
            .map(|hit| (hit.distance, hit.point, hit.normal));
        let pickable = self
            .group
            .intersect(&ray)
            .map(|hit| (hit.distance, hit.point, hit.normal));
        let nearest = match (surface, pickable) {
            (Some(left), Some(right)) => Some(if left.0 <= right.0 { left } else { right }),
            (left, right) => left.or(right),
        };
        let orientation = nearest.map(|(_, _, normal)| look_rotation(normal));
        if let Some((_, point, _)) = nearest {
            ctx.burst(EffectKind::Spark, Burst::oriented(point, orientation));
        }

        let Some(id) = target else {
            return;
        };
        match ctx.registry.kind_of(id) {
            Some(EntityKind::Activity) => {
                if let Some(entity) = ctx.registry.get_mut(id) {
                    entity.spatial.rotation = orientation.or(Some(self.look.orientation()));
                }
                info!(id = %id, "target_hit");
                ctx.outbox.send_id(id.clone());
            }
            Some(EntityKind::Stage) => {
                self.use_switch(ctx, id);
            }
            None => {}
        }
    }

    fn tick(&mut self, ctx: &mut WorldContext<'_>, player: &mut PlayerController, dt: f32) {
        let Some(chain) = self.chain.as_mut() else {
            return;
        };
        let current = chain.current_index();
        let steps = chain.animate_doors(dt);
        for (index, step) in steps {
            self.sync_door(ctx, index);
            if index == current {
                self.sync_targets(ctx);
            }
            if step.cleared {
                self.clear_door(ctx, player, index);
            }
            if step.came_to_rest {
                let door = self
                    .chain
                    .as_mut()
                    .and_then(|chain| chain.get_mut(index))
                    .and_then(|platform| platform.door.take());
                if let Some(door) = door {
                    ctx.presenter.despawn_visual(door);
                }
            }
        }

        if let Some(stage_id) = self.switch_in_reach(player) {
            self.use_switch(ctx, &stage_id);
        }
        self.refresh_group();
    }

    fn active_group(&self) -> &InteractiveGroup {
        &self.group
    }

    fn static_geometry(&self) -> Vec<Triangle> {
        let Some(chain) = self.chain.as_ref() else {
            return Vec::new();
        };
        let mut triangles = Vec::new();
        for (_, platform) in chain.iter() {
            triangles.extend(mesh::box_triangles(platform.position, PLATFORM_HALF_EXTENTS));
            if !platform.door_cleared {
                triangles.extend(mesh::box_triangles(
                    platform.door_center(),
                    DOOR_HALF_EXTENTS,
                ));
            }
        }
        triangles
    }

    fn take_geometry_dirty(&mut self) -> bool {
        std::mem::take(&mut self.geometry_dirty)
    }
}
