use std::collections::HashMap;

use tracing::trace;

use crate::collision::Triangle;
use crate::effects::{Burst, EffectKind};
use crate::registry::{Entity, RenderHandle, RenderHandleAllocator, Spatial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualRole {
    Rock,
    Ring,
    Platform,
    Door,
    Target,
    Switch,
}

impl VisualRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            VisualRole::Rock => "rock",
            VisualRole::Ring => "ring",
            VisualRole::Platform => "platform",
            VisualRole::Door => "door",
            VisualRole::Target => "target",
            VisualRole::Switch => "switch",
        }
    }
}

/// Everything the simulation asks of the renderer.
pub trait Presenter {
    /// Creates the visual for a freshly spawned entity. The returned handle is
    /// bound in the registry by the caller.
    fn spawn_visual(&mut self, entity: &Entity, role: VisualRole) -> RenderHandle;

    /// Creates a visual that belongs to no entity (platform slabs, doors,
    /// switch plates).
    fn spawn_part(
        &mut self,
        parent: Option<RenderHandle>,
        role: VisualRole,
        spatial: &Spatial,
    ) -> RenderHandle;

    fn despawn_visual(&mut self, handle: RenderHandle);

    fn move_visual(&mut self, handle: RenderHandle, spatial: &Spatial);

    fn effect_started(&mut self, _kind: EffectKind, _burst: &Burst) {}

    /// Static triangles owned by the renderer (scenery) that should collide.
    fn extra_static_geometry(&self) -> Vec<Triangle> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualRecord {
    pub role: VisualRole,
    pub parent: Option<RenderHandle>,
    pub spatial: Spatial,
}

/// Presenter without a renderer. Keeps a table of live visuals so loops and
/// tests can inspect what would be on screen.
#[derive(Debug, Default)]
pub struct HeadlessPresenter {
    handles: RenderHandleAllocator,
    visuals: HashMap<RenderHandle, VisualRecord>,
    effects_started: u64,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visual(&self, handle: RenderHandle) -> Option<&VisualRecord> {
        self.visuals.get(&handle)
    }

    pub fn visuals(&self) -> impl Iterator<Item = (&RenderHandle, &VisualRecord)> {
        self.visuals.iter()
    }

    pub fn live_count(&self) -> usize {
        self.visuals.len()
    }

    pub fn count_role(&self, role: VisualRole) -> usize {
        self.visuals
            .values()
            .filter(|record| record.role == role)
            .count()
    }

    pub fn effects_started(&self) -> u64 {
        self.effects_started
    }
}

impl Presenter for HeadlessPresenter {
    fn spawn_visual(&mut self, entity: &Entity, role: VisualRole) -> RenderHandle {
        let handle = self.handles.allocate();
        trace!(
            handle = handle.raw(),
            id = %entity.id,
            role = role.as_str(),
            "visual_spawned"
        );
        self.visuals.insert(
            handle,
            VisualRecord {
                role,
                parent: None,
                spatial: entity.spatial,
            },
        );
        handle
    }

    fn spawn_part(
        &mut self,
        parent: Option<RenderHandle>,
        role: VisualRole,
        spatial: &Spatial,
    ) -> RenderHandle {
        let handle = self.handles.allocate();
        trace!(handle = handle.raw(), role = role.as_str(), "part_spawned");
        self.visuals.insert(
            handle,
            VisualRecord {
                role,
                parent,
                spatial: *spatial,
            },
        );
        handle
    }

    fn despawn_visual(&mut self, handle: RenderHandle) {
        self.visuals.remove(&handle);
        self.visuals
            .retain(|_, record| record.parent != Some(handle));
        trace!(handle = handle.raw(), "visual_despawned");
    }

    fn move_visual(&mut self, handle: RenderHandle, spatial: &Spatial) {
        if let Some(record) = self.visuals.get_mut(&handle) {
            record.spatial = *spatial;
        }
    }

    fn effect_started(&mut self, kind: EffectKind, burst: &Burst) {
        self.effects_started = self.effects_started.saturating_add(1);
        trace!(
            kind = ?kind,
            x = burst.position.x,
            y = burst.position.y,
            z = burst.position.z,
            "effect_started"
        );
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn despawning_parent_drops_parts() {
        let mut presenter = HeadlessPresenter::new();
        let slab = presenter.spawn_part(None, VisualRole::Platform, &Spatial::default());
        let door = presenter.spawn_part(
            Some(slab),
            VisualRole::Door,
            &Spatial::at(Vec3::new(0.0, 4.0, 4.0), Vec3::ONE),
        );
        assert_ne!(slab, door);
        assert_eq!(presenter.live_count(), 2);

        presenter.move_visual(door, &Spatial::at(Vec3::new(0.0, 1.0, 4.0), Vec3::ONE));
        assert_eq!(
            presenter.visual(door).map(|record| record.spatial.position.y),
            Some(1.0)
        );

        presenter.despawn_visual(slab);
        assert_eq!(presenter.live_count(), 0);
    }
}
