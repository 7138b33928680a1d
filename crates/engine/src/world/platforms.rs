use glam::Vec3;

use crate::registry::{EntityId, RenderHandle};

pub const PLATFORM_SPACING: f32 = 10.0;
pub const PLATFORM_HALF_EXTENTS: Vec3 = Vec3::new(10.0, 0.125, 4.0);
pub const DOOR_HALF_EXTENTS: Vec3 = Vec3::new(10.0, 4.0, 0.125);
/// Door position relative to its platform, before the vertical offset.
pub const DOOR_ANCHOR: Vec3 = Vec3::new(0.0, 0.0, 4.0);
pub const DOOR_START_OFFSET: f32 = 4.0;
pub const DOOR_FALL_PER_SECOND: f32 = 4.0;
/// Below this offset the doorway is passable.
pub const DOOR_CLEAR_OFFSET: f32 = -5.0;
/// The door stops and is hidden here.
pub const DOOR_REST_OFFSET: f32 = -25.0;
pub const SAFE_ANCHOR_HEIGHT: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformIndex(usize);

impl PlatformIndex {
    pub const START: PlatformIndex = PlatformIndex(0);

    pub const fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchPart {
    pub handle: RenderHandle,
    /// Offset from the predecessor's door center.
    pub local: Vec3,
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    /// `None` only for the start platform.
    pub stage_id: Option<EntityId>,
    pub name: String,
    pub position: Vec3,
    pub slab: RenderHandle,
    pub door: Option<RenderHandle>,
    pub next: Option<PlatformIndex>,
    pub opening: bool,
    pub door_offset: f32,
    pub door_cleared: bool,
    /// Switch on the predecessor's door that opens the way here.
    pub switch: Option<SwitchPart>,
}

impl Platform {
    pub fn new(
        stage_id: Option<EntityId>,
        name: impl Into<String>,
        position: Vec3,
        slab: RenderHandle,
    ) -> Self {
        Self {
            stage_id,
            name: name.into(),
            position,
            slab,
            door: None,
            next: None,
            opening: false,
            door_offset: DOOR_START_OFFSET,
            door_cleared: false,
            switch: None,
        }
    }

    pub fn door_center(&self) -> Vec3 {
        self.position + DOOR_ANCHOR + Vec3::Y * self.door_offset
    }

    pub fn safe_anchor(&self) -> Vec3 {
        self.position + Vec3::Y * SAFE_ANCHOR_HEIGHT
    }

    pub fn door_at_rest(&self) -> bool {
        self.door_offset <= DOOR_REST_OFFSET
    }
}

/// What one tick of door animation did to a platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoorStep {
    pub moved: bool,
    pub cleared: bool,
    pub came_to_rest: bool,
}

/// Platforms in creation order, linked forward by `next`.
///
/// The current platform is an explicit index, so exactly one platform is
/// current at any time. Links only ever point at later arena slots, which
/// keeps the chain acyclic.
#[derive(Debug, Clone)]
pub struct PlatformChain {
    platforms: Vec<Platform>,
    current: PlatformIndex,
    tail: PlatformIndex,
}

impl PlatformChain {
    pub fn new(start: Platform) -> Self {
        Self {
            platforms: vec![start],
            current: PlatformIndex::START,
            tail: PlatformIndex::START,
        }
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn current_index(&self) -> PlatformIndex {
        self.current
    }

    pub fn current(&self) -> &Platform {
        &self.platforms[self.current.0]
    }

    pub fn tail_index(&self) -> PlatformIndex {
        self.tail
    }

    pub fn tail(&self) -> &Platform {
        &self.platforms[self.tail.0]
    }

    pub fn get(&self, index: PlatformIndex) -> Option<&Platform> {
        self.platforms.get(index.0)
    }

    pub fn get_mut(&mut self, index: PlatformIndex) -> Option<&mut Platform> {
        self.platforms.get_mut(index.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlatformIndex, &Platform)> {
        self.platforms
            .iter()
            .enumerate()
            .map(|(index, platform)| (PlatformIndex(index), platform))
    }

    /// Appends a platform and links it after the current tail.
    pub fn push(&mut self, platform: Platform) -> PlatformIndex {
        let index = PlatformIndex(self.platforms.len());
        self.platforms.push(platform);
        self.platforms[self.tail.0].next = Some(index);
        self.tail = index;
        index
    }

    pub fn find_stage(&self, id: &EntityId) -> Option<PlatformIndex> {
        self.platforms
            .iter()
            .position(|platform| platform.stage_id.as_ref() == Some(id))
            .map(PlatformIndex)
    }

    /// The platform whose `next` is `index`.
    pub fn predecessor(&self, index: PlatformIndex) -> Option<PlatformIndex> {
        self.platforms
            .iter()
            .position(|platform| platform.next == Some(index))
            .map(PlatformIndex)
    }

    /// Indices reached by following `next` from the start platform.
    pub fn walk(&self) -> Vec<PlatformIndex> {
        let mut visited = Vec::with_capacity(self.platforms.len());
        let mut cursor = Some(PlatformIndex::START);
        while let Some(index) = cursor {
            if visited.len() > self.platforms.len() {
                break;
            }
            visited.push(index);
            cursor = self.platforms.get(index.0).and_then(|platform| platform.next);
        }
        visited
    }

    /// Moves `current` forward across every platform whose door is opening.
    /// Returns the new current index when it changed.
    pub fn promote(&mut self) -> Option<PlatformIndex> {
        let before = self.current;
        while let Some(next) = self
            .current()
            .opening
            .then(|| self.current().next)
            .flatten()
        {
            self.current = next;
        }
        (self.current != before).then_some(self.current)
    }

    /// Lowers every opening door by `DOOR_FALL_PER_SECOND * dt`.
    pub fn animate_doors(&mut self, dt: f32) -> Vec<(PlatformIndex, DoorStep)> {
        let mut steps = Vec::new();
        for (index, platform) in self.platforms.iter_mut().enumerate() {
            if !platform.opening || platform.door_at_rest() {
                continue;
            }
            let mut step = DoorStep {
                moved: true,
                ..DoorStep::default()
            };
            platform.door_offset =
                (platform.door_offset - DOOR_FALL_PER_SECOND * dt).max(DOOR_REST_OFFSET);
            if !platform.door_cleared && platform.door_offset <= DOOR_CLEAR_OFFSET {
                platform.door_cleared = true;
                step.cleared = true;
            }
            if platform.door_at_rest() {
                step.came_to_rest = true;
            }
            steps.push((PlatformIndex(index), step));
        }
        steps
    }
}
