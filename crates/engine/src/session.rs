use std::time::Duration;

use tracing::{debug, info};

use crate::app::InputSnapshot;
use crate::clock::SimTime;
use crate::collision::CollisionWorld;
use crate::effects::{Burst, EffectKind, TransientEffects};
use crate::player::{look_rotation, PlayerController, Viewpoint};
use crate::presentation::Presenter;
use crate::protocol::{Connection, InboundMessage, Outbox, TransportError};
use crate::registry::{EntityId, EntityRegistry};
use crate::targeting::{laser_strikes, Targeting};
use crate::workflow::WorkflowBook;
use crate::world::{ModeKind, WorldContext, WorldMode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub inbound_messages: u64,
    pub unknown_messages: u64,
    pub laser_strikes: u64,
}

/// Everything one game session owns. Mutated only through
/// [`Session::handle_message`] and [`Session::tick`].
pub struct Session<P: Presenter> {
    registry: EntityRegistry,
    collision: CollisionWorld,
    player: PlayerController,
    targeting: Targeting,
    effects: TransientEffects,
    workflows: WorkflowBook,
    mode: Box<dyn WorldMode>,
    presenter: P,
    connection: Connection,
    outbox: Outbox,
    inbound: Vec<InboundMessage>,
    elapsed: Duration,
    now: SimTime,
    stats: SessionStats,
}

impl<P: Presenter> Session<P> {
    /// Loads the mode's initial scene. Call [`Session::connect`] to start
    /// talking to the server.
    pub fn new(mut mode: Box<dyn WorldMode>, mut presenter: P, connection: Connection) -> Self {
        let mut registry = EntityRegistry::new();
        let mut effects = TransientEffects::default();
        let mut outbox = Outbox::new();
        let mut player = PlayerController::new(mode.motion_profile(), glam::Vec3::ZERO);
        {
            let mut ctx = WorldContext {
                registry: &mut registry,
                presenter: &mut presenter,
                effects: &mut effects,
                outbox: &mut outbox,
                now: SimTime::ZERO,
            };
            mode.load(&mut ctx, &mut player);
        }

        let mut session = Self {
            registry,
            collision: CollisionWorld::new(),
            player,
            targeting: Targeting::default(),
            effects,
            workflows: WorkflowBook::new(),
            mode,
            presenter,
            connection,
            outbox,
            inbound: Vec::new(),
            elapsed: Duration::ZERO,
            now: SimTime::ZERO,
            stats: SessionStats::default(),
        };
        session.rebuild_collision_if_dirty();
        info!(mode = session.mode.kind().as_str(), "session_started");
        session
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.connection.connect()
    }

    pub fn handle_message(&mut self, message: InboundMessage) {
        self.stats.inbound_messages = self.stats.inbound_messages.saturating_add(1);
        let mut ctx = WorldContext {
            registry: &mut self.registry,
            presenter: &mut self.presenter,
            effects: &mut self.effects,
            outbox: &mut self.outbox,
            now: self.now,
        };
        match message {
            InboundMessage::Activity(payload) => {
                self.workflows.record_activity(&payload);
                self.mode.add_activity(&mut ctx, payload);
            }
            InboundMessage::ActivityStarted { id } => {
                self.mode.remove_activity(&mut ctx, &id);
                self.forget_if_gone(&id);
            }
            InboundMessage::Stage(payload) => {
                self.workflows.set_current_stage(&payload);
                self.mode.add_transition(&mut ctx, payload);
            }
            InboundMessage::StageEntered { id } => {
                self.mode.remove_transition(&mut ctx, &id);
                self.forget_if_gone(&id);
            }
            InboundMessage::RequirementsFulfilled(fulfilled) => {
                debug!(
                    workflow = fulfilled.workflow.id(),
                    count = fulfilled.requirements.len(),
                    "requirements_fulfilled"
                );
                self.workflows.record_requirements(&fulfilled);
            }
            InboundMessage::Unknown(value) => {
                self.stats.unknown_messages = self.stats.unknown_messages.saturating_add(1);
                debug!(message = %value, "unknown_message_ignored");
            }
        }
    }

    /// Advances the session by `dt`: inbound messages first, then controls,
    /// physics, targeting, shooting, mode logic, collision rebuild, effect
    /// sweeps, and finally outbound sends.
    pub fn tick(&mut self, input: &InputSnapshot, dt: Duration) {
        self.elapsed += dt;
        self.now = SimTime::from_elapsed(self.elapsed);
        let dt_seconds = dt.as_secs_f32();
        self.stats.ticks = self.stats.ticks.saturating_add(1);

        let mut inbound = std::mem::take(&mut self.inbound);
        self.connection.poll(&mut inbound);
        for message in inbound.drain(..) {
            self.handle_message(message);
        }
        self.inbound = inbound;

        self.mode.apply_controls(input, &mut self.player, dt_seconds);
        self.player.step(dt_seconds, &self.collision);
        self.player.recover_if_fallen();

        let aim = self.mode.aim_ray(&self.player);
        self.targeting
            .update(&aim, self.mode.active_group(), &self.registry);

        let mut ctx = WorldContext {
            registry: &mut self.registry,
            presenter: &mut self.presenter,
            effects: &mut self.effects,
            outbox: &mut self.outbox,
            now: self.now,
        };
        if input.fire_pressed() {
            self.mode.shoot(
                &mut ctx,
                &self.player,
                self.targeting.current(),
                &self.collision,
            );
        }

        ctx.effects.advance_lasers(dt_seconds);
        self.mode.tick(&mut ctx, &mut self.player, dt_seconds);
        let strikes = laser_strikes(&ctx.effects.lasers, self.mode.active_group(), &*ctx.registry);
        for strike in strikes {
            ctx.effects.lasers.remove(strike.bolt);
            ctx.burst(
                EffectKind::Spark,
                Burst::oriented(strike.point, Some(look_rotation(strike.normal))),
            );
            let Some(id) = strike.entity else {
                debug!("laser_strike_unbound");
                continue;
            };
            debug!(id = %id, "laser_strike");
            ctx.outbox.send_id(id);
            self.stats.laser_strikes = self.stats.laser_strikes.saturating_add(1);
        }

        self.rebuild_collision_if_dirty();
        self.effects.poll(self.now);
        self.outbox.flush_into(&mut self.connection);
    }

    fn rebuild_collision_if_dirty(&mut self) {
        if !self.mode.take_geometry_dirty() {
            return;
        }
        let mut triangles = self.mode.static_geometry();
        triangles.extend(self.presenter.extra_static_geometry());
        self.collision.rebuild(triangles);
    }

    fn forget_if_gone(&mut self, id: &EntityId) {
        if !self.registry.contains(id) {
            self.targeting.forget(id);
        }
    }

    pub fn mode_kind(&self) -> ModeKind {
        self.mode.kind()
    }

    pub fn mode(&self) -> &dyn WorldMode {
        self.mode.as_ref()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn collision(&self) -> &CollisionWorld {
        &self.collision
    }

    pub fn player(&self) -> &PlayerController {
        &self.player
    }

    pub fn viewpoint(&self) -> Viewpoint {
        self.mode.viewpoint(&self.player)
    }

    pub fn targeting(&self) -> &Targeting {
        &self.targeting
    }

    pub fn effects(&self) -> &TransientEffects {
        &self.effects
    }

    pub fn workflows(&self) -> &WorkflowBook {
        &self.workflows
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use serde_json::json;

    use super::*;
    use crate::presentation::HeadlessPresenter;
    use crate::protocol::{Handshake, LoopbackHandle, LoopbackTransport};

    const TICK: Duration = Duration::from_millis(16);

    fn session(kind: ModeKind) -> (Session<HeadlessPresenter>, LoopbackHandle) {
        let (transport, server) = LoopbackTransport::pair();
        let connection = Connection::new(Box::new(transport), Handshake::new(None, None, None));
        let mut session = Session::new(kind.build(9), HeadlessPresenter::new(), connection);
        session.connect().expect("connect");
        server.open();
        session.tick(&InputSnapshot::empty(), TICK);
        server.take_sent();
        (session, server)
    }

    #[test]
    fn activity_messages_spawn_and_record_workflow() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({
            "activity": { "id": "a1", "workflow": { "id": "w1", "name": "Policy" } }
        }));
        session.tick(&InputSnapshot::empty(), TICK);

        assert!(session.registry().contains(&EntityId::from("a1")));
        assert_eq!(session.workflows().get("w1").map(|w| w.activities.len()), Some(1));
        assert!(session.collision().octree().triangle_count() > 0);
    }

    #[test]
    fn unknown_messages_are_counted_not_fatal() {
        let (mut session, server) = session(ModeKind::Fps);
        server.push_json(&json!({ "weather": "sunny" }));
        session.tick(&InputSnapshot::empty(), TICK);
        assert_eq!(session.stats().unknown_messages, 1);
    }

    #[test]
    fn laser_strike_reports_rock_and_sparks() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({ "activity": { "id": "a1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        let rock = session
            .registry()
            .get(&EntityId::from("a1"))
            .map(|entity| entity.spatial.position)
            .expect("rock");

        // Fire straight at the rock from inside laser range.
        session.player.teleport(rock - Vec3::new(0.0, 1.0, 20.0));
        session.tick(&InputSnapshot::empty().with_fire_pressed(true), TICK);
        session.tick(&InputSnapshot::empty(), TICK);

        let sent = server.take_sent();
        assert_eq!(sent, vec![r#"{"id":"a1"}"#.to_string()]);
        assert!(session.effects().lasers.is_empty());
        assert_eq!(session.effects().sparks.len(), 1);
        assert_eq!(session.stats().laser_strikes, 1);
    }

    #[test]
    fn lasers_and_crosshair_pass_through_rings() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({ "stage": { "id": "s1" } }));
        server.push_json(&json!({ "activity": { "id": "a1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        let position = |id: &str| {
            session
                .registry()
                .get(&EntityId::from(id))
                .map(|entity| entity.spatial.position)
                .expect("spawned")
        };
        let ring = position("s1");
        let rock = position("a1");

        // Aim through the ring on the side away from the rock.
        let away = (ring - rock).truncate().try_normalize().unwrap_or(glam::Vec2::X) * 12.0;
        let aim = ring + away.extend(0.0);
        session.player.teleport(aim - Vec3::new(0.0, 0.0, 20.0));
        session.tick(&InputSnapshot::empty().with_fire_pressed(true), TICK);
        assert_ne!(session.targeting().current(), Some(&EntityId::from("s1")));

        for _ in 0..70 {
            session.tick(&InputSnapshot::empty(), TICK);
        }
        assert!(server.take_sent().is_empty());
        assert!(session.effects().sparks.is_empty());
        assert!(session.effects().lasers.is_empty());
        assert_eq!(session.stats().laser_strikes, 0);
        assert!(session.registry().contains(&EntityId::from("s1")));
    }

    #[test]
    fn flying_through_ring_sends_its_id_once() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({ "stage": { "id": "s1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        let ring = session
            .registry()
            .get(&EntityId::from("s1"))
            .map(|entity| entity.spatial.position)
            .expect("ring");

        session.player.teleport(ring - Vec3::new(0.0, 1.0, 0.3));
        session.player.set_velocity(Vec3::new(0.0, 0.0, 5.0));
        for _ in 0..20 {
            session.tick(&InputSnapshot::empty(), TICK);
        }

        assert_eq!(server.take_sent(), vec![r#"{"id":"s1"}"#.to_string()]);
        assert!(session.player.position().z > ring.z);
    }

    #[test]
    fn targeting_follows_aim_every_tick() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({ "activity": { "id": "a1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        let rock = session
            .registry()
            .get(&EntityId::from("a1"))
            .map(|entity| entity.spatial.position)
            .expect("rock");

        session.player.teleport(rock - Vec3::new(0.0, 1.0, 25.0));
        session.tick(&InputSnapshot::empty(), TICK);
        assert_eq!(session.targeting().current(), Some(&EntityId::from("a1")));

        server.push_json(&json!({ "activityStarted": { "id": "a1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        assert_eq!(session.targeting().current(), None);
        assert_eq!(session.effects().explosions.len(), 1);
    }

    #[test]
    fn effects_expire_on_tick_time() {
        let (mut session, server) = session(ModeKind::Space);
        server.push_json(&json!({ "activity": { "id": "a1" } }));
        server.push_json(&json!({ "activityStarted": { "id": "a1" } }));
        session.tick(&InputSnapshot::empty(), TICK);
        assert_eq!(session.effects().explosions.len(), 1);

        for _ in 0..70 {
            session.tick(&InputSnapshot::empty(), TICK);
        }
        assert!(session.effects().explosions.is_empty());
    }
}
