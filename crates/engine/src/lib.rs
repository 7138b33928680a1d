//! Client simulation core for the workflow arcade: turns workflow server
//! events into a Space flight shooter or an FPS platform puzzle.

pub mod app;
pub mod clock;
pub mod collision;
pub mod effects;
pub mod player;
pub mod presentation;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod targeting;
pub mod workflow;
pub mod world;

pub use app::{
    run_headless, run_windowed, run_windowed_with_metrics, AppError, InputAction, InputSnapshot,
    LoopConfig, LoopMetricsSnapshot, MetricsHandle, RadarFrame,
};
pub use clock::SimTime;
pub use collision::CollisionWorld;
pub use effects::{EffectKind, TransientEffects};
pub use player::{MotionProfile, PlayerController, Viewpoint};
pub use presentation::{HeadlessPresenter, Presenter, VisualRole};
pub use protocol::{
    Connection, ConnectionState, Handshake, InboundMessage, LoopbackTransport, OutboundMessage,
    Transport, TransportError, TransportEvent, DEFAULT_TIMEOUT_MS,
};
pub use registry::{Entity, EntityId, EntityKind, EntityRegistry, RegistryError, RenderHandle};
pub use session::{Session, SessionStats};
pub use targeting::Targeting;
pub use workflow::WorkflowBook;
pub use world::{ModeKind, ModeParseError, WorldMode};
