use winit::event::{ElementState, MouseButton};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    MoveForward,
    MoveBack,
    MoveLeft,
    MoveRight,
    Jump,
    Quit,
}

const ACTION_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ActionStates {
    down: [bool; ACTION_COUNT],
}

impl ActionStates {
    pub(crate) fn set(&mut self, action: InputAction, is_down: bool) {
        self.down[action.index()] = is_down;
    }

    pub(crate) fn is_down(&self, action: InputAction) -> bool {
        self.down[action.index()]
    }
}

impl InputAction {
    const fn index(self) -> usize {
        match self {
            InputAction::MoveForward => 0,
            InputAction::MoveBack => 1,
            InputAction::MoveLeft => 2,
            InputAction::MoveRight => 3,
            InputAction::Jump => 4,
            InputAction::Quit => 5,
        }
    }
}

/// Input for one simulation tick. Held actions stay set while the key is
/// down; presses and the pointer delta are consumed by the tick that reads
/// them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSnapshot {
    quit_requested: bool,
    actions: ActionStates,
    fire_pressed: bool,
    toggle_view_pressed: bool,
    pointer_delta: (f32, f32),
}

impl InputSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn is_down(&self, action: InputAction) -> bool {
        self.actions.is_down(action)
    }

    pub fn fire_pressed(&self) -> bool {
        self.fire_pressed
    }

    pub fn toggle_view_pressed(&self) -> bool {
        self.toggle_view_pressed
    }

    pub fn pointer_delta(&self) -> (f32, f32) {
        self.pointer_delta
    }

    pub fn with_action_down(mut self, action: InputAction, is_down: bool) -> Self {
        self.actions.set(action, is_down);
        self
    }

    pub fn with_fire_pressed(mut self, fire_pressed: bool) -> Self {
        self.fire_pressed = fire_pressed;
        self
    }

    pub fn with_toggle_view_pressed(mut self, toggle_view_pressed: bool) -> Self {
        self.toggle_view_pressed = toggle_view_pressed;
        self
    }

    pub fn with_pointer_delta(mut self, dx: f32, dy: f32) -> Self {
        self.pointer_delta = (dx, dy);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct InputCollector {
    pub(crate) quit_requested: bool,
    action_states: ActionStates,
    toggle_view_is_down: bool,
    toggle_view_pressed_edge: bool,
    left_mouse_is_down: bool,
    fire_pressed_edge: bool,
    pending_pointer_delta: (f32, f32),
}

impl InputCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_quit_requested(&mut self) {
        self.quit_requested = true;
    }

    pub(crate) fn handle_keyboard_input(&mut self, key_event: &winit::event::KeyEvent) {
        let is_pressed = key_event.state == ElementState::Pressed;
        self.update_action_state_from_physical_key(key_event.physical_key, is_pressed);
        self.handle_toggle_view_key_state(
            key_event.physical_key == PhysicalKey::Code(KeyCode::KeyT),
            key_event.state,
        );
    }

    pub(crate) fn update_action_state_from_physical_key(
        &mut self,
        physical_key: PhysicalKey,
        is_pressed: bool,
    ) {
        match physical_key {
            PhysicalKey::Code(KeyCode::KeyW) | PhysicalKey::Code(KeyCode::ArrowUp) => {
                self.action_states.set(InputAction::MoveForward, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyS) | PhysicalKey::Code(KeyCode::ArrowDown) => {
                self.action_states.set(InputAction::MoveBack, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyA) | PhysicalKey::Code(KeyCode::ArrowLeft) => {
                self.action_states.set(InputAction::MoveLeft, is_pressed);
            }
            PhysicalKey::Code(KeyCode::KeyD) | PhysicalKey::Code(KeyCode::ArrowRight) => {
                self.action_states.set(InputAction::MoveRight, is_pressed);
            }
            PhysicalKey::Code(KeyCode::Space) => {
                self.action_states.set(InputAction::Jump, is_pressed);
            }
            PhysicalKey::Code(KeyCode::Escape) => {
                self.action_states.set(InputAction::Quit, is_pressed);
                if is_pressed {
                    self.mark_quit_requested();
                }
            }
            _ => {}
        }
    }

    fn handle_toggle_view_key_state(&mut self, is_toggle_key: bool, state: ElementState) {
        if !is_toggle_key {
            return;
        }
        match state {
            ElementState::Pressed => {
                if !self.toggle_view_is_down {
                    self.toggle_view_pressed_edge = true;
                }
                self.toggle_view_is_down = true;
            }
            ElementState::Released => self.toggle_view_is_down = false,
        }
    }

    pub(crate) fn handle_mouse_input(&mut self, button: MouseButton, state: ElementState) {
        if button != MouseButton::Left {
            return;
        }
        match state {
            ElementState::Pressed => {
                if !self.left_mouse_is_down {
                    self.fire_pressed_edge = true;
                }
                self.left_mouse_is_down = true;
            }
            ElementState::Released => self.left_mouse_is_down = false,
        }
    }

    pub(crate) fn handle_pointer_motion(&mut self, dx: f64, dy: f64) {
        self.pending_pointer_delta.0 += dx as f32;
        self.pending_pointer_delta.1 += dy as f32;
    }

    pub(crate) fn snapshot_for_tick(&mut self) -> InputSnapshot {
        let snapshot = InputSnapshot {
            quit_requested: self.quit_requested,
            actions: self.action_states,
            fire_pressed: self.fire_pressed_edge,
            toggle_view_pressed: self.toggle_view_pressed_edge,
            pointer_delta: self.pending_pointer_delta,
        };
        self.fire_pressed_edge = false;
        self.toggle_view_pressed_edge = false;
        self.pending_pointer_delta = (0.0, 0.0);
        snapshot
    }
}
