//! Platform-Agnostic Input State
//!
//! [`InputState`] is what camera controls read each frame. A window adapter
//! (see `app::input_adapter` behind the `winit` feature) feeds it raw events;
//! tests feed it directly:
//!
//! ```rust,ignore
//! let mut input = InputState::new();
//! input.inject_key(Key::W, ButtonState::Pressed);
//! controls.process_input(&mut camera, &input, 0.016);
//! input.start_frame();
//! ```

use glam::Vec2;
use rustc_hash::FxHashSet;

/// Keys the engine's controls and demos care about.
#[rustfmt::skip]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,

    Digit0, Digit1, Digit2, Digit3, Digit4,
    Digit5, Digit6, Digit7, Digit8, Digit9,

    Space,
    Enter,
    Escape,
    Tab,
    Backspace,

    ShiftLeft,
    ShiftRight,
    ControlLeft,
    ControlRight,
    AltLeft,
    AltRight,

    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Keyboard, mouse and window state for the current frame.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pressed_keys: FxHashSet<Key>,
    just_pressed_keys: FxHashSet<Key>,
    just_released_keys: FxHashSet<Key>,

    pressed_buttons: FxHashSet<MouseButton>,
    just_pressed_buttons: FxHashSet<MouseButton>,
    just_released_buttons: FxHashSet<MouseButton>,

    cursor_position: Option<Vec2>,
    cursor_delta: Vec2,
    scroll_delta: Vec2,

    window_size: (u32, u32),
    mouse_captured: bool,
}

impl InputState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the per-frame edges and deltas.
    pub fn start_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.just_released_keys.clear();
        self.just_pressed_buttons.clear();
        self.just_released_buttons.clear();
        self.cursor_delta = Vec2::ZERO;
        self.scroll_delta = Vec2::ZERO;
    }

    // ========================================================================
    // Injection
    // ========================================================================

    pub fn inject_key(&mut self, key: Key, state: ButtonState) {
        match state {
            ButtonState::Pressed => {
                if self.pressed_keys.insert(key) {
                    self.just_pressed_keys.insert(key);
                }
            }
            ButtonState::Released => {
                if self.pressed_keys.remove(&key) {
                    self.just_released_keys.insert(key);
                }
            }
        }
    }

    pub fn inject_mouse_button(&mut self, button: MouseButton, state: ButtonState) {
        match state {
            ButtonState::Pressed => {
                if self.pressed_buttons.insert(button) {
                    self.just_pressed_buttons.insert(button);
                }
            }
            ButtonState::Released => {
                if self.pressed_buttons.remove(&button) {
                    self.just_released_buttons.insert(button);
                }
            }
        }
    }

    /// Records a cursor position in window pixels (y down). The first position
    /// only seeds the tracker and produces no delta.
    pub fn inject_cursor_position(&mut self, x: f32, y: f32) {
        let position = Vec2::new(x, y);
        if let Some(last) = self.cursor_position {
            self.cursor_delta += position - last;
        }
        self.cursor_position = Some(position);
    }

    pub fn inject_scroll(&mut self, dx: f32, dy: f32) {
        self.scroll_delta += Vec2::new(dx, dy);
    }

    pub fn inject_resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    pub fn set_mouse_captured(&mut self, captured: bool) {
        self.mouse_captured = captured;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn is_key_pressed(&self, key: Key) -> bool {
        self.pressed_keys.contains(&key)
    }

    #[must_use]
    pub fn is_key_just_pressed(&self, key: Key) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    #[must_use]
    pub fn is_key_just_released(&self, key: Key) -> bool {
        self.just_released_keys.contains(&key)
    }

    #[must_use]
    pub fn is_button_pressed(&self, button: MouseButton) -> bool {
        self.pressed_buttons.contains(&button)
    }

    #[must_use]
    pub fn is_button_just_pressed(&self, button: MouseButton) -> bool {
        self.just_pressed_buttons.contains(&button)
    }

    #[must_use]
    pub fn is_button_just_released(&self, button: MouseButton) -> bool {
        self.just_released_buttons.contains(&button)
    }

    #[must_use]
    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor_position
    }

    /// Cursor movement since the last [`start_frame`](Self::start_frame), y down.
    #[must_use]
    pub fn cursor_delta(&self) -> Vec2 {
        self.cursor_delta
    }

    #[must_use]
    pub fn scroll_delta(&self) -> Vec2 {
        self.scroll_delta
    }

    #[must_use]
    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    #[must_use]
    pub fn mouse_captured(&self) -> bool {
        self.mouse_captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_edges_last_one_frame() {
        let mut input = InputState::new();
        input.inject_key(Key::W, ButtonState::Pressed);
        assert!(input.is_key_pressed(Key::W));
        assert!(input.is_key_just_pressed(Key::W));

        input.start_frame();
        assert!(input.is_key_pressed(Key::W));
        assert!(!input.is_key_just_pressed(Key::W));

        input.inject_key(Key::W, ButtonState::Released);
        assert!(input.is_key_just_released(Key::W));
        assert!(!input.is_key_pressed(Key::W));
    }

    #[test]
    fn first_cursor_position_has_no_delta() {
        let mut input = InputState::new();
        input.inject_cursor_position(100.0, 50.0);
        assert_eq!(input.cursor_delta(), Vec2::ZERO);
        input.inject_cursor_position(110.0, 45.0);
        assert_eq!(input.cursor_delta(), Vec2::new(10.0, -5.0));
    }
}
