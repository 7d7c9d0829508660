//! Camera controllers driven by [`InputState`].

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Vec2, Vec3};

use super::camera::{Camera, CameraDirection};
use crate::input::{InputState, Key, MouseButton};

/// Something that moves a camera in response to input once per frame.
pub trait CameraControls {
    fn process_input(&mut self, camera: &mut Camera, input: &InputState, delta_time: f32);

    fn resize(&mut self, _width: u32, _height: u32) {}
}

// ============================================================================
// Fly
// ============================================================================

/// First-person controls.
///
/// `WASD` moves in the view plane, `E`/`Q` move up and down. The mouse turns
/// the camera while the left button is held, or always when the cursor is
/// captured. Scrolling zooms.
#[derive(Debug, Clone)]
pub struct FlyCameraControls {
    pub constrain_pitch: bool,
    pub require_drag: bool,
}

impl Default for FlyCameraControls {
    fn default() -> Self {
        Self { constrain_pitch: true, require_drag: true }
    }
}

impl FlyCameraControls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

const FLY_BINDINGS: [(Key, CameraDirection); 6] = [
    (Key::W, CameraDirection::Forward),
    (Key::S, CameraDirection::Backward),
    (Key::A, CameraDirection::Left),
    (Key::D, CameraDirection::Right),
    (Key::E, CameraDirection::Up),
    (Key::Q, CameraDirection::Down),
];

impl CameraControls for FlyCameraControls {
    fn process_input(&mut self, camera: &mut Camera, input: &InputState, delta_time: f32) {
        for (key, direction) in FLY_BINDINGS {
            if input.is_key_pressed(key) {
                camera.move_in(direction, delta_time);
            }
        }

        let looking = input.mouse_captured()
            || !self.require_drag
            || input.is_button_pressed(MouseButton::Left);
        let delta = input.cursor_delta();
        if looking && delta != Vec2::ZERO {
            // Screen y grows downwards.
            camera.rotate(delta.x, -delta.y, self.constrain_pitch);
        }

        let scroll = input.scroll_delta().y;
        if scroll != 0.0 {
            camera.zoom(scroll);
        }
    }
}

// ============================================================================
// Orbit
// ============================================================================

/// Orbits the camera around a target point.
///
/// Left drag rotates, right drag pans the target, scrolling changes the
/// distance. Rotation is damped over time when `enable_damping` is set.
#[derive(Debug, Clone)]
pub struct OrbitCameraControls {
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub damping_factor: f32,
    pub enable_damping: bool,
    pub min_distance: f32,
    pub max_distance: f32,

    pub center: Vec3,
    pub radius: f32,
    /// Azimuth around +Y, radians.
    pub theta: f32,
    /// Polar angle from +Y, radians.
    pub phi: f32,

    rotate_delta: Vec2,
    screen_height: f32,
}

impl OrbitCameraControls {
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            rotate_speed: 1.0,
            zoom_speed: 0.05,
            pan_speed: 1.0,
            damping_factor: 0.05,
            enable_damping: true,
            min_distance: 1.0,
            max_distance: 1000.0,

            center,
            radius,
            theta: 0.0,
            phi: FRAC_PI_2,

            rotate_delta: Vec2::ZERO,
            screen_height: 0.0,
        }
    }

    fn offset_direction(&self) -> Vec3 {
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        Vec3::new(sin_phi * sin_theta, cos_phi, sin_phi * cos_theta)
    }

    /// Camera position for the current orbit state.
    #[must_use]
    pub fn eye(&self) -> Vec3 {
        self.center + self.offset_direction() * self.radius
    }
}

impl CameraControls for OrbitCameraControls {
    fn process_input(&mut self, camera: &mut Camera, input: &InputState, delta_time: f32) {
        let window_height = input.window_size().1 as f32;
        let screen_height = if window_height > 0.0 { window_height } else { self.screen_height };
        let screen_height = screen_height.max(1.0);
        let delta = input.cursor_delta();

        if input.is_button_pressed(MouseButton::Left) {
            let rotate_per_pixel = 2.0 * PI / screen_height;
            self.rotate_delta -= delta * rotate_per_pixel * self.rotate_speed;
        }

        if self.enable_damping {
            let retention = (1.0 - self.damping_factor).powf(delta_time * 60.0);
            let applied = self.rotate_delta * (1.0 - retention);
            self.theta += applied.x;
            self.phi += applied.y;
            self.rotate_delta *= retention;
        } else {
            self.theta += self.rotate_delta.x;
            self.phi += self.rotate_delta.y;
            self.rotate_delta = Vec2::ZERO;
        }

        const EPS: f32 = 0.0001;
        self.phi = self.phi.clamp(EPS, PI - EPS);

        let scroll = input.scroll_delta().y;
        if scroll != 0.0 {
            let scale = (1.0 - self.zoom_speed).powf(scroll.abs());
            if scroll > 0.0 {
                self.radius *= scale;
            } else {
                self.radius /= scale;
            }
            self.radius = self.radius.clamp(self.min_distance, self.max_distance);
        }

        if input.is_button_pressed(MouseButton::Right) {
            let half_fov = camera.fov().to_radians() / 2.0;
            let world_height = 2.0 * self.radius * half_fov.tan();
            let pixels_to_world = world_height / screen_height;

            let forward = -self.offset_direction();
            let right = forward.cross(Vec3::Y).normalize_or_zero();
            let up = right.cross(forward).normalize_or_zero();
            self.center += (right * -delta.x + up * delta.y) * pixels_to_world * self.pan_speed;
        }

        camera.set_position(self.eye());
        camera.look_at(self.center);
    }

    fn resize(&mut self, _width: u32, height: u32) {
        self.screen_height = height as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ButtonState;

    #[test]
    fn fly_moves_forward_on_w() {
        let mut camera = Camera::default();
        let mut input = InputState::new();
        input.inject_key(Key::W, ButtonState::Pressed);

        FlyCameraControls::new().process_input(&mut camera, &input, 1.0);
        assert!((camera.position().z + 2.5).abs() < 1e-4, "position {}", camera.position());
    }

    #[test]
    fn fly_ignores_mouse_without_drag() {
        let mut camera = Camera::default();
        let mut input = InputState::new();
        input.inject_cursor_position(0.0, 0.0);
        input.inject_cursor_position(50.0, 0.0);

        FlyCameraControls::new().process_input(&mut camera, &input, 0.016);
        assert_eq!(camera.yaw(), 270.0);
    }

    #[test]
    fn orbit_keeps_camera_on_sphere() {
        let mut camera = Camera::default();
        let mut controls = OrbitCameraControls::new(Vec3::new(1.0, 2.0, 3.0), 5.0);
        controls.enable_damping = false;
        controls.process_input(&mut camera, &InputState::new(), 0.016);

        let distance = camera.position().distance(controls.center);
        assert!((distance - 5.0).abs() < 1e-4, "distance {distance}");
        let to_center = (controls.center - camera.position()).normalize();
        assert!((camera.front() - to_center).length() < 1e-3);
    }
}
