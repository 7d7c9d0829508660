//! Perspective camera.
//!
//! Orientation is kept as yaw/pitch in degrees; the basis vectors are derived
//! from them. Yaw 270 looks down -Z. The camera is a [`UniformSource`] for
//! `view` and `projection`, and a [`ViewSource`] for light registries.

use glam::{Mat4, Vec3};

use super::light::ViewSource;
use crate::errors::Result;
use crate::shader::{ShaderProgram, UniformSource};

pub const DEFAULT_YAW: f32 = 270.0;
pub const DEFAULT_PITCH: f32 = 0.0;
pub const DEFAULT_SPEED: f32 = 2.5;
pub const DEFAULT_SENSITIVITY: f32 = 0.1;
pub const DEFAULT_FOV: f32 = 45.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 100.0;

pub const MIN_FOV: f32 = 1.0;
pub const MAX_FOV: f32 = 45.0;
pub const MAX_PITCH: f32 = 89.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraDirection {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    front: Vec3,
    up: Vec3,
    right: Vec3,
    world_up: Vec3,

    yaw: f32,
    pitch: f32,
    speed: f32,
    sensitivity: f32,
    fov: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

impl Camera {
    #[must_use]
    pub fn new(position: Vec3) -> Self {
        let mut camera = Self {
            position,
            front: Vec3::NEG_Z,
            up: Vec3::Y,
            right: Vec3::X,
            world_up: Vec3::Y,
            yaw: DEFAULT_YAW,
            pitch: DEFAULT_PITCH,
            speed: DEFAULT_SPEED,
            sensitivity: DEFAULT_SENSITIVITY,
            fov: DEFAULT_FOV,
            aspect_ratio: 4.0 / 3.0,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        };
        camera.update_vectors();
        camera
    }

    #[must_use]
    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Sets the orientation in degrees. Pitch is clamped to +-89.
    #[must_use]
    pub fn with_orientation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw.rem_euclid(360.0);
        self.pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
        self.update_vectors();
        self
    }

    #[must_use]
    pub fn with_clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    fn update_vectors(&mut self) {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        let front = Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos());
        self.front = front.normalize();
        self.right = self.front.cross(self.world_up).normalize();
        self.up = self.right.cross(self.front).normalize();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    #[must_use]
    pub fn front(&self) -> Vec3 {
        self.front
    }

    #[must_use]
    pub fn up(&self) -> Vec3 {
        self.up
    }

    #[must_use]
    pub fn right(&self) -> Vec3 {
        self.right
    }

    #[must_use]
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    #[must_use]
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Vertical field of view in degrees.
    #[must_use]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    #[must_use]
    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = aspect_ratio;
    }

    #[must_use]
    pub fn near_plane(&self) -> f32 {
        self.near
    }

    #[must_use]
    pub fn far_plane(&self) -> f32 {
        self.far
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    // ------------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------------

    pub fn move_in(&mut self, direction: CameraDirection, delta_time: f32) {
        let velocity = self.speed * delta_time;
        let offset = match direction {
            CameraDirection::Forward => self.front,
            CameraDirection::Backward => -self.front,
            CameraDirection::Left => -self.right,
            CameraDirection::Right => self.right,
            CameraDirection::Up => self.up,
            CameraDirection::Down => -self.up,
        };
        self.position += offset * velocity;
    }

    /// Turns by mouse offsets (scaled by the sensitivity). Yaw wraps into
    /// `[0, 360)`.
    pub fn rotate(&mut self, x_offset: f32, y_offset: f32, constrain_pitch: bool) {
        self.yaw = (self.yaw + x_offset * self.sensitivity).rem_euclid(360.0);
        self.pitch += y_offset * self.sensitivity;
        if constrain_pitch {
            self.pitch = self.pitch.clamp(-MAX_PITCH, MAX_PITCH);
        }
        self.update_vectors();
    }

    /// Narrows the field of view by `offset` degrees, within `[1, 45]`.
    pub fn zoom(&mut self, offset: f32) {
        self.fov = (self.fov - offset).clamp(MIN_FOV, MAX_FOV);
    }

    /// Turns the camera to face `center`.
    pub fn look_at(&mut self, center: Vec3) {
        let direction = (center - self.position).normalize_or_zero();
        if direction == Vec3::ZERO {
            return;
        }
        self.pitch = direction.y.clamp(-1.0, 1.0).asin().to_degrees();
        self.yaw = (-direction.x.atan2(direction.z).to_degrees()).rem_euclid(360.0) + 90.0;
        self.update_vectors();
    }

    // ------------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn view_transform(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    #[must_use]
    pub fn projection_transform(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect_ratio, self.near, self.far)
    }
}

impl UniformSource for Camera {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        shader.set_mat4("view", self.view_transform());
        shader.set_mat4("projection", self.projection_transform());
        Ok(())
    }
}

impl ViewSource for Camera {
    fn view_transform(&self) -> Mat4 {
        Camera::view_transform(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.front() - Vec3::NEG_Z).length() < EPSILON);
        assert!((camera.right() - Vec3::X).length() < EPSILON);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate(0.0, 10_000.0, true);
        assert!((camera.pitch() - MAX_PITCH).abs() < EPSILON);
    }

    #[test]
    fn zoom_stays_in_range() {
        let mut camera = Camera::default();
        camera.zoom(100.0);
        assert_eq!(camera.fov(), MIN_FOV);
        camera.zoom(-100.0);
        assert_eq!(camera.fov(), MAX_FOV);
    }

    #[test]
    fn look_at_faces_target() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0));
        camera.look_at(Vec3::new(3.0, 1.0, 0.0));
        let expected = (Vec3::new(3.0, 1.0, 0.0) - camera.position()).normalize();
        assert!((camera.front() - expected).length() < 1e-3, "front {}", camera.front());
    }
}
