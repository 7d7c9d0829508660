//! Lights & the View-Transform Protocol
//!
//! Shaders light fragments in view space, so every light keeps a view-space
//! copy of its position/direction that must be refreshed with
//! [`Light::apply_view_transform`] after any spatial change. Pushing uniforms
//! while that refresh is missing is a [`QuarkError::LightViewTransformNotApplied`]:
//!
//! ```rust,ignore
//! light.borrow_mut().set_position(Vec3::new(1.0, 2.0, 0.0));
//! light.borrow_mut().apply_view_transform(&camera.view_transform());
//! light.borrow_mut().update_uniforms(&shader)?;
//! ```
//!
//! A [`LightRegistry`] with a [`ViewSource`] does the refresh itself on every
//! update.
//!
//! # Change tracking
//!
//! Each light versions its two groups of uniforms: the view-dependent fields
//! and the plain values (colors, attenuation, cone angles). Every program
//! remembers which versions it last received, so a group is written to a
//! program only when it changed since that program's last push. See
//! [`LightDirty`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

use crate::core::backend::ProgramId;
use crate::errors::{QuarkError, Result};
use crate::shader::{ShaderProgram, UniformSource};

pub const DEFAULT_ATTENUATION: Attenuation = Attenuation {
    constant: 1.0,
    linear: 0.09,
    quadratic: 0.032,
};
pub const DEFAULT_AMBIENT: Vec3 = Vec3::splat(0.1);
pub const DEFAULT_DIFFUSE: Vec3 = Vec3::splat(0.5);
pub const DEFAULT_SPECULAR: Vec3 = Vec3::splat(1.0);

/// Spot cone angles in radians.
pub const DEFAULT_INNER_ANGLE: f32 = 10.5_f32.to_radians();
pub const DEFAULT_OUTER_ANGLE: f32 = 19.5_f32.to_radians();

/// Distance falloff `1 / (constant + linear * d + quadratic * d^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        DEFAULT_ATTENUATION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

impl LightKind {
    /// Uniform array holding lights of this kind.
    #[must_use]
    pub fn array_name(self) -> &'static str {
        match self {
            Self::Directional => "qrk_directionalLights",
            Self::Point => "qrk_pointLights",
            Self::Spot => "qrk_spotLights",
        }
    }

    /// Uniform holding the number of lights of this kind.
    #[must_use]
    pub fn count_name(self) -> &'static str {
        match self {
            Self::Directional => "qrk_directionalLightCount",
            Self::Point => "qrk_pointLightCount",
            Self::Spot => "qrk_spotLightCount",
        }
    }
}

/// Which uniform groups of a light a program has not seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightDirty {
    Clean,
    ViewDirty,
    ValueDirty,
    Both,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PushedVersions {
    view: u64,
    value: u64,
}

/// Bookkeeping shared by every light type.
#[derive(Debug, Clone)]
pub struct LightState {
    index: u32,
    uniform_name: String,
    use_view_transform: bool,

    view_dependent_changed: bool,
    view_applied: bool,

    // Versions start at 1 so that a program that never received anything is
    // dirty in both groups.
    view_version: u64,
    value_version: u64,
    pushed: FxHashMap<ProgramId, PushedVersions>,
}

impl LightState {
    fn new(kind: LightKind) -> Self {
        Self {
            index: 0,
            uniform_name: format!("{}[0]", kind.array_name()),
            use_view_transform: true,
            view_dependent_changed: true,
            view_applied: false,
            view_version: 1,
            value_version: 1,
            pushed: FxHashMap::default(),
        }
    }

    /// Slot in the light array of the light's kind.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Prefix of the light's uniforms, e.g. `qrk_pointLights[2]`.
    #[must_use]
    pub fn uniform_name(&self) -> &str {
        &self.uniform_name
    }

    #[must_use]
    pub fn uses_view_transform(&self) -> bool {
        self.use_view_transform
    }

    #[must_use]
    pub fn view_applied(&self) -> bool {
        self.view_applied
    }

    fn set_index(&mut self, kind: LightKind, index: u32) {
        self.index = index;
        self.uniform_name = format!("{}[{index}]", kind.array_name());
        // A new slot has to be filled in every program.
        self.pushed.clear();
    }

    fn mark_view_changed(&mut self) {
        self.view_dependent_changed = true;
        self.view_applied = false;
        self.view_version += 1;
    }

    fn mark_value_changed(&mut self) {
        self.value_version += 1;
    }

    fn view_refreshed(&mut self, changed: bool) {
        self.view_applied = true;
        if changed {
            self.view_version += 1;
        }
    }

    fn dirty(&self, program: ProgramId) -> LightDirty {
        let pushed = self.pushed.get(&program).copied().unwrap_or_default();
        match (pushed.view != self.view_version, pushed.value != self.value_version) {
            (false, false) => LightDirty::Clean,
            (true, false) => LightDirty::ViewDirty,
            (false, true) => LightDirty::ValueDirty,
            (true, true) => LightDirty::Both,
        }
    }

    fn field(&self, field: &str) -> String {
        format!("{}.{field}", self.uniform_name)
    }
}

/// A light source. Implementations provide storage and their uniform
/// layout; the view-transform check and change tracking are shared.
pub trait Light: fmt::Debug {
    fn kind(&self) -> LightKind;

    fn state(&self) -> &LightState;

    fn state_mut(&mut self) -> &mut LightState;

    /// Recomputes view-space values. Returns whether they changed.
    fn transform_to_view(&mut self, view: &Mat4) -> bool;

    /// Writes the view-dependent uniforms (position and/or direction).
    fn write_view_uniforms(&self, shader: &ShaderProgram);

    /// Writes colors, attenuation and cone angles.
    fn write_value_uniforms(&self, shader: &ShaderProgram);

    fn apply_view_transform(&mut self, view: &Mat4) {
        let changed = self.transform_to_view(view);
        self.state_mut().view_refreshed(changed);
    }

    /// Whether positions are sent in view space (default) or world space.
    fn set_use_view_transform(&mut self, use_view_transform: bool) {
        let state = self.state_mut();
        if state.use_view_transform != use_view_transform {
            state.use_view_transform = use_view_transform;
            state.view_version += 1;
        }
    }

    /// Uniform groups `program` has not received yet.
    fn dirty(&self, program: ProgramId) -> LightDirty {
        self.state().dirty(program)
    }

    /// Pushes the groups that changed since `shader` last received them.
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        let state = self.state();
        if state.view_dependent_changed && !state.view_applied {
            return Err(QuarkError::LightViewTransformNotApplied);
        }

        let dirty = state.dirty(shader.id());
        if matches!(dirty, LightDirty::ViewDirty | LightDirty::Both) {
            self.write_view_uniforms(shader);
        }
        if matches!(dirty, LightDirty::ValueDirty | LightDirty::Both) {
            self.write_value_uniforms(shader);
        }

        let state = self.state_mut();
        state.view_dependent_changed = false;
        let versions = PushedVersions {
            view: state.view_version,
            value: state.value_version,
        };
        state.pushed.insert(shader.id(), versions);
        Ok(())
    }
}

/// Shared handle to any light.
pub type SharedLight = Rc<RefCell<dyn Light>>;

fn write_colors(shader: &ShaderProgram, state: &LightState, ambient: Vec3, diffuse: Vec3, specular: Vec3) {
    shader.set_vec3(&state.field("ambient"), ambient);
    shader.set_vec3(&state.field("diffuse"), diffuse);
    shader.set_vec3(&state.field("specular"), specular);
}

fn write_attenuation(shader: &ShaderProgram, state: &LightState, attenuation: Attenuation) {
    shader.set_float(&state.field("attenuation.constant"), attenuation.constant);
    shader.set_float(&state.field("attenuation.linear"), attenuation.linear);
    shader.set_float(&state.field("attenuation.quadratic"), attenuation.quadratic);
}

/// Transforms a direction (w = 0).
fn view_direction(view: &Mat4, direction: Vec3) -> Vec3 {
    view.transform_vector3(direction)
}

/// Transforms a point (w = 1).
fn view_position(view: &Mat4, position: Vec3) -> Vec3 {
    view.transform_point3(position)
}

fn replace(slot: &mut Vec3, value: Vec3) -> bool {
    let changed = *slot != value;
    *slot = value;
    changed
}

macro_rules! color_accessors {
    () => {
        #[must_use]
        pub fn ambient(&self) -> Vec3 {
            self.ambient
        }

        pub fn set_ambient(&mut self, ambient: Vec3) {
            self.ambient = ambient;
            self.state.mark_value_changed();
        }

        #[must_use]
        pub fn diffuse(&self) -> Vec3 {
            self.diffuse
        }

        pub fn set_diffuse(&mut self, diffuse: Vec3) {
            self.diffuse = diffuse;
            self.state.mark_value_changed();
        }

        #[must_use]
        pub fn specular(&self) -> Vec3 {
            self.specular
        }

        pub fn set_specular(&mut self, specular: Vec3) {
            self.specular = specular;
            self.state.mark_value_changed();
        }
    };
}

macro_rules! attenuation_accessors {
    () => {
        #[must_use]
        pub fn attenuation(&self) -> Attenuation {
            self.attenuation
        }

        pub fn set_attenuation(&mut self, attenuation: Attenuation) {
            self.attenuation = attenuation;
            self.state.mark_value_changed();
        }
    };
}

// ============================================================================
// Directional
// ============================================================================

#[derive(Debug, Clone)]
pub struct DirectionalLight {
    state: LightState,
    direction: Vec3,
    view_direction: Vec3,
    ambient: Vec3,
    diffuse: Vec3,
    specular: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::new(Vec3::NEG_Y)
    }
}

impl DirectionalLight {
    #[must_use]
    pub fn new(direction: Vec3) -> Self {
        Self::with_colors(direction, DEFAULT_AMBIENT, DEFAULT_DIFFUSE, DEFAULT_SPECULAR)
    }

    #[must_use]
    pub fn with_colors(direction: Vec3, ambient: Vec3, diffuse: Vec3, specular: Vec3) -> Self {
        let direction = direction.normalize_or_zero();
        Self {
            state: LightState::new(LightKind::Directional),
            direction,
            view_direction: direction,
            ambient,
            diffuse,
            specular,
        }
    }

    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    #[must_use]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction.normalize_or_zero();
        self.state.mark_view_changed();
    }

    color_accessors!();
}

impl Light for DirectionalLight {
    fn kind(&self) -> LightKind {
        LightKind::Directional
    }

    fn state(&self) -> &LightState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LightState {
        &mut self.state
    }

    fn transform_to_view(&mut self, view: &Mat4) -> bool {
        replace(&mut self.view_direction, view_direction(view, self.direction))
    }

    fn write_view_uniforms(&self, shader: &ShaderProgram) {
        let direction = if self.state.use_view_transform {
            self.view_direction
        } else {
            self.direction
        };
        shader.set_vec3(&self.state.field("direction"), direction);
    }

    fn write_value_uniforms(&self, shader: &ShaderProgram) {
        write_colors(shader, &self.state, self.ambient, self.diffuse, self.specular);
    }
}

// ============================================================================
// Point
// ============================================================================

#[derive(Debug, Clone)]
pub struct PointLight {
    state: LightState,
    position: Vec3,
    view_position: Vec3,
    ambient: Vec3,
    diffuse: Vec3,
    specular: Vec3,
    attenuation: Attenuation,
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

impl PointLight {
    #[must_use]
    pub fn new(position: Vec3) -> Self {
        Self {
            state: LightState::new(LightKind::Point),
            position,
            view_position: position,
            ambient: DEFAULT_AMBIENT,
            diffuse: DEFAULT_DIFFUSE,
            specular: DEFAULT_SPECULAR,
            attenuation: DEFAULT_ATTENUATION,
        }
    }

    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.state.mark_view_changed();
    }

    color_accessors!();
    attenuation_accessors!();
}

impl Light for PointLight {
    fn kind(&self) -> LightKind {
        LightKind::Point
    }

    fn state(&self) -> &LightState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LightState {
        &mut self.state
    }

    fn transform_to_view(&mut self, view: &Mat4) -> bool {
        replace(&mut self.view_position, view_position(view, self.position))
    }

    fn write_view_uniforms(&self, shader: &ShaderProgram) {
        let position = if self.state.use_view_transform {
            self.view_position
        } else {
            self.position
        };
        shader.set_vec3(&self.state.field("position"), position);
    }

    fn write_value_uniforms(&self, shader: &ShaderProgram) {
        write_colors(shader, &self.state, self.ambient, self.diffuse, self.specular);
        write_attenuation(shader, &self.state, self.attenuation);
    }
}

// ============================================================================
// Spot
// ============================================================================

#[derive(Debug, Clone)]
pub struct SpotLight {
    state: LightState,
    position: Vec3,
    direction: Vec3,
    view_position: Vec3,
    view_direction: Vec3,
    inner_angle: f32,
    outer_angle: f32,
    ambient: Vec3,
    diffuse: Vec3,
    specular: Vec3,
    attenuation: Attenuation,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::NEG_Y)
    }
}

impl SpotLight {
    #[must_use]
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            state: LightState::new(LightKind::Spot),
            position,
            direction,
            view_position: position,
            view_direction: direction,
            inner_angle: DEFAULT_INNER_ANGLE,
            outer_angle: DEFAULT_OUTER_ANGLE,
            ambient: DEFAULT_AMBIENT,
            diffuse: DEFAULT_DIFFUSE,
            specular: DEFAULT_SPECULAR,
            attenuation: DEFAULT_ATTENUATION,
        }
    }

    #[must_use]
    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.state.mark_view_changed();
    }

    #[must_use]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction;
        self.state.mark_view_changed();
    }

    /// Cone angles in radians.
    #[must_use]
    pub fn angles(&self) -> (f32, f32) {
        (self.inner_angle, self.outer_angle)
    }

    pub fn set_inner_angle(&mut self, radians: f32) {
        self.inner_angle = radians;
        self.state.mark_value_changed();
    }

    pub fn set_outer_angle(&mut self, radians: f32) {
        self.outer_angle = radians;
        self.state.mark_value_changed();
    }

    color_accessors!();
    attenuation_accessors!();
}

impl Light for SpotLight {
    fn kind(&self) -> LightKind {
        LightKind::Spot
    }

    fn state(&self) -> &LightState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut LightState {
        &mut self.state
    }

    fn transform_to_view(&mut self, view: &Mat4) -> bool {
        let position = replace(&mut self.view_position, view_position(view, self.position));
        let direction = replace(&mut self.view_direction, view_direction(view, self.direction));
        position || direction
    }

    fn write_view_uniforms(&self, shader: &ShaderProgram) {
        let (position, direction) = if self.state.use_view_transform {
            (self.view_position, self.view_direction)
        } else {
            (self.position, self.direction)
        };
        shader.set_vec3(&self.state.field("position"), position);
        shader.set_vec3(&self.state.field("direction"), direction);
    }

    fn write_value_uniforms(&self, shader: &ShaderProgram) {
        shader.set_float(&self.state.field("innerAngle"), self.inner_angle);
        shader.set_float(&self.state.field("outerAngle"), self.outer_angle);
        write_colors(shader, &self.state, self.ambient, self.diffuse, self.specular);
        write_attenuation(shader, &self.state, self.attenuation);
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Supplies the camera view matrix to a [`LightRegistry`].
pub trait ViewSource {
    fn view_transform(&self) -> Mat4;
}

/// Assigns array slots to lights and pushes all of them as one uniform source.
#[derive(Default)]
pub struct LightRegistry {
    lights: Vec<SharedLight>,
    counts: [u32; 3],
    view_source: Option<Rc<RefCell<dyn ViewSource>>>,
}

impl fmt::Debug for LightRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightRegistry")
            .field("lights", &self.lights.len())
            .field("counts", &self.counts)
            .field("has_view_source", &self.view_source.is_some())
            .finish()
    }
}

fn kind_slot(kind: LightKind) -> usize {
    match kind {
        LightKind::Directional => 0,
        LightKind::Point => 1,
        LightKind::Spot => 2,
    }
}

impl LightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Registers a light and gives it the next slot of its kind.
    pub fn add_light<L: Light + 'static>(&mut self, light: Rc<RefCell<L>>) {
        self.add_shared_light(light);
    }

    pub fn add_shared_light(&mut self, light: SharedLight) {
        {
            let mut light = light.borrow_mut();
            let kind = light.kind();
            let count = &mut self.counts[kind_slot(kind)];
            light.state_mut().set_index(kind, *count);
            *count += 1;
        }
        self.lights.push(light);
    }

    /// Number of registered lights of `kind`.
    #[must_use]
    pub fn count(&self, kind: LightKind) -> u32 {
        self.counts[kind_slot(kind)]
    }

    /// The view source is queried and applied on every update.
    pub fn set_view_source<V: ViewSource + 'static>(&mut self, source: Rc<RefCell<V>>) {
        self.view_source = Some(source);
    }

    pub fn apply_view_transform(&self, view: &Mat4) {
        for light in &self.lights {
            light.borrow_mut().apply_view_transform(view);
        }
    }

    pub fn set_use_view_transform(&self, use_view_transform: bool) {
        for light in &self.lights {
            light.borrow_mut().set_use_view_transform(use_view_transform);
        }
    }
}

impl UniformSource for LightRegistry {
    fn update_uniforms(&mut self, shader: &ShaderProgram) -> Result<()> {
        if let Some(source) = &self.view_source {
            let view = source.borrow().view_transform();
            self.apply_view_transform(&view);
        }

        for kind in [LightKind::Directional, LightKind::Point, LightKind::Spot] {
            shader.set_int(kind.count_name(), self.count(kind) as i32);
        }
        for light in &self.lights {
            light.borrow_mut().update_uniforms(shader)?;
        }
        Ok(())
    }
}
