//! Orbit camera and the damped pointer controls driving it.
//!
//! Pointer input reaches the controls through an [`InputSurface`], a small
//! publish/subscribe hub the window (or a test) feeds with [`PointerInput`].
//! [`OrbitControls::bind`] subscribes to one surface on behalf of one camera;
//! rebinding, [`OrbitControls::unbind`] and dropping the controls release the
//! subscription again.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::{Rc, Weak},
};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3, perspective};
use serde::{Deserialize, Serialize};

/// Maps OpenGL clip depth (-1..1) to wgpu's 0..1. Arguments are columns.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct CameraUniform {
    /// Eye position in homogeneous coordinates (16 byte alignment).
    pub view_position: [f32; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCameraBounds {
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_pitch: f32,
    pub max_pitch: f32,
}

impl Default for OrbitCameraBounds {
    fn default() -> Self {
        Self {
            min_distance: 0.5,
            max_distance: 100.0,
            min_pitch: -std::f32::consts::FRAC_PI_2 + 0.01,
            max_pitch: std::f32::consts::FRAC_PI_2 - 0.01,
        }
    }
}

/// Camera circling `target` at `distance`; y is up.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    pub distance: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub target: Vector3<f32>,
    pub bounds: OrbitCameraBounds,
    pub aspect: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl OrbitCamera {
    pub fn new(distance: f32, pitch: f32, yaw: f32, target: Vector3<f32>, aspect: f32) -> Self {
        let mut camera = Self {
            distance,
            pitch,
            yaw,
            target,
            bounds: OrbitCameraBounds::default(),
            aspect,
            fovy: Rad(std::f32::consts::FRAC_PI_4),
            znear: 0.1,
            zfar: 500.0,
        };
        camera.set_distance(distance);
        camera.set_pitch(pitch);
        camera
    }

    pub fn eye(&self) -> Vector3<f32> {
        Vector3::new(
            self.distance * self.yaw.sin() * self.pitch.cos(),
            self.distance * self.pitch.sin(),
            self.distance * self.yaw.cos() * self.pitch.cos(),
        ) + self.target
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance.clamp(self.bounds.min_distance, self.bounds.max_distance);
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch.clamp(self.bounds.min_pitch, self.bounds.max_pitch);
    }

    pub fn add_pitch(&mut self, delta: f32) {
        self.set_pitch(self.pitch + delta);
    }

    pub fn add_yaw(&mut self, delta: f32) {
        self.yaw = (self.yaw + delta) % std::f32::consts::TAU;
    }

    /// Multiplicative zoom; positive moves away.
    pub fn zoom(&mut self, delta: f32) {
        self.set_distance(self.distance * (1.0 + delta));
    }

    /// Moves the target in the view plane. `delta` is scaled by the distance
    /// so panning feels the same at every zoom level.
    pub fn pan(&mut self, delta: (f32, f32)) {
        let forward = (self.target - self.eye()).normalize();
        let right = forward.cross(Vector3::unit_y()).normalize();
        let up = right.cross(forward).normalize();
        self.target += (right * delta.0 + up * delta.1) * self.distance;
    }

    pub fn resize_projection(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn build_view_projection_matrix(&self) -> Matrix4<f32> {
        let view = Matrix4::look_at_rh(
            Point3::from_vec(self.eye()),
            Point3::from_vec(self.target),
            Vector3::unit_y(),
        );
        let proj = OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar);
        proj * view
    }

    pub fn uniform(&self) -> CameraUniform {
        let eye = self.eye();
        CameraUniform {
            view_position: [eye.x, eye.y, eye.z, 1.0],
            view_proj: self.build_view_projection_matrix().into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerInput {
    /// Drag deltas in pixels.
    Rotate { dx: f32, dy: f32 },
    Pan { dx: f32, dy: f32 },
    /// Scroll lines; positive zooms out.
    Zoom { delta: f32 },
}

type Listener = Rc<dyn Fn(&PointerInput)>;

#[derive(Default)]
struct SurfaceInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

/// Where pointer input for the stage arrives. Cloning shares the surface.
#[derive(Clone, Default)]
pub struct InputSurface {
    inner: Rc<RefCell<SurfaceInner>>,
}

impl InputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&PointerInput) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.insert(id, Rc::new(listener));
        Subscription {
            id,
            surface: Rc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, input: PointerInput) {
        // listeners may (un)subscribe while being notified
        let listeners: Vec<Listener> = self.inner.borrow().listeners.values().cloned().collect();
        for listener in listeners {
            listener(&input);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    fn same_as(&self, other: &InputSurface) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Keeps a listener registered until dropped.
pub struct Subscription {
    id: u64,
    surface: Weak<RefCell<SurfaceInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.upgrade() {
            surface.borrow_mut().listeners.remove(&self.id);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(f32),
}

/// Camera control options as they come from a JSON configuration.
pub type ControlOptions = BTreeMap<String, ControlValue>;

struct Binding {
    camera: Rc<RefCell<OrbitCamera>>,
    surface: InputSurface,
    _subscription: Subscription,
}

#[derive(Default)]
struct Velocity {
    yaw: f32,
    pitch: f32,
    zoom: f32,
    pan: (f32, f32),
}

impl Velocity {
    fn is_settled(&self) -> bool {
        [self.yaw, self.pitch, self.zoom, self.pan.0, self.pan.1]
            .iter()
            .all(|v| v.abs() < 1e-6)
    }
}

pub struct OrbitControls {
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub damping_factor: f32,
    pub enable_damping: bool,
    pub enable_rotate: bool,
    pub enable_zoom: bool,
    pub enable_pan: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    pending: Rc<RefCell<Vec<PointerInput>>>,
    velocity: Velocity,
    binding: Option<Binding>,
}

impl OrbitControls {
    pub fn new() -> Self {
        let bounds = OrbitCameraBounds::default();
        Self {
            rotate_speed: 0.005,
            zoom_speed: 0.1,
            pan_speed: 0.001,
            damping_factor: 0.1,
            enable_damping: true,
            enable_rotate: true,
            enable_zoom: true,
            enable_pan: true,
            min_distance: bounds.min_distance,
            max_distance: bounds.max_distance,
            pending: Rc::new(RefCell::new(Vec::new())),
            velocity: Velocity::default(),
            binding: None,
        }
    }

    /// Applies the recognized keys of `options` and returns the keys that were
    /// ignored (unknown, or of the wrong type).
    pub fn apply_options(&mut self, options: &ControlOptions) -> Vec<String> {
        let mut ignored = Vec::new();
        for (key, value) in options {
            let applied = match (key.as_str(), *value) {
                ("rotate_speed", ControlValue::Number(v)) => set_finite(&mut self.rotate_speed, v),
                ("zoom_speed", ControlValue::Number(v)) => set_finite(&mut self.zoom_speed, v),
                ("pan_speed", ControlValue::Number(v)) => set_finite(&mut self.pan_speed, v),
                ("damping_factor", ControlValue::Number(v)) if (0.0..=1.0).contains(&v) => {
                    self.damping_factor = v;
                    true
                }
                ("min_distance", ControlValue::Number(v)) if v > 0.0 => set_finite(&mut self.min_distance, v),
                ("max_distance", ControlValue::Number(v)) if v > 0.0 => set_finite(&mut self.max_distance, v),
                ("enable_damping", ControlValue::Bool(b)) => {
                    self.enable_damping = b;
                    true
                }
                ("enable_rotate", ControlValue::Bool(b)) => {
                    self.enable_rotate = b;
                    true
                }
                ("enable_zoom", ControlValue::Bool(b)) => {
                    self.enable_zoom = b;
                    true
                }
                ("enable_pan", ControlValue::Bool(b)) => {
                    self.enable_pan = b;
                    true
                }
                _ => false,
            };
            if !applied {
                log::warn!("Ignoring camera control option '{key}' = {value:?}");
                ignored.push(key.clone());
            }
        }
        if self.min_distance > self.max_distance {
            std::mem::swap(&mut self.min_distance, &mut self.max_distance);
        }
        self.apply_bounds();
        ignored
    }

    fn apply_bounds(&self) {
        if let Some(binding) = &self.binding {
            let mut camera = binding.camera.borrow_mut();
            camera.bounds.min_distance = self.min_distance;
            camera.bounds.max_distance = self.max_distance;
            let distance = camera.distance;
            camera.set_distance(distance);
        }
    }

    /// Drives `camera` from the input of `surface`. Binding to the pair that
    /// is already bound keeps the existing subscription.
    pub fn bind(&mut self, camera: Rc<RefCell<OrbitCamera>>, surface: &InputSurface) {
        if let Some(binding) = &self.binding
            && Rc::ptr_eq(&binding.camera, &camera)
            && binding.surface.same_as(surface)
        {
            return;
        }
        self.unbind();
        let pending = Rc::downgrade(&self.pending);
        let subscription = surface.subscribe(move |input| {
            if let Some(pending) = pending.upgrade() {
                pending.borrow_mut().push(*input);
            }
        });
        self.binding = Some(Binding {
            camera,
            surface: surface.clone(),
            _subscription: subscription,
        });
        self.apply_bounds();
    }

    pub fn unbind(&mut self) {
        if self.binding.take().is_some() {
            self.pending.borrow_mut().clear();
            self.velocity = Velocity::default();
        }
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Integrates queued input and decays the velocities. Returns whether the
    /// camera is still moving.
    pub fn update(&mut self, dt: f32) -> bool {
        let Some(binding) = &self.binding else {
            return false;
        };
        for input in self.pending.borrow_mut().drain(..) {
            match input {
                PointerInput::Rotate { dx, dy } if self.enable_rotate => {
                    self.velocity.yaw -= dx * self.rotate_speed;
                    self.velocity.pitch += dy * self.rotate_speed;
                }
                PointerInput::Pan { dx, dy } if self.enable_pan => {
                    self.velocity.pan.0 -= dx * self.pan_speed;
                    self.velocity.pan.1 += dy * self.pan_speed;
                }
                PointerInput::Zoom { delta } if self.enable_zoom => {
                    self.velocity.zoom += delta * self.zoom_speed;
                }
                _ => {}
            }
        }

        // Damped: apply a fraction now and keep the rest for later frames, so
        // the total movement matches the undamped case.
        let (applied, remaining) = if self.enable_damping {
            let keep = (1.0 - self.damping_factor).powf((dt * 60.0).max(0.0));
            (1.0 - keep, keep)
        } else {
            (1.0, 0.0)
        };

        let v = &mut self.velocity;
        let mut camera = binding.camera.borrow_mut();
        camera.add_yaw(v.yaw * applied);
        camera.add_pitch(v.pitch * applied);
        camera.zoom(v.zoom * applied);
        camera.pan((v.pan.0 * applied, v.pan.1 * applied));

        v.yaw *= remaining;
        v.pitch *= remaining;
        v.zoom *= remaining;
        v.pan = (v.pan.0 * remaining, v.pan.1 * remaining);
        if v.is_settled() {
            *v = Velocity::default();
            return false;
        }
        true
    }
}

fn set_finite(field: &mut f32, value: f32) -> bool {
    if value.is_finite() {
        *field = value;
    }
    value.is_finite()
}

impl Default for OrbitControls {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OrbitControls {
    fn drop(&mut self) {
        self.unbind();
    }
}
