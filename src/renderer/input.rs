// Keyboard camera controller
//
// Key state is accumulated from window events into `InputState`; the
// controller reads it once per frame and moves the viewer transform.
//
//   W/S  forward/back      A/D  strafe      E/Q  up/down (world Z)
//   Arrow keys look around

use glam::Vec3;
use std::collections::HashSet;
use std::f32::consts::TAU;
use winit::keyboard::KeyCode;

use super::scene::Transform;

/// Pitch stays short of straight up/down so the view basis never degenerates
const PITCH_LIMIT: f32 = 1.5;

#[derive(Debug, Default, Clone)]
pub struct InputState {
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.pressed.insert(key);
        } else {
            self.pressed.remove(&key);
        }
    }

    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    /// +1 for `positive`, -1 for `negative`, 0 for both or neither
    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        (self.is_pressed(positive) as i32 - self.is_pressed(negative) as i32) as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyboardController {
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self {
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

impl KeyboardController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            move_speed,
            look_speed,
        }
    }

    /// Move in the XY plane and turn, scaled by `dt` seconds
    pub fn update(&self, dt: f32, input: &InputState, transform: &mut Transform) {
        let rotate = Vec3::new(
            input.axis(KeyCode::ArrowDown, KeyCode::ArrowUp),
            0.0,
            input.axis(KeyCode::ArrowRight, KeyCode::ArrowLeft),
        );
        if rotate.length_squared() > f32::EPSILON {
            transform.rotation += self.look_speed * dt * rotate.normalize();
        }
        transform.rotation.x = transform.rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        transform.rotation.z = transform.rotation.z.rem_euclid(TAU);

        let forward = transform.planar_forward();
        let right = transform.right();
        let movement = forward * input.axis(KeyCode::KeyW, KeyCode::KeyS)
            + right * input.axis(KeyCode::KeyD, KeyCode::KeyA)
            + Vec3::Z * input.axis(KeyCode::KeyE, KeyCode::KeyQ);
        if movement.length_squared() > f32::EPSILON {
            transform.translation += self.move_speed * dt * movement.normalize();
        }
    }
}
