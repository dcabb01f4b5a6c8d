use super::{Particle, Position};

/// Pointer attraction (positive strength) or repulsion (negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseForce {
    pub position: Position,
    pub strength: f64,
}

impl MouseForce {
    pub fn new(position: Position, strength: f64) -> Self {
        Self { position, strength }
    }

    /// Adds `strength / max(1, |m - p|) * (m - p) / friction_factor` to the
    /// velocity. The field ignores the torus seam and the time step, and the
    /// division cancels the friction the next tick will apply.
    pub fn apply(&self, particle: &mut Particle, friction_factor: f64) {
        let delta = self.position - particle.position;
        let distance = delta.norm().max(1.0);
        particle.velocity += delta * (self.strength / distance / friction_factor);
    }
}
