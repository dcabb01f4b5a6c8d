//! Semi-implicit Euler with per-tick friction and two boundary policies.

use super::config::Bounds;
use super::{Particle, Velocity};

/// Maps `value` into `[0, dim)`.
#[inline]
pub fn wrap_coordinate(value: f64, dim: f64) -> f64 {
    let wrapped = value.rem_euclid(dim);
    // rem_euclid can round up to `dim` for tiny negative inputs
    if wrapped >= dim {
        0.0
    } else {
        wrapped
    }
}

/// Friction first, then the accumulated force.
#[inline]
pub fn apply_velocity(particle: &mut Particle, force: &Velocity, dt: f64, friction_factor: f64) {
    particle.velocity *= friction_factor;
    particle.velocity += force * dt;
}

/// Moves the particle by `v * dt` and applies the boundary policy.
///
/// Torus mode wraps each axis into `[0, dim)`. Otherwise the particle bounces
/// off the wall it crossed: the offending velocity component is negated and
/// the position clamped to `[r, dim - r]`.
pub fn advance_position(particle: &mut Particle, dt: f64, wrap: bool, bounds: Bounds, ball_radius: f64) {
    let next = particle.position + particle.velocity * dt;

    if wrap {
        particle.position.x = wrap_coordinate(next.x, bounds.width);
        particle.position.y = wrap_coordinate(next.y, bounds.height);
        return;
    }

    for (axis, dim) in [(0, bounds.width), (1, bounds.height)] {
        let (low, high) = (ball_radius, dim - ball_radius);
        let value = next[axis];
        if value < low || value > high {
            particle.velocity[axis] = -particle.velocity[axis];
        }
        particle.position[axis] = value.max(low).min(high);
    }
}

pub fn step(
    particle: &mut Particle,
    force: &Velocity,
    dt: f64,
    friction_factor: f64,
    wrap: bool,
    bounds: Bounds,
    ball_radius: f64,
) {
    apply_velocity(particle, force, dt, friction_factor);
    advance_position(particle, dt, wrap, bounds, ball_radius);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Position;

    fn moving(x: f64, y: f64, vx: f64, vy: f64) -> Particle {
        let mut p = Particle::new(0, 0, Position::new(x, y));
        p.velocity = Velocity::new(vx, vy);
        p
    }

    #[test]
    fn wraps_across_right_edge() {
        let bounds = Bounds::new(100.0, 100.0);
        let mut p = moving(99.0, 5.0, 10.0, 0.0);
        step(&mut p, &Velocity::zeros(), 1.0, 1.0, true, bounds, 3.0);
        assert!((p.position.x - 9.0).abs() < 1e-9);
        assert_eq!(p.position.y, 5.0);
        assert_eq!(p.velocity, Velocity::new(10.0, 0.0));
    }

    #[test]
    fn wrap_result_is_half_open() {
        assert_eq!(wrap_coordinate(100.0, 100.0), 0.0);
        assert_eq!(wrap_coordinate(-1e-18, 100.0), 0.0);
        assert!((wrap_coordinate(-250.0, 100.0) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn reflects_off_walls() {
        let bounds = Bounds::new(100.0, 50.0);
        let mut p = moving(98.0, 2.0, 5.0, -4.0);
        step(&mut p, &Velocity::zeros(), 1.0, 1.0, false, bounds, 3.0);
        assert_eq!(p.position, Position::new(97.0, 3.0));
        assert_eq!(p.velocity, Velocity::new(-5.0, 4.0));
    }

    #[test]
    fn friction_is_applied_before_force() {
        let mut p = moving(50.0, 50.0, 10.0, 0.0);
        apply_velocity(&mut p, &Velocity::new(4.0, 0.0), 0.5, 0.5);
        assert_eq!(p.velocity, Velocity::new(7.0, 0.0));
    }

    #[test]
    fn stays_inside_without_wrap() {
        let bounds = Bounds::new(60.0, 40.0);
        let mut p = moving(30.0, 20.0, 0.0, 0.0);
        for i in 0..500 {
            let kick = Velocity::new(((i * 37) % 11) as f64 - 5.0, ((i * 17) % 13) as f64 - 6.0) * 40.0;
            step(&mut p, &kick, 0.1, 0.97, false, bounds, 2.0);
            assert!(p.position.x >= 2.0 && p.position.x <= 58.0);
            assert!(p.position.y >= 2.0 && p.position.y <= 38.0);
        }
    }
}
