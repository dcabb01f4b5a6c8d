//! Hard-sphere contacts between equal balls.

use super::config::Bounds;
use super::integrator::wrap_coordinate;
use super::{Particle, Position};

/// Positional correction overshoot, so a separated pair does not touch again
/// on the next tick through rounding alone.
const SEPARATION_SLOP: f64 = 1.05;

#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    pub bounds: Bounds,
    pub ball_radius: f64,
    pub restitution: f64,
    /// Scales the tangential impulse; the same per-tick factor as velocity friction.
    pub friction_factor: f64,
    pub wrap: bool,
}

impl CollisionResolver {
    /// Resolves every overlapping unordered pair once, in index order.
    /// Returns the number of impulses applied.
    pub fn resolve(&self, particles: &mut [Particle]) -> usize {
        let min_distance = 2.0 * self.ball_radius;
        if min_distance <= 0.0 {
            return 0;
        }
        let min_distance_sq = min_distance * min_distance;
        let mut contacts = 0;

        for i in 0..particles.len() {
            let (head, tail) = particles.split_at_mut(i + 1);
            let a = &mut head[i];
            for b in tail.iter_mut() {
                let d = self.separation(a.position, b.position);
                let distance_sq = d.norm_squared();
                if distance_sq >= min_distance_sq {
                    continue;
                }

                let distance = distance_sq.sqrt();
                let normal = if distance > 0.0 {
                    d / distance
                } else {
                    Position::new(1.0, 0.0)
                };
                let tangent = Position::new(-normal.y, normal.x);

                let dv = b.velocity - a.velocity;
                let vn = dv.dot(&normal);
                if vn < 0.0 {
                    let jn = -(1.0 + self.restitution) * vn / 2.0;
                    let jt = -dv.dot(&tangent) * self.friction_factor / 2.0;
                    let impulse = normal * jn + tangent * jt;
                    a.velocity -= impulse;
                    b.velocity += impulse;
                    contacts += 1;
                }

                let correction = (min_distance - distance) / 2.0 * SEPARATION_SLOP;
                a.position -= normal * correction;
                b.position += normal * correction;
                self.confine(a);
                self.confine(b);
            }
        }

        contacts
    }

    fn separation(&self, a: Position, b: Position) -> Position {
        let mut d = b - a;
        if self.wrap {
            if d.x.abs() > self.bounds.width / 2.0 {
                d.x -= d.x.signum() * self.bounds.width;
            }
            if d.y.abs() > self.bounds.height / 2.0 {
                d.y -= d.y.signum() * self.bounds.height;
            }
        }
        d
    }

    fn confine(&self, particle: &mut Particle) {
        if self.wrap {
            particle.position.x = wrap_coordinate(particle.position.x, self.bounds.width);
            particle.position.y = wrap_coordinate(particle.position.y, self.bounds.height);
            return;
        }

        let r = self.ball_radius;
        for (axis, dim) in [(0, self.bounds.width), (1, self.bounds.height)] {
            if particle.position[axis] < r {
                particle.position[axis] = r;
                particle.velocity[axis] = particle.velocity[axis].abs();
            } else if particle.position[axis] > dim - r {
                particle.position[axis] = dim - r;
                particle.velocity[axis] = -particle.velocity[axis].abs();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Velocity;

    fn resolver(restitution: f64, wrap: bool) -> CollisionResolver {
        CollisionResolver {
            bounds: Bounds::new(200.0, 200.0),
            ball_radius: 5.0,
            restitution,
            friction_factor: 0.0,
            wrap,
        }
    }

    fn ball(id: u64, x: f64, y: f64, vx: f64, vy: f64) -> Particle {
        let mut p = Particle::new(id, 0, Position::new(x, y));
        p.velocity = Velocity::new(vx, vy);
        p
    }

    #[test]
    fn elastic_head_on_swaps_velocities() {
        let mut pair = vec![ball(0, 100.0, 100.0, 3.0, 0.0), ball(1, 108.0, 100.0, -1.0, 0.0)];
        let contacts = resolver(1.0, false).resolve(&mut pair);
        assert_eq!(contacts, 1);
        assert!((pair[0].velocity.x + 1.0).abs() < 1e-12);
        assert!((pair[1].velocity.x - 3.0).abs() < 1e-12);
    }

    #[test]
    fn elastic_contact_conserves_momentum_and_energy() {
        let mut pair = vec![ball(0, 50.0, 50.0, 4.0, 1.0), ball(1, 56.0, 53.0, -2.0, 0.5)];
        let momentum = pair[0].velocity + pair[1].velocity;
        let energy = pair[0].velocity.norm_squared() + pair[1].velocity.norm_squared();

        resolver(1.0, false).resolve(&mut pair);

        let after = pair[0].velocity + pair[1].velocity;
        assert!((after - momentum).norm() < 1e-12);
        let energy_after = pair[0].velocity.norm_squared() + pair[1].velocity.norm_squared();
        assert!((energy_after - energy).abs() < 1e-9);
    }

    #[test]
    fn separating_pair_keeps_velocity_but_is_pushed_apart() {
        let mut pair = vec![ball(0, 100.0, 100.0, -1.0, 0.0), ball(1, 104.0, 100.0, 1.0, 0.0)];
        let contacts = resolver(0.8, false).resolve(&mut pair);
        assert_eq!(contacts, 0);
        assert_eq!(pair[0].velocity, Velocity::new(-1.0, 0.0));
        let gap = (pair[1].position - pair[0].position).norm();
        assert!(gap >= 10.0);
    }

    #[test]
    fn coincident_pair_separates_along_x() {
        let mut pair = vec![ball(0, 100.0, 100.0, 0.0, 0.0), ball(1, 100.0, 100.0, 0.0, 0.0)];
        resolver(0.8, false).resolve(&mut pair);
        assert!(pair[0].position.x < pair[1].position.x);
        assert_eq!(pair[0].position.y, pair[1].position.y);
        assert!((pair[1].position - pair[0].position).norm() >= 10.0);
    }

    #[test]
    fn contact_across_the_seam() {
        let mut pair = vec![ball(0, 1.0, 100.0, -1.0, 0.0), ball(1, 197.0, 100.0, 1.0, 0.0)];
        let contacts = resolver(1.0, true).resolve(&mut pair);
        assert_eq!(contacts, 1);
        assert!(pair[0].velocity.x > 0.0);
        for p in &pair {
            assert!((0.0..200.0).contains(&p.position.x));
        }
    }

    #[test]
    fn wall_clamp_points_velocity_inward() {
        let mut pair = vec![ball(0, 5.0, 100.0, 2.0, 0.0), ball(1, 9.0, 100.0, -2.0, 0.0)];
        resolver(0.5, false).resolve(&mut pair);
        assert_eq!(pair[0].position.x, 5.0);
        assert!(pair[0].velocity.x >= 0.0);
    }
}
