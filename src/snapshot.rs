//! Frames handed from the stepping loop to consumers.

use bytemuck::{Pod, Zeroable};

use crate::physics::{Diagnostics, Particle};

/// Per-particle record in upload layout: 24 bytes, no padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleInstance {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub id: u32,
    pub type_id: u32,
}

impl From<&Particle> for ParticleInstance {
    fn from(particle: &Particle) -> Self {
        debug_assert!(
            u32::try_from(particle.id).is_ok(),
            "particle id {} does not fit the 32-bit instance layout",
            particle.id
        );
        Self {
            position: [particle.position.x as f32, particle.position.y as f32],
            velocity: [particle.velocity.x as f32, particle.velocity.y as f32],
            id: particle.id as u32,
            type_id: particle.type_id as u32,
        }
    }
}

/// Consistent view of the world after a completed tick.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub tick: u64,
    pub particles: Vec<ParticleInstance>,
    pub diagnostics: Diagnostics,
}

impl Frame {
    pub fn capture(tick: u64, particles: &[Particle], diagnostics: &Diagnostics) -> Self {
        Self {
            tick,
            particles: particles.iter().map(ParticleInstance::from).collect(),
            diagnostics: diagnostics.clone(),
        }
    }

    /// Raw instance bytes, ready for a vertex buffer or a socket.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.particles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Position, Velocity};

    #[test]
    fn instance_layout_is_tight() {
        assert_eq!(std::mem::size_of::<ParticleInstance>(), 24);
    }

    #[test]
    fn bytes_follow_particle_order() {
        let mut a = Particle::new(4, 1, Position::new(1.5, 2.0));
        a.velocity = Velocity::new(-1.0, 0.25);
        let b = Particle::new(9, 0, Position::new(3.0, 4.0));

        let frame = Frame::capture(7, &[a, b], &Diagnostics::default());
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 48);

        let decoded: &[ParticleInstance] = bytemuck::cast_slice(bytes);
        assert_eq!(decoded[0].position, [1.5, 2.0]);
        assert_eq!(decoded[0].velocity, [-1.0, 0.25]);
        assert_eq!((decoded[0].id, decoded[0].type_id), (4, 1));
        assert_eq!(decoded[1].id, 9);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not fit")]
    fn oversized_id_is_not_truncated_silently() {
        let particle = Particle::new(u64::from(u32::MAX) + 1, 0, Position::new(0.0, 0.0));
        let _ = ParticleInstance::from(&particle);
    }
}
