//! Particle-life force law.

/// Fraction of the interaction radius below which particles always repel.
pub const BETA: f64 = 0.3;

/// Empirical scale applied to every accumulated contribution, together with
/// the interaction radius of the type pair.
pub const FORCE_SCALE: f64 = 10.0;

/// Force magnitude for a neighbour at `r_norm = distance / radius`.
///
/// Below `BETA` the result is a gain-independent linear repulsion from `-1`
/// (touching) to `0`. Between `BETA` and `1` it is a triangular pulse that
/// peaks at `gain` halfway through the band. Beyond the cutoff it is zero.
#[inline]
pub fn force(r_norm: f64, gain: f64) -> f64 {
    if r_norm < BETA {
        r_norm / BETA - 1.0
    } else if r_norm < 1.0 {
        gain * (1.0 - (2.0 * r_norm - 1.0 - BETA).abs() / (1.0 - BETA))
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn full_repulsion_at_contact() {
        for gain in [-1.0, 0.0, 0.5, 1.0] {
            assert!((force(0.0, gain) + 1.0).abs() < EPS);
        }
    }

    #[test]
    fn continuous_at_band_edges() {
        for gain in [-1.0, -0.3, 0.0, 0.7, 1.0] {
            assert!(force(BETA, gain).abs() < EPS);
            assert!(force(BETA - 1e-9, gain).abs() < 1e-8);
            assert!(force(1.0 - 1e-9, gain).abs() < 1e-8);
            assert_eq!(force(1.0, gain), 0.0);
        }
    }

    #[test]
    fn peak_sits_mid_band() {
        let peak = (1.0 + BETA) / 2.0;
        assert!((force(peak, 0.8) - 0.8).abs() < EPS);
        assert!((force(peak, -0.5) + 0.5).abs() < EPS);
    }

    #[test]
    fn nothing_beyond_cutoff() {
        for r in [1.0, 1.5, 10.0, f64::MAX] {
            assert_eq!(force(r, 1.0), 0.0);
        }
    }
}
