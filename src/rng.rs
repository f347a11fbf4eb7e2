use rand::prelude::*;

/// Reserved stream id for environment perturbation draws. Agent ids are
/// assigned from 0 upward and can never reach this value in practice.
pub const ENV_STREAM: u64 = u64::MAX;

/// High bit marking the inheritance-jitter stream of an agent, keeping it
/// disjoint from the agent's own hazard stream.
pub const JITTER_STREAM_BIT: u64 = 1 << 63;

// Mixing constants: the splitmix64 increment and an xxhash prime.
const STEP_MIX: u64 = 0x9E37_79B9_7F4A_7C15;
const STREAM_MIX: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Derives a generator purely from `(seed, step_index, stream)`.
///
/// Every stochastic decision in the engine draws from a generator obtained
/// here, in a fixed per-stream draw order, so results depend only on the
/// keying triple — never on evaluation order or thread count. Re-deriving
/// the same triple always yields the same sequence.
pub fn stream_rng(seed: u64, step_index: u64, stream: u64) -> StdRng {
    let key = seed
        .wrapping_add(step_index.wrapping_mul(STEP_MIX))
        .wrapping_add(stream.wrapping_mul(STREAM_MIX));
    StdRng::seed_from_u64(key)
}

/// A uniform draw in [0, 1).
pub fn unit_f64(rng: &mut StdRng) -> f64 {
    rng.random::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_triple_same_sequence() {
        let mut a = stream_rng(42, 3, 17);
        let mut b = stream_rng(42, 3, 17);
        for _ in 0..16 {
            assert_eq!(unit_f64(&mut a), unit_f64(&mut b));
        }
    }

    #[test]
    fn draws_are_in_unit_interval() {
        let mut rng = stream_rng(7, 0, 0);
        for _ in 0..1000 {
            let value = unit_f64(&mut rng);
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn distinct_triples_decorrelate() {
        let first = unit_f64(&mut stream_rng(42, 0, 0));
        let by_seed = unit_f64(&mut stream_rng(43, 0, 0));
        let by_step = unit_f64(&mut stream_rng(42, 1, 0));
        let by_stream = unit_f64(&mut stream_rng(42, 0, 1));
        assert_ne!(first, by_seed);
        assert_ne!(first, by_step);
        assert_ne!(first, by_stream);
    }

    #[test]
    fn jitter_stream_is_disjoint_from_hazard_stream() {
        let hazard = unit_f64(&mut stream_rng(42, 5, 9));
        let jitter = unit_f64(&mut stream_rng(42, 5, 9 | JITTER_STREAM_BIT));
        assert_ne!(hazard, jitter);
    }
}
