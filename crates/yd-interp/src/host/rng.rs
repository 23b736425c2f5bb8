use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};
use uuid::Builder;

use super::runtime_error;

const STRING_POOL: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

pub(crate) fn next_random_u32(state: &mut u32) -> u32 {
    let mut next = state.wrapping_add(0x6d2b79f5);
    *state = next;
    next = (next ^ (next >> 15)).wrapping_mul(next | 1);
    next ^= next.wrapping_add((next ^ (next >> 7)).wrapping_mul(next | 61));
    next ^ (next >> 14)
}

pub(crate) fn next_random_bounded_with<F>(state: &mut u32, bound: u64, mut next: F) -> u64
where
    F: FnMut(&mut u32) -> u64,
{
    let threshold = u64::MAX - (u64::MAX % bound);
    let mut candidate = next(state);
    while candidate >= threshold {
        candidate = next(state);
    }
    candidate % bound
}

fn next_random_u64(state: &mut u32) -> u64 {
    (u64::from(next_random_u32(state)) << 32) | u64::from(next_random_u32(state))
}

/// Seeded random source exposed to templates as `$r` and to scripts as `rand`.
#[derive(Debug, Clone)]
pub struct RandomSource {
    state: Rc<RefCell<u32>>,
}

impl RandomSource {
    pub fn new(seed: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(seed)),
        }
    }

    pub fn auto_seeded() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        Self::new((nanos ^ (nanos >> 32)) as u32)
    }

    pub fn next_u32(&self) -> u32 {
        next_random_u32(&mut self.state.borrow_mut())
    }

    fn bounded(&self, bound: u64) -> u64 {
        next_random_bounded_with(&mut self.state.borrow_mut(), bound, next_random_u64)
    }

    /// Uniform integer in `[min, max]`.
    pub fn integer(&self, min: i64, max: i64) -> Result<i64, String> {
        if min > max {
            return Err(format!("integer({}, {}) expects min <= max.", min, max));
        }
        let span = (max as i128 - min as i128) as u128 + 1;
        if span > u128::from(u64::MAX) {
            return Ok(next_random_u64(&mut self.state.borrow_mut()) as i64);
        }
        Ok((min as i128 + self.bounded(span as u64) as i128) as i64)
    }

    /// Uniform float in `[min, max)`.
    pub fn real(&self, min: f64, max: f64) -> f64 {
        let unit = f64::from(self.next_u32()) / 4_294_967_296.0;
        min + (max - min) * unit
    }

    pub fn boolean(&self) -> bool {
        self.next_u32() & 1 == 1
    }

    pub fn uuid4(&self) -> String {
        let mut bytes = [0u8; 16];
        for chunk in bytes.chunks_mut(4) {
            chunk.copy_from_slice(&self.next_u32().to_be_bytes());
        }
        Builder::from_random_bytes(bytes).into_uuid().to_string()
    }

    pub fn hex(&self, len: usize) -> String {
        (0..len)
            .map(|_| char::from_digit(self.bounded(16) as u32, 16).unwrap_or('0'))
            .collect()
    }

    pub fn string(&self, len: usize) -> String {
        (0..len)
            .map(|_| STRING_POOL[self.bounded(STRING_POOL.len() as u64) as usize] as char)
            .collect()
    }

    pub fn pick(&self, items: &[Dynamic]) -> Dynamic {
        if items.is_empty() {
            return Dynamic::UNIT;
        }
        items[self.bounded(items.len() as u64) as usize].clone()
    }
}

fn length_arg(len: INT) -> Result<usize, Box<EvalAltResult>> {
    usize::try_from(len).map_err(|_| runtime_error(format!("Length must be >= 0, got {}.", len)))
}

pub(crate) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<RandomSource>("RandomSource")
        .register_fn(
            "integer",
            |rng: &mut RandomSource, min: INT, max: INT| -> Result<INT, Box<EvalAltResult>> {
                rng.integer(min, max).map_err(runtime_error)
            },
        )
        .register_fn("real", |rng: &mut RandomSource, min: FLOAT, max: FLOAT| {
            rng.real(min, max)
        })
        .register_fn("bool", |rng: &mut RandomSource| rng.boolean())
        .register_fn("uuid4", |rng: &mut RandomSource| rng.uuid4())
        .register_fn(
            "hex",
            |rng: &mut RandomSource, len: INT| -> Result<String, Box<EvalAltResult>> {
                Ok(rng.hex(length_arg(len)?))
            },
        )
        .register_fn(
            "string",
            |rng: &mut RandomSource, len: INT| -> Result<String, Box<EvalAltResult>> {
                Ok(rng.string(length_arg(len)?))
            },
        )
        .register_fn("pick", |rng: &mut RandomSource, items: Array| rng.pick(&items));
}

#[cfg(test)]
mod rng_tests {
    use super::*;

    #[test]
    fn next_random_bounded_with_covers_threshold_retry_path() {
        let mut state = 0u32;
        let mut values = vec![u64::MAX, 42u64].into_iter();
        let result = next_random_bounded_with(&mut state, 10, |_s| {
            values.next().expect("test values should be available")
        });
        assert_eq!(result, 2);
    }

    #[test]
    fn same_seed_yields_same_sequence() {
        let left = RandomSource::new(7);
        let right = RandomSource::new(7);
        for _ in 0..16 {
            assert_eq!(left.integer(1, 100), right.integer(1, 100));
        }
    }

    #[test]
    fn integer_stays_within_inclusive_bounds() {
        let rng = RandomSource::new(3);
        for _ in 0..200 {
            let value = rng.integer(-2, 2).expect("bounds are ordered");
            assert!((-2..=2).contains(&value));
        }
        assert!(rng.integer(5, 1).is_err());
        assert_eq!(rng.integer(4, 4), Ok(4));
    }

    #[test]
    fn uuid4_has_version_and_variant_bits() {
        let uuid = RandomSource::new(11).uuid4();
        assert_eq!(uuid.len(), 36);
        assert_eq!(&uuid[14..15], "4");
        assert!(matches!(&uuid[19..20], "8" | "9" | "a" | "b"));
        let parsed = uuid::Uuid::parse_str(&uuid).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(uuid, RandomSource::new(11).uuid4());
    }

    #[test]
    fn hex_string_and_pick_use_their_pools() {
        let rng = RandomSource::new(5);
        assert!(rng.hex(12).chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(rng.string(9).len(), 9);
        assert!(rng.pick(&[]).is_unit());
        let picked = rng.pick(&[Dynamic::from_int(9)]);
        assert_eq!(picked.as_int(), Ok(9));
    }
}
