//! Seeded random streams.
//!
//! Methods carry a `randomSeed` so that a stub and the server generate the
//! same document IDs. Both sides derive one Alea generator per named stream
//! from the pair `(seed, name)`; the collection mutators use the stream
//! `/collection/<name>`.

use rand::Rng;
use std::collections::HashMap;

/// Characters used for generated IDs. Visually ambiguous characters are
/// left out.
pub const UNMISTAKABLE_CHARS: &str = "23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";

const ID_LENGTH: usize = 17;
const SEED_LENGTH: usize = 20;
const TWO_POW_32: f64 = 4_294_967_296.0;
const TWO_POW_NEG_32: f64 = 2.328_306_436_538_696_3e-10;

/// Truncates toward zero and wraps into the unsigned 32-bit range.
fn to_uint32(value: f64) -> f64 {
    value.trunc().rem_euclid(TWO_POW_32)
}

/// Hash that turns seed strings into generator state.
struct Mash {
    n: f64,
}

impl Mash {
    fn new() -> Self {
        Self {
            n: f64::from(0xefc8_249d_u32),
        }
    }

    fn mash(&mut self, data: &str) -> f64 {
        for unit in data.encode_utf16() {
            self.n += f64::from(unit);
            let mut h = 0.025_196_032_824_169_38 * self.n;
            self.n = to_uint32(h);
            h -= self.n;
            h *= self.n;
            self.n = to_uint32(h);
            h -= self.n;
            self.n += h * TWO_POW_32;
        }
        to_uint32(self.n) * TWO_POW_NEG_32
    }
}

/// Alea pseudo-random generator.
///
/// Deterministic for a given list of seeds and bit-compatible with the
/// generator used by DDP servers.
#[derive(Debug, Clone)]
pub struct Alea {
    s0: f64,
    s1: f64,
    s2: f64,
    c: f64,
}

impl Alea {
    /// Creates a generator from seed strings.
    pub fn new<S: AsRef<str>>(seeds: &[S]) -> Self {
        let mut mash = Mash::new();
        let mut s0 = mash.mash(" ");
        let mut s1 = mash.mash(" ");
        let mut s2 = mash.mash(" ");

        for seed in seeds {
            let seed = seed.as_ref();
            s0 -= mash.mash(seed);
            if s0 < 0.0 {
                s0 += 1.0;
            }
            s1 -= mash.mash(seed);
            if s1 < 0.0 {
                s1 += 1.0;
            }
            s2 -= mash.mash(seed);
            if s2 < 0.0 {
                s2 += 1.0;
            }
        }

        Self { s0, s1, s2, c: 1.0 }
    }

    /// Returns the next number in `[0, 1)`.
    pub fn fraction(&mut self) -> f64 {
        let t = 2_091_639.0 * self.s0 + self.c * TWO_POW_NEG_32;
        self.s0 = self.s1;
        self.s1 = self.s2;
        self.c = t.trunc();
        self.s2 = t - self.c;
        self.s2
    }

    /// Picks one character of `alphabet`.
    pub fn choice(&mut self, alphabet: &[char]) -> char {
        let index = (self.fraction() * alphabet.len() as f64).floor() as usize;
        alphabet[index.min(alphabet.len() - 1)]
    }

    /// Returns `len` lowercase hexadecimal digits.
    pub fn hex_string(&mut self, len: usize) -> String {
        let digits: Vec<char> = "0123456789abcdef".chars().collect();
        (0..len).map(|_| self.choice(&digits)).collect()
    }

    /// Returns a 17-character document ID.
    pub fn id(&mut self) -> String {
        let alphabet: Vec<char> = UNMISTAKABLE_CHARS.chars().collect();
        (0..ID_LENGTH).map(|_| self.choice(&alphabet)).collect()
    }
}

/// A family of named generators derived from one method seed.
#[derive(Debug, Clone)]
pub struct RandomStream {
    seed: String,
    sequences: HashMap<String, Alea>,
}

impl RandomStream {
    /// Creates a stream family for a method seed.
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            sequences: HashMap::new(),
        }
    }

    /// Returns the method seed.
    #[must_use]
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Returns the generator for `name`, creating it on first use.
    pub fn sequence(&mut self, name: &str) -> &mut Alea {
        let seed = &self.seed;
        self.sequences
            .entry(name.to_string())
            .or_insert_with(|| Alea::new(&[seed.as_str(), name]))
    }

    /// Returns the next ID of the named sequence.
    pub fn id(&mut self, name: &str) -> String {
        self.sequence(name).id()
    }
}

/// Generates a fresh 20-character hexadecimal method seed.
#[must_use]
pub fn random_seed() -> String {
    let mut rng = rand::thread_rng();
    (0..SEED_LENGTH)
        .map(|_| {
            let digit = rng.gen_range(0..16u32);
            char::from_digit(digit, 16).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alea_matches_server_sequence() {
        let mut alea = Alea::new(&["0"]);
        assert_eq!(alea.id(), "cp9hWvhg8GSvuZ9os");
        assert_eq!(alea.id(), "3f3k6Xo7rrHCifQhR");
        assert_eq!(alea.id(), "shxDnjWWmnKPEoLhM");
        assert_eq!(alea.id(), "6QTjB8C5SEqhmz4ni");
    }

    #[test]
    fn alea_fractions() {
        let mut alea = Alea::new(&["0"]);
        let first = alea.fraction();
        assert!((first - 0.594_526_433_385_908_6).abs() < 1e-15);
        for _ in 0..1000 {
            let f = alea.fraction();
            assert!((0.0..1.0).contains(&f));
        }
    }

    #[test]
    fn named_streams_are_independent_and_reproducible() {
        let mut a = RandomStream::new("test-seed");
        let mut b = RandomStream::new("test-seed");

        assert_eq!(a.id("/collection/tasks"), "AWuiiiryYfpocasei");
        assert_eq!(a.id("/collection/tasks"), "nZwa2BHnxKjHfxLcj");

        // Drawing from another stream does not disturb the first one.
        b.id("/collection/lists");
        assert_eq!(b.id("/collection/tasks"), "AWuiiiryYfpocasei");
        assert_eq!(b.seed(), "test-seed");
    }

    #[test]
    fn hex_strings_are_deterministic() {
        let mut a = Alea::new(&["seed", "/rpc/addTask"]);
        let mut b = Alea::new(&["seed", "/rpc/addTask"]);
        let hex = a.hex_string(20);
        assert_eq!(hex.len(), 20);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex, b.hex_string(20));
    }

    #[test]
    fn seeds_are_hex() {
        let seed = random_seed();
        assert_eq!(seed.len(), 20);
        assert!(seed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(seed, random_seed());
    }
}
