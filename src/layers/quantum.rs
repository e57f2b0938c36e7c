//! L1: quantum-fractal numeric transforms
//!
//! Six invertible byte transforms keyed by a [`QuantumState`]:
//! interleave, fractal scaling, quantum operators, Gaussian phase rotation,
//! chaotic masking and pair folding. Reverse runs the inverses in reverse order.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::primitives::{fold_pairs, inverse_mod_256, keystream, random_hex, unfold_pairs};
use super::{Layer, LayerContext, LayerId, LayerState};
use crate::error::{InscriptError, Result};
use crate::pipeline::Direction;

pub const QUANTUM_LAYER_VERSION: &str = "3.14.159";

/// Default number of interleave segments
pub const DEFAULT_DIMENSIONS: u8 = 5;

const FIBONACCI_TERMS: usize = 144;
const PHASE_TABLE_SIZE: usize = 32;
const LOGISTIC_R: f64 = 3.99;
const FOLD_MASK: u16 = 0x55AA;
const FOLD_SEGMENT: usize = 8;

/// Per-operation L1 parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantumState {
    pub fractal_seed: u64,
    /// 32 random bytes as hex
    pub quantum_key: String,
    pub chaos_seed: u64,
    pub lfsr_seed: u32,
    pub dimensions: u8,
    pub spins: Vec<bool>,
    /// Digest of the pre-fold stream, filled by `apply`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fold_digest: Option<String>,
}

impl QuantumState {
    fn key_bytes(&self, direction: Direction) -> Result<Vec<u8>> {
        let fail = |reason: String| InscriptError::state_mismatch(LayerId::Quantum, direction, reason);
        match hex::decode(&self.quantum_key) {
            Ok(bytes) if bytes.len() == 32 => Ok(bytes),
            Ok(bytes) => Err(fail(format!("quantum_key holds {} bytes, expected 32", bytes.len()))),
            Err(e) => Err(fail(format!("quantum_key is not hex: {}", e))),
        }
    }

    fn check(&self, direction: Direction) -> Result<()> {
        if self.dimensions == 0 {
            return Err(InscriptError::state_mismatch(
                LayerId::Quantum,
                direction,
                "dimensions must be at least 1",
            ));
        }
        if self.spins.is_empty() {
            return Err(InscriptError::state_mismatch(
                LayerId::Quantum,
                direction,
                "spin table is empty",
            ));
        }
        Ok(())
    }
}

/// Key material derived once per call from a state
struct Schedule {
    entanglement: [u8; 32],
    superposition: Vec<u8>,
    phases: Vec<(u8, u8)>,
    fib_offset: usize,
}

impl Schedule {
    fn derive(state: &QuantumState, key: &[u8]) -> Self {
        let mut entanglement = [0u8; 32];
        entanglement.copy_from_slice(&Sha256::digest(key));

        let superposition = state
            .spins
            .iter()
            .enumerate()
            .map(|(i, &up)| if up { 0xC3 ^ (i as u8) } else { 0x3C ^ (i as u8) })
            .collect();

        let mut label = b"phase".to_vec();
        label.extend_from_slice(&state.fractal_seed.to_le_bytes());
        let raw = keystream(key, &label, PHASE_TABLE_SIZE * 2);
        let phases = raw
            .chunks_exact(2)
            .map(|pair| (pair[0] | 1, pair[1] & 0xFE))
            .collect();

        Self {
            entanglement,
            superposition,
            phases,
            fib_offset: (state.fractal_seed % FIBONACCI_TERMS as u64) as usize,
        }
    }
}

/// Quantum-fractal layer template
#[derive(Debug, Clone)]
pub struct QuantumLayer {
    dimensions: u8,
}

impl QuantumLayer {
    pub fn new(dimensions: u8) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for QuantumLayer {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Layer for QuantumLayer {
    fn id(&self) -> LayerId {
        LayerId::Quantum
    }

    fn name(&self) -> &'static str {
        "quantum-fractal"
    }

    fn version(&self) -> &'static str {
        QUANTUM_LAYER_VERSION
    }

    fn generate_state(&self, rng: &mut dyn RngCore) -> LayerState {
        LayerState::Quantum(QuantumState {
            fractal_seed: rng.next_u64(),
            quantum_key: random_hex(rng, 32),
            chaos_seed: rng.next_u64(),
            lfsr_seed: rng.next_u32() | 1,
            dimensions: self.dimensions,
            spins: (0..8).map(|_| rng.next_u32() & 1 == 1).collect(),
            fold_digest: None,
        })
    }

    fn apply(
        &self,
        state: LayerState,
        data: &[u8],
        _ctx: &LayerContext<'_>,
    ) -> Result<(Vec<u8>, LayerState)> {
        let mut state = match state {
            LayerState::Quantum(state) => state,
            other => return Err(other.mismatch(LayerId::Quantum, Direction::Encrypt)),
        };
        state.check(Direction::Encrypt)?;
        let key = state.key_bytes(Direction::Encrypt)?;
        let schedule = Schedule::derive(&state, &key);

        let mut bytes = interleave(data, state.dimensions as usize);
        fractal_scale(&mut bytes, &schedule, state.lfsr_seed);
        quantum_gates(&mut bytes, &schedule);
        phase_rotate(&mut bytes, &schedule);
        chaos_mask(&mut bytes, state.chaos_seed, false);

        state.fold_digest = Some(fold_digest(&bytes));
        let out = fold_pairs(&bytes, FOLD_MASK);

        Ok((out, LayerState::Quantum(state)))
    }

    fn reverse(&self, state: &LayerState, data: &[u8], _ctx: &LayerContext<'_>) -> Result<Vec<u8>> {
        let state = match state {
            LayerState::Quantum(state) => state,
            other => return Err(other.mismatch(LayerId::Quantum, Direction::Decrypt)),
        };
        state.check(Direction::Decrypt)?;
        let key = state.key_bytes(Direction::Decrypt)?;
        let expected_digest = state.fold_digest.as_deref().ok_or_else(|| {
            InscriptError::state_mismatch(
                LayerId::Quantum,
                Direction::Decrypt,
                "snapshot carries no fold digest",
            )
        })?;
        let schedule = Schedule::derive(state, &key);

        let mut bytes = unfold_pairs(data, FOLD_MASK);
        if fold_digest(&bytes) != expected_digest {
            return Err(InscriptError::integrity(
                LayerId::Quantum,
                Direction::Decrypt,
                "fold digest does not match the recorded value",
            ));
        }

        chaos_mask(&mut bytes, state.chaos_seed, true);
        phase_unrotate(&mut bytes, &schedule);
        quantum_gates_inverse(&mut bytes, &schedule);
        fractal_unscale(&mut bytes, &schedule, state.lfsr_seed);
        Ok(deinterleave(&bytes, state.dimensions as usize))
    }
}

// ============================================================================
// Step 1: multidimensional interleave
// ============================================================================

/// Source index for every output position
fn interleave_order(len: usize, dimensions: usize) -> Vec<usize> {
    let bounds: Vec<(usize, usize)> = (0..dimensions)
        .map(|k| (k * len / dimensions, (k + 1) * len / dimensions))
        .collect();
    let longest = bounds.iter().map(|(start, end)| end - start).max().unwrap_or(0);

    let mut order = Vec::with_capacity(len);
    for offset in 0..longest {
        for &(start, end) in &bounds {
            if start + offset < end {
                order.push(start + offset);
            }
        }
    }
    order
}

fn interleave(data: &[u8], dimensions: usize) -> Vec<u8> {
    interleave_order(data.len(), dimensions)
        .into_iter()
        .map(|src| data[src])
        .collect()
}

fn deinterleave(data: &[u8], dimensions: usize) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];
    for (byte, dst) in data.iter().zip(interleave_order(data.len(), dimensions)) {
        out[dst] = *byte;
    }
    out
}

// ============================================================================
// Step 2: fractal position-weighted scaling
// ============================================================================

fn fibonacci_table() -> [u8; FIBONACCI_TERMS] {
    let mut table = [1u8; FIBONACCI_TERMS];
    for n in 2..FIBONACCI_TERMS {
        table[n] = table[n - 1].wrapping_add(table[n - 2]);
    }
    table
}

/// 32-bit Fibonacci LFSR with taps 32, 22, 2, 1
struct Lfsr(u32);

impl Lfsr {
    fn next_byte(&mut self) -> u8 {
        for _ in 0..8 {
            let s = self.0;
            let bit = (s >> 31) ^ (s >> 21) ^ (s >> 1) ^ s;
            self.0 = (s << 1) | (bit & 1);
        }
        self.0 as u8
    }
}

fn fractal_weight(table: &[u8; FIBONACCI_TERMS], offset: usize, i: usize) -> u8 {
    let mut weight = table[(i + offset) % FIBONACCI_TERMS];
    if i & (i >> 3) == 0 {
        weight ^= 0x5A;
    }
    weight | 1
}

fn fractal_scale(data: &mut [u8], schedule: &Schedule, lfsr_seed: u32) {
    let table = fibonacci_table();
    let mut lfsr = Lfsr(lfsr_seed | 1);
    for (i, byte) in data.iter_mut().enumerate() {
        let weight = fractal_weight(&table, schedule.fib_offset, i);
        *byte = byte.wrapping_mul(weight).wrapping_add(lfsr.next_byte());
    }
}

fn fractal_unscale(data: &mut [u8], schedule: &Schedule, lfsr_seed: u32) {
    let table = fibonacci_table();
    let mut lfsr = Lfsr(lfsr_seed | 1);
    for (i, byte) in data.iter_mut().enumerate() {
        let weight = fractal_weight(&table, schedule.fib_offset, i);
        *byte = byte
            .wrapping_sub(lfsr.next_byte())
            .wrapping_mul(inverse_mod_256(weight));
    }
}

// ============================================================================
// Step 3: quantum operators
// ============================================================================

fn parity_mask(i: usize) -> u8 {
    if i % 2 == 0 {
        0x55
    } else {
        0xAA
    }
}

fn quantum_gates(data: &mut [u8], schedule: &Schedule) {
    let spins = schedule.superposition.len();
    for (i, byte) in data.iter_mut().enumerate() {
        let mut x = *byte ^ 0xFF; // Pauli-X
        x = x.rotate_left(1); // Pauli-Y
        x ^= parity_mask(i); // Pauli-Z
        x = x.rotate_left(4); // Hadamard
        x ^= schedule.entanglement[i % 32];
        x ^= schedule.superposition[i % spins];
        *byte = x;
    }
}

fn quantum_gates_inverse(data: &mut [u8], schedule: &Schedule) {
    let spins = schedule.superposition.len();
    for (i, byte) in data.iter_mut().enumerate() {
        let mut x = *byte ^ schedule.superposition[i % spins];
        x ^= schedule.entanglement[i % 32];
        x = x.rotate_right(4);
        x ^= parity_mask(i);
        x = x.rotate_right(1);
        *byte = x ^ 0xFF;
    }
}

// ============================================================================
// Step 4: Gaussian-integer phase rotation
// ============================================================================

fn phase_rotate(data: &mut [u8], schedule: &Schedule) {
    let pairs = data.len() / 2;
    let mut chunks = data.chunks_exact_mut(2);
    for (k, pair) in (&mut chunks).enumerate() {
        let (c, d) = schedule.phases[k % PHASE_TABLE_SIZE];
        let (a, b) = (pair[0], pair[1]);
        pair[0] = a.wrapping_mul(c).wrapping_sub(b.wrapping_mul(d));
        pair[1] = a.wrapping_mul(d).wrapping_add(b.wrapping_mul(c));
    }
    if let [last] = chunks.into_remainder() {
        let (c, _) = schedule.phases[pairs % PHASE_TABLE_SIZE];
        *last = last.wrapping_mul(c);
    }
}

fn phase_unrotate(data: &mut [u8], schedule: &Schedule) {
    let pairs = data.len() / 2;
    let mut chunks = data.chunks_exact_mut(2);
    for (k, pair) in (&mut chunks).enumerate() {
        let (c, d) = schedule.phases[k % PHASE_TABLE_SIZE];
        let norm = c.wrapping_mul(c).wrapping_add(d.wrapping_mul(d));
        let norm_inv = inverse_mod_256(norm);
        let (a, b) = (pair[0], pair[1]);
        let re = a.wrapping_mul(c).wrapping_add(b.wrapping_mul(d));
        let im = b.wrapping_mul(c).wrapping_sub(a.wrapping_mul(d));
        pair[0] = re.wrapping_mul(norm_inv);
        pair[1] = im.wrapping_mul(norm_inv);
    }
    if let [last] = chunks.into_remainder() {
        let (c, _) = schedule.phases[pairs % PHASE_TABLE_SIZE];
        *last = last.wrapping_mul(inverse_mod_256(c));
    }
}

// ============================================================================
// Step 5: chaotic-map masking
// ============================================================================

fn chaos_start(seed: u64) -> f64 {
    let fraction = (seed % 1_000_000) as f64 / 1_000_000.0;
    0.1 + 0.8 * fraction
}

/// XOR with a logistic-map stream fed back by the ciphertext byte
fn chaos_mask(data: &mut [u8], seed: u64, decrypting: bool) {
    let mut x = chaos_start(seed);
    for byte in data.iter_mut() {
        x = LOGISTIC_R * x * (1.0 - x);
        let mask = (x * 256.0).floor() as u8;
        let input = *byte;
        *byte ^= mask;
        let cipher = if decrypting { input } else { *byte };
        x += f64::from(cipher) / 256.0;
        x -= x.floor();
        if !(1e-6..=1.0 - 1e-6).contains(&x) {
            x = 0.5;
        }
    }
}

// ============================================================================
// Step 6: fold digest
// ============================================================================

/// Checksum of 8-byte segment sums, first 16 hex characters
fn fold_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for segment in data.chunks(FOLD_SEGMENT) {
        let sum: u16 = segment.iter().map(|&b| u16::from(b)).sum();
        hasher.update(sum.to_le_bytes());
    }
    hasher.update((data.len() as u64).to_le_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(16);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::layers::RotorLayer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn quantum_state(seed: u64) -> QuantumState {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        match QuantumLayer::default().generate_state(&mut rng) {
            LayerState::Quantum(state) => state,
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_all_short_lengths() {
        let layer = QuantumLayer::default();
        let cancel = CancelToken::new();
        let ctx = LayerContext::new(&cancel);

        for len in 0..48usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
            let state = LayerState::Quantum(quantum_state(len as u64));
            let (out, snapshot) = layer.apply(state, &data, &ctx).unwrap();
            assert_eq!(out.len(), data.len());
            assert_eq!(layer.reverse(&snapshot, &out, &ctx).unwrap(), data, "len {}", len);
        }
    }

    #[test]
    fn test_interleave_inverts_for_every_dimension() {
        let data: Vec<u8> = (0..23).collect();
        for dimensions in 1..=16 {
            let mixed = interleave(&data, dimensions);
            assert_eq!(deinterleave(&mixed, dimensions), data);
        }
        assert_eq!(interleave(&[0, 1, 2, 3], 2), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_phase_rotation_inverts() {
        let state = quantum_state(3);
        let key = state.key_bytes(Direction::Encrypt).unwrap();
        let schedule = Schedule::derive(&state, &key);
        let original: Vec<u8> = (0..=255).collect();
        let mut data = original.clone();
        data.push(99);
        phase_rotate(&mut data, &schedule);
        phase_unrotate(&mut data, &schedule);
        assert_eq!(&data[..256], &original[..]);
        assert_eq!(data[256], 99);
    }

    #[test]
    fn test_chaos_stream_is_reproducible() {
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        chaos_mask(&mut a, 42, false);
        chaos_mask(&mut b, 42, false);
        assert_eq!(a, b);
        chaos_mask(&mut a, 42, true);
        assert_eq!(a, vec![0u8; 64]);
    }

    #[test]
    fn test_tampered_fold_digest_is_integrity_error() {
        let layer = QuantumLayer::default();
        let cancel = CancelToken::new();
        let ctx = LayerContext::new(&cancel);
        let (out, snapshot) = layer
            .apply(LayerState::Quantum(quantum_state(9)), b"payload bytes", &ctx)
            .unwrap();

        let mut tampered = match snapshot {
            LayerState::Quantum(state) => state,
            other => panic!("unexpected state {:?}", other),
        };
        tampered.fold_digest = Some("0000000000000000".to_string());
        let err = layer
            .reverse(&LayerState::Quantum(tampered), &out, &ctx)
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_foreign_state_is_rejected() {
        let layer = QuantumLayer::default();
        let cancel = CancelToken::new();
        let ctx = LayerContext::new(&cancel);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let rotor_state = RotorLayer::default().generate_state(&mut rng);

        let err = layer.apply(rotor_state.clone(), b"x", &ctx).unwrap_err();
        assert_eq!(err.error_code(), "STATE_MISMATCH");
        let err = layer.reverse(&rotor_state, b"x", &ctx).unwrap_err();
        assert_eq!(err.error_code(), "STATE_MISMATCH");
    }

    #[test]
    fn test_bad_key_is_state_mismatch() {
        let layer = QuantumLayer::default();
        let cancel = CancelToken::new();
        let ctx = LayerContext::new(&cancel);

        let mut not_hex = quantum_state(2);
        not_hex.quantum_key = "zz".repeat(32);
        let err = layer.apply(LayerState::Quantum(not_hex), b"x", &ctx).unwrap_err();
        assert_eq!(err.error_code(), "STATE_MISMATCH");
        assert!(err.to_string().contains("not hex"));

        let mut short = quantum_state(2);
        short.quantum_key = "ab".repeat(4);
        let err = layer.apply(LayerState::Quantum(short), b"x", &ctx).unwrap_err();
        assert!(err.to_string().contains("holds 4 bytes"));
    }

    #[test]
    fn test_state_has_no_float_fields() {
        let metadata = serde_json::to_value(quantum_state(5)).unwrap();
        for (_, value) in metadata.as_object().unwrap() {
            assert!(!value.is_f64());
        }
    }
}
