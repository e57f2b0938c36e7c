//! L2: rotor machine substitution over the base64 alphabet

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::primitives::{random_hex, xor_keystream};
use super::{Layer, LayerContext, LayerId, LayerState};
use crate::error::{InscriptError, Result};
use crate::pipeline::Direction;

pub const ROTOR_LAYER_VERSION: &str = "2.0.0";

/// Symbols the machine permutes; `=` padding passes through
pub const ROTOR_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub const DEFAULT_POOL_SEED: u64 = 0x1A2B_3C4D_5E6F_7081;
pub const DEFAULT_ROTOR_COUNT: usize = 5;
pub const DEFAULT_ROTATION_INTERVAL: u32 = 100;

const POOL_SIZE: usize = 8;
const REFLECTOR_COUNT: usize = 4;
const NOTCHES_PER_ROTOR: usize = 3;
const WHITENING_LABEL: &[u8] = b"rotor-whitening";

type Wiring = [u8; 64];

/// Shared set of rotor wirings and reflectors built from one seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotorPool {
    seed: u64,
    wirings: Vec<Wiring>,
    inverses: Vec<Wiring>,
    reflectors: Vec<Wiring>,
}

impl RotorPool {
    /// Build the pool with a seeded Fisher-Yates shuffle
    pub fn generate(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut wirings = Vec::with_capacity(POOL_SIZE);
        let mut inverses = Vec::with_capacity(POOL_SIZE);

        for _ in 0..POOL_SIZE {
            let mut wiring: Wiring = std::array::from_fn(|i| i as u8);
            wiring.shuffle(&mut rng);
            let mut inverse = [0u8; 64];
            for (i, &target) in wiring.iter().enumerate() {
                inverse[target as usize] = i as u8;
            }
            wirings.push(wiring);
            inverses.push(inverse);
        }

        let reflectors = (0..REFLECTOR_COUNT)
            .map(|_| {
                let mut symbols: Wiring = std::array::from_fn(|i| i as u8);
                symbols.shuffle(&mut rng);
                let mut reflector = [0u8; 64];
                for pair in symbols.chunks_exact(2) {
                    reflector[pair[0] as usize] = pair[1];
                    reflector[pair[1] as usize] = pair[0];
                }
                reflector
            })
            .collect();

        Self {
            seed,
            wirings,
            inverses,
            reflectors,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rotor_count(&self) -> usize {
        self.wirings.len()
    }

    pub fn reflector_count(&self) -> usize {
        self.reflectors.len()
    }
}

/// Per-operation L2 machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotorState {
    pub pool_seed: u64,
    pub rotor_order: Vec<u8>,
    pub positions: Vec<u8>,
    pub turnovers: Vec<Vec<u8>>,
    /// Two-symbol swap pairs such as `"Aq"`
    pub plugboard: Vec<String>,
    pub reflector: u8,
    pub whitening_key: String,
    pub rotation_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_positions: Option<Vec<u8>>,
}

fn symbol_index(symbol: u8) -> Option<u8> {
    match symbol {
        b'A'..=b'Z' => Some(symbol - b'A'),
        b'a'..=b'z' => Some(symbol - b'a' + 26),
        b'0'..=b'9' => Some(symbol - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

struct Slot {
    rotor: usize,
    position: u8,
    notches: Vec<u8>,
}

/// Running machine built from a snapshot
struct Machine<'a> {
    pool: &'a RotorPool,
    slots: Vec<Slot>,
    plugboard: Wiring,
    reflector: &'a Wiring,
    rotation_interval: u64,
    processed: u64,
}

impl<'a> Machine<'a> {
    fn build(pool: &'a RotorPool, state: &RotorState, direction: Direction) -> Result<Self> {
        let fail = |reason: String| InscriptError::state_mismatch(LayerId::Rotor, direction, reason);

        if state.rotor_order.is_empty() {
            return Err(fail("machine has no rotors".to_string()));
        }
        if state.positions.len() != state.rotor_order.len()
            || state.turnovers.len() != state.rotor_order.len()
        {
            return Err(fail("rotor order, positions and turnovers differ in length".to_string()));
        }
        if state.rotation_interval == 0 {
            return Err(fail("rotation interval must be positive".to_string()));
        }

        let mut slots = Vec::with_capacity(state.rotor_order.len());
        for ((&rotor, &position), notches) in state
            .rotor_order
            .iter()
            .zip(&state.positions)
            .zip(&state.turnovers)
        {
            if rotor as usize >= pool.rotor_count() {
                return Err(fail(format!("rotor {} is not in the pool", rotor)));
            }
            if position >= 64 || notches.iter().any(|&n| n >= 64) {
                return Err(fail("rotor position out of range".to_string()));
            }
            slots.push(Slot {
                rotor: rotor as usize,
                position,
                notches: notches.clone(),
            });
        }

        let reflector = pool
            .reflectors
            .get(state.reflector as usize)
            .ok_or_else(|| fail(format!("reflector {} is not in the pool", state.reflector)))?;

        let mut plugboard: Wiring = std::array::from_fn(|i| i as u8);
        let mut used = [false; 64];
        for pair in &state.plugboard {
            let symbols: Vec<u8> = pair.bytes().map(symbol_index).collect::<Option<_>>().unwrap_or_default();
            if symbols.len() != 2 || symbols[0] == symbols[1] {
                return Err(fail(format!("invalid plugboard pair {:?}", pair)));
            }
            let (a, b) = (symbols[0] as usize, symbols[1] as usize);
            if used[a] || used[b] {
                return Err(fail(format!("plugboard reuses a symbol in {:?}", pair)));
            }
            used[a] = true;
            used[b] = true;
            plugboard[a] = b as u8;
            plugboard[b] = a as u8;
        }

        Ok(Self {
            pool,
            slots,
            plugboard,
            reflector,
            rotation_interval: u64::from(state.rotation_interval),
            processed: 0,
        })
    }

    fn substitute(&self, symbol: u8) -> u8 {
        let mut s = self.plugboard[symbol as usize];
        for slot in &self.slots {
            let p = slot.position;
            let wired = self.pool.wirings[slot.rotor][((s + p) % 64) as usize];
            s = (wired + 64 - p) % 64;
        }
        s = self.reflector[s as usize];
        for slot in self.slots.iter().rev() {
            let p = slot.position;
            let wired = self.pool.inverses[slot.rotor][((s + p) % 64) as usize];
            s = (wired + 64 - p) % 64;
        }
        self.plugboard[s as usize]
    }

    fn step(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.position = (slot.position + 1) % 64;
            if !slot.notches.contains(&slot.position) {
                break;
            }
        }
        self.processed += 1;
        if self.processed % self.rotation_interval == 0 {
            self.slots.rotate_left(1);
        }
    }

    /// Run the machine over base64 text; `=` is copied through
    fn run(&mut self, text: &[u8], direction: Direction) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len());
        for &symbol in text {
            if symbol == b'=' {
                out.push(symbol);
                continue;
            }
            let index = symbol_index(symbol).ok_or_else(|| {
                InscriptError::state_mismatch(
                    LayerId::Rotor,
                    direction,
                    format!("byte 0x{:02x} is outside the rotor alphabet", symbol),
                )
            })?;
            out.push(ROTOR_ALPHABET[self.substitute(index) as usize]);
            self.step();
        }
        Ok(out)
    }

    fn positions(&self) -> Vec<u8> {
        self.slots.iter().map(|slot| slot.position).collect()
    }
}

/// Rotor machine layer template
#[derive(Debug, Clone)]
pub struct RotorLayer {
    pool: Arc<RotorPool>,
    rotor_count: usize,
}

impl RotorLayer {
    pub fn new(pool_seed: u64, rotor_count: usize) -> Self {
        Self::with_pool(Arc::new(RotorPool::generate(pool_seed)), rotor_count)
    }

    pub fn with_pool(pool: Arc<RotorPool>, rotor_count: usize) -> Self {
        let rotor_count = rotor_count.clamp(1, pool.rotor_count());
        Self { pool, rotor_count }
    }

    fn pool_for(&self, seed: u64) -> Arc<RotorPool> {
        if seed == self.pool.seed() {
            Arc::clone(&self.pool)
        } else {
            tracing::debug!(pool_seed = seed, "rebuilding rotor pool for foreign snapshot");
            Arc::new(RotorPool::generate(seed))
        }
    }

    fn whitening_key(state: &RotorState, direction: Direction) -> Result<Vec<u8>> {
        hex::decode(&state.whitening_key).map_err(|e| {
            InscriptError::state_mismatch(
                LayerId::Rotor,
                direction,
                format!("whitening key is not hex: {}", e),
            )
        })
    }
}

impl Default for RotorLayer {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SEED, DEFAULT_ROTOR_COUNT)
    }
}

impl Layer for RotorLayer {
    fn id(&self) -> LayerId {
        LayerId::Rotor
    }

    fn name(&self) -> &'static str {
        "rotor-machine"
    }

    fn version(&self) -> &'static str {
        ROTOR_LAYER_VERSION
    }

    fn generate_state(&self, rng: &mut dyn RngCore) -> LayerState {
        let mut indices: Vec<u8> = (0..self.pool.rotor_count() as u8).collect();
        indices.shuffle(&mut *rng);
        let rotor_order: Vec<u8> = indices.into_iter().take(self.rotor_count).collect();

        let positions = (0..self.rotor_count).map(|_| rng.gen_range(0..64u8)).collect();

        let turnovers = (0..self.rotor_count)
            .map(|_| {
                let mut symbols: Vec<u8> = (0..64).collect();
                symbols.shuffle(&mut *rng);
                let mut notches: Vec<u8> = symbols.into_iter().take(NOTCHES_PER_ROTOR).collect();
                notches.sort_unstable();
                notches
            })
            .collect();

        let pair_count = rng.gen_range(10..=20usize);
        let mut symbols: Vec<u8> = ROTOR_ALPHABET.to_vec();
        symbols.shuffle(&mut *rng);
        let plugboard = symbols
            .chunks_exact(2)
            .take(pair_count)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect();

        let reflector = rng.gen_range(0..self.pool.reflector_count() as u8);

        LayerState::Rotor(RotorState {
            pool_seed: self.pool.seed(),
            rotor_order,
            positions,
            turnovers,
            plugboard,
            reflector,
            whitening_key: random_hex(rng, 16),
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            symbols_processed: None,
            final_positions: None,
        })
    }

    fn apply(
        &self,
        state: LayerState,
        data: &[u8],
        _ctx: &LayerContext<'_>,
    ) -> Result<(Vec<u8>, LayerState)> {
        let mut state = match state {
            LayerState::Rotor(state) => state,
            other => return Err(other.mismatch(LayerId::Rotor, Direction::Encrypt)),
        };
        let key = Self::whitening_key(&state, Direction::Encrypt)?;
        let pool = self.pool_for(state.pool_seed);
        let mut machine = Machine::build(&pool, &state, Direction::Encrypt)?;

        let mut whitened = data.to_vec();
        xor_keystream(&mut whitened, &key, WHITENING_LABEL);
        let text = STANDARD.encode(&whitened);
        let out = machine.run(text.as_bytes(), Direction::Encrypt)?;

        state.symbols_processed = Some(machine.processed);
        state.final_positions = Some(machine.positions());
        Ok((out, LayerState::Rotor(state)))
    }

    fn reverse(&self, state: &LayerState, data: &[u8], _ctx: &LayerContext<'_>) -> Result<Vec<u8>> {
        let state = match state {
            LayerState::Rotor(state) => state,
            other => return Err(other.mismatch(LayerId::Rotor, Direction::Decrypt)),
        };
        let key = Self::whitening_key(state, Direction::Decrypt)?;
        let pool = self.pool_for(state.pool_seed);
        let mut machine = Machine::build(&pool, state, Direction::Decrypt)?;

        let text = machine.run(data, Direction::Decrypt)?;

        let final_positions = machine.positions();
        if state.final_positions.as_ref() != Some(&final_positions)
            || state.symbols_processed != Some(machine.processed)
        {
            return Err(InscriptError::state_mismatch(
                LayerId::Rotor,
                Direction::Decrypt,
                "machine did not end in the recorded position",
            ));
        }

        let mut bytes = STANDARD.decode(&text).map_err(|e| {
            InscriptError::state_mismatch(
                LayerId::Rotor,
                Direction::Decrypt,
                format!("machine output is not base64: {}", e),
            )
        })?;
        xor_keystream(&mut bytes, &key, WHITENING_LABEL);
        Ok(bytes)
    }
}
