use byteorder::{BigEndian, ByteOrder};

use crate::CryptoError;

// IV_SIZE is the length of an AES-GCM IV.
pub const IV_SIZE: usize = 12;

// IV_COUNTER_LIMIT bounds the per-direction record counter. The bound keeps
// the counter inside the range the original deployment platforms can count
// to exactly; a session that reaches it must be torn down rather than wrap.
pub const IV_COUNTER_LIMIT: u64 = 1 << 53;

/// Which party originated a record. The one-byte fixed field derived from
/// the direction keeps the two parties' IV spaces disjoint under a shared
/// key, so each (key, IV) pair is used at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Initiator,
    Receiver,
}

impl Direction {
    pub fn fixed_field(self) -> u8 {
        match self {
            Direction::Initiator => 0,
            Direction::Receiver => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Initiator => Direction::Receiver,
            Direction::Receiver => Direction::Initiator,
        }
    }
}

/// `IvSequence` produces the 96-bit IVs for one direction of one session:
/// a 32-bit big-endian word holding the fixed field in its low octet,
/// followed by a monotonic 64-bit big-endian counter. The sequence refuses
/// to run past its bound.
#[derive(Debug)]
pub struct IvSequence {
    fixed: u8,
    counter: u64,
    limit: u64,
}

impl IvSequence {
    pub fn new(direction: Direction) -> Self {
        Self::with_limit(direction, IV_COUNTER_LIMIT)
    }

    /// A sequence with a reduced bound. Exhaustion behaviour is part of the
    /// protocol contract, so the bound is an explicit parameter rather than
    /// a test-only hook.
    pub fn with_limit(direction: Direction, limit: u64) -> Self {
        IvSequence {
            fixed: direction.fixed_field(),
            counter: 0,
            limit,
        }
    }

    pub fn next(&mut self) -> Result<[u8; IV_SIZE], CryptoError> {
        if self.counter >= self.limit {
            return Err(CryptoError::IvExhausted);
        }
        let mut iv = [0; IV_SIZE];
        BigEndian::write_u32(&mut iv[..4], self.fixed as u32);
        BigEndian::write_u64(&mut iv[4..], self.counter);
        self.counter += 1;
        Ok(iv)
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}
