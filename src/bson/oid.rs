//! 12-byte object identifier generation and rendering.

use byteorder::{BigEndian, ByteOrder};
use hex;
use rand;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use time;

use Error::ArgumentError;
use Result;

// Process-wide identifier state: the fuzz word is drawn once and shared by
// every id the process generates; the counter is monotonic modulo 2^32.
// Both have injectable sources that must be installed before first use.
static OID_FUZZ: AtomicUsize = AtomicUsize::new(0);
static OID_FUZZ_INIT: Once = Once::new();
static OID_COUNTER: AtomicUsize = AtomicUsize::new(0);
static FUZZ_SOURCE: Mutex<Option<fn() -> u32>> = Mutex::new(None);
static COUNTER_SOURCE: Mutex<Option<fn() -> u32>> = Mutex::new(None);

/// Replaces the default random fuzz with a caller-supplied source. Call
/// once at startup, before any id is generated; later calls are ignored.
pub fn set_fuzz_source(source: fn() -> u32) {
    if let Ok(mut slot) = FUZZ_SOURCE.lock() {
        if slot.is_none() {
            *slot = Some(source);
        }
    }
}

/// Replaces the process-local counter with a caller-supplied source.
/// Callers generating ids concurrently must install a thread-safe source.
pub fn set_counter_source(source: fn() -> u32) {
    if let Ok(mut slot) = COUNTER_SOURCE.lock() {
        if slot.is_none() {
            *slot = Some(source);
        }
    }
}

fn fuzz() -> u32 {
    OID_FUZZ_INIT.call_once(|| {
        let value = match FUZZ_SOURCE.lock() {
            Ok(slot) => match *slot {
                Some(source) => source(),
                None => rand::random::<u32>(),
            },
            Err(_) => rand::random::<u32>(),
        };
        OID_FUZZ.store(value as usize, Ordering::SeqCst);
    });
    OID_FUZZ.load(Ordering::SeqCst) as u32
}

fn next_counter() -> u32 {
    if let Ok(slot) = COUNTER_SOURCE.lock() {
        if let Some(source) = *slot {
            return source();
        }
    }
    (OID_COUNTER.fetch_add(1, Ordering::SeqCst) as u32).wrapping_add(1)
}

/// A 12-byte identifier: big-endian seconds since the epoch, a per-process
/// fuzz word in native order, and a big-endian counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    /// Generates a fresh identifier from the process-wide sources.
    pub fn new() -> ObjectId {
        let mut bytes = [0; 12];
        let secs = time::get_time().sec as u32;
        BigEndian::write_u32(&mut bytes[0..4], secs);
        bytes[4..8].copy_from_slice(&fuzz().to_ne_bytes());
        BigEndian::write_u32(&mut bytes[8..12], next_counter());
        ObjectId { bytes: bytes }
    }

    pub fn with_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId { bytes: bytes }
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Renders the identifier as 24 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes[..])
    }

    /// Seconds since the epoch at which the identifier was generated.
    pub fn generated_time(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[0..4])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ::Error;

    fn from_str(s: &str) -> Result<ObjectId> {
        let decoded = hex::decode(s)
            .map_err(|_| ArgumentError(format!("'{}' is not a hex object id", s)))?;
        if decoded.len() != 12 {
            return Err(ArgumentError(
                format!("object id must be 24 hex characters, got {}", s.len()),
            ));
        }
        let mut bytes = [0; 12];
        bytes.copy_from_slice(&decoded);
        Ok(ObjectId { bytes: bytes })
    }
}
