//! Process-wide entropy pool
//!
//! Every key and IV in the protocol is drawn from an [`EntropySource`].
//! The default [`EntropyPool`] keeps a CSPRNG behind a mutex, seeded once
//! from the operating system and topped up with fresh OS bytes on a fixed
//! interval. Reading before the first seed is an error, never a fallback.
//!
//! Nothing reseeds a pool on its own. Whoever owns it starts
//! [`EntropyPool::spawn_reseeder`]; the task ends with the pool or on abort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Domain tag mixed into every seed derivation
const SEED_DOMAIN: &[u8] = b"hushwire_v1_entropy_seed";

/// Smallest amount of OS entropy accepted for a seed or reseed
pub const MIN_SEED_BYTES: usize = 32;

/// Source of cryptographically strong random bytes
pub trait EntropySource: Send + Sync {
    /// Whether the source may be read from
    fn is_seeded(&self) -> bool;

    /// Fill `dest` with fresh random bytes.
    ///
    /// Two calls never observe the same output bytes.
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}

/// Draw a fixed-size array from an entropy source
pub fn random_array<const N: usize>(source: &dyn EntropySource) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    source.fill_bytes(&mut out)?;
    Ok(out)
}

/// Entropy pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntropyConfig {
    /// OS bytes folded into the initial seed
    pub initial_seed_bytes: usize,
    /// OS bytes folded in on every reseed
    pub reseed_bytes: usize,
    /// Seconds between background reseeds
    pub reseed_interval_secs: u64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            initial_seed_bytes: 32767,
            reseed_bytes: 1024,
            reseed_interval_secs: 5,
        }
    }
}

impl EntropyConfig {
    /// Reseed interval as Duration
    pub fn reseed_interval(&self) -> Duration {
        Duration::from_secs(self.reseed_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.initial_seed_bytes < MIN_SEED_BYTES {
            return Err(format!("initial_seed_bytes must be at least {MIN_SEED_BYTES}"));
        }
        if self.reseed_bytes < MIN_SEED_BYTES {
            return Err(format!("reseed_bytes must be at least {MIN_SEED_BYTES}"));
        }
        if self.reseed_interval_secs == 0 {
            return Err("reseed_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Mutex-guarded CSPRNG seeded from the operating system
pub struct EntropyPool {
    config: EntropyConfig,
    rng: Mutex<Option<StdRng>>,
    /// Short digest of the latest seed, for status display only
    seed_tag: Mutex<Option<[u8; 8]>>,
    reseeds: AtomicU64,
}

impl EntropyPool {
    /// Create an unseeded pool
    pub fn new(config: EntropyConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(None),
            seed_tag: Mutex::new(None),
            reseeds: AtomicU64::new(0),
        }
    }

    /// Create a pool and seed it from the OS immediately
    pub fn seeded(config: EntropyConfig) -> Result<Self> {
        let pool = Self::new(config);
        pool.seed_from_os()?;
        Ok(pool)
    }

    /// Seed (or re-seed from scratch) using `initial_seed_bytes` of OS entropy
    pub fn seed_from_os(&self) -> Result<()> {
        let fresh = os_bytes(self.config.initial_seed_bytes)?;
        let seed = derive_seed(&[], &fresh);
        self.install(seed);
        info!(bytes = self.config.initial_seed_bytes, "Entropy pool seeded");
        Ok(())
    }

    /// Mix `reseed_bytes` of fresh OS entropy into the generator.
    ///
    /// An unseeded pool is seeded from scratch instead.
    pub fn reseed(&self) -> Result<()> {
        let fresh = os_bytes(self.config.reseed_bytes)?;

        let mut guard = self.rng.lock();
        let Some(rng) = guard.as_mut() else {
            drop(guard);
            return self.seed_from_os();
        };

        let mut carry = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut carry[..]);
        let seed = derive_seed(&carry[..], &fresh);
        *rng = StdRng::from_seed(*seed);
        drop(guard);

        *self.seed_tag.lock() = Some(tag_of(&seed));
        self.reseeds.fetch_add(1, Ordering::Relaxed);
        debug!(bytes = self.config.reseed_bytes, "Entropy pool reseeded");
        Ok(())
    }

    /// Number of completed reseeds since creation
    pub fn reseed_count(&self) -> u64 {
        self.reseeds.load(Ordering::Relaxed)
    }

    /// Hex tag identifying the current seed generation, if seeded
    pub fn status(&self) -> Option<String> {
        let tag = *self.seed_tag.lock();
        tag.map(hex::encode)
    }

    /// Run [`reseed`](Self::reseed) every `reseed_interval_secs`.
    ///
    /// The task holds only a weak reference and exits once the pool is
    /// dropped; abort the handle to stop it earlier.
    pub fn spawn_reseeder(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = self.config.reseed_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                if let Err(e) = pool.reseed() {
                    warn!("Entropy reseed failed: {}", e);
                }
            }
            debug!("Entropy reseeder stopped");
        })
    }

    fn install(&self, seed: Zeroizing<[u8; 32]>) {
        *self.rng.lock() = Some(StdRng::from_seed(*seed));
        *self.seed_tag.lock() = Some(tag_of(&seed));
    }
}

impl EntropySource for EntropyPool {
    fn is_seeded(&self) -> bool {
        self.rng.lock().is_some()
    }

    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        let mut guard = self.rng.lock();
        let rng = guard.as_mut().ok_or(CryptoError::EntropyNotSeeded)?;
        rng.try_fill_bytes(dest)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
    }
}

fn os_bytes(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut fresh = Zeroizing::new(vec![0u8; len]);
    OsRng
        .try_fill_bytes(fresh.as_mut_slice())
        .map_err(|e| CryptoError::KeyGeneration(format!("OS entropy unavailable: {e}")))?;
    Ok(fresh)
}

fn derive_seed(carry: &[u8], fresh: &[u8]) -> Zeroizing<[u8; 32]> {
    let digest = Sha256::new()
        .chain_update(SEED_DOMAIN)
        .chain_update(carry)
        .chain_update(fresh)
        .finalize();
    Zeroizing::new(digest.into())
}

fn tag_of(seed: &[u8; 32]) -> [u8; 8] {
    let digest = Sha256::new()
        .chain_update(b"status")
        .chain_update(seed)
        .finalize();
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EntropyConfig {
        EntropyConfig {
            initial_seed_bytes: 64,
            reseed_bytes: 32,
            reseed_interval_secs: 5,
        }
    }

    #[test]
    fn test_unseeded_pool_refuses_reads() {
        let pool = EntropyPool::new(small_config());
        assert!(!pool.is_seeded());

        let mut buf = [0u8; 16];
        assert!(matches!(
            pool.fill_bytes(&mut buf),
            Err(CryptoError::EntropyNotSeeded)
        ));
        assert!(pool.status().is_none());
    }

    #[test]
    fn test_seeded_pool_never_repeats() {
        let pool = EntropyPool::seeded(small_config()).unwrap();

        let a: [u8; 32] = random_array(&pool).unwrap();
        let b: [u8; 32] = random_array(&pool).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reseed_changes_status() {
        let pool = EntropyPool::seeded(small_config()).unwrap();
        let before = pool.status().unwrap();

        pool.reseed().unwrap();

        assert_ne!(before, pool.status().unwrap());
        assert_eq!(pool.reseed_count(), 1);
    }

    #[test]
    fn test_reseed_on_unseeded_pool_seeds_it() {
        let pool = EntropyPool::new(small_config());
        pool.reseed().unwrap();
        assert!(pool.is_seeded());
    }

    #[test]
    fn test_concurrent_reads_are_distinct() {
        let pool = Arc::new(EntropyPool::seeded(small_config()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || random_array::<32>(pool.as_ref()).unwrap())
            })
            .collect();

        let mut outputs: Vec<[u8; 32]> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        outputs.sort();
        outputs.dedup();
        assert_eq!(outputs.len(), 8);
    }

    #[test]
    fn test_config_validation() {
        assert!(EntropyConfig::default().validate().is_ok());

        let config = EntropyConfig {
            reseed_bytes: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EntropyConfig {
            reseed_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_reseeder() {
        let pool = Arc::new(EntropyPool::seeded(small_config()).unwrap());
        let handle = pool.spawn_reseeder();

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert!(pool.reseed_count() >= 1);
        handle.abort();
    }
}
