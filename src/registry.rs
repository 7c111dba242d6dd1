//! Name-indexed registry sharing circuit breakers across call sites.
//!
//! Two call sites that resolve the same name observe the same breaker
//! instance: a burst of failures at one site is visible at the other. The
//! registry owns each breaker; callers hold `Arc` clones.
//!
//! A lazily initialized process-wide registry is available through
//! [`CircuitBreakerRegistry::global`]; explicit instances can be constructed
//! for injection or test isolation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::ConfigResult;

static GLOBAL_REGISTRY: Lazy<CircuitBreakerRegistry> = Lazy::new(CircuitBreakerRegistry::new);

type BreakerMap = HashMap<String, Arc<CircuitBreaker>>;

/// Process-wide mapping from names to shared circuit breakers.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<BreakerMap>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { breakers: Mutex::new(HashMap::new()) }
    }

    /// The process-wide registry, initialized on first use.
    pub fn global() -> &'static CircuitBreakerRegistry {
        &GLOBAL_REGISTRY
    }

    /// Create and register a breaker from the given configuration.
    ///
    /// If a breaker already exists under the configured name, the existing
    /// instance is returned unchanged; two `create` calls with the same name
    /// always yield the same instance.
    pub fn create(&self, config: CircuitBreakerConfig) -> ConfigResult<Arc<CircuitBreaker>> {
        let name = config.name.clone();
        // Construct outside the lock; the map lock is never held across
        // anything but the insertion itself.
        let breaker = Arc::new(CircuitBreaker::new(config)?);

        let mut map = self.lock_map();
        let entry = map.entry(name).or_insert(breaker);
        Ok(Arc::clone(entry))
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let map = self.lock_map();
        map.get(name).cloned()
    }

    /// Look up a breaker by name, creating one with the default thresholds
    /// when absent.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        debug!(name, "Registering circuit breaker with default configuration");
        let breaker = Arc::new(
            CircuitBreaker::new(CircuitBreakerConfig::named(name))
                .expect("Default breaker config should be valid"),
        );

        let mut map = self.lock_map();
        Arc::clone(map.entry(name.to_string()).or_insert(breaker))
    }

    /// Register an externally constructed breaker under its own name.
    ///
    /// Returns the canonical instance for that name: the given breaker when
    /// the name was free, the previously registered one otherwise.
    pub fn register(&self, breaker: Arc<CircuitBreaker>) -> Arc<CircuitBreaker> {
        let name = breaker.name().to_string();
        let mut map = self.lock_map();
        Arc::clone(map.entry(name).or_insert(breaker))
    }

    /// Remove every registered breaker. Intended for test isolation.
    pub fn clear(&self) {
        let mut map = self.lock_map();
        map.clear();
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    /// Whether the registry holds no breakers.
    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn lock_map(&self) -> MutexGuard<'_, BreakerMap> {
        match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Circuit breaker registry lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}
