use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, allowing probe calls
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration, immutable after construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of classified failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of probe successes in half-open state before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time to wait in open state before allowing a probe, in milliseconds
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Number of concurrent probe calls allowed in half-open state
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_max_calls() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Cumulative counters for a breaker, process-scoped
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls admitted
    pub total_calls: u64,
    /// Number of successful calls
    pub successful_calls: u64,
    /// Number of failed calls (classified and unclassified)
    pub failed_calls: u64,
    /// Number of calls rejected while open or at the half-open cap
    pub rejected_calls: u64,
    /// Number of attempts that hit their deadline
    pub timeout_count: u64,
    /// Number of times the circuit opened
    pub circuit_opened_count: u64,
    /// Number of times the circuit closed
    pub circuit_closed_count: u64,
    /// Number of times the circuit half-opened
    pub circuit_half_opened_count: u64,
}

/// Point-in-time snapshot of one breaker, consumed by monitoring surfaces
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Classified failures observed in the current closed period
    pub failure_count: u32,
    /// Probe successes observed in the current half-open period
    pub success_count: u32,
    /// When the most recent classified failure was recorded
    pub last_failure_time: Option<Instant>,
    /// When the breaker last changed state
    pub last_state_change: Instant,
    /// The breaker's configuration
    pub config: CircuitBreakerConfig,
    /// Cumulative counters
    pub metrics: CircuitBreakerMetrics,
}
