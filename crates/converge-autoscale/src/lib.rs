//! converge-autoscale: utilization-driven replica recommendations.
//!
//! Compares the mean of fresh per-instance utilization samples against the
//! workload's target and recommends a replica count for the tick.
//!
//! # Scaling Algorithm
//!
//! ```text
//! fresh   = samples newer than 2 * sampling_interval
//! if fresh is empty or |fresh| < ready_replicas:
//!     hold current (NoMetrics)
//!
//! raw     = ceil(current * mean(fresh) / target)
//! clamped = clamp(raw, min_replicas, max_replicas)            // AtBound
//! limited = clamped bounded by scale-up / scale-down rates    // RateLimited
//!
//! scale down: final = max(limited, min(current, max(raw over down window)))
//! scale up:   final = min(limited, max(current, min(raw over up window)))
//! ```
//!
//! Rate limits apply before the stabilization windows. The default windows
//! give fast scale-up (0s) and slow scale-down (300s).

pub mod scaler;

pub use scaler::Autoscaler;
