use std::time::Duration;

use tokio::time::Instant;

use crate::models::ThrottleStatus;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Points below which the client starts pacing itself.
    pub low_water_mark: f64,
    /// Floor for any computed delay.
    pub min_delay: Duration,
    /// Delay used when a response carries no throttle block.
    pub unknown_budget_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            low_water_mark: 100.0,
            min_delay: Duration::from_millis(500),
            unknown_budget_delay: Duration::from_secs(1),
        }
    }
}

/// Proportional backoff: nothing while the bucket holds at least the
/// low-water mark, otherwise the time needed to refill the deficit at the
/// advertised restore rate, never less than `min_delay`.
pub fn compute_delay(
    currently_available: f64,
    restore_rate: f64,
    policy: &BackoffPolicy,
) -> Result<Duration, String> {
    if !currently_available.is_finite() {
        return Err(format!("currentlyAvailable is not finite: {currently_available}"));
    }
    if currently_available >= policy.low_water_mark {
        return Ok(Duration::ZERO);
    }
    if !restore_rate.is_finite() || restore_rate <= 0.0 {
        return Err(format!("restoreRate must be positive, got {restore_rate}"));
    }

    let deficit = policy.low_water_mark - currently_available;
    let secs = deficit / restore_rate;
    let delay = Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())?;
    Ok(delay.max(policy.min_delay))
}

/// Last observed throttle state. Lives only in memory and is rebuilt from
/// the first response after a restart.
#[derive(Debug, Clone, Default)]
pub struct RateBudget {
    pub currently_available: Option<f64>,
    pub maximum_available: Option<f64>,
    pub restore_rate: Option<f64>,
    pub last_observed_at: Option<Instant>,
    next_call_at: Option<Instant>,
}

impl RateBudget {
    /// Record the throttle block of a response (or its absence) and schedule
    /// the earliest time the next call may go out. Returns the scheduled delay.
    pub fn observe(
        &mut self,
        status: Option<&ThrottleStatus>,
        policy: &BackoffPolicy,
    ) -> Result<Duration, String> {
        let now = Instant::now();
        self.last_observed_at = Some(now);

        let delay = match status {
            Some(s) => {
                self.currently_available = Some(s.currently_available);
                self.maximum_available = Some(s.maximum_available);
                self.restore_rate = Some(s.restore_rate);
                compute_delay(s.currently_available, s.restore_rate, policy)?
            }
            None => {
                self.currently_available = None;
                self.maximum_available = None;
                self.restore_rate = None;
                policy.unknown_budget_delay
            }
        };

        self.next_call_at = if delay.is_zero() {
            None
        } else {
            Some(now + delay)
        };
        Ok(delay)
    }

    /// Time left before the next call is allowed.
    pub fn pending_delay(&self) -> Duration {
        self.next_call_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Sleep until the next call is allowed.
    pub async fn wait_turn(&self) {
        if let Some(at) = self.next_call_at {
            let remaining = at.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                tracing::debug!(delay_ms = remaining.as_millis() as u64, "pacing shopify call");
                tokio::time::sleep_until(at).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    fn status(available: f64, restore: f64) -> ThrottleStatus {
        ThrottleStatus {
            maximum_available: 2000.0,
            currently_available: available,
            restore_rate: restore,
        }
    }

    #[test]
    fn no_delay_above_low_water_mark() {
        assert_eq!(compute_delay(1500.0, 100.0, &policy()).unwrap(), Duration::ZERO);
        assert_eq!(compute_delay(100.0, 100.0, &policy()).unwrap(), Duration::ZERO);
    }

    #[test]
    fn delay_is_proportional_to_deficit() {
        // (100 - 50) / 10 = 5 seconds
        let delay = compute_delay(50.0, 10.0, &policy()).unwrap();
        assert!(delay >= Duration::from_secs(5), "got {delay:?}");
        assert_eq!(delay, Duration::from_secs(5));

        let deeper = compute_delay(0.0, 10.0, &policy()).unwrap();
        assert_eq!(deeper, Duration::from_secs(10));
    }

    #[test]
    fn small_deficit_is_floored_at_min_delay() {
        // (100 - 99) / 100 = 10ms, floored to 500ms
        let delay = compute_delay(99.0, 100.0, &policy()).unwrap();
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[test]
    fn zero_restore_rate_is_an_error() {
        let err = compute_delay(10.0, 0.0, &policy()).unwrap_err();
        assert!(err.contains("restoreRate"), "got: {err}");
        assert!(compute_delay(f64::NAN, 10.0, &policy()).is_err());
    }

    #[tokio::test]
    async fn observe_schedules_next_call() {
        let mut budget = RateBudget::default();
        let delay = budget.observe(Some(&status(50.0, 10.0)), &policy()).unwrap();
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(budget.currently_available, Some(50.0));
        assert!(budget.pending_delay() > Duration::from_millis(4900));

        budget.observe(Some(&status(1800.0, 100.0)), &policy()).unwrap();
        assert_eq!(budget.pending_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn missing_throttle_block_falls_back_to_fixed_delay() {
        let mut budget = RateBudget::default();
        budget.observe(Some(&status(1800.0, 100.0)), &policy()).unwrap();
        let delay = budget.observe(None, &policy()).unwrap();
        assert_eq!(delay, Duration::from_secs(1));
        assert!(budget.currently_available.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_turn_sleeps_out_the_delay() {
        let mut budget = RateBudget::default();
        budget.observe(Some(&status(50.0, 10.0)), &policy()).unwrap();

        let before = Instant::now();
        budget.wait_turn().await;
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(budget.pending_delay(), Duration::ZERO);
    }
}
