/*!
 * Retry/fallback policy.
 *
 * For one work unit, providers are tried in fallback order. Each provider
 * gets up to `max_retries_per_provider` calls, separated by exponential
 * backoff with jitter. Auth and request failures move straight on to the
 * next provider. Every attempt is written to the ledger before the policy
 * decides what to do next.
 */

use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::app_config::RetrySettings;
use crate::errors::{FailureKind, OrchestrationError, ProviderError, ProviderTrial};
use crate::ledger::{Attempt, AttemptOutcome, JobLedger};
use crate::providers::ProviderHandle;
use crate::translation::document::WorkUnit;
use crate::translation::prompts::Prompt;

/// Delay schedule between calls to the same provider
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base_delay_ms: u64,
    rate_limit_base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            base_delay_ms: settings.base_delay_ms,
            rate_limit_base_delay_ms: settings.rate_limit_base_delay_ms,
            multiplier: settings.multiplier.max(1.0),
            max_delay_ms: settings.max_delay_ms,
            jitter_ratio: settings.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Delay after the `failures`-th consecutive failure of `unit_key` with one provider.
    ///
    /// The jitter is drawn from an RNG seeded with the unit key and `failures`,
    /// so a given failure sequence always produces the same delays while
    /// different units retrying together spread out.
    pub fn delay(&self, kind: FailureKind, failures: u32, unit_key: &str) -> Duration {
        let base = match kind {
            FailureKind::RateLimited => self.rate_limit_base_delay_ms,
            _ => self.base_delay_ms,
        };
        if base == 0 || self.max_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = failures.saturating_sub(1).min(32) as i32;
        let raw = base as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        let jittered = if self.jitter_ratio > 0.0 {
            let mut rng = StdRng::seed_from_u64(jitter_seed(unit_key, failures));
            let factor: f64 = rng.random_range(-self.jitter_ratio..=self.jitter_ratio);
            capped * (1.0 + factor)
        } else {
            capped
        };

        Duration::from_millis(jittered.clamp(0.0, self.max_delay_ms as f64).round() as u64)
    }
}

fn jitter_seed(unit_key: &str, failures: u32) -> u64 {
    let digest = Sha256::digest(unit_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix) ^ u64::from(failures)
}

/// Terminal result of dispatching one unit
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A provider produced an accepted payload, already stored in the ledger
    Succeeded {
        provider: String,
        output: String,
        /// Calls made during this dispatch
        attempts: u32,
    },
    /// Every candidate failed; the providers tried, in order
    Exhausted { trials: Vec<ProviderTrial> },
    /// Stop was requested before the unit resolved
    Cancelled,
}

/// Decides which provider to call, when to retry and when to give up
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    ledger: JobLedger,
    backoff: Backoff,
    max_retries_per_provider: u32,
}

impl RetryPolicy {
    pub fn new(ledger: JobLedger, settings: &RetrySettings) -> Self {
        Self {
            ledger,
            backoff: Backoff::from_settings(settings),
            max_retries_per_provider: settings.max_retries_per_provider.max(1),
        }
    }

    pub fn max_retries_per_provider(&self) -> u32 {
        self.max_retries_per_provider
    }

    /// Resolve one unit against the candidate providers.
    ///
    /// `validate` turns response text into the stored payload; a rejected
    /// response counts as a retryable `unknown` failure. A call abandoned
    /// because of `cancel` records no attempt and leaves the unit pending.
    pub async fn dispatch<V>(
        &self,
        document_id: &str,
        unit: &WorkUnit,
        prompt: &Prompt,
        candidates: &[ProviderHandle],
        validate: V,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, OrchestrationError>
    where
        V: Fn(&str) -> Result<String, String>,
    {
        let mut sequence = self
            .ledger
            .attempt_count(document_id, unit.phase, unit.key.as_str())
            .await?;
        let mut trials = Vec::new();
        let mut total_calls = 0;

        for (position, handle) in candidates.iter().enumerate() {
            let mut calls = 0;
            let mut last_failure = None;

            while calls < self.max_retries_per_provider {
                if cancel.is_cancelled() {
                    return Ok(DispatchOutcome::Cancelled);
                }

                calls += 1;
                total_calls += 1;
                sequence += 1;

                let started_at = Utc::now();
                let clock = Instant::now();
                let result = tokio::select! {
                    biased;
                    result = handle.generate(prompt) => result,
                    _ = cancel.cancelled() => {
                        debug!("Abandoned call to '{}' for unit '{}'", handle.name, unit.key);
                        return Ok(DispatchOutcome::Cancelled);
                    }
                };
                let latency_ms = clock.elapsed().as_millis() as u64;

                let accepted = result.and_then(|generation| match validate(&generation.text) {
                    Ok(output) => Ok((generation, output)),
                    Err(reason) => Err(ProviderError::new(
                        FailureKind::Unknown,
                        format!("unusable response: {}", reason),
                    )),
                });

                match accepted {
                    Ok((generation, output)) => {
                        let attempt = Attempt::new(
                            document_id,
                            unit,
                            sequence,
                            &handle.name,
                            AttemptOutcome::Success,
                        )
                        .with_timing(started_at, latency_ms)
                        .with_usage(generation.usage);
                        self.ledger.record_success(&attempt, &output).await?;

                        debug!(
                            "Unit '{}' ({}) succeeded on '{}' after {} call(s)",
                            unit.key, unit.phase, handle.name, total_calls
                        );
                        return Ok(DispatchOutcome::Succeeded {
                            provider: handle.name.clone(),
                            output,
                            attempts: total_calls,
                        });
                    }
                    Err(error) => {
                        let attempt = Attempt::new(
                            document_id,
                            unit,
                            sequence,
                            &handle.name,
                            AttemptOutcome::from_failure(error.kind),
                        )
                        .with_message(error.message.clone())
                        .with_timing(started_at, latency_ms);
                        self.ledger.record_attempt(&attempt).await?;

                        warn!(
                            "Attempt {}/{} on '{}' for unit '{}' failed ({}): {}",
                            calls,
                            self.max_retries_per_provider,
                            handle.name,
                            unit.key,
                            error.kind,
                            error.message
                        );
                        last_failure = Some(error.kind);

                        if !error.kind.is_retryable() {
                            break;
                        }

                        if calls < self.max_retries_per_provider {
                            let delay = self.backoff.delay(error.kind, calls, unit.key.as_str());
                            if !delay.is_zero() {
                                debug!("Backing off {:?} before retrying '{}'", delay, handle.name);
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = cancel.cancelled() => return Ok(DispatchOutcome::Cancelled),
                                }
                            }
                        }
                    }
                }
            }

            if let Some(kind) = last_failure {
                trials.push(ProviderTrial {
                    provider: handle.name.clone(),
                    attempts: calls,
                    last_failure: kind,
                });
            }

            if let Some(next) = candidates.get(position + 1) {
                info!(
                    "Falling back from '{}' to '{}' for unit '{}'",
                    handle.name, next.name, unit.key
                );
            }
        }

        Ok(DispatchOutcome::Exhausted { trials })
    }
}
