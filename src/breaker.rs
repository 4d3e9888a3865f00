//! Circuit breaker in front of the HTTP trigger.
//!
//! After `failure_threshold` consecutive 5xx responses the breaker opens and
//! every request is answered `503` without reaching a handler. Once
//! `reset_timeout` has passed, a single trial request is let through: a
//! non-5xx answer closes the breaker, a 5xx opens it again.
//!
//! Admission hands out a [`BreakerPermit`]. The trial slot belongs to the
//! permit that claimed it, so a request admitted earlier cannot decide the
//! trial. A trial permit dropped without an outcome (client gone, handler
//! panicked) counts as a failure and restarts the open period.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

/// Admission of one request. Report its outcome with
/// [`record`](Self::record); dropping it unreported releases the trial slot
/// as a failure.
#[must_use = "an unreported trial permit counts as a failure"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    reported: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds the half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, server_error: bool) {
        self.reported = true;
        self.breaker.settle(self.trial, server_error);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.reported && self.trial {
            warn!("Circuit breaker trial request abandoned");
            self.breaker.settle(true, true);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let Ok(inner) = self.inner.lock() else {
            return BreakerState::Closed;
        };
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.reset_timeout => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Admit a request, or `None` while open. Claims the trial slot when
    /// half-open.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let trial = match inner.opened_at {
            None => false,
            Some(at) if at.elapsed() >= self.reset_timeout && !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                true
            }
            Some(_) => return None,
        };
        Some(BreakerPermit {
            breaker: self,
            trial,
            reported: false,
        })
    }

    fn settle(&self, trial: bool, server_error: bool) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if trial {
            inner.trial_in_flight = false;
            if server_error {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker trial failed, open again");
            } else {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                info!("Circuit breaker closed");
            }
            return;
        }

        // Requests admitted before the breaker opened finish here too; they
        // neither close it nor restart its clock.
        if inner.opened_at.is_some() {
            return;
        }
        if !server_error {
            inner.consecutive_failures = 0;
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.consecutive_failures >= self.failure_threshold {
            warn!(
                "Circuit breaker opened after {} consecutive failures",
                inner.consecutive_failures
            );
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Axum middleware applying a shared [`CircuitBreaker`].
pub async fn circuit_breaker_middleware(
    State(breaker): State<Arc<CircuitBreaker>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(permit) = breaker.try_acquire() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "detail": "Service temporarily unavailable" })),
        )
            .into_response();
    };
    let response = next.run(req).await;
    permit.record(response.status().is_server_error());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn fail(b: &CircuitBreaker) {
        b.try_acquire().expect("admitted").record(true);
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = CircuitBreaker::new(3, Duration::from_secs(60));
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);

        fail(&b);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_acquire().is_none());
    }

    #[test]
    fn success_resets_the_count() {
        let b = CircuitBreaker::new(2, Duration::from_secs(60));
        fail(&b);
        b.try_acquire().unwrap().record(false);
        fail(&b);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_one_trial() {
        let b = CircuitBreaker::new(1, Duration::ZERO);
        fail(&b);
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(b.try_acquire().is_none(), "second request during trial");

        trial.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(!b.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn failed_trial_reopens() {
        let b = CircuitBreaker::new(5, Duration::from_millis(20));
        for _ in 0..5 {
            fail(&b);
        }
        std::thread::sleep(Duration::from_millis(30));
        b.try_acquire().unwrap().record(true);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn dropped_trial_reopens_instead_of_jamming() {
        let b = CircuitBreaker::new(1, Duration::from_millis(20));
        fail(&b);
        std::thread::sleep(Duration::from_millis(30));

        let trial = b.try_acquire().unwrap();
        drop(trial);
        assert_eq!(b.state(), BreakerState::Open, "open period restarts");

        std::thread::sleep(Duration::from_millis(30));
        let retry = b.try_acquire().expect("a new trial is admitted");
        assert!(retry.is_trial());
        retry.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn late_request_does_not_decide_the_trial() {
        let b = CircuitBreaker::new(1, Duration::ZERO);
        let early = b.try_acquire().unwrap();
        fail(&b);

        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        early.record(false);
        assert_ne!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire().is_none(), "trial slot still held");

        trial.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn abandoned_trial_request_lets_the_server_recover() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(20)));
        let app = Router::new()
            .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "late"
                }),
            )
            .route("/ok", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&breaker),
                circuit_breaker_middleware,
            ));
        let get = |uri: &str| {
            axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let resp = app.clone().oneshot(get("/fail")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The trial is cut off by the client.
        let cut = tokio::time::timeout(Duration::from_millis(50), app.clone().oneshot(get("/slow")));
        assert!(cut.await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let resp = app.clone().oneshot(get("/ok")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
