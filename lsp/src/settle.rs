//! Settle engine: wait until a document's diagnostics stop changing.
//!
//! Language servers publish diagnostics in several uncorrelated rounds
//! (gopls sends type-check results, then analyzer results) and never say
//! which round is the last. A wait therefore has two phases:
//!
//! 1. Block until the first publication, the caller's timeout, or
//!    cancellation.
//! 2. Keep re-arming a quiet-period timer on every further publication and
//!    return once [`DIAGNOSTIC_SETTLE_TIME`] passes with nothing new.
//!
//! The timeout only bounds phase 1. Cancellation is honored in both.

use std::time::Duration;

use lspbridge_types::{DiagnosticsWait, DocumentUri, WaitOutcome};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::DiagnosticHub;
use crate::waiters::Registration;

/// Quiet period after the latest publication before diagnostics count as
/// settled. Not configurable.
pub const DIAGNOSTIC_SETTLE_TIME: Duration = Duration::from_millis(1500);

impl DiagnosticHub {
    /// Wait for the next publication for `uri`, then for the stream to settle.
    ///
    /// Always returns the cached diagnostics at the moment the wait ended.
    /// A timeout before the first publication yields [`WaitOutcome::TimedOut`]
    /// with whatever is cached (possibly nothing); that is not a failure.
    /// Cached data from before the call does not short-circuit the wait.
    pub async fn wait_for_diagnostics(
        &self,
        uri: &DocumentUri,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DiagnosticsWait {
        self.register_wait(uri).wait(timeout, cancel).await
    }

    /// Register interest in `uri` now and wait later.
    ///
    /// Publications that arrive between this call and [`PendingWait::wait`]
    /// still end phase 1. Use it when the notification that triggers the
    /// publication is sent after registering.
    #[must_use]
    pub fn register_wait<'a>(&'a self, uri: &'a DocumentUri) -> PendingWait<'a> {
        PendingWait {
            hub: self,
            uri,
            waiter: self.waiters.register(uri),
        }
    }

    async fn settle(&self, uri: &DocumentUri, cancel: &CancellationToken) -> DiagnosticsWait {
        let timer = tokio::time::sleep(DIAGNOSTIC_SETTLE_TIME);
        tokio::pin!(timer);
        let mut rounds = 1usize;

        let outcome = loop {
            let mut waiter = self.waiters.register(uri);
            tokio::select! {
                () = waiter.fired() => {
                    rounds += 1;
                    timer.as_mut().reset(Instant::now() + DIAGNOSTIC_SETTLE_TIME);
                }
                () = &mut timer => break WaitOutcome::Settled,
                () = cancel.cancelled() => break WaitOutcome::Cancelled,
            }
        };

        tracing::debug!(uri = %uri, rounds, outcome = outcome.label(), "Diagnostics settled");
        DiagnosticsWait::new(self.diagnostics(uri), outcome)
    }
}

/// A registered, not yet awaited, diagnostics wait.
/// Dropping it deregisters the waiter.
pub struct PendingWait<'a> {
    hub: &'a DiagnosticHub,
    uri: &'a DocumentUri,
    waiter: Registration<'a>,
}

impl PendingWait<'_> {
    /// Run both phases. See [`DiagnosticHub::wait_for_diagnostics`].
    pub async fn wait(self, timeout: Duration, cancel: &CancellationToken) -> DiagnosticsWait {
        let Self {
            hub,
            uri,
            mut waiter,
        } = self;

        let early_exit = tokio::select! {
            () = waiter.fired() => None,
            () = cancel.cancelled() => Some(WaitOutcome::Cancelled),
            () = tokio::time::sleep(timeout) => Some(WaitOutcome::TimedOut),
        };
        drop(waiter);

        if let Some(outcome) = early_exit {
            tracing::debug!(uri = %uri, outcome = outcome.label(), "Diagnostics wait ended before first publication");
            return DiagnosticsWait::new(hub.diagnostics(uri), outcome);
        }

        hub.settle(uri, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lspbridge_types::{Diagnostic, DiagnosticSeverity};

    fn uri(name: &str) -> DocumentUri {
        DocumentUri::parse(&format!("file:///workspace/{name}")).unwrap()
    }

    fn make_diag(msg: &str) -> Diagnostic {
        Diagnostic::new(
            DiagnosticSeverity::Error,
            msg.to_string(),
            0,
            0,
            "test".to_string(),
        )
    }

    fn messages(wait: &DiagnosticsWait) -> Vec<&str> {
        wait.diagnostics.iter().map(Diagnostic::message).collect()
    }

    /// Publish `items` for `doc` after `delay`, from a separate task.
    fn publish_after(
        hub: &Arc<DiagnosticHub>,
        doc: &DocumentUri,
        delay: Duration,
        items: Vec<Diagnostic>,
    ) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(hub);
        let doc = doc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            hub.publish(doc, items);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_empty_result() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        let start = Instant::now();
        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_millis(100), &CancellationToken::new())
            .await;
        let elapsed = start.elapsed();

        assert_eq!(wait.outcome, WaitOutcome::TimedOut);
        assert!(!wait.outcome.is_cancelled());
        assert!(wait.diagnostics.is_empty());
        assert!(
            elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150),
            "expected ~100ms wait, took {elapsed:?}"
        );
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_stale_cache() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");
        hub.publish(doc.clone(), vec![make_diag("stale")]);

        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_millis(100), &CancellationToken::new())
            .await;

        assert_eq!(wait.outcome, WaitOutcome::TimedOut);
        assert_eq!(messages(&wait), ["stale"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_promptly() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_secs(5), &cancel)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(wait.outcome, WaitOutcome::Cancelled);
        assert!(wait.diagnostics.is_empty());
        assert!(
            elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(100),
            "expected ~50ms wait, took {elapsed:?}"
        );
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_returns_cache() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");
        hub.publish(doc.clone(), vec![make_diag("cached")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_secs(5), &cancel)
            .await;

        assert_eq!(wait.outcome, WaitOutcome::Cancelled);
        assert_eq!(messages(&wait), ["cached"]);
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_notification_even_with_cache() {
        let hub = Arc::new(DiagnosticHub::new());
        let doc = uri("main.go");
        hub.publish(doc.clone(), vec![make_diag("stale")]);

        publish_after(&hub, &doc, Duration::from_millis(50), vec![make_diag("fresh")]);

        let start = Instant::now();
        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_secs(5), &CancellationToken::new())
            .await;
        let elapsed = start.elapsed();

        assert_eq!(wait.outcome, WaitOutcome::Settled);
        assert_eq!(messages(&wait), ["fresh"]);
        // ~50ms for the notification + the settle period
        let expected = Duration::from_millis(50) + DIAGNOSTIC_SETTLE_TIME;
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(100),
            "expected notification + settle, took {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_coalesces_multiple_rounds() {
        let hub = Arc::new(DiagnosticHub::new());
        let doc = uri("main.go");

        // Type-check pass, then a slower analysis pass.
        publish_after(&hub, &doc, Duration::from_millis(50), vec![make_diag("error 1")]);
        publish_after(
            &hub,
            &doc,
            Duration::from_millis(150),
            vec![make_diag("error 1"), make_diag("warning 1")],
        );

        let start = Instant::now();
        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_secs(5), &CancellationToken::new())
            .await;
        let elapsed = start.elapsed();

        assert_eq!(wait.outcome, WaitOutcome::Settled);
        assert_eq!(messages(&wait), ["error 1", "warning 1"]);
        let expected = Duration::from_millis(150) + DIAGNOSTIC_SETTLE_TIME;
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(100),
            "expected last round + settle, took {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_only_first_round() {
        let hub = Arc::new(DiagnosticHub::new());
        let doc = uri("main.go");

        publish_after(&hub, &doc, Duration::from_millis(50), vec![make_diag("a")]);
        publish_after(
            &hub,
            &doc,
            Duration::from_millis(400),
            vec![make_diag("a"), make_diag("b")],
        );

        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_millis(100), &CancellationToken::new())
            .await;

        assert_eq!(wait.outcome, WaitOutcome::Settled);
        assert_eq!(messages(&wait), ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_settle_keeps_data() {
        let hub = Arc::new(DiagnosticHub::new());
        let doc = uri("main.go");
        let cancel = CancellationToken::new();

        publish_after(&hub, &doc, Duration::from_millis(50), vec![make_diag("partial")]);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let wait = hub
            .wait_for_diagnostics(&doc, Duration::from_secs(5), &cancel)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(wait.outcome, WaitOutcome::Cancelled);
        assert_eq!(messages(&wait), ["partial"]);
        assert!(elapsed < DIAGNOSTIC_SETTLE_TIME, "took {elapsed:?}");
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_same_and_other_document() {
        let hub = Arc::new(DiagnosticHub::new());
        let doc = uri("main.go");
        let other = uri("other.go");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let hub = Arc::clone(&hub);
            let doc = doc.clone();
            handles.push(tokio::spawn(async move {
                hub.wait_for_diagnostics(&doc, Duration::from_secs(5), &CancellationToken::new())
                    .await
            }));
        }
        let other_handle = {
            let hub = Arc::clone(&hub);
            let other = other.clone();
            tokio::spawn(async move {
                hub.wait_for_diagnostics(
                    &other,
                    Duration::from_millis(500),
                    &CancellationToken::new(),
                )
                .await
            })
        };

        publish_after(&hub, &doc, Duration::from_millis(50), vec![make_diag("shared")]);

        for handle in handles {
            let wait = handle.await.unwrap();
            assert_eq!(wait.outcome, WaitOutcome::Settled);
            assert_eq!(messages(&wait), ["shared"]);
        }
        let other_wait = other_handle.await.unwrap();
        assert_eq!(other_wait.outcome, WaitOutcome::TimedOut);
        assert!(other_wait.diagnostics.is_empty());

        assert_eq!(hub.waiter_count(&doc), 0);
        assert_eq!(hub.waiter_count(&other), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_wait_sees_publication_before_polling() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        let pending = hub.register_wait(&doc);
        assert_eq!(hub.waiter_count(&doc), 1);
        hub.publish(doc.clone(), vec![make_diag("early")]);

        let start = Instant::now();
        let wait = pending
            .wait(Duration::from_millis(100), &CancellationToken::new())
            .await;

        assert_eq!(wait.outcome, WaitOutcome::Settled);
        assert_eq!(messages(&wait), vec!["early"]);
        assert!(start.elapsed() >= DIAGNOSTIC_SETTLE_TIME);
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[test]
    fn test_dropped_pending_wait_deregisters() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        let pending = hub.register_wait(&doc);
        assert_eq!(hub.waiter_count(&doc), 1);
        drop(pending);
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_deregisters() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            hub.wait_for_diagnostics(&doc, Duration::from_secs(5), &CancellationToken::new()),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(hub.waiter_count(&doc), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_concurrent_publish_and_wait() {
        let hub = Arc::new(DiagnosticHub::new());
        let docs: Vec<DocumentUri> = (0..4).map(|i| uri(&format!("f{i}.go"))).collect();

        let mut tasks = Vec::new();
        for p in 0..4 {
            let hub = Arc::clone(&hub);
            let docs = docs.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    let doc = docs[(p + i) % docs.len()].clone();
                    hub.publish(doc.clone(), vec![make_diag(&format!("p{p}-{i}"))]);
                    let _ = hub.diagnostics(&doc);
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut waits = Vec::new();
        for w in 0..16 {
            let hub = Arc::clone(&hub);
            let doc = docs[w % docs.len()].clone();
            let cancel = CancellationToken::new();
            if w % 4 == 0 {
                cancel.cancel();
            }
            waits.push(tokio::spawn(async move {
                let wait = hub
                    .wait_for_diagnostics(&doc, Duration::from_millis(20), &cancel)
                    .await;
                (doc, wait)
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        for wait in waits {
            let (_, wait) = wait.await.unwrap();
            // Every publish carries exactly one diagnostic.
            assert!(wait.diagnostics.len() <= 1);
        }
        for doc in &docs {
            assert_eq!(hub.waiter_count(doc), 0);
            assert_eq!(hub.diagnostics(doc).len(), 1);
        }
        assert!(!hub.waiters.has_empty_entries());
    }
}
