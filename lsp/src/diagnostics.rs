//! Diagnostics hub: latest published diagnostics per document, plus the
//! waiters blocked on the next publication.
//!
//! The cache and the waiter registry sit behind separate locks. Ingress
//! updates the cache first and broadcasts second, so anything woken by a
//! publication reads the set that publication carried.

use std::collections::HashMap;

use lspbridge_types::{Diagnostic, DocumentUri};
use parking_lot::Mutex;

use crate::waiters::WaiterRegistry;

/// Latest diagnostic set per document. Entries are replaced, never merged,
/// and live for the lifetime of the session.
pub(crate) struct DiagnosticCache {
    data: Mutex<HashMap<DocumentUri, Vec<Diagnostic>>>,
}

impl DiagnosticCache {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, uri: &DocumentUri) -> Vec<Diagnostic> {
        self.data.lock().get(uri).cloned().unwrap_or_default()
    }

    pub fn set(&self, uri: DocumentUri, items: Vec<Diagnostic>) {
        self.data.lock().insert(uri, items);
    }

    pub fn document_count(&self) -> usize {
        self.data.lock().len()
    }
}

/// Per-session diagnostics state shared between the server reader task and
/// every caller waiting on diagnostics.
pub struct DiagnosticHub {
    pub(crate) cache: DiagnosticCache,
    pub(crate) waiters: WaiterRegistry,
}

impl DiagnosticHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: DiagnosticCache::new(),
            waiters: WaiterRegistry::new(),
        }
    }

    /// Current cached diagnostics; empty if the server never published for `uri`.
    #[must_use]
    pub fn diagnostics(&self, uri: &DocumentUri) -> Vec<Diagnostic> {
        self.cache.get(uri)
    }

    /// Record a `publishDiagnostics` notification and wake everyone waiting on it.
    pub fn publish(&self, uri: DocumentUri, items: Vec<Diagnostic>) {
        let count = items.len();
        self.cache.set(uri.clone(), items);
        let woken = self.waiters.broadcast(&uri);
        tracing::debug!(uri = %uri, count, woken, "Diagnostics published");
    }

    /// Number of callers currently blocked on `uri`.
    #[must_use]
    pub fn waiter_count(&self, uri: &DocumentUri) -> usize {
        self.waiters.waiter_count(uri)
    }

    /// Number of documents the server has published diagnostics for.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.cache.document_count()
    }
}

impl Default for DiagnosticHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lspbridge_types::DiagnosticSeverity;

    fn uri(name: &str) -> DocumentUri {
        DocumentUri::parse(&format!("file:///workspace/{name}")).unwrap()
    }

    fn make_diag(severity: DiagnosticSeverity, msg: &str) -> Diagnostic {
        Diagnostic::new(severity, msg.to_string(), 0, 0, "test".to_string())
    }

    #[test]
    fn test_unpublished_document_is_empty() {
        let hub = DiagnosticHub::new();
        assert!(hub.diagnostics(&uri("main.go")).is_empty());
        assert_eq!(hub.document_count(), 0);
    }

    #[test]
    fn test_publish_replaces_previous_set() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        hub.publish(
            doc.clone(),
            vec![
                make_diag(DiagnosticSeverity::Error, "err1"),
                make_diag(DiagnosticSeverity::Error, "err2"),
            ],
        );
        assert_eq!(hub.diagnostics(&doc).len(), 2);

        // Server re-publishes with only one error
        hub.publish(doc.clone(), vec![make_diag(DiagnosticSeverity::Error, "err1")]);
        let items = hub.diagnostics(&doc);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message(), "err1");
    }

    #[test]
    fn test_empty_publish_keeps_entry() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        hub.publish(doc.clone(), vec![make_diag(DiagnosticSeverity::Error, "e")]);
        hub.publish(doc.clone(), vec![]);

        assert!(hub.diagnostics(&doc).is_empty());
        assert_eq!(hub.document_count(), 1);
    }

    #[test]
    fn test_publish_wakes_only_matching_document() {
        let hub = DiagnosticHub::new();
        let a = uri("a.go");
        let b = uri("b.go");

        let _waiter_a = hub.waiters.register(&a);
        let _waiter_b = hub.waiters.register(&b);

        hub.publish(a.clone(), vec![]);

        assert_eq!(hub.waiter_count(&a), 0);
        assert_eq!(hub.waiter_count(&b), 1);
    }

    #[tokio::test]
    async fn test_woken_waiter_observes_published_set() {
        let hub = DiagnosticHub::new();
        let doc = uri("main.go");

        for round in 0..20 {
            let expected: Vec<Diagnostic> = (0..round)
                .map(|i| make_diag(DiagnosticSeverity::Warning, &format!("w{i}")))
                .collect();

            let mut waiter = hub.waiters.register(&doc);
            hub.publish(doc.clone(), expected.clone());
            waiter.fired().await;

            assert_eq!(hub.diagnostics(&doc), expected);
        }
    }
}
