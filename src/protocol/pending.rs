use std::collections::HashMap;

use super::{Request, RequestId};

/// Requests sent but not yet answered, keyed by id.
#[derive(Debug, Default)]
pub(super) struct PendingRequests {
    requests: HashMap<RequestId, Request>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request. Returns false, leaving the table untouched, if a request
    /// with the same id is already pending.
    pub fn register(&mut self, request: Request) -> bool {
        if self.requests.contains_key(&request.id) {
            return false;
        }
        self.requests.insert(request.id.clone(), request);
        true
    }

    /// Removes and returns the request answered by `id`.
    pub fn complete(&mut self, id: &RequestId) -> Option<Request> {
        self.requests.remove(id)
    }

    /// Removes every pending request, ordered by id.
    pub fn drain(&mut self) -> Vec<Request> {
        let mut orphaned: Vec<Request> = self.requests.drain().map(|(_, req)| req).collect();
        orphaned.sort_by(|a, b| {
            (a.id.as_str().len(), a.id.as_str()).cmp(&(b.id.as_str().len(), b.id.as_str()))
        });
        orphaned
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Call;

    fn request(id: u64) -> Request {
        Request::new(RequestId::from(id), Call::GetLeaves)
    }

    #[test]
    fn register_and_complete() {
        let mut pending = PendingRequests::new();

        assert!(pending.register(request(1)));
        assert_eq!(pending.len(), 1);

        let done = pending.complete(&RequestId::from(1)).unwrap();
        assert_eq!(done, request(1));
        assert_eq!(pending.len(), 0);

        // Matched once only
        assert!(pending.complete(&RequestId::from(1)).is_none());
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let mut pending = PendingRequests::new();

        assert!(pending.register(request(4)));
        assert!(!pending.register(Request::new(RequestId::from(4), Call::GetAllReferences)));
        assert_eq!(pending.complete(&RequestId::from(4)), Some(request(4)));
    }

    #[test]
    fn complete_unknown_id() {
        let mut pending = PendingRequests::new();
        assert!(pending.complete(&RequestId::from(9)).is_none());
    }

    #[test]
    fn drain_orders_numerically() {
        let mut pending = PendingRequests::new();
        for id in [10, 2, 1] {
            pending.register(request(id));
        }

        let ids: Vec<String> = pending
            .drain()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "10"]);
        assert_eq!(pending.len(), 0);
    }
}
