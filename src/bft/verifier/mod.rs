//! The application boundary: checking, signing and delivering results.
//!
//! `Verifier` is the one port the engine calls out through, deliberately
//! thin: the application supplies verification and execution, the
//! engine supplies ordering.

use std::sync::Arc;

use crate::bft::error::Result;
use crate::bft::message::{NodeId, RequestMessage};

/// The application-supplied hooks the engine calls into.
///
/// Implementors must be `Send + Sync`: the resolver task calls these
/// methods while holding no lock the dispatcher can observe, but the
/// trait object is shared across the engine's tasks via `Arc`.
pub trait Verifier: Send + Sync {
    /// Checks that an inbound request is well-formed and admissible
    /// before it is allowed to start a new consensus instance.
    fn check_msg(&self, req: &RequestMessage) -> Result<()>;

    /// Signs the opaque `pass` blob attached to an outbound `Commit` vote.
    fn sign_msg(&self, node_id: &NodeId, digest: &[u8]) -> Result<Vec<u8>>;

    /// Delivers the outcome of a committed request to the application.
    ///
    /// `res` is 1 when the reply's `nodeId` equals
    /// [`crate::bft::message::EXECUTED_SENTINEL`], 0 otherwise.
    fn reply_result(&self, req: &RequestMessage, res: u8) -> Result<()>;
}

/// A shared handle to the application's verifier, usable across the
/// engine's cooperating tasks.
pub type SharedVerifier = Arc<dyn Verifier>;

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use std::sync::Mutex;

    /// A verifier that accepts everything and records delivered replies,
    /// used by the engine's own integration tests.
    #[derive(Default)]
    pub struct AcceptingVerifier {
        pub delivered: Mutex<Vec<(String, u8)>>,
    }

    impl Verifier for AcceptingVerifier {
        fn check_msg(&self, _req: &RequestMessage) -> Result<()> {
            Ok(())
        }

        fn sign_msg(&self, _node_id: &NodeId, _digest: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0u8; 4])
        }

        fn reply_result(&self, req: &RequestMessage, res: u8) -> Result<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((req.client_id.clone(), res));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::AcceptingVerifier;
    use super::*;

    #[test]
    fn accepting_verifier_records_reply_results() {
        let v = AcceptingVerifier::default();
        let req = RequestMessage {
            client_id: "c1".into(),
            timestamp: 0,
            operation: serde_json::json!(null),
            sequence_id: 1,
            height: 1,
            payload: vec![],
        };
        v.reply_result(&req, 1).unwrap();
        assert_eq!(v.delivered.lock().unwrap()[0], ("c1".to_string(), 1));
    }
}
