//! Validation and dispatch of one inbound client message

use crate::backend::BackendSender;
use crate::error::{BrokerError, Result};
use crate::protocol::{Action, Command};
use std::sync::Arc;

#[derive(Clone)]
pub struct RequestRouter {
    backend: Arc<dyn BackendSender>,
}

impl RequestRouter {
    pub fn new(backend: Arc<dyn BackendSender>) -> Self {
        Self { backend }
    }

    /// Parse, validate and forward one raw client frame.
    ///
    /// On success the command has been handed to the backend. Every error
    /// is meant for the originating client only.
    pub fn dispatch(&self, raw: &str) -> Result<Action> {
        let command = Command::parse(raw)?;
        let action = command.action();
        tracing::info!(action = %action, "Received action");

        self.backend
            .send(&command.to_backend_message())
            .inspect_err(|e| {
                if matches!(e, BrokerError::BackendUnavailable) {
                    tracing::error!(action = %action, "Backend service is not connected");
                }
            })?;

        tracing::debug!(action = %action, "Forwarded request to backend service");
        Ok(action)
    }

    /// Dispatch and turn any failure into the reply for the sender.
    pub fn handle(&self, raw: &str) -> Option<String> {
        match self.dispatch(raw) {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(code = e.to_error_code(), error = %e, "Rejected client request");
                Some(e.to_reply_json())
            },
        }
    }
}
