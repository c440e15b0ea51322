use aquaflux_core::VaultTransaction;
use serde::{Deserialize, Serialize};

/// An event sent to connected clients, written as one JSON `data:` line.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    /// First event of every stream
    Connected,
    /// Keeps idle connections open through proxies
    Heartbeat,
    /// Transactions that were not known before
    NewTransactions {
        /// The new transactions
        transactions: Vec<VaultTransaction>,
    },
}

impl SseEvent {
    /// JSON encoding used as the event data.
    pub fn to_data(&self) -> String {
        // Serializing these plain data variants cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Event name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SseEvent::Connected => "connected",
            SseEvent::Heartbeat => "heartbeat",
            SseEvent::NewTransactions { .. } => "new_transactions",
        }
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn data_lines() {
        expect![[r#"{"type":"connected"}"#]].assert_eq(&SseEvent::Connected.to_data());
        expect![[r#"{"type":"heartbeat"}"#]].assert_eq(&SseEvent::Heartbeat.to_data());
        expect![[r#"{"type":"new_transactions","transactions":[]}"#]].assert_eq(
            &SseEvent::NewTransactions {
                transactions: vec![],
            }
            .to_data(),
        );
    }
}
