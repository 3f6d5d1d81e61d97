//! Push-subscription seam for log notifications.

use crate::{config::redact_url, error::SubscriptionSetupError, events::LogNotification};
use async_trait::async_trait;
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter},
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;

/// Opens a log subscription for a single address.
///
/// The returned receiver yields notifications until the upstream stream ends.
/// Dropping the receiver cancels the subscription.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        address: Pubkey,
        commitment: CommitmentLevel,
    ) -> Result<mpsc::Receiver<LogNotification>, SubscriptionSetupError>;
}

/// [`LogSubscriber`] over the Solana PubSub `logsSubscribe` method.
///
/// Each subscription owns its own WebSocket connection, driven by a background
/// task that forwards notifications into a bounded channel.
pub struct SolanaPubsub {
    ws_url: String,
    buffer: usize,
}

impl SolanaPubsub {
    pub fn new(ws_url: impl Into<String>, buffer: usize) -> Self {
        Self {
            ws_url: ws_url.into(),
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl LogSubscriber for SolanaPubsub {
    async fn subscribe(
        &self,
        address: Pubkey,
        commitment: CommitmentLevel,
    ) -> Result<mpsc::Receiver<LogNotification>, SubscriptionSetupError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(forward_logs(
            self.ws_url.clone(),
            address,
            commitment,
            tx,
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SubscriptionSetupError::Closed(address.to_string())),
        }
    }
}

async fn forward_logs(
    ws_url: String,
    address: Pubkey,
    commitment: CommitmentLevel,
    tx: mpsc::Sender<LogNotification>,
    ready: oneshot::Sender<Result<(), SubscriptionSetupError>>,
) {
    // The caller gives up on setup by dropping the receiver.
    let connected = tokio::select! {
        res = PubsubClient::new(&ws_url) => res,
        _ = tx.closed() => return,
    };
    let client = match connected {
        Ok(client) => client,
        Err(e) => {
            let _ = ready.send(Err(SubscriptionSetupError::Connect {
                url: redact_url(&ws_url),
                reason: e.to_string(),
            }));
            return;
        }
    };

    'session: {
        let subscription = tokio::select! {
            res = client.logs_subscribe(
                RpcTransactionLogsFilter::Mentions(vec![address.to_string()]),
                RpcTransactionLogsConfig {
                    commitment: Some(CommitmentConfig { commitment }),
                },
            ) => Some(res),
            _ = tx.closed() => None,
        };
        let (mut stream, unsubscribe) = match subscription {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => {
                let _ = ready.send(Err(SubscriptionSetupError::Subscribe {
                    address: address.to_string(),
                    reason: e.to_string(),
                }));
                break 'session;
            }
            None => break 'session,
        };
        if ready.send(Ok(())).is_err() {
            tracing::debug!(%address, "Subscriber went away during setup");
        }

        tracing::info!(%address, "logsSubscribe active");
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(response) => {
                        let value = response.value;
                        let notification = LogNotification {
                            signature: value.signature,
                            logs: value.logs,
                            failed: value.err.is_some(),
                        };
                        if tx.send(notification).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(%address, "Log stream ended");
                        break;
                    }
                },
                _ = tx.closed() => {
                    tracing::debug!(%address, "Receiver dropped, unsubscribing");
                    break;
                }
            }
        }

        drop(stream);
        unsubscribe().await;
    }

    if let Err(e) = client.shutdown().await {
        tracing::debug!(%address, "PubSub client shutdown failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_setup_error_without_the_key() {
        // Nothing listens on port 1.
        let pubsub = SolanaPubsub::new("ws://127.0.0.1:1/?api-key=secret", 4);
        let result = pubsub
            .subscribe(Pubkey::new_unique(), CommitmentLevel::Confirmed)
            .await;

        match result {
            Err(SubscriptionSetupError::Connect { url, .. }) => {
                assert_eq!(url, "ws://127.0.0.1:1/?<redacted>");
            }
            other => panic!("expected a connect error, got {:?}", other.map(|_| ())),
        }
    }
}
