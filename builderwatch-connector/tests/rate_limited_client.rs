mod common;

use builderwatch_connector::{error::TransportError, rpc::RateLimitedClient};
use common::*;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

fn history(count: i64) -> (Pubkey, MockLedger) {
    let address = Pubkey::new_unique();
    let mut ledger = MockLedger::new();
    for i in (0..count).rev() {
        ledger.push_tx(address, &format!("sig-{i:04}"), 1_000 + i, &[NOISE_LOG], false);
    }
    (address, ledger)
}

#[tokio::test(start_paused = true)]
async fn signatures_are_paged_up_to_the_limit() -> anyhow::Result<()> {
    let (address, ledger) = history(1_500);
    let ledger = Arc::new(ledger);
    let client = RateLimitedClient::new(ledger.clone(), Duration::from_millis(250));

    let signatures = client.list_signatures(&address, 1_200).await?;
    assert_eq!(signatures.len(), 1_200);
    assert_eq!(signatures.first().unwrap().signature, "sig-1499");
    assert_eq!(signatures.last().unwrap().signature, "sig-0300");

    let kinds: Vec<Call> = ledger.calls().into_iter().map(|(_, c)| c).collect();
    assert_eq!(
        kinds,
        [
            Call::ListSignatures { limit: 1_000 },
            Call::ListSignatures { limit: 200 },
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn short_history_stops_paging() -> anyhow::Result<()> {
    let (address, ledger) = history(30);
    let ledger = Arc::new(ledger);
    let client = RateLimitedClient::new(ledger.clone(), Duration::from_millis(250));

    let signatures = client.list_signatures(&address, 1_000).await?;
    assert_eq!(signatures.len(), 30);
    assert_eq!(ledger.calls().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transactions_are_fetched_in_aligned_throttled_batches() -> anyhow::Result<()> {
    let (_, ledger) = history(45);
    let ledger = Arc::new(ledger);
    let client = RateLimitedClient::new(ledger.clone(), Duration::from_millis(250));
    let wanted: Vec<String> = (0..45).rev().map(|i| format!("sig-{i:04}")).collect();

    let started = Instant::now();
    let records = client.get_transactions(&wanted).await?;
    let returned: Vec<&str> = records.iter().map(|r| r.signature.as_str()).collect();
    assert_eq!(returned, wanted);

    let calls = ledger.calls();
    let sizes: Vec<Call> = calls.iter().map(|(_, c)| c.clone()).collect();
    assert_eq!(
        sizes,
        [
            Call::GetTransactions { count: 20 },
            Call::GetTransactions { count: 20 },
            Call::GetTransactions { count: 5 },
        ]
    );
    // Two gaps between three batches.
    assert!(started.elapsed() >= Duration::from_millis(500));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn errors_are_returned_without_retrying() {
    let (_, mut ledger) = history(10);
    ledger.poison("sig-0003");
    let ledger = Arc::new(ledger);
    let client = RateLimitedClient::new(ledger.clone(), Duration::from_millis(250));
    let wanted: Vec<String> = (0..10).map(|i| format!("sig-{i:04}")).collect();

    let result = client.get_transactions(&wanted).await;
    assert!(matches!(result, Err(TransportError::MissingTransaction(s)) if s == "sig-0003"));
    assert_eq!(ledger.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn the_delay_applies_after_a_failed_call_too() {
    let (_, mut ledger) = history(3);
    ledger.poison("sig-0000");
    let ledger = Arc::new(ledger);
    let client = RateLimitedClient::new(ledger.clone(), Duration::from_millis(250));

    let bad = vec!["sig-0000".to_string()];
    let good = vec!["sig-0001".to_string()];
    assert!(client.get_transaction_batch(&bad).await.is_err());
    assert!(client.get_transaction_batch(&good).await.is_ok());

    let calls = ledger.calls();
    assert!(calls[1].0 - calls[0].0 >= Duration::from_millis(250));
}
