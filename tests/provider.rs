use std::time::Duration;

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{ScriptBuf, Transaction};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use utxo_tx_engine::address::address_for_key;
use utxo_tx_engine::secret::public_key_for;
use utxo_tx_engine::{
    BlockchairClient, BroadcastResponse, Chain, Engine, ErrorKind, ProviderConfig, ProviderError,
    SecretKeyBytes, TransactionRequest,
};

const ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
const TXID: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

fn test_config(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: base_url.to_string(),
        api_key: Some("test-key".to_string()),
        fetch_timeout: Duration::from_secs(5),
        broadcast_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_fetch_unspent_outputs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/bitcoin/dashboards/address/{}", ADDRESS)))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                ADDRESS: {
                    "address": { "balance": 75000 },
                    "utxo": [
                        {
                            "block_id": 800000,
                            "transaction_hash": TXID,
                            "index": 1,
                            "value": 50000,
                            "script_hex": "76a91462e907b15cbf27d5425399ebf6f0fb50ebb88f1888ac"
                        },
                        {
                            "block_id": -1,
                            "transaction_hash": TXID,
                            "index": 2,
                            "value": 25000
                        }
                    ]
                }
            },
            "context": { "code": 200, "state": 800009 }
        })))
        .mount(&server)
        .await;

    let client = BlockchairClient::new(test_config(&server.uri()));
    let utxos = client.fetch_unspent_outputs(Chain::Bitcoin, ADDRESS).await.unwrap();

    assert_eq!(utxos.len(), 2);
    assert_eq!(utxos[0].txid.to_string(), TXID);
    assert_eq!(utxos[0].vout, 1);
    assert_eq!(utxos[0].value, 50_000);
    assert_eq!(utxos[0].confirmations, Some(10));
    assert_eq!(utxos[1].confirmations, Some(0));
    // No script in the response: the address's own script is used.
    assert!(utxos[1].script_pubkey.is_p2pkh());
}

#[tokio::test]
async fn test_unknown_address_has_no_outputs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("/litecoin/dashboards/address/{}", ADDRESS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [],
            "context": { "code": 200, "state": 2500000 }
        })))
        .mount(&server)
        .await;

    let client = BlockchairClient::new(test_config(&server.uri()));
    let utxos = client.fetch_unspent_outputs(Chain::Litecoin, ADDRESS).await.unwrap();
    assert!(utxos.is_empty());
}

#[tokio::test]
async fn test_fetch_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(430).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let client = BlockchairClient::new(test_config(&server.uri()));
    let err = client
        .fetch_unspent_outputs(Chain::Dogecoin, ADDRESS)
        .await
        .unwrap_err();
    match err {
        ProviderError::Status { status, body } => {
            assert_eq!(status, 430);
            assert_eq!(body, "rate limited");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_successful_broadcast() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bitcoin-cash/push/transaction"))
        .and(query_param("key", "test-key"))
        .and(body_json(serde_json::json!({ "data": "0200" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "transaction_hash": TXID },
            "context": { "code": 200 }
        })))
        .mount(&server)
        .await;

    let client = BlockchairClient::new(test_config(&server.uri()));
    let resp = client.push_transaction(Chain::BitcoinCash, "0200").await.unwrap();
    assert_eq!(resp, BroadcastResponse::accepted(TXID));
}

#[tokio::test]
async fn test_rejected_broadcast() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bitcoin/push/transaction"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "data": null,
            "context": { "code": 400, "error": "Invalid transaction: bad-txns-inputs-missingorspent" }
        })))
        .mount(&server)
        .await;

    let client = BlockchairClient::new(test_config(&server.uri()));
    let resp = client.push_transaction(Chain::Bitcoin, "0200").await.unwrap();
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("missingorspent"));
}

#[tokio::test]
async fn test_broadcast_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(serde_json::json!({ "data": { "transaction_hash": TXID } })),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.broadcast_timeout = Duration::from_millis(200);
    let client = BlockchairClient::new(config);
    let err = client.push_transaction(Chain::Bitcoin, "0200").await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout));
}

#[tokio::test]
async fn test_engine_against_blockchair() {
    let server = MockServer::start().await;
    let secp = Secp256k1::new();
    let public = public_key_for(&secp, &SecretKeyBytes::new(vec![0x33; 32])).unwrap();
    let from = address_for_key(&public, Chain::Dogecoin.params()).unwrap();
    let script = ScriptBuf::new_p2pkh(&public.pubkey_hash());

    Mock::given(method("GET"))
        .and(path(format!("/dogecoin/dashboards/address/{}", from)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                from.clone(): {
                    "utxo": [{
                        "block_id": 5000000,
                        "transaction_hash": TXID,
                        "index": 0,
                        "value": 10_000_000,
                        "script_hex": script.to_hex_string()
                    }]
                }
            },
            "context": { "code": 200, "state": 5000100 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dogecoin/push/transaction"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "transaction_hash": "f00d" },
            "context": { "code": 200 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Engine::new(BlockchairClient::new(test_config(&server.uri())));
    let result = engine
        .send(TransactionRequest {
            chain: Chain::Dogecoin,
            from_address: from.clone(),
            to_address: from,
            amount: 1_000_000,
            fee_rate: 1_000,
            private_key: SecretKeyBytes::new(vec![0x33; 32]),
            change_address: None,
        })
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.transaction_id.as_deref(), Some("f00d"));
    assert_eq!(result.fee, Some((10 + 148 + 2 * 34) * 1_000));
    let tx: Transaction = deserialize_hex(result.raw_transaction.as_deref().unwrap()).unwrap();
    assert_eq!(tx.output[0].value.to_sat(), 1_000_000);

    let requests = server.received_requests().await.unwrap();
    let push = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
    let body: serde_json::Value = serde_json::from_slice(&push.body).unwrap();
    assert_eq!(body["data"].as_str(), result.raw_transaction.as_deref());
}

#[tokio::test]
async fn test_engine_reports_ambiguous_broadcast() {
    let server = MockServer::start().await;
    let secp = Secp256k1::new();
    let public = public_key_for(&secp, &SecretKeyBytes::new(vec![0x33; 32])).unwrap();
    let from = address_for_key(&public, Chain::Dogecoin.params()).unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { from.clone(): { "utxo": [{
                "block_id": 1, "transaction_hash": TXID, "index": 0, "value": 10_000_000
            }] } },
            "context": { "state": 1 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.broadcast_timeout = Duration::from_millis(200);
    let engine = Engine::new(BlockchairClient::new(config));
    let result = engine
        .send(TransactionRequest {
            chain: Chain::Dogecoin,
            from_address: from.clone(),
            to_address: from,
            amount: 1_000_000,
            fee_rate: 1_000,
            private_key: SecretKeyBytes::new(vec![0x33; 32]),
            change_address: None,
        })
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::OutcomeUnknown));
    assert!(result.transaction_id.is_some());
    assert!(result.raw_transaction.is_some());
}
