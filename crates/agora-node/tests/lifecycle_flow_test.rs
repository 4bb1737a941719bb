use agora_crypto::Keypair;
use agora_escrow::{EscrowError, NewListing, SettlementOutcome, TaskStatus, TaskStore};
use agora_ledger::memory::TRANSFER_FEE;
use agora_ledger::{LedgerClient, MemoryLedger};
use agora_node::{auth, AgoraNode, NodeConfig};
use agora_types::{AccountAddress, ListingId, NativeAmount, TxRef};
use std::sync::Arc;

const AUTHORITY_SECRET: [u8; 32] = [42u8; 32];

struct TestNode {
    node: AgoraNode,
    ledger: Arc<MemoryLedger>,
    performer: AccountAddress,
    listing_id: ListingId,
}

/// Node wired to a shared in-memory ledger, with one active listing. The
/// worker stays off; tests drive transitions themselves.
async fn create_test_node(price: NativeAmount) -> TestNode {
    let mut config = NodeConfig::default();
    config.worker.enabled = false;
    config.escrow.platform_fee_bps = 1_000;
    config.escrow.fee_reserve_base_units = 2 * TRANSFER_FEE;

    let ledger = Arc::new(MemoryLedger::new());
    let node = AgoraNode::with_ledger(config, AUTHORITY_SECRET, ledger.clone())
        .await
        .unwrap();

    let performer = Keypair::generate().address();
    let listing = node
        .store
        .insert_listing(NewListing {
            name: "research agent".to_string(),
            description: "does research on demand".to_string(),
            tags: vec!["research".to_string()],
            price,
            payout_address: performer,
            owner_credential: auth::hash_credential("agr-owner-key"),
        })
        .await
        .unwrap();

    TestNode {
        node,
        ledger,
        performer,
        listing_id: listing.id,
    }
}

async fn fund_escrow(t: &TestNode, escrow: AccountAddress, amount: NativeAmount) -> TxRef {
    let payer = Keypair::generate();
    t.ledger
        .credit(payer.address(), NativeAmount::from_native(10.0))
        .await;
    t.ledger
        .submit_transfer(&payer, escrow, amount)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_scenario_a_creation_returns_derived_challenge() {
    let price = NativeAmount::from_native(0.05);
    let t = create_test_node(price).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "find market data".to_string(), None)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.escrow_amount, price);
    assert_eq!(
        task.escrow_address,
        agora_crypto::derive_escrow_address(&AUTHORITY_SECRET, task.id),
        "challenge address must be the authority-derived escrow address"
    );

    println!("✅ Scenario A: challenge carries derived address and price");
}

#[tokio::test]
async fn test_scenario_b_payment_funds_and_records_sender() {
    let price = NativeAmount::from_native(0.05);
    let t = create_test_node(price).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "find market data".to_string(), None)
        .await
        .unwrap();

    let payer = Keypair::generate();
    t.ledger
        .credit(payer.address(), NativeAmount::from_native(1.0))
        .await;
    let proof = t
        .ledger
        .submit_transfer(&payer, task.escrow_address, price)
        .await
        .unwrap();

    let funded = t.node.engine.submit_payment(task.id, &proof).await.unwrap();

    assert_eq!(funded.status, TaskStatus::Funded);
    assert!(funded.payment_verified_at.is_some());
    assert_eq!(
        funded.requester,
        Some(payer.address()),
        "the observed sender becomes the requester"
    );

    println!("✅ Scenario B: verified payment funds the task");
}

#[tokio::test]
async fn test_scenario_c_replayed_proof_is_idempotent() {
    let price = NativeAmount::from_native(0.05);
    let t = create_test_node(price).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();
    let proof = fund_escrow(&t, task.escrow_address, price).await;

    let first = t.node.engine.submit_payment(task.id, &proof).await.unwrap();
    let replay = t.node.engine.submit_payment(task.id, &proof).await.unwrap();

    assert_eq!(replay.status, TaskStatus::Funded);
    assert_eq!(
        replay.payment_verified_at, first.payment_verified_at,
        "replay must not re-record verification"
    );
    assert_eq!(replay.payment_proof, first.payment_proof);

    println!("✅ Scenario C: proof replay leaves the funded task unchanged");
}

#[tokio::test]
async fn test_scenario_d_fee_split_and_single_settlement() {
    let escrow_amount = NativeAmount::from_native(1.0);
    let t = create_test_node(escrow_amount).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();
    let proof = fund_escrow(&t, task.escrow_address, escrow_amount).await;
    t.node.engine.submit_payment(task.id, &proof).await.unwrap();

    let done = t.node.engine.finish_work(task.id, None).await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    let settlement_ref = done.settlement_ref.clone().expect("settlement recorded");

    // 10% of (1.0 − reserve), rounded to the nearest base unit.
    let transferable = escrow_amount.to_base_units() - 2 * TRANSFER_FEE;
    let platform_cut = 99_999_000u64;
    let performer_payout = transferable - platform_cut;

    assert_eq!(
        t.ledger.get_balance(t.performer).await.unwrap().to_base_units(),
        performer_payout
    );
    let platform = t.node.engine.context().platform_address();
    assert_eq!(
        t.ledger.get_balance(platform).await.unwrap().to_base_units(),
        platform_cut
    );
    assert_eq!(
        done.settlement,
        Some(SettlementOutcome::Full {
            performer_payout: NativeAmount::from_base_units(performer_payout),
            platform_cut: NativeAmount::from_base_units(platform_cut),
        })
    );

    // A second complete is rejected and no second settlement happens.
    let err = t.node.engine.finish_work(task.id, None).await.unwrap_err();
    assert!(matches!(err, EscrowError::StateConflict { .. }));
    let unchanged = t.node.engine.get_task(task.id).await.unwrap();
    assert_eq!(unchanged.settlement_ref, Some(settlement_ref));

    println!("✅ Scenario D: 10% split settled exactly once");
}

#[tokio::test]
async fn test_scenario_e_dispute_blocks_completion() {
    let price = NativeAmount::from_native(0.5);
    let t = create_test_node(price).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();
    let proof = fund_escrow(&t, task.escrow_address, price).await;
    t.node.engine.submit_payment(task.id, &proof).await.unwrap();

    let disputed = t.node.engine.dispute(task.id).await.unwrap();
    assert_eq!(disputed.status, TaskStatus::Disputed);

    match t.node.engine.finish_work(task.id, None).await.unwrap_err() {
        EscrowError::StateConflict { current, .. } => {
            assert_eq!(current, TaskStatus::Disputed)
        }
        other => panic!("expected StateConflict, got {:?}", other),
    }

    // Escrowed funds stayed put.
    assert_eq!(
        t.ledger.get_balance(task.escrow_address).await.unwrap(),
        price
    );

    println!("✅ Scenario E: disputed task rejects completion");
}

#[tokio::test]
async fn test_unverified_proof_keeps_task_pending() {
    let t = create_test_node(NativeAmount::from_native(0.05)).await;

    let task = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();

    let err = t
        .node
        .engine
        .submit_payment(task.id, &TxRef::new("no-such-transaction"))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::PaymentNotVerified(_)));

    let task = t.node.engine.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_underpayment_is_rejected_overpayment_accepted() {
    let price = NativeAmount::from_native(0.05);
    let t = create_test_node(price).await;

    // Underpaid task stays pending.
    let task = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();
    let short = fund_escrow(&t, task.escrow_address, NativeAmount::from_native(0.01)).await;
    assert!(matches!(
        t.node.engine.submit_payment(task.id, &short).await,
        Err(EscrowError::PaymentNotVerified(_))
    ));

    // Overpaid task funds; the surplus is kept, not refunded.
    let task2 = t
        .node
        .engine
        .create_task(t.listing_id, "job".to_string(), None)
        .await
        .unwrap();
    let generous = fund_escrow(&t, task2.escrow_address, NativeAmount::from_native(0.2)).await;
    let funded = t
        .node
        .engine
        .submit_payment(task2.id, &generous)
        .await
        .unwrap();
    assert_eq!(funded.status, TaskStatus::Funded);
}
