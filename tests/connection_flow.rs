//! Reconciliation driven directly through `reconcile_now`, no background task.

use std::sync::Arc;

use dappconnect::{
    connection::{ConnectionMode, ReconcileOutcome, WalletResponse},
    error::AppError,
};
use ethers::types::Address;

mod common;

use common::{harness, signer};

#[tokio::test]
async fn read_only_reconciliation_is_idempotent() {
    let h = harness();

    for pass in 1..=3u64 {
        let outcome = h.ctx.reconcile_now().await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Published {
                epoch: 0,
                mode: ConnectionMode::ReadOnly
            }
        );

        let snapshot = h.ctx.snapshot();
        assert!(snapshot.address().is_none());
        let handle = snapshot.contract().expect("handle published");
        assert_eq!(handle.mode, ConnectionMode::ReadOnly);
        // A fresh read-only endpoint is built on every pass.
        assert_eq!(handle.endpoint_serial, Some(pass as usize));
    }

    assert_eq!(h.endpoints.built(), 3);
}

#[tokio::test]
async fn mode_switches_from_read_only_to_signed() {
    let h = harness();
    h.ctx.reconcile_now().await.unwrap();
    assert_eq!(
        h.ctx.snapshot().network_handle().map(|c| c.mode()),
        Some(ConnectionMode::ReadOnly)
    );

    let alice = signer("alice");
    h.source
        .push_connected(Address::from_low_u64_be(0xa1), alice.clone());
    h.ctx.connect().await.unwrap();

    let outcome = h.ctx.reconcile_now().await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Published {
            epoch: 1,
            mode: ConnectionMode::Signed
        }
    );

    let snapshot = h.ctx.snapshot();
    let bound_signer = snapshot
        .network_handle()
        .and_then(|context| context.signer())
        .expect("signed context");
    assert!(Arc::ptr_eq(bound_signer, &alice));
    assert_eq!(snapshot.contract().unwrap().signer, Some("alice"));
    assert!(snapshot.is_settled());
}

#[tokio::test]
async fn stale_binding_is_discarded() {
    let h = harness();

    h.source
        .push_connected(Address::from_low_u64_be(0xa), signer("alice"));
    h.ctx.connect().await.unwrap();

    let (entered, release) = h.binder.gate("alice");
    let ctx = h.ctx.clone();
    let slow = tokio::spawn(async move { ctx.reconcile_now().await });
    entered.await.expect("alice's binding reaches the gate");

    h.source
        .push_connected(Address::from_low_u64_be(0xb), signer("bob"));
    h.ctx.connect().await.unwrap();
    let fast = h.ctx.reconcile_now().await.unwrap();
    assert_eq!(
        fast,
        ReconcileOutcome::Published {
            epoch: 2,
            mode: ConnectionMode::Signed
        }
    );

    release.send(()).unwrap();
    let late = slow.await.unwrap().unwrap();
    assert_eq!(
        late,
        ReconcileOutcome::Discarded {
            epoch: 1,
            current_epoch: 2
        }
    );

    let snapshot = h.ctx.snapshot();
    assert_eq!(snapshot.address(), Some(Address::from_low_u64_be(0xb)));
    assert_eq!(snapshot.contract().unwrap().signer, Some("bob"));
}

#[tokio::test]
async fn binding_fault_keeps_previous_handle() {
    let h = harness();
    h.ctx.reconcile_now().await.unwrap();
    let before = h.ctx.snapshot().contract().cloned().expect("bound");

    h.source
        .push_connected(Address::from_low_u64_be(0xa1), signer("alice"));
    h.ctx.connect().await.unwrap();
    h.binder.fail_next();

    let res = h.ctx.reconcile_now().await;
    assert!(matches!(res, Err(AppError::Binding(_))));

    let snapshot = h.ctx.snapshot();
    assert!(Arc::ptr_eq(snapshot.contract().unwrap(), &before));
    assert_eq!(
        snapshot.network_handle().map(|c| c.mode()),
        Some(ConnectionMode::ReadOnly)
    );
    // The identity moved on, the binding did not.
    assert!(!snapshot.is_settled());
}

#[tokio::test]
async fn declined_connect_is_not_a_fault() {
    let h = harness();
    h.source.push(Ok(WalletResponse::not_connected()));

    let identity = h.ctx.connect().await.expect("decline is a normal outcome");
    assert!(!identity.is_present());
    assert!(h.ctx.snapshot().address().is_none());
    assert_eq!(h.ctx.snapshot().epoch, 0);
}

#[tokio::test]
async fn identity_source_fault_propagates_and_leaves_state() {
    let h = harness();
    h.source
        .push(Err(AppError::IdentitySource("transport closed".into())));

    let res = h.ctx.connect().await;
    assert!(matches!(res, Err(AppError::IdentitySource(msg)) if msg == "transport closed"));
    assert_eq!(h.ctx.snapshot().epoch, 0);
    assert!(h.ctx.snapshot().address().is_none());
}

#[tokio::test]
async fn partial_wallet_answer_never_yields_half_identity() {
    let h = harness();
    h.source.push(Ok(WalletResponse {
        connected: true,
        address: Some(Address::from_low_u64_be(0xa1)),
        signer: None,
    }));

    let identity = h.ctx.connect().await.unwrap();
    assert!(identity.address().is_none());
    assert!(identity.signer().is_none());
}

#[tokio::test]
async fn reconnecting_the_same_identity_does_not_notify() {
    let h = harness();
    let alice = signer("alice");
    let address = Address::from_low_u64_be(0xa1);

    h.source.push_connected(address, alice.clone());
    h.ctx.connect().await.unwrap();
    let subscription = h.ctx.subscribe();

    h.source.push_connected(address, alice);
    h.ctx.connect().await.unwrap();

    assert!(!subscription.has_changed());
    assert_eq!(h.ctx.snapshot().epoch, 1);
}
