//! Storage-layer invariants: immutability triggers, ordering, concurrency.

mod common;

use common::{harness, signal};
use rust_decimal_macros::dec;

use hitl_gateway::error::HitlError;
use hitl_gateway::models::{DecisionChannel, DecisionRequest, Verdict};

fn decision(operator: &str, trade_id: &str, verdict: Verdict) -> DecisionRequest {
    DecisionRequest {
        trade_id: trade_id.to_string(),
        verdict,
        operator_id: operator.to_string(),
        channel: DecisionChannel::Web,
        reason: Some("invariant test".to_string()),
        correlation_id: format!("corr-decide-{trade_id}"),
    }
}

#[tokio::test]
async fn deletes_are_refused_everywhere() {
    let h = harness();
    h.gateway.create(signal("D1")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));
    h.gateway
        .decide(decision("alice", "D1", Verdict::Approve))
        .await
        .unwrap();

    for sql in [
        "DELETE FROM approvals",
        "DELETE FROM post_trade_snapshots",
        "DELETE FROM audit_log",
    ] {
        let err = h.store.execute_raw(sql).await.unwrap_err();
        assert!(
            err.to_string().contains("SEC"),
            "{sql} should be refused, got: {err}"
        );
    }

    let token = h
        .gateway
        .tokens()
        .mint("D1", chrono::Duration::seconds(60), "corr-D1", chrono::Utc::now())
        .await
        .unwrap();
    let err = h
        .store
        .execute_raw(&format!(
            "DELETE FROM deep_link_tokens WHERE token = '{}'",
            token.token
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("SEC"));
}

#[tokio::test]
async fn updates_outside_the_whitelist_are_refused() {
    let h = harness();
    h.gateway.create(signal("D2")).await.unwrap();

    for sql in [
        "UPDATE approvals SET instrument = 'ETHZAR' WHERE trade_id = 'D2'",
        "UPDATE approvals SET request_price = '9.00000000' WHERE trade_id = 'D2'",
        "UPDATE approvals SET trade_id = 'D2-renamed' WHERE trade_id = 'D2'",
        "UPDATE approvals SET expires_at = '2099-01-01T00:00:00.000000Z' WHERE trade_id = 'D2'",
        "UPDATE approvals SET requested_at = '2000-01-01T00:00:00.000000Z' WHERE trade_id = 'D2'",
    ] {
        let err = h.store.execute_raw(sql).await.unwrap_err();
        assert!(
            err.to_string().contains("SEC"),
            "{sql} should be refused, got: {err}"
        );
    }
}

#[tokio::test]
async fn decided_approvals_are_frozen() {
    let h = harness();
    h.gateway.create(signal("D3")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));
    h.gateway
        .decide(decision("alice", "D3", Verdict::Reject))
        .await
        .unwrap();

    for sql in [
        "UPDATE approvals SET status = 'AWAITING_APPROVAL' WHERE trade_id = 'D3'",
        "UPDATE approvals SET decision_reason = 'rewritten' WHERE trade_id = 'D3'",
        "UPDATE approvals SET decided_by = 'nobody' WHERE trade_id = 'D3'",
    ] {
        let err = h.store.execute_raw(sql).await.unwrap_err();
        assert!(
            err.to_string().contains("final"),
            "{sql} should be refused, got: {err}"
        );
    }
}

#[tokio::test]
async fn audit_and_snapshots_are_insert_only() {
    let h = harness();
    h.gateway.create(signal("D4")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));
    h.gateway
        .decide(decision("alice", "D4", Verdict::Approve))
        .await
        .unwrap();

    for sql in [
        "UPDATE audit_log SET actor_id = 'forged'",
        "UPDATE post_trade_snapshots SET bid = '0.00000001'",
    ] {
        let err = h.store.execute_raw(sql).await.unwrap_err();
        assert!(
            err.to_string().contains("SEC"),
            "{sql} should be refused, got: {err}"
        );
    }
}

#[tokio::test]
async fn token_rows_permit_only_first_use() {
    let h = harness();
    let now = chrono::Utc::now();
    let token = h
        .gateway
        .tokens()
        .mint("D5", chrono::Duration::seconds(300), "corr-D5", now)
        .await
        .unwrap();

    // Rewriting identity columns is refused outright.
    for sql in [
        format!(
            "UPDATE deep_link_tokens SET trade_id = 'other' WHERE token = '{}'",
            token.token
        ),
        format!(
            "UPDATE deep_link_tokens SET expires_at = '2099-01-01T00:00:00.000000Z' WHERE token = '{}'",
            token.token
        ),
    ] {
        let err = h.store.execute_raw(&sql).await.unwrap_err();
        assert!(err.to_string().contains("SEC"));
    }

    h.gateway.tokens().redeem(&token.token, now).await.unwrap();

    // Once consumed, even used_at is frozen.
    let err = h
        .store
        .execute_raw(&format!(
            "UPDATE deep_link_tokens SET used_at = '2099-01-01T00:00:00.000000Z' WHERE token = '{}'",
            token.token
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("SEC"));
}

#[tokio::test]
async fn pending_is_ordered_by_deadline() {
    let h = harness();
    for trade_id in ["O1", "O2", "O3"] {
        h.gateway.create(signal(trade_id)).await.unwrap();
    }

    let pending = h.gateway.get_pending().await.unwrap();
    let ids: Vec<&str> = pending.iter().map(|a| a.trade_id.as_str()).collect();
    assert_eq!(ids, vec!["O1", "O2", "O3"]);

    let mut deadlines: Vec<_> = pending.iter().map(|a| a.expires_at).collect();
    let sorted = {
        let mut s = deadlines.clone();
        s.sort();
        s
    };
    assert_eq!(deadlines, sorted);
    deadlines.dedup();
    assert_eq!(deadlines.len(), 3, "microsecond timestamps stay distinct");
}

#[tokio::test]
async fn tampered_pending_rows_are_excluded_but_surfaced() {
    let h = harness();
    h.gateway.create(signal("P1")).await.unwrap();
    h.gateway.create(signal("P2")).await.unwrap();

    h.store
        .execute_raw(&format!(
            "UPDATE approvals SET row_hash = '{}' WHERE trade_id = 'P1'",
            "f".repeat(64)
        ))
        .await
        .unwrap();

    let scan = h.store.fetch_pending().await.unwrap();
    assert_eq!(scan.valid.len(), 1);
    assert_eq!(scan.valid[0].trade_id, "P2");
    assert_eq!(scan.corrupted.len(), 1);
    assert_eq!(scan.corrupted[0].trade_id, "P1");
}

#[tokio::test]
async fn concurrent_decides_resolve_to_exactly_one_winner() {
    let h = harness();
    h.gateway.create(signal("C1")).await.unwrap();
    h.market.set_quote("BTCZAR", dec!(1500000), dec!(1500000));

    let approve = {
        let gateway = h.gateway.clone();
        tokio::spawn(async move { gateway.decide(decision("alice", "C1", Verdict::Approve)).await })
    };
    let reject = {
        let gateway = h.gateway.clone();
        tokio::spawn(async move { gateway.decide(decision("bob", "C1", Verdict::Reject)).await })
    };

    let (a, b) = (approve.await.unwrap(), reject.await.unwrap());
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent decide may win");

    let loser = if a.is_err() { a } else { b };
    assert!(matches!(
        loser.unwrap_err(),
        HitlError::AlreadyDecided { .. }
    ));

    // The stored record reflects the winner and is hash-consistent.
    let stored = h.store.fetch_by_trade_id("C1").await.unwrap().unwrap();
    assert!(stored.status.is_terminal());
    assert!(hitl_gateway::integrity::verify(&stored));
}

#[tokio::test]
async fn decided_rows_survive_round_trips_byte_for_byte() {
    let h = harness();
    let created = h
        .gateway
        .create(common::signal_with_price("R1", dec!(0.12345678)))
        .await
        .unwrap();
    assert_eq!(
        hitl_gateway::integrity::fmt_price(&created.request_price),
        "0.12345678"
    );

    let stored = h.store.fetch_by_trade_id("R1").await.unwrap().unwrap();
    assert_eq!(stored.request_price, created.request_price);
    assert_eq!(stored.risk_pct, dec!(1.00));
    assert_eq!(stored.confidence, dec!(0.80));
    assert_eq!(stored.requested_at, created.requested_at);
    assert_eq!(stored.expires_at, created.expires_at);
    assert_eq!(stored.row_hash, created.row_hash);
}
