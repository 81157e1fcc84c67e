//! Shared harness for gateway integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;

use hitl_gateway::config::{test_config, Config};
use hitl_gateway::gateway::HitlGateway;
use hitl_gateway::guardian::StaticGuardian;
use hitl_gateway::market_data::StaticMarketData;
use hitl_gateway::metrics::HitlMetrics;
use hitl_gateway::models::{ApprovalRequest, DeepLinkToken, ReasoningSummary, Side, TradeSignal};
use hitl_gateway::notify::{ChatNotifier, EventBus};
use hitl_gateway::store::ApprovalStore;

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatNotifier for RecordingNotifier {
    async fn send_request(
        &self,
        record: &ApprovalRequest,
        _token: &DeepLinkToken,
    ) -> anyhow::Result<()> {
        self.sent.lock().push(format!("request:{}", record.trade_id));
        Ok(())
    }

    async fn send_decision(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        self.sent
            .lock()
            .push(format!("decision:{}", record.trade_id));
        Ok(())
    }

    async fn send_timeout(&self, record: &ApprovalRequest) -> anyhow::Result<()> {
        self.sent.lock().push(format!("timeout:{}", record.trade_id));
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<HitlGateway>,
    pub store: ApprovalStore,
    pub guardian: Arc<StaticGuardian>,
    pub market: Arc<StaticMarketData>,
    pub metrics: Arc<HitlMetrics>,
    pub events: EventBus,
    pub notifier: Arc<RecordingNotifier>,
    _db_dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let db_dir = tempfile::tempdir().expect("create temp dir");
    let db_path = db_dir.path().join("hitl_test.db");

    let mut config = test_config(&["alice", "bob"]);
    config.database_path = db_path.to_string_lossy().into_owned();
    tweak(&mut config);

    let store = ApprovalStore::open(&config.database_path).expect("open store");
    let guardian = Arc::new(StaticGuardian::unlocked());
    let market = Arc::new(StaticMarketData::new());
    let metrics = Arc::new(HitlMetrics::new());
    let events = EventBus::new(256);
    let notifier = Arc::new(RecordingNotifier::default());

    let gateway = Arc::new(HitlGateway::new(
        config,
        store.clone(),
        guardian.clone(),
        market.clone(),
        notifier.clone(),
        events.clone(),
        metrics.clone(),
    ));

    Harness {
        gateway,
        store,
        guardian,
        market,
        metrics,
        events,
        notifier,
        _db_dir: db_dir,
    }
}

pub fn signal(trade_id: &str) -> TradeSignal {
    TradeSignal {
        trade_id: trade_id.to_string(),
        instrument: "BTCZAR".to_string(),
        side: Side::Buy,
        risk_pct: dec!(1.00),
        confidence: dec!(0.80),
        request_price: dec!(1500000.00000000),
        reasoning_summary: ReasoningSummary {
            trend: "up".to_string(),
            volatility: "low".to_string(),
            signal_confluence: vec!["ema_cross".to_string(), "volume_spike".to_string()],
            notes: None,
        },
        correlation_id: format!("corr-{trade_id}"),
    }
}

pub fn signal_with_price(trade_id: &str, price: rust_decimal::Decimal) -> TradeSignal {
    let mut s = signal(trade_id);
    s.request_price = price;
    s
}
