//! End-to-end auto-close against the dry-run exchange.

use std::sync::Arc;
use std::time::Duration;

use basket_bot::{AppConfig, Application};
use basket_core::{Symbol, TargetSpec, Usd};
use basket_engine::{CloseOutcome, ControllerState, PositionStatus, RecordingNotifier};
use basket_gateway::SimOperation;
use rust_decimal_macros::dec;

const CONFIG: &str = r#"
[monitor]
enabled = true
poll_interval_ms = 1000

[target]
mode = "fixed_amount"
value = "60"

[executor]
fill_grace_ms = 2000

[simulation]
balance = "1000"

# +50
[[simulation.positions]]
symbol = "BTCUSDT"
size = "0.5"
entry_price = "60000"
mark_price = "60100"
tick_size = "0.1"

# +20, post-only close never fills
[[simulation.positions]]
symbol = "ETHUSDT"
size = "-2"
entry_price = "3000"
mark_price = "2990"
fills_passively = false
"#;

fn app(config: &str) -> (Application, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let app = Application::new(AppConfig::parse(config).unwrap()).unwrap();
    (app.with_notifier(notifier.clone()), notifier)
}

#[tokio::test(start_paused = true)]
async fn test_closes_every_position_once_target_reached() {
    let (app, notifier) = app(CONFIG);
    let gateway = app.gateway();
    let controller = app.controller();

    assert_eq!(controller.step().await, ControllerState::Done);

    let btc = Symbol::new("BTCUSDT");
    let eth = Symbol::new("ETHUSDT");
    assert!(gateway.position_size(&btc).is_zero());
    assert!(gateway.position_size(&eth).is_zero());

    let result = controller.last_result().unwrap();
    assert!(result.success);
    assert!(result.remaining.is_empty());
    assert!(matches!(result.outcome_for(&btc), Some(CloseOutcome::FilledViaLimit)));
    assert!(matches!(result.outcome_for(&eth), Some(CloseOutcome::FilledViaMarket)));
    assert!(matches!(result.status_for(&eth), Some(PositionStatus::Closed)));

    // Realised PnL lands in the wallet
    assert!(result.final_balance.is_some_and(|b| b > Usd::new(dec!(1060))));

    assert_eq!(notifier.count_with_prefix("Target reached"), 1);
    assert!(notifier
        .last()
        .is_some_and(|m| m.starts_with("Auto-close completed. All positions are closed.")));

    // Done: no further polling
    let polls = gateway.call_count(SimOperation::OpenPositions);
    assert_eq!(controller.step().await, ControllerState::Done);
    assert_eq!(gateway.call_count(SimOperation::OpenPositions), polls);
}

#[tokio::test(start_paused = true)]
async fn test_below_target_leaves_positions_open() {
    let (app, notifier) = app(&CONFIG.replace("value = \"60\"", "value = \"500\""));
    let gateway = app.gateway();
    let controller = app.controller();

    assert_eq!(controller.step().await, ControllerState::Monitoring);
    assert_eq!(controller.step().await, ControllerState::Monitoring);

    assert!(!gateway.position_size(&Symbol::new("BTCUSDT")).is_zero());
    assert_eq!(gateway.call_count(SimOperation::PlaceLimit), 0);
    assert!(notifier.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_by_default() {
    let (app, _notifier) = app(&CONFIG.replace("enabled = true", "enabled = false"));
    let gateway = app.gateway();
    let controller = app.controller();

    assert_eq!(controller.step().await, ControllerState::Idle);
    assert!(gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_while_running() {
    let (app, notifier) = app(&CONFIG.replace("value = \"60\"", "value = \"500\""));
    let gateway = app.gateway();
    let settings = app.settings();
    let cancel = app.cancel_token();
    let handle = tokio::spawn(app.run());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!gateway.position_size(&Symbol::new("ETHUSDT")).is_zero());

    let mut lowered = settings.snapshot();
    lowered.target = TargetSpec::PercentOfBalance(dec!(5));
    settings.update(lowered).unwrap();

    // Next poll sees the new target; grace period plus market fallback
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();

    let state = handle.await.unwrap().unwrap();
    assert_eq!(state, ControllerState::Done);
    assert!(gateway.position_size(&Symbol::new("ETHUSDT")).is_zero());
    assert_eq!(notifier.count_with_prefix("Target reached"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hot_reload_from_file() {
    use std::io::Write;
    use std::time::SystemTime;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("basket.toml");
    let initial = CONFIG.replace("enabled = true", "enabled = false");
    std::fs::write(&path, &initial).unwrap();

    let notifier = Arc::new(RecordingNotifier::new());
    let app = Application::new(AppConfig::from_file(&path).unwrap())
        .unwrap()
        .with_notifier(notifier.clone())
        .with_config_path(&path);
    let gateway = app.gateway();
    let cancel = app.cancel_token();
    let handle = tokio::spawn(app.run());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(gateway.calls().is_empty());

    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
    drop(file);

    // Reload interval 5 s, then one poll plus the close
    tokio::time::sleep(Duration::from_secs(12)).await;
    cancel.cancel();

    assert_eq!(handle.await.unwrap().unwrap(), ControllerState::Done);
    assert!(gateway.position_size(&Symbol::new("BTCUSDT")).is_zero());
    assert!(notifier
        .last()
        .is_some_and(|m| m.starts_with("Auto-close completed.")));
}
