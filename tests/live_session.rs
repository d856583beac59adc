use futures_util::{SinkExt, StreamExt};
use market_sync::market::connection::CONNECTION_ERROR_MESSAGE;
use market_sync::market::types::{Channel, ControlAction, ControlFrame};
use market_sync::{ClientConfig, ConnectionState, MarketSource, MarketStore, StoreEvent};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

fn live_config(ws_url: String) -> ClientConfig {
    ClientConfig {
        source: MarketSource::Live {
            api_url: "http://127.0.0.1:9".to_string(),
            ws_url,
        },
        ..ClientConfig::demo()
    }
}

async fn accept_session(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (socket, _) = tokio::time::timeout(STEP_TIMEOUT, listener.accept())
        .await
        .expect("client should connect in time")
        .expect("accept should succeed");
    tokio_tungstenite::accept_async(socket)
        .await
        .expect("websocket handshake should succeed")
}

async fn read_control_frames(
    session: &mut WebSocketStream<TcpStream>,
    count: usize,
) -> Vec<ControlFrame> {
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count {
        let message = tokio::time::timeout(STEP_TIMEOUT, session.next())
            .await
            .expect("control frame should arrive in time")
            .expect("session should stay open")
            .expect("frame should be readable");
        if let Message::Text(text) = message {
            let mut bytes = text.into_bytes();
            frames.push(
                simd_json::serde::from_slice(&mut bytes).expect("control frame should decode"),
            );
        }
    }
    frames
}

async fn assert_no_more_frames(session: &mut WebSocketStream<TcpStream>) {
    let extra = tokio::time::timeout(Duration::from_millis(300), session.next()).await;
    assert!(extra.is_err(), "unexpected extra frame: {extra:?}");
}

async fn wait_for(
    events: &mut broadcast::Receiver<StoreEvent>,
    predicate: impl Fn(&StoreEvent) -> bool,
) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("store event channel closed"),
            }
        }
    })
    .await
    .expect("expected store event should arrive");
}

fn ticker_subscriptions(symbols: &[&str]) -> Vec<ControlFrame> {
    symbols
        .iter()
        .map(|symbol| ControlFrame {
            action: ControlAction::Subscribe,
            channel: Channel::Ticker,
            symbol: symbol.to_string(),
        })
        .collect()
}

#[tokio::test]
async fn live_session_subscribes_routes_and_resubscribes_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let ws_url = format!("ws://{}", listener.local_addr().expect("local addr"));

    let store = MarketStore::new(live_config(ws_url), None);
    store.add_to_watchlist("EURUSD").await.expect("add should succeed");
    store.add_to_watchlist("GBPUSD").await.expect("add should succeed");
    let mut events = store.subscribe_events();

    store.connect().await;
    let mut session = accept_session(&listener).await;

    let frames = read_control_frames(&mut session, 2).await;
    assert_eq!(frames, ticker_subscriptions(&["EURUSD", "GBPUSD"]));
    wait_for(&mut events, |event| {
        *event == StoreEvent::ConnectionChanged(ConnectionState::Connected)
    })
    .await;

    for payload in [
        "not json at all",
        r#"{"type":"candles","channel":"ticker","data":{}}"#,
        r#"{"type":"ticker","channel":"ticker","data":{"symbol":"EURUSD","price":1.1,"bid":1.0999,"ask":1.1001}}"#,
    ] {
        session
            .send(Message::Text(payload.to_string()))
            .await
            .expect("server send should succeed");
    }
    wait_for(&mut events, |event| {
        *event
            == StoreEvent::TickerUpdated {
                symbol: "EURUSD".to_string(),
            }
    })
    .await;

    let ticker = store.ticker("EURUSD").expect("ticker should be cached");
    assert_eq!(ticker.price, Some(1.1));
    assert!(store.ticker("GBPUSD").is_none());

    session.close(None).await.expect("server close should succeed");
    drop(session);
    wait_for(&mut events, |event| {
        *event == StoreEvent::ConnectionChanged(ConnectionState::Disconnected)
    })
    .await;

    let mut reopened = accept_session(&listener).await;
    let frames = read_control_frames(&mut reopened, 2).await;
    assert_eq!(frames, ticker_subscriptions(&["EURUSD", "GBPUSD"]));
    assert_no_more_frames(&mut reopened).await;
    wait_for(&mut events, |event| {
        *event == StoreEvent::ConnectionChanged(ConnectionState::Connected)
    })
    .await;
    assert_eq!(store.reconnect_attempts(), 0);

    store
        .select_symbol(Some("EURUSD"))
        .await
        .expect("select should succeed");
    let frames = read_control_frames(&mut reopened, 2).await;
    assert!(frames
        .iter()
        .all(|frame| frame.action == ControlAction::Subscribe && frame.symbol == "EURUSD"));
    assert!(frames.iter().any(|frame| frame.channel == Channel::OrderBook));
    assert!(frames.iter().any(|frame| frame.channel == Channel::Trades));

    store
        .remove_from_watchlist("GBPUSD")
        .await
        .expect("remove should succeed");
    let frames = read_control_frames(&mut reopened, 1).await;
    assert_eq!(frames[0].action, ControlAction::Unsubscribe);
    assert_eq!(frames[0].symbol, "GBPUSD");

    store.disconnect().await;
    assert_eq!(store.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn trade_and_order_book_frames_reach_the_cache() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let ws_url = format!("ws://{}", listener.local_addr().expect("local addr"));

    let store = MarketStore::new(live_config(ws_url), None);
    store
        .select_symbol(Some("BTCUSD"))
        .await
        .expect("select should succeed");
    let mut events = store.subscribe_events();

    store.connect().await;
    let mut session = accept_session(&listener).await;
    let frames = read_control_frames(&mut session, 3).await;
    assert_eq!(frames.len(), 3);

    session
        .send(Message::Text(
            r#"{"type":"orderbook","channel":"orderbook","data":{"symbol":"BTCUSD","bids":[{"price":49990.0,"quantity":1.5}],"asks":[{"price":50010.0,"quantity":2.0}],"timestamp":1700000000000}}"#
                .to_string(),
        ))
        .await
        .expect("server send should succeed");
    session
        .send(Message::Text(
            r#"{"type":"trade","channel":"trades","data":{"id":"t-1","symbol":"BTCUSD","price":50000.0,"quantity":0.25,"side":"buy","timestamp":1700000000001}}"#
                .to_string(),
        ))
        .await
        .expect("server send should succeed");

    wait_for(&mut events, |event| {
        *event
            == StoreEvent::TradeReceived {
                symbol: "BTCUSD".to_string(),
            }
    })
    .await;

    let book = store.order_book("BTCUSD").expect("order book should be cached");
    assert_eq!(book.bids.len(), 1);
    let trades = store.recent_trades("BTCUSD");
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id, "t-1");

    store.disconnect().await;
}

#[tokio::test]
async fn unreachable_server_reports_error_then_gives_up() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let ws_url = format!("ws://{}", listener.local_addr().expect("local addr"));
    drop(listener);

    let config = ClientConfig {
        max_reconnect_attempts: 1,
        ..live_config(ws_url)
    };
    let store = MarketStore::new(config, None);
    let mut events = store.subscribe_events();

    store.connect().await;
    assert!(store.session_task_active().await);

    // First failure schedules one retry after 1s; the retry fails and exhausts the budget.
    for _ in 0..2 {
        wait_for(&mut events, |event| {
            *event == StoreEvent::ConnectionChanged(ConnectionState::Error)
        })
        .await;
        wait_for(&mut events, |event| {
            *event == StoreEvent::ConnectionChanged(ConnectionState::Disconnected)
        })
        .await;
    }

    tokio::time::timeout(STEP_TIMEOUT, async {
        while store.session_task_active().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("driver task should end once attempts are spent");

    assert_eq!(store.connection_state(), ConnectionState::Disconnected);
    assert_eq!(store.reconnect_attempts(), 1);
    assert_eq!(store.error().as_deref(), Some(CONNECTION_ERROR_MESSAGE));

    store.disconnect().await;
    assert!(!store.session_task_active().await);
}
