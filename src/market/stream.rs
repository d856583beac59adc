use crate::market::api::{connect_market_stream, MarketWsStream};
use crate::market::demo::{generate_demo_market_data, generate_demo_ticker};
use crate::market::now_unix_ms;
use crate::market::router::apply_frame;
use crate::market::types::{Channel, ControlFrame, InboundFrame};
use crate::state::SharedState;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    TransportError,
    Cancelled,
}

/// Drives the push feed until cancelled or the reconnect budget runs out.
///
/// Expects the link to already be in `Connecting`. Cancellation leaves the
/// link state untouched; the caller owns that transition.
pub async fn run_live_connection(
    shared: Arc<SharedState>,
    ws_url: String,
    cancel_token: CancellationToken,
) {
    loop {
        let connect_result = tokio::select! {
            _ = cancel_token.cancelled() => return,
            result = connect_market_stream(&ws_url) => result,
        };

        match connect_result {
            Ok(websocket_stream) => {
                match run_session(&shared, websocket_stream, &cancel_token).await {
                    SessionEnd::Cancelled => return,
                    SessionEnd::TransportError => shared.mark_transport_error(),
                    SessionEnd::Closed => {}
                }
            }
            Err(error) => {
                warn!(%error, url = %ws_url, "market stream connect failed");
                shared.mark_transport_error();
            }
        }

        let Some(delay) = shared.mark_closed() else {
            info!("reconnect attempts exhausted, market stream stays down");
            return;
        };
        info!(delay_secs = delay.as_secs(), "market stream reconnect scheduled");

        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        if !shared.mark_connecting() {
            return;
        }
    }
}

async fn run_session(
    shared: &SharedState,
    websocket_stream: MarketWsStream,
    cancel_token: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = websocket_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ControlFrame>();
    shared.mark_open(Some(outbound_tx));

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                if let Err(error) = write.close().await {
                    debug!(%error, "market stream close on cancel failed");
                }
                return SessionEnd::Cancelled;
            }
            Some(frame) = outbound_rx.recv() => {
                let payload = match frame.to_json() {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(%error, "failed to encode control frame");
                        continue;
                    }
                };
                debug!(%payload, "sending control frame");
                if let Err(error) = write.send(Message::Text(payload)).await {
                    warn!(%error, "failed to send control frame");
                    return SessionEnd::TransportError;
                }
            }
            next_message = read.next() => match next_message {
                Some(Ok(Message::Text(text))) => {
                    let mut payload = text.into_bytes();
                    shared.ingest_frame(&mut payload);
                }
                Some(Ok(Message::Binary(mut payload))) => shared.ingest_frame(&mut payload),
                Some(Ok(Message::Close(close_frame))) => {
                    info!(?close_frame, "market stream closed by server");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "market stream read failed");
                    return SessionEnd::TransportError;
                }
                None => return SessionEnd::Closed,
            },
        }
    }
}

/// Synthetic feed for demo sessions: one ticker per subscribed symbol per tick.
pub async fn run_demo_feed(
    shared: Arc<SharedState>,
    tick_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => apply_demo_tick(&shared),
        }
    }
}

pub fn apply_demo_tick(shared: &SharedState) {
    let symbols = shared.link.lock().manager.registry().symbols_on(Channel::Ticker);
    if symbols.is_empty() {
        return;
    }

    let now_ms = now_unix_ms();
    let mut rng = rand::thread_rng();
    let outcomes: Vec<_> = {
        let mut cache = shared.cache.write();
        symbols
            .iter()
            .map(|symbol| {
                if cache.market_data(symbol).is_none() {
                    let observed = cache.version(symbol);
                    let seed = generate_demo_market_data(symbol, &mut rng, now_ms);
                    cache.apply_fetched_market_data(seed, observed, now_ms);
                }
                let update = generate_demo_ticker(symbol, &mut rng, now_ms);
                apply_frame(&mut cache, InboundFrame::Ticker(update), now_ms)
            })
            .collect()
    };

    for outcome in outcomes {
        shared.publish_route(outcome);
    }
}
