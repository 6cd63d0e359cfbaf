//! Push-only WebSocket broadcast hub.
//!
//! Each subscriber gets a bounded outbound buffer; when it is full at
//! publish time that subscriber's message is dropped so the publisher never
//! blocks. Liveness pings enforce a read deadline — silent connections are
//! unregistered and their buffers closed. There is no persistence: a new
//! subscriber sees only future messages.

pub mod messages;

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::bet::Broadcaster;
use crate::domain::{Market, MarketSummary};
use crate::resolution::ResolvedSink;
use messages::{
    MarketResolvedMessage, MsgType, NewMarketMessage, PriceUpdateMessage,
};

const SEND_BUFFER_SIZE: usize = 256;
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Must exceed the ping interval so a healthy client always answers in time.
const READ_DEADLINE: Duration = Duration::from_secs(35);

pub struct Hub {
    clients: RwLock<HashMap<Uuid, mpsc::Sender<Message>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn connected_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Serialise once, fan out to every subscriber. A full buffer drops the
    /// message for that subscriber only; a closed channel unregisters it.
    fn broadcast<T: Serialize>(&self, message: &T) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "broadcast marshal failed");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let clients = self.clients.read();
            for (id, sender) in clients.iter() {
                match sender.try_send(Message::Text(payload.clone())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(client = %id, "subscriber buffer full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.write();
            for id in dead {
                clients.remove(&id);
            }
        }
    }

    pub fn broadcast_price_update(&self, msg: PriceUpdateMessage) {
        self.broadcast(&msg);
    }

    pub fn broadcast_new_market(&self, msg: NewMarketMessage) {
        self.broadcast(&msg);
    }

    pub fn broadcast_market_resolved(&self, msg: MarketResolvedMessage) {
        self.broadcast(&msg);
    }

    /// Drive one upgraded WebSocket connection until it drops. Inbound
    /// frames are read only to keep the liveness deadline honest; their
    /// content is discarded — this is a server-push protocol.
    pub async fn handle_socket(&self, socket: WebSocket) {
        let (tx, mut rx) = mpsc::channel::<Message>(SEND_BUFFER_SIZE);
        let client_id = Uuid::new_v4();
        self.clients.write().insert(client_id, tx);
        debug!(client = %client_id, clients = self.connected_count(), "ws client connected");

        let (mut sink, mut stream) = socket.split();

        let write_pump = async {
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(message) => {
                            if sink.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = ping.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        };

        let read_pump = async {
            loop {
                match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
                    Ok(Some(Ok(_frame))) => {} // pong or ignored client chatter
                    Ok(Some(Err(_))) | Ok(None) => break,
                    Err(_) => {
                        debug!(client = %client_id, "ws read deadline exceeded");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = write_pump => {}
            _ = read_pump => {}
        }

        self.clients.write().remove(&client_id);
        debug!(client = %client_id, "ws client disconnected");
    }
}

impl Broadcaster for Hub {
    fn broadcast_market_update(&self, summary: MarketSummary) {
        self.broadcast(&summary);
    }
}

impl ResolvedSink for Hub {
    fn market_resolved(&self, market: &Market) {
        self.broadcast_market_resolved(MarketResolvedMessage {
            msg_type: MsgType::MarketResolved,
            market_id: market.id,
            result: market.result,
            close_price: market.close_price,
            open_price: market.open_price,
            pool_up: market.pool_up,
            pool_down: market.pool_down,
            timestamp: Utc::now(),
        });
    }
}

/// Build the once-a-second price broadcast from the active market and the
/// latest price.
pub fn price_update_message(market: &Market, price: Decimal) -> PriceUpdateMessage {
    let (diff, diff_pct) = match market.open_price {
        Some(open) if !open.is_zero() => {
            let diff = price - open;
            (diff, diff / open * Decimal::ONE_HUNDRED)
        }
        _ => (Decimal::ZERO, Decimal::ZERO),
    };
    PriceUpdateMessage {
        msg_type: MsgType::PriceUpdate,
        market_id: market.id,
        btc_price: price,
        open_price: market.open_price,
        diff,
        diff_pct,
        up_odds: market.up_odds(),
        down_odds: market.down_odds(),
        up_percent: market.up_percent(),
        down_percent: market.down_percent(),
        pool_up: market.pool_up,
        pool_down: market.pool_down,
        time_left_seconds: market.time_left_secs(Utc::now()),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn price_update_diff_against_open() {
        let now = Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: Some(dec!(90000)),
            close_price: None,
            result: None,
            pool_up: dec!(100),
            pool_down: dec!(100),
            commission_rate: dec!(0.03),
            commission_taken: Decimal::ZERO,
            opens_at: now,
            closes_at: now + chrono::Duration::minutes(5),
            resolved_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        };
        let msg = price_update_message(&market, dec!(90900));
        assert_eq!(msg.diff, dec!(900));
        assert_eq!(msg.diff_pct, dec!(1));
        assert!(msg.time_left_seconds > 0);
    }

    #[test]
    fn price_update_without_open_price() {
        let now = Utc::now();
        let market = Market {
            id: Uuid::new_v4(),
            status: MarketStatus::Open,
            open_price: None,
            close_price: None,
            result: None,
            pool_up: Decimal::ZERO,
            pool_down: Decimal::ZERO,
            commission_rate: dec!(0.03),
            commission_taken: Decimal::ZERO,
            opens_at: now,
            closes_at: now + chrono::Duration::minutes(5),
            resolved_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
        };
        let msg = price_update_message(&market, dec!(90900));
        assert_eq!(msg.diff, Decimal::ZERO);
        assert_eq!(msg.diff_pct, Decimal::ZERO);
    }
}
