//! Order-lifecycle events exchanged with the order/matching service.
//!
//! Inbound events keep `side` and `symbol` as raw strings so that malformed values
//! surface as typed ledger errors (`InvalidOrderSide`, `Validation`) instead of
//! opaque deserialization failures.

use crate::domain::{Money, OrderId, Side, Symbol, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One side of an order was matched and must be settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderExecuted {
    pub order_id: OrderId,
    pub wallet_id: WalletId,
    pub side: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: Money,
    pub total_amount: Money,
}

/// An order failed after funds or shares were set aside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailed {
    pub order_id: OrderId,
    pub wallet_id: WalletId,
    pub side: String,
    pub symbol: String,
    pub quantity: i64,
    pub total_amount: Money,
    #[serde(default)]
    pub reason: String,
}

/// Two-sided match as published by the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMatched {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_wallet_id: WalletId,
    pub seller_wallet_id: WalletId,
    pub symbol: String,
    pub quantity: i64,
    pub price: Money,
    pub total_amount: Money,
}

impl OrderMatched {
    /// Split into the BUY leg and the SELL leg.
    pub fn legs(&self) -> [OrderExecuted; 2] {
        [
            OrderExecuted {
                order_id: self.buy_order_id,
                wallet_id: self.buyer_wallet_id,
                side: Side::Buy.to_string(),
                symbol: self.symbol.clone(),
                quantity: self.quantity,
                price: self.price,
                total_amount: self.total_amount,
            },
            OrderExecuted {
                order_id: self.sell_order_id,
                wallet_id: self.seller_wallet_id,
                side: Side::Sell.to_string(),
                symbol: self.symbol.clone(),
                quantity: self.quantity,
                price: self.price,
                total_amount: self.total_amount,
            },
        ]
    }
}

/// Envelope for everything the intake consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    OrderExecuted(OrderExecuted),
    OrderFailed(OrderFailed),
    OrderMatched(OrderMatched),
}

impl OrderEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderEvent::OrderExecuted(_) => "OrderExecuted",
            OrderEvent::OrderFailed(_) => "OrderFailed",
            OrderEvent::OrderMatched(_) => "OrderMatched",
        }
    }
}

/// Published once per settlement that actually changed the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSettled {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub wallet_id: WalletId,
    pub side: Side,
    pub symbol: Symbol,
    pub quantity: i64,
    pub price: Money,
    pub total_amount: Money,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_order_event_tagged_json() {
        let json = serde_json::json!({
            "type": "OrderFailed",
            "orderId": 9,
            "walletId": 1,
            "side": "BUY",
            "symbol": "AAPL",
            "quantity": 5,
            "totalAmount": "500.00",
            "reason": "rejected by matching engine"
        });
        let event: OrderEvent = serde_json::from_value(json).unwrap();
        match event {
            OrderEvent::OrderFailed(failed) => {
                assert_eq!(failed.order_id, OrderId::new(9));
                assert_eq!(failed.total_amount, Money::from_str("500").unwrap());
            }
            other => panic!("Expected OrderFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_side_survives_deserialization() {
        let json = serde_json::json!({
            "type": "OrderExecuted",
            "orderId": 1,
            "walletId": 1,
            "side": "HOLD",
            "symbol": "AAPL",
            "quantity": 1,
            "price": "1",
            "totalAmount": "1"
        });
        let event: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.kind(), "OrderExecuted");
    }

    #[test]
    fn test_matched_splits_into_buy_and_sell_legs() {
        let matched = OrderMatched {
            buy_order_id: OrderId::new(10),
            sell_order_id: OrderId::new(11),
            buyer_wallet_id: WalletId::new(1),
            seller_wallet_id: WalletId::new(2),
            symbol: "MSFT".into(),
            quantity: 3,
            price: Money::from_str("10").unwrap(),
            total_amount: Money::from_str("30").unwrap(),
        };
        let [buy, sell] = matched.legs();
        assert_eq!(buy.side, "BUY");
        assert_eq!(buy.wallet_id, WalletId::new(1));
        assert_eq!(sell.side, "SELL");
        assert_eq!(sell.order_id, OrderId::new(11));
    }
}
