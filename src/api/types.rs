//! Wire types for the Oanda v20 REST API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Response from `GET /accounts/{id}/summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSummaryResponse {
    pub account: AccountSummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub balance: Decimal,
    pub currency: String,
}

/// Response from `GET /accounts/{id}/pricing`.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingResponse {
    #[serde(default)]
    pub prices: Vec<ClientPrice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPrice {
    pub instrument: String,
    #[serde(default)]
    pub bids: Vec<PriceBucket>,
    #[serde(default)]
    pub asks: Vec<PriceBucket>,
    pub quote_home_conversion_factors: Option<HomeConversionFactors>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceBucket {
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeConversionFactors {
    pub positive_units: Decimal,
}

/// Response from `GET /accounts/{id}/trades`.
#[derive(Debug, Clone, Deserialize)]
pub struct TradesResponse {
    #[serde(default)]
    pub trades: Vec<OandaTrade>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OandaTrade {
    pub id: String,
    pub instrument: String,
    pub price: Decimal,
    pub current_units: Decimal,
    pub stop_loss_order: Option<DependentOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependentOrder {
    pub price: Decimal,
}

/// Response from `GET /accounts/{id}/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersResponse {
    #[serde(default)]
    pub orders: Vec<OandaOrder>,
}

/// Response from `GET /accounts/{id}/orders/{orderSpecifier}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub order: OandaOrder,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OandaOrder {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub instrument: Option<String>,
    pub units: Option<Decimal>,
    pub price: Option<Decimal>,
    pub time_in_force: Option<String>,
    pub stop_loss_on_fill: Option<StopLossDetails>,
}

impl OandaOrder {
    /// Entry orders are the ones that open trades; dependent orders hang off
    /// an existing trade.
    pub fn is_entry_order(&self) -> bool {
        matches!(self.order_type.as_str(), "LIMIT" | "STOP" | "MARKET_IF_TOUCHED")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopLossDetails {
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
}

/// Body for order creation and replacement.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequestBody {
    pub order: OrderRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(rename = "type")]
    pub order_type: String,
    pub instrument: String,
    pub units: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub time_in_force: String,
    pub position_fill: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_on_fill: Option<StopLossDetails>,
}

/// Body for `PUT /trades/{id}/orders`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOrdersBody {
    pub stop_loss: StopLossDetails,
}

/// Body for `PUT /trades/{id}/close`.
#[derive(Debug, Clone, Serialize)]
pub struct CloseTradeBody {
    pub units: String,
}

/// Transactions returned by order endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTransactionResponse {
    pub order_create_transaction: Option<TransactionRef>,
    pub order_fill_transaction: Option<OrderFillTransaction>,
    pub order_cancel_transaction: Option<OrderCancelTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFillTransaction {
    pub trade_opened: Option<TradeOpened>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOpened {
    #[serde(rename = "tradeID")]
    pub trade_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderCancelTransaction {
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trades() {
        let body = r#"{
            "trades": [{
                "id": "6397",
                "instrument": "EUR_USD",
                "price": "1.10012",
                "currentUnits": "-6000",
                "state": "OPEN",
                "stopLossOrder": {"id": "6398", "price": "1.12000", "tradeID": "6397"}
            }],
            "lastTransactionID": "6400"
        }"#;

        let parsed: TradesResponse = serde_json::from_str(body).unwrap();
        let trade = &parsed.trades[0];
        assert_eq!(trade.id, "6397");
        assert_eq!(trade.current_units, dec!(-6000));
        assert_eq!(trade.stop_loss_order.as_ref().unwrap().price, dec!(1.12));
    }

    #[test]
    fn test_parse_orders_marks_dependent_orders() {
        let body = r#"{
            "orders": [
                {"id": "10", "type": "LIMIT", "instrument": "EUR_USD", "units": "6000",
                 "price": "1.09900", "timeInForce": "GTC",
                 "stopLossOnFill": {"price": "1.08000", "timeInForce": "GTC"}},
                {"id": "11", "type": "STOP_LOSS", "tradeID": "9", "price": "1.05000"}
            ]
        }"#;

        let parsed: OrdersResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.orders[0].is_entry_order());
        assert!(!parsed.orders[1].is_entry_order());
        assert_eq!(parsed.orders[0].stop_loss_on_fill.as_ref().unwrap().price, "1.08000");
    }

    #[test]
    fn test_parse_market_fill() {
        let body = r#"{
            "orderCreateTransaction": {"id": "20"},
            "orderFillTransaction": {"id": "21", "tradeOpened": {"tradeID": "21", "units": "100"}}
        }"#;

        let parsed: OrderTransactionResponse = serde_json::from_str(body).unwrap();
        let opened = parsed.order_fill_transaction.unwrap().trade_opened.unwrap();
        assert_eq!(opened.trade_id, "21");
    }
}
