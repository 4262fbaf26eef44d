//! CoinGecko market-data source
//!
//! Read-only market lookups, all registered under one `coingecko_data`
//! tool so the model sees a single action-dispatched entry point.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::{
    require_str, unknown_method, DataSource, DataSourceConfig, HttpDataSource, MethodSpec,
    ParamSpec,
};

const TOOL_NAME: &str = "coingecko_data";

/// CoinGecko cryptocurrency data source
pub struct CoinGeckoSource {
    http: HttpDataSource,
}

impl CoinGeckoSource {
    pub fn new() -> Result<Self> {
        let mut config = DataSourceConfig::new("coingecko", "https://api.coingecko.com/api/v3")
            .with_header("Accept", "application/json");
        if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
            config = config.with_header("x-cg-demo-api-key", &key);
        }
        Ok(CoinGeckoSource {
            http: HttpDataSource::new(config)?,
        })
    }

    fn vs_currency(args: &Value) -> String {
        args.get("vs_currency")
            .and_then(Value::as_str)
            .unwrap_or("usd")
            .to_string()
    }
}

#[async_trait]
impl DataSource for CoinGeckoSource {
    fn name(&self) -> &str {
        self.http.name()
    }

    fn methods(&self) -> Vec<MethodSpec> {
        let coin_id = ParamSpec::required("coin_id", "string", "CoinGecko coin id, e.g. 'solana'");
        let vs_currency =
            ParamSpec::optional("vs_currency", "string", "Quote currency (default 'usd')");

        vec![
            MethodSpec {
                method: "get_coin_price".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Get current price and market data for a specific cryptocurrency."
                    .to_string(),
                params: vec![coin_id.clone(), vs_currency.clone()],
                user_action: false,
            },
            MethodSpec {
                method: "get_coin_market_chart".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Get market chart data for a cryptocurrency over a number of days."
                    .to_string(),
                params: vec![
                    coin_id.clone(),
                    vs_currency,
                    ParamSpec::optional("days", "integer", "Days of history (default 30)"),
                ],
                user_action: false,
            },
            MethodSpec {
                method: "get_trending_coins".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Get trending coins in the last 24 hours.".to_string(),
                params: vec![],
                user_action: false,
            },
            MethodSpec {
                method: "search_coins".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Search for coins by name, symbol, or keyword.".to_string(),
                params: vec![ParamSpec::required("query", "string", "Search keyword")],
                user_action: false,
            },
        ]
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let result = match method {
            "get_coin_price" => {
                let coin_id = match require_str(&args, "coin_id") {
                    Ok(id) => id,
                    Err(err) => return Ok(err),
                };
                self.http
                    .get(
                        "/simple/price",
                        &[
                            ("ids", coin_id.to_string()),
                            ("vs_currencies", Self::vs_currency(&args)),
                            ("include_market_cap", "true".to_string()),
                            ("include_24hr_vol", "true".to_string()),
                        ],
                    )
                    .await
            }
            "get_coin_market_chart" => {
                let coin_id = match require_str(&args, "coin_id") {
                    Ok(id) => id,
                    Err(err) => return Ok(err),
                };
                let days = args.get("days").and_then(Value::as_u64).unwrap_or(30);
                self.http
                    .get(
                        &format!("/coins/{}/market_chart", coin_id),
                        &[
                            ("vs_currency", Self::vs_currency(&args)),
                            ("days", days.to_string()),
                        ],
                    )
                    .await
            }
            "get_trending_coins" => self.http.get("/search/trending", &[]).await,
            "search_coins" => {
                let query = match require_str(&args, "query") {
                    Ok(q) => q,
                    Err(err) => return Ok(err),
                };
                self.http
                    .get("/search", &[("query", query.to_string())])
                    .await
            }
            other => unknown_method(self.name(), other),
        };
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        self.http.reachable("/ping").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_methods_share_the_tool_name() {
        let source = CoinGeckoSource::new().unwrap();
        let methods = source.methods();
        assert!(methods.len() > 1);
        assert!(methods.iter().all(|m| m.tool_name == TOOL_NAME));
        assert!(methods.iter().all(|m| !m.user_action));
    }
}
