//! Jupiter AG source - token swap quotes and token discovery
//!
//! `get_quote` carries `user_action`: a quote is a side-effectful intent
//! the caller may want to execute, so its result is surfaced verbatim in
//! the turn's harvested user actions.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::{
    require_str, unknown_method, DataSource, DataSourceConfig, HttpDataSource, MethodSpec,
    ParamSpec,
};

const TOOL_NAME: &str = "jupiter_ag_apis";

/// Jupiter AG data source
pub struct JupiterSource {
    http: HttpDataSource,
}

impl JupiterSource {
    pub fn new() -> Result<Self> {
        let config = DataSourceConfig::new("jupiter", "https://lite-api.jup.ag")
            .with_header("Content-Type", "application/json");
        Ok(JupiterSource {
            http: HttpDataSource::new(config)?,
        })
    }
}

#[async_trait]
impl DataSource for JupiterSource {
    fn name(&self) -> &str {
        self.http.name()
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec {
                method: "get_quote".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Get the best possible quote for a token swap. Returns the route \
                              and expected output amount."
                    .to_string(),
                params: vec![
                    ParamSpec::required(
                        "input_mint",
                        "string",
                        "Mint address of the token to sell",
                    ),
                    ParamSpec::required(
                        "output_mint",
                        "string",
                        "Mint address of the token to buy",
                    ),
                    ParamSpec::required(
                        "amount",
                        "integer",
                        "Amount of input token in its smallest unit",
                    ),
                    ParamSpec::optional(
                        "slippage_bps",
                        "integer",
                        "Maximum acceptable slippage in basis points",
                    ),
                ],
                user_action: true,
            },
            MethodSpec {
                method: "search_tokens".to_string(),
                tool_name: TOOL_NAME.to_string(),
                description: "Search tradable tokens by symbol, name, or mint address."
                    .to_string(),
                params: vec![ParamSpec::required("query", "string", "Search query")],
                user_action: false,
            },
        ]
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let result = match method {
            "get_quote" => {
                let input_mint = match require_str(&args, "input_mint") {
                    Ok(v) => v,
                    Err(err) => return Ok(err),
                };
                let output_mint = match require_str(&args, "output_mint") {
                    Ok(v) => v,
                    Err(err) => return Ok(err),
                };
                let Some(amount) = args.get("amount").and_then(Value::as_u64) else {
                    return Ok(serde_json::json!({"error": "bad args: missing amount"}));
                };

                let mut params = vec![
                    ("inputMint", input_mint.to_string()),
                    ("outputMint", output_mint.to_string()),
                    ("amount", amount.to_string()),
                    ("swapMode", "ExactIn".to_string()),
                ];
                if let Some(slippage) = args.get("slippage_bps").and_then(Value::as_u64) {
                    params.push(("slippageBps", slippage.to_string()));
                }

                self.http.get("/swap/v1/quote", &params).await
            }
            "search_tokens" => {
                let query = match require_str(&args, "query") {
                    Ok(v) => v,
                    Err(err) => return Ok(err),
                };
                self.http
                    .get("/tokens/v2/search", &[("query", query.to_string())])
                    .await
            }
            other => unknown_method(self.name(), other),
        };
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        self.http.reachable("/tokens/v2/search?query=SOL").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_method_is_a_user_action() {
        let source = JupiterSource::new().unwrap();
        let methods = source.methods();
        let quote = methods.iter().find(|m| m.method == "get_quote").unwrap();
        assert!(quote.user_action);
        let search = methods.iter().find(|m| m.method == "search_tokens").unwrap();
        assert!(!search.user_action);
    }
}
