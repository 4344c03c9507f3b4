//! HTTP client for the ledger adaptor.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExchangePair, LedgerClient, LedgerError, LockInfo, SrcMethod};

pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockRequest<'a> {
    lock_infos: &'a [LockInfo],
    is_lock: bool,
    src_method: &'a str,
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    exchanges: &'a [ExchangePair],
}

#[derive(Deserialize)]
struct TxResponse {
    txid: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LedgerError::Rpc)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_invocation<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, LedgerError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Protocol(format!(
                "{} returned {}: {}",
                url, status, detail
            )));
        }

        let tx: TxResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Protocol(format!("{}: {}", url, e)))?;
        if tx.txid.is_empty() {
            return Err(LedgerError::Protocol(format!("{}: empty txid", url)));
        }
        Ok(tx.txid)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn lock(
        &self,
        infos: &[LockInfo],
        is_lock: bool,
        src_method: SrcMethod,
    ) -> Result<String, LedgerError> {
        self.post_invocation(
            "lock",
            &LockRequest {
                lock_infos: infos,
                is_lock,
                src_method: src_method.as_str(),
            },
        )
        .await
    }

    async fn exchange(&self, pairs: &[ExchangePair]) -> Result<String, LedgerError> {
        self.post_invocation("exchange", &ExchangeRequest { exchanges: pairs })
            .await
    }
}
