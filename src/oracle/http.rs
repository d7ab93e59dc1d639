use reqwest::{Client, StatusCode, Url};

use super::{OracleError, PriceOracle, Quote};

/// Client for a remote quote service exposing
/// `GET {endpoint}?symbol=XXXX -> {"symbol", "name", "price"}`.
/// A 404 means the ticker does not exist; anything else that goes wrong
/// on the wire is reported as `Unavailable`.
#[derive(Clone, Debug)]
pub struct HttpOracle {
    client: Client,
    endpoint: String,
}

impl HttpOracle {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        // reject malformed endpoints up front instead of on first lookup
        Url::parse(endpoint)?;
        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.to_owned(),
        })
    }
}

impl PriceOracle for HttpOracle {
    async fn lookup(&self, symbol: &str) -> Result<Quote, OracleError> {
        let url = Url::parse_with_params(&self.endpoint, &[("symbol", symbol)])
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(OracleError::UnknownSymbol);
        }

        let response = response
            .error_for_status()
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        response
            .json::<Quote>()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))
    }
}
