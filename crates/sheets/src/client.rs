use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use keywatch_config::SheetsConfig;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::SheetsError;
use crate::store::{Row, SheetStore};

/// Characters escaped when an A1 range is placed in a URL path segment.
const RANGE_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'\'')
    .add(b'<')
    .add(b'>');

#[derive(Debug, Deserialize)]
struct Credentials {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// [`SheetStore`] over the Google Sheets v4 values API.
#[derive(Debug, Clone)]
pub struct GoogleSheetsClient {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
    timeout_secs: u64,
}

impl GoogleSheetsClient {
    /// Build a client from configuration.  Fails before any network call when
    /// the spreadsheet id or a bearer token is missing.
    pub fn from_config(config: &SheetsConfig) -> Result<Self, SheetsError> {
        let spreadsheet_id = config.spreadsheet_id.trim();
        if spreadsheet_id.is_empty() {
            return Err(SheetsError::ConfigurationMissing(
                "sheets.spreadsheet_id is not set (or export KEYWATCH_SPREADSHEET_ID)".to_string(),
            ));
        }

        let token = match config.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => read_token(Path::new(&config.credentials_path))?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| SheetsError::Unavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token,
            timeout_secs: config.timeout_secs,
        })
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}{}",
            self.base_url,
            self.spreadsheet_id,
            utf8_percent_encode(range, RANGE_SEGMENT),
            suffix
        )
    }

    fn transport(&self, err: reqwest::Error) -> SheetsError {
        if err.is_timeout() {
            SheetsError::Timeout(self.timeout_secs)
        } else {
            SheetsError::from(err)
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, SheetsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(SheetsError::Unavailable(format!("{status}: {body}")))
        } else {
            Err(SheetsError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn read_token(path: &Path) -> Result<String, SheetsError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        SheetsError::ConfigurationMissing(format!(
            "credentials file {} unreadable ({err}); set sheets.credentials_path or KEYWATCH_SHEETS_TOKEN",
            path.display()
        ))
    })?;
    let credentials: Credentials = serde_json::from_str(&raw).map_err(|err| {
        SheetsError::ConfigurationMissing(format!(
            "credentials file {} has no access_token ({err})",
            path.display()
        ))
    })?;
    if credentials.access_token.trim().is_empty() {
        return Err(SheetsError::ConfigurationMissing(format!(
            "credentials file {} has an empty access_token",
            path.display()
        )));
    }
    Ok(credentials.access_token.trim().to_string())
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsClient {
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetsError> {
        let url = self.values_url(range, "");
        debug!(%range, "reading sheet range");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        let response = self.check(response).await?;
        let body: ValueRange = response
            .json()
            .await
            .map_err(|err| SheetsError::MalformedResponse(err.to_string()))?;
        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn update_range(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError> {
        let url = self.values_url(range, "?valueInputOption=RAW");
        debug!(%range, rows = rows.len(), "updating sheet range");
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&json!({ "range": range, "values": rows }))
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        self.check(response).await?;
        Ok(())
    }

    async fn clear_range(&self, range: &str) -> Result<(), SheetsError> {
        let url = self.values_url(range, ":clear");
        debug!(%range, "clearing sheet range");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        self.check(response).await?;
        Ok(())
    }

    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetsError> {
        let url = self.values_url(
            range,
            ":append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
        );
        debug!(%range, rows = rows.len(), "appending sheet rows");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(|err| self.transport(err))?;
        self.check(response).await?;
        Ok(())
    }
}
