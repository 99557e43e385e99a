use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::models::{ApplicationRecord, FilterPreset, Scorecard};
use crate::store::{check_score, RecordStore, StoreError, StoreResult};

/// Record store backed by a running `jobtrack serve` instance.
pub struct HttpStore {
    client: Client,
    base: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct Created {
    id: i64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpStore {
    pub fn new(base: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn send(&self, request: RequestBuilder, what: &str) -> StoreResult<Response> {
        let response = request.send().map_err(|e| self.classify(e))?;
        let status = response.status();
        debug!("{} -> {}", what, status);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(what.to_string()));
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn classify(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }

    fn read<T: DeserializeOwned>(&self, response: Response) -> StoreResult<T> {
        let body = response.text().map_err(|e| self.classify(e))?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl RecordStore for HttpStore {
    fn list_records(&self) -> StoreResult<Vec<ApplicationRecord>> {
        let response = self.send(self.client.get(self.url("/applications")), "Applications")?;
        self.read(response)
    }

    fn create_record(&self, draft: &ApplicationRecord) -> StoreResult<i64> {
        let response = self.send(
            self.client.post(self.url("/applications")).json(draft),
            "Applications",
        )?;
        Ok(self.read::<Created>(response)?.id)
    }

    fn update_record(&self, id: i64, record: &ApplicationRecord) -> StoreResult<()> {
        let path = format!("/applications/{}", id);
        self.send(
            self.client.put(self.url(&path)).json(record),
            &format!("Application #{}", id),
        )?;
        Ok(())
    }

    fn delete_record(&self, id: i64) -> StoreResult<()> {
        let path = format!("/applications/{}", id);
        self.send(self.client.delete(self.url(&path)), &format!("Application #{}", id))?;
        Ok(())
    }

    fn list_presets(&self) -> StoreResult<Vec<FilterPreset>> {
        let response = self.send(self.client.get(self.url("/filter-configs")), "Filter configurations")?;
        self.read(response)
    }

    fn save_preset(&self, name: &str, config: &str) -> StoreResult<i64> {
        let body = json!({ "name": name, "config": config });
        let response = self.send(
            self.client.post(self.url("/filter-configs")).json(&body),
            "Filter configurations",
        )?;
        Ok(self.read::<Created>(response)?.id)
    }

    fn delete_preset(&self, id: i64) -> StoreResult<()> {
        let path = format!("/filter-configs/{}", id);
        self.send(
            self.client.delete(self.url(&path)),
            &format!("Filter configuration #{}", id),
        )?;
        Ok(())
    }

    fn list_scores(&self, application_id: i64) -> StoreResult<Scorecard> {
        let path = format!("/applications/{}/scores", application_id);
        let response = self.send(
            self.client.get(self.url(&path)),
            &format!("Application #{}", application_id),
        )?;
        self.read(response)
    }

    fn set_score(&self, application_id: i64, factor: &str, value: u8) -> StoreResult<()> {
        check_score(factor, value)?;
        let path = format!("/applications/{}/scores", application_id);
        let body = json!({ "scores": { factor: value } });
        self.send(
            self.client.post(self.url(&path)).json(&body),
            &format!("Application #{}", application_id),
        )?;
        Ok(())
    }

    fn remove_score(&self, application_id: i64, factor: &str) -> StoreResult<()> {
        let path = format!("/applications/{}/scores/{}", application_id, factor);
        self.send(
            self.client.delete(self.url(&path)),
            &format!("Application #{}", application_id),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let store = HttpStore::new("http://localhost:5000/", Duration::from_secs(2)).unwrap();
        assert_eq!(store.url("/applications"), "http://localhost:5000/applications");
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        // Port 9 on loopback refuses connections.
        let store = HttpStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        match store.list_records() {
            Err(StoreError::Unavailable(_)) | Err(StoreError::Timeout(_)) => {}
            other => panic!("expected a connection failure, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_invalid_score_rejected_before_sending() {
        let store = HttpStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            store.set_score(1, "benefits", 11),
            Err(StoreError::Validation(_))
        ));
    }
}
