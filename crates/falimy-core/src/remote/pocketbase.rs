//! PocketBase REST + realtime (SSE) client

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{PushChannel, PushEvent, RemoteClient, RemoteRecord, SseDecoder, SseMessage};
use crate::models::{Collection, ServerId};
use crate::util::{api_error_message, normalize_server_url};
use crate::{Error, Result};

const PAGE_SIZE: usize = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a PocketBase server, authenticated with a user token
#[derive(Clone)]
pub struct PocketBaseClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for PocketBaseClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PocketBaseClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    page: usize,
    #[serde(default)]
    total_pages: usize,
    #[serde(default)]
    items: Vec<RemoteRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    client_id: String,
}

impl PocketBaseClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = normalize_server_url(base_url).ok_or_else(|| {
            Error::InvalidInput(format!(
                "server URL must include http:// or https://, got {base_url:?}"
            ))
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            token: token.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_url(&self, collection: Collection) -> String {
        format!(
            "{}/api/collections/{}/records",
            self.base_url,
            collection.remote_name()
        )
    }

    /// Filter expression selecting the family's records of `collection`
    pub(crate) fn family_filter(collection: Collection, family_id: &ServerId) -> String {
        let family = family_id.as_str().replace('\\', "\\\\").replace('"', "\\\"");
        match collection {
            Collection::Families => format!("id=\"{family}\""),
            Collection::Members | Collection::Lists | Collection::Geofences => {
                format!("family_id=\"{family}\"")
            }
            Collection::ListItems => format!("list_id.family_id=\"{family}\""),
            Collection::LocationHistory => format!("user_id.family_id=\"{family}\""),
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::status_error(status, &body))
    }

    fn status_error(status: StatusCode, body: &str) -> Error {
        let message = api_error_message(status.as_u16(), body);
        if status == StatusCode::UNAUTHORIZED {
            Error::AuthExpired
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Error::Transport(message)
        } else {
            Error::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl RemoteClient for PocketBaseClient {
    async fn fetch_all(
        &self,
        collection: Collection,
        family_id: &ServerId,
    ) -> Result<Vec<RemoteRecord>> {
        let filter = urlencoding::encode(&Self::family_filter(collection, family_id)).into_owned();
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}?page={page}&perPage={PAGE_SIZE}&sort=updated&skipTotal=false&filter={filter}",
                self.records_url(collection)
            );
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            let body: ListPage = Self::check(response).await?.json().await?;

            records.extend(body.items);
            if body.page >= body.total_pages || body.total_pages == 0 {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            "Fetched {} {} records for family {family_id}",
            records.len(),
            collection.remote_name()
        );
        Ok(records)
    }

    async fn open_channel(&self, collections: &[Collection]) -> Result<Box<dyn PushChannel>> {
        let response = self
            .http
            .get(format!("{}/api/realtime", self.base_url))
            .header("Accept", "text/event-stream")
            .bearer_auth(&self.token)
            .send()
            .await?;
        let mut stream = Self::check(response).await?;
        let mut decoder = SseDecoder::new();
        let mut queue = VecDeque::new();

        let client_id = loop {
            let Some(chunk) = stream.chunk().await? else {
                return Err(Error::Transport(
                    "realtime stream closed before PB_CONNECT".to_string(),
                ));
            };
            queue.extend(decoder.push(&chunk));
            if let Some(position) = queue
                .iter()
                .position(|message: &SseMessage| message.event.as_deref() == Some("PB_CONNECT"))
            {
                let connect = queue.remove(position).unwrap_or_default();
                let payload: ConnectPayload = serde_json::from_str(&connect.data)?;
                break payload.client_id;
            }
        };

        let subscriptions: Vec<String> = collections
            .iter()
            .map(|collection| format!("{}/*", collection.remote_name()))
            .collect();
        let registered = self
            .http
            .post(format!("{}/api/realtime", self.base_url))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "clientId": client_id, "subscriptions": subscriptions }))
            .send()
            .await?;
        Self::check(registered).await?;
        tracing::debug!("Realtime client {client_id} subscribed to {subscriptions:?}");

        Ok(Box::new(PocketBaseChannel {
            response: Some(stream),
            decoder,
            queue,
        }))
    }

    async fn create_record(
        &self,
        collection: Collection,
        fields: RemoteRecord,
    ) -> Result<RemoteRecord> {
        let response = self
            .http
            .post(self.records_url(collection))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&fields)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: &ServerId,
        fields: RemoteRecord,
    ) -> Result<RemoteRecord> {
        let response = self
            .http
            .patch(format!("{}/{}", self.records_url(collection), id))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&fields)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_record(&self, collection: Collection, id: &ServerId) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.records_url(collection), id))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Open SSE stream after the subscription was registered
struct PocketBaseChannel {
    response: Option<Response>,
    decoder: SseDecoder,
    queue: VecDeque<SseMessage>,
}

#[async_trait]
impl PushChannel for PocketBaseChannel {
    async fn next_event(&mut self) -> Option<Result<PushEvent>> {
        loop {
            while let Some(message) = self.queue.pop_front() {
                if message.event.as_deref() == Some("PB_CONNECT") || message.data.is_empty() {
                    continue;
                }
                return Some(PushEvent::parse(message.event.as_deref(), &message.data));
            }

            let response = self.response.as_mut()?;
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let messages = self.decoder.push(&chunk);
                    self.queue.extend(messages);
                }
                Ok(None) => {
                    self.response = None;
                    return None;
                }
                Err(error) => {
                    self.response = None;
                    return Some(Err(error.into()));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.response = None;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_filters_follow_relations() {
        let family = ServerId::from("fam123");
        assert_eq!(
            PocketBaseClient::family_filter(Collection::Families, &family),
            "id=\"fam123\""
        );
        assert_eq!(
            PocketBaseClient::family_filter(Collection::Members, &family),
            "family_id=\"fam123\""
        );
        assert_eq!(
            PocketBaseClient::family_filter(Collection::ListItems, &family),
            "list_id.family_id=\"fam123\""
        );
        assert_eq!(
            PocketBaseClient::family_filter(Collection::LocationHistory, &family),
            "user_id.family_id=\"fam123\""
        );
    }

    #[test]
    fn filter_escapes_quotes() {
        let family = ServerId::from("a\"b");
        assert_eq!(
            PocketBaseClient::family_filter(Collection::Lists, &family),
            "family_id=\"a\\\"b\""
        );
    }

    #[test]
    fn status_errors_map_to_failure_kinds() {
        assert!(matches!(
            PocketBaseClient::status_error(StatusCode::UNAUTHORIZED, ""),
            Error::AuthExpired
        ));
        assert!(PocketBaseClient::status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(PocketBaseClient::status_error(StatusCode::NOT_FOUND, "{}").is_remote_not_found());
    }

    #[test]
    fn debug_redacts_token() {
        let client = PocketBaseClient::new("https://pb.example.com/", "secret-token").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("https://pb.example.com"));
        assert_eq!(client.base_url(), "https://pb.example.com");
    }

    #[test]
    fn rejects_url_without_scheme() {
        assert!(PocketBaseClient::new("pb.example.com", "token").is_err());
    }
}
