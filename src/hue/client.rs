use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::ApiResult;
use crate::hue::api::{
    GroupBody, HueApiResult, LightStateUpdate, NewUser, ScheduleBody,
};
use crate::hue::reply::{self, DiscoveryReply};

/// HTTP client for the v1 bridge API and the N-UPnP discovery service.
///
/// Bridges are addressed by plain IP; only the broadcast-discovery endpoint
/// uses TLS. Every reply body goes through [`reply::classify`] so callers
/// receive a [`DiscoveryReply`] variant instead of raw JSON.
#[derive(Clone, Debug)]
pub struct HueClient {
    http: reqwest::Client,
    devicetype: String,
    nupnp_url: Url,
}

/// Mutation endpoints reply with an array of per-field results.
pub type CommandReply = Vec<HueApiResult<Value>>;

impl HueClient {
    const DEFAULT_TIMEOUT_SECS: u64 = 10;

    pub fn new(devicetype: String, nupnp_url: Url) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            devicetype,
            nupnp_url,
        })
    }

    fn api_url(ip: &str, suffix: &str) -> String {
        format!("http://{ip}/api{suffix}")
    }

    fn user_url(ip: &str, username: &str, suffix: &str) -> String {
        format!("http://{ip}/api/{username}{suffix}")
    }

    /// `GET https://discovery.meethue.com/`
    pub async fn nupnp_discover(&self) -> ApiResult<DiscoveryReply> {
        let response = self.http.get(self.nupnp_url.clone()).send().await?;
        reply::classify(response.json().await?)
    }

    /// `POST /api` — asks the bridge for a username. Succeeds only within the
    /// link-button window, so this is retried quietly in the background.
    pub async fn create_user(&self, ip: &str) -> ApiResult<DiscoveryReply> {
        let body = NewUser {
            devicetype: self.devicetype.clone(),
        };
        let response = self
            .http
            .post(Self::api_url(ip, ""))
            .json(&body)
            .send()
            .await?;
        reply::classify(response.json().await?)
    }

    /// `GET /api/<username>` — the full-state dump, doubling as the
    /// credentials check.
    pub async fn full_state(&self, ip: &str, username: &str) -> ApiResult<DiscoveryReply> {
        let response = self
            .http
            .get(Self::user_url(ip, username, ""))
            .send()
            .await?;
        reply::classify(response.json().await?)
    }

    async fn put(&self, url: String, body: &impl Serialize) -> ApiResult<CommandReply> {
        let response = self.http.put(url).json(body).send().await?;
        Ok(response.json().await?)
    }

    async fn post(&self, url: String, body: &impl Serialize) -> ApiResult<CommandReply> {
        let response = self.http.post(url).json(body).send().await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, url: String) -> ApiResult<CommandReply> {
        let response = self.http.delete(url).send().await?;
        Ok(response.json().await?)
    }

    /// `PUT /api/<username>/lights/<index>/state`
    pub async fn set_light_state(
        &self,
        ip: &str,
        username: &str,
        index: u32,
        update: LightStateUpdate,
    ) -> ApiResult<CommandReply> {
        self.put(
            Self::user_url(ip, username, &format!("/lights/{index}/state")),
            &update.clamped(),
        )
        .await
    }

    /// `PUT /api/<username>/lights/<index>` — rename
    pub async fn rename_light(
        &self,
        ip: &str,
        username: &str,
        index: u32,
        name: &str,
    ) -> ApiResult<CommandReply> {
        self.put(
            Self::user_url(ip, username, &format!("/lights/{index}")),
            &serde_json::json!({ "name": name }),
        )
        .await
    }

    /// `DELETE /api/<username>/lights/<index>`
    pub async fn delete_light(
        &self,
        ip: &str,
        username: &str,
        index: u32,
    ) -> ApiResult<CommandReply> {
        self.delete(Self::user_url(ip, username, &format!("/lights/{index}")))
            .await
    }

    /// `POST /api/<username>/lights` — trigger a scan for new lights
    pub async fn search_for_new_lights(&self, ip: &str, username: &str) -> ApiResult<CommandReply> {
        let response = self
            .http
            .post(Self::user_url(ip, username, "/lights"))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// `GET /api/<username>/lights/new` — scan results, keyed by light index
    /// plus a `lastscan` entry
    pub async fn new_lights(&self, ip: &str, username: &str) -> ApiResult<Value> {
        let response = self
            .http
            .get(Self::user_url(ip, username, "/lights/new"))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// `POST /api/<username>/groups`
    pub async fn create_group(
        &self,
        ip: &str,
        username: &str,
        body: &GroupBody,
    ) -> ApiResult<CommandReply> {
        self.post(Self::user_url(ip, username, "/groups"), body).await
    }

    /// `PUT /api/<username>/groups/<id>`
    pub async fn update_group(
        &self,
        ip: &str,
        username: &str,
        group: u32,
        body: &GroupBody,
    ) -> ApiResult<CommandReply> {
        self.put(Self::user_url(ip, username, &format!("/groups/{group}")), body)
            .await
    }

    /// `DELETE /api/<username>/groups/<id>`
    pub async fn delete_group(
        &self,
        ip: &str,
        username: &str,
        group: u32,
    ) -> ApiResult<CommandReply> {
        self.delete(Self::user_url(ip, username, &format!("/groups/{group}")))
            .await
    }

    /// `POST /api/<username>/schedules`
    pub async fn create_schedule(
        &self,
        ip: &str,
        username: &str,
        body: &ScheduleBody,
    ) -> ApiResult<CommandReply> {
        self.post(Self::user_url(ip, username, "/schedules"), body)
            .await
    }

    /// `PUT /api/<username>/schedules/<id>`
    pub async fn update_schedule(
        &self,
        ip: &str,
        username: &str,
        schedule: u32,
        body: &ScheduleBody,
    ) -> ApiResult<CommandReply> {
        self.put(
            Self::user_url(ip, username, &format!("/schedules/{schedule}")),
            body,
        )
        .await
    }

    /// `DELETE /api/<username>/schedules/<id>`
    pub async fn delete_schedule(
        &self,
        ip: &str,
        username: &str,
        schedule: u32,
    ) -> ApiResult<CommandReply> {
        self.delete(Self::user_url(ip, username, &format!("/schedules/{schedule}")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_bridge_relative() {
        assert_eq!(HueClient::api_url("192.168.1.10", ""), "http://192.168.1.10/api");
        assert_eq!(
            HueClient::user_url("192.168.1.10", "user1", "/lights/3/state"),
            "http://192.168.1.10/api/user1/lights/3/state"
        );
    }
}
