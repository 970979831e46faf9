//! Vehicle API client
//!
//! Stateless per call apart from the held bearer token, which the token
//! refresh schedule replaces through [`VehicleApi::update_access_token`].

use std::collections::HashMap;

use parking_lot::RwLock;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{VlinkError, VlinkResult};
use crate::models::{
    AvailableCommand, CommandResult, FieldNode, Location, PlainValue, TimestampedValue, Vehicle,
};

const API_URL: &str = "https://api.volvocars.com";
const API_STATUS_URL: &str =
    "https://public-developer-portal-bff.weu-prod.ecpaz.volvocars.biz/api/v1/backend-status";

const CONNECTED_ENDPOINT: &str = "/connected-vehicle/v2/vehicles";
const ENERGY_ENDPOINT: &str = "/energy/v1/vehicles";
const LOCATION_ENDPOINT: &str = "/location/v1/vehicles";

const API_KEY_HEADER: &str = "vcc-api-key";

/// Endpoint roots used by the client. Overridable for tests.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub base_url: String,
    pub status_url: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            base_url: API_URL.to_string(),
            status_url: API_STATUS_URL.to_string(),
        }
    }
}

/// Client for the vehicle data and command endpoints.
pub struct VehicleApi {
    http: reqwest::Client,
    endpoints: ApiEndpoints,
    vin: String,
    api_key: String,
    access_token: RwLock<String>,
}

impl VehicleApi {
    pub fn new(
        http: reqwest::Client,
        vin: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self::with_endpoints(http, ApiEndpoints::default(), vin, api_key, access_token)
    }

    pub fn with_endpoints(
        http: reqwest::Client,
        endpoints: ApiEndpoints,
        vin: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            vin: vin.into(),
            api_key: api_key.into(),
            access_token: RwLock::new(access_token.into()),
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    /// Replace the bearer token used for subsequent calls.
    pub fn update_access_token(&self, access_token: impl Into<String>) {
        *self.access_token.write() = access_token.into();
    }

    /// Availability of the public API itself.
    ///
    /// Served from a separate status endpoint without authentication; the
    /// call does not count against the request quota.
    pub async fn get_api_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        debug!("request [API status]");
        let response = self
            .http
            .get(&self.endpoints.status_url)
            .send()
            .await
            .map_err(|e| VlinkError::api(format!("API status request failed: {e}")))?;

        let status = response.status();
        debug!("request [API status] status: {status}");
        if !status.is_success() {
            return Err(VlinkError::api(format!(
                "API status request returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| VlinkError::api(format!("API status body malformed: {e}")))?;
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .unwrap_or("OK");

        Ok(HashMap::from([(
            "apiStatus".to_string(),
            FieldNode::Plain(PlainValue::new(message)),
        )]))
    }

    pub async fn get_availability_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "command-accessibility")
            .await
    }

    pub async fn get_brakes_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "brakes").await
    }

    pub async fn get_diagnostics(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "diagnostics").await
    }

    pub async fn get_doors_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "doors").await
    }

    pub async fn get_engine_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "engine-status").await
    }

    pub async fn get_engine_warnings(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "engine").await
    }

    pub async fn get_fuel_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "fuel").await
    }

    pub async fn get_odometer(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "odometer").await
    }

    pub async fn get_recharge_status(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(ENERGY_ENDPOINT, "recharge-status").await
    }

    pub async fn get_statistics(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "statistics").await
    }

    pub async fn get_tyre_states(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "tyres").await
    }

    pub async fn get_warnings(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "warnings").await
    }

    pub async fn get_window_states(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        self.get_field_map(CONNECTED_ENDPOINT, "windows").await
    }

    /// Vehicle position, wrapped under the `location` snapshot key.
    pub async fn get_location(&self) -> VlinkResult<HashMap<String, FieldNode>> {
        let data = self.get_data(LOCATION_ENDPOINT, "location").await?;
        let location: Location = serde_json::from_value(data)
            .map_err(|e| VlinkError::api(format!("location payload malformed: {e}")))?;
        Ok(HashMap::from([(
            "location".to_string(),
            FieldNode::Location(location),
        )]))
    }

    /// Immutable vehicle details.
    pub async fn get_vehicle(&self) -> VlinkResult<Vehicle> {
        let data = self.get_data(CONNECTED_ENDPOINT, "").await?;
        serde_json::from_value(data)
            .map_err(|e| VlinkError::api(format!("vehicle payload malformed: {e}")))
    }

    /// Commands this vehicle accepts.
    pub async fn get_commands(&self) -> VlinkResult<Vec<AvailableCommand>> {
        let body = self
            .request(Method::GET, CONNECTED_ENDPOINT, "commands", None)
            .await?;
        let items = body.get("data").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(items)
            .map_err(|e| VlinkError::api(format!("command list malformed: {e}")))
    }

    /// Execute a remote command, optionally with a JSON payload.
    pub async fn execute_command(
        &self,
        command: &str,
        body: Option<Value>,
    ) -> VlinkResult<CommandResult> {
        let operation = format!("commands/{command}");
        let response = self
            .request(Method::POST, CONNECTED_ENDPOINT, &operation, body)
            .await?;
        let data = response.get("data").cloned().unwrap_or_default();
        serde_json::from_value(data)
            .map_err(|e| VlinkError::api(format!("command result malformed: {e}")))
    }

    /// Fetch an operation whose payload is a map of scalar fields.
    async fn get_field_map(
        &self,
        endpoint: &str,
        operation: &str,
    ) -> VlinkResult<HashMap<String, FieldNode>> {
        let data = self.get_data(endpoint, operation).await?;
        let fields: HashMap<String, TimestampedValue> = serde_json::from_value(data)
            .map_err(|e| VlinkError::api(format!("{operation} payload malformed: {e}")))?;
        Ok(fields
            .into_iter()
            .map(|(key, value)| (key, FieldNode::Timestamped(value)))
            .collect())
    }

    async fn get_data(&self, endpoint: &str, operation: &str) -> VlinkResult<Value> {
        let body = self.request(Method::GET, endpoint, operation, None).await?;
        Ok(body
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        operation: &str,
        body: Option<Value>,
    ) -> VlinkResult<Value> {
        let url = if operation.is_empty() {
            format!("{}{}/{}", self.endpoints.base_url, endpoint, self.vin)
        } else {
            format!(
                "{}{}/{}/{}",
                self.endpoints.base_url, endpoint, self.vin, operation
            )
        };

        let token = self.access_token.read().clone();
        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(API_KEY_HEADER, self.api_key.as_str());
        if let Some(payload) = body {
            request = request.json(&payload);
        } else if method == Method::POST {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        }

        debug!(
            "request [{operation}]: {method} {}",
            url.replace(&self.vin, "[vin]")
        );
        let response = request
            .send()
            .await
            .map_err(|e| VlinkError::api(format!("{operation} request failed: {e}")))?;

        let status = response.status();
        debug!("request [{operation}] status: {status}");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(VlinkError::auth(format!(
                "{operation} returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(VlinkError::api(format!(
                "{operation} returned status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VlinkError::api(format!("{operation} returned invalid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VIN: &str = "YV1TESTVIN000001";

    fn api_for(server: &mockito::Server) -> VehicleApi {
        VehicleApi::with_endpoints(
            reqwest::Client::new(),
            ApiEndpoints {
                base_url: server.url(),
                status_url: format!("{}/backend-status", server.url()),
            },
            VIN,
            "test-api-key",
            "at-1",
        )
    }

    #[tokio::test]
    async fn field_map_decodes_values_and_preserves_unknown_keys() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/connected-vehicle/v2/vehicles/{VIN}/doors").as_str())
            .match_header("authorization", "Bearer at-1")
            .match_header("vcc-api-key", "test-api-key")
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "centralLock": {
                            "value": "LOCKED",
                            "timestamp": "2024-11-02T09:30:00Z"
                        },
                        "frontLeftDoor": {
                            "value": "CLOSED",
                            "timestamp": "2024-11-02T09:30:00Z",
                            "severity": "none"
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let api = api_for(&server);
        let fields = api.get_doors_status().await.unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields["centralLock"].value(), Some(&json!("LOCKED")));
        assert_eq!(
            fields["frontLeftDoor"].get("severity"),
            Some(&json!("none"))
        );
    }

    #[tokio::test]
    async fn unauthorized_translates_to_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/connected-vehicle/v2/vehicles/{VIN}/brakes").as_str())
            .with_status(401)
            .with_body("{}")
            .create_async()
            .await;

        let api = api_for(&server);
        let result = api.get_brakes_status().await;

        assert!(matches!(result, Err(VlinkError::Auth(_))));
    }

    #[tokio::test]
    async fn server_error_translates_to_api_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/connected-vehicle/v2/vehicles/{VIN}/odometer").as_str())
            .with_status(500)
            .with_body("{}")
            .create_async()
            .await;

        let api = api_for(&server);
        let result = api.get_odometer().await;

        assert!(matches!(result, Err(VlinkError::Api(_))));
    }

    #[tokio::test]
    async fn token_update_applies_to_subsequent_calls() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/connected-vehicle/v2/vehicles/{VIN}/odometer").as_str())
            .match_header("authorization", "Bearer at-2")
            .with_status(200)
            .with_body(json!({ "data": {} }).to_string())
            .create_async()
            .await;

        let api = api_for(&server);
        api.update_access_token("at-2");
        let fields = api.get_odometer().await.unwrap();
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn command_result_normalises_invoke_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "POST",
                format!("/connected-vehicle/v2/vehicles/{VIN}/commands/lock").as_str(),
            )
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "vin": VIN,
                        "invokeStatus": "COMPLETED",
                        "message": ""
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let api = api_for(&server);
        let result = api.execute_command("lock", None).await.unwrap();

        assert_eq!(result.invoke_status, "COMPLETED");
        assert_eq!(result.vin, VIN);
    }

    #[tokio::test]
    async fn api_status_falls_back_to_ok() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/backend-status")
            .with_status(200)
            .with_body(json!({ "message": "" }).to_string())
            .create_async()
            .await;

        let api = api_for(&server);
        let fields = api.get_api_status().await.unwrap();

        assert_eq!(fields["apiStatus"].value(), Some(&json!("OK")));
    }

    #[tokio::test]
    async fn vehicle_endpoint_omits_trailing_operation() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/connected-vehicle/v2/vehicles/{VIN}").as_str())
            .with_status(200)
            .with_body(
                json!({
                    "data": {
                        "vin": VIN,
                        "modelYear": 2023,
                        "gearbox": "AUTOMATIC",
                        "fuelType": "DIESEL",
                        "externalColour": "Thunder Grey",
                        "images": {
                            "exteriorImageUrl": "https://cdn.example.com/ext.png",
                            "internalImageUrl": "https://cdn.example.com/int.png"
                        },
                        "descriptions": {
                            "model": "V60",
                            "upholstery": "Leather",
                            "steering": "LEFT"
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let api = api_for(&server);
        let vehicle = api.get_vehicle().await.unwrap();

        assert_eq!(vehicle.description.model, "V60");
        assert!(vehicle.has_combustion_engine());
        assert!(!vehicle.has_battery_engine());
    }
}
