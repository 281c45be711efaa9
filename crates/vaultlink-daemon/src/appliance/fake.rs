//! In-memory appliance used by tests.
//!
//! Serves the handful of REST resources the broker touches, records every
//! call and can be told to fail specific requests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};

use super::transport::{
    ApplianceConnection, ApplianceTransport, ConnectRequest, FullResponse, Service, TlsPolicy,
    TransportError,
};
use super::types::{
    ApplianceAvailability, ApplianceTrustedCertificate, LoggedInUser, MachineIdentity,
    Registration, RetrievableAccount,
};

/// A request the fake received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: Service,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub authenticated: bool,
}

/// A connection the fake accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedConnect {
    pub address: String,
    pub authenticated: bool,
    pub tls: TlsPolicy,
}

#[derive(Debug)]
struct FakeState {
    reachable: bool,
    federation_metadata: Option<String>,
    availability: ApplianceAvailability,
    me: LoggedInUser,
    users: BTreeMap<i64, Value>,
    registrations: BTreeMap<i64, Value>,
    retrievable: BTreeMap<i64, BTreeMap<i64, Value>>,
    trusted_certificates: Vec<ApplianceTrustedCertificate>,
    a2a_enabled: bool,
    next_id: i64,
    failures: Vec<(Method, String, u16)>,
    calls: Vec<RecordedCall>,
    connects: Vec<RecordedConnect>,
    metadata_fetches: Vec<String>,
}

/// Shared handle to an in-memory appliance.
#[derive(Debug, Clone)]
pub struct FakeAppliance {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeAppliance {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAppliance {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                reachable: true,
                federation_metadata: None,
                availability: ApplianceAvailability {
                    appliance_id: "SPP-0001".into(),
                    appliance_name: "spp-test".into(),
                    appliance_version: "7.5.0".into(),
                    appliance_current_state: "Online".into(),
                },
                me: LoggedInUser {
                    id: 1,
                    user_name: "admin".into(),
                    display_name: Some("Administrator".into()),
                    identity_provider_name: Some("Local".into()),
                    admin_roles: vec!["ApplianceAdmin".into()],
                },
                users: BTreeMap::new(),
                registrations: BTreeMap::new(),
                retrievable: BTreeMap::new(),
                trusted_certificates: Vec::new(),
                a2a_enabled: false,
                next_id: 100,
                failures: Vec::new(),
                calls: Vec::new(),
                connects: Vec::new(),
                metadata_fetches: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_federation_metadata(&self, xml: impl Into<String>) {
        self.lock().federation_metadata = Some(xml.into());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn set_admin_roles(&self, roles: &[&str]) {
        self.lock().me.admin_roles = roles.iter().map(ToString::to_string).collect();
    }

    /// Make every `method` request to exactly `path` fail with `status`.
    pub fn fail_on(&self, method: Method, path: &str, status: u16) {
        self.lock().failures.push((method, path.to_string(), status));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn insert_user(&self, identity: &MachineIdentity) -> i64 {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut value = to_object(identity);
        value["Id"] = json!(id);
        state.users.insert(id, value);
        id
    }

    pub fn insert_registration(&self, registration: &Registration) -> i64 {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut value = to_object(registration);
        value["Id"] = json!(id);
        state.registrations.insert(id, value);
        id
    }

    /// Delete a user behind the broker's back.
    pub fn remove_user(&self, id: i64) {
        self.lock().users.remove(&id);
    }

    /// Delete a registration behind the broker's back.
    pub fn remove_registration(&self, id: i64) {
        let mut state = self.lock();
        state.registrations.remove(&id);
        state.retrievable.remove(&id);
    }

    pub fn add_trusted_certificate(&self, cert: ApplianceTrustedCertificate) {
        self.lock().trusted_certificates.push(cert);
    }

    pub fn users(&self) -> Vec<MachineIdentity> {
        self.lock()
            .users
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.lock()
            .registrations
            .values()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn retrievable_accounts(&self, registration_id: i64) -> Vec<RetrievableAccount> {
        self.lock()
            .retrievable
            .get(&registration_id)
            .map(|accounts| {
                accounts
                    .values()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn a2a_enabled(&self) -> bool {
        self.lock().a2a_enabled
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of `method` calls to exactly `path`.
    pub fn count_calls(&self, method: &Method, path: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }

    pub fn connects(&self) -> Vec<RecordedConnect> {
        self.lock().connects.clone()
    }

    pub fn metadata_fetches(&self) -> Vec<String> {
        self.lock().metadata_fetches.clone()
    }
}

fn to_object<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({}),
    }
}

fn respond(status: u16, body: &Value) -> Result<FullResponse, TransportError> {
    Ok(FullResponse {
        status,
        body: body.to_string(),
    })
}

fn no_content() -> Result<FullResponse, TransportError> {
    Ok(FullResponse {
        status: 204,
        body: String::new(),
    })
}

fn not_found(path: &str) -> Result<FullResponse, TransportError> {
    Err(TransportError::NotFound(path.to_string()))
}

/// Parse the `Field eq 'value'` filters the broker sends.
fn parse_filter(filter: &str) -> Option<(&str, &str)> {
    let (field, value) = filter.split_once(" eq ")?;
    Some((field.trim(), value.trim().trim_matches('\'')))
}

impl FakeState {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn route(
        &mut self,
        service: Service,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<FullResponse, TransportError> {
        if let Some((_, _, status)) = self
            .failures
            .iter()
            .find(|(m, p, _)| m == method && p == path)
        {
            if *status == 404 {
                return not_found(path);
            }
            return Err(TransportError::Status {
                status: *status,
                message: "injected failure".into(),
            });
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        if service == Service::Notification {
            return match (method.as_str(), segments.as_slice()) {
                ("GET", ["Status", "Availability"]) => {
                    respond(200, &to_object(&self.availability))
                }
                _ => not_found(path),
            };
        }
        if !authenticated {
            return Err(TransportError::Status {
                status: 401,
                message: "Authentication required".into(),
            });
        }

        match (service, method.as_str(), segments.as_slice()) {
            (Service::Core, "GET", ["Me"]) => respond(200, &to_object(&self.me)),
            (Service::Appliance, "POST", ["A2AService", "Enable"]) => {
                self.a2a_enabled = true;
                respond(200, &Value::Null)
            }
            (Service::Core, "GET", ["TrustedCertificates"]) => {
                respond(200, &to_object_list(&self.trusted_certificates))
            }
            (Service::Core, _, ["Users", rest @ ..]) => {
                let next = self.next_id;
                let result = collection(&mut self.users, next, "UserName", method, rest, body, query, path);
                self.bump_if_created(&result);
                result
            }
            (Service::Core, _, ["A2ARegistrations", reg, "RetrievableAccounts", rest @ ..]) => {
                self.retrievable_accounts(reg, method, rest, body, path)
            }
            (Service::Core, _, ["A2ARegistrations", rest @ ..]) => {
                let next = self.next_id;
                let result = collection(
                    &mut self.registrations,
                    next,
                    "AppName",
                    method,
                    rest,
                    body,
                    query,
                    path,
                );
                self.bump_if_created(&result);
                if method.as_str() == "DELETE" && result.is_ok() {
                    if let Some(id) = rest.first().and_then(|id| id.parse::<i64>().ok()) {
                        self.retrievable.remove(&id);
                    }
                }
                result
            }
            _ => not_found(path),
        }
    }

    fn bump_if_created(&mut self, result: &Result<FullResponse, TransportError>) {
        if let Ok(FullResponse { status: 201, .. }) = result {
            self.next_id += 1;
        }
    }

    fn retrievable_accounts(
        &mut self,
        registration: &str,
        method: &Method,
        rest: &[&str],
        body: Option<&Value>,
        path: &str,
    ) -> Result<FullResponse, TransportError> {
        let Some(reg_id) = registration.parse::<i64>().ok() else {
            return not_found(path);
        };
        if !self.registrations.contains_key(&reg_id) {
            return not_found(path);
        }
        let accounts = self.retrievable.entry(reg_id).or_default();
        match (method.as_str(), rest) {
            ("GET", []) => respond(200, &Value::Array(accounts.values().cloned().collect())),
            ("POST", []) => {
                let Some(account_id) = body.and_then(|b| b["AccountId"].as_i64()) else {
                    return Err(TransportError::Status {
                        status: 400,
                        message: "AccountId is required".into(),
                    });
                };
                let value = json!({
                    "AccountId": account_id,
                    "AccountName": format!("account-{account_id}"),
                    "IpRestrictions": body.map_or(Value::Null, |b| b["IpRestrictions"].clone()),
                });
                accounts.insert(account_id, value.clone());
                respond(201, &value)
            }
            ("GET", [id]) => id
                .parse::<i64>()
                .ok()
                .and_then(|id| accounts.get(&id))
                .map_or_else(|| not_found(path), |v| respond(200, v)),
            ("DELETE", [id]) => match id.parse::<i64>().ok().and_then(|id| accounts.remove(&id)) {
                Some(_) => no_content(),
                None => not_found(path),
            },
            _ => not_found(path),
        }
    }
}

fn to_object_list<T: Serialize>(items: &[T]) -> Value {
    Value::Array(items.iter().map(to_object).collect())
}

#[allow(clippy::too_many_arguments)]
fn collection(
    items: &mut BTreeMap<i64, Value>,
    next_id: i64,
    name_field: &str,
    method: &Method,
    rest: &[&str],
    body: Option<&Value>,
    query: &[(&str, &str)],
    path: &str,
) -> Result<FullResponse, TransportError> {
    match (method.as_str(), rest) {
        ("GET", []) => {
            let filter = query
                .iter()
                .find(|(k, _)| *k == "filter")
                .and_then(|(_, v)| parse_filter(v));
            let found: Vec<Value> = items
                .values()
                .filter(|item| {
                    filter.is_none_or(|(field, value)| {
                        field == name_field && item[field].as_str() == Some(value)
                    })
                })
                .cloned()
                .collect();
            respond(200, &Value::Array(found))
        }
        ("POST", []) => {
            let mut value = body.cloned().unwrap_or_else(|| json!({}));
            if !value.is_object() {
                return Err(TransportError::Status {
                    status: 400,
                    message: "expected a JSON object".into(),
                });
            }
            value["Id"] = json!(next_id);
            items.insert(next_id, value.clone());
            respond(201, &value)
        }
        ("GET", [id]) => id
            .parse::<i64>()
            .ok()
            .and_then(|id| items.get(&id))
            .map_or_else(|| not_found(path), |v| respond(200, v)),
        ("PUT", [id]) => {
            let Some(id) = id.parse::<i64>().ok().filter(|id| items.contains_key(id)) else {
                return not_found(path);
            };
            let mut value = body.cloned().unwrap_or_else(|| json!({}));
            if !value.is_object() {
                return Err(TransportError::Status {
                    status: 400,
                    message: "expected a JSON object".into(),
                });
            }
            value["Id"] = json!(id);
            items.insert(id, value.clone());
            respond(200, &value)
        }
        ("DELETE", [id]) => match id.parse::<i64>().ok().and_then(|id| items.remove(&id)) {
            Some(_) => no_content(),
            None => not_found(path),
        },
        _ => not_found(path),
    }
}

#[async_trait]
impl ApplianceTransport for FakeAppliance {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn ApplianceConnection>, TransportError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(TransportError::Http(format!(
                "connection to {} refused",
                request.address
            )));
        }
        state.connects.push(RecordedConnect {
            address: request.address.clone(),
            authenticated: request.credential.is_some(),
            tls: request.tls.clone(),
        });
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            authenticated: request.credential.is_some(),
        }))
    }

    async fn fetch_federation_metadata(&self, address: &str) -> Result<String, TransportError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(TransportError::Http(format!("connection to {address} refused")));
        }
        state.metadata_fetches.push(address.to_string());
        state
            .federation_metadata
            .clone()
            .ok_or_else(|| TransportError::NotFound("RSTS/Saml2FedMetadata".into()))
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
    authenticated: bool,
}

#[async_trait]
impl ApplianceConnection for FakeConnection {
    async fn invoke(
        &self,
        service: Service,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<FullResponse, TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(RecordedCall {
            service,
            method: method.clone(),
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body: body.cloned(),
            authenticated: self.authenticated,
        });
        state.route(service, &method, path, body, query, self.authenticated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vaultlink_crypto::BearerToken;

    async fn connect(fake: &FakeAppliance, token: bool) -> Box<dyn ApplianceConnection> {
        fake.connect(ConnectRequest {
            address: "spp.test".into(),
            credential: token.then(|| BearerToken::new("t")),
            api_version: 3,
            tls: TlsPolicy::Insecure,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn anonymous_calls_only_reach_notification() {
        let fake = FakeAppliance::new();
        let conn = connect(&fake, false).await;
        let resp = conn
            .invoke(Service::Notification, Method::GET, "Status/Availability", None, &[])
            .await
            .unwrap();
        let availability: ApplianceAvailability = resp.json().unwrap();
        assert_eq!(availability.appliance_name, "spp-test");

        let err = conn
            .invoke(Service::Core, Method::GET, "Me", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn users_collection_supports_crud_and_filters() {
        let fake = FakeAppliance::new();
        let conn = connect(&fake, true).await;
        let created = conn
            .invoke(
                Service::Core,
                Method::POST,
                "Users",
                Some(&json!({"UserName": "a"})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(created.status, 201);
        let id = created.json::<Value>().unwrap()["Id"].as_i64().unwrap();

        conn.invoke(Service::Core, Method::POST, "Users", Some(&json!({"UserName": "b"})), &[])
            .await
            .unwrap();
        let found: Vec<Value> = conn
            .invoke(Service::Core, Method::GET, "Users", None, &[("filter", "UserName eq 'a'")])
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["Id"], id);

        let path = format!("Users/{id}");
        conn.invoke(Service::Core, Method::DELETE, &path, None, &[])
            .await
            .unwrap();
        let err = conn
            .invoke(Service::Core, Method::GET, &path, None, &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.count_calls(&Method::GET, &path), 1);
    }

    #[tokio::test]
    async fn injected_failures_apply_to_exact_path() {
        let fake = FakeAppliance::new();
        fake.fail_on(Method::POST, "A2AService/Enable", 500);
        let conn = connect(&fake, true).await;
        let err = conn
            .invoke(Service::Appliance, Method::POST, "A2AService/Enable", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }));
        assert!(!fake.a2a_enabled());
    }

    #[tokio::test]
    async fn unreachable_appliance_refuses_connections() {
        let fake = FakeAppliance::new();
        fake.set_reachable(false);
        assert!(
            fake.connect(ConnectRequest {
                address: "spp.test".into(),
                credential: None,
                api_version: 3,
                tls: TlsPolicy::Insecure,
            })
            .await
            .is_err()
        );
        assert!(fake.fetch_federation_metadata("spp.test").await.is_err());
    }
}
