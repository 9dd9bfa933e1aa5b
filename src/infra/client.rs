use crate::config::ClientConfig;
use crate::domain::crypto::encrypt;
use crate::domain::{
    APP_VERSION_CODE, APP_VERSION_NAME, Device, Domains, PHONE_BRAND, PROJECT_TYPE,
    PROTOCOL_VERSION, PropertySnapshot, Session, TENANT_ID, UserProfile, normalize_username,
    user_agent,
};
use crate::error::{KarcherError, Result};
use crate::infra::broker::{
    BrokerConnector, BrokerCredentials, RumqttConnector, parse_broker_address,
};
use crate::infra::correlation::CorrelationClient;
use crate::infra::http::{HttpRequest, HttpTransport, Method, UreqTransport};
use crate::infra::map::{MapData, decode_map};
use crate::infra::session_store::{SessionStore, resolve_register_id};
use crate::infra::signer::{RequestSigner, SignedRequest, random_lower_hex};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;

const CLIENT_ID_SUFFIX_LEN: usize = 16;
const MAP_UPLOAD_DATE: &str = "01-01-2022";
const MAP_FILE_PREFIX: &str = "0046690461";
const MAP_SERVICE_TYPE: u32 = 2;

#[derive(Clone, Debug)]
struct Endpoints {
    base_url: String,
    mqtt: String,
}

/// Cloud client: signed REST calls, the session, and the broker-backed property cache.
pub struct KarcherHome {
    config: ClientConfig,
    http: Arc<dyn HttpTransport>,
    signer: RequestSigner,
    session: SessionStore,
    broker: CorrelationClient,
    endpoints: RwLock<Endpoints>,
}

impl KarcherHome {
    /// Builds a client on the real HTTP and MQTT transports and runs endpoint discovery.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let http = Arc::new(UreqTransport::new(config.http_timeout));
        let connector = Arc::new(RumqttConnector::default());
        Self::create(config, http, connector)
    }

    pub fn create(
        config: ClientConfig,
        http: Arc<dyn HttpTransport>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self> {
        let client = Self {
            endpoints: RwLock::new(Endpoints {
                base_url: config.region.base_url().to_string(),
                mqtt: String::new(),
            }),
            broker: CorrelationClient::new(connector, &config),
            signer: RequestSigner::default(),
            session: SessionStore::new(),
            http,
            config,
        };

        let domains = client.get_urls()?;
        {
            let mut endpoints = client.endpoints.write();
            if !domains.app_api.is_empty() {
                endpoints.base_url = domains.app_api.clone();
            }
            endpoints.mqtt = domains.mqtt.clone();
        }
        tracing::info!(api = %domains.app_api, mqtt = %domains.mqtt, "endpoints discovered");
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        self.session.snapshot()
    }

    pub fn base_url(&self) -> String {
        self.endpoints.read().base_url.clone()
    }

    pub fn broker(&self) -> &CorrelationClient {
        &self.broker
    }

    fn call(
        &self,
        request: &SignedRequest,
        session: &Session,
        decrypt_field: Option<&str>,
    ) -> Result<Option<Value>> {
        let base_url = self.base_url();
        let prepared = self.signer.prepare(request, session, &base_url);
        let response = self.http.send(prepared)?;
        self.signer.decode_response(response, decrypt_field)
    }

    fn call_for_value(&self, request: &SignedRequest, session: &Session) -> Result<Value> {
        self.call(request, session, None)?.ok_or_else(|| {
            KarcherError::UnexpectedResponse(format!("empty result from {}", request.path))
        })
    }

    /// Looks up the live API base URL and broker address.
    pub fn get_urls(&self) -> Result<Domains> {
        let request = SignedRequest::get("/network-service/domains/list")
            .query("tenantId", TENANT_ID)
            .query("productModeCode", PROJECT_TYPE)
            .query("version", PROTOCOL_VERSION);
        let value = self
            .call(&request, &self.session.snapshot(), Some("domain"))?
            .ok_or_else(|| KarcherError::UnexpectedResponse("empty domain list".to_string()))?;
        Ok(Domains::from_value(&value))
    }

    pub fn login(
        &self,
        username: &str,
        password: &str,
        register_id: Option<&str>,
    ) -> Result<Session> {
        let _transition = self.session.begin_transition();
        let register_id = resolve_register_id(register_id);
        let username = normalize_username(username, &self.config.phone_prefix);
        let key = self.signer.key();

        let request = SignedRequest::post("/user-center/auth/login")
            .field("tenantId", TENANT_ID)
            .field("lang", self.config.language.code())
            .field("token", Value::Null)
            .field("userId", Value::Null)
            .field("password", encrypt(password, key))
            .field("username", encrypt(&username, key))
            .field("authcode", Value::Null)
            .field("projectType", PROJECT_TYPE)
            .field("versionCode", APP_VERSION_CODE)
            .field("versionName", APP_VERSION_NAME)
            .field("phoneBrand", encrypt(PHONE_BRAND, key))
            .field("phoneSys", 1)
            .field(
                "noticeSetting",
                json!({ "andIpad": register_id, "android": register_id }),
            );
        let result = self.call_for_value(&request, &self.session.snapshot())?;
        let session = Session::from_login_result(&result, &register_id)?;

        self.broker.disconnect();
        self.session.replace(session.clone());
        tracing::info!(user_id = %session.user_id, "logged in");
        Ok(session)
    }

    /// Re-enters a previously issued session without a network round-trip.
    pub fn login_token(
        &self,
        auth_token: &str,
        mqtt_token: &str,
        register_id: Option<&str>,
    ) -> Result<Session> {
        let session = self
            .session
            .import_token(auth_token, mqtt_token, register_id)?;
        self.broker.disconnect();
        Ok(session)
    }

    /// Ends the session. State is cleared and the broker closed even when the server call fails.
    pub fn logout(&self) -> Result<()> {
        let _transition = self.session.begin_transition();
        let session = self.session.snapshot();
        if !session.is_authenticated() {
            self.session.clear();
            return Ok(());
        }

        let outcome = self.call(&SignedRequest::post("/user-center/auth/logout"), &session, None);
        self.session.clear();
        self.broker.disconnect();
        tracing::info!(user_id = %session.user_id, "logged out");
        outcome.map(|_| ())
    }

    pub fn get_user_info(&self) -> Result<UserProfile> {
        let session = self.session.require_authenticated()?;
        let value = self.call_for_value(
            &SignedRequest::get("/user-center/app/user/profile"),
            &session,
        )?;
        Ok(UserProfile::from_value(&value, self.signer.key())?)
    }

    pub fn get_devices(&self) -> Result<Vec<Device>> {
        let session = self.session.require_authenticated()?;
        let request = SignedRequest::get(format!(
            "/smart-home-service/smartHome/user/getDeviceInfoByUserId/{}",
            session.user_id
        ));
        match self.call(&request, &session, None)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|error| KarcherError::Decode(error.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Downloads and decodes one map of `device`; kinds 1 and 2 are robot maps, others JSON.
    pub fn get_map_data(&self, device: &Device, kind: u32) -> Result<MapData> {
        let session = self.session.require_authenticated()?;
        let dir = map_dir(device, kind);
        let request = SignedRequest::post("/storage-management/storage/aws/getAccessUrl")
            .field("dir", dir.as_str())
            .field("countryCode", self.config.country.as_str())
            .field("serviceType", MAP_SERVICE_TYPE)
            .field("tenantId", TENANT_ID);
        let access = self.call_for_value(&request, &session)?;

        let url = download_url(&access, &dir)?;
        tracing::debug!(serial = %device.sn, kind, %url, "downloading map");
        let blob = self.download(&url)?;
        decode_map(&blob, &device.sn, &device.mac, &device.product_id, kind)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.send(HttpRequest {
            method: Method::Get,
            url: url.to_string(),
            headers: vec![("User-Agent".to_string(), user_agent())],
            body: None,
        })?;
        if response.status != 200 {
            return Err(KarcherError::HttpStatus(response.status));
        }
        Ok(response.body)
    }

    fn broker_credentials(&self, session: &Session) -> Result<BrokerCredentials> {
        let address = self.endpoints.read().mqtt.clone();
        if address.is_empty() {
            return Err(KarcherError::Broker("broker address unknown".to_string()));
        }
        let (host, port) = parse_broker_address(&address)?;
        Ok(BrokerCredentials {
            host,
            port,
            client_id: format!(
                "{}_{}",
                session.user_id,
                random_lower_hex(CLIENT_ID_SUFFIX_LEN)
            ),
            username: session.user_id.clone(),
            password: session.mqtt_token.clone(),
        })
    }

    /// Starts tracking `device` with an empty snapshot kept current by broker events.
    pub fn subscribe_device(&self, device: &Device) -> Result<()> {
        let session = self.session.require_broker_credentials()?;
        self.broker.connect(&self.broker_credentials(&session)?, false)?;
        self.broker.watch_device(&device.product_id, &device.sn)
    }

    pub fn unsubscribe_device(&self, device: &Device) -> Result<()> {
        if !self.session.snapshot().has_broker_credentials() {
            return Ok(());
        }
        self.broker.unwatch_device(&device.product_id, &device.sn)
    }

    /// Asks the device to publish its properties; replies land in the snapshot asynchronously.
    pub fn request_device_update(&self, device: &Device) -> Result<()> {
        let session = self.session.require_broker_credentials()?;
        self.broker.connect(&self.broker_credentials(&session)?, false)?;
        self.broker.request_properties(&device.product_id, &device.sn)
    }

    /// Returns the cached snapshot or runs one request/reply round with the device.
    ///
    /// A device that does not answer in time yields whatever the cache holds, possibly defaults.
    pub fn get_device_properties(&self, device: &Device) -> Result<PropertySnapshot> {
        if let Some(snapshot) = self.broker.snapshot(&device.sn) {
            return Ok(snapshot);
        }
        let session = self.session.require_broker_credentials()?;
        let credentials = self.broker_credentials(&session)?;
        self.broker.fetch_properties(
            &credentials,
            &device.product_id,
            &device.sn,
            self.config.property_wait,
        )
    }

    pub fn close(&self) {
        self.broker.disconnect();
    }
}

fn map_dir(device: &Device, kind: u32) -> String {
    format!(
        "{TENANT_ID}/{}/{sn}/{MAP_UPLOAD_DATE}/map/temp/{MAP_FILE_PREFIX}_{sn}_{kind}",
        device.product_mode_code,
        sn = device.sn,
    )
}

fn download_url(access: &Value, dir: &str) -> Result<String> {
    let cdn = access
        .get("cdnDomain")
        .and_then(Value::as_str)
        .filter(|cdn| !cdn.is_empty());
    if let Some(cdn) = cdn {
        let path = access.get("dir").and_then(Value::as_str).unwrap_or(dir);
        return Ok(format!("https://{cdn}/{path}"));
    }
    access
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| KarcherError::UnexpectedResponse("access url missing".to_string()))
}
