use std::time::Duration;

use chrono::{DateTime, TimeZone};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::dwr::DwrResponse;
use crate::logger::{CallLogMode, CallLogger};
use crate::protocol::{
    self, CALLBACK_MARKER, CALL_PATH, CUBE_STATE_MARKER, Call, ENGINE_SCRIPT_PATH,
    METHOD_GET_CUBE_STATE, ResponseOutcome,
};
use crate::transport::{HttpTransport, Transport};
use crate::types::*;
use crate::{Error, Result};

type SuffixSource = Box<dyn FnMut() -> u32 + Send>;

pub struct MaxSessionBuilder {
    base_url: String,
    timeout: Option<Duration>,
    suffix_source: Option<SuffixSource>,
    log_mode: Option<CallLogMode>,
    log_path: Option<String>,
}

impl MaxSessionBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            suffix_source: None,
            log_mode: None,
            log_path: None,
        }
    }

    /// Per-request timeout of the HTTP transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Source of the numeric suffix appended to the server's script session prefix.
    pub fn script_session_suffix(mut self, f: impl FnMut() -> u32 + Send + 'static) -> Self {
        self.suffix_source = Some(Box::new(f));
        self
    }

    pub fn call_log(mut self, mode: CallLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<MaxSession<HttpTransport>> {
        let transport = HttpTransport::new(self.timeout)?;
        self.build_with_transport(transport)
    }

    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<MaxSession<T>> {
        let base_url = normalize_base_url(&self.base_url)?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(CallLogger::new(mode, &path)?),
            _ => None,
        };

        let suffix_source: SuffixSource = match self.suffix_source {
            Some(f) => f,
            None => Box::new(|| rand::thread_rng().gen_range(0..1000u32)),
        };

        Ok(MaxSession {
            transport,
            base_url,
            batch_id: 0,
            http_session_id: None,
            script_session_id: None,
            credentials: None,
            last_state: None,
            suffix_source,
            logger,
        })
    }
}

/// One logical login against a MAX! portal.
///
/// Every call-issuing method takes `&mut self`, so calls on one session never interleave;
/// share a session between tasks behind a mutex.
pub struct MaxSession<T: Transport = HttpTransport> {
    transport: T,
    base_url: String,
    batch_id: u64,
    http_session_id: Option<String>,
    script_session_id: Option<String>,
    credentials: Option<Credentials>,
    last_state: Option<MaxCubeState>,
    suffix_source: SuffixSource,
    logger: Option<CallLogger>,
}

impl MaxSession<HttpTransport> {
    pub fn builder(base_url: impl Into<String>) -> MaxSessionBuilder {
        MaxSessionBuilder::new(base_url)
    }

    pub fn for_portal(portal: Portal) -> MaxSessionBuilder {
        MaxSessionBuilder::new(portal.base_url())
    }
}

impl<T: Transport> MaxSession<T> {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn http_session_id(&self) -> Option<&str> {
        self.http_session_id.as_deref()
    }

    pub fn script_session_id(&self) -> Option<&str> {
        self.script_session_id.as_deref()
    }

    pub fn last_state(&self) -> Option<&MaxCubeState> {
        self.last_state.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        match (&self.script_session_id, &self.credentials) {
            (None, _) => SessionState::Uninitialized,
            (Some(_), None) => SessionState::Initialized,
            (Some(_), Some(_)) => SessionState::LoggedIn,
        }
    }

    /// Start a fresh HTTP session and derive a new script session id from `engine.js`.
    ///
    /// The batch counter is kept; ids stay unique across re-initialization.
    pub async fn initialize(&mut self) -> Result<()> {
        self.transport.reset()?;
        self.script_session_id = None;

        let url = format!("{}{}", self.base_url, ENGINE_SCRIPT_PATH);
        debug!(url = %url, "fetching engine script");
        let script = self.transport.get(&url).await?;
        self.http_session_id = self.transport.session_id();

        if let Some(ref mut logger) = self.logger {
            logger.log_init(&url, self.http_session_id.as_deref());
        }

        let prefix = DwrResponse::new(&script)
            .script_session_prefix()
            .ok_or_else(|| Error::ProtocolMismatch {
                context: url.clone(),
                body: script.clone(),
            })?;
        let suffix = (self.suffix_source)();
        self.script_session_id = Some(format!("{prefix}{suffix}"));
        Ok(())
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.initialize().await?;

        let call = protocol::login_call(user, password);
        let (body, _) = self.submit(&call).await?;
        let response = DwrResponse::new(&body);

        if response.is_error() {
            self.forget_session();
            return Err(Error::LoginFailed {
                url: self.base_url.clone(),
                user: user.to_string(),
                message: response.error_message().unwrap_or_default(),
            });
        }
        if !response.contains(CALLBACK_MARKER) {
            self.forget_session();
            return Err(Error::ProtocolMismatch {
                context: call.method().to_string(),
                body,
            });
        }

        self.credentials = Some(Credentials::new(user, password));
        info!(user, "logged in");
        Ok(())
    }

    /// Send `call`, recovering at most once by logging in again.
    ///
    /// An expired login is always recovered when credentials are known. A command failure is
    /// recovered only with `retry_on_failure`. The resubmitted call never recovers again.
    pub async fn execute_call(&mut self, retry_on_failure: bool, call: &Call) -> Result<String> {
        if self.script_session_id.is_none() {
            self.initialize().await?;
        }

        let mut relogged = false;
        loop {
            let (body, outcome) = self.submit(call).await?;
            match outcome {
                ResponseOutcome::Success => return Ok(body),
                ResponseOutcome::AuthenticationExpired => {
                    if relogged {
                        return Err(Error::NotAuthenticated {
                            method: call.method().to_string(),
                        });
                    }
                    let creds = self
                        .credentials
                        .clone()
                        .ok_or(Error::AuthenticationRequired)?;
                    warn!(method = call.method(), "session expired, logging in again");
                    self.login(&creds.user, &creds.password).await?;
                    relogged = true;
                }
                ResponseOutcome::CommandFailed(message) => {
                    if retry_on_failure
                        && !relogged
                        && let Some(creds) = self.credentials.clone()
                    {
                        warn!(method = call.method(), %message, "command failed, logging in again");
                        self.login(&creds.user, &creds.password).await?;
                        relogged = true;
                        continue;
                    }
                    return Err(Error::CommandFailed {
                        method: call.method().to_string(),
                        message,
                    });
                }
                ResponseOutcome::ProtocolMismatch => {
                    return Err(Error::ProtocolMismatch {
                        context: call.method().to_string(),
                        body,
                    });
                }
            }
        }
    }

    async fn submit(&mut self, call: &Call) -> Result<(String, ResponseOutcome)> {
        self.batch_id += 1;
        let batch_id = self.batch_id;
        let http_session_id = self.http_session_id.as_deref();
        let script_session_id = self.script_session_id.as_deref();

        let params = call.parameters(http_session_id, script_session_id, batch_id);
        let loggable = call.loggable_parameters(http_session_id, script_session_id, batch_id);
        debug!(method = call.method(), batch_id, params = ?loggable, "POST parameters");

        let url = format!("{}{}", self.base_url, CALL_PATH);
        let body = self.transport.post_form(&url, &params).await?;
        self.http_session_id = self.transport.session_id();

        let outcome = protocol::classify(&body, batch_id);
        if let Some(ref mut logger) = self.logger {
            logger.log_call(batch_id, call.method(), &loggable, &body, &outcome);
        }
        Ok((body, outcome))
    }

    fn forget_session(&mut self) {
        self.http_session_id = None;
        self.script_session_id = None;
    }

    // -- Commands --

    pub async fn set_room_auto_mode(&mut self, room: &MaxRoom) -> Result<()> {
        let call = protocol::set_room_auto_mode_call(room.id);
        self.execute_call(true, &call).await?;
        info!(room = %room.name, "command transmitted: SetRoomAutoMode");
        Ok(())
    }

    pub async fn set_room_eco_mode(&mut self, room: &MaxRoom) -> Result<()> {
        let temperature = room.eco_temperature.ok_or_else(|| {
            Error::InvalidArgument(format!("room {} has no eco temperature", room.id))
        })?;
        self.set_room_permanent_mode(room, temperature).await
    }

    pub async fn set_room_comfort_mode(&mut self, room: &MaxRoom) -> Result<()> {
        let temperature = room.comfort_temperature.ok_or_else(|| {
            Error::InvalidArgument(format!("room {} has no comfort temperature", room.id))
        })?;
        self.set_room_permanent_mode(room, temperature).await
    }

    pub async fn set_room_permanent_mode(&mut self, room: &MaxRoom, temperature: f64) -> Result<()> {
        check_temperature(temperature)?;
        let call = protocol::set_room_permanent_mode_call(room.id, temperature);
        self.execute_call(true, &call).await?;
        info!(room = %room.name, temperature, "command transmitted: SetRoomPermanentMode");
        Ok(())
    }

    /// Hold `temperature` until `until`, snapped to the portal's half-hour grid.
    pub async fn set_room_temporary_mode<Tz>(
        &mut self,
        room: &MaxRoom,
        temperature: f64,
        until: DateTime<Tz>,
    ) -> Result<()>
    where
        Tz: TimeZone,
    {
        check_temperature(temperature)?;
        let until = protocol::round_until(&until).timestamp_millis();
        let call = protocol::set_room_temporary_mode_call(room.id, temperature, until);
        self.execute_call(true, &call).await?;
        info!(room = %room.name, temperature, until, "command transmitted: SetRoomTemporaryMode");
        Ok(())
    }

    pub async fn get_state(&mut self) -> Result<MaxCubeState> {
        let body = self
            .execute_call(true, &protocol::cube_state_call())
            .await?;
        let response = DwrResponse::new(&body);
        if !response.contains(CUBE_STATE_MARKER) {
            return Err(Error::ProtocolMismatch {
                context: METHOD_GET_CUBE_STATE.to_string(),
                body,
            });
        }

        let state: MaxCubeState = response.decode_callback()?;
        info!(rooms = state.rooms.len(), "state loaded");
        self.last_state = Some(state.clone());
        Ok(state)
    }
}

fn check_temperature(temperature: f64) -> Result<()> {
    if temperature.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "temperature must be finite, got {temperature}"
        )))
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::InvalidArgument(format!("invalid portal URL {raw}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidArgument(format!(
            "portal URL must be http(s): {raw}"
        )));
    }
    let mut url = parsed.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}
