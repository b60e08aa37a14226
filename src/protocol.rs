use chrono::{DateTime, TimeDelta, TimeZone, Timelike};

pub const ENGINE_SCRIPT_PATH: &str = "dwr/engine.js";
/// All methods are posted to the same plaincall URL; the method name travels in the form body.
pub const CALL_PATH: &str = "dwr/call/plaincall/MaxRemoteApi.login.dwr";

const SCRIPT_NAME: &str = "MaxRemoteApi";
const PAGE: &str = "/index.html";
const REDACTED: &str = "***";

pub const ORIG_SCRIPT_SESSION_MARKER: &str = "dwr.engine._origScriptSessionId = \"";
pub const NOT_AUTHENTICATED_MARKER: &str = "message=\"Subject is not authenticated\"";
pub const CLIENT_EXCEPTION_MARKER: &str = "MaxClientException";
pub const CALLBACK_MARKER: &str = "dwr.engine._remoteHandleCallback(";
pub const CUBE_STATE_MARKER: &str = "var s0=new MaxCubeState();";

pub const METHOD_LOGIN: &str = "login";
pub const METHOD_GET_CUBE_STATE: &str = "getMaxCubeState";
pub const METHOD_SET_CLIENT_COMMANDS: &str = "setClientCommands";

/// A typed value in the remoting call grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Integer(i64),
    String(String),
    /// Epoch milliseconds.
    Date(i64),
    Object {
        class: &'static str,
        fields: Vec<(&'static str, Literal)>,
    },
    Array(Vec<Literal>),
}

/// One remote method invocation, encoded into the flat parameter set the endpoint expects.
///
/// Compound literals are never inlined: each member is stored under a synthetic `c0-eN`
/// parameter and referenced by name. The parent's id is allocated before its members, but
/// its parameter is emitted after them.
#[derive(Debug, Clone)]
pub struct Call {
    method: String,
    extra: Vec<(String, String)>,
    arguments: Vec<String>,
    secret_arguments: Vec<usize>,
    next_id: u32,
}

impl Call {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            extra: Vec::new(),
            arguments: Vec::new(),
            secret_arguments: Vec::new(),
            next_id: 1,
        }
    }

    pub fn argument(mut self, literal: Literal) -> Self {
        let encoded = self.encode(&literal);
        self.arguments.push(encoded);
        self
    }

    /// Like [`Call::argument`], but the value is masked in logs.
    pub fn secret_argument(mut self, literal: Literal) -> Self {
        self.secret_arguments.push(self.arguments.len());
        self.argument(literal)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn extra_parameters(&self) -> &[(String, String)] {
        &self.extra
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Full form body in wire order: call metadata, method identifiers, extra, positional, batch.
    pub fn parameters(
        &self,
        http_session_id: Option<&str>,
        script_session_id: Option<&str>,
        batch_id: u64,
    ) -> Vec<(String, String)> {
        self.build_parameters(http_session_id, script_session_id, batch_id, false)
    }

    pub fn loggable_parameters(
        &self,
        http_session_id: Option<&str>,
        script_session_id: Option<&str>,
        batch_id: u64,
    ) -> Vec<(String, String)> {
        self.build_parameters(http_session_id, script_session_id, batch_id, true)
    }

    fn build_parameters(
        &self,
        http_session_id: Option<&str>,
        script_session_id: Option<&str>,
        batch_id: u64,
        redact: bool,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("callCount".to_string(), "1".to_string()),
            ("page".to_string(), PAGE.to_string()),
            (
                "httpSessionId".to_string(),
                http_session_id.unwrap_or_default().to_string(),
            ),
            (
                "scriptSessionId".to_string(),
                script_session_id.unwrap_or_default().to_string(),
            ),
            ("c0-scriptName".to_string(), SCRIPT_NAME.to_string()),
            ("c0-methodName".to_string(), self.method.clone()),
            ("c0-id".to_string(), "0".to_string()),
        ];
        params.extend(self.extra.iter().cloned());
        for (i, arg) in self.arguments.iter().enumerate() {
            let value = if redact && self.secret_arguments.contains(&i) {
                REDACTED.to_string()
            } else {
                arg.clone()
            };
            params.push((format!("c0-param{i}"), value));
        }
        params.push(("batchId".to_string(), batch_id.to_string()));
        params
    }

    fn encode(&mut self, literal: &Literal) -> String {
        match literal {
            Literal::Number(n) => format!("number:{}", format_number(*n)),
            Literal::Integer(i) => format!("number:{i}"),
            Literal::String(s) => format!("string:{s}"),
            Literal::Date(ms) => format!("Date:{ms}"),
            Literal::Object { class, fields } => {
                let mut members = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    let reference = self.store(value);
                    members.push(format!("{name}:reference:{reference}"));
                }
                format!("Object_{class}:{{{}}}", members.join(", "))
            }
            Literal::Array(items) => {
                let mut members = Vec::with_capacity(items.len());
                for item in items {
                    members.push(format!("reference:{}", self.store(item)));
                }
                format!("Array:[{}]", members.join(","))
            }
        }
    }

    fn store(&mut self, literal: &Literal) -> String {
        let name = format!("c0-e{}", self.next_id);
        self.next_id += 1;
        let encoded = self.encode(literal);
        self.extra.push((name.clone(), encoded));
        name
    }
}

/// Decimal rendering with no trailing `.0` and never locale-dependent.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let s = value.to_string();
    s.strip_suffix(".0").map(str::to_string).unwrap_or(s)
}

/// Snap an override end time to the half-hour grid the portal accepts.
///
/// Seconds are dropped; minutes 0 and 30 are kept, minutes up to 27 move to :30 of the same
/// hour, everything else moves to the top of the next hour.
pub fn round_until<Tz: TimeZone>(until: &DateTime<Tz>) -> DateTime<Tz> {
    let truncated = until.clone()
        - TimeDelta::seconds(i64::from(until.second()))
        - TimeDelta::nanoseconds(i64::from(until.nanosecond()));
    let minute = i64::from(truncated.minute());
    match minute {
        0 | 30 => truncated,
        m if m > 27 => truncated + TimeDelta::minutes(60 - m),
        m => truncated + TimeDelta::minutes(30 - m),
    }
}

pub fn login_call(user: &str, password: &str) -> Call {
    Call::new(METHOD_LOGIN)
        .argument(Literal::String(user.to_string()))
        .secret_argument(Literal::String(password.to_string()))
}

pub fn cube_state_call() -> Call {
    Call::new(METHOD_GET_CUBE_STATE)
}

fn client_command(class: &'static str, fields: Vec<(&'static str, Literal)>) -> Call {
    Call::new(METHOD_SET_CLIENT_COMMANDS)
        .argument(Literal::Array(vec![Literal::Object { class, fields }]))
}

pub fn set_room_auto_mode_call(room_id: i64) -> Call {
    client_command(
        "MaxSetRoomAutoMode",
        vec![("roomId", Literal::Integer(room_id))],
    )
}

pub fn set_room_permanent_mode_call(room_id: i64, temperature: f64) -> Call {
    client_command(
        "MaxSetRoomPermanentMode",
        vec![
            ("roomId", Literal::Integer(room_id)),
            ("temperature", Literal::Number(temperature)),
        ],
    )
}

/// `until` must already be rounded; the room id travels as a string for this command.
pub fn set_room_temporary_mode_call(room_id: i64, temperature: f64, until_millis: i64) -> Call {
    client_command(
        "MaxSetRoomTemporaryMode",
        vec![
            ("roomId", Literal::String(room_id.to_string())),
            ("date", Literal::Date(until_millis)),
            ("temperature", Literal::Number(temperature)),
        ],
    )
}

/// How a call response was classified; on `Success` the payload is the response body itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success,
    AuthenticationExpired,
    CommandFailed(String),
    ProtocolMismatch,
}

pub fn classify(body: &str, batch_id: u64) -> ResponseOutcome {
    if body.contains(NOT_AUTHENTICATED_MARKER) {
        return ResponseOutcome::AuthenticationExpired;
    }
    if body.contains(CLIENT_EXCEPTION_MARKER) {
        let message = crate::dwr::DwrResponse::new(body)
            .quoted_after("message=\"")
            .unwrap_or_default();
        return ResponseOutcome::CommandFailed(message);
    }
    if !body.contains(&format!("{CALLBACK_MARKER}'{batch_id}'")) {
        return ResponseOutcome::ProtocolMismatch;
    }
    ResponseOutcome::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, s).unwrap()
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(21.0), "21");
        assert_eq!(format_number(21.5), "21.5");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(4.5), "4.5");
    }

    #[test]
    fn rounding_minute_up_to_27_snaps_to_half() {
        for m in 1..=27 {
            assert_eq!(round_until(&at(10, m, 13)), at(10, 30, 0), "minute {m}");
        }
    }

    #[test]
    fn rounding_late_minutes_go_to_next_hour() {
        for m in (28..60).filter(|m| *m != 30) {
            assert_eq!(round_until(&at(10, m, 59)), at(11, 0, 0), "minute {m}");
        }
    }

    #[test]
    fn rounding_keeps_grid_minutes() {
        assert_eq!(round_until(&at(10, 0, 42)), at(10, 0, 0));
        assert_eq!(round_until(&at(10, 30, 1)), at(10, 30, 0));
    }

    #[test]
    fn rounding_is_idempotent() {
        for m in 0..60 {
            let once = round_until(&at(9, m, 7));
            assert_eq!(round_until(&once), once);
            assert!(once.minute() == 0 || once.minute() == 30);
            assert_eq!(once.second(), 0);
            assert_eq!(once.nanosecond(), 0);
        }
    }

    #[test]
    fn rounding_rolls_over_midnight() {
        let rounded = round_until(&at(23, 45, 0));
        assert_eq!(rounded, Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap());
    }

    #[test]
    fn rounding_drops_milliseconds() {
        let t = at(8, 15, 3) + TimeDelta::milliseconds(250);
        assert_eq!(round_until(&t), at(8, 30, 0));
    }

    #[test]
    fn auto_mode_encoding() {
        let call = set_room_auto_mode_call(12);
        assert_eq!(call.method(), "setClientCommands");
        assert_eq!(
            call.extra_parameters(),
            [
                ("c0-e2".to_string(), "number:12".to_string()),
                (
                    "c0-e1".to_string(),
                    "Object_MaxSetRoomAutoMode:{roomId:reference:c0-e2}".to_string()
                ),
            ]
        );
        assert_eq!(call.arguments(), ["Array:[reference:c0-e1]"]);
    }

    #[test]
    fn temporary_mode_encoding() {
        let until = round_until(&at(14, 42, 7));
        let call = set_room_temporary_mode_call(7, 21.5, until.timestamp_millis());
        let extra = call.extra_parameters();
        assert_eq!(extra[0], ("c0-e2".into(), "string:7".into()));
        assert_eq!(
            extra[1],
            ("c0-e3".into(), format!("Date:{}", at(15, 0, 0).timestamp_millis()))
        );
        assert_eq!(extra[2], ("c0-e4".into(), "number:21.5".into()));
        assert_eq!(
            extra[3].1,
            "Object_MaxSetRoomTemporaryMode:{roomId:reference:c0-e2, date:reference:c0-e3, temperature:reference:c0-e4}"
        );
    }

    #[test]
    fn every_reference_is_a_parameter() {
        let call = Call::new("setClientCommands").argument(Literal::Array(vec![
            Literal::Object {
                class: "A",
                fields: vec![("x", Literal::Integer(1)), ("y", Literal::Number(2.5))],
            },
            Literal::Object {
                class: "B",
                fields: vec![("z", Literal::String("q".into()))],
            },
        ]));
        let names: Vec<&str> = call.extra_parameters().iter().map(|(k, _)| k.as_str()).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len(), "synthetic ids collide: {names:?}");

        let encoded = call
            .extra_parameters()
            .iter()
            .map(|(_, v)| v.as_str())
            .chain(call.arguments().iter().map(String::as_str));
        for value in encoded {
            for part in value.split("reference:").skip(1) {
                let name: String = part
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                    .collect();
                assert!(names.contains(&name.as_str()), "dangling reference {name}");
            }
        }
    }

    #[test]
    fn parameters_follow_wire_order() {
        let call = set_room_permanent_mode_call(3, 19.0);
        let params = call.parameters(Some("HS"), Some("SS123"), 4);
        let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "callCount",
                "page",
                "httpSessionId",
                "scriptSessionId",
                "c0-scriptName",
                "c0-methodName",
                "c0-id",
                "c0-e2",
                "c0-e3",
                "c0-e1",
                "c0-param0",
                "batchId",
            ]
        );
        assert_eq!(params[2].1, "HS");
        assert_eq!(params[8].1, "number:19");
        assert_eq!(params[11].1, "4");
    }

    #[test]
    fn login_password_is_redacted_in_logs_only() {
        let call = login_call("alice", "s3cret");
        let wire = call.parameters(None, Some("S1"), 1);
        assert!(wire.contains(&("c0-param1".into(), "string:s3cret".into())));
        let logged = call.loggable_parameters(None, Some("S1"), 1);
        assert!(logged.contains(&("c0-param0".into(), "string:alice".into())));
        assert!(logged.contains(&("c0-param1".into(), "***".into())));
    }

    #[test]
    fn classification_priority() {
        let both = "MaxClientException message=\"Subject is not authenticated\"";
        assert_eq!(classify(both, 1), ResponseOutcome::AuthenticationExpired);

        let failed = "s0.javaClassName=\"de.eq3.MaxClientException\";s0.message=\"Room \\\"Bad\\\" unknown\";";
        assert_eq!(
            classify(failed, 1),
            ResponseOutcome::CommandFailed("Room \"Bad\" unknown".into())
        );

        assert_eq!(
            classify("dwr.engine._remoteHandleCallback('2','0',null);", 3),
            ResponseOutcome::ProtocolMismatch
        );
        assert_eq!(
            classify("dwr.engine._remoteHandleCallback('3','0',null);", 3),
            ResponseOutcome::Success
        );
    }
}
