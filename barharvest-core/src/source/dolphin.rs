//! DolphinDB source over the server's HTTP script endpoint.
//!
//! Every call posts a script to `http://{host}:{port}/` and reads back the
//! JSON-encoded result object. The server session id is shared by all worker
//! threads behind a `Mutex`; the first query logs in and later queries reuse
//! the session until the server rejects it or the connection fails, after
//! which the next call logs in again. Transient failures are retried with exponential backoff and
//! feed the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::{ColumnInfo, FetchError, TableSource};
use crate::data::raw::{RawTable, RawValue};
use crate::dates::dot_format;
use crate::symbol::CanonicalSymbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings. Credentials arrive already resolved; this type never
/// reads the environment.
#[derive(Debug, Clone)]
pub struct DolphinSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub symbol_column: String,
    pub date_column: String,
}

impl Default for DolphinSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8848,
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            symbol_column: "symbol".to_string(),
            date_column: "date".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScriptRequest<'a> {
    #[serde(rename = "sessionID")]
    session_id: &'a str,
    #[serde(rename = "functionName")]
    function_name: &'static str,
    params: [ScriptParam<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ScriptParam<'a> {
    name: &'static str,
    form: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScriptResponse {
    #[serde(rename = "sessionID", default)]
    session_id: Value,
    #[serde(rename = "resultCode", default)]
    result_code: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    object: Vec<ResultObject>,
}

#[derive(Debug, Deserialize)]
struct ResultObject {
    #[serde(default)]
    form: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct ColumnVector {
    name: String,
    #[serde(default)]
    value: Vec<RawValue>,
}

pub struct DolphinHttpSource {
    client: reqwest::blocking::Client,
    url: String,
    settings: DolphinSettings,
    session: Mutex<Option<String>>,
    circuit_breaker: Arc<CircuitBreaker>,
    base_delay: Duration,
}

impl DolphinHttpSource {
    /// Validate the column identifiers and build the HTTP client. No request
    /// is sent until the first call.
    pub fn new(
        settings: DolphinSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, FetchError> {
        for column in [&settings.symbol_column, &settings.date_column] {
            if !is_identifier(column) {
                return Err(FetchError::Query(format!(
                    "'{column}' is not a valid column identifier"
                )));
            }
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FetchError::Connectivity(format!("failed to build HTTP client: {e}")))?;
        let url = if settings.host.starts_with("http://") || settings.host.starts_with("https://") {
            format!("{}:{}/", settings.host.trim_end_matches('/'), settings.port)
        } else {
            format!("http://{}:{}/", settings.host, settings.port)
        };

        Ok(Self {
            client,
            url,
            settings,
            session: Mutex::new(None),
            circuit_breaker,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Delay before the first retry; doubles on each further attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn current_session(&self) -> String {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "0".to_string())
    }

    /// Log in once per source. Later callers see the stored session.
    fn ensure_session(&self) -> Result<String, FetchError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }

        let script = match (&self.settings.username, &self.settings.password) {
            (Some(user), Some(password)) => {
                format!("login({}, {})", quote(user), quote(password))
            }
            _ => "version()".to_string(),
        };
        let response = self.post_with_retry("0", &script)?;
        let id = value_text(&response.session_id);
        if id.is_empty() || id == "0" {
            return Err(FetchError::Connectivity(
                "server did not assign a session".to_string(),
            ));
        }
        info!(url = %self.url, "dolphin session established");
        *session = Some(id.clone());
        Ok(id)
    }

    /// Forget `stale` so the next call logs in again. A session another
    /// worker already replaced is left alone.
    fn reset_session(&self, stale: &str) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_deref() == Some(stale) {
            *session = None;
        }
    }

    /// Run `script` on the shared session. A rejected session is replaced
    /// and the script sent once more; a connectivity failure drops the
    /// session so the next call starts with a fresh login.
    fn run(&self, script: &str) -> Result<ResultObject, FetchError> {
        let session = self.ensure_session()?;
        debug!(script, "dolphin script");
        let response = match self.post_with_retry(&session, script) {
            Ok(response) => response,
            Err(e) if is_session_error(&e) => {
                warn!(error = %e, "dolphin session rejected, logging in again");
                self.reset_session(&session);
                let session = self.ensure_session()?;
                self.post_with_retry(&session, script)?
            }
            Err(e @ FetchError::Connectivity(_)) => {
                self.reset_session(&session);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        response
            .object
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::UnexpectedShape("response carries no result object".into()))
    }

    /// One script call with retry and circuit breaker logic. A server-side
    /// script error is returned immediately; only transport failures retry.
    fn post_with_retry(&self, session: &str, script: &str) -> Result<ScriptResponse, FetchError> {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                std::thread::sleep(backoff_delay(self.base_delay, attempt));
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitOpen {
                    remaining_secs: self.circuit_breaker.remaining_cooldown().as_secs(),
                });
            }

            match self.post(session, script) {
                Ok(response) => {
                    self.circuit_breaker.record_success();
                    return check_result(response);
                }
                Err(e) if e.is_transient() => {
                    self.circuit_breaker.record_failure();
                    warn!(attempt, error = %e, "dolphin request failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Connectivity("max retries exceeded".into())))
    }

    fn post(&self, session: &str, script: &str) -> Result<ScriptResponse, FetchError> {
        let request = ScriptRequest {
            session_id: session,
            function_name: "executeCode",
            params: [ScriptParam {
                name: "script",
                form: "scalar",
                kind: "string",
                value: script,
            }],
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(e.to_string())
                } else {
                    FetchError::Connectivity(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::Connectivity(format!("server rejected credentials (HTTP {status})")));
        }
        if status.is_server_error() {
            return Err(FetchError::Connectivity(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Query(format!("HTTP {status}")));
        }

        resp.json::<ScriptResponse>()
            .map_err(|e| FetchError::UnexpectedShape(format!("failed to parse response: {e}")))
    }
}

impl TableSource for DolphinHttpSource {
    fn name(&self) -> &str {
        "dolphin"
    }

    fn connect(&self) -> Result<(), FetchError> {
        self.ensure_session().map(|_| ())
    }

    fn query(
        &self,
        database: &str,
        table: &str,
        symbol: &CanonicalSymbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawTable, FetchError> {
        let script = select_script(&self.settings, database, table, symbol, start, end);
        let object = self.run(&script)?;
        parse_table(object)
    }

    fn list_tables(&self, database: &str) -> Result<Vec<String>, FetchError> {
        let script = format!("exec name from getTables(database({}))", quote(database));
        let object = self.run(&script)?;
        parse_vector(object)
    }

    fn table_schema(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>, FetchError> {
        let script = format!(
            "select name, typeString from schema(loadTable({}, {})).colDefs",
            quote(database),
            quote(table)
        );
        let table = parse_table(self.run(&script)?)?;
        let name = table.column_index("name");
        let type_name = table.column_index("typeString");
        let (Some(name), Some(type_name)) = (name, type_name) else {
            return Err(FetchError::UnexpectedShape(
                "schema result lacks name/typeString columns".into(),
            ));
        };
        Ok(table
            .rows()
            .iter()
            .map(|row| ColumnInfo {
                name: cell_text(&row[name]),
                type_name: cell_text(&row[type_name]),
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

impl std::fmt::Debug for DolphinHttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DolphinHttpSource")
            .field("url", &self.url)
            .field("username", &self.settings.username)
            .field("session", &self.current_session())
            .finish()
    }
}

/// The per-symbol select. Dates are script literals (`2005.04.08`).
fn select_script(
    settings: &DolphinSettings,
    database: &str,
    table: &str,
    symbol: &CanonicalSymbol,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    format!(
        "select * from loadTable({db}, {table}) where {sym_col} = {sym} and {date_col} >= {start} and {date_col} <= {end}",
        db = quote(database),
        table = quote(table),
        sym_col = settings.symbol_column,
        sym = quote(&symbol.to_string()),
        date_col = settings.date_column,
        start = dot_format(start),
        end = dot_format(end),
    )
}

/// Longest pause between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Pause before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// The server answered, but no longer knows the session id it was sent.
fn is_session_error(e: &FetchError) -> bool {
    match e {
        FetchError::Query(msg) => msg.to_ascii_lowercase().contains("session"),
        _ => false,
    }
}

/// Double-quoted script string literal.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_text(v: &RawValue) -> String {
    match v {
        RawValue::Text(s) => s.clone(),
        RawValue::Number(n) => n.to_string(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Null => String::new(),
    }
}

fn check_result(response: ScriptResponse) -> Result<ScriptResponse, FetchError> {
    if value_text(&response.result_code) == "0" {
        Ok(response)
    } else {
        Err(FetchError::Query(if response.msg.is_empty() {
            format!("result code {}", value_text(&response.result_code))
        } else {
            response.msg
        }))
    }
}

fn parse_table(object: ResultObject) -> Result<RawTable, FetchError> {
    if !object.form.eq_ignore_ascii_case("table") {
        return Err(FetchError::UnexpectedShape(format!(
            "expected a table, got form '{}'",
            object.form
        )));
    }
    let columns: Vec<ColumnVector> = serde_json::from_value(object.value)
        .map_err(|e| FetchError::UnexpectedShape(format!("table columns: {e}")))?;
    RawTable::from_columns(columns.into_iter().map(|c| (c.name, c.value)).collect())
        .map_err(|e| FetchError::UnexpectedShape(e.to_string()))
}

fn parse_vector(object: ResultObject) -> Result<Vec<String>, FetchError> {
    match object.value {
        Value::Array(items) => Ok(items.iter().map(value_text).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(FetchError::UnexpectedShape(format!(
            "expected a vector, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn select_script_uses_dot_dates_and_quoted_symbol() {
        let settings = DolphinSettings::default();
        let sym = CanonicalSymbol::parse("000001.SZ").unwrap();
        let script = select_script(
            &settings,
            "dfs://stock",
            "stock_daily",
            &sym,
            d(2005, 4, 8),
            d(2005, 6, 30),
        );
        assert_eq!(
            script,
            "select * from loadTable(\"dfs://stock\", \"stock_daily\") where symbol = \"000001.SZ\" \
             and date >= 2005.04.08 and date <= 2005.06.30"
        );
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(quote("a\nb\rc\td"), r#""a\nb\rc\td""#);
    }

    #[test]
    fn quoted_literal_has_no_raw_control_characters() {
        let quoted = quote("pa\rss\two\nrd\"");
        assert!(!quoted.contains(['\r', '\t', '\n']));
        assert_eq!(quoted, r#""pa\rss\two\nrd\"""#);
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn session_errors_are_recognised() {
        assert!(is_session_error(&FetchError::Query("Invalid session ID".into())));
        assert!(!is_session_error(&FetchError::Query("table not found".into())));
        assert!(!is_session_error(&FetchError::Connectivity("session".into())));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("TRADE_DT"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a; drop"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn rejects_bad_column_identifier() {
        let settings = DolphinSettings {
            symbol_column: "sym bol".into(),
            ..Default::default()
        };
        let err = DolphinHttpSource::new(settings, Arc::new(CircuitBreaker::default())).unwrap_err();
        assert!(matches!(err, FetchError::Query(_)));
    }

    #[test]
    fn parses_table_response() {
        let json = r#"{
            "sessionID": "42",
            "resultCode": "0",
            "msg": "",
            "object": [{
                "name": "",
                "form": "table",
                "value": [
                    {"name": "date", "form": "vector", "value": ["2005.04.08", "2005.04.11"]},
                    {"name": "close", "form": "vector", "value": [10.5, null]}
                ]
            }]
        }"#;
        let response: ScriptResponse = serde_json::from_str(json).unwrap();
        assert_eq!(value_text(&response.session_id), "42");
        let response = check_result(response).unwrap();
        let object = response.object.into_iter().next().unwrap();
        let table = parse_table(object).unwrap();
        assert_eq!(table.columns(), ["date", "close"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1][1], RawValue::Null);
    }

    #[test]
    fn script_error_is_query_failure() {
        let response: ScriptResponse =
            serde_json::from_str(r#"{"sessionID": "42", "resultCode": "1", "msg": "table not found"}"#)
                .unwrap();
        assert_eq!(
            check_result(response).unwrap_err(),
            FetchError::Query("table not found".into())
        );
    }

    #[test]
    fn parses_vector_response() {
        let object = ResultObject {
            form: "vector".into(),
            value: serde_json::json!(["stock_daily", "stock_minute"]),
        };
        assert_eq!(
            parse_vector(object).unwrap(),
            vec!["stock_daily".to_string(), "stock_minute".to_string()]
        );
    }

    #[test]
    fn non_table_result_is_unexpected_shape() {
        let object = ResultObject {
            form: "scalar".into(),
            value: serde_json::json!(1),
        };
        assert!(matches!(
            parse_table(object),
            Err(FetchError::UnexpectedShape(_))
        ));
    }

    // ── session refresh against a canned HTTP server ──

    /// Serve one canned JSON body per connection, in order. Returns the port
    /// and a handle yielding the `sessionID` of every request received.
    fn serve(bodies: Vec<&'static str>) -> (u16, std::thread::JoinHandle<Vec<String>>) {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for body in bodies {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request = vec![0; content_length];
                reader.read_exact(&mut request).unwrap();
                let request: Value = serde_json::from_slice(&request).unwrap();
                seen.push(request["sessionID"].as_str().unwrap_or_default().to_string());

                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
                .unwrap();
                stream.flush().unwrap();
            }
            seen
        });
        (port, handle)
    }

    fn local_source(port: u16) -> DolphinHttpSource {
        let settings = DolphinSettings {
            host: "127.0.0.1".into(),
            port,
            timeout: Duration::from_secs(5),
            max_retries: 0,
            ..Default::default()
        };
        DolphinHttpSource::new(settings, Arc::new(CircuitBreaker::default()))
            .unwrap()
            .with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn expired_session_logs_in_again_and_retries() {
        let (port, server) = serve(vec![
            r#"{"sessionID":"s1","resultCode":"0","msg":"","object":[]}"#,
            r#"{"sessionID":"s1","resultCode":"1","msg":"Invalid session","object":[]}"#,
            r#"{"sessionID":"s2","resultCode":"0","msg":"","object":[]}"#,
            r#"{"sessionID":"s2","resultCode":"0","msg":"","object":[{"form":"vector","value":["stock_daily"]}]}"#,
        ]);
        let source = local_source(port);

        source.connect().unwrap();
        let tables = source.list_tables("dfs://stock").unwrap();
        assert_eq!(tables, vec!["stock_daily".to_string()]);
        assert_eq!(source.current_session(), "s2");

        let seen = server.join().unwrap();
        assert_eq!(seen, vec!["0", "s1", "0", "s2"]);
    }

    #[test]
    fn other_script_errors_keep_the_session() {
        let (port, server) = serve(vec![
            r#"{"sessionID":"s1","resultCode":"0","msg":"","object":[]}"#,
            r#"{"sessionID":"s1","resultCode":"1","msg":"table not found","object":[]}"#,
        ]);
        let source = local_source(port);

        source.connect().unwrap();
        let err = source.list_tables("dfs://stock").unwrap_err();
        assert_eq!(err, FetchError::Query("table not found".into()));
        assert_eq!(source.current_session(), "s1");
        assert_eq!(server.join().unwrap(), vec!["0", "s1"]);
    }

    #[test]
    fn unreachable_server_is_transient_failure() {
        let settings = DolphinSettings {
            host: "127.0.0.1".into(),
            port: 1,
            timeout: Duration::from_secs(2),
            max_retries: 0,
            ..Default::default()
        };
        let source = DolphinHttpSource::new(settings, Arc::new(CircuitBreaker::default())).unwrap();
        let err = source.connect().unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
