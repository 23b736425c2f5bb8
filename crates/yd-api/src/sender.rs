//! The request send pipeline: inject inherited headers and auth, run the
//! request scripts, interpolate, send, then run the response scripts.

use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{debug, info, info_span};
use yd_core::{KvRow, RequestData, RestRequest, RestResponse, YaadeError};
use yd_interp::{interpolate_with, InterpolatorOptions};
use yd_sandbox::{
    execute_request_script, execute_response_script, ExecFn, LogBuffer, SandboxOptions,
    ScriptHost, ScriptLevel,
};

use crate::auth::authorization_header;
use crate::secrets::replace_secrets;
use crate::store::{SharedWorkspace, WorkspaceEnv};

/// Script-initiated sends allowed before a loop is assumed.
pub const MAX_EXEC_DEPTH: u32 = 5;
pub const EXEC_LOOP: &str = "Exec loop detected in request script";

/// A fully resolved request, ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedRequest {
    pub request_id: i64,
    pub method: String,
    pub uri: String,
    pub headers: Vec<KvRow>,
    pub body: String,
}

pub trait Transport {
    fn send(&self, request: &PreparedRequest) -> Result<RestResponse, YaadeError>;
}

/// Answers every request with `200` and the prepared request as JSON body.
#[derive(Debug, Default)]
pub struct EchoTransport;

impl Transport for EchoTransport {
    fn send(&self, request: &PreparedRequest) -> Result<RestResponse, YaadeError> {
        let body = serde_json::to_string(request).map_err(|error| {
            YaadeError::new(
                "SEND_TRANSPORT",
                format!("Failed to encode request: {}", error),
            )
        })?;
        Ok(RestResponse {
            status: 200,
            headers: vec![KvRow::new("Content-Type", "application/json")],
            body,
            time: 0,
            test_report: None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SenderOptions {
    pub sandbox: SandboxOptions,
    /// Seed for `$r` and `rand`; `None` seeds from the clock.
    pub random_seed: Option<u32>,
}

struct CollectionScripts {
    request: Option<String>,
    response: Option<String>,
}

fn non_empty(script: &Option<String>) -> Option<&str> {
    script.as_deref().filter(|script| !script.trim().is_empty())
}

pub struct RequestSender {
    workspace: SharedWorkspace,
    transport: Rc<dyn Transport>,
    logs: LogBuffer,
    options: SenderOptions,
    this: Weak<RequestSender>,
}

impl RequestSender {
    pub fn new(
        workspace: SharedWorkspace,
        transport: Rc<dyn Transport>,
        options: SenderOptions,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            workspace,
            transport,
            logs: LogBuffer::new(),
            options,
            this: this.clone(),
        })
    }

    /// Script logs of every send made through this sender, nested ones included.
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn workspace(&self) -> &SharedWorkspace {
        &self.workspace
    }

    pub fn send(&self, request_id: i64, env_name: Option<&str>) -> Result<RestResponse, YaadeError> {
        self.send_by_id(request_id, env_name, 0)
    }

    fn send_by_id(
        &self,
        request_id: i64,
        env_name: Option<&str>,
        depth: u32,
    ) -> Result<RestResponse, YaadeError> {
        let request = self.workspace.borrow().request(request_id).cloned();
        let request = request.ok_or_else(|| {
            YaadeError::new(
                "SEND_REQUEST_NOT_FOUND",
                format!("REST Request with id {} not found", request_id),
            )
        })?;
        self.send_request(&request, env_name, depth)
    }

    /// `depth` counts script-initiated hops; the top-level send is 0.
    pub fn send_request(
        &self,
        request: &RestRequest,
        env_name: Option<&str>,
        depth: u32,
    ) -> Result<RestResponse, YaadeError> {
        if depth >= MAX_EXEC_DEPTH {
            return Err(YaadeError::new("SEND_EXEC_LOOP", EXEC_LOOP));
        }
        let span = info_span!("send", request_id = request.id, depth);
        let _guard = span.enter();

        let (injected, scripts) = self.inject(request);
        let host = self.script_host(&injected, env_name, depth);

        if let Some(script) = non_empty(&scripts.request) {
            execute_request_script(&injected, script, &host, ScriptLevel::Collection)?;
        }
        if let Some(script) = non_empty(&injected.data.request_script) {
            execute_request_script(&injected, script, &host, ScriptLevel::Request)?;
        }

        let prepared = self.prepare(&injected, env_name)?;
        info!(method = %prepared.method, uri = %prepared.uri, "sending request");
        let mut response = self.transport.send(&prepared)?;

        let mut report = None;
        if let Some(script) = non_empty(&injected.data.response_script) {
            report =
                execute_response_script(&injected, &response, script, &host, ScriptLevel::Request)?;
        }
        if let Some(script) = non_empty(&scripts.response) {
            let collection_report = execute_response_script(
                &injected,
                &response,
                script,
                &host,
                ScriptLevel::Collection,
            )?;
            report = report.or(collection_report);
        }
        response.test_report = report;
        Ok(response)
    }

    /// Sends `request_id` one hop deeper than the calling script. Without an
    /// explicit environment the request is sent uninterpolated.
    pub fn exec_hook(&self, depth: u32) -> ExecFn {
        let this = self.this.clone();
        Rc::new(move |request_id: i64, env_name: Option<String>| {
            let sender = this.upgrade().ok_or_else(|| {
                YaadeError::new("SEND_CLOSED", "Request sender is no longer available")
            })?;
            debug!(request_id, depth = depth + 1, env = ?env_name, "exec");
            let response = sender.send_by_id(request_id, env_name.as_deref(), depth + 1)?;
            serde_json::to_value(&response).map_err(|error| {
                YaadeError::new(
                    "SEND_RESPONSE_ENCODE",
                    format!("Failed to encode response: {}", error),
                )
            })
        })
    }

    pub(crate) fn host_for(
        &self,
        collection_id: i64,
        env_name: Option<&str>,
        depth: u32,
        sandbox: SandboxOptions,
    ) -> ScriptHost {
        let env = WorkspaceEnv::new(
            Rc::clone(&self.workspace),
            collection_id,
            env_name.map(str::to_string),
        );
        let mut host = ScriptHost::new(Rc::new(env), env_name.map(str::to_string));
        host.exec = Some(self.exec_hook(depth));
        host.logs = self.logs.clone();
        host.options = sandbox;
        host.random_seed = self.options.random_seed;
        host
    }

    fn script_host(&self, request: &RestRequest, env_name: Option<&str>, depth: u32) -> ScriptHost {
        self.host_for(
            request.collection_id,
            env_name,
            depth,
            self.options.sandbox.clone(),
        )
    }

    fn inject(&self, request: &RestRequest) -> (RestRequest, CollectionScripts) {
        let workspace = self.workspace.borrow();
        let mut injected = request.clone();
        injected.data.headers = workspace.merged_headers(request);
        injected.data.auth = workspace.effective_auth(request);
        let scripts = match workspace.collection(request.collection_id) {
            Some(collection) => CollectionScripts {
                request: collection.data.request_script.clone(),
                response: collection.data.response_script.clone(),
            },
            None => CollectionScripts {
                request: None,
                response: None,
            },
        };
        (injected, scripts)
    }

    /// Interpolation, secrets and the auth header. Scripts themselves are
    /// never interpolated.
    fn prepare(
        &self,
        request: &RestRequest,
        env_name: Option<&str>,
    ) -> Result<PreparedRequest, YaadeError> {
        let (env, secrets) = {
            let workspace = self.workspace.borrow();
            (
                workspace.merged_env_data(request.collection_id, env_name),
                workspace.secrets(request.collection_id, env_name),
            )
        };

        let mut data = RequestData {
            request_script: None,
            response_script: None,
            ..request.data.clone()
        };
        if env_name.is_some() {
            data = interpolate_request(&data, &env.unwrap_or_default(), self.options.random_seed)?;
        }

        let secrets = secrets.unwrap_or_default();
        let mut headers = data
            .headers
            .iter()
            .map(|row| KvRow {
                value: replace_secrets(&row.value, &secrets),
                ..row.clone()
            })
            .collect::<Vec<_>>();
        if let Some(header) = data.auth.as_ref().and_then(authorization_header) {
            headers.push(KvRow::new("Authorization", replace_secrets(&header, &secrets)));
        }

        Ok(PreparedRequest {
            request_id: request.id,
            method: data.method,
            uri: with_scheme(&replace_secrets(&data.uri, &secrets)),
            headers,
            body: replace_secrets(&data.body, &secrets),
        })
    }
}

fn interpolate_request(
    data: &RequestData,
    env: &yd_core::EnvData,
    random_seed: Option<u32>,
) -> Result<RequestData, YaadeError> {
    let value = serde_json::to_value(data).map_err(|error| {
        YaadeError::new(
            "INTERPOLATION_FAILED",
            format!("Failed to encode request: {}", error),
        )
    })?;
    let outcome = interpolate_with(
        &value,
        Some(env),
        InterpolatorOptions {
            random_seed,
            ..InterpolatorOptions::default()
        },
    );
    if !outcome.is_clean() {
        let details = outcome
            .errors
            .iter()
            .map(|error| format!("{} -> {}", error.key, error.value))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(YaadeError::new(
            "INTERPOLATION_FAILED",
            format!("Failed to interpolate request: {}", details),
        ));
    }
    serde_json::from_value::<RequestData>(outcome.result).map_err(|error| {
        YaadeError::new(
            "INTERPOLATION_FAILED",
            format!("Interpolated request is malformed: {}", error),
        )
    })
}

fn with_scheme(uri: &str) -> String {
    if uri.is_empty() || uri.contains("://") {
        uri.to_string()
    } else {
        format!("http://{}", uri)
    }
}
