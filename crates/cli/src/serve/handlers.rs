//! HTTP route handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::error;

use decree_core::sexpr::{parse_rules, RuleDiagnostic, SourceRule};
use decree_core::{Rule, Ruleset, Signature, StringParams, Type};
use decree_storage::{ListOptions, StoreError};

use super::state::AppState;
use super::json_error;

type QueryPairs = Vec<(String, String)>;

fn first<'a>(pairs: &'a QueryPairs, name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Query flags: present with no value, `true` or `1`.
fn flag(pairs: &QueryPairs, name: &str) -> bool {
    match first(pairs, name) {
        Some(value) => value.is_empty() || value == "true" || value == "1",
        None => false,
    }
}

/// Map a service error onto the wire: lookups are 404, state conflicts
/// 409, validation and parameter problems 400, the rest 500.
fn error_response(err: StoreError) -> Response {
    let status = match &err {
        StoreError::RulesetNotFound | StoreError::SignatureNotFound => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists => StatusCode::CONFLICT,
        StoreError::InvalidCursor
        | StoreError::CompactedRevision
        | StoreError::InvalidPath { .. }
        | StoreError::Validation(_)
        | StoreError::Eval(_) => StatusCode::BAD_REQUEST,
        // NotModified is success-shaped; callers handle it before this.
        StoreError::NotModified => StatusCode::OK,
        StoreError::CasRetryExhausted(_) | StoreError::Backend(_) => {
            error!("request failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, &err.to_string()).into_response()
}

/// The structured 400 body of an authoring validation failure: one entry
/// per broken rule, located by JSON path and source position.
fn validation_response(diagnostics: &[RuleDiagnostic]) -> Response {
    let fields: Vec<serde_json::Value> = diagnostics
        .iter()
        .map(|d| {
            serde_json::json!({
                "path": ["rules", d.rule.to_string(), "sExpr"],
                "error": d.error,
            })
        })
        .collect();
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": "validation", "fields": fields })),
    )
        .into_response()
}

// ── Core surface ──────────────────────────────────────────────────────

/// `GET /rulesets/` — only meaningful with the `list` flag.
pub(crate) async fn handle_root_get(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<QueryPairs>,
) -> Response {
    if !flag(&pairs, "list") {
        return json_error(StatusCode::NOT_FOUND, "not found").into_response();
    }

    let mut opts = ListOptions {
        cursor: first(&pairs, "cursor").unwrap_or_default().to_string(),
        paths_only: flag(&pairs, "paths_only"),
        all_versions: flag(&pairs, "all_versions"),
        ..ListOptions::default()
    };
    if let Some(limit) = first(&pairs, "limit") {
        match limit.parse::<usize>() {
            Ok(limit) => opts.limit = limit,
            Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid limit").into_response(),
        }
    }
    let prefix = first(&pairs, "prefix").unwrap_or_default().to_string();

    match state.rulesets.list(&prefix, &opts).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /rulesets/?watch&revision=` — long-poll for changes. The optional
/// body is a JSON list of path prefixes; no body watches everything.
pub(crate) async fn handle_root_post(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<QueryPairs>,
    body: Option<Json<Vec<String>>>,
) -> Response {
    if !flag(&pairs, "watch") {
        return json_error(StatusCode::NOT_FOUND, "not found").into_response();
    }

    let revision = match first(&pairs, "revision") {
        None | Some("") => -1,
        Some(raw) => match raw.parse::<i64>() {
            Ok(revision) => revision,
            Err(_) => {
                return json_error(StatusCode::BAD_REQUEST, "invalid revision").into_response()
            }
        },
    };
    let prefixes = body.map(|Json(paths)| paths).unwrap_or_default();

    match state.rulesets.watch(&prefixes, revision).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /rulesets/{path}` — fetch, or evaluate with the `eval` flag.
pub(crate) async fn handle_ruleset_get(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(pairs): Query<QueryPairs>,
) -> Response {
    let version = first(&pairs, "version").filter(|v| !v.is_empty());

    if flag(&pairs, "eval") {
        // Every non-reserved query pair is an evaluation parameter.
        let params: StringParams = pairs
            .iter()
            .filter(|(key, _)| key != "eval" && key != "version")
            .cloned()
            .collect();

        return match state.rulesets.eval(&path, version, &params).await {
            Ok(result) => (StatusCode::OK, Json(result)).into_response(),
            Err(e) => error_response(e),
        };
    }

    match state.rulesets.get(&path, version).await {
        Ok(ruleset) => (StatusCode::OK, Json(ruleset)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /rulesets/{path}` — create a ruleset from a JSON signature.
pub(crate) async fn handle_create(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(signature): Json<Signature>,
) -> Response {
    match state.rulesets.create(&path, &signature).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(Ruleset {
                path,
                signature,
                versions: Vec::new(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `PUT /rulesets/{path}` — append a version from a JSON rule list.
/// An unchanged list is success: the current ruleset comes back with 200.
pub(crate) async fn handle_put(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(rules): Json<Vec<Rule>>,
) -> Response {
    let version = match state.rulesets.put(&path, &rules).await {
        Ok(version) => Some(version),
        Err(StoreError::NotModified) => None,
        Err(e) => return error_response(e),
    };

    match state.rulesets.get(&path, version.as_deref()).await {
        Ok(ruleset) => (StatusCode::OK, Json(ruleset)).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Authoring surface (s-expressions) ─────────────────────────────────

/// The wire form of a signature on the authoring surface: an ordered
/// parameter list rather than a map.
#[derive(Debug, Deserialize)]
struct AuthoringSignature {
    #[serde(default)]
    params: Vec<BTreeMap<String, String>>,
    #[serde(rename = "returnType")]
    return_type: String,
}

fn convert_signature(signature: &AuthoringSignature) -> Result<Signature, String> {
    let mut params = BTreeMap::new();
    for (i, param) in signature.params.iter().enumerate() {
        let name = param
            .get("name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("parameter {i} has no name"))?;
        let ty = param
            .get("type")
            .filter(|ty| !ty.is_empty())
            .ok_or_else(|| format!("parameter {i} ({name}) has no type"))?;
        let ty = Type::concrete_from_name(ty)
            .ok_or_else(|| format!("parameter {i} ({name}) has unknown type {ty:?}"))?;
        params.insert(name.clone(), ty);
    }
    let return_type = Type::concrete_from_name(&signature.return_type)
        .ok_or_else(|| format!("unknown return type {:?}", signature.return_type))?;
    Ok(Signature::new(params, return_type))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthoringCreate {
    path: String,
    signature: AuthoringSignature,
    #[serde(default)]
    rules: Vec<SourceRule>,
}

/// `POST /i/rulesets/` — create a ruleset and its first version from
/// s-expression rules. Nothing is written unless every rule parses.
pub(crate) async fn handle_authoring_create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthoringCreate>,
) -> Response {
    let signature = match convert_signature(&payload.signature) {
        Ok(signature) => signature,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, &message).into_response(),
    };

    let rules = match parse_rules(&payload.rules, &signature) {
        Ok(rules) => rules,
        Err(diagnostics) => return validation_response(&diagnostics),
    };

    if let Err(e) = state.rulesets.create(&payload.path, &signature).await {
        return error_response(e);
    }
    if !rules.is_empty() {
        if let Err(e) = state.rulesets.put(&payload.path, &rules).await {
            return error_response(e);
        }
    }

    StatusCode::CREATED.into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthoringEdit {
    #[serde(default)]
    rules: Vec<SourceRule>,
}

/// `PATCH /i/rulesets/{path}` — replace the rule list with newly authored
/// s-expression rules. An unchanged list is still a 204: from the author's
/// point of view all is well.
pub(crate) async fn handle_authoring_edit(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(payload): Json<AuthoringEdit>,
) -> Response {
    let current = match state.rulesets.get(&path, None).await {
        Ok(ruleset) => ruleset,
        Err(e) => return error_response(e),
    };

    let rules = match parse_rules(&payload.rules, &current.signature) {
        Ok(rules) => rules,
        Err(diagnostics) => return validation_response(&diagnostics),
    };

    match state.rulesets.put(&path, &rules).await {
        Ok(_) | Err(StoreError::NotModified) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
